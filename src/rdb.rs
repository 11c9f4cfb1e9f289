use bytes::Bytes;

/// An empty RDB file, handed to every replica on full resync.
const EMPTY_RDB_HEX: &str = "524544495330303131fa0972656469732d76657205372e322e30fa0a72656469732d62697473c040fa056374696d65c26d08bc65fa08757365642d6d656dc2b0c41000fa08616f662d62617365c000fff06e3bfec0ff5aa2";

/// Bootstrap payload sent as the bulk half of a PSYNC reply.
pub fn bootstrap_snapshot() -> Result<Bytes, hex::FromHexError> {
    hex::decode(EMPTY_RDB_HEX).map(Bytes::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_is_an_rdb_file() {
        let snapshot = bootstrap_snapshot().unwrap();
        assert!(snapshot.starts_with(b"REDIS0011"));
        assert_eq!(snapshot.len(), 88);
    }
}

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use rand::Rng;

use crate::config::ServerConfig;

const REPLID_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const REPLID_LEN: usize = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Master,
    Replica,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Master => f.write_str("master"),
            Role::Replica => f.write_str("slave"),
        }
    }
}

/// Role and replication position of this node. The role never changes
/// after construction; only the offset moves.
#[derive(Debug)]
pub struct NodeState {
    role: Role,
    replication_id: String,
    replication_offset: AtomicU64,
}

impl NodeState {
    pub fn master() -> Self {
        Self {
            role: Role::Master,
            replication_id: generate_replication_id(),
            replication_offset: AtomicU64::new(0),
        }
    }

    pub fn replica() -> Self {
        Self {
            role: Role::Replica,
            replication_id: String::new(),
            replication_offset: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        if config.replica_of.is_some() {
            Self::replica()
        } else {
            Self::master()
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_master(&self) -> bool {
        self.role == Role::Master
    }

    pub fn replication_id(&self) -> &str {
        &self.replication_id
    }

    pub fn replication_offset(&self) -> u64 {
        self.replication_offset.load(Ordering::SeqCst)
    }

    pub fn advance_offset(&self, bytes: usize) -> u64 {
        let bytes = bytes as u64;
        self.replication_offset.fetch_add(bytes, Ordering::SeqCst) + bytes
    }

    pub fn info(&self) -> String {
        match self.role {
            Role::Master => format!("role:{}\n", self.role),
            Role::Replica => format!(
                "role:{}\nmain_replid:{}\nmain_repl_offset:{}\n",
                self.role,
                self.replication_id,
                self.replication_offset()
            ),
        }
    }
}

fn generate_replication_id() -> String {
    let mut rng = rand::thread_rng();
    (0..REPLID_LEN)
        .map(|_| REPLID_CHARSET[rng.gen_range(0..REPLID_CHARSET.len())] as char)
        .collect()
}

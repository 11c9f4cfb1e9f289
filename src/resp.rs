use bytes::{BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;

/// Largest argument count a request frame may declare.
pub const MAX_ARGS: usize = 128;
/// Size of the single read buffer a request frame has to fit in.
pub const MAX_MESSAGE: usize = 4096;

const CRLF: &[u8] = b"\r\n";

/// A typed request or reply value, shared by the codec and the command engine.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Written as-is followed by CRLF; the producer supplies any leading `+`.
    Simple(String),
    Bulk(Bytes),
    Integer(i64),
    /// Request arguments, each written as a bulk string.
    Args(Vec<String>),
    /// Simple string array: items joined with CRLF.
    List(Vec<String>),
    Error(String),
    Nil,
    /// Heterogeneous array, each element encoded recursively.
    Multi(Vec<Command>),
}

impl Command {
    pub fn simple(s: impl Into<String>) -> Self {
        Command::Simple(s.into())
    }

    pub fn bulk(payload: impl Into<Bytes>) -> Self {
        Command::Bulk(payload.into())
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Command::Error(_))
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode_into(&mut buf);
        buf.freeze()
    }

    fn encode_into(&self, buf: &mut BytesMut) {
        match self {
            Command::Simple(s) => {
                buf.put_slice(s.as_bytes());
                buf.put_slice(CRLF);
            }
            Command::Bulk(payload) => put_bulk(buf, payload),
            Command::Integer(n) => buf.put_slice(format!(":{}\r\n", n).as_bytes()),
            Command::Args(items) => {
                put_header(buf, items.len());
                for item in items {
                    put_bulk(buf, item.as_bytes());
                }
            }
            Command::List(items) => {
                put_header(buf, items.len());
                buf.put_slice(items.join("\r\n").as_bytes());
                buf.put_slice(CRLF);
            }
            Command::Error(msg) => buf.put_slice(format!("-ERR {}\r\n", msg).as_bytes()),
            Command::Nil => buf.put_slice(b"$-1\r\n"),
            Command::Multi(parts) => {
                put_header(buf, parts.len());
                for part in parts {
                    part.encode_into(buf);
                }
            }
        }
    }
}

fn put_header(buf: &mut BytesMut, len: usize) {
    buf.put_slice(format!("*{}\r\n", len).as_bytes());
}

fn put_bulk(buf: &mut BytesMut, payload: &[u8]) {
    buf.put_slice(format!("${}\r\n", payload.len()).as_bytes());
    buf.put_slice(payload);
    buf.put_slice(CRLF);
}

/// Encodes a request as an array of bulk strings.
pub fn encode_array(items: &[String]) -> Bytes {
    Command::Args(items.to_vec()).encode()
}

/// Decodes one request frame into its tokens, command name first.
///
/// The frame has to arrive whole. The declared count is only range-checked
/// and bulk length prefixes are skipped: every prefix/payload pair yields
/// one token.
pub fn decode(data: &[u8]) -> Result<Vec<String>, ProtocolError> {
    if data.len() < 4 {
        return Err(ProtocolError::InvalidLength);
    }
    if data[0] != b'*' {
        return Err(ProtocolError::InvalidProtocol);
    }

    let parts = split_crlf(&data[1..]);
    if parts.len() < 3 {
        return Err(ProtocolError::InvalidFormat);
    }

    std::str::from_utf8(parts[0])
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .filter(|n| (1..=MAX_ARGS).contains(n))
        .ok_or(ProtocolError::InvalidArgCount)?;

    Ok(parts[1..]
        .chunks_exact(2)
        .map(|pair| String::from_utf8_lossy(pair[1]).into_owned())
        .collect())
}

fn split_crlf(data: &[u8]) -> Vec<&[u8]> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while i + 1 < data.len() {
        if data[i] == b'\r' && data[i + 1] == b'\n' {
            parts.push(&data[start..i]);
            i += 2;
            start = i;
        } else {
            i += 1;
        }
    }
    parts.push(&data[start..]);
    parts
}

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::commands::{dispatch, Detached};
use crate::config::MasterAddr;
use crate::resp::{decode, encode_array, MAX_MESSAGE};
use crate::server::Context;

/// Pause between a handshake reply and the next step.
pub const HANDSHAKE_PACING: Duration = Duration::from_millis(100);

/// What happened during the handshake. Steps that failed were logged and
/// skipped; the handshake never aborts on its own.
#[derive(Debug, Default)]
pub struct HandshakeReport {
    pub replies: Vec<String>,
    pub failed_steps: Vec<&'static str>,
}

impl HandshakeReport {
    pub fn is_clean(&self) -> bool {
        self.failed_steps.is_empty()
    }
}

/// Dials the master and runs the handshake. The returned stream is the
/// upstream replication channel.
pub async fn connect_to_master(master: &MasterAddr, announce: &str) -> Result<TcpStream> {
    let addr = master.addr();
    let mut stream = TcpStream::connect(&addr)
        .await
        .with_context(|| format!("failed to connect to master at {}", addr))?;

    let report = handshake(&mut stream, announce).await;
    if report.is_clean() {
        info!(master = %addr, "handshake with master complete");
    } else {
        warn!(master = %addr, failed = ?report.failed_steps, "handshake with master finished with errors");
    }
    Ok(stream)
}

/// PING, REPLCONF listening-port, REPLCONF capa, PSYNC; one read per step.
pub async fn handshake<S>(stream: &mut S, announce: &str) -> HandshakeReport
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let steps: [(&'static str, Vec<&str>); 4] = [
        ("ping", vec!["PING"]),
        ("listening-port", vec!["REPLCONF", "LISTENING-PORT", announce]),
        ("capa", vec!["REPLCONF", "capa", "psync2"]),
        ("psync", vec!["PSYNC", "?", "-1"]),
    ];

    let mut report = HandshakeReport::default();
    let mut buffer = vec![0u8; MAX_MESSAGE];
    let last = steps.len() - 1;
    for (i, (step, words)) in steps.into_iter().enumerate() {
        let frame = encode_array(&words.iter().map(|w| w.to_string()).collect::<Vec<_>>());
        let mut failed = false;

        if let Err(err) = stream.write_all(&frame).await {
            warn!(step, error = %err, "failed to send handshake step to master");
            failed = true;
        }

        match stream.read(&mut buffer).await {
            Ok(0) => {
                warn!(step, "master closed the connection during handshake");
                failed = true;
            }
            Ok(n) => {
                let reply = String::from_utf8_lossy(&buffer[..n]).into_owned();
                debug!(step, reply = %reply.escape_debug(), "handshake reply");
                report.replies.push(reply);
            }
            Err(err) => {
                warn!(step, error = %err, "failed to read handshake reply from master");
                failed = true;
            }
        }

        if failed {
            report.failed_steps.push(step);
        }
        if i < last {
            sleep(HANDSHAKE_PACING).await;
        }
    }
    report
}

/// Write side of the upstream master connection.
pub struct MasterLink {
    addr: String,
    writer: Mutex<OwnedWriteHalf>,
}

impl MasterLink {
    pub fn new(addr: impl Into<String>, writer: OwnedWriteHalf) -> Self {
        Self {
            addr: addr.into(),
            writer: Mutex::new(writer),
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Sends a frame upstream without waiting for any acknowledgment.
    pub async fn forward(&self, frame: &[u8]) {
        if let Err(err) = self.writer.lock().await.write_all(frame).await {
            warn!(master = %self.addr, error = %err, "failed to forward command to master");
        }
    }
}

pub fn spawn_ingestion<R>(reader: R, ctx: Arc<Context>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(ingest(reader, ctx))
}

/// Applies commands streamed by the master. Nothing is written back and
/// nothing is propagated further. Stops at EOF or the first bad frame.
pub async fn ingest<R>(mut reader: R, ctx: Arc<Context>)
where
    R: AsyncRead + Unpin,
{
    let mut buffer = vec![0u8; MAX_MESSAGE];
    loop {
        let n = match reader.read(&mut buffer).await {
            Ok(0) => {
                info!("master closed the replication stream");
                return;
            }
            Ok(n) => n,
            Err(err) => {
                warn!(error = %err, "failed to read from master");
                return;
            }
        };

        let tokens = match decode(&buffer[..n]) {
            Ok(tokens) => tokens,
            Err(err) => {
                warn!(error = %err, "failed to decode command from master, replication stopped");
                return;
            }
        };
        let Some((name, args)) = tokens.split_first() else {
            continue;
        };

        match dispatch(name, args, &ctx, &Detached).await {
            Some(_) => {
                let offset = ctx.node.advance_offset(n);
                debug!(command = %name, offset, "applied command from master");
            }
            None => warn!(command = %name, "unknown command from master"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Value;
    use tokio::io::duplex;
    use tokio::net::TcpListener;
    use tokio::time::timeout;

    const FRAMES: [&str; 4] = [
        "*1\r\n$4\r\nPING\r\n",
        "*3\r\n$8\r\nREPLCONF\r\n$14\r\nLISTENING-PORT\r\n$14\r\n127.0.0.1:3313\r\n",
        "*3\r\n$8\r\nREPLCONF\r\n$4\r\ncapa\r\n$6\r\npsync2\r\n",
        "*3\r\n$5\r\nPSYNC\r\n$1\r\n?\r\n$2\r\n-1\r\n",
    ];

    #[tokio::test]
    async fn handshake_sends_the_four_steps_in_order() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let fake_master = tokio::spawn(async move {
            let (mut conn, _) = listener.accept().await.unwrap();
            let mut seen = Vec::new();
            let mut buf = vec![0u8; MAX_MESSAGE];
            for reply in ["+PONG\r\n", "+OK\r\n", "+OK\r\n", "+FULLRESYNC x 0\r\n"] {
                let n = conn.read(&mut buf).await.unwrap();
                seen.push(String::from_utf8_lossy(&buf[..n]).into_owned());
                conn.write_all(reply.as_bytes()).await.unwrap();
            }
            seen
        });

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let report = handshake(&mut stream, "127.0.0.1:3313").await;

        assert!(report.is_clean());
        assert_eq!(report.replies[0], "+PONG\r\n");
        assert_eq!(fake_master.await.unwrap(), FRAMES);
    }

    #[tokio::test]
    async fn handshake_continues_past_a_dead_master() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let fake_master = tokio::spawn(async move {
            let (conn, _) = listener.accept().await.unwrap();
            drop(conn);
        });

        let mut stream = TcpStream::connect(addr).await.unwrap();
        fake_master.await.unwrap();
        let report = handshake(&mut stream, "127.0.0.1:3313").await;

        assert_eq!(
            report.failed_steps,
            ["ping", "listening-port", "capa", "psync"]
        );
    }

    #[tokio::test]
    async fn handshake_only_pauses_between_steps() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut conn, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; MAX_MESSAGE];
            for _ in 0..4 {
                conn.read(&mut buf).await.unwrap();
                conn.write_all(b"+OK\r\n").await.unwrap();
            }
            // Hold the connection open until the client is done.
            let _ = conn.read(&mut buf).await;
        });

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let started = tokio::time::Instant::now();
        let report = handshake(&mut stream, "127.0.0.1:3313").await;
        let elapsed = started.elapsed();

        assert!(report.is_clean());
        assert!(elapsed >= HANDSHAKE_PACING * 3, "{:?}", elapsed);
        assert!(elapsed < HANDSHAKE_PACING * 4, "{:?}", elapsed);
    }

    #[tokio::test]
    async fn ingestion_applies_commands_without_replying() {
        let ctx = Arc::new(Context::replica());
        let (mut master, replica) = duplex(MAX_MESSAGE);
        let task = spawn_ingestion(replica, Arc::clone(&ctx));

        let frame = b"*3\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$3\r\nbar\r\n";
        master.write_all(frame).await.unwrap();
        drop(master);
        timeout(Duration::from_secs(2), task).await.unwrap().unwrap();

        assert_eq!(ctx.store.get("foo"), Some(Value::from("bar")));
        assert_eq!(ctx.node.replication_offset(), frame.len() as u64);
    }

    #[tokio::test]
    async fn ingestion_stops_on_a_bad_frame() {
        let ctx = Arc::new(Context::replica());
        let (mut master, replica) = duplex(MAX_MESSAGE);
        let task = spawn_ingestion(replica, Arc::clone(&ctx));

        master.write_all(b"+OK\r\n").await.unwrap();
        timeout(Duration::from_secs(2), task).await.unwrap().unwrap();

        master
            .write_all(b"*3\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$3\r\nbar\r\n")
            .await
            .ok();
        assert_eq!(ctx.store.get("foo"), None);
    }
}

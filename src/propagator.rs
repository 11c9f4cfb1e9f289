use std::collections::HashMap;
use std::io;
use std::sync::{Mutex as StdMutex, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, trace, warn};

use crate::error::ReplicationError;

pub const DIAL_ATTEMPTS: usize = 5;
pub const DIAL_BACKOFF: Duration = Duration::from_millis(250);
pub const PROPAGATION_DEADLINE: Duration = Duration::from_secs(5);

struct ReplicaConn {
    addr: String,
    writer: OwnedWriteHalf,
}

impl ReplicaConn {
    async fn send(&mut self, frame: &[u8]) -> Result<(), ReplicationError> {
        match timeout(PROPAGATION_DEADLINE, self.writer.write_all(frame)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => Err(ReplicationError::Propagation {
                addr: self.addr.clone(),
                source,
            }),
            Err(_) => Err(ReplicationError::PropagationTimeout {
                addr: self.addr.clone(),
            }),
        }
    }
}

/// Replicas this master fans writes out to.
///
/// Entries are only ever appended. A replica that stops accepting writes
/// stays registered and keeps failing, one warning per propagated write.
#[derive(Default)]
pub struct ReplicaRegistry {
    replicas: Mutex<Vec<ReplicaConn>>,
    status: StdMutex<HashMap<String, bool>>,
}

impl ReplicaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dials the announced address and appends the connection.
    pub async fn register(&self, addr: &str) -> Result<(), ReplicationError> {
        self.set_status(addr, false);

        let stream = dial_with_retry(addr).await?;
        let (reader, writer) = stream.into_split();
        tokio::spawn(drain_acks(addr.to_string(), reader));

        self.replicas.lock().await.push(ReplicaConn {
            addr: addr.to_string(),
            writer,
        });
        self.set_status(addr, true);
        info!(%addr, "replica registered");
        Ok(())
    }

    /// Writes `frame` to every registered replica in registration order.
    /// Returns how many writes went through.
    pub async fn propagate(&self, frame: &[u8]) -> usize {
        let mut replicas = self.replicas.lock().await;
        let mut delivered = 0;
        for replica in replicas.iter_mut() {
            match replica.send(frame).await {
                Ok(()) => delivered += 1,
                Err(err) => warn!(error = %err, "propagation to replica failed"),
            }
        }
        delivered
    }

    pub async fn len(&self) -> usize {
        self.replicas.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// `Some(true)` once the dial-back to an announced replica succeeded.
    pub fn status(&self, addr: &str) -> Option<bool> {
        self.status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(addr)
            .copied()
    }

    fn set_status(&self, addr: &str, ready: bool) {
        self.status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(addr.to_string(), ready);
    }
}

async fn dial_with_retry(addr: &str) -> Result<TcpStream, ReplicationError> {
    let mut last_err = None;
    for attempt in 1..=DIAL_ATTEMPTS {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(err) => {
                warn!(%addr, attempt, error = %err, "could not reach replica");
                last_err = Some(err);
                sleep(DIAL_BACKOFF).await;
            }
        }
    }
    Err(ReplicationError::Dial {
        addr: addr.to_string(),
        attempts: DIAL_ATTEMPTS,
        source: last_err.unwrap_or_else(|| io::Error::other("no dial attempted")),
    })
}

// Replicas answer propagated writes like any client; nobody needs the
// replies, but they must not pile up in the socket buffer.
async fn drain_acks(addr: String, mut reader: OwnedReadHalf) {
    let mut buffer = [0u8; 512];
    loop {
        match reader.read(&mut buffer).await {
            Ok(0) => break,
            Ok(n) => trace!(%addr, bytes = n, "discarded replica reply"),
            Err(err) => {
                debug!(%addr, error = %err, "replica connection read failed");
                break;
            }
        }
    }
    debug!(%addr, "replica connection closed");
}

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use replikv::config::{MasterAddr, ServerConfig};
use replikv::server::{Context, Server};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::time::timeout;

pub const READ_TIMEOUT: Duration = Duration::from_secs(3);

pub struct Running {
    pub addr: SocketAddr,
    pub ctx: Arc<Context>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl Running {
    pub async fn connect(&self) -> Result<TcpStream> {
        TcpStream::connect(self.addr)
            .await
            .with_context(|| format!("connect to {}", self.addr))
    }

    pub fn master_addr(&self) -> MasterAddr {
        MasterAddr {
            host: self.addr.ip().to_string(),
            port: self.addr.port(),
        }
    }
}

impl Drop for Running {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

pub async fn start(config: ServerConfig) -> Result<Running> {
    let server = Server::bind(&config).await?;
    let addr = server.local_addr()?;
    let ctx = server.context();
    let (tx, rx) = oneshot::channel();
    tokio::spawn(server.run_until(async {
        let _ = rx.await;
    }));
    Ok(Running {
        addr,
        ctx,
        shutdown: Some(tx),
    })
}

pub async fn start_master() -> Result<Running> {
    start(ServerConfig::new("127.0.0.1", 0)).await
}

pub async fn start_replica(master: &Running) -> Result<Running> {
    start(ServerConfig::new("127.0.0.1", 0).replica_of(master.master_addr())).await
}

pub fn frame(args: &[&str]) -> Vec<u8> {
    let mut out = format!("*{}\r\n", args.len());
    for arg in args {
        out.push_str(&format!("${}\r\n{}\r\n", arg.len(), arg));
    }
    out.into_bytes()
}

pub async fn read_reply(conn: &mut TcpStream) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; 4096];
    let n = timeout(READ_TIMEOUT, conn.read(&mut buf))
        .await
        .context("timed out waiting for reply")??;
    buf.truncate(n);
    Ok(buf)
}

pub async fn request(conn: &mut TcpStream, args: &[&str]) -> Result<String> {
    conn.write_all(&frame(args)).await?;
    let reply = read_reply(conn).await?;
    Ok(String::from_utf8_lossy(&reply).into_owned())
}

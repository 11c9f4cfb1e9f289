use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::commands::{self, ServerActions};
use crate::error::CommandError;
use crate::resp::{self, Command, MAX_MESSAGE};
use crate::server::Context;

/// Commands that get propagated once they succeed.
pub const WRITE_COMMANDS: [&str; 2] = ["SET", "DEL"];

pub fn is_write_command(name: &str) -> bool {
    WRITE_COMMANDS.contains(&name)
}

pub async fn handle_client(stream: TcpStream, ctx: Arc<Context>) -> Result<()> {
    let peer = stream.peer_addr()?;
    Session::new(ctx, peer).run(stream).await
}

/// State of one client connection.
pub struct Session {
    ctx: Arc<Context>,
    peer: SocketAddr,
    // Set once this connection has been served a PSYNC.
    replication_link: bool,
}

impl Session {
    pub fn new(ctx: Arc<Context>, peer: SocketAddr) -> Self {
        Self {
            ctx,
            peer,
            replication_link: false,
        }
    }

    /// Reads one frame per read call until EOF. A frame that fails to decode
    /// gets the raw error text back and ends the session.
    pub async fn run(&mut self, mut stream: TcpStream) -> Result<()> {
        let mut buffer = vec![0u8; MAX_MESSAGE];
        loop {
            let n = match stream.read(&mut buffer).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(err) => {
                    debug!(peer = %self.peer, error = %err, "read failed, closing connection");
                    break;
                }
            };

            let tokens = match resp::decode(&buffer[..n]) {
                Ok(tokens) => tokens,
                Err(err) => {
                    debug!(peer = %self.peer, error = %err, "malformed request, closing connection");
                    stream.write_all(err.to_string().as_bytes()).await?;
                    break;
                }
            };

            if let Some(reply) = self.execute(tokens).await {
                stream.write_all(&reply).await?;
            }
        }
        debug!(peer = %self.peer, "connection closed");
        Ok(())
    }

    /// Runs one decoded request and returns the encoded reply, if any.
    pub async fn execute(&mut self, tokens: Vec<String>) -> Option<Bytes> {
        let Some((name, args)) = tokens.split_first() else {
            return Some(Command::Error(CommandError::Empty.to_string()).encode());
        };
        let name = name.to_ascii_uppercase();

        let reply = commands::dispatch(&name, args, &self.ctx, &*self).await;
        let succeeded = reply.as_ref().map_or(false, |r| !r.is_error());
        let reply = reply.unwrap_or_else(|| Command::Error(CommandError::Unknown.to_string()));
        debug!(peer = %self.peer, command = %name, ?reply, "command result");

        let from_link = self.replication_link;
        if name == "PSYNC" && succeeded {
            self.replication_link = true;
        }

        if succeeded && is_write_command(&name) {
            if from_link {
                // A replica's write arriving on its own link: apply only.
                return None;
            }
            self.propagate(&name, args).await;
        }
        Some(reply.encode())
    }

    async fn propagate(&self, name: &str, args: &[String]) {
        let mut items = Vec::with_capacity(args.len() + 1);
        items.push(name.to_string());
        items.extend_from_slice(args);
        let frame = resp::encode_array(&items);

        if self.ctx.node.is_master() {
            let delivered = self.ctx.replicas.propagate(&frame).await;
            let offset = self.ctx.node.advance_offset(frame.len());
            debug!(command = %name, delivered, offset, "propagated to replicas");
        } else if let Some(master) = &self.ctx.master {
            debug!(command = %name, master = %master.addr(), "forwarding write to master");
            master.forward(&frame).await;
        }
    }
}

impl ServerActions for Session {
    async fn register_replica(&self, addr: String) {
        let addr = resolve_announced_addr(&addr, self.peer);
        if let Err(err) = self.ctx.replicas.register(&addr).await {
            warn!(%addr, error = %err, "giving up on replica");
        }
    }
}

/// A bare port announcement is taken to mean the announcing peer's host.
fn resolve_announced_addr(announced: &str, peer: SocketAddr) -> String {
    match announced.parse::<u16>() {
        Ok(port) => SocketAddr::new(peer.ip(), port).to_string(),
        Err(_) => announced.to_string(),
    }
}

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use tokio::net::{TcpListener, TcpStream};
use tokio::select;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::db::Store;
use crate::handler::handle_client;
use crate::propagator::ReplicaRegistry;
use crate::replication::{self, MasterLink};
use crate::state::NodeState;

/// Shared state handed to every connection and to the ingestion loop.
pub struct Context {
    pub store: Store,
    pub node: NodeState,
    pub replicas: ReplicaRegistry,
    /// Upstream channel, present on replicas only.
    pub master: Option<MasterLink>,
}

impl Context {
    pub fn new(node: NodeState, master: Option<MasterLink>) -> Self {
        Self {
            store: Store::new(),
            node,
            replicas: ReplicaRegistry::new(),
            master,
        }
    }

    pub fn master() -> Self {
        Self::new(NodeState::master(), None)
    }

    pub fn replica() -> Self {
        Self::new(NodeState::replica(), None)
    }
}

pub struct Server {
    listener: TcpListener,
    ctx: Arc<Context>,
}

impl Server {
    /// Binds the listener and, for a replica, syncs with the master before
    /// returning. Clients are only accepted once [`Server::run_until`] runs.
    pub async fn bind(config: &ServerConfig) -> Result<Self> {
        let listen_addr = config.listen_addr();
        let listener = TcpListener::bind(&listen_addr)
            .await
            .with_context(|| format!("failed to bind {}", listen_addr))?;
        let local_addr = listener.local_addr()?;
        let node = NodeState::from_config(config);

        let Some(upstream) = &config.replica_of else {
            info!(addr = %local_addr, "listening as master");
            return Ok(Self {
                listener,
                ctx: Arc::new(Context::new(node, None)),
            });
        };

        let announce = format!("{}:{}", config.host, local_addr.port());
        let stream = replication::connect_to_master(upstream, &announce).await?;
        let (reader, writer) = stream.into_split();
        let ctx = Arc::new(Context::new(
            node,
            Some(MasterLink::new(upstream.addr(), writer)),
        ));
        replication::spawn_ingestion(reader, Arc::clone(&ctx));

        info!(addr = %local_addr, master = %upstream.addr(), "listening as replica");
        Ok(Self { listener, ctx })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn context(&self) -> Arc<Context> {
        Arc::clone(&self.ctx)
    }

    /// Accepts connections until `shutdown` resolves, then drops the listener.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Server { listener, ctx } = self;
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    info!("server shutting down");
                    break;
                }
                accepted = listener.accept() => handle_accept_result(accepted, &ctx),
            }
        }
        Ok(())
    }
}

fn handle_accept_result(result: io::Result<(TcpStream, SocketAddr)>, ctx: &Arc<Context>) {
    match result {
        Ok((stream, peer)) => {
            debug!(%peer, "connection accepted");
            let ctx = Arc::clone(ctx);
            tokio::spawn(async move {
                if let Err(err) = handle_client(stream, ctx).await {
                    warn!(%peer, error = ?err, "connection closed with error");
                }
            });
        }
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}

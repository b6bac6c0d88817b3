//! Coordination server library: exposed so that `server/tests/` can drive
//! the composed system end to end over a real `TcpStream`, and so `main`
//! is a thin binary wrapper around these pieces.

pub mod config;
pub mod heartbeat;
pub mod matcher;
pub mod session;
pub mod world;

use config::ServerConfig;
use matcher::PendingMissions;
use session::ConnectionRegistry;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};
use world::World;

/// Everything a running server instance needs to hand a new connection.
#[derive(Clone)]
pub struct ServerHandle {
    pub world: Arc<World>,
    pub connections: Arc<ConnectionRegistry>,
    pub pending: Arc<PendingMissions>,
    pub config: Arc<ServerConfig>,
}

/// Bind a listener and spawn every background task (generator, matcher,
/// heartbeat emitter, liveness sweep) plus the accept loop. Returns the
/// bound address and a handle callers can use to reach into the running
/// server's state (tests use this for setup/assertions).
pub async fn spawn_server(
    config: ServerConfig,
    shutdown_rx: watch::Receiver<bool>,
) -> anyhow::Result<(std::net::SocketAddr, ServerHandle)> {
    let config = Arc::new(config);
    let world = Arc::new(World::new(&config));
    let connections = Arc::new(ConnectionRegistry::new());
    let pending = Arc::new(PendingMissions::new());

    let listener = TcpListener::bind(config.bind_addr.as_str()).await?;
    let addr = listener.local_addr()?;
    info!(%addr, "server listening");

    tokio::spawn(world::survivors::run_generator(
        world.survivors.clone(),
        config.grid_width,
        config.grid_height,
        config.generator_min_interval_secs,
        config.generator_max_interval_secs,
        shutdown_rx.clone(),
    ));

    tokio::spawn(matcher::run_matcher(
        world.clone(),
        connections.clone(),
        pending.clone(),
        config.clone(),
        shutdown_rx.clone(),
    ));

    tokio::spawn(heartbeat::run_heartbeat_emitter(
        connections.clone(),
        config.clone(),
        shutdown_rx.clone(),
    ));

    tokio::spawn(heartbeat::run_liveness_sweep(
        world.clone(),
        connections.clone(),
        pending.clone(),
        config.clone(),
        shutdown_rx.clone(),
    ));

    let handle = ServerHandle {
        world: world.clone(),
        connections: connections.clone(),
        pending: pending.clone(),
        config: config.clone(),
    };

    tokio::spawn(accept_loop(listener, world, connections, pending, config, shutdown_rx));

    Ok((addr, handle))
}

async fn accept_loop(
    listener: TcpListener,
    world: Arc<World>,
    connections: Arc<ConnectionRegistry>,
    pending: Arc<PendingMissions>,
    config: Arc<ServerConfig>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, addr)) => {
                        let world = world.clone();
                        let connections = connections.clone();
                        let pending = pending.clone();
                        let config = config.clone();
                        tokio::spawn(async move {
                            session::run_connection(stream, addr, world, connections, pending, config).await;
                        });
                    }
                    Err(e) => error!(error = %e, "accept failed"),
                }
            }
            _ = shutdown.changed() => {
                if !*shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

//! Per-connection session handling: the outbound handle, the framed read
//! loop, and the per-connection state machine
//! (`AWAIT_HANDSHAKE -> READY -> CLOSING`).

use crate::config::ServerConfig;
use crate::matcher::{self, PendingMissions};
use crate::session::manager::ConnectionRegistry;
use crate::world::World;
use rescue_proto::codec::{self, CodecError, FrameDecoder};
use rescue_proto::protocol::{ClientMessage, ProtocolError, ServerMessage};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    AwaitHandshake,
    Ready,
    Closing,
}

/// Cloneable handle used to push messages to one connected drone from
/// outside its read loop (the matcher, the heartbeat emitter).
#[derive(Clone)]
pub struct SessionHandle {
    pub addr: SocketAddr,
    writer: Arc<Mutex<OwnedWriteHalf>>,
}

impl SessionHandle {
    pub async fn send(&self, message: &ServerMessage) -> anyhow::Result<()> {
        let json = rescue_proto::protocol::encode_server_message(message)?;
        let framed = codec::encode_line(&json);
        // Guarding the whole socket with a mutex serializes writes from the
        // matcher, the heartbeat timer, and this connection's own replies,
        // which is the "dedicated mutex" option the protocol design allows.
        let mut writer = self.writer.lock().await;
        writer.write_all(&framed).await?;
        Ok(())
    }
}

/// Transport-fatal failure: EOF or a framing error. The caller marks the
/// drone `DISCONNECTED` and releases any in-flight mission.
#[derive(Debug)]
pub enum FatalReason {
    Eof,
    Codec(CodecError),
}

pub enum RecvOutcome {
    Message(ClientMessage),
    /// A complete line was read but didn't decode to a known message; a
    /// recoverable validation error whose handling depends on connection
    /// state (closes the connection only during `AWAIT_HANDSHAKE`).
    Protocol(ProtocolError),
    Fatal(FatalReason),
}

pub(crate) struct Connection {
    addr: SocketAddr,
    reader: tokio::net::tcp::OwnedReadHalf,
    decoder: FrameDecoder,
    read_buf: Vec<u8>,
    state: ConnectionState,
    drone_id: Option<String>,
}

impl Connection {
    pub(crate) fn new(stream: tokio::net::TcpStream, addr: SocketAddr) -> (Self, SessionHandle) {
        let (reader, writer) = stream.into_split();
        let handle = SessionHandle {
            addr,
            writer: Arc::new(Mutex::new(writer)),
        };
        let conn = Self {
            addr,
            reader,
            decoder: FrameDecoder::new(),
            read_buf: vec![0u8; 4096],
            state: ConnectionState::AwaitHandshake,
            drone_id: None,
        };
        (conn, handle)
    }

    async fn recv(&mut self) -> RecvOutcome {
        use tokio::io::AsyncReadExt;

        loop {
            match self.decoder.decode_next() {
                Ok(Some(line)) => {
                    return match rescue_proto::protocol::decode_client_message(&line) {
                        Ok(msg) => RecvOutcome::Message(msg),
                        Err(e) => RecvOutcome::Protocol(e),
                    };
                }
                Ok(None) => {}
                Err(e) => return RecvOutcome::Fatal(FatalReason::Codec(e)),
            }

            match self.reader.read(&mut self.read_buf).await {
                Ok(0) => return RecvOutcome::Fatal(FatalReason::Eof),
                Ok(n) => self.decoder.extend(&self.read_buf[..n]),
                Err(_) => return RecvOutcome::Fatal(FatalReason::Eof),
            }
        }
    }
}

/// Drive one drone connection from accept to disconnect: the handshake,
/// the message dispatch loop, and cleanup of every registry this
/// connection touched.
pub async fn run_connection(
    stream: tokio::net::TcpStream,
    addr: SocketAddr,
    world: Arc<World>,
    connections: Arc<ConnectionRegistry>,
    pending: Arc<PendingMissions>,
    config: Arc<ServerConfig>,
) {
    let (mut conn, handle) = Connection::new(stream, addr);
    info!(%addr, "drone connected");

    loop {
        match conn.recv().await {
            RecvOutcome::Message(msg) => {
                dispatch(&mut conn, &handle, msg, &world, &connections, &pending, &config).await
            }
            RecvOutcome::Protocol(e) => {
                warn!(%addr, error = %e, "protocol validation error");
                let _ = handle.send(&ServerMessage::error(e.code(), e.to_string())).await;
                if conn.state == ConnectionState::AwaitHandshake {
                    conn.state = ConnectionState::Closing;
                }
            }
            RecvOutcome::Fatal(reason) => {
                warn!(%addr, ?reason, "connection closed");
                break;
            }
        }

        if conn.state == ConnectionState::Closing {
            break;
        }
    }

    if let Some(drone_id) = conn.drone_id.take() {
        info!(%addr, drone_id = %drone_id, "drone disconnected");
        world.drones.remove(&drone_id).await;
        connections.unregister(&drone_id).await;
        matcher::release_for_drone(&world, &pending, &drone_id).await;
    } else {
        info!(%addr, "client disconnected before handshake");
    }
}

async fn dispatch(
    conn: &mut Connection,
    handle: &SessionHandle,
    msg: ClientMessage,
    world: &World,
    connections: &ConnectionRegistry,
    pending: &PendingMissions,
    config: &ServerConfig,
) {
    match conn.state {
        ConnectionState::AwaitHandshake => handle_handshake(conn, handle, msg, world, connections, config).await,
        ConnectionState::Ready => handle_ready(conn, handle, msg, world, pending).await,
        ConnectionState::Closing => {}
    }
}

async fn handle_handshake(
    conn: &mut Connection,
    handle: &SessionHandle,
    msg: ClientMessage,
    world: &World,
    connections: &ConnectionRegistry,
    config: &ServerConfig,
) {
    let ClientMessage::Handshake { drone_id, capabilities } = msg else {
        warn!(addr = %conn.addr, "message received before HANDSHAKE");
        let _ = handle
            .send(&ServerMessage::error(400, "Handshake required"))
            .await;
        conn.state = ConnectionState::Closing;
        return;
    };

    let now = rescue_proto::now_ms();
    match world
        .drones
        .register(drone_id.clone(), capabilities, now, config.max_drones)
        .await
    {
        Ok(()) => {
            connections.register(drone_id.clone(), handle.clone()).await;
            conn.drone_id = Some(drone_id.clone());
            conn.state = ConnectionState::Ready;
            info!(drone_id = %drone_id, addr = %conn.addr, "handshake complete");

            let ack = ServerMessage::HandshakeAck {
                session_id: format!("S{}", now),
                config: rescue_proto::protocol::HandshakeConfig {
                    status_update_interval: config.status_update_interval_secs,
                    heartbeat_interval: config.heartbeat_interval_ms / 1000,
                },
            };
            let _ = handle.send(&ack).await;
        }
        Err(crate::world::drones::DroneError::AtCapacity) => {
            warn!(addr = %conn.addr, drone_id = %drone_id, "admission cap reached");
            let _ = handle.send(&ServerMessage::error(503, "Too many drones")).await;
            conn.state = ConnectionState::Closing;
        }
        Err(_duplicate) => {
            warn!(drone_id = %drone_id, "duplicate drone id rejected");
            let _ = handle
                .send(&ServerMessage::error(409, "drone_id already connected"))
                .await;
            conn.state = ConnectionState::Closing;
        }
    }
}

async fn handle_ready(
    conn: &mut Connection,
    handle: &SessionHandle,
    msg: ClientMessage,
    world: &World,
    pending: &PendingMissions,
) {
    let Some(drone_id) = conn.drone_id.clone() else {
        return;
    };

    // Any inbound message, not just HEARTBEAT_RESPONSE, refreshes liveness.
    if let Err(e) = world.drones.touch_heartbeat(&drone_id, rescue_proto::now_ms()).await {
        warn!(drone_id = %drone_id, error = %e, "heartbeat touch on vanished drone");
    }

    match msg {
        ClientMessage::Handshake { .. } => {
            let _ = handle
                .send(&ServerMessage::error(400, "Already handshaken"))
                .await;
        }
        ClientMessage::StatusUpdate {
            location,
            status,
            battery,
            speed,
            ..
        } => {
            if let Err(e) = world
                .drones
                .update_status(&drone_id, location, status, battery, speed)
                .await
            {
                warn!(drone_id = %drone_id, error = %e, "status update for vanished drone");
            }
        }
        ClientMessage::MissionComplete { mission_id, timestamp, .. } => {
            matcher::complete_mission(world, pending, &drone_id, &mission_id, timestamp as u64).await;
        }
        ClientMessage::HeartbeatResponse { .. } => {
            // Liveness was already refreshed above; nothing else to do.
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn recv_returns_protocol_error_for_unknown_type() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = tokio::net::TcpStream::connect(addr);
        let (accept, client) = tokio::join!(listener.accept(), client);
        let (stream, peer) = accept.unwrap();
        let mut client = client.unwrap();

        let (mut conn, _handle) = Connection::new(stream, peer);
        use tokio::io::AsyncWriteExt;
        client.write_all(b"{\"type\":\"FOO\"}\n").await.unwrap();

        match conn.recv().await {
            RecvOutcome::Protocol(ProtocolError::UnknownType(t)) => assert_eq!(t, "FOO"),
            _ => panic!("expected UnknownType"),
        }
    }
}

//! Black-box end-to-end scenarios driving the composed system over a real
//! `TcpStream` against a server bound to an ephemeral port.

use rescue_coordinator::config::ServerConfig;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::watch;

async fn start_server(config: ServerConfig) -> std::net::SocketAddr {
    let (_tx, rx) = watch::channel(true);
    let (addr, _handle) = rescue_coordinator::spawn_server(config, rx)
        .await
        .expect("server should bind");
    addr
}

struct Drone {
    reader: BufReader<tokio::net::tcp::OwnedReadHalf>,
    writer: tokio::net::tcp::OwnedWriteHalf,
}

impl Drone {
    async fn connect(addr: std::net::SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("connect");
        let (read_half, writer) = stream.into_split();
        Self {
            reader: BufReader::new(read_half),
            writer,
        }
    }

    async fn send(&mut self, value: &Value) {
        let mut line = value.to_string();
        line.push('\n');
        self.writer.write_all(line.as_bytes()).await.expect("write");
    }

    async fn recv(&mut self) -> Value {
        let mut line = String::new();
        tokio::time::timeout(Duration::from_secs(2), self.reader.read_line(&mut line))
            .await
            .expect("timed out waiting for a message")
            .expect("read");
        serde_json::from_str(line.trim_end()).expect("valid json")
    }

    async fn handshake(&mut self, drone_id: &str) -> Value {
        self.send(&json!({
            "type": "HANDSHAKE",
            "drone_id": drone_id,
            "capabilities": {"max_speed": 10, "battery_capacity": 100, "payload": "medical"}
        }))
        .await;
        self.recv().await
    }

    async fn status_update(&mut self, drone_id: &str, x: i32, y: i32) {
        self.send(&json!({
            "type": "STATUS_UPDATE",
            "drone_id": drone_id,
            "timestamp": 1,
            "location": {"x": x, "y": y},
            "status": "idle",
            "battery": 100,
            "speed": 0
        }))
        .await;
    }

    async fn mission_complete(&mut self, drone_id: &str, mission_id: &str) {
        self.send(&json!({
            "type": "MISSION_COMPLETE",
            "drone_id": drone_id,
            "mission_id": mission_id,
            "timestamp": 2,
            "success": true,
            "details": "done"
        }))
        .await;
    }
}

fn test_config() -> ServerConfig {
    ServerConfig {
        bind_addr: "127.0.0.1:0".into(),
        grid_width: 10,
        grid_height: 10,
        // Disable the generator for deterministic scenarios: survivors are
        // injected directly by the test via the world handle instead.
        generator_min_interval_secs: 3600,
        generator_max_interval_secs: 3600,
        ..Default::default()
    }
}

/// Scenario 1: single match, then completion moves the survivor to history.
#[tokio::test]
async fn single_match_then_completion() {
    let (_tx, rx) = watch::channel(true);
    let (addr, handle) = rescue_coordinator::spawn_server(test_config(), rx)
        .await
        .unwrap();

    let mut d1 = Drone::connect(addr).await;
    d1.handshake("D1").await;
    d1.status_update("D1", 0, 0).await;

    let survivor_id = handle
        .world
        .survivors
        .create(rescue_proto::Coord::new(3, 4))
        .await
        .unwrap();

    let assign = d1.recv().await;
    assert_eq!(assign["type"], "ASSIGN_MISSION");
    assert_eq!(assign["mission_id"], survivor_id);
    assert_eq!(assign["target"]["x"], 3);
    assert_eq!(assign["target"]["y"], 4);

    d1.mission_complete("D1", &survivor_id).await;
    tokio::time::sleep(Duration::from_millis(150)).await;

    let helped = handle.world.survivors.helped_snapshot().await;
    assert!(helped.iter().any(|s| s.id == survivor_id));
}

/// Scenario 2: the closer of two idle drones wins the assignment.
#[tokio::test]
async fn closest_drone_wins() {
    let (_tx, rx) = watch::channel(true);
    let (addr, handle) = rescue_coordinator::spawn_server(test_config(), rx)
        .await
        .unwrap();

    let mut d1 = Drone::connect(addr).await;
    d1.handshake("D1").await;
    d1.status_update("D1", 0, 0).await;

    let mut d2 = Drone::connect(addr).await;
    d2.handshake("D2").await;
    d2.status_update("D2", 9, 0).await;

    handle
        .world
        .survivors
        .create(rescue_proto::Coord::new(1, 0))
        .await
        .unwrap();

    let assign = d1.recv().await;
    assert_eq!(assign["type"], "ASSIGN_MISSION");

    // D2 should not receive an assignment for this survivor.
    let timed_out = tokio::time::timeout(Duration::from_millis(300), d2.recv()).await;
    assert!(timed_out.is_err(), "D2 should not have been assigned");
}

/// Scenario 3: equidistant drones break ties by ascending id.
#[tokio::test]
async fn tie_break_by_ascending_id() {
    let (_tx, rx) = watch::channel(true);
    let (addr, handle) = rescue_coordinator::spawn_server(test_config(), rx)
        .await
        .unwrap();

    let mut d2 = Drone::connect(addr).await;
    d2.handshake("D2").await;
    d2.status_update("D2", 0, 0).await;

    let mut d1 = Drone::connect(addr).await;
    d1.handshake("D1").await;
    d1.status_update("D1", 0, 0).await;

    handle
        .world
        .survivors
        .create(rescue_proto::Coord::new(2, 2))
        .await
        .unwrap();

    let assign = d1.recv().await;
    assert_eq!(assign["type"], "ASSIGN_MISSION");
}

/// Scenario 6: a malformed message gets an ERROR reply but the connection
/// stays open for subsequent well-formed messages.
#[tokio::test]
async fn bad_message_keeps_connection_open() {
    let (_tx, rx) = watch::channel(true);
    let (addr, _handle) = rescue_coordinator::spawn_server(test_config(), rx)
        .await
        .unwrap();

    let mut d1 = Drone::connect(addr).await;
    d1.handshake("D1").await;

    d1.send(&json!({"type": "FOO"})).await;
    let error = d1.recv().await;
    assert_eq!(error["type"], "ERROR");
    assert_eq!(error["code"], 400);

    // The connection is still open: a well-formed message is processed.
    d1.status_update("D1", 1, 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
}

/// Admission cap: a HANDSHAKE beyond max_drones is rejected with 503 and
/// the connection is closed.
#[tokio::test]
async fn admission_cap_rejects_extra_drone() {
    let mut config = test_config();
    config.max_drones = 1;
    let (_tx, rx) = watch::channel(true);
    let (addr, _handle) = rescue_coordinator::spawn_server(config, rx).await.unwrap();

    let mut d1 = Drone::connect(addr).await;
    let ack = d1.handshake("D1").await;
    assert_eq!(ack["type"], "HANDSHAKE_ACK");

    let mut d2 = Drone::connect(addr).await;
    let error = d2.handshake("D2").await;
    assert_eq!(error["type"], "ERROR");
    assert_eq!(error["code"], 503);
}

/// Duplicate drone ids are rejected once the first is connected.
#[tokio::test]
async fn duplicate_drone_id_is_rejected() {
    let (_tx, rx) = watch::channel(true);
    let (addr, _handle) = rescue_coordinator::spawn_server(test_config(), rx)
        .await
        .unwrap();

    let mut d1 = Drone::connect(addr).await;
    let ack = d1.handshake("D1").await;
    assert_eq!(ack["type"], "HANDSHAKE_ACK");

    let mut d1_dup = Drone::connect(addr).await;
    let error = d1_dup.handshake("D1").await;
    assert_eq!(error["type"], "ERROR");
}

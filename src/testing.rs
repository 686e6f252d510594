// src/testing.rs
//! In-process Query and RCON peers for tests.
use crate::protocol::codec::{
    decode_query_request, decode_rcon_length, encode_full_stat_response,
    encode_handshake_response, FullStat, QueryRequest, RconPacket, RconPacketType,
    RCON_MAX_PAYLOAD,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};

pub const QUERY_TOKEN: i32 = 9_513_307;

pub fn full_stat(players: &[&str]) -> FullStat {
    FullStat {
        kv: vec![
            ("hostname".into(), "Test Server".into()),
            ("gametype".into(), "SMP".into()),
            ("game_id".into(), "MINECRAFT".into()),
            ("version".into(), "1.20.4".into()),
            ("plugins".into(), "".into()),
            ("map".into(), "world".into()),
            ("numplayers".into(), players.len().to_string()),
            ("maxplayers".into(), "10".into()),
            ("hostport".into(), "25565".into()),
            ("hostip".into(), "127.0.0.1".into()),
        ],
        players: players.iter().map(|p| p.to_string()).collect(),
    }
}

#[derive(Default)]
pub struct QueryBehaviour {
    pub drop_handshakes: usize,
    pub drop_stats: usize,
    pub send_stray_first: bool,
    pub garbage_stats: usize,
    /// Stat requests carrying a token older than this are ignored.
    pub token_lifetime: Option<Duration>,
}

pub struct FakeQuery {
    pub addr: SocketAddr,
    pub requests: Arc<AtomicUsize>,
    pub handshakes: Arc<AtomicUsize>,
    /// Stat requests ignored for a wrong session id, wrong token or stale token.
    pub rejected_stats: Arc<AtomicUsize>,
}

struct Challenge {
    session_id: i32,
    token: i32,
    issued_at: Instant,
}

/// Behaves like a vanilla server: the session id and token from the last
/// handshake are remembered per peer, a stat request must present both, and
/// the stat reply carries the remembered session id.
pub async fn spawn_query_server(stat: FullStat, behaviour: QueryBehaviour) -> FakeQuery {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    let requests = Arc::new(AtomicUsize::new(0));
    let handshakes = Arc::new(AtomicUsize::new(0));
    let rejected_stats = Arc::new(AtomicUsize::new(0));
    let (request_count, handshake_count, rejected) =
        (requests.clone(), handshakes.clone(), rejected_stats.clone());

    tokio::spawn(async move {
        let mut buf = [0u8; 1500];
        let mut challenges: HashMap<SocketAddr, Challenge> = HashMap::new();
        let mut stats = 0;
        loop {
            let (len, peer) = match socket.recv_from(&mut buf).await {
                Ok(v) => v,
                Err(_) => return,
            };
            request_count.fetch_add(1, Ordering::SeqCst);
            let request = match decode_query_request(&buf[..len]) {
                Ok(request) => request,
                Err(_) => continue,
            };

            match request {
                QueryRequest::Handshake { session_id } => {
                    let seen = handshake_count.fetch_add(1, Ordering::SeqCst) + 1;
                    if seen <= behaviour.drop_handshakes {
                        continue;
                    }
                    let token = QUERY_TOKEN + seen as i32;
                    challenges.insert(
                        peer,
                        Challenge {
                            session_id,
                            token,
                            issued_at: Instant::now(),
                        },
                    );
                    let reply = encode_handshake_response(session_id, token);
                    let _ = socket.send_to(&reply, peer).await;
                }
                QueryRequest::FullStat { session_id, token } => {
                    let session_id = match challenges.get(&peer) {
                        Some(challenge)
                            if challenge.session_id == session_id
                                && challenge.token == token
                                && behaviour
                                    .token_lifetime
                                    .map_or(true, |lifetime| challenge.issued_at.elapsed() < lifetime) =>
                        {
                            challenge.session_id
                        }
                        _ => {
                            rejected.fetch_add(1, Ordering::SeqCst);
                            continue;
                        }
                    };
                    stats += 1;
                    if stats <= behaviour.drop_stats {
                        continue;
                    }
                    if behaviour.send_stray_first {
                        let stray = encode_full_stat_response(session_id ^ 0x0101, &FullStat::default());
                        let _ = socket.send_to(&stray, peer).await;
                    }
                    if stats <= behaviour.drop_stats + behaviour.garbage_stats {
                        let mut garbage = vec![0x00];
                        garbage.extend_from_slice(&session_id.to_be_bytes());
                        garbage.extend_from_slice(b"splitnum");
                        let _ = socket.send_to(&garbage, peer).await;
                        continue;
                    }
                    let reply = encode_full_stat_response(session_id, &stat);
                    let _ = socket.send_to(&reply, peer).await;
                }
            }
        }
    });

    FakeQuery {
        addr,
        requests,
        handshakes,
        rejected_stats,
    }
}

/// Splits a reply the way a server does once it exceeds one packet.
pub fn fragments(text: &str) -> Vec<Vec<u8>> {
    if text.is_empty() {
        return vec![Vec::new()];
    }
    text.as_bytes()
        .chunks(RCON_MAX_PAYLOAD)
        .map(|chunk| chunk.to_vec())
        .collect()
}

pub struct FakeRcon {
    pub addr: SocketAddr,
    pub connections: Arc<AtomicUsize>,
    pub auth_packets: Arc<AtomicUsize>,
    pub command_packets: Arc<AtomicUsize>,
}

/// Answers each command with the packets produced by `handler`, one payload per packet.
pub async fn spawn_rcon_server<F>(password: &'static str, handler: F) -> FakeRcon
where
    F: Fn(&str) -> Vec<Vec<u8>> + Send + Sync + 'static,
{
    spawn_flaky_rcon_server(password, 0, handler).await
}

/// Like `spawn_rcon_server`, but hangs up on the first `hang_ups` connections
/// before reading anything.
pub async fn spawn_flaky_rcon_server<F>(password: &'static str, hang_ups: usize, handler: F) -> FakeRcon
where
    F: Fn(&str) -> Vec<Vec<u8>> + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let connections = Arc::new(AtomicUsize::new(0));
    let auth_packets = Arc::new(AtomicUsize::new(0));
    let command_packets = Arc::new(AtomicUsize::new(0));
    let handler = Arc::new(handler);

    let accepted = connections.clone();
    let auths = auth_packets.clone();
    let commands = command_packets.clone();
    tokio::spawn(async move {
        loop {
            let (stream, _) = match listener.accept().await {
                Ok(v) => v,
                Err(_) => return,
            };
            if accepted.fetch_add(1, Ordering::SeqCst) < hang_ups {
                drop(stream);
                continue;
            }
            tokio::spawn(serve_rcon(
                stream,
                password,
                handler.clone(),
                auths.clone(),
                commands.clone(),
            ));
        }
    });

    FakeRcon {
        addr,
        connections,
        auth_packets,
        command_packets,
    }
}

async fn serve_rcon<F>(
    mut stream: TcpStream,
    password: &'static str,
    handler: Arc<F>,
    auths: Arc<AtomicUsize>,
    commands: Arc<AtomicUsize>,
) where
    F: Fn(&str) -> Vec<Vec<u8>> + Send + Sync + 'static,
{
    let mut authenticated = false;
    loop {
        let mut raw_len = [0u8; 4];
        if stream.read_exact(&mut raw_len).await.is_err() {
            return;
        }
        let len = match decode_rcon_length(raw_len) {
            Ok(len) => len,
            Err(_) => return,
        };
        let mut body = vec![0u8; len];
        if stream.read_exact(&mut body).await.is_err() {
            return;
        }
        let packet = match RconPacket::decode_body(&body, RconPacketType::from_client) {
            Ok(packet) => packet,
            Err(_) => return,
        };

        let mut replies = Vec::new();
        match packet.kind {
            RconPacketType::Auth => {
                auths.fetch_add(1, Ordering::SeqCst);
                authenticated = packet.payload == password.as_bytes();
                let id = if authenticated { packet.request_id } else { -1 };
                replies.push(RconPacket::new(id, RconPacketType::ResponseValue, Vec::new()));
                replies.push(RconPacket::new(id, RconPacketType::AuthResponse, Vec::new()));
            }
            _ => {
                commands.fetch_add(1, Ordering::SeqCst);
                if !authenticated {
                    replies.push(RconPacket::new(-1, RconPacketType::AuthResponse, Vec::new()));
                } else {
                    let command = String::from_utf8_lossy(&packet.payload).into_owned();
                    if command.starts_with("stale ") {
                        // A leftover reply for some other request id.
                        replies.push(RconPacket::new(packet.request_id + 1000, RconPacketType::ResponseValue, b"stale".to_vec()));
                    }
                    for payload in handler(&command) {
                        replies.push(RconPacket::new(packet.request_id, RconPacketType::ResponseValue, payload));
                    }
                }
            }
        }

        for reply in replies {
            if stream.write_all(&reply.encode()).await.is_err() {
                return;
            }
            // Give concurrent readers a chance to interleave if they could.
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }
}

/// Resolver for tests that never knows a UUID.
pub struct NoUuids;

impl crate::mojang::UuidResolver for NoUuids {
    fn resolve<'a>(&'a self, _name: &'a str) -> futures::future::BoxFuture<'a, Option<uuid::Uuid>> {
        Box::pin(async { None })
    }
}

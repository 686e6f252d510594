// src/protocol/rcon.rs
use crate::protocol::{resolve_address, RetryPolicy};
use crate::protocol::codec::{
    decode_rcon_length, ProtocolDecodeError, RconPacket, RconPacketType, RCON_MAX_PAYLOAD,
};
use log::{debug, info, warn};
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

/// Request id the server uses to reject authentication.
const AUTH_REJECTED_ID: i32 = -1;

#[derive(Debug)]
pub enum RconError {
    Auth,
    Unavailable(std::io::Error),
    Timeout,
    Decode(ProtocolDecodeError),
    Disconnected,
    Io(std::io::Error),
}

impl fmt::Display for RconError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auth => write!(f, "RCON authentication rejected"),
            Self::Unavailable(e) => write!(f, "RCON connection failed: {}", e),
            Self::Timeout => write!(f, "RCON operation timed out"),
            Self::Decode(e) => write!(f, "invalid RCON packet: {}", e),
            Self::Disconnected => write!(f, "RCON session is closed, reconnect required"),
            Self::Io(e) => write!(f, "RCON stream error: {}", e),
        }
    }
}

impl std::error::Error for RconError {}

impl From<ProtocolDecodeError> for RconError {
    fn from(e: ProtocolDecodeError) -> Self {
        Self::Decode(e)
    }
}

/// Connection parameters for one RCON endpoint. The host is resolved on every
/// connect so DNS changes are picked up.
#[derive(Clone)]
pub struct RconClient {
    address: String,
    password: String,
    retry: RetryPolicy,
}

impl fmt::Debug for RconClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RconClient")
            .field("address", &self.address)
            .field("password", &"<redacted>")
            .field("retry", &self.retry)
            .finish()
    }
}

impl RconClient {
    pub fn new(address: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            password: password.into(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Connects and authenticates. Refused connections, resets and timeouts are
    /// retried with backoff; a rejected password is returned at once.
    pub async fn connect(&self, timeout: Duration) -> Result<RconSession, RconError> {
        let attempts = self.retry.attempts.max(1);
        let mut attempt = 0;
        loop {
            if attempt > 0 {
                tokio::time::sleep(self.retry.backoff(attempt - 1)).await;
            }
            attempt += 1;

            let result = match resolve_address(&self.address).await {
                Ok(address) => RconSession::connect(address, &self.password, timeout).await,
                Err(e) => Err(RconError::Unavailable(e)),
            };
            match result {
                Err(e @ RconError::Unavailable(_)) | Err(e @ RconError::Timeout) if attempt < attempts => {
                    debug!("RCON connect to {} failed (attempt {}): {}", self.address, attempt, e);
                }
                other => return other,
            }
        }
    }
}

struct Connection {
    stream: TcpStream,
    next_request_id: i32,
    // Set while a command is in flight; still set if that future was dropped.
    dirty: bool,
}

impl Connection {
    fn next_id(&mut self) -> i32 {
        let id = self.next_request_id;
        self.next_request_id = match self.next_request_id.checked_add(1) {
            Some(next) => next,
            None => 1,
        };
        id
    }

    async fn write_packet(&mut self, packet: &RconPacket) -> Result<(), RconError> {
        self.stream
            .write_all(&packet.encode())
            .await
            .map_err(RconError::Io)
    }

    async fn read_packet(&mut self) -> Result<RconPacket, RconError> {
        let mut raw_len = [0u8; 4];
        self.stream
            .read_exact(&mut raw_len)
            .await
            .map_err(RconError::Io)?;
        let len = decode_rcon_length(raw_len)?;

        let mut body = vec![0u8; len];
        self.stream
            .read_exact(&mut body)
            .await
            .map_err(RconError::Io)?;
        Ok(RconPacket::decode_body(&body, RconPacketType::from_server)?)
    }

    async fn authenticate(&mut self, password: &str) -> Result<(), RconError> {
        let id = self.next_id();
        self.write_packet(&RconPacket::new(id, RconPacketType::Auth, password.as_bytes()))
            .await?;

        loop {
            let packet = self.read_packet().await?;
            match packet.kind {
                // Some servers send an empty value packet ahead of the auth answer.
                RconPacketType::ResponseValue => continue,
                _ if packet.request_id == AUTH_REJECTED_ID => return Err(RconError::Auth),
                _ if packet.request_id == id => return Ok(()),
                _ => debug!("Ignoring auth reply for foreign id {}", packet.request_id),
            }
        }
    }

    /// Sends one command and reassembles every fragment carrying its id.
    async fn round_trip(&mut self, command: &str) -> Result<String, RconError> {
        let id = self.next_id();
        self.write_packet(&RconPacket::new(id, RconPacketType::ExecCommand, command.as_bytes()))
            .await?;

        let mut body = Vec::new();
        let mut fragments = 0;
        loop {
            let packet = self.read_packet().await?;
            if packet.request_id == AUTH_REJECTED_ID {
                return Err(RconError::Auth);
            }
            if packet.request_id != id || packet.kind != RconPacketType::ResponseValue {
                debug!("Discarding RCON packet for id {} while waiting on {}", packet.request_id, id);
                continue;
            }

            let len = packet.payload.len();
            if len == 0 {
                break;
            }
            fragments += 1;
            body.extend_from_slice(&packet.payload);
            if len < RCON_MAX_PAYLOAD {
                break;
            }
        }

        debug!("RCON request {} answered with {} bytes in {} fragment(s)", id, body.len(), fragments);
        Ok(String::from_utf8_lossy(&body).into_owned())
    }
}

/// An authenticated RCON connection. Commands queue on an async mutex so that
/// exactly one request is on the wire at a time.
pub struct RconSession {
    peer: SocketAddr,
    connection: Mutex<Option<Connection>>,
}

impl RconSession {
    pub async fn connect(
        address: SocketAddr,
        password: &str,
        timeout: Duration,
    ) -> Result<Self, RconError> {
        let stream = match tokio::time::timeout(timeout, TcpStream::connect(address)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(RconError::Unavailable(e)),
            Err(_) => return Err(RconError::Timeout),
        };
        let _ = stream.set_nodelay(true);

        let mut connection = Connection {
            stream,
            next_request_id: 1,
            dirty: false,
        };

        match tokio::time::timeout(timeout, connection.authenticate(password)).await {
            Ok(Ok(())) => {}
            Ok(Err(RconError::Io(e))) => return Err(RconError::Unavailable(e)),
            Ok(Err(e)) => {
                warn!("RCON authentication with {} failed: {}", address, e);
                return Err(e);
            }
            Err(_) => return Err(RconError::Timeout),
        }

        info!("Authenticated RCON session with {}", address);
        Ok(Self {
            peer: address,
            connection: Mutex::new(Some(connection)),
        })
    }

    /// Runs one command. Callers queue here while another command is in flight.
    /// Any stream failure, timeout or abandoned read closes the connection.
    pub async fn execute(&self, command: &str, timeout: Duration) -> Result<String, RconError> {
        let mut guard = self.connection.lock().await;

        let failure = {
            let connection = match guard.as_mut() {
                Some(connection) => connection,
                None => return Err(RconError::Disconnected),
            };

            if connection.dirty {
                warn!("RCON session with {} was left mid-response, closing it", self.peer);
                RconError::Disconnected
            } else {
                connection.dirty = true;
                match tokio::time::timeout(timeout, connection.round_trip(command)).await {
                    Ok(Ok(response)) => {
                        connection.dirty = false;
                        return Ok(response);
                    }
                    Ok(Err(e)) => e,
                    Err(_) => RconError::Timeout,
                }
            }
        };

        warn!("Dropping RCON session with {}: {}", self.peer, failure);
        *guard = None;
        Err(failure)
    }

    pub async fn close(self) {
        if let Some(mut connection) = self.connection.into_inner() {
            let _ = connection.stream.shutdown().await;
            debug!("Closed RCON session with {}", self.peer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fragments, spawn_flaky_rcon_server, spawn_rcon_server};
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    const PASSWORD: &str = "hunter2";
    const TIMEOUT: Duration = Duration::from_secs(2);

    #[tokio::test]
    async fn test_execute_simple_command() {
        let server = spawn_rcon_server(PASSWORD, |cmd| fragments(&format!("ran {}", cmd))).await;
        let session = RconSession::connect(server.addr, PASSWORD, TIMEOUT).await.unwrap();

        let reply = session.execute("list", TIMEOUT).await.unwrap();
        assert_eq!(reply, "ran list");
        session.close().await;
    }

    #[tokio::test]
    async fn test_wrong_password_is_auth_error_and_sends_nothing_else() {
        let server = spawn_rcon_server(PASSWORD, |_| fragments("x")).await;
        let err = RconSession::connect(server.addr, "wrong", TIMEOUT).await.err().unwrap();
        assert!(matches!(err, RconError::Auth));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(server.auth_packets.load(Ordering::SeqCst), 1);
        assert_eq!(server.command_packets.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_foreign_request_ids_are_discarded() {
        let server = spawn_rcon_server(PASSWORD, |cmd| fragments(&format!("ran {}", cmd))).await;
        let session = RconSession::connect(server.addr, PASSWORD, TIMEOUT).await.unwrap();

        let reply = session.execute("stale list", TIMEOUT).await.unwrap();
        assert_eq!(reply, "ran stale list");
    }

    #[tokio::test]
    async fn test_fragmented_response_matches_unfragmented() {
        let long: String = (0..10_000).map(|i| char::from(b'a' + (i % 26) as u8)).collect();
        let expected = long.clone();
        // 4096 + 4096 + 1808
        let server = spawn_rcon_server(PASSWORD, move |_| fragments(&long)).await;
        let session = RconSession::connect(server.addr, PASSWORD, TIMEOUT).await.unwrap();

        let reply = session.execute("split", TIMEOUT).await.unwrap();
        assert_eq!(fragments(&expected).len(), 3);
        assert_eq!(reply.as_bytes(), expected.as_bytes());
    }

    #[tokio::test]
    async fn test_exact_multiple_needs_empty_terminator() {
        let block = "z".repeat(RCON_MAX_PAYLOAD * 2);
        let server = spawn_rcon_server(PASSWORD, move |_| {
            let mut parts = fragments(&block);
            parts.push(Vec::new());
            parts
        })
        .await;
        let session = RconSession::connect(server.addr, PASSWORD, TIMEOUT).await.unwrap();

        let reply = session.execute("data get entity Steve", TIMEOUT).await.unwrap();
        assert_eq!(reply.len(), RCON_MAX_PAYLOAD * 2);
        // The next command must not see the terminator of the previous one.
        assert_eq!(session.execute("again", TIMEOUT).await.unwrap().len(), RCON_MAX_PAYLOAD * 2);
    }

    #[tokio::test]
    async fn test_concurrent_commands_never_interleave() {
        let server = spawn_rcon_server(PASSWORD, |cmd| {
            // Large enough to span several packets per reply.
            fragments(&cmd.repeat(2_000))
        })
        .await;
        let session = Arc::new(RconSession::connect(server.addr, PASSWORD, TIMEOUT).await.unwrap());

        let mut handles = Vec::new();
        for i in 0..8 {
            let session = session.clone();
            handles.push(tokio::spawn(async move {
                let command = format!("cmd{}", i);
                let reply = session.execute(&command, TIMEOUT).await.unwrap();
                (command, reply)
            }));
        }

        for handle in handles {
            let (command, reply) = handle.await.unwrap();
            assert_eq!(reply, command.repeat(2_000));
        }
    }

    #[tokio::test]
    async fn test_timeout_closes_session() {
        let server = spawn_rcon_server(PASSWORD, |cmd| {
            if cmd == "hang" {
                Vec::new()
            } else {
                fragments("ok")
            }
        })
        .await;
        let session = RconSession::connect(server.addr, PASSWORD, TIMEOUT).await.unwrap();

        let err = session.execute("hang", Duration::from_millis(100)).await.unwrap_err();
        assert!(matches!(err, RconError::Timeout));
        let err = session.execute("ping", TIMEOUT).await.unwrap_err();
        assert!(matches!(err, RconError::Disconnected));
    }

    #[tokio::test]
    async fn test_cancelled_command_poisons_session() {
        let server = spawn_rcon_server(PASSWORD, |cmd| {
            if cmd == "hang" {
                Vec::new()
            } else {
                fragments("ok")
            }
        })
        .await;
        let session = RconSession::connect(server.addr, PASSWORD, TIMEOUT).await.unwrap();

        // Dropping the future mid-read leaves the stream in an unknown state.
        let abandoned = tokio::time::timeout(Duration::from_millis(50), session.execute("hang", TIMEOUT)).await;
        assert!(abandoned.is_err());

        let err = session.execute("ping", TIMEOUT).await.unwrap_err();
        assert!(matches!(err, RconError::Disconnected));
    }

    #[tokio::test]
    async fn test_refused_connection_is_unavailable() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = RconSession::connect(addr, PASSWORD, TIMEOUT).await.err().unwrap();
        assert!(matches!(err, RconError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_client_connects_by_address_string() {
        let server = spawn_rcon_server(PASSWORD, |_| fragments("pong")).await;
        let client = RconClient::new(server.addr.to_string(), PASSWORD);
        let session = client.connect(TIMEOUT).await.unwrap();
        assert_eq!(session.execute("ping", TIMEOUT).await.unwrap(), "pong");
    }

    fn retrying(address: SocketAddr, password: &str) -> RconClient {
        RconClient::new(address.to_string(), password).with_retry(RetryPolicy {
            attempts: 3,
            base_backoff: Duration::from_millis(10),
        })
    }

    #[tokio::test]
    async fn test_client_retries_dropped_connection() {
        let server = spawn_flaky_rcon_server(PASSWORD, 1, |_| fragments("pong")).await;
        let session = retrying(server.addr, PASSWORD).connect(TIMEOUT).await.unwrap();

        assert_eq!(session.execute("ping", TIMEOUT).await.unwrap(), "pong");
        assert_eq!(server.connections.load(Ordering::SeqCst), 2);
        assert_eq!(server.auth_packets.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_client_gives_up_after_bounded_attempts() {
        let server = spawn_flaky_rcon_server(PASSWORD, usize::MAX, |_| fragments("pong")).await;
        let err = retrying(server.addr, PASSWORD).connect(TIMEOUT).await.err().unwrap();

        assert!(matches!(err, RconError::Unavailable(_)));
        assert_eq!(server.connections.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_client_never_retries_rejected_password() {
        let server = spawn_rcon_server(PASSWORD, |_| fragments("pong")).await;
        let err = retrying(server.addr, "wrong").connect(TIMEOUT).await.err().unwrap();

        assert!(matches!(err, RconError::Auth));
        assert_eq!(server.connections.load(Ordering::SeqCst), 1);
        assert_eq!(server.auth_packets.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn client_debug_hides_password() {
        let client = RconClient::new("127.0.0.1:25575", "secret-pass");
        assert!(!format!("{:?}", client).contains("secret-pass"));
    }
}

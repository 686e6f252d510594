// src/protocol/query.rs
use crate::models::server::ServerStat;
use crate::protocol::codec::{
    decode_query_response, encode_full_stat_request, encode_handshake_request,
    ProtocolDecodeError, QueryResponse, QUERY_TYPE_HANDSHAKE, QUERY_TYPE_STAT, SESSION_ID_MASK,
};
use crate::protocol::RetryPolicy;
use byteorder::{BigEndian, ByteOrder};
use log::{debug, warn};
use rand::Rng;
use std::collections::HashSet;
use std::fmt;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;

/// Servers rotate challenge tokens every 30 seconds.
pub const TOKEN_LIFETIME: Duration = Duration::from_secs(30);

const MAX_DATAGRAM: usize = 8192;

#[derive(Debug)]
pub enum QueryError {
    Unreachable { attempts: u32 },
    Decode(ProtocolDecodeError),
    Io(std::io::Error),
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unreachable { attempts } => {
                write!(f, "no query response after {} attempts", attempts)
            }
            Self::Decode(e) => write!(f, "invalid query response: {}", e),
            Self::Io(e) => write!(f, "query socket error: {}", e),
        }
    }
}

impl std::error::Error for QueryError {}

/// The result of one handshake. The server remembers `session_id` for our
/// address and stamps it on the full-stat reply, so it is reused until the
/// token expires.
#[derive(Debug, Clone, Copy)]
pub struct QuerySession {
    pub session_id: i32,
    pub challenge_token: i32,
    pub created_at: Instant,
    pub expires_at: Instant,
}

impl QuerySession {
    fn new(session_id: i32, challenge_token: i32, lifetime: Duration) -> Self {
        let created_at = Instant::now();
        Self {
            session_id,
            challenge_token,
            created_at,
            expires_at: created_at + lifetime,
        }
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

enum AttemptError {
    TimedOut,
    Decode(ProtocolDecodeError),
    Io(std::io::Error),
}

/// Hands out masked session ids, never the same one twice per exchange.
struct SessionIds {
    used: HashSet<i32>,
}

impl SessionIds {
    fn new() -> Self {
        Self { used: HashSet::new() }
    }

    fn next(&mut self) -> i32 {
        let mut rng = rand::thread_rng();
        loop {
            let id = rng.gen::<i32>() & SESSION_ID_MASK;
            if self.used.insert(id) {
                return id;
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueryClient {
    retry: RetryPolicy,
    token_lifetime: Duration,
}

impl Default for QueryClient {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

impl QueryClient {
    pub fn new(retry: RetryPolicy) -> Self {
        Self {
            retry,
            token_lifetime: TOKEN_LIFETIME,
        }
    }

    #[cfg(test)]
    pub fn with_token_lifetime(mut self, lifetime: Duration) -> Self {
        self.token_lifetime = lifetime;
        self
    }

    pub async fn get_server_stat(
        &self,
        address: SocketAddr,
        timeout: Duration,
    ) -> Result<ServerStat, QueryError> {
        let bind_addr = if address.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(bind_addr).await.map_err(QueryError::Io)?;
        socket.connect(address).await.map_err(QueryError::Io)?;

        let mut ids = SessionIds::new();
        let mut session = self.handshake(&socket, &mut ids, timeout).await?;
        let mut last_error = None;

        for attempt in 0..self.retry.attempts {
            if attempt > 0 {
                tokio::time::sleep(self.retry.backoff(attempt - 1)).await;
            }
            if session.is_expired() {
                debug!(
                    "Challenge token for {} expired after {:?}, handshaking again",
                    address,
                    session.created_at.elapsed()
                );
                session = self.handshake(&socket, &mut ids, timeout).await?;
            }

            let request = encode_full_stat_request(session.session_id, session.challenge_token);
            let sent_at = Instant::now();
            let result = exchange(&socket, &request, session.session_id, QUERY_TYPE_STAT, timeout).await;

            match result {
                Ok(QueryResponse::FullStat { stat, .. }) => {
                    let stat = ServerStat::from_full_stat(stat, sent_at.elapsed());
                    debug!(
                        "Full stat from {}: {}/{} players, {}ms",
                        address, stat.num_players, stat.max_players, stat.latency_ms
                    );
                    return Ok(stat);
                }
                Ok(QueryResponse::Handshake { .. }) => {
                    last_error = Some(AttemptError::Decode(ProtocolDecodeError {
                        offset: 0,
                        reason: "handshake reply to a stat request".to_string(),
                    }));
                }
                Err(e) => {
                    log_attempt_failure(address, "stat", attempt, &e);
                    last_error = Some(e);
                }
            }
        }

        Err(self.exhausted(last_error))
    }

    /// Each handshake attempt uses a fresh session id; the one that gets an
    /// answer becomes the session id for the stat requests that follow.
    async fn handshake(
        &self,
        socket: &UdpSocket,
        ids: &mut SessionIds,
        timeout: Duration,
    ) -> Result<QuerySession, QueryError> {
        let mut last_error = None;

        for attempt in 0..self.retry.attempts {
            if attempt > 0 {
                tokio::time::sleep(self.retry.backoff(attempt - 1)).await;
            }

            let session_id = ids.next();
            let request = encode_handshake_request(session_id);
            match exchange(socket, &request, session_id, QUERY_TYPE_HANDSHAKE, timeout).await {
                Ok(QueryResponse::Handshake { token, .. }) => {
                    return Ok(QuerySession::new(session_id, token, self.token_lifetime))
                }
                Ok(QueryResponse::FullStat { .. }) => {
                    last_error = Some(AttemptError::Decode(ProtocolDecodeError {
                        offset: 0,
                        reason: "stat reply to a handshake".to_string(),
                    }));
                }
                Err(e) => {
                    if let Ok(peer) = socket.peer_addr() {
                        log_attempt_failure(peer, "handshake", attempt, &e);
                    }
                    last_error = Some(e);
                }
            }
        }

        Err(self.exhausted(last_error))
    }

    fn exhausted(&self, last_error: Option<AttemptError>) -> QueryError {
        match last_error {
            Some(AttemptError::Decode(e)) => QueryError::Decode(e),
            _ => QueryError::Unreachable {
                attempts: self.retry.attempts,
            },
        }
    }
}

fn log_attempt_failure(address: SocketAddr, stage: &str, attempt: u32, error: &AttemptError) {
    match error {
        AttemptError::TimedOut => debug!("Query {} to {} timed out (attempt {})", stage, address, attempt + 1),
        AttemptError::Decode(e) => warn!("Query {} from {} undecodable (attempt {}): {}", stage, address, attempt + 1, e),
        AttemptError::Io(e) => debug!("Query {} to {} failed (attempt {}): {}", stage, address, attempt + 1, e),
    }
}

/// Sends one request and waits for the datagram carrying its session id.
/// Anything else that arrives before the deadline is a stray and dropped.
async fn exchange(
    socket: &UdpSocket,
    request: &[u8],
    session_id: i32,
    kind: u8,
    timeout: Duration,
) -> Result<QueryResponse, AttemptError> {
    socket.send(request).await.map_err(AttemptError::Io)?;
    let deadline = tokio::time::Instant::now() + timeout;
    let mut buffer = [0u8; MAX_DATAGRAM];

    loop {
        let len = match tokio::time::timeout_at(deadline, socket.recv(&mut buffer)).await {
            Ok(Ok(len)) => len,
            Ok(Err(e)) => return Err(AttemptError::Io(e)),
            Err(_) => return Err(AttemptError::TimedOut),
        };
        let datagram = &buffer[..len];

        if len < 5 || datagram[0] != kind || BigEndian::read_i32(&datagram[1..5]) != session_id {
            debug!("Discarding stray query datagram of {} bytes", len);
            continue;
        }

        return decode_query_response(datagram).map_err(AttemptError::Decode);
    }
}

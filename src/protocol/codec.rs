// src/protocol/codec.rs
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use std::fmt;

pub const QUERY_MAGIC: [u8; 2] = [0xFE, 0xFD];
pub const QUERY_TYPE_HANDSHAKE: u8 = 9;
pub const QUERY_TYPE_STAT: u8 = 0;
pub const SESSION_ID_MASK: i32 = 0x0F0F_0F0F;

// Full-stat requests carry four padding bytes after the token.
const STAT_REQUEST_PADDING: [u8; 4] = [0x00, 0x00, 0x00, 0x00];
const KV_SECTION_PADDING: &[u8; 11] = b"splitnum\x00\x80\x00";
const PLAYER_SECTION_PADDING: &[u8; 10] = b"\x01player_\x00\x00";

pub const RCON_TYPE_AUTH: i32 = 3;
pub const RCON_TYPE_EXEC_COMMAND: i32 = 2;
pub const RCON_TYPE_AUTH_RESPONSE: i32 = 2;
pub const RCON_TYPE_RESPONSE_VALUE: i32 = 0;

/// Largest payload a server puts into a single response packet.
pub const RCON_MAX_PAYLOAD: usize = 4096;
/// Request id + type + two trailing NULs.
pub const RCON_MIN_FRAME: usize = 10;
pub const RCON_MAX_FRAME: usize = 1 << 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolDecodeError {
    pub offset: usize,
    pub reason: String,
}

impl fmt::Display for ProtocolDecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "malformed packet at offset {}: {}", self.offset, self.reason)
    }
}

impl std::error::Error for ProtocolDecodeError {}

/// Bounds-checked cursor over a received datagram or frame.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    pub fn fail<T>(&self, reason: impl Into<String>) -> Result<T, ProtocolDecodeError> {
        Err(ProtocolDecodeError {
            offset: self.pos,
            reason: reason.into(),
        })
    }

    pub fn take(&mut self, len: usize) -> Result<&'a [u8], ProtocolDecodeError> {
        let end = match self.pos.checked_add(len) {
            Some(end) if end <= self.buf.len() => end,
            _ => {
                return self.fail(format!(
                    "need {} bytes, {} left",
                    len,
                    self.buf.len().saturating_sub(self.pos)
                ))
            }
        };
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub fn u8(&mut self) -> Result<u8, ProtocolDecodeError> {
        Ok(self.take(1)?[0])
    }

    pub fn i32_be(&mut self) -> Result<i32, ProtocolDecodeError> {
        Ok(BigEndian::read_i32(self.take(4)?))
    }

    pub fn i32_le(&mut self) -> Result<i32, ProtocolDecodeError> {
        Ok(LittleEndian::read_i32(self.take(4)?))
    }

    /// Reads up to (and consumes) the next NUL byte.
    pub fn cstring(&mut self) -> Result<String, ProtocolDecodeError> {
        let rest = &self.buf[self.pos.min(self.buf.len())..];
        match rest.iter().position(|b| *b == 0) {
            Some(end) => {
                let value = String::from_utf8_lossy(&rest[..end]).into_owned();
                self.pos += end + 1;
                Ok(value)
            }
            None => self.fail("unterminated string"),
        }
    }

    /// Reads a 16-bit length prefix followed by that many bytes.
    #[cfg(test)]
    pub fn prefixed_string(&mut self) -> Result<String, ProtocolDecodeError> {
        let len = BigEndian::read_u16(self.take(2)?) as usize;
        Ok(String::from_utf8_lossy(self.take(len)?).into_owned())
    }
}

#[derive(Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn u8(mut self, value: u8) -> Self {
        self.buf.push(value);
        self
    }

    pub fn i32_be(mut self, value: i32) -> Self {
        let mut raw = [0u8; 4];
        BigEndian::write_i32(&mut raw, value);
        self.buf.extend_from_slice(&raw);
        self
    }

    pub fn i32_le(mut self, value: i32) -> Self {
        let mut raw = [0u8; 4];
        LittleEndian::write_i32(&mut raw, value);
        self.buf.extend_from_slice(&raw);
        self
    }

    pub fn bytes(mut self, value: &[u8]) -> Self {
        self.buf.extend_from_slice(value);
        self
    }

    #[cfg(test)]
    pub fn cstring(self, value: &str) -> Self {
        self.bytes(value.as_bytes()).u8(0)
    }

    #[cfg(test)]
    pub fn prefixed_string(self, value: &str) -> Self {
        let mut raw = [0u8; 2];
        BigEndian::write_u16(&mut raw, value.len() as u16);
        self.bytes(&raw).bytes(value.as_bytes())
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

// ---------------------------------------------------------------------------
// Query (UDP)
// ---------------------------------------------------------------------------

/// Raw full-stat payload: the K/V section in wire order and the player names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FullStat {
    pub kv: Vec<(String, String)>,
    pub players: Vec<String>,
}

impl FullStat {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.kv
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryResponse {
    Handshake { session_id: i32, token: i32 },
    FullStat { session_id: i32, stat: FullStat },
}

pub fn encode_handshake_request(session_id: i32) -> Vec<u8> {
    Writer::new()
        .bytes(&QUERY_MAGIC)
        .u8(QUERY_TYPE_HANDSHAKE)
        .i32_be(session_id & SESSION_ID_MASK)
        .finish()
}

pub fn encode_full_stat_request(session_id: i32, token: i32) -> Vec<u8> {
    Writer::new()
        .bytes(&QUERY_MAGIC)
        .u8(QUERY_TYPE_STAT)
        .i32_be(session_id & SESSION_ID_MASK)
        .i32_be(token)
        .bytes(&STAT_REQUEST_PADDING)
        .finish()
}

/// Server side of the handshake, for in-process peers.
#[cfg(test)]
pub fn encode_handshake_response(session_id: i32, token: i32) -> Vec<u8> {
    Writer::new()
        .u8(QUERY_TYPE_HANDSHAKE)
        .i32_be(session_id)
        .cstring(&token.to_string())
        .finish()
}

#[cfg(test)]
pub fn encode_full_stat_response(session_id: i32, stat: &FullStat) -> Vec<u8> {
    let mut writer = Writer::new()
        .u8(QUERY_TYPE_STAT)
        .i32_be(session_id)
        .bytes(KV_SECTION_PADDING);
    for (key, value) in &stat.kv {
        writer = writer.cstring(key).cstring(value);
    }
    writer = writer.u8(0).bytes(PLAYER_SECTION_PADDING);
    for name in &stat.players {
        writer = writer.cstring(name);
    }
    writer.u8(0).finish()
}

pub fn decode_query_response(buf: &[u8]) -> Result<QueryResponse, ProtocolDecodeError> {
    let mut r = Reader::new(buf);
    let kind = r.u8()?;
    let session_id = r.i32_be()?;

    match kind {
        QUERY_TYPE_HANDSHAKE => {
            let raw = r.cstring()?;
            let token = match raw.trim().parse::<i64>() {
                Ok(value) => value as i32,
                Err(_) => return r.fail(format!("challenge token is not a number: {:?}", raw)),
            };
            Ok(QueryResponse::Handshake { session_id, token })
        }
        QUERY_TYPE_STAT => {
            r.take(KV_SECTION_PADDING.len())?;
            let mut stat = FullStat::default();
            loop {
                let key = r.cstring()?;
                if key.is_empty() {
                    break;
                }
                let value = r.cstring()?;
                stat.kv.push((key, value));
            }
            r.take(PLAYER_SECTION_PADDING.len())?;
            // Some servers drop the final terminator when the list is empty.
            while !r.is_empty() {
                let name = r.cstring()?;
                if name.is_empty() {
                    break;
                }
                stat.players.push(name);
            }
            Ok(QueryResponse::FullStat { session_id, stat })
        }
        other => Err(ProtocolDecodeError {
            offset: 0,
            reason: format!("unknown query packet type {}", other),
        }),
    }
}

/// Server-side view of an incoming query request.
#[cfg(test)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryRequest {
    Handshake { session_id: i32 },
    FullStat { session_id: i32, token: i32 },
}

#[cfg(test)]
pub fn decode_query_request(buf: &[u8]) -> Result<QueryRequest, ProtocolDecodeError> {
    let mut r = Reader::new(buf);
    if r.take(2)? != QUERY_MAGIC {
        return Err(ProtocolDecodeError {
            offset: 0,
            reason: "bad query magic".to_string(),
        });
    }
    let kind = r.u8()?;
    let session_id = r.i32_be()?;
    match kind {
        QUERY_TYPE_HANDSHAKE => Ok(QueryRequest::Handshake { session_id }),
        QUERY_TYPE_STAT => {
            let token = r.i32_be()?;
            Ok(QueryRequest::FullStat { session_id, token })
        }
        other => r.fail(format!("unknown query request type {}", other)),
    }
}

// ---------------------------------------------------------------------------
// RCON (TCP)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RconPacketType {
    Auth,
    AuthResponse,
    ExecCommand,
    ResponseValue,
}

impl RconPacketType {
    pub fn as_i32(self) -> i32 {
        match self {
            Self::Auth => RCON_TYPE_AUTH,
            Self::AuthResponse => RCON_TYPE_AUTH_RESPONSE,
            Self::ExecCommand => RCON_TYPE_EXEC_COMMAND,
            Self::ResponseValue => RCON_TYPE_RESPONSE_VALUE,
        }
    }

    /// Type codes overlap between directions, so decoding needs to know who sent it.
    pub fn from_server(raw: i32) -> Option<Self> {
        match raw {
            RCON_TYPE_AUTH_RESPONSE => Some(Self::AuthResponse),
            RCON_TYPE_RESPONSE_VALUE => Some(Self::ResponseValue),
            _ => None,
        }
    }

    #[cfg(test)]
    pub fn from_client(raw: i32) -> Option<Self> {
        match raw {
            RCON_TYPE_AUTH => Some(Self::Auth),
            RCON_TYPE_EXEC_COMMAND => Some(Self::ExecCommand),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RconPacket {
    pub request_id: i32,
    pub kind: RconPacketType,
    pub payload: Vec<u8>,
}

impl RconPacket {
    pub fn new(request_id: i32, kind: RconPacketType, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            request_id,
            kind,
            payload: payload.into(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let length = (self.payload.len() + RCON_MIN_FRAME) as i32;
        Writer::new()
            .i32_le(length)
            .i32_le(self.request_id)
            .i32_le(self.kind.as_i32())
            .bytes(&self.payload)
            .bytes(&[0x00, 0x00])
            .finish()
    }

    /// Decodes a frame body (everything after the length prefix).
    pub fn decode_body(
        body: &[u8],
        kind_of: fn(i32) -> Option<RconPacketType>,
    ) -> Result<Self, ProtocolDecodeError> {
        let mut r = Reader::new(body);
        if body.len() < RCON_MIN_FRAME {
            return r.fail(format!("frame of {} bytes is too short", body.len()));
        }
        let request_id = r.i32_le()?;
        let raw_kind = r.i32_le()?;
        let kind = match kind_of(raw_kind) {
            Some(kind) => kind,
            None => return Err(ProtocolDecodeError {
                offset: 4,
                reason: format!("unexpected packet type {}", raw_kind),
            }),
        };
        let payload = r.take(body.len() - RCON_MIN_FRAME)?.to_vec();
        if r.take(2)? != [0x00, 0x00] {
            return Err(ProtocolDecodeError {
                offset: body.len() - 2,
                reason: "missing packet terminator".to_string(),
            });
        }
        Ok(Self {
            request_id,
            kind,
            payload,
        })
    }
}

/// Validates the little-endian length prefix of an RCON frame.
pub fn decode_rcon_length(raw: [u8; 4]) -> Result<usize, ProtocolDecodeError> {
    let length = LittleEndian::read_i32(&raw);
    if length < RCON_MIN_FRAME as i32 || length as usize > RCON_MAX_FRAME {
        return Err(ProtocolDecodeError {
            offset: 0,
            reason: format!("frame length {} out of range", length),
        });
    }
    Ok(length as usize)
}

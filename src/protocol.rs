//! Server List Ping wire format.
//!
//! Frames are length-prefixed packets of VarInt-encoded fields. The status
//! exchange on a fresh connection is: handshake (next state 1), status
//! request, JSON status response.

use std::io;

use serde_derive::Deserialize;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Protocol ceiling for one packet; larger length prefixes are malformed.
const MAX_PACKET_LEN: usize = 1 << 21;

/// Sent in the handshake when no particular version is negotiated.
const PROTOCOL_UNKNOWN: i32 = -1;

/// Status response trimmed to the fields that get persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct Status {
    /// Version name, e.g. "1.20.4".
    pub version: String,
    /// Protocol number; -1 when the server omits it.
    pub protocol: i32,
    /// Players online at query time.
    pub players_online: u32,
    /// Player slot limit.
    pub players_max: u32,
    /// Description (MOTD), flattened to plain text.
    pub description: String,
}

#[derive(Deserialize)]
struct RawStatus {
    #[serde(default)]
    version: RawVersion,
    players: Option<RawPlayers>,
    description: Option<Value>,
}

#[derive(Deserialize)]
struct RawVersion {
    #[serde(default = "unknown_version")]
    name: String,
    #[serde(default = "unknown_protocol")]
    protocol: i32,
}

impl Default for RawVersion {
    fn default() -> Self {
        Self {
            name: unknown_version(),
            protocol: unknown_protocol(),
        }
    }
}

fn unknown_version() -> String {
    "unknown".to_owned()
}

const fn unknown_protocol() -> i32 {
    PROTOCOL_UNKNOWN
}

#[derive(Deserialize, Default)]
struct RawPlayers {
    #[serde(default)]
    online: u32,
    #[serde(default)]
    max: u32,
}

/// Runs the status exchange on a connected stream.
///
/// The caller bounds the whole exchange with a timeout; every read here is
/// finite and frame lengths are checked before buffering.
pub async fn status<S>(stream: &mut S, host: &str, port: u16) -> io::Result<Status>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    write_handshake(stream, host, port).await?;
    write_packet(stream, &[0x00]).await?;
    let payload = read_packet(stream).await?;
    parse_status(&payload)
}

/// Writes the handshake packet announcing a status (state 1) transaction.
async fn write_handshake<W>(writer: &mut W, host: &str, port: u16) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut body = Vec::with_capacity(host.len() + 8);
    write_varint(&mut body, 0x00);
    write_varint(&mut body, PROTOCOL_UNKNOWN);
    write_string(&mut body, host);
    body.extend_from_slice(&port.to_be_bytes());
    write_varint(&mut body, 1);
    write_packet(writer, &body).await
}

/// Appends `value` in the protocol's 32-bit VarInt encoding.
pub fn write_varint(buf: &mut Vec<u8>, value: i32) {
    let mut raw = value as u32;
    loop {
        let byte = (raw & 0x7f) as u8;
        raw >>= 7;
        if raw == 0 {
            buf.push(byte);
            return;
        }
        buf.push(byte | 0x80);
    }
}

/// Appends a VarInt-length-prefixed UTF-8 string.
pub fn write_string(buf: &mut Vec<u8>, s: &str) {
    write_varint(buf, s.len() as i32);
    buf.extend_from_slice(s.as_bytes());
}

/// Writes one length-prefixed packet.
pub async fn write_packet<W>(writer: &mut W, body: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut frame = Vec::with_capacity(body.len() + 5);
    write_varint(&mut frame, body.len() as i32);
    frame.extend_from_slice(body);
    writer.write_all(&frame).await?;
    writer.flush().await
}

/// Reads one VarInt. Five bytes is the encoding's ceiling.
pub async fn read_varint<R>(reader: &mut R) -> io::Result<i32>
where
    R: AsyncRead + Unpin,
{
    let mut value: u32 = 0;
    for shift in 0..5u32 {
        let byte = reader.read_u8().await?;
        value |= u32::from(byte & 0x7f) << (7 * shift);
        if byte & 0x80 == 0 {
            return Ok(value as i32);
        }
    }
    Err(invalid("VarInt too long"))
}

/// Reads one length-prefixed packet and returns its body, packet id
/// included.
pub async fn read_packet<R>(reader: &mut R) -> io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let len = read_varint(reader).await?;
    let len = usize::try_from(len).map_err(|_| invalid("negative packet length"))?;
    if len == 0 || len > MAX_PACKET_LEN {
        return Err(invalid("packet length out of range"));
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(body)
}

fn parse_status(body: &[u8]) -> io::Result<Status> {
    let (id, rest) = decode_varint(body)?;
    if id != 0x00 {
        return Err(invalid("unexpected packet id in status response"));
    }
    let (json_len, rest) = decode_varint(rest)?;
    let json_len = usize::try_from(json_len).map_err(|_| invalid("negative string length"))?;
    if json_len > rest.len() {
        return Err(invalid("string length exceeds packet"));
    }

    let raw: RawStatus = serde_json::from_slice(&rest[..json_len])
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let players = raw.players.unwrap_or_default();

    Ok(Status {
        version: raw.version.name,
        protocol: raw.version.protocol,
        players_online: players.online,
        players_max: players.max,
        description: raw.description.map(|d| flatten_motd(&d)).unwrap_or_default(),
    })
}

/// VarInt decode over a slice, for payloads already in memory.
fn decode_varint(buf: &[u8]) -> io::Result<(i32, &[u8])> {
    let mut value: u32 = 0;
    for (i, byte) in buf.iter().enumerate().take(5) {
        value |= u32::from(byte & 0x7f) << (7 * i as u32);
        if byte & 0x80 == 0 {
            return Ok((value as i32, &buf[i + 1..]));
        }
    }
    Err(invalid("VarInt too long"))
}

/// Collapses a chat-component description into plain text.
///
/// Descriptions arrive as a bare string, a component object with optional
/// `extra` children, or an array of components.
pub fn flatten_motd(value: &Value) -> String {
    let mut out = String::new();
    collect_text(value, &mut out);
    out
}

fn collect_text(value: &Value, out: &mut String) {
    match value {
        Value::String(s) => out.push_str(s),
        Value::Array(items) => {
            for item in items {
                collect_text(item, out);
            }
        }
        Value::Object(map) => {
            if let Some(Value::String(text)) = map.get("text") {
                out.push_str(text);
            }
            if let Some(extra) = map.get("extra") {
                collect_text(extra, out);
            }
        }
        _ => {}
    }
}

fn invalid(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn varint_round_trips_boundary_values() {
        for value in [0, 1, 127, 128, 255, 2_097_151, i32::MAX, -1, i32::MIN] {
            let mut buf = Vec::new();
            write_varint(&mut buf, value);
            let (decoded, rest) = decode_varint(&buf).unwrap();
            assert_eq!(decoded, value);
            assert!(rest.is_empty());
        }
    }

    #[test]
    fn negative_varints_use_five_bytes() {
        let mut buf = Vec::new();
        write_varint(&mut buf, -1);
        assert_eq!(buf.len(), 5);
    }

    #[tokio::test]
    async fn async_varint_matches_sync_decode() {
        let mut buf = Vec::new();
        write_varint(&mut buf, 2_097_151);
        let mut reader = buf.as_slice();
        assert_eq!(read_varint(&mut reader).await.unwrap(), 2_097_151);
    }

    #[tokio::test]
    async fn overlong_varint_is_rejected() {
        let mut reader = [0x80u8, 0x80, 0x80, 0x80, 0x80, 0x01].as_slice();
        assert!(read_varint(&mut reader).await.is_err());
    }

    #[tokio::test]
    async fn oversized_packet_length_is_rejected() {
        let mut frame = Vec::new();
        write_varint(&mut frame, (MAX_PACKET_LEN + 1) as i32);
        let mut reader = frame.as_slice();
        assert!(read_packet(&mut reader).await.is_err());
    }

    #[tokio::test]
    async fn status_exchange_against_scripted_peer() {
        let (mut client, mut server) = tokio::io::duplex(4096);

        let peer = tokio::spawn(async move {
            let handshake = read_packet(&mut server).await.unwrap();
            // Packet id 0, then the VarInt-encoded unknown protocol version.
            assert_eq!(handshake[0], 0x00);
            let request = read_packet(&mut server).await.unwrap();
            assert_eq!(request, vec![0x00]);

            let body = json!({
                "version": {"name": "1.20.4", "protocol": 765},
                "players": {"online": 7, "max": 100},
                "description": {"text": "Hello ", "extra": [{"text": "world"}]},
            })
            .to_string();
            let mut payload = Vec::new();
            write_varint(&mut payload, 0x00);
            write_string(&mut payload, &body);
            write_packet(&mut server, &payload).await.unwrap();
        });

        let status = status(&mut client, "127.0.0.1", 25565).await.unwrap();
        peer.await.unwrap();

        assert_eq!(status.version, "1.20.4");
        assert_eq!(status.protocol, 765);
        assert_eq!(status.players_online, 7);
        assert_eq!(status.players_max, 100);
        assert_eq!(status.description, "Hello world");
    }

    #[tokio::test]
    async fn garbage_response_is_a_parse_error() {
        let (mut client, mut server) = tokio::io::duplex(4096);

        tokio::spawn(async move {
            let _ = read_packet(&mut server).await;
            let _ = read_packet(&mut server).await;
            let _ = write_packet(&mut server, b"\x00not json at all").await;
        });

        assert!(status(&mut client, "127.0.0.1", 25565).await.is_err());
    }

    #[test]
    fn status_defaults_for_missing_fields() {
        let body = br#"{"description": "legacy"}"#;
        let mut packet = Vec::new();
        write_varint(&mut packet, 0x00);
        write_varint(&mut packet, body.len() as i32);
        packet.extend_from_slice(body);

        let status = parse_status(&packet).unwrap();
        assert_eq!(status.version, "unknown");
        assert_eq!(status.protocol, -1);
        assert_eq!(status.players_online, 0);
        assert_eq!(status.players_max, 0);
        assert_eq!(status.description, "legacy");
    }

    #[test]
    fn motd_flattening_handles_component_shapes() {
        assert_eq!(flatten_motd(&json!("plain")), "plain");
        assert_eq!(flatten_motd(&json!({"text": "just text"})), "just text");
        assert_eq!(
            flatten_motd(&json!([{"text": "a"}, "b", {"text": "c"}])),
            "abc"
        );
        assert_eq!(
            flatten_motd(&json!({"text": "x", "extra": [{"text": "y", "extra": ["z"]}]})),
            "xyz"
        );
        assert_eq!(flatten_motd(&json!({"color": "red"})), "");
    }
}

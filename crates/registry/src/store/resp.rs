// Copyright (C) 2025 Ryan Daum <ryan.daum@gmail.com> This program is free
// software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, version
// 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Shared store client speaking RESP2, the Redis wire protocol.
//!
//! One TCP connection per node, guarded by an async mutex so that commands
//! are strictly request/reply. A failed command drops the connection and the
//! next command dials again, which is all the recovery the periodic jobs need:
//! a sweep that fails is simply retried on the next tick.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::codec::{Decoder, Encoder, Framed};
use tracing::{debug, warn};

use crate::store::{SharedStore, StoreError};

const DEFAULT_PORT: u16 = 6379;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// RESP2 value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    SimpleString(String),
    Error(String),
    Integer(i64),
    /// `None` is the null bulk string.
    BulkString(Option<Vec<u8>>),
    /// `None` is the null array.
    Array(Option<Vec<RespValue>>),
}

impl RespValue {
    /// A command is always sent as an array of bulk strings.
    pub fn command(args: &[&str]) -> Self {
        RespValue::Array(Some(
            args.iter()
                .map(|a| RespValue::BulkString(Some(a.as_bytes().to_vec())))
                .collect(),
        ))
    }

    fn encode_into(&self, buf: &mut BytesMut) {
        match self {
            RespValue::SimpleString(s) => {
                buf.extend_from_slice(b"+");
                buf.extend_from_slice(s.as_bytes());
                buf.extend_from_slice(b"\r\n");
            }
            RespValue::Error(e) => {
                buf.extend_from_slice(b"-");
                buf.extend_from_slice(e.as_bytes());
                buf.extend_from_slice(b"\r\n");
            }
            RespValue::Integer(i) => {
                buf.extend_from_slice(format!(":{i}\r\n").as_bytes());
            }
            RespValue::BulkString(Some(data)) => {
                buf.extend_from_slice(format!("${}\r\n", data.len()).as_bytes());
                buf.extend_from_slice(data);
                buf.extend_from_slice(b"\r\n");
            }
            RespValue::BulkString(None) => buf.extend_from_slice(b"$-1\r\n"),
            RespValue::Array(Some(items)) => {
                buf.extend_from_slice(format!("*{}\r\n", items.len()).as_bytes());
                for item in items {
                    item.encode_into(buf);
                }
            }
            RespValue::Array(None) => buf.extend_from_slice(b"*-1\r\n"),
        }
    }

    fn into_string(self) -> Result<Option<String>, StoreError> {
        match self {
            RespValue::BulkString(None) => Ok(None),
            RespValue::BulkString(Some(bytes)) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|e| StoreError::Protocol(format!("non-utf8 bulk string: {e}"))),
            RespValue::SimpleString(s) => Ok(Some(s)),
            other => Err(StoreError::Protocol(format!(
                "expected bulk string, got {other:?}"
            ))),
        }
    }

    fn into_integer(self) -> Result<i64, StoreError> {
        match self {
            RespValue::Integer(i) => Ok(i),
            other => Err(StoreError::Protocol(format!(
                "expected integer, got {other:?}"
            ))),
        }
    }

    fn into_strings(self) -> Result<Vec<String>, StoreError> {
        match self {
            RespValue::Array(None) => Ok(vec![]),
            RespValue::Array(Some(items)) => items
                .into_iter()
                .map(|item| {
                    item.into_string()?
                        .ok_or_else(|| StoreError::Protocol("null element in array".to_string()))
                })
                .collect(),
            other => Err(StoreError::Protocol(format!(
                "expected array, got {other:?}"
            ))),
        }
    }
}

/// Framing for RESP2 over a byte stream.
///
/// Decoding first walks the frame's element headers without building
/// anything, remembering how far it got, so a large reply arriving in many
/// reads is scanned once. Values are built only when the frame is complete.
#[derive(Debug, Default)]
pub struct RespCodec {
    /// Offset just past the last fully scanned element.
    scanned: usize,
    /// Elements still expected by each open array, innermost last.
    open_arrays: Vec<u64>,
}

/// Preallocation limit for arrays; the header length is not trusted.
const MAX_ARRAY_PREALLOC: usize = 1024;

fn find_crlf(buf: &[u8], from: usize) -> Option<usize> {
    buf.get(from..)?
        .windows(2)
        .position(|w| w == b"\r\n")
        .map(|p| from + p)
}

fn parse_len(line: &[u8]) -> Result<i64, StoreError> {
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| StoreError::Protocol("bad length or integer".to_string()))
}

/// Parse one value starting at `pos`. `Ok(None)` means more bytes are needed;
/// on success returns the value and the offset just past it.
fn parse_value(buf: &[u8], pos: usize) -> Result<Option<(RespValue, usize)>, StoreError> {
    let Some(&tag) = buf.get(pos) else {
        return Ok(None);
    };
    let Some(line_end) = find_crlf(buf, pos + 1) else {
        return Ok(None);
    };
    let line = &buf[pos + 1..line_end];
    let after_line = line_end + 2;

    match tag {
        b'+' => Ok(Some((
            RespValue::SimpleString(String::from_utf8_lossy(line).into_owned()),
            after_line,
        ))),
        b'-' => Ok(Some((
            RespValue::Error(String::from_utf8_lossy(line).into_owned()),
            after_line,
        ))),
        b':' => Ok(Some((RespValue::Integer(parse_len(line)?), after_line))),
        b'$' => {
            let len = parse_len(line)?;
            if len < 0 {
                return Ok(Some((RespValue::BulkString(None), after_line)));
            }
            let end = after_line + len as usize;
            if buf.len() < end + 2 {
                return Ok(None);
            }
            if &buf[end..end + 2] != b"\r\n" {
                return Err(StoreError::Protocol(
                    "bulk string not terminated by CRLF".to_string(),
                ));
            }
            Ok(Some((
                RespValue::BulkString(Some(buf[after_line..end].to_vec())),
                end + 2,
            )))
        }
        b'*' => {
            let count = parse_len(line)?;
            if count < 0 {
                return Ok(Some((RespValue::Array(None), after_line)));
            }
            let mut items = Vec::with_capacity((count as usize).min(MAX_ARRAY_PREALLOC));
            let mut cursor = after_line;
            for _ in 0..count {
                match parse_value(buf, cursor)? {
                    Some((item, next)) => {
                        items.push(item);
                        cursor = next;
                    }
                    None => return Ok(None),
                }
            }
            Ok(Some((RespValue::Array(Some(items)), cursor)))
        }
        other => Err(StoreError::Protocol(format!(
            "unknown type byte {:?}",
            other as char
        ))),
    }
}

/// The header of one element, checked but not materialised.
struct Scanned {
    /// Offset just past the header, or past the whole value for scalars.
    end: usize,
    /// Elements that follow, for a non-empty array.
    children: u64,
}

fn scan_element(buf: &[u8], pos: usize) -> Result<Option<Scanned>, StoreError> {
    let Some(&tag) = buf.get(pos) else {
        return Ok(None);
    };
    let Some(line_end) = find_crlf(buf, pos + 1) else {
        return Ok(None);
    };
    let line = &buf[pos + 1..line_end];
    let after_line = line_end + 2;

    let scanned = match tag {
        b'+' | b'-' => Scanned {
            end: after_line,
            children: 0,
        },
        b':' => {
            parse_len(line)?;
            Scanned {
                end: after_line,
                children: 0,
            }
        }
        b'$' => {
            let len = parse_len(line)?;
            let end = if len < 0 {
                after_line
            } else {
                let end = after_line + len as usize + 2;
                if buf.len() < end {
                    return Ok(None);
                }
                end
            };
            Scanned { end, children: 0 }
        }
        b'*' => Scanned {
            end: after_line,
            children: parse_len(line)?.max(0) as u64,
        },
        other => {
            return Err(StoreError::Protocol(format!(
                "unknown type byte {:?}",
                other as char
            )));
        }
    };
    Ok(Some(scanned))
}

impl RespCodec {
    /// Count one finished element against the open arrays. Returns true when
    /// that completes the top-level frame.
    fn element_done(&mut self) -> bool {
        while let Some(remaining) = self.open_arrays.last_mut() {
            *remaining -= 1;
            if *remaining > 0 {
                return false;
            }
            self.open_arrays.pop();
        }
        true
    }

    fn take_frame(&mut self, src: &mut BytesMut) -> Result<RespValue, StoreError> {
        let frame = src.split_to(self.scanned);
        self.scanned = 0;
        match parse_value(&frame, 0)? {
            Some((value, _)) => Ok(value),
            None => Err(StoreError::Protocol("incomplete frame".to_string())),
        }
    }
}

impl Decoder for RespCodec {
    type Item = RespValue;
    type Error = StoreError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let Some(element) = scan_element(src, self.scanned)? else {
                return Ok(None);
            };
            self.scanned = element.end;
            if element.children > 0 {
                self.open_arrays.push(element.children);
                continue;
            }
            if self.element_done() {
                return self.take_frame(src).map(Some);
            }
        }
    }
}

impl Encoder<RespValue> for RespCodec {
    type Error = StoreError;

    fn encode(&mut self, item: RespValue, dst: &mut BytesMut) -> Result<(), Self::Error> {
        item.encode_into(dst);
        Ok(())
    }
}

/// Where the store lives and how to log in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub host: String,
    pub port: u16,
    pub database: u32,
    pub password: Option<String>,
    pub timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            database: 0,
            password: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl StoreConfig {
    /// Parse `redis://[password@]host[:port][/db]`. A `user:password@` prefix is
    /// accepted and the user part ignored.
    pub fn from_url(url: &str) -> Result<Self, StoreError> {
        let rest = url
            .strip_prefix("redis://")
            .ok_or_else(|| StoreError::InvalidUrl(url.to_string()))?;

        let mut config = Self::default();

        let rest = match rest.rsplit_once('@') {
            Some((credentials, rest)) => {
                let password = match credentials.split_once(':') {
                    Some((_user, password)) => password,
                    None => credentials,
                };
                if !password.is_empty() {
                    config.password = Some(password.to_string());
                }
                rest
            }
            None => rest,
        };

        let (host_port, database) = match rest.split_once('/') {
            Some((hp, db)) => (hp, Some(db)),
            None => (rest, None),
        };

        match host_port.rsplit_once(':') {
            Some((host, port)) => {
                if !host.is_empty() {
                    config.host = host.to_string();
                }
                config.port = port
                    .parse()
                    .map_err(|_| StoreError::InvalidUrl(format!("invalid port: {port}")))?;
            }
            None if !host_port.is_empty() => config.host = host_port.to_string(),
            None => {}
        }

        if let Some(db) = database.filter(|db| !db.is_empty()) {
            config.database = db
                .parse()
                .map_err(|_| StoreError::InvalidUrl(format!("invalid database: {db}")))?;
        }

        Ok(config)
    }
}

type Connection = Framed<TcpStream, RespCodec>;

pub struct RespStore {
    config: StoreConfig,
    connection: Mutex<Option<Connection>>,
}

impl RespStore {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            connection: Mutex::new(None),
        }
    }

    /// Create the client and verify the store answers.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let store = Self::new(StoreConfig::from_url(url)?);
        store.command(&["PING"]).await?;
        Ok(store)
    }

    async fn dial(&self) -> Result<Connection, StoreError> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        debug!(%addr, "Connecting to shared store");
        let stream = tokio::time::timeout(self.config.timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| StoreError::Unavailable(format!("connect to {addr} timed out")))??;
        stream.set_nodelay(true)?;
        let mut framed = Framed::new(stream, RespCodec::default());

        if let Some(password) = &self.config.password {
            Self::round_trip(&mut framed, &["AUTH", password.as_str()], self.config.timeout).await?;
        }
        if self.config.database != 0 {
            let db = self.config.database.to_string();
            Self::round_trip(&mut framed, &["SELECT", db.as_str()], self.config.timeout).await?;
        }
        Ok(framed)
    }

    async fn round_trip(
        framed: &mut Connection,
        args: &[&str],
        timeout: Duration,
    ) -> Result<RespValue, StoreError> {
        let exchange = async {
            framed.send(RespValue::command(args)).await?;
            match framed.next().await {
                Some(reply) => reply,
                None => Err(StoreError::Unavailable(
                    "connection closed by store".to_string(),
                )),
            }
        };
        let reply = tokio::time::timeout(timeout, exchange)
            .await
            .map_err(|_| StoreError::Unavailable(format!("{} timed out", args[0])))??;
        match reply {
            RespValue::Error(message) => Err(StoreError::Server(message)),
            reply => Ok(reply),
        }
    }

    /// Run one command, dialing first if there is no live connection.
    ///
    /// The connection is checked out for the whole exchange and only returned
    /// once a complete reply has been read. If the caller is cancelled midway
    /// the connection goes with it and the next command dials afresh.
    pub async fn command(&self, args: &[&str]) -> Result<RespValue, StoreError> {
        let mut guard = self.connection.lock().await;
        let mut framed = match guard.take() {
            Some(framed) => framed,
            None => self.dial().await?,
        };
        match Self::round_trip(&mut framed, args, self.config.timeout).await {
            Ok(reply) => {
                *guard = Some(framed);
                Ok(reply)
            }
            // An error reply leaves the stream in sync; anything else does not.
            Err(StoreError::Server(message)) => {
                *guard = Some(framed);
                Err(StoreError::Server(message))
            }
            Err(e) => {
                warn!(error = %e, command = args[0], "Dropping shared store connection");
                Err(e)
            }
        }
    }
}

#[async_trait]
impl SharedStore for RespStore {
    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        self.command(&["HGET", key, field]).await?.into_string()
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        self.command(&["HSET", key, field, value])
            .await?
            .into_integer()?;
        Ok(())
    }

    async fn hash_delete(&self, key: &str, field: &str) -> Result<(), StoreError> {
        self.command(&["HDEL", key, field]).await?.into_integer()?;
        Ok(())
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        let flat = self.command(&["HGETALL", key]).await?.into_strings()?;
        if flat.len() % 2 != 0 {
            return Err(StoreError::Protocol(
                "HGETALL returned an odd number of elements".to_string(),
            ));
        }
        let mut map = HashMap::with_capacity(flat.len() / 2);
        let mut iter = flat.into_iter();
        while let (Some(field), Some(value)) = (iter.next(), iter.next()) {
            map.insert(field, value);
        }
        Ok(map)
    }

    async fn hash_length(&self, key: &str) -> Result<usize, StoreError> {
        let len = self.command(&["HLEN", key]).await?.into_integer()?;
        Ok(len.max(0) as usize)
    }

    async fn keys_matching(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        self.command(&["KEYS", pattern]).await?.into_strings()
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.command(&["DEL", key]).await?.into_integer()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn decode_all(bytes: &[u8]) -> Vec<RespValue> {
        let mut codec = RespCodec::default();
        let mut buf = BytesMut::from(bytes);
        let mut out = vec![];
        while let Some(v) = codec.decode(&mut buf).unwrap() {
            out.push(v);
        }
        out
    }

    #[test]
    fn test_command_encoding() {
        let mut buf = BytesMut::new();
        RespCodec::default()
            .encode(RespValue::command(&["HGET", "k", "f"]), &mut buf)
            .unwrap();
        assert_eq!(&buf[..], b"*3\r\n$4\r\nHGET\r\n$1\r\nk\r\n$1\r\nf\r\n");
    }

    #[test]
    fn test_decode_reply_kinds() {
        let values = decode_all(b"+OK\r\n:42\r\n$-1\r\n$3\r\nabc\r\n-ERR nope\r\n*-1\r\n");
        assert_eq!(
            values,
            vec![
                RespValue::SimpleString("OK".to_string()),
                RespValue::Integer(42),
                RespValue::BulkString(None),
                RespValue::BulkString(Some(b"abc".to_vec())),
                RespValue::Error("ERR nope".to_string()),
                RespValue::Array(None),
            ]
        );
    }

    #[test]
    fn test_decode_waits_for_partial_frames() {
        let mut codec = RespCodec::default();
        let mut buf = BytesMut::from(&b"*2\r\n$1\r\na\r\n$5\r\nhel"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        buf.extend_from_slice(b"lo\r\n");
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(RespValue::Array(Some(vec![
                RespValue::BulkString(Some(b"a".to_vec())),
                RespValue::BulkString(Some(b"hello".to_vec())),
            ])))
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_resumes_where_it_stopped() {
        let mut codec = RespCodec::default();
        let mut buf = BytesMut::from(&b"*3\r\n$1\r\na\r\n*2\r\n:1\r\n"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        // Header, the first bulk string, the nested header and its first integer.
        assert_eq!(codec.scanned, buf.len());
        assert_eq!(codec.open_arrays, vec![2, 1]);

        buf.extend_from_slice(b":2\r\n+tail\r\n+next\r\n");
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(RespValue::Array(Some(vec![
                RespValue::BulkString(Some(b"a".to_vec())),
                RespValue::Array(Some(vec![RespValue::Integer(1), RespValue::Integer(2)])),
                RespValue::SimpleString("tail".to_string()),
            ])))
        );
        assert!(codec.open_arrays.is_empty());
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(RespValue::SimpleString("next".to_string()))
        );
    }

    #[test]
    fn test_decode_large_reply_fed_in_small_chunks() {
        let mut wire = BytesMut::new();
        let fields: Vec<String> = (0..500).map(|i| format!("field-{i}")).collect();
        let args: Vec<&str> = fields.iter().map(String::as_str).collect();
        RespValue::command(&args).encode_into(&mut wire);

        let mut codec = RespCodec::default();
        let mut buf = BytesMut::new();
        let mut decoded = None;
        for chunk in wire.chunks(7) {
            buf.extend_from_slice(chunk);
            if let Some(value) = codec.decode(&mut buf).unwrap() {
                decoded = Some(value);
            }
        }
        assert_eq!(decoded, Some(RespValue::command(&args)));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_oversized_array_header_does_not_preallocate() {
        let mut codec = RespCodec::default();
        let mut buf = BytesMut::from(&b"*9223372036854775807\r\n:1\r\n"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert_eq!(
            parse_value(b"*9223372036854775807\r\n:1\r\n", 0).unwrap(),
            None
        );
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let mut codec = RespCodec::default();
        let mut buf = BytesMut::from(&b"?what\r\n"[..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(StoreError::Protocol(_))
        ));
    }

    #[test]
    fn test_config_from_url() {
        let config = StoreConfig::from_url("redis://localhost:6380/2").unwrap();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 6380);
        assert_eq!(config.database, 2);
        assert_eq!(config.password, None);

        let config = StoreConfig::from_url("redis://:s3cret@cache.internal").unwrap();
        assert_eq!(config.host, "cache.internal");
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.password.as_deref(), Some("s3cret"));

        assert!(StoreConfig::from_url("http://localhost").is_err());
        assert!(StoreConfig::from_url("redis://localhost:notaport").is_err());
    }

    /// Answer a fixed sequence of replies, one per command received.
    async fn scripted_server(replies: Vec<&'static [u8]>) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut codec = RespCodec::default();
            let mut buf = BytesMut::new();
            for reply in replies {
                loop {
                    if codec.decode(&mut buf).unwrap().is_some() {
                        break;
                    }
                    let mut chunk = [0u8; 512];
                    let n = socket.read(&mut chunk).await.unwrap();
                    if n == 0 {
                        return;
                    }
                    buf.extend_from_slice(&chunk[..n]);
                }
                socket.write_all(reply).await.unwrap();
            }
        });
        port
    }

    #[tokio::test]
    async fn test_store_commands_against_scripted_server() {
        let port = scripted_server(vec![
            b"+PONG\r\n",
            b":1\r\n",
            b"*4\r\n$1\r\na\r\n$1\r\n1\r\n$1\r\nb\r\n$1\r\n2\r\n",
            b"$-1\r\n",
            b"-WRONGTYPE bad\r\n",
            b":2\r\n",
        ])
        .await;
        let store = RespStore::connect(&format!("redis://127.0.0.1:{port}"))
            .await
            .unwrap();

        store.hash_set("h", "a", "1").await.unwrap();
        let all = store.hash_get_all("h").await.unwrap();
        assert_eq!(all.get("a").map(String::as_str), Some("1"));
        assert_eq!(all.get("b").map(String::as_str), Some("2"));
        assert_eq!(store.hash_get("h", "zz").await.unwrap(), None);
        assert!(matches!(
            store.hash_length("h").await,
            Err(StoreError::Server(_))
        ));
        // Connection survives an error reply.
        assert_eq!(store.hash_length("h").await.unwrap(), 2);
    }

    /// Answers PING, and answers `HGET key field` with `field`, pausing
    /// first when the field is `slow`. Every accepted connection is served.
    async fn echo_server() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            loop {
                let (socket, _) = listener.accept().await.unwrap();
                tokio::spawn(async move {
                    let mut framed = Framed::new(socket, RespCodec::default());
                    while let Some(Ok(RespValue::Array(Some(items)))) = framed.next().await {
                        let args: Vec<String> = items
                            .into_iter()
                            .map(|item| item.into_string().unwrap().unwrap())
                            .collect();
                        let reply = match args[0].as_str() {
                            "PING" => RespValue::SimpleString("PONG".to_string()),
                            "HGET" => {
                                if args[2] == "slow" {
                                    tokio::time::sleep(Duration::from_millis(200)).await;
                                }
                                RespValue::BulkString(Some(args[2].as_bytes().to_vec()))
                            }
                            other => RespValue::Error(format!("ERR unknown command {other}")),
                        };
                        if framed.send(reply).await.is_err() {
                            return;
                        }
                    }
                });
            }
        });
        port
    }

    #[tokio::test]
    async fn test_abandoned_command_does_not_leak_its_reply() {
        let port = echo_server().await;
        let store = RespStore::connect(&format!("redis://127.0.0.1:{port}"))
            .await
            .unwrap();

        let abandoned =
            tokio::time::timeout(Duration::from_millis(50), store.hash_get("h", "slow")).await;
        assert!(abandoned.is_err());

        assert_eq!(
            store.hash_get("h", "fast").await.unwrap(),
            Some("fast".to_string())
        );
        assert_eq!(
            store.hash_get("h", "again").await.unwrap(),
            Some("again".to_string())
        );
    }

    #[tokio::test]
    async fn test_unreachable_store_is_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        assert!(
            RespStore::connect(&format!("redis://127.0.0.1:{port}"))
                .await
                .is_err()
        );
    }
}

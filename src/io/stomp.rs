//! STOMP 1.2 over WebSocket transport
//!
//! Frame: COMMAND EOL *(header EOL) EOL body NUL
//! - EOL is LF or CRLF; bare EOLs between frames are heartbeats
//! - Header escapes: `\\` `\n` `\r` `\c` (not applied to CONNECT/CONNECTED)
//! - `content-length`, when present, bounds the body; otherwise the body ends at NUL
//! - A WebSocket text message may carry several frames

use crate::infra::config::Config;
use crate::io::stream::{InboundMessage, ProtocolError, StreamError, Transport};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StompFrame {
    pub command: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl StompFrame {
    pub fn new(command: &str) -> Self {
        Self { command: command.to_string(), headers: Vec::new(), body: String::new() }
    }

    pub fn header(mut self, key: &str, value: &str) -> Self {
        self.headers.push((key.to_string(), value.to_string()));
        self
    }

    /// First occurrence of a header wins
    pub fn get(&self, key: &str) -> Option<&str> {
        self.headers.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    fn escapes_headers(&self) -> bool {
        !matches!(self.command.as_str(), "CONNECT" | "CONNECTED")
    }

    pub fn encode(&self) -> String {
        let escape = self.escapes_headers();
        let mut out = String::with_capacity(64 + self.body.len());
        out.push_str(&self.command);
        out.push('\n');
        for (key, value) in &self.headers {
            if escape {
                out.push_str(&escape_header(key));
                out.push(':');
                out.push_str(&escape_header(value));
            } else {
                out.push_str(key);
                out.push(':');
                out.push_str(value);
            }
            out.push('\n');
        }
        if !self.body.is_empty() {
            out.push_str("content-length:");
            out.push_str(&self.body.len().to_string());
            out.push('\n');
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }
}

fn escape_header(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            c => out.push(c),
        }
    }
    out
}

fn unescape_header(raw: &str) -> Result<String, ProtocolError> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            other => {
                return Err(ProtocolError::MalformedFrame(format!(
                    "invalid header escape \\{}",
                    other.map(String::from).unwrap_or_default()
                )))
            }
        }
    }
    Ok(out)
}

/// Read one EOL-terminated line starting at `pos`
fn read_line(input: &str, pos: usize) -> Result<(&str, usize), ProtocolError> {
    let rest = &input[pos..];
    let idx = rest
        .find('\n')
        .ok_or_else(|| ProtocolError::MalformedFrame("incomplete frame".to_string()))?;
    let line = rest[..idx].strip_suffix('\r').unwrap_or(&rest[..idx]);
    Ok((line, pos + idx + 1))
}

/// Decode the frame at the start of `input`, returning it and the bytes consumed
fn decode_one(input: &str) -> Result<(StompFrame, usize), ProtocolError> {
    let (command, mut pos) = read_line(input, 0)?;
    if command.is_empty() {
        return Err(ProtocolError::MalformedFrame("empty command".to_string()));
    }
    let mut frame = StompFrame::new(command);
    let escape = frame.escapes_headers();

    loop {
        let (line, next) = read_line(input, pos)?;
        pos = next;
        if line.is_empty() {
            break;
        }
        let (key, value) = line
            .split_once(':')
            .ok_or_else(|| ProtocolError::MalformedFrame(format!("bad header line {line:?}")))?;
        if escape {
            frame.headers.push((unescape_header(key)?, unescape_header(value)?));
        } else {
            frame.headers.push((key.to_string(), value.to_string()));
        }
    }

    let body_len = match frame.get("content-length") {
        Some(len) => len
            .trim()
            .parse::<usize>()
            .map_err(|_| ProtocolError::MalformedFrame(format!("bad content-length {len:?}")))?,
        None => input[pos..]
            .find('\0')
            .ok_or_else(|| ProtocolError::MalformedFrame("missing NUL terminator".to_string()))?,
    };

    let end = pos
        .checked_add(body_len)
        .ok_or_else(|| ProtocolError::MalformedFrame("bad content-length".to_string()))?;
    let body = input
        .get(pos..end)
        .ok_or_else(|| ProtocolError::MalformedFrame("truncated body".to_string()))?;
    if input.as_bytes().get(end) != Some(&0) {
        return Err(ProtocolError::MalformedFrame("missing NUL terminator".to_string()));
    }
    frame.body = body.to_string();

    Ok((frame, end + 1))
}

/// Decode every frame in a WebSocket payload, skipping heartbeats
///
/// A malformed frame is reported in place and decoding resumes after its NUL.
pub fn decode_frames(data: &str) -> Vec<Result<StompFrame, ProtocolError>> {
    let mut frames = Vec::new();
    let mut rest = data;

    loop {
        rest = rest.trim_start_matches(['\r', '\n']);
        if rest.is_empty() {
            break;
        }
        match decode_one(rest) {
            Ok((frame, consumed)) => {
                frames.push(Ok(frame));
                rest = &rest[consumed..];
            }
            Err(e) => {
                frames.push(Err(e));
                match rest.find('\0') {
                    Some(idx) => rest = &rest[idx + 1..],
                    None => break,
                }
            }
        }
    }

    frames
}

/// Host part of a ws:// or wss:// URL, used for the STOMP `host` header
fn host_from_url(url: &str) -> &str {
    let without_scheme = url.split_once("://").map(|(_, rest)| rest).unwrap_or(url);
    let authority = without_scheme.split('/').next().unwrap_or(without_scheme);
    let host_port = authority.rsplit('@').next().unwrap_or(authority);
    host_port.split(':').next().unwrap_or(host_port)
}

fn broker_error(frame: &StompFrame) -> ProtocolError {
    let message = frame.get("message").unwrap_or("unspecified");
    if frame.body.trim().is_empty() {
        ProtocolError::Broker(message.to_string())
    } else {
        ProtocolError::Broker(format!("{}: {}", message, frame.body.trim()))
    }
}

/// STOMP client transport
pub struct StompTransport {
    url: String,
    host: String,
    login: Option<String>,
    passcode: Option<String>,
    ws: Option<WsStream>,
    pending: VecDeque<InboundMessage>,
    subscription_ids: FxHashMap<String, String>,
    next_subscription: u64,
}

impl StompTransport {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            host: host_from_url(url).to_string(),
            login: None,
            passcode: None,
            ws: None,
            pending: VecDeque::new(),
            subscription_ids: FxHashMap::default(),
            next_subscription: 0,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let mut transport = Self::new(config.stream_url());
        if let (Some(login), Some(passcode)) = (config.stream_username(), config.stream_password())
        {
            transport.login = Some(login.to_string());
            transport.passcode = Some(passcode.to_string());
        }
        transport
    }

    fn connect_frame(&self) -> StompFrame {
        let mut frame = StompFrame::new("CONNECT")
            .header("accept-version", "1.2")
            .header("host", &self.host)
            .header("heart-beat", "0,0");
        if let (Some(login), Some(passcode)) = (&self.login, &self.passcode) {
            frame = frame.header("login", login).header("passcode", passcode);
        }
        frame
    }

    async fn send_frame(&mut self, frame: StompFrame) -> Result<(), StreamError> {
        let ws = self.ws.as_mut().ok_or(StreamError::NotConnected)?;
        debug!(command = %frame.command, "stomp_send");
        ws.send(WsMessage::Text(frame.encode().into())).await?;
        Ok(())
    }

    /// Queue MESSAGE frames from one payload; fatal frames and the first malformed one surface as errors
    fn ingest(&mut self, text: &str) -> Result<(), ProtocolError> {
        let mut first_error = None;

        for decoded in decode_frames(text) {
            let frame = match decoded {
                Ok(frame) => frame,
                Err(e) => {
                    first_error.get_or_insert(e);
                    continue;
                }
            };

            match frame.command.as_str() {
                "MESSAGE" => match frame.get("destination") {
                    Some(destination) => self.pending.push_back(InboundMessage {
                        topic: destination.to_string(),
                        body: frame.body.clone(),
                    }),
                    None => {
                        first_error.get_or_insert(ProtocolError::MalformedFrame(
                            "MESSAGE without destination".to_string(),
                        ));
                    }
                },
                "ERROR" => return Err(broker_error(&frame)),
                other => debug!(command = %other, "stomp_frame_ignored"),
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn await_connected(ws: &mut WsStream) -> Result<(), StreamError> {
        loop {
            let message = match ws.next().await {
                Some(message) => message?,
                None => return Err(StreamError::NotConnected),
            };
            let text = match message {
                WsMessage::Text(text) => text.as_str().to_string(),
                WsMessage::Binary(bytes) => String::from_utf8(bytes.to_vec()).map_err(|_| {
                    ProtocolError::MalformedFrame("invalid utf-8 payload".to_string())
                })?,
                WsMessage::Close(_) => return Err(StreamError::NotConnected),
                WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => continue,
            };
            for decoded in decode_frames(&text) {
                let frame = decoded?;
                match frame.command.as_str() {
                    "CONNECTED" => {
                        debug!(version = ?frame.get("version"), "stomp_connected");
                        return Ok(());
                    }
                    "ERROR" => return Err(broker_error(&frame).into()),
                    other => return Err(ProtocolError::UnexpectedFrame(other.to_string()).into()),
                }
            }
        }
    }
}

#[async_trait]
impl Transport for StompTransport {
    fn name(&self) -> &'static str {
        "stomp"
    }

    async fn connect(&mut self) -> Result<(), StreamError> {
        self.ws = None;
        self.pending.clear();
        self.subscription_ids.clear();

        let (mut ws, _response) = connect_async(self.url.as_str()).await?;
        ws.send(WsMessage::Text(self.connect_frame().encode().into())).await?;
        Self::await_connected(&mut ws).await?;

        self.ws = Some(ws);
        Ok(())
    }

    async fn subscribe(&mut self, topic: &str) -> Result<(), StreamError> {
        let id = format!("sub-{}", self.next_subscription);
        self.next_subscription += 1;
        let frame = StompFrame::new("SUBSCRIBE")
            .header("id", &id)
            .header("destination", topic)
            .header("ack", "auto");
        self.send_frame(frame).await?;
        self.subscription_ids.insert(topic.to_string(), id);
        Ok(())
    }

    async fn unsubscribe(&mut self, topic: &str) -> Result<(), StreamError> {
        let Some(id) = self.subscription_ids.remove(topic) else { return Ok(()) };
        self.send_frame(StompFrame::new("UNSUBSCRIBE").header("id", &id)).await
    }

    async fn next_message(&mut self) -> Result<Option<InboundMessage>, StreamError> {
        loop {
            if let Some(message) = self.pending.pop_front() {
                return Ok(Some(message));
            }

            let ws = self.ws.as_mut().ok_or(StreamError::NotConnected)?;
            let message = match ws.next().await {
                Some(Ok(message)) => message,
                Some(Err(e)) => {
                    self.ws = None;
                    return Err(e.into());
                }
                None => {
                    self.ws = None;
                    return Ok(None);
                }
            };

            match message {
                WsMessage::Text(text) => self.ingest(text.as_str())?,
                WsMessage::Binary(bytes) => {
                    let text = String::from_utf8(bytes.to_vec()).map_err(|_| {
                        ProtocolError::MalformedFrame("invalid utf-8 payload".to_string())
                    })?;
                    self.ingest(&text)?;
                }
                WsMessage::Close(_) => {
                    self.ws = None;
                    return Ok(None);
                }
                WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => {}
            }
        }
    }

    async fn disconnect(&mut self) -> Result<(), StreamError> {
        if self.ws.is_none() {
            return Ok(());
        }
        let result = self.send_frame(StompFrame::new("DISCONNECT")).await;
        if let Some(mut ws) = self.ws.take() {
            ws.close(None).await?;
        }
        self.subscription_ids.clear();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_subscribe() {
        let frame = StompFrame::new("SUBSCRIBE")
            .header("id", "sub-0")
            .header("destination", "/topic/logs");
        assert_eq!(frame.encode(), "SUBSCRIBE\nid:sub-0\ndestination:/topic/logs\n\n\0");
    }

    #[test]
    fn test_decode_message_with_content_length() {
        let raw = "MESSAGE\ndestination:/topic/logs\nmessage-id:1\ncontent-length:11\n\nSystem up.\n\0";
        let frames = decode_frames(raw);
        assert_eq!(frames.len(), 1);
        let frame = frames[0].as_ref().unwrap();
        assert_eq!(frame.command, "MESSAGE");
        assert_eq!(frame.get("destination"), Some("/topic/logs"));
        assert_eq!(frame.body, "System up.\n");
    }

    #[test]
    fn test_decode_multiple_frames_and_heartbeats() {
        let raw = "\n\nMESSAGE\ndestination:/a\n\none\0\r\nMESSAGE\r\ndestination:/b\r\n\r\ntwo\0\n";
        let frames: Vec<_> = decode_frames(raw).into_iter().map(Result::unwrap).collect();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].body, "one");
        assert_eq!(frames[1].get("destination"), Some("/b"));
        assert_eq!(frames[1].body, "two");
    }

    #[test]
    fn test_heartbeat_only_payload() {
        assert!(decode_frames("\n").is_empty());
    }

    #[test]
    fn test_header_escaping() {
        let frame = StompFrame::new("SEND").header("note", "a:b\nc\\d");
        let encoded = frame.encode();
        assert!(encoded.contains("note:a\\cb\\nc\\\\d\n"));

        let decoded = decode_frames(&encoded).remove(0).unwrap();
        assert_eq!(decoded.get("note"), Some("a:b\nc\\d"));
    }

    #[test]
    fn test_connected_headers_not_unescaped() {
        let frame = decode_frames("CONNECTED\nserver:x\\y\n\n\0").remove(0).unwrap();
        assert_eq!(frame.get("server"), Some("x\\y"));
    }

    #[test]
    fn test_malformed_frame_does_not_hide_next() {
        let raw = "MESSAGE\nno-colon-header\n\nbad\0MESSAGE\ndestination:/a\n\ngood\0";
        let frames = decode_frames(raw);
        assert_eq!(frames.len(), 2);
        assert!(frames[0].is_err());
        assert_eq!(frames[1].as_ref().unwrap().body, "good");
    }

    #[test]
    fn test_oversized_content_length_is_malformed() {
        let raw = format!(
            "MESSAGE\ndestination:/a\ncontent-length:{}\n\nx\0MESSAGE\ndestination:/a\n\nnext\0",
            usize::MAX
        );
        let frames = decode_frames(&raw);
        assert!(matches!(frames[0], Err(ProtocolError::MalformedFrame(_))));
        assert_eq!(frames.last().unwrap().as_ref().unwrap().body, "next");
    }

    #[test]
    fn test_missing_terminator() {
        let frames = decode_frames("MESSAGE\ndestination:/a\n\nunterminated");
        assert_eq!(frames.len(), 1);
        assert!(matches!(frames[0], Err(ProtocolError::MalformedFrame(_))));
    }

    #[test]
    fn test_ingest_queues_messages_and_reports_error_frames() {
        let mut transport = StompTransport::new("ws://localhost:8080/websocket/websocket");
        transport
            .ingest("MESSAGE\ndestination:/topic/logs\n\nhello\0MESSAGE\ndestination:/topic/logs\n\nworld\0")
            .unwrap();
        assert_eq!(transport.pending.len(), 2);
        assert_eq!(transport.pending[0].body, "hello");

        let err = transport.ingest("ERROR\nmessage:bad subscription\n\n\0").unwrap_err();
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_host_from_url() {
        assert_eq!(host_from_url("ws://localhost:8080/websocket/websocket"), "localhost");
        assert_eq!(host_from_url("wss://user:pw@tickets.example.com/ws"), "tickets.example.com");
        assert_eq!(host_from_url("ws://broker"), "broker");
    }

    #[test]
    fn test_connect_frame_credentials() {
        let mut transport = StompTransport::new("ws://localhost:8080/ws");
        transport.login = Some("ops".to_string());
        transport.passcode = Some("secret".to_string());
        let frame = transport.connect_frame();
        assert_eq!(frame.get("accept-version"), Some("1.2"));
        assert_eq!(frame.get("host"), Some("localhost"));
        assert_eq!(frame.get("login"), Some("ops"));
    }
}

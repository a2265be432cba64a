//! STOMP 1.2 frames over WebSocket text messages.
//!
//! ```text
//! COMMAND
//! header:value
//!
//! body^@
//! ```
//!
//! Header values are escaped (`\\`, `\n`, `\r`, `\c`) except on `CONNECT` and
//! `CONNECTED`. A `content-length` header bounds the body, otherwise it runs
//! to the first NUL. Bare EOLs between frames are heart-beats.

use std::{fmt, str::FromStr};

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Connect,
    Stomp,
    Connected,
    Send,
    Subscribe,
    Unsubscribe,
    Disconnect,
    Message,
    Receipt,
    Error,
}

impl Command {
    pub fn as_str(self) -> &'static str {
        use Command::*;
        match self {
            Connect => "CONNECT",
            Stomp => "STOMP",
            Connected => "CONNECTED",
            Send => "SEND",
            Subscribe => "SUBSCRIBE",
            Unsubscribe => "UNSUBSCRIBE",
            Disconnect => "DISCONNECT",
            Message => "MESSAGE",
            Receipt => "RECEIPT",
            Error => "ERROR",
        }
    }

    fn escapes_headers(self) -> bool {
        !matches!(self, Command::Connect | Command::Connected)
    }
}

impl FromStr for Command {
    type Err = StompError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        use Command::*;
        Ok(match s {
            "CONNECT" => Connect,
            "STOMP" => Stomp,
            "CONNECTED" => Connected,
            "SEND" => Send,
            "SUBSCRIBE" => Subscribe,
            "UNSUBSCRIBE" => Unsubscribe,
            "DISCONNECT" => Disconnect,
            "MESSAGE" => Message,
            "RECEIPT" => Receipt,
            "ERROR" => Error,
            other => return Err(StompError::UnknownCommand(other.to_owned())),
        })
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StompError {
    #[error("empty frame")]
    Empty,
    #[error("unknown command {0:?}")]
    UnknownCommand(String),
    #[error("malformed header line {0:?}")]
    MalformedHeader(String),
    #[error("invalid escape sequence in {0:?}")]
    InvalidEscape(String),
    #[error("missing blank line after headers")]
    Unterminated,
    #[error("invalid content-length {0:?}")]
    InvalidContentLength(String),
    #[error("missing required header {0:?}")]
    MissingHeader(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

/// True for text that carries nothing but heart-beat EOLs.
pub fn is_heartbeat(text: &str) -> bool {
    text.chars().all(|c| c == '\n' || c == '\r')
}

impl Frame {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_owned(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// First occurrence wins when a header repeats.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn require(&self, name: &'static str) -> Result<&str, StompError> {
        self.get(name).ok_or(StompError::MissingHeader(name))
    }

    pub fn parse(text: &str) -> Result<Frame, StompError> {
        let text = text.trim_start_matches(['\n', '\r']);
        if text.is_empty() {
            return Err(StompError::Empty);
        }

        let (command_line, mut rest) = split_line(text).ok_or(StompError::Unterminated)?;
        let command: Command = command_line.parse()?;

        let mut headers = Vec::new();
        loop {
            let (line, tail) = split_line(rest).ok_or(StompError::Unterminated)?;
            rest = tail;
            if line.is_empty() {
                break;
            }

            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| StompError::MalformedHeader(line.to_owned()))?;
            let (name, value) = if command.escapes_headers() {
                (unescape(name)?, unescape(value)?)
            } else {
                (name.to_owned(), value.to_owned())
            };
            headers.push((name, value));
        }

        let mut frame = Frame {
            command,
            headers,
            body: String::new(),
        };

        frame.body = match frame.get("content-length") {
            Some(len) => {
                let n: usize = len
                    .trim()
                    .parse()
                    .map_err(|_| StompError::InvalidContentLength(len.to_owned()))?;
                rest.get(..n)
                    .ok_or_else(|| StompError::InvalidContentLength(len.to_owned()))?
                    .to_owned()
            }
            None => match rest.find('\0') {
                Some(end) => rest[..end].to_owned(),
                // some clients drop the terminator when one frame fills the message
                None => rest.to_owned(),
            },
        };

        Ok(frame)
    }

    pub fn to_text(&self) -> String {
        let mut out = String::with_capacity(64 + self.body.len());
        out.push_str(self.command.as_str());
        out.push('\n');

        for (name, value) in &self.headers {
            if self.command.escapes_headers() {
                out.push_str(&escape(name));
                out.push(':');
                out.push_str(&escape(value));
            } else {
                out.push_str(name);
                out.push(':');
                out.push_str(value);
            }
            out.push('\n');
        }
        if !self.body.is_empty() && self.get("content-length").is_none() {
            out.push_str(&format!("content-length:{}\n", self.body.len()));
        }

        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }
}

fn split_line(text: &str) -> Option<(&str, &str)> {
    let (line, rest) = text.split_once('\n')?;
    Some((line.strip_suffix('\r').unwrap_or(line), rest))
}

fn escape(raw: &str) -> String {
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

fn unescape(raw: &str) -> Result<String, StompError> {
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
            _ => return Err(StompError::InvalidEscape(raw.to_owned())),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_connect_with_bearer() {
        let frame = Frame::parse(
            "CONNECT\naccept-version:1.2\nAuthorization:Bearer abc.def\n\n\0",
        )
        .unwrap();
        assert_eq!(frame.command, Command::Connect);
        assert_eq!(frame.get("authorization"), Some("Bearer abc.def"));
        assert_eq!(frame.body, "");
    }

    #[test]
    fn send_body_stops_at_nul() {
        let frame = Frame::parse(
            "SEND\r\ndestination:/app/chat.sendMessage\r\n\r\n{\"chatId\":\"c1\"}\0\n\n",
        )
        .unwrap();
        assert_eq!(frame.command, Command::Send);
        assert_eq!(frame.get("destination"), Some("/app/chat.sendMessage"));
        assert_eq!(frame.body, "{\"chatId\":\"c1\"}");
    }

    #[test]
    fn content_length_allows_embedded_nul() {
        let frame = Frame::parse("SEND\ndestination:/x\ncontent-length:3\n\na\0b\0").unwrap();
        assert_eq!(frame.body, "a\0b");
    }

    #[test]
    fn header_escapes_survive_the_wire() {
        let out = Frame::new(Command::Message)
            .header("destination", "/user/queue/messages")
            .header("note", "a:b\nc\\d")
            .body("{}");
        let text = out.to_text();
        assert!(text.contains("note:a\\cb\\nc\\\\d\n"));
        assert!(text.contains("content-length:2\n"));
        assert!(text.ends_with("{}\0"));

        let back = Frame::parse(&text).unwrap();
        assert_eq!(back.get("note"), Some("a:b\nc\\d"));
        assert_eq!(back.body, "{}");
    }

    #[test]
    fn connect_headers_are_not_unescaped() {
        let frame = Frame::parse("CONNECT\nlogin:a\\cb\n\n\0").unwrap();
        assert_eq!(frame.get("login"), Some("a\\cb"));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(Frame::parse("\n\n"), Err(StompError::Empty));
        assert!(matches!(
            Frame::parse("HELLO\n\n\0"),
            Err(StompError::UnknownCommand(_))
        ));
        assert!(matches!(
            Frame::parse("SEND\nnocolon\n\n\0"),
            Err(StompError::MalformedHeader(_))
        ));
        assert!(matches!(
            Frame::parse("SEND\nbad:\\t\n\n\0"),
            Err(StompError::InvalidEscape(_))
        ));
        assert_eq!(Frame::parse("SEND\ndestination:/x"), Err(StompError::Unterminated));
    }

    #[test]
    fn heartbeats_are_recognised() {
        assert!(is_heartbeat("\n"));
        assert!(is_heartbeat("\r\n\r\n"));
        assert!(!is_heartbeat("SEND\n"));
    }

    #[test]
    fn repeated_headers_keep_the_first() {
        let frame = Frame::parse("SEND\ndestination:/a\ndestination:/b\n\n\0").unwrap();
        assert_eq!(frame.get("destination"), Some("/a"));
    }
}

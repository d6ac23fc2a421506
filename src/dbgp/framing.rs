//! DBGp wire framing.
//!
//! Engine messages arrive as `<ASCII decimal length>\0<xml>\0`; the length
//! excludes the trailing NUL. Commands travel the other way as a plain
//! NUL-terminated line with no length prefix.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use std::borrow::Cow;

/// One decoded item from the byte stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameEvent {
    /// A complete XML payload.
    Payload(String),
    /// A recoverable framing error; the decoder has already resynchronized.
    Malformed(String),
}

enum DecodeState {
    AwaitingLength,
    AwaitingBody(usize),
}

/// Incremental decoder for the engine-to-server framing.
///
/// Feed it raw socket bytes in any chunking; it emits zero or more events per
/// call. Malformed input is reported and skipped, never fatal at this layer.
pub struct FrameDecoder {
    buf: Vec<u8>,
    state: DecodeState,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            state: DecodeState::AwaitingLength,
        }
    }

    pub fn feed(&mut self, data: &[u8]) -> Vec<FrameEvent> {
        self.buf.extend_from_slice(data);
        let mut out = Vec::new();

        loop {
            match self.state {
                DecodeState::AwaitingLength => {
                    let Some(k) = self.buf.iter().position(|&b| b == 0) else {
                        break;
                    };
                    let header = String::from_utf8_lossy(&self.buf[..k]).into_owned();
                    self.buf.drain(..=k);
                    match header.parse::<usize>() {
                        Ok(n) if n > 0 => self.state = DecodeState::AwaitingBody(n),
                        _ => out.push(FrameEvent::Malformed(format!(
                            "bad frame length {:?}",
                            header
                        ))),
                    }
                }
                DecodeState::AwaitingBody(n) => {
                    if self.buf.len() < n + 1 {
                        break;
                    }
                    if self.buf[n] != 0 {
                        // Resynchronize by advancing a single byte.
                        out.push(FrameEvent::Malformed(
                            "frame body not followed by NUL".to_string(),
                        ));
                        self.buf.drain(..1);
                        self.state = DecodeState::AwaitingLength;
                        continue;
                    }
                    let body = self.buf[..n].to_vec();
                    self.buf.drain(..=n);
                    self.state = DecodeState::AwaitingLength;
                    match String::from_utf8(body) {
                        Ok(xml) => out.push(FrameEvent::Payload(xml)),
                        Err(_) => {
                            out.push(FrameEvent::Malformed("frame body is not UTF-8".to_string()))
                        }
                    }
                }
            }
        }

        out
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Quote an argument value for the command line.
///
/// Values containing whitespace, `"`, or `\` are wrapped in double quotes
/// with inner backslashes and quotes backslash-escaped.
pub fn quote_arg(value: &str) -> Cow<'_, str> {
    let needs_quoting = value.is_empty()
        || value
            .chars()
            .any(|c| c.is_whitespace() || c == '"' || c == '\\');
    if !needs_quoting {
        return Cow::Borrowed(value);
    }

    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        if c == '"' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    Cow::Owned(quoted)
}

/// Serialize a command: `name -i <tx> -<flag> <value> ... [-- <base64 data>]`
/// plus the trailing NUL the protocol requires.
pub fn encode_command(
    name: &str,
    transaction_id: u32,
    args: &[(&'static str, String)],
    data: Option<&[u8]>,
) -> Vec<u8> {
    let mut line = format!("{} -i {}", name, transaction_id);
    for (flag, value) in args {
        line.push_str(" -");
        line.push_str(flag);
        line.push(' ');
        line.push_str(&quote_arg(value));
    }
    if let Some(data) = data {
        line.push_str(" -- ");
        line.push_str(&BASE64.encode(data));
    }

    let mut bytes = line.into_bytes();
    bytes.push(0);
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(payload: &str) -> Vec<u8> {
        let mut bytes = payload.len().to_string().into_bytes();
        bytes.push(0);
        bytes.extend_from_slice(payload.as_bytes());
        bytes.push(0);
        bytes
    }

    /// Inverse of `quote_arg`, for the escaping round-trip property.
    fn unquote_arg(value: &str) -> String {
        if !value.starts_with('"') {
            return value.to_string();
        }
        let inner = &value[1..value.len() - 1];
        let mut out = String::with_capacity(inner.len());
        let mut escaped = false;
        for c in inner.chars() {
            if escaped {
                out.push(c);
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else {
                out.push(c);
            }
        }
        out
    }

    #[test]
    fn test_single_frame() {
        let mut decoder = FrameDecoder::new();
        let events = decoder.feed(&frame("<init/>"));
        assert_eq!(events, vec![FrameEvent::Payload("<init/>".to_string())]);
    }

    #[test]
    fn test_multiple_frames_one_feed() {
        let mut decoder = FrameDecoder::new();
        let mut bytes = frame("<a/>");
        bytes.extend_from_slice(&frame("<b/>"));
        bytes.extend_from_slice(&frame("<c/>"));
        let events = decoder.feed(&bytes);
        assert_eq!(
            events,
            vec![
                FrameEvent::Payload("<a/>".to_string()),
                FrameEvent::Payload("<b/>".to_string()),
                FrameEvent::Payload("<c/>".to_string()),
            ]
        );
    }

    #[test]
    fn test_byte_at_a_time_chunking() {
        let payloads = ["<response command=\"run\"/>", "<stream type=\"stdout\"/>", "<x/>"];
        let mut bytes = Vec::new();
        for p in &payloads {
            bytes.extend_from_slice(&frame(p));
        }

        let mut decoder = FrameDecoder::new();
        let mut events = Vec::new();
        for b in bytes {
            events.extend(decoder.feed(&[b]));
        }
        let decoded: Vec<_> = events
            .into_iter()
            .map(|e| match e {
                FrameEvent::Payload(p) => p,
                FrameEvent::Malformed(m) => panic!("unexpected framing error: {m}"),
            })
            .collect();
        assert_eq!(decoded, payloads);
    }

    #[test]
    fn test_malformed_length_resyncs() {
        let mut decoder = FrameDecoder::new();
        let mut bytes = b"oops\0".to_vec();
        bytes.extend_from_slice(&frame("<ok/>"));
        let events = decoder.feed(&bytes);
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], FrameEvent::Malformed(_)));
        assert_eq!(events[1], FrameEvent::Payload("<ok/>".to_string()));
    }

    #[test]
    fn test_zero_length_is_malformed() {
        let mut decoder = FrameDecoder::new();
        let events = decoder.feed(b"0\0");
        assert!(matches!(events[0], FrameEvent::Malformed(_)));
    }

    #[test]
    fn test_missing_trailing_nul_resyncs() {
        let mut decoder = FrameDecoder::new();
        // Length says 4, body "<a/>" but trailer is 'X' instead of NUL.
        let events = decoder.feed(b"4\0<a/>X\0");
        assert!(matches!(events[0], FrameEvent::Malformed(_)));
        // Once the garbage is consumed the decoder accepts clean frames again.
        let events = decoder.feed(&frame("<b/>"));
        assert_eq!(events, vec![FrameEvent::Payload("<b/>".to_string())]);
    }

    #[test]
    fn test_incomplete_body_waits() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.feed(b"10\0<abc").is_empty());
        let events = decoder.feed(b"defg>\0");
        assert_eq!(events, vec![FrameEvent::Payload("<abcdefg>".to_string())]);
    }

    #[test]
    fn test_quote_arg_plain_value_untouched() {
        assert_eq!(quote_arg("file:///a.php"), "file:///a.php");
        assert_eq!(quote_arg("42"), "42");
    }

    #[test]
    fn test_quote_arg_whitespace_and_escapes() {
        assert_eq!(quote_arg("a b"), "\"a b\"");
        assert_eq!(quote_arg("say \"hi\""), "\"say \\\"hi\\\"\"");
        assert_eq!(quote_arg("C:\\tmp"), "\"C:\\\\tmp\"");
        assert_eq!(quote_arg(""), "\"\"");
    }

    #[test]
    fn test_quote_arg_round_trip() {
        for value in [
            "plain",
            "two words",
            "quote\"inside",
            "back\\slash",
            "\\\"both\\\"",
            "tab\there",
            "",
        ] {
            let quoted = quote_arg(value);
            assert_eq!(unquote_arg(&quoted), value, "round trip of {value:?}");
        }
    }

    #[test]
    fn test_encode_command_basic() {
        let bytes = encode_command("step_into", 7, &[], None);
        assert_eq!(bytes, b"step_into -i 7\0");
    }

    #[test]
    fn test_encode_command_args_and_data() {
        let args = vec![
            ("t", "conditional".to_string()),
            ("f", "file:///x/y.php".to_string()),
            ("n", "10".to_string()),
        ];
        let bytes = encode_command("breakpoint_set", 3, &args, Some(b"$a > 1"));
        let text = String::from_utf8(bytes[..bytes.len() - 1].to_vec()).unwrap();
        assert_eq!(
            text,
            "breakpoint_set -i 3 -t conditional -f file:///x/y.php -n 10 -- JGEgPiAx"
        );
        assert_eq!(*bytes.last().unwrap(), 0);
    }

    #[test]
    fn test_encode_command_quotes_values() {
        let args = vec![("f", "file:///my docs/a.php".to_string())];
        let bytes = encode_command("source", 1, &args, None);
        let text = String::from_utf8(bytes[..bytes.len() - 1].to_vec()).unwrap();
        assert_eq!(text, "source -i 1 -f \"file:///my docs/a.php\"");
    }
}

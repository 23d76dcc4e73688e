//! Wire protocol (spec section 4 / C4): pure encode/decode of the binary
//! WebSocket frames exchanged with the browser companion. No socket I/O
//! lives here — only byte-in, byte-out logic, so it is unit-testable
//! without a live connection.

use serde::Deserialize;

use crate::error::CoreError;
use crate::pty::WinSize;
use crate::service::Fragment;

/// Client-to-server command bytes.
pub const CMD_INPUT: u8 = b'0';
pub const CMD_RESIZE_TERMINAL: u8 = b'1';
/// JSON_DATA has no dedicated tag byte: the payload's own opening `{` is the
/// command byte, so the whole frame is valid JSON as received.
pub const CMD_JSON_DATA: u8 = b'{';

/// Server-to-client command bytes.
pub const CMD_OUTPUT: u8 = b'0';
pub const CMD_SET_WINDOW_TITLE: u8 = b'1';
pub const CMD_SET_PREFERENCES: u8 = b'2';
pub const CMD_SET_RECONNECT: u8 = b'3';

/// A decoded inbound frame.
#[derive(Debug)]
pub enum Inbound {
    Input(Vec<u8>),
    Resize(WinSize),
    JsonData(JsonData),
}

/// The parsed body of a JSON_DATA frame (section 4.3).
#[derive(Debug, Clone, Deserialize)]
struct RawJsonData {
    #[serde(rename = "AuthToken")]
    auth_token: Option<String>,
    #[serde(rename = "ServicePath")]
    service_path: Option<String>,
}

#[derive(Debug, Clone)]
pub struct JsonData {
    pub auth_token: Option<String>,
    pub service_path: String,
}

/// Classify and decode one complete inbound frame (already reassembled from
/// any WebSocket fragmentation — that reassembly is a transport concern).
pub fn decode_inbound(frame: &[u8]) -> Result<Inbound, CoreError> {
    let Some(&command) = frame.first() else {
        return Err(CoreError::Protocol("empty frame".into()));
    };
    match command {
        CMD_INPUT => Ok(Inbound::Input(frame[1..].to_vec())),
        CMD_RESIZE_TERMINAL => {
            let size = parse_window_size(&frame[1..])?;
            Ok(Inbound::Resize(size))
        }
        CMD_JSON_DATA => {
            let data = parse_json_data(frame)?;
            Ok(Inbound::JsonData(data))
        }
        other => Err(CoreError::Protocol(format!(
            "unrecognized command byte {other:#04x}"
        ))),
    }
}

/// `{"columns":N,"rows":N}`; pixel dimensions are not part of the original
/// wire format and are left at 0.
fn parse_window_size(body: &[u8]) -> Result<WinSize, CoreError> {
    #[derive(Deserialize)]
    struct Size {
        columns: u16,
        rows: u16,
    }
    let parsed: Size = serde_json::from_slice(body)
        .map_err(|e| CoreError::Protocol(format!("bad RESIZE_TERMINAL body: {e}")))?;
    Ok(WinSize {
        rows: parsed.rows,
        cols: parsed.columns,
        pixel_width: 0,
        pixel_height: 0,
    })
}

/// The whole frame (including its leading `{`) is the JSON document.
fn parse_json_data(frame: &[u8]) -> Result<JsonData, CoreError> {
    let raw: RawJsonData = serde_json::from_slice(frame)
        .map_err(|e| CoreError::Protocol(format!("bad JSON_DATA body: {e}")))?;
    let service_path = raw
        .service_path
        .filter(|s| !s.is_empty())
        .ok_or_else(|| CoreError::Protocol("missing or blank ServicePath".into()))?;
    Ok(JsonData {
        auth_token: raw.auth_token,
        service_path,
    })
}

/// Parse the WebSocket upgrade URL's raw query string (e.g. `name=world`)
/// into ordered fragments, preserving insertion order and duplicate keys —
/// the substitution rule in [`crate::service`] relies on both (section 8).
/// These are captured from the upgrade URL itself, not from `ServicePath`:
/// a real ttyd client sends a bare path in JSON_DATA and puts the query on
/// the WS URL, mirroring how the FILTER stage reads `WSI_TOKEN_HTTP_URI_ARGS`
/// before JSON_DATA ever arrives.
pub fn parse_query_fragments(query: &str) -> Vec<Fragment> {
    url::form_urlencoded::parse(query.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

/// Frame PTY output for the browser.
pub fn encode_output(chunk: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(chunk.len() + 1);
    out.push(CMD_OUTPUT);
    out.extend_from_slice(chunk);
    out
}

/// `{argv joined by spaces} ({hostname})`, matching the original's layout.
pub fn encode_window_title(argv: &[String], hostname: &str) -> Vec<u8> {
    let command = argv.join(" ");
    let mut out = Vec::with_capacity(command.len() + hostname.len() + 4);
    out.push(CMD_SET_WINDOW_TITLE);
    out.extend_from_slice(format!("{command} ({hostname})").as_bytes());
    out
}

pub fn encode_reconnect(seconds: u32) -> Vec<u8> {
    let mut out = Vec::new();
    out.push(CMD_SET_RECONNECT);
    out.extend_from_slice(seconds.to_string().as_bytes());
    out
}

pub fn encode_preferences(prefs: &serde_json::Value) -> Vec<u8> {
    let mut out = Vec::new();
    out.push(CMD_SET_PREFERENCES);
    out.extend_from_slice(
        serde_json::to_vec(prefs).unwrap_or_else(|_| b"{}".to_vec()).as_slice(),
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_input() {
        let frame = b"0hello".to_vec();
        match decode_inbound(&frame).unwrap() {
            Inbound::Input(data) => assert_eq!(data, b"hello"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn decodes_resize() {
        let frame = br#"1{"columns":120,"rows":40}"#.to_vec();
        match decode_inbound(&frame).unwrap() {
            Inbound::Resize(size) => {
                assert_eq!(size.cols, 120);
                assert_eq!(size.rows, 40);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn decodes_json_data_with_service_path() {
        let frame = br#"{"ServicePath":"/run?name=world"}"#.to_vec();
        match decode_inbound(&frame).unwrap() {
            Inbound::JsonData(data) => {
                assert_eq!(data.service_path, "/run?name=world");
                assert!(data.auth_token.is_none());
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn rejects_blank_service_path() {
        let frame = br#"{"ServicePath":""}"#.to_vec();
        assert!(decode_inbound(&frame).is_err());
    }

    #[test]
    fn rejects_missing_service_path() {
        let frame = br#"{"AuthToken":"x"}"#.to_vec();
        assert!(decode_inbound(&frame).is_err());
    }

    #[test]
    fn rejects_empty_frame() {
        assert!(decode_inbound(&[]).is_err());
    }

    #[test]
    fn parses_query_fragments_preserving_order_and_duplicates() {
        let fragments = parse_query_fragments("name=world&name=again&x=1");
        assert_eq!(
            fragments,
            vec![
                ("name".to_string(), "world".to_string()),
                ("name".to_string(), "again".to_string()),
                ("x".to_string(), "1".to_string()),
            ]
        );
    }

    #[test]
    fn empty_query_yields_no_fragments() {
        assert!(parse_query_fragments("").is_empty());
    }

    #[test]
    fn encode_output_prefixes_command_byte() {
        let encoded = encode_output(b"hi");
        assert_eq!(encoded, b"0hi");
    }

    #[test]
    fn encode_reconnect_uses_seconds() {
        assert_eq!(encode_reconnect(10), b"310");
    }
}

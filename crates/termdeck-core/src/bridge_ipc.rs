use serde::de::{self, DeserializeOwned, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use std::marker::PhantomData;
use thiserror::Error;

pub const DEFAULT_CHANNEL: &str = "IPC-bridge";
pub const DEFAULT_MAX_FRAME_BYTES: usize = 1024 * 1024;
pub const CURRENT_PROTOCOL_VERSION: u16 = 1;

/// Event names the host broadcasts to UI windows.
pub mod events {
    pub const PERFORMANCE_UPDATE: &str = "performanceUpdate";
    pub const ALERT: &str = "alert";
    pub const MONITORING_STARTED: &str = "monitoringStarted";
    pub const MONITORING_STOPPED: &str = "monitoringStopped";

    pub const TERMINAL_DATA: &str = "terminal:data";
    pub const TERMINAL_EXIT: &str = "terminal:exit";
    pub const TERMINAL_ERROR: &str = "terminal:error";
    pub const THEME_CHANGED: &str = "theme:changed";

    pub const SYSTEM_TERMINAL_EVENT: &str = "system-terminal:event";
    pub const SYSTEM_TERMINAL_OUTPUT: &str = "system-terminal:output";
    pub const SYSTEM_TERMINAL_ACTIVATED: &str = "system-terminal:activated";
    pub const SYSTEM_TERMINAL_CLEARED: &str = "system-terminal:cleared";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProtocolVersion(pub u16);

impl ProtocolVersion {
    pub const CURRENT: Self = Self(CURRENT_PROTOCOL_VERSION);
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        Self::CURRENT
    }
}

impl Serialize for ProtocolVersion {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u16(self.0)
    }
}

impl<'de> Deserialize<'de> for ProtocolVersion {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct ProtocolVersionVisitor;

        impl<'de> Visitor<'de> for ProtocolVersionVisitor {
            type Value = ProtocolVersion;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("a protocol version as string or integer")
            }

            fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                let version = u16::try_from(value)
                    .map_err(|_| E::custom(format!("protocol version out of range: {value}")))?;
                Ok(ProtocolVersion(version))
            }

            fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                if value < 0 {
                    return Err(E::custom(format!(
                        "protocol version cannot be negative: {value}"
                    )));
                }
                self.visit_u64(value as u64)
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                let cleaned = value.trim().trim_start_matches('v');
                let version = cleaned.parse::<u16>().map_err(|err| {
                    E::custom(format!("invalid protocol version '{value}': {err}"))
                })?;
                Ok(ProtocolVersion(version))
            }
        }

        deserializer.deserialize_any(ProtocolVersionVisitor)
    }
}

/// A named call: `{ name, payload: [args...] }`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CallEnvelope {
    pub name: String,
    #[serde(default)]
    pub payload: Vec<Value>,
}

impl CallEnvelope {
    pub fn new(name: impl Into<String>, payload: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }
}

/// Outcome of an invoked operation as seen by the UI.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BridgeResult {
    Success { result: Value },
    Error { error: String },
}

impl BridgeResult {
    pub fn success(result: Value) -> Self {
        BridgeResult::Success { result }
    }

    pub fn error(error: impl Into<String>) -> Self {
        BridgeResult::Error {
            error: error.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, BridgeResult::Success { .. })
    }

    pub fn into_result(self) -> Result<Value, String> {
        match self {
            BridgeResult::Success { result } => Ok(result),
            BridgeResult::Error { error } => Err(error),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BridgeFrame {
    #[serde(default)]
    pub version: ProtocolVersion,
    pub channel: String,
    #[serde(flatten)]
    pub msg: BridgeMsg,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BridgeMsg {
    Invoke {
        #[serde(rename = "requestId")]
        request_id: u64,
        name: String,
        #[serde(default)]
        payload: Vec<Value>,
    },
    Reply {
        #[serde(rename = "requestId")]
        request_id: u64,
        response: BridgeResult,
    },
    Event {
        name: String,
        #[serde(default)]
        payload: Vec<Value>,
    },
}

impl BridgeFrame {
    pub fn invoke(channel: &str, request_id: u64, call: CallEnvelope) -> Self {
        Self::on(
            channel,
            BridgeMsg::Invoke {
                request_id,
                name: call.name,
                payload: call.payload,
            },
        )
    }

    pub fn reply(channel: &str, request_id: u64, response: BridgeResult) -> Self {
        Self::on(
            channel,
            BridgeMsg::Reply {
                request_id,
                response,
            },
        )
    }

    pub fn event(channel: &str, name: impl Into<String>, payload: Vec<Value>) -> Self {
        Self::on(
            channel,
            BridgeMsg::Event {
                name: name.into(),
                payload,
            },
        )
    }

    fn on(channel: &str, msg: BridgeMsg) -> Self {
        Self {
            version: ProtocolVersion::CURRENT,
            channel: channel.to_string(),
            msg,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame exceeds max size: {size} > {max}")]
    OversizedFrame { size: usize, max: usize },
    #[error("buffer exceeds max size without delimiter: {size} > {max}")]
    OversizedBuffer { size: usize, max: usize },
    #[error("frame encode failed: {0}")]
    Encode(String),
    #[error("frame decode failed: {0}")]
    Decode(String),
}

#[derive(Debug, Clone)]
pub struct DecodeReport<T> {
    pub frames: Vec<T>,
    pub errors: Vec<FrameError>,
}

impl<T> Default for DecodeReport<T> {
    fn default() -> Self {
        Self {
            frames: Vec::new(),
            errors: Vec::new(),
        }
    }
}

pub fn encode_frame<T: Serialize>(
    value: &T,
    max_frame_bytes: usize,
) -> Result<Vec<u8>, FrameError> {
    let mut encoded =
        serde_json::to_vec(value).map_err(|err| FrameError::Encode(err.to_string()))?;
    if encoded.len() > max_frame_bytes {
        return Err(FrameError::OversizedFrame {
            size: encoded.len(),
            max: max_frame_bytes,
        });
    }
    encoded.push(b'\n');
    Ok(encoded)
}

pub fn decode_frame<T: DeserializeOwned>(
    bytes: &[u8],
    max_frame_bytes: usize,
) -> Result<T, FrameError> {
    let raw = trim_line_ending(bytes);
    if raw.len() > max_frame_bytes {
        return Err(FrameError::OversizedFrame {
            size: raw.len(),
            max: max_frame_bytes,
        });
    }
    serde_json::from_slice(raw).map_err(|err| FrameError::Decode(err.to_string()))
}

fn trim_line_ending(bytes: &[u8]) -> &[u8] {
    let mut raw = bytes;
    if let Some(stripped) = raw.strip_suffix(b"\n") {
        raw = stripped;
    }
    if let Some(stripped) = raw.strip_suffix(b"\r") {
        raw = stripped;
    }
    raw
}

/// Incremental newline-delimited JSON decoder for byte streams.
pub struct NdjsonFrameDecoder<T> {
    max_frame_bytes: usize,
    pending: Vec<u8>,
    marker: PhantomData<T>,
}

impl<T> NdjsonFrameDecoder<T> {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            max_frame_bytes,
            pending: Vec::new(),
            marker: PhantomData,
        }
    }
}

impl<T> Default for NdjsonFrameDecoder<T> {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_BYTES)
    }
}

impl<T: DeserializeOwned> NdjsonFrameDecoder<T> {
    pub fn push_chunk(&mut self, chunk: &[u8]) -> DecodeReport<T> {
        let mut report = DecodeReport::default();
        self.pending.extend_from_slice(chunk);

        while let Some(newline_idx) = self.pending.iter().position(|byte| *byte == b'\n') {
            let line = self.pending.drain(..=newline_idx).collect::<Vec<u8>>();
            let frame = trim_line_ending(&line);
            if frame.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            self.decode_into(frame, &mut report);
        }

        if self.pending.len() > self.max_frame_bytes {
            report.errors.push(FrameError::OversizedBuffer {
                size: self.pending.len(),
                max: self.max_frame_bytes,
            });
            self.pending.clear();
        }

        report
    }

    pub fn finish(&mut self) -> DecodeReport<T> {
        let mut report = DecodeReport::default();
        let rest = std::mem::take(&mut self.pending);
        if !rest.iter().all(u8::is_ascii_whitespace) {
            self.decode_into(&rest, &mut report);
        }
        report
    }

    fn decode_into(&self, frame: &[u8], report: &mut DecodeReport<T>) {
        match decode_frame(frame, self.max_frame_bytes) {
            Ok(parsed) => report.frames.push(parsed),
            Err(err) => report.errors.push(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn results_use_type_tag() {
        let ok = serde_json::to_value(BridgeResult::success(json!({"id": 1}))).expect("ok");
        assert_eq!(ok, json!({"type": "success", "result": {"id": 1}}));

        let err = serde_json::to_value(BridgeResult::error("boom")).expect("err");
        assert_eq!(err, json!({"type": "error", "error": "boom"}));
    }

    #[test]
    fn invoke_frame_wire_shape() {
        let frame = BridgeFrame::invoke(
            DEFAULT_CHANNEL,
            7,
            CallEnvelope::new("fs:exists", vec![json!("/tmp")]),
        );
        let value = serde_json::to_value(&frame).expect("serialize");
        assert_eq!(value["channel"], "IPC-bridge");
        assert_eq!(value["kind"], "invoke");
        assert_eq!(value["requestId"], 7);
        assert_eq!(value["name"], "fs:exists");
        assert_eq!(value["payload"], json!(["/tmp"]));
        assert_eq!(value["version"], 1);
    }

    #[test]
    fn reply_frame_parses_from_ui_json() {
        let frame: BridgeFrame = decode_frame(
            br#"{"version":"1","channel":"IPC-bridge","kind":"reply","requestId":3,"response":{"type":"error","error":"nope"}}"#,
            DEFAULT_MAX_FRAME_BYTES,
        )
        .expect("decode");
        assert_eq!(
            frame.msg,
            BridgeMsg::Reply {
                request_id: 3,
                response: BridgeResult::error("nope"),
            }
        );
    }

    #[test]
    fn missing_version_and_payload_default() {
        let frame: BridgeFrame = serde_json::from_str(
            r#"{"channel":"IPC-bridge","kind":"event","name":"monitoringStarted"}"#,
        )
        .expect("parse");
        assert_eq!(frame.version, ProtocolVersion::CURRENT);
        let BridgeMsg::Event { name, payload } = frame.msg else {
            panic!("expected event");
        };
        assert_eq!(name, "monitoringStarted");
        assert!(payload.is_empty());
    }

    #[test]
    fn decoder_recovers_after_malformed_line() {
        let event = BridgeFrame::event(DEFAULT_CHANNEL, events::ALERT, vec![json!({})]);
        let good = encode_frame(&event, DEFAULT_MAX_FRAME_BYTES).expect("encode");
        let mut chunk = good.clone();
        chunk.extend_from_slice(b"{\"channel\":\n");
        chunk.extend_from_slice(&good);

        let mut decoder = NdjsonFrameDecoder::<BridgeFrame>::default();
        let report = decoder.push_chunk(&chunk);
        assert_eq!(report.frames.len(), 2);
        assert_eq!(report.errors.len(), 1);
        assert!(matches!(report.errors[0], FrameError::Decode(_)));
    }

    #[test]
    fn decoder_joins_split_chunks() {
        let event = BridgeFrame::event(DEFAULT_CHANNEL, "terminal:data", vec![json!("hi")]);
        let bytes = encode_frame(&event, DEFAULT_MAX_FRAME_BYTES).expect("encode");
        let (head, tail) = bytes.split_at(10);

        let mut decoder = NdjsonFrameDecoder::<BridgeFrame>::default();
        assert!(decoder.push_chunk(head).frames.is_empty());
        let report = decoder.push_chunk(tail);
        assert_eq!(report.frames, vec![event]);
        assert!(decoder.finish().frames.is_empty());
    }

    #[test]
    fn encoder_rejects_oversized_frame() {
        let event = BridgeFrame::event(DEFAULT_CHANNEL, "blob", vec![json!("x".repeat(256))]);
        assert!(matches!(
            encode_frame(&event, 64),
            Err(FrameError::OversizedFrame { .. })
        ));
    }
}

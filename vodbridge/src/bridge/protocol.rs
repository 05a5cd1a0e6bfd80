//! Message vocabulary between the scripted runtime and native code.
//!
//! Inbound messages arrive as loose JSON envelopes; they are decoded at
//! the boundary into tagged variants per (class, method) pair, so
//! malformation becomes one explicit error variant instead of scattered
//! per-field casts.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use rangeset::RangeSet;
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed runtime message: {reason}")]
    MalformedEnvelope { reason: String },

    #[error("unknown bridge method {class_name}.{method_name}")]
    UnknownMethod {
        class_name: String,
        method_name: String,
    },

    #[error("invalid parameters for {class_name}.{method_name}: {source}")]
    InvalidParams {
        class_name: String,
        method_name: String,
        source: serde_json::Error,
    },

    #[error("invalid base64 payload: {source}")]
    InvalidPayload {
        #[from]
        source: base64::DecodeError,
    },
}

impl ProtocolError {
    fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedEnvelope {
            reason: reason.into(),
        }
    }
}

/// Decoded script-to-native message.
#[derive(Debug)]
pub enum RuntimeMessage {
    WindowOnLoad,
    BridgeInvoke {
        bridge_id: u64,
        callback_id: u64,
        method: BridgeMethod,
    },
    PlayerStatus {
        instance_id: u64,
        status: PlayerStatusPayload,
    },
    PlayerCurrentTime {
        instance_id: u64,
        value: f64,
        bandwidth_estimate: Option<f64>,
    },
}

/// One bridge invocation, validated per (class, method) pair.
#[derive(Debug)]
pub enum BridgeMethod {
    VideoElementConstruct { instance_id: u64 },
    VideoElementSetMediaSource { instance_id: u64, media_source_id: u64 },
    VideoElementSetCurrentTime { instance_id: u64, current_time: f64 },
    VideoElementPlay { instance_id: u64 },
    VideoElementPause { instance_id: u64 },
    MediaSourceConstruct,
    MediaSourceSetDuration { duration: f64 },
    MediaSourceUpdateSourceBuffers { ids: Vec<u64> },
    SourceBufferConstruct { media_source_id: u64, mime_type: String },
    SourceBufferAppend { data: Bytes },
    SourceBufferRemove { start: f64, end: f64 },
    SourceBufferAbort,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct PlayerStatusPayload {
    pub is_ready: bool,
    pub is_playing: bool,
    pub rate: f64,
    pub default_rate: f64,
    pub levels: Vec<LevelInfo>,
    pub current_level: Option<u32>,
    pub bandwidth_estimate: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LevelInfo {
    pub index: u32,
    pub bitrate: u64,
    pub width: u32,
    pub height: u32,
}

/// Native-to-script command, serialized by the runtime sink.
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeCommand {
    InvokeCallback { callback_id: u64, result: Value },
    UpdateStatus { bridge_id: u64, status: Value },
    UpdateBuffered { bridge_id: u64, ranges: Vec<f64> },
    MakeInstance { instance_id: u64 },
    InitializeInstance {
        instance_id: u64,
        url_prefix: String,
        bandwidth_estimate: f64,
        debug: bool,
    },
    DestroyInstance { instance_id: u64 },
    LoadLevel { instance_id: u64, level: u32 },
}

/// Delivery boundary towards the embedded runtime.
pub trait RuntimeSink: Send + 'static {
    fn deliver(&self, command: RuntimeCommand);
}

impl RuntimeSink for tokio::sync::mpsc::UnboundedSender<RuntimeCommand> {
    fn deliver(&self, command: RuntimeCommand) {
        let _ = self.send(command);
    }
}

/// Coverage serialized as a flat ascending list of alternating
/// `[lower, upper)` boundary values.
pub fn serialize_time_ranges(ranges: &RangeSet<f64>) -> Vec<f64> {
    let mut out = Vec::with_capacity(ranges.span_count() * 2);
    for range in ranges.ranges() {
        out.push(range.start);
        out.push(range.end);
    }
    out
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEnvelope {
    event: String,
    #[serde(default)]
    instance_id: Option<u64>,
    #[serde(default)]
    data: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawInvoke {
    bridge_id: u64,
    callback_id: u64,
    class_name: String,
    method_name: String,
    #[serde(default)]
    params: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCurrentTime {
    value: f64,
    #[serde(default)]
    bandwidth_estimate: Option<f64>,
}

/// Parse one raw runtime message.
pub fn parse_runtime_message(raw: &str) -> Result<RuntimeMessage, ProtocolError> {
    let envelope: RawEnvelope =
        serde_json::from_str(raw).map_err(|e| ProtocolError::malformed(e.to_string()))?;

    match envelope.event.as_str() {
        "windowOnLoad" => Ok(RuntimeMessage::WindowOnLoad),
        "bridgeInvoke" => {
            let data = envelope
                .data
                .ok_or_else(|| ProtocolError::malformed("bridgeInvoke without data"))?;
            let invoke: RawInvoke = serde_json::from_value(data)
                .map_err(|e| ProtocolError::malformed(e.to_string()))?;
            let method =
                decode_method(&invoke.class_name, &invoke.method_name, invoke.params)?;
            Ok(RuntimeMessage::BridgeInvoke {
                bridge_id: invoke.bridge_id,
                callback_id: invoke.callback_id,
                method,
            })
        }
        "playerStatus" => {
            let instance_id = envelope
                .instance_id
                .ok_or_else(|| ProtocolError::malformed("playerStatus without instanceId"))?;
            let status: PlayerStatusPayload =
                serde_json::from_value(envelope.data.unwrap_or(Value::Null))
                    .unwrap_or_default();
            Ok(RuntimeMessage::PlayerStatus {
                instance_id,
                status,
            })
        }
        "playerCurrentTime" => {
            let instance_id = envelope
                .instance_id
                .ok_or_else(|| ProtocolError::malformed("playerCurrentTime without instanceId"))?;
            let data = envelope
                .data
                .ok_or_else(|| ProtocolError::malformed("playerCurrentTime without data"))?;
            let payload: RawCurrentTime = serde_json::from_value(data)
                .map_err(|e| ProtocolError::malformed(e.to_string()))?;
            Ok(RuntimeMessage::PlayerCurrentTime {
                instance_id,
                value: payload.value,
                bandwidth_estimate: payload.bandwidth_estimate,
            })
        }
        other => Err(ProtocolError::malformed(format!("unknown event `{other}`"))),
    }
}

fn decode_params<T: serde::de::DeserializeOwned>(
    class_name: &str,
    method_name: &str,
    params: Value,
) -> Result<T, ProtocolError> {
    serde_json::from_value(params).map_err(|source| ProtocolError::InvalidParams {
        class_name: class_name.to_string(),
        method_name: method_name.to_string(),
        source,
    })
}

fn decode_method(
    class_name: &str,
    method_name: &str,
    params: Value,
) -> Result<BridgeMethod, ProtocolError> {
    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct InstanceParams {
        instance_id: u64,
    }

    match (class_name, method_name) {
        ("VideoElement", "constructor") => {
            let p: InstanceParams = decode_params(class_name, method_name, params)?;
            Ok(BridgeMethod::VideoElementConstruct {
                instance_id: p.instance_id,
            })
        }
        ("VideoElement", "setMediaSource") => {
            #[derive(Deserialize)]
            #[serde(rename_all = "camelCase")]
            struct Params {
                instance_id: u64,
                media_source_id: u64,
            }
            let p: Params = decode_params(class_name, method_name, params)?;
            Ok(BridgeMethod::VideoElementSetMediaSource {
                instance_id: p.instance_id,
                media_source_id: p.media_source_id,
            })
        }
        ("VideoElement", "setCurrentTime") => {
            #[derive(Deserialize)]
            #[serde(rename_all = "camelCase")]
            struct Params {
                instance_id: u64,
                current_time: f64,
            }
            let p: Params = decode_params(class_name, method_name, params)?;
            Ok(BridgeMethod::VideoElementSetCurrentTime {
                instance_id: p.instance_id,
                current_time: p.current_time,
            })
        }
        ("VideoElement", "play") => {
            let p: InstanceParams = decode_params(class_name, method_name, params)?;
            Ok(BridgeMethod::VideoElementPlay {
                instance_id: p.instance_id,
            })
        }
        ("VideoElement", "pause") => {
            let p: InstanceParams = decode_params(class_name, method_name, params)?;
            Ok(BridgeMethod::VideoElementPause {
                instance_id: p.instance_id,
            })
        }
        ("MediaSource", "constructor") => Ok(BridgeMethod::MediaSourceConstruct),
        ("MediaSource", "setDuration") => {
            #[derive(Deserialize)]
            struct Params {
                duration: f64,
            }
            let p: Params = decode_params(class_name, method_name, params)?;
            Ok(BridgeMethod::MediaSourceSetDuration {
                duration: p.duration,
            })
        }
        ("MediaSource", "updateSourceBuffers") => {
            #[derive(Deserialize)]
            struct Params {
                ids: Vec<u64>,
            }
            let p: Params = decode_params(class_name, method_name, params)?;
            Ok(BridgeMethod::MediaSourceUpdateSourceBuffers { ids: p.ids })
        }
        ("SourceBuffer", "constructor") => {
            #[derive(Deserialize)]
            #[serde(rename_all = "camelCase")]
            struct Params {
                media_source_id: u64,
                mime_type: String,
            }
            let p: Params = decode_params(class_name, method_name, params)?;
            Ok(BridgeMethod::SourceBufferConstruct {
                media_source_id: p.media_source_id,
                mime_type: p.mime_type,
            })
        }
        ("SourceBuffer", "appendBuffer") => {
            #[derive(Deserialize)]
            struct Params {
                data: String,
            }
            let p: Params = decode_params(class_name, method_name, params)?;
            let data = BASE64.decode(p.data.as_bytes())?;
            Ok(BridgeMethod::SourceBufferAppend {
                data: Bytes::from(data),
            })
        }
        ("SourceBuffer", "remove") => {
            #[derive(Deserialize)]
            struct Params {
                start: f64,
                end: f64,
            }
            let p: Params = decode_params(class_name, method_name, params)?;
            Ok(BridgeMethod::SourceBufferRemove {
                start: p.start,
                end: p.end,
            })
        }
        ("SourceBuffer", "abort") => Ok(BridgeMethod::SourceBufferAbort),
        _ => Err(ProtocolError::UnknownMethod {
            class_name: class_name.to_string(),
            method_name: method_name.to_string(),
        }),
    }
}

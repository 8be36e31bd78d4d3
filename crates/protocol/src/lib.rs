//! Bridge WebSocket protocol definitions.
//!
//! All communication with the front-end uses JSON text frames over a single
//! WebSocket. A connection carries any number of logical channels ("comms"),
//! each identified by an opaque `comm_id`.
//!
//! Frame types:
//! - `InboundFrame`  — front-end → bridge lifecycle and action requests
//! - `OutboundFrame` — bridge → front-end action responses and frame errors
//!
//! The engine-facing shapes (`EvalResult`, `EngineStatus`) also live here so
//! the gateway and the engine client agree on them without depending on each
//! other.

use serde::{Deserialize, Serialize};

pub use serde_json::{Map, Value};

// ── Constants ────────────────────────────────────────────────────────────────

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_PAYLOAD_BYTES: usize = 262_144; // 256 KB
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;
pub const DEFAULT_POLL_MAX_ATTEMPTS: u32 = 30;
pub const DEFAULT_EDIT_SETTLE_MS: u64 = 1_000;

// ── Action tags ──────────────────────────────────────────────────────────────

/// Tags understood by the MATLAB labextension front-end.
pub mod actions {
    pub const MATLAB_STATUS: &str = "matlab_status";
    pub const CHECK_FILE_EXISTS: &str = "check_file_exists";
    pub const CONVERT: &str = "convert";
    pub const EDIT: &str = "edit";
    pub const START_MATLAB_PROXY: &str = "start_matlab_proxy";
    pub const NUDGE: &str = "nudge";
    /// Fallback tag reported by the registry for unregistered actions.
    pub const UNKNOWN: &str = "unknown";

    /// Every tag the default registry knows about, in registration order.
    pub const ALL: &[&str] = &[
        MATLAB_STATUS,
        CHECK_FILE_EXISTS,
        CONVERT,
        EDIT,
        START_MATLAB_PROXY,
        NUDGE,
    ];
}

/// Payload keys shared by requests and responses.
pub mod keys {
    pub const MLX_FILE_PATH: &str = "mlxFilePath";
    pub const IPYNB_FILE_PATH: &str = "ipynbFilePath";
    pub const MATLAB_STATUS: &str = "matlabStatus";
    pub const EXISTS: &str = "exists";
    pub const MSG: &str = "msg";
}

// ── Envelope ─────────────────────────────────────────────────────────────────

/// Body of a `comm_msg` frame sent by the front-end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommMessage {
    pub action: String,
    #[serde(default)]
    pub data: Map<String, Value>,
}

/// One inbound request addressed to an open channel.
///
/// The payload schema is action specific; it is validated by the handler
/// that receives it, never centrally.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub channel_id: String,
    pub action: String,
    pub payload: Map<String, Value>,
}

impl Envelope {
    pub fn new(
        channel_id: impl Into<String>,
        action: impl Into<String>,
        payload: Map<String, Value>,
    ) -> Self {
        Self {
            channel_id: channel_id.into(),
            action: action.into(),
            payload,
        }
    }

    /// Convenience for payload string fields. Empty strings count as absent.
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.payload
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }
}

// ── Action response ──────────────────────────────────────────────────────────

/// The single terminal answer to one envelope.
///
/// Serialized flat: `{"action": .., <payload fields>.., "error": ..}`. A
/// non-null `error` is authoritative regardless of what the payload holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResponse {
    pub action: String,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ActionResponse {
    /// A successful response with no payload fields.
    pub fn ok(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            payload: Map::new(),
            error: None,
        }
    }

    /// A failed response carrying only the error description.
    pub fn err(action: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            payload: Map::new(),
            error: Some(error.into()),
        }
    }

    /// Add a payload field. The reserved `action` and `error` keys are
    /// ignored so the flat encoding stays unambiguous.
    #[must_use]
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        if key != "action" && key != "error" {
            self.payload.insert(key.to_string(), value.into());
        }
        self
    }

    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

// ── Frames ───────────────────────────────────────────────────────────────────

/// Front-end → bridge frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundFrame {
    CommOpen {
        comm_id: String,
        #[serde(default)]
        target_name: String,
    },
    CommMsg {
        comm_id: String,
        data: CommMessage,
    },
    CommClose {
        comm_id: String,
    },
}

impl InboundFrame {
    pub fn comm_id(&self) -> &str {
        match self {
            Self::CommOpen { comm_id, .. }
            | Self::CommMsg { comm_id, .. }
            | Self::CommClose { comm_id } => comm_id,
        }
    }
}

/// Bridge → front-end frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    CommMsg {
        comm_id: String,
        data: ActionResponse,
    },
    /// Frame-level failure that never reached an action handler.
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        comm_id: Option<String>,
        message: String,
    },
}

impl OutboundFrame {
    pub fn response(comm_id: impl Into<String>, data: ActionResponse) -> Self {
        Self::CommMsg {
            comm_id: comm_id.into(),
            data,
        }
    }

    pub fn error(comm_id: Option<String>, message: impl Into<String>) -> Self {
        Self::Error {
            comm_id,
            message: message.into(),
        }
    }
}

// ── Engine shapes ────────────────────────────────────────────────────────────

/// Result of evaluating one expression in the engine.
///
/// `is_error` denotes an engine-side evaluation failure. Transport failures
/// are never represented here; they surface as errors from the gateway call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvalResult {
    #[serde(rename = "isError")]
    pub is_error: bool,
    #[serde(rename = "responseStr", default)]
    pub response_text: String,
}

impl EvalResult {
    pub fn success(text: impl Into<String>) -> Self {
        Self {
            is_error: false,
            response_text: text.into(),
        }
    }

    pub fn failure(text: impl Into<String>) -> Self {
        Self {
            is_error: true,
            response_text: text.into(),
        }
    }
}

/// Licensing and readiness state reported by the engine proxy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineStatus {
    #[serde(rename = "isLicensed")]
    pub licensed: bool,
    pub status: String,
    /// Anything else the proxy reported (typically its last error).
    #[serde(skip)]
    pub extra: Value,
}

impl EngineStatus {
    pub fn is_up(&self) -> bool {
        self.status == "up"
    }
}

/// Config schema types (server, engine proxy, action tuning).
use std::time::Duration;

use {
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
};

use commbridge_protocol::{
    DEFAULT_EDIT_SETTLE_MS, DEFAULT_POLL_INTERVAL_MS, DEFAULT_POLL_MAX_ATTEMPTS,
};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub server: ServerConfig,
    pub engine: EngineConfig,
    pub actions: ActionsConfig,
}

/// Bridge server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind to. Defaults to "127.0.0.1".
    pub bind: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".into(),
            port: 18800,
        }
    }
}

/// Where and how to reach the engine proxy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Base URL of the engine proxy, without a trailing slash.
    pub base_url: String,
    /// Token sent with every proxy request, if the proxy requires one.
    #[serde(
        default,
        serialize_with = "serialize_option_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub auth_token: Option<Secret<String>>,
    pub request_timeout_secs: u64,
    /// Upper bound for `start_matlab_proxy` to see the engine come up.
    pub startup_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8888/matlab".into(),
            auth_token: None,
            request_timeout_secs: 30,
            startup_timeout_secs: 120,
        }
    }
}

impl EngineConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    /// Returns a copy safe to print: the auth token is replaced by a marker.
    #[must_use]
    pub fn redacted(&self) -> Self {
        Self {
            auth_token: self
                .auth_token
                .as_ref()
                .map(|_| Secret::new("[REDACTED]".to_string())),
            ..self.clone()
        }
    }
}

/// Expressions and timing used by the action handlers.
///
/// Expression templates use `{source}`, `{target}` and `{path}` placeholders.
/// Each placeholder is replaced by a single-quoted MATLAB char literal, so
/// templates must not add quotes of their own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionsConfig {
    pub convert_expression: String,
    pub edit_expression: String,
    /// Probe evaluated repeatedly while waiting for the engine's front-end.
    pub client_probe_expression: String,
    /// Substring the probe result must contain before `edit` proceeds.
    pub client_marker: String,
    pub poll_interval_ms: u64,
    pub poll_max_attempts: u32,
    /// Pause between the client marker appearing and the edit request.
    pub edit_settle_ms: u64,
}

impl Default for ActionsConfig {
    fn default() -> Self {
        Self {
            convert_expression: "ipynb2mlx({source}, {target})".into(),
            edit_expression: "edit({path})".into(),
            client_probe_expression: "connector.internal.getClientType".into(),
            client_marker: "jsd_rmt_tmw".into(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            poll_max_attempts: DEFAULT_POLL_MAX_ATTEMPTS,
            edit_settle_ms: DEFAULT_EDIT_SETTLE_MS,
        }
    }
}

impl ActionsConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn edit_settle(&self) -> Duration {
        Duration::from_millis(self.edit_settle_ms)
    }

    pub fn render_convert(&self, source: &str, target: &str) -> String {
        render(&self.convert_expression, &[("source", source), ("target", target)])
    }

    pub fn render_edit(&self, path: &str) -> String {
        render(&self.edit_expression, &[("path", path)])
    }
}

impl BridgeConfig {
    /// Returns a copy with secrets masked, for display.
    #[must_use]
    pub fn redacted(&self) -> Self {
        Self {
            engine: self.engine.redacted(),
            ..self.clone()
        }
    }
}

/// Quote `value` as a MATLAB char literal: `'...'` with inner quotes doubled.
fn matlab_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Substitute `{name}` placeholders in one pass, so text coming from a value
/// is never itself treated as a placeholder. Unknown placeholders are kept.
fn render(template: &str, args: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let tail = &rest[open..];
        let arg = tail.find('}').and_then(|close| {
            let name = &tail[1..close];
            args.iter()
                .find(|(n, _)| *n == name)
                .map(|(_, value)| (close, *value))
        });
        match arg {
            Some((close, value)) => {
                out.push_str(&matlab_literal(value));
                rest = &tail[close + 1..];
            },
            None => {
                out.push('{');
                rest = &tail[1..];
            },
        }
    }
    out.push_str(rest);
    out
}

// ── Serde helpers for Secret<String> ────────────────────────────────────────

fn serialize_option_secret<S: serde::Serializer>(
    secret: &Option<Secret<String>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match secret {
        Some(s) => serializer.serialize_some(s.expose_secret()),
        None => serializer.serialize_none(),
    }
}

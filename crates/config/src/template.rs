//! Default configuration template with all options documented.
//!
//! Written by `commbridge config init`. Every value below equals the built-in
//! default, so an untouched file behaves exactly like no file at all.

/// Generate the default config template.
pub fn default_config_template() -> String {
    r##"# commbridge configuration
# ========================
# Environment variable substitution is supported: ${ENV_VAR}
# Example: auth_token = "${ENGINE_PROXY_TOKEN}"

# ══════════════════════════════════════════════════════════════════════════════
# SERVER
# ══════════════════════════════════════════════════════════════════════════════

[server]
bind = "127.0.0.1"                # Address to bind to ("0.0.0.0" for all interfaces)
port = 18800                      # WebSocket endpoint is ws://<bind>:<port>/ws

# ══════════════════════════════════════════════════════════════════════════════
# ENGINE PROXY
# ══════════════════════════════════════════════════════════════════════════════

[engine]
base_url = "http://127.0.0.1:8888/matlab"   # Proxy base URL (no trailing slash)
# auth_token = "${ENGINE_PROXY_TOKEN}"      # Sent as the mwi-auth-token header
request_timeout_secs = 30         # Per-request HTTP timeout
startup_timeout_secs = 120        # How long start_matlab_proxy waits for "up"

# ══════════════════════════════════════════════════════════════════════════════
# ACTIONS
# ══════════════════════════════════════════════════════════════════════════════
# Expression templates accept {source}, {target} and {path} placeholders.
# Each is replaced by a quoted MATLAB char literal ('...' with ' doubled).

[actions]
convert_expression = "ipynb2mlx({source}, {target})"
edit_expression = "edit({path})"
client_probe_expression = "connector.internal.getClientType"
client_marker = "jsd_rmt_tmw"     # edit waits until the probe output contains this
poll_interval_ms = 1000           # Delay before each probe
poll_max_attempts = 30            # Probes before edit gives up with a timeout
edit_settle_ms = 1000             # Pause between marker seen and edit request
"##
    .to_string()
}

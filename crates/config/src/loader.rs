use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{
    env_subst::substitute_env,
    error::{Error, Result},
    schema::BridgeConfig,
    template::default_config_template,
};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "commbridge.toml",
    "commbridge.yaml",
    "commbridge.yml",
    "commbridge.json",
];

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> Result<BridgeConfig> {
    let raw = std::fs::read_to_string(path).map_err(|e| Error::read(path, e))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./commbridge.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/commbridge/commbridge.{toml,yaml,yml,json}` (user-global)
///
/// Returns `BridgeConfig::default()` if no config file is found or the one
/// found cannot be loaded.
pub fn discover_and_load() -> BridgeConfig {
    if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => return cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            },
        }
    } else {
        debug!("no config file found, using defaults");
    }
    BridgeConfig::default()
}

/// Load an explicit path when given, otherwise fall back to discovery.
///
/// An explicit path that cannot be loaded is an error rather than a silent
/// fallback: the user asked for that file.
pub fn load_or_discover(path: Option<&Path>) -> Result<BridgeConfig> {
    match path {
        Some(p) => load_config(p),
        None => Ok(discover_and_load()),
    }
}

/// Find the first config file in standard locations.
pub fn find_config_file() -> Option<PathBuf> {
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    let dir = config_dir()?;
    CONFIG_FILENAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.exists())
}

/// Returns the user-global config directory (`~/.config/commbridge/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "commbridge").map(|d| d.config_dir().to_path_buf())
}

/// Returns the path of an existing config file, or the default TOML path.
pub fn find_or_default_config_path() -> PathBuf {
    if let Some(path) = find_config_file() {
        return path;
    }
    config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("commbridge.toml")
}

/// Write the documented default template to `path` unless a file is already
/// there. Returns `false` when an existing file was left untouched.
pub fn write_default_config(path: &Path) -> Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|e| Error::write(parent, e))?;
    }
    std::fs::write(path, default_config_template()).map_err(|e| Error::write(path, e))?;
    debug!(path = %path.display(), "wrote default config");
    Ok(true)
}

fn parse_config(raw: &str, path: &Path) -> Result<BridgeConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => toml::from_str(raw).map_err(|e| Error::parse("TOML", e)),
        "yaml" | "yml" => serde_yaml::from_str(raw).map_err(|e| Error::parse("YAML", e)),
        "json" => serde_json::from_str(raw).map_err(|e| Error::parse("JSON", e)),
        _ => Err(Error::UnsupportedFormat {
            extension: ext.to_string(),
        }),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("commbridge.toml");
        std::fs::write(&path, "[server]\nport = 9100\n").unwrap();
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.server.port, 9100);
        assert_eq!(cfg.server.bind, "127.0.0.1");
    }

    #[test]
    fn loads_yaml_and_json_files() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = dir.path().join("commbridge.yaml");
        std::fs::write(&yaml, "actions:\n  client_marker: ready\n").unwrap();
        assert_eq!(load_config(&yaml).unwrap().actions.client_marker, "ready");

        let json = dir.path().join("commbridge.json");
        std::fs::write(&json, r#"{"engine":{"base_url":"http://engine:9000"}}"#).unwrap();
        assert_eq!(
            load_config(&json).unwrap().engine.base_url,
            "http://engine:9000"
        );
    }

    #[test]
    fn rejects_unknown_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("commbridge.ini");
        std::fs::write(&path, "port=1").unwrap();
        let err = load_config(&path).unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat { ref extension } if extension == "ini"));
        assert_eq!(err.to_string(), "unsupported config format: .ini");
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_or_discover(Some(&dir.path().join("nope.toml"))).unwrap_err();
        assert!(matches!(err, Error::Read { .. }));
        assert!(err.to_string().starts_with("failed to read"));
    }

    #[test]
    fn malformed_file_reports_its_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("commbridge.toml");
        std::fs::write(&path, "[server\nport = 1\n").unwrap();
        let err = load_config(&path).unwrap_err();
        assert!(matches!(err, Error::Parse { format: "TOML", .. }));
        assert!(err.to_string().starts_with("invalid TOML config: "));
    }

    #[test]
    fn default_template_is_written_once_and_parses() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("commbridge.toml");
        assert!(write_default_config(&path).unwrap());
        assert!(!write_default_config(&path).unwrap());

        let cfg = load_config(&path).unwrap();
        let defaults = BridgeConfig::default();
        assert_eq!(cfg.server, defaults.server);
        assert_eq!(cfg.actions, defaults.actions);
    }
}

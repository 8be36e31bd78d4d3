//! Filesystem helpers for path-bearing actions.

use std::path::{Component, Path, PathBuf};

/// Expand a leading `~` to the user's home directory.
///
/// Only the bare `~` and `~/...` forms are expanded; `~user` is returned as is.
pub fn expand_user(raw: &str) -> PathBuf {
    let home = || directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf());
    if raw == "~" {
        if let Some(home) = home() {
            return home;
        }
    } else if let Some(rest) = raw.strip_prefix("~/").or_else(|| raw.strip_prefix("~\\"))
        && let Some(home) = home()
    {
        return home.join(rest);
    }
    PathBuf::from(raw)
}

/// Lexically remove `.` and fold `..` into a preceding normal component.
///
/// A `..` with nothing to fold stays in a relative path and is dropped at the
/// root. Only safe for components known not to be symlinks.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {},
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                },
                Some(Component::RootDir | Component::Prefix(_)) => {},
                _ => out.push(".."),
            },
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Expand `~`, make absolute, and resolve symlinks and `..` against the
/// filesystem.
///
/// The longest existing prefix is canonicalized; components past it do not
/// exist, so they are appended and folded lexically.
pub async fn resolve(raw: &str) -> std::io::Result<PathBuf> {
    let absolute = std::path::absolute(expand_user(raw))?;
    let components: Vec<Component<'_>> = absolute.components().collect();

    for split in (1..=components.len()).rev() {
        let prefix: PathBuf = components[..split].iter().collect();
        if let Ok(mut real) = tokio::fs::canonicalize(&prefix).await {
            if split == components.len() {
                return Ok(real);
            }
            real.extend(&components[split..]);
            return Ok(normalize(&real));
        }
    }
    Ok(normalize(&absolute))
}

pub async fn exists(path: &Path) -> std::io::Result<bool> {
    tokio::fs::try_exists(path).await
}

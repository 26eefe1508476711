//! Environment and working-directory resolution for new sessions.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

/// Resolved environment of a child process, ordered by variable name.
pub type EnvMap = BTreeMap<String, String>;

/// Builds the environment for a new session.
///
/// `explicit` replaces the proxy's inherited environment when present.
/// Every variable in `extra` is then set on top, overwriting on collision.
pub fn resolve_environment(
    explicit: Option<HashMap<String, String>>,
    extra: Option<HashMap<String, String>>,
) -> EnvMap {
    let mut env: EnvMap = match explicit {
        Some(explicit) => explicit.into_iter().collect(),
        None => inherited_environment(),
    };

    if let Some(extra) = extra {
        env.extend(extra);
    }

    env
}

/// The proxy's own environment. Non-UTF-8 entries are converted lossily.
pub fn inherited_environment() -> EnvMap {
    std::env::vars_os()
        .map(|(key, value)| {
            (
                key.to_string_lossy().into_owned(),
                value.to_string_lossy().into_owned(),
            )
        })
        .collect()
}

/// Picks the directory a new session starts in.
///
/// Preference order: `suggested` if it exists, then `requested`, then the
/// proxy's current directory. Whatever was chosen must exist at the time of
/// the check, otherwise the proxy's current directory is used.
pub fn resolve_working_directory(suggested: Option<&str>, requested: Option<&str>) -> PathBuf {
    let candidate = non_empty(suggested)
        .map(Path::new)
        .filter(|dir| dir.exists())
        .or_else(|| non_empty(requested).map(Path::new))
        .map(Path::to_path_buf);

    match candidate {
        Some(dir) if dir.exists() => dir,
        Some(dir) => {
            tracing::debug!(cwd = %dir.display(), "Requested working directory does not exist");
            proxy_directory()
        }
        None => proxy_directory(),
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|s| !s.is_empty())
}

fn proxy_directory() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"))
}

use std::path::{Path, PathBuf};

use crate::{image, Result};

const STATE_SUBDIR: &str = ".local/state/release-publisher";

pub fn state_dir(explicit: Option<PathBuf>) -> Result<PathBuf> {
    match explicit {
        Some(dir) => Ok(dir),
        None => {
            let home_dir = home::home_dir()
                .ok_or("failed to determine home directory, pass `--state-dir` explicitly")?;
            Ok(home_dir.join(STATE_SUBDIR))
        }
    }
}

/// Runs of the same repository are mutually exclusive.
pub fn lock_path(state_dir: &Path, repository: &str) -> PathBuf {
    state_dir.join(format!("{}.lock", image::repository_slug(repository)))
}

pub fn history_path(state_dir: &Path, repository: &str) -> PathBuf {
    state_dir.join(format!("{}.history.json", image::repository_slug(repository)))
}

pub fn expect_repository(value: &str) -> Result<String, &'static str> {
    if !image::is_valid_repository(value) {
        return Err("expected a repository such as `namespace/name` or `registry.example.com:5000/name`, in lowercase");
    }
    Ok(value.to_string())
}

pub fn expect_tag(value: &str) -> Result<String, &'static str> {
    if !image::is_valid_tag(value) {
        return Err("expected a tag matching regex /^[\\w][\\w.-]{0,127}$/");
    }
    Ok(value.to_string())
}

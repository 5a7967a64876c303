use std::path::Path;

use log::debug;

use crate::{deadline::Deadline, process, Result};

/// Returns the commit hash of the repository containing `dir`.
pub fn commit_hash(dir: &Path, deadline: Deadline) -> Result<String> {
    let output = process::command!("git", "-C", dir, "rev-parse", "HEAD")
        .with_deadline(deadline)
        .output()?;

    Ok(std::str::from_utf8(&output.stdout)?.trim().to_owned())
}

/// Returns true if there are no uncommitted or untracked files, and false otherwise.
pub fn is_clean(dir: &Path, deadline: Deadline) -> Result<bool> {
    let output = process::command!("git", "-C", dir, "status", "--porcelain")
        .with_deadline(deadline)
        .output()?;

    Ok(std::str::from_utf8(&output.stdout)?.trim().is_empty())
}

/// The commit the build context was checked out at, if it is a git checkout. A dirty working tree is marked with a
/// `.dirty` suffix because the image does not correspond to the commit.
pub fn revision(dir: &Path, deadline: Deadline) -> Option<String> {
    let mut revision = match commit_hash(dir, deadline) {
        Ok(commit_hash) => commit_hash,
        Err(error) => {
            debug!("build context {dir:?} has no git revision: {error}");
            return None;
        }
    };
    match is_clean(dir, deadline) {
        Ok(true) => {}
        Ok(false) => revision.push_str(".dirty"),
        Err(error) => debug!("unable to determine whether {dir:?} is clean: {error}"),
    }
    Some(revision)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn no_revision_outside_a_repository() {
        let dir = crate::temp_path::tmp_path("release-publisher-git-", "");
        std::fs::create_dir_all(&dir).unwrap();
        assert_eq!(
            revision(&dir, Deadline::after(Duration::from_secs(30))),
            None
        );
        std::fs::remove_dir(&dir).unwrap();
    }

    #[test]
    fn git_is_bounded_by_the_deadline() {
        let error = commit_hash(Path::new("."), Deadline::after(Duration::ZERO)).unwrap_err();
        let error = error.downcast_ref::<process::Error>().unwrap();
        // Without git on the system the command fails before the deadline is consulted.
        if !matches!(error.kind, process::ErrorKind::NotFound) {
            assert!(error.is_timeout(), "{error}");
        }
    }
}

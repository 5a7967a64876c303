use std::{
    ffi::{OsStr, OsString},
    path::Path,
    sync::LazyLock,
};

use log::{debug, warn};
use regex::Regex;

use crate::{
    deadline::{Deadline, CLEANUP_TIMEOUT},
    process, temp_path, Result,
};

pub const DEFAULT_PROGRAM: &str = "docker";

fn docker(program: &OsStr, deadline: Deadline) -> process::Command {
    process::Command::new(program).with_deadline(deadline)
}

pub struct BuildArgs<'a> {
    pub program: &'a OsStr,
    pub context: &'a Path,
    pub dockerfile: Option<&'a Path>,
    pub tag: &'a str,
    pub labels: &'a [(&'a str, String)],
    pub deadline: Deadline,
}

pub struct BuildOutput {
    pub image_id: String,
}

/// Builds the image and returns the ID written by `--iidfile`. The image ID identifies the exact content that was
/// built, other tags are applied to it rather than to a name that could have moved in the meantime.
pub fn build(args: BuildArgs) -> Result<BuildOutput> {
    let iid_path = temp_path::tmp_path("release-publisher-iid-", ".txt");

    let mut extra: Vec<OsString> = Vec::new();
    if let Some(dockerfile) = args.dockerfile {
        extra.push("--file".into());
        extra.push(dockerfile.into());
    }
    for (key, value) in args.labels {
        extra.push("--label".into());
        extra.push(format!("{key}={value}").into());
    }

    let result = process::args!(
        docker(args.program, args.deadline),
        "build",
        args.context,
        "--tag",
        args.tag,
        "--iidfile",
        iid_path,
    )
    .args(extra.iter().map(OsString::as_os_str))
    .status();

    let image_id = result.map_err(Into::into).and_then(|()| -> Result<String> {
        let contents = std::fs::read_to_string(&iid_path)
            .map_err(|error| format!("unable to read image id from {iid_path:?}: {error}"))?;
        parse_image_id(&contents)
    });

    if let Err(error) = std::fs::remove_file(&iid_path) {
        if error.kind() != std::io::ErrorKind::NotFound {
            warn!("unable to remove {iid_path:?}: {error}");
        }
    }

    Ok(BuildOutput {
        image_id: image_id?,
    })
}

fn parse_image_id(contents: &str) -> Result<String> {
    static IMAGE_ID_REGEX: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"^[A-Za-z][A-Za-z0-9]*:[0-9a-fA-F]{32,}$").expect("image id regex is valid")
    });

    let image_id = contents.trim();
    if IMAGE_ID_REGEX.is_match(image_id) {
        Ok(image_id.to_owned())
    } else {
        Err(format!("build produced an invalid image id {image_id:?}").into())
    }
}

pub fn tag(
    program: &OsStr,
    source: &str,
    target: &str,
    deadline: Deadline,
) -> process::Result<()> {
    process::args!(docker(program, deadline), "tag", source, target).output()?;
    Ok(())
}

pub fn login(
    program: &OsStr,
    registry: &str,
    username: &str,
    password: &str,
    deadline: Deadline,
) -> process::Result<()> {
    let output = process::args!(
        docker(program, deadline),
        "login",
        "--username",
        username,
        "--password-stdin",
        registry,
    )
    .output_with_input(password.as_bytes().to_vec())?;
    debug!("{}", output.stdout_lossy().trim());
    Ok(())
}

/// Logs out of `registry`. Runs after the run has ended one way or another, so it gets [`CLEANUP_TIMEOUT`] instead of
/// the run deadline and keeps running through an interrupt.
pub fn logout(program: &OsStr, registry: &str) -> process::Result<()> {
    let command = docker(program, Deadline::after(CLEANUP_TIMEOUT)).ignore_interrupt();
    process::args!(command, "logout", registry).output()?;
    Ok(())
}

pub struct PushOutput {
    pub digest: Option<String>,
}

pub fn push(program: &OsStr, image: &str, deadline: Deadline) -> process::Result<PushOutput> {
    let output = process::args!(docker(program, deadline), "push", image).output()?;
    let stdout = output.stdout_lossy();
    for line in stdout.lines() {
        debug!("{line}");
    }
    Ok(PushOutput {
        digest: parse_push_digest(&stdout),
    })
}

/// Extracts the manifest digest from the last line `docker push` prints, e.g.
/// `1.0: digest: sha256:<hex> size: 1234`.
fn parse_push_digest(stdout: &str) -> Option<String> {
    static DIGEST_REGEX: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"digest: ([A-Za-z][A-Za-z0-9]*:[0-9a-fA-F]{32,})")
            .expect("digest regex is valid")
    });

    stdout
        .lines()
        .rev()
        .find_map(|line| DIGEST_REGEX.captures(line))
        .map(|captures| captures[1].to_owned())
}

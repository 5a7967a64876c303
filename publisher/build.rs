use std::{env, fs, io::BufRead, path::PathBuf, process::Command};

fn git<'a, I: IntoIterator<Item = &'a str>>(args: I) -> Option<std::process::Output> {
    let output = Command::new("git").args(args).output().ok()?;
    output.status.success().then_some(output)
}

fn git_commit_hash() -> Option<String> {
    let output = git(["rev-parse", "--short", "HEAD"])?;
    output.stdout.lines().next()?.ok()
}

fn git_is_clean() -> bool {
    git(["status", "--porcelain"]).is_some_and(|output| output.stdout.is_empty())
}

fn main() {
    println!("cargo:rerun-if-env-changed=RELEASE_PUBLISHER_RELEASE");

    let doing_release = option_env!("RELEASE_PUBLISHER_RELEASE")
        .map(|env| matches!(env, "1" | "true"))
        .unwrap_or_default();

    let mut version = env!("CARGO_PKG_VERSION").to_owned();
    if !doing_release {
        // Source tarballs have no git metadata, the bare package version is used then.
        if let Some(commit_hash) = git_commit_hash() {
            version.push('+');
            version.push_str(&commit_hash);
            if !git_is_clean() {
                version.push_str(".dirty");
            }
        }
    }

    let out_dir = PathBuf::from(env::var_os("OUT_DIR").expect("cargo sets OUT_DIR"));
    fs::write(
        out_dir.join("version.rs"),
        format!("pub const VERSION: &str = {version:?};"),
    )
    .expect("unable to write version.rs");
}

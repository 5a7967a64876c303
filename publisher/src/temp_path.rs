use std::path::PathBuf;

/// Returns a path in the system temporary directory that does not exist yet with high probability.
pub fn tmp_path(prefix: &str, ext: &str) -> PathBuf {
    use rand::distributions::{Alphanumeric, DistString};

    const LEN: usize = 16;

    let mut name = String::with_capacity(prefix.len() + LEN + ext.len());
    name.push_str(prefix);
    Alphanumeric.append_string(&mut rand::thread_rng(), &mut name, LEN);
    name.push_str(ext);
    std::env::temp_dir().join(name)
}

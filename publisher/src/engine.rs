mod docker;

pub use docker::*;

use std::path::Path;

use time::OffsetDateTime;

use crate::{credentials::Credentials, image::ImageRef, Result};

pub struct BuildArgs<'a> {
    pub context: &'a Path,
    pub dockerfile: Option<&'a Path>,
    pub image: &'a ImageRef,
    pub commit_hash: Option<&'a str>,
    pub created: OffsetDateTime,
}

pub struct BuildOutput {
    pub image_id: String,
}

pub struct PushOutput {
    pub digest: Option<String>,
}

/// The container tooling a publish run drives.
pub trait Engine {
    fn build(&self, args: BuildArgs) -> Result<BuildOutput>;

    /// Applies `target` to the image identified by `image_id`.
    fn tag(&self, image_id: &str, target: &ImageRef) -> Result<()>;

    fn login(&self, registry: &str, credentials: &Credentials) -> Result<()>;

    fn logout(&self, registry: &str) -> Result<()>;

    fn push(&self, image: &ImageRef) -> Result<PushOutput>;
}

use std::{fmt, path::PathBuf};

use log::info;
use time::OffsetDateTime;

use crate::{
    credentials::CredentialStore,
    deadline::Deadline,
    engine::{BuildArgs, Engine},
    history::{FailureKind, RunStatus},
    image::{ImageRef, InvalidImageRef},
    lock::LockError,
    process,
    session::RegistrySession,
    timestamp,
};

pub const DEFAULT_REPOSITORY: &str = "eeacms/citus-manager";
pub const DEFAULT_TAG: &str = "1.0";
pub const DEFAULT_REGISTRY: &str = "https://index.docker.io/v1/";
pub const DEFAULT_CREDENTIALS_ID: &str = "eeajenkins";

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Clone)]
pub struct PublishConfig {
    pub context: PathBuf,
    pub dockerfile: Option<PathBuf>,
    pub repository: String,
    pub tag: String,
    pub registry: String,
    pub credentials_id: String,
    /// Recorded as an image label when known.
    pub revision: Option<String>,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            context: PathBuf::from("."),
            dockerfile: None,
            repository: DEFAULT_REPOSITORY.to_owned(),
            tag: DEFAULT_TAG.to_owned(),
            registry: DEFAULT_REGISTRY.to_owned(),
            credentials_id: DEFAULT_CREDENTIALS_ID.to_owned(),
            revision: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Waiting for another run to release the lock.
    Queue,
    Build,
    Tag,
    Login,
    Push,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Step::Queue => "waiting for another run to finish",
            Step::Build => "building",
            Step::Tag => "tagging",
            Step::Login => "logging in",
            Step::Push => "pushing",
        })
    }
}

#[derive(Debug)]
pub enum PublishError {
    Config(BoxError),
    Build(BoxError),
    Auth(BoxError),
    Push { image: String, source: BoxError },
    /// Both pushes succeeded but the registry reported different content for the two tags.
    DigestMismatch { first: String, second: String },
    Timeout { step: Step },
    Interrupted { step: Step },
    Busy(LockError),
}

impl PublishError {
    /// How the run is recorded in the history. A run that was rejected or interrupted while another one was in
    /// progress never started.
    pub fn run_status(&self) -> Option<RunStatus> {
        let kind = match self {
            PublishError::Busy(_)
            | PublishError::Interrupted {
                step: Step::Queue,
            } => return None,
            PublishError::Config(_) => FailureKind::Config,
            PublishError::Build(_) => FailureKind::Build,
            PublishError::Auth(_) => FailureKind::Auth,
            PublishError::Push { .. } | PublishError::DigestMismatch { .. } => FailureKind::Push,
            PublishError::Timeout { .. } => return Some(RunStatus::TimedOut),
            PublishError::Interrupted { .. } => FailureKind::Interrupted,
        };
        Some(RunStatus::Failed { kind })
    }
}

impl fmt::Display for PublishError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublishError::Config(error) => write!(f, "invalid configuration: {error}"),
            PublishError::Build(error) => write!(f, "build failed: {error}"),
            PublishError::Auth(error) => write!(f, "registry authentication failed: {error}"),
            PublishError::Push { image, source } => write!(f, "push of {image} failed: {source}"),
            PublishError::DigestMismatch { first, second } => write!(
                f,
                "push failed: the registry reports digest {first} for the first tag but {second} for the second"
            ),
            PublishError::Timeout { step } => {
                write!(f, "run timed out while {step}, the deadline was exceeded")
            }
            PublishError::Interrupted { step } => write!(f, "run was interrupted while {step}"),
            PublishError::Busy(error) => error.fmt(f),
        }
    }
}

impl std::error::Error for PublishError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PublishError::Config(error)
            | PublishError::Build(error)
            | PublishError::Auth(error)
            | PublishError::Push { source: error, .. } => Some(error.as_ref()),
            PublishError::Busy(error) => Some(error),
            PublishError::DigestMismatch { .. }
            | PublishError::Timeout { .. }
            | PublishError::Interrupted { .. } => None,
        }
    }
}

impl From<InvalidImageRef> for PublishError {
    fn from(error: InvalidImageRef) -> Self {
        PublishError::Config(error.into())
    }
}

impl From<LockError> for PublishError {
    fn from(error: LockError) -> Self {
        match error {
            LockError::Busy { .. } => PublishError::Busy(error),
            LockError::Interrupted { .. } => PublishError::Interrupted { step: Step::Queue },
            LockError::Io { .. } => PublishError::Config(error.into()),
        }
    }
}

/// Timeouts and interrupts of the underlying tool take precedence over the step the error occurred in.
fn step_error(step: Step, error: BoxError, wrap: impl FnOnce(BoxError) -> PublishError) -> PublishError {
    if let Some(process_error) = error.downcast_ref::<process::Error>() {
        if process_error.is_timeout() {
            return PublishError::Timeout { step };
        }
        if process_error.is_interrupt() {
            return PublishError::Interrupted { step };
        }
    }
    wrap(error)
}

fn check_deadline(deadline: Deadline, step: Step) -> Result<(), PublishError> {
    if process::interrupted() {
        return Err(PublishError::Interrupted { step });
    }
    if deadline.is_expired() {
        return Err(PublishError::Timeout { step });
    }
    Ok(())
}

/// What a run got done, filled in as the run progresses so that a failed run can still be accounted for.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Progress {
    pub timestamp_tag: Option<String>,
    pub image_id: Option<String>,
    /// Tags that reached the registry, in push order.
    pub pushed: Vec<String>,
    pub digest: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishOutput {
    pub image_id: String,
    pub images: [ImageRef; 2],
    pub digest: Option<String>,
}

pub struct Publisher<'a, E: Engine + ?Sized> {
    pub config: &'a PublishConfig,
    pub engine: &'a E,
    pub credentials: &'a dyn CredentialStore,
    pub deadline: Deadline,
}

impl<E: Engine + ?Sized> Publisher<'_, E> {
    /// Builds the image once and pushes it under the configured tag and under a tag derived from `started`. Any
    /// failure aborts the remaining steps. Tags pushed before the failure stay in the registry.
    pub fn publish(
        &self,
        started: OffsetDateTime,
        progress: &mut Progress,
    ) -> Result<PublishOutput, PublishError> {
        let Self {
            config,
            engine,
            credentials,
            deadline,
        } = *self;

        let timestamp_tag = timestamp::format_tag(started);
        progress.timestamp_tag = Some(timestamp_tag.clone());

        let versioned = ImageRef::new(config.repository.as_str(), config.tag.as_str())?;
        let stamped = versioned.with_tag(timestamp_tag)?;

        check_deadline(deadline, Step::Build)?;
        info!(
            "Building {versioned} from {context:?}...",
            context = config.context
        );
        let image_id = engine
            .build(BuildArgs {
                context: &config.context,
                dockerfile: config.dockerfile.as_deref(),
                image: &versioned,
                commit_hash: config.revision.as_deref(),
                created: started,
            })
            .map_err(|error| step_error(Step::Build, error, PublishError::Build))?
            .image_id;
        progress.image_id = Some(image_id.clone());

        check_deadline(deadline, Step::Tag)?;
        info!("Tagging {image_id} as {stamped}...");
        engine
            .tag(&image_id, &stamped)
            .map_err(|error| step_error(Step::Tag, error, PublishError::Build))?;

        check_deadline(deadline, Step::Login)?;
        let credentials = credentials
            .resolve(&config.credentials_id)
            .map_err(PublishError::Auth)?;
        let session = RegistrySession::login(engine, &config.registry, &credentials)
            .map_err(|error| step_error(Step::Login, error, PublishError::Auth))?;

        let mut digests = Vec::with_capacity(2);
        for image in [&versioned, &stamped] {
            check_deadline(deadline, Step::Push)?;
            let output = session.push(image).map_err(|error| {
                step_error(Step::Push, error, |source| PublishError::Push {
                    image: image.to_string(),
                    source,
                })
            })?;
            progress.pushed.push(image.tag().to_owned());
            digests.push(output.digest);
        }
        drop(session);

        let digest = match (digests[0].take(), digests[1].take()) {
            (Some(first), Some(second)) if first != second => {
                return Err(PublishError::DigestMismatch { first, second })
            }
            (first, second) => first.or(second),
        };
        progress.digest = digest.clone();

        Ok(PublishOutput {
            image_id,
            images: [versioned, stamped],
            digest,
        })
    }
}

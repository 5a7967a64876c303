use std::{ffi::OsString, path::PathBuf, time::Duration};

use clap::Args;
use constcat::concat;
use log::{info, warn};

use super::common::{expect_repository, expect_tag, history_path, lock_path};
use crate::{
    credentials::{
        CredentialStore, EnvCredentialStore, FileCredentialStore, PASSWORD_SUFFIX, USERNAME_SUFFIX,
    },
    deadline::{Deadline, RUN_TIMEOUT},
    docker,
    engine::DockerEngine,
    git,
    history::{Artifacts, History, Retention, RunRecord, RunStatus},
    lock::{RunLock, QUEUE_POLLING_INTERVAL},
    publisher::{
        PublishConfig, PublishError, Publisher, Progress, DEFAULT_CREDENTIALS_ID, DEFAULT_REGISTRY,
        DEFAULT_REPOSITORY, DEFAULT_TAG,
    },
    timestamp, version, Result,
};

#[derive(Debug, Args)]
pub struct PublishArgs {
    /// The build context.
    #[arg(long = "context", default_value = ".")]
    pub context: PathBuf,

    /// The Dockerfile, relative to the current directory. Defaults to `Dockerfile` inside the build context.
    #[arg(long = "file", short = 'f')]
    pub file: Option<PathBuf>,

    /// The repository the image is published to.
    #[arg(long = "repository", default_value = DEFAULT_REPOSITORY, value_parser = expect_repository)]
    pub repository: String,

    /// The static version tag. The image is additionally tagged with the time the run started.
    #[arg(long = "tag", default_value = DEFAULT_TAG, value_parser = expect_tag)]
    pub tag: String,

    /// The registry to authenticate against.
    #[arg(long = "registry", default_value = DEFAULT_REGISTRY)]
    pub registry: String,

    #[arg(long = "credentials-id", default_value = DEFAULT_CREDENTIALS_ID, help = concat!("Name of the stored registry credential. Read from the `<NAME>", USERNAME_SUFFIX, "` and `<NAME>", PASSWORD_SUFFIX, "` environment variables, where <NAME> is the uppercased name, unless `--credentials-file` is passed."))]
    pub credentials_id: String,

    /// A JSON file mapping credential names to `{ "username": ..., "password": ... }`.
    #[arg(long = "credentials-file")]
    pub credentials_file: Option<PathBuf>,

    /// The run is aborted and reported as timed out when it takes longer than this.
    #[arg(long = "timeout-minutes", default_value_t = RUN_TIMEOUT.as_secs() / 60, value_parser = clap::value_parser!(u64).range(1..))]
    pub timeout_minutes: u64,

    /// The container command line to drive, `docker` or a compatible one.
    #[arg(long = "docker", default_value = docker::DEFAULT_PROGRAM)]
    pub docker: OsString,

    /// Wait for a run in progress to finish instead of failing right away.
    #[arg(long = "wait", default_value_t)]
    pub wait: bool,
}

impl PublishArgs {
    pub fn config(&self, revision: Option<String>) -> PublishConfig {
        PublishConfig {
            context: self.context.clone(),
            dockerfile: self.file.clone(),
            repository: self.repository.clone(),
            tag: self.tag.clone(),
            registry: self.registry.clone(),
            credentials_id: self.credentials_id.clone(),
            revision,
        }
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_minutes.saturating_mul(60))
    }

    fn credential_store(&self) -> Box<dyn CredentialStore> {
        match &self.credentials_file {
            Some(path) => Box::new(FileCredentialStore { path: path.clone() }),
            None => Box::new(EnvCredentialStore),
        }
    }
}

pub fn publish(state_dir: &std::path::Path, args: PublishArgs) -> Result<()> {
    let lock_path = lock_path(state_dir, &args.repository);
    let lock = if args.wait {
        RunLock::acquire(&lock_path, Deadline::after(args.timeout()), QUEUE_POLLING_INTERVAL)
    } else {
        RunLock::try_acquire(&lock_path)
    }
    .map_err(PublishError::from)?;

    let started = timestamp::now_local();
    let clock = std::time::Instant::now();
    let deadline = Deadline::after(args.timeout());

    let config = args.config(git::revision(&args.context, deadline));
    let engine = DockerEngine {
        program: args.docker.clone(),
        deadline,
    };
    let credentials = args.credential_store();

    let mut progress = Progress::default();
    let result = Publisher {
        config: &config,
        engine: &engine,
        credentials: credentials.as_ref(),
        deadline,
    }
    .publish(started, &mut progress);

    let status = match &result {
        Ok(_) => Some(RunStatus::Succeeded),
        Err(error) => error.run_status(),
    };
    if let Some(status) = status {
        let history = History::new(history_path(state_dir, &args.repository));
        let record = RunRecord {
            started,
            duration_secs: clock.elapsed().as_secs(),
            status,
            timestamp_tag: progress.timestamp_tag,
            pushed: progress.pushed,
            commit: config.revision.clone(),
            publisher_version: version::VERSION.to_owned(),
            user: whoami::username(),
            artifacts: progress.image_id.map(|image_id| Artifacts {
                image_id,
                digest: progress.digest,
            }),
        };
        if let Err(error) = history.append(record, Retention::default()) {
            warn!(
                "failed to record the run in {path:?}: {error}",
                path = history.path()
            );
        }
    }

    drop(lock);

    let output = result?;
    let [versioned, stamped] = &output.images;
    match &output.digest {
        Some(digest) => info!("Published {versioned} and {stamped} ({digest})"),
        None => info!(
            "Published {versioned} and {stamped} (image {image_id})",
            image_id = output.image_id
        ),
    }

    Ok(())
}

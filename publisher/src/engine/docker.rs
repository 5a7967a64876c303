use std::ffi::OsString;

use log::debug;
use time::format_description::well_known::Rfc3339;

use super::{BuildArgs, BuildOutput, Engine, PushOutput};
use crate::{credentials::Credentials, deadline::Deadline, docker, image::ImageRef, Result};

/// Drives the `docker` command line, or a compatible one. Every command but logout is killed once `deadline`
/// passes.
pub struct DockerEngine {
    pub program: OsString,
    pub deadline: Deadline,
}

// See https://github.com/opencontainers/image-spec/blob/main/annotations.md.
const LABEL_REVISION: &str = "org.opencontainers.image.revision";
const LABEL_CREATED: &str = "org.opencontainers.image.created";

// This conversion is necessary because the build arguments of the engine may differ from the
// build arguments accepted by the docker command line abstraction.
fn labels(args: &BuildArgs) -> Result<Vec<(&'static str, String)>> {
    let mut labels = vec![(LABEL_CREATED, args.created.format(&Rfc3339)?)];
    if let Some(commit_hash) = args.commit_hash {
        labels.push((LABEL_REVISION, commit_hash.to_owned()));
    }
    Ok(labels)
}

impl Engine for DockerEngine {
    fn build(&self, args: BuildArgs) -> Result<BuildOutput> {
        let labels = labels(&args)?;
        let tag = args.image.to_string();
        let docker::BuildOutput { image_id } = docker::build(docker::BuildArgs {
            program: &self.program,
            context: args.context,
            dockerfile: args.dockerfile,
            tag: &tag,
            labels: &labels,
            deadline: self.deadline,
        })?;
        debug!("image_id: {image_id:?}");
        Ok(BuildOutput { image_id })
    }

    fn tag(&self, image_id: &str, target: &ImageRef) -> Result<()> {
        docker::tag(&self.program, image_id, &target.to_string(), self.deadline)?;
        Ok(())
    }

    fn login(&self, registry: &str, credentials: &Credentials) -> Result<()> {
        docker::login(
            &self.program,
            registry,
            &credentials.username,
            &credentials.password,
            self.deadline,
        )?;
        Ok(())
    }

    fn logout(&self, registry: &str) -> Result<()> {
        docker::logout(&self.program, registry)?;
        Ok(())
    }

    fn push(&self, image: &ImageRef) -> Result<PushOutput> {
        let docker::PushOutput { digest } =
            docker::push(&self.program, &image.to_string(), self.deadline)?;
        debug!("{image} digest: {digest:?}");
        Ok(PushOutput { digest })
    }
}

#[cfg(test)]
mod tests {
    use std::{path::Path, time::Duration};

    use time::macros::datetime;

    use super::*;
    use crate::process;

    #[test]
    fn build_labels_carry_revision_when_known() {
        let image = ImageRef::new("eeacms/citus-manager", "1.0").unwrap();
        let args = BuildArgs {
            context: Path::new("."),
            dockerfile: None,
            image: &image,
            commit_hash: Some("abc123"),
            created: datetime!(2024-03-05 09:07 UTC),
        };
        assert_eq!(
            labels(&args).unwrap(),
            vec![
                (LABEL_CREATED, "2024-03-05T09:07:00Z".to_owned()),
                (LABEL_REVISION, "abc123".to_owned()),
            ]
        );

        let args = BuildArgs {
            commit_hash: None,
            ..args
        };
        assert_eq!(labels(&args).unwrap().len(), 1);
    }

    #[test]
    fn logout_outlives_the_run_deadline() {
        let image = ImageRef::new("eeacms/citus-manager", "1.0").unwrap();
        let expired = Deadline::after(Duration::ZERO);

        // `yes` never exits on its own, so the run deadline has to stop it.
        let engine = DockerEngine {
            program: "yes".into(),
            deadline: expired,
        };
        let error = engine.push(&image).err().unwrap();
        assert!(
            error
                .downcast_ref::<process::Error>()
                .is_some_and(process::Error::is_timeout),
            "{error}"
        );

        let engine = DockerEngine {
            program: "echo".into(),
            deadline: expired,
        };
        engine.logout("https://index.docker.io/v1/").unwrap();
    }
}

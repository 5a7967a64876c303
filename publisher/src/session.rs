use log::{debug, info, warn};

use crate::{
    credentials::Credentials,
    engine::{Engine, PushOutput},
    image::ImageRef,
    Result,
};

/// An authenticated session against a registry. Pushing is only possible through a session, and the session logs out
/// when it is dropped, whether the run succeeded or not.
pub struct RegistrySession<'a, E: Engine + ?Sized> {
    engine: &'a E,
    registry: &'a str,
}

impl<'a, E: Engine + ?Sized> RegistrySession<'a, E> {
    pub fn login(engine: &'a E, registry: &'a str, credentials: &Credentials) -> Result<Self> {
        info!(
            "Logging in to {registry} as {username}...",
            username = credentials.username
        );
        engine.login(registry, credentials)?;
        Ok(Self { engine, registry })
    }

    pub fn push(&self, image: &ImageRef) -> Result<PushOutput> {
        info!("Pushing {image}...");
        self.engine.push(image)
    }
}

impl<E: Engine + ?Sized> Drop for RegistrySession<'_, E> {
    fn drop(&mut self) {
        debug!("Logging out of {registry}...", registry = self.registry);
        // Never masks the outcome of the run.
        if let Err(error) = self.engine.logout(self.registry) {
            warn!(
                "failed to log out of {registry}: {error}",
                registry = self.registry
            );
        }
    }
}

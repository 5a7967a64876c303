use std::{collections::HashMap, fmt, path::PathBuf};

use serde::Deserialize;

use crate::Result;

/// Suffix of the environment variable holding the username, as bound by the CI host.
pub const USERNAME_SUFFIX: &str = "_USR";

/// Suffix of the environment variable holding the password, as bound by the CI host.
pub const PASSWORD_SUFFIX: &str = "_PSW";

#[derive(Clone, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    fn validate(self, reference: &str) -> Result<Self> {
        if self.username.is_empty() {
            return Err(format!("credential {reference:?} has an empty username").into());
        }
        if self.password.is_empty() {
            return Err(format!("credential {reference:?} has an empty password").into());
        }
        Ok(self)
    }
}

/// Resolves the name of a stored credential to its value.
pub trait CredentialStore {
    fn resolve(&self, reference: &str) -> Result<Credentials>;
}

/// Reads `<PREFIX>_USR` and `<PREFIX>_PSW` where the prefix is derived from the reference through [`env_prefix`].
pub struct EnvCredentialStore;

/// Uppercases the reference and replaces everything that can not appear in an environment variable name with `_`.
pub fn env_prefix(reference: &str) -> String {
    reference
        .chars()
        .map(|c| match c {
            'a'..='z' => c.to_ascii_uppercase(),
            'A'..='Z' | '0'..='9' | '_' => c,
            _ => '_',
        })
        .collect()
}

impl EnvCredentialStore {
    fn resolve_with<F>(reference: &str, var: F) -> Result<Credentials>
    where
        F: Fn(&str) -> Option<String>,
    {
        let prefix = env_prefix(reference);
        let lookup = |suffix: &str| {
            let name = format!("{prefix}{suffix}");
            var(&name).ok_or_else(|| {
                format!("credential {reference:?} is not available, expected environment variable `{name}` to be set")
            })
        };
        Credentials {
            username: lookup(USERNAME_SUFFIX)?,
            password: lookup(PASSWORD_SUFFIX)?,
        }
        .validate(reference)
    }
}

impl CredentialStore for EnvCredentialStore {
    fn resolve(&self, reference: &str) -> Result<Credentials> {
        Self::resolve_with(reference, |name| std::env::var(name).ok())
    }
}

/// Reads a JSON object mapping credential names to `{ "username": ..., "password": ... }`.
pub struct FileCredentialStore {
    pub path: PathBuf,
}

impl FileCredentialStore {
    fn parse(reference: &str, contents: &str) -> Result<Credentials> {
        let mut credentials: HashMap<String, Credentials> = serde_json::from_str(contents)?;
        credentials
            .remove(reference)
            .ok_or_else(|| format!("credential {reference:?} is not present in the credentials file"))?
            .validate(reference)
    }
}

impl CredentialStore for FileCredentialStore {
    fn resolve(&self, reference: &str) -> Result<Credentials> {
        let contents = std::fs::read_to_string(&self.path).map_err(|error| {
            format!(
                "unable to read credentials file {path:?}: {error}",
                path = self.path
            )
        })?;
        Self::parse(reference, &contents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_prefix_normalises_reference() {
        assert_eq!(env_prefix("eeajenkins"), "EEAJENKINS");
        assert_eq!(env_prefix("docker-hub.creds"), "DOCKER_HUB_CREDS");
    }

    #[test]
    fn env_store_reads_bound_variables() {
        let vars: HashMap<&str, &str> = [
            ("EEAJENKINS_USR", "jenkins"),
            ("EEAJENKINS_PSW", "hunter2"),
        ]
        .into_iter()
        .collect();
        let credentials = EnvCredentialStore::resolve_with("eeajenkins", |name| {
            vars.get(name).map(|value| value.to_string())
        })
        .unwrap();
        assert_eq!(credentials.username, "jenkins");
        assert_eq!(credentials.password, "hunter2");
    }

    #[test]
    fn env_store_reports_missing_variable() {
        let error = EnvCredentialStore::resolve_with("eeajenkins", |name| {
            (name == "EEAJENKINS_USR").then(|| "jenkins".to_owned())
        })
        .unwrap_err();
        assert!(error.to_string().contains("EEAJENKINS_PSW"), "{error}");
    }

    #[test]
    fn empty_username_is_rejected() {
        let error = EnvCredentialStore::resolve_with("x", |_| Some(String::new())).unwrap_err();
        assert!(error.to_string().contains("empty username"), "{error}");
    }

    #[test]
    fn empty_password_is_rejected() {
        let error = EnvCredentialStore::resolve_with("x", |name| {
            (name == "X_USR").then(|| "jenkins".to_owned()).or(Some(String::new()))
        })
        .unwrap_err();
        assert!(error.to_string().contains("empty password"), "{error}");
    }

    #[test]
    fn file_store_parses_json() {
        let contents = r#"{
            "eeajenkins": { "username": "jenkins", "password": "hunter2" },
            "other": { "username": "a", "password": "b" }
        }"#;
        let credentials = FileCredentialStore::parse("eeajenkins", contents).unwrap();
        assert_eq!(credentials.username, "jenkins");
        assert!(FileCredentialStore::parse("missing", contents).is_err());
    }

    #[test]
    fn debug_redacts_password() {
        let credentials = Credentials {
            username: "jenkins".to_owned(),
            password: "hunter2".to_owned(),
        };
        let debug = format!("{credentials:?}");
        assert!(debug.contains("jenkins"));
        assert!(!debug.contains("hunter2"));
    }
}

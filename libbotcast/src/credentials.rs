//! Credential bundles for destinations
//!
//! Each destination keeps its secrets in its own directory under the bot's
//! secrets directory, one file per value:
//!
//! ```text
//! secrets/
//! ├── credentials_mastodon/
//! │   ├── ACCESS_TOKEN
//! │   └── INSTANCE_BASE_URL
//! └── credentials_birdsite/
//!     ├── CONSUMER_KEY
//!     └── ...
//! ```
//!
//! A destination is configured iff its directory exists. Values are held as
//! [`SecretString`] so they are zeroed when the bundle is dropped.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use tracing::debug;

use crate::error::ConfigError;

/// Directory expected to hold the credentials of `destination`
pub fn credentials_dir(secrets_dir: &Path, destination: &str) -> PathBuf {
    secrets_dir.join(format!("credentials_{}", destination))
}

/// Secret values read from one credential directory
pub struct CredentialBundle {
    destination: String,
    dir: PathBuf,
    values: BTreeMap<String, SecretString>,
}

impl CredentialBundle {
    /// Read `required` and `optional` values from `dir`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingCredential` if a required file is absent or
    /// blank, and `ConfigError::ReadError` if a file exists but can't be read.
    pub fn load(
        destination: &str,
        dir: &Path,
        required: &[&str],
        optional: &[&str],
    ) -> Result<Self, ConfigError> {
        let mut values = BTreeMap::new();

        for key in required {
            debug!("Retrieving {} for {}", key, destination);
            match read_value(&dir.join(key))? {
                Some(value) => {
                    values.insert(key.to_string(), value);
                }
                None => {
                    return Err(ConfigError::MissingCredential {
                        destination: destination.to_string(),
                        key: key.to_string(),
                        dir: dir.to_path_buf(),
                    })
                }
            }
        }

        for key in optional {
            debug!("Looking for {} for {}", key, destination);
            if let Some(value) = read_value(&dir.join(key))? {
                values.insert(key.to_string(), value);
            }
        }

        Ok(Self {
            destination: destination.to_string(),
            dir: dir.to_path_buf(),
            values,
        })
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn get(&self, key: &str) -> Option<&SecretString> {
        self.values.get(key)
    }

    /// Plain value of `key`, if present
    pub fn expose(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|v| v.expose_secret())
    }

    /// Plain value of `key`, or the error a missing required value produces
    pub fn require(&self, key: &str) -> Result<&str, ConfigError> {
        self.expose(key).ok_or_else(|| ConfigError::MissingCredential {
            destination: self.destination.clone(),
            key: key.to_string(),
            dir: self.dir.clone(),
        })
    }
}

impl std::fmt::Debug for CredentialBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialBundle")
            .field("destination", &self.destination)
            .field("dir", &self.dir)
            .field("keys", &self.values.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Read one newline-trimmed value; blank and missing files are both `None`
fn read_value(path: &Path) -> Result<Option<SecretString>, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            let trimmed = content.trim();
            if trimmed.is_empty() {
                Ok(None)
            } else {
                Ok(Some(SecretString::from(trimmed.to_string())))
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(ConfigError::ReadError(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &Path, key: &str, value: &str) {
        std::fs::write(dir.join(key), value).unwrap();
    }

    #[test]
    fn test_credentials_dir_naming() {
        let dir = credentials_dir(Path::new("/secrets"), "mastodon");
        assert_eq!(dir, PathBuf::from("/secrets/credentials_mastodon"));
    }

    #[test]
    fn test_load_trims_values() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "ACCESS_TOKEN", "  token-123\n");

        let bundle =
            CredentialBundle::load("mastodon", temp.path(), &["ACCESS_TOKEN"], &[]).unwrap();

        assert_eq!(bundle.expose("ACCESS_TOKEN"), Some("token-123"));
        assert_eq!(bundle.destination(), "mastodon");
    }

    #[test]
    fn test_missing_required_value_fails() {
        let temp = TempDir::new().unwrap();

        let result = CredentialBundle::load("mastodon", temp.path(), &["ACCESS_TOKEN"], &[]);

        match result {
            Err(ConfigError::MissingCredential { key, destination, .. }) => {
                assert_eq!(key, "ACCESS_TOKEN");
                assert_eq!(destination, "mastodon");
            }
            other => panic!("Expected MissingCredential, got {:?}", other),
        }
    }

    #[test]
    fn test_blank_required_value_fails() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "ACCESS_TOKEN", "\n  \n");

        let result = CredentialBundle::load("mastodon", temp.path(), &["ACCESS_TOKEN"], &[]);
        assert!(matches!(result, Err(ConfigError::MissingCredential { .. })));
    }

    #[test]
    fn test_optional_values_may_be_absent() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "ACCESS_TOKEN", "token");

        let bundle = CredentialBundle::load(
            "mastodon",
            temp.path(),
            &["ACCESS_TOKEN"],
            &["INSTANCE_BASE_URL"],
        )
        .unwrap();

        assert!(bundle.get("INSTANCE_BASE_URL").is_none());
        assert!(bundle.require("INSTANCE_BASE_URL").is_err());
    }

    #[test]
    fn test_debug_does_not_leak_values() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "ACCESS_TOKEN", "super-secret-token");

        let bundle =
            CredentialBundle::load("mastodon", temp.path(), &["ACCESS_TOKEN"], &[]).unwrap();
        let debug = format!("{:?}", bundle);

        assert!(debug.contains("ACCESS_TOKEN"));
        assert!(!debug.contains("super-secret-token"));
    }
}

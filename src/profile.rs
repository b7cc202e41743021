//! Named profiles and exported credentials
//!
//! Both files live in the base directory and are TOML documents with one
//! table per profile name:
//!
//! ```toml
//! # ~/.tinytoken/config
//! [work]
//! client_id = "0oa1b2c3"
//! discovery_uri = "https://idp.example.com/.well-known/openid-configuration"
//! output = "shell"
//! ```
//!
//! `credentials` uses the same layout and holds the last exported token set
//! of each profile.

use crate::auth::TokenSet;
use crate::cache::{create_private_dir, write_private_file};
use crate::error::{Result, TinytokenError};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Profile file name inside the base directory
pub const CONFIG_FILE: &str = "config";

/// Credentials file name inside the base directory
pub const CREDENTIALS_FILE: &str = "credentials";

/// Saved defaults for the command line
///
/// Every field is optional; command line flags take precedence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Profile {
    /// OIDC client id
    pub client_id: Option<String>,
    /// Discovery document URL
    pub discovery_uri: Option<String>,
    /// User agent command line
    pub user_agent: Option<String>,
    /// Redirect URI
    pub redirect_uri: Option<String>,
    /// Output format name (`json`, `shell`, `config`)
    pub output: Option<String>,
    /// Skip reading the cache
    pub skip_cache: Option<bool>,
    /// Seconds to wait for the browser callback
    pub callback_timeout: Option<u64>,
}

/// Access to the profile and credentials files
#[derive(Debug, Clone)]
pub struct ProfileStore {
    root: PathBuf,
}

impl ProfileStore {
    /// Use `root` as base directory
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Path of the profile file
    #[must_use]
    pub fn config_path(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    /// Path of the credentials file
    #[must_use]
    pub fn credentials_path(&self) -> PathBuf {
        self.root.join(CREDENTIALS_FILE)
    }

    /// Load profile `name`
    ///
    /// # Errors
    ///
    /// Returns `Profile` if the file is missing, unparseable, or has no such profile.
    pub fn profile(&self, name: &str) -> Result<Profile> {
        let path = self.config_path();
        let content = read_existing(&path)?;

        let mut profiles: BTreeMap<String, Profile> = toml::from_str(&content).map_err(|e| {
            TinytokenError::profile(format!(
                "unable to load {}. Check file for typos: {}",
                path.display(),
                e.message()
            ))
        })?;

        profiles
            .remove(name)
            .ok_or_else(|| TinytokenError::profile(format!("profile \"{name}\" not found")))
    }

    /// Load the credentials exported for profile `name`
    ///
    /// # Errors
    ///
    /// Returns `Profile` if the file or the profile is missing or malformed.
    pub fn credentials(&self, name: &str) -> Result<TokenSet> {
        let path = self.credentials_path();
        let content = read_existing(&path)?;
        let mut table: toml::Table = toml::from_str(&content)
            .map_err(|e| TinytokenError::profile(format!("unable to load {}: {}", path.display(), e.message())))?;

        let section = table
            .remove(name)
            .ok_or_else(|| TinytokenError::profile(format!("profile \"{name}\" not found")))?;
        section.try_into().map_err(|e: toml::de::Error| {
            TinytokenError::profile(format!(
                "unable to load \"{name}\" profile from {}. Check for typos: {}",
                path.display(),
                e.message()
            ))
        })
    }

    /// Write `tokens` into profile `name` of the credentials file
    ///
    /// Other profiles in the file are preserved. The file is created with
    /// owner-only permissions.
    ///
    /// # Errors
    ///
    /// Returns `Profile` if the existing file cannot be parsed, or an I/O error
    /// if it cannot be written.
    pub fn save_credentials(&self, name: &str, tokens: &TokenSet) -> Result<()> {
        let path = self.credentials_path();
        let mut table = match std::fs::read_to_string(&path) {
            Ok(content) => toml::from_str::<toml::Table>(&content).map_err(|e| {
                TinytokenError::profile(format!("unable to load {}: {}", path.display(), e.message()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => toml::Table::new(),
            Err(e) => return Err(e.into()),
        };

        let section = toml::Value::try_from(tokens)
            .map_err(|e| TinytokenError::profile(format!("unable to encode credentials: {e}")))?;
        table.insert(name.to_string(), section);

        let content = toml::to_string_pretty(&table)
            .map_err(|e| TinytokenError::profile(format!("unable to encode credentials: {e}")))?;

        create_private_dir(&self.root)?;
        write_private_file(&path, content.as_bytes())?;
        tracing::debug!(path = %path.display(), profile = name, "Saved credentials");
        Ok(())
    }
}

fn read_existing(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => {
            TinytokenError::profile(format!("profile file \"{}\" not found", path.display()))
        }
        _ => TinytokenError::Io(e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_profile() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            r#"
[work]
client_id = "abc"
discovery_uri = "https://idp.example.com/.well-known/openid-configuration"
skip_cache = true

[home]
client_id = "def"
"#,
        )
        .unwrap();

        let store = ProfileStore::new(dir.path());
        let work = store.profile("work").unwrap();
        assert_eq!(work.client_id.as_deref(), Some("abc"));
        assert_eq!(work.skip_cache, Some(true));
        assert_eq!(work.redirect_uri, None);

        let home = store.profile("home").unwrap();
        assert_eq!(home.client_id.as_deref(), Some("def"));
    }

    #[test]
    fn test_missing_file_and_profile() {
        let dir = TempDir::new().unwrap();
        let store = ProfileStore::new(dir.path());
        assert!(matches!(store.profile("work"), Err(TinytokenError::Profile(msg)) if msg.contains("not found")));

        std::fs::write(dir.path().join(CONFIG_FILE), "[home]\nclient_id = \"x\"\n").unwrap();
        assert!(matches!(store.profile("work"), Err(TinytokenError::Profile(msg)) if msg.contains("\"work\"")));
    }

    #[test]
    fn test_typo_is_rejected() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "[work]\nclient_idd = \"x\"\n").unwrap();
        let store = ProfileStore::new(dir.path());
        assert!(matches!(store.profile("work"), Err(TinytokenError::Profile(msg)) if msg.contains("typos")));
    }

    #[test]
    fn test_save_credentials_preserves_other_profiles() {
        let dir = TempDir::new().unwrap();
        let store = ProfileStore::new(dir.path());

        let work = TokenSet::new("wa", "wi", Some("wr".to_string()));
        let home = TokenSet::new("ha", "hi", None);
        store.save_credentials("work", &work).unwrap();
        store.save_credentials("home", &home).unwrap();

        assert_eq!(store.credentials("work").unwrap(), work);
        assert_eq!(store.credentials("home").unwrap(), home);

        let updated = TokenSet::new("wa2", "wi2", None);
        store.save_credentials("work", &updated).unwrap();
        assert_eq!(store.credentials("work").unwrap(), updated);
        assert_eq!(store.credentials("home").unwrap(), home);
    }

    #[cfg(unix)]
    #[test]
    fn test_credentials_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let store = ProfileStore::new(dir.path());
        store
            .save_credentials("work", &TokenSet::new("a", "i", None))
            .unwrap();

        let mode = std::fs::metadata(store.credentials_path())
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}

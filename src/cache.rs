//! On-disk token cache
//!
//! One JSON document per client id under the base directory
//! (`~/.tinytoken` by default). Files are created owner read/write only and
//! always replaced whole: the new document is written to a sibling temporary
//! file and renamed over the old one.
//!
//! Concurrent processes using the same client id are not coordinated; the
//! last writer wins.

use crate::auth::TokenSet;
use crate::error::{Result, TinytokenError};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Name of the base directory inside the user's home
pub const BASE_DIR_NAME: &str = ".tinytoken";

/// Default base directory (`~/.tinytoken`)
///
/// # Errors
///
/// Returns `InvalidConfig` if the home directory cannot be determined.
pub fn default_base_dir() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(BASE_DIR_NAME))
        .ok_or_else(|| TinytokenError::invalid_config("unable to determine home directory"))
}

/// Durable per-client token storage
#[derive(Debug, Clone)]
pub struct TokenCache {
    root: PathBuf,
}

impl TokenCache {
    /// Open the cache rooted at `root`, creating the directory (mode 0700) if needed
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the directory cannot be created.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        create_private_dir(&root)?;
        Ok(Self { root })
    }

    /// Open the cache in the default base directory
    ///
    /// # Errors
    ///
    /// See [`default_base_dir`] and [`TokenCache::open`].
    pub fn open_default() -> Result<Self> {
        Self::open(default_base_dir()?)
    }

    /// Cache root directory
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the entry for `client_id`
    ///
    /// The client id is percent-encoded so that distinct ids always map to
    /// distinct file names inside the root.
    #[must_use]
    pub fn path_for(&self, client_id: &str) -> PathBuf {
        let name: String = url::form_urlencoded::byte_serialize(client_id.as_bytes()).collect();
        self.root.join(format!("{name}_cache.json"))
    }

    /// Whether an entry exists for `client_id` (no parsing)
    #[must_use]
    pub fn exists(&self, client_id: &str) -> bool {
        self.path_for(client_id).is_file()
    }

    /// Load the entry for `client_id`
    ///
    /// # Errors
    ///
    /// Returns `CacheMiss` if there is no entry and `CacheCorrupt` if the
    /// entry cannot be parsed into a token set.
    pub fn retrieve(&self, client_id: &str) -> Result<TokenSet> {
        let path = self.path_for(client_id);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(TinytokenError::CacheMiss {
                    client_id: client_id.to_string(),
                });
            }
            Err(e) => return Err(TinytokenError::cache_corrupt(&path, e.to_string())),
        };

        serde_json::from_str(&content).map_err(|e| TinytokenError::cache_corrupt(&path, e.to_string()))
    }

    /// Replace the entry for `client_id` with `tokens`
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be written.
    pub fn store(&self, client_id: &str, tokens: &TokenSet) -> Result<()> {
        let path = self.path_for(client_id);
        let content = serde_json::to_vec_pretty(tokens).map_err(std::io::Error::other)?;
        write_private_file(&path, &content)?;
        tracing::debug!(path = %path.display(), "Stored tokens in cache");
        Ok(())
    }

    /// Remove the entry for `client_id`, if any
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file exists but cannot be removed.
    pub fn remove(&self, client_id: &str) -> Result<()> {
        match fs::remove_file(self.path_for(client_id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Create `dir` (and parents) with owner-only permissions on Unix
pub(crate) fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    if dir.is_dir() {
        return Ok(());
    }
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(dir)
}

/// Atomically replace `path` with `content`, readable by the owner only
pub(crate) fn write_private_file(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let file_name = path
        .file_name()
        .ok_or_else(|| std::io::Error::other(format!("{} has no file name", path.display())))?;
    let mut tmp_name = file_name.to_os_string();
    tmp_name.push(format!(".{}.tmp", std::process::id()));
    let tmp_path = path.with_file_name(tmp_name);

    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let written = options.open(&tmp_path).and_then(|mut file| {
        file.write_all(content)?;
        file.sync_all()
    });

    // Set restrictive permissions on Unix even if the temp file pre-existed
    #[cfg(unix)]
    let written = written.and_then(|()| {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&tmp_path, fs::Permissions::from_mode(0o600))
    });

    match written.and_then(|()| fs::rename(&tmp_path, path)) {
        Ok(()) => Ok(()),
        Err(e) => {
            let _ = fs::remove_file(&tmp_path);
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn cache() -> (TempDir, TokenCache) {
        let temp_dir = TempDir::new().unwrap();
        let cache = TokenCache::open(temp_dir.path().join("base")).unwrap();
        (temp_dir, cache)
    }

    #[test]
    fn test_store_retrieve_round_trip() {
        let (_dir, cache) = cache();
        let tokens = TokenSet::new("access", "id", Some("refresh".to_string()));

        assert!(!cache.exists("client"));
        cache.store("client", &tokens).unwrap();
        assert!(cache.exists("client"));

        assert_eq!(cache.retrieve("client").unwrap(), tokens);
    }

    #[test]
    fn test_absent_refresh_token_round_trip() {
        let (_dir, cache) = cache();
        let tokens = TokenSet::new("access", "id", None);

        cache.store("client", &tokens).unwrap();

        let raw = fs::read_to_string(cache.path_for("client")).unwrap();
        assert!(!raw.contains("refresh_token"));
        assert_eq!(cache.retrieve("client").unwrap().refresh_token, None);
    }

    #[test]
    fn test_store_replaces_whole_document() {
        let (_dir, cache) = cache();
        cache
            .store("client", &TokenSet::new("a1", "i1", Some("r1".to_string())))
            .unwrap();
        cache.store("client", &TokenSet::new("a2", "i2", None)).unwrap();

        assert_eq!(
            cache.retrieve("client").unwrap(),
            TokenSet::new("a2", "i2", None)
        );
        // No temp files left behind
        let entries = fs::read_dir(cache.root()).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn test_retrieve_missing_entry() {
        let (_dir, cache) = cache();
        assert!(matches!(
            cache.retrieve("nobody"),
            Err(TinytokenError::CacheMiss { client_id }) if client_id == "nobody"
        ));
    }

    #[test]
    fn test_retrieve_corrupt_entry() {
        let (_dir, cache) = cache();
        fs::write(cache.path_for("client"), "{\"access_token\": ").unwrap();
        assert!(matches!(
            cache.retrieve("client"),
            Err(TinytokenError::CacheCorrupt { .. })
        ));

        fs::write(cache.path_for("client"), r#"{"access_token": "a"}"#).unwrap();
        assert!(matches!(
            cache.retrieve("client"),
            Err(TinytokenError::CacheCorrupt { .. })
        ));
    }

    #[test]
    fn test_entries_are_per_client() {
        let (_dir, cache) = cache();
        cache.store("one", &TokenSet::new("a1", "i1", None)).unwrap();
        cache.store("two", &TokenSet::new("a2", "i2", None)).unwrap();

        assert_eq!(cache.retrieve("one").unwrap().access_token, "a1");
        assert_eq!(cache.retrieve("two").unwrap().access_token, "a2");
    }

    #[test]
    fn test_client_id_cannot_escape_root() {
        let (_dir, cache) = cache();
        let path = cache.path_for("../../etc/passwd");
        assert_eq!(path.parent(), Some(cache.root()));
        assert_ne!(cache.path_for("a/b"), cache.path_for("a_b"));
    }

    #[test]
    fn test_remove() {
        let (_dir, cache) = cache();
        cache.store("client", &TokenSet::new("a", "i", None)).unwrap();
        cache.remove("client").unwrap();
        assert!(!cache.exists("client"));
        cache.remove("client").unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_permissions_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let (_dir, cache) = cache();
        cache.store("client", &TokenSet::new("a", "i", None)).unwrap();

        let file_mode = fs::metadata(cache.path_for("client")).unwrap().permissions().mode();
        assert_eq!(file_mode & 0o777, 0o600);

        let dir_mode = fs::metadata(cache.root()).unwrap().permissions().mode();
        assert_eq!(dir_mode & 0o777, 0o700);
    }
}

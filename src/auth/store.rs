//! Filesystem credential store
//!
//! Tokens and dynamically registered client identities are cached as JSON
//! files under `~/.config/mcpauth/`:
//!
//! ```text
//! ~/.config/mcpauth/
//! ├── tokens/<hex(sha256(resource_uri)[..8])>.json         (0600)
//! └── registrations/<hex(sha256(resource_uri))>.json       (0600)
//! ```
//!
//! Directories are created with mode `0700`. Every write goes to a temporary
//! file in the same directory which is then renamed over the target, so a
//! reader never observes a half-written file. Concurrent writers for the
//! same resource are not locked against each other; the last rename wins.
//!
//! Read failures and corrupt files are reported as "nothing cached" with a
//! warning. Callers treat write failures the same way.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::auth::registration::ClientRegistration;
use crate::auth::token::Token;
use crate::error::{AuthError, Result};

/// Application directory name under `~/.config`.
pub const APP_DIR: &str = "mcpauth";

const TOKENS_DIR: &str = "tokens";
const REGISTRATIONS_DIR: &str = "registrations";

/// Length of the SHA-256 hex prefix used in token file names.
const TOKEN_KEY_HEX_CHARS: usize = 16;

/// On-disk token document: the token plus the resource it belongs to.
#[derive(Debug, Serialize, Deserialize)]
struct StoredToken {
    resource_uri: String,
    #[serde(flatten)]
    token: Token,
}

// ---------------------------------------------------------------------------
// CredentialStore
// ---------------------------------------------------------------------------

/// Filesystem-backed cache for tokens and client registrations.
///
/// The store is a cheap handle around a root directory and can be cloned
/// freely.
///
/// # Examples
///
/// ```
/// use mcpauth::auth::store::CredentialStore;
///
/// let dir = tempfile::tempdir().unwrap();
/// let store = CredentialStore::with_root(dir.path());
/// let path = store.token_cache_path("https://api.example.com/mcp");
/// assert_eq!(path, store.token_cache_path("https://api.example.com/mcp"));
/// ```
#[derive(Debug, Clone)]
pub struct CredentialStore {
    root: PathBuf,
}

impl CredentialStore {
    /// Creates a store rooted at `~/.config/mcpauth`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Storage`] if the home directory cannot be
    /// determined.
    pub fn new() -> Result<Self> {
        let base = directories::BaseDirs::new().ok_or_else(|| {
            AuthError::Storage("could not determine the home directory".to_string())
        })?;
        Ok(Self::with_root(base.home_dir().join(".config").join(APP_DIR)))
    }

    /// Creates a store rooted at an explicit directory.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the token file path for `resource_uri`.
    ///
    /// The file name is the first 16 hex characters of the
    /// SHA-256 digest of the URI, so the path is a pure function of the URI.
    pub fn token_cache_path(&self, resource_uri: &str) -> PathBuf {
        let key = uri_digest(resource_uri);
        self.root
            .join(TOKENS_DIR)
            .join(format!("{}.json", &key[..TOKEN_KEY_HEX_CHARS]))
    }

    /// Returns the registration file path for `resource_uri`, keyed by the
    /// full SHA-256 digest.
    pub fn registration_path(&self, resource_uri: &str) -> PathBuf {
        self.root
            .join(REGISTRATIONS_DIR)
            .join(format!("{}.json", uri_digest(resource_uri)))
    }

    /// Persists `token` for `resource_uri`, replacing any previous token.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Storage`] when the directory or file cannot be
    /// written.
    pub fn save_token(&self, resource_uri: &str, token: &Token) -> Result<()> {
        let doc = StoredToken {
            resource_uri: resource_uri.to_string(),
            token: token.clone(),
        };
        write_json(&self.token_cache_path(resource_uri), &doc)?;
        tracing::debug!(resource = %resource_uri, "Cached token");
        Ok(())
    }

    /// Loads the cached token for `resource_uri`.
    ///
    /// Returns `None` when nothing is cached, when the file cannot be read,
    /// or when it is corrupt. The token is returned whether or not it is
    /// still valid; callers decide what to do with an expired token.
    pub fn load_token(&self, resource_uri: &str) -> Option<Token> {
        let path = self.token_cache_path(resource_uri);
        let doc: StoredToken = read_json(&path)?;
        if doc.resource_uri != resource_uri {
            tracing::warn!(
                "Ignoring cached token at {}: stored for a different resource",
                path.display()
            );
            return None;
        }
        Some(doc.token)
    }

    /// Deletes the cached token for `resource_uri`. Deleting a missing token
    /// is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Storage`] when the file exists but cannot be
    /// removed.
    pub fn delete_token(&self, resource_uri: &str) -> Result<()> {
        remove_file(&self.token_cache_path(resource_uri))
    }

    /// Persists a client registration, keyed by its resource URI.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Storage`] when the directory or file cannot be
    /// written.
    pub fn save_registration(&self, registration: &ClientRegistration) -> Result<()> {
        write_json(
            &self.registration_path(&registration.resource_uri),
            registration,
        )
    }

    /// Loads the cached registration for `resource_uri`, if any.
    pub fn load_registration(&self, resource_uri: &str) -> Option<ClientRegistration> {
        read_json(&self.registration_path(resource_uri))
    }

    /// Deletes the cached registration for `resource_uri`. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Storage`] when the file exists but cannot be
    /// removed.
    pub fn delete_registration(&self, resource_uri: &str) -> Result<()> {
        remove_file(&self.registration_path(resource_uri))
    }
}

// ---------------------------------------------------------------------------
// File helpers
// ---------------------------------------------------------------------------

/// Lowercase hex SHA-256 of `resource_uri`.
fn uri_digest(resource_uri: &str) -> String {
    format!("{:x}", Sha256::digest(resource_uri.as_bytes()))
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let contents = match fs::read(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            tracing::warn!("Failed to read {}: {}", path.display(), e);
            return None;
        }
    };

    match serde_json::from_slice(&contents) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!("Ignoring corrupt cache file {}: {}", path.display(), e);
            None
        }
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(value)
        .map_err(|e| AuthError::Storage(format!("failed to encode {}: {e}", path.display())))?;

    let dir = path
        .parent()
        .ok_or_else(|| AuthError::Storage(format!("{} has no parent", path.display())))?;
    create_private_dir(dir)?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = dir.join(format!(
        ".{file_name}.{}.{:08x}.tmp",
        std::process::id(),
        rand::random::<u32>()
    ));

    let written = (|| -> std::io::Result<()> {
        let mut file = open_private(&tmp)?;
        file.write_all(&json)?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    })();

    if let Err(e) = written {
        let _ = fs::remove_file(&tmp);
        return Err(AuthError::Storage(format!("failed to write {}: {e}", path.display())).into());
    }
    Ok(())
}

fn remove_file(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => {
            Err(AuthError::Storage(format!("failed to remove {}: {e}", path.display())).into())
        }
    }
}

#[cfg(unix)]
fn create_private_dir(dir: &Path) -> Result<()> {
    use std::os::unix::fs::{DirBuilderExt, PermissionsExt};

    fs::DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(dir)
        .map_err(|e| AuthError::Storage(format!("failed to create {}: {e}", dir.display())))?;
    // `mode` only applies to directories created by this call.
    fs::set_permissions(dir, fs::Permissions::from_mode(0o700))
        .map_err(|e| AuthError::Storage(format!("failed to secure {}: {e}", dir.display())))?;
    Ok(())
}

#[cfg(not(unix))]
fn create_private_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)
        .map_err(|e| AuthError::Storage(format!("failed to create {}: {e}", dir.display())).into())
}

#[cfg(unix)]
fn open_private(path: &Path) -> std::io::Result<fs::File> {
    use std::os::unix::fs::OpenOptionsExt;

    fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)
}

#[cfg(not(unix))]
fn open_private(path: &Path) -> std::io::Result<fs::File> {
    fs::OpenOptions::new().write(true).create_new(true).open(path)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    #[test]
    fn test_token_cache_path_uses_sixteen_hex_chars() {
        let store = CredentialStore::with_root("/tmp/mcpauth-test");
        let path = store.token_cache_path("https://api.example.com/mcp");
        let stem = path.file_stem().unwrap().to_string_lossy().to_string();
        assert_eq!(stem.len(), 16);
        assert!(stem.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(path.starts_with("/tmp/mcpauth-test/tokens"));
    }

    #[test]
    fn test_token_cache_path_is_deterministic() {
        let a = CredentialStore::with_root("/x");
        let b = CredentialStore::with_root("/x");
        let uri = "https://api.example.com/mcp";
        assert_eq!(a.token_cache_path(uri), b.token_cache_path(uri));
        assert_ne!(
            a.token_cache_path(uri),
            a.token_cache_path("https://other.example.com/mcp")
        );
    }

    #[test]
    fn test_registration_path_uses_full_digest() {
        let store = CredentialStore::with_root("/x");
        let path = store.registration_path("https://api.example.com");
        let stem = path.file_stem().unwrap().to_string_lossy().to_string();
        assert_eq!(stem.len(), 64);
        assert!(path.starts_with("/x/registrations"));
        // The token key is a prefix of the registration key.
        let token_stem = store
            .token_cache_path("https://api.example.com")
            .file_stem()
            .unwrap()
            .to_string_lossy()
            .to_string();
        assert!(stem.starts_with(&token_stem));
    }

    #[test]
    fn test_cache_keys_are_sha256_hex() {
        let store = CredentialStore::with_root("/x");
        let expected = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";
        assert_eq!(
            store.registration_path("abc"),
            Path::new("/x/registrations").join(format!("{expected}.json"))
        );
        assert_eq!(
            store.token_cache_path("abc"),
            Path::new("/x/tokens").join("ba7816bf8f01cfea.json")
        );
    }

    #[test]
    fn test_load_token_missing_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::with_root(dir.path());
        assert!(store.load_token("https://nothing.example.com").is_none());
    }

    #[test]
    fn test_load_token_ignores_other_resource() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::with_root(dir.path());
        let token = Token {
            access_token: "a".to_string(),
            refresh_token: None,
            token_type: "Bearer".to_string(),
            expiry: Some(Utc::now() + Duration::hours(1)),
            scopes: vec![],
        };
        let uri = "https://api.example.com";
        store.save_token(uri, &token).unwrap();

        // Simulate a collision by rewriting the stored resource URI.
        let path = store.token_cache_path(uri);
        let contents = fs::read_to_string(&path).unwrap();
        fs::write(&path, contents.replace(uri, "https://elsewhere.example.com")).unwrap();

        assert!(store.load_token(uri).is_none());
    }

    #[test]
    fn test_delete_missing_token_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::with_root(dir.path());
        store.delete_token("https://api.example.com").unwrap();
        store.delete_registration("https://api.example.com").unwrap();
    }

    #[test]
    fn test_write_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::with_root(dir.path());
        let token = Token {
            access_token: "a".to_string(),
            refresh_token: None,
            token_type: "Bearer".to_string(),
            expiry: None,
            scopes: vec![],
        };
        store.save_token("https://api.example.com", &token).unwrap();
        store.save_token("https://api.example.com", &token).unwrap();

        let entries: Vec<_> = fs::read_dir(dir.path().join(TOKENS_DIR))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(entries.len(), 1, "unexpected files: {entries:?}");
        assert!(entries[0].ends_with(".json"));
    }
}

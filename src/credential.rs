//! API key handling and persistence.
//!
//! The key is stored in a small JSON key-value file (`storage.json` under the
//! user config directory) so it survives between runs.

use crate::error::{PortraitVizError, Result};
use serde_json::{Map, Value};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Key under which the API key is persisted.
pub const CREDENTIAL_KEY: &str = "gemini_api_key";

/// Environment variable consulted when nothing is stored.
pub const CREDENTIAL_ENV_VAR: &str = "GOOGLE_API_KEY";

/// An API key. Opaque: its shape is never validated locally.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// Wraps a key, trimming surrounding whitespace.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into().trim().to_string())
    }

    /// The raw key, for request headers.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// True when no key was entered.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Key with everything but the last four characters hidden.
    pub fn masked(&self) -> String {
        let chars: Vec<char> = self.0.chars().collect();
        if chars.len() <= 4 {
            return "*".repeat(chars.len());
        }
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}{}", "*".repeat(chars.len() - 4), tail)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Credential").field(&"<redacted>").finish()
    }
}

/// Persistent storage for the single API key.
pub trait CredentialStore: Send + Sync {
    /// Returns the stored key, if any.
    fn get(&self) -> Result<Option<Credential>>;

    /// Stores `credential`, replacing any previous key.
    fn set(&self, credential: &Credential) -> Result<()>;

    /// Removes the stored key.
    fn clear(&self) -> Result<()>;

    /// Stored key, falling back to the `GOOGLE_API_KEY` environment variable.
    fn resolve(&self) -> Result<Option<Credential>> {
        if let Some(credential) = self.get()? {
            return Ok(Some(credential));
        }
        Ok(std::env::var(CREDENTIAL_ENV_VAR)
            .ok()
            .map(Credential::new)
            .filter(|c| !c.is_empty()))
    }
}

/// Returns the default storage path, `<config dir>/portraitviz/storage.json`.
pub fn default_storage_path() -> Result<PathBuf> {
    let base = dirs::config_dir().ok_or_else(|| {
        PortraitVizError::Config("could not determine the user config directory".into())
    })?;
    Ok(base.join("portraitviz").join("storage.json"))
}

/// Credential store backed by a JSON object file.
///
/// Other keys in the file are preserved on write.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    /// Creates a store reading and writing `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Creates a store at [`default_storage_path`].
    pub fn open_default() -> Result<Self> {
        Ok(Self::new(default_storage_path()?))
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<Map<String, Value>> {
        if !self.path.exists() {
            return Ok(Map::new());
        }
        let buf = fs::read(&self.path)?;
        if buf.iter().all(u8::is_ascii_whitespace) {
            return Ok(Map::new());
        }
        match serde_json::from_slice::<Value>(&buf)? {
            Value::Object(map) => Ok(map),
            _ => Err(PortraitVizError::Config(format!(
                "{} does not contain a JSON object",
                self.path.display()
            ))),
        }
    }

    fn store(&self, map: &Map<String, Value>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(map)?)?;

        // owner read/write only (600)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600))?;
        }
        Ok(())
    }
}

impl CredentialStore for FileCredentialStore {
    fn get(&self) -> Result<Option<Credential>> {
        let map = self.load()?;
        Ok(map
            .get(CREDENTIAL_KEY)
            .and_then(Value::as_str)
            .map(Credential::new)
            .filter(|c| !c.is_empty()))
    }

    fn set(&self, credential: &Credential) -> Result<()> {
        let mut map = self.load()?;
        map.insert(
            CREDENTIAL_KEY.to_string(),
            Value::String(credential.expose().to_string()),
        );
        self.store(&map)?;
        tracing::debug!(path = %self.path.display(), "saved API key");
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let mut map = self.load()?;
        if map.remove(CREDENTIAL_KEY).is_some() {
            self.store(&map)?;
        }
        Ok(())
    }
}

/// Credential store that lives only as long as the process.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    inner: Mutex<Option<Credential>>,
}

impl MemoryCredentialStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self) -> Result<Option<Credential>> {
        Ok(self.inner.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    fn set(&self, credential: &Credential) -> Result<()> {
        *self.inner.lock().unwrap_or_else(|e| e.into_inner()) = Some(credential.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.inner.lock().unwrap_or_else(|e| e.into_inner()) = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_credential_trims_and_masks() {
        let credential = Credential::new("  AIzaSyExample1234\n");
        assert_eq!(credential.expose(), "AIzaSyExample1234");
        assert_eq!(credential.masked(), "*************1234");
        assert_eq!(Credential::new("abc").masked(), "***");
        assert!(Credential::new("   ").is_empty());
    }

    #[test]
    fn test_credential_debug_is_redacted() {
        let credential = Credential::new("super-secret");
        assert!(!format!("{credential:?}").contains("super-secret"));
    }

    #[test]
    fn test_file_store_set_get_clear() {
        let dir = tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path().join("nested").join("storage.json"));

        assert_eq!(store.get().unwrap(), None);

        store.set(&Credential::new("first")).unwrap();
        assert_eq!(store.get().unwrap(), Some(Credential::new("first")));

        store.set(&Credential::new("second")).unwrap();
        assert_eq!(store.get().unwrap(), Some(Credential::new("second")));

        store.clear().unwrap();
        assert_eq!(store.get().unwrap(), None);
    }

    #[test]
    fn test_file_store_preserves_other_keys() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("storage.json");
        fs::write(&path, r#"{"theme": "dark"}"#).unwrap();

        let store = FileCredentialStore::new(&path);
        store.set(&Credential::new("key")).unwrap();

        let raw: Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(raw["theme"], "dark");
        assert_eq!(raw[CREDENTIAL_KEY], "key");
    }

    #[test]
    fn test_file_store_rejects_non_object() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("storage.json");
        fs::write(&path, "[1, 2, 3]").unwrap();

        let err = FileCredentialStore::new(&path).get().unwrap_err();
        assert!(matches!(err, PortraitVizError::Config(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_file_store_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path().join("storage.json"));
        store.set(&Credential::new("key")).unwrap();

        let mode = fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryCredentialStore::new();
        assert_eq!(store.get().unwrap(), None);
        store.set(&Credential::new("k")).unwrap();
        assert_eq!(store.get().unwrap(), Some(Credential::new("k")));
        store.clear().unwrap();
        assert_eq!(store.get().unwrap(), None);
    }
}

//! Layout storage on the local filesystem
//!
//! ```text
//! <root>/layouts/<encoded name>.toml   one file per layout
//! <root>/layout                        last-used layout name
//! <root>/settings.toml                 preferences
//! ```

use super::{Layout, LayoutError, LoadedLayout};
use crate::config::Preferences;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const LAYOUT_DIR: &str = "layouts";
const LAYOUT_EXTENSION: &str = "toml";
const POINTER_FILE: &str = "layout";
const PREFERENCES_FILE: &str = "settings.toml";

#[derive(Clone, Debug)]
pub struct LayoutStore {
    root: PathBuf,
}

impl LayoutStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn layouts_dir(&self) -> PathBuf {
        self.root.join(LAYOUT_DIR)
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.layouts_dir()
            .join(format!("{}.{}", encode_name(name), LAYOUT_EXTENSION))
    }

    pub async fn ensure_dirs(&self) -> Result<(), LayoutError> {
        let dir = self.layouts_dir();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| LayoutError::StorageWrite { path: dir, source: e })
    }

    /// Names of all stored layouts, sorted
    pub async fn list(&self) -> Result<Vec<String>, LayoutError> {
        let dir = self.layouts_dir();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(LayoutError::StorageRead { path: dir, source: e }),
        };

        let mut names = Vec::new();
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    return Err(LayoutError::StorageRead {
                        path: dir.clone(),
                        source: e,
                    })
                }
            };
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(LAYOUT_EXTENSION) {
                continue;
            }
            let decoded = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(decode_name);
            match decoded {
                Some(name) => names.push(name),
                None => debug!("Ignoring foreign file {}", path.display()),
            }
        }
        names.sort();
        Ok(names)
    }

    pub async fn exists(&self, name: &str) -> bool {
        tokio::fs::try_exists(self.path_for(name))
            .await
            .unwrap_or(false)
    }

    /// Reads and parses a stored layout; the result carries the requested name
    pub async fn read(&self, name: &str) -> Result<LoadedLayout, LayoutError> {
        let path = self.path_for(name);
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(LayoutError::NotFound(name.to_string()))
            }
            Err(e) => return Err(LayoutError::StorageRead { path, source: e }),
        };
        let mut loaded = Layout::from_toml(name, &text)?;
        loaded.layout.name = name.to_string();
        debug!("Read layout '{}' from {}", name, path.display());
        Ok(loaded)
    }

    /// Reads a layout file outside of storage
    pub async fn read_path(&self, path: &Path) -> Result<LoadedLayout, LayoutError> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| LayoutError::StorageRead {
                path: path.to_path_buf(),
                source: e,
            })?;
        Layout::from_toml(&path.display().to_string(), &text)
    }

    pub async fn write(&self, layout: &Layout) -> Result<PathBuf, LayoutError> {
        validate_name(&layout.name)?;
        self.ensure_dirs().await?;
        let path = self.path_for(&layout.name);
        self.write_path(layout, &path).await?;
        info!("Saved layout '{}' to {}", layout.name, path.display());
        Ok(path)
    }

    /// Writes through a temporary file so readers never see half a layout
    pub async fn write_path(&self, layout: &Layout, path: &Path) -> Result<(), LayoutError> {
        let write_error = |source: std::io::Error| LayoutError::StorageWrite {
            path: path.to_path_buf(),
            source,
        };
        let text = layout
            .to_toml()
            .map_err(|e| write_error(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;

        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        tokio::fs::write(&tmp, text).await.map_err(write_error)?;
        if let Err(e) = tokio::fs::rename(&tmp, path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(write_error(e));
        }
        Ok(())
    }

    pub async fn remove(&self, name: &str) -> Result<(), LayoutError> {
        let path = self.path_for(name);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                info!("Removed layout '{}'", name);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(LayoutError::NotFound(name.to_string()))
            }
            Err(e) => Err(LayoutError::StorageWrite { path, source: e }),
        }
    }

    pub async fn rename(&self, old: &str, new: &str) -> Result<(), LayoutError> {
        validate_name(new)?;
        if !self.exists(old).await {
            return Err(LayoutError::NotFound(old.to_string()));
        }
        if old != new && self.exists(new).await {
            return Err(LayoutError::AlreadyExists(new.to_string()));
        }
        let target = self.path_for(new);
        tokio::fs::rename(self.path_for(old), &target)
            .await
            .map_err(|e| LayoutError::StorageWrite {
                path: target,
                source: e,
            })?;
        info!("Renamed layout '{}' to '{}'", old, new);
        Ok(())
    }

    /// Copies a stored layout file to `dest`
    pub async fn export(&self, name: &str, dest: &Path) -> Result<(), LayoutError> {
        if !self.exists(name).await {
            return Err(LayoutError::NotFound(name.to_string()));
        }
        tokio::fs::copy(self.path_for(name), dest)
            .await
            .map_err(|e| LayoutError::StorageWrite {
                path: dest.to_path_buf(),
                source: e,
            })?;
        info!("Exported layout '{}' to {}", name, dest.display());
        Ok(())
    }

    pub async fn last_used(&self) -> Option<String> {
        let path = self.root.join(POINTER_FILE);
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => {
                let name = text.trim();
                (!name.is_empty()).then(|| name.to_string())
            }
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Failed to read {}: {}", path.display(), e);
                }
                None
            }
        }
    }

    pub async fn set_last_used(&self, name: &str) -> Result<(), LayoutError> {
        let path = self.root.join(POINTER_FILE);
        let write_error = |source| LayoutError::StorageWrite {
            path: path.clone(),
            source,
        };
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(write_error)?;
        tokio::fs::write(&path, format!("{}\n", name))
            .await
            .map_err(write_error)
    }

    pub async fn clear_last_used(&self) -> Result<(), LayoutError> {
        let path = self.root.join(POINTER_FILE);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(LayoutError::StorageWrite { path, source: e }),
        }
    }

    /// Missing or unreadable preferences fall back to defaults
    pub async fn load_preferences(&self) -> Preferences {
        let path = self.root.join(PREFERENCES_FILE);
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Failed to read {}: {}", path.display(), e);
                }
                return Preferences::default();
            }
        };
        toml::from_str(&text).unwrap_or_else(|e| {
            warn!("Ignoring malformed {}: {}", path.display(), e);
            Preferences::default()
        })
    }

    pub async fn save_preferences(&self, preferences: &Preferences) -> Result<(), LayoutError> {
        let path = self.root.join(PREFERENCES_FILE);
        let write_error = |source| LayoutError::StorageWrite {
            path: path.clone(),
            source,
        };
        let text = toml::to_string_pretty(preferences)
            .map_err(|e| write_error(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(write_error)?;
        tokio::fs::write(&path, text).await.map_err(write_error)
    }
}

pub fn validate_name(name: &str) -> Result<(), LayoutError> {
    if name.trim().is_empty() || name.chars().any(char::is_control) {
        return Err(LayoutError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Filesystem-safe, reversible form of a layout name
pub fn encode_name(name: &str) -> String {
    let mut encoded = String::with_capacity(name.len());
    for (i, byte) in name.bytes().enumerate() {
        let keep = byte.is_ascii_alphanumeric()
            || matches!(byte, b' ' | b'-' | b'_')
            || (byte == b'.' && i > 0);
        if keep {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("%{:02X}", byte));
        }
    }
    encoded
}

pub fn decode_name(encoded: &str) -> Option<String> {
    let bytes = encoded.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = std::str::from_utf8(bytes.get(i + 1..i + 3)?).ok()?;
            decoded.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            decoded.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(decoded).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceKey;
    use crate::mapping::{Binding, LogicalInput, Mapping, OutputAction};
    use tempfile::TempDir;

    fn sample(name: &str) -> Layout {
        let (mapping, _) = Mapping::from_bindings([Binding::new(
            LogicalInput::Button { index: 0 },
            OutputAction::Key { code: 57 },
        )])
        .unwrap();
        let mut layout = Layout::new(name);
        layout.set_mapping(DeviceKey::from("Pad#0"), Some(mapping));
        layout
    }

    #[test]
    fn name_encoding_is_reversible() {
        for name in ["Racing", "../etc/passwd", ".hidden", "a/b\\c", "Ünïcødé 50%", "v1.2"] {
            let encoded = encode_name(name);
            assert!(!encoded.contains('/'));
            assert!(!encoded.starts_with('.'));
            assert_eq!(decode_name(&encoded).as_deref(), Some(name));
        }
        assert_eq!(encode_name("v1.2"), "v1.2");
        assert_eq!(decode_name("bad%zz"), None);
    }

    #[tokio::test]
    async fn write_read_list() {
        let dir = TempDir::new().unwrap();
        let store = LayoutStore::new(dir.path());
        assert!(store.list().await.unwrap().is_empty());

        store.write(&sample("Racing")).await.unwrap();
        store.write(&sample("a/b")).await.unwrap();
        assert_eq!(store.list().await.unwrap(), vec!["Racing", "a/b"]);

        let loaded = store.read("Racing").await.unwrap();
        assert_eq!(loaded.layout, sample("Racing"));
    }

    #[tokio::test]
    async fn missing_and_corrupt_layouts() {
        let dir = TempDir::new().unwrap();
        let store = LayoutStore::new(dir.path());
        assert!(matches!(
            store.read("nope").await,
            Err(LayoutError::NotFound(_))
        ));

        store.ensure_dirs().await.unwrap();
        tokio::fs::write(store.path_for("Broken"), "name = [")
            .await
            .unwrap();
        assert!(matches!(
            store.read("Broken").await,
            Err(LayoutError::Parse { .. })
        ));
    }

    #[tokio::test]
    async fn rename_and_remove() {
        let dir = TempDir::new().unwrap();
        let store = LayoutStore::new(dir.path());
        store.write(&sample("One")).await.unwrap();
        store.write(&sample("Two")).await.unwrap();

        assert!(matches!(
            store.rename("One", "Two").await,
            Err(LayoutError::AlreadyExists(_))
        ));
        store.rename("One", "Three").await.unwrap();
        assert_eq!(store.read("Three").await.unwrap().layout.name, "Three");

        store.remove("Three").await.unwrap();
        assert!(matches!(
            store.remove("Three").await,
            Err(LayoutError::NotFound(_))
        ));
        assert_eq!(store.list().await.unwrap(), vec!["Two"]);
    }

    #[tokio::test]
    async fn pointer_and_preferences() {
        let dir = TempDir::new().unwrap();
        let store = LayoutStore::new(dir.path().join("nested"));
        assert_eq!(store.last_used().await, None);
        store.set_last_used("Racing").await.unwrap();
        assert_eq!(store.last_used().await.as_deref(), Some("Racing"));
        store.clear_last_used().await.unwrap();
        assert_eq!(store.last_used().await, None);

        let mut prefs = store.load_preferences().await;
        prefs.show_tool_bar = false;
        store.save_preferences(&prefs).await.unwrap();
        assert_eq!(store.load_preferences().await, prefs);
    }

    #[tokio::test]
    async fn invalid_names_are_rejected() {
        let dir = TempDir::new().unwrap();
        let store = LayoutStore::new(dir.path());
        assert!(matches!(
            store.write(&sample("  ")).await,
            Err(LayoutError::InvalidName(_))
        ));
    }
}

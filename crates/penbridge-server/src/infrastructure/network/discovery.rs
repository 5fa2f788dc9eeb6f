//! File-system discovery registry for current-protocol servers.
//!
//! Servers advertise themselves by writing a small descriptor into a shared
//! directory; clients list that directory or follow the default pointer:
//!
//! ```text
//! <root>/
//!   default.txt              implementation id, no trailing newline
//!   available/
//!     <implementation id>.txt
//! ```
//!
//! A descriptor is `KEY=value` lines:
//!
//! ```text
//! ID=com.example.driver
//! SOCKET=/run/user/1000/example/socket
//! HUMAN_READABLE_NAME=Example Driver
//! HUMAN_READABLE_VERSION=1.2.3
//! COMPATIBILITY_VERSION=1
//! HOMEPAGE=https://example.com
//! ```
//!
//! There is no locking.  Two servers racing on `default.txt` under
//! [`DefaultBehavior::SetIfUnset`] may both see it missing; whichever writes
//! last wins.
//!
//! The root defaults to:
//! - Windows:  `%LOCALAPPDATA%\otd-ipc\servers\v2`
//! - Linux:    `$XDG_DATA_HOME/otd-ipc/servers/v2` or `~/.local/share/...`
//! - macOS:    `~/Library/Application Support/otd-ipc/servers/v2`

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

const AVAILABLE_DIR: &str = "available";
const DEFAULT_FILE: &str = "default.txt";
const DESCRIPTOR_EXTENSION: &str = "txt";

/// Error type for discovery registry operations.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// No per-user data directory could be derived from the environment.
    #[error("could not determine platform data directory for discovery")]
    NoPlatformDataDir,

    /// The id cannot be used as a file name.
    #[error("implementation id {0:?} is not usable as a file name")]
    InvalidImplementationId(String),

    #[error("I/O error accessing discovery file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed discovery descriptor {path}: {reason}")]
    MalformedDescriptor { path: PathBuf, reason: String },
}

/// Policy for the `default.txt` pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DefaultBehavior {
    /// Write the pointer only if no pointer file exists yet.
    #[default]
    SetIfUnset,
    /// Never touch the pointer.
    DoNotSet,
    /// Always overwrite the pointer.
    AlwaysSet,
}

/// What one server publishes about itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryRecord {
    pub implementation_id: String,
    pub socket_path: PathBuf,
    pub human_readable_name: String,
    pub human_readable_version: String,
    pub compatibility_version: u8,
    pub homepage: String,
}

impl DiscoveryRecord {
    /// Renders the descriptor file contents.
    pub fn to_descriptor(&self) -> String {
        format!(
            "ID={}\nSOCKET={}\nHUMAN_READABLE_NAME={}\nHUMAN_READABLE_VERSION={}\nCOMPATIBILITY_VERSION={}\nHOMEPAGE={}\n",
            self.implementation_id,
            generic_path(&self.socket_path),
            self.human_readable_name,
            self.human_readable_version,
            self.compatibility_version,
            self.homepage,
        )
    }

    /// Parses descriptor contents.  Unknown keys are ignored; `HOMEPAGE`
    /// may be absent.
    pub fn parse(text: &str, path: &Path) -> Result<Self, DiscoveryError> {
        let malformed = |reason: String| DiscoveryError::MalformedDescriptor {
            path: path.to_path_buf(),
            reason,
        };

        let mut id = None;
        let mut socket = None;
        let mut name = None;
        let mut version = None;
        let mut compat = None;
        let mut homepage = String::new();

        for line in text.lines() {
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                return Err(malformed(format!("line without '=': {line:?}")));
            };
            match key {
                "ID" => id = Some(value.to_string()),
                "SOCKET" => socket = Some(PathBuf::from(value)),
                "HUMAN_READABLE_NAME" => name = Some(value.to_string()),
                "HUMAN_READABLE_VERSION" => version = Some(value.to_string()),
                "COMPATIBILITY_VERSION" => {
                    compat = Some(value.parse::<u8>().map_err(|e| {
                        malformed(format!("COMPATIBILITY_VERSION {value:?}: {e}"))
                    })?)
                }
                "HOMEPAGE" => homepage = value.to_string(),
                other => debug!("ignoring unknown discovery key {other}"),
            }
        }

        Ok(Self {
            implementation_id: id.ok_or_else(|| malformed("missing ID".to_string()))?,
            socket_path: socket.ok_or_else(|| malformed("missing SOCKET".to_string()))?,
            human_readable_name: name.unwrap_or_default(),
            human_readable_version: version.unwrap_or_default(),
            compatibility_version: compat
                .ok_or_else(|| malformed("missing COMPATIBILITY_VERSION".to_string()))?,
            homepage,
        })
    }
}

/// A discovery registry rooted at one directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discovery {
    root: PathBuf,
}

impl Discovery {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The registry at the platform's well-known location.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::NoPlatformDataDir`] when the base directory
    /// cannot be derived from the environment.
    pub fn platform_default() -> Result<Self, DiscoveryError> {
        platform_discovery_root()
            .map(Self::new)
            .ok_or(DiscoveryError::NoPlatformDataDir)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn default_path(&self) -> PathBuf {
        self.root.join(DEFAULT_FILE)
    }

    pub fn descriptor_path(&self, implementation_id: &str) -> PathBuf {
        self.root
            .join(AVAILABLE_DIR)
            .join(format!("{implementation_id}.{DESCRIPTOR_EXTENSION}"))
    }

    /// Writes the descriptor for `record`, then applies `behavior` to the
    /// default pointer.
    ///
    /// # Errors
    ///
    /// Any failure to create directories or write files is returned; a server
    /// that cannot be discovered is not started.
    pub fn publish(
        &self,
        record: &DiscoveryRecord,
        behavior: DefaultBehavior,
    ) -> Result<(), DiscoveryError> {
        validate_id(&record.implementation_id)?;

        let available = self.root.join(AVAILABLE_DIR);
        std::fs::create_dir_all(&available).map_err(|source| DiscoveryError::Io {
            path: available.clone(),
            source,
        })?;

        let descriptor = self.descriptor_path(&record.implementation_id);
        write_file(&descriptor, record.to_descriptor().as_bytes())?;
        info!(
            "published discovery descriptor {}",
            descriptor.display()
        );

        let default_path = self.default_path();
        let write_default = match behavior {
            DefaultBehavior::DoNotSet => false,
            DefaultBehavior::AlwaysSet => true,
            DefaultBehavior::SetIfUnset => !default_path.exists(),
        };
        if write_default {
            write_file(&default_path, record.implementation_id.as_bytes())?;
            info!(
                "set default implementation to {}",
                record.implementation_id
            );
        } else {
            debug!(?behavior, "leaving default implementation pointer unchanged");
        }
        Ok(())
    }

    /// Removes the descriptor for `implementation_id`.  The default pointer
    /// is left alone.  A missing descriptor is not an error.
    pub fn unpublish(&self, implementation_id: &str) -> Result<(), DiscoveryError> {
        validate_id(implementation_id)?;
        let path = self.descriptor_path(implementation_id);
        match std::fs::remove_file(&path) {
            Ok(()) => {
                info!("removed discovery descriptor {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(DiscoveryError::Io { path, source }),
        }
    }

    /// The default implementation id, or `None` if no pointer exists.
    pub fn read_default(&self) -> Result<Option<String>, DiscoveryError> {
        let path = self.default_path();
        match std::fs::read_to_string(&path) {
            Ok(content) => {
                let id = content.trim();
                Ok((!id.is_empty()).then(|| id.to_string()))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(source) => Err(DiscoveryError::Io { path, source }),
        }
    }

    pub fn read_descriptor(&self, implementation_id: &str) -> Result<DiscoveryRecord, DiscoveryError> {
        validate_id(implementation_id)?;
        let path = self.descriptor_path(implementation_id);
        let text = std::fs::read_to_string(&path).map_err(|source| DiscoveryError::Io {
            path: path.clone(),
            source,
        })?;
        DiscoveryRecord::parse(&text, &path)
    }

    /// Descriptor of the default implementation, if a pointer exists.
    pub fn resolve_default(&self) -> Result<Option<DiscoveryRecord>, DiscoveryError> {
        match self.read_default()? {
            Some(id) => self.read_descriptor(&id).map(Some),
            None => Ok(None),
        }
    }

    /// Every readable descriptor in `available/`, sorted by id.
    ///
    /// Malformed descriptors are skipped with a warning.
    pub fn list_available(&self) -> Result<Vec<DiscoveryRecord>, DiscoveryError> {
        let dir = self.root.join(AVAILABLE_DIR);
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(DiscoveryError::Io { path: dir, source }),
        };

        let mut records = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| DiscoveryError::Io {
                path: dir.clone(),
                source,
            })?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(DESCRIPTOR_EXTENSION) {
                continue;
            }
            let parsed = std::fs::read_to_string(&path)
                .map_err(|source| DiscoveryError::Io {
                    path: path.clone(),
                    source,
                })
                .and_then(|text| DiscoveryRecord::parse(&text, &path));
            match parsed {
                Ok(record) => records.push(record),
                Err(e) => warn!("skipping discovery descriptor: {e}"),
            }
        }
        records.sort_by(|a, b| a.implementation_id.cmp(&b.implementation_id));
        Ok(records)
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn validate_id(id: &str) -> Result<(), DiscoveryError> {
    let bad = id.is_empty()
        || id == "."
        || id == ".."
        || id.chars().any(|c| matches!(c, '/' | '\\' | ':' | '\0' | '\n' | '\r'));
    if bad {
        Err(DiscoveryError::InvalidImplementationId(id.to_string()))
    } else {
        Ok(())
    }
}

fn write_file(path: &Path, contents: &[u8]) -> Result<(), DiscoveryError> {
    std::fs::write(path, contents).map_err(|source| DiscoveryError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Absolute path with `/` separators on every platform.
fn generic_path(path: &Path) -> String {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };
    let text = absolute.to_string_lossy();
    if cfg!(windows) {
        text.replace('\\', "/")
    } else {
        text.into_owned()
    }
}

/// Resolves `<data dir>/otd-ipc/servers/v2` for the current platform.
fn platform_discovery_root() -> Option<PathBuf> {
    let suffix = Path::new("otd-ipc").join("servers").join("v2");

    #[cfg(target_os = "windows")]
    {
        std::env::var_os("LOCALAPPDATA").map(|p| PathBuf::from(p).join(suffix))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".local").join("share"))
            })?;
        Some(base.join(suffix))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join(suffix)
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        let _ = suffix;
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_registry() -> Discovery {
        Discovery::new(std::env::temp_dir().join(format!("penbridge_disc_{}", uuid::Uuid::new_v4())))
    }

    fn record(id: &str) -> DiscoveryRecord {
        DiscoveryRecord {
            implementation_id: id.to_string(),
            socket_path: PathBuf::from("/tmp/example/socket"),
            human_readable_name: "Example Driver".to_string(),
            human_readable_version: "1.2.3".to_string(),
            compatibility_version: 1,
            homepage: "https://example.com".to_string(),
        }
    }

    #[test]
    fn test_descriptor_has_expected_keys() {
        // Arrange / Act
        let text = record("com.example.driver").to_descriptor();

        // Assert
        let keys: Vec<&str> = text
            .lines()
            .filter_map(|l| l.split_once('=').map(|(k, _)| k))
            .collect();
        assert_eq!(
            keys,
            [
                "ID",
                "SOCKET",
                "HUMAN_READABLE_NAME",
                "HUMAN_READABLE_VERSION",
                "COMPATIBILITY_VERSION",
                "HOMEPAGE"
            ]
        );
        assert!(text.contains("COMPATIBILITY_VERSION=1\n"));
    }

    #[cfg(unix)]
    #[test]
    fn test_descriptor_round_trips_through_parse() {
        let original = record("com.example.driver");
        let parsed =
            DiscoveryRecord::parse(&original.to_descriptor(), Path::new("x.txt")).unwrap();
        assert_eq!(parsed, original);
    }

    #[test]
    fn test_parse_rejects_missing_socket() {
        let result = DiscoveryRecord::parse("ID=a\nCOMPATIBILITY_VERSION=1\n", Path::new("a.txt"));
        assert!(matches!(
            result,
            Err(DiscoveryError::MalformedDescriptor { .. })
        ));
    }

    #[test]
    fn test_parse_tolerates_crlf_and_unknown_keys() {
        let text = "ID=a\r\nSOCKET=/s\r\nEXTRA=1\r\nCOMPATIBILITY_VERSION=2\r\n";
        let parsed = DiscoveryRecord::parse(text, Path::new("a.txt")).unwrap();
        assert_eq!(parsed.implementation_id, "a");
        assert_eq!(parsed.compatibility_version, 2);
        assert_eq!(parsed.homepage, "");
    }

    #[test]
    fn test_set_if_unset_keeps_first_id() {
        // Arrange
        let registry = temp_registry();

        // Act
        registry
            .publish(&record("first.impl"), DefaultBehavior::SetIfUnset)
            .unwrap();
        registry
            .publish(&record("second.impl"), DefaultBehavior::SetIfUnset)
            .unwrap();

        // Assert
        assert_eq!(registry.read_default().unwrap().as_deref(), Some("first.impl"));
        std::fs::remove_dir_all(registry.root()).ok();
    }

    #[test]
    fn test_always_set_takes_second_id() {
        let registry = temp_registry();
        registry
            .publish(&record("first.impl"), DefaultBehavior::AlwaysSet)
            .unwrap();
        registry
            .publish(&record("second.impl"), DefaultBehavior::AlwaysSet)
            .unwrap();
        assert_eq!(registry.read_default().unwrap().as_deref(), Some("second.impl"));
        std::fs::remove_dir_all(registry.root()).ok();
    }

    #[test]
    fn test_do_not_set_never_writes_pointer() {
        let registry = temp_registry();
        registry
            .publish(&record("only.impl"), DefaultBehavior::DoNotSet)
            .unwrap();
        assert_eq!(registry.read_default().unwrap(), None);
        assert!(registry.descriptor_path("only.impl").exists());
        std::fs::remove_dir_all(registry.root()).ok();
    }

    #[test]
    fn test_default_file_has_no_trailing_newline() {
        let registry = temp_registry();
        registry
            .publish(&record("com.example.driver"), DefaultBehavior::AlwaysSet)
            .unwrap();
        let raw = std::fs::read(registry.default_path()).unwrap();
        assert_eq!(raw, b"com.example.driver");
        std::fs::remove_dir_all(registry.root()).ok();
    }

    #[test]
    fn test_unpublish_removes_descriptor_but_not_default() {
        let registry = temp_registry();
        registry
            .publish(&record("a.impl"), DefaultBehavior::AlwaysSet)
            .unwrap();

        registry.unpublish("a.impl").unwrap();
        registry.unpublish("a.impl").unwrap();

        assert!(!registry.descriptor_path("a.impl").exists());
        assert_eq!(registry.read_default().unwrap().as_deref(), Some("a.impl"));
        std::fs::remove_dir_all(registry.root()).ok();
    }

    #[test]
    fn test_list_available_is_sorted_and_skips_garbage() {
        let registry = temp_registry();
        registry
            .publish(&record("b.impl"), DefaultBehavior::DoNotSet)
            .unwrap();
        registry
            .publish(&record("a.impl"), DefaultBehavior::DoNotSet)
            .unwrap();
        std::fs::write(registry.descriptor_path("broken"), "garbage").unwrap();

        let ids: Vec<String> = registry
            .list_available()
            .unwrap()
            .into_iter()
            .map(|r| r.implementation_id)
            .collect();

        assert_eq!(ids, ["a.impl", "b.impl"]);
        std::fs::remove_dir_all(registry.root()).ok();
    }

    #[test]
    fn test_list_available_on_missing_root_is_empty() {
        let registry = temp_registry();
        assert!(registry.list_available().unwrap().is_empty());
        assert_eq!(registry.resolve_default().unwrap(), None);
    }

    #[test]
    fn test_invalid_ids_are_rejected() {
        let registry = temp_registry();
        for id in ["", "..", "a/b", "a\\b"] {
            assert!(matches!(
                registry.publish(&record(id), DefaultBehavior::DoNotSet),
                Err(DiscoveryError::InvalidImplementationId(_))
            ));
        }
    }

    #[test]
    fn test_publish_into_unwritable_root_fails() {
        // A regular file where the root directory should be.
        let file = std::env::temp_dir().join(format!("penbridge_file_{}", uuid::Uuid::new_v4()));
        std::fs::write(&file, b"x").unwrap();
        let registry = Discovery::new(&file);

        let result = registry.publish(&record("x.impl"), DefaultBehavior::AlwaysSet);

        assert!(matches!(result, Err(DiscoveryError::Io { .. })));
        std::fs::remove_file(&file).ok();
    }
}

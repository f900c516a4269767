//! Where Tether keeps its files.
//!
//! The config file lives under the OS config directory; the credential store
//! and rotated logs under the OS data directory. `TETHER_CONFIG_DIR` and
//! `TETHER_DATA_DIR` override either one.

use std::path::{Path, PathBuf};

use crate::constants::APP_NAME;
use crate::error::{TetherError, TetherResult};

pub const CONFIG_DIR_ENV: &str = "TETHER_CONFIG_DIR";
pub const DATA_DIR_ENV: &str = "TETHER_DATA_DIR";

const CONFIG_FILE_NAME: &str = "config.toml";
const LOG_DIR_NAME: &str = "logs";

/// Resolved config and data directories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    config_dir: PathBuf,
    data_dir: PathBuf,
}

impl AppPaths {
    /// Directories from the environment, falling back to the OS defaults
    /// (`~/.config/Tether`, `~/Library/Application Support/Tether`,
    /// `%APPDATA%\Tether` and so on).
    pub fn resolve() -> TetherResult<Self> {
        Self::from_overrides(env_dir(CONFIG_DIR_ENV), env_dir(DATA_DIR_ENV))
    }

    /// Use the given directories where present, OS defaults otherwise.
    pub fn from_overrides(
        config_dir: Option<PathBuf>,
        data_dir: Option<PathBuf>,
    ) -> TetherResult<Self> {
        let config_dir = match config_dir {
            Some(dir) => dir,
            None => os_dir(dirs::config_dir(), "config")?,
        };
        let data_dir = match data_dir {
            Some(dir) => dir,
            None => os_dir(dirs::data_dir(), "data")?,
        };
        Ok(Self {
            config_dir,
            data_dir,
        })
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE_NAME)
    }

    /// The key-value store file holding credentials and cached responses.
    pub fn store_file(&self, file_name: &str) -> PathBuf {
        self.data_dir.join(file_name)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join(LOG_DIR_NAME)
    }
}

/// Create `dir` if missing, readable only by the current user.
///
/// Existing directories keep their permissions.
pub fn ensure_private_dir(dir: &Path) -> TetherResult<()> {
    if dir.as_os_str().is_empty() || dir.exists() {
        return Ok(());
    }
    std::fs::create_dir_all(dir)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))?;
    }
    Ok(())
}

/// Operating system name for diagnostics.
pub fn os_name() -> &'static str {
    match std::env::consts::OS {
        "macos" => "macOS",
        "windows" => "Windows",
        "linux" => "Linux",
        other => other,
    }
}

fn env_dir(var: &str) -> Option<PathBuf> {
    std::env::var_os(var)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}

fn os_dir(base: Option<PathBuf>, kind: &str) -> TetherResult<PathBuf> {
    base.map(|dir| dir.join(APP_NAME))
        .ok_or_else(|| TetherError::Config(format!("could not determine {kind} directory")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_place_every_file() {
        let paths = AppPaths::from_overrides(
            Some(PathBuf::from("/etc/tether")),
            Some(PathBuf::from("/var/lib/tether")),
        )
        .unwrap();
        assert_eq!(paths.config_file(), PathBuf::from("/etc/tether/config.toml"));
        assert_eq!(
            paths.store_file("store.json"),
            PathBuf::from("/var/lib/tether/store.json")
        );
        assert_eq!(paths.log_dir(), PathBuf::from("/var/lib/tether/logs"));
    }

    #[test]
    fn test_ensure_private_dir_creates_nested() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("a").join("b");
        ensure_private_dir(&dir).unwrap();
        assert!(dir.is_dir());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&dir).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o700);
        }
    }

    #[test]
    fn test_ensure_private_dir_leaves_existing_alone() {
        let root = tempfile::tempdir().unwrap();
        let before = std::fs::metadata(root.path()).unwrap().permissions();
        ensure_private_dir(root.path()).unwrap();
        assert_eq!(std::fs::metadata(root.path()).unwrap().permissions(), before);
    }

    #[test]
    fn test_os_name() {
        assert!(!os_name().is_empty());
    }
}

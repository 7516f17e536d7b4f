use anyhow::{Context, Result};
use etcetera::app_strategy::{AppStrategy, AppStrategyArgs};
use std::fs;
use std::path::{Path, PathBuf};

// Choose the Strategy based on OS
// Windows -> AppData\Roaming\vbyt
#[cfg(target_os = "windows")]
use etcetera::app_strategy::Windows as Strategy;

// Mac & Linux -> ~/.config/vbyt
#[cfg(not(target_os = "windows"))]
use etcetera::app_strategy::Xdg as Strategy;

/// Every filesystem location the tool touches outside of user-supplied paths.
#[derive(Debug, Clone)]
pub struct AppPaths {
    pub config_dir: PathBuf,
    pub config_file: PathBuf,
    pub client_secret_file: PathBuf,
    pub token_file: PathBuf,
    pub lock_file: PathBuf,
}

impl AppPaths {
    pub fn init() -> Result<Self> {
        let args = AppStrategyArgs {
            top_level_domain: "com".to_string(),
            author: "vbyt".to_string(),
            app_name: "vbyt".to_string(),
        };

        let strategy =
            Strategy::new(args).map_err(|_| anyhow::anyhow!("Could not determine system paths"))?;

        Self::in_dir(strategy.config_dir())
    }

    /// Roots all paths in `dir`, creating it if needed.
    pub fn in_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let config_dir = dir.as_ref().to_path_buf();

        fs::create_dir_all(&config_dir)
            .with_context(|| format!("failed to create config dir: {}", config_dir.display()))?;

        Ok(Self {
            config_file: config_dir.join("config.json"),
            client_secret_file: config_dir.join("client_secret.json"),
            token_file: config_dir.join("token.json"),
            lock_file: config_dir.join("auth.lock"),
            config_dir,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_dir_roots_every_path() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("nested").join("vbyt");
        let paths = AppPaths::in_dir(&root).unwrap();

        assert!(root.is_dir());
        assert_eq!(paths.config_dir, root);
        for p in [
            &paths.config_file,
            &paths.client_secret_file,
            &paths.token_file,
            &paths.lock_file,
        ] {
            assert_eq!(p.parent(), Some(root.as_path()));
        }
    }
}

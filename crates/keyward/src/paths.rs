use directories::ProjectDirs;
use eyre::ContextCompat as _;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct GatewayPaths {
    pub config_dir: PathBuf,
    pub data_dir: PathBuf,
    pub log_file: PathBuf,
    pub audit_file: PathBuf,
}

impl GatewayPaths {
    pub fn discover() -> eyre::Result<Self> {
        // Test/CI override knobs.
        if let (Ok(data_dir), Ok(config_dir)) = (
            std::env::var("KEYWARD_DATA_DIR"),
            std::env::var("KEYWARD_CONFIG_DIR"),
        ) {
            let data_dir = PathBuf::from(data_dir);
            let config_dir = PathBuf::from(config_dir);
            return Ok(Self::from_dirs(config_dir, data_dir));
        }

        // Default locations:
        // macOS: ~/Library/Application Support/keyward
        // Linux: ~/.config/keyward
        // Windows: %APPDATA%\\keyward
        let proj = ProjectDirs::from("", "", "keyward").context("failed to resolve project dirs")?;
        Ok(Self::from_dirs(
            proj.config_dir().to_path_buf(),
            proj.data_dir().to_path_buf(),
        ))
    }

    fn from_dirs(config_dir: PathBuf, data_dir: PathBuf) -> Self {
        let log_file = data_dir.join("keyward.log.jsonl");
        let audit_file = data_dir.join("keyward.audit.jsonl");
        Self {
            config_dir,
            data_dir,
            log_file,
            audit_file,
        }
    }

    pub fn users_file(&self) -> PathBuf {
        self.config_dir.join("users.json")
    }

    pub fn ensure_private_dirs(&self) -> eyre::Result<()> {
        crate::fsutil::ensure_private_dir(&self.config_dir)?;
        crate::fsutil::ensure_private_dir(&self.data_dir)?;
        Ok(())
    }
}

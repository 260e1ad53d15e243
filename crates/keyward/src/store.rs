use crate::{config::GatewayConfig, paths::GatewayPaths};
use eyre::Context as _;
use std::{fs, path::PathBuf};

#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

/// Apply environment variable overrides to the config (endpoints, identity).
fn apply_env_overrides(cfg: &mut GatewayConfig) {
    /// Helper: if an env var is set and non-empty, apply `setter` with the trimmed value.
    fn apply_env(var: &str, setter: impl FnOnce(&str)) {
        if let Ok(u) = std::env::var(var) {
            let t = u.trim();
            if !t.is_empty() {
                setter(t);
            }
        }
    }

    apply_env("KEYWARD_KMS_BASE_URL", |v| {
        v.clone_into(&mut cfg.kms.base_url);
    });
    apply_env("KEYWARD_MFA_BASE_URL", |v| {
        v.clone_into(&mut cfg.mfa.base_url);
    });
    apply_env("KEYWARD_USERNAME", |v| {
        v.clone_into(&mut cfg.username);
    });
}

impl ConfigStore {
    pub fn new(paths: &GatewayPaths) -> Self {
        Self {
            path: paths.config_dir.join("config.toml"),
        }
    }

    pub fn load_or_init_default(&self) -> eyre::Result<GatewayConfig> {
        if !self.path.exists() {
            let mut cfg = GatewayConfig::default();
            apply_env_overrides(&mut cfg);
            self.save(&cfg)?;
            return Ok(cfg);
        }

        let s = fs::read_to_string(&self.path).context("read config.toml")?;
        let mut cfg: GatewayConfig = toml::from_str(&s).context("parse config.toml")?;
        apply_env_overrides(&mut cfg);
        Ok(cfg)
    }

    pub fn save(&self, cfg: &GatewayConfig) -> eyre::Result<()> {
        if let Some(parent) = self.path.parent() {
            crate::fsutil::ensure_private_dir(parent)?;
        }
        let s = toml::to_string_pretty(cfg).context("serialize config.toml")?;
        crate::fsutil::write_string_atomic_restrictive(
            &self.path,
            &s,
            crate::fsutil::MODE_FILE_PRIVATE,
        )
        .context("write config.toml")?;
        Ok(())
    }
}

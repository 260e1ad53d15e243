//! Quick self-diagnostic report (safe to paste; contains no secrets).

use crate::{config::GatewayConfig, paths::GatewayPaths};
use eyre::Context as _;
use serde_json::json;
use std::io::Write as _;
use std::path::{Path, PathBuf};

struct ConfigReport {
    path: PathBuf,
    exists: bool,
    parse_ok: bool,
    error: Option<String>,
    username: Option<String>,
    chain_count: usize,
    bad_rpc_urls: Vec<String>,
    kms_url_ok: Option<bool>,
    mfa_url_ok: Option<bool>,
}

struct DirectoryReport {
    users_path: PathBuf,
    users_exists: bool,
    user_count: Option<usize>,
}

struct DoctorReport {
    version: &'static str,
    paths: GatewayPaths,
    config: ConfigReport,
    directory: DirectoryReport,
    lock_exists: bool,
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_owned())
        .filter(|s| !s.is_empty())
}

/// `https` everywhere, `http` only for loopback.
fn url_is_sane(url: &str) -> bool {
    let t = url.trim();
    t.starts_with("https://")
        || t.starts_with("http://localhost")
        || t.starts_with("http://127.0.0.1")
}

fn try_parse_config(path: &Path) -> eyre::Result<GatewayConfig> {
    let s = std::fs::read_to_string(path).context("read config.toml")?;
    toml::from_str(&s).context("parse config.toml")
}

fn collect(paths: &GatewayPaths) -> DoctorReport {
    let config_path = paths.config_dir.join("config.toml");
    let config_exists = config_path.exists();
    let (parse_ok, error, cfg) = if config_exists {
        match try_parse_config(&config_path) {
            Ok(cfg) => (true, None, Some(cfg)),
            Err(e) => (false, Some(format!("{e:#}")), None),
        }
    } else {
        (false, None, None)
    };

    let bad_rpc_urls = cfg.as_ref().map_or_else(Vec::new, |c| {
        c.chains
            .iter()
            .filter(|e| !url_is_sane(&e.rpc_url))
            .map(|e| format!("{} ({})", e.name, e.rpc_url))
            .collect()
    });

    let users_path = paths.users_file();
    let users_exists = users_path.exists();
    let user_count = if users_exists {
        std::fs::read_to_string(&users_path)
            .ok()
            .and_then(|s| serde_json::from_str::<Vec<serde_json::Value>>(&s).ok())
            .map(|v| v.len())
    } else {
        None
    };

    DoctorReport {
        version: env!("CARGO_PKG_VERSION"),
        paths: paths.clone(),
        config: ConfigReport {
            path: config_path,
            exists: config_exists,
            parse_ok,
            error,
            username: cfg.as_ref().map(|c| c.username.clone()),
            chain_count: cfg.as_ref().map_or(0, |c| c.chains.len()),
            bad_rpc_urls,
            kms_url_ok: cfg.as_ref().map(|c| url_is_sane(&c.kms.base_url)),
            mfa_url_ok: cfg.as_ref().map(|c| url_is_sane(&c.mfa.base_url)),
        },
        directory: DirectoryReport {
            users_path,
            users_exists,
            user_count,
        },
        lock_exists: paths.data_dir.join("keyward.lock").exists(),
    }
}

fn report_json(r: &DoctorReport) -> serde_json::Value {
    json!({
        "ok": true,
        "version": r.version,
        "paths": {
            "config_dir": r.paths.config_dir,
            "data_dir": r.paths.data_dir,
            "log_file": r.paths.log_file,
            "audit_file": r.paths.audit_file,
        },
        "config": {
            "path": r.config.path,
            "exists": r.config.exists,
            "parse_ok": r.config.parse_ok,
            "error": r.config.error,
            "username": r.config.username,
            "chain_count": r.config.chain_count,
            "bad_rpc_urls": r.config.bad_rpc_urls,
            "kms_url_ok": r.config.kms_url_ok,
            "mfa_url_ok": r.config.mfa_url_ok,
        },
        "directory": {
            "users_path": r.directory.users_path,
            "users_exists": r.directory.users_exists,
            "user_count": r.directory.user_count,
        },
        "serve_lock_exists": r.lock_exists,
        "env": {
            "KEYWARD_CONFIG_DIR": env_opt("KEYWARD_CONFIG_DIR"),
            "KEYWARD_DATA_DIR": env_opt("KEYWARD_DATA_DIR"),
            "KEYWARD_USERNAME": env_opt("KEYWARD_USERNAME"),
            "KEYWARD_KMS_BASE_URL": env_opt("KEYWARD_KMS_BASE_URL"),
            "KEYWARD_MFA_BASE_URL": env_opt("KEYWARD_MFA_BASE_URL"),
        },
    })
}

fn print_human(out: &mut impl std::io::Write, r: &DoctorReport) -> eyre::Result<()> {
    writeln!(out, "keyward doctor v{}", r.version)?;
    writeln!(out, "  config dir: {}", r.paths.config_dir.display())?;
    writeln!(out, "  data dir:   {}", r.paths.data_dir.display())?;
    writeln!(
        out,
        "  config:     {} (exists: {}, parse_ok: {})",
        r.config.path.display(),
        r.config.exists,
        r.config.parse_ok
    )?;
    if let Some(e) = &r.config.error {
        writeln!(out, "    error: {e}")?;
    }
    if let Some(u) = &r.config.username {
        writeln!(out, "    username: {u}")?;
    }
    writeln!(out, "    chains: {}", r.config.chain_count)?;
    for bad in &r.config.bad_rpc_urls {
        writeln!(out, "    insecure rpc url: {bad}")?;
    }
    writeln!(
        out,
        "  users file: {} (exists: {}, users: {})",
        r.directory.users_path.display(),
        r.directory.users_exists,
        r.directory
            .user_count
            .map_or_else(|| "?".to_owned(), |n| n.to_string())
    )?;
    writeln!(out, "  serve lock present: {}", r.lock_exists)?;
    Ok(())
}

pub fn run(as_json: bool) -> eyre::Result<()> {
    let paths = GatewayPaths::discover()?;
    let report = collect(&paths);
    let mut out = std::io::stdout().lock();
    if as_json {
        let s = serde_json::to_string_pretty(&report_json(&report)).context("serialize report")?;
        writeln!(out, "{s}").context("write report")?;
    } else {
        print_human(&mut out, &report)?;
    }
    Ok(())
}

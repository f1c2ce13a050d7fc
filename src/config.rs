use anyhow::{Context, Result, bail};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::client::ClientConfig;
use crate::elements::ElementNames;

#[derive(Debug, Default)]
struct RcConfig {
    address: Option<String>,
    timeout: Option<String>,
    pool_size: Option<String>,
    connect_retries: Option<String>,
    element_names: Option<String>,
}

impl RcConfig {
    fn slot(&mut self, key: &str) -> Option<&mut Option<String>> {
        match key {
            "address" => Some(&mut self.address),
            "timeout" => Some(&mut self.timeout),
            "pool_size" => Some(&mut self.pool_size),
            "connect_retries" => Some(&mut self.connect_retries),
            "element_names" => Some(&mut self.element_names),
            _ => None,
        }
    }
}

pub(crate) fn load_config(address: Option<String>) -> Result<ClientConfig> {
    let mut address = address.or_else(|| env_var("GDS_ADDRESS"));
    let mut timeout = env_var("GDS_TIMEOUT");
    let mut pool_size = env_var("GDS_POOL_SIZE");

    let rc_candidates = rc_candidates();
    let mut rc = RcConfig::default();
    let mut rc_dir: Option<PathBuf> = None;

    for rc_path in &rc_candidates {
        if rc_path.exists() {
            rc = read_rc(rc_path).with_context(|| {
                format!("failed to read configuration file {}", rc_path.display())
            })?;
            rc_dir = rc_path.parent().map(Path::to_path_buf);
            break;
        }
    }

    address = address.or(rc.address);
    timeout = timeout.or(rc.timeout);
    pool_size = pool_size.or(rc.pool_size);

    let Some(address) = address else {
        if !rc_candidates.is_empty() {
            bail!(
                "Missing configuration: address (set GDS_ADDRESS or put `address:` in one of: {})",
                rc_candidates
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }
        bail!("Missing configuration: address (set GDS_ADDRESS or create .gdsrc)");
    };

    let mut cfg = ClientConfig {
        address,
        ..ClientConfig::default()
    };
    if let Some(v) = timeout {
        let secs: f64 = v
            .parse()
            .with_context(|| format!("invalid timeout {v:?} (seconds expected)"))?;
        cfg.timeout = Duration::try_from_secs_f64(secs)
            .with_context(|| format!("invalid timeout {v:?} (seconds expected)"))?;
    }
    if let Some(v) = pool_size {
        cfg.pool_size = v
            .parse()
            .with_context(|| format!("invalid pool_size {v:?}"))?;
    }
    if let Some(v) = rc.connect_retries {
        cfg.connect_retries = v
            .parse()
            .with_context(|| format!("invalid connect_retries {v:?}"))?;
    }
    if let Some(v) = rc.element_names {
        // Relative dictionary paths are taken from the rc file's directory.
        let path = match &rc_dir {
            Some(dir) => dir.join(&v),
            None => PathBuf::from(&v),
        };
        cfg.element_names = ElementNames::load(&path)?;
    }

    Ok(cfg)
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn read_rc(path: &Path) -> Result<RcConfig> {
    let text = std::fs::read_to_string(path)?;
    Ok(parse_rc(&text))
}

fn parse_rc(text: &str) -> RcConfig {
    let mut cfg = RcConfig::default();

    // A key may end its line with a bare colon and carry the value on the next line.
    let mut pending_key: Option<&str> = None;

    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some(pk) = pending_key.take() {
            if !line.contains(':') || pk == "address" {
                if let Some(slot) = cfg.slot(pk) {
                    *slot = Some(strip_quotes(line).to_string());
                }
                continue;
            }
        }

        if let Some((k, v)) = line.split_once(':') {
            let k = k.trim();
            let v = strip_quotes(v.trim());
            if cfg.slot(k).is_none() {
                continue;
            }
            if v.is_empty() {
                pending_key = Some(k);
            } else if let Some(slot) = cfg.slot(k) {
                *slot = Some(v.to_string());
            }
        }
    }

    cfg
}

fn strip_quotes(s: &str) -> &str {
    let s = s.trim();
    if (s.starts_with('"') && s.ends_with('"') && s.len() >= 2)
        || (s.starts_with('\'') && s.ends_with('\'') && s.len() >= 2)
    {
        &s[1..s.len() - 1]
    } else {
        s
    }
}

fn rc_candidates() -> Vec<PathBuf> {
    // 1) GDS_RC (explicit)
    // 2) ./.gdsrc
    // 3) ~/.gdsrc
    if let Ok(p) = std::env::var("GDS_RC") {
        return vec![PathBuf::from(p)];
    }

    let mut v = Vec::new();
    if let Ok(cwd) = std::env::current_dir() {
        v.push(cwd.join(".gdsrc"));
    }
    if let Some(home) = dirs::home_dir() {
        v.push(home.join(".gdsrc"));
    }
    v
}

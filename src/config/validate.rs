// src/config/validate.rs

use std::time::Duration;

use crate::config::duration::parse_duration;
use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{ProcworkerError, Result};
use crate::workers::BUILTIN_KINDS;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = ProcworkerError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        let grace_period = grace_period_from(&raw.config.grace_period, "[config].grace_period")?;
        let timeout = raw
            .config
            .timeout
            .as_deref()
            .map(|s| duration_from(s, "[config].timeout"))
            .transpose()?;
        Ok(ConfigFile::new_unchecked(
            raw.config,
            raw.worker,
            grace_period,
            timeout,
        ))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    ensure_has_workers(cfg)?;
    validate_workers(cfg)?;
    Ok(())
}

fn ensure_has_workers(cfg: &RawConfigFile) -> Result<()> {
    if cfg.worker.is_empty() {
        return Err(ProcworkerError::ConfigError(
            "config must contain at least one [worker.<name>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_workers(cfg: &RawConfigFile) -> Result<()> {
    for (name, worker) in cfg.worker.iter() {
        if !BUILTIN_KINDS.contains(&worker.kind.as_str()) {
            return Err(ProcworkerError::ConfigError(format!(
                "worker '{}' has unknown kind '{}' (expected one of: {})",
                name,
                worker.kind,
                BUILTIN_KINDS.join(", ")
            )));
        }
        if let Some(ref grace) = worker.grace_period {
            grace_period_from(grace, &format!("[worker.{name}].grace_period"))?;
        }
    }
    Ok(())
}

fn duration_from(s: &str, field: &str) -> Result<Duration> {
    parse_duration(s).map_err(|e| ProcworkerError::ConfigError(format!("{field}: {e}")))
}

fn grace_period_from(s: &str, field: &str) -> Result<Duration> {
    let grace = duration_from(s, field)?;
    if grace.is_zero() {
        return Err(ProcworkerError::ConfigError(format!(
            "{field} must be greater than zero"
        )));
    }
    Ok(grace)
}

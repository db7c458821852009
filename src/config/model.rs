// src/config/model.rs

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::Deserialize;

use crate::params::ParameterSet;
use crate::types::BackendKind;

/// Configuration exactly as read from a TOML file.
///
/// ```toml
/// [config]
/// backend = "process"
/// grace_period = "2s"
/// timeout = "30s"
///
/// [worker.A]
/// kind = "sleep"
///
/// [worker.A.params]
/// duration = "100ms"
/// ```
///
/// Nothing here has been checked yet; convert with `ConfigFile::try_from`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConfigFile {
    /// Global behaviour config from `[config]`.
    #[serde(default)]
    pub config: ConfigSection,

    /// All workers from `[worker.<name>]`, keyed by name.
    #[serde(default)]
    pub worker: BTreeMap<String, WorkerConfig>,
}

/// A validated configuration.
///
/// Durations are parsed once during validation and exposed through
/// accessors.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub config: ConfigSection,
    pub worker: BTreeMap<String, WorkerConfig>,
    grace_period: Duration,
    timeout: Option<Duration>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(
        config: ConfigSection,
        worker: BTreeMap<String, WorkerConfig>,
        grace_period: Duration,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            config,
            worker,
            grace_period,
            timeout,
        }
    }

    /// Grace period applied to workers that do not set their own.
    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    /// How long `run` waits for all workers before stopping them.
    /// `None` waits indefinitely.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Effective grace period for worker `name`.
    pub fn grace_period_for(&self, name: &str) -> Duration {
        self.worker
            .get(name)
            .and_then(|w| w.grace_period.as_deref())
            .and_then(|s| crate::config::parse_duration(s).ok())
            .unwrap_or(self.grace_period)
    }
}

/// `[config]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigSection {
    /// `"process"` (default) or `"task"`.
    #[serde(default)]
    pub backend: BackendKind,

    /// How long a worker may take to honour a stop request before it is
    /// killed.
    #[serde(default = "default_grace_period")]
    pub grace_period: String,

    /// Overall wait for all workers to finish on their own.
    #[serde(default)]
    pub timeout: Option<String>,
}

fn default_grace_period() -> String {
    "2s".to_string()
}

impl Default for ConfigSection {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            grace_period: default_grace_period(),
            timeout: None,
        }
    }
}

/// `[worker.<name>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    /// Built-in worker to run (`sleep`, `echo`, `stubborn`, `record`).
    pub kind: String,

    /// Overrides `[config].grace_period` for this worker.
    #[serde(default)]
    pub grace_period: Option<String>,

    /// Parameters handed to the worker at start, from
    /// `[worker.<name>.params]`.
    #[serde(default)]
    pub params: BTreeMap<String, ParamValue>,
}

impl WorkerConfig {
    /// Parameters as the worker will see them: every value in its textual
    /// form.
    pub fn parameters(&self) -> ParameterSet {
        self.params
            .iter()
            .map(|(name, value)| (name.as_str(), value.to_string()))
            .collect()
    }
}

/// A parameter value as written in TOML.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Text(s) => f.write_str(s),
            ParamValue::Integer(i) => write!(f, "{i}"),
            ParamValue::Float(x) => write!(f, "{x}"),
            ParamValue::Bool(b) => write!(f, "{b}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_to_missing_sections() {
        let raw: RawConfigFile = toml::from_str(
            r#"
            [worker.A]
            kind = "sleep"
            "#,
        )
        .unwrap();

        assert_eq!(raw.config.backend, BackendKind::Process);
        assert_eq!(raw.config.grace_period, "2s");
        assert!(raw.config.timeout.is_none());
        assert!(raw.worker["A"].params.is_empty());
    }

    #[test]
    fn params_of_any_scalar_type_become_text() {
        let raw: RawConfigFile = toml::from_str(
            r#"
            [config]
            backend = "task"

            [worker.A]
            kind = "sleep"
            [worker.A.params]
            duration = "100ms"
            exit_code = 3
            ratio = 0.5
            verbose = true
            "#,
        )
        .unwrap();

        assert_eq!(raw.config.backend, BackendKind::Task);
        let params = raw.worker["A"].parameters();
        assert_eq!(params.get("duration"), Some(&b"100ms"[..]));
        assert_eq!(params.get("exit_code"), Some(&b"3"[..]));
        assert_eq!(params.get("ratio"), Some(&b"0.5"[..]));
        assert_eq!(params.get("verbose"), Some(&b"true"[..]));
    }

    #[test]
    fn unknown_backend_is_a_parse_error() {
        let res: std::result::Result<RawConfigFile, _> = toml::from_str(
            r#"
            [config]
            backend = "thread"
            "#,
        );
        assert!(res.is_err());
    }
}

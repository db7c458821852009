#![allow(dead_code)]

use std::collections::BTreeMap;

use procworker::BackendKind;
use procworker::config::{ConfigFile, ConfigSection, ParamValue, RawConfigFile, WorkerConfig};

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile {
                config: ConfigSection::default(),
                worker: BTreeMap::new(),
            },
        }
    }

    pub fn with_worker(mut self, name: &str, worker: WorkerConfig) -> Self {
        self.config.worker.insert(name.to_string(), worker);
        self
    }

    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.config.config.backend = backend;
        self
    }

    pub fn with_grace_period(mut self, grace: &str) -> Self {
        self.config.config.grace_period = grace.to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: &str) -> Self {
        self.config.config.timeout = Some(timeout.to_string());
        self
    }

    /// The unvalidated config, for exercising validation failures.
    pub fn build_raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `WorkerConfig`.
pub struct WorkerConfigBuilder {
    worker: WorkerConfig,
}

impl WorkerConfigBuilder {
    pub fn new(kind: &str) -> Self {
        Self {
            worker: WorkerConfig {
                kind: kind.to_string(),
                grace_period: None,
                params: BTreeMap::new(),
            },
        }
    }

    pub fn param(mut self, name: &str, value: &str) -> Self {
        self.worker
            .params
            .insert(name.to_string(), ParamValue::Text(value.to_string()));
        self
    }

    pub fn int_param(mut self, name: &str, value: i64) -> Self {
        self.worker
            .params
            .insert(name.to_string(), ParamValue::Integer(value));
        self
    }

    pub fn grace_period(mut self, grace: &str) -> Self {
        self.worker.grace_period = Some(grace.to_string());
        self
    }

    pub fn build(self) -> WorkerConfig {
        self.worker
    }
}

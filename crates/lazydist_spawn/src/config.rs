use lazydist_error::{DbError, Result};

use crate::env::{self, WORKER_VERBOSITY_ENV};

/// Comma separated list of extra variables to forward to workers.
pub const PROPAGATE_ENV_ENV: &str = "LAZYDIST_PROPAGATE_ENV";

/// Configuration for spawning a process group.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SpawnConfig {
    /// Explicit worker count. Resolved from the environment if not set.
    pub num_workers: Option<usize>,
    /// Extra variables forwarded to workers on spawn.
    pub propagate_env: Vec<String>,
    /// Log verbosity for workers, same scale as `-v` counts.
    pub worker_verbosity: u8,
}

impl SpawnConfig {
    pub fn with_num_workers(mut self, n: usize) -> Self {
        self.num_workers = Some(n);
        self
    }

    /// Read settings from the current process environment.
    pub fn from_env() -> Result<Self> {
        let propagate_env = std::env::var(PROPAGATE_ENV_ENV)
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim())
                    .filter(|s| !s.is_empty())
                    .map(|s| s.to_string())
                    .collect()
            })
            .unwrap_or_default();

        let worker_verbosity = match std::env::var(WORKER_VERBOSITY_ENV) {
            Ok(raw) => raw.trim().parse().map_err(|_| {
                DbError::invalid_input("Invalid worker verbosity")
                    .with_field("value", &raw)
            })?,
            Err(_) => 0,
        };

        Ok(SpawnConfig {
            num_workers: None,
            propagate_env,
            worker_verbosity,
        })
    }

    pub fn resolve_num_workers(&self) -> Result<usize> {
        env::resolve_num_workers(self.num_workers, |key| std::env::var(key).ok())
    }
}

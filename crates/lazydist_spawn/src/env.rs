//! Worker count resolution and environment propagation.

use std::collections::BTreeMap;

use lazydist_error::{DbError, Result};

/// Explicit worker count override.
pub const NUM_WORKERS_ENV: &str = "LAZYDIST_NUM_WORKERS";
/// Size hint set by an external launcher (e.g. a job scheduler).
pub const UNIVERSE_SIZE_ENV: &str = "LAZYDIST_UNIVERSE_SIZE";

pub const WORKER_RANK_ENV: &str = "LAZYDIST_WORKER_RANK";
pub const WORKER_SIZE_ENV: &str = "LAZYDIST_WORKER_SIZE";
pub const WORKER_VERBOSITY_ENV: &str = "LAZYDIST_WORKER_VERBOSE_LEVEL";

/// Forwarded to workers as `DYLD_INSERT_LIBRARIES`, which macOS strips from
/// the environment of child processes.
pub const DYLD_INSERT_ENV: &str = "LAZYDIST_DYLD_INSERT_LIBRARIES";

/// Variables with these prefixes are always forwarded to workers.
pub const PROPAGATED_ENV_PREFIXES: &[&str] = &[
    "LAZYDIST_",
    "AWS_",
    "AZURE_",
    "GOOGLE_",
    "LD_",
    "MINIO_",
    "RUST_LOG",
    "RUST_BACKTRACE",
    "RAYON_",
    "OMP",
    "MKL",
    "OPENBLAS",
];

/// Select the variables to forward to workers.
pub fn propagated_env<I>(vars: I, propagate_env: &[String]) -> BTreeMap<String, String>
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut env = BTreeMap::new();
    for (key, value) in vars {
        if key == DYLD_INSERT_ENV {
            env.insert("DYLD_INSERT_LIBRARIES".to_string(), value.clone());
        }
        let forwarded = PROPAGATED_ENV_PREFIXES
            .iter()
            .any(|prefix| key.starts_with(prefix))
            || propagate_env.contains(&key);
        if forwarded {
            env.insert(key, value);
        }
    }
    env
}

/// Determine the number of workers to spawn.
///
/// Explicit override first, then `LAZYDIST_NUM_WORKERS`, then the universe
/// size hint, then the number of physical cores.
pub fn resolve_num_workers<F>(explicit: Option<usize>, lookup: F) -> Result<usize>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(n) = explicit {
        if n == 0 {
            return Err(DbError::invalid_input("Number of workers must be positive"));
        }
        return Ok(n);
    }

    for var in [NUM_WORKERS_ENV, UNIVERSE_SIZE_ENV] {
        if let Some(raw) = lookup(var) {
            let n: usize = raw.trim().parse().map_err(|_| {
                DbError::invalid_input("Invalid worker count in environment")
                    .with_field("var", var)
                    .with_field("value", &raw)
            })?;
            if n == 0 {
                return Err(DbError::invalid_input("Number of workers must be positive")
                    .with_field("var", var));
            }
            return Ok(n);
        }
    }

    Ok(num_cpus::get_physical().max(1))
}

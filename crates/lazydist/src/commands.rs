use std::collections::BTreeMap;

use anyhow::{Result, anyhow};
use clap::{Args, Subcommand};
use lazydist_plan::config::ExecutionConfig;
use lazydist_spawn::arg::Arg;
use lazydist_spawn::builtins::PARTITION_INFO;
use lazydist_spawn::computation::{Computation, ComputationRegistry};
use lazydist_spawn::config::SpawnConfig;
use lazydist_spawn::env::WORKER_VERBOSITY_ENV;
use lazydist_spawn::launcher::StdioEndpoint;
use lazydist_spawn::spawner::Spawner;
use lazydist_spawn::worker::worker_loop;
use lazydist_types::batch::Batch;
use lazydist_types::datatype::DataType;
use lazydist_types::field::{Field, Schema};
use lazydist_types::scalar::ScalarValue;
use tracing::info;

/// Argument workers are launched with.
const WORKER_COMMAND: &str = "worker";

#[derive(Subcommand)]
pub enum Commands {
    /// Scatter a generated table across a worker group and report how it
    /// was partitioned.
    Scatter(ScatterArgs),
    /// List execution settings with their values from the environment.
    Settings,
    /// Serve a coordinator over stdin/stdout.
    #[clap(hide = true)]
    Worker,
}

#[derive(Args)]
pub struct ScatterArgs {
    /// Number of workers. Read from the environment if omitted.
    #[clap(short, long)]
    workers: Option<usize>,

    /// Number of rows to generate.
    #[clap(short, long, default_value_t = 10)]
    rows: usize,
}

impl Commands {
    pub fn run(self, verbosity: u8) -> Result<()> {
        match self {
            Commands::Scatter(args) => args.run(verbosity),
            Commands::Settings => list_settings(),
            Commands::Worker => run_worker(),
        }
    }
}

/// Verbosity requested by the coordinator, zero if unset or invalid.
pub fn worker_verbosity() -> u8 {
    std::env::var(WORKER_VERBOSITY_ENV)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0)
}

fn list_settings() -> Result<()> {
    let config = ExecutionConfig::from_env()?;
    for setting in config.settings() {
        println!("{} = {}  # {}", setting.name, setting.value, setting.description);
    }
    Ok(())
}

fn run_worker() -> Result<()> {
    let mut endpoint = StdioEndpoint::from_env()?;
    let registry = ComputationRegistry::with_builtins();
    worker_loop(&mut endpoint, &registry)?;
    Ok(())
}

impl ScatterArgs {
    fn run(self, verbosity: u8) -> Result<()> {
        let mut config = SpawnConfig::from_env()?;
        if let Some(n) = self.workers {
            config = config.with_num_workers(n);
        }
        config.worker_verbosity = config.worker_verbosity.max(verbosity);

        let exe = std::env::current_exe()?;
        let spawner = Spawner::process(config, exe, vec![WORKER_COMMAND.to_string()]);

        let frame = spawner.scatter_data(generate_table(self.rows)?)?;
        info!(rows = frame.num_rows(), "scattered table");

        let info = spawner
            .submit(
                &Computation::new(PARTITION_INFO).with_params(["data"]),
                &mut [Arg::Frame(frame)],
                &mut BTreeMap::new(),
            )?
            .into_frame()?
            .to_batch()?;

        for row in 0..info.num_rows() {
            let rank = info.value(0, row).ok_or_else(|| anyhow!("missing rank"))?;
            let num_rows = info.value(1, row).ok_or_else(|| anyhow!("missing row count"))?;
            println!("rank {rank}: {num_rows} rows");
        }

        spawner.reset()?;
        Ok(())
    }
}

fn generate_table(rows: usize) -> Result<Batch> {
    let schema = Schema::new([Field::new("id", DataType::Int64, false)]);
    let ids = (0..rows as i64).map(ScalarValue::Int64).collect();
    Ok(Batch::try_new(schema, vec![ids])?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_table_has_sequential_ids() {
        let batch = generate_table(3).unwrap();
        assert_eq!(3, batch.num_rows());
        assert_eq!(Some(&ScalarValue::Int64(2)), batch.value(0, 2));
    }
}

//! Worker side command loop.

use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};

use hashbrown::HashMap;
use lazydist_error::{DbError, Result};
use lazydist_types::batch::Batch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::command::CommandType;
use crate::computation::{CallContext, ComputationRegistry, Output};
use crate::channel::WorkerEndpoint;
use crate::failure::WorkerError;
use crate::marshal::ArgReceiver;
use crate::message::{Frame, PartitionMeta, expect_frame};
use crate::value::{ResultId, Value};

/// Result partitions stored on a worker.
#[derive(Debug, Default)]
pub struct ResultStore {
    results: HashMap<ResultId, Batch>,
}

impl ResultStore {
    pub fn get(&self, id: &ResultId) -> Option<&Batch> {
        self.results.get(id)
    }

    pub fn insert(&mut self, id: ResultId, batch: Batch) -> Option<Batch> {
        self.results.insert(id, batch)
    }

    pub fn remove(&mut self, id: &ResultId) -> Option<Batch> {
        self.results.remove(id)
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

/// Run commands from the coordinator until told to exit.
pub fn worker_loop<E: WorkerEndpoint>(endpoint: &mut E, registry: &ComputationRegistry) -> Result<()> {
    let rank = endpoint.rank();
    let mut store = ResultStore::default();
    info!(rank, size = endpoint.size(), "worker started");

    loop {
        let command = expect_frame!(endpoint.recv()?, Command)?;
        debug!(rank, %command, "received command");

        match command {
            CommandType::Execute => execute(endpoint, registry, &mut store)?,
            CommandType::Gather => {
                let id = expect_frame!(endpoint.recv()?, ResultId)?;
                let partition = store.get(&id).cloned();
                if partition.is_none() {
                    warn!(rank, result_id = %id, "gather for unknown result");
                }
                endpoint.send(Frame::Partition(partition))?;
            }
            CommandType::DeleteResult => {
                let id = expect_frame!(endpoint.recv()?, ResultId)?;
                if store.remove(&id).is_none() {
                    debug!(rank, result_id = %id, "delete for unknown result");
                }
            }
            CommandType::Exit => {
                info!(rank, "worker exiting");
                return Ok(());
            }
        }
    }
}

fn execute<E: WorkerEndpoint>(
    endpoint: &mut E,
    registry: &ComputationRegistry,
    store: &mut ResultStore,
) -> Result<()> {
    let rank = endpoint.rank();
    let env = expect_frame!(endpoint.recv()?, Env)?;
    let skeleton = expect_frame!(endpoint.recv()?, Args)?;

    let mut receiver = ArgReceiver::new(endpoint, store);
    let args = skeleton
        .args
        .into_iter()
        .map(|wire| receiver.recv(wire))
        .collect::<Result<Vec<_>>>()?;
    let mut kwargs = BTreeMap::new();
    for (name, wire) in skeleton.kwargs {
        kwargs.insert(name, receiver.recv(wire)?);
    }
    let (lazy_ids, deferred) = receiver.finish();

    let payload = expect_frame!(endpoint.recv()?, Computation)?;
    debug!(rank, computation = %payload.computation.name, call_id = %payload.call_id, "running computation");

    let outcome = match deferred {
        Some(err) => Err(err),
        None => {
            let mut ctx = CallContext {
                rank,
                size: endpoint.size(),
                env: &env.vars,
                distributed: &payload.computation.config.distributed_block,
                registry,
                results: store,
            };
            run_computation(&mut ctx, &payload.computation.name, args, kwargs)
        }
    };

    endpoint.send(Frame::Completed)?;

    let status = match &outcome {
        Ok(_) => None,
        Err(err) => {
            warn!(rank, %err, "computation failed");
            Some(WorkerError::from_db_error(err))
        }
    };
    endpoint.send(Frame::Status(status))?;

    let proceed = expect_frame!(endpoint.recv()?, Proceed)?;
    let output = match outcome {
        Ok(output) if proceed => output,
        _ => return Ok(()),
    };

    if rank == 0 {
        endpoint.send(Frame::OutputTag(output.distribution()))?;
    }
    let mut leaf = 0;
    send_output(endpoint, store, output, payload.call_id, &mut leaf)?;

    for id in lazy_ids {
        let meta = store.get(&id).map(PartitionMeta::of);
        endpoint.send(Frame::PartitionMeta(meta))?;
    }

    Ok(())
}

fn run_computation(
    ctx: &mut CallContext<'_>,
    name: &str,
    args: Vec<Value>,
    kwargs: BTreeMap<String, Value>,
) -> Result<Output> {
    let func = ctx.registry.get(name)?.clone();
    match panic::catch_unwind(AssertUnwindSafe(|| func(ctx, args, kwargs))) {
        Ok(res) => res,
        Err(payload) => {
            let msg = if let Some(s) = payload.downcast_ref::<&str>() {
                s.to_string()
            } else if let Some(s) = payload.downcast_ref::<String>() {
                s.clone()
            } else {
                "unknown panic".to_string()
            };
            Err(DbError::remote("Computation panicked")
                .with_field("computation", name)
                .with_field("panic", msg))
        }
    }
}

fn send_output<E: WorkerEndpoint>(
    endpoint: &mut E,
    store: &mut ResultStore,
    output: Output,
    call_id: Uuid,
    leaf: &mut usize,
) -> Result<()> {
    match output {
        Output::Replicated(value) => {
            if endpoint.rank() == 0 {
                endpoint.send(Frame::Value(value))?;
            }
        }
        Output::Distributed(batch) => {
            let id = ResultId::for_output(call_id, *leaf);
            *leaf += 1;
            let meta = PartitionMeta::of(&batch);
            store.insert(id, batch);
            endpoint.send(Frame::PartitionMeta(Some(meta)))?;
        }
        Output::Tuple(items) => {
            for item in items {
                send_output(endpoint, store, item, call_id, leaf)?;
            }
        }
        Output::Map(items) => {
            for (_, item) in items {
                send_output(endpoint, store, item, call_id, leaf)?;
            }
        }
    }
    Ok(())
}

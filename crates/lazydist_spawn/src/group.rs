//! Coordinator side of a live process group.

use std::collections::BTreeMap;
use std::sync::Weak;

use lazydist_error::{DbError, Result};
use lazydist_types::batch::Batch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::arg::Arg;
use crate::channel::Communicator;
use crate::command::CommandType;
use crate::computation::Computation;
use crate::config::SpawnConfig;
use crate::env::propagated_env;
use crate::failure::aggregate_worker_errors;
use crate::frame::{CallResult, DistributedFrame, LazyMetadata, ResultHandle};
use crate::launcher::{GroupLauncher, SpawnRequest};
use crate::marshal::{build_skeleton, classify_arg, lazy_frames_mut, send_arg_data};
use crate::message::{
    ArgsPayload,
    ComputationPayload,
    EnvPayload,
    Frame,
    OutputDistribution,
    PartitionMeta,
    expect_completed,
    expect_frame,
};
use crate::spawner::SpawnerShared;
use crate::value::ResultId;

/// A fixed size group of workers and the channel to them.
#[derive(Debug)]
pub struct ProcessGroup {
    generation: u64,
    comm: Communicator,
    destroyed: bool,
}

impl ProcessGroup {
    pub fn spawn(
        launcher: &dyn GroupLauncher,
        config: &SpawnConfig,
        generation: u64,
    ) -> Result<Self> {
        let num_workers = config.resolve_num_workers()?;
        let request = SpawnRequest {
            num_workers,
            env: propagated_env(std::env::vars(), &config.propagate_env),
            verbosity: config.worker_verbosity,
        };
        info!(num_workers, generation, "spawning process group");

        let channel = launcher.launch(&request)?;
        Ok(ProcessGroup {
            generation,
            comm: Communicator::new(channel),
            destroyed: false,
        })
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn num_workers(&self) -> usize {
        self.comm.size()
    }

    /// If the group can no longer be used, either because it was reset or
    /// because its channel failed.
    pub fn is_destroyed(&self) -> bool {
        self.destroyed || self.comm.is_broken()
    }

    fn ensure_live(&self) -> Result<()> {
        if self.is_destroyed() {
            return Err(DbError::protocol("Process group has been destroyed")
                .with_field("generation", self.generation));
        }
        Ok(())
    }

    /// Run a computation on every worker.
    ///
    /// Distributed outputs are returned as frames owned by `owner`.
    pub(crate) fn submit(
        &mut self,
        owner: &Weak<SpawnerShared>,
        computation: &Computation,
        args: &mut [Arg],
        kwargs: &mut BTreeMap<String, Arg>,
    ) -> Result<CallResult> {
        self.ensure_live()?;

        // Classify and build the skeleton before sending anything so a bad
        // argument leaves the workers idle.
        let mut dist_flags = Vec::new();
        let mut arg_specs = Vec::with_capacity(args.len());
        for (idx, arg) in args.iter().enumerate() {
            let name = computation.param_name(idx);
            let replicated = computation.is_replicated(&name);
            arg_specs.push(classify_arg(arg, &name, replicated, &mut dist_flags)?);
        }
        let mut kwarg_specs = BTreeMap::new();
        for (name, arg) in kwargs.iter() {
            let replicated = computation.is_replicated(name);
            let spec = classify_arg(arg, name, replicated, &mut dist_flags)?;
            kwarg_specs.insert(name.clone(), spec);
        }

        let skeleton = ArgsPayload {
            args: args
                .iter()
                .zip(&arg_specs)
                .map(|(arg, spec)| build_skeleton(arg, spec))
                .collect::<Result<_>>()?,
            kwargs: kwargs
                .iter()
                .zip(kwarg_specs.values())
                .map(|((name, arg), spec)| Ok((name.clone(), build_skeleton(arg, spec)?)))
                .collect::<Result<_>>()?,
        };

        let mut computation = computation.clone();
        for flag in dist_flags {
            if !computation.config.distributed_block.contains(&flag) {
                computation.config.distributed_block.push(flag);
            }
        }

        let call_id = Uuid::new_v4();
        debug!(
            %call_id,
            computation = %computation.name,
            generation = self.generation,
            distributed = ?computation.config.distributed_block,
            "submitting computation"
        );

        self.comm.broadcast(&Frame::Command(CommandType::Execute))?;
        let vars = propagated_env(std::env::vars(), &computation.config.propagate_env);
        self.comm.broadcast(&Frame::Env(EnvPayload { vars }))?;
        self.comm.broadcast(&Frame::Args(skeleton))?;

        for (arg, spec) in args.iter().zip(&arg_specs) {
            send_arg_data(&mut self.comm, arg, spec)?;
        }
        for ((_, arg), spec) in kwargs.iter().zip(kwarg_specs.values()) {
            send_arg_data(&mut self.comm, arg, spec)?;
        }

        self.comm
            .broadcast(&Frame::Computation(ComputationPayload { computation, call_id }))?;

        self.wait_for_completion()?;

        let statuses = self
            .comm
            .gather()?
            .into_iter()
            .map(|frame| expect_frame!(frame, Status))
            .collect::<Result<Vec<_>>>()?;
        if let Err(err) = aggregate_worker_errors(statuses) {
            self.comm.broadcast(&Frame::Proceed(false))?;
            return Err(err);
        }
        self.comm.broadcast(&Frame::Proceed(true))?;

        let tag = expect_frame!(self.comm.recv(0)?, OutputTag)?;
        let mut leaf = 0;
        let result = self.recv_output(owner, &tag, call_id, &mut leaf)?;

        let mut lazy = Vec::new();
        for (arg, spec) in args.iter_mut().zip(&arg_specs) {
            lazy_frames_mut(arg, spec, &mut lazy);
        }
        for ((_, arg), spec) in kwargs.iter_mut().zip(kwarg_specs.values()) {
            lazy_frames_mut(arg, spec, &mut lazy);
        }
        for frame in lazy {
            let parts = self.gather_partition_meta()?;
            match parts.into_iter().collect::<Option<Vec<_>>>() {
                Some(parts) => frame.update_partitions(parts)?,
                None => warn!(
                    result_id = ?frame.result_id(),
                    "lazy argument missing on some ranks after call"
                ),
            }
        }

        Ok(result)
    }

    /// Block until every worker reports that the computation finished.
    fn wait_for_completion(&mut self) -> Result<()> {
        for rank in 0..self.comm.size() {
            expect_completed(self.comm.recv(rank)?)?;
        }
        Ok(())
    }

    fn gather_partition_meta(&mut self) -> Result<Vec<Option<PartitionMeta>>> {
        self.comm
            .gather()?
            .into_iter()
            .map(|frame| expect_frame!(frame, PartitionMeta))
            .collect()
    }

    fn recv_output(
        &mut self,
        owner: &Weak<SpawnerShared>,
        tag: &OutputDistribution,
        call_id: Uuid,
        leaf: &mut usize,
    ) -> Result<CallResult> {
        match tag {
            OutputDistribution::Replicated => {
                let value = expect_frame!(self.comm.recv(0)?, Value)?;
                Ok(CallResult::Value(value))
            }
            OutputDistribution::Distributed => {
                let result_id = ResultId::for_output(call_id, *leaf);
                *leaf += 1;
                let parts = self
                    .gather_partition_meta()?
                    .into_iter()
                    .enumerate()
                    .map(|(rank, part)| {
                        part.ok_or_else(|| {
                            DbError::protocol("Missing partition for distributed output")
                                .with_field("rank", rank)
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                let meta = LazyMetadata::from_partitions(result_id.clone(), parts)?;
                debug!(%result_id, num_rows = meta.num_rows(), "received distributed output");
                let handle = ResultHandle::new(owner.clone(), self.generation, result_id);
                Ok(CallResult::Frame(DistributedFrame::distributed(meta, handle)))
            }
            OutputDistribution::Tuple(tags) => {
                let items = tags
                    .iter()
                    .map(|tag| self.recv_output(owner, tag, call_id, leaf))
                    .collect::<Result<Vec<_>>>()?;
                Ok(CallResult::Tuple(items))
            }
            OutputDistribution::Map(tags) => {
                let mut items = BTreeMap::new();
                for (key, tag) in tags {
                    items.insert(key.clone(), self.recv_output(owner, tag, call_id, leaf)?);
                }
                Ok(CallResult::Map(items))
            }
        }
    }

    /// Fetch every partition of a stored result.
    pub fn gather_result(&mut self, result_id: &ResultId) -> Result<Batch> {
        self.ensure_live()?;
        self.comm.broadcast(&Frame::Command(CommandType::Gather))?;
        self.comm.broadcast(&Frame::ResultId(result_id.clone()))?;

        let mut parts = Vec::with_capacity(self.comm.size());
        for (rank, frame) in self.comm.gather()?.into_iter().enumerate() {
            let part = expect_frame!(frame, Partition)?.ok_or_else(|| {
                DbError::protocol("Result not found on worker")
                    .with_field("result_id", result_id)
                    .with_field("rank", rank)
            })?;
            parts.push(part);
        }

        let schema = match parts.first() {
            Some(part) => part.schema().clone(),
            None => return Err(DbError::protocol("Process group has no workers")),
        };
        Batch::concat(schema, parts)
    }

    pub fn delete_result(&mut self, result_id: &ResultId) -> Result<()> {
        self.ensure_live()?;
        debug!(%result_id, generation = self.generation, "deleting result");
        self.comm.broadcast(&Frame::Command(CommandType::DeleteResult))?;
        self.comm.broadcast(&Frame::ResultId(result_id.clone()))
    }

    /// Tell every worker to exit and wait for them.
    ///
    /// The group can't be used afterwards.
    pub fn reset(&mut self) -> Result<()> {
        if self.destroyed {
            return Err(DbError::protocol("Process group already destroyed")
                .with_field("generation", self.generation));
        }
        self.destroyed = true;
        info!(generation = self.generation, "resetting process group");

        let exit = if self.comm.is_broken() {
            Ok(())
        } else {
            self.comm.broadcast(&Frame::Command(CommandType::Exit))
        };
        let shutdown = self.comm.shutdown();
        exit.and(shutdown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::computation::ComputationRegistry;
    use crate::launcher::ThreadLauncher;
    use crate::value::Value;
    use lazydist_error::ErrorKind;

    fn group(n: usize) -> ProcessGroup {
        let launcher = ThreadLauncher::new(ComputationRegistry::with_builtins());
        ProcessGroup::spawn(&launcher, &SpawnConfig::default().with_num_workers(n), 1).unwrap()
    }

    #[test]
    fn destroyed_group_fails_fast() {
        let mut group = group(2);
        group.reset().unwrap();
        assert!(group.is_destroyed());

        let err = group
            .submit(
                &Weak::new(),
                &Computation::new(crate::builtins::ECHO),
                &mut [Arg::Value(Value::Null)],
                &mut BTreeMap::new(),
            )
            .unwrap_err();
        assert_eq!(ErrorKind::Protocol, err.kind());

        let err = group.gather_result(&ResultId::new("nope")).unwrap_err();
        assert_eq!(ErrorKind::Protocol, err.kind());

        assert!(group.reset().is_err());
    }

    #[test]
    fn gather_unknown_result() {
        let mut group = group(2);
        let err = group.gather_result(&ResultId::new("missing")).unwrap_err();
        assert_eq!(ErrorKind::Protocol, err.kind());
        assert_eq!(Some("0"), err.field("rank"));
        // Group is still usable.
        assert!(!group.is_destroyed());
        group.reset().unwrap();
    }
}

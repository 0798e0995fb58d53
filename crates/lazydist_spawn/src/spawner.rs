//! Lifecycle of the process group used by a coordinator.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use lazydist_error::{DbError, Result};
use lazydist_types::batch::Batch;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::arg::Arg;
use crate::builtins::SCATTER_DATA;
use crate::computation::{Computation, ComputationRegistry};
use crate::config::SpawnConfig;
use crate::frame::{CallResult, DistributedFrame};
use crate::group::ProcessGroup;
use crate::launcher::{GroupLauncher, ProcessLauncher, ThreadLauncher};
use crate::value::ResultId;

/// Entry point for running computations on a process group.
///
/// The group is spawned lazily on first use, and respawned on the next
/// use after a [`reset`](Spawner::reset). Cloning a spawner shares the same
/// group. The group is reset once the last clone is dropped.
#[derive(Debug, Clone)]
pub struct Spawner {
    shared: Arc<SpawnerShared>,
}

#[derive(Debug)]
enum GroupState {
    Uninitialized,
    Live(ProcessGroup),
    Destroyed,
}

#[derive(Debug)]
pub struct SpawnerShared {
    config: SpawnConfig,
    launcher: Arc<dyn GroupLauncher>,
    state: Mutex<GroupState>,
    /// Generation of the live group, 0 if none.
    live_generation: AtomicU64,
    last_generation: AtomicU64,
    /// Results to delete on the next access to the group.
    pending_deletes: Mutex<Vec<(u64, ResultId)>>,
}

impl Spawner {
    pub fn new(config: SpawnConfig, launcher: Arc<dyn GroupLauncher>) -> Self {
        Spawner {
            shared: Arc::new(SpawnerShared {
                config,
                launcher,
                state: Mutex::new(GroupState::Uninitialized),
                live_generation: AtomicU64::new(0),
                last_generation: AtomicU64::new(0),
                pending_deletes: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Spawner running workers as threads of this process.
    pub fn threaded(config: SpawnConfig, registry: ComputationRegistry) -> Self {
        Self::new(config, Arc::new(ThreadLauncher::new(registry)))
    }

    /// Spawner running workers as child processes.
    pub fn process(config: SpawnConfig, executable: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self::new(config, Arc::new(ProcessLauncher::new(executable, args)))
    }

    pub fn config(&self) -> &SpawnConfig {
        &self.shared.config
    }

    pub fn is_live(&self) -> bool {
        self.shared.live_generation().is_some()
    }

    /// Generation of the live group, if any.
    pub fn generation(&self) -> Option<u64> {
        self.shared.live_generation()
    }

    /// Number of workers in the live group, if any.
    pub fn num_workers(&self) -> Option<usize> {
        match &*self.shared.state.lock() {
            GroupState::Live(group) => Some(group.num_workers()),
            _ => None,
        }
    }

    /// Run a computation on every worker, spawning the group if needed.
    ///
    /// Lazily referenced frames in `args` have their metadata updated after
    /// the call.
    pub fn submit(
        &self,
        computation: &Computation,
        args: &mut [Arg],
        kwargs: &mut BTreeMap<String, Arg>,
    ) -> Result<CallResult> {
        let owner = Arc::downgrade(&self.shared);
        self.shared
            .with_live_group(|group| group.submit(&owner, computation, args, kwargs))
    }

    /// Scatter a table across the group and keep it there.
    pub fn scatter_data(&self, batch: Batch) -> Result<DistributedFrame> {
        let computation = Computation::new(SCATTER_DATA).with_params(["data"]);
        self.submit(&computation, &mut [Arg::table(batch)], &mut BTreeMap::new())?
            .into_frame()
    }

    /// Shut down the live group.
    ///
    /// Results produced by the group become unusable. The next submission
    /// spawns a new group.
    pub fn reset(&self) -> Result<()> {
        self.shared.reset()
    }
}

impl SpawnerShared {
    pub(crate) fn live_generation(&self) -> Option<u64> {
        match self.live_generation.load(Ordering::Acquire) {
            0 => None,
            generation => Some(generation),
        }
    }

    fn with_live_group<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut ProcessGroup) -> Result<T>,
    {
        let mut state = self.state.lock();
        if !matches!(&*state, GroupState::Live(_)) {
            let generation = self.last_generation.fetch_add(1, Ordering::AcqRel) + 1;
            let group = ProcessGroup::spawn(self.launcher.as_ref(), &self.config, generation)?;
            *state = GroupState::Live(group);
            self.live_generation.store(generation, Ordering::Release);
        }
        self.flush_deletes(&mut state);

        let GroupState::Live(group) = &mut *state else {
            return Err(DbError::internal("Process group not live after spawn"));
        };
        let res = f(group);
        self.retire_if_broken(&mut state);
        res
    }

    /// Run `f` on the live group if it has the given generation.
    pub(crate) fn with_group_generation<T, F>(&self, generation: u64, f: F) -> Result<T>
    where
        F: FnOnce(&mut ProcessGroup) -> Result<T>,
    {
        let mut state = self.state.lock();
        self.flush_deletes(&mut state);

        let group = match &mut *state {
            GroupState::Live(group) if group.generation() == generation => group,
            _ => {
                return Err(DbError::protocol(
                    "Result belongs to a process group that has been reset",
                )
                .with_field("generation", generation));
            }
        };
        let res = f(group);
        self.retire_if_broken(&mut state);
        res
    }

    fn retire_if_broken(&self, state: &mut GroupState) {
        if let GroupState::Live(group) = state {
            if group.is_destroyed() {
                warn!(generation = group.generation(), "process group channel failed");
                let _ = group.reset();
                *state = GroupState::Destroyed;
                self.live_generation.store(0, Ordering::Release);
            }
        }
    }

    /// Queue a result for deletion, deleting immediately if the group isn't
    /// busy.
    pub(crate) fn queue_delete(&self, generation: u64, result_id: ResultId) {
        if self.live_generation() != Some(generation) {
            return;
        }
        self.pending_deletes.lock().push((generation, result_id));
        if let Some(mut state) = self.state.try_lock() {
            self.flush_deletes(&mut state);
        }
    }

    fn flush_deletes(&self, state: &mut GroupState) {
        let pending = std::mem::take(&mut *self.pending_deletes.lock());
        let GroupState::Live(group) = state else {
            return;
        };
        for (generation, result_id) in pending {
            if generation != group.generation() {
                continue;
            }
            if let Err(err) = group.delete_result(&result_id) {
                warn!(%err, %result_id, "failed to delete result");
            }
        }
    }

    fn reset(&self) -> Result<()> {
        let mut state = self.state.lock();
        self.pending_deletes.lock().clear();
        match std::mem::replace(&mut *state, GroupState::Destroyed) {
            GroupState::Live(mut group) => {
                self.live_generation.store(0, Ordering::Release);
                group.reset()
            }
            GroupState::Uninitialized => {
                *state = GroupState::Uninitialized;
                Ok(())
            }
            GroupState::Destroyed => Ok(()),
        }
    }
}

impl Drop for SpawnerShared {
    fn drop(&mut self) {
        if let GroupState::Live(group) = self.state.get_mut() {
            debug!(generation = group.generation(), "spawner dropped, resetting group");
            if let Err(err) = group.reset() {
                warn!(%err, "failed to reset process group on drop");
            }
        }
    }
}

//! Coordinator side handles to results that live on a process group.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use lazydist_error::{DbError, Result};
use lazydist_types::batch::Batch;
use lazydist_types::field::Schema;
use serde::{Deserialize, Serialize};

use crate::message::PartitionMeta;
use crate::spawner::SpawnerShared;
use crate::value::{ResultId, Value};

/// Description of a distributed result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LazyMetadata {
    pub result_id: ResultId,
    pub schema: Schema,
    /// Row count of each rank's partition, indexed by rank.
    pub partition_rows: Vec<usize>,
}

impl LazyMetadata {
    pub(crate) fn from_partitions(result_id: ResultId, parts: Vec<PartitionMeta>) -> Result<Self> {
        let schema = match parts.first() {
            Some(part) => part.schema.clone(),
            None => return Err(DbError::protocol("Distributed result with no partitions")),
        };
        Ok(LazyMetadata {
            result_id,
            schema,
            partition_rows: parts.into_iter().map(|p| p.num_rows).collect(),
        })
    }

    pub fn num_rows(&self) -> usize {
        self.partition_rows.iter().sum()
    }
}

/// Owning reference to a result stored on the workers.
///
/// The result is freed on the workers once the last handle is dropped, as
/// long as the group that produced it is still live.
#[derive(Debug)]
pub struct ResultHandle {
    result_id: ResultId,
    generation: u64,
    owner: Weak<SpawnerShared>,
}

impl ResultHandle {
    pub(crate) fn new(owner: Weak<SpawnerShared>, generation: u64, result_id: ResultId) -> Self {
        ResultHandle {
            result_id,
            generation,
            owner,
        }
    }

    pub fn result_id(&self) -> &ResultId {
        &self.result_id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// If the group that produced this result is still live.
    pub fn is_live(&self) -> bool {
        match self.owner.upgrade() {
            Some(shared) => shared.live_generation() == Some(self.generation),
            None => false,
        }
    }

    /// Fetch every partition and concatenate them.
    pub fn gather(&self) -> Result<Batch> {
        let shared = self
            .owner
            .upgrade()
            .ok_or_else(|| DbError::protocol("Spawner owning this result has been dropped"))?;
        shared.with_group_generation(self.generation, |group| {
            group.gather_result(&self.result_id)
        })
    }
}

impl Drop for ResultHandle {
    fn drop(&mut self) {
        if let Some(shared) = self.owner.upgrade() {
            shared.queue_delete(self.generation, self.result_id.clone());
        }
    }
}

/// Where a frame's data currently lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Residency {
    Local,
    /// Stored on the live group.
    Resident(ResultId),
    /// Stored on a group that has since been reset.
    Stale(ResultId),
}

/// A table that is either materialized locally or distributed across a
/// process group.
#[derive(Debug, Clone)]
pub struct DistributedFrame {
    state: FrameState,
}

#[derive(Debug, Clone)]
enum FrameState {
    Collected(Batch),
    Distributed {
        meta: LazyMetadata,
        handle: Arc<ResultHandle>,
    },
}

impl DistributedFrame {
    pub fn from_batch(batch: Batch) -> Self {
        DistributedFrame {
            state: FrameState::Collected(batch),
        }
    }

    pub(crate) fn distributed(meta: LazyMetadata, handle: ResultHandle) -> Self {
        DistributedFrame {
            state: FrameState::Distributed {
                meta,
                handle: Arc::new(handle),
            },
        }
    }

    pub fn residency(&self) -> Residency {
        match &self.state {
            FrameState::Collected(_) => Residency::Local,
            FrameState::Distributed { handle, .. } => {
                if handle.is_live() {
                    Residency::Resident(handle.result_id.clone())
                } else {
                    Residency::Stale(handle.result_id.clone())
                }
            }
        }
    }

    pub fn is_distributed(&self) -> bool {
        matches!(self.state, FrameState::Distributed { .. })
    }

    pub fn result_id(&self) -> Option<&ResultId> {
        match &self.state {
            FrameState::Collected(_) => None,
            FrameState::Distributed { handle, .. } => Some(&handle.result_id),
        }
    }

    pub fn metadata(&self) -> Option<&LazyMetadata> {
        match &self.state {
            FrameState::Collected(_) => None,
            FrameState::Distributed { meta, .. } => Some(meta),
        }
    }

    pub fn schema(&self) -> &Schema {
        match &self.state {
            FrameState::Collected(batch) => batch.schema(),
            FrameState::Distributed { meta, .. } => &meta.schema,
        }
    }

    pub fn num_rows(&self) -> usize {
        match &self.state {
            FrameState::Collected(batch) => batch.num_rows(),
            FrameState::Distributed { meta, .. } => meta.num_rows(),
        }
    }

    /// Get the full table without changing the frame.
    pub fn to_batch(&self) -> Result<Batch> {
        match &self.state {
            FrameState::Collected(batch) => Ok(batch.clone()),
            FrameState::Distributed { handle, .. } => handle.gather(),
        }
    }

    /// Materialize the frame locally, releasing the distributed result.
    pub fn collect(&mut self) -> Result<&Batch> {
        if let FrameState::Distributed { handle, .. } = &self.state {
            let batch = handle.gather()?;
            self.state = FrameState::Collected(batch);
        }
        match &self.state {
            FrameState::Collected(batch) => Ok(batch),
            FrameState::Distributed { .. } => Err(DbError::internal("Frame not collected")),
        }
    }

    /// Update partition metadata after a computation modified the result in
    /// place.
    pub(crate) fn update_partitions(&mut self, parts: Vec<PartitionMeta>) -> Result<()> {
        match &mut self.state {
            FrameState::Distributed { meta, .. } => {
                if let Some(first) = parts.first() {
                    meta.schema = first.schema.clone();
                }
                meta.partition_rows = parts.into_iter().map(|p| p.num_rows).collect();
                Ok(())
            }
            FrameState::Collected(_) => Err(DbError::internal(
                "Cannot update partitions of a collected frame",
            )),
        }
    }
}

/// Result of a computation as seen by the coordinator.
#[derive(Debug, Clone)]
pub enum CallResult {
    Value(Value),
    Frame(DistributedFrame),
    Tuple(Vec<CallResult>),
    Map(BTreeMap<String, CallResult>),
}

impl CallResult {
    pub fn into_value(self) -> Result<Value> {
        match self {
            CallResult::Value(v) => Ok(v),
            other => Err(DbError::new("Expected a replicated value result")
                .with_field("got", other.kind_name())),
        }
    }

    pub fn into_frame(self) -> Result<DistributedFrame> {
        match self {
            CallResult::Frame(f) => Ok(f),
            other => Err(DbError::new("Expected a distributed frame result")
                .with_field("got", other.kind_name())),
        }
    }

    pub fn into_tuple(self) -> Result<Vec<CallResult>> {
        match self {
            CallResult::Tuple(items) => Ok(items),
            other => {
                Err(DbError::new("Expected a tuple result").with_field("got", other.kind_name()))
            }
        }
    }

    fn kind_name(&self) -> &'static str {
        match self {
            CallResult::Value(_) => "Value",
            CallResult::Frame(_) => "Frame",
            CallResult::Tuple(_) => "Tuple",
            CallResult::Map(_) => "Map",
        }
    }
}

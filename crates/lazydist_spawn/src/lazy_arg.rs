use std::fmt;
use std::sync::Arc;

use lazydist_error::{DbError, Result};
use lazydist_types::batch::Batch;
use lazydist_types::field::Schema;
use parking_lot::Mutex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::debug;

use crate::frame::{DistributedFrame, Residency};
use crate::spawner::Spawner;
use crate::value::ResultId;

/// A frame referenced from inside a larger payload (e.g. a serialized plan)
/// that must already live on the workers when the payload is executed.
///
/// Call [`init`](LazyDistributedArg::init) right before submitting. Once
/// initialized the argument serializes as its result id only. Clones share
/// state.
#[derive(Clone)]
pub struct LazyDistributedArg {
    inner: Arc<Mutex<LazyArgState>>,
}

#[derive(Debug)]
enum LazyArgState {
    /// Coordinator side.
    Local {
        frame: DistributedFrame,
        /// Our own scattered copy of a local frame.
        scattered: Option<DistributedFrame>,
        result_id: Option<ResultId>,
    },
    /// Worker side, deserialized from a result id.
    Remote { result_id: ResultId },
}

impl LazyDistributedArg {
    pub fn new(frame: DistributedFrame) -> Self {
        LazyDistributedArg {
            inner: Arc::new(Mutex::new(LazyArgState::Local {
                frame,
                scattered: None,
                result_id: None,
            })),
        }
    }

    pub fn remote(result_id: ResultId) -> Self {
        LazyDistributedArg {
            inner: Arc::new(Mutex::new(LazyArgState::Remote { result_id })),
        }
    }

    /// Make sure the data lives on the spawner's current group.
    ///
    /// Reuses the frame's own result if it is resident, then a previous
    /// scatter if its group is still live, and scatters the frame otherwise.
    pub fn init(&self, spawner: &Spawner) -> Result<ResultId> {
        let mut state = self.inner.lock();
        let LazyArgState::Local {
            frame,
            scattered,
            result_id,
        } = &mut *state
        else {
            return Err(DbError::internal(
                "Cannot initialize a lazy argument on a worker",
            ));
        };

        let id = if let Residency::Resident(id) = frame.residency() {
            id
        } else if let Some(Residency::Resident(id)) = scattered.as_ref().map(|s| s.residency()) {
            id
        } else {
            let batch = frame.to_batch()?;
            let new = spawner.scatter_data(batch)?;
            let id = new
                .result_id()
                .cloned()
                .ok_or_else(|| DbError::internal("Scattered frame has no result id"))?;
            debug!(result_id = %id, num_rows = new.num_rows(), "scattered lazy argument");
            *scattered = Some(new);
            id
        };

        *result_id = Some(id.clone());
        Ok(id)
    }

    pub fn result_id(&self) -> Option<ResultId> {
        match &*self.inner.lock() {
            LazyArgState::Local { result_id, .. } => result_id.clone(),
            LazyArgState::Remote { result_id } => Some(result_id.clone()),
        }
    }

    /// Row count of the underlying frame, if known here.
    pub fn num_rows(&self) -> Option<usize> {
        match &*self.inner.lock() {
            LazyArgState::Local { frame, .. } => Some(frame.num_rows()),
            LazyArgState::Remote { .. } => None,
        }
    }

    /// Schema of the underlying frame, known without fetching any data.
    pub fn schema(&self) -> Option<Schema> {
        match &*self.inner.lock() {
            LazyArgState::Local { frame, .. } => Some(frame.schema().clone()),
            LazyArgState::Remote { .. } => None,
        }
    }

    /// Full table for in-process execution.
    pub fn local_batch(&self) -> Result<Batch> {
        match &*self.inner.lock() {
            LazyArgState::Local { frame, .. } => frame.to_batch(),
            LazyArgState::Remote { result_id } => Err(DbError::internal(
                "Lazy argument only available as a result on the workers",
            )
            .with_field("result_id", result_id)),
        }
    }
}

impl fmt::Debug for LazyDistributedArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyDistributedArg")
            .field("result_id", &self.result_id())
            .finish()
    }
}

impl Serialize for LazyDistributedArg {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.result_id() {
            Some(id) => id.serialize(serializer),
            None => Err(serde::ser::Error::custom(
                "LazyDistributedArg: result id is not set, call init() first",
            )),
        }
    }
}

impl<'de> Deserialize<'de> for LazyDistributedArg {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        ResultId::deserialize(deserializer).map(LazyDistributedArg::remote)
    }
}

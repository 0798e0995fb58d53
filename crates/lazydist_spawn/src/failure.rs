use std::fmt;

use lazydist_error::{DbError, ErrorKind, Result};
use serde::{Deserialize, Serialize};
use tracing::error;

/// Error raised by a computation on a single rank, in a form that can cross
/// the process boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerError {
    pub kind: String,
    pub message: String,
    pub fields: Vec<(String, String)>,
}

impl WorkerError {
    pub fn from_db_error(err: &DbError) -> Self {
        WorkerError {
            kind: err.kind().as_str().to_string(),
            message: err.get_msg().to_string(),
            fields: err
                .fields()
                .iter()
                .map(|f| (f.key.clone(), f.value.clone()))
                .collect(),
        }
    }

    pub fn into_db_error(self) -> DbError {
        let mut err = DbError::new(self.message).with_kind(ErrorKind::from_name(&self.kind));
        for (key, value) in self.fields {
            err = err.with_field(key, value);
        }
        err
    }

    fn same_failure(&self, other: &WorkerError) -> bool {
        self.kind == other.kind && self.message == other.message
    }
}

impl fmt::Display for WorkerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Combine per-rank statuses, indexed by rank, into a single result.
///
/// If every rank failed with the same kind and message, that error is
/// returned as is. Otherwise each failing rank's error gets a `rank` field
/// and the errors are chained through `source` under a "Some ranks failed"
/// error.
pub fn aggregate_worker_errors(statuses: Vec<Option<WorkerError>>) -> Result<()> {
    let num_failed = statuses.iter().filter(|s| s.is_some()).count();
    if num_failed == 0 {
        return Ok(());
    }

    if num_failed == statuses.len() {
        if let Some(Some(first)) = statuses.first() {
            if statuses.iter().flatten().all(|s| s.same_failure(first)) {
                error!(err = %first, "computation failed on all ranks");
                return Err(first.clone().into_db_error());
            }
        }
    }

    let mut accumulated: Option<DbError> = None;
    for (rank, status) in statuses.into_iter().enumerate() {
        let Some(err) = status else {
            continue;
        };
        error!(rank, %err, "computation failed");
        let mut err = err.into_db_error().with_field("rank", rank);
        if let Some(prev) = accumulated.take() {
            err = err.caused_by(prev);
        }
        accumulated = Some(err);
    }

    let mut err = DbError::remote("Some ranks failed").with_field("failed_ranks", num_failed);
    if let Some(accumulated) = accumulated {
        err = err.caused_by(accumulated);
    }
    Err(err)
}

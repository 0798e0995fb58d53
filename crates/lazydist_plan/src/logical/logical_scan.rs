use std::collections::BTreeMap;

use lazydist_spawn::lazy_arg::LazyDistributedArg;
use lazydist_types::batch::Batch;
use serde::{Deserialize, Serialize};

/// Reads one or more parquet files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalParquetRead {
    pub path: String,
    pub storage_options: BTreeMap<String, String>,
}

/// Reads an in-memory table held by the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogicalFrameReadSeq {
    pub data: Batch,
}

/// Reads a table that lives (or will live) partitioned on the workers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogicalFrameReadParallel {
    pub arg: LazyDistributedArg,
    pub num_rows: usize,
}

/// Reads a catalog backed iceberg table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalIcebergRead {
    pub table_identifier: String,
    pub catalog_name: String,
    pub catalog_properties: BTreeMap<String, String>,
    /// Filter pushed into the scan, in the catalog's expression syntax.
    pub row_filter: Option<String>,
    pub snapshot_id: Option<u64>,
    /// Estimate only, not usable as a known cardinality.
    pub table_len_estimate: usize,
}

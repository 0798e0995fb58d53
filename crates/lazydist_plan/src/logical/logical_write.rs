use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::arena::NodeId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalParquetWrite {
    pub source: NodeId,
    pub path: String,
    pub compression: String,
    pub row_group_size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalIcebergWrite {
    pub source: NodeId,
    pub table_location: String,
    pub properties: BTreeMap<String, String>,
}

/// Writes vectors to an index in an external vector store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalVectorStoreWrite {
    pub source: NodeId,
    pub bucket: String,
    pub index: String,
    pub region: Option<String>,
}

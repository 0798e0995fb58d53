use serde::{Deserialize, Serialize};

use super::logical_aggregate::{LogicalAggregate, LogicalDistinct};
use super::logical_join::LogicalComparisonJoin;
use super::logical_order::{LogicalLimit, LogicalOrder};
use super::logical_project::{LogicalFilter, LogicalProjection};
use super::logical_scan::{
    LogicalFrameReadParallel,
    LogicalFrameReadSeq,
    LogicalIcebergRead,
    LogicalParquetRead,
};
use super::logical_setop::LogicalSetOperation;
use super::logical_write::{LogicalIcebergWrite, LogicalParquetWrite, LogicalVectorStoreWrite};
use crate::arena::NodeId;
use crate::operand::Operand;

/// A relational operator in the plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LogicalOperator {
    Projection(LogicalProjection),
    Filter(LogicalFilter),
    Aggregate(LogicalAggregate),
    Distinct(LogicalDistinct),
    ComparisonJoin(LogicalComparisonJoin),
    SetOperation(LogicalSetOperation),
    Limit(LogicalLimit),
    Order(LogicalOrder),
    ParquetRead(LogicalParquetRead),
    FrameReadSeq(LogicalFrameReadSeq),
    FrameReadParallel(LogicalFrameReadParallel),
    IcebergRead(LogicalIcebergRead),
    ParquetWrite(LogicalParquetWrite),
    IcebergWrite(LogicalIcebergWrite),
    VectorStoreWrite(LogicalVectorStoreWrite),
}

impl LogicalOperator {
    /// Backend constructor name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Projection(_) => "LogicalProjection",
            Self::Filter(_) => "LogicalFilter",
            Self::Aggregate(_) => "LogicalAggregate",
            Self::Distinct(_) => "LogicalDistinct",
            Self::ComparisonJoin(_) => "LogicalComparisonJoin",
            Self::SetOperation(_) => "LogicalSetOperation",
            Self::Limit(_) => "LogicalLimit",
            Self::Order(_) => "LogicalOrder",
            Self::ParquetRead(_) => "LogicalGetParquetRead",
            Self::FrameReadSeq(_) => "LogicalGetFrameReadSeq",
            Self::FrameReadParallel(_) => "LogicalGetFrameReadParallel",
            Self::IcebergRead(_) => "LogicalGetIcebergRead",
            Self::ParquetWrite(_) => "LogicalParquetWrite",
            Self::IcebergWrite(_) => "LogicalIcebergWrite",
            Self::VectorStoreWrite(_) => "LogicalVectorStoreWrite",
        }
    }

    /// If converting this node's inputs must never share backend handles,
    /// since both sides may be the same sub-plan.
    pub fn is_binary_relation(&self) -> bool {
        matches!(self, Self::ComparisonJoin(_) | Self::SetOperation(_))
    }

    /// Relational inputs, in order.
    pub fn inputs(&self) -> Vec<NodeId> {
        match self {
            Self::Projection(n) => vec![n.source],
            Self::Filter(n) => vec![n.source],
            Self::Aggregate(n) => vec![n.source],
            Self::Distinct(n) => vec![n.source],
            Self::ComparisonJoin(n) => vec![n.left, n.right],
            Self::SetOperation(n) => vec![n.left, n.right],
            Self::Limit(n) => vec![n.source],
            Self::Order(n) => vec![n.source],
            Self::ParquetWrite(n) => vec![n.source],
            Self::IcebergWrite(n) => vec![n.source],
            Self::VectorStoreWrite(n) => vec![n.source],
            Self::ParquetRead(_)
            | Self::FrameReadSeq(_)
            | Self::FrameReadParallel(_)
            | Self::IcebergRead(_) => Vec::new(),
        }
    }

    /// Expressions held by this operator.
    pub fn exprs(&self) -> Vec<NodeId> {
        match self {
            Self::Projection(n) => n.exprs.clone(),
            Self::Filter(n) => vec![n.predicate],
            Self::Aggregate(n) => n.aggregates.clone(),
            Self::Distinct(n) => n.exprs.clone(),
            _ => Vec::new(),
        }
    }

    /// Operands passed to the backend, in order.
    ///
    /// The first input is always the first operand.
    pub fn operands(&self) -> Vec<Operand<'_>> {
        match self {
            Self::Projection(n) => vec![Operand::Input(n.source), Operand::exprs(&n.exprs)],
            Self::Filter(n) => vec![Operand::Input(n.source), Operand::Expr(n.predicate)],
            Self::Aggregate(n) => vec![
                Operand::Input(n.source),
                Operand::Indices(&n.keys),
                Operand::exprs(&n.aggregates),
            ],
            Self::Distinct(n) => vec![Operand::Input(n.source), Operand::exprs(&n.exprs)],
            Self::ComparisonJoin(n) => vec![
                Operand::Input(n.left),
                Operand::Input(n.right),
                Operand::Text(n.join_type.as_str()),
                Operand::List(
                    n.conditions
                        .iter()
                        .map(|c| {
                            Operand::List(vec![
                                Operand::Index(c.left),
                                Operand::Index(c.right),
                                Operand::Text(c.op.as_str()),
                            ])
                        })
                        .collect(),
                ),
            ],
            Self::SetOperation(n) => vec![
                Operand::Input(n.left),
                Operand::Input(n.right),
                Operand::Text(n.kind.as_str()),
            ],
            Self::Limit(n) => vec![
                Operand::Input(n.source),
                Operand::Index(n.limit),
                Operand::Index(n.offset),
            ],
            Self::Order(n) => vec![
                Operand::Input(n.source),
                Operand::List(
                    n.keys
                        .iter()
                        .map(|k| {
                            Operand::List(vec![
                                Operand::Index(k.column),
                                Operand::Bool(k.ascending),
                                Operand::Bool(k.nulls_first),
                            ])
                        })
                        .collect(),
                ),
            ],
            Self::ParquetRead(n) => vec![
                Operand::Text(&n.path),
                Operand::Options(&n.storage_options),
            ],
            Self::FrameReadSeq(n) => vec![Operand::Data(&n.data)],
            Self::FrameReadParallel(n) => {
                vec![Operand::Distributed(&n.arg), Operand::Index(n.num_rows)]
            }
            Self::IcebergRead(n) => vec![
                Operand::Text(&n.table_identifier),
                Operand::Text(&n.catalog_name),
                Operand::Options(&n.catalog_properties),
                match &n.row_filter {
                    Some(filter) => Operand::Text(filter),
                    None => Operand::Absent,
                },
                match n.snapshot_id {
                    Some(id) => Operand::Index(id as usize),
                    None => Operand::Absent,
                },
                Operand::Index(n.table_len_estimate),
            ],
            Self::ParquetWrite(n) => vec![
                Operand::Input(n.source),
                Operand::Text(&n.path),
                Operand::Text(&n.compression),
                Operand::Index(n.row_group_size),
            ],
            Self::IcebergWrite(n) => vec![
                Operand::Input(n.source),
                Operand::Text(&n.table_location),
                Operand::Options(&n.properties),
            ],
            Self::VectorStoreWrite(n) => vec![
                Operand::Input(n.source),
                Operand::Text(&n.bucket),
                Operand::Text(&n.index),
                match &n.region {
                    Some(region) => Operand::Text(region),
                    None => Operand::Absent,
                },
            ],
        }
    }
}

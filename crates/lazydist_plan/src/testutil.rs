//! Test helpers: small tables and a backend that records what it's asked
//! to do.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use lazydist_error::{DbError, Result};
use lazydist_types::batch::Batch;
use lazydist_types::datatype::DataType;
use lazydist_types::field::{Field, Schema};
use lazydist_types::scalar::ScalarValue;

use crate::backend::{BackendArg, PlanBackend};
use crate::schema::{OutputKind, OutputSchema};

/// Table with Int64 columns `a` = `0..n` and `b` = `a * 10`.
pub fn int_batch(n: usize) -> Batch {
    let schema = Schema::new([
        Field::new("a", DataType::Int64, false),
        Field::new("b", DataType::Int64, false),
    ]);
    let a = (0..n as i64).map(ScalarValue::Int64).collect();
    let b = (0..n as i64).map(|v| ScalarValue::Int64(v * 10)).collect();
    Batch::try_new(schema, vec![a, b]).unwrap()
}

pub fn int_column(name: &str) -> OutputSchema {
    OutputSchema::single_column(Field::new(name, DataType::Int64, true))
}

pub fn bool_column() -> OutputSchema {
    OutputSchema::single_column(Field::new("pred", DataType::Boolean, true))
}

/// Single row table with one UInt64 column.
pub fn count_batch(count: u64) -> Batch {
    let schema = Schema::new([Field::new("count_star", DataType::UInt64, false)]);
    Batch::try_new(schema, vec![vec![ScalarValue::UInt64(count)]]).unwrap()
}

#[derive(Debug)]
pub struct MockNode {
    pub seq: usize,
    pub name: String,
    pub schema: OutputSchema,
    /// Handles passed as owned.
    pub children: Vec<MockHandle>,
    /// Tables passed to this node.
    pub data: Vec<Batch>,
    consumed: AtomicBool,
}

impl MockNode {
    pub fn is_consumed(&self) -> bool {
        self.consumed.load(Ordering::SeqCst)
    }

    pub fn data_rows(&self) -> Vec<usize> {
        self.data.iter().map(|b| b.num_rows()).collect()
    }

    /// First table found in the tree, depth first.
    pub fn first_data(&self) -> Option<&Batch> {
        self.data
            .first()
            .or_else(|| self.children.iter().find_map(|c| c.first_data()))
    }
}

pub type MockHandle = Arc<MockNode>;

/// Backend that builds a tree of [`MockNode`]s.
///
/// Fails if a handle is used after it was passed as owned, the same way a
/// backend would fail on a moved-from pointer.
#[derive(Debug, Default)]
pub struct MockBackend {
    /// Node names in creation order.
    pub created: Vec<String>,
    pub optimized: usize,
    pub executed: usize,
    /// Returned from `cardinality` for every plan.
    pub cardinality: Option<usize>,
    /// Returned from `execute`, in order. Once exhausted `execute` returns
    /// the first table scanned by the plan.
    pub results: VecDeque<Batch>,
    /// Fail creating nodes with this name.
    pub fail_on: Option<String>,
    /// Last plan passed to `execute`.
    pub last_executed: Option<MockHandle>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cardinality(mut self, cardinality: usize) -> Self {
        self.cardinality = Some(cardinality);
        self
    }

    pub fn with_result(mut self, batch: Batch) -> Self {
        self.results.push_back(batch);
        self
    }

    fn check_args(
        args: &[BackendArg<MockHandle>],
        children: &mut Vec<MockHandle>,
        data: &mut Vec<Batch>,
    ) -> Result<()> {
        for arg in args {
            match arg {
                BackendArg::Owned(h) => {
                    if h.consumed.swap(true, Ordering::SeqCst) {
                        return Err(DbError::internal("Owned handle already transferred")
                            .with_field("node", &h.name));
                    }
                    children.push(h.clone());
                }
                BackendArg::Borrowed(h) => {
                    if h.is_consumed() {
                        return Err(DbError::internal("Borrowed handle already transferred")
                            .with_field("node", &h.name));
                    }
                }
                BackendArg::List(items) => Self::check_args(items, children, data)?,
                BackendArg::Data(batch) => data.push(batch.clone()),
                _ => (),
            }
        }
        Ok(())
    }
}

impl PlanBackend for MockBackend {
    type Handle = MockHandle;

    fn create_node(
        &mut self,
        name: &str,
        schema: &OutputSchema,
        args: Vec<BackendArg<MockHandle>>,
    ) -> Result<MockHandle> {
        if self.fail_on.as_deref() == Some(name) {
            return Err(DbError::backend("mock failure").with_field("node", name));
        }
        let mut children = Vec::new();
        let mut data = Vec::new();
        Self::check_args(&args, &mut children, &mut data)?;

        self.created.push(name.to_string());
        Ok(Arc::new(MockNode {
            seq: self.created.len() - 1,
            name: name.to_string(),
            schema: schema.clone(),
            children,
            data,
            consumed: AtomicBool::new(false),
        }))
    }

    fn optimize(&mut self, plan: MockHandle) -> Result<MockHandle> {
        self.optimized += 1;
        Ok(plan)
    }

    fn execute(&mut self, plan: MockHandle, _kind: OutputKind, schema: &Schema) -> Result<Batch> {
        self.executed += 1;
        let batch = match self.results.pop_front() {
            Some(batch) => batch,
            None => plan
                .first_data()
                .cloned()
                .unwrap_or_else(|| Batch::empty(schema.clone())),
        };
        self.last_executed = Some(plan);
        Ok(batch)
    }

    fn count_nodes(&self, plan: &MockHandle) -> usize {
        1 + plan
            .children
            .iter()
            .map(|c| self.count_nodes(c))
            .sum::<usize>()
    }

    fn cardinality(&self, _plan: &MockHandle) -> Option<usize> {
        self.cardinality
    }
}

//! Argument marshaling.
//!
//! Every argument is classified before anything is sent. The coordinator
//! then broadcasts a skeleton of the arguments where distributable values
//! are replaced with placeholders, followed by the data for each
//! placeholder in traversal order (positional arguments, then keyword
//! arguments sorted by name, tuples depth first, map entries and context
//! tables sorted by name).

use std::collections::BTreeMap;

use lazydist_error::{DbError, Result};
use lazydist_types::batch::Batch;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::arg::{Arg, ContextArg, ContextTable};
use crate::channel::{Communicator, WorkerEndpoint};
use crate::frame::{DistributedFrame, Residency};
use crate::message::{Frame, expect_frame};
use crate::value::{ResultId, TableContext, TableSource, Value};
use crate::worker::ResultStore;

/// How a placeholder's data is transferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArgMetadata {
    /// Full copy sent to every rank.
    Broadcast,
    /// Split into one block per rank.
    Scatter,
    /// Already stored on the workers, only the result id is sent.
    Lazy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContextTableMeta {
    Path(String),
    Placeholder(ArgMetadata),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextMetadata {
    pub tables: BTreeMap<String, ContextTableMeta>,
    pub catalog: Option<String>,
    pub default_tz: Option<String>,
}

/// Classification of a single argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgSpec {
    PassThrough,
    Transfer(ArgMetadata),
    Tuple(Vec<ArgSpec>),
    Map(BTreeMap<String, ArgSpec>),
    Context(ContextMetadata),
}

/// Argument as it appears in the broadcast skeleton.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WireArg {
    Value(Value),
    Placeholder(ArgMetadata),
    Tuple(Vec<WireArg>),
    Map(BTreeMap<String, WireArg>),
    Context(ContextMetadata),
}

fn transfer_kind(replicated: bool) -> ArgMetadata {
    if replicated {
        ArgMetadata::Broadcast
    } else {
        ArgMetadata::Scatter
    }
}

fn push_flag(dist_flags: &mut Vec<String>, name: &str) {
    if !dist_flags.iter().any(|f| f == name) {
        dist_flags.push(name.to_string());
    }
}

fn classify_frame(
    frame: &DistributedFrame,
    name: &str,
    replicated: bool,
    dist_flags: &mut Vec<String>,
) -> Result<ArgMetadata> {
    match frame.residency() {
        Residency::Resident(_) => Ok(ArgMetadata::Lazy),
        Residency::Local => {
            push_flag(dist_flags, name);
            Ok(transfer_kind(replicated))
        }
        Residency::Stale(id) => Err(DbError::protocol(
            "Argument references a result from a process group that was reset",
        )
        .with_field("param", name)
        .with_field("result_id", id)),
    }
}

/// Classify an argument for parameter `name`.
///
/// Names of parameters that end up scattered or broadcast are appended to
/// `dist_flags`.
pub fn classify_arg(
    arg: &Arg,
    name: &str,
    replicated: bool,
    dist_flags: &mut Vec<String>,
) -> Result<ArgSpec> {
    match arg {
        Arg::Frame(frame) => Ok(ArgSpec::Transfer(classify_frame(
            frame, name, replicated, dist_flags,
        )?)),
        Arg::Tuple(items) => {
            let specs = items
                .iter()
                .map(|item| classify_arg(item, name, replicated, dist_flags))
                .collect::<Result<Vec<_>>>()?;
            Ok(ArgSpec::Tuple(specs))
        }
        Arg::Context(ctx) => classify_context(ctx, name, replicated, dist_flags),
        Arg::Value(value) => Ok(classify_value(value, name, replicated, dist_flags)),
    }
}

fn classify_value(
    value: &Value,
    name: &str,
    replicated: bool,
    dist_flags: &mut Vec<String>,
) -> ArgSpec {
    match value {
        Value::Table(_) => {
            push_flag(dist_flags, name);
            ArgSpec::Transfer(transfer_kind(replicated))
        }
        Value::Tuple(items) => {
            let specs: Vec<_> = items
                .iter()
                .map(|item| classify_value(item, name, replicated, dist_flags))
                .collect();
            if specs.iter().all(|s| *s == ArgSpec::PassThrough) {
                ArgSpec::PassThrough
            } else {
                ArgSpec::Tuple(specs)
            }
        }
        Value::Map(entries) => {
            let specs: BTreeMap<_, _> = entries
                .iter()
                .map(|(key, item)| (key.clone(), classify_value(item, name, replicated, dist_flags)))
                .collect();
            if specs.values().all(|s| *s == ArgSpec::PassThrough) {
                ArgSpec::PassThrough
            } else {
                ArgSpec::Map(specs)
            }
        }
        _ => ArgSpec::PassThrough,
    }
}

fn classify_context(
    ctx: &ContextArg,
    name: &str,
    replicated: bool,
    dist_flags: &mut Vec<String>,
) -> Result<ArgSpec> {
    if ctx.tables.is_empty() {
        return Ok(ArgSpec::PassThrough);
    }

    let mut tables = BTreeMap::new();
    for (table_name, table) in &ctx.tables {
        let meta = match table {
            ContextTable::Path(path) => ContextTableMeta::Path(path.clone()),
            ContextTable::Data(_) => {
                push_flag(dist_flags, name);
                ContextTableMeta::Placeholder(transfer_kind(replicated))
            }
            ContextTable::Frame(frame) => ContextTableMeta::Placeholder(classify_frame(
                frame, name, replicated, dist_flags,
            )?),
        };
        tables.insert(table_name.clone(), meta);
    }

    Ok(ArgSpec::Context(ContextMetadata {
        tables,
        catalog: ctx.catalog.clone(),
        default_tz: ctx.default_tz.clone(),
    }))
}

fn mismatch() -> DbError {
    DbError::internal("Argument does not match its classification")
}

/// Build the skeleton for an argument.
pub fn build_skeleton(arg: &Arg, spec: &ArgSpec) -> Result<WireArg> {
    match (spec, arg) {
        (ArgSpec::Transfer(meta), _) => Ok(WireArg::Placeholder(*meta)),
        (ArgSpec::PassThrough, Arg::Value(value)) => Ok(WireArg::Value(value.clone())),
        (ArgSpec::PassThrough, Arg::Context(ctx)) => Ok(WireArg::Value(Value::Context(
            TableContext {
                tables: BTreeMap::new(),
                catalog: ctx.catalog.clone(),
                default_tz: ctx.default_tz.clone(),
            },
        ))),
        (ArgSpec::Tuple(specs), Arg::Tuple(items)) if specs.len() == items.len() => {
            let wire = items
                .iter()
                .zip(specs)
                .map(|(item, spec)| build_skeleton(item, spec))
                .collect::<Result<Vec<_>>>()?;
            Ok(WireArg::Tuple(wire))
        }
        (ArgSpec::Tuple(specs), Arg::Value(Value::Tuple(items))) if specs.len() == items.len() => {
            let wire = items
                .iter()
                .zip(specs)
                .map(|(item, spec)| value_skeleton(item, spec))
                .collect::<Result<Vec<_>>>()?;
            Ok(WireArg::Tuple(wire))
        }
        (ArgSpec::Map(_), Arg::Value(value)) => value_skeleton(value, spec),
        (ArgSpec::Context(meta), Arg::Context(_)) => Ok(WireArg::Context(meta.clone())),
        _ => Err(mismatch()),
    }
}

fn map_spec<'a>(specs: &'a BTreeMap<String, ArgSpec>, key: &str) -> Result<&'a ArgSpec> {
    specs.get(key).ok_or_else(|| mismatch().with_field("key", key))
}

fn value_skeleton(value: &Value, spec: &ArgSpec) -> Result<WireArg> {
    match (spec, value) {
        (ArgSpec::Transfer(meta), _) => Ok(WireArg::Placeholder(*meta)),
        (ArgSpec::PassThrough, _) => Ok(WireArg::Value(value.clone())),
        (ArgSpec::Tuple(specs), Value::Tuple(items)) if specs.len() == items.len() => {
            let wire = items
                .iter()
                .zip(specs)
                .map(|(item, spec)| value_skeleton(item, spec))
                .collect::<Result<Vec<_>>>()?;
            Ok(WireArg::Tuple(wire))
        }
        (ArgSpec::Map(specs), Value::Map(entries)) if specs.len() == entries.len() => {
            let wire = entries
                .iter()
                .map(|(key, item)| Ok((key.clone(), value_skeleton(item, map_spec(specs, key)?)?)))
                .collect::<Result<BTreeMap<_, _>>>()?;
            Ok(WireArg::Map(wire))
        }
        _ => Err(mismatch()),
    }
}

fn send_batch(comm: &mut Communicator, batch: Batch, meta: ArgMetadata) -> Result<()> {
    match meta {
        ArgMetadata::Broadcast => comm.broadcast(&Frame::Data(batch)),
        ArgMetadata::Scatter => {
            let parts = batch.split_even(comm.size())?;
            comm.scatter(parts.into_iter().map(Frame::Data).collect())
        }
        ArgMetadata::Lazy => Err(DbError::internal("Cannot send a table as a lazy reference")),
    }
}

fn send_frame(comm: &mut Communicator, frame: &DistributedFrame, meta: ArgMetadata) -> Result<()> {
    match meta {
        ArgMetadata::Lazy => {
            let id = frame
                .result_id()
                .ok_or_else(|| DbError::internal("Lazy argument without a result id"))?;
            comm.broadcast(&Frame::ResultId(id.clone()))
        }
        other => send_batch(comm, frame.to_batch()?, other),
    }
}

/// Send the data for every placeholder in an argument.
pub fn send_arg_data(comm: &mut Communicator, arg: &Arg, spec: &ArgSpec) -> Result<()> {
    match (spec, arg) {
        (ArgSpec::PassThrough, _) => Ok(()),
        (ArgSpec::Transfer(meta), Arg::Frame(frame)) => send_frame(comm, frame, *meta),
        (ArgSpec::Transfer(_), Arg::Value(value)) => send_value_data(comm, value, spec),
        (ArgSpec::Tuple(specs), Arg::Tuple(items)) => {
            for (item, spec) in items.iter().zip(specs) {
                send_arg_data(comm, item, spec)?;
            }
            Ok(())
        }
        (ArgSpec::Tuple(_) | ArgSpec::Map(_), Arg::Value(value)) => {
            send_value_data(comm, value, spec)
        }
        (ArgSpec::Context(meta), Arg::Context(ctx)) => {
            for (name, table_meta) in &meta.tables {
                let ContextTableMeta::Placeholder(transfer) = table_meta else {
                    continue;
                };
                match ctx.tables.get(name) {
                    Some(ContextTable::Data(batch)) => {
                        send_batch(comm, batch.clone(), *transfer)?
                    }
                    Some(ContextTable::Frame(frame)) => send_frame(comm, frame, *transfer)?,
                    _ => return Err(mismatch().with_field("table", name)),
                }
            }
            Ok(())
        }
        _ => Err(mismatch()),
    }
}

fn send_value_data(comm: &mut Communicator, value: &Value, spec: &ArgSpec) -> Result<()> {
    match (spec, value) {
        (ArgSpec::PassThrough, _) => Ok(()),
        (ArgSpec::Transfer(meta), Value::Table(batch)) => send_batch(comm, batch.clone(), *meta),
        (ArgSpec::Tuple(specs), Value::Tuple(items)) => {
            for (item, spec) in items.iter().zip(specs) {
                send_value_data(comm, item, spec)?;
            }
            Ok(())
        }
        (ArgSpec::Map(specs), Value::Map(entries)) => {
            for (key, item) in entries {
                send_value_data(comm, item, map_spec(specs, key)?)?;
            }
            Ok(())
        }
        _ => Err(mismatch()),
    }
}

/// Collect mutable references to every lazily referenced frame, in
/// traversal order.
pub(crate) fn lazy_frames_mut<'a>(
    arg: &'a mut Arg,
    spec: &ArgSpec,
    out: &mut Vec<&'a mut DistributedFrame>,
) {
    match (spec, arg) {
        (ArgSpec::Transfer(ArgMetadata::Lazy), Arg::Frame(frame)) => out.push(frame),
        (ArgSpec::Tuple(specs), Arg::Tuple(items)) => {
            for (item, spec) in items.iter_mut().zip(specs) {
                lazy_frames_mut(item, spec, out);
            }
        }
        _ => (),
    }
}

/// Worker side reconstruction of arguments from a skeleton.
pub(crate) struct ArgReceiver<'a, E: WorkerEndpoint> {
    endpoint: &'a mut E,
    results: &'a ResultStore,
    /// Result ids of lazy arguments, in traversal order.
    lazy_ids: Vec<ResultId>,
    /// First non-protocol error. Reported as this rank's failure once all
    /// data has been received.
    deferred: Option<DbError>,
}

impl<'a, E: WorkerEndpoint> ArgReceiver<'a, E> {
    pub(crate) fn new(endpoint: &'a mut E, results: &'a ResultStore) -> Self {
        ArgReceiver {
            endpoint,
            results,
            lazy_ids: Vec::new(),
            deferred: None,
        }
    }

    pub(crate) fn finish(self) -> (Vec<ResultId>, Option<DbError>) {
        (self.lazy_ids, self.deferred)
    }

    /// Receive data for an argument. Errors are only returned for channel
    /// failures.
    pub(crate) fn recv(&mut self, wire: WireArg) -> Result<Value> {
        match wire {
            WireArg::Value(value) => Ok(value),
            WireArg::Placeholder(meta) => self.recv_placeholder(meta, true),
            WireArg::Tuple(items) => {
                let values = items
                    .into_iter()
                    .map(|item| self.recv(item))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Value::Tuple(values))
            }
            WireArg::Map(items) => {
                let entries = items
                    .into_iter()
                    .map(|(key, item)| Ok((key, self.recv(item)?)))
                    .collect::<Result<BTreeMap<_, _>>>()?;
                Ok(Value::Map(entries))
            }
            WireArg::Context(meta) => {
                let mut tables = BTreeMap::new();
                for (name, table_meta) in meta.tables {
                    let source = match table_meta {
                        ContextTableMeta::Path(path) => TableSource::Path(path),
                        ContextTableMeta::Placeholder(transfer) => {
                            match self.recv_placeholder(transfer, false)? {
                                Value::Table(batch) => TableSource::Data(batch),
                                // Missing lazy result, already recorded.
                                _ => continue,
                            }
                        }
                    };
                    tables.insert(name, source);
                }
                Ok(Value::Context(TableContext {
                    tables,
                    catalog: meta.catalog,
                    default_tz: meta.default_tz,
                }))
            }
        }
    }

    fn recv_placeholder(&mut self, meta: ArgMetadata, track_lazy: bool) -> Result<Value> {
        match meta {
            ArgMetadata::Broadcast | ArgMetadata::Scatter => {
                let batch = expect_frame!(self.endpoint.recv()?, Data)?;
                Ok(Value::Table(batch))
            }
            ArgMetadata::Lazy => {
                let id = expect_frame!(self.endpoint.recv()?, ResultId)?;
                let value = match self.results.get(&id) {
                    Some(batch) => Value::Table(batch.clone()),
                    None => {
                        debug!(result_id = %id, "lazy argument not found");
                        if self.deferred.is_none() {
                            self.deferred = Some(
                                DbError::protocol("Result not found on worker")
                                    .with_field("result_id", &id)
                                    .with_field("rank", self.endpoint.rank()),
                            );
                        }
                        Value::Null
                    }
                };
                if track_lazy {
                    self.lazy_ids.push(id);
                }
                Ok(value)
            }
        }
    }
}

use std::collections::BTreeMap;
use std::error::Error;

use lazydist_error::{DbError, ErrorKind};
use lazydist_types::batch::Batch;
use lazydist_types::datatype::DataType;
use lazydist_types::field::{Field, Schema};
use lazydist_types::scalar::ScalarValue;

use crate::arg::{Arg, ContextArg, ContextTable};
use crate::builtins::{ECHO, PARTITION_INFO};
use crate::computation::{Computation, ComputationRegistry, Output, table_arg};
use crate::config::SpawnConfig;
use crate::frame::{CallResult, DistributedFrame, Residency};
use crate::lazy_arg::LazyDistributedArg;
use crate::marshal::{ArgMetadata, ArgSpec, classify_arg};
use crate::spawner::Spawner;
use crate::value::{ResultId, TableSource, Value};

const LOCAL_ROWS: &str = "local_rows";
const STORED_RESULTS: &str = "stored_results";
const FAIL_ON: &str = "fail_on";
const SPLIT: &str = "split";
const READ_ENV: &str = "read_env";
const PANIC: &str = "panic";
const KEEP_FIRST_ROW: &str = "keep_first_row";
const CONTEXT_ROWS: &str = "context_rows";
const SIZE_AND_PART: &str = "size_and_part";

fn test_registry() -> ComputationRegistry {
    let mut registry = ComputationRegistry::with_builtins();

    // Rank 0's view of the row count of its input, positional or "df".
    registry.register(LOCAL_ROWS, |_ctx, args, kwargs| {
        let rows = match kwargs.get("df") {
            Some(value) => value
                .as_table()
                .ok_or_else(|| DbError::invalid_input("Expected a table"))?
                .num_rows(),
            None => table_arg(&args, 0)?.num_rows(),
        };
        Ok(Output::Replicated(Value::Scalar(ScalarValue::UInt64(rows as u64))))
    });

    registry.register(STORED_RESULTS, |ctx, _args, _kwargs| {
        let n = ctx.results_mut().len();
        Ok(Output::Replicated(Value::Scalar(ScalarValue::UInt64(n as u64))))
    });

    // Fails with the same error on every rank listed in the first argument.
    registry.register(FAIL_ON, |ctx, args, _kwargs| {
        let ranks = match args.first() {
            Some(Value::Tuple(ranks)) => ranks.clone(),
            _ => Vec::new(),
        };
        let fail = ranks
            .iter()
            .any(|r| r.as_scalar().and_then(|s| s.try_as_usize()) == Some(ctx.rank()));
        if fail {
            return Err(DbError::invalid_input("column 'b' not found"));
        }
        Ok(Output::Replicated(Value::Null))
    });

    registry.register(SPLIT, |ctx, args, _kwargs| {
        let partition = table_arg(&args, 0)?.clone();
        Ok(Output::Tuple(vec![
            Output::Replicated(Value::Scalar(ScalarValue::UInt64(ctx.size() as u64))),
            Output::Distributed(partition),
        ]))
    });

    registry.register(READ_ENV, |ctx, args, _kwargs| {
        let key = args
            .first()
            .and_then(|v| v.as_scalar())
            .and_then(|s| s.try_as_str())
            .unwrap_or_default()
            .to_string();
        let value = match ctx.env_var(&key) {
            Some(v) => Value::Scalar(ScalarValue::Utf8(v.to_string())),
            None => Value::Null,
        };
        Ok(Output::Replicated(value))
    });

    registry.register(PANIC, |_ctx, _args, _kwargs| panic!("worker exploded"));

    // Truncates the stored partition named by the second argument in place.
    registry.register(KEEP_FIRST_ROW, |ctx, args, _kwargs| {
        let kept = table_arg(&args, 0)?.slice(0, 1);
        let id = args
            .get(1)
            .and_then(|v| v.as_scalar())
            .and_then(|s| s.try_as_str())
            .ok_or_else(|| DbError::invalid_input("Expected a result id"))?;
        ctx.results_mut().insert(ResultId::new(id), kept);
        Ok(Output::Replicated(Value::Null))
    });

    // Per rank row count of context table "t", plus the path of table "p".
    registry.register(CONTEXT_ROWS, |_ctx, args, _kwargs| {
        let Some(Value::Context(context)) = args.first() else {
            return Err(DbError::invalid_input("Expected a context"));
        };
        let rows = match context.tables.get("t") {
            Some(TableSource::Data(batch)) => batch.num_rows(),
            _ => return Err(DbError::invalid_input("Missing table 't'")),
        };
        let path = match context.tables.get("p") {
            Some(TableSource::Path(path)) => Value::Scalar(ScalarValue::Utf8(path.clone())),
            _ => Value::Null,
        };
        let schema = Schema::new([Field::new("rows", DataType::UInt64, false)]);
        let counts = Batch::try_new(schema, vec![vec![ScalarValue::UInt64(rows as u64)]])?;
        Ok(Output::Tuple(vec![
            Output::Distributed(counts),
            Output::Replicated(path),
        ]))
    });

    registry.register(SIZE_AND_PART, |ctx, args, _kwargs| {
        let partition = table_arg(&args, 0)?.clone();
        let mut items = BTreeMap::new();
        items.insert(
            "size".to_string(),
            Output::Replicated(Value::Scalar(ScalarValue::UInt64(ctx.size() as u64))),
        );
        items.insert("part".to_string(), Output::Distributed(partition));
        Ok(Output::Map(items))
    });

    registry
}

fn spawner(n: usize) -> Spawner {
    logutil::init_test();
    Spawner::threaded(SpawnConfig::default().with_num_workers(n), test_registry())
}

fn int_table(rows: i64) -> Batch {
    let schema = Schema::new([Field::new("v", DataType::Int64, false)]);
    let col = (0..rows).map(ScalarValue::Int64).collect();
    Batch::try_new(schema, vec![col]).unwrap()
}

fn call(spawner: &Spawner, computation: &Computation, mut args: Vec<Arg>) -> crate::frame::CallResult {
    spawner
        .submit(computation, &mut args, &mut BTreeMap::new())
        .unwrap()
}

fn scalar_u64(result: crate::frame::CallResult) -> u64 {
    match result.into_value().unwrap() {
        Value::Scalar(ScalarValue::UInt64(v)) => v,
        other => panic!("unexpected value: {other:?}"),
    }
}

#[test]
fn group_spawned_lazily() {
    let spawner = spawner(2);
    assert!(!spawner.is_live());

    let res = call(
        &spawner,
        &Computation::new(ECHO),
        vec![Arg::Value(Value::Scalar(ScalarValue::Int64(42)))],
    );
    assert_eq!(
        Value::Scalar(ScalarValue::Int64(42)),
        res.into_value().unwrap()
    );
    assert!(spawner.is_live());
    assert_eq!(Some(2), spawner.num_workers());
    assert_eq!(Some(1), spawner.generation());
}

#[test]
fn scatter_then_collect() {
    let spawner = spawner(3);
    let table = int_table(10);

    let mut frame = spawner.scatter_data(table.clone()).unwrap();
    assert_eq!(vec![4, 3, 3], frame.metadata().unwrap().partition_rows);
    assert_eq!(10, frame.num_rows());

    assert_eq!(&table, frame.collect().unwrap());
    assert!(!frame.is_distributed());
}

#[test]
fn replicated_param_is_broadcast() {
    let spawner = spawner(3);

    let scattered = Computation::new(LOCAL_ROWS).with_params(["df"]);
    let res = call(&spawner, &scattered, vec![Arg::table(int_table(10))]);
    assert_eq!(4, scalar_u64(res));

    let replicated = Computation::new(LOCAL_ROWS)
        .with_params(["df"])
        .with_replicated(["df"]);
    let res = call(&spawner, &replicated, vec![Arg::table(int_table(10))]);
    assert_eq!(10, scalar_u64(res));
}

#[test]
fn replicated_kwarg_is_broadcast() {
    let spawner = spawner(2);

    let mut kwargs = BTreeMap::new();
    kwargs.insert("df".to_string(), Arg::table(int_table(6)));
    let res = spawner
        .submit(&Computation::new(LOCAL_ROWS), &mut [], &mut kwargs)
        .unwrap();
    assert_eq!(3, scalar_u64(res));

    let mut kwargs = BTreeMap::new();
    kwargs.insert("df".to_string(), Arg::table(int_table(6)));
    let res = spawner
        .submit(
            &Computation::new(LOCAL_ROWS).with_replicated(["df"]),
            &mut [],
            &mut kwargs,
        )
        .unwrap();
    assert_eq!(6, scalar_u64(res));
}

#[test]
fn missing_computation_fails_on_every_rank() {
    let spawner = spawner(2);
    let err = spawner
        .submit(&Computation::new("nope"), &mut [], &mut BTreeMap::new())
        .unwrap_err();
    assert_eq!(ErrorKind::InvalidInput, err.kind());
    assert_eq!("Missing computation", err.get_msg());

    // Group survives the failed call.
    let res = call(&spawner, &Computation::new(ECHO), vec![Arg::Value(Value::Null)]);
    assert_eq!(Value::Null, res.into_value().unwrap());
}

#[test]
fn resident_frame_is_lazy_reference() {
    let spawner = spawner(2);
    let frame = spawner.scatter_data(int_table(5)).unwrap();
    assert!(matches!(frame.residency(), Residency::Resident(_)));

    let mut flags = Vec::new();
    let spec = classify_arg(&Arg::Frame(frame.clone()), "df", false, &mut flags).unwrap();
    assert_eq!(ArgSpec::Transfer(ArgMetadata::Lazy), spec);
    assert!(flags.is_empty());

    // Passed by reference, each rank sees its own partition.
    let mut info = call(
        &spawner,
        &Computation::new(PARTITION_INFO),
        vec![Arg::Frame(frame.clone())],
    )
    .into_frame()
    .unwrap();
    let batch = info.collect().unwrap();
    assert_eq!(
        vec![ScalarValue::UInt64(3), ScalarValue::UInt64(2)],
        batch.column(1).unwrap().to_vec()
    );
}

#[test]
fn identical_failures_return_single_error() {
    let spawner = spawner(3);
    let ranks = Value::Tuple((0..3_u64).map(|r| Value::Scalar(r.into())).collect());

    let err = spawner
        .submit(
            &Computation::new(FAIL_ON),
            &mut [Arg::Value(ranks)],
            &mut BTreeMap::new(),
        )
        .unwrap_err();

    assert_eq!("column 'b' not found", err.get_msg());
    assert_eq!(ErrorKind::InvalidInput, err.kind());
    assert!(err.source().is_none());
}

#[test]
fn single_rank_failure_is_aggregated() {
    let spawner = spawner(3);
    let ranks = Value::Tuple(vec![Value::Scalar(1_u64.into())]);

    let err = spawner
        .submit(
            &Computation::new(FAIL_ON),
            &mut [Arg::Value(ranks)],
            &mut BTreeMap::new(),
        )
        .unwrap_err();

    assert_eq!("Some ranks failed", err.get_msg());
    let cause = err
        .source()
        .and_then(|e| e.downcast_ref::<DbError>())
        .unwrap();
    assert_eq!(Some("1"), cause.field("rank"));
    assert_eq!("column 'b' not found", cause.get_msg());
    assert!(cause.source().is_none());

    // Channel stays in sync after a failure.
    let res = call(&spawner, &Computation::new(ECHO), vec![Arg::Value(Value::Null)]);
    assert_eq!(Value::Null, res.into_value().unwrap());
}

#[test]
fn tuple_output_mixes_replicated_and_distributed() {
    let spawner = spawner(2);
    let res = call(&spawner, &Computation::new(SPLIT), vec![Arg::table(int_table(5))]);

    let mut items = res.into_tuple().unwrap().into_iter();
    assert_eq!(2, scalar_u64(items.next().unwrap()));
    let mut frame = items.next().unwrap().into_frame().unwrap();
    assert_eq!(vec![3, 2], frame.metadata().unwrap().partition_rows);
    assert_eq!(5, frame.collect().unwrap().num_rows());
}

#[test]
fn dropped_frame_frees_worker_result() {
    let spawner = spawner(2);
    let stored = Computation::new(STORED_RESULTS);

    let frame = spawner.scatter_data(int_table(4)).unwrap();
    assert_eq!(1, scalar_u64(call(&spawner, &stored, Vec::new())));

    let clone = frame.clone();
    drop(frame);
    assert_eq!(1, scalar_u64(call(&spawner, &stored, Vec::new())));

    drop(clone);
    assert_eq!(0, scalar_u64(call(&spawner, &stored, Vec::new())));
}

#[test]
fn reset_then_submit_uses_new_group() {
    let spawner = spawner(2);
    let frame = spawner.scatter_data(int_table(4)).unwrap();
    assert_eq!(Some(1), spawner.generation());

    spawner.reset().unwrap();
    assert!(!spawner.is_live());
    assert!(matches!(frame.residency(), Residency::Stale(_)));

    let err = frame.to_batch().unwrap_err();
    assert_eq!(ErrorKind::Protocol, err.kind());

    let err = spawner
        .submit(
            &Computation::new(ECHO),
            &mut [Arg::Frame(frame)],
            &mut BTreeMap::new(),
        )
        .unwrap_err();
    assert_eq!(ErrorKind::Protocol, err.kind());

    let res = call(&spawner, &Computation::new(ECHO), vec![Arg::Value(Value::Null)]);
    assert_eq!(Value::Null, res.into_value().unwrap());
    assert_eq!(Some(2), spawner.generation());
}

#[test]
fn lazy_arg_realized_again_after_reset() {
    let spawner = spawner(2);
    let arg = LazyDistributedArg::new(DistributedFrame::from_batch(int_table(6)));

    let first = arg.init(&spawner).unwrap();
    // Still resident, no new scatter.
    assert_eq!(first, arg.init(&spawner).unwrap());

    spawner.reset().unwrap();
    let second = arg.init(&spawner).unwrap();
    assert_ne!(first, second);
    assert_eq!(Some(second), arg.result_id());
}

#[test]
fn lazy_arg_reuses_resident_frame() {
    let spawner = spawner(2);
    let frame = spawner.scatter_data(int_table(6)).unwrap();
    let id = frame.result_id().cloned().unwrap();

    let arg = LazyDistributedArg::new(frame);
    assert_eq!(id, arg.init(&spawner).unwrap());
}

#[test]
fn uninitialized_lazy_arg_does_not_serialize() {
    let arg = LazyDistributedArg::new(DistributedFrame::from_batch(int_table(1)));
    assert!(serde_json::to_string(&arg).is_err());
}

#[test]
fn explicit_propagated_env_reaches_workers() {
    let Ok(path) = std::env::var("PATH") else {
        return;
    };
    let spawner = spawner(2);

    let without = call(
        &spawner,
        &Computation::new(READ_ENV),
        vec![Arg::Value(Value::Scalar("PATH".into()))],
    );
    assert_eq!(Value::Null, without.into_value().unwrap());

    let with = call(
        &spawner,
        &Computation::new(READ_ENV).with_propagate_env(["PATH"]),
        vec![Arg::Value(Value::Scalar("PATH".into()))],
    );
    assert_eq!(
        Value::Scalar(ScalarValue::Utf8(path)),
        with.into_value().unwrap()
    );
}

#[test]
fn panicking_computation_is_remote_error() {
    let spawner = spawner(2);
    let err = spawner
        .submit(&Computation::new(PANIC), &mut [], &mut BTreeMap::new())
        .unwrap_err();
    assert_eq!(ErrorKind::Remote, err.kind());
    assert_eq!(Some("worker exploded"), err.field("panic"));
    assert!(spawner.is_live());
}

#[test]
fn in_place_update_refreshes_frame_metadata() {
    let spawner = spawner(3);
    let frame = spawner.scatter_data(int_table(10)).unwrap();
    assert_eq!(vec![4, 3, 3], frame.metadata().unwrap().partition_rows);
    let id = frame.result_id().unwrap().as_str().to_string();

    let mut args = vec![
        Arg::Frame(frame),
        Arg::Value(Value::Scalar(ScalarValue::Utf8(id))),
    ];
    spawner
        .submit(
            &Computation::new(KEEP_FIRST_ROW),
            &mut args,
            &mut BTreeMap::new(),
        )
        .unwrap();

    let Arg::Frame(frame) = &mut args[0] else {
        panic!("frame argument replaced");
    };
    assert_eq!(vec![1, 1, 1], frame.metadata().unwrap().partition_rows);
    assert_eq!(3, frame.num_rows());
    assert_eq!(
        vec![
            ScalarValue::Int64(0),
            ScalarValue::Int64(4),
            ScalarValue::Int64(7)
        ],
        frame.collect().unwrap().column(0).unwrap().to_vec()
    );
}

#[test]
fn context_tables_rebuilt_on_workers() {
    let spawner = spawner(3);
    let context = || {
        Arg::Context(
            ContextArg::default()
                .with_table("t", ContextTable::Data(int_table(10)))
                .with_table("p", ContextTable::Path("s3://bucket/p.parquet".into())),
        )
    };
    let rows_per_rank = |res: CallResult| {
        let mut items = res.into_tuple().unwrap().into_iter();
        let mut counts = items.next().unwrap().into_frame().unwrap();
        let path = items.next().unwrap().into_value().unwrap();
        assert_eq!(
            Value::Scalar(ScalarValue::Utf8("s3://bucket/p.parquet".into())),
            path
        );
        counts.collect().unwrap().column(0).unwrap().to_vec()
    };

    let scattered = Computation::new(CONTEXT_ROWS).with_params(["ctx"]);
    let res = call(&spawner, &scattered, vec![context()]);
    assert_eq!(
        vec![
            ScalarValue::UInt64(4),
            ScalarValue::UInt64(3),
            ScalarValue::UInt64(3)
        ],
        rows_per_rank(res)
    );

    let replicated = scattered.clone().with_replicated(["ctx"]);
    let res = call(&spawner, &replicated, vec![context()]);
    assert_eq!(vec![ScalarValue::UInt64(10); 3], rows_per_rank(res));
}

#[test]
fn map_output_mixes_replicated_and_distributed() {
    let spawner = spawner(2);
    let res = call(
        &spawner,
        &Computation::new(SIZE_AND_PART),
        vec![Arg::table(int_table(5))],
    );

    let CallResult::Map(mut items) = res else {
        panic!("expected a map result");
    };
    assert_eq!(
        vec!["part", "size"],
        items.keys().map(|k| k.as_str()).collect::<Vec<_>>()
    );
    assert_eq!(2, scalar_u64(items.remove("size").unwrap()));
    let mut frame = items.remove("part").unwrap().into_frame().unwrap();
    assert_eq!(vec![3, 2], frame.metadata().unwrap().partition_rows);
    assert_eq!(&int_table(5), frame.collect().unwrap());
}

//! Computations every worker knows about.

use lazydist_error::Result;
use lazydist_types::batch::Batch;
use lazydist_types::datatype::DataType;
use lazydist_types::field::{Field, Schema};
use lazydist_types::scalar::ScalarValue;

use crate::computation::{ComputationRegistry, Output, table_arg};
use crate::value::Value;

/// Keep the received partition as a distributed result.
pub const SCATTER_DATA: &str = "scatter_data";
/// Return the arguments unchanged.
pub const ECHO: &str = "echo";
/// One row per rank with the rank and the row count of its partition.
pub const PARTITION_INFO: &str = "partition_info";

pub fn register_builtins(registry: &mut ComputationRegistry) {
    registry.register(SCATTER_DATA, |_ctx, args, _kwargs| {
        let partition = table_arg(&args, 0)?.clone();
        Ok(Output::Distributed(partition))
    });

    registry.register(ECHO, |_ctx, mut args, _kwargs| {
        let value = if args.len() == 1 {
            args.remove(0)
        } else {
            Value::Tuple(args)
        };
        Ok(Output::Replicated(value))
    });

    registry.register(PARTITION_INFO, |ctx, args, _kwargs| {
        let partition = table_arg(&args, 0)?;
        Ok(Output::Distributed(partition_info(
            ctx.rank(),
            partition.num_rows(),
        )?))
    });
}

fn partition_info(rank: usize, num_rows: usize) -> Result<Batch> {
    let schema = Schema::new([
        Field::new("rank", DataType::UInt64, false),
        Field::new("num_rows", DataType::UInt64, false),
    ]);
    Batch::try_new(
        schema,
        vec![
            vec![ScalarValue::UInt64(rank as u64)],
            vec![ScalarValue::UInt64(num_rows as u64)],
        ],
    )
}

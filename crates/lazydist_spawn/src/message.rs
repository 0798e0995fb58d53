//! Frames exchanged over a group channel, and their byte encoding for
//! process channels.

use std::collections::BTreeMap;
use std::io::{self, Read, Write};

use lazydist_error::{DbError, Result, ResultExt};
use lazydist_types::batch::Batch;
use lazydist_types::field::Schema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::command::CommandType;
use crate::computation::Computation;
use crate::failure::WorkerError;
use crate::marshal::WireArg;
use crate::value::{ResultId, Value};

/// Upper bound on a single encoded frame.
pub const MAX_FRAME_LEN: usize = 1 << 30;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvPayload {
    pub vars: BTreeMap<String, String>,
}

/// Argument skeleton with placeholders for data sent afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArgsPayload {
    pub args: Vec<WireArg>,
    pub kwargs: BTreeMap<String, WireArg>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputationPayload {
    pub computation: Computation,
    pub call_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionMeta {
    pub num_rows: usize,
    pub schema: Schema,
}

impl PartitionMeta {
    pub fn of(batch: &Batch) -> Self {
        PartitionMeta {
            num_rows: batch.num_rows(),
            schema: batch.schema().clone(),
        }
    }
}

/// Shape of a computation's output, sent by rank 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputDistribution {
    Replicated,
    Distributed,
    Tuple(Vec<OutputDistribution>),
    Map(BTreeMap<String, OutputDistribution>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Frame {
    Command(CommandType),
    Env(EnvPayload),
    Args(ArgsPayload),
    Data(Batch),
    ResultId(ResultId),
    Computation(ComputationPayload),
    /// Worker finished running the computation.
    Completed,
    Status(Option<WorkerError>),
    /// Coordinator decision after aggregating statuses.
    Proceed(bool),
    OutputTag(OutputDistribution),
    Value(Value),
    PartitionMeta(Option<PartitionMeta>),
    Partition(Option<Batch>),
}

impl Frame {
    pub fn name(&self) -> &'static str {
        match self {
            Frame::Command(_) => "Command",
            Frame::Env(_) => "Env",
            Frame::Args(_) => "Args",
            Frame::Data(_) => "Data",
            Frame::ResultId(_) => "ResultId",
            Frame::Computation(_) => "Computation",
            Frame::Completed => "Completed",
            Frame::Status(_) => "Status",
            Frame::Proceed(_) => "Proceed",
            Frame::OutputTag(_) => "OutputTag",
            Frame::Value(_) => "Value",
            Frame::PartitionMeta(_) => "PartitionMeta",
            Frame::Partition(_) => "Partition",
        }
    }
}

/// Unwrap a frame of the given variant or return a protocol error.
macro_rules! expect_frame {
    ($frame:expr, $variant:ident) => {
        match $frame {
            $crate::message::Frame::$variant(v) => Ok(v),
            other => Err(::lazydist_error::DbError::protocol(format!(
                "Expected {} frame, got {}",
                stringify!($variant),
                other.name()
            ))),
        }
    };
}
pub(crate) use expect_frame;

pub(crate) fn expect_completed(frame: Frame) -> Result<()> {
    match frame {
        Frame::Completed => Ok(()),
        other => Err(DbError::protocol(format!(
            "Expected Completed frame, got {}",
            other.name()
        ))),
    }
}

/// Write a length prefixed frame and flush.
pub fn write_frame<W: Write>(writer: &mut W, frame: &Frame) -> Result<()> {
    let buf = serde_json::to_vec(frame).context("Failed to encode frame")?;
    if buf.len() > MAX_FRAME_LEN {
        return Err(DbError::protocol("Frame too large").with_field("len", buf.len()));
    }
    let len = buf.len() as u32;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&buf)?;
    writer.flush()?;
    Ok(())
}

/// Read a length prefixed frame.
///
/// Returns `None` if the stream ended cleanly before a new frame.
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Option<Frame>> {
    let mut len_buf = [0; 4];
    match reader.read_exact(&mut len_buf) {
        Ok(()) => (),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(DbError::protocol("Frame too large").with_field("len", len));
    }

    let mut buf = vec![0; len];
    reader.read_exact(&mut buf)?;
    let frame = serde_json::from_slice(&buf).context("Failed to decode frame")?;

    Ok(Some(frame))
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use lazydist_types::datatype::DataType;
    use lazydist_types::field::Field;
    use lazydist_types::scalar::ScalarValue;

    use super::*;

    #[test]
    fn frames_back_to_back() {
        let schema = Schema::new([Field::new("a", DataType::Int64, false)]);
        let batch = Batch::try_new(schema, vec![vec![7_i64.into()]]).unwrap();

        let mut buf = Vec::new();
        write_frame(&mut buf, &Frame::Command(CommandType::Gather)).unwrap();
        write_frame(&mut buf, &Frame::Data(batch.clone())).unwrap();

        let mut cursor = Cursor::new(buf);
        assert_eq!(
            Some(Frame::Command(CommandType::Gather)),
            read_frame(&mut cursor).unwrap()
        );
        assert_eq!(Some(Frame::Data(batch)), read_frame(&mut cursor).unwrap());
        assert_eq!(None, read_frame(&mut cursor).unwrap());
    }

    #[test]
    fn non_finite_floats_in_data_frame() {
        let schema = Schema::new([Field::new("f", DataType::Float64, true)]);
        let values = vec![f64::NAN, f64::INFINITY, f64::NEG_INFINITY, 1.5];
        let batch = Batch::try_new(
            schema,
            vec![values.iter().map(|v| ScalarValue::Float64(*v)).collect()],
        )
        .unwrap();

        let mut buf = Vec::new();
        write_frame(&mut buf, &Frame::Data(batch)).unwrap();
        let got = match read_frame(&mut Cursor::new(buf)).unwrap() {
            Some(Frame::Data(batch)) => batch,
            other => panic!("unexpected frame: {other:?}"),
        };

        let bits: Vec<_> = got
            .column(0)
            .unwrap()
            .iter()
            .map(|v| match v {
                ScalarValue::Float64(f) => f.to_bits(),
                other => panic!("unexpected value: {other:?}"),
            })
            .collect();
        let expected: Vec<_> = values.iter().map(|v| v.to_bits()).collect();
        assert_eq!(expected, bits);
    }

    #[test]
    fn command_encoded_as_integer() {
        let json = serde_json::to_string(&Frame::Command(CommandType::Exit)).unwrap();
        assert_eq!(r#"{"Command":3}"#, json);
    }

    #[test]
    fn truncated_frame_errors() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &Frame::Completed).unwrap();
        buf.truncate(buf.len() - 1);

        let mut cursor = Cursor::new(buf);
        assert!(read_frame(&mut cursor).is_err());
    }

    #[test]
    fn expect_frame_mismatch() {
        let res: Result<bool> = expect_frame!(Frame::Completed, Proceed);
        let err = res.unwrap_err();
        assert_eq!("Expected Proceed frame, got Completed", err.get_msg());
    }
}

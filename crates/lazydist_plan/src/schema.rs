use std::fmt;

use lazydist_error::Result;
use lazydist_types::field::{Field, Schema};
use serde::{Deserialize, Serialize};

/// Shape of the value a plan node produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputKind {
    /// A table with any number of columns.
    Frame,
    /// A single column, e.g. the output of an expression.
    SingleColumn,
}

impl fmt::Display for OutputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Frame => write!(f, "frame"),
            Self::SingleColumn => write!(f, "single column"),
        }
    }
}

/// Output descriptor carried by every plan node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputSchema {
    pub schema: Schema,
    pub kind: OutputKind,
}

impl OutputSchema {
    pub fn frame(schema: Schema) -> Self {
        OutputSchema {
            schema,
            kind: OutputKind::Frame,
        }
    }

    pub fn single_column(field: Field) -> Self {
        OutputSchema {
            schema: Schema::new([field]),
            kind: OutputKind::SingleColumn,
        }
    }

    pub fn is_single_column(&self) -> bool {
        self.kind == OutputKind::SingleColumn
    }

    pub fn num_columns(&self) -> usize {
        self.schema.num_fields()
    }

    pub fn field(&self, idx: usize) -> Result<&Field> {
        self.schema.field(idx)
    }
}

impl fmt::Display for OutputSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.schema)
    }
}

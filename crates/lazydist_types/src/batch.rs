use lazydist_error::{DbError, Result};
use serde::{Deserialize, Serialize};

use crate::field::Schema;
use crate::scalar::ScalarValue;

/// A batch of same-length columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    schema: Schema,
    columns: Vec<Vec<ScalarValue>>,
    /// Tracked separately so a batch with no columns can still have rows.
    num_rows: usize,
}

impl Batch {
    pub fn empty(schema: Schema) -> Self {
        let columns = schema.fields.iter().map(|_| Vec::new()).collect();
        Batch {
            schema,
            columns,
            num_rows: 0,
        }
    }

    /// Create a new batch from columns.
    ///
    /// Column count must match the schema and all columns must have the
    /// same length.
    pub fn try_new(schema: Schema, columns: Vec<Vec<ScalarValue>>) -> Result<Self> {
        if columns.len() != schema.num_fields() {
            return Err(DbError::new("Column count does not match schema")
                .with_field("columns", columns.len())
                .with_field("fields", schema.num_fields()));
        }

        let num_rows = columns.first().map(|c| c.len()).unwrap_or(0);
        for (idx, col) in columns.iter().enumerate() {
            if col.len() != num_rows {
                return Err(DbError::new(format!(
                    "Expected column length to be {num_rows}, got {}. Column idx: {idx}",
                    col.len()
                )));
            }
        }

        Ok(Batch {
            schema,
            columns,
            num_rows,
        })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn column(&self, idx: usize) -> Option<&[ScalarValue]> {
        self.columns.get(idx).map(|c| c.as_slice())
    }

    pub fn value(&self, col: usize, row: usize) -> Option<&ScalarValue> {
        self.columns.get(col).and_then(|c| c.get(row))
    }

    pub fn project(&self, indices: &[usize]) -> Result<Self> {
        let fields = indices
            .iter()
            .map(|&idx| self.schema.field(idx).cloned())
            .collect::<Result<Vec<_>>>()?;
        let columns = indices.iter().map(|&idx| self.columns[idx].clone()).collect();

        Ok(Batch {
            schema: Schema::new(fields),
            columns,
            num_rows: self.num_rows,
        })
    }

    pub fn slice(&self, offset: usize, count: usize) -> Self {
        let start = offset.min(self.num_rows);
        let end = (offset + count).min(self.num_rows);
        let columns = self
            .columns
            .iter()
            .map(|c| c[start..end].to_vec())
            .collect();

        Batch {
            schema: self.schema.clone(),
            columns,
            num_rows: end - start,
        }
    }

    /// Split into `n` contiguous blocks.
    ///
    /// The first `num_rows % n` blocks get one extra row. Every block is
    /// returned even if empty, so the output always has exactly `n` entries.
    pub fn split_even(&self, n: usize) -> Result<Vec<Batch>> {
        if n == 0 {
            return Err(DbError::new("Cannot split a batch into zero partitions"));
        }

        let base = self.num_rows / n;
        let rem = self.num_rows % n;

        let mut offset = 0;
        let mut parts = Vec::with_capacity(n);
        for idx in 0..n {
            let count = base + usize::from(idx < rem);
            parts.push(self.slice(offset, count));
            offset += count;
        }

        Ok(parts)
    }

    /// Concatenate batches that share a schema.
    pub fn concat(schema: Schema, batches: impl IntoIterator<Item = Batch>) -> Result<Self> {
        let mut out = Batch::empty(schema);
        for batch in batches {
            if batch.schema.datatypes().ne(out.schema.datatypes()) {
                return Err(DbError::new("Cannot concat batches with different schemas")
                    .with_field("expected", &out.schema)
                    .with_field("got", &batch.schema));
            }
            for (dst, src) in out.columns.iter_mut().zip(batch.columns) {
                dst.extend(src);
            }
            out.num_rows += batch.num_rows;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatype::DataType;
    use crate::field::Field;

    fn int_batch(vals: impl IntoIterator<Item = i64>) -> Batch {
        let schema = Schema::new([Field::new("a", DataType::Int64, false)]);
        let col = vals.into_iter().map(ScalarValue::Int64).collect();
        Batch::try_new(schema, vec![col]).unwrap()
    }

    #[test]
    fn try_new_mismatched_lengths() {
        let schema = Schema::new([
            Field::new("a", DataType::Int64, false),
            Field::new("b", DataType::Utf8, true),
        ]);
        let res = Batch::try_new(
            schema,
            vec![vec![1_i64.into(), 2_i64.into()], vec!["x".into()]],
        );
        assert!(res.is_err());
    }

    #[test]
    fn split_even_distributes_remainder_first() {
        let batch = int_batch(0..7);
        let parts = batch.split_even(3).unwrap();

        let sizes: Vec<_> = parts.iter().map(|p| p.num_rows()).collect();
        assert_eq!(vec![3, 2, 2], sizes);
        assert_eq!(Some(&ScalarValue::Int64(3)), parts[1].value(0, 0));
    }

    #[test]
    fn split_more_partitions_than_rows() {
        let batch = int_batch(0..2);
        let parts = batch.split_even(4).unwrap();

        let sizes: Vec<_> = parts.iter().map(|p| p.num_rows()).collect();
        assert_eq!(vec![1, 1, 0, 0], sizes);
    }

    #[test]
    fn concat_after_split_restores_rows() {
        let batch = int_batch(0..10);
        let parts = batch.split_even(4).unwrap();
        let out = Batch::concat(batch.schema().clone(), parts).unwrap();
        assert_eq!(batch, out);
    }

    #[test]
    fn concat_schema_mismatch() {
        let a = int_batch(0..2);
        let b = Batch::empty(Schema::new([Field::new("s", DataType::Utf8, true)]));
        assert!(Batch::concat(a.schema().clone(), [a, b]).is_err());
    }

    #[test]
    fn serde_keeps_values() {
        let batch = int_batch([4, 5]);
        let json = serde_json::to_string(&batch).unwrap();
        let got: Batch = serde_json::from_str(&json).unwrap();
        assert_eq!(batch, got);
    }
}

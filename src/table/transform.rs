use crate::constants::COUNT_COLUMN;
use crate::error::{PipelineError, Result};
use arrow::array::{Array, ArrayRef, AsArray, Int64Array, UInt64Array};
use arrow::compute::{filter_record_batch, is_not_null, take};
use arrow::datatypes::{
    DataType, Field, Float32Type, Float64Type, Int16Type, Int32Type, Int64Type, Int8Type, Schema,
    UInt16Type, UInt32Type, UInt64Type, UInt8Type,
};
use arrow::record_batch::RecordBatch;
use arrow::util::display::array_value_to_string;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Keep only rows where `column` is non-null.
pub fn filter_not_null(batch: &RecordBatch, column: &str, source: &Path) -> Result<RecordBatch> {
    let values = column_by_name(batch, column, source)?;
    let mask = is_not_null(values.as_ref())?;
    Ok(filter_record_batch(batch, &mask)?)
}

/// One row of the group-count result
#[derive(Debug, Clone, PartialEq)]
pub struct GroupCount {
    pub first_row: usize,
    pub count: i64,
}

/// Count rows per (`first`, `second`) pair and keep the `limit` largest
/// groups.
///
/// Rows where either key is null are not counted. Groups are ordered by
/// count descending, then by the first key ascending, then the second key
/// ascending. The output holds both key columns with their original types
/// followed by an Int64 `count` column. Also returns the number of distinct
/// groups before truncation.
pub fn group_count_top_n(
    batch: &RecordBatch,
    first: &str,
    second: &str,
    limit: usize,
    source: &Path,
) -> Result<(RecordBatch, usize)> {
    let first_col = column_by_name(batch, first, source)?;
    let second_col = column_by_name(batch, second, source)?;

    let mut groups: BTreeMap<(KeyValue, KeyValue), GroupCount> = BTreeMap::new();
    for row in 0..batch.num_rows() {
        if first_col.is_null(row) || second_col.is_null(row) {
            continue;
        }
        let key = (
            KeyValue::from_array(first_col.as_ref(), row)?,
            KeyValue::from_array(second_col.as_ref(), row)?,
        );
        groups
            .entry(key)
            .and_modify(|g| g.count += 1)
            .or_insert(GroupCount {
                first_row: row,
                count: 1,
            });
    }
    let distinct = groups.len();

    // Map iteration is key-ascending; a stable sort on count keeps that as
    // the tie-break order.
    let mut ranked: Vec<GroupCount> = groups.into_values().collect();
    ranked.sort_by(|a, b| b.count.cmp(&a.count));
    ranked.truncate(limit);

    let indices = UInt64Array::from_iter_values(ranked.iter().map(|g| g.first_row as u64));
    let counts: ArrayRef = Arc::new(Int64Array::from_iter_values(ranked.iter().map(|g| g.count)));
    let first_out = take(first_col.as_ref(), &indices, None)?;
    let second_out = take(second_col.as_ref(), &indices, None)?;

    let schema = batch.schema();
    let first_field = schema.field_with_name(first)?.clone();
    let second_field = schema.field_with_name(second)?.clone();
    let out_schema = Arc::new(Schema::new(vec![
        first_field,
        second_field,
        Field::new(COUNT_COLUMN, DataType::Int64, false),
    ]));

    let out = RecordBatch::try_new(out_schema, vec![first_out, second_out, counts])?;
    Ok((out, distinct))
}

fn column_by_name(batch: &RecordBatch, column: &str, source: &Path) -> Result<ArrayRef> {
    batch
        .column_by_name(column)
        .cloned()
        .ok_or_else(|| PipelineError::MissingColumn {
            column: column.to_string(),
            path: source.to_path_buf(),
        })
}

/// Orderable, hashable view of a single non-null cell
#[derive(Debug, Clone)]
pub enum KeyValue {
    Int(i128),
    Float(f64),
    Bool(bool),
    Text(String),
}

impl KeyValue {
    pub fn from_array(array: &dyn Array, row: usize) -> Result<Self> {
        let value = match array.data_type() {
            DataType::Int8 => KeyValue::Int(array.as_primitive::<Int8Type>().value(row).into()),
            DataType::Int16 => KeyValue::Int(array.as_primitive::<Int16Type>().value(row).into()),
            DataType::Int32 => KeyValue::Int(array.as_primitive::<Int32Type>().value(row).into()),
            DataType::Int64 => KeyValue::Int(array.as_primitive::<Int64Type>().value(row).into()),
            DataType::UInt8 => KeyValue::Int(array.as_primitive::<UInt8Type>().value(row).into()),
            DataType::UInt16 => {
                KeyValue::Int(array.as_primitive::<UInt16Type>().value(row).into())
            }
            DataType::UInt32 => {
                KeyValue::Int(array.as_primitive::<UInt32Type>().value(row).into())
            }
            DataType::UInt64 => {
                KeyValue::Int(array.as_primitive::<UInt64Type>().value(row).into())
            }
            DataType::Float32 => {
                KeyValue::Float(array.as_primitive::<Float32Type>().value(row).into())
            }
            DataType::Float64 => KeyValue::Float(array.as_primitive::<Float64Type>().value(row)),
            DataType::Boolean => KeyValue::Bool(array.as_boolean().value(row)),
            DataType::Utf8 => KeyValue::Text(array.as_string::<i32>().value(row).to_string()),
            DataType::LargeUtf8 => {
                KeyValue::Text(array.as_string::<i64>().value(row).to_string())
            }
            _ => KeyValue::Text(array_value_to_string(array, row)?),
        };
        Ok(value)
    }

    fn rank(&self) -> u8 {
        match self {
            KeyValue::Bool(_) => 0,
            KeyValue::Int(_) => 1,
            KeyValue::Float(_) => 2,
            KeyValue::Text(_) => 3,
        }
    }
}

impl Ord for KeyValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (KeyValue::Int(a), KeyValue::Int(b)) => a.cmp(b),
            (KeyValue::Float(a), KeyValue::Float(b)) => a.total_cmp(b),
            (KeyValue::Bool(a), KeyValue::Bool(b)) => a.cmp(b),
            (KeyValue::Text(a), KeyValue::Text(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for KeyValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for KeyValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for KeyValue {}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::StringArray;

    fn cases(rows: &[(Option<i64>, Option<i64>, Option<&str>)]) -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("ID_MUNICIP", DataType::Int64, true),
            Field::new("NU_IDADE_N", DataType::Int64, true),
            Field::new("DT_NASC", DataType::Utf8, true),
        ]));
        let muni: ArrayRef = Arc::new(Int64Array::from(
            rows.iter().map(|r| r.0).collect::<Vec<_>>(),
        ));
        let age: ArrayRef = Arc::new(Int64Array::from(
            rows.iter().map(|r| r.1).collect::<Vec<_>>(),
        ));
        let dob: ArrayRef = Arc::new(StringArray::from(
            rows.iter().map(|r| r.2).collect::<Vec<_>>(),
        ));
        RecordBatch::try_new(schema, vec![muni, age, dob]).unwrap()
    }

    fn triples(batch: &RecordBatch) -> Vec<(i64, i64, i64)> {
        let m = batch.column(0).as_primitive::<Int64Type>();
        let a = batch.column(1).as_primitive::<Int64Type>();
        let c = batch.column(2).as_primitive::<Int64Type>();
        (0..batch.num_rows())
            .map(|i| (m.value(i), a.value(i), c.value(i)))
            .collect()
    }

    #[test]
    fn filter_removes_only_null_birth_dates() {
        let batch = cases(&[
            (Some(1), Some(30), Some("01/01/1991")),
            (Some(2), Some(40), None),
            (Some(3), Some(50), Some("02/02/1971")),
        ]);
        let kept = filter_not_null(&batch, "DT_NASC", Path::new("t")).unwrap();
        assert_eq!(kept.num_rows(), 2);
        let ids = kept.column(0).as_primitive::<Int64Type>();
        assert_eq!(ids.values().to_vec(), vec![1, 3]);
    }

    #[test]
    fn filter_can_remove_everything() {
        let batch = cases(&[(Some(1), Some(30), None)]);
        let kept = filter_not_null(&batch, "DT_NASC", Path::new("t")).unwrap();
        assert_eq!(kept.num_rows(), 0);
        assert_eq!(kept.schema(), batch.schema());
    }

    #[test]
    fn missing_column_is_reported() {
        let batch = cases(&[]);
        let err = filter_not_null(&batch, "NOPE", Path::new("raw.parquet")).unwrap_err();
        assert!(matches!(err, PipelineError::MissingColumn { ref column, .. } if column == "NOPE"));
    }

    #[test]
    fn counts_sorted_descending_and_truncated() {
        let mut rows = Vec::new();
        for (muni, age, n) in [(10, 1, 4), (20, 2, 6), (30, 3, 1), (40, 4, 3), (50, 5, 2), (60, 6, 5)] {
            for _ in 0..n {
                rows.push((Some(muni), Some(age), Some("x")));
            }
        }
        let (out, distinct) =
            group_count_top_n(&cases(&rows), "ID_MUNICIP", "NU_IDADE_N", 5, Path::new("t")).unwrap();
        assert_eq!(distinct, 6);
        assert_eq!(
            triples(&out),
            vec![(20, 2, 6), (60, 6, 5), (10, 1, 4), (40, 4, 3), (50, 5, 2)]
        );
    }

    #[test]
    fn fewer_groups_than_limit_are_not_padded() {
        let rows = [
            (Some(1), Some(10), Some("x")),
            (Some(1), Some(10), Some("x")),
            (Some(2), Some(20), Some("x")),
            (Some(3), Some(30), Some("x")),
        ];
        let (out, distinct) =
            group_count_top_n(&cases(&rows), "ID_MUNICIP", "NU_IDADE_N", 5, Path::new("t")).unwrap();
        assert_eq!(distinct, 3);
        assert_eq!(out.num_rows(), 3);
        assert_eq!(triples(&out), vec![(1, 10, 2), (2, 20, 1), (3, 30, 1)]);
    }

    #[test]
    fn ties_break_by_keys_ascending() {
        let rows = [
            (Some(9), Some(1), Some("x")),
            (Some(3), Some(7), Some("x")),
            (Some(3), Some(2), Some("x")),
            (Some(5), Some(5), Some("x")),
        ];
        let (out, _) =
            group_count_top_n(&cases(&rows), "ID_MUNICIP", "NU_IDADE_N", 5, Path::new("t")).unwrap();
        assert_eq!(
            triples(&out),
            vec![(3, 2, 1), (3, 7, 1), (5, 5, 1), (9, 1, 1)]
        );
    }

    #[test]
    fn null_keys_are_not_grouped() {
        let rows = [
            (Some(1), None, Some("x")),
            (None, Some(2), Some("x")),
            (Some(1), Some(2), Some("x")),
        ];
        let (out, distinct) =
            group_count_top_n(&cases(&rows), "ID_MUNICIP", "NU_IDADE_N", 5, Path::new("t")).unwrap();
        assert_eq!(distinct, 1);
        assert_eq!(triples(&out), vec![(1, 2, 1)]);
    }

    #[test]
    fn output_keeps_key_types() {
        let schema = Arc::new(Schema::new(vec![
            Field::new("m", DataType::Utf8, true),
            Field::new("a", DataType::Int64, true),
        ]));
        let m: ArrayRef = Arc::new(StringArray::from(vec!["355030", "355030", "330455"]));
        let a: ArrayRef = Arc::new(Int64Array::from(vec![44, 44, 61]));
        let batch = RecordBatch::try_new(schema, vec![m, a]).unwrap();

        let (out, _) = group_count_top_n(&batch, "m", "a", 5, Path::new("t")).unwrap();
        assert_eq!(out.schema().field(0).data_type(), &DataType::Utf8);
        assert_eq!(out.schema().field(2).name(), "count");
        assert_eq!(out.column(0).as_string::<i32>().value(0), "355030");
        assert_eq!(out.column(2).as_primitive::<Int64Type>().value(0), 2);
    }

    #[test]
    fn float_keys_order_totally() {
        assert!(KeyValue::Float(1.5) < KeyValue::Float(2.0));
        assert_eq!(KeyValue::Float(f64::NAN), KeyValue::Float(f64::NAN));
        assert!(KeyValue::Int(3) < KeyValue::Text("3".into()));
    }
}

//! Row-level kernels shared by the router and the ordered merge: partition
//! key hashing, collation comparison, and range-boundary lookup.
//!
//! Values are reached through per-type downcasts; key types outside the
//! supported set fail with `Unsupported` instead of silently mis-routing.

use std::cmp::Ordering;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use arrow::array::{
    Array, ArrayRef, BooleanArray, Float32Array, Float64Array, Int16Array, Int32Array, Int64Array,
    Int8Array, StringArray, UInt32Array, UInt64Array,
};
use arrow::record_batch::RecordBatch;
use arrow_schema::DataType;
use nexq_common::{NexqError, Result};
use nexq_planner::{CollationKey, RangeBoundary, SortDirection};

fn column<'a>(batch: &'a RecordBatch, index: usize, role: &str) -> Result<&'a ArrayRef> {
    if index >= batch.num_columns() {
        return Err(NexqError::Execution(format!(
            "{role} column {index} out of range for batch with {} columns",
            batch.num_columns()
        )));
    }
    Ok(batch.column(index))
}

/// Deterministic hash of the key columns of one row.
///
/// `DefaultHasher::new()` runs with fixed keys, so equal partition keys map
/// to equal hashes across repeated invocations and across the workers of
/// one execution, which is what hash exchanges rely on for distributed
/// joins and grouping.
pub(crate) fn hash_row_key(batch: &RecordBatch, columns: &[usize], row: usize) -> Result<u64> {
    let mut hasher = DefaultHasher::new();
    for &col in columns {
        hash_value(column(batch, col, "partition key")?, row, &mut hasher)?;
    }
    Ok(hasher.finish())
}

fn hash_value(array: &ArrayRef, row: usize, hasher: &mut DefaultHasher) -> Result<()> {
    if array.is_null(row) {
        0u8.hash(hasher);
        return Ok(());
    }
    1u8.hash(hasher);
    match array.data_type() {
        DataType::Int8 => downcast::<Int8Array>(array)?.value(row).hash(hasher),
        DataType::Int16 => downcast::<Int16Array>(array)?.value(row).hash(hasher),
        DataType::Int32 => downcast::<Int32Array>(array)?.value(row).hash(hasher),
        DataType::Int64 => downcast::<Int64Array>(array)?.value(row).hash(hasher),
        DataType::UInt32 => downcast::<UInt32Array>(array)?.value(row).hash(hasher),
        DataType::UInt64 => downcast::<UInt64Array>(array)?.value(row).hash(hasher),
        DataType::Float32 => downcast::<Float32Array>(array)?
            .value(row)
            .to_bits()
            .hash(hasher),
        DataType::Float64 => downcast::<Float64Array>(array)?
            .value(row)
            .to_bits()
            .hash(hasher),
        DataType::Boolean => downcast::<BooleanArray>(array)?.value(row).hash(hasher),
        DataType::Utf8 => downcast::<StringArray>(array)?.value(row).hash(hasher),
        other => {
            return Err(NexqError::Unsupported(format!(
                "hash partitioning over {other:?} keys"
            )))
        }
    }
    Ok(())
}

/// Lexicographic comparison of two rows under a collation.
///
/// Per field: nulls first, then the value order, reversed for descending
/// fields; ties fall through to the next field; a full tie is `Equal`.
pub(crate) fn compare_rows(
    left: &RecordBatch,
    left_row: usize,
    right: &RecordBatch,
    right_row: usize,
    collation: &[CollationKey],
) -> Result<Ordering> {
    for key in collation {
        let l = column(left, key.field, "collation")?;
        let r = column(right, key.field, "collation")?;
        let ord = compare_values(l, left_row, r, right_row)?;
        let ord = match key.direction {
            SortDirection::Ascending => ord,
            SortDirection::Descending => ord.reverse(),
        };
        if ord != Ordering::Equal {
            return Ok(ord);
        }
    }
    Ok(Ordering::Equal)
}

fn compare_values(
    left: &ArrayRef,
    left_row: usize,
    right: &ArrayRef,
    right_row: usize,
) -> Result<Ordering> {
    match (left.is_null(left_row), right.is_null(right_row)) {
        (true, true) => return Ok(Ordering::Equal),
        (true, false) => return Ok(Ordering::Less),
        (false, true) => return Ok(Ordering::Greater),
        (false, false) => {}
    }
    if left.data_type() != right.data_type() {
        return Err(NexqError::Execution(format!(
            "collation column type mismatch across senders: {:?} vs {:?}",
            left.data_type(),
            right.data_type()
        )));
    }
    let ord = match left.data_type() {
        DataType::Int8 => downcast::<Int8Array>(left)?
            .value(left_row)
            .cmp(&downcast::<Int8Array>(right)?.value(right_row)),
        DataType::Int16 => downcast::<Int16Array>(left)?
            .value(left_row)
            .cmp(&downcast::<Int16Array>(right)?.value(right_row)),
        DataType::Int32 => downcast::<Int32Array>(left)?
            .value(left_row)
            .cmp(&downcast::<Int32Array>(right)?.value(right_row)),
        DataType::Int64 => downcast::<Int64Array>(left)?
            .value(left_row)
            .cmp(&downcast::<Int64Array>(right)?.value(right_row)),
        DataType::UInt32 => downcast::<UInt32Array>(left)?
            .value(left_row)
            .cmp(&downcast::<UInt32Array>(right)?.value(right_row)),
        DataType::UInt64 => downcast::<UInt64Array>(left)?
            .value(left_row)
            .cmp(&downcast::<UInt64Array>(right)?.value(right_row)),
        DataType::Float32 => downcast::<Float32Array>(left)?
            .value(left_row)
            .total_cmp(&downcast::<Float32Array>(right)?.value(right_row)),
        DataType::Float64 => downcast::<Float64Array>(left)?
            .value(left_row)
            .total_cmp(&downcast::<Float64Array>(right)?.value(right_row)),
        DataType::Boolean => downcast::<BooleanArray>(left)?
            .value(left_row)
            .cmp(&downcast::<BooleanArray>(right)?.value(right_row)),
        DataType::Utf8 => downcast::<StringArray>(left)?
            .value(left_row)
            .cmp(downcast::<StringArray>(right)?.value(right_row)),
        other => {
            return Err(NexqError::Unsupported(format!(
                "collation over {other:?} fields"
            )))
        }
    };
    Ok(ord)
}

/// Destination index for one row of a range exchange: the first boundary
/// strictly greater than the key value wins, so contiguous key ranges map
/// to contiguous worker indices. Null keys route to the first range.
pub(crate) fn range_destination(
    batch: &RecordBatch,
    key_column: usize,
    row: usize,
    bounds: &[RangeBoundary],
) -> Result<usize> {
    let array = column(batch, key_column, "range key")?;
    if array.is_null(row) {
        return Ok(0);
    }
    for (index, bound) in bounds.iter().enumerate() {
        if key_below_bound(array, row, bound)? {
            return Ok(index);
        }
    }
    Ok(bounds.len())
}

fn key_below_bound(array: &ArrayRef, row: usize, bound: &RangeBoundary) -> Result<bool> {
    match (array.data_type(), bound) {
        (DataType::Int32, RangeBoundary::Int64(b)) => {
            Ok(i64::from(downcast::<Int32Array>(array)?.value(row)) < *b)
        }
        (DataType::Int64, RangeBoundary::Int64(b)) => {
            Ok(downcast::<Int64Array>(array)?.value(row) < *b)
        }
        (DataType::Float64, RangeBoundary::Float64(b)) => {
            Ok(downcast::<Float64Array>(array)?.value(row) < *b)
        }
        (DataType::Utf8, RangeBoundary::Utf8(b)) => {
            Ok(downcast::<StringArray>(array)?.value(row) < b.as_str())
        }
        (other, bound) => Err(NexqError::Execution(format!(
            "range boundary {bound:?} does not match key type {other:?}"
        ))),
    }
}

fn downcast<T: Array + 'static>(array: &ArrayRef) -> Result<&T> {
    array.as_any().downcast_ref::<T>().ok_or_else(|| {
        NexqError::Execution(format!(
            "array downcast mismatch for {:?}",
            array.data_type()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Int64Array, StringArray};
    use arrow_schema::{Field, Schema};
    use std::sync::Arc;

    fn batch(ids: Vec<i64>, names: Vec<Option<&str>>) -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("name", DataType::Utf8, true),
        ]));
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(ids)),
                Arc::new(StringArray::from(names)),
            ],
        )
        .expect("batch")
    }

    #[test]
    fn equal_keys_hash_identically_across_invocations() {
        let a = batch(vec![10, 20], vec![Some("x"), Some("y")]);
        let b = batch(vec![20, 10], vec![Some("y"), Some("x")]);

        let first = hash_row_key(&a, &[0, 1], 1).expect("hash");
        let second = hash_row_key(&b, &[0, 1], 0).expect("hash");
        assert_eq!(first, second);
        // And repeatedly.
        assert_eq!(first, hash_row_key(&a, &[0, 1], 1).expect("hash"));
    }

    #[test]
    fn null_and_value_hash_differently() {
        let a = batch(vec![1, 1], vec![None, Some("a")]);
        let with_null = hash_row_key(&a, &[1], 0).expect("hash");
        let with_value = hash_row_key(&a, &[1], 1).expect("hash");
        assert_ne!(with_null, with_value);
    }

    #[test]
    fn collation_orders_rows_with_direction_and_nulls_first() {
        let a = batch(vec![1, 1], vec![None, Some("b")]);
        let b = batch(vec![1], vec![Some("a")]);

        let asc = vec![CollationKey::asc(1)];
        // null < "a"
        assert_eq!(
            compare_rows(&a, 0, &b, 0, &asc).expect("cmp"),
            Ordering::Less
        );
        // "b" > "a"
        assert_eq!(
            compare_rows(&a, 1, &b, 0, &asc).expect("cmp"),
            Ordering::Greater
        );

        let desc = vec![CollationKey::desc(1)];
        assert_eq!(
            compare_rows(&a, 1, &b, 0, &desc).expect("cmp"),
            Ordering::Less
        );
    }

    #[test]
    fn tie_breaks_fall_through_to_later_fields() {
        let a = batch(vec![5, 5], vec![Some("a"), Some("z")]);
        let collation = vec![CollationKey::asc(0), CollationKey::asc(1)];
        assert_eq!(
            compare_rows(&a, 0, &a, 1, &collation).expect("cmp"),
            Ordering::Less
        );
        assert_eq!(
            compare_rows(&a, 0, &a, 0, &collation).expect("cmp"),
            Ordering::Equal
        );
    }

    #[test]
    fn range_lookup_maps_contiguous_ranges() {
        let a = batch(vec![-5, 10, 20, 35], vec![None, None, None, None]);
        let bounds = vec![RangeBoundary::Int64(10), RangeBoundary::Int64(30)];
        assert_eq!(range_destination(&a, 0, 0, &bounds).expect("dest"), 0);
        assert_eq!(range_destination(&a, 0, 1, &bounds).expect("dest"), 1);
        assert_eq!(range_destination(&a, 0, 2, &bounds).expect("dest"), 1);
        assert_eq!(range_destination(&a, 0, 3, &bounds).expect("dest"), 2);
    }

    #[test]
    fn unsupported_key_type_is_reported() {
        use arrow::array::Date32Array;
        let schema = Arc::new(Schema::new(vec![Field::new(
            "d",
            DataType::Date32,
            false,
        )]));
        let b = RecordBatch::try_new(schema, vec![Arc::new(Date32Array::from(vec![1]))])
            .expect("batch");
        let err = hash_row_key(&b, &[0], 0).expect_err("unsupported");
        assert!(matches!(err, NexqError::Unsupported(_)));
    }
}

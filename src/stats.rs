/*!
Column statistics: per-column min/max/null/NaN collection while writing data
files, aggregation across files, and the zone-map pruning rules that let
readers skip files whose bounds cannot satisfy a predicate.
*/

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::model::schema::{AllType, Schema};
use crate::model::types::PrimitiveType;
use crate::model::values::{
    decode_stat_value, encode_stat_value, truncate_string, truncate_upper_bound, Value,
    DEFAULT_MAX_STRING_LENGTH,
};

/// Finalized statistics of one column in one file.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnStats {
    /// Number of values, including nulls and NaNs.
    pub value_count: i64,
    /// Number of null values.
    pub null_count: i64,
    /// Number of NaN values.
    pub nan_count: i64,
    /// Total encoded size of the column's values in bytes.
    pub column_size: i64,
    /// Encoded lower bound; strings are byte-truncated prefixes.
    pub lower_bound: Option<Vec<u8>>,
    /// Encoded upper bound; strings are truncated and saturated upward.
    pub upper_bound: Option<Vec<u8>>,
}

/// Collects statistics for one column while rows are written.
#[derive(Debug, Clone)]
pub struct ColumnStatsCollector {
    primitive: PrimitiveType,
    max_string_length: usize,
    value_count: i64,
    null_count: i64,
    nan_count: i64,
    column_size: i64,
    min: Option<Value>,
    max: Option<Value>,
}

impl ColumnStatsCollector {
    /// New collector for a column of the given type.
    pub fn new(primitive: PrimitiveType) -> Self {
        Self::with_max_string_length(primitive, DEFAULT_MAX_STRING_LENGTH)
    }

    /// New collector with a custom string truncation length.
    pub fn with_max_string_length(primitive: PrimitiveType, max_string_length: usize) -> Self {
        ColumnStatsCollector {
            primitive,
            max_string_length,
            value_count: 0,
            null_count: 0,
            nan_count: 0,
            column_size: 0,
            min: None,
            max: None,
        }
    }

    /// Record one value. Nulls count but carry no size or bounds; NaN is
    /// counted separately and never enters min/max.
    pub fn add(&mut self, value: Option<&Value>) {
        self.value_count += 1;
        let value = match value {
            None => {
                self.null_count += 1;
                return;
            }
            Some(value) => value,
        };
        if value.is_nan() {
            self.nan_count += 1;
            return;
        }
        self.column_size += value.estimate_size() as i64;
        match &self.min {
            None => self.min = Some(value.clone()),
            Some(min) => {
                if value.compare(min) == Some(Ordering::Less) {
                    self.min = Some(value.clone());
                }
            }
        }
        match &self.max {
            None => self.max = Some(value.clone()),
            Some(max) => {
                if value.compare(max) == Some(Ordering::Greater) {
                    self.max = Some(value.clone());
                }
            }
        }
    }

    /// Finish the column, encoding bounds. String bounds are truncated: the
    /// lower bound to a plain prefix, the upper bound saturated upward so it
    /// stays greater than or equal to every observed value.
    pub fn finalize(self) -> ColumnStats {
        let lower_bound = self.min.map(|min| match min {
            Value::String(s) => {
                encode_stat_value(&Value::String(truncate_string(&s, self.max_string_length)))
            }
            other => encode_stat_value(&other),
        });
        let upper_bound = self.max.map(|max| match max {
            Value::String(s) => encode_stat_value(&Value::String(truncate_upper_bound(
                &s,
                self.max_string_length,
            ))),
            other => encode_stat_value(&other),
        });
        ColumnStats {
            value_count: self.value_count,
            null_count: self.null_count,
            nan_count: self.nan_count,
            column_size: self.column_size,
            lower_bound,
            upper_bound,
        }
    }

    /// The column's primitive type.
    pub fn primitive(&self) -> &PrimitiveType {
        &self.primitive
    }
}

/// Collects statistics for every top-level primitive column of a schema.
pub struct FileStatsCollector {
    columns: Vec<(i32, ColumnStatsCollector)>,
}

impl FileStatsCollector {
    /// Build collectors for the schema's top-level primitive fields.
    pub fn new(schema: &Schema) -> Self {
        Self::with_max_string_length(schema, DEFAULT_MAX_STRING_LENGTH)
    }

    /// Build collectors with a custom string truncation length.
    pub fn with_max_string_length(schema: &Schema, max_string_length: usize) -> Self {
        let columns = schema
            .fields
            .fields
            .iter()
            .filter_map(|field| match &field.field_type {
                AllType::Primitive(primitive) => Some((
                    field.id,
                    ColumnStatsCollector::with_max_string_length(
                        primitive.clone(),
                        max_string_length,
                    ),
                )),
                _ => None,
            })
            .collect();
        FileStatsCollector { columns }
    }

    /// Record a value for the column with the given field id.
    pub fn add(&mut self, field_id: i32, value: Option<&Value>) -> Result<()> {
        let collector = self
            .columns
            .iter_mut()
            .find(|(id, _)| *id == field_id)
            .map(|(_, collector)| collector)
            .ok_or(Error::InvalidMetadata {
                field: "schemas",
                message: format!("no stats collector for field {}", field_id),
            })?;
        collector.add(value);
        Ok(())
    }

    /// Finish all columns, producing the stats maps of a data file.
    pub fn finalize(self) -> DataFileStats {
        let mut stats = DataFileStats::default();
        for (field_id, collector) in self.columns {
            let column = collector.finalize();
            stats.column_sizes.insert(field_id, column.column_size);
            stats.value_counts.insert(field_id, column.value_count);
            stats.null_value_counts.insert(field_id, column.null_count);
            stats.nan_value_counts.insert(field_id, column.nan_count);
            if let Some(lower) = column.lower_bound {
                stats.lower_bounds.insert(field_id, lower);
            }
            if let Some(upper) = column.upper_bound {
                stats.upper_bounds.insert(field_id, upper);
            }
        }
        stats
    }
}

/// The per-column stat maps stored in a data file entry.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DataFileStats {
    /// Map from column id to total encoded size.
    pub column_sizes: HashMap<i32, i64>,
    /// Map from column id to number of values.
    pub value_counts: HashMap<i32, i64>,
    /// Map from column id to number of nulls.
    pub null_value_counts: HashMap<i32, i64>,
    /// Map from column id to number of NaNs.
    pub nan_value_counts: HashMap<i32, i64>,
    /// Map from column id to encoded lower bound.
    pub lower_bounds: HashMap<i32, Vec<u8>>,
    /// Map from column id to encoded upper bound.
    pub upper_bounds: HashMap<i32, Vec<u8>>,
}

/// Merge the statistics of one column across two files: counts and sizes
/// sum, bounds widen using the type's comparator.
pub fn merge_column_stats(
    left: &ColumnStats,
    right: &ColumnStats,
    primitive: &PrimitiveType,
) -> Result<ColumnStats> {
    let lower_bound = merge_bound(
        left.lower_bound.as_deref(),
        right.lower_bound.as_deref(),
        primitive,
        Ordering::Less,
    )?;
    let upper_bound = merge_bound(
        left.upper_bound.as_deref(),
        right.upper_bound.as_deref(),
        primitive,
        Ordering::Greater,
    )?;
    Ok(ColumnStats {
        value_count: left.value_count + right.value_count,
        null_count: left.null_count + right.null_count,
        nan_count: left.nan_count + right.nan_count,
        column_size: left.column_size + right.column_size,
        lower_bound,
        upper_bound,
    })
}

fn merge_bound(
    left: Option<&[u8]>,
    right: Option<&[u8]>,
    primitive: &PrimitiveType,
    keep: Ordering,
) -> Result<Option<Vec<u8>>> {
    match (left, right) {
        (None, None) => Ok(None),
        (Some(bound), None) | (None, Some(bound)) => Ok(Some(bound.to_vec())),
        (Some(left), Some(right)) => {
            let left_value = decode_stat_value(left, primitive)?;
            let right_value = decode_stat_value(right, primitive)?;
            let chosen = match left_value.compare(&right_value) {
                Some(ordering) if ordering == keep => left,
                Some(_) => right,
                None => left,
            };
            Ok(Some(chosen.to_vec()))
        }
    }
}

/// Comparison operator of a pruning predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PruneOp {
    /// Equal.
    Eq,
    /// Not equal.
    NotEq,
    /// Less than.
    Lt,
    /// Less than or equal.
    LtEq,
    /// Greater than.
    Gt,
    /// Greater than or equal.
    GtEq,
}

/// Zone-map pruning: whether a file whose column spans `[lower, upper]` can
/// be skipped for the predicate `column <op> value`.
///
/// A missing bound never allows skipping.
pub fn can_skip(
    op: PruneOp,
    value: &Value,
    lower: Option<&Value>,
    upper: Option<&Value>,
) -> bool {
    let (lower, upper) = match (lower, upper) {
        (Some(lower), Some(upper)) => (lower, upper),
        _ => return false,
    };
    let below = |bound: &Value| value.compare(bound) == Some(Ordering::Less);
    let above = |bound: &Value| value.compare(bound) == Some(Ordering::Greater);
    let equal = |bound: &Value| value.compare(bound) == Some(Ordering::Equal);
    match op {
        PruneOp::Eq => below(lower) || above(upper),
        PruneOp::NotEq => equal(lower) && equal(upper),
        PruneOp::Lt => !above(lower),
        PruneOp::LtEq => below(lower),
        PruneOp::Gt => !below(upper),
        PruneOp::GtEq => above(upper),
    }
}

/// [can_skip] over encoded bounds.
pub fn can_skip_encoded(
    op: PruneOp,
    value: &Value,
    lower: Option<&[u8]>,
    upper: Option<&[u8]>,
    primitive: &PrimitiveType,
) -> Result<bool> {
    let lower = lower
        .map(|bytes| decode_stat_value(bytes, primitive))
        .transpose()?;
    let upper = upper
        .map(|bytes| decode_stat_value(bytes, primitive))
        .transpose()?;
    Ok(can_skip(op, value, lower.as_ref(), upper.as_ref()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::schema::{StructField, StructType};

    fn release_year_schema() -> Schema {
        Schema {
            schema_id: 0,
            identifier_field_ids: None,
            fields: StructType {
                fields: vec![StructField::optional(
                    1001,
                    "releaseYear",
                    PrimitiveType::Int,
                )],
            },
        }
    }

    #[test]
    fn test_release_year_stats() {
        // rows [2018, 2019, 2020, 2021, null] over releaseYear (id 1001)
        let mut collector = FileStatsCollector::new(&release_year_schema());
        for year in [2018, 2019, 2020, 2021] {
            collector.add(1001, Some(&Value::Int(year))).unwrap();
        }
        collector.add(1001, None).unwrap();
        let stats = collector.finalize();

        assert_eq!(stats.value_counts.get(&1001), Some(&5));
        assert_eq!(stats.null_value_counts.get(&1001), Some(&1));
        assert_eq!(
            stats.lower_bounds.get(&1001),
            Some(&vec![0xE2, 0x07, 0x00, 0x00])
        );
        assert_eq!(
            stats.upper_bounds.get(&1001),
            Some(&vec![0xE5, 0x07, 0x00, 0x00])
        );
    }

    #[test]
    fn test_string_bound_truncation() {
        let mut collector =
            ColumnStatsCollector::with_max_string_length(PrimitiveType::String, 3);
        collector.add(Some(&Value::String("abca".to_string())));
        collector.add(Some(&Value::String("abcz".to_string())));
        let stats = collector.finalize();
        assert_eq!(stats.lower_bound, Some(b"abc".to_vec()));
        assert_eq!(stats.upper_bound, Some(b"abd".to_vec()));
    }

    #[test]
    fn test_nan_excluded_from_bounds() {
        let mut collector = ColumnStatsCollector::new(PrimitiveType::Double);
        collector.add(Some(&Value::Double(1.5)));
        collector.add(Some(&Value::Double(f64::NAN)));
        collector.add(Some(&Value::Double(-2.0)));
        collector.add(None);
        let stats = collector.finalize();
        assert_eq!(stats.value_count, 4);
        assert_eq!(stats.null_count, 1);
        assert_eq!(stats.nan_count, 1);
        assert_eq!(
            stats.lower_bound,
            Some(encode_stat_value(&Value::Double(-2.0)))
        );
        assert_eq!(
            stats.upper_bound,
            Some(encode_stat_value(&Value::Double(1.5)))
        );
    }

    #[test]
    fn test_merge_widens_bounds() {
        let mut left = ColumnStatsCollector::new(PrimitiveType::Int);
        left.add(Some(&Value::Int(10)));
        left.add(Some(&Value::Int(20)));
        let mut right = ColumnStatsCollector::new(PrimitiveType::Int);
        right.add(Some(&Value::Int(5)));
        right.add(None);

        let merged =
            merge_column_stats(&left.finalize(), &right.finalize(), &PrimitiveType::Int).unwrap();
        assert_eq!(merged.value_count, 4);
        assert_eq!(merged.null_count, 1);
        assert_eq!(merged.lower_bound, Some(encode_stat_value(&Value::Int(5))));
        assert_eq!(merged.upper_bound, Some(encode_stat_value(&Value::Int(20))));
    }

    #[test]
    fn test_zone_map_operator_table() {
        let lower = Value::Int(10);
        let upper = Value::Int(20);
        let bounds = (Some(&lower), Some(&upper));

        // = : skip iff V < min or V > max
        assert!(can_skip(PruneOp::Eq, &Value::Int(9), bounds.0, bounds.1));
        assert!(can_skip(PruneOp::Eq, &Value::Int(21), bounds.0, bounds.1));
        assert!(!can_skip(PruneOp::Eq, &Value::Int(15), bounds.0, bounds.1));

        // != : skip iff min == max == V
        let point = Value::Int(7);
        assert!(can_skip(PruneOp::NotEq, &Value::Int(7), Some(&point), Some(&point)));
        assert!(!can_skip(PruneOp::NotEq, &Value::Int(7), bounds.0, bounds.1));

        // < : skip iff min >= V
        assert!(can_skip(PruneOp::Lt, &Value::Int(10), bounds.0, bounds.1));
        assert!(can_skip(PruneOp::Lt, &Value::Int(5), bounds.0, bounds.1));
        assert!(!can_skip(PruneOp::Lt, &Value::Int(11), bounds.0, bounds.1));

        // <= : skip iff min > V
        assert!(can_skip(PruneOp::LtEq, &Value::Int(9), bounds.0, bounds.1));
        assert!(!can_skip(PruneOp::LtEq, &Value::Int(10), bounds.0, bounds.1));

        // > : skip iff max <= V
        assert!(can_skip(PruneOp::Gt, &Value::Int(20), bounds.0, bounds.1));
        assert!(!can_skip(PruneOp::Gt, &Value::Int(19), bounds.0, bounds.1));

        // >= : skip iff max < V
        assert!(can_skip(PruneOp::GtEq, &Value::Int(21), bounds.0, bounds.1));
        assert!(!can_skip(PruneOp::GtEq, &Value::Int(20), bounds.0, bounds.1));

        // missing bounds never skip
        assert!(!can_skip(PruneOp::Eq, &Value::Int(9), None, Some(&upper)));
    }

    #[test]
    fn test_can_skip_encoded() {
        let lower = encode_stat_value(&Value::Int(2018));
        let upper = encode_stat_value(&Value::Int(2021));
        assert!(can_skip_encoded(
            PruneOp::Eq,
            &Value::Int(2025),
            Some(&lower),
            Some(&upper),
            &PrimitiveType::Int
        )
        .unwrap());
        assert!(!can_skip_encoded(
            PruneOp::Eq,
            &Value::Int(2019),
            Some(&lower),
            Some(&upper),
            &PrimitiveType::Int
        )
        .unwrap());
    }
}

//! Strategies deciding which target segment each surviving document of a merge goes to.

use std::{collections::BTreeMap, sync::Arc};

use strata_attribute::{AttrValue, AttributeSegmentStore};
use strata_common::{Result, error::Error, ids::DocId, verify_arg};
use strata_format::Schema;
use strata_segment::SegmentData;

/// Routes documents of the merge sources to target segments.
pub trait SegmentSplitStrategy: Send + Sync {
    fn name(&self) -> &str;

    /// Number of target segments; at least one.
    fn target_segment_count(&self) -> usize;

    /// Target segment index of the live document `local_doc_id` of the source segment
    /// at `source_index` in the merge's source list.
    fn process(&self, source_index: usize, local_doc_id: DocId) -> Result<usize>;
}

/// Inputs available to a strategy when it is created for one merge.
pub struct SplitContext<'a> {
    pub schema: &'a Schema,
    pub sources: &'a [Arc<SegmentData>],
}

/// Puts every document into a single target segment.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultSplitStrategy;

impl SegmentSplitStrategy for DefaultSplitStrategy {
    fn name(&self) -> &str {
        "default"
    }

    fn target_segment_count(&self) -> usize {
        1
    }

    fn process(&self, _source_index: usize, _local_doc_id: DocId) -> Result<usize> {
        Ok(0)
    }
}

/// Buckets documents by a numeric attribute against ascending range boundaries.
///
/// With boundaries `b0 < b1 < ... < bn`, a value `v < b0` goes to segment 0, a value in
/// `[bi, bi+1)` to segment `i + 1`, and a value `>= bn` to segment `n + 1`.
///
/// Parameters: `field` (the attribute name) and `ranges` (comma-separated integer
/// boundaries).
pub struct TimeSeriesSplitStrategy {
    field: String,
    boundaries: Vec<i64>,
    stores: Vec<Arc<AttributeSegmentStore>>,
}

impl TimeSeriesSplitStrategy {
    pub fn new(
        field: impl Into<String>,
        boundaries: Vec<i64>,
        stores: Vec<Arc<AttributeSegmentStore>>,
    ) -> Result<TimeSeriesSplitStrategy> {
        verify_arg!(boundaries, boundaries.windows(2).all(|w| w[0] < w[1]));
        Ok(TimeSeriesSplitStrategy {
            field: field.into(),
            boundaries,
            stores,
        })
    }

    pub fn from_params(
        ctx: &SplitContext<'_>,
        params: &BTreeMap<String, String>,
    ) -> Result<TimeSeriesSplitStrategy> {
        let field = params
            .get("field")
            .ok_or_else(|| Error::invalid_arg("field", "time series split needs a field"))?;
        let config = ctx
            .schema
            .field(field)
            .ok_or_else(|| Error::invalid_arg("field", format!("unknown field '{field}'")))?;
        if config.multi_value || config.field_type.is_string() {
            return Err(Error::schema_violation(
                field.as_str(),
                "time series split needs a single-value numeric field",
            ));
        }
        let boundaries = params
            .get("ranges")
            .map(|ranges| {
                ranges
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(|s| {
                        s.parse::<i64>().map_err(|_| {
                            Error::invalid_arg("ranges", format!("'{s}' is not an integer"))
                        })
                    })
                    .collect::<Result<Vec<_>>>()
            })
            .transpose()?
            .unwrap_or_default();
        let stores = ctx
            .sources
            .iter()
            .map(|segment| {
                segment.attribute(config.id).cloned().ok_or_else(|| {
                    Error::invalid_arg(
                        "field",
                        format!("segment {} has no attribute '{field}'", segment.segment_id()),
                    )
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(field.as_str(), boundaries, stores)
    }

    pub fn boundaries(&self) -> &[i64] {
        &self.boundaries
    }

    /// Target index of a raw attribute value.
    pub fn bucket(&self, value: i64) -> usize {
        self.boundaries.partition_point(|&b| b <= value)
    }
}

impl SegmentSplitStrategy for TimeSeriesSplitStrategy {
    fn name(&self) -> &str {
        "time_series"
    }

    fn target_segment_count(&self) -> usize {
        self.boundaries.len() + 1
    }

    fn process(&self, source_index: usize, local_doc_id: DocId) -> Result<usize> {
        let store = self.stores.get(source_index).ok_or_else(|| {
            Error::invalid_arg("source_index", format!("no source {source_index}"))
        })?;
        let value = match store.read_value(local_doc_id)? {
            AttrValue::Scalar(scalar) => match scalar.as_i64() {
                Some(v) => v,
                None => scalar.as_f64().floor() as i64,
            },
            other => {
                return Err(Error::schema_violation(
                    self.field.as_str(),
                    format!("time series split on a non-scalar value {other:?}"),
                ));
            }
        };
        Ok(self.bucket(value))
    }
}

#[cfg(test)]
mod tests {
    use strata_attribute::AttributeConfig;
    use strata_budget_tracker::MemoryQuota;
    use strata_format::{FieldConfig, FieldType};

    use super::*;

    fn timestamps(values: &[i64]) -> Arc<AttributeSegmentStore> {
        let field = FieldConfig::new(0, "ts", FieldType::Int64);
        let config = Arc::new(AttributeConfig::for_field(&field));
        let store =
            AttributeSegmentStore::create_building(config, 0, &MemoryQuota::unlimited()).unwrap();
        for &v in values {
            store.append_value(&AttrValue::from(v)).unwrap();
        }
        Arc::new(store)
    }

    #[test]
    fn test_default_strategy() {
        let strategy = DefaultSplitStrategy;
        assert_eq!(strategy.target_segment_count(), 1);
        assert_eq!(strategy.process(3, 17).unwrap(), 0);
    }

    #[test]
    fn test_time_series_buckets() {
        let strategy = TimeSeriesSplitStrategy::new(
            "ts",
            vec![100, 200],
            vec![timestamps(&[5, 100, 199]), timestamps(&[200, 1000])],
        )
        .unwrap();
        assert_eq!(strategy.target_segment_count(), 3);
        assert_eq!(strategy.process(0, 0).unwrap(), 0);
        assert_eq!(strategy.process(0, 1).unwrap(), 1);
        assert_eq!(strategy.process(0, 2).unwrap(), 1);
        assert_eq!(strategy.process(1, 0).unwrap(), 2);
        assert_eq!(strategy.process(1, 1).unwrap(), 2);
        assert!(strategy.process(2, 0).is_err());
    }

    #[test]
    fn test_time_series_rejects_unsorted_boundaries() {
        assert!(TimeSeriesSplitStrategy::new("ts", vec![200, 100], vec![]).is_err());
    }
}

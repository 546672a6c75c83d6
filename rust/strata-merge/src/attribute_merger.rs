use std::sync::Arc;

use strata_attribute::{AttributeConfig, AttributeDataWriter};
use strata_budget_tracker::MemoryQuota;
use strata_common::{Result, error::Error};
use strata_format::{DataInfo, layout};
use strata_io::{Directory, join_path};
use strata_segment::SegmentData;

use crate::{merge_info_heap::DocumentMergeInfoHeap, reclaim_map::ReclaimMap};

/// Everything one attribute merge task reads and writes.
pub struct AttributeMergeContext {
    pub dir: Arc<dyn Directory>,
    pub config: Arc<AttributeConfig>,
    pub sources: Vec<Arc<SegmentData>>,
    pub reclaim_map: Arc<ReclaimMap>,
    /// Segment directory of every target; `None` for targets without documents.
    pub target_paths: Vec<Option<String>>,
    pub quota: MemoryQuota,
}

/// Writes one attribute of every target segment of a merge.
pub trait AttributeMerger: Send {
    fn name(&self) -> &str;

    /// Returns the data info of the attribute written for each target, `None` where
    /// the target has no segment.
    fn merge(&self, ctx: &AttributeMergeContext) -> Result<Vec<Option<DataInfo>>>;
}

/// Copies the current value of every surviving document, patches included, to its
/// target in new doc id order.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultAttributeMerger;

impl AttributeMerger for DefaultAttributeMerger {
    fn name(&self) -> &str {
        "default"
    }

    fn merge(&self, ctx: &AttributeMergeContext) -> Result<Vec<Option<DataInfo>>> {
        let mut writers = ctx
            .target_paths
            .iter()
            .map(|path| {
                path.as_ref()
                    .map(|_| AttributeDataWriter::new(ctx.config.clone(), &ctx.quota))
            })
            .collect::<Vec<_>>();
        let stores = ctx
            .sources
            .iter()
            .map(|segment| {
                segment.attribute(ctx.config.id).cloned().ok_or_else(|| {
                    Error::invalid_arg(
                        "sources",
                        format!("attribute '{}' is missing", ctx.config.name),
                    )
                    .in_segment(segment.segment_id(), Some(&ctx.config.name))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        for info in DocumentMergeInfoHeap::new(ctx.reclaim_map.clone()) {
            let store = &stores[info.source_index];
            let (bytes, _) = store
                .read(info.old_doc_id)
                .map_err(|e| e.in_segment(store.segment_id(), Some(&ctx.config.name)))?;
            let writer = writers[info.target_index].as_mut().ok_or_else(|| {
                Error::invalid_operation(format!(
                    "document routed to target {} without a segment",
                    info.target_index
                ))
            })?;
            writer.append(&bytes)?;
        }

        writers
            .into_iter()
            .zip(&ctx.target_paths)
            .map(|(writer, path)| match (writer, path) {
                (Some(writer), Some(path)) => {
                    let attr_path = join_path(path, &layout::attribute_dir(&ctx.config.name));
                    writer.finish(ctx.dir.as_ref(), &attr_path).map(Some)
                }
                _ => Ok(None),
            })
            .collect()
    }
}

/// Estimated cost of merging one attribute: the bytes it holds in the sources plus
/// one unit per document.
pub fn estimate_merge_cost(config: &AttributeConfig, sources: &[Arc<SegmentData>]) -> u64 {
    sources
        .iter()
        .filter_map(|segment| segment.attribute(config.id))
        .map(|store| store.memory_usage() + store.doc_count() as u64)
        .sum()
}

#[cfg(test)]
mod tests {
    use strata_attribute::AttrValue;
    use strata_format::{FieldConfig, FieldType, Schema};
    use strata_io::MemoryDirectory;
    use strata_segment::SegmentData;

    use super::*;
    use crate::split_strategy::DefaultSplitStrategy;

    fn schema() -> Schema {
        Schema {
            fields: vec![
                FieldConfig::new(0, "id", FieldType::UInt32),
                FieldConfig::new(1, "tags", FieldType::String).multi_value(),
            ],
            ..Default::default()
        }
    }

    fn segment(
        dir: &MemoryDirectory,
        configs: &[Arc<AttributeConfig>],
        id: u32,
        docs: &[(u32, &[&str])],
    ) -> Arc<SegmentData> {
        let path = format!("segment_{id}");
        let building =
            SegmentData::create_building(id, &path, configs, 0, &MemoryQuota::unlimited())
                .unwrap();
        for (pk, tags) in docs {
            let values = vec![
                configs[0].codec().unwrap().encode(&AttrValue::from(*pk)).unwrap(),
                configs[1]
                    .codec()
                    .unwrap()
                    .encode(&AttrValue::strings(tags.iter().copied()))
                    .unwrap(),
            ];
            building.add_document(&values).unwrap();
        }
        building.dump(dir).unwrap();
        Arc::new(SegmentData::open(dir, id, &path, configs, &MemoryQuota::unlimited()).unwrap())
    }

    #[test]
    fn test_merge_two_segments() {
        let dir = MemoryDirectory::new();
        let configs = AttributeConfig::from_schema(&schema()).unwrap();
        let a = segment(&dir, &configs, 0, &[(1, &["x"]), (2, &[]), (3, &["y", "z"])]);
        let b = segment(&dir, &configs, 1, &[(4, &["w"]), (5, &["v"])]);
        a.delete_document(1).unwrap();
        let sources = vec![a, b];
        let reclaim_map = Arc::new(ReclaimMap::build(&sources, &DefaultSplitStrategy).unwrap());
        let dir: Arc<dyn Directory> = Arc::new(dir);

        for config in &configs {
            let ctx = AttributeMergeContext {
                dir: dir.clone(),
                config: config.clone(),
                sources: sources.clone(),
                reclaim_map: reclaim_map.clone(),
                target_paths: vec![Some("segment_2".to_string())],
                quota: MemoryQuota::unlimited(),
            };
            let infos = DefaultAttributeMerger.merge(&ctx).unwrap();
            assert_eq!(infos.len(), 1);
            assert_eq!(infos[0].as_ref().unwrap().doc_count, 4);
            assert!(estimate_merge_cost(config, &sources) > 0);
        }

        dir.write_file(
            "segment_2/segment_info",
            &strata_format::SegmentInfo::new(4).to_json().unwrap(),
        )
        .unwrap();
        let merged =
            SegmentData::open(dir.as_ref(), 2, "segment_2", &configs, &MemoryQuota::unlimited())
                .unwrap();
        let ids = (0..4)
            .map(|d| merged.attribute(0).unwrap().read_value(d).unwrap().as_i64().unwrap())
            .collect::<Vec<_>>();
        assert_eq!(ids, vec![1, 3, 4, 5]);
        assert_eq!(
            merged.attribute(1).unwrap().read_value(1).unwrap(),
            AttrValue::strings(["y", "z"])
        );
    }

    #[test]
    fn test_quota_exhaustion_is_retryable() {
        let dir = MemoryDirectory::new();
        let configs = AttributeConfig::from_schema(&schema()).unwrap();
        let docs = (0..2000u32).map(|i| (i, &["tag"][..])).collect::<Vec<_>>();
        let a = segment(&dir, &configs, 0, &docs);
        let sources = vec![a];
        let reclaim_map = Arc::new(ReclaimMap::build(&sources, &DefaultSplitStrategy).unwrap());
        let ctx = AttributeMergeContext {
            dir: Arc::new(dir),
            config: configs[1].clone(),
            sources,
            reclaim_map,
            target_paths: vec![Some("segment_1".to_string())],
            quota: MemoryQuota::new(16),
        };
        let err = DefaultAttributeMerger.merge(&ctx).unwrap_err();
        assert!(err.is_retryable());
    }
}

//! Execution of merge plans: reclaim maps, per-attribute merge tasks spread over a
//! fixed number of instances, and the version switch.

use std::sync::Arc;

use ahash::{AHashMap, AHashSet};
use strata_attribute::AttributeConfig;
use strata_budget_tracker::MemoryQuota;
use strata_common::{
    Result,
    error::Error,
    ids::SegmentId,
};
use strata_format::{DataInfo, MergeConfig, Schema, SegmentInfo, layout};
use strata_io::join_path;
use strata_segment::{SegmentData, SegmentDirectory};
use strata_workflow::ThreadPool;

use crate::{
    attribute_merger::{AttributeMergeContext, AttributeMerger, estimate_merge_cost},
    plan::{MergePlan, MergeResult, PlanOutcome},
    reclaim_map::ReclaimMap,
    registry::{DEFAULT_PLUGIN, PluginRegistry},
    scheduler::{MergeTaskItem, MergeTaskScheduler},
    split_strategy::SplitContext,
};

/// Plan state between task scheduling and the version switch.
struct PreparedPlan {
    sources: Vec<Arc<SegmentData>>,
    reclaim_map: Arc<ReclaimMap>,
    /// Allocated segment id and path of every target; `None` for empty targets.
    targets: Vec<Option<(SegmentId, String)>>,
    tasks: Vec<(Arc<AttributeConfig>, u64)>,
}

struct MergeTask {
    item: MergeTaskItem,
    merger: Box<dyn AttributeMerger>,
    ctx: AttributeMergeContext,
}

type TaskOutcome = (MergeTaskItem, Result<Vec<Option<DataInfo>>>);

/// Runs merge plans against one segment directory.
pub struct MergeExecutor<'a> {
    directory: &'a SegmentDirectory,
    schema: &'a Schema,
    attributes: &'a [Arc<AttributeConfig>],
    registry: &'a PluginRegistry,
    config: &'a MergeConfig,
    quota: MemoryQuota,
    merger_name: String,
    scheduler: MergeTaskScheduler,
    pool: ThreadPool,
}

impl<'a> MergeExecutor<'a> {
    pub fn new(
        directory: &'a SegmentDirectory,
        schema: &'a Schema,
        attributes: &'a [Arc<AttributeConfig>],
        registry: &'a PluginRegistry,
        config: &'a MergeConfig,
        quota: &MemoryQuota,
    ) -> Result<MergeExecutor<'a>> {
        let scheduler = MergeTaskScheduler::new(config.instance_count)?;
        let pool = ThreadPool::with_thread_name(config.instance_count, |i| {
            format!("strata-merge-{i}")
        });
        Ok(MergeExecutor {
            directory,
            schema,
            attributes,
            registry,
            config,
            quota: quota.clone(),
            merger_name: DEFAULT_PLUGIN.to_string(),
            scheduler,
            pool,
        })
    }

    /// Selects the registered attribute merger used for every attribute.
    pub fn with_attribute_merger(mut self, name: impl Into<String>) -> Self {
        self.merger_name = name.into();
        self
    }

    /// Merges the plans and commits a version in which every plan's sources are
    /// replaced by its targets. `segments` holds the open source segments by id.
    ///
    /// On failure no version is committed and the partially written targets are
    /// removed.
    pub fn execute(
        &self,
        plans: &[MergePlan],
        segments: &AHashMap<SegmentId, Arc<SegmentData>>,
    ) -> Result<MergeResult> {
        let plans = plans.iter().filter(|p| !p.is_empty()).collect::<Vec<_>>();
        self.check_plans(&plans, segments)?;
        log::info!(
            "merge of {} plan(s) over segments {:?} started",
            plans.len(),
            plans.iter().map(|p| p.sources()).collect::<Vec<_>>()
        );

        let mut prepared = Vec::with_capacity(plans.len());
        for plan in &plans {
            match self.prepare(plan, segments) {
                Ok(p) => prepared.push(p),
                Err(e) => {
                    self.discard_targets(&prepared);
                    return Err(e);
                }
            }
        }

        let result = self
            .run_tasks(&prepared)
            .and_then(|_| self.switch_version(&prepared));
        match result {
            Ok(result) => {
                if let Err(e) = self.directory.collect_garbage() {
                    log::warn!("removing merged segments failed, retrying later: {e}");
                }
                log::info!(
                    "merge finished: segments {:?} -> {:?}",
                    result.merged_segments().collect::<Vec<_>>(),
                    result.new_segments().collect::<Vec<_>>()
                );
                Ok(result)
            }
            Err(e) => {
                self.discard_targets(&prepared);
                Err(e)
            }
        }
    }

    fn check_plans(
        &self,
        plans: &[&MergePlan],
        segments: &AHashMap<SegmentId, Arc<SegmentData>>,
    ) -> Result<()> {
        let working = self.directory.working_version();
        let mut seen = AHashSet::new();
        for &id in plans.iter().flat_map(|p| p.sources()) {
            if !seen.insert(id) {
                return Err(Error::invalid_arg(
                    "plans",
                    format!("segment {id} is a source of several plans"),
                ));
            }
            if !working.has_segment(id) {
                return Err(Error::invalid_arg(
                    "plans",
                    format!("segment {id} is not in the current version"),
                ));
            }
            match segments.get(&id) {
                None => {
                    return Err(Error::invalid_arg(
                        "segments",
                        format!("segment {id} is not open"),
                    ));
                }
                Some(segment) if segment.is_building() => {
                    return Err(Error::invalid_operation(format!(
                        "merge of segment {id}, which is still building"
                    )));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    fn prepare(
        &self,
        plan: &MergePlan,
        segments: &AHashMap<SegmentId, Arc<SegmentData>>,
    ) -> Result<PreparedPlan> {
        let sources = plan
            .sources()
            .iter()
            .filter_map(|id| segments.get(id).cloned())
            .collect::<Vec<_>>();
        let ctx = SplitContext {
            schema: self.schema,
            sources: &sources,
        };
        let strategy = self
            .registry
            .create_split_strategy(self.config.split.as_ref(), &ctx)?;
        let reclaim_map = Arc::new(ReclaimMap::build(&sources, strategy.as_ref())?);

        let mut prepared = PreparedPlan {
            targets: Vec::with_capacity(reclaim_map.target_segment_count()),
            tasks: self
                .attributes
                .iter()
                .map(|config| (config.clone(), estimate_merge_cost(config, &sources)))
                .collect(),
            sources,
            reclaim_map,
        };
        for &count in prepared.reclaim_map.target_doc_counts() {
            if count == 0 {
                prepared.targets.push(None);
                continue;
            }
            // Ids handed out so far are cleaned up by the caller on error.
            match self.directory.create_new_segment_id() {
                Ok(id) => prepared
                    .targets
                    .push(Some((id, self.directory.segment_path(id)))),
                Err(e) => {
                    self.discard_targets(std::slice::from_ref(&prepared));
                    return Err(e);
                }
            }
        }
        Ok(prepared)
    }

    fn run_tasks(&self, prepared: &[PreparedPlan]) -> Result<()> {
        let costs = prepared
            .iter()
            .map(|p| p.tasks.iter().map(|(_, cost)| *cost).collect())
            .collect::<Vec<Vec<u64>>>();
        let assignment = self.scheduler.schedule_plans(&costs);

        let mut instances = Vec::with_capacity(assignment.len());
        for items in &assignment {
            let tasks = items
                .iter()
                .map(|item| self.make_task(prepared, *item))
                .collect::<Result<Vec<_>>>()?;
            instances.push(tasks);
        }

        let handles = instances
            .into_iter()
            .filter(|tasks| !tasks.is_empty())
            .map(|tasks| {
                self.pool.spawn(move || {
                    let mut outcomes: Vec<TaskOutcome> = Vec::with_capacity(tasks.len());
                    for task in tasks {
                        let result = task.merger.merge(&task.ctx);
                        let failed = result.is_err();
                        outcomes.push((task.item, result));
                        if failed {
                            break;
                        }
                    }
                    outcomes
                })
            })
            .collect::<Vec<_>>();

        let mut outcomes = strata_workflow::JoinHandle::join_all(handles)
            .into_iter()
            .flatten()
            .collect::<Vec<_>>();
        outcomes.sort_by_key(|(item, _)| (item.plan_index, item.task_index));
        for (item, result) in outcomes {
            let infos = result?;
            let plan = &prepared[item.plan_index];
            let complete = infos.len() == plan.targets.len()
                && infos
                    .iter()
                    .zip(&plan.targets)
                    .all(|(info, target)| target.is_none() || info.is_some());
            if !complete {
                return Err(Error::invalid_operation(format!(
                    "attribute merger '{}' did not write every target of plan {}",
                    self.merger_name, item.plan_index
                )));
            }
        }
        Ok(())
    }

    fn make_task(&self, prepared: &[PreparedPlan], item: MergeTaskItem) -> Result<MergeTask> {
        let plan = &prepared[item.plan_index];
        let (config, _) = &plan.tasks[item.task_index];
        let merger = self
            .registry
            .create_attribute_merger(&self.merger_name, config)?;
        Ok(MergeTask {
            item,
            merger,
            ctx: AttributeMergeContext {
                dir: self.directory.directory().clone(),
                config: config.clone(),
                sources: plan.sources.clone(),
                reclaim_map: plan.reclaim_map.clone(),
                target_paths: plan
                    .targets
                    .iter()
                    .map(|t| t.as_ref().map(|(_, path)| path.clone()))
                    .collect(),
                quota: self.quota.clone(),
            },
        })
    }

    /// Writes the targets' `segment_info` and commits the new version.
    fn switch_version(&self, prepared: &[PreparedPlan]) -> Result<MergeResult> {
        let dir = self.directory.directory();
        let mut outcomes = Vec::with_capacity(prepared.len());
        for plan in prepared {
            let infos = plan.sources.iter().map(|s| s.info()).collect::<Vec<_>>();
            let locator = infos.iter().map(|i| i.locator).max().unwrap_or_default();
            let timestamp = infos.iter().map(|i| i.timestamp).max().unwrap_or_default();

            let mut targets = Vec::new();
            for (target, &doc_count) in plan
                .targets
                .iter()
                .zip(plan.reclaim_map.target_doc_counts())
            {
                let Some((id, path)) = target else {
                    continue;
                };
                let info = SegmentInfo {
                    locator,
                    timestamp,
                    merged: true,
                    schema_version_id: self.schema.schema_version_id,
                    ..SegmentInfo::new(doc_count)
                };
                let info_path = join_path(path, layout::SEGMENT_INFO);
                dir.write_file(&info_path, &info.to_json()?)
                    .map_err(|e| Error::io(&info_path, e))?;
                targets.push((*id, info));
            }
            outcomes.push(PlanOutcome {
                sources: plan.reclaim_map.source_segments().to_vec(),
                target_doc_counts: plan.reclaim_map.target_doc_counts().to_vec(),
                targets,
                dropped_docs: plan.reclaim_map.deleted_doc_count(),
            });
        }

        let added = outcomes
            .iter()
            .flat_map(|o| o.targets.iter().cloned())
            .collect::<Vec<_>>();
        let removed = outcomes
            .iter()
            .flat_map(|o| o.sources.iter().copied())
            .collect::<Vec<_>>();
        let version = self.directory.replace_segments(&added, &removed)?;
        Ok(MergeResult {
            plans: outcomes,
            version,
        })
    }

    fn discard_targets(&self, prepared: &[PreparedPlan]) {
        let dir = self.directory.directory();
        for (_, path) in prepared.iter().flat_map(|p| p.targets.iter().flatten()) {
            if dir.exists(path) {
                if let Err(e) = dir.remove_dir_all(path) {
                    log::warn!("failed to remove unfinished merge target {path}: {e}");
                }
            }
        }
    }
}

//! Load balancing of cost-estimated merge tasks across a fixed number of instances.

use std::{cmp::Reverse, collections::BinaryHeap};

use itertools::Itertools;
use strata_common::{Result, verify_arg};

/// A merge task identified by its plan and its index within the plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeTaskItem {
    pub plan_index: usize,
    pub task_index: usize,
    pub cost: u64,
}

/// Greedy longest-processing-time-first scheduler.
///
/// Tasks are taken in descending cost order and each is given to the instance with the
/// smallest total so far (lowest instance index on ties). A task runs start to finish
/// on the instance it is assigned to.
#[derive(Debug, Clone, Copy)]
pub struct MergeTaskScheduler {
    instance_count: usize,
}

impl MergeTaskScheduler {
    pub fn new(instance_count: usize) -> Result<MergeTaskScheduler> {
        verify_arg!(instance_count, instance_count > 0);
        Ok(MergeTaskScheduler { instance_count })
    }

    pub fn instance_count(&self) -> usize {
        self.instance_count
    }

    /// Flattens the per-plan task costs and assigns them. Returns one task list per
    /// instance.
    pub fn schedule_plans(&self, plan_costs: &[Vec<u64>]) -> Vec<Vec<MergeTaskItem>> {
        let tasks = plan_costs
            .iter()
            .enumerate()
            .flat_map(|(plan_index, costs)| {
                costs
                    .iter()
                    .enumerate()
                    .map(move |(task_index, &cost)| MergeTaskItem {
                        plan_index,
                        task_index,
                        cost,
                    })
            })
            .collect::<Vec<_>>();
        self.schedule(tasks)
    }

    pub fn schedule(&self, tasks: Vec<MergeTaskItem>) -> Vec<Vec<MergeTaskItem>> {
        let mut instances = vec![Vec::new(); self.instance_count];
        let mut loads = (0..self.instance_count)
            .map(|i| Reverse((0u64, i)))
            .collect::<BinaryHeap<_>>();

        let sorted = tasks
            .into_iter()
            .sorted_by_key(|t| (Reverse(t.cost), t.plan_index, t.task_index));
        for task in sorted {
            let Some(Reverse((load, instance))) = loads.pop() else {
                break;
            };
            log::debug!(
                "merge task {}.{} (cost {}) -> instance {instance} (load {load})",
                task.plan_index,
                task.task_index,
                task.cost
            );
            instances[instance].push(task);
            loads.push(Reverse((load + task.cost, instance)));
        }
        instances
    }
}

/// Total cost assigned to each instance.
pub fn instance_loads(assignment: &[Vec<MergeTaskItem>]) -> Vec<u64> {
    assignment
        .iter()
        .map(|tasks| tasks.iter().map(|t| t.cost).sum())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spread(loads: &[u64]) -> u64 {
        loads.iter().max().unwrap() - loads.iter().min().unwrap()
    }

    #[test]
    fn test_six_tasks_three_instances() {
        let scheduler = MergeTaskScheduler::new(3).unwrap();
        let assignment = scheduler.schedule_plans(&[vec![10, 9, 8, 7, 6, 5]]);
        let costs = assignment
            .iter()
            .map(|tasks| tasks.iter().map(|t| t.cost).collect::<Vec<_>>())
            .collect::<Vec<_>>();
        assert_eq!(costs, vec![vec![10, 5], vec![9, 6], vec![8, 7]]);
        let loads = instance_loads(&assignment);
        assert_eq!(loads, vec![15, 15, 15]);
        assert!(spread(&loads) <= 10);
    }

    #[test]
    fn test_tasks_keep_their_origin() {
        let scheduler = MergeTaskScheduler::new(2).unwrap();
        let assignment = scheduler.schedule_plans(&[vec![1, 4], vec![3]]);
        let mut all = assignment.concat();
        all.sort_by_key(|t| (t.plan_index, t.task_index));
        assert_eq!(
            all,
            vec![
                MergeTaskItem { plan_index: 0, task_index: 0, cost: 1 },
                MergeTaskItem { plan_index: 0, task_index: 1, cost: 4 },
                MergeTaskItem { plan_index: 1, task_index: 0, cost: 3 },
            ]
        );
    }

    #[test]
    fn test_load_bound_on_random_tasks() {
        let mut rng = fastrand::Rng::with_seed(7);
        for _ in 0..200 {
            let instances = rng.usize(2..8);
            let plans = (0..rng.usize(1..4))
                .map(|_| (0..rng.usize(0..30)).map(|_| rng.u64(0..1000)).collect())
                .collect::<Vec<Vec<u64>>>();
            let max_cost = plans.iter().flatten().copied().max().unwrap_or(0);
            let assignment = MergeTaskScheduler::new(instances)
                .unwrap()
                .schedule_plans(&plans);
            assert_eq!(assignment.len(), instances);
            let loads = instance_loads(&assignment);
            assert!(spread(&loads) <= max_cost, "loads {loads:?}, max cost {max_cost}");
            let total = plans.iter().flatten().sum::<u64>();
            assert_eq!(loads.iter().sum::<u64>(), total);
        }
    }

    #[test]
    fn test_zero_instances_rejected() {
        assert!(MergeTaskScheduler::new(0).is_err());
    }
}

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

use crate::domain::errors::{ClientError, ClientResult};
use crate::domain::models::{TaskDefinition, TaskPriority};

/// Validates task batches and orders them for submission.
#[derive(Debug, Clone, Default)]
pub struct DependencyResolver;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Visit {
    Unvisited,
    OnStack,
    Done,
}

/// Ordering key among ready tasks; the greatest key is scheduled first.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
struct Ready {
    capable: bool,
    priority: TaskPriority,
    position: Reverse<usize>,
}

fn index_of(tasks: &[TaskDefinition]) -> HashMap<&str, usize> {
    tasks
        .iter()
        .enumerate()
        .map(|(i, t)| (t.id.as_str(), i))
        .collect()
}

impl DependencyResolver {
    pub fn new() -> Self {
        Self
    }

    /// Check that ids are unique and every dependency names a task in the batch.
    pub fn validate_dependencies(&self, tasks: &[TaskDefinition]) -> ClientResult<()> {
        let mut seen = HashSet::with_capacity(tasks.len());
        for task in tasks {
            if task.id.is_empty() {
                return Err(ClientError::validation("task id must not be empty"));
            }
            if !seen.insert(task.id.as_str()) {
                return Err(ClientError::invalid_task(
                    &task.id,
                    format!("duplicate task id '{}'", task.id),
                ));
            }
        }
        for task in tasks {
            if let Some(missing) = task.dependencies.iter().find(|d| !seen.contains(d.as_str())) {
                return Err(ClientError::invalid_task(
                    &task.id,
                    format!("task '{}' depends on unknown task '{missing}'", task.id),
                ));
            }
        }
        Ok(())
    }

    /// Find one dependency cycle, returned as the task ids along it.
    ///
    /// Depth-first over the dependency edges with an explicit stack, so very
    /// deep chains cannot exhaust the call stack. Dependencies outside the
    /// batch are ignored here.
    pub fn detect_cycle(&self, tasks: &[TaskDefinition]) -> Option<Vec<String>> {
        let index = index_of(tasks);
        let edges: Vec<Vec<usize>> = tasks
            .iter()
            .map(|t| {
                t.dependencies
                    .iter()
                    .filter_map(|d| index.get(d.as_str()).copied())
                    .collect()
            })
            .collect();

        let mut visit = vec![Visit::Unvisited; tasks.len()];
        for root in 0..tasks.len() {
            if visit[root] != Visit::Unvisited {
                continue;
            }
            visit[root] = Visit::OnStack;
            let mut stack: Vec<(usize, usize)> = vec![(root, 0)];

            while let Some(frame) = stack.last_mut() {
                let node = frame.0;
                let Some(&next) = edges[node].get(frame.1) else {
                    visit[node] = Visit::Done;
                    stack.pop();
                    continue;
                };
                frame.1 += 1;

                match visit[next] {
                    Visit::Unvisited => {
                        visit[next] = Visit::OnStack;
                        stack.push((next, 0));
                    }
                    Visit::OnStack => {
                        let start = stack.iter().position(|&(n, _)| n == next).unwrap_or(0);
                        return Some(
                            stack[start..]
                                .iter()
                                .map(|&(n, _)| tasks[n].id.clone())
                                .collect(),
                        );
                    }
                    Visit::Done => {}
                }
            }
        }
        None
    }

    /// Order `tasks` so that every task follows its dependencies.
    ///
    /// Among tasks that are ready at the same time, those whose required
    /// capabilities are all in `available` go first, then higher priority,
    /// then original batch order.
    ///
    /// # Errors
    /// A validation error naming the offending task for duplicate ids, unknown
    /// dependencies, or a dependency cycle.
    pub fn resolve_order(
        &self,
        tasks: &[TaskDefinition],
        available: &HashSet<String>,
    ) -> ClientResult<Vec<TaskDefinition>> {
        self.validate_dependencies(tasks)?;
        if let Some(cycle) = self.detect_cycle(tasks) {
            let first = cycle.first().cloned().unwrap_or_default();
            let mut path = cycle.join(" -> ");
            path.push_str(" -> ");
            path.push_str(&first);
            return Err(ClientError::invalid_task(
                first,
                format!("circular dependency: {path}"),
            ));
        }

        let index = index_of(tasks);
        let mut in_degree = vec![0_usize; tasks.len()];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); tasks.len()];
        for (i, task) in tasks.iter().enumerate() {
            let deps: HashSet<usize> = task
                .dependencies
                .iter()
                .filter_map(|d| index.get(d.as_str()).copied())
                .collect();
            in_degree[i] = deps.len();
            for dep in deps {
                dependents[dep].push(i);
            }
        }

        let ready_key = |i: usize| Ready {
            capable: tasks[i]
                .required_capabilities
                .iter()
                .all(|c| available.contains(c)),
            priority: tasks[i].priority,
            position: Reverse(i),
        };

        let mut ready: BinaryHeap<Ready> = (0..tasks.len())
            .filter(|&i| in_degree[i] == 0)
            .map(&ready_key)
            .collect();

        let mut ordered = Vec::with_capacity(tasks.len());
        while let Some(Ready {
            position: Reverse(i),
            ..
        }) = ready.pop()
        {
            ordered.push(tasks[i].clone());
            for &dependent in &dependents[i] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    ready.push(ready_key(dependent));
                }
            }
        }

        if ordered.len() != tasks.len() {
            return Err(ClientError::validation(
                "dependency ordering incomplete: unresolved cycle",
            ));
        }
        Ok(ordered)
    }
}

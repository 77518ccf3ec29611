use proptest::prelude::*;
use std::collections::{HashMap, HashSet};

use swarm_client::{DependencyResolver, TaskDefinition};

/// Random DAG: task `i` may only depend on tasks with a smaller index,
/// presented to the resolver in a shuffled order.
fn dag() -> impl Strategy<Value = Vec<TaskDefinition>> {
    (1usize..25)
        .prop_flat_map(|size| {
            (
                proptest::collection::vec(proptest::collection::vec(any::<bool>(), size), size),
                Just((0..size).collect::<Vec<_>>()).prop_shuffle(),
            )
        })
        .prop_map(|(edges, order)| {
            order
                .into_iter()
                .map(|i| {
                    let deps = (0..i).filter(|&j| edges[i][j]).map(|j| format!("t{j}"));
                    TaskDefinition::new(format!("t{i}"), format!("task {i}")).with_dependencies(deps)
                })
                .collect()
        })
}

proptest! {
    /// Every task is submitted after all of its dependencies.
    #[test]
    fn prop_order_respects_dependencies(tasks in dag()) {
        let ordered = DependencyResolver::new()
            .resolve_order(&tasks, &HashSet::new())
            .unwrap();

        let position: HashMap<&str, usize> = ordered
            .iter()
            .enumerate()
            .map(|(i, t)| (t.id.as_str(), i))
            .collect();
        for task in &ordered {
            for dep in &task.dependencies {
                prop_assert!(position[dep.as_str()] < position[task.id.as_str()]);
            }
        }
    }

    /// The order is a permutation of the input.
    #[test]
    fn prop_order_is_permutation(tasks in dag()) {
        let ordered = DependencyResolver::new()
            .resolve_order(&tasks, &HashSet::new())
            .unwrap();

        prop_assert_eq!(ordered.len(), tasks.len());
        let input: HashSet<_> = tasks.iter().map(|t| t.id.clone()).collect();
        let output: HashSet<_> = ordered.iter().map(|t| t.id.clone()).collect();
        prop_assert_eq!(input, output);
    }

    /// Closing any chain into a loop is rejected and reported.
    #[test]
    fn prop_cycles_are_rejected(len in 2usize..15) {
        let tasks: Vec<TaskDefinition> = (0..len)
            .map(|i| {
                let dep = format!("t{}", (i + 1) % len);
                TaskDefinition::new(format!("t{i}"), "cyclic").with_dependencies([dep])
            })
            .collect();
        let resolver = DependencyResolver::new();

        let cycle = resolver.detect_cycle(&tasks);
        prop_assert!(cycle.is_some_and(|c| c.len() == len));

        let err = resolver.resolve_order(&tasks, &HashSet::new()).unwrap_err();
        prop_assert!(err.to_string().contains("circular dependency"));
        prop_assert!(err.task_id().is_some());
    }
}

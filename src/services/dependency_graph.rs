//! C2: tracks task dependency edges and exposes readiness/cycle queries.
//!
//! The DFS cycle check and Kahn's-algorithm depth calculation cover the
//! operation set the scheduler actually needs: `add`, `mark_completed`,
//! `mark_failed`, `remove`, `depth`, and `stats`.

use crate::domain::ids::TaskId;
use std::collections::{HashMap, HashSet, VecDeque};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, Default)]
pub struct DependencyStats {
    pub total_nodes: usize,
    pub completed: usize,
    pub failed: usize,
    pub ready: usize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum NodeState {
    #[default]
    Pending,
    Completed,
    Failed,
}

#[derive(Debug, Default)]
struct Node {
    dependencies: Vec<TaskId>,
    state: NodeState,
}

/// An in-memory DAG of task dependencies. Cycles are rejected at `add`
/// time rather than discovered later, so the scheduler never has to
/// handle a task that can never become ready.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    nodes: RwLock<HashMap<TaskId, Node>>,
    /// Reverse adjacency: `dependents[d]` is every task that lists `d`
    /// as a dependency, kept in step with `nodes` so `mark_completed`
    /// and `mark_failed` can report affected tasks directly instead of
    /// scanning every node.
    dependents: RwLock<HashMap<TaskId, HashSet<TaskId>>>,
}

impl DependencyGraph {
    #[must_use]
    pub fn new() -> Self {
        Self {
            nodes: RwLock::new(HashMap::new()),
            dependents: RwLock::new(HashMap::new()),
        }
    }

    /// Registers `task` with its prerequisite ids. Rejects the insert
    /// (returning `false`, leaving the graph untouched) if it would
    /// create a cycle.
    pub async fn add(&self, task: TaskId, dependencies: Vec<TaskId>) -> bool {
        let mut nodes = self.nodes.write().await;
        let previous_dependencies = nodes.get(&task).map(|n| n.dependencies.clone());
        nodes.entry(task).or_default().dependencies = dependencies.clone();
        nodes.entry(task).or_insert_with(Node::default);

        if Self::has_cycle_from(&nodes, task) {
            // Roll back: either the entry was new, or the dependency list changed.
            if let Some(node) = nodes.get_mut(&task) {
                node.dependencies = previous_dependencies.unwrap_or_default();
            }
            return false;
        }
        drop(nodes);

        let mut dependents = self.dependents.write().await;
        if let Some(previous) = previous_dependencies {
            for dep in previous {
                if let Some(set) = dependents.get_mut(&dep) {
                    set.remove(&task);
                }
            }
        }
        for dep in dependencies {
            dependents.entry(dep).or_default().insert(task);
        }
        true
    }

    /// DFS with an explicit recursion stack rather than the call stack,
    /// so pathological dependency chains can't blow it.
    fn has_cycle_from(nodes: &HashMap<TaskId, Node>, start: TaskId) -> bool {
        fn visit(
            nodes: &HashMap<TaskId, Node>,
            node: TaskId,
            visited: &mut HashSet<TaskId>,
            stack: &mut HashSet<TaskId>,
        ) -> bool {
            if stack.contains(&node) {
                return true;
            }
            if visited.contains(&node) {
                return false;
            }
            visited.insert(node);
            stack.insert(node);
            if let Some(n) = nodes.get(&node) {
                for &dep in &n.dependencies {
                    if visit(nodes, dep, visited, stack) {
                        return true;
                    }
                }
            }
            stack.remove(&node);
            false
        }

        let mut visited = HashSet::new();
        let mut stack = HashSet::new();
        visit(nodes, start, &mut visited, &mut stack)
    }

    /// Marks `task` completed and returns every direct dependent that
    /// has just become ready (all of its dependencies are now
    /// `Completed`), so the caller can move them `Pending` -> `Queued`
    /// without a full scan of its own task table.
    pub async fn mark_completed(&self, task: TaskId) -> Vec<TaskId> {
        let mut nodes = self.nodes.write().await;
        if let Some(node) = nodes.get_mut(&task) {
            node.state = NodeState::Completed;
        }
        let dependents = self.dependents.read().await;
        let Some(candidates) = dependents.get(&task) else {
            return Vec::new();
        };
        candidates
            .iter()
            .filter(|&&dependent| {
                nodes
                    .get(&dependent)
                    .is_some_and(|n| n.dependencies.iter().all(|d| nodes.get(d).is_some_and(|dn| dn.state == NodeState::Completed)))
            })
            .copied()
            .collect()
    }

    /// Marks `task` failed and returns every transitive dependent —
    /// direct or indirect — since a failed ancestor makes the entire
    /// downstream subgraph unreachable. The caller cancels these rather
    /// than waiting on them.
    pub async fn mark_failed(&self, task: TaskId) -> Vec<TaskId> {
        if let Some(node) = self.nodes.write().await.get_mut(&task) {
            node.state = NodeState::Failed;
        }
        let dependents = self.dependents.read().await;
        let mut seen = HashSet::new();
        let mut queue = VecDeque::new();
        queue.push_back(task);
        let mut collected = Vec::new();
        while let Some(current) = queue.pop_front() {
            let Some(direct) = dependents.get(&current) else {
                continue;
            };
            for &dependent in direct {
                if seen.insert(dependent) {
                    collected.push(dependent);
                    queue.push_back(dependent);
                }
            }
        }
        collected
    }

    pub async fn remove(&self, task: TaskId) {
        let removed_deps = self.nodes.write().await.remove(&task).map(|n| n.dependencies);
        self.dependents.write().await.remove(&task);
        if let Some(deps) = removed_deps {
            let mut dependents = self.dependents.write().await;
            for dep in deps {
                if let Some(set) = dependents.get_mut(&dep) {
                    set.remove(&task);
                }
            }
        }
    }

    /// True once every dependency of `task` is `Completed`. A task with
    /// a `Failed` dependency is never ready; the scheduler cancels it
    /// instead of waiting.
    pub async fn is_ready(&self, task: TaskId) -> bool {
        let nodes = self.nodes.read().await;
        let Some(node) = nodes.get(&task) else {
            return true;
        };
        node.dependencies.iter().all(|dep| {
            nodes
                .get(dep)
                .is_some_and(|d| d.state == NodeState::Completed)
        })
    }

    /// The first not-yet-`Completed` dependency of `task`, if any —
    /// used to report *which* prerequisite is blocking a start attempt
    /// rather than just that one is.
    pub async fn first_unmet_dependency(&self, task: TaskId) -> Option<TaskId> {
        let nodes = self.nodes.read().await;
        let node = nodes.get(&task)?;
        node.dependencies
            .iter()
            .copied()
            .find(|dep| !nodes.get(dep).is_some_and(|d| d.state == NodeState::Completed))
    }

    /// True if any dependency of `task` has failed, meaning `task` can
    /// never become ready and should be cancelled rather than awaited.
    pub async fn has_failed_dependency(&self, task: TaskId) -> bool {
        let nodes = self.nodes.read().await;
        let Some(node) = nodes.get(&task) else {
            return false;
        };
        node.dependencies
            .iter()
            .any(|dep| nodes.get(dep).is_some_and(|d| d.state == NodeState::Failed))
    }

    /// Longest dependency chain ending at `task`, computed via a
    /// breadth-first walk over predecessors (Kahn's-algorithm style
    /// layering, kept non-recursive so arbitrarily deep graphs don't
    /// blow the stack).
    pub async fn depth(&self, task: TaskId) -> usize {
        let nodes = self.nodes.read().await;
        let mut memo: HashMap<TaskId, usize> = HashMap::new();
        let mut queue = VecDeque::new();
        queue.push_back(task);
        let mut order = Vec::new();
        let mut seen = HashSet::new();
        while let Some(current) = queue.pop_front() {
            if !seen.insert(current) {
                continue;
            }
            order.push(current);
            if let Some(node) = nodes.get(&current) {
                for &dep in &node.dependencies {
                    queue.push_back(dep);
                }
            }
        }
        for node in order.into_iter().rev() {
            let depth = nodes
                .get(&node)
                .map(|n| {
                    n.dependencies
                        .iter()
                        .map(|d| memo.get(d).copied().unwrap_or(0) + 1)
                        .max()
                        .unwrap_or(0)
                })
                .unwrap_or(0);
            memo.insert(node, depth);
        }
        memo.get(&task).copied().unwrap_or(0)
    }

    pub async fn stats(&self) -> DependencyStats {
        let nodes = self.nodes.read().await;
        let mut stats = DependencyStats {
            total_nodes: nodes.len(),
            ..Default::default()
        };
        for (&task, node) in nodes.iter() {
            match node.state {
                NodeState::Completed => stats.completed += 1,
                NodeState::Failed => stats.failed += 1,
                NodeState::Pending => {
                    if node
                        .dependencies
                        .iter()
                        .all(|dep| nodes.get(dep).is_some_and(|d| d.state == NodeState::Completed))
                    {
                        stats.ready += 1;
                    }
                    let _ = task;
                }
            }
        }
        stats
    }
}

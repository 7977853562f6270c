// Dependency ordering
//
// Iterative post-order depth-first traversal. Back-edges are cycles: each is
// reported once, the offending edge is ignored for the rest of the
// traversal, and the walk continues.

use crate::diagnostics::DiagnosticsRecorder;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// A declared dependency that is not part of the requested set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingDependency {
    /// Component declaring the dependency
    pub dependent: String,
    /// Name that was not requested
    pub dependency: String,
}

/// Result of dependency ordering
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadPlan {
    /// Every requested component, dependencies first
    pub order: Vec<String>,
    /// Detected cycles, each as the path `a -> ... -> a`
    pub cycles: Vec<Vec<String>>,
    /// Dropped edges to components outside the requested set
    pub missing: Vec<MissingDependency>,
    /// Components that listed themselves as a dependency
    pub self_dependencies: Vec<String>,
}

impl LoadPlan {
    /// Position of a component in the load order
    pub fn position(&self, name: &str) -> Option<usize> {
        self.order.iter().position(|n| n == name)
    }

    /// True when `name` is a member of a detected cycle.
    ///
    /// Ordering is not guaranteed among cycle members.
    pub fn in_cycle(&self, name: &str) -> bool {
        self.cycles.iter().any(|c| c.iter().any(|n| n == name))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    Visiting,
    Done,
}

struct Frame<'a> {
    node: &'a str,
    next: usize,
}

/// Order `requested` so that dependencies come before dependents.
///
/// `edges` maps a component to the names it depends on. Ties are broken by
/// the sequence of `requested` and by each component's declared dependency
/// order, so the result is deterministic.
pub fn resolve_load_order(
    requested: &[String],
    edges: &HashMap<String, Vec<String>>,
    diagnostics: &DiagnosticsRecorder,
) -> LoadPlan {
    let mut plan = LoadPlan::default();

    let mut marks: HashMap<&str, Mark> = HashMap::with_capacity(requested.len());
    let mut roots: Vec<&str> = Vec::with_capacity(requested.len());
    for name in requested {
        if marks.insert(name.as_str(), Mark::Unvisited).is_none() {
            roots.push(name.as_str());
        }
    }

    // Filter edges once, up front, so every warning is emitted exactly once
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::with_capacity(roots.len());
    for &node in &roots {
        let mut seen = HashSet::new();
        let mut deps = Vec::new();
        for dep in edges.get(node).into_iter().flatten() {
            let dep = dep.as_str();
            if dep == node {
                diagnostics.warning(
                    Some(node),
                    format!("'{}' depends on itself; self edge ignored", node),
                );
                plan.self_dependencies.push(node.to_string());
                continue;
            }
            if !marks.contains_key(dep) {
                diagnostics.warning(
                    Some(node),
                    format!(
                        "missing dependency: '{}' requires '{}', which was not requested; edge dropped",
                        node, dep
                    ),
                );
                plan.missing.push(MissingDependency {
                    dependent: node.to_string(),
                    dependency: dep.to_string(),
                });
                continue;
            }
            if seen.insert(dep) {
                deps.push(dep);
            }
        }
        adjacency.insert(node, deps);
    }

    for &root in &roots {
        if marks.get(root) != Some(&Mark::Unvisited) {
            continue;
        }

        marks.insert(root, Mark::Visiting);
        let mut stack = vec![Frame { node: root, next: 0 }];

        while !stack.is_empty() {
            let (node, dep) = {
                let Some(frame) = stack.last_mut() else {
                    break;
                };
                let node = frame.node;
                match adjacency.get(node).and_then(|deps| deps.get(frame.next)) {
                    Some(&dep) => {
                        frame.next += 1;
                        (node, Some(dep))
                    }
                    None => (node, None),
                }
            };

            let Some(dep) = dep else {
                marks.insert(node, Mark::Done);
                plan.order.push(node.to_string());
                stack.pop();
                continue;
            };

            match marks.get(dep).copied().unwrap_or(Mark::Done) {
                Mark::Unvisited => {
                    marks.insert(dep, Mark::Visiting);
                    stack.push(Frame { node: dep, next: 0 });
                }
                Mark::Visiting => {
                    let start = stack.iter().position(|f| f.node == dep).unwrap_or(0);
                    let mut cycle: Vec<String> =
                        stack[start..].iter().map(|f| f.node.to_string()).collect();
                    cycle.push(dep.to_string());

                    diagnostics.warning(
                        Some(node),
                        format!(
                            "dependency cycle detected: {}; edge '{}' -> '{}' ignored",
                            cycle.join(" -> "),
                            node,
                            dep
                        ),
                    );
                    plan.cycles.push(cycle);
                }
                Mark::Done => {}
            }
        }
    }

    plan
}

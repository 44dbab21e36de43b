//! Dependency resolution: turns a build request into an ordered plan.
//!
//! The plan is a topological order over the dependency graph restricted to
//! active edges: required edges always, optional edges only when their
//! feature is enabled for the request. Ties break by declaration order
//! (depth-first over each recipe's dependency list as written), so the
//! same recipe set always yields the same plan.

pub mod errors;

use std::collections::{BTreeMap, BTreeSet};

use petgraph::algo::tarjan_scc;
use petgraph::graphmap::DiGraphMap;
use semver::Version;
use serde::Serialize;

use crate::core::Registry;

pub use errors::ResolveError;

/// One recipe in a resolved plan.
#[derive(Debug, Clone, Serialize)]
pub struct PlanEntry {
    pub name: String,
    pub version: Version,
    /// Option set the recipe will be built with.
    pub options: Vec<String>,
}

/// A dependency-ordered sequence of recipes: every dependency precedes
/// its dependent. Created per build request, discarded after execution.
#[derive(Debug, Clone, Serialize)]
pub struct BuildPlan {
    pub target: String,
    pub entries: Vec<PlanEntry>,
}

impl BuildPlan {
    /// Position of a package in the plan, if present.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.name == name)
    }
}

/// Resolve a build plan for `target`.
///
/// `with` and `without` override option defaults on the target recipe;
/// dependency recipes build with their declared defaults.
pub fn resolve(
    registry: &Registry,
    target: &str,
    with: &BTreeSet<String>,
    without: &BTreeSet<String>,
) -> Result<BuildPlan, ResolveError> {
    let Some(root) = registry.get(target) else {
        return Err(ResolveError::UnknownPackage {
            package: target.to_string(),
        });
    };

    let none = BTreeSet::new();
    let root_enabled =
        root.enabled_options(with, without)
            .map_err(|e| ResolveError::Options {
                message: format!("{:#}", e),
            })?;

    // Walk the closure, recording active edges in declaration order.
    let mut adjacency: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut enabled_map: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    let mut pending = vec![(target.to_string(), target.to_string())];

    while let Some((name, required_by)) = pending.pop() {
        if adjacency.contains_key(&name) {
            continue;
        }

        let Some(recipe) = registry.get(&name) else {
            return Err(ResolveError::MissingDependency {
                package: name,
                required_by,
            });
        };

        let enabled = if name == target {
            root_enabled.clone()
        } else {
            // Defaults cannot fail validation: empty override sets.
            recipe
                .enabled_options(&none, &none)
                .expect("default option set is always valid")
        };

        let deps: Vec<String> = recipe
            .active_dependencies(&enabled)
            .map(|d| d.name.clone())
            .collect();
        for dep in &deps {
            pending.push((dep.clone(), name.clone()));
        }

        adjacency.insert(name.clone(), deps);
        enabled_map.insert(name, enabled);
    }

    detect_cycles(&adjacency)?;

    // The graph is acyclic: emit depth-first post-order, dependencies in
    // declaration order, so the plan is deterministic.
    let mut visited = BTreeSet::new();
    let mut order = Vec::new();
    emit(target, &adjacency, &mut visited, &mut order);

    let entries = order
        .into_iter()
        .map(|name| {
            let recipe = registry.get(&name).expect("closure member is loaded");
            PlanEntry {
                version: recipe.version().clone(),
                options: enabled_map
                    .remove(&name)
                    .unwrap_or_default()
                    .into_iter()
                    .collect(),
                name,
            }
        })
        .collect();

    Ok(BuildPlan {
        target: target.to_string(),
        entries,
    })
}

/// Fail with the cycle members if any strongly connected component has
/// more than one node, or a node depends on itself.
fn detect_cycles(adjacency: &BTreeMap<String, Vec<String>>) -> Result<(), ResolveError> {
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
    for (from, deps) in adjacency {
        graph.add_node(from.as_str());
        for to in deps {
            graph.add_edge(from.as_str(), to.as_str(), ());
        }
    }

    for scc in tarjan_scc(&graph) {
        let cyclic = scc.len() > 1 || graph.contains_edge(scc[0], scc[0]);
        if cyclic {
            let mut packages: Vec<String> = scc.iter().map(|n| n.to_string()).collect();
            packages.sort();
            return Err(ResolveError::Cycle { packages });
        }
    }
    Ok(())
}

fn emit(
    name: &str,
    adjacency: &BTreeMap<String, Vec<String>>,
    visited: &mut BTreeSet<String>,
    order: &mut Vec<String>,
) {
    if !visited.insert(name.to_string()) {
        return;
    }
    for dep in &adjacency[name] {
        emit(dep, adjacency, visited, order);
    }
    order.push(name.to_string());
}

//! DAG construction and topological ordering for pipelines.
//!
//! The graph is an adjacency list over task indices: `graph[src]` holds every
//! downstream index `dst` such that `dst` depends on `src`. Edges come from
//! explicit `depends` entries and from `^` references found in task fields.

use std::collections::{BTreeSet, HashMap};

use serde_json::Value;

use crate::error::{Error, Result};
use crate::reference::{is_reference, parse_reference};

/// Adjacency list: `graph[src]` is the set of indices that depend on `src`.
pub type Graph = Vec<BTreeSet<usize>>;

const DEPENDENCY_KEY: &str = "depends";

/// Treat a scalar as a one-element list so fields that accept both shapes
/// are scanned the same way.
fn listify(value: &Value) -> Vec<&Value> {
    match value {
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    }
}

/// Build the dependency graph for a task list.
///
/// A task depends on another if it names it in `depends` or if any of its
/// field values is a `^` reference whose first segment is that task's name.
/// Reference roots found in `external_inputs` are satisfied from outside the
/// pipeline and induce no edge.
pub fn build_graph(tasks: &[Value], external_inputs: &HashMap<String, Value>) -> Result<Graph> {
    let mut name_to_idx: HashMap<&str, usize> = HashMap::new();
    for (i, task) in tasks.iter().enumerate() {
        let name = task.get("name").and_then(Value::as_str).unwrap_or_default();
        if name.contains('.') {
            return Err(Error::InvalidTaskName(name.to_string()));
        }
        if name_to_idx.insert(name, i).is_some() {
            return Err(Error::DuplicateTaskName(name.to_string()));
        }
    }

    let mut graph: Graph = vec![BTreeSet::new(); tasks.len()];
    for (dst, task) in tasks.iter().enumerate() {
        let dst_name = task.get("name").and_then(Value::as_str).unwrap_or_default();
        if let Some(depends) = task.get(DEPENDENCY_KEY) {
            for dep in listify(depends) {
                let Some(dep) = dep.as_str() else { continue };
                let dep = dep.strip_prefix('^').unwrap_or(dep);
                let src = name_to_idx.get(dep).ok_or_else(|| Error::UnknownDependency {
                    task: dst_name.to_string(),
                    dep: dep.to_string(),
                })?;
                graph[*src].insert(dst);
            }
        }
        let Some(fields) = task.as_object() else { continue };
        for value in fields.values() {
            for value in listify(value) {
                let Some(text) = value.as_str() else { continue };
                if !is_reference(text) {
                    continue;
                }
                let lookups = parse_reference(text);
                let root = lookups[0];
                if external_inputs.contains_key(root) {
                    tracing::debug!(task = dst_name, input = root, "satisfied externally");
                    continue;
                }
                let src = name_to_idx
                    .get(root)
                    .ok_or_else(|| Error::UnknownDependency {
                        task: dst_name.to_string(),
                        dep: root.to_string(),
                    })?;
                graph[*src].insert(dst);
            }
        }
    }
    Ok(graph)
}

/// Topologically sort a graph into layers of mutually independent vertices.
///
/// Kahn-style layer extraction: repeatedly emit the set of vertices with no
/// unsatisfied in-edges and remove them. Leftover vertices mean a cycle.
pub fn topo_sort_parallel(graph: &Graph) -> Result<Vec<BTreeSet<usize>>> {
    let mut preds: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); graph.len()];
    for (src, dsts) in graph.iter().enumerate() {
        for &dst in dsts {
            preds[dst].insert(src);
        }
    }

    let mut remaining: BTreeSet<usize> = (0..graph.len()).collect();
    let mut layers = Vec::new();
    loop {
        let layer: BTreeSet<usize> = remaining
            .iter()
            .copied()
            .filter(|&v| preds[v].is_empty())
            .collect();
        if layer.is_empty() {
            break;
        }
        for &v in &remaining {
            preds[v] = &preds[v] - &layer;
        }
        remaining = &remaining - &layer;
        layers.push(layer);
    }
    if !remaining.is_empty() {
        return Err(Error::Cycle);
    }
    Ok(layers)
}

/// Render a graph in dot format for logging.
pub fn dot_graph(graph: &Graph, names: &[String]) -> String {
    let clean = |name: &str| name.replace('-', "_");
    let mut lines = vec!["digraph {".to_string()];
    for (src, dsts) in graph.iter().enumerate() {
        if dsts.is_empty() {
            lines.push(format!("  {};", clean(&names[src])));
        }
        for &dst in dsts {
            lines.push(format!("  {} -> {};", clean(&names[src]), clean(&names[dst])));
        }
    }
    lines.push("}".to_string());
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn task(name: &str, extra: Value) -> Value {
        let mut task = json!({"name": name, "image": "img"});
        task.as_object_mut()
            .unwrap()
            .extend(extra.as_object().unwrap().clone());
        task
    }

    #[test]
    fn empty_task_list() {
        let graph = build_graph(&[], &HashMap::new()).unwrap();
        assert!(graph.is_empty());
        assert!(topo_sort_parallel(&graph).unwrap().is_empty());
    }

    #[test]
    fn explicit_depends_make_edges() {
        let tasks = vec![
            task("a", json!({})),
            task("b", json!({"depends": ["a"]})),
            task("c", json!({"depends": "b"})),
        ];
        let graph = build_graph(&tasks, &HashMap::new()).unwrap();
        assert!(graph[0].contains(&1));
        assert!(graph[1].contains(&2));
        let layers = topo_sort_parallel(&graph).unwrap();
        assert_eq!(layers.len(), 3);
    }

    #[test]
    fn depends_accepts_caret_prefix() {
        let tasks = vec![task("a", json!({})), task("b", json!({"depends": ["^a"]}))];
        let graph = build_graph(&tasks, &HashMap::new()).unwrap();
        assert!(graph[0].contains(&1));
    }

    #[test]
    fn references_make_edges() {
        let tasks = vec![
            task("a", json!({})),
            task("b", json!({"args": ["^a.out"]})),
        ];
        let graph = build_graph(&tasks, &HashMap::new()).unwrap();
        assert!(graph[0].contains(&1));
    }

    #[test]
    fn external_inputs_make_no_edges() {
        let tasks = vec![task("a", json!({"args": ["^corpus.path"]}))];
        let mut external = HashMap::new();
        external.insert("corpus".to_string(), json!({"path": "/data"}));
        let graph = build_graph(&tasks, &external).unwrap();
        assert!(graph[0].is_empty());
    }

    #[test]
    fn unknown_dependency_is_fatal() {
        let tasks = vec![task("a", json!({"depends": ["ghost"]}))];
        let err = build_graph(&tasks, &HashMap::new()).unwrap_err();
        assert!(matches!(err, Error::UnknownDependency { .. }));
    }

    #[test]
    fn dotted_name_is_rejected() {
        let tasks = vec![task("a.b", json!({}))];
        let err = build_graph(&tasks, &HashMap::new()).unwrap_err();
        assert!(matches!(err, Error::InvalidTaskName(name) if name == "a.b"));
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let tasks = vec![task("a", json!({})), task("a", json!({}))];
        let err = build_graph(&tasks, &HashMap::new()).unwrap_err();
        assert!(matches!(err, Error::DuplicateTaskName(name) if name == "a"));
    }

    #[test]
    fn diamond_yields_three_layers() {
        let tasks = vec![
            task("a", json!({})),
            task("b", json!({"depends": ["a"]})),
            task("c", json!({"depends": ["a"]})),
            task("d", json!({"depends": ["b", "c"]})),
        ];
        let graph = build_graph(&tasks, &HashMap::new()).unwrap();
        let layers = topo_sort_parallel(&graph).unwrap();
        assert_eq!(layers.len(), 3);
        assert_eq!(layers[0], BTreeSet::from([0]));
        assert_eq!(layers[1], BTreeSet::from([1, 2]));
        assert_eq!(layers[2], BTreeSet::from([3]));
    }

    #[test]
    fn cycle_is_detected() {
        let tasks = vec![
            task("a", json!({"depends": ["b"]})),
            task("b", json!({"depends": ["a"]})),
        ];
        let graph = build_graph(&tasks, &HashMap::new()).unwrap();
        assert!(matches!(topo_sort_parallel(&graph), Err(Error::Cycle)));
    }

    #[test]
    fn dot_graph_renders_edges() {
        let tasks = vec![task("a-1", json!({})), task("b", json!({"depends": ["a-1"]}))];
        let graph = build_graph(&tasks, &HashMap::new()).unwrap();
        let dot = dot_graph(&graph, &["a-1".to_string(), "b".to_string()]);
        assert!(dot.contains("a_1 -> b;"));
    }
}

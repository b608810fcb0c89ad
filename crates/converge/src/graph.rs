//! Dependency graph over declared resources
//!
//! The graph is immutable once built. It validates ids and edges, rejects
//! cycles, and groups resources into topological layers: every resource sits
//! in the layer right after the deepest of its dependencies, so everything in
//! one layer can be converged concurrently.

use std::collections::{BTreeSet, HashMap};

use crate::error::{Error, Result};
use crate::types::Declaration;

/// Which way to widen a target selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Targets plus everything they (transitively) depend on
    Dependencies,
    /// Targets plus everything that (transitively) depends on them
    Dependents,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

/// Directed acyclic graph of resource declarations
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    /// Declarations in input order
    nodes: Vec<Declaration>,
    index: HashMap<String, usize>,
    /// Edges dependency -> dependents, by node index
    dependents: Vec<Vec<usize>>,
    /// Node indices grouped by layer, each layer in input order
    layers: Vec<Vec<usize>>,
}

impl DependencyGraph {
    /// Validate declarations and build the graph.
    ///
    /// Fails on duplicate ids, dependencies on undeclared ids, and cycles.
    pub fn build(declarations: impl IntoIterator<Item = Declaration>) -> Result<Self> {
        let mut nodes: Vec<Declaration> = Vec::new();
        let mut index = HashMap::new();

        for mut decl in declarations {
            if index.contains_key(&decl.id) {
                return Err(Error::DuplicateResource { id: decl.id });
            }
            // Repeated edges carry no meaning
            let mut seen = BTreeSet::new();
            decl.depends_on.retain(|d| seen.insert(d.clone()));

            index.insert(decl.id.clone(), nodes.len());
            nodes.push(decl);
        }

        let mut dependents = vec![Vec::new(); nodes.len()];
        for (i, decl) in nodes.iter().enumerate() {
            for dep in &decl.depends_on {
                let Some(&d) = index.get(dep) else {
                    return Err(Error::UnknownDependency {
                        id: decl.id.clone(),
                        dependency: dep.clone(),
                    });
                };
                dependents[d].push(i);
            }
        }

        let mut graph = Self {
            nodes,
            index,
            dependents,
            layers: Vec::new(),
        };
        let order = graph.post_order()?;
        graph.layers = graph.assign_layers(&order);

        log::debug!(
            "Built dependency graph: {} resources in {} layers",
            graph.nodes.len(),
            graph.layers.len()
        );
        Ok(graph)
    }

    /// Depth-first three-colour walk. Returns nodes with every dependency
    /// ahead of its dependents, or the first cycle found.
    fn post_order(&self) -> Result<Vec<usize>> {
        let mut marks = vec![Mark::Unvisited; self.nodes.len()];
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut path = Vec::new();

        for start in 0..self.nodes.len() {
            if marks[start] == Mark::Unvisited {
                self.visit(start, &mut marks, &mut path, &mut order)?;
            }
        }
        Ok(order)
    }

    fn visit(
        &self,
        node: usize,
        marks: &mut [Mark],
        path: &mut Vec<usize>,
        order: &mut Vec<usize>,
    ) -> Result<()> {
        marks[node] = Mark::InProgress;
        path.push(node);

        for dep in &self.nodes[node].depends_on {
            let d = self.index[dep];
            match marks[d] {
                Mark::Done => {}
                Mark::Unvisited => self.visit(d, marks, path, order)?,
                Mark::InProgress => {
                    let start = path.iter().position(|&n| n == d).unwrap_or(0);
                    let mut members: Vec<String> = path[start..]
                        .iter()
                        .map(|&n| self.nodes[n].id.clone())
                        .collect();
                    members.push(self.nodes[d].id.clone());
                    return Err(Error::Cycle { members });
                }
            }
        }

        path.pop();
        marks[node] = Mark::Done;
        order.push(node);
        Ok(())
    }

    fn assign_layers(&self, order: &[usize]) -> Vec<Vec<usize>> {
        let mut depth = vec![0usize; self.nodes.len()];
        for &n in order {
            depth[n] = self.nodes[n]
                .depends_on
                .iter()
                .map(|dep| depth[self.index[dep]] + 1)
                .max()
                .unwrap_or(0);
        }

        let layer_count = depth.iter().max().map_or(0, |d| d + 1);
        let mut layers = vec![Vec::new(); layer_count];
        // Index order is declaration order, which breaks ties within a layer
        for (n, &d) in depth.iter().enumerate() {
            layers[d].push(n);
        }
        layers
    }

    /// Number of resources
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&Declaration> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    /// Declarations in input order
    pub fn declarations(&self) -> &[Declaration] {
        &self.nodes
    }

    /// Direct dependencies of `id`
    pub fn dependencies(&self, id: &str) -> &[String] {
        match self.get(id) {
            Some(d) => &d.depends_on,
            None => &[],
        }
    }

    /// Direct dependents of `id`, in declaration order
    pub fn dependents(&self, id: &str) -> Vec<&str> {
        self.index.get(id).map_or_else(Vec::new, |&i| {
            self.dependents[i]
                .iter()
                .map(|&n| self.nodes[n].id.as_str())
                .collect()
        })
    }

    /// Everything `id` depends on, directly or not
    pub fn transitive_dependencies(&self, id: &str) -> BTreeSet<String> {
        self.closure(id, Direction::Dependencies)
    }

    /// Everything that depends on `id`, directly or not
    pub fn transitive_dependents(&self, id: &str) -> BTreeSet<String> {
        self.closure(id, Direction::Dependents)
    }

    fn closure(&self, id: &str, direction: Direction) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let Some(&start) = self.index.get(id) else {
            return seen;
        };

        let mut stack = vec![start];
        while let Some(n) = stack.pop() {
            let next: Vec<usize> = match direction {
                Direction::Dependencies => self.nodes[n]
                    .depends_on
                    .iter()
                    .map(|d| self.index[d])
                    .collect(),
                Direction::Dependents => self.dependents[n].clone(),
            };
            for m in next {
                if seen.insert(self.nodes[m].id.clone()) {
                    stack.push(m);
                }
            }
        }
        seen
    }

    /// Resources grouped into layers that may run concurrently.
    ///
    /// Every resource appears strictly after all of its dependencies; within a
    /// layer, resources keep their declaration order.
    pub fn topological_layers(&self) -> Vec<Vec<&Declaration>> {
        self.layers
            .iter()
            .map(|layer| layer.iter().map(|&n| &self.nodes[n]).collect())
            .collect()
    }

    /// Layer ids only, convenient for display and assertions
    pub fn layer_ids(&self) -> Vec<Vec<String>> {
        self.layers
            .iter()
            .map(|layer| layer.iter().map(|&n| self.nodes[n].id.clone()).collect())
            .collect()
    }

    /// Narrow the graph to `targets` plus their closure in `direction`.
    ///
    /// Edges leaving the selection are dropped, so a dependent selected for
    /// teardown no longer waits on a dependency that stays.
    pub fn select(&self, targets: &[String], direction: Direction) -> Result<Self> {
        let mut keep = BTreeSet::new();
        for target in targets {
            if !self.contains(target) {
                return Err(Error::UnknownTarget { id: target.clone() });
            }
            keep.insert(target.clone());
            keep.extend(self.closure(target, direction));
        }

        let selected = self
            .nodes
            .iter()
            .filter(|d| keep.contains(&d.id))
            .cloned()
            .map(|mut d| {
                d.depends_on.retain(|dep| keep.contains(dep));
                d
            });
        Self::build(selected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decl(id: &str, deps: &[&str]) -> Declaration {
        deps.iter()
            .fold(Declaration::new(id, "test"), |d, dep| d.depends_on(*dep))
    }

    fn eks() -> Vec<Declaration> {
        vec![
            decl("cluster", &[]),
            decl("nodegroupA", &["cluster"]),
            decl("nodegroupB", &["cluster"]),
            decl("crd", &["nodegroupA", "nodegroupB"]),
        ]
    }

    #[test]
    fn test_scenario_layers() {
        let graph = DependencyGraph::build(eks()).unwrap();
        assert_eq!(
            graph.layer_ids(),
            vec![
                vec!["cluster".to_string()],
                vec!["nodegroupA".to_string(), "nodegroupB".to_string()],
                vec!["crd".to_string()],
            ]
        );
    }

    #[test]
    fn test_layers_place_resources_after_dependencies() {
        // Declared out of order on purpose
        let graph = DependencyGraph::build(vec![
            decl("release", &["operator", "ns"]),
            decl("operator", &["crds", "ns"]),
            decl("ns", &["provider"]),
            decl("crds", &["provider"]),
            decl("provider", &["cluster"]),
            decl("cluster", &[]),
            decl("addon", &["cluster"]),
        ])
        .unwrap();

        let layers = graph.layer_ids();
        let layer_of = |id: &str| layers.iter().position(|l| l.iter().any(|x| x == id));
        for d in graph.declarations() {
            for dep in &d.depends_on {
                assert!(layer_of(dep) < layer_of(&d.id), "{dep} before {}", d.id);
            }
        }
        assert_eq!(layers[1], vec!["provider".to_string(), "addon".to_string()]);
    }

    #[test]
    fn test_ties_follow_declaration_order() {
        let graph =
            DependencyGraph::build(vec![decl("b", &[]), decl("c", &[]), decl("a", &[])]).unwrap();
        assert_eq!(graph.layer_ids(), vec![vec!["b", "c", "a"]]);
    }

    #[test]
    fn test_cycle_detected() {
        let err = DependencyGraph::build(vec![
            decl("a", &["c"]),
            decl("b", &["a"]),
            decl("c", &["b"]),
            decl("d", &[]),
        ])
        .unwrap_err();

        match err {
            Error::Cycle { members } => {
                assert_eq!(members.first(), members.last());
                assert!(members.contains(&"b".to_string()));
                assert!(!members.contains(&"d".to_string()));
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let err = DependencyGraph::build(vec![decl("a", &["a"])]).unwrap_err();
        assert!(matches!(err, Error::Cycle { members } if members == ["a", "a"]));
    }

    #[test]
    fn test_unknown_dependency() {
        let err = DependencyGraph::build(vec![decl("crd", &["missing"])]).unwrap_err();
        assert!(matches!(err, Error::UnknownDependency { dependency, .. } if dependency == "missing"));
    }

    #[test]
    fn test_duplicate_resource() {
        let err = DependencyGraph::build(vec![decl("a", &[]), decl("a", &[])]).unwrap_err();
        assert!(matches!(err, Error::DuplicateResource { id } if id == "a"));
    }

    #[test]
    fn test_repeated_edges_collapse() {
        let mut d = decl("b", &["a"]);
        d.depends_on.push("a".into());
        let graph = DependencyGraph::build(vec![decl("a", &[]), d]).unwrap();
        assert_eq!(graph.dependencies("b"), ["a".to_string()]);
        assert_eq!(graph.dependents("a"), vec!["b"]);
    }

    #[test]
    fn test_empty_graph() {
        let graph = DependencyGraph::build(Vec::new()).unwrap();
        assert!(graph.is_empty());
        assert!(graph.topological_layers().is_empty());
    }

    #[test]
    fn test_transitive_closures() {
        let graph = DependencyGraph::build(eks()).unwrap();
        let deps = graph.transitive_dependencies("crd");
        assert_eq!(deps.len(), 3);
        assert!(deps.contains("cluster"));

        let dependents = graph.transitive_dependents("nodegroupA");
        assert_eq!(dependents.into_iter().collect::<Vec<_>>(), vec!["crd"]);
    }

    #[test]
    fn test_select_dependencies() {
        let graph = DependencyGraph::build(eks()).unwrap();
        let sub = graph
            .select(&["nodegroupA".to_string()], Direction::Dependencies)
            .unwrap();
        assert_eq!(sub.layer_ids(), vec![vec!["cluster"], vec!["nodegroupA"]]);
    }

    #[test]
    fn test_select_dependents_drops_outside_edges() {
        let graph = DependencyGraph::build(eks()).unwrap();
        let sub = graph
            .select(&["nodegroupB".to_string()], Direction::Dependents)
            .unwrap();
        assert_eq!(sub.len(), 2);
        assert_eq!(sub.dependencies("nodegroupB"), &[] as &[String]);
        assert_eq!(sub.dependencies("crd"), ["nodegroupB".to_string()]);
    }

    #[test]
    fn test_select_unknown_target() {
        let graph = DependencyGraph::build(eks()).unwrap();
        let err = graph
            .select(&["nope".to_string()], Direction::Dependencies)
            .unwrap_err();
        assert!(matches!(err, Error::UnknownTarget { .. }));
    }
}

use std::collections::VecDeque;

use crate::variable::VariableId;

#[derive(Clone, Debug)]
struct Node {
    id: VariableId,
    source: Option<VariableId>,
    computational: bool,
    dependents: Vec<VariableId>,
}

/// The derives-from edges between the variables of one DataSet.
///
/// Every variable has at most one source, so the graph is a forest. Edges always point from an
/// existing variable to a newer one, which rules out cycles.
///
#[derive(Clone, Debug, Default)]
pub(crate) struct DependencyGraph {
    nodes: Vec<Option<Node>>,
}

impl DependencyGraph {
    pub fn add(&mut self, id: VariableId, source: Option<VariableId>, computational: bool) {
        let index = id.index();
        if index >= self.nodes.len() {
            self.nodes.resize(index + 1, None);
        }
        self.nodes[index] = Some(Node {
            id,
            source,
            computational,
            dependents: vec![],
        });
        if let Some(source) = source {
            if let Some(node) = self.node_mut(source) {
                node.dependents.push(id);
            }
        }
    }

    /// Forget a variable. Its dependents are removed along with it.
    pub fn remove(&mut self, id: VariableId) {
        let Some(node) = self.nodes.get_mut(id.index()).and_then(Option::take) else {
            return;
        };
        if let Some(source) = node.source {
            if let Some(source) = self.node_mut(source) {
                source.dependents.retain(|dependent| *dependent != id);
            }
        }
        for dependent in node.dependents {
            self.remove(dependent);
        }
    }

    pub fn source_of(&self, id: VariableId) -> Option<VariableId> {
        self.node(id).and_then(|node| node.source)
    }

    /// Every variable derived from `id`, directly or transitively, breadth first. A variable
    /// always comes after its own source.
    pub fn dependents_of(&self, id: VariableId) -> Vec<VariableId> {
        let mut found = vec![];
        let mut queue: VecDeque<VariableId> = VecDeque::from([id]);
        while let Some(next) = queue.pop_front() {
            if let Some(node) = self.node(next) {
                for dependent in &node.dependents {
                    found.push(*dependent);
                    queue.push_back(*dependent);
                }
            }
        }

        found
    }

    /// All variables with sources before dependents.
    ///
    /// Computational variables size themselves from their siblings, so they and anything
    /// derived from them come after every other variable.
    ///
    pub fn topological_order(&self) -> Vec<VariableId> {
        let mut ready: VecDeque<VariableId> = VecDeque::new();
        let mut deferred: VecDeque<VariableId> = VecDeque::new();
        for node in self.nodes.iter().flatten() {
            if node.source.is_none() {
                if node.computational {
                    deferred.push_back(node.id);
                } else {
                    ready.push_back(node.id);
                }
            }
        }

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(id) = ready.pop_front().or_else(|| deferred.pop_front()) {
            order.push(id);
            if let Some(node) = self.node(id) {
                ready.extend(node.dependents.iter().copied());
            }
        }

        order
    }

    fn node(&self, id: VariableId) -> Option<&Node> {
        self.nodes
            .get(id.index())
            .and_then(Option::as_ref)
            .filter(|node| node.id == id)
    }

    fn node_mut(&mut self, id: VariableId) -> Option<&mut Node> {
        self.nodes
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .filter(|node| node.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use VariableId::{Derived, Source};

    fn graph() -> DependencyGraph {
        let mut graph = DependencyGraph::default();
        graph.add(Derived(0), None, true);
        graph.add(Source(1), None, false);
        graph.add(Derived(2), Some(Source(1)), false);
        graph.add(Derived(3), Some(Derived(2)), false);
        graph.add(Derived(4), Some(Derived(0)), false);
        graph.add(Source(5), None, false);
        graph.add(Derived(6), Some(Source(1)), false);

        graph
    }

    #[test]
    fn test_dependents_of() {
        let graph = graph();
        assert_eq!(
            graph.dependents_of(Source(1)),
            vec![Derived(2), Derived(6), Derived(3)]
        );
        assert!(graph.dependents_of(Source(5)).is_empty());
        assert_eq!(graph.source_of(Derived(3)), Some(Derived(2)));
    }

    #[test]
    fn test_topological_order() {
        let order = graph().topological_order();
        assert_eq!(
            order,
            vec![
                Source(1),
                Source(5),
                Derived(2),
                Derived(6),
                Derived(3),
                Derived(0),
                Derived(4)
            ]
        );
    }

    #[test]
    fn test_remove_takes_dependents() {
        let mut graph = graph();
        graph.remove(Derived(2));
        assert_eq!(graph.dependents_of(Source(1)), vec![Derived(6)]);
        assert_eq!(graph.topological_order().len(), 5);
        assert_eq!(graph.source_of(Derived(3)), None);
    }
}

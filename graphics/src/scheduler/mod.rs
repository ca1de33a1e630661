//! Pass ordering.
//!
//! Edges between passes are never authored. They are derived from the
//! read/write lists the passes declared during `setup()`: an edge `A -> B`
//! exists iff `A` writes a handle that `B` reads. A pass that starts writing a
//! new intermediate target is therefore ordered against its consumers without
//! either pass knowing about the other.
//!
//! # Example
//!
//! ```ignore
//! let graph = PassGraph::build(&[shadow, lighting], &builder);
//! assert_eq!(graph.sort()?, vec![shadow, lighting]);
//!
//! // Everything downstream of a pass whose outputs are about to change.
//! let affected = graph.dependents_closure([shadow]);
//! ```

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, VecDeque};

use crate::error::GraphError;
use crate::graph::PassId;
use crate::graph::builder::{PassInfo, ResourceGraphBuilder};

/// A pass in the derived dependency graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassNode {
    /// The pass.
    pub id: PassId,
    /// Passes that read something this pass writes, ordered by id.
    pub outgoing: Vec<PassId>,
    /// Number of passes this pass reads from.
    pub indegree: u32,
}

/// Producer/consumer graph over passes.
///
/// Rebuilding is `O(passes²)`; it happens at build time and after a
/// recompilation changed the declared uses, never per frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassGraph {
    nodes: BTreeMap<PassId, PassNode>,
}

impl PassGraph {
    /// Derive the graph over `passes` from their declared uses.
    ///
    /// A pass without a [`PassInfo`] in the builder becomes an isolated node.
    /// A pass that reads and writes the same handle gets no self edge.
    pub fn build(passes: &[PassId], builder: &ResourceGraphBuilder) -> Self {
        let empty = PassInfo::default();
        let infos: Vec<(PassId, &PassInfo)> = passes
            .iter()
            .map(|&id| (id, builder.pass_info(id).unwrap_or(&empty)))
            .collect();

        let mut nodes: BTreeMap<PassId, PassNode> = passes
            .iter()
            .map(|&id| {
                (
                    id,
                    PassNode {
                        id,
                        outgoing: Vec::new(),
                        indegree: 0,
                    },
                )
            })
            .collect();

        for &(producer, producer_info) in &infos {
            for &(consumer, consumer_info) in &infos {
                if producer == consumer {
                    continue;
                }
                if !producer_info.writes().any(|h| consumer_info.reads_handle(h)) {
                    continue;
                }
                if let Some(node) = nodes.get_mut(&producer) {
                    if node.outgoing.contains(&consumer) {
                        continue;
                    }
                    node.outgoing.push(consumer);
                }
                if let Some(node) = nodes.get_mut(&consumer) {
                    node.indegree += 1;
                }
            }
        }

        for node in nodes.values_mut() {
            node.outgoing.sort();
        }

        let graph = Self { nodes };
        log::debug!(
            "Pass graph built: {} passes, {} edges",
            graph.len(),
            graph.edge_count()
        );
        graph
    }

    /// Topologically sort the passes.
    ///
    /// Kahn's algorithm over a min-heap of ready ids: among passes with no
    /// remaining dependency, the lowest id runs first, so the order only
    /// depends on the graph and on authoring order. Fails with
    /// [`GraphError::CyclicDependency`] instead of returning a partial order.
    pub fn sort(&self) -> Result<Vec<PassId>, GraphError> {
        let mut indegree: BTreeMap<PassId, u32> = self
            .nodes
            .values()
            .map(|node| (node.id, node.indegree))
            .collect();

        let mut ready: BinaryHeap<Reverse<PassId>> = indegree
            .iter()
            .filter(|&(_, degree)| *degree == 0)
            .map(|(id, _)| Reverse(*id))
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(Reverse(id)) = ready.pop() {
            order.push(id);

            let Some(node) = self.nodes.get(&id) else {
                continue;
            };
            for next in &node.outgoing {
                if let Some(degree) = indegree.get_mut(next) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.push(Reverse(*next));
                    }
                }
            }
        }

        // Fewer popped than present means some indegree never reached zero.
        if order.len() != self.nodes.len() {
            let remaining: Vec<PassId> = indegree
                .into_iter()
                .filter(|&(_, degree)| degree > 0)
                .map(|(id, _)| id)
                .collect();
            log::error!(
                "Render graph has a cycle: {} of {} passes cannot be scheduled ({:?})",
                remaining.len(),
                self.nodes.len(),
                remaining
            );
            return Err(GraphError::CyclicDependency { remaining });
        }

        Ok(order)
    }

    /// The seeds and every pass transitively downstream of them.
    ///
    /// Breadth-first over outgoing edges. An id that is not in the graph is
    /// logged and its branch dropped.
    pub fn dependents_closure(&self, seeds: impl IntoIterator<Item = PassId>) -> BTreeSet<PassId> {
        let mut closure = BTreeSet::new();
        let mut queue: VecDeque<PassId> = seeds.into_iter().collect();

        while let Some(id) = queue.pop_front() {
            let Some(node) = self.nodes.get(&id) else {
                log::error!("Dependency closure reached unknown pass {}", id);
                continue;
            };
            if !closure.insert(id) {
                continue;
            }
            queue.extend(node.outgoing.iter().filter(|next| !closure.contains(*next)));
        }

        closure
    }

    /// Look up a node.
    pub fn node(&self, id: PassId) -> Option<&PassNode> {
        self.nodes.get(&id)
    }

    /// Returns true if `from` writes something `to` reads.
    pub fn has_edge(&self, from: PassId, to: PassId) -> bool {
        self.nodes
            .get(&from)
            .is_some_and(|node| node.outgoing.contains(&to))
    }

    /// All edges, ordered by producer then consumer.
    pub fn edges(&self) -> impl Iterator<Item = (PassId, PassId)> + '_ {
        self.nodes
            .values()
            .flat_map(|node| node.outgoing.iter().map(move |to| (node.id, *to)))
    }

    /// Number of edges.
    pub fn edge_count(&self) -> usize {
        self.nodes.values().map(|node| node.outgoing.len()).sum()
    }

    /// Number of passes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if the graph has no passes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::ResourceHandle;
    use crate::graph::builder::ResourceAccess;
    use crate::graph::descriptor::BufferDesc;
    use crate::types::BufferUsage;

    /// Declares uses with named buffers, one letter per resource.
    struct Uses {
        builder: ResourceGraphBuilder,
        passes: Vec<PassId>,
    }

    impl Uses {
        fn new() -> Self {
            Self {
                builder: ResourceGraphBuilder::new(),
                passes: Vec::new(),
            }
        }

        fn resource(&mut self, name: &str) -> ResourceHandle {
            let current = self.builder.current_pass();
            self.builder.set_current_pass(None);
            let handle = self.builder.create_buffer(
                BufferDesc::new(name, 16, BufferUsage::STORAGE),
                ResourceAccess::Read,
            );
            self.builder.set_current_pass(current);
            handle
        }

        fn pass(&mut self, reads: &[&str], writes: &[&str]) -> PassId {
            let id = PassId(self.passes.len() as u32);
            self.passes.push(id);
            let reads: Vec<_> = reads.iter().map(|r| self.resource(r)).collect();
            let writes: Vec<_> = writes.iter().map(|w| self.resource(w)).collect();
            self.builder.set_current_pass(Some(id));
            for handle in reads {
                self.builder.read(handle);
            }
            for handle in writes {
                self.builder.write(handle);
            }
            self.builder.set_current_pass(None);
            id
        }

        fn graph(&self) -> PassGraph {
            PassGraph::build(&self.passes, &self.builder)
        }
    }

    #[test]
    fn test_sort_empty_graph() {
        let uses = Uses::new();
        assert_eq!(uses.graph().sort(), Ok(Vec::new()));
    }

    #[test]
    fn test_sort_linear_chain() {
        // C is authored first but reads what B writes.
        let mut uses = Uses::new();
        let c = uses.pass(&["y"], &["z"]);
        let b = uses.pass(&["x"], &["y"]);
        let a = uses.pass(&[], &["x"]);

        let graph = uses.graph();
        assert!(graph.has_edge(a, b));
        assert!(graph.has_edge(b, c));
        assert_eq!(graph.sort(), Ok(vec![a, b, c]));
    }

    #[test]
    fn test_sort_diamond_dependency() {
        //     A
        //    / \
        //   B   C
        //    \ /
        //     D
        let mut uses = Uses::new();
        let a = uses.pass(&[], &["a"]);
        let b = uses.pass(&["a"], &["b"]);
        let c = uses.pass(&["a"], &["c"]);
        let d = uses.pass(&["b", "c"], &["out"]);

        let graph = uses.graph();
        assert_eq!(graph.node(d).map(|n| n.indegree), Some(2));
        assert_eq!(graph.sort(), Ok(vec![a, b, c, d]));
    }

    #[test]
    fn test_sort_independent_passes_keep_authoring_order() {
        let mut uses = Uses::new();
        let ids: Vec<_> = (0..5)
            .map(|i| uses.pass(&[], &[format!("t{i}").as_str()]))
            .collect();
        assert_eq!(uses.graph().sort(), Ok(ids));
    }

    #[test]
    fn test_sort_min_heap_tie_break() {
        // Pass 3 becomes ready before pass 1, but 1 has the lower id.
        let mut uses = Uses::new();
        let p0 = uses.pass(&[], &["x"]);
        let p1 = uses.pass(&["y"], &[]);
        let p2 = uses.pass(&[], &["y"]);
        let p3 = uses.pass(&["x"], &[]);

        assert_eq!(uses.graph().sort(), Ok(vec![p0, p2, p1, p3]));
    }

    #[test]
    fn test_sort_cycle_two_nodes() {
        let mut uses = Uses::new();
        let a = uses.pass(&["b"], &["a"]);
        let b = uses.pass(&["a"], &["b"]);

        assert_eq!(
            uses.graph().sort(),
            Err(GraphError::CyclicDependency {
                remaining: vec![a, b]
            })
        );
    }

    #[test]
    fn test_sort_cycle_three_nodes() {
        let mut uses = Uses::new();
        uses.pass(&["c"], &["a"]);
        uses.pass(&["a"], &["b"]);
        uses.pass(&["b"], &["c"]);

        assert!(matches!(
            uses.graph().sort(),
            Err(GraphError::CyclicDependency { remaining }) if remaining.len() == 3
        ));
    }

    #[test]
    fn test_sort_partial_cycle_reports_only_cycle() {
        let mut uses = Uses::new();
        let root = uses.pass(&[], &["seed"]);
        let a = uses.pass(&["seed", "b"], &["a"]);
        let b = uses.pass(&["a"], &["b"]);

        let Err(GraphError::CyclicDependency { remaining }) = uses.graph().sort() else {
            panic!("cycle not detected");
        };
        assert_eq!(remaining, vec![a, b]);
        assert!(!remaining.contains(&root));
    }

    #[test]
    fn test_read_write_same_handle_has_no_self_edge() {
        let mut uses = Uses::new();
        let a = uses.pass(&["accum"], &["accum"]);

        let graph = uses.graph();
        assert!(!graph.has_edge(a, a));
        assert_eq!(graph.sort(), Ok(vec![a]));
    }

    #[test]
    fn test_duplicate_shared_resources_make_one_edge() {
        let mut uses = Uses::new();
        let a = uses.pass(&[], &["x", "y"]);
        let b = uses.pass(&["x", "y"], &[]);

        let graph = uses.graph();
        assert_eq!(graph.edge_count(), 1);
        assert_eq!(graph.node(b).map(|n| n.indegree), Some(1));
        assert_eq!(graph.edges().collect::<Vec<_>>(), vec![(a, b)]);
    }

    #[test]
    fn test_dependents_closure_is_transitive() {
        // A writes X, B reads X writes Y, C reads Y, D is unrelated.
        let mut uses = Uses::new();
        let a = uses.pass(&[], &["x"]);
        let b = uses.pass(&["x"], &["y"]);
        let c = uses.pass(&["y"], &[]);
        let d = uses.pass(&[], &["w"]);

        let closure = uses.graph().dependents_closure([a]);
        assert_eq!(closure.into_iter().collect::<Vec<_>>(), vec![a, b, c]);
        assert!(!uses.graph().dependents_closure([b]).contains(&d));
    }

    #[test]
    fn test_dependents_closure_skips_unknown_pass() {
        let mut uses = Uses::new();
        let a = uses.pass(&[], &["x"]);
        let b = uses.pass(&["x"], &[]);

        let closure = uses.graph().dependents_closure([PassId(42), a]);
        assert_eq!(closure.into_iter().collect::<Vec<_>>(), vec![a, b]);
    }
}

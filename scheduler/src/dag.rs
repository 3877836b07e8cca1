// dag.rs — Schedule DAG nodes, their pool, and intrusive ready/active lists
//
// One node per instruction of the block being scheduled. Node `i` always
// wraps the instruction at position `i` of the block's original order. The
// pool is rewound, not freed, between blocks: node slots keep their
// dependent vectors' capacity.
//
// Ready and active lists are doubly linked through `prev`/`next` indices
// stored in the nodes themselves, so appending at either end and unlinking
// from the middle are O(1). A node is on at most one list at a time.

use std::collections::HashSet;

use crate::id::NodeId;

/// Node of the schedule DAG.
#[derive(Debug, Clone, Default)]
pub struct DagNode {
    /// Position of the wrapped instruction in the block's original order.
    pub insn: usize,
    /// Number of nodes we still depend on.
    pub ref_num: u32,
    /// Simulated cycle when the instruction retires.
    pub retired_cycle: u32,
    /// Nodes that depend on us, in edge-insertion order.
    pub children: Vec<NodeId>,
    prev: Option<NodeId>,
    next: Option<NodeId>,
}

/// Head/tail of an intrusive node list.
#[derive(Debug, Clone, Copy, Default)]
pub struct NodeList {
    head: Option<NodeId>,
    tail: Option<NodeId>,
    len: usize,
}

impl NodeList {
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn front(&self) -> Option<NodeId> {
        self.head
    }

    pub fn back(&self) -> Option<NodeId> {
        self.tail
    }

    /// Forget all members without touching their links.
    pub fn fast_clear(&mut self) {
        *self = NodeList::default();
    }
}

/// Node pool plus edge set for one block.
#[derive(Debug, Default)]
pub struct ScheduleDag {
    nodes: Vec<DagNode>,
    live: usize,
    edges: HashSet<(NodeId, NodeId)>,
}

impl ScheduleDag {
    /// Pool pre-sized for blocks of up to `capacity` instructions.
    pub fn with_capacity(capacity: usize) -> Self {
        ScheduleDag {
            nodes: Vec::with_capacity(capacity),
            live: 0,
            edges: HashSet::with_capacity(capacity * 2),
        }
    }

    /// Rewind the pool for the next block.
    pub fn rewind(&mut self) {
        self.live = 0;
        self.edges.clear();
    }

    /// Create the node for the instruction at `insn`. Nodes must be created
    /// in program order.
    pub fn new_node(&mut self, insn: usize) -> NodeId {
        debug_assert_eq!(insn, self.live, "nodes must be created in program order");
        let id = NodeId(self.live as u32);
        if self.live == self.nodes.len() {
            self.nodes.push(DagNode::default());
        }
        let node = &mut self.nodes[self.live];
        node.insn = insn;
        node.ref_num = 0;
        node.retired_cycle = 0;
        node.children.clear();
        node.prev = None;
        node.next = None;
        self.live += 1;
        id
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn node(&self, id: NodeId) -> &DagNode {
        assert!(id.index() < self.live, "stale DAG node {:?}", id);
        &self.nodes[id.index()]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut DagNode {
        assert!(id.index() < self.live, "stale DAG node {:?}", id);
        &mut self.nodes[id.index()]
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &DagNode)> {
        self.nodes[..self.live]
            .iter()
            .enumerate()
            .map(|(i, n)| (NodeId(i as u32), n))
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Does `node` already wait on `on`?
    pub fn depends_on(&self, node: NodeId, on: NodeId) -> bool {
        self.edges.contains(&(on, node))
    }

    /// Add "`node` depends on `on`". Self edges and duplicates are skipped so
    /// a node is never counted twice against the same predecessor.
    pub fn add_dependency(&mut self, node: NodeId, on: NodeId) {
        if node == on || !self.edges.insert((on, node)) {
            return;
        }
        self.node_mut(node).ref_num += 1;
        self.node_mut(on).children.push(node);
    }

    // ── Intrusive lists ─────────────────────────────────────────────────

    pub fn push_back(&mut self, list: &mut NodeList, id: NodeId) {
        let tail = list.tail;
        {
            let node = self.node_mut(id);
            node.prev = tail;
            node.next = None;
        }
        match tail {
            Some(t) => self.node_mut(t).next = Some(id),
            None => list.head = Some(id),
        }
        list.tail = Some(id);
        list.len += 1;
    }

    /// Unlink `id` from `list`; returns the node that followed it.
    pub fn unlink(&mut self, list: &mut NodeList, id: NodeId) -> Option<NodeId> {
        let (prev, next) = {
            let node = self.node(id);
            (node.prev, node.next)
        };
        match prev {
            Some(p) => self.node_mut(p).next = next,
            None => list.head = next,
        }
        match next {
            Some(n) => self.node_mut(n).prev = prev,
            None => list.tail = prev,
        }
        let node = self.node_mut(id);
        node.prev = None;
        node.next = None;
        list.len -= 1;
        next
    }

    pub fn next_in_list(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).next
    }

    /// Members of `list`, front to back.
    pub fn list_members(&self, list: &NodeList) -> Vec<NodeId> {
        let mut out = Vec::with_capacity(list.len());
        let mut cursor = list.head;
        while let Some(id) = cursor {
            out.push(id);
            cursor = self.node(id).next;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dag_with(n: usize) -> ScheduleDag {
        let mut dag = ScheduleDag::with_capacity(n);
        for i in 0..n {
            dag.new_node(i);
        }
        dag
    }

    #[test]
    fn duplicate_and_self_edges_are_skipped() {
        let mut dag = dag_with(2);
        dag.add_dependency(NodeId(1), NodeId(0));
        dag.add_dependency(NodeId(1), NodeId(0));
        dag.add_dependency(NodeId(1), NodeId(1));
        assert_eq!(dag.node(NodeId(1)).ref_num, 1);
        assert_eq!(dag.node(NodeId(0)).children, vec![NodeId(1)]);
        assert!(dag.depends_on(NodeId(1), NodeId(0)));
        assert!(!dag.depends_on(NodeId(0), NodeId(1)));
        assert_eq!(dag.edge_count(), 1);
    }

    #[test]
    fn list_push_and_unlink_middle() {
        let mut dag = dag_with(3);
        let mut list = NodeList::default();
        for i in 0..3 {
            dag.push_back(&mut list, NodeId(i));
        }
        assert_eq!(list.len(), 3);
        let next = dag.unlink(&mut list, NodeId(1));
        assert_eq!(next, Some(NodeId(2)));
        assert_eq!(dag.list_members(&list), vec![NodeId(0), NodeId(2)]);
        assert_eq!(list.front(), Some(NodeId(0)));
        assert_eq!(list.back(), Some(NodeId(2)));

        dag.unlink(&mut list, NodeId(2));
        dag.unlink(&mut list, NodeId(0));
        assert!(list.is_empty());
        assert_eq!(list.front(), None);
        assert_eq!(list.back(), None);
    }

    #[test]
    fn rewind_reuses_slots() {
        let mut dag = dag_with(3);
        dag.add_dependency(NodeId(2), NodeId(0));
        dag.rewind();
        assert!(dag.is_empty());
        assert_eq!(dag.edge_count(), 0);
        let id = dag.new_node(0);
        assert_eq!(id, NodeId(0));
        assert!(dag.node(id).children.is_empty());
        assert_eq!(dag.node(id).ref_num, 0);
    }
}

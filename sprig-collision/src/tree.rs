use std::ops::ControlFlow;

use glam::Vec2;
use slotmap::{new_key_type, SlotMap};
use smallvec::SmallVec;

use crate::Aabb;

new_key_type!(
    /// Handle to a leaf of a [`DynamicTree`]
    pub struct ProxyId;
);

#[derive(Debug, Clone)]
enum NodeKind<T> {
    Leaf(T),
    Branch([ProxyId; 2]),
}

#[derive(Debug, Clone)]
struct Node<T> {
    aabb: Aabb,
    parent: Option<ProxyId>,
    /// Leaves have height 0
    height: u32,
    kind: NodeKind<T>,
}

impl<T> Node<T> {
    fn children(&self) -> Option<[ProxyId; 2]> {
        match self.kind {
            NodeKind::Leaf(_) => None,
            NodeKind::Branch(children) => Some(children),
        }
    }
}

/// Balanced bounding volume hierarchy of fattened boxes.
///
/// Every branch has exactly two children and a box enclosing both. Leaves carry user data of type
/// `T`.
#[derive(Debug, Clone)]
pub struct DynamicTree<T> {
    nodes: SlotMap<ProxyId, Node<T>>,
    root: Option<ProxyId>,
    leaf_count: usize,
}

impl<T> Default for DynamicTree<T> {
    fn default() -> Self {
        Self {
            nodes: SlotMap::with_key(),
            root: None,
            leaf_count: 0,
        }
    }
}

impl<T: Copy> DynamicTree<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            nodes: SlotMap::with_capacity_and_key(capacity * 2),
            root: None,
            leaf_count: 0,
        }
    }

    pub fn leaf_count(&self) -> usize {
        self.leaf_count
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Height of the root, or 0 for an empty tree
    pub fn height(&self) -> u32 {
        self.root.map(|root| self.nodes[root].height).unwrap_or(0)
    }

    pub fn aabb(&self, id: ProxyId) -> Option<Aabb> {
        self.nodes.get(id).map(|node| node.aabb)
    }

    pub fn leaf_data(&self, id: ProxyId) -> Option<T> {
        match self.nodes.get(id)?.kind {
            NodeKind::Leaf(data) => Some(data),
            NodeKind::Branch(_) => None,
        }
    }

    pub fn insert(&mut self, aabb: Aabb, data: T) -> ProxyId {
        let leaf = self.nodes.insert(Node {
            aabb,
            parent: None,
            height: 0,
            kind: NodeKind::Leaf(data),
        });

        self.insert_leaf(leaf);
        self.leaf_count += 1;
        leaf
    }

    /// Removes a leaf, returning its data
    pub fn remove(&mut self, id: ProxyId) -> Option<T> {
        let data = self.leaf_data(id)?;
        self.remove_leaf(id);
        self.nodes.remove(id);
        self.leaf_count -= 1;
        Some(data)
    }

    /// Replaces the box of a leaf and reinserts it
    pub fn update(&mut self, id: ProxyId, aabb: Aabb) {
        debug_assert!(self.leaf_data(id).is_some());
        self.remove_leaf(id);
        self.nodes[id].aabb = aabb;
        self.insert_leaf(id);
    }

    /// Visits every leaf whose box overlaps `aabb` until the callback breaks
    pub fn query(&self, aabb: &Aabb, mut visit: impl FnMut(ProxyId) -> ControlFlow<()>) {
        let Some(root) = self.root else {
            return;
        };

        let mut stack: SmallVec<[ProxyId; 64]> = SmallVec::new();
        stack.push(root);

        while let Some(index) = stack.pop() {
            let node = &self.nodes[index];
            if !node.aabb.overlaps(aabb) {
                continue;
            }

            match node.kind {
                NodeKind::Leaf(_) => {
                    if visit(index).is_break() {
                        return;
                    }
                }
                NodeKind::Branch([a, b]) => {
                    stack.push(a);
                    stack.push(b);
                }
            }
        }
    }

    /// Iterates all leaves and their data
    pub fn leaves(&self) -> impl Iterator<Item = (ProxyId, T, Aabb)> + '_ {
        self.nodes.iter().filter_map(|(id, node)| match node.kind {
            NodeKind::Leaf(data) => Some((id, data, node.aabb)),
            NodeKind::Branch(_) => None,
        })
    }

    /// Translates every box by `-new_origin`
    pub fn shift_origin(&mut self, new_origin: Vec2) {
        for (_, node) in self.nodes.iter_mut() {
            node.aabb = node.aabb.translated(-new_origin);
        }
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.root = None;
        self.leaf_count = 0;
    }

    fn insert_leaf(&mut self, leaf: ProxyId) {
        let Some(root) = self.root else {
            self.root = Some(leaf);
            self.nodes[leaf].parent = None;
            return;
        };

        let leaf_aabb = self.nodes[leaf].aabb;

        // Find the best sibling by descending along the cheapest perimeter growth
        let mut index = root;
        while let Some([child1, child2]) = self.nodes[index].children() {
            let node_aabb = self.nodes[index].aabb;
            let area = node_aabb.perimeter();

            let combined_area = node_aabb.merge(&leaf_aabb).perimeter();

            // Cost of creating a new parent for this node and the new leaf
            let cost = 2.0 * combined_area;

            // Minimum cost of pushing the leaf further down the tree
            let inheritance_cost = 2.0 * (combined_area - area);

            let child_cost = |child: ProxyId| {
                let node = &self.nodes[child];
                let merged = node.aabb.merge(&leaf_aabb).perimeter();
                match node.kind {
                    NodeKind::Leaf(_) => merged + inheritance_cost,
                    NodeKind::Branch(_) => merged - node.aabb.perimeter() + inheritance_cost,
                }
            };

            let cost1 = child_cost(child1);
            let cost2 = child_cost(child2);

            if cost < cost1 && cost < cost2 {
                break;
            }

            index = if cost1 < cost2 { child1 } else { child2 };
        }

        let sibling = index;

        let old_parent = self.nodes[sibling].parent;
        let new_parent = self.nodes.insert(Node {
            aabb: leaf_aabb.merge(&self.nodes[sibling].aabb),
            parent: old_parent,
            height: self.nodes[sibling].height + 1,
            kind: NodeKind::Branch([sibling, leaf]),
        });

        match old_parent {
            Some(old_parent) => self.replace_child(old_parent, sibling, new_parent),
            None => self.root = Some(new_parent),
        }

        self.nodes[sibling].parent = Some(new_parent);
        self.nodes[leaf].parent = Some(new_parent);

        self.refit_ancestors(Some(new_parent));
    }

    fn remove_leaf(&mut self, leaf: ProxyId) {
        if self.root == Some(leaf) {
            self.root = None;
            return;
        }

        let Some(parent) = self.nodes[leaf].parent else {
            return;
        };

        let grand_parent = self.nodes[parent].parent;
        let sibling = match self.nodes[parent].children() {
            Some([a, b]) if a == leaf => b,
            Some([a, _]) => a,
            None => unreachable!("parent of a leaf is always a branch"),
        };

        self.nodes.remove(parent);
        self.nodes[sibling].parent = grand_parent;
        self.nodes[leaf].parent = None;

        match grand_parent {
            Some(grand_parent) => {
                self.replace_child(grand_parent, parent, sibling);
                self.refit_ancestors(Some(grand_parent));
            }
            None => self.root = Some(sibling),
        }
    }

    fn replace_child(&mut self, parent: ProxyId, old: ProxyId, new: ProxyId) {
        if let NodeKind::Branch(children) = &mut self.nodes[parent].kind {
            for child in children.iter_mut() {
                if *child == old {
                    *child = new;
                }
            }
        }
    }

    /// Walks up from `index` restoring balance, heights, and boxes
    fn refit_ancestors(&mut self, mut index: Option<ProxyId>) {
        while let Some(current) = index {
            let current = self.balance(current);

            if let Some([a, b]) = self.nodes[current].children() {
                let (aabb_a, height_a) = (self.nodes[a].aabb, self.nodes[a].height);
                let (aabb_b, height_b) = (self.nodes[b].aabb, self.nodes[b].height);

                let node = &mut self.nodes[current];
                node.height = 1 + height_a.max(height_b);
                node.aabb = aabb_a.merge(&aabb_b);
            }

            index = self.nodes[current].parent;
        }
    }

    /// Performs a left or right rotation if `a` is imbalanced. Returns the new root of the subtree.
    fn balance(&mut self, a: ProxyId) -> ProxyId {
        let Some([b, c]) = self.nodes[a].children() else {
            return a;
        };

        if self.nodes[a].height < 2 {
            return a;
        }

        let balance = self.nodes[c].height as i64 - self.nodes[b].height as i64;

        if balance > 1 {
            self.rotate_up(a, b, c)
        } else if balance < -1 {
            self.rotate_up(a, c, b)
        } else {
            a
        }
    }

    /// Promotes `up`, the taller child of `a`, to take the place of `a`.
    ///
    /// `other` is the remaining child of `a`.
    fn rotate_up(&mut self, a: ProxyId, other: ProxyId, up: ProxyId) -> ProxyId {
        let Some([f, g]) = self.nodes[up].children() else {
            return a;
        };

        let a_parent = self.nodes[a].parent;

        // Swap `a` and `up`
        self.nodes[up].parent = a_parent;
        self.nodes[a].parent = Some(up);

        match a_parent {
            Some(parent) => self.replace_child(parent, a, up),
            None => self.root = Some(up),
        }

        // Keep the taller grandchild under `up` and hand the shorter to `a`
        let (keep, give) = if self.nodes[f].height > self.nodes[g].height {
            (f, g)
        } else {
            (g, f)
        };

        self.nodes[up].kind = NodeKind::Branch([a, keep]);
        self.nodes[a].kind = NodeKind::Branch([other, give]);
        self.nodes[give].parent = Some(a);

        let a_aabb = self.nodes[other].aabb.merge(&self.nodes[give].aabb);
        let a_height = 1 + self.nodes[other].height.max(self.nodes[give].height);
        self.nodes[a].aabb = a_aabb;
        self.nodes[a].height = a_height;

        self.nodes[up].aabb = a_aabb.merge(&self.nodes[keep].aabb);
        self.nodes[up].height = 1 + a_height.max(self.nodes[keep].height);

        up
    }

    /// Checks the structural invariants of the tree, panicking on violation
    pub fn validate(&self) {
        let Some(root) = self.root else {
            assert_eq!(self.leaf_count, 0);
            assert!(self.nodes.is_empty());
            return;
        };

        assert_eq!(self.nodes[root].parent, None);

        let mut leaves = 0;
        let mut stack = vec![root];
        while let Some(index) = stack.pop() {
            let node = &self.nodes[index];
            match node.kind {
                NodeKind::Leaf(_) => {
                    assert_eq!(node.height, 0);
                    leaves += 1;
                }
                NodeKind::Branch([a, b]) => {
                    let (na, nb) = (&self.nodes[a], &self.nodes[b]);
                    assert_eq!(na.parent, Some(index));
                    assert_eq!(nb.parent, Some(index));
                    assert_eq!(node.height, 1 + na.height.max(nb.height));
                    assert!(node.aabb.contains(&na.aabb));
                    assert!(node.aabb.contains(&nb.aabb));
                    stack.push(a);
                    stack.push(b);
                }
            }
        }

        assert_eq!(leaves, self.leaf_count);
        assert_eq!(self.nodes.len(), 2 * leaves - 1);
    }
}

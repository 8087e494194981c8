//! Marker hierarchy used to propagate rigid corrections.
//!
//! The hierarchy is a forest over marker names. It is stored as an arena:
//! every marker gets an integer index and a precomputed list of child
//! indices, and the structure is validated once at construction (no cycles,
//! at most one parent per marker). Traversals are iterative, so a subtree
//! walk visits each descendant exactly once.

use std::collections::{HashMap, HashSet};

use crate::math::{point3, vec3};
use crate::store::{is_defined, MarkerCache, Point3, StoreError, TrajectoryStore};

/// One parent entry of a hierarchy definition.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HierarchyNode {
    pub marker: String,
    #[serde(default)]
    pub children: Vec<String>,
}

impl HierarchyNode {
    pub fn new(marker: &str, children: &[&str]) -> Self {
        Self {
            marker: marker.to_string(),
            children: children.iter().map(|c| c.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum HierarchyError {
    EmptyName,
    SelfEdge(String),
    DuplicateEntry(String),
    MultipleParents {
        child: String,
        first: String,
        second: String,
    },
    Cycle(String),
}

impl std::fmt::Display for HierarchyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyName => write!(f, "hierarchy contains an empty marker name"),
            Self::SelfEdge(m) => write!(f, "marker '{}' lists itself as a child", m),
            Self::DuplicateEntry(m) => write!(f, "marker '{}' has more than one entry", m),
            Self::MultipleParents {
                child,
                first,
                second,
            } => write!(
                f,
                "marker '{}' has two parents ('{}' and '{}')",
                child, first, second
            ),
            Self::Cycle(m) => write!(f, "hierarchy cycle through marker '{}'", m),
        }
    }
}

impl std::error::Error for HierarchyError {}

/// Validated parent/child forest over marker names.
#[derive(Debug, Clone, Default)]
pub struct Hierarchy {
    names: Vec<String>,
    index: HashMap<String, usize>,
    parent: Vec<Option<usize>>,
    children: Vec<Vec<usize>>,
}

impl Hierarchy {
    /// Build and validate a hierarchy from parent entries.
    ///
    /// Markers that only appear as children are added as leaves. Child order
    /// is kept as declared.
    pub fn from_nodes(nodes: &[HierarchyNode]) -> Result<Self, HierarchyError> {
        let mut h = Self::default();
        let mut seen_entries = HashSet::new();

        for node in nodes {
            if node.marker.trim().is_empty() {
                return Err(HierarchyError::EmptyName);
            }
            if !seen_entries.insert(node.marker.as_str()) {
                return Err(HierarchyError::DuplicateEntry(node.marker.clone()));
            }
            let p = h.intern(&node.marker);
            for child in &node.children {
                if child.trim().is_empty() {
                    return Err(HierarchyError::EmptyName);
                }
                if *child == node.marker {
                    return Err(HierarchyError::SelfEdge(child.clone()));
                }
                let c = h.intern(child);
                if let Some(prev) = h.parent[c] {
                    return Err(HierarchyError::MultipleParents {
                        child: child.clone(),
                        first: h.names[prev].clone(),
                        second: node.marker.clone(),
                    });
                }
                h.parent[c] = Some(p);
                h.children[p].push(c);
            }
        }

        h.check_acyclic()?;
        Ok(h)
    }

    fn intern(&mut self, name: &str) -> usize {
        if let Some(&idx) = self.index.get(name) {
            return idx;
        }
        let idx = self.names.len();
        self.names.push(name.to_string());
        self.index.insert(name.to_string(), idx);
        self.parent.push(None);
        self.children.push(Vec::new());
        idx
    }

    /// Every node must be reachable from a root; with single parents this
    /// is equivalent to the absence of cycles.
    fn check_acyclic(&self) -> Result<(), HierarchyError> {
        let mut reached = vec![false; self.len()];
        for root in self.roots() {
            for idx in self.subtree(root) {
                reached[idx] = true;
            }
        }
        match reached.iter().position(|r| !r) {
            Some(idx) => Err(HierarchyError::Cycle(self.names[idx].clone())),
            None => Ok(()),
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn name(&self, idx: usize) -> &str {
        &self.names[idx]
    }

    pub fn parent(&self, idx: usize) -> Option<usize> {
        self.parent[idx]
    }

    pub fn children(&self, idx: usize) -> &[usize] {
        &self.children[idx]
    }

    /// Indices of markers without a parent, in first-seen order.
    pub fn roots(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.len()).filter(|&i| self.parent[i].is_none())
    }

    /// `idx` followed by all of its descendants in pre-order.
    pub fn subtree(&self, idx: usize) -> Vec<usize> {
        let mut out = Vec::new();
        let mut stack = vec![idx];
        while let Some(i) = stack.pop() {
            out.push(i);
            stack.extend(self.children[i].iter().rev().copied());
        }
        out
    }

    /// Names of `marker` and all its descendants. A marker unknown to the
    /// hierarchy is its own one-element subtree.
    pub fn subtree_names<'a>(&'a self, marker: &'a str) -> Vec<&'a str> {
        match self.index_of(marker) {
            Some(idx) => self
                .subtree(idx)
                .into_iter()
                .map(|i| self.names[i].as_str())
                .collect(),
            None => vec![marker],
        }
    }

    /// Whether `descendant` lies strictly below `ancestor`.
    pub fn is_descendant(&self, ancestor: &str, descendant: &str) -> bool {
        let (Some(a), Some(mut d)) = (self.index_of(ancestor), self.index_of(descendant)) else {
            return false;
        };
        while let Some(p) = self.parent[d] {
            if p == a {
                return true;
            }
            d = p;
        }
        false
    }
}

/// Translate `marker` and every cached descendant by `delta` at `frame`.
///
/// Undefined samples stay undefined. Returns the number of samples moved.
pub(crate) fn translate_subtree_cached(
    cache: &mut MarkerCache,
    hierarchy: &Hierarchy,
    marker: &str,
    frame: usize,
    delta: [f64; 3],
) -> usize {
    let d = vec3(&delta);
    let mut moved = 0;
    for name in hierarchy.subtree_names(marker) {
        let Some(p) = cache.point(name, frame) else {
            continue;
        };
        if !is_defined(&p) {
            continue;
        }
        let q = vec3(&p) + d;
        if cache.set_point(name, frame, point3(&q)) {
            moved += 1;
        }
    }
    moved
}

/// Rigidly translate `marker` and its whole subtree by `delta` at `frame`.
///
/// Descendants without a trajectory in the store are skipped; the marker
/// itself must exist.
pub fn translate_subtree(
    store: &mut dyn TrajectoryStore,
    hierarchy: &Hierarchy,
    marker: &str,
    frame: usize,
    delta: Point3,
) -> Result<usize, StoreError> {
    if !store.contains(marker) {
        return Err(StoreError::UnknownTrajectory(marker.to_string()));
    }
    if frame >= store.frame_count() {
        return Err(StoreError::FrameOutOfRange {
            name: marker.to_string(),
            frame,
            frame_count: store.frame_count(),
        });
    }
    let names = hierarchy.subtree_names(marker);
    let mut cache = MarkerCache::load(store, names.iter().copied());
    let moved = translate_subtree_cached(&mut cache, hierarchy, marker, frame, delta);
    cache.flush(store)?;
    Ok(moved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::distance;
    use crate::store::MemoryStore;
    use approx::assert_abs_diff_eq;

    fn chain() -> Hierarchy {
        Hierarchy::from_nodes(&[
            HierarchyNode::new("a", &["b"]),
            HierarchyNode::new("b", &["c", "d"]),
        ])
        .expect("valid hierarchy")
    }

    #[test]
    fn subtree_visits_each_descendant_once_in_preorder() {
        let h = chain();
        assert_eq!(h.subtree_names("a"), vec!["a", "b", "c", "d"]);
        assert_eq!(h.subtree_names("b"), vec!["b", "c", "d"]);
        assert_eq!(h.subtree_names("d"), vec!["d"]);
        assert_eq!(h.subtree_names("zzz"), vec!["zzz"]);
        assert!(h.is_descendant("a", "d"));
        assert!(!h.is_descendant("d", "a"));
        assert_eq!(h.roots().count(), 1);
    }

    #[test]
    fn rejects_cycles() {
        let err = Hierarchy::from_nodes(&[
            HierarchyNode::new("a", &["b"]),
            HierarchyNode::new("b", &["c"]),
            HierarchyNode::new("c", &["a"]),
        ])
        .expect_err("cycle");
        assert!(matches!(err, HierarchyError::Cycle(_)));
    }

    #[test]
    fn rejects_two_parents_and_self_edges() {
        let err = Hierarchy::from_nodes(&[
            HierarchyNode::new("a", &["c"]),
            HierarchyNode::new("b", &["c"]),
        ])
        .expect_err("two parents");
        assert_eq!(
            err,
            HierarchyError::MultipleParents {
                child: "c".to_string(),
                first: "a".to_string(),
                second: "b".to_string(),
            }
        );

        let err = Hierarchy::from_nodes(&[HierarchyNode::new("a", &["a"])]).expect_err("self");
        assert_eq!(err, HierarchyError::SelfEdge("a".to_string()));
    }

    #[test]
    fn translation_moves_whole_subtree_rigidly() {
        let h = Hierarchy::from_nodes(&[
            HierarchyNode::new("A", &["B"]),
            HierarchyNode::new("B", &["C"]),
        ])
        .expect("valid");
        let mut store = MemoryStore::new(0, 1)
            .with_trajectory("A", vec![[0.0, 0.0, 0.0]])
            .and_then(|s| s.with_trajectory("B", vec![[0.0, 0.0, 1.0]]))
            .and_then(|s| s.with_trajectory("C", vec![[0.5, 0.0, 1.5]]))
            .expect("valid");
        let ab = distance(&store.get("A").expect("A")[0], &store.get("B").expect("B")[0]);
        let bc = distance(&store.get("B").expect("B")[0], &store.get("C").expect("C")[0]);

        let moved = translate_subtree(&mut store, &h, "A", 0, [1.0, 2.0, 3.0]).expect("ok");
        assert_eq!(moved, 3);

        let a = store.get("A").expect("A")[0];
        let b = store.get("B").expect("B")[0];
        let c = store.get("C").expect("C")[0];
        assert_eq!(a, [1.0, 2.0, 3.0]);
        assert_eq!(b, [1.0, 2.0, 4.0]);
        assert_eq!(c, [1.5, 2.0, 4.5]);
        assert_abs_diff_eq!(distance(&a, &b), ab, epsilon = 1e-12);
        assert_abs_diff_eq!(distance(&b, &c), bc, epsilon = 1e-12);
    }

    #[test]
    fn translation_skips_missing_descendants_and_undefined_samples() {
        let h = chain();
        let mut store = MemoryStore::new(0, 2)
            .with_trajectory("b", vec![[0.0; 3], [1.0; 3]])
            .and_then(|s| s.with_trajectory("c", vec![crate::store::UNDEFINED; 2]))
            .expect("valid");
        let moved = translate_subtree(&mut store, &h, "b", 1, [0.0, 0.0, 1.0]).expect("ok");
        assert_eq!(moved, 1);
        assert_eq!(store.get("b").expect("b")[1], [1.0, 1.0, 2.0]);
        assert_eq!(store.get("b").expect("b")[0], [0.0; 3]);

        assert!(translate_subtree(&mut store, &h, "d", 0, [0.0; 3]).is_err());
    }
}

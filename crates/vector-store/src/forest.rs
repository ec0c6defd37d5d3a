//! Random-projection forest for approximate nearest-neighbour search.
//!
//! Every tree partitions the slot set with hyperplanes drawn from pairs of
//! member vectors until a node holds at most `leaf_size` slots. Queries walk all
//! trees best-first by hyperplane margin, gather candidate slots from the
//! leaves, then rank candidates by exact distance.

use crate::error::{Result, VectorStoreError};
use crate::metric::{dot, norm, Metric};
use crate::types::{EmbeddingVector, Slot};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// How much of the forest a query may examine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchBudget {
    /// Visit every leaf of every tree.
    Exhaustive,
    /// Stop after gathering this many candidate slots (counted with repeats).
    Nodes(usize),
    /// `n * tree_count` candidates, the conventional default.
    Default,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForestParams {
    pub trees: usize,
    pub leaf_size: usize,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            trees: 10,
            leaf_size: 16,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Node {
    Leaf {
        slots: Vec<u32>,
    },
    Split {
        normal: Vec<f32>,
        offset: f32,
        left: u32,
        right: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Tree {
    root: u32,
    nodes: Vec<Node>,
}

/// Collects vectors under dense slots before the forest is built.
#[derive(Debug)]
pub struct ForestBuilder {
    dimension: usize,
    metric: Metric,
    vectors: Vec<EmbeddingVector>,
}

impl ForestBuilder {
    #[must_use]
    pub fn new(dimension: usize, metric: Metric) -> Self {
        Self {
            dimension,
            metric,
            vectors: Vec::new(),
        }
    }

    /// Slots must be added densely, in order, starting at zero.
    pub fn add_item(&mut self, slot: Slot, vector: EmbeddingVector) -> Result<()> {
        if slot.index() != self.vectors.len() {
            return Err(VectorStoreError::InconsistentState(format!(
                "slot {slot} added out of order (next slot is #{})",
                self.vectors.len()
            )));
        }
        if vector.len() != self.dimension {
            return Err(VectorStoreError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        self.vectors.push(vector);
        Ok(())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    #[must_use]
    pub fn build(self, params: ForestParams) -> AnnForest {
        let mut rng = ChaCha8Rng::seed_from_u64(params.seed);
        let leaf_size = params.leaf_size.max(2);
        let all: Vec<u32> = (0..self.vectors.len() as u32).collect();

        let mut trees = Vec::with_capacity(params.trees);
        for _ in 0..params.trees.max(1) {
            let mut nodes = Vec::new();
            let root = split_node(
                &self.vectors,
                self.metric,
                leaf_size,
                all.clone(),
                &mut nodes,
                &mut rng,
            );
            trees.push(Tree { root, nodes });
        }

        AnnForest {
            dimension: self.dimension,
            metric: self.metric,
            leaf_size,
            vectors: self.vectors,
            trees,
        }
    }
}

fn split_node(
    vectors: &[EmbeddingVector],
    metric: Metric,
    leaf_size: usize,
    mut slots: Vec<u32>,
    nodes: &mut Vec<Node>,
    rng: &mut ChaCha8Rng,
) -> u32 {
    if slots.len() <= leaf_size {
        nodes.push(Node::Leaf { slots });
        return (nodes.len() - 1) as u32;
    }

    let (normal, offset) = choose_hyperplane(vectors, metric, &slots, rng);
    let (mut left, mut right): (Vec<u32>, Vec<u32>) = slots
        .iter()
        .copied()
        .partition(|&slot| dot(&normal, &vectors[slot as usize]) + offset <= 0.0);

    // Degenerate split (duplicates or collinear points): fall back to a random halving so the
    // recursion always makes progress.
    if left.is_empty() || right.is_empty() {
        slots.shuffle(rng);
        let mid = slots.len() / 2;
        right = slots.split_off(mid);
        left = slots;
        left.sort_unstable();
        right.sort_unstable();
        let (normal, offset) = (vec![0.0; vectors[0].len()], 0.0);
        return push_split(vectors, metric, leaf_size, normal, offset, left, right, nodes, rng);
    }

    push_split(vectors, metric, leaf_size, normal, offset, left, right, nodes, rng)
}

#[allow(clippy::too_many_arguments)]
fn push_split(
    vectors: &[EmbeddingVector],
    metric: Metric,
    leaf_size: usize,
    normal: Vec<f32>,
    offset: f32,
    left: Vec<u32>,
    right: Vec<u32>,
    nodes: &mut Vec<Node>,
    rng: &mut ChaCha8Rng,
) -> u32 {
    let idx = nodes.len();
    nodes.push(Node::Leaf { slots: Vec::new() });
    let left = split_node(vectors, metric, leaf_size, left, nodes, rng);
    let right = split_node(vectors, metric, leaf_size, right, nodes, rng);
    nodes[idx] = Node::Split {
        normal,
        offset,
        left,
        right,
    };
    idx as u32
}

fn choose_hyperplane(
    vectors: &[EmbeddingVector],
    metric: Metric,
    slots: &[u32],
    rng: &mut ChaCha8Rng,
) -> (Vec<f32>, f32) {
    let i = rng.random_range(0..slots.len());
    let mut j = rng.random_range(0..slots.len() - 1);
    if j >= i {
        j += 1;
    }
    let a = &vectors[slots[i] as usize];
    let b = &vectors[slots[j] as usize];

    match metric {
        Metric::Angular => {
            let (na, nb) = (norm(a).max(f32::EPSILON), norm(b).max(f32::EPSILON));
            let normal = a.iter().zip(b).map(|(x, y)| x / na - y / nb).collect();
            (normal, 0.0)
        }
        Metric::Euclidean | Metric::Dot => {
            let normal: Vec<f32> = a.iter().zip(b).map(|(x, y)| x - y).collect();
            let midpoint: Vec<f32> = a.iter().zip(b).map(|(x, y)| (x + y) / 2.0).collect();
            let offset = -dot(&normal, &midpoint);
            (normal, offset)
        }
    }
}

#[derive(Debug)]
struct Pending {
    priority: f32,
    tree: u32,
    node: u32,
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Pending {}

impl Ord for Pending {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .total_cmp(&other.priority)
            .then_with(|| other.tree.cmp(&self.tree))
            .then_with(|| other.node.cmp(&self.node))
    }
}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// An immutable, fully built forest together with the vectors it indexes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnForest {
    dimension: usize,
    metric: Metric,
    leaf_size: usize,
    vectors: Vec<EmbeddingVector>,
    trees: Vec<Tree>,
}

impl AnnForest {
    #[must_use]
    pub const fn dimension(&self) -> usize {
        self.dimension
    }

    #[must_use]
    pub const fn metric(&self) -> Metric {
        self.metric
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    #[must_use]
    pub const fn leaf_size(&self) -> usize {
        self.leaf_size
    }

    #[must_use]
    pub fn tree_count(&self) -> usize {
        self.trees.len()
    }

    #[must_use]
    pub fn vector(&self, slot: Slot) -> Option<&[f32]> {
        self.vectors.get(slot.index()).map(Vec::as_slice)
    }

    /// Neighbours of an indexed slot, the slot itself included (usually first).
    #[must_use]
    pub fn nearest_by_slot(&self, slot: Slot, n: usize, budget: SearchBudget) -> Vec<(Slot, f32)> {
        match self.vectors.get(slot.index()) {
            Some(query) => self.nearest(query, n, budget),
            None => Vec::new(),
        }
    }

    pub fn nearest_by_vector(
        &self,
        query: &[f32],
        n: usize,
        budget: SearchBudget,
    ) -> Result<Vec<(Slot, f32)>> {
        if query.len() != self.dimension {
            return Err(VectorStoreError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }
        Ok(self.nearest(query, n, budget))
    }

    /// Results are ordered by `(distance, slot)`, so equal distances always come
    /// back in the same order.
    fn nearest(&self, query: &[f32], n: usize, budget: SearchBudget) -> Vec<(Slot, f32)> {
        if n == 0 || self.vectors.is_empty() {
            return Vec::new();
        }

        let limit = match budget {
            SearchBudget::Exhaustive => usize::MAX,
            SearchBudget::Nodes(k) => k.max(n),
            SearchBudget::Default => n.saturating_mul(self.trees.len().max(1)),
        };

        let mut heap = BinaryHeap::new();
        for (t, tree) in self.trees.iter().enumerate() {
            heap.push(Pending {
                priority: f32::INFINITY,
                tree: t as u32,
                node: tree.root,
            });
        }

        let mut seen = vec![false; self.vectors.len()];
        let mut candidates: Vec<u32> = Vec::new();
        let mut gathered = 0usize;

        while let Some(Pending {
            priority,
            tree,
            node,
        }) = heap.pop()
        {
            if gathered >= limit {
                break;
            }
            match &self.trees[tree as usize].nodes[node as usize] {
                Node::Leaf { slots } => {
                    gathered += slots.len();
                    for &slot in slots {
                        if !std::mem::replace(&mut seen[slot as usize], true) {
                            candidates.push(slot);
                        }
                    }
                }
                Node::Split {
                    normal,
                    offset,
                    left,
                    right,
                } => {
                    let margin = dot(normal, query) + offset;
                    heap.push(Pending {
                        priority: priority.min(margin),
                        tree,
                        node: *right,
                    });
                    heap.push(Pending {
                        priority: priority.min(-margin),
                        tree,
                        node: *left,
                    });
                }
            }
        }

        let mut scored: Vec<(Slot, f32)> = candidates
            .into_iter()
            .map(|slot| {
                let distance = self.metric.distance(query, &self.vectors[slot as usize]);
                (Slot(slot), distance)
            })
            .collect();
        scored.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        scored.truncate(n);
        scored
    }

    /// Structural self-check used when loading a persisted forest.
    pub fn validate(&self) -> Result<()> {
        if let Some(bad) = self.vectors.iter().find(|v| v.len() != self.dimension) {
            return Err(VectorStoreError::DimensionMismatch {
                expected: self.dimension,
                actual: bad.len(),
            });
        }
        let count = self.vectors.len();
        for (t, tree) in self.trees.iter().enumerate() {
            if tree.root as usize >= tree.nodes.len() {
                return Err(VectorStoreError::InconsistentState(format!(
                    "tree {t} root {} out of range",
                    tree.root
                )));
            }
            for node in &tree.nodes {
                match node {
                    Node::Leaf { slots } => {
                        if let Some(slot) = slots.iter().find(|&&s| s as usize >= count) {
                            return Err(VectorStoreError::InconsistentState(format!(
                                "tree {t} references slot #{slot} but only {count} vectors exist"
                            )));
                        }
                    }
                    Node::Split {
                        normal,
                        left,
                        right,
                        ..
                    } => {
                        if normal.len() != self.dimension
                            || *left as usize >= tree.nodes.len()
                            || *right as usize >= tree.nodes.len()
                        {
                            return Err(VectorStoreError::InconsistentState(format!(
                                "tree {t} has a malformed split node"
                            )));
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn grid_forest(metric: Metric, params: ForestParams) -> AnnForest {
        let mut builder = ForestBuilder::new(2, metric);
        let mut slot = 0;
        for x in 0..10 {
            for y in 0..10 {
                builder
                    .add_item(Slot(slot), vec![x as f32 + 1.0, y as f32 + 1.0])
                    .unwrap();
                slot += 1;
            }
        }
        builder.build(params)
    }

    fn brute_force(forest: &AnnForest, query: &[f32], n: usize) -> Vec<(Slot, f32)> {
        let mut all: Vec<(Slot, f32)> = (0..forest.len() as u32)
            .map(|s| (Slot(s), forest.metric().distance(query, forest.vector(Slot(s)).unwrap())))
            .collect();
        all.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        all.truncate(n);
        all
    }

    #[test]
    fn rejects_out_of_order_slots() {
        let mut builder = ForestBuilder::new(2, Metric::Euclidean);
        assert!(builder.add_item(Slot(1), vec![0.0, 1.0]).is_err());
        assert!(builder.add_item(Slot(0), vec![0.0]).is_err());
        assert!(builder.add_item(Slot(0), vec![0.0, 1.0]).is_ok());
    }

    #[test]
    fn exhaustive_search_matches_brute_force() {
        for metric in [Metric::Euclidean, Metric::Angular] {
            let forest = grid_forest(metric, ForestParams::default());
            let query = [4.2, 7.9];
            let got = forest
                .nearest_by_vector(&query, 12, SearchBudget::Exhaustive)
                .unwrap();
            assert_eq!(got, brute_force(&forest, &query, 12));
        }
    }

    #[test]
    fn slot_query_returns_itself_first() {
        let forest = grid_forest(Metric::Euclidean, ForestParams::default());
        let got = forest.nearest_by_slot(Slot(55), 3, SearchBudget::Exhaustive);
        assert_eq!(got[0], (Slot(55), 0.0));
        assert_eq!(got.len(), 3);
    }

    #[test]
    fn same_seed_builds_identical_forest() {
        let params = ForestParams {
            trees: 4,
            leaf_size: 4,
            seed: 7,
        };
        let a = grid_forest(Metric::Angular, params);
        let b = grid_forest(Metric::Angular, params);
        assert_eq!(a, b);
        assert!(a.validate().is_ok());
    }

    #[test]
    fn bounded_budget_returns_at_most_n() {
        let forest = grid_forest(Metric::Euclidean, ForestParams::default());
        let got = forest
            .nearest_by_vector(&[1.0, 1.0], 5, SearchBudget::Default)
            .unwrap();
        assert!(got.len() <= 5);
        assert_eq!(got[0].0, Slot(0));
    }

    #[test]
    fn duplicate_vectors_still_terminate() {
        let mut builder = ForestBuilder::new(3, Metric::Angular);
        for slot in 0..50 {
            builder.add_item(Slot(slot), vec![1.0, 1.0, 1.0]).unwrap();
        }
        let forest = builder.build(ForestParams {
            trees: 3,
            leaf_size: 4,
            seed: 1,
        });
        let got = forest.nearest_by_slot(Slot(10), 50, SearchBudget::Exhaustive);
        assert_eq!(got.len(), 50);
    }

    #[test]
    fn dimension_mismatch_on_query() {
        let forest = grid_forest(Metric::Euclidean, ForestParams::default());
        assert!(forest
            .nearest_by_vector(&[1.0, 2.0, 3.0], 3, SearchBudget::Exhaustive)
            .is_err());
    }
}

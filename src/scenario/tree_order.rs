//! Scenario visiting order for warm restarts.
//!
//! Scenarios are nodes of a complete graph weighted by their distance; a
//! spanning tree of small total weight, traversed parents-first, lets each
//! scenario restart from a basis computed for a similar one.

use std::cmp::Ordering;

use log::debug;
use rayon::prelude::*;

use crate::config::TreeOrdering;

/// Visiting order with, for every position, the position of its parent.
#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioTree {
    order: Vec<usize>,
    predecessor: Vec<Option<usize>>,
    position: Vec<usize>,
}

impl ScenarioTree {
    /// Builds the tree over scenarios `0..n` with the chosen algorithm.
    ///
    /// # Complexity
    /// * `Exact`: `n(n-1)/2` distance evaluations, `O(n²)` time
    /// * `Heuristic`: at most `8n` distance evaluations, spread over the rayon
    ///   pool, then near-linear merging of the cached candidates
    /// * `Generation`: none
    pub fn build<D>(n: usize, distance: D, ordering: TreeOrdering) -> Self
    where
        D: Fn(usize, usize) -> f64 + Sync,
    {
        let parent = match ordering {
            TreeOrdering::Exact => prim_tree(n, &distance),
            TreeOrdering::Heuristic => chain_merge_tree(n, &distance),
            TreeOrdering::Generation => (0..n).map(|v| v.checked_sub(1)).collect(),
        };
        let tree = Self::from_parents(&parent);
        debug!(
            "scenario tree over {} nodes ({:?}), cost {}",
            n,
            ordering,
            tree.tree_cost(&distance)
        );
        tree
    }

    /// Preorder traversal of a parent forest rooted at node 0.
    fn from_parents(parent: &[Option<usize>]) -> Self {
        let n = parent.len();
        let mut children = vec![Vec::new(); n];
        for (v, p) in parent.iter().enumerate() {
            if let Some(p) = *p {
                children[p].push(v);
            }
        }

        let mut order = Vec::with_capacity(n);
        let mut stack: Vec<usize> = (0..n).filter(|&v| parent[v].is_none()).rev().collect();
        while let Some(v) = stack.pop() {
            order.push(v);
            stack.extend(children[v].iter().rev());
        }

        let mut position = vec![0; n];
        for (k, &v) in order.iter().enumerate() {
            position[v] = k;
        }
        let predecessor = order
            .iter()
            .map(|&v| parent[v].map(|p| position[p]))
            .collect();

        Self {
            order,
            predecessor,
            position,
        }
    }

    /// Scenario indices in visiting order.
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    /// For each position in `order`, the position of its parent.
    pub fn predecessor(&self) -> &[Option<usize>] {
        &self.predecessor
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Scenario index of the parent of `scenario`.
    pub fn parent_of(&self, scenario: usize) -> Option<usize> {
        self.predecessor[self.position[scenario]].map(|k| self.order[k])
    }

    /// Sum of the distances along tree edges.
    pub fn tree_cost<D: Fn(usize, usize) -> f64>(&self, distance: D) -> f64 {
        self.order
            .iter()
            .zip(self.predecessor.iter())
            .filter_map(|(&v, p)| p.map(|k| distance(self.order[k], v)))
            .sum()
    }
}

/// Cost of visiting `0..n` in generation order.
pub fn straight_cost<D: Fn(usize, usize) -> f64>(n: usize, distance: D) -> f64 {
    (1..n).map(|v| distance(v - 1, v)).sum()
}

/// Total order on edges that makes every spanning tree choice unique.
fn edge_cmp(a: (f64, usize, usize), b: (f64, usize, usize)) -> Ordering {
    let key = |(w, u, v): (f64, usize, usize)| (w, u.min(v), u.max(v));
    let (wa, la, ha) = key(a);
    let (wb, lb, hb) = key(b);
    wa.partial_cmp(&wb)
        .unwrap_or(Ordering::Equal)
        .then(la.cmp(&lb))
        .then(ha.cmp(&hb))
}

/// Prim–Dijkstra on the complete graph with a dense distance row per step.
fn prim_tree<D: Fn(usize, usize) -> f64>(n: usize, distance: &D) -> Vec<Option<usize>> {
    let mut parent = vec![None; n];
    if n == 0 {
        return parent;
    }
    let mut in_tree = vec![false; n];
    let mut best = vec![f64::INFINITY; n];
    in_tree[0] = true;
    for v in 1..n {
        best[v] = distance(0, v);
        parent[v] = Some(0);
    }

    for _ in 1..n {
        let mut next: Option<usize> = None;
        for v in (0..n).filter(|&v| !in_tree[v]) {
            next = match next {
                Some(u) => {
                    let pu = parent[u].unwrap_or(0);
                    let pv = parent[v].unwrap_or(0);
                    if edge_cmp((best[v], v, pv), (best[u], u, pu)) == Ordering::Less {
                        Some(v)
                    } else {
                        Some(u)
                    }
                }
                None => Some(v),
            };
        }
        let Some(v) = next else {
            break;
        };
        in_tree[v] = true;
        for u in (0..n).filter(|&u| !in_tree[u]) {
            let d = distance(v, u);
            let pu = parent[u].unwrap_or(0);
            if edge_cmp((d, u, v), (best[u], u, pu)) == Ordering::Less {
                best[u] = d;
                parent[u] = Some(v);
            }
        }
    }
    parent
}

/// Disjoint-set forest with path compression.
struct UnionFind {
    parent: Vec<usize>,
    components: usize,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            components: n,
        }
    }

    fn find(&mut self, x: usize) -> usize {
        if self.parent[x] != x {
            self.parent[x] = self.find(self.parent[x]);
        }
        self.parent[x]
    }

    /// Returns `true` if the sets were disjoint.
    fn union(&mut self, x: usize, y: usize) -> bool {
        let rx = self.find(x);
        let ry = self.find(y);
        if rx == ry {
            return false;
        }
        if rx < ry {
            self.parent[ry] = rx;
        } else {
            self.parent[rx] = ry;
        }
        self.components -= 1;
        true
    }
}

/// Nodes ahead of each node, in generation order, whose distance the
/// heuristic evaluates.
const CANDIDATE_WINDOW: usize = 8;

/// Nearest-neighbour chains joined by cheapest cross-links, over a sparse
/// candidate graph.
///
/// Only pairs at most `CANDIDATE_WINDOW` apart in generation order are
/// evaluated, each once. The candidates contain the generation path, so the
/// graph is connected and the result never costs more than `straight_cost`.
/// Every node links to its nearest candidate; under the strict edge order the
/// only cycles of that graph are mutual pairs, which union-find cuts. The
/// chains are then merged by each subtree's cheapest outgoing candidate until
/// one tree remains, dropping candidates that became internal after each round.
fn chain_merge_tree<D>(n: usize, distance: &D) -> Vec<Option<usize>>
where
    D: Fn(usize, usize) -> f64 + Sync,
{
    if n <= 1 {
        return vec![None; n];
    }

    let mut candidates: Vec<(f64, usize, usize)> = (0..n - 1)
        .into_par_iter()
        .flat_map_iter(|u| {
            let last = (u + CANDIDATE_WINDOW).min(n - 1);
            (u + 1..=last).map(move |v| (distance(u, v), u, v))
        })
        .collect();

    let mut nearest: Vec<Option<(f64, usize, usize)>> = vec![None; n];
    for &edge in &candidates {
        let (_, u, v) = edge;
        for end in [u, v] {
            let better = match nearest[end] {
                Some(current) => edge_cmp(edge, current) == Ordering::Less,
                None => true,
            };
            if better {
                nearest[end] = Some(edge);
            }
        }
    }

    let mut uf = UnionFind::new(n);
    let mut edges = Vec::with_capacity(n - 1);
    for (_, u, v) in nearest.into_iter().flatten() {
        if uf.union(u, v) {
            edges.push((u, v));
        }
    }

    let chains = uf.components;
    let mut rounds = 0;
    loop {
        candidates.retain(|&(_, u, v)| uf.find(u) != uf.find(v));
        if uf.components == 1 || candidates.is_empty() {
            break;
        }
        rounds += 1;
        let mut cheapest: Vec<Option<(f64, usize, usize)>> = vec![None; n];
        for &edge in &candidates {
            let (_, u, v) = edge;
            for root in [uf.find(u), uf.find(v)] {
                let better = match cheapest[root] {
                    Some(current) => edge_cmp(edge, current) == Ordering::Less,
                    None => true,
                };
                if better {
                    cheapest[root] = Some(edge);
                }
            }
        }
        for (_, u, v) in cheapest.into_iter().flatten() {
            if uf.union(u, v) {
                edges.push((u, v));
            }
        }
    }
    debug!("merged {} nearest-neighbour chains in {} round(s)", chains, rounds);

    root_edges(n, &edges)
}

/// Orients an undirected spanning tree from node 0.
fn root_edges(n: usize, edges: &[(usize, usize)]) -> Vec<Option<usize>> {
    let mut adjacency = vec![Vec::new(); n];
    for &(u, v) in edges {
        adjacency[u].push(v);
        adjacency[v].push(u);
    }
    let mut parent = vec![None; n];
    let mut seen = vec![false; n];
    let mut stack = vec![0];
    seen[0] = true;
    while let Some(v) = stack.pop() {
        for &u in &adjacency[v] {
            if !seen[u] {
                seen[u] = true;
                parent[u] = Some(v);
                stack.push(u);
            }
        }
    }
    parent
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::{Delta, Scenario, ScenarioSet};
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    fn random_set(n: usize, seed: u64) -> ScenarioSet {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let scenarios = (0..n)
            .map(|_| {
                let mut deltas = Vec::new();
                for row in 0..6 {
                    if rng.gen_bool(0.6) {
                        deltas.push(Delta::rhs(row, rng.gen_range(0..3) as f64));
                    }
                }
                Scenario::new(1.0, deltas)
            })
            .collect();
        ScenarioSet::new(scenarios)
    }

    fn assert_spanning_tree(tree: &ScenarioTree, n: usize) {
        assert_eq!(tree.len(), n);
        let mut sorted = tree.order().to_vec();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..n).collect::<Vec<_>>());
        if n > 0 {
            assert_eq!(tree.predecessor()[0], None);
        }
        for (k, p) in tree.predecessor().iter().enumerate().skip(1) {
            // Parents come first, which also rules out cycles.
            let p = p.expect("non-root without predecessor");
            assert!(p < k);
        }
    }

    #[test]
    fn test_trees_are_spanning_and_parents_first() {
        for &n in &[1usize, 5, 10, 50] {
            let set = random_set(n, n as u64);
            let d = |i, j| set.distance(i, j);
            for ordering in [
                TreeOrdering::Exact,
                TreeOrdering::Heuristic,
                TreeOrdering::Generation,
            ] {
                let tree = ScenarioTree::build(n, d, ordering);
                assert_spanning_tree(&tree, n);
            }
        }
    }

    #[test]
    fn test_tree_cost_not_above_straight_cost() {
        for seed in 0..10 {
            let n = 30;
            let set = random_set(n, 100 + seed);
            let d = |i, j| set.distance(i, j);
            let straight = straight_cost(n, d);
            let exact = ScenarioTree::build(n, d, TreeOrdering::Exact);
            let heuristic = ScenarioTree::build(n, d, TreeOrdering::Heuristic);
            assert!(exact.tree_cost(d) <= straight);
            assert!(heuristic.tree_cost(d) <= straight);
            let generation = ScenarioTree::build(n, d, TreeOrdering::Generation);
            assert_eq!(generation.tree_cost(d), straight);
        }
    }

    #[test]
    fn test_heuristic_between_exact_and_straight() {
        for seed in 0..5 {
            let n = 60;
            let set = random_set(n, 7 + seed);
            let d = |i, j| set.distance(i, j);
            let exact = ScenarioTree::build(n, d, TreeOrdering::Exact).tree_cost(d);
            let heuristic = ScenarioTree::build(n, d, TreeOrdering::Heuristic).tree_cost(d);
            assert!(exact <= heuristic);
            assert!(heuristic <= straight_cost(n, d));
        }
    }

    #[test]
    fn test_heuristic_matches_exact_weight_within_window() {
        // Every pair is a candidate, so the merge is a full Borůvka.
        let n = CANDIDATE_WINDOW + 1;
        let set = random_set(n, 7);
        let d = |i, j| set.distance(i, j);
        let exact = ScenarioTree::build(n, d, TreeOrdering::Exact);
        let heuristic = ScenarioTree::build(n, d, TreeOrdering::Heuristic);
        assert_eq!(exact.tree_cost(d), heuristic.tree_cost(d));
    }

    #[test]
    fn test_heuristic_evaluates_fewer_distances_than_exact() {
        for &n in &[50usize, 200, 800] {
            let set = random_set(n, 40 + n as u64);
            let calls = |ordering: TreeOrdering| {
                let count = AtomicUsize::new(0);
                let d = |i: usize, j: usize| {
                    count.fetch_add(1, AtomicOrdering::Relaxed);
                    set.distance(i, j)
                };
                let tree = ScenarioTree::build(n, d, ordering);
                assert_spanning_tree(&tree, n);
                count.into_inner()
            };
            let exact = calls(TreeOrdering::Exact);
            let heuristic = calls(TreeOrdering::Heuristic);
            assert!(exact >= n * (n - 1) / 2);
            assert!(heuristic <= CANDIDATE_WINDOW * n);
            assert!(heuristic < exact, "n = {n}: {heuristic} >= {exact}");
        }
    }

    #[test]
    fn test_prim_on_line_metric() {
        // Points on a line, generated out of order.
        let xs: [f64; 5] = [0.0, 10.0, 1.0, 11.0, 2.0];
        let d = |i: usize, j: usize| (xs[i] - xs[j]).abs();
        let tree = ScenarioTree::build(5, d, TreeOrdering::Exact);
        assert_eq!(tree.tree_cost(d), 1.0 + 1.0 + 8.0 + 1.0);
        assert_eq!(tree.parent_of(0), None);
        assert_eq!(tree.parent_of(2), Some(0));
        assert_eq!(tree.parent_of(3), Some(1));
        assert!(straight_cost(5, d) > tree.tree_cost(d));
        let heuristic = ScenarioTree::build(5, d, TreeOrdering::Heuristic);
        assert_eq!(heuristic.tree_cost(d), tree.tree_cost(d));
    }

    #[test]
    fn test_empty_and_single() {
        let d = |_: usize, _: usize| 1.0;
        let empty = ScenarioTree::build(0, d, TreeOrdering::Heuristic);
        assert!(empty.is_empty());
        let single = ScenarioTree::build(1, d, TreeOrdering::Exact);
        assert_eq!(single.order(), &[0]);
        assert_eq!(single.predecessor(), &[None]);
    }
}

//! Layered proximity graph (HNSW)
//!
//! Based on "Efficient and robust approximate nearest neighbor search using
//! Hierarchical Navigable Small World graphs" (Malkov & Yashunin, 2018).
//!
//! The graph only stores topology over dense internal ids (`0..len`). Distances
//! are supplied by the caller as closures, which lets the same graph serve
//! full-precision and quantized storage alike:
//!
//! - `query_dist(id)`: distance from the current query (or inserted node) to `id`
//! - `pair_dist(a, b)`: distance between two stored nodes, used for neighbor pruning
//!
//! Search at layer 0 is filter-aware: nodes rejected by the validity predicate
//! still route the traversal but never enter the result set.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::BinaryHeap;

const LEVEL_SEED: u64 = 100;

/// Graph shape parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GraphConfig {
    /// Neighbor bound on layers above 0
    pub max_degree: usize,
    /// Neighbor bound on layer 0
    pub max_degree0: usize,
    /// Candidate list size while inserting
    pub ef_construction: usize,
}

impl GraphConfig {
    /// Level normalization factor, 1 / ln(max_degree)
    fn ml(&self) -> f64 {
        1.0 / (self.max_degree.max(2) as f64).ln()
    }

    fn degree(&self, layer: usize) -> usize {
        if layer == 0 {
            self.max_degree0
        } else {
            self.max_degree
        }
    }
}

/// Node predicates applied during layer-0 search
#[derive(Clone, Copy, Default)]
pub struct SearchFilter<'a> {
    /// Only nodes passing this predicate enter the results
    pub is_valid: Option<&'a (dyn Fn(u32) -> bool + Sync)>,
    /// Invalid nodes for which this returns true are not expanded at all
    pub skip: Option<&'a (dyn Fn(u32) -> bool + Sync)>,
}

impl SearchFilter<'_> {
    #[inline]
    fn valid(&self, id: u32) -> bool {
        self.is_valid.map_or(true, |f| f(id))
    }

    #[inline]
    fn skipped(&self, id: u32) -> bool {
        self.skip.map_or(false, |f| f(id))
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LayeredGraph {
    config: GraphConfig,
    /// node -> layer -> neighbor ids
    links: Vec<Vec<Vec<u32>>>,
    entry_point: Option<u32>,
    max_level: usize,
    #[serde(skip, default = "level_rng")]
    rng: StdRng,
}

fn level_rng() -> StdRng {
    StdRng::seed_from_u64(LEVEL_SEED)
}

impl LayeredGraph {
    pub fn new(config: GraphConfig) -> Self {
        Self {
            config,
            links: Vec::new(),
            entry_point: None,
            max_level: 0,
            rng: level_rng(),
        }
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn entry_point(&self) -> Option<u32> {
        self.entry_point
    }

    pub fn max_level(&self) -> usize {
        self.max_level
    }

    pub fn neighbors(&self, id: u32, layer: usize) -> &[u32] {
        self.links
            .get(id as usize)
            .and_then(|layers| layers.get(layer))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Approximate bytes held by adjacency lists
    pub fn memory_usage(&self) -> usize {
        self.links
            .iter()
            .map(|layers| {
                layers
                    .iter()
                    .map(|l| l.capacity() * 4 + std::mem::size_of::<Vec<u32>>())
                    .sum::<usize>()
            })
            .sum()
    }

    /// Bytes a graph over `rows` nodes is expected to need
    pub fn estimate_memory(config: &GraphConfig, rows: usize) -> usize {
        let per_node = config.max_degree0 * 4 + 2 * std::mem::size_of::<Vec<u32>>();
        // upper layers hold roughly 1/(M-1) of the nodes
        let upper = rows / config.max_degree.max(2) * (config.max_degree * 4);
        rows * per_node + upper
    }

    fn random_level(&mut self) -> usize {
        let uniform: f64 = self.rng.gen();
        (-(1.0 - uniform).ln() * self.config.ml()).floor() as usize
    }

    /// Insert the next node (its id must equal `len()`)
    pub fn insert(
        &mut self,
        id: u32,
        query_dist: &dyn Fn(u32) -> f32,
        pair_dist: &dyn Fn(u32, u32) -> f32,
    ) {
        debug_assert_eq!(id as usize, self.links.len());
        let level = self.random_level();
        self.links.push(vec![Vec::new(); level + 1]);

        let entry_point = match self.entry_point {
            Some(ep) => ep,
            None => {
                self.entry_point = Some(id);
                self.max_level = level;
                return;
            }
        };

        let mut current = vec![(query_dist(entry_point), entry_point)];
        for layer in (level + 1..=self.max_level).rev() {
            current = self.search_layer(&current, 1, layer, query_dist);
        }

        for layer in (0..=level.min(self.max_level)).rev() {
            let found = self.search_layer(&current, self.config.ef_construction, layer, query_dist);
            let m = self.config.degree(layer);
            let selected = select_neighbors(&found, m, pair_dist);

            for &neighbor in &selected {
                let links = &mut self.links[neighbor as usize][layer];
                links.push(id);
                if links.len() > m {
                    let mut scored: Vec<(f32, u32)> = links
                        .iter()
                        .map(|&other| (pair_dist(neighbor, other), other))
                        .collect();
                    scored.sort_by(|a, b| a.0.total_cmp(&b.0));
                    let pruned = select_neighbors(&scored, m, pair_dist);
                    self.links[neighbor as usize][layer] = pruned;
                }
            }
            self.links[id as usize][layer] = selected;
            current = found;
        }

        if level > self.max_level {
            self.max_level = level;
            self.entry_point = Some(id);
        }
    }

    /// Best-first search of one layer without filtering.
    ///
    /// Returns up to `ef` `(distance, id)` pairs sorted ascending.
    pub fn search_layer(
        &self,
        entries: &[(f32, u32)],
        ef: usize,
        layer: usize,
        query_dist: &dyn Fn(u32) -> f32,
    ) -> Vec<(f32, u32)> {
        let mut visited = VisitedSet::new(self.links.len());
        let mut candidates = BinaryHeap::new();
        let mut best = BinaryHeap::new();

        for &(dist, id) in entries {
            if visited.insert(id) {
                candidates.push(Reverse((OrderedFloat(dist), id)));
                best.push((OrderedFloat(dist), id));
            }
        }

        while let Some(Reverse((current_dist, current))) = candidates.pop() {
            if best.len() >= ef {
                if let Some(&(furthest, _)) = best.peek() {
                    if current_dist > furthest {
                        break;
                    }
                }
            }

            for &neighbor in self.neighbors(current, layer) {
                if !visited.insert(neighbor) {
                    continue;
                }
                let dist = OrderedFloat(query_dist(neighbor));
                let admit = best.len() < ef || best.peek().map_or(true, |&(f, _)| dist < f);
                if admit {
                    candidates.push(Reverse((dist, neighbor)));
                    best.push((dist, neighbor));
                    if best.len() > ef {
                        best.pop();
                    }
                }
            }
        }

        into_sorted(best)
    }

    /// k-NN search: greedy descent through upper layers, then a filter-aware
    /// best-first search of layer 0 with candidate list size `ef`.
    ///
    /// Returns up to `ef` valid `(distance, id)` pairs sorted ascending.
    pub fn search(
        &self,
        ef: usize,
        query_dist: &dyn Fn(u32) -> f32,
        filter: SearchFilter<'_>,
    ) -> Vec<(f32, u32)> {
        let entry_point = match self.entry_point {
            Some(ep) => ep,
            None => return Vec::new(),
        };

        let mut current = vec![(query_dist(entry_point), entry_point)];
        for layer in (1..=self.max_level).rev() {
            current = self.search_layer(&current, 1, layer, query_dist);
        }

        self.search_base_layer(&current, ef.max(1), query_dist, filter)
    }

    fn search_base_layer(
        &self,
        entries: &[(f32, u32)],
        ef: usize,
        query_dist: &dyn Fn(u32) -> f32,
        filter: SearchFilter<'_>,
    ) -> Vec<(f32, u32)> {
        let mut visited = VisitedSet::new(self.links.len());
        let mut candidates = BinaryHeap::new();
        let mut results: BinaryHeap<(OrderedFloat, u32)> = BinaryHeap::new();
        let mut lower_bound = OrderedFloat(f32::INFINITY);

        for &(dist, id) in entries {
            if !visited.insert(id) {
                continue;
            }
            candidates.push(Reverse((OrderedFloat(dist), id)));
            if filter.valid(id) {
                results.push((OrderedFloat(dist), id));
            }
        }
        if let Some(&(worst, _)) = results.peek() {
            lower_bound = worst;
        }

        while let Some(Reverse((current_dist, current))) = candidates.pop() {
            if current_dist > lower_bound && results.len() >= ef {
                break;
            }

            for &neighbor in self.neighbors(current, 0) {
                if !visited.insert(neighbor) {
                    continue;
                }
                let valid = filter.valid(neighbor);
                if !valid && filter.skipped(neighbor) {
                    continue;
                }
                let dist = OrderedFloat(query_dist(neighbor));
                if results.len() < ef || dist < lower_bound {
                    candidates.push(Reverse((dist, neighbor)));
                    if valid {
                        results.push((dist, neighbor));
                        if results.len() > ef {
                            results.pop();
                        }
                    }
                    if let Some(&(worst, _)) = results.peek() {
                        lower_bound = worst;
                    }
                }
            }
        }

        into_sorted(results)
    }
}

/// Neighbor selection heuristic (Algorithm 4): keep a candidate only if it is
/// closer to the base node than to every neighbor already selected, then top up
/// with pruned candidates to preserve connectivity.
///
/// `candidates` must be sorted by distance to the base node.
fn select_neighbors(
    candidates: &[(f32, u32)],
    m: usize,
    pair_dist: &dyn Fn(u32, u32) -> f32,
) -> Vec<u32> {
    if candidates.len() <= m {
        return candidates.iter().map(|&(_, id)| id).collect();
    }

    let mut selected: Vec<u32> = Vec::with_capacity(m);
    let mut pruned: Vec<u32> = Vec::new();

    for &(dist_to_base, candidate) in candidates {
        if selected.len() >= m {
            break;
        }
        let diverse = selected
            .iter()
            .all(|&chosen| pair_dist(candidate, chosen) >= dist_to_base);
        if diverse {
            selected.push(candidate);
        } else {
            pruned.push(candidate);
        }
    }

    for id in pruned {
        if selected.len() >= m {
            break;
        }
        selected.push(id);
    }

    selected
}

fn into_sorted(heap: BinaryHeap<(OrderedFloat, u32)>) -> Vec<(f32, u32)> {
    let mut out: Vec<(f32, u32)> = heap.into_iter().map(|(d, id)| (d.0, id)).collect();
    out.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
    out
}

/// Dense visited marks for one traversal
struct VisitedSet {
    bits: Vec<u64>,
}

impl VisitedSet {
    fn new(len: usize) -> Self {
        Self {
            bits: vec![0; (len + 63) / 64],
        }
    }

    /// Returns true when `id` was not yet visited
    #[inline]
    fn insert(&mut self, id: u32) -> bool {
        let i = id as usize;
        let word = &mut self.bits[i / 64];
        let mask = 1u64 << (i % 64);
        let fresh = *word & mask == 0;
        *word |= mask;
        fresh
    }
}

/// Wrapper for f32 that implements Ord for use in BinaryHeap
#[derive(Debug, Clone, Copy, PartialEq)]
struct OrderedFloat(f32);

impl Eq for OrderedFloat {}

impl PartialOrd for OrderedFloat {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderedFloat {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

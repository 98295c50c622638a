//! Contiguous load partitioning.
//!
//! [`find_partition`] splits an ordered weight sequence into a fixed
//! number of contiguous blocks minimizing the sum of squared block
//! totals (equivalently, the variance of the block sums).
//! [`assign_zones`] uses it to hand each graph region to a zone.

use crate::graph::Region;
use crate::stats::data_stddev;

/// Memoized dynamic program over `(k, trim)` states, where `trim` is the
/// number of weights dropped from the top and `k` the blocks remaining
/// for the rest. Owned by a single `find_partition` call.
struct PartitionTable<'a> {
    weights: &'a [f64],
    cost: Vec<f64>,
    // Size of the rightmost block in the optimal solution of a state;
    // 0 marks an unsolved state (a solved block is never empty).
    rlen: Vec<usize>,
}

impl<'a> PartitionTable<'a> {
    fn new(weights: &'a [f64], npartitions: usize) -> Self {
        Self {
            weights,
            cost: vec![0.0; weights.len() * npartitions],
            rlen: vec![0; weights.len() * npartitions],
        }
    }

    fn index(&self, k: usize, trim: usize) -> usize {
        (k - 1) * self.weights.len() + trim
    }

    fn solved(&self, k: usize, trim: usize) -> bool {
        self.rlen[self.index(k, trim)] != 0
    }

    /// Squared sum of `weights[left..left+len]`.
    fn segment_cost(&self, left: usize, len: usize) -> f64 {
        let sum: f64 = self.weights[left..left + len].iter().sum();
        sum * sum
    }

    /// Fill the table entry for `(k, trim)` and everything it depends on.
    fn build(&mut self, k: usize, trim: usize) {
        if self.solved(k, trim) {
            return;
        }
        let n = self.weights.len() - trim;
        let (best_rlen, best_cost) = if k == 1 {
            (n, self.segment_cost(0, n))
        } else {
            let mut best_rlen = 0;
            let mut best_cost = f64::INFINITY;
            for rlen in 1..=(n - k + 1) {
                let seg_cost = self.segment_cost(n - rlen, rlen);
                self.build(k - 1, trim + rlen);
                let rest_cost = self.cost[self.index(k - 1, trim + rlen)];
                let cost = rest_cost + seg_cost;
                if cost < best_cost {
                    best_cost = cost;
                    best_rlen = rlen;
                }
            }
            (best_rlen, best_cost)
        };
        let idx = self.index(k, trim);
        self.cost[idx] = best_cost;
        self.rlen[idx] = best_rlen;
    }

    /// Walk the solved table from `(npartitions, 0)` back to the base,
    /// emitting block sizes right to left.
    fn splits(&self, npartitions: usize) -> Vec<usize> {
        let mut splits = vec![0; npartitions];
        let mut trim = 0;
        for k in (1..=npartitions).rev() {
            assert!(self.solved(k, trim), "unsolved partition state ({k}, {trim})");
            let rlen = self.rlen[self.index(k, trim)];
            splits[k - 1] = rlen;
            trim += rlen;
        }
        splits
    }
}

/// Split `weights` into `npartitions` contiguous blocks minimizing the
/// sum of squared block totals. Returns the block sizes in order; they
/// sum to `weights.len()`.
///
/// `O(K·N²)` time and `O(K·N)` space in the weight count `N`, which is
/// the region count, far below the node count.
#[must_use]
pub fn find_partition(weights: &[f64], npartitions: usize) -> Vec<usize> {
    let nweights = weights.len();
    if npartitions == 1 {
        return vec![nweights];
    }
    if npartitions >= nweights {
        return (0..npartitions).map(|i| usize::from(i < nweights)).collect();
    }
    let mut table = PartitionTable::new(weights, npartitions);
    table.build(npartitions, 0);
    table.splits(npartitions)
}

/// Assign a zone in `[0, nzone)` to every region.
///
/// Balances by whichever quantity varies more across regions (node
/// count or edge count), sorting ascending by that key and cutting the
/// sorted sequence into `nzone` contiguous groups via [`find_partition`].
pub fn assign_zones(regions: &mut [Region], nzone: usize) {
    let node_weights: Vec<f64> = regions.iter().map(|r| f64::from(r.node_count)).collect();
    let edge_weights: Vec<f64> = regions.iter().map(|r| f64::from(r.edge_count)).collect();
    let by_edges = data_stddev(&edge_weights) > data_stddev(&node_weights);

    let key = |r: &Region| if by_edges { r.edge_count } else { r.node_count };
    regions.sort_by_key(key);
    let weights: Vec<f64> = regions.iter().map(|r| f64::from(key(r))).collect();

    let splits = find_partition(&weights, nzone);
    let mut next = 0;
    for (zone, &size) in splits.iter().enumerate() {
        for region in &mut regions[next..next + size] {
            region.zone_id = zone;
        }
        next += size;
    }
}

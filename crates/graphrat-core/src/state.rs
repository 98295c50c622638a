//! Per-worker simulation state.
//!
//! Rat and node attributes live in dense columns indexed by rat or node
//! id. Counts and weights are meaningful only at owned nodes plus the
//! imports refreshed by the boundary exchanges; slots for other nodes
//! go stale after the first batch and are never read.

use graphrat_comm::{Payload, Transport};

use crate::graph::{Graph, GraphError, ZoneLayout};
use crate::rng::RatRng;
use crate::CoreError;

/// Fraction of the rat population processed per batch, floored by √R.
const BATCH_FRACTION: f64 = 0.02;

/// Dense simulation state owned by one worker.
#[derive(Debug, Clone)]
pub struct SimState {
    pub(crate) nrat: usize,
    pub(crate) global_seed: u32,
    /// Rats per node, `R / N`.
    pub(crate) load_factor: f64,
    pub(crate) batch_size: usize,
    /// Node id for each rat.
    pub(crate) rat_position: Vec<u32>,
    /// Generator state for each rat.
    pub(crate) rat_seed: Vec<RatRng>,
    /// Rats at each node.
    pub(crate) rat_count: Vec<u32>,
    /// Move weight of each node.
    pub(crate) node_weight: Vec<f64>,
    /// Total adjacency weight of each owned node.
    pub(crate) sum_weight: Vec<f64>,
    /// Running prefix of adjacency weights, aligned with the CSR
    /// neighbor array.
    pub(crate) neighbor_accum_weight: Vec<f64>,
    /// One flag per rat, set iff this zone owns the rat. Exactly one
    /// zone has the flag set for any rat at any batch boundary.
    pub(crate) owned_rats: Vec<bool>,
    /// Per-peer outgoing migration triples `(rat, node, seed)`, reused
    /// across batches.
    pub(crate) migrants: Vec<Vec<u32>>,
}

impl SimState {
    /// Build state from initial rat positions; seeds every rat from
    /// `(global_seed, rat)`.
    pub fn new(graph: &Graph, positions: Vec<u32>, global_seed: u32) -> Result<Self, CoreError> {
        let nnode = graph.nnode();
        for &node in &positions {
            if node as usize >= nnode {
                return Err(GraphError::NodeOutOfRange { node, nnode }.into());
            }
        }
        let nrat = positions.len();
        let rpct = (BATCH_FRACTION * nrat as f64) as usize;
        let sroot = (nrat as f64).sqrt() as usize;
        let rat_seed = (0..nrat)
            .map(|r| RatRng::for_rat(global_seed, r as u32))
            .collect();
        Ok(Self {
            nrat,
            global_seed,
            load_factor: nrat as f64 / nnode as f64,
            batch_size: rpct.max(sroot),
            rat_position: positions,
            rat_seed,
            rat_count: vec![0; nnode],
            node_weight: vec![0.0; nnode],
            sum_weight: vec![0.0; nnode],
            neighbor_accum_weight: vec![0.0; nnode + graph.nedge()],
            owned_rats: vec![false; nrat],
            migrants: Vec::new(),
        })
    }

    /// Number of rats in the simulation.
    #[must_use]
    pub fn nrat(&self) -> usize {
        self.nrat
    }

    /// Rats processed between boundary exchanges,
    /// `max(0.02 * R, sqrt(R))`.
    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    #[must_use]
    pub fn load_factor(&self) -> f64 {
        self.load_factor
    }

    #[must_use]
    pub fn global_seed(&self) -> u32 {
        self.global_seed
    }

    /// Per-node rat counts (meaningful at owned and import nodes).
    #[must_use]
    pub fn rat_counts(&self) -> &[u32] {
        &self.rat_count
    }

    /// Per-rat node positions.
    #[must_use]
    pub fn rat_positions(&self) -> &[u32] {
        &self.rat_position
    }

    /// Rats currently owned by this zone.
    #[must_use]
    pub fn owned_rat_total(&self) -> usize {
        self.owned_rats.iter().filter(|&&owned| owned).count()
    }

    /// Claim the rats sitting on this zone's nodes and size the per-peer
    /// migration buffers. Run once after distribution.
    pub(crate) fn init_zone(&mut self, graph: &Graph, layout: &ZoneLayout) {
        for (rat, &node) in self.rat_position.iter().enumerate() {
            self.owned_rats[rat] = graph.zone_of(node) == layout.zone();
        }
        self.migrants = (0..graph.nzone())
            .map(|_| Vec::with_capacity(3 * self.batch_size))
            .collect();
    }

    /// Ship the rat table to every other worker; counterpart of
    /// [`SimState::receive`]. Rank 0 calls this once after reading the
    /// rat file.
    pub fn distribute<T: Transport>(&self, transport: &mut T) -> Result<(), CoreError> {
        transport.broadcast(0, Payload::Ints(vec![self.nrat as u32]))?;
        transport.broadcast(0, Payload::Ints(self.rat_position.clone()))?;
        Ok(())
    }

    /// Receive the rat table distributed by rank 0 and seed all rats
    /// locally, exactly as rank 0 did.
    pub fn receive<T: Transport>(
        graph: &Graph,
        global_seed: u32,
        transport: &mut T,
    ) -> Result<Self, CoreError> {
        let header = transport.broadcast(0, Payload::empty())?.into_ints()?;
        let &[nrat] = header.as_slice() else {
            return Err(CoreError::PayloadLength {
                what: "rat table header",
                peer: 0,
                expected: 1,
                received: header.len(),
            });
        };
        let positions = transport.broadcast(0, Payload::empty())?.into_ints()?;
        if positions.len() != nrat as usize {
            return Err(CoreError::PayloadLength {
                what: "rat table",
                peer: 0,
                expected: nrat as usize,
                received: positions.len(),
            });
        }
        Self::new(graph, positions, global_seed)
    }
}

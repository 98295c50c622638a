//! Batched move kernel, boundary exchanges, and the simulation loop.
//!
//! A step processes rats in batches. Inside a batch every owned rat
//! draws a move from the cumulative weights computed at batch start;
//! afterwards the zones run three strictly ordered exchanges (rats,
//! then node counts, then node weights) so all boundary state is consistent
//! again before the next batch. Rats are walked in ascending id order;
//! that order fixes the sequence of generator draws and therefore the
//! reproducibility of the whole run.

use graphrat_comm::{Payload, SendHandle, Tag, Transport};
use std::io;
use std::time::Instant;
use tracing::info;

use crate::graph::{Graph, ZoneLayout};
use crate::instrument::{Activity, ActivityTimer};
use crate::rng::RatRng;
use crate::state::SimState;
use crate::stats::{imbalance, mweight};
use crate::CoreError;

/// Base ideal load factor; a node's target crowding before the
/// neighbor-imbalance correction.
pub const BASE_ILF: f64 = 1.75;

/// Adjacency lists at or below this length are scanned linearly.
const BINARY_THRESHOLD: usize = 4;

/// Display seam consuming the per-step state of the simulation.
///
/// Zone 0 drives a real sink; every other zone (and quiet mode) uses
/// [`NullSink`].
pub trait StepSink {
    /// A simulation step finished. `counts` carries per-node rat counts
    /// on display ticks and is `None` in between.
    fn on_step(
        &mut self,
        width: u32,
        height: u32,
        nrat: usize,
        counts: Option<&[u32]>,
    ) -> io::Result<()>;

    /// The simulation is over (or aborting).
    fn on_done(&mut self) -> io::Result<()>;
}

/// Sink that discards every frame.
#[derive(Debug, Default)]
pub struct NullSink;

impl StepSink for NullSink {
    fn on_step(
        &mut self,
        _width: u32,
        _height: u32,
        _nrat: usize,
        _counts: Option<&[u32]>,
    ) -> io::Result<()> {
        Ok(())
    }

    fn on_done(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn locate_linear(target: f64, list: &[f64]) -> Option<usize> {
    list.iter().position(|&v| target < v)
}

/// Smallest index `i` with `target < list[i]`, for a non-decreasing
/// `list` and `target < list[len-1]`. Binary search narrows the window
/// until it is shorter than the linear threshold; the strictly-less
/// comparison routes equal cumulative weights to the earlier index.
#[must_use]
pub fn locate_value(target: f64, list: &[f64]) -> Option<usize> {
    if list.is_empty() {
        return None;
    }
    let mut left = 0;
    let mut right = list.len() - 1;
    while left < right {
        if right - left + 1 < BINARY_THRESHOLD {
            return locate_linear(target, &list[left..=right]).map(|i| left + i);
        }
        let mid = left + (right - left) / 2;
        if target < list[mid] {
            right = mid;
        } else {
            left = mid + 1;
        }
    }
    Some(right)
}

/// Ideal load factor of a node: the base plus half the mean imbalance
/// against its real neighbors. An isolated node keeps the base.
fn neighbor_ilf(graph: &Graph, rat_count: &[u32], nid: u32) -> f64 {
    let neighbors = &graph.neighbors(nid)[1..];
    if neighbors.is_empty() {
        return BASE_ILF;
    }
    let lcount = rat_count[nid as usize];
    let sum: f64 = neighbors
        .iter()
        .map(|&other| imbalance(lcount, rat_count[other as usize]))
        .sum();
    BASE_ILF + 0.5 * (sum / neighbors.len() as f64)
}

/// Move weight of a node under the current census.
fn compute_weight(graph: &Graph, state: &SimState, nid: u32) -> f64 {
    let count = state.rat_count[nid as usize];
    let ilf = neighbor_ilf(graph, &state.rat_count, nid);
    mweight(f64::from(count) / state.load_factor, ilf)
}

/// One zone's simulation worker: the graph, the zone's boundary
/// structure, the rat state, and the transport to its peers.
#[derive(Debug)]
pub struct Worker<T: Transport> {
    graph: Graph,
    layout: ZoneLayout,
    state: SimState,
    transport: T,
    /// Peers sharing at least one boundary edge with this zone, cached
    /// from the layout.
    boundary: Vec<usize>,
    timer: ActivityTimer,
}

impl<T: Transport> Worker<T> {
    /// Set up the worker for the transport's rank: derive the zone
    /// layout and claim the rats resident in this zone.
    #[must_use]
    pub fn new(graph: Graph, mut state: SimState, transport: T, timer: ActivityTimer) -> Self {
        let layout = graph.zone_layout(transport.rank());
        state.init_zone(&graph, &layout);
        let boundary = layout.boundary_peers();
        Self {
            graph,
            layout,
            state,
            transport,
            boundary,
            timer,
        }
    }

    #[must_use]
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    #[must_use]
    pub fn layout(&self) -> &ZoneLayout {
        &self.layout
    }

    #[must_use]
    pub fn state(&self) -> &SimState {
        &self.state
    }

    /// Log this worker's accumulated activity times.
    pub fn report_activity(&mut self) {
        self.timer.report(
            self.layout.zone(),
            self.layout.local_nodes().len(),
            self.layout.local_edge_count(),
        );
    }

    /// Rebuild every node count from rat positions. Runs once before
    /// the first step, when every zone still holds the full rat table.
    pub(crate) fn take_census(&mut self) {
        self.state.rat_count.fill(0);
        for i in 0..self.state.rat_position.len() {
            let node = self.state.rat_position[i];
            self.state.rat_count[node as usize] += 1;
        }
    }

    /// Recompute the weight of every node. Valid only while the census
    /// is complete on this zone, i.e. at simulation start.
    pub(crate) fn compute_all_weights(&mut self) {
        self.timer.start(Activity::ComputeWeights);
        for nid in 0..self.graph.nnode() as u32 {
            let weight = compute_weight(&self.graph, &self.state, nid);
            self.state.node_weight[nid as usize] = weight;
        }
        self.timer.finish(Activity::ComputeWeights);
    }

    /// Recompute the weight of every owned node. Import-node weights
    /// are never computed here; their owners ship them each batch.
    fn compute_zone_weights(&mut self) {
        self.timer.start(Activity::ComputeWeights);
        for i in 0..self.layout.local_nodes().len() {
            let nid = self.layout.local_nodes()[i];
            let weight = compute_weight(&self.graph, &self.state, nid);
            self.state.node_weight[nid as usize] = weight;
        }
        self.timer.finish(Activity::ComputeWeights);
    }

    /// For every owned node, total its adjacency weights and fill the
    /// running prefix used by move sampling. Requires `node_weight` to
    /// be current at the node and all of its neighbors.
    fn find_all_sums(&mut self) {
        self.timer.start(Activity::ComputeSums);
        for i in 0..self.layout.local_nodes().len() {
            let nid = self.layout.local_nodes()[i];
            let start = self.graph.adjacency_range(nid).start;
            let mut sum = 0.0;
            for (k, &other) in self.graph.neighbors(nid).iter().enumerate() {
                sum += self.state.node_weight[other as usize];
                self.state.neighbor_accum_weight[start + k] = sum;
            }
            self.state.sum_weight[nid as usize] = sum;
        }
        self.timer.finish(Activity::ComputeSums);
    }

    /// Process one batch of rat ids: move every owned rat, then run the
    /// three boundary exchanges in their fixed order.
    fn do_batch(&mut self, bstart: usize, bcount: usize) -> Result<(), CoreError> {
        self.find_all_sums();
        for buffer in &mut self.state.migrants {
            buffer.clear();
        }

        self.timer.start(Activity::FindMoves);
        let this_zone = self.layout.zone();
        for rat in bstart..bstart + bcount {
            if !self.state.owned_rats[rat] {
                continue;
            }
            let current = self.state.rat_position[rat];
            let total = self.state.sum_weight[current as usize];
            let target = self.state.rat_seed[rat].next_float(total);
            let range = self.graph.adjacency_range(current);
            let offset = locate_value(target, &self.state.neighbor_accum_weight[range])
                .ok_or(CoreError::MoveNotFound {
                    rat: rat as u32,
                    node: current,
                })?;
            let next_node = self.graph.neighbor_at(current, offset);
            let next_zone = self.graph.zone_of(next_node);
            if next_zone == this_zone {
                self.state.rat_position[rat] = next_node;
                self.state.rat_count[current as usize] -= 1;
                self.state.rat_count[next_node as usize] += 1;
            } else {
                self.state.rat_count[current as usize] -= 1;
                self.state.owned_rats[rat] = false;
                let seed = self.state.rat_seed[rat].raw();
                self.state.migrants[next_zone].extend_from_slice(&[rat as u32, next_node, seed]);
            }
        }
        self.timer.finish(Activity::FindMoves);

        self.exchange_rats()?;
        self.exchange_node_counts()?;
        self.compute_zone_weights();
        self.exchange_node_weights()?;
        Ok(())
    }

    /// Hand migrating rats to their new owners. The payload to each
    /// boundary peer is a flat array of `(rat, node, seed)` triples;
    /// receivers probe for the actual length, which may be zero for a
    /// quiet batch.
    fn exchange_rats(&mut self) -> Result<(), CoreError> {
        self.timer.start(Activity::LocalComm);
        let mut pending = Vec::with_capacity(self.boundary.len());
        for i in 0..self.boundary.len() {
            let peer = self.boundary[i];
            let payload = Payload::Ints(self.state.migrants[peer].clone());
            pending.push(self.transport.isend(peer, Tag::Migrate, payload)?);
        }
        for i in 0..self.boundary.len() {
            let peer = self.boundary[i];
            let incoming = self.transport.probe(peer, Tag::Migrate)?;
            if incoming % 3 != 0 {
                return Err(CoreError::PayloadLength {
                    what: "rat migration",
                    peer,
                    expected: incoming / 3 * 3,
                    received: incoming,
                });
            }
            let data = self.transport.recv(peer, Tag::Migrate)?.into_ints()?;
            for triple in data.chunks_exact(3) {
                let (rat, node, seed) = (triple[0] as usize, triple[1], triple[2]);
                self.state.rat_position[rat] = node;
                self.state.rat_count[node as usize] += 1;
                self.state.rat_seed[rat] = RatRng::from_raw(seed);
                self.state.owned_rats[rat] = true;
            }
        }
        self.wait_all(pending)?;
        self.timer.finish(Activity::LocalComm);
        Ok(())
    }

    /// Ship current counts for export nodes; overwrite counts at import
    /// nodes. Payloads are in list order on both sides, which agree
    /// because each export list equals the peer's import list.
    fn exchange_node_counts(&mut self) -> Result<(), CoreError> {
        self.timer.start(Activity::LocalComm);
        let mut pending = Vec::with_capacity(self.boundary.len());
        for i in 0..self.boundary.len() {
            let peer = self.boundary[i];
            let counts: Vec<u32> = self
                .layout
                .exports(peer)
                .iter()
                .map(|&nid| self.state.rat_count[nid as usize])
                .collect();
            pending.push(self.transport.isend(peer, Tag::Counts, Payload::Ints(counts))?);
        }
        for i in 0..self.boundary.len() {
            let peer = self.boundary[i];
            let data = self.transport.recv(peer, Tag::Counts)?.into_ints()?;
            let imports = self.layout.imports(peer);
            if data.len() != imports.len() {
                return Err(CoreError::PayloadLength {
                    what: "node counts",
                    peer,
                    expected: imports.len(),
                    received: data.len(),
                });
            }
            for (&nid, &count) in imports.iter().zip(&data) {
                self.state.rat_count[nid as usize] = count;
            }
        }
        self.wait_all(pending)?;
        self.timer.finish(Activity::LocalComm);
        Ok(())
    }

    /// Same shape as the count exchange, carrying node weights.
    fn exchange_node_weights(&mut self) -> Result<(), CoreError> {
        self.timer.start(Activity::LocalComm);
        let mut pending = Vec::with_capacity(self.boundary.len());
        for i in 0..self.boundary.len() {
            let peer = self.boundary[i];
            let weights: Vec<f64> = self
                .layout
                .exports(peer)
                .iter()
                .map(|&nid| self.state.node_weight[nid as usize])
                .collect();
            pending.push(
                self.transport
                    .isend(peer, Tag::Weights, Payload::Floats(weights))?,
            );
        }
        for i in 0..self.boundary.len() {
            let peer = self.boundary[i];
            let data = self.transport.recv(peer, Tag::Weights)?.into_floats()?;
            let imports = self.layout.imports(peer);
            if data.len() != imports.len() {
                return Err(CoreError::PayloadLength {
                    what: "node weights",
                    peer,
                    expected: imports.len(),
                    received: data.len(),
                });
            }
            for (&nid, &weight) in imports.iter().zip(&data) {
                self.state.node_weight[nid as usize] = weight;
            }
        }
        self.wait_all(pending)?;
        self.timer.finish(Activity::LocalComm);
        Ok(())
    }

    fn wait_all(&mut self, pending: Vec<SendHandle>) -> Result<(), CoreError> {
        for handle in pending {
            self.transport.wait(handle)?;
        }
        Ok(())
    }

    /// Rank 0 only: pull every peer's owned-node counts in before a
    /// display tick.
    fn gather_node_state(&mut self) -> Result<(), CoreError> {
        self.timer.start(Activity::GlobalComm);
        for peer in 1..self.transport.zones() {
            let data = self.transport.recv(peer, Tag::NodeState)?.into_ints()?;
            if data.len() % 2 != 0 {
                return Err(CoreError::PayloadLength {
                    what: "node state",
                    peer,
                    expected: data.len() / 2 * 2,
                    received: data.len(),
                });
            }
            for pair in data.chunks_exact(2) {
                self.state.rat_count[pair[0] as usize] = pair[1];
            }
        }
        self.timer.finish(Activity::GlobalComm);
        Ok(())
    }

    /// Non-zero ranks: ship `(node, count)` pairs for the owned nodes
    /// to rank 0 for display.
    fn send_node_state(&mut self) -> Result<(), CoreError> {
        self.timer.start(Activity::GlobalComm);
        let mut payload = Vec::with_capacity(2 * self.layout.local_nodes().len());
        for i in 0..self.layout.local_nodes().len() {
            let nid = self.layout.local_nodes()[i];
            payload.push(nid);
            payload.push(self.state.rat_count[nid as usize]);
        }
        let handle = self.transport.isend(0, Tag::NodeState, Payload::Ints(payload))?;
        self.transport.wait(handle)?;
        self.timer.finish(Activity::GlobalComm);
        Ok(())
    }

    /// Run one simulation step: batches covering every rat id.
    fn step(&mut self) -> Result<(), CoreError> {
        let mut bstart = 0;
        while bstart < self.state.nrat {
            let bcount = (self.state.nrat - bstart).min(self.state.batch_size);
            self.do_batch(bstart, bcount)?;
            bstart += bcount;
        }
        Ok(())
    }

    /// Run the simulation for `steps` steps, emitting a frame per step
    /// when `display` is set (counts every `dinterval` steps and on the
    /// final step). Returns elapsed wall-clock seconds.
    pub fn simulate(
        &mut self,
        steps: u32,
        dinterval: u32,
        display: bool,
        sink: &mut dyn StepSink,
    ) -> Result<f64, CoreError> {
        let dinterval = dinterval.max(1);
        let started = Instant::now();
        let master = self.transport.rank() == 0;
        let width = self.graph.width();
        let height = self.graph.height();

        self.take_census();
        self.compute_all_weights();
        if display && master {
            let counts = self.state.rat_count.as_slice();
            sink.on_step(width, height, self.state.nrat, Some(counts))?;
        }

        for i in 0..steps {
            self.step()?;
            if !display {
                continue;
            }
            let show_counts = (i + 1) % dinterval == 0 || i + 1 == steps;
            if master {
                if show_counts && self.transport.zones() > 1 {
                    self.gather_node_state()?;
                }
                let counts = show_counts.then_some(self.state.rat_count.as_slice());
                sink.on_step(width, height, self.state.nrat, counts)?;
            } else if show_counts {
                self.send_node_state()?;
            }
        }

        let elapsed = started.elapsed().as_secs_f64();
        sink.on_done()?;
        if master {
            info!(
                steps,
                rats = self.state.nrat,
                seconds = elapsed,
                "simulation finished"
            );
        }
        Ok(elapsed)
    }
}

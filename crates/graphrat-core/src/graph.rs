//! Grid graph representation and per-zone boundary derivation.
//!
//! Adjacency is CSR over two parallel arrays (`neighbor_start`,
//! `neighbor`). Every node's adjacency list begins with an explicit
//! self-edge, so the list is never empty and weight/sum indexing needs
//! no special case.

use graphrat_comm::{Payload, Transport};
use serde::{Deserialize, Serialize};
use std::ops::Range;
use thiserror::Error;
use tracing::debug;

use crate::partition::assign_zones;
use crate::CoreError;

/// Errors raised while building a graph or assigning zones.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    /// Edges must arrive sorted lexicographically by `(head, tail)`.
    #[error("edge ({head}, {tail}) arrived out of order")]
    EdgeOutOfOrder { head: u32, tail: u32 },

    /// A node id at or beyond the grid's node count.
    #[error("node id {node} outside [0, {nnode})")]
    NodeOutOfRange { node: u32, nnode: usize },

    /// The edge stream did not match the declared edge count.
    #[error("declared {declared} edges, received {received}")]
    EdgeCountMismatch { declared: usize, received: usize },

    /// A region rectangle extends past the grid.
    #[error("region {region} leaves the {width}x{height} grid")]
    RegionOutOfBounds {
        region: usize,
        width: u32,
        height: u32,
    },

    /// The partitioner produced a zone id outside `[0, zones)`.
    #[error("region {region} assigned zone {zone} outside [0, {zones})")]
    ZoneOutOfRange {
        region: usize,
        zone: usize,
        zones: usize,
    },
}

/// Rectangular block of grid nodes declared in the graph file; the unit
/// of work handed out by the partitioner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub id: usize,
    /// Left X of the rectangle.
    pub x: u32,
    /// Upper Y of the rectangle.
    pub y: u32,
    pub w: u32,
    pub h: u32,
    pub node_count: u32,
    /// Directed edges (self-edges included) over the rectangle's nodes.
    pub edge_count: u32,
    /// Zone assigned by the partitioner.
    pub zone_id: usize,
}

impl Region {
    /// Declare a region; node and edge counts are filled in when the
    /// region is applied to a graph.
    #[must_use]
    pub fn new(id: usize, x: u32, y: u32, w: u32, h: u32) -> Self {
        Self {
            id,
            x,
            y,
            w,
            h,
            node_count: w * h,
            edge_count: 0,
            zone_id: 0,
        }
    }
}

/// Immutable grid graph with CSR adjacency and per-node zone ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Graph {
    width: u32,
    height: u32,
    nedge: usize,
    nzone: usize,
    neighbor: Vec<u32>,
    neighbor_start: Vec<u32>,
    zone_id: Vec<u32>,
}

impl Graph {
    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Number of nodes, `width * height`.
    #[must_use]
    pub fn nnode(&self) -> usize {
        (self.width * self.height) as usize
    }

    /// Number of input edges (self-edges not counted).
    #[must_use]
    pub fn nedge(&self) -> usize {
        self.nedge
    }

    /// Number of zones the node set is partitioned into.
    #[must_use]
    pub fn nzone(&self) -> usize {
        self.nzone
    }

    /// Node id at grid coordinates, row-major.
    #[must_use]
    pub fn node_at(&self, x: u32, y: u32) -> u32 {
        y * self.width + x
    }

    /// Positions of `node`'s adjacency list within [`Self::neighbors`]'
    /// backing array; shared by the cumulative-weight array.
    #[must_use]
    pub fn adjacency_range(&self, node: u32) -> Range<usize> {
        let n = node as usize;
        self.neighbor_start[n] as usize..self.neighbor_start[n + 1] as usize
    }

    /// Adjacency list of `node`, self-edge first.
    #[must_use]
    pub fn neighbors(&self, node: u32) -> &[u32] {
        &self.neighbor[self.adjacency_range(node)]
    }

    /// Neighbor at offset `k` of `node`'s adjacency list.
    #[must_use]
    pub fn neighbor_at(&self, node: u32, k: usize) -> u32 {
        self.neighbor[self.adjacency_range(node).start + k]
    }

    /// Zone owning `node`.
    #[must_use]
    pub fn zone_of(&self, node: u32) -> usize {
        self.zone_id[node as usize] as usize
    }

    /// Compute region node/edge counts, hand regions to the partitioner,
    /// and stamp each region's zone onto its nodes.
    pub fn apply_regions(&mut self, regions: &mut [Region]) -> Result<(), GraphError> {
        for region in regions.iter_mut() {
            if u64::from(region.x) + u64::from(region.w) > u64::from(self.width)
                || u64::from(region.y) + u64::from(region.h) > u64::from(self.height)
            {
                return Err(GraphError::RegionOutOfBounds {
                    region: region.id,
                    width: self.width,
                    height: self.height,
                });
            }
            region.node_count = region.w * region.h;
            let mut edge_count = 0;
            for dx in region.x..region.x + region.w {
                for dy in region.y..region.y + region.h {
                    edge_count += self.adjacency_range(self.node_at(dx, dy)).len() as u32;
                }
            }
            region.edge_count = edge_count;
        }
        assign_zones(regions, self.nzone);
        for region in regions.iter() {
            if region.zone_id >= self.nzone {
                return Err(GraphError::ZoneOutOfRange {
                    region: region.id,
                    zone: region.zone_id,
                    zones: self.nzone,
                });
            }
            for dx in region.x..region.x + region.w {
                for dy in region.y..region.y + region.h {
                    let nid = self.node_at(dx, dy);
                    self.zone_id[nid as usize] = region.zone_id as u32;
                }
            }
        }
        Ok(())
    }

    /// Derive the boundary structure one zone's worker needs.
    ///
    /// Two passes over adjacency: the first collects the owned node list
    /// and per-peer import counts, the second materializes the import
    /// and export lists. Import lists are sorted ascending afterwards;
    /// export lists come out sorted because the owned walk is ascending.
    #[must_use]
    pub fn zone_layout(&self, this_zone: usize) -> ZoneLayout {
        let nnode = self.nnode();
        let nzone = self.nzone;
        let mut local_nodes = Vec::new();
        let mut local_edge_count = 0;
        let mut import_count = vec![0usize; nzone];
        let mut seen = vec![false; nnode];

        for nid in 0..nnode as u32 {
            if self.zone_of(nid) != this_zone {
                continue;
            }
            local_nodes.push(nid);
            local_edge_count += self.adjacency_range(nid).len();
            for &other in &self.neighbors(nid)[1..] {
                let zid = self.zone_of(other);
                if zid != this_zone && !seen[other as usize] {
                    import_count[zid] += 1;
                    seen[other as usize] = true;
                }
            }
        }

        let mut imports: Vec<Vec<u32>> = import_count
            .iter()
            .map(|&count| Vec::with_capacity(count))
            .collect();
        let mut exports: Vec<Vec<u32>> = vec![Vec::new(); nzone];
        seen.fill(false);
        for &nid in &local_nodes {
            for &other in &self.neighbors(nid)[1..] {
                let zid = self.zone_of(other);
                if zid == this_zone {
                    continue;
                }
                if !seen[other as usize] {
                    imports[zid].push(other);
                    seen[other as usize] = true;
                }
                // Appended at most once per peer while this node is the
                // one being walked.
                if exports[zid].last() != Some(&nid) {
                    exports[zid].push(nid);
                }
            }
        }
        for list in &mut imports {
            list.sort_unstable();
        }

        debug!(
            zone = this_zone,
            nodes = local_nodes.len(),
            edges = local_edge_count,
            "derived zone layout"
        );
        ZoneLayout {
            zone: this_zone,
            local_nodes,
            local_edge_count,
            exports,
            imports,
        }
    }

    /// Ship the graph to every other worker. Counterpart of
    /// [`Graph::receive`]; rank 0 calls this once at startup.
    pub fn broadcast<T: Transport>(&self, transport: &mut T) -> Result<(), CoreError> {
        let params = vec![
            self.width,
            self.height,
            self.nedge as u32,
            self.nzone as u32,
        ];
        transport.broadcast(0, Payload::Ints(params))?;
        transport.broadcast(0, Payload::Ints(self.neighbor.clone()))?;
        transport.broadcast(0, Payload::Ints(self.neighbor_start.clone()))?;
        transport.broadcast(0, Payload::Ints(self.zone_id.clone()))?;
        Ok(())
    }

    /// Receive the graph distributed by rank 0.
    pub fn receive<T: Transport>(transport: &mut T) -> Result<Self, CoreError> {
        let params = transport.broadcast(0, Payload::empty())?.into_ints()?;
        let &[width, height, nedge, nzone] = params.as_slice() else {
            return Err(CoreError::PayloadLength {
                what: "graph parameters",
                peer: 0,
                expected: 4,
                received: params.len(),
            });
        };
        let nnode = (width * height) as usize;
        let nedge = nedge as usize;

        let neighbor = transport.broadcast(0, Payload::empty())?.into_ints()?;
        let expect = |what, expected: usize, received: usize| {
            if expected == received {
                Ok(())
            } else {
                Err(CoreError::PayloadLength {
                    what,
                    peer: 0,
                    expected,
                    received,
                })
            }
        };
        expect("graph adjacency", nnode + nedge, neighbor.len())?;
        let neighbor_start = transport.broadcast(0, Payload::empty())?.into_ints()?;
        expect("graph adjacency starts", nnode + 1, neighbor_start.len())?;
        let zone_id = transport.broadcast(0, Payload::empty())?.into_ints()?;
        expect("graph zone ids", nnode, zone_id.len())?;

        Ok(Self {
            width,
            height,
            nedge,
            nzone: nzone as usize,
            neighbor,
            neighbor_start,
            zone_id,
        })
    }
}

/// Incremental CSR construction from a sorted edge stream.
///
/// Edges must arrive sorted lexicographically by `(head, tail)` with
/// both directions present. The builder prepends each node's self-edge
/// when the node's run begins and fills trailing isolated nodes at
/// finish time.
#[derive(Debug)]
pub struct GraphBuilder {
    width: u32,
    height: u32,
    nedge: usize,
    nzone: usize,
    neighbor: Vec<u32>,
    neighbor_start: Vec<u32>,
    /// Nodes whose adjacency run (and self-edge) has been opened.
    started: u32,
    received: usize,
    last_edge: Option<(u32, u32)>,
}

impl GraphBuilder {
    /// Start a graph over a `width` x `height` grid expecting `nedge`
    /// input edges, to be partitioned into `nzone` zones.
    #[must_use]
    pub fn new(width: u32, height: u32, nedge: usize, nzone: usize) -> Self {
        let nnode = (width * height) as usize;
        Self {
            width,
            height,
            nedge,
            nzone,
            neighbor: Vec::with_capacity(nnode + nedge),
            neighbor_start: Vec::with_capacity(nnode + 1),
            started: 0,
            received: 0,
            last_edge: None,
        }
    }

    fn nnode(&self) -> usize {
        (self.width * self.height) as usize
    }

    /// Open adjacency runs (self-edge first) for every node up to and
    /// including `node`.
    fn open_through(&mut self, node: u32) {
        while self.started <= node {
            self.neighbor_start.push(self.neighbor.len() as u32);
            self.neighbor.push(self.started);
            self.started += 1;
        }
    }

    /// Append the next directed edge of the sorted stream.
    pub fn push_edge(&mut self, head: u32, tail: u32) -> Result<(), GraphError> {
        let nnode = self.nnode();
        for node in [head, tail] {
            if node as usize >= nnode {
                return Err(GraphError::NodeOutOfRange { node, nnode });
            }
        }
        if self.received == self.nedge {
            return Err(GraphError::EdgeCountMismatch {
                declared: self.nedge,
                received: self.received + 1,
            });
        }
        if let Some(last) = self.last_edge {
            if (head, tail) <= last {
                return Err(GraphError::EdgeOutOfOrder { head, tail });
            }
        }
        self.last_edge = Some((head, tail));
        self.open_through(head);
        self.neighbor.push(tail);
        self.received += 1;
        Ok(())
    }

    /// Close the CSR arrays and produce the graph (all nodes zone 0
    /// until regions are applied).
    pub fn finish(mut self) -> Result<Graph, GraphError> {
        if self.received != self.nedge {
            return Err(GraphError::EdgeCountMismatch {
                declared: self.nedge,
                received: self.received,
            });
        }
        let nnode = self.nnode();
        if nnode > 0 {
            self.open_through(nnode as u32 - 1);
        }
        self.neighbor_start.push(self.neighbor.len() as u32);
        Ok(Graph {
            width: self.width,
            height: self.height,
            nedge: self.nedge,
            nzone: self.nzone,
            neighbor: self.neighbor,
            neighbor_start: self.neighbor_start,
            zone_id: vec![0; nnode],
        })
    }
}

/// Boundary structure a worker derives for its zone: the owned node
/// list plus, per peer, the owned nodes it must export state for and
/// the peer nodes it observes as imports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneLayout {
    zone: usize,
    local_nodes: Vec<u32>,
    local_edge_count: usize,
    exports: Vec<Vec<u32>>,
    imports: Vec<Vec<u32>>,
}

impl ZoneLayout {
    /// Zone this layout was derived for.
    #[must_use]
    pub fn zone(&self) -> usize {
        self.zone
    }

    /// Owned nodes, ascending by id.
    #[must_use]
    pub fn local_nodes(&self) -> &[u32] {
        &self.local_nodes
    }

    /// Directed edges (self-edges included) over the owned nodes.
    #[must_use]
    pub fn local_edge_count(&self) -> usize {
        self.local_edge_count
    }

    /// Owned nodes with at least one neighbor in `peer`, ascending.
    #[must_use]
    pub fn exports(&self, peer: usize) -> &[u32] {
        &self.exports[peer]
    }

    /// Nodes of `peer` neighboring an owned node, ascending.
    #[must_use]
    pub fn imports(&self, peer: usize) -> &[u32] {
        &self.imports[peer]
    }

    /// Peers this zone exchanges boundary state with. A peer sharing an
    /// edge always appears in both directions, so one side's emptiness
    /// implies the other's.
    #[must_use]
    pub fn boundary_peers(&self) -> Vec<usize> {
        (0..self.exports.len())
            .filter(|&z| z != self.zone && !(self.exports[z].is_empty() && self.imports[z].is_empty()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::grid_graph;
    use graphrat_comm::ChannelMesh;
    use std::thread;

    #[test]
    fn adjacency_lists_start_with_self_edge() {
        let g = grid_graph(3, 3, 1);
        assert_eq!(g.nnode(), 9);
        for nid in 0..9 {
            assert_eq!(g.neighbors(nid)[0], nid);
        }
        // Center node sees all four neighbors after itself.
        assert_eq!(g.neighbors(4), &[4, 1, 3, 5, 7]);
        // Corner node sees two.
        assert_eq!(g.neighbors(0), &[0, 1, 3]);
    }

    #[test]
    fn isolated_nodes_carry_only_the_self_edge() {
        let builder = GraphBuilder::new(2, 2, 0, 1);
        let g = builder.finish().unwrap();
        for nid in 0..4 {
            assert_eq!(g.neighbors(nid), &[nid]);
        }
        assert_eq!(g.adjacency_range(3), 3..4);
    }

    #[test]
    fn out_of_order_edges_are_fatal() {
        let mut builder = GraphBuilder::new(2, 2, 4, 1);
        builder.push_edge(0, 1).unwrap();
        builder.push_edge(0, 2).unwrap();
        assert_eq!(
            builder.push_edge(0, 1),
            Err(GraphError::EdgeOutOfOrder { head: 0, tail: 1 })
        );
        let mut builder = GraphBuilder::new(2, 2, 4, 1);
        builder.push_edge(1, 0).unwrap();
        assert_eq!(
            builder.push_edge(0, 1),
            Err(GraphError::EdgeOutOfOrder { head: 0, tail: 1 })
        );
    }

    #[test]
    fn out_of_range_node_is_fatal() {
        let mut builder = GraphBuilder::new(2, 2, 1, 1);
        assert_eq!(
            builder.push_edge(0, 4),
            Err(GraphError::NodeOutOfRange { node: 4, nnode: 4 })
        );
    }

    #[test]
    fn edge_count_mismatch_is_fatal() {
        let mut builder = GraphBuilder::new(2, 2, 2, 1);
        builder.push_edge(0, 1).unwrap();
        assert_eq!(
            builder.finish().unwrap_err(),
            GraphError::EdgeCountMismatch {
                declared: 2,
                received: 1
            }
        );
    }

    #[test]
    fn regions_stamp_zones_onto_nodes() {
        let mut g = grid_graph(2, 2, 2);
        let mut regions = vec![Region::new(0, 0, 0, 1, 2), Region::new(1, 1, 0, 1, 2)];
        g.apply_regions(&mut regions).unwrap();
        for r in &regions {
            assert_eq!(r.node_count, 2);
            // Each node of a 2x2 grid has two neighbors plus itself.
            assert_eq!(r.edge_count, 6);
        }
        let zones: Vec<usize> = (0..4).map(|n| g.zone_of(n)).collect();
        // Columns land in distinct zones.
        assert_eq!(zones[0], zones[2]);
        assert_eq!(zones[1], zones[3]);
        assert_ne!(zones[0], zones[1]);
    }

    #[test]
    fn region_outside_grid_is_fatal() {
        let mut g = grid_graph(2, 2, 1);
        let mut regions = vec![Region::new(0, 1, 1, 2, 1)];
        assert_eq!(
            g.apply_regions(&mut regions),
            Err(GraphError::RegionOutOfBounds {
                region: 0,
                width: 2,
                height: 2
            })
        );
    }

    #[test]
    fn opposing_columns_see_each_other_across_the_boundary() {
        let mut g = grid_graph(2, 2, 2);
        let mut regions = vec![Region::new(0, 0, 0, 1, 2), Region::new(1, 1, 0, 1, 2)];
        g.apply_regions(&mut regions).unwrap();
        let zone_of_col0 = g.zone_of(0);
        let other = 1 - zone_of_col0;

        let a = g.zone_layout(zone_of_col0);
        let b = g.zone_layout(other);
        assert_eq!(a.local_nodes(), &[0, 2]);
        assert_eq!(b.local_nodes(), &[1, 3]);
        assert_eq!(a.imports(other), &[1, 3]);
        assert_eq!(b.imports(zone_of_col0), &[0, 2]);
        assert_eq!(a.exports(other), b.imports(zone_of_col0));
        assert_eq!(b.exports(zone_of_col0), a.imports(other));
        assert_eq!(a.boundary_peers(), vec![other]);
    }

    #[test]
    fn layouts_partition_the_node_set() {
        let mut g = grid_graph(6, 6, 3);
        let mut regions: Vec<Region> =
            (0..6).map(|row| Region::new(row as usize, 0, row, 6, 1)).collect();
        g.apply_regions(&mut regions).unwrap();

        let layouts: Vec<ZoneLayout> = (0..3).map(|z| g.zone_layout(z)).collect();
        let mut covered = vec![0u32; g.nnode()];
        for layout in &layouts {
            assert!(layout.local_nodes().windows(2).all(|w| w[0] < w[1]));
            for &n in layout.local_nodes() {
                covered[n as usize] += 1;
            }
        }
        assert!(covered.iter().all(|&c| c == 1), "each node owned exactly once");

        for a in &layouts {
            for b in &layouts {
                if a.zone() == b.zone() {
                    continue;
                }
                assert_eq!(a.exports(b.zone()), b.imports(a.zone()));
                let mut dedup = a.exports(b.zone()).to_vec();
                dedup.dedup();
                assert_eq!(dedup.len(), a.exports(b.zone()).len());
            }
        }
    }

    #[test]
    fn graph_survives_broadcast() {
        let mut g = grid_graph(4, 4, 2);
        let mut regions = vec![Region::new(0, 0, 0, 4, 2), Region::new(1, 0, 2, 4, 2)];
        g.apply_regions(&mut regions).unwrap();

        let mut endpoints = ChannelMesh::build(2);
        let mut follower = endpoints.pop().unwrap();
        let mut root = endpoints.pop().unwrap();
        let sent = g.clone();
        let sender = thread::spawn(move || {
            sent.broadcast(&mut root).unwrap();
        });
        let received = Graph::receive(&mut follower).unwrap();
        sender.join().unwrap();
        assert_eq!(received, g);
    }
}

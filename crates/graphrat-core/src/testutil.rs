//! Shared fixtures for unit tests.

use crate::graph::{Graph, GraphBuilder};

/// Directed edge stream of a full `width` x `height` grid with
/// 4-neighbor connectivity, sorted the way graph files are.
pub(crate) fn grid_edges(width: u32, height: u32) -> Vec<(u32, u32)> {
    let mut edges = Vec::new();
    for y in 0..height {
        for x in 0..width {
            let nid = y * width + x;
            if y > 0 {
                edges.push((nid, nid - width));
            }
            if x > 0 {
                edges.push((nid, nid - 1));
            }
            if x + 1 < width {
                edges.push((nid, nid + 1));
            }
            if y + 1 < height {
                edges.push((nid, nid + width));
            }
        }
    }
    edges
}

/// Full grid graph over `nzone` zones (all nodes in zone 0 until
/// regions are applied).
pub(crate) fn grid_graph(width: u32, height: u32, nzone: usize) -> Graph {
    let edges = grid_edges(width, height);
    let mut builder = GraphBuilder::new(width, height, edges.len(), nzone);
    for (head, tail) in edges {
        builder.push_edge(head, tail).unwrap();
    }
    builder.finish().unwrap()
}

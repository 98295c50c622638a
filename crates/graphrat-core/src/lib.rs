//! Core simulation engine for the graphrat workspace.
//!
//! A population of rats performs crowding-biased random walks on a grid
//! graph. The graph is split into zones, one single-threaded worker per
//! zone; workers keep each other consistent by exchanging boundary rats,
//! counts, and weights through a [`graphrat_comm::Transport`] every batch.

use graphrat_comm::CommError;
use thiserror::Error;

pub mod graph;
pub mod instrument;
pub mod partition;
pub mod rng;
pub mod sim;
pub mod state;
pub mod stats;
#[cfg(test)]
pub(crate) mod testutil;

pub use graph::{Graph, GraphBuilder, GraphError, Region, ZoneLayout};
pub use instrument::{Activity, ActivityTimer};
pub use partition::{assign_zones, find_partition};
pub use rng::{RatRng, DEFAULT_GLOBAL_SEED};
pub use sim::{locate_value, NullSink, StepSink, Worker};
pub use state::SimState;

/// Fatal engine error. Every variant terminates the run; there is no
/// retry or partial-state recovery.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Graph construction or zone assignment violated an invariant.
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// The message-passing layer reported a non-recoverable failure.
    #[error("transport failure: {0}")]
    Transport(#[from] CommError),

    /// A peer shipped a payload whose element count does not match the
    /// boundary lists both sides derived from the shared graph.
    #[error("{what} payload from zone {peer}: expected {expected} elements, received {received}")]
    PayloadLength {
        what: &'static str,
        peer: usize,
        expected: usize,
        received: usize,
    },

    /// Weighted sampling failed to locate a move target. Unreachable
    /// while cumulative weights cover the drawn value.
    #[error("no move found for rat {rat} at node {node}")]
    MoveNotFound { rat: u32, node: u32 },

    /// Writing a frame to the step stream failed.
    #[error("step stream: {0}")]
    Stream(#[from] std::io::Error),
}

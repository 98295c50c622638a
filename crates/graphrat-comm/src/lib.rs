//! Message-passing transport between graphrat simulation workers.
//!
//! Workers are single-threaded processes that exchange boundary state
//! through explicit messages. The [`Transport`] trait isolates the
//! simulator from the message-passing binding; [`ChannelMesh`] is the
//! in-process implementation, wiring one FIFO lane per ordered worker
//! pair so that a worker acting simultaneously as sender and receiver
//! for different pairs cannot cross-talk.

use std::collections::VecDeque;
use std::sync::mpsc::{self, Receiver, Sender};
use thiserror::Error;

/// Errors raised by transport implementations.
#[derive(Debug, Error)]
pub enum CommError {
    /// The peer's endpoint has been torn down (its worker exited).
    #[error("peer {peer} disconnected")]
    Disconnected { peer: usize },

    /// A peer index outside `[0, zones)`, or a self-send.
    #[error("invalid peer {peer} for rank {rank} of {zones} zones")]
    BadPeer {
        peer: usize,
        rank: usize,
        zones: usize,
    },

    /// A payload arrived with the wrong element type.
    #[error("expected {expected} payload, received {received}")]
    PayloadShape {
        expected: &'static str,
        received: &'static str,
    },
}

/// Message channel discriminant.
///
/// Each exchange type owns a tag so that the three per-batch exchanges
/// plus the display gather stay distinct on a shared lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    /// Startup broadcasts from rank 0 (graph, rat table).
    Broadcast,
    /// Rat-migration triples.
    Migrate,
    /// Boundary rat counts.
    Counts,
    /// Boundary node weights.
    Weights,
    /// Owned-node state gathered to rank 0 for display.
    NodeState,
}

/// Typed wire payload.
///
/// Counts, node ids, and rat-migration triples travel as `Ints`; node
/// weights travel as `Floats`. Keeping the element type in the payload
/// makes an int/double type confusion unrepresentable.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Ints(Vec<u32>),
    Floats(Vec<f64>),
}

impl Payload {
    /// Empty integer payload, used as the non-root argument to
    /// [`Transport::broadcast`].
    #[must_use]
    pub fn empty() -> Self {
        Self::Ints(Vec::new())
    }

    /// Number of elements carried.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Ints(v) => v.len(),
            Self::Floats(v) => v.len(),
        }
    }

    /// Whether the payload carries no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Ints(_) => "ints",
            Self::Floats(_) => "floats",
        }
    }

    /// Unwrap an integer payload.
    pub fn into_ints(self) -> Result<Vec<u32>, CommError> {
        match self {
            Self::Ints(v) => Ok(v),
            other => Err(CommError::PayloadShape {
                expected: "ints",
                received: other.kind(),
            }),
        }
    }

    /// Unwrap a float payload.
    pub fn into_floats(self) -> Result<Vec<f64>, CommError> {
        match self {
            Self::Floats(v) => Ok(v),
            other => Err(CommError::PayloadShape {
                expected: "floats",
                received: other.kind(),
            }),
        }
    }
}

/// Handle returned by [`Transport::isend`], redeemed via
/// [`Transport::wait`] after the matching receives are posted.
#[derive(Debug)]
#[must_use = "outstanding sends must be waited out"]
pub struct SendHandle {
    peer: usize,
}

/// Capability for worker-to-worker message passing.
///
/// The exchange envelope used by every caller is: post `isend` to every
/// peer with a payload, then blocking-`recv` (or `probe` + `recv`) from
/// every expected peer, then `wait` out the send handles. Provided the
/// transport buffers at least one in-flight send per peer, that order
/// admits no cycle of blocked workers.
pub trait Transport {
    /// This worker's zone id.
    fn rank(&self) -> usize;

    /// Total number of workers.
    fn zones(&self) -> usize;

    /// Post a non-blocking send of `payload` to `peer`.
    fn isend(&mut self, peer: usize, tag: Tag, payload: Payload) -> Result<SendHandle, CommError>;

    /// Block until a message with `tag` from `peer` is available and
    /// return its element count without consuming it.
    fn probe(&mut self, peer: usize, tag: Tag) -> Result<usize, CommError>;

    /// Block until a message with `tag` from `peer` arrives and take it.
    fn recv(&mut self, peer: usize, tag: Tag) -> Result<Payload, CommError>;

    /// Complete an outstanding send.
    fn wait(&mut self, handle: SendHandle) -> Result<(), CommError>;

    /// One-to-all distribution from `root`. The root passes the payload
    /// and gets it back; every other rank passes [`Payload::empty`] and
    /// receives the root's payload.
    fn broadcast(&mut self, root: usize, payload: Payload) -> Result<Payload, CommError>;
}

#[derive(Debug)]
struct Letter {
    tag: Tag,
    payload: Payload,
}

/// In-process full-mesh transport over per-ordered-pair mpsc lanes.
///
/// Sends are unbounded and complete at post time. Receives block on the
/// sender's lane; messages pulled while looking for a different tag are
/// stashed and served to later matching calls, so any interleaving of
/// the exchange types is tolerated.
#[derive(Debug)]
pub struct ChannelMesh {
    rank: usize,
    zones: usize,
    outbound: Vec<Option<Sender<Letter>>>,
    inbound: Vec<Option<Receiver<Letter>>>,
    stashed: Vec<VecDeque<Letter>>,
}

impl ChannelMesh {
    /// Build endpoints for `zones` fully-connected workers. The entry at
    /// index `z` belongs to the worker with rank `z`.
    #[must_use]
    pub fn build(zones: usize) -> Vec<ChannelMesh> {
        let mut outbound: Vec<Vec<Option<Sender<Letter>>>> = (0..zones)
            .map(|_| (0..zones).map(|_| None).collect())
            .collect();
        let mut inbound: Vec<Vec<Option<Receiver<Letter>>>> = (0..zones)
            .map(|_| (0..zones).map(|_| None).collect())
            .collect();
        for from in 0..zones {
            for to in 0..zones {
                if from == to {
                    continue;
                }
                let (tx, rx) = mpsc::channel();
                outbound[from][to] = Some(tx);
                inbound[to][from] = Some(rx);
            }
        }
        outbound
            .into_iter()
            .zip(inbound)
            .enumerate()
            .map(|(rank, (out, inb))| ChannelMesh {
                rank,
                zones,
                outbound: out,
                inbound: inb,
                stashed: (0..zones).map(|_| VecDeque::new()).collect(),
            })
            .collect()
    }

    fn check_peer(&self, peer: usize) -> Result<(), CommError> {
        if peer >= self.zones || peer == self.rank {
            return Err(CommError::BadPeer {
                peer,
                rank: self.rank,
                zones: self.zones,
            });
        }
        Ok(())
    }

    /// Block until `stashed[peer]` holds at least one letter with `tag`;
    /// returns its queue position.
    fn fill_until(&mut self, peer: usize, tag: Tag) -> Result<usize, CommError> {
        if let Some(pos) = self.stashed[peer].iter().position(|m| m.tag == tag) {
            return Ok(pos);
        }
        let lane = self.inbound[peer]
            .as_ref()
            .ok_or(CommError::Disconnected { peer })?;
        loop {
            let letter = lane
                .recv()
                .map_err(|_| CommError::Disconnected { peer })?;
            let hit = letter.tag == tag;
            self.stashed[peer].push_back(letter);
            if hit {
                return Ok(self.stashed[peer].len() - 1);
            }
        }
    }
}

impl Transport for ChannelMesh {
    fn rank(&self) -> usize {
        self.rank
    }

    fn zones(&self) -> usize {
        self.zones
    }

    fn isend(&mut self, peer: usize, tag: Tag, payload: Payload) -> Result<SendHandle, CommError> {
        self.check_peer(peer)?;
        let tx = self.outbound[peer]
            .as_ref()
            .ok_or(CommError::Disconnected { peer })?;
        tx.send(Letter { tag, payload })
            .map_err(|_| CommError::Disconnected { peer })?;
        Ok(SendHandle { peer })
    }

    fn probe(&mut self, peer: usize, tag: Tag) -> Result<usize, CommError> {
        self.check_peer(peer)?;
        let pos = self.fill_until(peer, tag)?;
        Ok(self.stashed[peer][pos].payload.len())
    }

    fn recv(&mut self, peer: usize, tag: Tag) -> Result<Payload, CommError> {
        self.check_peer(peer)?;
        let pos = self.fill_until(peer, tag)?;
        let letter = self.stashed[peer]
            .remove(pos)
            .expect("position returned by fill_until");
        Ok(letter.payload)
    }

    fn wait(&mut self, handle: SendHandle) -> Result<(), CommError> {
        // Lane sends complete at post time; the handle only preserves
        // the send/receive/wait envelope at call sites.
        let _ = handle.peer;
        Ok(())
    }

    fn broadcast(&mut self, root: usize, payload: Payload) -> Result<Payload, CommError> {
        if self.rank == root {
            let mut pending = Vec::with_capacity(self.zones.saturating_sub(1));
            for peer in 0..self.zones {
                if peer == root {
                    continue;
                }
                pending.push(self.isend(peer, Tag::Broadcast, payload.clone())?);
            }
            for handle in pending {
                self.wait(handle)?;
            }
            Ok(payload)
        } else {
            self.recv(root, Tag::Broadcast)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn payload_accessors_check_shape() {
        let ints = Payload::Ints(vec![1, 2, 3]);
        assert_eq!(ints.len(), 3);
        assert!(!ints.is_empty());
        assert_eq!(ints.into_ints().unwrap(), vec![1, 2, 3]);

        let floats = Payload::Floats(vec![0.5]);
        let err = floats.into_ints().unwrap_err();
        assert!(matches!(
            err,
            CommError::PayloadShape {
                expected: "ints",
                received: "floats",
            }
        ));
    }

    #[test]
    fn self_and_out_of_range_peers_rejected() {
        let mut mesh = ChannelMesh::build(2);
        let mut a = mesh.remove(0);
        assert!(matches!(
            a.isend(0, Tag::Counts, Payload::empty()),
            Err(CommError::BadPeer { peer: 0, .. })
        ));
        assert!(matches!(
            a.isend(2, Tag::Counts, Payload::empty()),
            Err(CommError::BadPeer { peer: 2, .. })
        ));
    }

    #[test]
    fn pairwise_send_and_recv() {
        let mut endpoints = ChannelMesh::build(2);
        let mut b = endpoints.pop().unwrap();
        let mut a = endpoints.pop().unwrap();

        let sender = thread::spawn(move || {
            let h = a.isend(1, Tag::Counts, Payload::Ints(vec![7, 8])).unwrap();
            a.wait(h).unwrap();
        });
        let got = b.recv(0, Tag::Counts).unwrap().into_ints().unwrap();
        assert_eq!(got, vec![7, 8]);
        sender.join().unwrap();
    }

    #[test]
    fn recv_is_tag_selective_and_probe_does_not_consume() {
        let mut endpoints = ChannelMesh::build(2);
        let mut b = endpoints.pop().unwrap();
        let mut a = endpoints.pop().unwrap();

        // Post weights before counts; the receiver asks for counts first.
        let h1 = a
            .isend(1, Tag::Weights, Payload::Floats(vec![1.5, 2.5]))
            .unwrap();
        let h2 = a.isend(1, Tag::Counts, Payload::Ints(vec![4])).unwrap();
        a.wait(h1).unwrap();
        a.wait(h2).unwrap();

        assert_eq!(b.probe(0, Tag::Counts).unwrap(), 1);
        assert_eq!(b.probe(0, Tag::Counts).unwrap(), 1);
        let counts = b.recv(0, Tag::Counts).unwrap().into_ints().unwrap();
        assert_eq!(counts, vec![4]);
        let weights = b.recv(0, Tag::Weights).unwrap().into_floats().unwrap();
        assert_eq!(weights, vec![1.5, 2.5]);
    }

    #[test]
    fn broadcast_reaches_every_rank() {
        let endpoints = ChannelMesh::build(3);
        let handles: Vec<_> = endpoints
            .into_iter()
            .map(|mut t| {
                thread::spawn(move || {
                    let payload = if t.rank() == 0 {
                        Payload::Ints(vec![3, 1, 4])
                    } else {
                        Payload::empty()
                    };
                    t.broadcast(0, payload).unwrap().into_ints().unwrap()
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), vec![3, 1, 4]);
        }
    }

    #[test]
    fn recv_from_departed_peer_reports_disconnect() {
        let mut endpoints = ChannelMesh::build(2);
        let b = endpoints.pop().unwrap();
        let mut a = endpoints.pop().unwrap();
        drop(b);
        assert!(matches!(
            a.recv(1, Tag::Counts),
            Err(CommError::Disconnected { peer: 1 })
        ));
    }
}

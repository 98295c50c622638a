//! Four workers over the in-process mesh, driven through the same
//! startup protocol the binary uses: rank 0 distributes the graph and
//! rat table, every rank derives its zone and simulates.

use graphrat_comm::{ChannelMesh, Transport};
use graphrat_core::{
    ActivityTimer, Graph, GraphBuilder, NullSink, Region, SimState, StepSink, Worker,
};
use std::io;
use std::thread;

const WIDTH: u32 = 6;
const HEIGHT: u32 = 6;
const NRAT: usize = 100;
const SEED: u32 = 42;

fn grid_graph(nzone: usize) -> Graph {
    let mut edges = Vec::new();
    for y in 0..HEIGHT {
        for x in 0..WIDTH {
            let nid = y * WIDTH + x;
            if y > 0 {
                edges.push((nid, nid - WIDTH));
            }
            if x > 0 {
                edges.push((nid, nid - 1));
            }
            if x + 1 < WIDTH {
                edges.push((nid, nid + 1));
            }
            if y + 1 < HEIGHT {
                edges.push((nid, nid + WIDTH));
            }
        }
    }
    let mut builder = GraphBuilder::new(WIDTH, HEIGHT, edges.len(), nzone);
    for (head, tail) in edges {
        builder.push_edge(head, tail).expect("sorted grid edges");
    }
    let mut graph = builder.finish().expect("grid graph");
    let mut regions: Vec<Region> = (0..6)
        .map(|row| Region::new(row as usize, 0, row as u32, WIDTH, 1))
        .collect();
    graph.apply_regions(&mut regions).expect("regions fit");
    graph
}

fn positions() -> Vec<u32> {
    let nnode = (WIDTH * HEIGHT) as usize;
    (0..NRAT).map(|r| (r * 7 % nnode) as u32).collect()
}

/// Collects every frame the master emits.
#[derive(Default)]
struct FrameSink {
    frames: Vec<Option<Vec<u32>>>,
    done: bool,
}

impl StepSink for FrameSink {
    fn on_step(
        &mut self,
        _width: u32,
        _height: u32,
        _nrat: usize,
        counts: Option<&[u32]>,
    ) -> io::Result<()> {
        self.frames.push(counts.map(<[u32]>::to_vec));
        Ok(())
    }

    fn on_done(&mut self) -> io::Result<()> {
        self.done = true;
        Ok(())
    }
}

fn run_zones(nzone: usize, steps: u32, dinterval: u32) -> FrameSink {
    let graph = grid_graph(nzone);
    let endpoints = ChannelMesh::build(nzone);
    thread::scope(|scope| {
        let mut master = None;
        let mut followers = Vec::new();
        for mut transport in endpoints {
            if transport.rank() == 0 {
                let graph = graph.clone();
                master = Some(scope.spawn(move || {
                    graph.broadcast(&mut transport).expect("graph broadcast");
                    let state =
                        SimState::new(&graph, positions(), SEED).expect("state");
                    state.distribute(&mut transport).expect("rat distribution");
                    let mut worker =
                        Worker::new(graph, state, transport, ActivityTimer::new(false));
                    let mut sink = FrameSink::default();
                    worker
                        .simulate(steps, dinterval, true, &mut sink)
                        .expect("simulation");
                    sink
                }));
            } else {
                followers.push(scope.spawn(move || {
                    let graph = Graph::receive(&mut transport).expect("graph receive");
                    let state =
                        SimState::receive(&graph, SEED, &mut transport).expect("rat receive");
                    let mut worker =
                        Worker::new(graph, state, transport, ActivityTimer::new(false));
                    worker
                        .simulate(steps, dinterval, true, &mut NullSink)
                        .expect("simulation");
                }));
            }
        }
        for follower in followers {
            follower.join().expect("follower thread");
        }
        master.expect("master spawned").join().expect("master thread")
    })
}

#[test]
fn rats_are_conserved_on_every_display_tick() {
    let sink = run_zones(4, 50, 5);
    assert!(sink.done);
    let mut count_frames = 0;
    for frame in &sink.frames {
        if let Some(counts) = frame {
            count_frames += 1;
            assert_eq!(counts.iter().sum::<u32>() as usize, NRAT);
        }
    }
    // Initial frame plus every fifth step.
    assert_eq!(count_frames, 11);
    assert_eq!(sink.frames.len(), 51);
}

#[test]
fn zone_count_does_not_change_the_stream() {
    let single = run_zones(1, 10, 1);
    let quad = run_zones(4, 10, 1);
    assert_eq!(single.frames, quad.frames);
}

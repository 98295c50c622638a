//! Optional wall-clock accounting of simulation phases.
//!
//! Activities nest on a small stack; time accrues to whichever activity
//! is on top. Time outside every tracked span lands in
//! [`Activity::Unknown`]. Misuse (mismatched finish, runaway nesting)
//! disables tracking rather than corrupting the report.

use std::time::Instant;
use tracing::{info, warn};

const MAX_DEPTH: usize = 20;

/// Phases of the simulation accounted separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    Unknown,
    Startup,
    ComputeWeights,
    ComputeSums,
    FindMoves,
    LocalComm,
    GlobalComm,
}

impl Activity {
    const COUNT: usize = 7;

    fn index(self) -> usize {
        match self {
            Self::Unknown => 0,
            Self::Startup => 1,
            Self::ComputeWeights => 2,
            Self::ComputeSums => 3,
            Self::FindMoves => 4,
            Self::LocalComm => 5,
            Self::GlobalComm => 6,
        }
    }

    /// Label used in the activity report.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Startup => "startup",
            Self::ComputeWeights => "compute_weights",
            Self::ComputeSums => "compute_sums",
            Self::FindMoves => "find_moves",
            Self::LocalComm => "local_comm",
            Self::GlobalComm => "global_comm",
        }
    }
}

/// Accumulates per-activity elapsed seconds for one worker.
#[derive(Debug)]
pub struct ActivityTimer {
    tracking: bool,
    origin: Instant,
    mark: Instant,
    stack: Vec<Activity>,
    accum: [f64; Activity::COUNT],
}

impl ActivityTimer {
    /// Timer that records only when `tracking` is set; a disabled timer
    /// costs two branches per span.
    #[must_use]
    pub fn new(tracking: bool) -> Self {
        let now = Instant::now();
        Self {
            tracking,
            origin: now,
            mark: now,
            stack: vec![Activity::Unknown],
            accum: [0.0; Activity::COUNT],
        }
    }

    fn charge_current(&mut self) {
        let now = Instant::now();
        if let Some(&top) = self.stack.last() {
            self.accum[top.index()] += now.duration_since(self.mark).as_secs_f64();
        }
        self.mark = now;
    }

    /// Enter an activity span.
    pub fn start(&mut self, activity: Activity) {
        if !self.tracking {
            return;
        }
        self.charge_current();
        self.stack.push(activity);
        if self.stack.len() > MAX_DEPTH {
            warn!("runaway activity stack; disabling instrumentation");
            self.tracking = false;
        }
    }

    /// Leave the innermost activity span, which must be `activity`.
    pub fn finish(&mut self, activity: Activity) {
        if !self.tracking {
            return;
        }
        match self.stack.last() {
            Some(&top) if top == activity => {
                self.charge_current();
                self.stack.pop();
            }
            Some(&top) => {
                warn!(
                    started = top.name(),
                    finishing = activity.name(),
                    "mismatched activity; disabling instrumentation"
                );
                self.tracking = false;
            }
            None => {
                warn!("popped past the bottom of the activity stack; disabling instrumentation");
                self.tracking = false;
            }
        }
    }

    /// Log the accumulated per-activity milliseconds for this worker.
    pub fn report(&mut self, zone: usize, local_nodes: usize, local_edges: usize) {
        if !self.tracking {
            return;
        }
        let elapsed = self.origin.elapsed().as_secs_f64();
        let tracked: f64 = self.accum[1..].iter().sum();
        self.accum[Activity::Unknown.index()] = elapsed - tracked;

        info!(zone, nodes = local_nodes, edges = local_edges, "activity report");
        for activity in [
            Activity::Unknown,
            Activity::Startup,
            Activity::ComputeWeights,
            Activity::ComputeSums,
            Activity::FindMoves,
            Activity::LocalComm,
            Activity::GlobalComm,
        ] {
            let secs = self.accum[activity.index()];
            if secs == 0.0 {
                continue;
            }
            info!(
                zone,
                activity = activity.name(),
                ms = (secs * 1_000.0) as u64,
                pct = secs / elapsed * 100.0,
                "activity"
            );
        }
        info!(zone, ms = (elapsed * 1_000.0) as u64, "elapsed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spans_accumulate_into_their_activity() {
        let mut timer = ActivityTimer::new(true);
        timer.start(Activity::ComputeSums);
        std::thread::sleep(std::time::Duration::from_millis(2));
        timer.finish(Activity::ComputeSums);
        assert!(timer.accum[Activity::ComputeSums.index()] > 0.0);
        assert_eq!(timer.accum[Activity::LocalComm.index()], 0.0);
    }

    #[test]
    fn mismatched_finish_disables_tracking() {
        let mut timer = ActivityTimer::new(true);
        timer.start(Activity::Startup);
        timer.finish(Activity::LocalComm);
        assert!(!timer.tracking);
        // Subsequent calls are inert.
        timer.start(Activity::FindMoves);
        timer.finish(Activity::FindMoves);
        assert_eq!(timer.accum[Activity::FindMoves.index()], 0.0);
    }

    #[test]
    fn disabled_timer_records_nothing() {
        let mut timer = ActivityTimer::new(false);
        timer.start(Activity::LocalComm);
        timer.finish(Activity::LocalComm);
        assert!(timer.accum.iter().all(|&a| a == 0.0));
    }
}

//! Step stream consumed by a visualizer on stdout.

use graphrat_core::StepSink;
use std::io::{self, BufWriter, Stdout, Write};

/// Writes simulation frames to stdout: `STEP W H R`, per-node counts on
/// display ticks, `END`, and a final `DONE`.
pub struct StdoutSink {
    out: BufWriter<Stdout>,
}

impl StdoutSink {
    #[must_use]
    pub fn new() -> Self {
        Self {
            out: BufWriter::new(io::stdout()),
        }
    }
}

impl Default for StdoutSink {
    fn default() -> Self {
        Self::new()
    }
}

impl StepSink for StdoutSink {
    fn on_step(
        &mut self,
        width: u32,
        height: u32,
        nrat: usize,
        counts: Option<&[u32]>,
    ) -> io::Result<()> {
        writeln!(self.out, "STEP {width} {height} {nrat}")?;
        if let Some(counts) = counts {
            for &count in counts {
                writeln!(self.out, "{count}")?;
            }
        }
        writeln!(self.out, "END")?;
        self.out.flush()
    }

    fn on_done(&mut self) -> io::Result<()> {
        writeln!(self.out, "DONE")?;
        self.out.flush()
    }
}

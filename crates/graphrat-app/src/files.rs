//! Line-oriented graph and rat file readers.
//!
//! Lines whose first non-whitespace character is `#` are comments and
//! skipped everywhere. Hitting end of file while a record is still
//! expected is malformed input, like any parse failure.

use anyhow::{anyhow, bail, Context, Result};
use graphrat_core::{Graph, GraphBuilder, Region};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::str::FromStr;
use tracing::info;

/// Content lines of a reader, comments skipped, 1-based numbering.
struct ContentLines<R> {
    inner: R,
    lineno: usize,
}

impl<R: BufRead> ContentLines<R> {
    fn new(inner: R) -> Self {
        Self { inner, lineno: 0 }
    }

    fn next_content(&mut self) -> Result<Option<(usize, String)>> {
        let mut buf = String::new();
        loop {
            buf.clear();
            let read = self.inner.read_line(&mut buf).context("reading input")?;
            if read == 0 {
                return Ok(None);
            }
            self.lineno += 1;
            if !buf.trim_start().starts_with('#') {
                return Ok(Some((self.lineno, buf.trim_end().to_string())));
            }
        }
    }

    fn require(&mut self, what: &str) -> Result<(usize, String)> {
        self.next_content()?
            .ok_or_else(|| anyhow!("unexpected end of file while expecting {what}"))
    }
}

fn parse_field<T: FromStr>(field: &str, lineno: usize, what: &str) -> Result<T> {
    field
        .parse()
        .map_err(|_| anyhow!("line {lineno}: malformed {what} `{field}`"))
}

/// Read a graph file and partition its regions into `nzone` zones.
pub fn read_graph(path: &Path, nzone: usize) -> Result<Graph> {
    let file = File::open(path)
        .with_context(|| format!("opening graph file {}", path.display()))?;
    let mut lines = ContentLines::new(BufReader::new(file));

    let (lineno, header) = lines.require("the graph header")?;
    let fields: Vec<&str> = header.split_whitespace().collect();
    if fields.len() < 3 {
        bail!("line {lineno}: malformed graph header `{header}`");
    }
    let width: u32 = parse_field(fields[0], lineno, "width")?;
    let height: u32 = parse_field(fields[1], lineno, "height")?;
    let nedge: usize = parse_field(fields[2], lineno, "edge count")?;
    let nregion: usize = if fields.len() > 3 {
        parse_field(fields[3], lineno, "region count")?
    } else {
        0
    };
    let nnode = (width * height) as usize;

    for i in 0..nnode {
        let (lineno, line) = lines.require(&format!("node declaration {}", i + 1))?;
        let mut fields = line.split_whitespace();
        // The trailing load-factor field is read and discarded; node
        // weights are computed dynamically.
        if fields.next() != Some("n") || fields.next().is_none() {
            bail!("line {lineno}: expecting node declaration {}", i + 1);
        }
    }

    let mut builder = GraphBuilder::new(width, height, nedge, nzone);
    for i in 0..nedge {
        let (lineno, line) = lines.require(&format!("edge {}", i + 1))?;
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != 3 || fields[0] != "e" {
            bail!("line {lineno}: expecting edge {}", i + 1);
        }
        let head = parse_field(fields[1], lineno, "edge head")?;
        let tail = parse_field(fields[2], lineno, "edge tail")?;
        builder
            .push_edge(head, tail)
            .with_context(|| format!("line {lineno}"))?;
    }
    let mut graph = builder.finish()?;

    let mut regions = Vec::with_capacity(nregion);
    for i in 0..nregion {
        let (lineno, line) = lines.require(&format!("region {}", i + 1))?;
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != 5 || fields[0] != "r" {
            bail!("line {lineno}: expecting region {}", i + 1);
        }
        let x = parse_field(fields[1], lineno, "region x")?;
        let y = parse_field(fields[2], lineno, "region y")?;
        let w = parse_field(fields[3], lineno, "region width")?;
        let h = parse_field(fields[4], lineno, "region height")?;
        regions.push(Region::new(i, x, y, w, h));
    }
    graph.apply_regions(&mut regions)?;

    info!(
        nodes = nnode,
        edges = nedge,
        regions = nregion,
        zones = nzone,
        "loaded graph"
    );
    Ok(graph)
}

/// Read initial rat positions; the file's node count must match the
/// graph's.
pub fn read_rats(path: &Path, graph: &Graph) -> Result<Vec<u32>> {
    let file = File::open(path)
        .with_context(|| format!("opening rat position file {}", path.display()))?;
    let mut lines = ContentLines::new(BufReader::new(file));

    let (lineno, header) = lines.require("the rat file header")?;
    let fields: Vec<&str> = header.split_whitespace().collect();
    if fields.len() != 2 {
        bail!("line {lineno}: malformed rat file header `{header}`");
    }
    let nnode: usize = parse_field(fields[0], lineno, "node count")?;
    let nrat: usize = parse_field(fields[1], lineno, "rat count")?;
    if nnode != graph.nnode() {
        bail!(
            "graph contains {} nodes, but rat file declares {nnode}",
            graph.nnode()
        );
    }

    let mut positions = Vec::with_capacity(nrat);
    for i in 0..nrat {
        let (lineno, line) = lines.require(&format!("rat {}", i + 1))?;
        let node: u32 = parse_field(line.trim(), lineno, "rat position")?;
        if node as usize >= nnode {
            bail!("line {lineno}: invalid node number {node}");
        }
        positions.push(node);
    }

    info!(rats = nrat, "loaded rats");
    Ok(positions)
}

//! Target windows and the per-window POA consensus.

use std::cell::RefCell;

use log::warn;
use spoa_rs::{AlignmentEngine, AlignmentType, Graph};

use crate::error::{Error, Result};

/// Scoring parameters for the partial order alignment engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoaConfig {
    pub match_score: i8,
    pub mismatch: i8,
    pub gap: i8,
}

/// The alignment engines of one worker: layers spanning a window almost
/// fully align globally; shorter layers use the semi-global engine, whose
/// free graph-end gaps confine the alignment to the region the layer
/// covers.
struct PoaEngines {
    global: AlignmentEngine,
    semi_global: AlignmentEngine,
}

thread_local! {
    static POA_ENGINES: RefCell<Option<(PoaConfig, PoaEngines)>> = const { RefCell::new(None) };
}

/// Execute a closure with this worker's POA engines, creating them on first
/// use. Engines are bound to worker threads and never shared.
fn with_poa_engines<F, R>(config: PoaConfig, f: F) -> R
where
    F: FnOnce(&mut PoaEngines) -> R,
{
    POA_ENGINES.with(|cell| {
        let mut slot = cell.borrow_mut();
        let recreate = match slot.as_ref() {
            Some((current, _)) => *current != config,
            None => true,
        };
        if recreate {
            // equal open and extension penalties give a linear gap model
            let engines = PoaEngines {
                global: AlignmentEngine::new_affine(
                    AlignmentType::kNW,
                    config.match_score,
                    config.mismatch,
                    config.gap,
                    config.gap,
                ),
                semi_global: AlignmentEngine::new_affine(
                    AlignmentType::kOV,
                    config.match_score,
                    config.mismatch,
                    config.gap,
                    config.gap,
                ),
            };
            *slot = Some((config, engines));
        }
        let (_, engines) = slot.as_mut().unwrap();
        f(engines)
    })
}

/// One tile of a target sequence with the read fragments projected onto it.
/// Layer 0 is the target's own substring (the backbone); further layers are
/// appended by the projector and carry their interval relative to the
/// window start.
pub struct Window<'a> {
    first: u32,
    last: u32,
    sequences: Vec<&'a [u8]>,
    qualities: Vec<&'a [u8]>,
    positions: Vec<(u32, u32)>,
}

impl<'a> Window<'a> {
    pub fn new(first: u32, last: u32, backbone: &'a [u8], quality: &'a [u8]) -> Self {
        Window {
            first,
            last,
            sequences: vec![backbone],
            qualities: vec![quality],
            positions: vec![(0, 0)],
        }
    }

    pub fn first(&self) -> u32 {
        self.first
    }

    pub fn last(&self) -> u32 {
        self.last
    }

    pub fn n_layers(&self) -> usize {
        self.sequences.len() - 1
    }

    #[cfg(test)]
    pub(crate) fn layer(&self, index: usize) -> (&[u8], &[u8], (u32, u32)) {
        (
            self.sequences[index + 1],
            self.qualities[index + 1],
            self.positions[index + 1],
        )
    }

    /// Append a supporting fragment covering target positions
    /// `[begin, end]` (inclusive, absolute). Empty fragments and empty
    /// intervals are ignored; inverted or out-of-range intervals are
    /// rejected.
    pub fn add_layer(
        &mut self,
        sequence: &'a [u8],
        quality: &'a [u8],
        begin: u32,
        end: u32,
    ) -> Result<()> {
        if begin < self.first || end < self.first {
            return Err(Error::InvalidLayer { first: begin, last: end });
        }
        let first = begin - self.first;
        let last = end - self.first;
        if sequence.is_empty() || first == last {
            return Ok(());
        }
        debug_assert!(quality.is_empty() || quality.len() == sequence.len());

        let backbone_len = self.sequences[0].len() as u32;
        if first >= last || first > backbone_len || last > backbone_len {
            return Err(Error::InvalidLayer { first, last });
        }

        self.sequences.push(sequence);
        self.qualities.push(quality);
        self.positions.push((first, last));
        Ok(())
    }

    /// Compute this window's consensus. With fewer than three sequences the
    /// backbone passes through unpolished. Otherwise every layer is aligned
    /// into a POA graph seeded with the backbone (layers sorted by start
    /// position, qualities as weights): layers spanning the window almost
    /// fully align against the whole graph, the rest semi-globally so the
    /// alignment stays confined to the region they cover. The consensus is
    /// then called column by column from the graph's alignment matrix. When
    /// `trim` is set, low-coverage columns at both ends are cut.
    pub fn consensus(&self, poa: PoaConfig, trim: bool) -> (Vec<u8>, bool) {
        if self.sequences.len() < 3 {
            return (self.sequences[0].to_vec(), false);
        }

        let mut rank: Vec<usize> = (1..self.sequences.len()).collect();
        rank.sort_by_key(|&i| self.positions[i].0);

        let backbone_len = self.sequences[0].len() as u32;
        let offset = backbone_len / 100;
        let order: Vec<usize> = std::iter::once(0).chain(rank.iter().copied()).collect();
        let msa = with_poa_engines(poa, |engines| {
            let mut graph = Graph::new();
            for &i in &order {
                let sequence = String::from_utf8_lossy(self.sequences[i]);
                let weights = base_weights(self.qualities[i], self.sequences[i].len());
                let (first, last) = self.positions[i];
                let engine = if i == 0 || (first < offset && last > backbone_len - offset) {
                    &mut engines.global
                } else {
                    &mut engines.semi_global
                };
                let (_, alignment) = engine.align(&sequence, &graph);
                graph.add_alignment_with_weights(alignment, &sequence, &weights);
            }
            graph.generate_msa()
        });

        let rows: Vec<&[u8]> = msa.iter().map(|s| s.as_bytes()).collect();
        let qualities: Vec<&[u8]> = order.iter().map(|&i| self.qualities[i]).collect();
        let (mut consensus, coverages) = call_columns(&rows, &qualities);

        if trim && !consensus.is_empty() {
            let average = ((self.sequences.len() - 1) / 2) as u32;
            let mut begin = 0usize;
            while begin < consensus.len() && coverages[begin] < average {
                begin += 1;
            }
            let mut end = consensus.len();
            while end > begin && coverages[end - 1] < average {
                end -= 1;
            }
            if begin < end {
                consensus = consensus[begin..end].to_vec();
            } else {
                warn!(
                    "consensus trimming skipped for window [{}, {}): coverage never reached {}",
                    self.first, self.last, average
                );
            }
        }

        (consensus, true)
    }
}

fn base_weights(quality: &[u8], len: usize) -> Vec<u32> {
    if quality.is_empty() {
        vec![1; len]
    } else {
        quality
            .iter()
            .map(|&q| u32::from(q.saturating_sub(33)) + 1)
            .collect()
    }
}

/// Column-wise consensus over the POA alignment matrix. Each row spans the
/// columns between its first and last non-gap character; outside that span a
/// row abstains rather than voting for a deletion. A column emits its
/// heaviest base when the bases outweigh the gaps; the returned coverage of
/// an emitted base counts the rows that agree with it.
fn call_columns(rows: &[&[u8]], qualities: &[&[u8]]) -> (Vec<u8>, Vec<u32>) {
    let n_columns = rows.first().map_or(0, |row| row.len());
    let mut spans = Vec::with_capacity(rows.len());
    for row in rows {
        let first = row.iter().position(|&b| b != b'-');
        let last = row.iter().rposition(|&b| b != b'-');
        spans.push(match (first, last) {
            (Some(first), Some(last)) => (first, last),
            _ => (1, 0),
        });
    }

    let mut cursors = vec![0usize; rows.len()];
    let mut consensus = Vec::with_capacity(n_columns);
    let mut coverages = Vec::with_capacity(n_columns);

    for column in 0..n_columns {
        let mut weights = [0u64; 256];
        let mut counts = [0u32; 256];
        let mut gap_count = 0u32;

        for (r, row) in rows.iter().enumerate() {
            let base = row[column];
            if base == b'-' {
                if column >= spans[r].0 && column <= spans[r].1 {
                    gap_count += 1;
                }
                continue;
            }
            let weight = if qualities[r].is_empty() {
                1
            } else {
                u64::from(qualities[r][cursors[r]].saturating_sub(33)) + 1
            };
            cursors[r] += 1;
            weights[base as usize] += weight;
            counts[base as usize] += 1;
        }

        let mut best = 0usize;
        for b in 1..256 {
            if weights[b] > weights[best] {
                best = b;
            }
        }
        let base_total: u32 = counts.iter().sum();
        if base_total == 0 || base_total < gap_count {
            continue;
        }
        consensus.push(best as u8);
        coverages.push(counts[best]);
    }

    (consensus, coverages)
}

//! Dataset assembly: reconcile sequences, targets, and overlaps into a
//! consistent in-memory model with deduplication and filtering.

use std::time::Instant;

use log::info;
use rustc_hash::FxHashMap;

use crate::error::{Error, Result};
use crate::io::{OverlapFile, SequenceFile};
use crate::overlap::{Overlap, Strand};
use crate::sequence::{Sequence, SequenceKind};

const CHUNK_SIZE: u64 = 1024 * 1024 * 1024;

/// Owns every sequence (targets first, then queries) and the surviving
/// overlaps grouped per target index.
pub struct Dataset {
    pub(crate) sequences: Vec<Sequence>,
    pub(crate) n_targets: usize,
    pub(crate) overlaps: Vec<Vec<Overlap>>,
}

impl Dataset {
    pub fn sequences(&self) -> &[Sequence] {
        &self.sequences
    }

    pub fn targets(&self) -> &[Sequence] {
        &self.sequences[..self.n_targets]
    }

    pub fn queries(&self) -> &[Sequence] {
        &self.sequences[self.n_targets..]
    }

    pub fn n_targets(&self) -> usize {
        self.n_targets
    }

    pub fn overlaps(&self, target_id: u32) -> &[Overlap] {
        &self.overlaps[target_id as usize]
    }
}

/// Load targets, queries, and overlaps; resolve identities; deduplicate
/// queries that repeat a target; drop invalid, self, and high-error
/// overlaps; keep at most one overlap per query unless `keep_all`; group
/// the survivors per target.
pub fn load_dataset(
    sequences_path: &str,
    overlaps_path: &str,
    targets_path: &str,
    error_threshold: f64,
    keep_all: bool,
) -> Result<Dataset> {
    if !(0.0..=1.0).contains(&error_threshold) {
        return Err(Error::Config(format!(
            "error threshold {error_threshold} is outside [0, 1]"
        )));
    }

    let mut seqs_file = SequenceFile::open(sequences_path)?;
    let mut ovlps_file = OverlapFile::open(overlaps_path)?;
    let mut trgs_file = SequenceFile::open(targets_path)?;

    let timer = Instant::now();
    let mut sequences = trgs_file.parse_chunk(u64::MAX)?;
    let n_targets = sequences.len();
    info!(
        "loaded {} target sequences in {:.3}s",
        n_targets,
        timer.elapsed().as_secs_f64()
    );

    // Identity maps: "{name}t"/"{name}q" for name-based overlap formats,
    // (arrival << 1 | role) for numeric-id formats.
    let mut name_to_id: FxHashMap<String, u32> = FxHashMap::default();
    let mut id_to_id: FxHashMap<u64, u32> = FxHashMap::default();
    for (i, target) in sequences.iter_mut().enumerate() {
        target.set_kind(SequenceKind::Target);
        name_to_id.insert(format!("{}t", target.name()), i as u32);
        id_to_id.insert((i as u64) << 1 | 1, i as u32);
    }

    let mut has_name = vec![true; n_targets];
    let mut has_data = vec![true; n_targets];
    let mut has_reverse_data = vec![false; n_targets];

    let timer = Instant::now();
    let mut n_queries: u64 = 0;
    loop {
        let chunk = seqs_file.parse_chunk(CHUNK_SIZE)?;
        if chunk.is_empty() {
            break;
        }
        for query in chunk {
            // A query repeating a target's name must repeat its content; it
            // is then represented by the target's index alone.
            if let Some(&target_id) = name_to_id.get(&format!("{}t", query.name())) {
                let target = &mut sequences[target_id as usize];
                if target.data().len() != query.data().len()
                    || target.quality().len() != query.quality().len()
                {
                    return Err(Error::DuplicateMismatch(query.name().to_string()));
                }
                name_to_id.insert(format!("{}q", query.name()), target_id);
                id_to_id.insert(n_queries << 1, target_id);
                target.set_kind(SequenceKind::TargetAndQuery);
            } else {
                let index = sequences.len() as u32;
                name_to_id.insert(format!("{}q", query.name()), index);
                id_to_id.insert(n_queries << 1, index);
                sequences.push(query);
            }
            n_queries += 1;
        }
    }
    if n_queries == 0 {
        return Err(Error::EmptySequences);
    }
    has_name.resize(sequences.len(), false);
    has_data.resize(sequences.len(), false);
    has_reverse_data.resize(sequences.len(), false);
    info!(
        "loaded {} query sequences in {:.3}s",
        sequences.len() - n_targets,
        timer.elapsed().as_secs_f64()
    );

    let timer = Instant::now();
    let mut all_overlaps: Vec<Option<Overlap>> = Vec::new();
    let mut cursor = 0usize;
    loop {
        let chunk = ovlps_file.parse_chunk(CHUNK_SIZE)?;
        if chunk.is_empty() {
            break;
        }
        let chunk_begin = all_overlaps.len();
        all_overlaps.extend(chunk.into_iter().map(Some));

        for i in chunk_begin..all_overlaps.len() {
            let overlap = all_overlaps[i].as_mut().unwrap();
            overlap.transmute(&sequences, &name_to_id, &id_to_id);
            if !overlap.is_valid() {
                all_overlaps[i] = None;
                continue;
            }
            while all_overlaps[cursor].is_none() {
                cursor += 1;
            }
            if all_overlaps[cursor].as_ref().unwrap().q_id()
                != all_overlaps[i].as_ref().unwrap().q_id()
            {
                flush_query_run(&mut all_overlaps, cursor, i, error_threshold, keep_all);
                cursor = i;
            }
        }

        // Compact the freshly parsed region, keeping the cursor aligned.
        // The cursor may still point into an earlier chunk when a query's
        // run spans the chunk boundary; that region is left untouched.
        if cursor > chunk_begin {
            let dropped_before_cursor = all_overlaps[chunk_begin..cursor]
                .iter()
                .filter(|o| o.is_none())
                .count();
            cursor -= dropped_before_cursor;
        }
        let tail: Vec<Option<Overlap>> = all_overlaps
            .drain(chunk_begin..)
            .filter(Option::is_some)
            .collect();
        all_overlaps.extend(tail);
    }
    let end = all_overlaps.len();
    flush_query_run(&mut all_overlaps, cursor, end, error_threshold, keep_all);

    let surviving: Vec<Overlap> = all_overlaps.into_iter().flatten().collect();
    if surviving.is_empty() {
        return Err(Error::EmptyOverlaps);
    }

    for overlap in &surviving {
        if overlap.strand() == Strand::Reverse {
            has_reverse_data[overlap.q_id() as usize] = true;
        } else {
            has_data[overlap.q_id() as usize] = true;
        }
    }
    for (i, sequence) in sequences.iter_mut().enumerate() {
        sequence.transmute(has_name[i], has_data[i], has_reverse_data[i]);
    }
    info!(
        "loaded {} overlaps in {:.3}s",
        surviving.len(),
        timer.elapsed().as_secs_f64()
    );

    let mut overlaps: Vec<Vec<Overlap>> = (0..n_targets).map(|_| Vec::new()).collect();
    for overlap in surviving {
        overlaps[overlap.t_id() as usize].push(overlap);
    }

    Ok(Dataset {
        sequences,
        n_targets,
        overlaps,
    })
}

/// Filter one run of same-query overlaps in `[begin, end)`: drop overlaps
/// over the error threshold and self overlaps, then, unless `keep_all`,
/// keep only the longest overlap per query (ties keep the earlier).
fn flush_query_run(
    overlaps: &mut [Option<Overlap>],
    begin: usize,
    end: usize,
    error_threshold: f64,
    keep_all: bool,
) {
    for i in begin..end {
        if overlaps[i].is_none() {
            continue;
        }
        {
            let o = overlaps[i].as_ref().unwrap();
            if o.error() > error_threshold || o.q_id() == o.t_id() {
                overlaps[i] = None;
                continue;
            }
        }
        if keep_all {
            continue;
        }
        for j in i + 1..end {
            if overlaps[j].is_none() {
                continue;
            }
            if overlaps[i].as_ref().unwrap().length() >= overlaps[j].as_ref().unwrap().length() {
                overlaps[j] = None;
            } else {
                overlaps[i] = None;
                break;
            }
        }
    }
}

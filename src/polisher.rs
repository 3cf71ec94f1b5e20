//! The polishing driver: per-target window construction, overlap-to-window
//! projection, and the nested-parallel consensus pipeline.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use indicatif::{ProgressBar, ProgressStyle};
use log::info;
use rayon::prelude::*;

use crate::dataset::Dataset;
use crate::error::{Error, Result};
use crate::overlap::{Overlap, Strand};
use crate::sequence::Sequence;
use crate::window::{PoaConfig, Window};

/// Configuration of the polishing pipeline.
#[derive(Debug, Clone, Copy)]
pub struct PolisherConfig {
    pub window_length: u32,
    /// Threshold for average window base quality. Carried for configuration
    /// completeness and validated to the Phred range; current layer
    /// construction does not filter on it.
    pub quality_threshold: f64,
    pub trim: bool,
    pub include_unpolished: bool,
    pub poa: PoaConfig,
}

impl PolisherConfig {
    pub fn validate(&self) -> Result<()> {
        if self.window_length == 0 {
            return Err(Error::Config("window length must be positive".to_string()));
        }
        if !(0.0..=93.0).contains(&self.quality_threshold) {
            return Err(Error::Config(format!(
                "quality threshold {} is outside [0, 93]",
                self.quality_threshold
            )));
        }
        if self.poa.gap >= 0 {
            return Err(Error::Config(format!(
                "gap penalty {} must be negative",
                self.poa.gap
            )));
        }
        Ok(())
    }
}

/// Polish every target of the dataset and return the corrected sequences,
/// one per target with a polished window (or per every target when
/// `include_unpolished` is set), in target order. The output name carries
/// the consensus length (`LN`), the number of supporting overlaps (`RC`),
/// and the polished window ratio (`XC`).
pub fn polish(config: &PolisherConfig, dataset: Dataset) -> Result<Vec<Sequence>> {
    config.validate()?;

    let Dataset {
        sequences,
        n_targets,
        mut overlaps,
    } = dataset;

    let timer = Instant::now();
    let n_aligned = AtomicUsize::new(0);
    let n_polished = AtomicUsize::new(0);

    let progress = if log::log_enabled!(log::Level::Info) && !log::log_enabled!(log::Level::Debug)
    {
        let bar = ProgressBar::new(n_targets as u64);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} {msg}")
                .unwrap()
                .progress_chars("#>-"),
        );
        Some(Arc::new(bar))
    } else {
        None
    };

    let polished: Vec<Option<Sequence>> = overlaps
        .par_iter_mut()
        .enumerate()
        .map(|(target_idx, target_overlaps)| -> Result<Option<Sequence>> {
            let target = &sequences[target_idx];

            // Align phase: materialize missing CIGARs, in parallel.
            target_overlaps
                .par_iter_mut()
                .try_for_each(|overlap| overlap.ensure_cigar(&sequences))?;
            n_aligned.fetch_add(1, Ordering::Relaxed);

            let mut windows = build_windows(target, config.window_length);
            for overlap in target_overlaps.iter() {
                bind_overlap_to_windows(&sequences, &mut windows, overlap)?;
            }

            // Consensus phase: one window per worker.
            let n_polished_windows = AtomicUsize::new(0);
            let consensuses: Vec<Vec<u8>> = windows
                .par_iter()
                .map(|window| {
                    let (consensus, polished) = window.consensus(config.poa, config.trim);
                    if polished {
                        n_polished_windows.fetch_add(1, Ordering::Relaxed);
                    }
                    consensus
                })
                .collect();

            let length: usize = consensuses.iter().map(Vec::len).sum();
            let mut consensus_seq = Vec::with_capacity(length);
            for piece in consensuses {
                consensus_seq.extend_from_slice(&piece);
            }

            let polished_ratio = if windows.is_empty() {
                0.0
            } else {
                n_polished_windows.load(Ordering::Relaxed) as f64 / windows.len() as f64
            };

            let result = if config.include_unpolished || polished_ratio > 0.0 {
                let name = format!(
                    "{} LN:i:{} RC:i:{} XC:f:{polished_ratio:?}",
                    target.name(),
                    consensus_seq.len(),
                    target_overlaps.len()
                );
                Some(Sequence::new(name, consensus_seq))
            } else {
                None
            };

            n_polished.fetch_add(1, Ordering::Relaxed);
            if let Some(bar) = &progress {
                bar.inc(1);
                bar.set_message(format!(
                    "aligned {} | polished {}",
                    n_aligned.load(Ordering::Relaxed),
                    n_polished.load(Ordering::Relaxed)
                ));
            }
            Ok(result)
        })
        .collect::<Result<Vec<_>>>()?;

    if let Some(bar) = &progress {
        bar.finish_and_clear();
    }
    let polished: Vec<Sequence> = polished.into_iter().flatten().collect();
    info!(
        "polished {}/{} target sequences in {:.3}s",
        polished.len(),
        n_targets,
        timer.elapsed().as_secs_f64()
    );
    Ok(polished)
}

/// Slice a target into contiguous windows of `window_length`; the last
/// window may be shorter.
fn build_windows(target: &Sequence, window_length: u32) -> Vec<Window<'_>> {
    let data = target.data();
    let quality = target.quality();
    let window_length = window_length as usize;

    let mut windows = Vec::with_capacity(data.len() / window_length + 1);
    let mut position = 0;
    while position < data.len() {
        let next = (position + window_length).min(data.len());
        windows.push(Window::new(
            position as u32,
            next as u32,
            &data[position..next],
            if quality.is_empty() { &[] } else { &quality[position..next] },
        ));
        position = next;
    }
    windows
}

/// Walk an overlap's CIGAR and carve it into per-window layer intervals.
///
/// The query cursor starts one base before the first participating position
/// on the aligned strand (the reverse complement for reverse overlaps), the
/// target cursor one base before `t_begin`. A layer is emitted whenever the
/// walk crosses a window's final base, covering the matched region since the
/// previous boundary.
pub(crate) fn bind_overlap_to_windows<'a>(
    sequences: &'a [Sequence],
    windows: &mut [Window<'a>],
    overlap: &Overlap,
) -> Result<()> {
    let cigar = overlap.cigar().as_bytes();
    if cigar.is_empty() {
        return Ok(());
    }

    let query = &sequences[overlap.q_id() as usize];
    let q_len = i64::from(overlap.q_length());

    let mut found_first_match = false;
    let mut q_curr: i64 = match overlap.strand() {
        Strand::Forward => i64::from(overlap.q_begin()) - 1,
        Strand::Reverse => (q_len - i64::from(overlap.q_end())) - 1,
    };
    let mut t_curr: i64 = i64::from(overlap.t_begin()) - 1;
    let mut q_first = q_curr + 1;
    let mut t_first = t_curr;
    let (mut q_last, mut t_last) = (q_first, t_first);

    let mut window_idx =
        windows.partition_point(|window| i64::from(window.last()) <= t_curr + 1);

    let mut i = 0;
    while window_idx < windows.len() && i < cigar.len() {
        let mut run = 0usize;
        while i < cigar.len() && cigar[i].is_ascii_digit() {
            run = run * 10 + usize::from(cigar[i] - b'0');
            i += 1;
        }
        if i == cigar.len() {
            break;
        }
        let op = cigar[i];
        i += 1;

        match op {
            b'M' | b'=' | b'X' => {
                let mut k = 0;
                while k < run && window_idx < windows.len() {
                    q_curr += 1;
                    t_curr += 1;
                    if !found_first_match {
                        found_first_match = true;
                        q_first = q_curr;
                        t_first = t_curr;
                    }
                    q_last = q_curr;
                    t_last = t_curr;
                    if t_last == i64::from(windows[window_idx].last()) - 1 {
                        emit_layer(
                            query,
                            overlap,
                            &mut windows[window_idx],
                            q_first,
                            q_last,
                            t_first,
                            t_last,
                        )?;
                        found_first_match = false;
                        window_idx += 1;
                    }
                    k += 1;
                }
            }
            b'I' => {
                q_curr += run as i64;
            }
            b'D' | b'N' => {
                let mut k = 0;
                while k < run && window_idx < windows.len() {
                    t_curr += 1;
                    if t_curr == i64::from(windows[window_idx].last()) - 1 {
                        if found_first_match {
                            emit_layer(
                                query,
                                overlap,
                                &mut windows[window_idx],
                                q_first,
                                q_last,
                                t_first,
                                t_last,
                            )?;
                        }
                        found_first_match = false;
                        window_idx += 1;
                    }
                    k += 1;
                }
            }
            b'S' | b'H' | b'P' => {}
            _ => {
                return Err(Error::BadFormat(format!(
                    "invalid CIGAR operation '{}'",
                    op as char
                )));
            }
        }
    }
    Ok(())
}

/// Hand the matched fragment `[q_first, q_last]` x `[t_first, t_last]`
/// (inclusive) to the window. Forward overlaps view the query data
/// directly; reverse overlaps view the reverse complement, whose
/// coordinate space the walk already runs in.
fn emit_layer<'a>(
    query: &'a Sequence,
    overlap: &Overlap,
    window: &mut Window<'a>,
    q_first: i64,
    q_last: i64,
    t_first: i64,
    t_last: i64,
) -> Result<()> {
    let begin = q_first as usize;
    let end = (q_last + 1) as usize;
    if begin >= end {
        return Ok(());
    }
    let strand_len = match overlap.strand() {
        Strand::Forward => query.data().len(),
        Strand::Reverse => query.reverse_complement().len(),
    };
    if end > strand_len {
        return Err(Error::BadFormat(format!(
            "CIGAR overruns query {} ({} > {})",
            overlap.q_id(),
            end,
            strand_len
        )));
    }

    let (data, quality): (&[u8], &[u8]) = match overlap.strand() {
        Strand::Forward => (
            &query.data()[begin..end],
            if query.quality().is_empty() {
                &[]
            } else {
                &query.quality()[begin..end]
            },
        ),
        Strand::Reverse => (
            &query.reverse_complement()[begin..end],
            if query.reverse_quality().is_empty() {
                &[]
            } else {
                &query.reverse_quality()[begin..end]
            },
        ),
    };

    window.add_layer(data, quality, t_first as u32, t_last as u32)
}

use std::cell::RefCell;

use lib_wfa2::affine_wavefront::{AffineWavefronts, AlignmentStatus, MemoryMode};
use rustc_hash::FxHashMap;

use crate::error::{Error, Result};
use crate::sequence::Sequence;

/// Strand orientation of an overlap.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Strand {
    #[default]
    Forward,
    Reverse,
}

thread_local! {
    static CIGAR_ALIGNER: RefCell<Option<AffineWavefronts>> = const { RefCell::new(None) };
}

/// Execute a closure with the thread-local pairwise aligner used to
/// materialize CIGAR strings for overlaps that arrived without one.
fn with_cigar_aligner<F, R>(f: F) -> R
where
    F: FnOnce(&mut AffineWavefronts) -> R,
{
    CIGAR_ALIGNER.with(|cell| {
        let mut aligner = cell.borrow_mut();
        if aligner.is_none() {
            let mut wf = AffineWavefronts::with_penalties(0, 4, 6, 2);
            wf.set_memory_mode(MemoryMode::Ultralow);
            *aligner = Some(wf);
        }
        f(aligner.as_mut().unwrap())
    })
}

/// An alignment between a query and a target sequence. Created by a format
/// parser with names or raw numeric ids; `transmute` resolves both sides to
/// indices into the dataset's sequence vector.
pub struct Overlap {
    q_name: String,
    q_id: u32,
    q_begin: u32,
    q_end: u32,
    q_length: u32,

    t_name: String,
    t_id: u32,
    t_begin: u32,
    t_end: u32,
    t_length: u32,

    strand: Strand,
    length: u32,
    error: f64,
    cigar: String,

    is_valid: bool,
    is_transmuted: bool,
}

impl Overlap {
    /// MHAP record: numeric ids, no CIGAR; `error = 1 - accuracy`.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_mhap(
        a_id: u32,
        b_id: u32,
        accuracy: f64,
        a_rc: u32,
        a_begin: u32,
        a_end: u32,
        a_length: u32,
        b_rc: u32,
        b_begin: u32,
        b_end: u32,
        b_length: u32,
    ) -> Self {
        Overlap {
            q_name: String::new(),
            q_id: a_id,
            q_begin: a_begin,
            q_end: a_end,
            q_length: a_length,
            t_name: String::new(),
            t_id: b_id,
            t_begin: b_begin,
            t_end: b_end,
            t_length: b_length,
            strand: if a_rc != b_rc { Strand::Reverse } else { Strand::Forward },
            length: (a_end - a_begin).max(b_end - b_begin),
            error: 1.0 - accuracy.min(1.0),
            cigar: String::new(),
            is_valid: true,
            is_transmuted: false,
        }
    }

    /// PAF record: names, `error = 1 - matching_bases / block_length`, CIGAR
    /// taken from an optional `cg:Z:` tag.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_paf(
        q_name: String,
        q_length: u32,
        q_begin: u32,
        q_end: u32,
        strand: Strand,
        t_name: String,
        t_length: u32,
        t_begin: u32,
        t_end: u32,
        matching_bases: u32,
        block_length: u32,
        cigar: String,
    ) -> Self {
        let error = if block_length > 0 {
            1.0 - (f64::from(matching_bases) / f64::from(block_length)).min(1.0)
        } else {
            1.0
        };
        Overlap {
            q_name,
            q_id: 0,
            q_begin,
            q_end,
            q_length,
            t_name,
            t_id: 0,
            t_begin,
            t_end,
            t_length,
            strand,
            length: q_end.saturating_sub(q_begin).max(t_end.saturating_sub(t_begin)),
            error,
            cigar,
            is_valid: true,
            is_transmuted: false,
        }
    }

    /// SAM record: query coordinates, target span, and the error rate are all
    /// derived from the CIGAR. Clips consume the query only; for reverse
    /// strand records the clip-derived coordinates are mapped back onto the
    /// forward read strand. Unmapped records and records without a CIGAR are
    /// invalid from the start.
    pub(crate) fn from_sam(
        q_name: String,
        flag: u32,
        t_name: String,
        pos: u32,
        cigar: String,
    ) -> Self {
        let strand = if (flag & 0x10) != 0 { Strand::Reverse } else { Strand::Forward };
        let mapped = (flag & 0x4) == 0 && t_name != "*" && cigar != "*" && !cigar.is_empty();

        let mut clip_front = 0u32;
        let mut clip_back = 0u32;
        let mut q_span = 0u32;
        let mut t_span = 0u32;
        let mut matches = 0u32;
        let mut alignment_length = 0u32;
        if mapped {
            let mut num = 0u32;
            for &b in cigar.as_bytes() {
                if b.is_ascii_digit() {
                    num = num * 10 + u32::from(b - b'0');
                    continue;
                }
                match b {
                    b'M' | b'=' => {
                        q_span += num;
                        t_span += num;
                        matches += num;
                        alignment_length += num;
                    }
                    b'X' => {
                        q_span += num;
                        t_span += num;
                        alignment_length += num;
                    }
                    b'I' => {
                        q_span += num;
                        alignment_length += num;
                    }
                    b'D' | b'N' => {
                        t_span += num;
                        alignment_length += num;
                    }
                    b'S' | b'H' => {
                        if q_span == 0 {
                            clip_front += num;
                        } else {
                            clip_back += num;
                        }
                    }
                    _ => {}
                }
                num = 0;
            }
        }

        let q_length = clip_front + q_span + clip_back;
        // SAM coordinates follow the aligned orientation; the projector walks
        // the forward read strand, so reverse records swap their clips.
        let (q_begin, q_end) = match strand {
            Strand::Forward => (clip_front, clip_front + q_span),
            Strand::Reverse => (clip_back, clip_back + q_span),
        };
        let t_begin = pos.saturating_sub(1);
        let error = if alignment_length > 0 {
            1.0 - f64::from(matches) / f64::from(alignment_length)
        } else {
            1.0
        };

        Overlap {
            q_name,
            q_id: 0,
            q_begin,
            q_end,
            q_length,
            t_name,
            t_id: 0,
            t_begin,
            t_end: t_begin + t_span,
            t_length: 0,
            strand,
            length: q_span.max(t_span),
            error,
            cigar: if mapped { cigar } else { String::new() },
            is_valid: mapped,
            is_transmuted: false,
        }
    }

    pub fn q_id(&self) -> u32 {
        self.q_id
    }

    pub fn q_begin(&self) -> u32 {
        self.q_begin
    }

    pub fn q_end(&self) -> u32 {
        self.q_end
    }

    pub fn q_length(&self) -> u32 {
        self.q_length
    }

    pub fn t_id(&self) -> u32 {
        self.t_id
    }

    pub fn t_begin(&self) -> u32 {
        self.t_begin
    }

    pub fn t_end(&self) -> u32 {
        self.t_end
    }

    pub fn t_length(&self) -> u32 {
        self.t_length
    }

    pub fn strand(&self) -> Strand {
        self.strand
    }

    pub fn length(&self) -> u32 {
        self.length
    }

    pub fn error(&self) -> f64 {
        self.error
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid
    }

    pub fn cigar(&self) -> &str {
        &self.cigar
    }

    /// Resolve name or raw-id references into indices of the dataset's
    /// sequence vector. Name-based formats look up `"{name}q"`/`"{name}t"`;
    /// numeric-id formats look up `(raw << 1) | role_bit`. A failed lookup or
    /// an empty interval marks the overlap invalid. Idempotent.
    pub fn transmute(
        &mut self,
        sequences: &[Sequence],
        name_to_id: &FxHashMap<String, u32>,
        id_to_id: &FxHashMap<u64, u32>,
    ) {
        if self.is_transmuted {
            return;
        }
        self.is_transmuted = true;
        if !self.is_valid {
            return;
        }

        let q_id = if self.q_name.is_empty() {
            id_to_id.get(&(u64::from(self.q_id) << 1)).copied()
        } else {
            name_to_id.get(&format!("{}q", self.q_name)).copied()
        };
        let t_id = if self.t_name.is_empty() {
            id_to_id.get(&((u64::from(self.t_id) << 1) | 1)).copied()
        } else {
            name_to_id.get(&format!("{}t", self.t_name)).copied()
        };

        let (q_id, t_id) = match (q_id, t_id) {
            (Some(q), Some(t)) => (q, t),
            _ => {
                self.is_valid = false;
                return;
            }
        };
        self.q_id = q_id;
        self.t_id = t_id;
        self.q_name = String::new();
        self.t_name = String::new();

        if self.q_length == 0 {
            self.q_length = sequences[q_id as usize].data().len() as u32;
        }
        if self.t_length == 0 {
            self.t_length = sequences[t_id as usize].data().len() as u32;
        }

        self.is_valid = self.q_begin < self.q_end
            && self.q_end <= self.q_length
            && self.t_begin < self.t_end
            && self.t_end <= self.t_length;
    }

    /// Materialize the CIGAR if the overlap source did not provide one, by
    /// globally aligning the overlapping query segment (reverse-complemented
    /// for reverse-strand overlaps) against the target segment.
    pub fn ensure_cigar(&mut self, sequences: &[Sequence]) -> Result<()> {
        if !self.cigar.is_empty() {
            return Ok(());
        }

        let query_seq = &sequences[self.q_id as usize];
        let query = match self.strand {
            Strand::Forward => {
                &query_seq.data()[self.q_begin as usize..self.q_end as usize]
            }
            Strand::Reverse => {
                let len = self.q_length as usize;
                &query_seq.reverse_complement()
                    [len - self.q_end as usize..len - self.q_begin as usize]
            }
        };
        let target = &sequences[self.t_id as usize].data()
            [self.t_begin as usize..self.t_end as usize];

        let (q_id, t_id) = (self.q_id, self.t_id);
        self.cigar = with_cigar_aligner(|aligner| match aligner.align(target, query) {
            AlignmentStatus::Completed => Ok(run_length_encode(aligner.cigar())),
            _ => Err(Error::Alignment(format!(
                "pairwise alignment of query {q_id} against target {t_id} did not complete"
            ))),
        })?;
        Ok(())
    }
}

/// Compress WFA's per-base operation string into run-length CIGAR form,
/// rewriting `M` (exact match in WFA output) to `=`.
fn run_length_encode(raw: &[u8]) -> String {
    let mut out = String::with_capacity(raw.len() / 4 + 8);
    let mut i = 0;
    while i < raw.len() {
        let op = raw[i];
        let mut j = i + 1;
        while j < raw.len() && raw[j] == op {
            j += 1;
        }
        out.push_str(&(j - i).to_string());
        out.push(if op == b'M' { '=' } else { op as char });
        i = j;
    }
    out
}

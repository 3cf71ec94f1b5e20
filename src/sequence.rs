/// Role a sequence plays in the dataset, assigned during assembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceKind {
    Target,
    Query,
    TargetAndQuery,
}

/// A DNA sequence with optional per-base Phred qualities and lazily
/// materialized reverse mirrors. The reverse complement (and the reversed
/// quality string, which is not base-complemented) exist only for
/// sequences referenced by reverse-strand overlaps.
pub struct Sequence {
    name: String,
    data: Vec<u8>,
    quality: Vec<u8>,
    reverse_complement: Vec<u8>,
    reverse_quality: Vec<u8>,
    kind: SequenceKind,
}

impl Sequence {
    pub fn new(name: String, data: Vec<u8>) -> Self {
        Sequence {
            name,
            data,
            quality: Vec::new(),
            reverse_complement: Vec::new(),
            reverse_quality: Vec::new(),
            kind: SequenceKind::Query,
        }
    }

    pub fn with_quality(name: String, data: Vec<u8>, quality: Vec<u8>) -> Self {
        Sequence {
            name,
            data,
            quality,
            reverse_complement: Vec::new(),
            reverse_quality: Vec::new(),
            kind: SequenceKind::Query,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn quality(&self) -> &[u8] {
        &self.quality
    }

    pub fn reverse_complement(&self) -> &[u8] {
        &self.reverse_complement
    }

    pub fn reverse_quality(&self) -> &[u8] {
        &self.reverse_quality
    }

    pub fn kind(&self) -> SequenceKind {
        self.kind
    }

    pub(crate) fn set_kind(&mut self, kind: SequenceKind) {
        self.kind = kind;
    }

    /// Materialize the reverse complement and reversed qualities. Idempotent.
    pub fn create_reverse_complement(&mut self) {
        if !self.reverse_complement.is_empty() || self.data.is_empty() {
            return;
        }
        self.reverse_complement = self.data.iter().rev().map(|&b| complement(b)).collect();
        if !self.quality.is_empty() {
            self.reverse_quality = self.quality.iter().rev().copied().collect();
        }
    }

    /// Finalize which fields are retained once the dataset knows how this
    /// sequence is used: names are kept for targets only, forward data for
    /// targets and forward-strand queries, reverse mirrors for sequences
    /// referenced by reverse-strand overlaps.
    pub fn transmute(&mut self, has_name: bool, has_data: bool, has_reverse_data: bool) {
        if !has_name {
            self.name = String::new();
        }
        if has_reverse_data {
            self.create_reverse_complement();
        }
        if !has_data {
            self.data = Vec::new();
            self.quality = Vec::new();
        }
    }
}

fn complement(base: u8) -> u8 {
    match base {
        b'A' => b'T',
        b'C' => b'G',
        b'G' => b'C',
        b'T' => b'A',
        b'a' => b't',
        b'c' => b'g',
        b'g' => b'c',
        b't' => b'a',
        _ => b'N',
    }
}

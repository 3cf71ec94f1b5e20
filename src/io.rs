//! Input parsing for sequence and overlap files.
//!
//! Sequences arrive as FASTA/FASTQ, overlaps as MHAP/PAF/SAM, each optionally
//! gzip-compressed. Both readers hand out records in byte-bounded chunks so
//! the dataset assembler can stream large inputs.

use std::fs::File;
use std::io::{BufRead, BufReader};

use flate2::read::MultiGzDecoder;

use crate::error::{Error, Result};
use crate::overlap::{Overlap, Strand};
use crate::sequence::Sequence;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SequenceFormat {
    Fasta,
    Fastq,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OverlapFormat {
    Mhap,
    Paf,
    Sam,
}

fn open_reader(path: &str) -> Result<Box<dyn BufRead>> {
    let file = File::open(path)
        .map_err(|e| Error::Io(std::io::Error::new(e.kind(), format!("{path}: {e}"))))?;
    if path.ends_with(".gz") {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Streaming FASTA/FASTQ reader dispatched on the file suffix.
pub struct SequenceFile {
    format: SequenceFormat,
    reader: Box<dyn BufRead>,
    // FASTA header consumed while scanning for the end of the previous record
    pending_header: Option<String>,
    path: String,
}

impl SequenceFile {
    pub fn open(path: &str) -> Result<Self> {
        let stem = path.strip_suffix(".gz").unwrap_or(path);
        let format = if [".fasta", ".fa", ".fna"].iter().any(|s| stem.ends_with(s)) {
            SequenceFormat::Fasta
        } else if [".fastq", ".fq"].iter().any(|s| stem.ends_with(s)) {
            SequenceFormat::Fastq
        } else {
            return Err(Error::BadFormat(format!(
                "file {path} has unsupported format extension (valid extensions: \
                 .fasta, .fa, .fna, .fastq, .fq, optionally gzipped)"
            )));
        };
        Ok(SequenceFile {
            format,
            reader: open_reader(path)?,
            pending_header: None,
            path: path.to_string(),
        })
    }

    /// Parse records until their cumulative size exceeds `max_bytes` or the
    /// file is exhausted. An empty vector signals end of input.
    pub fn parse_chunk(&mut self, max_bytes: u64) -> Result<Vec<Sequence>> {
        match self.format {
            SequenceFormat::Fasta => self.parse_fasta_chunk(max_bytes),
            SequenceFormat::Fastq => self.parse_fastq_chunk(max_bytes),
        }
    }

    fn read_line(&mut self, buf: &mut String) -> Result<bool> {
        buf.clear();
        let n = self.reader.read_line(buf)?;
        while buf.ends_with('\n') || buf.ends_with('\r') {
            buf.pop();
        }
        Ok(n > 0)
    }

    fn parse_fasta_chunk(&mut self, max_bytes: u64) -> Result<Vec<Sequence>> {
        let mut records = Vec::new();
        let mut bytes = 0u64;
        let mut line = String::new();

        loop {
            let header = match self.pending_header.take() {
                Some(h) => h,
                None => {
                    // skip blank lines between records
                    loop {
                        if !self.read_line(&mut line)? {
                            return Ok(records);
                        }
                        if !line.is_empty() {
                            break;
                        }
                    }
                    if !line.starts_with('>') {
                        return Err(Error::BadFormat(format!(
                            "{}: expected FASTA header, found {line:?}",
                            self.path
                        )));
                    }
                    line.clone()
                }
            };

            let name = parse_record_name(&header, &self.path)?;
            let mut data = Vec::new();
            loop {
                if !self.read_line(&mut line)? {
                    break;
                }
                if line.starts_with('>') {
                    self.pending_header = Some(line.clone());
                    break;
                }
                data.extend_from_slice(line.as_bytes());
            }
            if data.is_empty() {
                return Err(Error::BadFormat(format!(
                    "{}: sequence {name} has no data",
                    self.path
                )));
            }

            bytes += (name.len() + data.len()) as u64;
            records.push(Sequence::new(name, data));
            if bytes >= max_bytes {
                return Ok(records);
            }
        }
    }

    fn parse_fastq_chunk(&mut self, max_bytes: u64) -> Result<Vec<Sequence>> {
        let mut records = Vec::new();
        let mut bytes = 0u64;
        let mut line = String::new();

        loop {
            loop {
                if !self.read_line(&mut line)? {
                    return Ok(records);
                }
                if !line.is_empty() {
                    break;
                }
            }
            if !line.starts_with('@') {
                return Err(Error::BadFormat(format!(
                    "{}: expected FASTQ header, found {line:?}",
                    self.path
                )));
            }
            let name = parse_record_name(&line, &self.path)?;

            if !self.read_line(&mut line)? {
                return Err(Error::BadFormat(format!(
                    "{}: truncated FASTQ record {name}",
                    self.path
                )));
            }
            let data = line.as_bytes().to_vec();

            if !self.read_line(&mut line)? || !line.starts_with('+') {
                return Err(Error::BadFormat(format!(
                    "{}: missing separator in FASTQ record {name}",
                    self.path
                )));
            }

            if !self.read_line(&mut line)? {
                return Err(Error::BadFormat(format!(
                    "{}: truncated FASTQ record {name}",
                    self.path
                )));
            }
            let quality = line.as_bytes().to_vec();
            if quality.len() != data.len() {
                return Err(Error::BadFormat(format!(
                    "{}: quality length does not match data length in record {name}",
                    self.path
                )));
            }
            if data.is_empty() {
                return Err(Error::BadFormat(format!(
                    "{}: sequence {name} has no data",
                    self.path
                )));
            }

            bytes += (name.len() + 2 * data.len()) as u64;
            records.push(Sequence::with_quality(name, data, quality));
            if bytes >= max_bytes {
                return Ok(records);
            }
        }
    }
}

fn parse_record_name(header: &str, path: &str) -> Result<String> {
    header[1..]
        .split_whitespace()
        .next()
        .map(str::to_string)
        .ok_or_else(|| Error::BadFormat(format!("{path}: record header has no name")))
}

/// Streaming MHAP/PAF/SAM reader dispatched on the file suffix.
pub struct OverlapFile {
    format: OverlapFormat,
    reader: Box<dyn BufRead>,
    path: String,
    line_number: u64,
}

impl OverlapFile {
    pub fn open(path: &str) -> Result<Self> {
        let stem = path.strip_suffix(".gz").unwrap_or(path);
        let format = if stem.ends_with(".mhap") {
            OverlapFormat::Mhap
        } else if stem.ends_with(".paf") {
            OverlapFormat::Paf
        } else if stem.ends_with(".sam") {
            OverlapFormat::Sam
        } else {
            return Err(Error::BadFormat(format!(
                "file {path} has unsupported format extension (valid extensions: \
                 .mhap, .paf, .sam, optionally gzipped)"
            )));
        };
        Ok(OverlapFile {
            format,
            reader: open_reader(path)?,
            path: path.to_string(),
            line_number: 0,
        })
    }

    /// Parse overlap records until their cumulative size exceeds `max_bytes`
    /// or the file is exhausted. An empty vector signals end of input.
    pub fn parse_chunk(&mut self, max_bytes: u64) -> Result<Vec<Overlap>> {
        let mut records = Vec::new();
        let mut bytes = 0u64;
        let mut line = String::new();

        loop {
            line.clear();
            if self.reader.read_line(&mut line)? == 0 {
                return Ok(records);
            }
            self.line_number += 1;
            let trimmed = line.trim_end_matches(['\n', '\r']);
            if trimmed.is_empty() {
                continue;
            }
            if self.format == OverlapFormat::Sam && trimmed.starts_with('@') {
                continue;
            }

            let record = match self.format {
                OverlapFormat::Mhap => self.parse_mhap_line(trimmed),
                OverlapFormat::Paf => self.parse_paf_line(trimmed),
                OverlapFormat::Sam => self.parse_sam_line(trimmed),
            }?;
            bytes += trimmed.len() as u64;
            records.push(record);
            if bytes >= max_bytes {
                return Ok(records);
            }
        }
    }

    fn malformed(&self, what: &str) -> Error {
        Error::BadFormat(format!(
            "{}: {what} on line {}",
            self.path, self.line_number
        ))
    }

    fn parse_mhap_line(&self, line: &str) -> Result<Overlap> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 12 {
            return Err(self.malformed("not enough fields in MHAP record"));
        }
        let int = |i: usize| -> Result<u32> {
            fields[i]
                .parse::<u32>()
                .map_err(|_| self.malformed("invalid integer field in MHAP record"))
        };
        let accuracy = fields[2]
            .parse::<f64>()
            .map_err(|_| self.malformed("invalid accuracy field in MHAP record"))?;
        Ok(Overlap::from_mhap(
            int(0)?,
            int(1)?,
            accuracy,
            int(4)?,
            int(5)?,
            int(6)?,
            int(7)?,
            int(8)?,
            int(9)?,
            int(10)?,
            int(11)?,
        ))
    }

    fn parse_paf_line(&self, line: &str) -> Result<Overlap> {
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 12 {
            return Err(self.malformed("not enough fields in PAF record"));
        }
        let int = |i: usize| -> Result<u32> {
            fields[i]
                .parse::<u32>()
                .map_err(|_| self.malformed("invalid integer field in PAF record"))
        };
        let strand = match fields[4] {
            "+" => Strand::Forward,
            "-" => Strand::Reverse,
            _ => return Err(self.malformed("invalid strand in PAF record")),
        };
        let cigar = fields[12..]
            .iter()
            .find_map(|tag| tag.strip_prefix("cg:Z:"))
            .unwrap_or("")
            .to_string();
        Ok(Overlap::from_paf(
            fields[0].to_string(),
            int(1)?,
            int(2)?,
            int(3)?,
            strand,
            fields[5].to_string(),
            int(6)?,
            int(7)?,
            int(8)?,
            int(9)?,
            int(10)?,
            cigar,
        ))
    }

    fn parse_sam_line(&self, line: &str) -> Result<Overlap> {
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 11 {
            return Err(self.malformed("not enough fields in SAM record"));
        }
        let flag = fields[1]
            .parse::<u32>()
            .map_err(|_| self.malformed("invalid flag field in SAM record"))?;
        let pos = fields[3]
            .parse::<u32>()
            .map_err(|_| self.malformed("invalid position field in SAM record"))?;
        Ok(Overlap::from_sam(
            fields[0].to_string(),
            flag,
            fields[2].to_string(),
            pos,
            fields[5].to_string(),
        ))
    }
}

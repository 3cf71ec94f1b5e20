//! End-to-end tests for the polishing pipeline: load a dataset from files
//! on disk, polish it, and check the emitted records.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use flate2::write::GzEncoder;
use flate2::Compression;
use tempfile::TempDir;

use burnish::dataset::load_dataset;
use burnish::error::Error;
use burnish::polisher::{polish, PolisherConfig};
use burnish::window::PoaConfig;

fn write_file(dir: &Path, name: &str, content: &str) -> String {
    let path = dir.join(name);
    let mut file = File::create(&path).unwrap();
    file.write_all(content.as_bytes()).unwrap();
    path.to_str().unwrap().to_string()
}

fn write_gz(dir: &Path, name: &str, content: &str) -> String {
    let path = dir.join(name);
    let mut encoder = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
    encoder.write_all(content.as_bytes()).unwrap();
    encoder.finish().unwrap();
    path.to_str().unwrap().to_string()
}

fn config(window_length: u32, trim: bool, include_unpolished: bool) -> PolisherConfig {
    PolisherConfig {
        window_length,
        quality_threshold: 10.0,
        trim,
        include_unpolished,
        poa: PoaConfig {
            match_score: 3,
            mismatch: -5,
            gap: -4,
        },
    }
}

#[test]
fn test_passthrough_single_read() {
    let dir = TempDir::new().unwrap();
    let targets = write_file(dir.path(), "targets.fasta", ">t\nAAAAACCCCC\n");
    let reads = write_file(dir.path(), "reads.fasta", ">q\nAAAAACCCCC\n");
    let overlaps = write_file(
        dir.path(),
        "overlaps.paf",
        "q\t10\t0\t10\t+\tt\t10\t0\t10\t10\t10\t255\tcg:Z:10=\n",
    );

    let dataset = load_dataset(&reads, &overlaps, &targets, 0.3, false).unwrap();
    let polished = polish(&config(5, false, true), dataset).unwrap();

    assert_eq!(polished.len(), 1);
    assert_eq!(polished[0].name(), "t LN:i:10 RC:i:1 XC:f:0.0");
    assert_eq!(polished[0].data(), b"AAAAACCCCC");
}

#[test]
fn test_three_read_consensus() {
    let dir = TempDir::new().unwrap();
    let targets = write_file(dir.path(), "targets.fasta", ">t\nACGTACGT\n");
    let reads = write_file(
        dir.path(),
        "reads.fasta",
        ">q1\nACGTACGT\n>q2\nACGTACGT\n>q3\nACGTACGT\n",
    );
    let mut paf = String::new();
    for q in ["q1", "q2", "q3"] {
        paf.push_str(&format!("{q}\t8\t0\t8\t+\tt\t8\t0\t8\t8\t8\t255\tcg:Z:8=\n"));
    }
    let overlaps = write_file(dir.path(), "overlaps.paf", &paf);

    let dataset = load_dataset(&reads, &overlaps, &targets, 0.3, true).unwrap();
    let polished = polish(&config(8, false, false), dataset).unwrap();

    assert_eq!(polished.len(), 1);
    assert_eq!(polished[0].name(), "t LN:i:8 RC:i:3 XC:f:1.0");
    assert_eq!(polished[0].data(), b"ACGTACGT");
}

#[test]
fn test_consensus_corrects_draft_errors() {
    // the draft carries a substitution at position 3 that every read refutes
    let dir = TempDir::new().unwrap();
    let targets = write_file(dir.path(), "targets.fasta", ">t\nACGCACGTACGTACGT\n");
    let reads = write_file(
        dir.path(),
        "reads.fasta",
        ">q1\nACGTACGTACGTACGT\n>q2\nACGTACGTACGTACGT\n>q3\nACGTACGTACGTACGT\n",
    );
    let mut paf = String::new();
    for q in ["q1", "q2", "q3"] {
        paf.push_str(&format!("{q}\t16\t0\t16\t+\tt\t16\t0\t16\t15\t16\t255\n"));
    }
    let overlaps = write_file(dir.path(), "overlaps.paf", &paf);

    let dataset = load_dataset(&reads, &overlaps, &targets, 0.3, true).unwrap();
    let polished = polish(&config(16, false, false), dataset).unwrap();

    assert_eq!(polished.len(), 1);
    assert_eq!(polished[0].data(), b"ACGTACGTACGTACGT");
}

#[test]
fn test_gzipped_inputs() {
    let dir = TempDir::new().unwrap();
    let targets = write_gz(dir.path(), "targets.fasta.gz", ">t\nACGTACGT\n");
    let reads = write_gz(
        dir.path(),
        "reads.fastq.gz",
        "@q1\nACGTACGT\n+\nIIIIIIII\n@q2\nACGTACGT\n+\nIIIIIIII\n@q3\nACGTACGT\n+\nIIIIIIII\n",
    );
    let mut paf = String::new();
    for q in ["q1", "q2", "q3"] {
        paf.push_str(&format!("{q}\t8\t0\t8\t+\tt\t8\t0\t8\t8\t8\t255\tcg:Z:8=\n"));
    }
    let overlaps = write_gz(dir.path(), "overlaps.paf.gz", &paf);

    let dataset = load_dataset(&reads, &overlaps, &targets, 0.3, true).unwrap();
    let polished = polish(&config(8, false, false), dataset).unwrap();

    assert_eq!(polished.len(), 1);
    assert_eq!(polished[0].data(), b"ACGTACGT");
}

#[test]
fn test_mhap_overlaps_with_numeric_ids() {
    let dir = TempDir::new().unwrap();
    let targets = write_file(dir.path(), "targets.fasta", ">t\nACGTACGT\n");
    let reads = write_file(
        dir.path(),
        "reads.fasta",
        ">q1\nACGTACGT\n>q2\nACGTACGT\n>q3\nACGTACGT\n",
    );
    // query ids follow arrival order, target ids follow target order
    let mut mhap = String::new();
    for q in 0..3 {
        mhap.push_str(&format!("{q} 0 1.0 1 0 0 8 8 0 0 8 8\n"));
    }
    let overlaps = write_file(dir.path(), "overlaps.mhap", &mhap);

    let dataset = load_dataset(&reads, &overlaps, &targets, 0.3, true).unwrap();
    let polished = polish(&config(8, false, false), dataset).unwrap();

    assert_eq!(polished.len(), 1);
    assert_eq!(polished[0].name(), "t LN:i:8 RC:i:3 XC:f:1.0");
    assert_eq!(polished[0].data(), b"ACGTACGT");
}

#[test]
fn test_sam_overlaps() {
    let dir = TempDir::new().unwrap();
    let targets = write_file(dir.path(), "targets.fasta", ">t\nACGTACGT\n");
    let reads = write_file(
        dir.path(),
        "reads.fasta",
        ">q1\nACGTACGT\n>q2\nACGTACGT\n>q3\nACGTACGT\n",
    );
    let mut sam = String::from("@HD\tVN:1.6\n@SQ\tSN:t\tLN:8\n");
    for q in ["q1", "q2", "q3"] {
        sam.push_str(&format!(
            "{q}\t0\tt\t1\t60\t8=\t*\t0\t0\tACGTACGT\tIIIIIIII\n"
        ));
    }
    let overlaps = write_file(dir.path(), "overlaps.sam", &sam);

    let dataset = load_dataset(&reads, &overlaps, &targets, 0.3, true).unwrap();
    let polished = polish(&config(8, false, false), dataset).unwrap();

    assert_eq!(polished.len(), 1);
    assert_eq!(polished[0].data(), b"ACGTACGT");
}

#[test]
fn test_reverse_strand_reads() {
    let dir = TempDir::new().unwrap();
    // reads are the reverse complement of the target
    let targets = write_file(dir.path(), "targets.fasta", ">t\nAACCGGTT\n");
    let reads = write_file(
        dir.path(),
        "reads.fasta",
        ">q1\nAACCGGTT\n>q2\nAACCGGTT\n>q3\nAACCGGTT\n",
    );
    let mut paf = String::new();
    for q in ["q1", "q2", "q3"] {
        paf.push_str(&format!("{q}\t8\t0\t8\t-\tt\t8\t0\t8\t8\t8\t255\tcg:Z:8=\n"));
    }
    let overlaps = write_file(dir.path(), "overlaps.paf", &paf);

    let dataset = load_dataset(&reads, &overlaps, &targets, 0.3, true).unwrap();
    let polished = polish(&config(8, false, false), dataset).unwrap();

    assert_eq!(polished.len(), 1);
    // rc("AACCGGTT") == "AACCGGTT"
    assert_eq!(polished[0].data(), b"AACCGGTT");
}

#[test]
fn test_trim_output_never_longer_than_untrimmed() {
    let dir = TempDir::new().unwrap();
    let target_seq = "ACGTACGTACGTACGTACGT";
    // reads cover only the tail of the single window, so the window's first
    // four columns rest on the backbone alone and fall under the coverage
    // threshold when trimming
    let tail = &target_seq[4..20];
    let targets = write_file(dir.path(), "targets.fasta", &format!(">t\n{target_seq}\n"));
    let reads = write_file(
        dir.path(),
        "reads.fasta",
        &format!(">q1\n{tail}\n>q2\n{tail}\n>q3\n{tail}\n>q4\n{tail}\n"),
    );
    let mut paf = String::new();
    for q in ["q1", "q2", "q3", "q4"] {
        paf.push_str(&format!(
            "{q}\t16\t0\t16\t+\tt\t20\t4\t20\t16\t16\t255\tcg:Z:16=\n"
        ));
    }
    let overlaps = write_file(dir.path(), "overlaps.paf", &paf);

    let untrimmed = {
        let dataset = load_dataset(&reads, &overlaps, &targets, 0.3, true).unwrap();
        polish(&config(20, false, true), dataset).unwrap()
    };
    let trimmed = {
        let dataset = load_dataset(&reads, &overlaps, &targets, 0.3, true).unwrap();
        polish(&config(20, true, true), dataset).unwrap()
    };

    assert_eq!(untrimmed.len(), 1);
    assert_eq!(trimmed.len(), 1);
    assert_eq!(untrimmed[0].data(), target_seq.as_bytes());
    assert!(trimmed[0].data().len() < untrimmed[0].data().len());
}

#[test]
fn test_output_tags_are_consistent() {
    let dir = TempDir::new().unwrap();
    let targets = write_file(dir.path(), "targets.fasta", ">t\nACGTACGTAC\n");
    let reads = write_file(
        dir.path(),
        "reads.fasta",
        ">q1\nACGTACGTAC\n>q2\nACGTACGTAC\n>q3\nACGTACGTAC\n",
    );
    let mut paf = String::new();
    for q in ["q1", "q2", "q3"] {
        paf.push_str(&format!(
            "{q}\t10\t0\t10\t+\tt\t10\t0\t10\t10\t10\t255\tcg:Z:10=\n"
        ));
    }
    let overlaps = write_file(dir.path(), "overlaps.paf", &paf);

    let dataset = load_dataset(&reads, &overlaps, &targets, 0.3, true).unwrap();
    // windows of 4: [0,4) [4,8) [8,10); the last window's boundary is
    // reached too, so all three windows carry three layers
    let polished = polish(&config(4, false, true), dataset).unwrap();

    assert_eq!(polished.len(), 1);
    let name = polished[0].name().to_string();
    let parts: Vec<&str> = name.split(' ').collect();
    assert_eq!(parts[0], "t");
    let ln: usize = parts[1].strip_prefix("LN:i:").unwrap().parse().unwrap();
    let rc: usize = parts[2].strip_prefix("RC:i:").unwrap().parse().unwrap();
    let xc: f64 = parts[3].strip_prefix("XC:f:").unwrap().parse().unwrap();
    assert_eq!(ln, polished[0].data().len());
    assert_eq!(rc, 3);
    assert!((0.0..=1.0).contains(&xc));
    assert!((xc - 1.0).abs() < 1e-9);
}

#[test]
fn test_unsupported_extension_fails() {
    let dir = TempDir::new().unwrap();
    let targets = write_file(dir.path(), "targets.fasta", ">t\nACGT\n");
    let reads = write_file(dir.path(), "reads.fasta", ">q\nACGT\n");
    let overlaps = write_file(dir.path(), "overlaps.tsv", "q\t4\t0\t4\t+\tt\t4\t0\t4\t4\t4\t255\n");

    assert!(matches!(
        load_dataset(&reads, &overlaps, &targets, 0.3, false),
        Err(Error::BadFormat(_))
    ));
}

#[test]
fn test_missing_cigar_is_materialized() {
    let dir = TempDir::new().unwrap();
    let targets = write_file(dir.path(), "targets.fasta", ">t\nACGTACGTACGTACGT\n");
    let reads = write_file(
        dir.path(),
        "reads.fasta",
        ">q1\nACGTACGTACGTACGT\n>q2\nACGTACGTACGTACGT\n>q3\nACGTACGTACGTACGT\n",
    );
    // no cg:Z: tag: the align phase fills the CIGAR in
    let mut paf = String::new();
    for q in ["q1", "q2", "q3"] {
        paf.push_str(&format!("{q}\t16\t0\t16\t+\tt\t16\t0\t16\t16\t16\t255\n"));
    }
    let overlaps = write_file(dir.path(), "overlaps.paf", &paf);

    let dataset = load_dataset(&reads, &overlaps, &targets, 0.3, true).unwrap();
    let polished = polish(&config(16, false, false), dataset).unwrap();

    assert_eq!(polished.len(), 1);
    assert_eq!(polished[0].data(), b"ACGTACGTACGTACGT");
}

//! FASTA transcript input.
//!
//! Input records carry the expression level in the header, separated from
//! the name by `$`: `>NAME$LEVEL`. Records with malformed headers or
//! invalid bases are skipped with a warning; transcripts whose effective
//! level (`floor(level * expr_mul)`) is zero are skipped silently. Input
//! comes from files (gzip transparent) or stdin and is streamed to the
//! pipeline through a bounded channel so parsing overlaps fragmentation.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::PathBuf;
use std::thread;

use crossbeam_channel::{bounded, Receiver};
use flate2::read::MultiGzDecoder;
use tracing::warn;

use crate::error::{SimError, SimResult};
use crate::transcript::Transcript;

/// Capacity of the input-stage transcript channel.
const CHANNEL_CAP: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationSet {
    /// `{A, T, G, C}` only.
    Strict,
    /// The IUPAC ambiguity alphabet.
    Iupac,
}

impl ValidationSet {
    pub fn is_valid(&self, base: u8) -> bool {
        match self {
            ValidationSet::Strict => matches!(base, b'A' | b'T' | b'G' | b'C'),
            ValidationSet::Iupac => matches!(
                base,
                b'A' | b'T'
                    | b'G'
                    | b'C'
                    | b'R'
                    | b'Y'
                    | b'K'
                    | b'M'
                    | b'S'
                    | b'W'
                    | b'B'
                    | b'D'
                    | b'H'
                    | b'V'
                    | b'N'
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FastaRecord {
    pub header: String,
    pub seq: String,
}

/// Open a FASTA file for reading, handling gzipped files automatically.
pub fn open_fasta(path: &str) -> SimResult<Box<dyn BufRead + Send>> {
    let file = File::open(path)
        .map_err(|e| SimError::Input(format!("could not open input file {}: {}", path, e)))?;
    if path.ends_with(".gz") {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Stream FASTA records without loading the file into memory.
pub fn stream_fasta_records<R: BufRead>(reader: R) -> FastaStreamParser<R> {
    FastaStreamParser {
        lines: reader.lines(),
        pending_header: None,
        done: false,
    }
}

pub struct FastaStreamParser<R: BufRead> {
    lines: io::Lines<R>,
    pending_header: Option<String>,
    done: bool,
}

impl<R: BufRead> Iterator for FastaStreamParser<R> {
    type Item = io::Result<FastaRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut header = self.pending_header.take();
        let mut seq = String::new();

        loop {
            match self.lines.next() {
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(e));
                }
                Some(Ok(line)) => {
                    let line = line.trim_end();
                    if let Some(rest) = line.strip_prefix('>') {
                        if let Some(h) = header {
                            self.pending_header = Some(rest.to_string());
                            return Some(Ok(FastaRecord { header: h, seq }));
                        }
                        header = Some(rest.to_string());
                    } else if header.is_some() {
                        seq.push_str(line.trim());
                    }
                    // Leading junk before the first '>' is ignored.
                }
                None => {
                    self.done = true;
                    return header.map(|h| Ok(FastaRecord { header: h, seq }));
                }
            }
        }
    }
}

/// Parse a `NAME$LEVEL` header. `None` (with a warning) for malformed
/// records.
pub fn parse_header(header: &str) -> Option<(String, u64)> {
    let mut parts = header.splitn(2, '$');
    let name = parts.next().unwrap_or("");
    let level = match parts.next() {
        Some(l) => l,
        None => {
            warn!("Skipping transcript with malformed name: {}", header);
            return None;
        }
    };
    if name.is_empty() {
        warn!("Skipping transcript with malformed name: {}", header);
        return None;
    }
    match level.trim().parse::<u64>() {
        Ok(level) => Some((name.to_string(), level)),
        Err(_) => {
            warn!("Skipping transcript with malformed name: {}", header);
            None
        }
    }
}

/// Uppercase and validate a sequence. `None` (with a warning) when a base
/// falls outside the validation set.
fn validate_seq(name: &str, seq: &str, validation: ValidationSet) -> Option<String> {
    let upper = seq.to_ascii_uppercase();
    for &b in upper.as_bytes() {
        if !validation.is_valid(b) {
            warn!(
                "Invalid base \"{}\" in sequence \"{}\"",
                b as char, name
            );
            return None;
        }
    }
    Some(upper)
}

pub struct InputConfig {
    /// Input files; empty means stdin.
    pub files: Vec<String>,
    pub expr_mul: f64,
    pub validation: ValidationSet,
    pub polya_max: u32,
    pub spill_dir: Option<PathBuf>,
}

/// Launch the input stage: a thread that parses transcripts and feeds them
/// to the pipeline through a bounded channel. Files are opened up front so
/// missing inputs fail before any work starts.
pub fn spawn_transcript_stage(cfg: InputConfig) -> SimResult<Receiver<SimResult<Transcript>>> {
    let mut readers: Vec<Box<dyn BufRead + Send>> = Vec::new();
    if cfg.files.is_empty() {
        readers.push(Box::new(BufReader::new(io::stdin())));
    } else {
        for file in &cfg.files {
            readers.push(open_fasta(file)?);
        }
    }

    let (tx, rx) = bounded::<SimResult<Transcript>>(CHANNEL_CAP);
    thread::spawn(move || {
        let mut next_id = 0u64;
        for reader in readers {
            for record in stream_fasta_records(reader) {
                let record = match record {
                    Ok(r) => r,
                    Err(e) => {
                        let _ = tx.send(Err(SimError::Input(format!(
                            "error while reading input: {}",
                            e
                        ))));
                        return;
                    }
                };
                let Some((name, level)) = parse_header(&record.header) else {
                    continue;
                };
                let Some(seq) = validate_seq(&name, &record.seq, cfg.validation) else {
                    continue;
                };
                let effective = (level as f64 * cfg.expr_mul).floor() as u64;
                if effective == 0 {
                    continue;
                }
                let tr = Transcript::new(
                    next_id,
                    &name,
                    &seq,
                    effective,
                    cfg.polya_max,
                    cfg.spill_dir.as_deref(),
                );
                next_id += 1;
                if tx.send(Ok(tr)).is_err() {
                    return;
                }
            }
        }
    });
    Ok(rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn streams_multi_line_records() {
        let data = b">a$1\nACGT\nacgt\n>b$2\nTTTT\n" as &[u8];
        let records: Vec<FastaRecord> = stream_fasta_records(data)
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].header, "a$1");
        assert_eq!(records[0].seq, "ACGTacgt");
        assert_eq!(records[1].seq, "TTTT");
    }

    #[test]
    fn header_grammar() {
        assert_eq!(parse_header("tx1$10"), Some(("tx1".to_string(), 10)));
        assert_eq!(parse_header("tx1$ 10"), Some(("tx1".to_string(), 10)));
        assert_eq!(parse_header("tx1"), None); // missing '$'
        assert_eq!(parse_header("$10"), None); // empty name
        assert_eq!(parse_header("tx1$ten"), None); // non-integer level
    }

    #[test]
    fn validation_sets() {
        assert!(ValidationSet::Strict.is_valid(b'G'));
        assert!(!ValidationSet::Strict.is_valid(b'N'));
        assert!(ValidationSet::Iupac.is_valid(b'N'));
        assert!(!ValidationSet::Iupac.is_valid(b'X'));
    }

    fn write_fasta(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", content).unwrap();
        file
    }

    #[test]
    fn bad_records_are_dropped_good_ones_streamed() {
        let file = write_fasta(
            ">good$2\nacgtACGT\n>noLevel\nAAAA\n>badBase$3\nACGN\n>zeroLevel$0\nACGT\n>also_good$1\nGGCC\n",
        );
        let rx = spawn_transcript_stage(InputConfig {
            files: vec![file.path().to_string_lossy().into_owned()],
            expr_mul: 1.0,
            validation: ValidationSet::Strict,
            polya_max: 4,
            spill_dir: None,
        })
        .unwrap();

        let transcripts: Vec<Transcript> = rx.iter().map(|r| r.unwrap()).collect();
        assert_eq!(transcripts.len(), 2);
        assert_eq!(transcripts[0].name(), "good");
        assert_eq!(transcripts[0].expr_level(), 2);
        // Uppercased, poly-A headroom appended.
        assert_eq!(transcripts[0].seq(), b"ACGTACGTAAAA");
        assert_eq!(transcripts[1].name(), "also_good");
        assert_eq!(transcripts[1].id(), 1);
    }

    #[test]
    fn expression_multiplier_floors() {
        let file = write_fasta(">a$3\nACGT\n>b$1\nACGT\n");
        let rx = spawn_transcript_stage(InputConfig {
            files: vec![file.path().to_string_lossy().into_owned()],
            expr_mul: 0.5,
            validation: ValidationSet::Strict,
            polya_max: 0,
            spill_dir: None,
        })
        .unwrap();
        let transcripts: Vec<Transcript> = rx.iter().map(|r| r.unwrap()).collect();
        // floor(3 * 0.5) = 1; floor(1 * 0.5) = 0 drops the record.
        assert_eq!(transcripts.len(), 1);
        assert_eq!(transcripts[0].expr_level(), 1);
    }

    #[test]
    fn gzipped_input_is_transparent() {
        use flate2::write::GzEncoder;
        use flate2::Compression;

        let mut file = tempfile::Builder::new().suffix(".gz").tempfile().unwrap();
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(b">z$5\nACGTACGT\n").unwrap();
        file.write_all(&enc.finish().unwrap()).unwrap();
        file.flush().unwrap();

        let reader = open_fasta(file.path().to_str().unwrap()).unwrap();
        let records: Vec<FastaRecord> =
            stream_fasta_records(reader).map(|r| r.unwrap()).collect();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].seq, "ACGTACGT");
    }

    #[test]
    fn missing_file_fails_at_startup() {
        let res = spawn_transcript_stage(InputConfig {
            files: vec!["/no/such/file.fa".to_string()],
            expr_mul: 1.0,
            validation: ValidationSet::Strict,
            polya_max: 0,
            spill_dir: None,
        });
        assert!(matches!(res, Err(SimError::Input(_))));
    }
}

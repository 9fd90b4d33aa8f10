//! Emitted fragment records.

use std::fmt;

use crate::transcript::Transcript;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strand {
    Plus,
    Minus,
}

impl fmt::Display for Strand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strand::Plus => write!(f, "+"),
            Strand::Minus => write!(f, "-"),
        }
    }
}

/// One sampled fragment, in forward-strand coordinates on its source
/// transcript. The strand only matters at emission, where it selects the
/// forward or reverse-complement substring.
#[derive(Debug, Clone, Copy)]
pub struct FragRecord {
    pub id: u64,
    pub start: u32,
    pub end: u32,
    pub strand: Strand,
}

impl FragRecord {
    /// FASTA rendering: header carrying the fragment id, source transcript,
    /// strand and forward offsets, followed by the strand-correct sequence.
    pub fn to_fasta(&self, tr: &Transcript) -> String {
        let seq = tr.fragment_seq(self.start, self.end, self.strand);
        format!(
            ">Fg_{}_{} (Strand {} Offset {} -- {})\n{}",
            self.id,
            tr.name(),
            self.strand,
            self.start,
            self.end,
            String::from_utf8_lossy(seq)
        )
    }
}

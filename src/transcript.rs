//! Transcripts and their fragment tables.
//!
//! A transcript owns its forward sequence (with poly-A headroom appended),
//! the precomputed reverse complement, and a two-stage fragment table:
//! a nested `length -> start -> end -> count` map during fragmentation
//! (cheap dedup of identical intervals), flattened into parallel
//! `(starts, ends, counts)` arrays before PCR so the amplification loop
//! runs over contiguous memory. Flattened tables can be spilled to disk
//! and re-hydrated one transcript at a time during sampling.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use ahash::AHashMap;

use crate::error::{SimError, SimResult};
use crate::frag::Strand;
use crate::fragmentor::Fragmentor;
use crate::fragstats::FragStats;
use crate::mixture::TargetMix;
use crate::random::RandGen;
use crate::target::Target;

/// Nested accumulation map: length -> start -> end -> count.
pub type FragMap = AHashMap<u32, AHashMap<u32, AHashMap<u32, u64>>>;

/// Flattened per-length fragment table: parallel arrays over distinct
/// (start, end) intervals.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LenEntry {
    pub starts: Vec<u32>,
    pub ends: Vec<u32>,
    pub counts: Vec<u64>,
}

pub struct Transcript {
    id: u64,
    name: String,
    seq: Vec<u8>,
    rev_seq: Vec<u8>,
    expr_level: u64,
    spill_file: Option<PathBuf>,
    frag_map: FragMap,
    frag_table: AHashMap<u32, LenEntry>,
}

impl Transcript {
    /// Build a transcript from an input record. `polya_max` adenines are
    /// appended up front; individual copies use a prefix of that tail.
    pub fn new(
        id: u64,
        name: &str,
        seq: &str,
        expr_level: u64,
        polya_max: u32,
        spill_dir: Option<&Path>,
    ) -> Transcript {
        let mut full = seq.as_bytes().to_vec();
        full.extend(std::iter::repeat(b'A').take(polya_max as usize));
        let rev_seq = rev_comp_dna(&full);
        let spill_file = spill_dir.map(|dir| {
            dir.join(id_bucket(id)).join(format!("{}_{}.frag", id, name))
        });
        Transcript {
            id,
            name: name.to_string(),
            seq: full,
            rev_seq,
            expr_level,
            spill_file,
            frag_map: FragMap::new(),
            frag_table: AHashMap::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn seq(&self) -> &[u8] {
        &self.seq
    }

    pub fn rev_seq(&self) -> &[u8] {
        &self.rev_seq
    }

    /// Total length including the maximal poly-A tail.
    pub fn len(&self) -> u32 {
        self.seq.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.seq.is_empty()
    }

    pub fn expr_level(&self) -> u64 {
        self.expr_level
    }

    /// Record one fragmentation interval in the nested map.
    pub fn register_fragment(&mut self, length: u32, start: u32, end: u32) {
        register_into(&mut self.frag_map, length, start, end);
    }

    /// Fragment every expressed copy of this transcript. Each copy draws
    /// its own effective poly-A tail length from the mixture, shifting the
    /// last usable base accordingly.
    pub fn fragment(
        &mut self,
        fg: &mut Fragmentor,
        target: &Target,
        polya: &TargetMix,
        polya_max: u32,
        stats: &mut FragStats,
        rng: &mut RandGen,
    ) -> SimResult<()> {
        let profiles = fg.binding_profiles(&self.seq, &self.rev_seq);
        let len = self.len();
        for _ in 0..self.expr_level {
            let tail = polya.sample_length(rng)?.min(polya_max);
            stats.update_polya_len(tail);
            let polya_end = len - polya_max + tail;
            fg.fragment_copy(
                len,
                &profiles,
                polya_end,
                target,
                &mut self.frag_map,
                stats,
                rng,
            )?;
        }
        Ok(())
    }

    /// Convert the nested map into flattened parallel arrays and drop the
    /// map. Intervals are sorted by (start, end) so the table layout is
    /// stable within a run. A zero-length key means the fragmentor broke
    /// its own invariant.
    pub fn flatten(&mut self) -> SimResult<()> {
        for (length, by_start) in self.frag_map.drain() {
            if length == 0 {
                return Err(SimError::Numeric(format!(
                    "transcript {}: fragment length is zero",
                    self.name
                )));
            }
            let mut triples: Vec<(u32, u32, u64)> = Vec::new();
            for (start, by_end) in by_start {
                for (end, count) in by_end {
                    triples.push((start, end, count));
                }
            }
            triples.sort_unstable_by_key(|&(s, e, _)| (s, e));
            let entry = LenEntry {
                starts: triples.iter().map(|t| t.0).collect(),
                ends: triples.iter().map(|t| t.1).collect(),
                counts: triples.iter().map(|t| t.2).collect(),
            };
            self.frag_table.insert(length, entry);
        }
        self.frag_map = FragMap::new();
        Ok(())
    }

    pub fn frag_table(&self) -> &AHashMap<u32, LenEntry> {
        &self.frag_table
    }

    pub fn frag_table_mut(&mut self) -> &mut AHashMap<u32, LenEntry> {
        &mut self.frag_table
    }

    /// Move one length's entry out of the table (Phase-B requests own the
    /// arrays they sample from).
    pub fn take_len_entry(&mut self, length: u32) -> Option<LenEntry> {
        self.frag_table.remove(&length)
    }

    /// Draw one concrete (start, end) occurrence of the given length,
    /// weighted by remaining counts, and decrement it.
    pub fn sample_fragment(&mut self, length: u32, rng: &mut RandGen) -> SimResult<(u32, u32)> {
        let entry = self.frag_table.get_mut(&length).ok_or_else(|| {
            SimError::Sampler(format!(
                "transcript {} has no fragments of length {}",
                self.name, length
            ))
        })?;
        let idx = rng.sample_index_u64(&entry.counts)?.ok_or_else(|| {
            SimError::Sampler(format!(
                "transcript {} is out of fragments of length {}",
                self.name, length
            ))
        })?;
        entry.counts[idx] -= 1;
        Ok((entry.starts[idx], entry.ends[idx]))
    }

    pub fn jettison_frag_table(&mut self) {
        self.frag_table = AHashMap::new();
    }

    /// Extract the fragment sequence for a strand. Reverse-strand
    /// fragments map through `[len-end, len-start)` on the reverse
    /// complement.
    pub fn fragment_seq(&self, start: u32, end: u32, strand: Strand) -> &[u8] {
        match strand {
            Strand::Plus => &self.seq[start as usize..end as usize],
            Strand::Minus => {
                let len = self.len();
                &self.rev_seq[(len - end) as usize..(len - start) as usize]
            }
        }
    }

    /// Serialize the flattened table to the spill file and release it.
    /// No-op when spilling is not configured.
    pub fn spill(&mut self) -> SimResult<()> {
        let Some(path) = &self.spill_file else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                SimError::Resource(format!(
                    "cannot create spill bucket {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }
        let file = File::create(path).map_err(|e| {
            SimError::Resource(format!("cannot create spill file {}: {}", path.display(), e))
        })?;
        let mut w = BufWriter::new(file);

        let mut lengths: Vec<u32> = self.frag_table.keys().copied().collect();
        lengths.sort_unstable();
        write_u64(&mut w, lengths.len() as u64)?;
        for length in lengths {
            let entry = &self.frag_table[&length];
            write_u32(&mut w, length)?;
            write_u64(&mut w, entry.starts.len() as u64)?;
            for &s in &entry.starts {
                write_u32(&mut w, s)?;
            }
            for &e in &entry.ends {
                write_u32(&mut w, e)?;
            }
            for &c in &entry.counts {
                write_u64(&mut w, c)?;
            }
        }
        w.flush()?;
        self.frag_table = AHashMap::new();
        Ok(())
    }

    /// Restore the flattened table from the spill file. Re-hydrating over
    /// live data would silently drop fragments, so it is refused.
    pub fn rehydrate(&mut self) -> SimResult<()> {
        let Some(path) = &self.spill_file else {
            return Ok(());
        };
        if !self.frag_table.is_empty() {
            return Err(SimError::Resource(format!(
                "re-hydration would replace live fragments of transcript {}",
                self.name
            )));
        }
        let file = File::open(path).map_err(|e| {
            SimError::Resource(format!("cannot open spill file {}: {}", path.display(), e))
        })?;
        let mut r = BufReader::new(file);

        let n_lengths = read_u64(&mut r)?;
        let mut table = AHashMap::with_capacity(n_lengths as usize);
        for _ in 0..n_lengths {
            let length = read_u32(&mut r)?;
            let n = read_u64(&mut r)? as usize;
            let mut entry = LenEntry {
                starts: Vec::with_capacity(n),
                ends: Vec::with_capacity(n),
                counts: Vec::with_capacity(n),
            };
            for _ in 0..n {
                entry.starts.push(read_u32(&mut r)?);
            }
            for _ in 0..n {
                entry.ends.push(read_u32(&mut r)?);
            }
            for _ in 0..n {
                entry.counts.push(read_u64(&mut r)?);
            }
            table.insert(length, entry);
        }
        self.frag_table = table;
        Ok(())
    }

    /// Remove this transcript's spill file.
    pub fn cleanup_spill(&self) -> SimResult<()> {
        if let Some(path) = &self.spill_file {
            fs::remove_file(path).map_err(|e| {
                SimError::Resource(format!(
                    "could not remove spill file {}: {}",
                    path.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }
}

/// Record a fragment interval in a nested accumulation map.
pub fn register_into(map: &mut FragMap, length: u32, start: u32, end: u32) {
    *map.entry(length)
        .or_default()
        .entry(start)
        .or_default()
        .entry(end)
        .or_insert(0) += 1;
}

/// Spill files are bucketed by the first three decimal digits of the
/// transcript id.
fn id_bucket(id: u64) -> String {
    let digits = id.to_string();
    digits[..digits.len().min(3)].to_string()
}

pub fn rev_comp_dna(seq: &[u8]) -> Vec<u8> {
    seq.iter()
        .rev()
        .map(|&b| match b {
            b'A' => b'T',
            b'T' => b'A',
            b'G' => b'C',
            b'C' => b'G',
            other => other,
        })
        .collect()
}

fn write_u32<W: Write>(w: &mut W, v: u32) -> SimResult<()> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

fn write_u64<W: Write>(w: &mut W, v: u64) -> SimResult<()> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

fn read_u32<R: Read>(r: &mut R) -> SimResult<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64<R: Read>(r: &mut R) -> SimResult<u64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_tr(spill_dir: Option<&Path>) -> Transcript {
        Transcript::new(0, "tr1", "ATGCATGCAT", 3, 5, spill_dir)
    }

    #[test]
    fn sequences_are_reverse_complements() {
        let tr = make_tr(None);
        assert_eq!(tr.len(), 15);
        assert_eq!(tr.seq(), b"ATGCATGCATAAAAA");
        assert_eq!(tr.rev_seq(), rev_comp_dna(tr.seq()).as_slice());
    }

    #[test]
    fn minus_strand_extraction_is_the_reverse_complement() {
        let tr = make_tr(None);
        let fwd = tr.fragment_seq(2, 8, Strand::Plus);
        let rev = tr.fragment_seq(2, 8, Strand::Minus);
        assert_eq!(rev, rev_comp_dna(fwd).as_slice());
        assert_eq!(rev.len(), 6);
    }

    #[test]
    fn flatten_preserves_the_interval_multiset() {
        let mut tr = make_tr(None);
        tr.register_fragment(5, 0, 5);
        tr.register_fragment(5, 0, 5);
        tr.register_fragment(5, 3, 8);
        tr.register_fragment(7, 1, 8);
        tr.flatten().unwrap();

        let table = tr.frag_table();
        assert_eq!(table.len(), 2);
        let five = &table[&5];
        assert_eq!(five.starts, vec![0, 3]);
        assert_eq!(five.ends, vec![5, 8]);
        assert_eq!(five.counts, vec![2, 1]);
        assert_eq!(table[&7].counts, vec![1]);
    }

    #[test]
    fn zero_length_key_is_fatal() {
        let mut tr = make_tr(None);
        tr.register_fragment(0, 3, 3);
        assert!(matches!(tr.flatten(), Err(SimError::Numeric(_))));
    }

    #[test]
    fn sampling_decrements_until_exhausted() {
        let mut tr = make_tr(None);
        tr.register_fragment(5, 0, 5);
        tr.register_fragment(5, 0, 5);
        tr.flatten().unwrap();
        let mut rng = RandGen::new(8);
        assert_eq!(tr.sample_fragment(5, &mut rng).unwrap(), (0, 5));
        assert_eq!(tr.sample_fragment(5, &mut rng).unwrap(), (0, 5));
        assert!(matches!(
            tr.sample_fragment(5, &mut rng),
            Err(SimError::Sampler(_))
        ));
        assert!(matches!(
            tr.sample_fragment(9, &mut rng),
            Err(SimError::Sampler(_))
        ));
    }

    #[test]
    fn spill_round_trip_is_identical() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut tr = make_tr(Some(dir.path()));
        tr.register_fragment(5, 0, 5);
        tr.register_fragment(5, 3, 8);
        tr.register_fragment(7, 1, 8);
        tr.flatten().unwrap();
        let before = tr.frag_table().clone();

        tr.spill().unwrap();
        assert!(tr.frag_table().is_empty());
        tr.rehydrate().unwrap();
        assert_eq!(tr.frag_table(), &before);

        // A second re-hydrate over live data is refused.
        assert!(matches!(tr.rehydrate(), Err(SimError::Resource(_))));
        tr.cleanup_spill().unwrap();
    }

    #[test]
    fn buckets_use_leading_digits() {
        assert_eq!(id_bucket(7), "7");
        assert_eq!(id_bucket(42), "42");
        assert_eq!(id_bucket(123), "123");
        assert_eq!(id_bucket(123456), "123");
    }
}

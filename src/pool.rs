//! Length-indexed fragment pool.
//!
//! After PCR every transcript registers its per-length fragment totals
//! here. The pool accumulates them in a live `length -> transcript -> count`
//! map, flattens it into parallel arrays once all transcripts are in, and
//! serves weighted transcript draws during Phase A of sampling. Transcripts
//! are referred to by id only; the pipeline owns the registry that resolves
//! them.

use std::fs;
use std::path::{Path, PathBuf};

use ahash::AHashMap;

use crate::error::{SimError, SimResult};
use crate::random::RandGen;

/// Flattened per-length transcript/count arrays.
#[derive(Debug, Default)]
struct TrCountEntry {
    tr_ids: Vec<u64>,
    counts: Vec<u64>,
}

#[derive(Default)]
pub struct Pool {
    live: AHashMap<u32, AHashMap<u64, u64>>,
    flat: AHashMap<u32, TrCountEntry>,
    spill_dir: Option<PathBuf>,
}

impl Pool {
    /// `spill_dir`, when set, is created here and owns all per-transcript
    /// spill files for the run.
    pub fn new(spill_dir: Option<&Path>) -> SimResult<Pool> {
        if let Some(dir) = spill_dir {
            fs::create_dir(dir).map_err(|e| {
                SimError::Resource(format!(
                    "cannot create spill directory {}: {}",
                    dir.display(),
                    e
                ))
            })?;
        }
        Ok(Pool {
            live: AHashMap::new(),
            flat: AHashMap::new(),
            spill_dir: spill_dir.map(Path::to_path_buf),
        })
    }

    pub fn spill_dir(&self) -> Option<&Path> {
        self.spill_dir.as_deref()
    }

    /// Register a transcript's post-PCR total for one length. This is a
    /// write, not an addition: each transcript reports each length exactly
    /// once per run.
    pub fn register_fragments(&mut self, tr_id: u64, length: u32, count: u64) {
        let by_tr = self.live.entry(length).or_default();
        debug_assert!(
            !by_tr.contains_key(&tr_id),
            "transcript {} registered length {} twice",
            tr_id,
            length
        );
        by_tr.insert(tr_id, count);
    }

    /// Linearize every length bucket into parallel arrays and clear the
    /// live map. Entries are sorted by transcript id so the layout is
    /// stable within a run.
    pub fn flatten(&mut self) {
        for (length, by_tr) in self.live.drain() {
            let mut pairs: Vec<(u64, u64)> = by_tr.into_iter().collect();
            pairs.sort_unstable_by_key(|(id, _)| *id);
            self.flat.insert(
                length,
                TrCountEntry {
                    tr_ids: pairs.iter().map(|(id, _)| *id).collect(),
                    counts: pairs.iter().map(|(_, c)| *c).collect(),
                },
            );
        }
        self.live = AHashMap::new();
    }

    /// Draw one transcript holding a fragment of the given length, weighted
    /// by remaining counts, and decrement its count. `None` when the length
    /// bucket is absent or exhausted.
    pub fn sample_transcript(
        &mut self,
        length: u32,
        rng: &mut RandGen,
    ) -> SimResult<Option<u64>> {
        let Some(entry) = self.flat.get_mut(&length) else {
            return Ok(None);
        };
        let Some(idx) = rng.sample_index_u64(&entry.counts)? else {
            return Ok(None);
        };
        entry.counts[idx] -= 1;
        Ok(Some(entry.tr_ids[idx]))
    }

    /// Evict a length bucket once all demand at that length is satisfied.
    pub fn jettison_len(&mut self, length: u32) {
        self.flat.remove(&length);
    }

    /// Remove the spill directory tree: per-transcript files first (done by
    /// the caller via `Transcript::cleanup_spill`), then the bucket
    /// directories, the root last.
    pub fn cleanup(&self) -> SimResult<()> {
        let Some(dir) = &self.spill_dir else {
            return Ok(());
        };
        let entries = fs::read_dir(dir).map_err(|e| {
            SimError::Resource(format!(
                "cannot list spill directory {}: {}",
                dir.display(),
                e
            ))
        })?;
        for entry in entries {
            let path = entry
                .map_err(|e| SimError::Resource(format!("spill directory walk failed: {}", e)))?
                .path();
            if path.is_dir() {
                fs::remove_dir(&path).map_err(|e| {
                    SimError::Resource(format!(
                        "could not remove spill bucket {}: {}",
                        path.display(),
                        e
                    ))
                })?;
            }
        }
        fs::remove_dir(dir).map_err(|e| {
            SimError::Resource(format!(
                "could not remove spill directory {}: {}",
                dir.display(),
                e
            ))
        })?;
        Ok(())
    }

    #[cfg(test)]
    fn remaining(&self, length: u32) -> u64 {
        self.flat
            .get(&length)
            .map(|e| e.counts.iter().sum())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn draws_decrement_until_the_bucket_is_dry() {
        let mut pool = Pool::new(None).unwrap();
        pool.register_fragments(0, 100, 2);
        pool.register_fragments(1, 100, 1);
        pool.flatten();

        let mut rng = RandGen::new(6);
        let mut drawn = Vec::new();
        while let Some(id) = pool.sample_transcript(100, &mut rng).unwrap() {
            drawn.push(id);
        }
        assert_eq!(drawn.len(), 3);
        assert_eq!(drawn.iter().filter(|&&id| id == 0).count(), 2);
        assert_eq!(pool.remaining(100), 0);
        // A length never registered reports not-ok straight away.
        assert!(pool.sample_transcript(999, &mut rng).unwrap().is_none());
    }

    #[test]
    fn draws_follow_count_weights() {
        let mut pool = Pool::new(None).unwrap();
        pool.register_fragments(0, 50, 9_000);
        pool.register_fragments(1, 50, 1_000);
        pool.flatten();

        let mut rng = RandGen::new(12);
        let mut first = 0u64;
        for _ in 0..1_000 {
            if pool.sample_transcript(50, &mut rng).unwrap() == Some(0) {
                first += 1;
            }
        }
        let frac = first as f64 / 1_000.0;
        assert!((frac - 0.9).abs() < 0.04, "fraction {}", frac);
    }

    #[test]
    fn jettisoned_lengths_are_gone() {
        let mut pool = Pool::new(None).unwrap();
        pool.register_fragments(0, 70, 5);
        pool.flatten();
        pool.jettison_len(70);
        let mut rng = RandGen::new(1);
        assert!(pool.sample_transcript(70, &mut rng).unwrap().is_none());
    }

    #[test]
    fn spill_directory_lifecycle() {
        let parent = tempfile::TempDir::new().unwrap();
        let dir = parent.path().join("frags");
        let pool = Pool::new(Some(dir.as_path())).unwrap();
        assert!(dir.is_dir());
        // A pre-existing directory is a resource error.
        assert!(matches!(
            Pool::new(Some(dir.as_path())),
            Err(SimError::Resource(_))
        ));
        fs::create_dir(dir.join("001")).unwrap();
        pool.cleanup().unwrap();
        assert!(!dir.exists());
    }
}

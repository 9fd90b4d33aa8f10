//! Target fragment length distributions.
//!
//! The target realises the *requested* size distribution before any
//! simulation happens: `req_frags` independent draws are grouped into a
//! length -> count table that the sampler later works through. Lengths come
//! either from a parametric mixture or from a raw empirical distribution.

use ahash::AHashMap;
use tracing::info;

use crate::error::{SimError, SimResult};
use crate::mixture::{MixComp, MixKind, TargetMix};
use crate::random::RandGen;
use crate::raw_params::LenProbs;
use crate::report::Report;

pub enum Target {
    Mix(MixTarget),
    Raw(RawTarget),
}

impl Target {
    pub fn from_mix(req_frags: u64, mix: TargetMix, rng: &mut RandGen) -> SimResult<Target> {
        Ok(Target::Mix(MixTarget::new(req_frags, mix, rng)?))
    }

    pub fn from_raw(req_frags: u64, len_probs: LenProbs, rng: &mut RandGen) -> SimResult<Target> {
        Ok(Target::Raw(RawTarget::new(req_frags, len_probs, rng)?))
    }

    pub fn req_frags(&self) -> u64 {
        match self {
            Target::Mix(t) => t.req_frags,
            Target::Raw(t) => t.req_frags,
        }
    }

    /// Smallest acceptable fragment length across the whole target.
    pub fn low(&self) -> u64 {
        match self {
            Target::Mix(t) => t.low,
            Target::Raw(t) => t.low,
        }
    }

    /// Largest acceptable fragment length across the whole target.
    pub fn high(&self) -> u64 {
        match self {
            Target::Mix(t) => t.high,
            Target::Raw(t) => t.high,
        }
    }

    /// One-shot iterator over the realised length -> demand table.
    pub fn next_len_count(&mut self) -> Option<(u32, u64)> {
        match self {
            Target::Mix(t) => t.table.next(),
            Target::Raw(t) => t.table.next(),
        }
    }

    /// Draw a mixture component. Raw targets expose a pseudo-component
    /// summarising the empirical distribution (mean/sd), which the
    /// fragmentors use for their breakpoint rates.
    pub fn sample_mix_comp(&self, rng: &mut RandGen) -> SimResult<&MixComp> {
        match self {
            Target::Mix(t) => t.mix.sample_comp(rng),
            Target::Raw(t) => Ok(&t.pseudo_comp),
        }
    }

    /// Draw a single length from the underlying distribution.
    pub fn sample_mix_len(&self, rng: &mut RandGen) -> SimResult<u32> {
        match self {
            Target::Mix(t) => t.mix.sample_length(rng),
            Target::Raw(t) => t.sample_len(rng),
        }
    }

    pub fn report_target_lengths(&self, rep: &mut Report) {
        let table = match self {
            Target::Mix(t) => &t.table,
            Target::Raw(t) => &t.table,
        };
        rep.slice_u32_u64(
            &table.lengths,
            &table.counts,
            "Length",
            "Count",
            "Target lengths",
            "bar",
        );
    }
}

/// Realised length -> count table with a one-shot cursor.
struct LenCountTable {
    lengths: Vec<u32>,
    counts: Vec<u64>,
    cursor: usize,
}

impl LenCountTable {
    /// Group independent draws into a table, sorted by length so iteration
    /// order is stable within a run.
    fn realise<F>(req_frags: u64, mut draw: F) -> SimResult<LenCountTable>
    where
        F: FnMut() -> SimResult<u32>,
    {
        let mut grouped: AHashMap<u32, u64> = AHashMap::new();
        for _ in 0..req_frags {
            *grouped.entry(draw()?).or_insert(0) += 1;
        }
        let mut pairs: Vec<(u32, u64)> = grouped.into_iter().collect();
        pairs.sort_unstable_by_key(|(l, _)| *l);
        Ok(LenCountTable {
            lengths: pairs.iter().map(|(l, _)| *l).collect(),
            counts: pairs.iter().map(|(_, c)| *c).collect(),
            cursor: 0,
        })
    }

    fn next(&mut self) -> Option<(u32, u64)> {
        if self.cursor < self.lengths.len() {
            let i = self.cursor;
            self.cursor += 1;
            Some((self.lengths[i], self.counts[i]))
        } else {
            None
        }
    }
}

pub struct MixTarget {
    req_frags: u64,
    mix: TargetMix,
    table: LenCountTable,
    low: u64,
    high: u64,
}

impl MixTarget {
    fn new(req_frags: u64, mix: TargetMix, rng: &mut RandGen) -> SimResult<MixTarget> {
        info!("Number of requested fragments: {}", req_frags);
        let table = LenCountTable::realise(req_frags, || mix.sample_length(rng))?;
        info!("Finished sampling target lengths.");
        let (low, high) = mix.bounds();
        Ok(MixTarget {
            req_frags,
            mix,
            table,
            low,
            high,
        })
    }
}

pub struct RawTarget {
    req_frags: u64,
    len_probs: LenProbs,
    table: LenCountTable,
    low: u64,
    high: u64,
    pseudo_comp: MixComp,
}

impl RawTarget {
    fn new(req_frags: u64, len_probs: LenProbs, rng: &mut RandGen) -> SimResult<RawTarget> {
        info!("Number of requested fragments: {}", req_frags);
        let draw = |rng: &mut RandGen| -> SimResult<u32> {
            let idx = rng.sample_index_f64(&len_probs.probs)?.ok_or_else(|| {
                SimError::Input("raw fragment size distribution has zero mass".to_string())
            })?;
            Ok(len_probs.lengths[idx])
        };
        let table = LenCountTable::realise(req_frags, || draw(rng))?;
        info!("Finished sampling target lengths from raw size distribution.");

        let low = len_probs.lengths.iter().copied().min().unwrap_or(0) as u64;
        let high = len_probs.lengths.iter().copied().max().unwrap_or(0) as u64;

        // Summarise the empirical distribution as a pseudo-component so the
        // fragmentors can read a location/scale off it.
        let mut mean = 0.0;
        let mut m2 = 0.0;
        for (l, p) in len_probs.lengths.iter().zip(&len_probs.probs) {
            mean += p * *l as f64;
            m2 += p * (*l as f64) * (*l as f64);
        }
        let sd = (m2 - mean * mean).max(0.0).sqrt();
        let pseudo_comp = MixComp {
            kind: MixKind::Normal,
            location: mean,
            scale: sd,
            shape: 0.0,
            low,
            high,
        };

        Ok(RawTarget {
            req_frags,
            len_probs,
            table,
            low,
            high,
            pseudo_comp,
        })
    }

    fn sample_len(&self, rng: &mut RandGen) -> SimResult<u32> {
        let idx = rng.sample_index_f64(&self.len_probs.probs)?.ok_or_else(|| {
            SimError::Input("raw fragment size distribution has zero mass".to_string())
        })?;
        Ok(self.len_probs.lengths[idx])
    }
}

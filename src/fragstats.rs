//! Per-stage fragment statistics.
//!
//! Length-indexed histograms tracking the fragment population as it moves
//! through fragmentation, PCR and sampling, plus poly-A tail lengths,
//! transcript lengths (weighted by expression) and expression levels.
//! The `after_sampling` histogram starts as a copy of `after_pcr` and is
//! decremented as fragments are drawn.

use std::sync::atomic::{AtomicU64, Ordering};

use ahash::AHashMap;

use crate::error::{SimError, SimResult};
use crate::report::Report;

#[derive(Default)]
pub struct FragStats {
    after_frag: AHashMap<u32, u64>,
    after_pcr: AHashMap<u32, u64>,
    after_sampling: AHashMap<u32, u64>,
    sampled: AHashMap<u32, u64>,
    missing: AHashMap<u32, u64>,
    polya_len: AHashMap<u32, u64>,
    tr_len: AHashMap<u32, u64>,
    expr_level: AHashMap<u32, u64>,
    total_frags: AtomicU64,
}

impl FragStats {
    pub fn new() -> FragStats {
        FragStats::default()
    }

    pub fn update_after_frag(&mut self, length: u32) -> SimResult<()> {
        *self.after_frag.entry(length).or_insert(0) += 1;
        let old = self.total_frags.fetch_add(1, Ordering::Relaxed);
        if old == u64::MAX {
            return Err(SimError::Numeric(
                "total fragment counter overflowed".to_string(),
            ));
        }
        Ok(())
    }

    pub fn update_after_pcr(&mut self, length: u32, count: u64) -> SimResult<()> {
        for hist in [&mut self.after_pcr, &mut self.after_sampling] {
            let slot = hist.entry(length).or_insert(0);
            *slot = slot.checked_add(count).ok_or_else(|| {
                SimError::Numeric(format!("fragment count overflow at length {}", length))
            })?;
        }
        Ok(())
    }

    pub fn update_after_sampling(&mut self, length: u32, count: u64) -> SimResult<()> {
        let slot = self.after_sampling.entry(length).or_insert(0);
        if count > *slot {
            return Err(SimError::Numeric(format!(
                "sampled {} fragments of length {} but only {} remained",
                count, length, slot
            )));
        }
        *slot -= count;
        Ok(())
    }

    pub fn update_sampled(&mut self, length: u32, count: u64) {
        *self.sampled.entry(length).or_insert(0) += count;
    }

    pub fn update_missing(&mut self, length: u32, count: u64) {
        *self.missing.entry(length).or_insert(0) += count;
    }

    pub fn update_polya_len(&mut self, length: u32) {
        *self.polya_len.entry(length).or_insert(0) += 1;
    }

    pub fn update_tr_len(&mut self, length: u32, level: u64) {
        *self.tr_len.entry(length).or_insert(0) += level;
    }

    pub fn update_expr_level(&mut self, level: u64) {
        *self.expr_level.entry(level as u32).or_insert(0) += 1;
    }

    pub fn total_frags(&self) -> u64 {
        self.total_frags.load(Ordering::Relaxed)
    }

    pub fn total_sampled(&self) -> u64 {
        self.sampled.values().sum()
    }

    #[cfg(test)]
    pub fn counts(&self, length: u32) -> (u64, u64, u64, u64, u64) {
        let get = |m: &AHashMap<u32, u64>| m.get(&length).copied().unwrap_or(0);
        (
            get(&self.after_frag),
            get(&self.after_pcr),
            get(&self.after_sampling),
            get(&self.sampled),
            get(&self.missing),
        )
    }

    pub fn report_frag_stats(&self, rep: &mut Report) {
        rep.map_u32_u64(
            &self.after_frag,
            "Length",
            "Count",
            "Fragdist after fragmentation",
            "bar",
        );
        rep.map_u32_u64(&self.after_pcr, "Length", "Count", "Fragdist after PCR", "bar");
        rep.map_u32_u64(
            &self.after_sampling,
            "Length",
            "Count",
            "Fragdist after sampling",
            "bar",
        );
        rep.map_u32_u64(&self.missing, "Length", "Count", "Missing fragments", "bar");
        rep.map_u32_u64(&self.sampled, "Length", "Count", "Sampled fragments", "bar");
        rep.map_u32_u64(&self.polya_len, "Length", "Count", "Poly-A tail lengths", "bar");
        rep.map_u32_u64(
            &self.tr_len,
            "Length",
            "Expressed copies",
            "Transcript lengths",
            "bar",
        );
        rep.map_u32_u64(
            &self.expr_level,
            "Expression level",
            "Transcripts",
            "Expression levels",
            "bar",
        );

        let total = self.total_frags();
        let ratio = if total > 0 {
            self.total_sampled() as f64 / total as f64
        } else {
            0.0
        };
        rep.point_f64("sampled/total", ratio, "", "Ratio", "Sampling ratio");
    }
}

//! Raw empirical parameter files.
//!
//! A raw parameter file is a JSON object estimated from real data, carrying
//! the number of fragments and PCR cycles plus two empirical tables: the
//! fragment size distribution (`frag_dist`, length -> count, normalized to
//! probabilities here) and per-bin GC efficiencies (`gc_eff`, gc percent ->
//! efficiency, clamped into `[MIN_RAW_GC_EFF, 1]`).

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::{SimError, SimResult};

/// Floor for raw GC efficiencies; bins below this are pulled up so a noisy
/// estimate cannot zero out amplification entirely.
pub const MIN_RAW_GC_EFF: f64 = 0.05;

/// Number of GC bins: floor(gc * 100) in 0..=100.
pub const GC_BINS: usize = 101;

#[derive(Deserialize)]
struct RawParamsFile {
    nr_frags: u64,
    nr_cycles: u32,
    frag_dist: HashMap<String, f64>,
    gc_eff: HashMap<String, f64>,
}

/// Empirical fragment size support: probabilities indexed parallel to
/// lengths.
#[derive(Debug, Clone)]
pub struct LenProbs {
    pub lengths: Vec<u32>,
    pub probs: Vec<f64>,
}

#[derive(Debug, Clone)]
pub struct RawParams {
    pub req_frags: u64,
    pub nr_cycles: u32,
    pub len_probs: LenProbs,
    pub gc_effs: Vec<f64>,
}

pub fn decode_raw_params(path: &Path) -> SimResult<RawParams> {
    let data = fs::read_to_string(path).map_err(|e| {
        SimError::Input(format!("cannot read raw parameter file {}: {}", path.display(), e))
    })?;
    let file: RawParamsFile = serde_json::from_str(&data).map_err(|e| {
        SimError::Input(format!("malformed raw parameter file {}: {}", path.display(), e))
    })?;

    if file.frag_dist.is_empty() {
        return Err(SimError::Input(format!(
            "empty frag_dist in raw parameter file {}",
            path.display()
        )));
    }

    // Sort the empirical support so downstream iteration is deterministic.
    let mut dist: Vec<(u32, f64)> = Vec::with_capacity(file.frag_dist.len());
    for (key, count) in &file.frag_dist {
        let length: u32 = key.trim().parse().map_err(|_| {
            SimError::Input(format!("bad frag_dist length key \"{}\"", key))
        })?;
        if *count < 0.0 {
            return Err(SimError::Input(format!(
                "negative frag_dist count for length {}",
                length
            )));
        }
        dist.push((length, *count));
    }
    dist.sort_unstable_by_key(|(l, _)| *l);

    let total: f64 = dist.iter().map(|(_, c)| c).sum();
    if total <= 0.0 {
        return Err(SimError::Input(
            "frag_dist counts sum to zero in raw parameter file".to_string(),
        ));
    }
    let lengths: Vec<u32> = dist.iter().map(|(l, _)| *l).collect();
    let probs: Vec<f64> = dist.iter().map(|(_, c)| c / total).collect();

    let mut gc_effs = vec![MIN_RAW_GC_EFF; GC_BINS];
    for (key, eff) in &file.gc_eff {
        let bin: usize = key.trim().parse().map_err(|_| {
            SimError::Input(format!("bad gc_eff bin key \"{}\"", key))
        })?;
        if bin >= GC_BINS {
            return Err(SimError::Input(format!("gc_eff bin {} out of range", bin)));
        }
        gc_effs[bin] = eff.clamp(MIN_RAW_GC_EFF, 1.0);
    }

    Ok(RawParams {
        req_frags: file.nr_frags,
        nr_cycles: file.nr_cycles,
        len_probs: LenProbs { lengths, probs },
        gc_effs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_params(json: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", json).unwrap();
        file
    }

    #[test]
    fn decodes_and_normalizes() {
        let file = write_params(
            r#"{
                "nr_frags": 5000,
                "nr_cycles": 9,
                "frag_dist": {"200": 3, "100": 1},
                "gc_eff": {"50": 0.9, "51": 1.5, "52": 0.0}
            }"#,
        );
        let raw = decode_raw_params(file.path()).unwrap();
        assert_eq!(raw.req_frags, 5000);
        assert_eq!(raw.nr_cycles, 9);
        assert_eq!(raw.len_probs.lengths, vec![100, 200]);
        assert!((raw.len_probs.probs[0] - 0.25).abs() < 1e-12);
        assert!((raw.len_probs.probs[1] - 0.75).abs() < 1e-12);
        // Clamping: above one pulled down, zero pulled up to the floor.
        assert_eq!(raw.gc_effs[50], 0.9);
        assert_eq!(raw.gc_effs[51], 1.0);
        assert_eq!(raw.gc_effs[52], MIN_RAW_GC_EFF);
        assert_eq!(raw.gc_effs[0], MIN_RAW_GC_EFF);
    }

    #[test]
    fn missing_keys_are_input_errors() {
        let file = write_params(r#"{"nr_frags": 10, "frag_dist": {"100": 1}}"#);
        assert!(matches!(
            decode_raw_params(file.path()),
            Err(SimError::Input(_))
        ));
    }

    #[test]
    fn bad_bin_keys_are_rejected() {
        let file = write_params(
            r#"{"nr_frags": 1, "nr_cycles": 1, "frag_dist": {"100": 1}, "gc_eff": {"x": 0.5}}"#,
        );
        assert!(decode_raw_params(file.path()).is_err());
        let file = write_params(
            r#"{"nr_frags": 1, "nr_cycles": 1, "frag_dist": {"100": 1}, "gc_eff": {"200": 0.5}}"#,
        );
        assert!(decode_raw_params(file.path()).is_err());
    }
}

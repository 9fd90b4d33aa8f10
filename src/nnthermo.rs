//! Nearest-neighbour primer binding thermodynamics.
//!
//! Duplex stability is computed from the unified nearest-neighbour ΔH/ΔS
//! parameters: the doublet sums plus initiation, terminal A/T penalties and
//! a symmetry correction for self-complementary k-mers. The equilibrium
//! constant K = exp(-ΔG/RT) is the per-position primer affinity. Affinities
//! are memoised per k-mer for the lifetime of the fragmentation stage.

use ahash::AHashMap;

use crate::error::{SimError, SimResult};
use crate::random::RandGen;

/// Per-position primer affinities along one strand of a transcript.
/// Entry `i` is the affinity of the k-mer starting at position `i`.
pub type BindingProfile = Vec<f64>;

/// Gas constant in kcal/(mol*K); doublet ΔH values are kcal/mol and ΔS
/// values cal/(mol*K).
const GAS_CONSTANT: f64 = 1.9872e-3;

/// (ΔH, ΔS) for the ten distinct nearest-neighbour doublets.
fn doublet_params(a: u8, b: u8) -> (f64, f64) {
    match (a, b) {
        (b'A', b'A') | (b'T', b'T') => (-7.9, -22.2),
        (b'A', b'T') => (-7.2, -20.4),
        (b'T', b'A') => (-7.2, -21.3),
        (b'C', b'A') | (b'T', b'G') => (-8.5, -22.7),
        (b'G', b'T') | (b'A', b'C') => (-8.4, -22.4),
        (b'C', b'T') | (b'A', b'G') => (-7.8, -21.0),
        (b'G', b'A') | (b'T', b'C') => (-8.2, -22.2),
        (b'C', b'G') => (-10.6, -27.2),
        (b'G', b'C') => (-9.8, -24.4),
        (b'G', b'G') | (b'C', b'C') => (-8.0, -19.9),
        _ => (0.0, 0.0),
    }
}

const INITIATION: (f64, f64) = (0.2, -5.7);
const TERMINAL_AT: (f64, f64) = (2.2, 6.9);
const SYMMETRY_DS: f64 = -1.4;

pub struct NNthermo {
    /// Priming temperature in Kelvin. Zero disables the thermodynamic bias
    /// and yields uniform binding profiles.
    temperature: f64,
    kmer_len: u32,
    cache: AHashMap<Vec<u8>, f64>,
}

impl NNthermo {
    pub fn new(temperature: f64, kmer_len: u32) -> Self {
        NNthermo {
            temperature,
            kmer_len,
            cache: AHashMap::with_capacity(4096),
        }
    }

    pub fn kmer_len(&self) -> u32 {
        self.kmer_len
    }

    /// Equilibrium constant of the primer/k-mer duplex, memoised per k-mer.
    pub fn kmer_affinity(&mut self, kmer: &[u8]) -> f64 {
        if self.temperature == 0.0 {
            return 1.0;
        }
        if let Some(&k) = self.cache.get(kmer) {
            return k;
        }

        let (mut dh, mut ds) = INITIATION;
        for pair in kmer.windows(2) {
            let (h, s) = doublet_params(pair[0], pair[1]);
            dh += h;
            ds += s;
        }
        for &term in &[kmer[0], kmer[kmer.len() - 1]] {
            if term == b'A' || term == b'T' {
                dh += TERMINAL_AT.0;
                ds += TERMINAL_AT.1;
            }
        }
        if is_self_complementary(kmer) {
            ds += SYMMETRY_DS;
        }

        let dg = dh - self.temperature * ds / 1000.0;
        let k = (-dg / (GAS_CONSTANT * self.temperature)).exp();
        self.cache.insert(kmer.to_vec(), k);
        k
    }

    /// Affinity profile along `seq`: `seq.len() - k` entries, one per k-mer
    /// start position.
    pub fn binding_profile(&mut self, seq: &[u8]) -> BindingProfile {
        let k = self.kmer_len as usize;
        if seq.len() <= k {
            return Vec::new();
        }
        let n = seq.len() - k;
        if self.temperature == 0.0 {
            return vec![1.0; n];
        }
        (0..n).map(|i| self.kmer_affinity(&seq[i..i + k])).collect()
    }

    /// Draw a priming position in `[start, end)` proportionally to the
    /// profile entries over that window. An empty window (after clamping
    /// `end` to the profile) yields position 0, which downstream size
    /// filters reject.
    pub fn simulate_priming(
        &self,
        profile: &[f64],
        start: u32,
        end: u32,
        rng: &mut RandGen,
    ) -> SimResult<u32> {
        let end = end.min(profile.len() as u32);
        if start >= end {
            return Ok(0);
        }
        let window = &profile[start as usize..end as usize];
        match rng.sample_index_f64(window)? {
            Some(idx) => Ok(start + idx as u32),
            None => Err(SimError::Sampler(
                "priming simulation drew from an all-zero affinity window".to_string(),
            )),
        }
    }

    /// Drop the k-mer cache once the last transcript has been fragmented.
    pub fn jettison_cache(&mut self) {
        self.cache = AHashMap::new();
    }

    #[cfg(test)]
    fn cache_len(&self) -> usize {
        self.cache.len()
    }
}

/// True when the k-mer equals its own reverse complement.
fn is_self_complementary(kmer: &[u8]) -> bool {
    let n = kmer.len();
    (0..=n / 2).all(|i| kmer[i] == complement(kmer[n - 1 - i]))
}

fn complement(base: u8) -> u8 {
    match base {
        b'A' => b'T',
        b'T' => b'A',
        b'G' => b'C',
        b'C' => b'G',
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T37: f64 = 310.15;

    #[test]
    fn affinity_is_stable_across_queries() {
        let mut nn = NNthermo::new(T37, 6);
        let first = nn.kmer_affinity(b"GATTAC");
        let second = nn.kmer_affinity(b"GATTAC");
        assert_eq!(first, second);
        assert_eq!(nn.cache_len(), 1);
    }

    #[test]
    fn gc_rich_kmers_bind_tighter() {
        let mut nn = NNthermo::new(T37, 6);
        assert!(nn.kmer_affinity(b"GCGCGC") > nn.kmer_affinity(b"ATTATA"));
    }

    #[test]
    fn palindromes_get_the_symmetry_correction() {
        // GAATTC is its own reverse complement; GAATTG is not. Strip the
        // terminal-base difference by comparing against a by-hand value.
        let mut nn = NNthermo::new(T37, 6);
        let pal = nn.kmer_affinity(b"GAATTC");

        let mut dh = INITIATION.0;
        let mut ds = INITIATION.1;
        for pair in b"GAATTC".windows(2) {
            let (h, s) = doublet_params(pair[0], pair[1]);
            dh += h;
            ds += s;
        }
        // Neither terminal is A or T, so only the symmetry term applies.
        ds += SYMMETRY_DS;
        let expected = (-(dh - T37 * ds / 1000.0) / (GAS_CONSTANT * T37)).exp();
        assert!((pal - expected).abs() / expected < 1e-12);
    }

    #[test]
    fn self_complementarity() {
        assert!(is_self_complementary(b"GAATTC"));
        assert!(is_self_complementary(b"ATAT"));
        assert!(!is_self_complementary(b"GAATTG"));
        assert!(!is_self_complementary(b"AAA"));
    }

    #[test]
    fn profile_has_len_minus_k_entries() {
        let mut nn = NNthermo::new(T37, 6);
        let prof = nn.binding_profile(b"ACGTACGTACGT");
        assert_eq!(prof.len(), 6);
        assert!(prof.iter().all(|&a| a >= 0.0));
    }

    #[test]
    fn zero_temperature_means_uniform_profile() {
        let mut nn = NNthermo::new(0.0, 6);
        let prof = nn.binding_profile(b"ACGTACGTACGT");
        assert!(prof.iter().all(|&a| a == 1.0));
    }

    #[test]
    fn priming_stays_in_window() {
        let mut nn = NNthermo::new(T37, 6);
        let mut rng = RandGen::new(99);
        let prof = nn.binding_profile(b"ACGTACGTACGTACGTACGTACGT");
        for _ in 0..500 {
            let pos = nn.simulate_priming(&prof, 3, 9, &mut rng).unwrap();
            assert!((3..9).contains(&pos));
        }
        // Empty window reports position zero.
        assert_eq!(nn.simulate_priming(&prof, 9, 9, &mut rng).unwrap(), 0);
        assert_eq!(nn.simulate_priming(&prof, 500, 600, &mut rng).unwrap(), 0);
    }
}

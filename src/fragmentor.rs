//! Fragmentation strategies.
//!
//! Each transcript copy is broken into intervals by one of three methods:
//!
//! * `after_prim` family: fragment first (Poisson breakpoints over the
//!   usable length), then re-prime each piece, optionally on both strands
//!   (`_double`) and optionally without the thermodynamic priming
//!   simulation (`_noprim`, uniform position draws).
//! * `pre_prim`: prime first from the poly-T side (exponential elongation
//!   origin), then fragment the elongated stretch.
//! * `prim_jump`: walk the transcript, alternating priming-site draws and
//!   exponential (or target-distributed) jump lengths.
//!
//! Accepted fragments pass the global size bounds and an independent
//! Bernoulli loss filter before registration.

use crate::error::{SimError, SimResult};
use crate::nnthermo::{BindingProfile, NNthermo};
use crate::random::RandGen;
use crate::target::Target;
use crate::transcript::{register_into, FragMap};
use crate::fragstats::FragStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragMethod {
    AfterPrim { sim_priming: bool, double_prime: bool },
    PrePrim,
    PrimJump,
}

/// Binding profiles a method needs for one transcript; `None` when the
/// method never consults that strand.
pub struct Profiles {
    pub forward: Option<BindingProfile>,
    pub reverse: Option<BindingProfile>,
}

pub struct Fragmentor {
    method: FragMethod,
    frag_param: u32,
    loss_prob: f64,
    /// Divisor applied to the component location when `frag_param` is
    /// unset in the `after_prim` rate calculation.
    rate_divisor: f64,
    primer: NNthermo,
    low: u64,
    high: u64,
}

impl Fragmentor {
    pub const DEFAULT_RATE_DIVISOR: f64 = 2.0;

    pub fn new(
        method: FragMethod,
        frag_param: u32,
        loss_prob: f64,
        rate_divisor: f64,
        temperature: f64,
        kmer_len: u32,
        target: &Target,
    ) -> Fragmentor {
        Fragmentor {
            method,
            frag_param,
            loss_prob,
            rate_divisor,
            primer: NNthermo::new(temperature, kmer_len),
            low: target.low(),
            high: target.high(),
        }
    }

    /// Compute the binding profiles this method needs. Profile computation
    /// is the only writer of the k-mer cache, so it runs once per
    /// transcript, before the per-copy fragmentation loop.
    pub fn binding_profiles(&mut self, seq: &[u8], rev_seq: &[u8]) -> Profiles {
        let (fwd, rev) = match self.method {
            FragMethod::AfterPrim {
                sim_priming: true,
                double_prime,
            } => (true, double_prime),
            FragMethod::PrimJump => (true, false),
            _ => (false, false),
        };
        Profiles {
            forward: fwd.then(|| self.primer.binding_profile(seq)),
            reverse: rev.then(|| self.primer.binding_profile(rev_seq)),
        }
    }

    pub fn jettison_primer_cache(&mut self) {
        self.primer.jettison_cache();
    }

    /// Fragment one transcript copy, registering accepted intervals into
    /// the nested table and the after-fragmentation histogram.
    pub fn fragment_copy(
        &self,
        tr_len: u32,
        profiles: &Profiles,
        polya_end: u32,
        target: &Target,
        table: &mut FragMap,
        stats: &mut FragStats,
        rng: &mut RandGen,
    ) -> SimResult<()> {
        match self.method {
            FragMethod::AfterPrim {
                sim_priming,
                double_prime,
            } => self.after_prim(
                tr_len,
                profiles,
                polya_end,
                sim_priming,
                double_prime,
                target,
                table,
                stats,
                rng,
            ),
            FragMethod::PrePrim => self.pre_prim(polya_end, target, table, stats, rng),
            FragMethod::PrimJump => {
                self.prim_jump(profiles, polya_end, target, table, stats, rng)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn after_prim(
        &self,
        tr_len: u32,
        profiles: &Profiles,
        polya_end: u32,
        sim_priming: bool,
        double_prime: bool,
        target: &Target,
        table: &mut FragMap,
        stats: &mut FragStats,
        rng: &mut RandGen,
    ) -> SimResult<()> {
        let comp = target.sample_mix_comp(rng)?;
        let length = polya_end;
        if length == 0 {
            return Ok(());
        }

        let rate = if self.frag_param > 0 {
            length as f64 / self.frag_param as f64
        } else {
            length as f64 / (self.rate_divisor * comp.location)
        };
        let nr_breaks = (rng.poisson(rate) as i64 - 1).max(1) as usize;

        let mut breaks = Vec::with_capacity(nr_breaks + 2);
        breaks.push(0u32);
        breaks.push(length);
        for _ in 0..nr_breaks {
            breaks.push(rng.u64_below(length as u64) as u32);
        }
        breaks.sort_unstable();

        for pair in breaks.windows(2) {
            let (start, end) = (pair[0], pair[1]);
            if end <= start || ((end - start) as u64) < self.low {
                continue;
            }

            let new_start = if sim_priming {
                let prof = profiles.forward.as_deref().unwrap_or(&[]);
                self.primer.simulate_priming(prof, start, end, rng)?
            } else {
                start + rng.u64_below((end - start) as u64) as u32
            };
            if new_start >= end {
                continue;
            }

            let new_end = if double_prime {
                self.prime_end(tr_len, new_start, end, sim_priming, profiles, rng)?
            } else {
                end
            };
            if new_end <= new_start {
                continue;
            }

            let size = new_end - new_start;
            if (size as u64) < self.low || (size as u64) > self.high {
                continue;
            }
            if !self.keep(rng) {
                continue;
            }
            register_into(table, size, new_start, new_end);
            stats.update_after_frag(size)?;
        }
        Ok(())
    }

    /// Re-draw the fragment end on the reverse strand: the forward window
    /// `[new_start, end)` maps through i' = L-1-i onto the reverse profile
    /// window `[L-end, L-new_start)`. An empty priming window keeps the
    /// original end.
    fn prime_end(
        &self,
        tr_len: u32,
        new_start: u32,
        end: u32,
        sim_priming: bool,
        profiles: &Profiles,
        rng: &mut RandGen,
    ) -> SimResult<u32> {
        if sim_priming {
            let prof = profiles.reverse.as_deref().unwrap_or(&[]);
            let win_start = tr_len - end;
            let win_end = tr_len - new_start;
            if win_start as usize >= prof.len().min(win_end as usize) {
                return Ok(end);
            }
            let rev_pos = self.primer.simulate_priming(prof, win_start, win_end, rng)?;
            Ok(tr_len - rev_pos)
        } else {
            Ok(new_start + 1 + rng.u64_below((end - new_start) as u64) as u32)
        }
    }

    fn pre_prim(
        &self,
        polya_end: u32,
        target: &Target,
        table: &mut FragMap,
        stats: &mut FragStats,
        rng: &mut RandGen,
    ) -> SimResult<()> {
        let comp = target.sample_mix_comp(rng)?;
        let length = polya_end;
        if length == 0 {
            return Ok(());
        }

        // Origin of priming on the poly-T side.
        let elong = {
            let e = rng.exp_with_rate(1.0 / self.frag_param as f64) as u32;
            length - e.min(length)
        };

        let rate = length as f64 / comp.location;
        let nr_breaks = (rng.poisson(rate) as i64 - 1).max(1) as usize;

        let mut breaks = Vec::with_capacity(nr_breaks + 2);
        breaks.push(elong);
        breaks.push(length);
        let span = (length - elong) as u64;
        if span > 0 {
            for _ in 0..nr_breaks {
                breaks.push(elong + rng.u64_below(span) as u32);
            }
        }
        breaks.sort_unstable();

        for pair in breaks.windows(2) {
            let (start, end) = (pair[0], pair[1]);
            if end <= start {
                continue;
            }
            let size = end - start;
            if (size as u64) < self.low || (size as u64) > self.high {
                continue;
            }
            if !self.keep(rng) {
                continue;
            }
            register_into(table, size, start, end);
            stats.update_after_frag(size)?;
        }
        Ok(())
    }

    fn prim_jump(
        &self,
        profiles: &Profiles,
        polya_end: u32,
        target: &Target,
        table: &mut FragMap,
        stats: &mut FragStats,
        rng: &mut RandGen,
    ) -> SimResult<()> {
        let prof = profiles.forward.as_deref().unwrap_or(&[]);
        let kmer_len = self.primer.kmer_len();
        if polya_end <= kmer_len {
            return Ok(());
        }
        // Last primable position, in binding-profile coordinates.
        let final_pos = (polya_end - kmer_len).min(prof.len() as u32);

        let mut end = 0u32;
        while end < final_pos {
            let start = self.primer.simulate_priming(prof, end, final_pos, rng)?;

            let jump = if self.frag_param > 0 {
                rng.exp_with_rate(1.0 / self.frag_param as f64) as u32
            } else {
                target.sample_mix_len(rng)?
            };
            let new_end = start.saturating_add(jump).min(final_pos);
            end = new_end;

            let size = new_end.saturating_sub(start);
            if size == 0 || (size as u64) < self.low || (size as u64) > self.high {
                continue;
            }
            if !self.keep(rng) {
                continue;
            }
            register_into(table, size, start, new_end);
            stats.update_after_frag(size)?;
        }
        Ok(())
    }

    /// Independent Bernoulli loss filter with acceptance 1 - loss_prob.
    fn keep(&self, rng: &mut RandGen) -> bool {
        self.loss_prob <= 0.0 || rng.f64() >= self.loss_prob
    }
}

/// Parse a `method[:param]` string.
pub fn parse_frag_method(s: &str) -> SimResult<(FragMethod, u32)> {
    let mut parts = s.splitn(2, ':');
    let name = parts.next().unwrap_or("");
    let method = match name {
        "after_prim" => FragMethod::AfterPrim {
            sim_priming: true,
            double_prime: false,
        },
        "after_prim_double" => FragMethod::AfterPrim {
            sim_priming: true,
            double_prime: true,
        },
        "after_noprim" => FragMethod::AfterPrim {
            sim_priming: false,
            double_prime: false,
        },
        "after_noprim_double" => FragMethod::AfterPrim {
            sim_priming: false,
            double_prime: true,
        },
        "pre_prim" => FragMethod::PrePrim,
        "prim_jump" => FragMethod::PrimJump,
        other => {
            return Err(SimError::Config(format!(
                "unknown fragmentation method \"{}\"",
                other
            )));
        }
    };

    let mut param: u32 = match parts.next() {
        Some(p) => p.parse().map_err(|_| {
            SimError::Config(format!("malformed fragmentation parameter in \"{}\"", s))
        })?,
        None => 0,
    };

    // pre_prim needs a positive elongation parameter no matter what.
    if method == FragMethod::PrePrim && param == 0 {
        param = 2000;
    }

    Ok((method, param))
}

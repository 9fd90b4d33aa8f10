//! PCR amplification.
//!
//! Each distinct fragment is amplified through `nr_cycles` rounds of
//! `count += Binomial(count, e)`, where the per-cycle efficiency is either
//! fixed or the product of a length efficiency and a GC-content efficiency.
//! The length efficiency is anchored so that the shortest target length
//! amplifies at `max` and the longest at `min`; GC efficiency is parametric
//! or a raw 101-bin table estimated from data.

use crate::error::{SimError, SimResult};
use crate::fragstats::FragStats;
use crate::pool::Pool;
use crate::random::RandGen;
use crate::raw_params::GC_BINS;
use crate::report::Report;
use crate::transcript::Transcript;

/// `shape,min,max` triple for an efficiency function.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EffParams {
    pub shape: f64,
    pub min: f64,
    pub max: f64,
}

pub fn parse_eff_params(s: &str) -> SimResult<EffParams> {
    let fields: Vec<&str> = s.split(',').collect();
    if fields.len() != 3 {
        return Err(SimError::Config(format!(
            "efficiency parameters need shape,min,max, got \"{}\"",
            s
        )));
    }
    let parse = |f: &str, what: &str| -> SimResult<f64> {
        f.trim()
            .parse()
            .map_err(|_| SimError::Config(format!("invalid {} \"{}\" in \"{}\"", what, f, s)))
    };
    let params = EffParams {
        shape: parse(fields[0], "shape")?,
        min: parse(fields[1], "min")?,
        max: parse(fields[2], "max")?,
    };
    if params.shape < 0.0 {
        return Err(SimError::Config(format!("negative shape in \"{}\"", s)));
    }
    if !(0.0..=1.0).contains(&params.min) || !(0.0..=1.0).contains(&params.max) {
        return Err(SimError::Config(format!(
            "efficiencies must be within [0, 1] in \"{}\"",
            s
        )));
    }
    if params.min > params.max {
        return Err(SimError::Config(format!("min exceeds max in \"{}\"", s)));
    }
    Ok(params)
}

enum GcEff {
    Param(EffParams),
    /// 101 bins indexed by floor(gc * 100); entries pre-clamped at parse.
    Table(Vec<f64>),
}

pub struct Thermocycler {
    nr_cycles: u32,
    fixed_eff: Option<f64>,
    len_shape: f64,
    len_a: f64,
    len_b: f64,
    gc: GcEff,
}

impl Thermocycler {
    /// `gc_table` (from a raw parameter file) overrides the parametric GC
    /// model. `low`/`high` are the global target bounds anchoring the
    /// length efficiency.
    pub fn new(
        nr_cycles: u32,
        fixed_eff: Option<f64>,
        len_params: EffParams,
        gc_params: EffParams,
        gc_table: Option<Vec<f64>>,
        low: u64,
        high: u64,
    ) -> SimResult<Thermocycler> {
        if let Some(e) = fixed_eff {
            if !(0.0..=1.0).contains(&e) {
                return Err(SimError::Config(format!(
                    "fixed PCR efficiency {} outside [0, 1]",
                    e
                )));
            }
        }
        if let Some(table) = &gc_table {
            if table.len() != GC_BINS {
                return Err(SimError::Config(format!(
                    "raw GC efficiency table has {} bins, expected {}",
                    table.len(),
                    GC_BINS
                )));
            }
        }

        // Anchor E(low) = max and E(high) = min. With shape = 0 (or a
        // degenerate length range) the length term is inert.
        let (len_a, len_b) = if len_params.shape == 0.0 || low == high {
            (0.0, 1.0)
        } else {
            let pl = (low as f64).powf(-len_params.shape);
            let ph = (high as f64).powf(-len_params.shape);
            let a = (len_params.max - len_params.min) / (pl - ph);
            let b = len_params.min - a * ph;
            (a, b)
        };

        Ok(Thermocycler {
            nr_cycles,
            fixed_eff,
            len_shape: len_params.shape,
            len_a,
            len_b,
            gc: match gc_table {
                Some(table) => GcEff::Table(table),
                None => GcEff::Param(gc_params),
            },
        })
    }

    pub fn nr_cycles(&self) -> u32 {
        self.nr_cycles
    }

    pub fn length_eff(&self, length: u32) -> f64 {
        if self.len_shape == 0.0 {
            return 1.0;
        }
        self.len_a * (length as f64).powf(-self.len_shape) + self.len_b
    }

    pub fn gc_eff(&self, gc: f64) -> f64 {
        match &self.gc {
            GcEff::Param(p) => {
                p.min + (p.max - p.min) * (1.0 - gc.powf(p.shape)).powf(p.shape)
            }
            GcEff::Table(table) => {
                let bin = ((gc * 100.0).floor() as usize).min(GC_BINS - 1);
                table[bin]
            }
        }
    }

    /// Amplify every fragment of a flattened transcript table in place,
    /// then register the per-length totals in the pool and the after-PCR
    /// histogram.
    pub fn pcr(
        &self,
        tr: &mut Transcript,
        pool: &mut Pool,
        stats: &mut FragStats,
        rng: &mut RandGen,
    ) -> SimResult<()> {
        let tr_id = tr.id();
        let mut table = std::mem::take(tr.frag_table_mut());

        let mut lengths: Vec<u32> = table.keys().copied().collect();
        lengths.sort_unstable();

        for length in lengths {
            let Some(entry) = table.get_mut(&length) else {
                continue;
            };
            let length_eff = self.length_eff(length);
            let mut total = 0u64;
            for i in 0..entry.counts.len() {
                let e = match self.fixed_eff {
                    Some(e) => e,
                    None => {
                        let slice =
                            &tr.seq()[entry.starts[i] as usize..entry.ends[i] as usize];
                        length_eff * self.gc_eff(gc_fraction(slice))
                    }
                };
                let amplified =
                    self.amplify(entry.counts[i], e, rng).map_err(|err| match err {
                        SimError::Numeric(msg) => SimError::Numeric(format!(
                            "transcript {} length {}: {}",
                            tr.name(),
                            length,
                            msg
                        )),
                        other => other,
                    })?;
                entry.counts[i] = amplified;
                total = total.checked_add(amplified).ok_or_else(|| {
                    SimError::Numeric(format!(
                        "per-length fragment total overflowed at length {}",
                        length
                    ))
                })?;
            }
            pool.register_fragments(tr_id, length, total);
            stats.update_after_pcr(length, total)?;
        }

        *tr.frag_table_mut() = table;
        Ok(())
    }

    fn amplify(&self, mut count: u64, e: f64, rng: &mut RandGen) -> SimResult<u64> {
        for _ in 0..self.nr_cycles {
            let grown = rng.binomial(count, e);
            count = count.checked_add(grown).ok_or_else(|| {
                SimError::Numeric("fragment count overflow during amplification".to_string())
            })?;
        }
        Ok(count)
    }

    /// Report the efficiency curves: GC efficiency over 201 GC-percent
    /// steps, length efficiency over the target bounds.
    pub fn report_eff_functions(&self, low: u64, high: u64, rep: &mut Report) {
        let mut x = Vec::with_capacity(201);
        let mut y = Vec::with_capacity(201);
        for i in 0..=200u32 {
            let gc_pct = i as f64 * 0.5;
            x.push(gc_pct);
            y.push(self.gc_eff(gc_pct / 100.0));
        }
        rep.slice_f64_f64(
            &x,
            &y,
            "GC content (%)",
            "Efficiency",
            "GC efficiency function",
            "line",
        );

        let xl: Vec<u32> = (low..=high).map(|l| l as u32).collect();
        let yl: Vec<f64> = xl.iter().map(|&l| self.length_eff(l)).collect();
        rep.slice_u32_f64(
            &xl,
            &yl,
            "Length",
            "Efficiency",
            "Length efficiency function",
            "line",
        );
    }
}

pub fn gc_fraction(seq: &[u8]) -> f64 {
    if seq.is_empty() {
        return 0.0;
    }
    let gc = seq.iter().filter(|&&b| b == b'G' || b == b'C').count();
    gc as f64 / seq.len() as f64
}

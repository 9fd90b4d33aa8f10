//! Pipeline driver.
//!
//! Wires the stages together: target realisation, per-transcript
//! fragmentation / PCR / pool registration (with optional spill), then the
//! two-phase sampler and the report. The input stage runs on its own
//! thread behind a bounded channel so parsing overlaps fragmentation; all
//! per-transcript processing is single-threaded by design.

use std::io::Write;

use tracing::{debug, info};

use crate::config::RunConfig;
use crate::error::SimResult;
use crate::fragmentor::Fragmentor;
use crate::fragstats::FragStats;
use crate::io::fasta::{spawn_transcript_stage, InputConfig};
use crate::pool::Pool;
use crate::random::RandGen;
use crate::report::Report;
use crate::sampler::Sampler;
use crate::target::Target;
use crate::thermocycler::Thermocycler;
use crate::transcript::Transcript;

/// Run the full simulation, writing fragment records to `out`. Returns the
/// number of fragments emitted.
pub fn run<W: Write>(cfg: &RunConfig, report: &mut Report, out: &mut W) -> SimResult<u64> {
    let mut rng = RandGen::new(cfg.seed);

    let mut target = match &cfg.raw_params {
        Some(raw) => Target::from_raw(cfg.req_frags, raw.len_probs.clone(), &mut rng)?,
        None => Target::from_mix(cfg.req_frags, cfg.target_mix.clone(), &mut rng)?,
    };
    target.report_target_lengths(report);

    let mut fragmentor = Fragmentor::new(
        cfg.frag_method,
        cfg.frag_param,
        cfg.frag_loss_prob,
        cfg.rate_divisor,
        cfg.temperature,
        cfg.kmer_len,
        &target,
    );

    let cycler = Thermocycler::new(
        cfg.nr_cycles,
        cfg.fixed_eff,
        cfg.len_eff,
        cfg.gc_eff,
        cfg.raw_params.as_ref().map(|r| r.gc_effs.clone()),
        target.low(),
        target.high(),
    )?;
    cycler.report_eff_functions(target.low(), target.high(), report);

    let mut stats = FragStats::new();
    let mut pool = Pool::new(cfg.spill_dir.as_deref())?;
    if let Some(dir) = pool.spill_dir() {
        info!("Fragments will be cached to {}.", dir.display());
    }

    let rx = spawn_transcript_stage(InputConfig {
        files: cfg.input_files.clone(),
        expr_mul: cfg.expr_mul,
        validation: cfg.validation,
        polya_max: cfg.polya_max,
        spill_dir: cfg.spill_dir.clone(),
    })?;

    info!("Fragmenting transcripts and amplifying fragments.");
    let mut rng_pcr = RandGen::new(cfg.pcr_seed);
    let mut registry: Vec<Transcript> = Vec::new();
    for msg in rx.iter() {
        let mut tr = msg?;
        debug!("{}\t{}|{}", tr.id(), tr.name(), tr.expr_level());
        stats.update_expr_level(tr.expr_level());
        stats.update_tr_len(tr.len(), tr.expr_level());

        tr.fragment(
            &mut fragmentor,
            &target,
            &cfg.polya_mix,
            cfg.polya_max,
            &mut stats,
            &mut rng,
        )?;
        tr.flatten()?;
        cycler.pcr(&mut tr, &mut pool, &mut stats, &mut rng_pcr)?;
        tr.spill()?;
        registry.push(tr);
    }
    fragmentor.jettison_primer_cache();
    info!("Initialized {} transcripts.", registry.len());

    pool.flatten();

    let sampler = Sampler::new(cfg.strand_bias, cfg.max_procs);
    let mut rng_sampling = RandGen::new(cfg.sampling_seed);
    let emitted = sampler.sample_fragments(
        &mut pool,
        &mut target,
        &mut registry,
        &mut stats,
        &mut rng_sampling,
        out,
    )?;
    out.flush()?;

    stats.report_frag_stats(report);

    if pool.spill_dir().is_some() {
        for tr in &registry {
            tr.cleanup_spill()?;
        }
        pool.cleanup()?;
    }

    Ok(emitted)
}

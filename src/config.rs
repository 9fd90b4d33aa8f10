//! Run configuration.
//!
//! Turns the raw CLI surface into a validated [`RunConfig`]: mixture and
//! method strings parsed, efficiency triples decoded, raw parameter files
//! folded in (they override the requested fragment count, the cycle count
//! and the GC efficiency model), per-phase seeds resolved.

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::cli_main::Cli;
use crate::error::{SimError, SimResult};
use crate::fragmentor::{parse_frag_method, FragMethod};
use crate::io::fasta::ValidationSet;
use crate::mixture::{parse_mix, TargetMix};
use crate::raw_params::{decode_raw_params, RawParams};
use crate::thermocycler::{parse_eff_params, EffParams};

pub struct RunConfig {
    pub req_frags: u64,
    pub target_mix: TargetMix,
    pub raw_params: Option<RawParams>,
    pub polya_mix: TargetMix,
    pub polya_max: u32,
    pub nr_cycles: u32,
    pub strand_bias: f64,
    pub temperature: f64,
    pub kmer_len: u32,
    pub fixed_eff: Option<f64>,
    pub gc_eff: EffParams,
    pub len_eff: EffParams,
    pub frag_method: FragMethod,
    pub frag_param: u32,
    pub frag_loss_prob: f64,
    pub rate_divisor: f64,
    pub spill_dir: Option<PathBuf>,
    pub max_procs: usize,
    pub seed: u64,
    pub pcr_seed: u64,
    pub sampling_seed: u64,
    pub expr_mul: f64,
    pub gc_freq: u32,
    pub report_file: PathBuf,
    pub input_files: Vec<String>,
    pub validation: ValidationSet,
}

impl RunConfig {
    pub fn from_cli(cli: Cli) -> SimResult<RunConfig> {
        if cli.primer_len < 1 {
            return Err(SimError::Input("primer length must be at least 1".to_string()));
        }
        if !(0.0..=1.0).contains(&cli.strand_bias) {
            return Err(SimError::Config(format!(
                "strand bias {} outside [0, 1]",
                cli.strand_bias
            )));
        }
        if !(0.0..1.0).contains(&cli.frag_loss_prob) {
            return Err(SimError::Config(format!(
                "fragment loss probability {} outside [0, 1)",
                cli.frag_loss_prob
            )));
        }
        if cli.priming_temp < 0.0 {
            return Err(SimError::Config(format!(
                "priming temperature {} is negative",
                cli.priming_temp
            )));
        }
        if cli.rate_divisor <= 0.0 {
            return Err(SimError::Config(format!(
                "rate divisor {} must be positive",
                cli.rate_divisor
            )));
        }
        if cli.expr_mul < 0.0 {
            return Err(SimError::Config(format!(
                "expression multiplier {} is negative",
                cli.expr_mul
            )));
        }
        if cli.max_procs < 1 {
            return Err(SimError::Config("at least one core is required".to_string()));
        }

        let raw_params = match &cli.raw_params {
            Some(path) => Some(decode_raw_params(path.as_ref())?),
            None => None,
        };

        let req_frags = raw_params
            .as_ref()
            .map(|r| r.req_frags)
            .unwrap_or(cli.nr_frags);
        if req_frags < 1 {
            return Err(SimError::Config(
                "no fragments requested (use -n or a raw parameter file)".to_string(),
            ));
        }
        let nr_cycles = raw_params
            .as_ref()
            .map(|r| r.nr_cycles)
            .unwrap_or(cli.nr_cycles);

        let target_mix = parse_mix(&cli.target_dist)?;
        let polya_mix = parse_mix(&cli.polya_dist)?;
        let polya_max = polya_mix.bounds().1 as u32;

        let (frag_method, frag_param) = parse_frag_method(&cli.frag_method)?;

        let spill_dir = if cli.spill || cli.spill_dir.is_some() {
            Some(PathBuf::from(cli.spill_dir.unwrap_or_else(|| {
                format!("fragsim_frags_{}", std::process::id())
            })))
        } else {
            None
        };

        // Later phases reuse the most recently supplied seed; absent any
        // seed, all phases share a time-derived one.
        let fallback = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        let seed = cli.seed.unwrap_or(fallback);
        let pcr_seed = cli.pcr_seed.or(cli.seed).unwrap_or(fallback);
        let sampling_seed = cli
            .sampling_seed
            .or(cli.pcr_seed)
            .or(cli.seed)
            .unwrap_or(fallback);

        Ok(RunConfig {
            req_frags,
            target_mix,
            raw_params,
            polya_mix,
            polya_max,
            nr_cycles,
            strand_bias: cli.strand_bias,
            temperature: cli.priming_temp,
            kmer_len: cli.primer_len,
            fixed_eff: cli.fixed_eff,
            gc_eff: parse_eff_params(&cli.gc_eff_params)?,
            len_eff: parse_eff_params(&cli.len_eff_params)?,
            frag_method,
            frag_param,
            frag_loss_prob: cli.frag_loss_prob,
            rate_divisor: cli.rate_divisor,
            spill_dir,
            max_procs: cli.max_procs,
            seed,
            pcr_seed,
            sampling_seed,
            expr_mul: cli.expr_mul,
            gc_freq: cli.gc_freq,
            report_file: PathBuf::from(cli.report_file),
            input_files: cli.inputs,
            validation: if cli.ambig {
                ValidationSet::Iupac
            } else {
                ValidationSet::Strict
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn parse(args: &[&str]) -> SimResult<RunConfig> {
        let mut full = vec!["fragsim"];
        full.extend_from_slice(args);
        RunConfig::from_cli(Cli::parse_from(full))
    }

    #[test]
    fn minimal_invocation_with_defaults() {
        let cfg = parse(&["-n", "1000", "--seed", "42"]).unwrap();
        assert_eq!(cfg.req_frags, 1000);
        assert_eq!(cfg.nr_cycles, 11);
        assert_eq!(cfg.kmer_len, 6);
        assert_eq!(cfg.strand_bias, 0.5);
        assert_eq!(cfg.polya_max, 300);
        assert_eq!(cfg.target_mix.bounds(), (100, 600));
        assert!(cfg.spill_dir.is_none());
        assert_eq!(cfg.validation, ValidationSet::Strict);
    }

    #[test]
    fn zero_fragments_is_a_config_error() {
        assert!(matches!(parse(&[]), Err(SimError::Config(_))));
    }

    #[test]
    fn bad_parameters_are_rejected() {
        assert!(parse(&["-n", "10", "-k", "0"]).is_err());
        assert!(parse(&["-n", "10", "-b", "1.5"]).is_err());
        assert!(parse(&["-n", "10", "--fl", "1.0"]).is_err());
        assert!(parse(&["-n", "10", "-f", "bogus"]).is_err());
        assert!(parse(&["-n", "10", "-d", "1.0:n:(100,10)"]).is_err());
        assert!(parse(&["-n", "10", "--gcp", "8,2,3"]).is_err());
        assert!(parse(&["-n", "10", "-t", "0"]).is_err());
    }

    #[test]
    fn seed_fallthrough_uses_the_most_recent() {
        let cfg = parse(&["-n", "10", "--seed", "1"]).unwrap();
        assert_eq!((cfg.seed, cfg.pcr_seed, cfg.sampling_seed), (1, 1, 1));

        let cfg = parse(&["-n", "10", "--seed", "1", "--pcr-seed", "2"]).unwrap();
        assert_eq!((cfg.seed, cfg.pcr_seed, cfg.sampling_seed), (1, 2, 2));

        let cfg = parse(&[
            "-n",
            "10",
            "--seed",
            "1",
            "--pcr-seed",
            "2",
            "--sampling-seed",
            "3",
        ])
        .unwrap();
        assert_eq!((cfg.seed, cfg.pcr_seed, cfg.sampling_seed), (1, 2, 3));
    }

    #[test]
    fn spill_flag_derives_a_directory() {
        let cfg = parse(&["-n", "10", "-g"]).unwrap();
        let dir = cfg.spill_dir.unwrap();
        assert!(dir.to_string_lossy().starts_with("fragsim_frags_"));

        let cfg = parse(&["-n", "10", "--gobdir", "spool"]).unwrap();
        assert_eq!(cfg.spill_dir.unwrap(), PathBuf::from("spool"));
    }
}

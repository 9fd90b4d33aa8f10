use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;

use tempfile::NamedTempFile;

use fragsim::config::RunConfig;
use fragsim::error::SimError;
use fragsim::fragmentor::FragMethod;
use fragsim::fragstats::FragStats;
use fragsim::io::fasta::ValidationSet;
use fragsim::mixture::parse_mix;
use fragsim::pipeline;
use fragsim::pool::Pool;
use fragsim::random::RandGen;
use fragsim::report::Report;
use fragsim::sampler::Sampler;
use fragsim::target::Target;
use fragsim::thermocycler::{EffParams, Thermocycler};
use fragsim::transcript::{rev_comp_dna, Transcript};

fn write_fasta(records: &[(&str, u64, &str)]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    for (name, level, seq) in records {
        writeln!(file, ">{}${}\n{}", name, level, seq).unwrap();
    }
    file
}

fn base_config(inputs: Vec<String>, report_file: PathBuf) -> RunConfig {
    RunConfig {
        req_frags: 10_000,
        target_mix: parse_mix("0.99:n:(50,1,40,60)").unwrap(),
        raw_params: None,
        polya_mix: parse_mix("1.0:n:(0,0,0,0)").unwrap(),
        polya_max: 0,
        nr_cycles: 0,
        strand_bias: 0.5,
        temperature: 0.0,
        kmer_len: 6,
        fixed_eff: None,
        gc_eff: EffParams {
            shape: 8.0,
            min: 0.8,
            max: 1.0,
        },
        len_eff: EffParams {
            shape: 0.0,
            min: 1.0,
            max: 1.0,
        },
        frag_method: FragMethod::AfterPrim {
            sim_priming: false,
            double_prime: false,
        },
        frag_param: 0,
        frag_loss_prob: 0.0,
        rate_divisor: 2.0,
        spill_dir: None,
        max_procs: 2,
        seed: 101,
        pcr_seed: 102,
        sampling_seed: 103,
        expr_mul: 1.0,
        gc_freq: 0,
        report_file,
        input_files: inputs,
        validation: ValidationSet::Strict,
    }
}

/// Parse emitted FASTA into (header, seq) pairs.
fn parse_output(out: &[u8]) -> Vec<(String, String)> {
    let text = String::from_utf8(out.to_vec()).unwrap();
    let mut records = Vec::new();
    let mut lines = text.lines();
    while let Some(header) = lines.next() {
        assert!(header.starts_with('>'), "unexpected line: {}", header);
        let seq = lines.next().unwrap();
        records.push((header.to_string(), seq.to_string()));
    }
    records
}

fn report_data(report: &serde_json::Value, title: &str) -> HashMap<u32, u64> {
    report[title]["data"]
        .as_object()
        .unwrap_or_else(|| panic!("missing report entry {}", title))
        .iter()
        .map(|(k, v)| (k.parse().unwrap(), v.as_u64().unwrap()))
        .collect()
}

/// Fixed efficiency zero, a single full-length fragment, demand one:
/// exactly one fragment comes out and PCR leaves the count at one.
#[test]
fn single_fragment_round_trip() {
    let seq: String = "ACGT".chars().cycle().take(100).collect();
    let mut tr = Transcript::new(0, "solo", &seq, 1, 0, None);
    tr.register_fragment(100, 0, 100);
    tr.flatten().unwrap();

    let mut pool = Pool::new(None).unwrap();
    let mut stats = FragStats::new();
    let cycler = Thermocycler::new(
        11,
        Some(0.0),
        EffParams {
            shape: 0.0,
            min: 1.0,
            max: 1.0,
        },
        EffParams {
            shape: 8.0,
            min: 0.8,
            max: 1.0,
        },
        None,
        100,
        100,
    )
    .unwrap();
    let mut rng = RandGen::new(1);
    cycler.pcr(&mut tr, &mut pool, &mut stats, &mut rng).unwrap();
    pool.flatten();

    let mut registry = vec![tr];
    let mix = parse_mix("1.0:n:(100,1,100,100)").unwrap();
    let mut target = Target::from_mix(1, mix, &mut rng).unwrap();

    let sampler = Sampler::new(0.0, 2);
    let mut out = Vec::new();
    let emitted = sampler
        .sample_fragments(
            &mut pool,
            &mut target,
            &mut registry,
            &mut stats,
            &mut rng,
            &mut out,
        )
        .unwrap();

    assert_eq!(emitted, 1);
    let records = parse_output(&out);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].1, seq);
    assert!(records[0].0.starts_with(">Fg_0_solo (Strand + Offset 0 -- 100)"));
}

/// Length-200 transcript, level 100, no priming simulation, narrow target
/// around 50, zero cycles. Nothing outside [40, 60] is ever emitted and
/// the stage histograms balance bin by bin.
#[test]
fn bounded_emission_and_balanced_histograms() {
    let seq: String = "ACGTGCTA".chars().cycle().take(200).collect();
    let input = write_fasta(&[("tx", 100, &seq)]);
    let report_file = NamedTempFile::new().unwrap();
    let cfg = base_config(
        vec![input.path().to_string_lossy().into_owned()],
        report_file.path().to_path_buf(),
    );

    let mut report = Report::new(report_file.path());
    let mut out = Vec::new();
    let emitted = pipeline::run(&cfg, &mut report, &mut out).unwrap();
    report.write().unwrap();

    let records = parse_output(&out);
    assert_eq!(records.len() as u64, emitted);
    assert!(emitted > 0);
    for (header, seq) in &records {
        let len = seq.len() as u64;
        assert!((40..=60).contains(&len), "fragment length {} from {}", len, header);
    }

    let parsed: serde_json::Value =
        serde_json::from_reader(std::fs::File::open(report_file.path()).unwrap()).unwrap();
    let target_counts = report_data(&parsed, "Target lengths");
    let sampled = report_data(&parsed, "Sampled fragments");
    let missing = report_data(&parsed, "Missing fragments");
    let after_pcr = report_data(&parsed, "Fragdist after PCR");
    let after_sampling = report_data(&parsed, "Fragdist after sampling");

    let mut total_sampled = 0;
    for (&length, &demand) in &target_counts {
        let s = sampled.get(&length).copied().unwrap_or(0);
        let m = missing.get(&length).copied().unwrap_or(0);
        assert_eq!(s + m, demand, "demand imbalance at length {}", length);
        let pcr = after_pcr.get(&length).copied().unwrap_or(0);
        assert!(s <= pcr, "sampled more than amplified at length {}", length);
        assert_eq!(
            after_sampling.get(&length).copied().unwrap_or(0),
            pcr - s,
            "after-sampling imbalance at length {}",
            length
        );
        total_sampled += s;
    }
    assert_eq!(total_sampled, emitted);
    assert_eq!(target_counts.values().sum::<u64>(), cfg.req_frags);
}

/// Two identical transcripts split the demand roughly in half.
#[test]
fn identical_transcripts_share_demand() {
    let seq: String = "ACGTTGCA".chars().cycle().take(1000).collect();
    let input = write_fasta(&[("t1", 50, &seq), ("t2", 50, &seq)]);
    let report_file = NamedTempFile::new().unwrap();
    let mut cfg = base_config(
        vec![input.path().to_string_lossy().into_owned()],
        report_file.path().to_path_buf(),
    );
    cfg.req_frags = 500;
    cfg.target_mix = parse_mix("1.0:n:(50,5,40,60)").unwrap();

    let mut report = Report::new(report_file.path());
    let mut out = Vec::new();
    let emitted = pipeline::run(&cfg, &mut report, &mut out).unwrap();

    let records = parse_output(&out);
    let t1 = records.iter().filter(|(h, _)| h.contains("_t1 ")).count() as f64;
    let frac = t1 / emitted as f64;
    assert!(
        (frac - 0.5).abs() < 0.1,
        "transcript share {} of {} fragments",
        frac,
        emitted
    );
}

/// Minus-strand records carry the reverse complement of the forward slice.
#[test]
fn minus_strand_sequences_are_reverse_complements() {
    let seq: String = "ACGTGGCATCA".chars().cycle().take(300).collect();
    let input = write_fasta(&[("tx", 50, &seq)]);
    let report_file = NamedTempFile::new().unwrap();
    let mut cfg = base_config(
        vec![input.path().to_string_lossy().into_owned()],
        report_file.path().to_path_buf(),
    );
    cfg.req_frags = 200;
    cfg.strand_bias = 1.0; // everything on the minus strand

    let mut report = Report::new(report_file.path());
    let mut out = Vec::new();
    pipeline::run(&cfg, &mut report, &mut out).unwrap();

    for (header, frag_seq) in parse_output(&out) {
        assert!(header.contains("(Strand - Offset"));
        // Recover the forward slice from the offsets in the header.
        let inner = header.split("Offset ").nth(1).unwrap();
        let mut nums = inner
            .trim_end_matches(')')
            .split(" -- ")
            .map(|s| s.trim().parse::<usize>().unwrap());
        let (start, end) = (nums.next().unwrap(), nums.next().unwrap());
        let forward = &seq.as_bytes()[start..end];
        assert_eq!(frag_seq.as_bytes(), rev_comp_dna(forward).as_slice());
    }
}

/// Same seeds, same input: the emitted stream is identical across runs
/// (single Phase-B worker keeps emission order deterministic too).
#[test]
fn runs_are_reproducible_given_a_seed() {
    let seq: String = "ACGTAGGC".chars().cycle().take(400).collect();
    let input = write_fasta(&[("tx", 30, &seq)]);
    let report_file = NamedTempFile::new().unwrap();
    let mut cfg = base_config(
        vec![input.path().to_string_lossy().into_owned()],
        report_file.path().to_path_buf(),
    );
    cfg.req_frags = 300;
    cfg.max_procs = 2;

    let mut first = Vec::new();
    let mut report = Report::new(report_file.path());
    pipeline::run(&cfg, &mut report, &mut first).unwrap();

    let mut second = Vec::new();
    let mut report = Report::new(report_file.path());
    pipeline::run(&cfg, &mut report, &mut second).unwrap();

    assert_eq!(first, second);
}

/// Poly-A tails come from the configured mixture; the truncated-normal
/// mean survives into the histogram.
#[test]
fn polya_mixture_mean_is_recovered() {
    let mix = parse_mix("1.0:n:(150,10,50,300)").unwrap();
    let mut rng = RandGen::new(55);
    let n = 100_000u64;
    let mut total = 0u64;
    for _ in 0..n {
        total += mix.sample_length(&mut rng).unwrap() as u64;
    }
    let mean = total as f64 / n as f64;
    assert!((mean - 150.0).abs() < 1.0, "poly-A mean {}", mean);
}

/// A level-zero effective expression drops the transcript silently, and a
/// pool with nothing in it reports the whole demand as missing.
#[test]
fn empty_input_leaves_all_demand_missing() {
    let input = write_fasta(&[("tx", 0, "ACGTACGTACGT")]);
    let report_file = NamedTempFile::new().unwrap();
    let mut cfg = base_config(
        vec![input.path().to_string_lossy().into_owned()],
        report_file.path().to_path_buf(),
    );
    cfg.req_frags = 50;

    let mut report = Report::new(report_file.path());
    let mut out = Vec::new();
    let emitted = pipeline::run(&cfg, &mut report, &mut out).unwrap();
    report.write().unwrap();

    assert_eq!(emitted, 0);
    assert!(out.is_empty());

    let parsed: serde_json::Value =
        serde_json::from_reader(std::fs::File::open(report_file.path()).unwrap()).unwrap();
    let missing = report_data(&parsed, "Missing fragments");
    assert_eq!(missing.values().sum::<u64>(), 50);
}

/// Raw parameter files override the fragment count and cycle count.
#[test]
fn raw_params_override_cli_counts() {
    use clap::Parser;
    use fragsim::cli_main::Cli;

    let mut raw = NamedTempFile::new().unwrap();
    write!(
        raw,
        r#"{{"nr_frags": 777, "nr_cycles": 3,
            "frag_dist": {{"100": 1, "200": 1}},
            "gc_eff": {{"50": 0.9}}}}"#
    )
    .unwrap();

    let cli = Cli::parse_from([
        "fragsim",
        "-n",
        "5",
        "-c",
        "11",
        "--raw-params",
        raw.path().to_str().unwrap(),
        "--seed",
        "1",
    ]);
    let cfg = RunConfig::from_cli(cli).unwrap();
    assert_eq!(cfg.req_frags, 777);
    assert_eq!(cfg.nr_cycles, 3);
    assert!(cfg.raw_params.is_some());
}

/// Invalid loss probability surfaces as a configuration error with a
/// non-success exit, not a panic.
#[test]
fn config_errors_are_typed() {
    use clap::Parser;
    use fragsim::cli_main::Cli;

    let cli = Cli::parse_from(["fragsim", "-n", "10", "--fl", "2.0"]);
    assert!(matches!(
        RunConfig::from_cli(cli),
        Err(SimError::Config(_))
    ));
}

/// Strand assignment frequency tends to the configured bias.
#[test]
fn strand_bias_frequency_converges() {
    let seq: String = "ACGTCAGT".chars().cycle().take(400).collect();
    let input = write_fasta(&[("tx", 400, &seq)]);
    let report_file = NamedTempFile::new().unwrap();
    let mut cfg = base_config(
        vec![input.path().to_string_lossy().into_owned()],
        report_file.path().to_path_buf(),
    );
    cfg.req_frags = 2_000;
    cfg.strand_bias = 0.25;

    let mut report = Report::new(report_file.path());
    let mut out = Vec::new();
    let emitted = pipeline::run(&cfg, &mut report, &mut out).unwrap();

    let minus = parse_output(&out)
        .iter()
        .filter(|(h, _)| h.contains("(Strand - "))
        .count() as f64;
    let frac = minus / emitted as f64;
    assert!(
        (frac - 0.25).abs() < 0.06,
        "minus-strand fraction {} over {} fragments",
        frac,
        emitted
    );
}

use std::io::Write;

use tempfile::{NamedTempFile, TempDir};

use fragsim::config::RunConfig;
use fragsim::fragmentor::FragMethod;
use fragsim::io::fasta::ValidationSet;
use fragsim::mixture::parse_mix;
use fragsim::pipeline;
use fragsim::report::Report;
use fragsim::thermocycler::EffParams;

fn config(input: &NamedTempFile, spill_dir: Option<std::path::PathBuf>) -> RunConfig {
    RunConfig {
        req_frags: 400,
        target_mix: parse_mix("1.0:n:(60,8,40,90)").unwrap(),
        raw_params: None,
        polya_mix: parse_mix("1.0:n:(20,5,0,50)").unwrap(),
        polya_max: 50,
        nr_cycles: 4,
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
            shape: 1.0,
            min: 0.6,
            max: 1.0,
        },
        frag_method: FragMethod::AfterPrim {
            sim_priming: false,
            double_prime: false,
        },
        frag_param: 0,
        frag_loss_prob: 0.0,
        rate_divisor: 2.0,
        spill_dir,
        max_procs: 2,
        seed: 7,
        pcr_seed: 8,
        sampling_seed: 9,
        expr_mul: 1.0,
        gc_freq: 0,
        report_file: std::path::PathBuf::from("unused.json"),
        input_files: vec![input.path().to_string_lossy().into_owned()],
        validation: ValidationSet::Strict,
    }
}

fn sample_input() -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    let seq: String = "ACGTAGCTGGCA".chars().cycle().take(500).collect();
    writeln!(file, ">alpha$20\n{}", seq).unwrap();
    let seq2: String = "TTGACCAG".chars().cycle().take(350).collect();
    writeln!(file, ">beta$15\n{}", seq2).unwrap();
    file
}

/// Spilling through disk changes nothing about the emitted fragments:
/// with identical seeds and a single Phase-B worker, the byte streams
/// match exactly.
#[test]
fn spilled_run_matches_in_memory_run() {
    let input = sample_input();
    let report_file = NamedTempFile::new().unwrap();

    let mut plain_out = Vec::new();
    let mut report = Report::new(report_file.path());
    let plain = pipeline::run(&config(&input, None), &mut report, &mut plain_out).unwrap();

    let tmp = TempDir::new().unwrap();
    let spill_dir = tmp.path().join("frags");
    let mut spilled_out = Vec::new();
    let mut report = Report::new(report_file.path());
    let spilled = pipeline::run(
        &config(&input, Some(spill_dir.clone())),
        &mut report,
        &mut spilled_out,
    )
    .unwrap();

    assert_eq!(plain, spilled);
    assert_eq!(plain_out, spilled_out);
    // Cleanup removed the whole spill tree.
    assert!(!spill_dir.exists());
}

/// The spill directory holds one bucketed file per transcript while the
/// run is in flight; a pre-existing directory is refused.
#[test]
fn spill_directory_is_exclusive() {
    let input = sample_input();
    let tmp = TempDir::new().unwrap();
    let spill_dir = tmp.path().join("frags");
    std::fs::create_dir(&spill_dir).unwrap();

    let report_file = NamedTempFile::new().unwrap();
    let mut report = Report::new(report_file.path());
    let mut out = Vec::new();
    let res = pipeline::run(&config(&input, Some(spill_dir)), &mut report, &mut out);
    assert!(res.is_err());
}

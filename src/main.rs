use std::io::{self, BufWriter, Write};

use clap::Parser;
use tracing::{error, warn};
use tracing_subscriber::FmtSubscriber;

use fragsim::cli_main::Cli;
use fragsim::config::RunConfig;
use fragsim::pipeline;
use fragsim::report::Report;

fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("Setting tracing default failed");

    if let Err(e) = run(cli) {
        error!("{}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let cfg = RunConfig::from_cli(cli)?;
    if cfg.gc_freq > 0 {
        warn!("--gcfreq has no effect in this runtime; ignoring.");
    }

    let mut report = Report::new(&cfg.report_file);
    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());

    let result = pipeline::run(&cfg, &mut report, &mut out);
    out.flush()?;

    // The report is flushed even when the pipeline failed, so the
    // distributions gathered so far survive a numeric panic.
    let report_result = report.write();

    result?;
    report_result?;
    Ok(())
}

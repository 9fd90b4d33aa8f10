use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "fragsim",
    version,
    about = "Simulate RNA-seq library preparation with PCR biases and size selection",
    long_about = None
)]
pub struct Cli {
    /// Number of fragments to sample
    #[arg(short = 'n', long = "nr-frags", default_value_t = 0)]
    pub nr_frags: u64,

    /// Target fragment length mixture: weight:kind:(p1,p2[,p3],low,high) + ...
    #[arg(
        short = 'd',
        long = "dist",
        default_value = "0.9:n:(450,50,100,600) + 0.1:n:(400,2,100,600)"
    )]
    pub target_dist: String,

    /// Poly-A tail length mixture (same grammar as -d)
    #[arg(short = 'a', long = "polya-dist", default_value = "1.0:n:(150,50,0,300)")]
    pub polya_dist: String,

    /// Number of PCR cycles
    #[arg(short = 'c', long = "cycles", default_value_t = 11)]
    pub nr_cycles: u32,

    /// Strand bias: probability of emitting a fragment on the minus strand
    #[arg(short = 'b', long = "strand-bias", default_value_t = 0.5)]
    pub strand_bias: f64,

    /// Priming temperature in Kelvin for the thermodynamic model;
    /// 0 disables the binding bias
    #[arg(short = 'p', long = "priming-temp", default_value_t = 0.0)]
    pub priming_temp: f64,

    /// Primer length
    #[arg(short = 'k', long = "primer-len", default_value_t = 6)]
    pub primer_len: u32,

    /// Fixed per-cycle PCR efficiency, overriding the GC/length models
    #[arg(short = 'e', long = "fixed-eff")]
    pub fixed_eff: Option<f64>,

    /// GC efficiency parameters: shape,min,max
    #[arg(long = "gcp", default_value = "8,0.8,1.0")]
    pub gc_eff_params: String,

    /// Length efficiency parameters: shape,min,max
    #[arg(long = "lep", default_value = "0,1,1")]
    pub len_eff_params: String,

    /// Fragmentation method, optionally with a parameter (method[:param])
    #[arg(short = 'f', long = "frag-method", default_value = "after_prim")]
    pub frag_method: String,

    /// Fragment loss probability
    #[arg(long = "fl", default_value_t = 0.0)]
    pub frag_loss_prob: f64,

    /// Divisor applied to the component location in the after_prim
    /// breakpoint rate when no method parameter is given
    #[arg(long = "rate-div", default_value_t = 2.0)]
    pub rate_divisor: f64,

    /// Spill fragment tables to disk after PCR
    #[arg(short = 'g', long = "gob")]
    pub spill: bool,

    /// Directory for spilled fragment tables
    #[arg(long = "gobdir")]
    pub spill_dir: Option<String>,

    /// Maximum number of cores to use
    #[arg(short = 't', long = "threads", default_value_t = 2)]
    pub max_procs: usize,

    /// Seed for target sampling and fragmentation
    #[arg(long)]
    pub seed: Option<u64>,

    /// Seed for the PCR phase (defaults to the most recent seed supplied)
    #[arg(long = "pcr-seed")]
    pub pcr_seed: Option<u64>,

    /// Seed for the sampling phase (defaults to the most recent seed supplied)
    #[arg(long = "sampling-seed")]
    pub sampling_seed: Option<u64>,

    /// JSON file with raw empirical parameters
    /// (overrides -n, -c and the GC efficiency model)
    #[arg(long = "raw-params")]
    pub raw_params: Option<String>,

    /// Expression level multiplier
    #[arg(long = "expr-mul", default_value_t = 1.0)]
    pub expr_mul: f64,

    /// Forced-collection frequency; accepted for compatibility, no effect
    /// in this runtime
    #[arg(long = "gcfreq", default_value_t = 0)]
    pub gc_freq: u32,

    /// Report file
    #[arg(short = 'r', long = "report", default_value = "fragsim_report.json")]
    pub report_file: String,

    /// Accept IUPAC ambiguity codes in input sequences
    #[arg(long = "ambig")]
    pub ambig: bool,

    /// Verbose logging
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Input FASTA files; stdin when none are given
    pub inputs: Vec<String>,
}

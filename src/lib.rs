pub mod cli_main;
pub mod config;
pub mod error;
pub mod frag;
pub mod fragmentor;
pub mod fragstats;
pub mod io;
pub mod mixture;
pub mod nnthermo;
pub mod pipeline;
pub mod pool;
pub mod random;
pub mod raw_params;
pub mod report;
pub mod sampler;
pub mod target;
pub mod thermocycler;
pub mod transcript;

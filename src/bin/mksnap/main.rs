use anyhow::Result;
use clap::Parser;
use env_logger::{Builder, Env};
use log::error;

use mksnap::pipeline;
use mksnap::runtime::sample::SampleRuntime;

mod cli;

fn init_logger() {
    // Уровень берем из RUST_LOG, иначе дефолт — info.
    // Пример: RUST_LOG=debug ./mksnap out.cc
    Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
}

fn main() {
    init_logger();

    if let Err(e) = run() {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = cli::Cli::parse();
    let cfg = cli.to_config()?;

    let mut runtime = SampleRuntime::new();
    pipeline::run(&cfg, &mut runtime, &cli.outfile)
}

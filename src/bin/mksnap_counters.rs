use anyhow::{anyhow, Result};
use clap::Parser;

use std::path::PathBuf;

use mksnap::counters::{CountersView, MAX_COUNTERS};

/// Дамп counters-файла, записанного mksnap (read-only, без блокировок)
#[derive(Parser, Debug)]
#[command(
    name = "mksnap_counters",
    version,
    about = "Dump a shared counters table written by mksnap"
)]
struct Opt {
    /// Counters file path
    #[arg(value_name = "FILE")]
    path: PathBuf,

    /// Print a single counter value by name
    #[arg(long)]
    name: Option<String>,
}

fn main() {
    if let Err(e) = run() {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let opt = Opt::parse();
    let view = CountersView::open(&opt.path)?;

    if let Some(name) = &opt.name {
        return match view.get(name) {
            Some(v) => {
                println!("{}", v);
                Ok(())
            }
            None => Err(anyhow!("counter '{}' not found", name)),
        };
    }

    println!(
        "# counters: {} of {} slots in use",
        view.in_use(),
        MAX_COUNTERS
    );
    for (name, value) in view.iter() {
        println!("{} {}", name, value);
    }
    Ok(())
}

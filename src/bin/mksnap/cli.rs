use clap::Parser;
use std::path::PathBuf;

use anyhow::Result;
use mksnap::config::{Codec, SnapshotConfig};

/// CLI генератора snapshot-листингов
#[derive(Parser, Debug)]
#[command(
    name = "mksnap",
    version,
    about = "Freeze runtime startup state into an embeddable snapshot listing"
)]
pub struct Cli {
    /// Output file for the generated listing
    #[arg(value_name = "OUTFILE")]
    pub outfile: PathBuf,

    /// Extra source compiled into the context before serialization
    #[arg(long, value_name = "FILE")]
    pub extra_code: Option<PathBuf>,

    /// Artifact codec: none|zstd
    #[arg(long, value_name = "CODEC")]
    pub compress: Option<String>,

    /// Shared counters file (mmap table for external monitors)
    #[arg(long, value_name = "FILE")]
    pub counters_file: Option<PathBuf>,
}

impl Cli {
    /// Env дает базу (MKSNAP_*), флаги перекрывают.
    pub fn to_config(&self) -> Result<SnapshotConfig> {
        let mut cfg = SnapshotConfig::from_env();
        if let Some(s) = &self.compress {
            cfg.codec = s.parse::<Codec>()?;
        }
        if self.extra_code.is_some() {
            cfg = cfg.with_extra_code(self.extra_code.clone());
        }
        if self.counters_file.is_some() {
            cfg = cfg.with_counters_file(self.counters_file.clone());
        }
        Ok(cfg)
    }
}

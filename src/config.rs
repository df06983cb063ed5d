//! Centralized configuration for the snapshot pipeline.
//!
//! Goals:
//! - Single place to collect tunables instead of scattering env lookups.
//! - The CLI and the env agree on semantics: flags win, MKSNAP_* fills gaps.
//! - Keep the library free of clap: binaries translate arguments into this.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{anyhow, Error, Result};

use crate::compress::{Compressor, ZstdCompressor};

/// Artifact codec applied to both sinks after the serialization passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    None,
    Zstd,
}

impl Codec {
    /// Компрессор для этого кодека (None — артефакты пишутся как есть).
    pub fn compressor(&self) -> Option<Box<dyn Compressor>> {
        match self {
            Codec::None => None,
            Codec::Zstd => Some(Box::new(ZstdCompressor::new())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Codec::None => "none",
            Codec::Zstd => "zstd",
        }
    }
}

impl FromStr for Codec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "off" | "0" => Ok(Codec::None),
            "zstd" => Ok(Codec::Zstd),
            other => Err(anyhow!("unknown codec '{}' (expected none|zstd)", other)),
        }
    }
}

/// Top-level configuration for one snapshot run.
#[derive(Clone, Debug)]
pub struct SnapshotConfig {
    /// Codec for both artifacts.
    /// Env: MKSNAP_COMPRESS = none|zstd (default none)
    pub codec: Codec,

    /// Optional extra source compiled into the context before serialization.
    /// Env: MKSNAP_EXTRA_CODE = path (default None)
    pub extra_code: Option<PathBuf>,

    /// Optional shared counters file for external instrumentation.
    /// Env: MKSNAP_COUNTERS_FILE = path (default None)
    pub counters_file: Option<PathBuf>,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            codec: Codec::None,
            extra_code: None,
            counters_file: None,
        }
    }
}

impl SnapshotConfig {
    /// Load configuration from environment variables.
    /// Непарсящиеся значения молча игнорируются: строгая валидация — на CLI.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("MKSNAP_COMPRESS") {
            if let Ok(codec) = v.parse::<Codec>() {
                cfg.codec = codec;
            }
        }
        if let Ok(v) = std::env::var("MKSNAP_EXTRA_CODE") {
            let s = v.trim();
            if !s.is_empty() {
                cfg.extra_code = Some(PathBuf::from(s));
            }
        }
        if let Ok(v) = std::env::var("MKSNAP_COUNTERS_FILE") {
            let s = v.trim();
            if !s.is_empty() {
                cfg.counters_file = Some(PathBuf::from(s));
            }
        }

        cfg
    }

    /// Fluent setters (builder-style) to override specific fields.

    pub fn with_codec(mut self, codec: Codec) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_extra_code<P: Into<PathBuf>>(mut self, path: Option<P>) -> Self {
        self.extra_code = path.map(Into::into);
        self
    }

    pub fn with_counters_file<P: Into<PathBuf>>(mut self, path: Option<P>) -> Self {
        self.counters_file = path.map(Into::into);
        self
    }
}

impl fmt::Display for SnapshotConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SnapshotConfig {{ codec: {}, extra_code: {}, counters_file: {} }}",
            self.codec.name(),
            self.extra_code
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "none".to_string()),
            self.counters_file
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "none".to_string()),
        )
    }
}

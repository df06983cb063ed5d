// src/writer.rs — mksnap: запись артефактов (C-массивы + размеры регионов).
//
// Writer владеет двумя sink'ами: full (strong + weak проходы) и context
// (partial-проход).
//
// Политика:
// - compress_all: сначала full, затем context; первая ошибка прерывает всю
//   операцию — наполовину сжатая пара невалидна, наружу ничего не уходит.
// - write_outputs: оба артефакта C-литералами; *_size всегда, *_raw_size
//   только если применялась компрессия (loader'у нужен точный размер
//   буфера под декомпрессию).
// - write_region_sizes: семь строк k_<region>_space_used в каноническом
//   порядке; вызывается только после завершения всех проходов.

use std::io::Write;

use anyhow::{Context, Result};
use log::debug;

use crate::compress::Compressor;
use crate::region::RegionSizes;
use crate::sink::SnapshotSink;

pub struct SnapshotWriter {
    full: SnapshotSink,
    context: SnapshotSink,
}

impl SnapshotWriter {
    pub fn new() -> Self {
        Self {
            full: SnapshotSink::new(),
            context: SnapshotSink::new(),
        }
    }

    /// Sink полного snapshot'а (strong + weak проходы).
    pub fn full_sink(&mut self) -> &mut SnapshotSink {
        &mut self.full
    }

    /// Sink частичного (context) snapshot'а.
    pub fn context_sink(&mut self) -> &mut SnapshotSink {
        &mut self.context
    }

    pub fn full(&self) -> &SnapshotSink {
        &self.full
    }

    pub fn context(&self) -> &SnapshotSink {
        &self.context
    }

    /// Сжать оба артефакта одним кодеком. Все или ничего.
    pub fn compress_all(&mut self, compressor: &mut dyn Compressor) -> Result<()> {
        self.full
            .compress(compressor)
            .context("compress full snapshot")?;
        self.context
            .compress(compressor)
            .context("compress context snapshot")?;
        Ok(())
    }

    /// Оба байтовых листинга, помеченные как отдельные артефакты.
    pub fn write_outputs(&self, out: &mut dyn Write) -> Result<()> {
        write_artifact(out, "snapshot", &self.full)?;
        out.write_all(b"\n")?;
        write_artifact(out, "context_snapshot", &self.context)?;
        Ok(())
    }

    /// Семь строк k_<region>_space_used.
    pub fn write_region_sizes(&self, out: &mut dyn Write, sizes: &RegionSizes) -> Result<()> {
        for (name, used) in sizes.entries() {
            writeln!(
                out,
                "static const unsigned int k_{}_space_used = {};",
                name, used
            )?;
        }
        Ok(())
    }
}

impl Default for SnapshotWriter {
    fn default() -> Self {
        Self::new()
    }
}

fn write_artifact(out: &mut dyn Write, label: &str, sink: &SnapshotSink) -> Result<()> {
    debug!(
        "artifact {}: {} bytes (raw {:?})",
        label,
        sink.position(),
        sink.raw_size()
    );
    writeln!(out, "static const unsigned char k_{}_data[] = {{", label)?;
    sink.render_as_text(out)?;
    writeln!(out, "\n}};")?;
    writeln!(
        out,
        "static const unsigned int k_{}_size = {};",
        label,
        sink.position()
    )?;
    if let Some(raw) = sink.raw_size() {
        writeln!(
            out,
            "static const unsigned int k_{}_raw_size = {};",
            label, raw
        )?;
    }
    Ok(())
}

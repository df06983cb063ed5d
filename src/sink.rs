// src/sink.rs — mksnap: байтовый sink сериализатора.
//
// Контракт для сериализатора:
// - put() только добавляет; объем не ограничен.
// - position() — число принятых байтов (текущий offset записи).
// - render_as_text(): десятичные значения через запятую, перенос строки
//   после каждого 32-го значения.
// - compress() ровно один раз за жизнь sink'а: raw_size фиксируется ДО
//   трансформации и остается записанным даже при ошибке кодека;
//   повторный вызов — SinkError::AlreadyCompressed, мгновенно.

use std::io::{self, Write};

use log::{debug, trace};
use thiserror::Error;

use crate::compress::{CompressError, Compressor};

#[derive(Debug, Error)]
pub enum SinkError {
    /// Second compression attempt on the same sink.
    #[error("sink already compressed (raw size {0} recorded)")]
    AlreadyCompressed(usize),

    #[error(transparent)]
    Compress(#[from] CompressError),
}

/// Append-only byte container a serializer writes snapshot bytes into.
pub struct SnapshotSink {
    data: Vec<u8>,
    raw_size: Option<usize>,
}

impl SnapshotSink {
    pub fn new() -> Self {
        Self {
            data: Vec::new(),
            raw_size: None,
        }
    }

    /// Append one byte. `what` names the byte for trace logs only and is
    /// never stored.
    pub fn put(&mut self, byte: u8, what: &str) {
        trace!("sink put {:#04x} ({})", byte, what);
        self.data.push(byte);
    }

    /// Number of bytes accepted so far.
    pub fn position(&self) -> usize {
        self.data.len()
    }

    /// Current contents (compressed after a successful compress()).
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Pre-compression size, recorded by the first compress() call.
    pub fn raw_size(&self) -> Option<usize> {
        self.raw_size
    }

    /// Render contents as comma-separated decimal values, 32 per line.
    pub fn render_as_text(&self, out: &mut dyn Write) -> io::Result<()> {
        for (i, b) in self.data.iter().enumerate() {
            if i > 0 {
                if i % 32 == 0 {
                    out.write_all(b",\n")?;
                } else {
                    out.write_all(b",")?;
                }
            }
            write!(out, "{}", b)?;
        }
        Ok(())
    }

    /// Replace contents with their compressed form. Allowed exactly once.
    pub fn compress(&mut self, compressor: &mut dyn Compressor) -> Result<(), SinkError> {
        if let Some(raw) = self.raw_size {
            return Err(SinkError::AlreadyCompressed(raw));
        }
        // raw_size фиксируется до попытки: sink считается "потраченным"
        // даже если кодек вернул ошибку.
        let raw = self.data.len();
        self.raw_size = Some(raw);
        compressor.compress(&self.data)?;
        self.data = compressor.output().to_vec();
        debug!("sink compressed: {} -> {} bytes", raw, self.data.len());
        Ok(())
    }
}

impl Default for SnapshotSink {
    fn default() -> Self {
        Self::new()
    }
}

// src/compress.rs — mksnap: компрессия snapshot-артефактов.
//
// Контракт:
// - Compressor не мутирует вход: &[u8] на входе, собственный буфер на выходе.
// - Полный успех или типизированная ошибка с числовым кодом кодека.
// - output() валиден только после успешного compress().
//
// Политика:
// - zstd на максимальном уровне: артефакт пишется один раз на сборку,
//   время компрессии не критично, размер — критичен.
// - Рабочий буфер len + len/100 + 1000 покрывает и несжимаемый вход
//   (zstd compressBound всегда меньше этого запаса).

use thiserror::Error;

/// Codec failure carrying the library's numeric error code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{name} (codec error code {code})")]
pub struct CompressError {
    pub code: usize,
    pub name: &'static str,
}

/// Buffer-to-buffer compressor used by the snapshot sink.
///
/// Implementations must not mutate the input and must leave the previous
/// output untouched when a call fails.
pub trait Compressor {
    fn compress(&mut self, input: &[u8]) -> Result<(), CompressError>;

    /// Output of the last successful `compress` call (empty before that).
    fn output(&self) -> &[u8];
}

// Scratch buffer for one-shot compression of `len` input bytes.
fn worst_case(len: usize) -> usize {
    len + len / 100 + 1000
}

/// zstd codec at maximum effort level.
pub struct ZstdCompressor {
    out: Vec<u8>,
}

impl ZstdCompressor {
    pub fn new() -> Self {
        Self { out: Vec::new() }
    }
}

impl Default for ZstdCompressor {
    fn default() -> Self {
        Self::new()
    }
}

impl Compressor for ZstdCompressor {
    fn compress(&mut self, input: &[u8]) -> Result<(), CompressError> {
        let mut scratch = vec![0u8; worst_case(input.len())];
        // zstd_safe вместо zstd::bulk: только safe-слой отдает числовой
        // код ошибки, который мы обязаны показать в диагностике.
        let level = *zstd::compression_level_range().end();
        match zstd::zstd_safe::compress(&mut scratch[..], input, level) {
            Ok(n) => {
                scratch.truncate(n);
                self.out = scratch;
                Ok(())
            }
            Err(code) => Err(CompressError {
                code,
                name: zstd::zstd_safe::get_error_name(code),
            }),
        }
    }

    fn output(&self) -> &[u8] {
        &self.out
    }
}

/// Pass-through codec: output bytes equal input bytes.
///
/// Stands in when no compression was requested, and serves as a harness
/// in end-to-end tests.
pub struct IdentityCompressor {
    out: Vec<u8>,
}

impl IdentityCompressor {
    pub fn new() -> Self {
        Self { out: Vec::new() }
    }
}

impl Default for IdentityCompressor {
    fn default() -> Self {
        Self::new()
    }
}

impl Compressor for IdentityCompressor {
    fn compress(&mut self, input: &[u8]) -> Result<(), CompressError> {
        self.out = input.to_vec();
        Ok(())
    }

    fn output(&self) -> &[u8] {
        &self.out
    }
}

/// Inverse of [`ZstdCompressor`] for loaders, the natives bundle and tests.
///
/// `raw_size` is the pre-compression byte count recorded next to the
/// artifact; it sizes the output buffer exactly, which is why the writer
/// emits raw sizes in the first place.
pub fn decompress(src: &[u8], raw_size: usize) -> Result<Vec<u8>, CompressError> {
    let mut out = vec![0u8; raw_size];
    let n = zstd::zstd_safe::decompress(&mut out[..], src).map_err(|code| CompressError {
        code,
        name: zstd::zstd_safe::get_error_name(code),
    })?;
    if n != raw_size {
        return Err(CompressError {
            code: 0,
            name: "decompressed size does not match recorded raw size",
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_passthrough() {
        let mut c = IdentityCompressor::new();
        c.compress(b"abc").unwrap();
        assert_eq!(c.output(), b"abc");
        c.compress(b"").unwrap();
        assert_eq!(c.output(), b"");
    }

    #[test]
    fn zstd_roundtrip_small() {
        let data = b"snapshot snapshot snapshot snapshot snapshot";
        let mut c = ZstdCompressor::new();
        c.compress(data).unwrap();
        assert!(!c.output().is_empty());
        let back = decompress(c.output(), data.len()).unwrap();
        assert_eq!(&back[..], &data[..]);
    }

    #[test]
    fn error_display_carries_numeric_code() {
        let e = CompressError {
            code: 7,
            name: "synthetic",
        };
        let s = e.to_string();
        assert!(s.contains('7'), "{}", s);
        assert!(s.contains("synthetic"), "{}", s);
    }

    #[test]
    fn worst_case_covers_tiny_inputs() {
        // Даже пустой вход получает буфер под служебный фрейм.
        assert!(worst_case(0) >= 1000);
        assert!(worst_case(1) > 1);
    }
}

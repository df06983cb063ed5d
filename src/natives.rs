// src/natives.rs — встроенные bootstrap-источники (natives bundle).
//
// build.rs упаковывает natives/*.src в OUT_DIR/natives.bin (формат описан
// там же). Здесь — проверка magic и CRC, опциональная декомпрессия и разбор
// индекса. CRC проверяется ДО декомпрессии: испорченный payload не должен
// доходить до кодека.

use byteorder::{ByteOrder, LittleEndian};
use log::debug;
use thiserror::Error;

use crate::compress::{decompress, CompressError};

pub const NATIVES_MAGIC: &[u8; 8] = b"MKSNAT01";
const FLAG_ZSTD: u32 = 1;
const HDR_SIZE: usize = 24;

static BUNDLE: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/natives.bin"));

#[derive(Debug, Error)]
pub enum NativesError {
    #[error("bad natives magic")]
    BadMagic,

    #[error("natives bundle truncated ({0} bytes)")]
    Truncated(usize),

    #[error("natives crc mismatch (stored {stored:#010x}, computed {computed:#010x})")]
    Checksum { stored: u32, computed: u32 },

    #[error("natives decompression failed: {0}")]
    Decompress(#[from] CompressError),

    #[error("natives index corrupt: {0}")]
    Corrupt(&'static str),
}

/// One embedded bootstrap source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeSource {
    pub name: String,
    pub body: Vec<u8>,
}

/// Разобрать встроенный bundle (magic + CRC, декомпрессия по биту flags).
pub fn startup_sources() -> Result<Vec<NativeSource>, NativesError> {
    let sources = parse_bundle(BUNDLE)?;
    debug!("natives: {} embedded sources", sources.len());
    Ok(sources)
}

pub fn parse_bundle(bundle: &[u8]) -> Result<Vec<NativeSource>, NativesError> {
    if bundle.len() < HDR_SIZE {
        return Err(NativesError::Truncated(bundle.len()));
    }
    if &bundle[0..8] != NATIVES_MAGIC {
        return Err(NativesError::BadMagic);
    }
    let flags = LittleEndian::read_u32(&bundle[8..12]);
    let raw_len = LittleEndian::read_u32(&bundle[12..16]) as usize;
    let stored_len = LittleEndian::read_u32(&bundle[16..20]) as usize;
    let crc = LittleEndian::read_u32(&bundle[20..24]);

    let stored = bundle
        .get(HDR_SIZE..HDR_SIZE.saturating_add(stored_len))
        .ok_or(NativesError::Truncated(bundle.len()))?;

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(stored);
    let computed = hasher.finalize();
    if computed != crc {
        return Err(NativesError::Checksum {
            stored: crc,
            computed,
        });
    }

    let payload_buf;
    let payload: &[u8] = if flags & FLAG_ZSTD != 0 {
        payload_buf = decompress(stored, raw_len)?;
        &payload_buf
    } else {
        if stored.len() != raw_len {
            return Err(NativesError::Corrupt(
                "raw_len mismatch for uncompressed payload",
            ));
        }
        stored
    };

    parse_payload(payload)
}

fn parse_payload(p: &[u8]) -> Result<Vec<NativeSource>, NativesError> {
    let mut off = 0usize;
    let count = read_u32(p, &mut off)? as usize;
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        let name_len = read_u16(p, &mut off)? as usize;
        let name = take(p, &mut off, name_len)?;
        let body_len = read_u32(p, &mut off)? as usize;
        let body = take(p, &mut off, body_len)?;
        let name = std::str::from_utf8(name)
            .map_err(|_| NativesError::Corrupt("source name is not utf-8"))?;
        out.push(NativeSource {
            name: name.to_string(),
            body: body.to_vec(),
        });
    }
    if off != p.len() {
        return Err(NativesError::Corrupt("trailing bytes after last source"));
    }
    Ok(out)
}

fn take<'a>(p: &'a [u8], off: &mut usize, n: usize) -> Result<&'a [u8], NativesError> {
    let end = off
        .checked_add(n)
        .ok_or(NativesError::Corrupt("length overflow"))?;
    let s = p
        .get(*off..end)
        .ok_or(NativesError::Corrupt("index past payload end"))?;
    *off = end;
    Ok(s)
}

fn read_u16(p: &[u8], off: &mut usize) -> Result<u16, NativesError> {
    Ok(LittleEndian::read_u16(take(p, off, 2)?))
}

fn read_u32(p: &[u8], off: &mut usize) -> Result<u32, NativesError> {
    Ok(LittleEndian::read_u32(take(p, off, 4)?))
}

// build.rs — упаковка natives/*.src в OUT_DIR/natives.bin.
//
// Формат bundle (LE):
// MAGIC8 = "MKSNAT01"
// u32 flags       (bit0 = payload сжат zstd)
// u32 raw_len     (длина payload до сжатия)
// u32 stored_len  (длина payload, как он лежит в файле)
// u32 crc32       (по stored payload)
// payload:
//   u32 count
//   на каждый источник: u16 name_len, name, u32 body_len, body
//
// Фича compressed-natives включает сжатие payload; парсер в src/natives.rs
// смотрит только на бит flags, поэтому код библиотеки одинаков в обеих
// конфигурациях сборки.

use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, WriteBytesExt};

const NATIVES_MAGIC: &[u8; 8] = b"MKSNAT01";
const FLAG_ZSTD: u32 = 1;

fn main() {
    println!("cargo:rerun-if-changed=natives");

    let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR"));
    let out_dir = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR"));

    let bundle = pack(&manifest_dir.join("natives")).expect("pack natives");
    fs::write(out_dir.join("natives.bin"), bundle).expect("write natives.bin");
}

fn pack(dir: &Path) -> io::Result<Vec<u8>> {
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .map(|e| e.path())
        .filter(|p| p.extension().map_or(false, |x| x == "src"))
        .collect();
    // Детерминированный порядок загрузки: сортировка по имени файла.
    paths.sort();

    let mut payload = Vec::new();
    payload.write_u32::<LittleEndian>(paths.len() as u32)?;
    for path in &paths {
        println!("cargo:rerun-if-changed={}", path.display());
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .expect("native source file name");
        let body = fs::read(path)?;
        payload.write_u16::<LittleEndian>(name.len() as u16)?;
        payload.extend_from_slice(name.as_bytes());
        payload.write_u32::<LittleEndian>(body.len() as u32)?;
        payload.extend_from_slice(&body);
    }

    let raw_len = payload.len() as u32;
    let compressed = env::var_os("CARGO_FEATURE_COMPRESSED_NATIVES").is_some();
    let (flags, stored) = if compressed {
        (FLAG_ZSTD, zstd::bulk::compress(&payload, 0)?)
    } else {
        (0, payload)
    };

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&stored);
    let crc = hasher.finalize();

    let mut out = Vec::with_capacity(24 + stored.len());
    out.extend_from_slice(NATIVES_MAGIC);
    out.write_u32::<LittleEndian>(flags)?;
    out.write_u32::<LittleEndian>(raw_len)?;
    out.write_u32::<LittleEndian>(stored.len() as u32)?;
    out.write_u32::<LittleEndian>(crc)?;
    out.extend_from_slice(&stored);
    Ok(out)
}

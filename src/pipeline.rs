// src/pipeline.rs — mksnap: оркестрация шагов snapshot'а.
//
// Порядок фиксирован и является контрактом:
//  1. builtins: распаковка/проверка встроенных источников
//  2. enable_serialization
//  3. bootstrap контекста
//  4. опциональный extra-код (диагностика с caret-спаном на stderr)
//  5. collect_all_garbage: транзиентные корни не попадают в snapshot
//  6. strong-проход -> full sink
//  7. context-проход -> context sink (строго после strong, back-references)
//  8. weak-проход -> full sink (строго после context, полное id-пространство)
//  9. компрессия обоих артефактов (если задан кодек)
// 10. счетчики + атомарная публикация outfile (tmp+rename, fsync каталога)
//
// Ошибка до шага 10 оставляет файловую систему нетронутой; ошибка на шаге 10
// подчищает tmp. Наполовину записанный артефакт снаружи не наблюдаем.

use std::ffi::OsString;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use log::{debug, info};

use crate::compress::Compressor;
use crate::config::SnapshotConfig;
use crate::counters::CountersFile;
use crate::region::RegionSizes;
use crate::runtime::Runtime;
use crate::writer::SnapshotWriter;

/// Полный прогон: кодек берется из конфигурации.
pub fn run(cfg: &SnapshotConfig, runtime: &mut dyn Runtime, outfile: &Path) -> Result<()> {
    let mut codec = cfg.codec.compressor();
    let compressor: Option<&mut dyn Compressor> = match codec.as_mut() {
        Some(c) => Some(&mut **c),
        None => None,
    };
    run_with_compressor(cfg, runtime, compressor, outfile)
}

/// Прогон с инъецированным компрессором (тесты подставляют свой кодек).
pub fn run_with_compressor(
    cfg: &SnapshotConfig,
    runtime: &mut dyn Runtime,
    compressor: Option<&mut dyn Compressor>,
    outfile: &Path,
) -> Result<()> {
    info!("snapshot: {}", cfg);

    runtime
        .decompress_builtins()
        .context("decompress embedded builtins")?;
    runtime.enable_serialization();
    runtime.bootstrap_context().context("bootstrap context")?;

    if let Some(path) = &cfg.extra_code {
        run_extra_code(runtime, path)?;
    }

    runtime.collect_all_garbage();

    let mut writer = SnapshotWriter::new();
    runtime
        .serialize_strong_references(writer.full_sink())
        .context("serialize strong references")?;
    runtime
        .serialize_context(writer.context_sink())
        .context("serialize context")?;
    runtime
        .serialize_weak_references(writer.full_sink())
        .context("serialize weak references")?;
    debug!(
        "passes done: full {} bytes, context {} bytes",
        writer.full().position(),
        writer.context().position()
    );

    if let Some(c) = compressor {
        writer.compress_all(c)?;
    }

    // Размеры регионов снимаются только после завершения всех проходов.
    let sizes = RegionSizes::from_query(|r| runtime.region_allocated(r));

    if let Some(cpath) = &cfg.counters_file {
        record_counters(cpath, &writer, &sizes)
            .with_context(|| format!("record counters at {}", cpath.display()))?;
    }

    commit_outfile(outfile, &writer, &sizes)?;
    info!("snapshot written to {}", outfile.display());
    Ok(())
}

// Шаг 4: extra-код. Файл читается байтами: не-ASCII содержимое должно дойти
// до компилятора и дать диагностику с позицией, а не ошибку чтения.
fn run_extra_code(runtime: &mut dyn Runtime, path: &Path) -> Result<()> {
    let name = path
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let bytes = fs::read(path).with_context(|| format!("read extra code {}", path.display()))?;
    let source = String::from_utf8_lossy(&bytes).into_owned();
    info!("extra code: '{}' ({} bytes)", name, bytes.len());
    if let Err(e) = runtime.run_extra_code(&name, &source) {
        eprintln!("{}", e.render(&name));
        return Err(anyhow!("failure running extra code '{}'", name));
    }
    Ok(())
}

fn record_counters(path: &Path, writer: &SnapshotWriter, sizes: &RegionSizes) -> Result<()> {
    let mut table = CountersFile::create(path)?;

    // Исчерпание slot'ов не фатально: имя просто пропускается.
    let put = |table: &mut CountersFile, name: &str, value: u64| {
        if let Some(id) = table.bind(name) {
            table.set(id, value.min(i32::MAX as u64) as i32);
        }
    };

    put(&mut table, "snapshot_size", writer.full().position() as u64);
    if let Some(raw) = writer.full().raw_size() {
        put(&mut table, "snapshot_raw_size", raw as u64);
    }
    put(
        &mut table,
        "context_snapshot_size",
        writer.context().position() as u64,
    );
    if let Some(raw) = writer.context().raw_size() {
        put(&mut table, "context_snapshot_raw_size", raw as u64);
    }
    for (name, used) in sizes.entries() {
        put(&mut table, &format!("{}_space_used", name), used);
    }
    table.flush()?;
    Ok(())
}

// Шаг 10: атомарная публикация через tmp+rename; tmp подчищается на любом
// пути ошибки.
fn commit_outfile(outfile: &Path, writer: &SnapshotWriter, sizes: &RegionSizes) -> Result<()> {
    let tmp = tmp_path(outfile);
    let _ = fs::remove_file(&tmp);

    if let Err(e) = write_listing(&tmp, writer, sizes) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }

    if let Err(e) = fs::rename(&tmp, outfile)
        .with_context(|| format!("rename {} -> {}", tmp.display(), outfile.display()))
    {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    let _ = fsync_dir(outfile);
    Ok(())
}

fn tmp_path(outfile: &Path) -> PathBuf {
    let mut name = outfile
        .file_name()
        .map(|s| s.to_os_string())
        .unwrap_or_else(|| OsString::from("snapshot"));
    name.push(".tmp");
    outfile.with_file_name(name)
}

fn write_listing(path: &Path, writer: &SnapshotWriter, sizes: &RegionSizes) -> Result<()> {
    let mut f = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
        .with_context(|| format!("open snapshot tmp {}", path.display()))?;

    writeln!(
        f,
        "// Generated by mksnap {}. Do not edit.",
        env!("CARGO_PKG_VERSION")
    )?;
    writeln!(f)?;
    writer.write_outputs(&mut f)?;
    writeln!(f)?;
    writer.write_region_sizes(&mut f, sizes)?;
    f.sync_all()?; // flush tmp to disk
    Ok(())
}

#[cfg(unix)]
fn fsync_dir(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            let dir = std::fs::File::open(parent)?;
            dir.sync_all()?;
        }
    }
    Ok(())
}
#[cfg(not(unix))]
fn fsync_dir(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tmp_path_appends_suffix() {
        assert_eq!(
            tmp_path(Path::new("/a/b/snap.cc")),
            PathBuf::from("/a/b/snap.cc.tmp")
        );
        assert_eq!(tmp_path(Path::new("out")), PathBuf::from("out.tmp"));
    }
}

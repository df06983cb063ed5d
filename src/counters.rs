// src/counters.rs — mksnap: общая таблица счетчиков (counters file).
//
// Формат (LE), полный размер 17424 байта:
// off 0   u32 magic          = 0xDEADFACE
// off 4   u32 max_counters   = 256
// off 8   u32 max_name_size  = 64
// off 12  u32 counters_in_use
// off 16  entries[256] по 68 байт:
//           i32 value
//           u8  name[64]     NUL-terminated, контент усечен до 63 байт
//
// Политика:
// - Один писатель на файл (exclusive lock через fs2), читатели пассивны
//   и без блокировок.
// - Заголовок записывается и сбрасывается до того, как значения станут
//   интересны читателям.
// - Slot'ы append-only: без удаления и переименования за жизнь таблицы.
// - Исчерпание capacity — не ошибка: bind() возвращает None, вызывающий
//   просто пропускает инструментацию этого имени.

use std::fs::{File, OpenOptions};
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use byteorder::{ByteOrder, LittleEndian};
use fs2::FileExt;
use log::debug;
use memmap2::{Mmap, MmapMut, MmapOptions};

pub const COUNTERS_MAGIC: u32 = 0xDEAD_FACE;
pub const MAX_COUNTERS: usize = 256;
pub const MAX_NAME_SIZE: usize = 64;

const OFF_MAGIC: usize = 0;
const OFF_MAX_COUNTERS: usize = 4;
const OFF_MAX_NAME_SIZE: usize = 8;
const OFF_IN_USE: usize = 12;
const HDR_SIZE: usize = 16;
const ENTRY_SIZE: usize = 4 + MAX_NAME_SIZE;

/// Полный размер таблицы на диске.
pub const FILE_SIZE: usize = HDR_SIZE + MAX_COUNTERS * ENTRY_SIZE;

#[inline]
fn entry_off(i: usize) -> usize {
    HDR_SIZE + i * ENTRY_SIZE
}

fn entry_name(buf: &[u8], i: usize) -> &[u8] {
    let off = entry_off(i) + 4;
    let name = &buf[off..off + MAX_NAME_SIZE];
    let end = name.iter().position(|b| *b == 0).unwrap_or(MAX_NAME_SIZE);
    &name[..end]
}

fn entry_value(buf: &[u8], i: usize) -> i32 {
    let off = entry_off(i);
    LittleEndian::read_i32(&buf[off..off + 4])
}

/// Handle to a bound counter slot. Only `bind` constructs these, so the
/// index is always in range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterId(usize);

/// Writer side of the counters table.
pub struct CountersFile {
    map: MmapMut,
    // Держит exclusive lock, пока таблица жива (None для anonymous).
    _file: Option<File>,
}

impl CountersFile {
    /// Создать/перезаписать counters-файл и взять exclusive lock.
    pub fn create(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(path)
            .with_context(|| format!("create counters file {}", path.display()))?;
        file.lock_exclusive()
            .with_context(|| format!("lock counters file {}", path.display()))?;
        file.set_len(FILE_SIZE as u64)
            .with_context(|| format!("size counters file {}", path.display()))?;

        let map = unsafe {
            MmapOptions::new()
                .len(FILE_SIZE)
                .map_mut(&file)
                .map_err(|e| anyhow!("counters mmap: {}", e))?
        };
        let mut t = Self {
            map,
            _file: Some(file),
        };
        t.write_header();
        // Заголовок должен попасть на диск раньше, чем читатели увидят файл.
        t.map.flush().context("flush counters header")?;
        debug!("counters file created at {} ({} bytes)", path.display(), FILE_SIZE);
        Ok(t)
    }

    /// Таблица в анонимной памяти (без файла): для запусков без
    /// инструментации и для тестов.
    pub fn anonymous() -> Result<Self> {
        let map = MmapMut::map_anon(FILE_SIZE).map_err(|e| anyhow!("counters mmap: {}", e))?;
        let mut t = Self { map, _file: None };
        t.write_header();
        Ok(t)
    }

    fn write_header(&mut self) {
        LittleEndian::write_u32(&mut self.map[OFF_MAGIC..OFF_MAGIC + 4], COUNTERS_MAGIC);
        LittleEndian::write_u32(
            &mut self.map[OFF_MAX_COUNTERS..OFF_MAX_COUNTERS + 4],
            MAX_COUNTERS as u32,
        );
        LittleEndian::write_u32(
            &mut self.map[OFF_MAX_NAME_SIZE..OFF_MAX_NAME_SIZE + 4],
            MAX_NAME_SIZE as u32,
        );
        LittleEndian::write_u32(&mut self.map[OFF_IN_USE..OFF_IN_USE + 4], 0);
    }

    pub fn in_use(&self) -> usize {
        LittleEndian::read_u32(&self.map[OFF_IN_USE..OFF_IN_USE + 4]) as usize
    }

    fn set_in_use(&mut self, n: usize) {
        LittleEndian::write_u32(&mut self.map[OFF_IN_USE..OFF_IN_USE + 4], n as u32);
    }

    /// Найти счетчик по имени или занять новый slot.
    ///
    /// None — все slot'ы заняты; вызывающий пропускает инструментацию
    /// этого имени и продолжает работу.
    pub fn bind(&mut self, name: &str) -> Option<CounterId> {
        let mut wanted = name.as_bytes();
        if wanted.len() > MAX_NAME_SIZE - 1 {
            // Контент не длиннее 63 байт: последний байт slot'а всегда NUL.
            wanted = &wanted[..MAX_NAME_SIZE - 1];
        }

        let used = self.in_use();
        for i in 0..used {
            if entry_name(&self.map, i) == wanted {
                return Some(CounterId(i));
            }
        }
        if used == MAX_COUNTERS {
            return None;
        }

        let off = entry_off(used);
        LittleEndian::write_i32(&mut self.map[off..off + 4], 0);
        let noff = off + 4;
        self.map[noff..noff + MAX_NAME_SIZE].fill(0);
        self.map[noff..noff + wanted.len()].copy_from_slice(wanted);
        self.set_in_use(used + 1);
        Some(CounterId(used))
    }

    pub fn get(&self, id: CounterId) -> i32 {
        entry_value(&self.map, id.0)
    }

    pub fn set(&mut self, id: CounterId, value: i32) {
        let off = entry_off(id.0);
        LittleEndian::write_i32(&mut self.map[off..off + 4], value);
    }

    pub fn add(&mut self, id: CounterId, delta: i32) {
        let v = self.get(id).wrapping_add(delta);
        self.set(id, v);
    }

    /// Сбросить текущие значения на диск (no-op для anonymous).
    pub fn flush(&self) -> Result<()> {
        if self._file.is_some() {
            self.map.flush().context("flush counters file")?;
        }
        Ok(())
    }
}

/// Read-only view for external monitors. Takes no lock: readers are
/// passive by design.
pub struct CountersView {
    map: Mmap,
}

impl CountersView {
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .open(path)
            .with_context(|| format!("open counters file {}", path.display()))?;
        let len = file.metadata()?.len() as usize;
        if len < FILE_SIZE {
            return Err(anyhow!(
                "counters file too small at {} ({} bytes, expected {})",
                path.display(),
                len,
                FILE_SIZE
            ));
        }
        let map = unsafe {
            MmapOptions::new()
                .len(FILE_SIZE)
                .map(&file)
                .map_err(|e| anyhow!("counters mmap: {}", e))?
        };
        let v = Self { map };
        v.validate(path)?;
        Ok(v)
    }

    // Заголовок проверяется целиком до любого доступа к slot'ам.
    fn validate(&self, path: &Path) -> Result<()> {
        let magic = LittleEndian::read_u32(&self.map[OFF_MAGIC..OFF_MAGIC + 4]);
        if magic != COUNTERS_MAGIC {
            return Err(anyhow!(
                "bad counters magic at {} (expected {:#010x}, got {:#010x})",
                path.display(),
                COUNTERS_MAGIC,
                magic
            ));
        }
        let max_counters = LittleEndian::read_u32(&self.map[OFF_MAX_COUNTERS..OFF_MAX_COUNTERS + 4]);
        let max_name = LittleEndian::read_u32(&self.map[OFF_MAX_NAME_SIZE..OFF_MAX_NAME_SIZE + 4]);
        if max_counters as usize != MAX_COUNTERS || max_name as usize != MAX_NAME_SIZE {
            return Err(anyhow!(
                "unsupported counters layout at {} (max_counters={}, max_name_size={})",
                path.display(),
                max_counters,
                max_name
            ));
        }
        let in_use = LittleEndian::read_u32(&self.map[OFF_IN_USE..OFF_IN_USE + 4]) as usize;
        if in_use > MAX_COUNTERS {
            return Err(anyhow!(
                "corrupt counters header at {} (counters_in_use={})",
                path.display(),
                in_use
            ));
        }
        Ok(())
    }

    pub fn magic(&self) -> u32 {
        LittleEndian::read_u32(&self.map[OFF_MAGIC..OFF_MAGIC + 4])
    }

    pub fn in_use(&self) -> usize {
        (LittleEndian::read_u32(&self.map[OFF_IN_USE..OFF_IN_USE + 4]) as usize).min(MAX_COUNTERS)
    }

    pub fn get(&self, name: &str) -> Option<i32> {
        let wanted = name.as_bytes();
        (0..self.in_use())
            .find(|&i| entry_name(&self.map, i) == wanted)
            .map(|i| entry_value(&self.map, i))
    }

    pub fn iter(&self) -> impl Iterator<Item = (String, i32)> + '_ {
        (0..self.in_use()).map(move |i| {
            let name = String::from_utf8_lossy(entry_name(&self.map, i)).into_owned();
            (name, entry_value(&self.map, i))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_constants() {
        assert_eq!(ENTRY_SIZE, 68);
        assert_eq!(FILE_SIZE, 17424);
        assert_eq!(entry_off(0), 16);
        assert_eq!(entry_off(1), 84);
    }

    #[test]
    fn bind_is_find_or_allocate() {
        let mut t = CountersFile::anonymous().unwrap();
        let a = t.bind("compile_total").unwrap();
        let b = t.bind("gc_runs").unwrap();
        assert_ne!(a, b);
        assert_eq!(t.in_use(), 2);

        // Повторный bind того же имени возвращает тот же slot.
        let a2 = t.bind("compile_total").unwrap();
        assert_eq!(a, a2);
        assert_eq!(t.in_use(), 2);
    }

    #[test]
    fn value_ops() {
        let mut t = CountersFile::anonymous().unwrap();
        let id = t.bind("bytes_written").unwrap();
        assert_eq!(t.get(id), 0);
        t.set(id, 41);
        t.add(id, 1);
        assert_eq!(t.get(id), 42);
        t.add(id, -2);
        assert_eq!(t.get(id), 40);
    }

    #[test]
    fn long_names_truncate_to_63_bytes() {
        let mut t = CountersFile::anonymous().unwrap();
        let long = "x".repeat(100);
        let id = t.bind(&long).unwrap();
        // Усеченное имя резолвится в тот же slot.
        let again = t.bind(&long).unwrap();
        assert_eq!(id, again);
        let prefix = "x".repeat(63);
        let by_prefix = t.bind(&prefix).unwrap();
        assert_eq!(id, by_prefix);
        assert_eq!(t.in_use(), 1);
    }

    #[test]
    fn capacity_exhaustion_is_recoverable() {
        let mut t = CountersFile::anonymous().unwrap();
        for i in 0..MAX_COUNTERS {
            assert!(t.bind(&format!("c{}", i)).is_some(), "slot {}", i);
        }
        assert_eq!(t.in_use(), MAX_COUNTERS);
        assert!(t.bind("one_too_many").is_none());
        // Существующие имена по-прежнему резолвятся.
        assert!(t.bind("c0").is_some());
        assert_eq!(t.in_use(), MAX_COUNTERS);
    }
}

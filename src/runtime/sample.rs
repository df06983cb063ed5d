// src/runtime/sample.rs — SampleRuntime: референсный embedder.
//
// Маленький самодостаточный runtime, чтобы tool был полезен сам по себе и
// тестируем end-to-end:
// - bootstrap из встроенных natives (грамматика "name = value");
// - extra-код на той же грамматике, ошибки со строкой/колонками;
// - регионы кучи как bump-аллокаторы (offset = сумма живых объектов);
// - три прохода сериализации с общим пространством id и настоящими
//   back-reference'ами (дедуп по контент-ключу значения).
//
// Кодирование потока (LE, теги):
//   0x01  id u32, region u8, size u32, key u64  — новый объект
//   0x02  count u32                             — заголовок context-прохода
//   0x03  id u32                                — back-reference
//   0x04  slot u32, target_id u32               — weak-слот
// Формат не претендует на совместимость с чем-либо: он детерминирован и
// позволяет тестам видеть структуру потока.
//
// Грамматика источников:
//   строка      := пусто | '#' комментарий | ident '=' значение
//   значение    := целое i64 | "строка" (без escape-последовательностей)
// Не-ASCII байт в ЛЮБОМ месте файла (включая комментарии) — ошибка
// компиляции с указанием строки и колонки.

use std::collections::HashMap;
use std::hash::Hasher;

use anyhow::{anyhow, bail, Context, Result};
use log::debug;
use twox_hash::XxHash64;

use crate::natives::{self, NativeSource};
use crate::region::Region;
use crate::runtime::{Runtime, ScriptError, ScriptPhase};
use crate::sink::SnapshotSink;

const TAG_OBJECT: u8 = 0x01;
const TAG_CONTEXT_HEADER: u8 = 0x02;
const TAG_BACKREF: u8 = 0x03;
const TAG_WEAK: u8 = 0x04;

// Данные крупнее порога уходят в large-object регион.
const LARGE_OBJECT_LIMIT: u32 = 16 * 1024;

fn content_key(s: &str) -> u64 {
    let mut h = XxHash64::with_seed(0);
    h.write(s.as_bytes());
    h.finish()
}

fn region_tag(r: Region) -> u8 {
    match r {
        Region::New => 0,
        Region::OldPointer => 1,
        Region::OldData => 2,
        Region::Code => 3,
        Region::Map => 4,
        Region::Cell => 5,
        Region::LargeObject => 6,
    }
}

fn put_u32(sink: &mut SnapshotSink, v: u32, what: &str) {
    for b in v.to_le_bytes() {
        sink.put(b, what);
    }
}

fn put_u64(sink: &mut SnapshotSink, v: u64, what: &str) {
    for b in v.to_le_bytes() {
        sink.put(b, what);
    }
}

/// Value of a global definition.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Str(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifetime {
    /// Достижим из глобальных корней runtime (natives).
    Strong,
    /// Достижим только из bootstrap-контекста (extra-код, сам контекст).
    Context,
    /// Мусор компиляции; умирает на collect_all_garbage().
    Transient,
}

#[derive(Debug, Clone)]
struct HeapObject {
    region: Region,
    size: u32,
    key: u64,
    lifetime: Lifetime,
    alive: bool,
}

#[derive(Debug, Clone)]
struct Binding {
    name: String,
    value: Value,
}

// Распарсенная директива вместе с координатами для диагностики.
#[derive(Debug, Clone)]
struct Directive {
    name: String,
    value: Value,
    line: usize,
    source_line: String,
    name_span: (usize, usize),
}

/// Reference embedder used by the shipped binary and the integration tests.
pub struct SampleRuntime {
    builtins: Option<Vec<NativeSource>>,
    serialization_enabled: bool,
    context_ready: bool,

    objects: Vec<HeapObject>,
    bindings: Vec<Binding>,
    // (slot, object index): интерн-таблица ссылается на значения слабо.
    weak_slots: Vec<(u32, usize)>,
    // Объекты, достижимые из контекста (включая дедуп-попадания в strong).
    context_members: Vec<usize>,

    // Общее пространство id всех проходов. 0 зарезервирован.
    ids: HashMap<usize, u32>,
    next_id: u32,
    strong_done: bool,
    context_done: bool,
}

impl SampleRuntime {
    pub fn new() -> Self {
        Self {
            builtins: None,
            serialization_enabled: false,
            context_ready: false,
            objects: Vec::new(),
            bindings: Vec::new(),
            weak_slots: Vec::new(),
            context_members: Vec::new(),
            ids: HashMap::new(),
            next_id: 1,
            strong_done: false,
            context_done: false,
        }
    }

    /// Значение глобального определения (natives + extra-код).
    pub fn global(&self, name: &str) -> Option<&Value> {
        self.bindings
            .iter()
            .find(|b| b.name == name)
            .map(|b| &b.value)
    }

    /// Число живых объектов кучи.
    pub fn live_objects(&self) -> usize {
        self.objects.iter().filter(|o| o.alive).count()
    }

    // Аллокация с дедупом по контент-ключу: повторный ключ возвращает
    // существующий объект (это и дает back-reference'ы между проходами).
    fn alloc(&mut self, region: Region, size: u32, key: u64, lifetime: Lifetime) -> usize {
        if let Some(i) = self.objects.iter().position(|o| o.alive && o.key == key) {
            return i;
        }
        self.objects.push(HeapObject {
            region,
            size,
            key,
            lifetime,
            alive: true,
        });
        self.objects.len() - 1
    }

    fn define(&mut self, d: Directive, lifetime: Lifetime) -> Result<(), ScriptError> {
        if let Some(existing) = self.bindings.iter().find(|b| b.name == d.name) {
            if existing.value != d.value {
                return Err(ScriptError {
                    phase: ScriptPhase::Run,
                    message: format!("redefinition of '{}' with a different value", d.name),
                    line: d.line,
                    source_line: d.source_line,
                    start_column: d.name_span.0,
                    end_column: d.name_span.1,
                });
            }
            // Идемпотентное повторение того же определения.
            return Ok(());
        }

        let (region, size, key_src) = match &d.value {
            Value::Int(v) => (Region::OldData, 16, format!("int:{}", v)),
            Value::Str(s) => {
                let size = (((s.len() + 7) / 8) * 8).max(8) as u32;
                let region = if size > LARGE_OBJECT_LIMIT {
                    Region::LargeObject
                } else {
                    Region::OldData
                };
                (region, size, format!("str:{}", s))
            }
        };
        let map_key = match &d.value {
            Value::Int(_) => "map:int",
            Value::Str(_) => "map:str",
        };

        let value_obj = self.alloc(region, size, content_key(&key_src), lifetime);
        let map_obj = self.alloc(Region::Map, 64, content_key(map_key), lifetime);
        let cell_obj = self.alloc(
            Region::Cell,
            16,
            content_key(&format!("cell:{}", d.name)),
            lifetime,
        );

        if lifetime == Lifetime::Context {
            for idx in [value_obj, map_obj, cell_obj] {
                if !self.context_members.contains(&idx) {
                    self.context_members.push(idx);
                }
            }
        }

        let slot = self.bindings.len() as u32;
        self.weak_slots.push((slot, value_obj));
        self.bindings.push(Binding {
            name: d.name,
            value: d.value,
        });
        Ok(())
    }

    fn emit_new_object(&mut self, i: usize, sink: &mut SnapshotSink) {
        let id = self.next_id;
        self.next_id += 1;
        self.ids.insert(i, id);
        let o = &self.objects[i];
        sink.put(TAG_OBJECT, "object tag");
        put_u32(sink, id, "object id");
        sink.put(region_tag(o.region), "object region");
        put_u32(sink, o.size, "object size");
        put_u64(sink, o.key, "object key");
    }
}

impl Default for SampleRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime for SampleRuntime {
    fn decompress_builtins(&mut self) -> Result<()> {
        let sources = natives::startup_sources().context("unpack embedded builtins")?;
        self.builtins = Some(sources);
        Ok(())
    }

    fn enable_serialization(&mut self) {
        self.serialization_enabled = true;
    }

    fn bootstrap_context(&mut self) -> Result<()> {
        if self.context_ready {
            bail!("context already bootstrapped");
        }
        let sources = match self.builtins.take() {
            Some(s) => s,
            None => bail!("builtins were not decompressed before bootstrap"),
        };

        for src in &sources {
            let text = String::from_utf8_lossy(&src.body).into_owned();
            // Код builtin'а + мусор компиляции.
            self.alloc(
                Region::Code,
                src.body.len().max(1) as u32,
                content_key(&format!("code:{}", src.name)),
                Lifetime::Strong,
            );
            self.alloc(
                Region::New,
                256,
                content_key(&format!("scratch:{}", src.name)),
                Lifetime::Transient,
            );

            let directives = parse_source(&text).map_err(|e| {
                anyhow!(
                    "exception while compiling builtin '{}':\n{}",
                    src.name,
                    e.render(&src.name)
                )
            })?;
            for d in directives {
                self.define(d, Lifetime::Strong).map_err(|e| {
                    anyhow!(
                        "exception while running builtin '{}':\n{}",
                        src.name,
                        e.render(&src.name)
                    )
                })?;
            }
        }
        self.builtins = Some(sources);

        let ctx = self.alloc(
            Region::OldPointer,
            128,
            content_key("context"),
            Lifetime::Context,
        );
        self.context_members.push(ctx);
        self.context_ready = true;
        debug!(
            "sample runtime: context ready ({} globals, {} objects)",
            self.bindings.len(),
            self.live_objects()
        );
        Ok(())
    }

    fn run_extra_code(&mut self, name: &str, source: &str) -> Result<(), ScriptError> {
        debug_assert!(self.context_ready, "extra code before bootstrap");
        debug!("sample runtime: extra code '{}' ({} bytes)", name, source.len());

        // Фаза компиляции: разбор всего файла до исполнения.
        let directives = parse_source(source)?;

        // Мусор компиляции extra-кода живет до следующего GC.
        self.alloc(
            Region::New,
            128,
            content_key(&format!("scratch:extra:{}", name)),
            Lifetime::Transient,
        );

        // Фаза исполнения.
        for d in directives {
            self.define(d, Lifetime::Context)?;
        }
        Ok(())
    }

    fn collect_all_garbage(&mut self) {
        let mut dropped = 0usize;
        for o in &mut self.objects {
            if o.alive && o.lifetime == Lifetime::Transient {
                o.alive = false;
                dropped += 1;
            }
        }
        debug!("sample runtime: gc dropped {} transient objects", dropped);
    }

    fn serialize_strong_references(&mut self, sink: &mut SnapshotSink) -> Result<()> {
        if !self.serialization_enabled {
            bail!("serialization was not enabled");
        }
        if self.strong_done {
            bail!("strong references already serialized");
        }
        let strong: Vec<usize> = self
            .objects
            .iter()
            .enumerate()
            .filter(|(_, o)| o.alive && o.lifetime == Lifetime::Strong)
            .map(|(i, _)| i)
            .collect();
        for i in &strong {
            self.emit_new_object(*i, sink);
        }
        self.strong_done = true;
        debug!(
            "strong pass: {} objects, sink at {} bytes",
            strong.len(),
            sink.position()
        );
        Ok(())
    }

    fn serialize_context(&mut self, sink: &mut SnapshotSink) -> Result<()> {
        if !self.strong_done {
            bail!("context pass requested before strong references");
        }
        if self.context_done {
            bail!("context already serialized");
        }
        let members: Vec<usize> = self
            .context_members
            .iter()
            .copied()
            .filter(|&i| self.objects[i].alive)
            .collect();

        sink.put(TAG_CONTEXT_HEADER, "context header");
        put_u32(sink, members.len() as u32, "context object count");
        let mut backrefs = 0usize;
        for i in members {
            if let Some(&id) = self.ids.get(&i) {
                // Объект уже получил id в strong-проходе.
                sink.put(TAG_BACKREF, "backref tag");
                put_u32(sink, id, "backref id");
                backrefs += 1;
            } else {
                self.emit_new_object(i, sink);
            }
        }
        self.context_done = true;
        debug!(
            "context pass: {} back-references, sink at {} bytes",
            backrefs,
            sink.position()
        );
        Ok(())
    }

    fn serialize_weak_references(&mut self, sink: &mut SnapshotSink) -> Result<()> {
        if !self.context_done {
            bail!("weak pass requested before context");
        }
        for (slot, target) in self.weak_slots.clone() {
            if !self.objects[target].alive {
                continue;
            }
            let id = match self.ids.get(&target) {
                Some(id) => *id,
                None => bail!("weak slot {} references an unserialized object", slot),
            };
            sink.put(TAG_WEAK, "weak slot tag");
            put_u32(sink, slot, "weak slot");
            put_u32(sink, id, "weak target id");
        }
        debug!("weak pass: {} slots, sink at {} bytes", self.weak_slots.len(), sink.position());
        Ok(())
    }

    fn region_allocated(&self, region: Region) -> u64 {
        self.objects
            .iter()
            .filter(|o| o.alive && o.region == region)
            .map(|o| o.size as u64)
            .sum()
    }
}

// ---- Разбор источников ----

// Проверка "весь файл ASCII" до любого разбора. Возвращает координаты
// первого нарушителя.
fn ascii_check(text: &str) -> Result<(), ScriptError> {
    let bytes = text.as_bytes();
    let pos = match bytes.iter().position(|b| *b > 0x7F) {
        Some(p) => p,
        None => return Ok(()),
    };
    let line_start = bytes[..pos]
        .iter()
        .rposition(|b| *b == b'\n')
        .map(|i| i + 1)
        .unwrap_or(0);
    let line_end = bytes[pos..]
        .iter()
        .position(|b| *b == b'\n')
        .map(|i| pos + i)
        .unwrap_or(bytes.len());
    let line = bytes[..pos].iter().filter(|b| **b == b'\n').count() + 1;
    let col = pos - line_start;
    let source_line = String::from_utf8_lossy(&bytes[line_start..line_end])
        .trim_end_matches('\r')
        .to_string();
    Err(ScriptError {
        phase: ScriptPhase::Compile,
        message: format!("non-ASCII character 0x{:02x}", bytes[pos]),
        line,
        source_line,
        start_column: col,
        end_column: col + 1,
    })
}

fn parse_source(text: &str) -> Result<Vec<Directive>, ScriptError> {
    ascii_check(text)?;

    let mut out = Vec::new();
    for (i, raw) in text.lines().enumerate() {
        let line_no = i + 1;
        let work = raw.trim_end_matches('\r');
        let trimmed = work.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let err = |message: String, span: (usize, usize)| ScriptError {
            phase: ScriptPhase::Compile,
            message,
            line: line_no,
            source_line: work.to_string(),
            start_column: span.0,
            end_column: span.1,
        };

        let indent = work.len() - work.trim_start().len();
        let eq = match work.find('=') {
            Some(p) => p,
            None => {
                return Err(err(
                    "expected '=' in definition".to_string(),
                    (indent, work.trim_end().len()),
                ));
            }
        };

        let name_part = &work[..eq];
        let name = name_part.trim();
        let name_off = name_part.len() - name_part.trim_start().len();
        let name_span = (name_off, name_off + name.len().max(1));
        let valid_ident = !name.is_empty()
            && name
                .chars()
                .next()
                .map_or(false, |c| c.is_ascii_alphabetic() || c == '_')
            && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid_ident {
            return Err(err(format!("invalid identifier '{}'", name), name_span));
        }

        let value_part = &work[eq + 1..];
        let value_tok = value_part.trim();
        let value_off = eq + 1 + (value_part.len() - value_part.trim_start().len());
        let value_span = (value_off, value_off + value_tok.len().max(1));
        if value_tok.is_empty() {
            return Err(err("missing value after '='".to_string(), value_span));
        }

        let value = if let Some(rest) = value_tok.strip_prefix('"') {
            match rest.strip_suffix('"') {
                Some(inner) => Value::Str(inner.to_string()),
                None => {
                    return Err(err("unterminated string literal".to_string(), value_span));
                }
            }
        } else {
            match value_tok.parse::<i64>() {
                Ok(v) => Value::Int(v),
                Err(_) => {
                    return Err(err(
                        "expected integer or string literal".to_string(),
                        value_span,
                    ));
                }
            }
        };

        out.push(Directive {
            name: name.to_string(),
            value,
            line: line_no,
            source_line: work.to_string(),
            name_span,
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn booted() -> SampleRuntime {
        let mut rt = SampleRuntime::new();
        rt.decompress_builtins().unwrap();
        rt.enable_serialization();
        rt.bootstrap_context().unwrap();
        rt
    }

    #[test]
    fn bootstrap_defines_builtin_globals() {
        let rt = booted();
        assert!(matches!(rt.global("version"), Some(Value::Int(3))));
        assert!(matches!(rt.global("platform"), Some(Value::Str(s)) if s == "sample"));
        assert!(rt.region_allocated(Region::Code) > 0);
        assert!(rt.region_allocated(Region::Map) > 0);
    }

    #[test]
    fn extra_code_defines_globals_and_dedups_values() {
        let mut rt = booted();
        let before = rt.live_objects();
        // int:3 и map:int уже существуют (version = 3), новые объекты:
        // cell:answer, str:"hi", cell:greeting.
        rt.run_extra_code("extra", "answer = 3\ngreeting = \"hi\"\n")
            .unwrap();
        assert!(matches!(rt.global("answer"), Some(Value::Int(3))));
        let after = rt.live_objects();
        assert_eq!(after, before + 3 + 1, "3 new heap objects + compile scratch");
    }

    #[test]
    fn non_ascii_source_is_a_compile_error_with_position() {
        let mut rt = booted();
        let err = rt
            .run_extra_code("extra", "x = \"caf\u{e9}\"\n")
            .unwrap_err();
        assert_eq!(err.phase, ScriptPhase::Compile);
        assert_eq!(err.line, 1);
        assert_eq!(err.start_column, 8);
        assert!(err.message.contains("non-ASCII"), "{}", err.message);
    }

    #[test]
    fn missing_equals_is_a_compile_error() {
        let mut rt = booted();
        let err = rt.run_extra_code("extra", "ok = 1\njust words\n").unwrap_err();
        assert_eq!(err.phase, ScriptPhase::Compile);
        assert_eq!(err.line, 2);
        assert!(err.message.contains("expected '='"), "{}", err.message);
        assert_eq!(err.source_line, "just words");
    }

    #[test]
    fn bad_value_span_points_at_the_token() {
        let mut rt = booted();
        let err = rt.run_extra_code("extra", "x = @@@\n").unwrap_err();
        assert_eq!(err.phase, ScriptPhase::Compile);
        assert_eq!((err.start_column, err.end_column), (4, 7));
    }

    #[test]
    fn redefinition_with_a_new_value_is_a_run_error() {
        let mut rt = booted();
        let err = rt.run_extra_code("extra", "version = 9\n").unwrap_err();
        assert_eq!(err.phase, ScriptPhase::Run);
        assert!(err.message.contains("redefinition"), "{}", err.message);
        // Повтор с тем же значением проходит.
        rt.run_extra_code("extra2", "version = 3\n").unwrap();
    }

    #[test]
    fn passes_share_one_id_space_and_emit_backrefs() {
        let mut rt = booted();
        rt.run_extra_code("extra", "answer = 3\n").unwrap();
        rt.collect_all_garbage();

        let mut full = SnapshotSink::new();
        let mut ctx = SnapshotSink::new();
        rt.serialize_strong_references(&mut full).unwrap();
        rt.serialize_context(&mut ctx).unwrap();
        rt.serialize_weak_references(&mut full).unwrap();
        assert!(full.position() > 0);

        // Разбор context-потока: заголовок, затем count записей.
        let d = ctx.data();
        assert_eq!(d[0], TAG_CONTEXT_HEADER);
        let count = u32::from_le_bytes([d[1], d[2], d[3], d[4]]) as usize;
        let mut off = 5usize;
        let mut backrefs = 0usize;
        let mut fresh = 0usize;
        for _ in 0..count {
            match d[off] {
                TAG_BACKREF => {
                    off += 1 + 4;
                    backrefs += 1;
                }
                TAG_OBJECT => {
                    off += 1 + 4 + 1 + 4 + 8;
                    fresh += 1;
                }
                other => panic!("unexpected tag {}", other),
            }
        }
        assert_eq!(off, d.len());
        assert!(backrefs >= 1, "dedup value must appear as a back-reference");
        assert!(fresh >= 1, "the context object itself is always fresh");
    }

    #[test]
    fn pass_order_is_enforced() {
        let mut rt = booted();
        let mut sink = SnapshotSink::new();
        assert!(rt.serialize_context(&mut sink).is_err());
        assert!(rt.serialize_weak_references(&mut sink).is_err());

        let mut s1 = SnapshotSink::new();
        let mut s2 = SnapshotSink::new();
        let mut s3 = SnapshotSink::new();
        rt.serialize_strong_references(&mut s1).unwrap();
        assert!(rt.serialize_weak_references(&mut s3).is_err());
        rt.serialize_context(&mut s2).unwrap();
        rt.serialize_weak_references(&mut s3).unwrap();
    }

    #[test]
    fn gc_clears_new_space() {
        let mut rt = booted();
        assert!(rt.region_allocated(Region::New) > 0);
        rt.collect_all_garbage();
        assert_eq!(rt.region_allocated(Region::New), 0);
    }

    #[test]
    fn large_strings_land_in_large_object_space() {
        let mut rt = booted();
        let body = format!("blob = \"{}\"\n", "z".repeat(20_000));
        rt.run_extra_code("extra", &body).unwrap();
        assert!(rt.region_allocated(Region::LargeObject) >= 20_000);
    }
}

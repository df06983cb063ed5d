// src/runtime/mod.rs — граница с embedder'ом (сериализуемый runtime).
//
// Оркестратор не знает, как устроена куча и как кодируется граф объектов;
// он знает порядок шагов и куда складывать байты. Все остальное — за этим
// трейтом. Три прохода сериализации делят ОДНО пространство идентификаторов:
// id, выданные в strong-проходе, валидны для context-прохода
// (back-reference'ы) и для weak-прохода.

pub mod sample;

use anyhow::Result;
use thiserror::Error;

use crate::region::Region;
use crate::sink::SnapshotSink;

/// Phase in which a script failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptPhase {
    Compile,
    Run,
}

/// Diagnostic for a failed bootstrap or extra-code script.
///
/// Columns are 0-based byte offsets into `source_line`;
/// `start_column..end_column` is half-open. The caret renderer always draws
/// at least one caret.
#[derive(Debug, Clone, Error)]
#[error("{message} at line {line}")]
pub struct ScriptError {
    pub phase: ScriptPhase,
    pub message: String,
    /// 1-based line number in the failing source.
    pub line: usize,
    /// The offending source line, verbatim (without the line terminator).
    pub source_line: String,
    pub start_column: usize,
    pub end_column: usize,
}

impl ScriptError {
    /// Multi-line diagnostic: header, message with line number, the source
    /// line, and a caret span under the offending columns.
    pub fn render(&self, name: &str) -> String {
        let verb = match self.phase {
            ScriptPhase::Compile => "compiling",
            ScriptPhase::Run => "running",
        };
        let mut caret = String::new();
        for _ in 0..self.start_column {
            caret.push(' ');
        }
        let width = self.end_column.saturating_sub(self.start_column).max(1);
        for _ in 0..width {
            caret.push('^');
        }
        format!(
            "failure {} '{}'\n{} at line {}\n{}\n{}",
            verb, name, self.message, self.line, self.source_line, caret
        )
    }
}

/// Embedder hooks, listed in the order the pipeline calls them.
pub trait Runtime {
    /// Unpack and verify embedded builtins. Runs before any other runtime
    /// state is touched; default is a no-op for embedders without builtins.
    fn decompress_builtins(&mut self) -> Result<()> {
        Ok(())
    }

    /// Switch the heap into serialization mode (everything observable).
    fn enable_serialization(&mut self);

    /// Create and bootstrap the initial context from the builtins.
    fn bootstrap_context(&mut self) -> Result<()>;

    /// Compile and run user-supplied extra code inside the context.
    fn run_extra_code(&mut self, name: &str, source: &str) -> Result<(), ScriptError>;

    /// Drop transient roots so the snapshot excludes ephemeral objects.
    fn collect_all_garbage(&mut self);

    /// Pass 1: objects reachable from runtime-global strong roots.
    fn serialize_strong_references(&mut self, sink: &mut SnapshotSink) -> Result<()>;

    /// Pass 2: the bootstrapped context. Emits back-references into ids
    /// assigned by pass 1 instead of re-serializing shared objects.
    fn serialize_context(&mut self, sink: &mut SnapshotSink) -> Result<()>;

    /// Pass 3: weak slots. Requires the complete id space of passes 1 and 2.
    fn serialize_weak_references(&mut self, sink: &mut SnapshotSink) -> Result<()>;

    /// Current allocation offset of a region, in bytes.
    fn region_allocated(&self, region: Region) -> u64;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caret_span_alignment() {
        let err = ScriptError {
            phase: ScriptPhase::Compile,
            message: "expected '=' in definition".to_string(),
            line: 3,
            source_line: "  just words".to_string(),
            start_column: 2,
            end_column: 12,
        };
        let rendered = err.render("startup.src");
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "failure compiling 'startup.src'");
        assert_eq!(lines[1], "expected '=' in definition at line 3");
        assert_eq!(lines[2], "  just words");
        assert_eq!(lines[3], "  ^^^^^^^^^^");
    }

    #[test]
    fn caret_is_at_least_one_column_wide() {
        let err = ScriptError {
            phase: ScriptPhase::Run,
            message: "boom".to_string(),
            line: 1,
            source_line: "x".to_string(),
            start_column: 0,
            end_column: 0,
        };
        let rendered = err.render("s");
        assert!(rendered.ends_with("\n^"));
        assert!(rendered.starts_with("failure running 's'"));
    }
}

// Базовые модули
pub mod config;
pub mod region;

// Контейнеры snapshot-байтов и кодеки
pub mod compress; // src/compress.rs
pub mod sink;     // src/sink.rs

// Таблица счетчиков (shared mmap)
pub mod counters; // src/counters.rs

// Встроенные bootstrap-источники (build.rs упаковывает natives/*.src)
pub mod natives;  // src/natives.rs

// Граница embedder'а + референсный runtime
pub mod runtime;  // src/runtime/{mod,sample}.rs

// Запись артефактов и оркестрация
pub mod writer;   // src/writer.rs
pub mod pipeline; // src/pipeline.rs

// Удобные реэкспорты
pub use compress::{decompress, CompressError, Compressor, IdentityCompressor, ZstdCompressor};
pub use config::{Codec, SnapshotConfig};
pub use counters::{CounterId, CountersFile, CountersView};
pub use region::{Region, RegionSizes};
pub use runtime::sample::{SampleRuntime, Value};
pub use runtime::{Runtime, ScriptError, ScriptPhase};
pub use sink::{SinkError, SnapshotSink};
pub use writer::SnapshotWriter;

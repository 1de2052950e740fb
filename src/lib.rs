//! # loadlog
//!
//! Streaming loadcell telemetry logger with durable segmented persistence.
//! An acquisition loop reads decoded samples from a sensor source one at a
//! time and hands them to a persistence subsystem that buffers them, appends
//! them to numbered segment files, and — on shutdown or interruption —
//! merges every segment into a single ordered CSV artifact. Acknowledged
//! samples are never lost: whatever `ingest` accepted before shutdown is in
//! the merged output exactly once, in arrival order.
//!
//! ## Crate Structure
//!
//! - **`sample`**: the immutable `Sample` record plus the raw-payload
//!   decoding (little-endian load / battery ADC / device clock).
//! - **`acquisition`**: the `AcquisitionSource` boundary, the mock loadcell
//!   used in place of real hardware, and the read loop with cancellation.
//! - **`buffer`**: the FIFO sample queue between the acquisition and
//!   persistence contexts; unbounded by default, bounded-with-backpressure
//!   as an option.
//! - **`segment`**: the append-only segment files and their rotation at the
//!   configured row limit.
//! - **`flush`**: flush cadence (immediate / threshold / interval) and the
//!   single-in-flight trigger coalescing.
//! - **`supervisor`**: the `ingest` / `flush_now` / `shutdown` lifecycle
//!   tying the above together on a dedicated writer task.
//! - **`merge`**: consolidation of all segments into the header-stamped
//!   merged artifact.
//! - **`session`**: per-run session directories and their JSON manifest.
//! - **`config`**: TOML settings loaded through the `config` crate.
//! - **`error`**: the crate-wide `LogError` enum.
//! - **`logging`**: `tracing` subscriber setup.

pub mod acquisition;
pub mod buffer;
pub mod config;
pub mod error;
pub mod flush;
pub mod logging;
pub mod merge;
pub mod sample;
pub mod segment;
pub mod session;
pub mod supervisor;

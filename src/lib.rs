//! # Alcyone - Heterogeneous-Memory Array Runtime for Streaming Capture
//!
//! Alcyone is the memory substrate and ingest front of a high-throughput
//! streaming signal-processing pipeline (radio astronomy, SDR). It couples
//! a space-tagged multi-dimensional array engine with a span-structured
//! ring buffer and a format-polymorphic packet capture state machine.
//!
//! ## Key Pieces
//!
//! - **Type encoding**: compact integer dtype codes covering signed and
//!   unsigned integers, floats, complex, and short vectors at arbitrary
//!   bit widths, with deterministic names (`"ci16"`, `"Vector<f32, 4>"`).
//! - **Memory engine**: alloc/free/copy/fill across system RAM, CUDA
//!   device, pinned host, and managed memory, dispatched by explicit
//!   space tags with a normalized cross-space route table.
//! - **Array descriptor**: shape/stride/dtype/space records whose copy and
//!   fill operations flatten contiguous dimension runs into single fast
//!   transfers.
//! - **Ring buffer**: a bounded byte ring of sequences and spans with
//!   block-on-full backpressure, wrap-free spans via a ghost region, and
//!   shutdown semantics.
//! - **Packet capture**: UDP/raw-socket/disk sources decoded by pure
//!   per-format parsers (VDIF, TBN, DRX, CHIPS, ...) into ring slots, with
//!   sequence lifecycle events (started / continued / changed / ended /
//!   no-data / interrupted).
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use alcyone::capture::{bind_udp, Capture, CaptureConfig};
//! use alcyone::memory::Space;
//! use alcyone::ring::Ring;
//! use alcyone::status::CaptureStatus;
//!
//! let ring = Ring::new(Space::System, "tbn_ring");
//! let socket = bind_udp("0.0.0.0:4015".parse().unwrap(), 1 << 22).unwrap();
//! let config = CaptureConfig::new(64, 2000, 250);
//! let mut capture = Capture::udp("tbn", socket, &ring, config, None).unwrap();
//! loop {
//!     match capture.recv().unwrap() {
//!         CaptureStatus::Interrupted | CaptureStatus::Error => break,
//!         _ => {}
//!     }
//! }
//! ```
//!
//! ## Feature Flags
//!
//! - `cuda`: link the CUDA runtime for device, pinned, and managed memory
//!   spaces. Without it those entry points compile against stub bindings
//!   and report `UnsupportedSpace` (pinned host falls back to locked
//!   mmap pages).
//!
//! ## Error Handling
//!
//! Every fallible operation returns [`status::Result`], whose error half
//! carries stable integer codes. Nothing is logged unless a `log` backend
//! is installed.

pub mod affinity;
pub mod array;
pub mod capture;
pub mod dtype;
pub mod layout;
pub mod memory;
pub mod ring;
pub mod status;

// Re-export key types
pub use array::{Array, MAX_DIMS};
pub use capture::{Capture, CaptureConfig, CaptureStats, SequenceCallback, SequenceEvent};
pub use dtype::{DType, DTypeInfo, TypeClass};
pub use memory::Space;
pub use ring::Ring;
pub use status::{CaptureStatus, Result, Status, Whence};

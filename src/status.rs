//! Status codes shared by every fallible operation in the crate.
//!
//! The numeric values are part of the stable surface (they are what a C
//! caller would see), so each variant pins its discriminant explicitly.
//! Success is not a variant: Rust callers get `Ok(())`, and `code()` maps
//! an entire `Result` back to the integer surface where `0` is success.

use thiserror::Error;

/// Error half of every public operation. `#[repr(i32)]` so the discriminants
/// are the stable wire/ABI codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[repr(i32)]
pub enum Status {
    #[error("end of data")]
    EndOfData = 1,
    #[error("operation would block")]
    WouldBlock = 2,
    #[error("invalid pointer")]
    InvalidPointer = 8,
    #[error("invalid handle")]
    InvalidHandle = 9,
    #[error("invalid argument")]
    InvalidArgument = 10,
    #[error("invalid state")]
    InvalidState = 11,
    #[error("invalid memory space")]
    InvalidSpace = 12,
    #[error("invalid shape")]
    InvalidShape = 13,
    #[error("invalid stride")]
    InvalidStride = 14,
    #[error("invalid dtype")]
    InvalidDtype = 15,
    #[error("memory allocation failed")]
    AllocationFailed = 32,
    #[error("memory operation failed")]
    MemOpFailed = 33,
    #[error("unsupported")]
    Unsupported = 48,
    #[error("unsupported memory space")]
    UnsupportedSpace = 49,
    #[error("unsupported shape")]
    UnsupportedShape = 50,
    #[error("unsupported stride")]
    UnsupportedStride = 51,
    #[error("unsupported dtype")]
    UnsupportedDtype = 52,
    #[error("failed to converge")]
    FailedToConverge = 64,
    #[error("insufficient storage")]
    InsufficientStorage = 65,
    #[error("device error")]
    DeviceError = 66,
    #[error("internal error")]
    InternalError = 99,
}

pub type Result<T> = std::result::Result<T, Status>;

/// Integer code for a completed operation; `0` is success.
pub fn code<T>(result: &Result<T>) -> i32 {
    match result {
        Ok(_) => 0,
        Err(status) => *status as i32,
    }
}

/// Per-cycle outcome of the capture state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum CaptureStatus {
    /// A new sequence was opened this cycle.
    Started = 0,
    /// The current sequence was closed.
    Ended = 1,
    /// Packets were written to the open sequence.
    Continued = 2,
    /// Sequence-identifying tags changed; old sequence closed, new opened.
    Changed = 3,
    /// The source read deadline expired with nothing to process.
    NoData = 4,
    /// Shutdown was requested or the ring shut down underneath us.
    Interrupted = 5,
    /// The source failed or a callback refused; the capture is terminal.
    Error = 6,
}

/// Seek origin for disk-backed packet sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Whence {
    Set = 0,
    Cur = 1,
    End = 2,
}

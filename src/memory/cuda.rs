//! Raw CUDA runtime bindings used by the memory engine.
//!
//! The `cuda` feature links the real runtime; without it, stub
//! implementations that report failure are compiled instead so the rest of
//! the engine needs no conditional code at call sites. Error codes follow
//! the CUDA runtime convention: `0` is success, anything else is failure.

use std::cell::Cell;
use std::os::raw::{c_int, c_uint, c_void};

use crate::status::{Result, Status};

pub const CUDA_SUCCESS: c_int = 0;
pub const HOST_ALLOC_DEFAULT: c_uint = 0;
pub const MANAGED_GLOBAL: c_uint = 1;
pub const MEMCPY_DEFAULT: c_int = 4;

// cudaPointerGetAttributes memory types (cudaMemoryType)
pub const MEMORY_TYPE_UNREGISTERED: c_int = 0;
pub const MEMORY_TYPE_HOST: c_int = 1;
pub const MEMORY_TYPE_DEVICE: c_int = 2;
pub const MEMORY_TYPE_MANAGED: c_int = 3;

#[repr(C)]
pub struct PointerAttributes {
    pub memory_type: c_int,
    pub device: c_int,
    pub device_pointer: *mut c_void,
    pub host_pointer: *mut c_void,
}

#[cfg(feature = "cuda")]
#[link(name = "cudart")]
extern "C" {
    pub fn cudaSetDevice(device: c_int) -> c_int;
    pub fn cudaGetDevice(device: *mut c_int) -> c_int;
    pub fn cudaMalloc(ptr: *mut *mut c_void, size: usize) -> c_int;
    pub fn cudaHostAlloc(ptr: *mut *mut c_void, size: usize, flags: c_uint) -> c_int;
    pub fn cudaMallocManaged(ptr: *mut *mut c_void, size: usize, flags: c_uint) -> c_int;
    pub fn cudaFree(ptr: *mut c_void) -> c_int;
    pub fn cudaFreeHost(ptr: *mut c_void) -> c_int;
    pub fn cudaMemcpyAsync(
        dst: *mut c_void,
        src: *const c_void,
        count: usize,
        kind: c_int,
        stream: *mut c_void,
    ) -> c_int;
    pub fn cudaMemcpy2DAsync(
        dst: *mut c_void,
        dpitch: usize,
        src: *const c_void,
        spitch: usize,
        width: usize,
        height: usize,
        kind: c_int,
        stream: *mut c_void,
    ) -> c_int;
    pub fn cudaMemsetAsync(ptr: *mut c_void, value: c_int, count: usize, stream: *mut c_void)
        -> c_int;
    pub fn cudaMemset2DAsync(
        ptr: *mut c_void,
        pitch: usize,
        value: c_int,
        width: usize,
        height: usize,
        stream: *mut c_void,
    ) -> c_int;
    pub fn cudaStreamSynchronize(stream: *mut c_void) -> c_int;
    pub fn cudaPointerGetAttributes(attrs: *mut PointerAttributes, ptr: *const c_void) -> c_int;
}

// Stub implementations when CUDA is not available. Every entry point
// reports failure so callers fall through to their unsupported paths.
#[cfg(not(feature = "cuda"))]
#[allow(non_snake_case, clippy::missing_safety_doc)]
mod stubs {
    use super::*;

    pub unsafe fn cudaSetDevice(_: c_int) -> c_int { -1 }
    pub unsafe fn cudaGetDevice(_: *mut c_int) -> c_int { -1 }
    pub unsafe fn cudaMalloc(_: *mut *mut c_void, _: usize) -> c_int { -1 }
    pub unsafe fn cudaHostAlloc(_: *mut *mut c_void, _: usize, _: c_uint) -> c_int { -1 }
    pub unsafe fn cudaMallocManaged(_: *mut *mut c_void, _: usize, _: c_uint) -> c_int { -1 }
    pub unsafe fn cudaFree(_: *mut c_void) -> c_int { -1 }
    pub unsafe fn cudaFreeHost(_: *mut c_void) -> c_int { -1 }
    pub unsafe fn cudaMemcpyAsync(_: *mut c_void, _: *const c_void, _: usize, _: c_int, _: *mut c_void) -> c_int { -1 }
    pub unsafe fn cudaMemcpy2DAsync(_: *mut c_void, _: usize, _: *const c_void, _: usize, _: usize, _: usize, _: c_int, _: *mut c_void) -> c_int { -1 }
    pub unsafe fn cudaMemsetAsync(_: *mut c_void, _: c_int, _: usize, _: *mut c_void) -> c_int { -1 }
    pub unsafe fn cudaMemset2DAsync(_: *mut c_void, _: usize, _: c_int, _: usize, _: usize, _: *mut c_void) -> c_int { -1 }
    pub unsafe fn cudaStreamSynchronize(_: *mut c_void) -> c_int { -1 }
    pub unsafe fn cudaPointerGetAttributes(_: *mut PointerAttributes, _: *const c_void) -> c_int { -1 }
}

#[cfg(not(feature = "cuda"))]
pub use stubs::*;

/// Whether this build can back device and managed spaces at all.
pub const fn available() -> bool {
    cfg!(feature = "cuda")
}

// Per-thread current device/stream. The engine takes these explicitly in
// its internal paths; the thread-local pair exists for surface
// compatibility with callers that think in terms of a process-wide
// "current" context.
thread_local! {
    static CURRENT_DEVICE: Cell<c_int> = const { Cell::new(0) };
    static CURRENT_STREAM: Cell<usize> = const { Cell::new(0) };
}

/// Set the calling thread's current device.
pub fn set_device(device: i32) -> Result<()> {
    if !available() {
        return Err(Status::UnsupportedSpace);
    }
    let rc = unsafe { cudaSetDevice(device) };
    if rc != CUDA_SUCCESS {
        return Err(Status::DeviceError);
    }
    CURRENT_DEVICE.with(|d| d.set(device));
    Ok(())
}

pub fn device() -> i32 {
    CURRENT_DEVICE.with(|d| d.get())
}

/// Set the calling thread's current stream (a raw `cudaStream_t`).
pub fn set_stream(stream: *mut c_void) {
    CURRENT_STREAM.with(|s| s.set(stream as usize));
}

pub fn stream() -> *mut c_void {
    CURRENT_STREAM.with(|s| s.get()) as *mut c_void
}

/// Block the host until the calling thread's current stream drains.
pub fn stream_synchronize() -> Result<()> {
    if !available() {
        return Err(Status::UnsupportedSpace);
    }
    let rc = unsafe { cudaStreamSynchronize(stream()) };
    if rc == CUDA_SUCCESS {
        Ok(())
    } else {
        Err(Status::DeviceError)
    }
}

//! Space-aware memory engine: alloc/free/copy/fill across host and device
//! memory spaces.
//!
//! Every operation dispatches on an explicit [`Space`] tag rather than
//! introspecting pointers, which keeps the hot paths to a single branch;
//! [`get_space`] exists for the callers that do need introspection.
//! Cross-space copies normalize `(src_space, dst_space)` down to a small
//! route table instead of enumerating all 25 pairs.

pub mod cuda;

use std::collections::BTreeMap;
use std::os::raw::c_void;
use std::ptr;
use std::sync::Mutex;
use std::sync::OnceLock;

use crate::status::{Result, Status};

/// Memory space identifiers. The integer values are stable surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Space {
    /// Resolved via pointer introspection where a pointer is at hand;
    /// never a valid allocation space.
    Auto = 0,
    System = 1,
    Cuda = 2,
    CudaHost = 3,
    CudaManaged = 4,
}

impl std::fmt::Display for Space {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Space::Auto => "auto",
            Space::System => "system",
            Space::Cuda => "cuda",
            Space::CudaHost => "cuda_host",
            Space::CudaManaged => "cuda_managed",
        })
    }
}

impl std::str::FromStr for Space {
    type Err = Status;
    fn from_str(s: &str) -> Result<Space> {
        match s {
            "auto" => Ok(Space::Auto),
            "system" => Ok(Space::System),
            "cuda" => Ok(Space::Cuda),
            "cuda_host" => Ok(Space::CudaHost),
            "cuda_managed" => Ok(Space::CudaManaged),
            _ => Err(Status::InvalidSpace),
        }
    }
}

const ALIGNMENT: usize = 4096;

/// Alignment guaranteed by [`alloc`] for host spaces.
pub const fn alignment() -> usize {
    ALIGNMENT
}

// Non-CUDA pinned allocations are mmap'd, and munmap needs the length back;
// the same table lets get_space recover the space of those pointers.
fn pinned_registry() -> &'static Mutex<BTreeMap<usize, usize>> {
    static REGISTRY: OnceLock<Mutex<BTreeMap<usize, usize>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(BTreeMap::new()))
}

fn page_round_up(size: usize) -> usize {
    let page = unsafe { libc::sysconf(libc::_SC_PAGESIZE) } as usize;
    size.div_ceil(page) * page
}

fn alloc_pinned_host(size: usize) -> Result<*mut u8> {
    if cuda::available() {
        let mut out: *mut c_void = ptr::null_mut();
        let rc = unsafe { cuda::cudaHostAlloc(&mut out, size, cuda::HOST_ALLOC_DEFAULT) };
        if rc != cuda::CUDA_SUCCESS || out.is_null() {
            return Err(Status::AllocationFailed);
        }
        return Ok(out as *mut u8);
    }
    let len = page_round_up(size);
    let ptr = unsafe {
        libc::mmap(
            ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        )
    };
    if ptr == libc::MAP_FAILED {
        return Err(Status::AllocationFailed);
    }
    // Page-lock where the rlimit allows; the allocation is still usable
    // (just swappable) when it does not.
    if unsafe { libc::mlock(ptr, len) } != 0 {
        log::debug!("mlock failed for {} bytes; continuing unlocked", len);
    }
    pinned_registry()
        .lock()
        .map_err(|_| Status::InternalError)?
        .insert(ptr as usize, len);
    Ok(ptr as *mut u8)
}

fn free_pinned_host(ptr: *mut u8) -> Result<()> {
    let len = pinned_registry()
        .lock()
        .map_err(|_| Status::InternalError)?
        .remove(&(ptr as usize));
    match len {
        Some(len) => {
            if unsafe { libc::munmap(ptr as *mut c_void, len) } != 0 {
                return Err(Status::MemOpFailed);
            }
            Ok(())
        }
        None => {
            // Not one of ours: must be a cudaHostAlloc pointer.
            let rc = unsafe { cuda::cudaFreeHost(ptr as *mut c_void) };
            if rc != cuda::CUDA_SUCCESS {
                return Err(Status::MemOpFailed);
            }
            Ok(())
        }
    }
}

/// Allocate `size` bytes in `space`. Host-space pointers are aligned to at
/// least [`alignment()`] bytes.
pub fn alloc(size: usize, space: Space) -> Result<*mut u8> {
    if size == 0 {
        return Err(Status::InvalidArgument);
    }
    match space {
        Space::Auto => Err(Status::UnsupportedSpace),
        Space::System => {
            let mut out: *mut c_void = ptr::null_mut();
            let rc = unsafe { libc::posix_memalign(&mut out, ALIGNMENT, size) };
            if rc != 0 || out.is_null() {
                return Err(Status::AllocationFailed);
            }
            Ok(out as *mut u8)
        }
        Space::CudaHost => alloc_pinned_host(size),
        Space::Cuda => {
            if !cuda::available() {
                return Err(Status::UnsupportedSpace);
            }
            let mut out: *mut c_void = ptr::null_mut();
            let rc = unsafe { cuda::cudaMalloc(&mut out, size) };
            if rc != cuda::CUDA_SUCCESS || out.is_null() {
                return Err(Status::AllocationFailed);
            }
            Ok(out as *mut u8)
        }
        Space::CudaManaged => {
            if !cuda::available() {
                return Err(Status::UnsupportedSpace);
            }
            let mut out: *mut c_void = ptr::null_mut();
            let rc = unsafe { cuda::cudaMallocManaged(&mut out, size, cuda::MANAGED_GLOBAL) };
            if rc != cuda::CUDA_SUCCESS || out.is_null() {
                return Err(Status::AllocationFailed);
            }
            Ok(out as *mut u8)
        }
    }
}

/// Release a pointer previously returned by [`alloc`] in the same `space`.
/// Tolerates null.
///
/// # Safety
///
/// `ptr` must be null or an allocation from [`alloc`] with this `space`,
/// not yet freed.
pub unsafe fn free(ptr: *mut u8, space: Space) -> Result<()> {
    if ptr.is_null() {
        return Ok(());
    }
    match space {
        Space::Auto => free(ptr, get_space(ptr)?),
        Space::System => {
            libc::free(ptr as *mut c_void);
            Ok(())
        }
        Space::CudaHost => free_pinned_host(ptr),
        Space::Cuda | Space::CudaManaged => {
            if !cuda::available() {
                return Err(Status::UnsupportedSpace);
            }
            let rc = cuda::cudaFree(ptr as *mut c_void);
            if rc != cuda::CUDA_SUCCESS {
                return Err(Status::MemOpFailed);
            }
            Ok(())
        }
    }
}

/// Best-effort space recovery for an arbitrary pointer. Reports `System`
/// when no introspection source claims the pointer.
pub fn get_space(ptr: *const u8) -> Result<Space> {
    if ptr.is_null() {
        return Err(Status::InvalidPointer);
    }
    if let Ok(registry) = pinned_registry().lock() {
        // Range lookup: the pointer may be interior to a pinned mapping.
        if let Some((&base, &len)) = registry.range(..=ptr as usize).next_back() {
            if (ptr as usize) < base + len {
                return Ok(Space::CudaHost);
            }
        }
    }
    if cuda::available() {
        let mut attrs = cuda::PointerAttributes {
            memory_type: cuda::MEMORY_TYPE_UNREGISTERED,
            device: 0,
            device_pointer: ptr::null_mut(),
            host_pointer: ptr::null_mut(),
        };
        let rc = unsafe { cuda::cudaPointerGetAttributes(&mut attrs, ptr as *const c_void) };
        if rc == cuda::CUDA_SUCCESS {
            return Ok(match attrs.memory_type {
                cuda::MEMORY_TYPE_DEVICE => Space::Cuda,
                cuda::MEMORY_TYPE_MANAGED => Space::CudaManaged,
                cuda::MEMORY_TYPE_HOST => Space::CudaHost,
                _ => Space::System,
            });
        }
    }
    Ok(Space::System)
}

fn resolve(ptr: *const u8, space: Space) -> Result<Space> {
    match space {
        Space::Auto => get_space(ptr),
        other => Ok(other),
    }
}

type CopyFn = unsafe fn(*mut u8, *const u8, usize) -> Result<()>;

unsafe fn host_copy(dst: *mut u8, src: *const u8, count: usize) -> Result<()> {
    ptr::copy_nonoverlapping(src, dst, count);
    Ok(())
}

unsafe fn device_copy(dst: *mut u8, src: *const u8, count: usize) -> Result<()> {
    let rc = cuda::cudaMemcpyAsync(
        dst as *mut c_void,
        src as *const c_void,
        count,
        cuda::MEMCPY_DEFAULT,
        cuda::stream(),
    );
    if rc != cuda::CUDA_SUCCESS {
        return Err(Status::DeviceError);
    }
    Ok(())
}

fn device_side(space: Space) -> Result<bool> {
    match space {
        Space::System | Space::CudaHost => Ok(false),
        Space::Cuda | Space::CudaManaged => {
            if cuda::available() {
                Ok(true)
            } else {
                Err(Status::UnsupportedSpace)
            }
        }
        Space::Auto => Err(Status::InvalidSpace),
    }
}

// Normalized route table: any pair touching device or managed memory takes
// the device path (the runtime infers the direction), everything else is a
// plain host copy.
fn copy_route(src_space: Space, dst_space: Space) -> Result<CopyFn> {
    if device_side(src_space)? || device_side(dst_space)? {
        Ok(device_copy)
    } else {
        Ok(host_copy)
    }
}

/// Copy `count` bytes between any pair of spaces. Synchronous with respect
/// to the host for host-only pairs; copies that touch device memory are
/// enqueued on the calling thread's current stream.
///
/// # Safety
///
/// `dst` and `src` must be valid for `count` bytes in their respective
/// spaces and must not overlap.
pub unsafe fn copy(
    dst: *mut u8,
    dst_space: Space,
    src: *const u8,
    src_space: Space,
    count: usize,
) -> Result<()> {
    if count == 0 {
        return Ok(());
    }
    if dst.is_null() || src.is_null() {
        return Err(Status::InvalidPointer);
    }
    let dst_space = resolve(dst, dst_space)?;
    let src_space = resolve(src, src_space)?;
    copy_route(src_space, dst_space)?(dst, src, count)
}

/// Strided 2-D copy: `height` rows of `width` bytes. Row pitches are in
/// bytes and must be at least `width`.
///
/// # Safety
///
/// Both pointers must be valid for their full `stride * height` extents.
pub unsafe fn copy_2d(
    dst: *mut u8,
    dst_stride: usize,
    dst_space: Space,
    src: *const u8,
    src_stride: usize,
    src_space: Space,
    width: usize,
    height: usize,
) -> Result<()> {
    if width == 0 || height == 0 {
        return Ok(());
    }
    if dst.is_null() || src.is_null() {
        return Err(Status::InvalidPointer);
    }
    if dst_stride < width || src_stride < width {
        return Err(Status::InvalidArgument);
    }
    let dst_space = resolve(dst, dst_space)?;
    let src_space = resolve(src, src_space)?;
    if !device_side(src_space)? && !device_side(dst_space)? {
        for row in 0..height {
            ptr::copy_nonoverlapping(src.add(row * src_stride), dst.add(row * dst_stride), width);
        }
        return Ok(());
    }
    let rc = cuda::cudaMemcpy2DAsync(
        dst as *mut c_void,
        dst_stride,
        src as *const c_void,
        src_stride,
        width,
        height,
        cuda::MEMCPY_DEFAULT,
        cuda::stream(),
    );
    if rc != cuda::CUDA_SUCCESS {
        return Err(Status::DeviceError);
    }
    Ok(())
}

/// Fill `count` bytes with `value`, which must fit in a byte.
///
/// # Safety
///
/// `ptr` must be valid for `count` bytes in `space`.
pub unsafe fn memset(ptr_: *mut u8, space: Space, value: i32, count: usize) -> Result<()> {
    if !(0..=255).contains(&value) {
        return Err(Status::InvalidArgument);
    }
    if count == 0 {
        return Ok(());
    }
    if ptr_.is_null() {
        return Err(Status::InvalidPointer);
    }
    let space = resolve(ptr_, space)?;
    if device_side(space)? {
        let rc = cuda::cudaMemsetAsync(ptr_ as *mut c_void, value, count, cuda::stream());
        if rc != cuda::CUDA_SUCCESS {
            return Err(Status::DeviceError);
        }
        Ok(())
    } else {
        // Pinned host memory is host-addressable in every configuration.
        ptr::write_bytes(ptr_, value as u8, count);
        Ok(())
    }
}

/// Strided 2-D fill: `height` rows of `width` bytes at `stride` pitch.
///
/// # Safety
///
/// `ptr` must be valid for the full `stride * height` extent.
pub unsafe fn memset_2d(
    ptr_: *mut u8,
    stride: usize,
    space: Space,
    value: i32,
    width: usize,
    height: usize,
) -> Result<()> {
    if !(0..=255).contains(&value) {
        return Err(Status::InvalidArgument);
    }
    if width == 0 || height == 0 {
        return Ok(());
    }
    if ptr_.is_null() {
        return Err(Status::InvalidPointer);
    }
    if stride < width {
        return Err(Status::InvalidArgument);
    }
    let space = resolve(ptr_, space)?;
    if device_side(space)? {
        let rc = cuda::cudaMemset2DAsync(
            ptr_ as *mut c_void,
            stride,
            value,
            width,
            height,
            cuda::stream(),
        );
        if rc != cuda::CUDA_SUCCESS {
            return Err(Status::DeviceError);
        }
        Ok(())
    } else {
        for row in 0..height {
            ptr::write_bytes(ptr_.add(row * stride), value as u8, width);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Spaces that are allocatable in the current build configuration.
    fn host_spaces() -> Vec<Space> {
        vec![Space::System, Space::CudaHost]
    }

    #[test]
    fn alloc_is_aligned() {
        for space in host_spaces() {
            let ptr = alloc(100, space).unwrap();
            assert_eq!(ptr as usize % alignment(), 0, "space {}", space);
            unsafe { free(ptr, space).unwrap() };
        }
    }

    #[test]
    fn alloc_rejects_auto_and_zero() {
        assert_eq!(alloc(16, Space::Auto), Err(Status::UnsupportedSpace));
        assert_eq!(alloc(0, Space::System), Err(Status::InvalidArgument));
    }

    #[cfg(not(feature = "cuda"))]
    #[test]
    fn device_spaces_unsupported_without_cuda() {
        assert_eq!(alloc(16, Space::Cuda), Err(Status::UnsupportedSpace));
        assert_eq!(alloc(16, Space::CudaManaged), Err(Status::UnsupportedSpace));
    }

    #[test]
    fn free_tolerates_null() {
        unsafe {
            free(ptr::null_mut(), Space::System).unwrap();
            free(ptr::null_mut(), Space::Cuda).unwrap();
        }
    }

    #[test]
    fn get_space_recovers_pinned_and_defaults_to_system() {
        assert_eq!(get_space(ptr::null()), Err(Status::InvalidPointer));
        let sys = alloc(64, Space::System).unwrap();
        assert_eq!(get_space(sys).unwrap(), Space::System);
        let pinned = alloc(64, Space::CudaHost).unwrap();
        assert_eq!(get_space(pinned).unwrap(), Space::CudaHost);
        // Interior pointer resolves too.
        assert_eq!(get_space(unsafe { pinned.add(32) }).unwrap(), Space::CudaHost);
        unsafe {
            free(sys, Space::System).unwrap();
            free(pinned, Space::CudaHost).unwrap();
        }
    }

    #[test]
    fn copy_identity_across_host_space_pairs() {
        let n = 4096 + 17;
        let pattern: Vec<u8> = (0..n).map(|i| (i * 7 + 3) as u8).collect();
        for src_space in host_spaces() {
            for dst_space in host_spaces() {
                let a = alloc(n, src_space).unwrap();
                let b = alloc(n, dst_space).unwrap();
                let c = alloc(n, src_space).unwrap();
                unsafe {
                    ptr::copy_nonoverlapping(pattern.as_ptr(), a, n);
                    copy(b, dst_space, a, src_space, n).unwrap();
                    copy(c, src_space, b, dst_space, n).unwrap();
                    let out = std::slice::from_raw_parts(c, n);
                    assert_eq!(out, &pattern[..], "{} -> {}", src_space, dst_space);
                    free(a, src_space).unwrap();
                    free(b, dst_space).unwrap();
                    free(c, src_space).unwrap();
                }
            }
        }
    }

    #[test]
    fn copy_resolves_auto_spaces() {
        let n = 256;
        let a = alloc(n, Space::System).unwrap();
        let b = alloc(n, Space::System).unwrap();
        unsafe {
            ptr::write_bytes(a, 0x5A, n);
            copy(b, Space::Auto, a, Space::Auto, n).unwrap();
            assert!(std::slice::from_raw_parts(b, n).iter().all(|&v| v == 0x5A));
            free(a, Space::System).unwrap();
            free(b, Space::System).unwrap();
        }
    }

    #[test]
    fn copy_2d_respects_pitches() {
        let (width, height, spitch, dpitch) = (32usize, 4usize, 64usize, 48usize);
        let src = alloc(spitch * height, Space::System).unwrap();
        let dst = alloc(dpitch * height, Space::System).unwrap();
        unsafe {
            ptr::write_bytes(src, 0xCD, spitch * height);
            ptr::write_bytes(dst, 0x00, dpitch * height);
            copy_2d(
                dst,
                dpitch,
                Space::System,
                src,
                spitch,
                Space::System,
                width,
                height,
            )
            .unwrap();
            let out = std::slice::from_raw_parts(dst, dpitch * height);
            for row in 0..height {
                for col in 0..dpitch {
                    let expect = if col < width { 0xCD } else { 0x00 };
                    assert_eq!(out[row * dpitch + col], expect, "row {} col {}", row, col);
                }
            }
            // Pitch narrower than the row is an argument error.
            assert_eq!(
                copy_2d(
                    dst,
                    width - 1,
                    Space::System,
                    src,
                    spitch,
                    Space::System,
                    width,
                    height
                ),
                Err(Status::InvalidArgument)
            );
            free(src, Space::System).unwrap();
            free(dst, Space::System).unwrap();
        }
    }

    #[test]
    fn memset_fills_exactly_and_checks_value() {
        let n = 128;
        // Sentinel bytes on both sides of the target region.
        let buf = alloc(n + 16, Space::System).unwrap();
        unsafe {
            ptr::write_bytes(buf, 0xEE, n + 16);
            memset(buf.add(8), Space::System, 0xAB, n).unwrap();
            let all = std::slice::from_raw_parts(buf, n + 16);
            assert!(all[..8].iter().all(|&v| v == 0xEE));
            assert!(all[8..8 + n].iter().all(|&v| v == 0xAB));
            assert!(all[8 + n..].iter().all(|&v| v == 0xEE));
            assert_eq!(
                memset(buf, Space::System, 256, n),
                Err(Status::InvalidArgument)
            );
            assert_eq!(
                memset(buf, Space::System, -1, n),
                Err(Status::InvalidArgument)
            );
            free(buf, Space::System).unwrap();
        }
    }

    #[test]
    fn memset_2d_skips_padding() {
        let (width, height, pitch) = (16usize, 3usize, 40usize);
        let buf = alloc(pitch * height, Space::System).unwrap();
        unsafe {
            ptr::write_bytes(buf, 0x11, pitch * height);
            memset_2d(buf, pitch, Space::System, 0xFF, width, height).unwrap();
            let all = std::slice::from_raw_parts(buf, pitch * height);
            for row in 0..height {
                for col in 0..pitch {
                    let expect = if col < width { 0xFF } else { 0x11 };
                    assert_eq!(all[row * pitch + col], expect);
                }
            }
            free(buf, Space::System).unwrap();
        }
    }

    #[test]
    fn space_strings_round_trip() {
        for space in [
            Space::Auto,
            Space::System,
            Space::Cuda,
            Space::CudaHost,
            Space::CudaManaged,
        ] {
            assert_eq!(space.to_string().parse::<Space>().unwrap(), space);
        }
        assert_eq!("bogus".parse::<Space>(), Err(Status::InvalidSpace));
        assert_eq!(Space::Auto as i32, 0);
        assert_eq!(Space::System as i32, 1);
        assert_eq!(Space::Cuda as i32, 2);
        assert_eq!(Space::CudaHost as i32, 3);
        assert_eq!(Space::CudaManaged as i32, 4);
    }
}

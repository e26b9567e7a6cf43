//! Multi-dimensional array descriptor and its basic operations.
//!
//! An [`Array`] is a small metadata record over a raw buffer: space, dtype,
//! shape in elements, strides in bytes. Shape and strides are independent,
//! which is what allows padded rows, transposed views, and
//! broadcast-by-zero-stride. The operations here collapse layouts through
//! [`crate::layout::flatten`] before dispatching to the memory engine, so
//! the common contiguous case is always a single 1-D transfer.

use std::ptr;

use crate::dtype::DType;
use crate::layout::{flatten, is_contiguous, padded_dims_mask};
use crate::memory::{self, Space};
use crate::status::{Result, Status};

/// Maximum number of dimensions a descriptor can carry.
pub const MAX_DIMS: usize = 8;

/// Array descriptor. `#[repr(C)]` so the layout is stable for FFI surfaces.
///
/// The descriptor does not own `data` by itself; ownership is established
/// by [`Array::malloc`] and ended by [`Array::free`]. Descriptors sharing
/// storage must not both free it.
#[repr(C)]
#[derive(Debug, Clone)]
pub struct Array {
    pub data: *mut u8,
    pub space: Space,
    pub dtype: DType,
    pub ndim: usize,
    /// Shape in elements per dimension.
    pub shape: [i64; MAX_DIMS],
    /// Strides in bytes per dimension.
    pub strides: [i64; MAX_DIMS],
    /// Immutable arrays may not be the destination of any mutating op.
    pub immutable: bool,
    pub big_endian: bool,
    pub conjugated: bool,
}

impl Array {
    /// Descriptor with the given shape and no backing storage yet. A rank
    /// above [`MAX_DIMS`] is preserved in `ndim` (and rejected by every
    /// operation), but only the first `MAX_DIMS` extents are recorded.
    pub fn new(space: Space, dtype: DType, shape: &[i64]) -> Array {
        let mut out = Array {
            data: ptr::null_mut(),
            space,
            dtype,
            ndim: shape.len(),
            shape: [0; MAX_DIMS],
            strides: [0; MAX_DIMS],
            immutable: false,
            big_endian: false,
            conjugated: false,
        };
        let rank = shape.len().min(MAX_DIMS);
        out.shape[..rank].copy_from_slice(&shape[..rank]);
        out
    }

    fn check_shape(&self) -> Result<()> {
        if self.ndim == 0 || self.ndim > MAX_DIMS {
            return Err(Status::InvalidShape);
        }
        if self.shape[..self.ndim].iter().any(|&extent| extent < 1) {
            return Err(Status::InvalidShape);
        }
        Ok(())
    }

    /// Total bytes spanned by the outermost dimension. Only meaningful for
    /// descriptors with C-contiguous-compatible outer strides.
    pub fn size_bytes(&self) -> usize {
        (self.strides[0] * self.shape[0]) as usize
    }

    /// Reads `space`, `dtype`, `ndim`, `shape`; writes C-contiguous
    /// `strides` and allocates `data`. On failure `data` stays null.
    pub fn malloc(&mut self) -> Result<()> {
        self.data = ptr::null_mut();
        self.check_shape()?;
        let mut d = self.ndim - 1;
        self.strides[d] = self.dtype.element_bytes() as i64;
        while d > 0 {
            d -= 1;
            self.strides[d] = self.strides[d + 1] * self.shape[d + 1];
        }
        self.data = memory::alloc(self.size_bytes(), self.space)?;
        Ok(())
    }

    /// Releases `data` through the memory engine and nulls the pointer.
    pub fn free(&mut self) -> Result<()> {
        unsafe { memory::free(self.data, self.space)? };
        self.data = ptr::null_mut();
        Ok(())
    }

    /// Copy `src` into `self`. Shapes and dtypes must match; layouts are
    /// flattened with a shared keep-mask so padding in either side is
    /// preserved, then the fastest applicable engine path is used.
    pub fn copy_from(&self, src: &Array) -> Result<()> {
        if self.data.is_null() || src.data.is_null() {
            return Err(Status::InvalidPointer);
        }
        if self.immutable {
            return Err(Status::InvalidArgument);
        }
        self.check_shape()?;
        if self.ndim != src.ndim || self.shape[..self.ndim] != src.shape[..src.ndim] {
            return Err(Status::InvalidShape);
        }
        if self.dtype != src.dtype {
            return Err(Status::InvalidDtype);
        }

        // Merge contiguous dims to reduce layout complexity before picking
        // a path; padding on either side keeps that dim separate on both.
        let keep_mask = padded_dims_mask(self) | padded_dims_mask(src);
        let dst = flatten(self, keep_mask);
        let src = flatten(src, keep_mask);

        if is_contiguous(&dst) && is_contiguous(&src) {
            let size_bytes = dst.size_bytes();
            return unsafe {
                memory::copy(dst.data, dst.space, src.data, src.space, size_bytes)
            };
        }
        let ndim = dst.ndim;
        if ndim == 1 || ndim == 2 {
            // A 1-D array here is element-strided; 2-D must have an
            // element-size inner stride because the engine's 2-D path only
            // strides between rows.
            let itemsize = src.dtype.element_bytes() as i64;
            if ndim == 2 && (dst.strides[1] != itemsize || src.strides[1] != itemsize) {
                return Err(Status::UnsupportedStride);
            }
            let width = if ndim == 2 { dst.shape[1] * itemsize } else { itemsize };
            return unsafe {
                memory::copy_2d(
                    dst.data,
                    dst.strides[0] as usize,
                    dst.space,
                    src.data,
                    src.strides[0] as usize,
                    src.space,
                    width as usize,
                    dst.shape[0] as usize,
                )
            };
        }
        Err(Status::UnsupportedStride)
    }

    /// Fill every element's bytes with `value` (must fit in a byte).
    pub fn memset(&self, value: i32) -> Result<()> {
        if self.data.is_null() {
            return Err(Status::InvalidPointer);
        }
        if self.immutable {
            return Err(Status::InvalidArgument);
        }
        if !(0..=255).contains(&value) {
            return Err(Status::InvalidArgument);
        }
        self.check_shape()?;

        let dst = flatten(self, padded_dims_mask(self));
        if is_contiguous(&dst) {
            let size_bytes = dst.size_bytes();
            return unsafe { memory::memset(dst.data, dst.space, value, size_bytes) };
        }
        let ndim = dst.ndim;
        if ndim == 1 || ndim == 2 {
            let itemsize = dst.dtype.element_bytes() as i64;
            if ndim == 2 && dst.strides[1] != itemsize {
                return Err(Status::UnsupportedStride);
            }
            let width = if ndim == 2 { dst.shape[1] * itemsize } else { itemsize };
            return unsafe {
                memory::memset_2d(
                    dst.data,
                    dst.strides[0] as usize,
                    dst.space,
                    value,
                    width as usize,
                    dst.shape[0] as usize,
                )
            };
        }
        Err(Status::Unsupported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn make(space: Space, dtype: DType, shape: &[i64]) -> Array {
        let mut array = Array::new(space, dtype, shape);
        array.malloc().unwrap();
        array
    }

    fn as_bytes(array: &Array) -> &[u8] {
        unsafe { std::slice::from_raw_parts(array.data, array.size_bytes()) }
    }

    #[test]
    fn malloc_writes_c_contiguous_strides() {
        let mut a = make(Space::System, DType::F32, &[3, 4]);
        assert_eq!(&a.strides[..2], &[16, 4]);
        assert_eq!(a.size_bytes(), 48);
        assert!(!a.data.is_null());
        a.free().unwrap();
        assert!(a.data.is_null());
    }

    #[test]
    fn malloc_rejects_bad_shapes() {
        let mut zero = Array::new(Space::System, DType::F32, &[3, 0]);
        assert_eq!(zero.malloc(), Err(Status::InvalidShape));
        assert!(zero.data.is_null());

        let mut scalar = Array::new(Space::System, DType::F32, &[]);
        assert_eq!(scalar.malloc(), Err(Status::InvalidShape));
    }

    #[test]
    fn memset_then_copy_round_trip() {
        // Allocate, fill with 0xAB, copy, verify every f32 is 0xABABABAB.
        let mut a = make(Space::System, DType::F32, &[3, 4]);
        let mut b = make(Space::System, DType::F32, &[3, 4]);
        a.memset(0xAB).unwrap();
        b.copy_from(&a).unwrap();
        for chunk in as_bytes(&b).chunks_exact(4) {
            assert_eq!(chunk, &[0xAB; 4]);
        }
        a.free().unwrap();
        b.free().unwrap();
    }

    #[test]
    fn copy_checks_shape_and_dtype() {
        let mut a = make(Space::System, DType::F32, &[3, 4]);
        let mut b = make(Space::System, DType::F32, &[4, 3]);
        let mut c = make(Space::System, DType::I32, &[3, 4]);
        assert_eq!(b.copy_from(&a), Err(Status::InvalidShape));
        assert_eq!(c.copy_from(&a), Err(Status::InvalidDtype));
        a.free().unwrap();
        b.free().unwrap();
        c.free().unwrap();
    }

    #[test]
    fn copy_rejects_immutable_destination() {
        let mut a = make(Space::System, DType::U8, &[8]);
        let mut b = make(Space::System, DType::U8, &[8]);
        b.immutable = true;
        assert_eq!(b.copy_from(&a), Err(Status::InvalidArgument));
        assert_eq!(b.memset(0), Err(Status::InvalidArgument));
        b.immutable = false;
        a.free().unwrap();
        b.free().unwrap();
    }

    #[test]
    fn padded_to_dense_copy_reads_only_rows() {
        // 4x8 u32 with a 64-byte pitch: 32 data bytes then 32 pad bytes
        // per row. The pad region carries a sentinel that must not appear
        // in the dense destination.
        let mut padded = Array::new(Space::System, DType::U32, &[4, 8]);
        padded.data = memory::alloc(4 * 64, Space::System).unwrap();
        padded.strides[0] = 64;
        padded.strides[1] = 4;
        unsafe {
            for row in 0..4 {
                let base = padded.data.add(row * 64);
                ptr::write_bytes(base, row as u8 + 1, 32);
                ptr::write_bytes(base.add(32), 0xEE, 32);
            }
        }

        let mut dense = make(Space::System, DType::U32, &[4, 8]);
        dense.copy_from(&padded).unwrap();
        let out = as_bytes(&dense);
        for row in 0..4 {
            assert!(out[row * 32..(row + 1) * 32].iter().all(|&v| v == row as u8 + 1));
        }
        assert!(!out.contains(&0xEE));

        padded.free().unwrap();
        dense.free().unwrap();
    }

    #[test]
    fn memset_on_padded_rows_leaves_pitch_gap() {
        let mut padded = Array::new(Space::System, DType::U8, &[4, 32]);
        padded.data = memory::alloc(4 * 64, Space::System).unwrap();
        padded.strides[0] = 64;
        padded.strides[1] = 1;
        unsafe { ptr::write_bytes(padded.data, 0x11, 4 * 64) };
        padded.memset(0xAB).unwrap();
        let raw = unsafe { std::slice::from_raw_parts(padded.data, 4 * 64) };
        for row in 0..4 {
            assert!(raw[row * 64..row * 64 + 32].iter().all(|&v| v == 0xAB));
            assert!(raw[row * 64 + 32..(row + 1) * 64].iter().all(|&v| v == 0x11));
        }
        padded.free().unwrap();
    }

    #[test]
    fn inner_padded_3d_is_unsupported() {
        // Element-strided inner dim plus a padded middle dim flattens to a
        // 2-D layout whose inner stride is not the element size, which no
        // engine path can express.
        let mut weird = Array::new(Space::System, DType::U8, &[2, 3, 4]);
        weird.data = memory::alloc(96, Space::System).unwrap();
        weird.strides[0] = 48;
        weird.strides[1] = 16;
        weird.strides[2] = 2;
        let mut dense = make(Space::System, DType::U8, &[2, 3, 4]);
        assert_eq!(dense.copy_from(&weird), Err(Status::UnsupportedStride));
        weird.free().unwrap();
        dense.free().unwrap();
    }

    #[test]
    fn transposed_2d_is_unsupported() {
        let mut transposed = Array::new(Space::System, DType::U32, &[4, 8]);
        transposed.data = memory::alloc(4 * 8 * 4, Space::System).unwrap();
        transposed.strides[0] = 4;
        transposed.strides[1] = 16;
        let mut dense = make(Space::System, DType::U32, &[4, 8]);
        assert_eq!(dense.copy_from(&transposed), Err(Status::UnsupportedStride));
        transposed.free().unwrap();
        dense.free().unwrap();
    }

    #[test]
    fn copy_identity_across_spaces_with_padding() {
        let shapes: &[&[i64]] = &[&[7], &[3, 5], &[2, 3, 4], &[2, 2, 2, 3]];
        let spaces = [Space::System, Space::CudaHost];
        for shape in shapes {
            for &src_space in &spaces {
                for &dst_space in &spaces {
                    let mut a = make(src_space, DType::U16, shape);
                    let mut b = make(dst_space, DType::U16, shape);
                    let mut c = make(src_space, DType::U16, shape);
                    let n = a.size_bytes();
                    unsafe {
                        for i in 0..n {
                            *a.data.add(i) = (i * 13 + 5) as u8;
                        }
                    }
                    b.copy_from(&a).unwrap();
                    c.copy_from(&b).unwrap();
                    assert_eq!(as_bytes(&a), as_bytes(&c));
                    a.free().unwrap();
                    b.free().unwrap();
                    c.free().unwrap();
                }
            }
        }
    }

    #[test]
    fn padded_round_trip_across_spaces() {
        // padded -> dense (other space) -> padded again must reproduce the
        // row bytes exactly.
        for &dense_space in &[Space::System, Space::CudaHost] {
            let mut padded = Array::new(Space::System, DType::U16, &[3, 8]);
            padded.data = memory::alloc(3 * 48, Space::System).unwrap();
            padded.strides[0] = 48;
            padded.strides[1] = 2;
            let mut copy_back = Array::new(Space::System, DType::U16, &[3, 8]);
            copy_back.data = memory::alloc(3 * 48, Space::System).unwrap();
            copy_back.strides[0] = 48;
            copy_back.strides[1] = 2;
            unsafe {
                for i in 0..3 * 48 {
                    *padded.data.add(i) = (i * 31 + 7) as u8;
                }
            }

            let mut dense = make(dense_space, DType::U16, &[3, 8]);
            dense.copy_from(&padded).unwrap();
            copy_back.copy_from(&dense).unwrap();
            unsafe {
                for row in 0..3 {
                    let want = std::slice::from_raw_parts(padded.data.add(row * 48), 16);
                    let got = std::slice::from_raw_parts(copy_back.data.add(row * 48), 16);
                    assert_eq!(want, got, "row {} in {}", row, dense_space);
                }
            }
            padded.free().unwrap();
            copy_back.free().unwrap();
            dense.free().unwrap();
        }
    }

    proptest! {
        // element_bytes(dtype) * product(shape) == strides[0] * shape[0]
        // after malloc.
        #[test]
        fn size_consistency_after_malloc(
            shape in prop::collection::vec(1i64..=6, 1..=4),
            dtype in prop_oneof![
                Just(DType::U8), Just(DType::I16), Just(DType::F32),
                Just(DType::CF32), Just(DType::F32.with_vector_len(4)),
            ],
        ) {
            let mut array = Array::new(Space::System, dtype, &shape);
            array.malloc().unwrap();
            let numel: i64 = shape.iter().product();
            let expected = dtype.element_bytes() as i64 * numel;
            prop_assert_eq!(array.strides[0] * array.shape[0], expected);
            array.free().unwrap();
        }
    }
}

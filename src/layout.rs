//! Layout analysis for array descriptors: contiguity, padding detection,
//! and dimension flattening.
//!
//! Flattening is the performance move behind the copy/fill fast paths: runs
//! of mutually contiguous dimensions collapse into one, so only genuinely
//! padded or preserved axes survive into the per-row slow path.

use crate::array::Array;

/// True iff the descriptor is dense C order: walking strides right to left,
/// each level equals the element size times the product of the inner
/// extents.
pub fn is_contiguous(array: &Array) -> bool {
    let mut expected = array.dtype.element_bytes() as i64;
    for d in (0..array.ndim).rev() {
        if array.strides[d] != expected {
            return false;
        }
        expected *= array.shape[d];
    }
    true
}

/// Bitmask of dimensions that carry padding relative to their inner
/// neighbour: bit `i` is set when `strides[i] != strides[i+1] * shape[i+1]`
/// (for the innermost dimension, when its stride is not the element size).
///
/// Callers may OR in extra bits to preserve dimensions across
/// [`flatten`] regardless of contiguity.
pub fn padded_dims_mask(array: &Array) -> u32 {
    if array.ndim == 0 {
        return 0;
    }
    let mut mask = 0u32;
    let inner = array.ndim - 1;
    if array.strides[inner] != array.dtype.element_bytes() as i64 {
        mask |= 1 << inner;
    }
    for d in 0..inner {
        if array.strides[d] != array.strides[d + 1] * array.shape[d + 1] {
            mask |= 1 << d;
        }
    }
    mask
}

/// Fuse adjacent dimensions that are contiguous with their inner neighbour
/// and not marked in `keep_mask`. Bit `i` of `keep_mask` forbids fusing
/// dimension `i` with dimension `i+1`. The multiset of byte offsets visited
/// by full iteration is unchanged.
pub fn flatten(array: &Array, keep_mask: u32) -> Array {
    let mut out = array.clone();
    if array.ndim == 0 {
        return out;
    }
    let mut ndim = 0usize;
    for d in 0..array.ndim {
        let fusible = ndim > 0
            && keep_mask & (1 << (d - 1)) == 0
            && out.strides[ndim - 1] == array.strides[d] * array.shape[d];
        if fusible {
            out.shape[ndim - 1] *= array.shape[d];
            out.strides[ndim - 1] = array.strides[d];
        } else {
            out.shape[ndim] = array.shape[d];
            out.strides[ndim] = array.strides[d];
            ndim += 1;
        }
    }
    for d in ndim..array.ndim {
        out.shape[d] = 0;
        out.strides[d] = 0;
    }
    out.ndim = ndim;
    out
}

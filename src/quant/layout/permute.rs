//! Row permutation for the `ldmatrix` B-operand access pattern.
//!
//! `ldmatrix` loads 8x8 tiles of 16-bit values. With 8-bit (4-bit) weights one
//! such tile covers 16 (32) logical rows, and the rows must be reordered so
//! that every thread ends up holding the elements the tensor-core MMA expects
//! in its register. Whole rows move; their contents are untouched.

use crate::error::ForgeResult;
use crate::quant::strategy::BitWidth;
use crate::shape_error;

/// Number of B rows covered by one MMA: 16 for int8, 32 for int4
pub fn rows_per_mma(bits: BitWidth) -> usize {
    8 * (16 / bits.bits())
}

/// MMA N dimension, columns must be a multiple of this
pub const MMA_SHAPE_N: usize = 8;

fn tile_read_row(tile_row: usize, elts_per_reg: usize) -> usize {
    8 * ((tile_row % elts_per_reg) / 2) + tile_row % 2 + 2 * (tile_row / elts_per_reg)
}

fn check_shape(data_len: usize, rows: usize, cols: usize, bits: BitWidth) -> ForgeResult<usize> {
    let rows_per_mma = rows_per_mma(bits);
    if rows % rows_per_mma != 0 {
        return Err(shape_error!(
            "row permutation needs rows to be a multiple of {} for {}-bit weights, got {}",
            rows_per_mma,
            bits.bits(),
            rows
        ));
    }
    if cols % MMA_SHAPE_N != 0 {
        return Err(shape_error!(
            "row permutation needs cols to be a multiple of {}, got {}",
            MMA_SHAPE_N,
            cols
        ));
    }
    let row_bytes = cols * bits.bits() / 8;
    if data_len != rows * row_bytes {
        return Err(shape_error!(
            "buffer of {} bytes does not hold a {}x{} {}-bit matrix",
            data_len,
            rows,
            cols,
            bits.bits()
        ));
    }
    Ok(row_bytes)
}

/// Visit `(write_row, read_row)` pairs of the permutation
fn for_each_row_move(rows: usize, bits: BitWidth, mut visit: impl FnMut(usize, usize)) {
    let rows_per_mma = rows_per_mma(bits);
    let elts_per_reg = bits.elts_per_word();
    for base_row in (0..rows).step_by(rows_per_mma) {
        for tile_row in 0..rows_per_mma {
            visit(base_row + tile_row, base_row + tile_read_row(tile_row, elts_per_reg));
        }
    }
}

/// Permute the rows of a packed row-major `(rows, cols)` matrix
pub fn permute_rows(src: &[u8], rows: usize, cols: usize, bits: BitWidth) -> ForgeResult<Vec<u8>> {
    let row_bytes = check_shape(src.len(), rows, cols, bits)?;
    let mut dst = vec![0u8; src.len()];
    for_each_row_move(rows, bits, |write_row, read_row| {
        dst[write_row * row_bytes..(write_row + 1) * row_bytes]
            .copy_from_slice(&src[read_row * row_bytes..(read_row + 1) * row_bytes]);
    });
    Ok(dst)
}

/// Inverse of [`permute_rows`]
pub fn unpermute_rows(
    src: &[u8],
    rows: usize,
    cols: usize,
    bits: BitWidth,
) -> ForgeResult<Vec<u8>> {
    let row_bytes = check_shape(src.len(), rows, cols, bits)?;
    let mut dst = vec![0u8; src.len()];
    for_each_row_move(rows, bits, |write_row, read_row| {
        dst[read_row * row_bytes..(read_row + 1) * row_bytes]
            .copy_from_slice(&src[write_row * row_bytes..(write_row + 1) * row_bytes]);
    });
    Ok(dst)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int8_tile_order() {
        let order: Vec<usize> = (0..16).map(|t| tile_read_row(t, 4)).collect();
        assert_eq!(order, vec![0, 1, 8, 9, 2, 3, 10, 11, 4, 5, 12, 13, 6, 7, 14, 15]);
    }

    #[test]
    fn test_int4_tile_is_a_permutation() {
        let mut seen: Vec<usize> = (0..32).map(|t| tile_read_row(t, 8)).collect();
        assert_eq!(&seen[..4], &[0, 1, 8, 9]);
        seen.sort_unstable();
        assert_eq!(seen, (0..32).collect::<Vec<_>>());
    }

    #[test]
    fn test_rows_move_whole() {
        // 16 rows x 8 int8 columns, each row filled with its index
        let src: Vec<u8> = (0..16u8).flat_map(|r| std::iter::repeat(r).take(8)).collect();
        let dst = permute_rows(&src, 16, 8, BitWidth::Int8).unwrap();
        assert_eq!(&dst[8..16], &[1u8; 8]);
        assert_eq!(&dst[16..24], &[8u8; 8]);
        assert_eq!(unpermute_rows(&dst, 16, 8, BitWidth::Int8).unwrap(), src);
    }

    #[test]
    fn test_alignment_errors() {
        assert!(permute_rows(&[0u8; 64], 8, 8, BitWidth::Int8).is_err());
        assert!(permute_rows(&[0u8; 16 * 4], 16, 4, BitWidth::Int8).is_err());
        assert!(permute_rows(&[0u8; 16 * 4], 16, 8, BitWidth::Int4).is_err());
    }
}

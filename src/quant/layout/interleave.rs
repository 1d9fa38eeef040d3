//! Column-major tile interleave (`ColumnMajorTileInterleave<64, I>`).
//!
//! Input is the column-major `(rows, cols)` matrix: `cols` columns of `rows`
//! packed elements each. Every group of `I` consecutive columns is merged into
//! one output column, alternating 64-row tiles from each source column, so one
//! 128-byte cache line carries a K-tile for `I` output channels. Moves are done
//! on 32-bit words.

use crate::error::ForgeResult;
use crate::quant::strategy::BitWidth;
use crate::shape_error;

const WORD_BYTES: usize = 4;

fn check_shape(
    data_len: usize,
    rows: usize,
    cols: usize,
    bits: BitWidth,
    rows_per_tile: usize,
    interleave: usize,
) -> ForgeResult<()> {
    if rows % rows_per_tile != 0 {
        return Err(shape_error!(
            "column interleave needs rows to be a multiple of {}, got {}",
            rows_per_tile,
            rows
        ));
    }
    if rows % bits.elts_per_word() != 0 {
        return Err(shape_error!(
            "column interleave needs rows to fill whole 32-bit words ({} elements), got {}",
            bits.elts_per_word(),
            rows
        ));
    }
    if cols % interleave != 0 {
        return Err(shape_error!(
            "column interleave needs cols to be a multiple of {}, got {}",
            interleave,
            cols
        ));
    }
    if data_len * 8 != rows * cols * bits.bits() {
        return Err(shape_error!(
            "buffer of {} bytes does not hold a {}x{} {}-bit matrix",
            data_len,
            rows,
            cols,
            bits.bits()
        ));
    }
    Ok(())
}

/// Visit `(read_word, write_word)` offsets of the interleave
fn for_each_word_move(
    rows: usize,
    cols: usize,
    bits: BitWidth,
    rows_per_tile: usize,
    interleave: usize,
    mut visit: impl FnMut(usize, usize),
) {
    let elts_per_word = bits.elts_per_word();
    let vec_rows = rows / elts_per_word;
    let vec_rows_per_tile = rows_per_tile / elts_per_word;

    for read_col in 0..cols {
        let write_col = read_col / interleave;
        for base_vec_row in (0..vec_rows).step_by(vec_rows_per_tile) {
            let tile_end = (base_vec_row + vec_rows_per_tile).min(vec_rows);
            for vec_read_row in base_vec_row..tile_end {
                let vec_write_row = interleave * base_vec_row
                    + vec_rows_per_tile * (read_col % interleave)
                    + vec_read_row % vec_rows_per_tile;
                let read = read_col * vec_rows + vec_read_row;
                let write = write_col * vec_rows * interleave + vec_write_row;
                visit(read, write);
            }
        }
    }
}

fn copy_word(dst: &mut [u8], dst_word: usize, src: &[u8], src_word: usize) {
    dst[dst_word * WORD_BYTES..(dst_word + 1) * WORD_BYTES]
        .copy_from_slice(&src[src_word * WORD_BYTES..(src_word + 1) * WORD_BYTES]);
}

pub fn interleave_columns(
    src: &[u8],
    rows: usize,
    cols: usize,
    bits: BitWidth,
    rows_per_tile: usize,
    interleave: usize,
) -> ForgeResult<Vec<u8>> {
    check_shape(src.len(), rows, cols, bits, rows_per_tile, interleave)?;
    let mut dst = vec![0u8; src.len()];
    for_each_word_move(rows, cols, bits, rows_per_tile, interleave, |read, write| {
        copy_word(&mut dst, write, src, read);
    });
    Ok(dst)
}

/// Inverse of [`interleave_columns`]
pub fn deinterleave_columns(
    src: &[u8],
    rows: usize,
    cols: usize,
    bits: BitWidth,
    rows_per_tile: usize,
    interleave: usize,
) -> ForgeResult<Vec<u8>> {
    check_shape(src.len(), rows, cols, bits, rows_per_tile, interleave)?;
    let mut dst = vec![0u8; src.len()];
    for_each_word_move(rows, cols, bits, rows_per_tile, interleave, |read, write| {
        copy_word(&mut dst, read, src, write);
    });
    Ok(dst)
}

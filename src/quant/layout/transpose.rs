//! Element-wise transpose of packed sub-byte matrices.

use crate::error::ForgeResult;
use crate::quant::strategy::BitWidth;
use crate::shape_error;

/// Read element `index` of a packed buffer as raw unsigned bits.
/// 4-bit elements are stored low nibble first.
#[inline]
pub(crate) fn get_element(data: &[u8], index: usize, bits: BitWidth) -> u8 {
    match bits {
        BitWidth::Int8 => data[index],
        BitWidth::Int4 => (data[index / 2] >> (4 * (index % 2))) & 0x0F,
    }
}

#[inline]
pub(crate) fn set_element(data: &mut [u8], index: usize, value: u8, bits: BitWidth) {
    match bits {
        BitWidth::Int8 => data[index] = value,
        BitWidth::Int4 => {
            let shift = 4 * (index % 2);
            let byte = &mut data[index / 2];
            *byte = (*byte & !(0x0F << shift)) | ((value & 0x0F) << shift);
        }
    }
}

/// Transpose a packed row-major `(rows, cols)` matrix into a packed row-major
/// `(cols, rows)` matrix, i.e. the column-major form of the input.
///
/// Transposing back is the same call with `rows` and `cols` swapped.
pub fn subbyte_transpose(
    src: &[u8],
    rows: usize,
    cols: usize,
    bits: BitWidth,
) -> ForgeResult<Vec<u8>> {
    let epb = bits.elts_per_byte();
    if rows % epb != 0 || cols % epb != 0 {
        return Err(shape_error!(
            "{}-bit transpose needs both dimensions to be multiples of {}, got {}x{}",
            bits.bits(),
            epb,
            rows,
            cols
        ));
    }
    if src.len() * epb != rows * cols {
        return Err(shape_error!(
            "buffer of {} bytes does not hold a {}x{} {}-bit matrix",
            src.len(),
            rows,
            cols,
            bits.bits()
        ));
    }

    let mut dst = vec![0u8; src.len()];
    match bits {
        BitWidth::Int8 => {
            for r in 0..rows {
                for c in 0..cols {
                    dst[c * rows + r] = src[r * cols + c];
                }
            }
        }
        BitWidth::Int4 => {
            for r in 0..rows {
                for c in 0..cols {
                    let value = get_element(src, r * cols + c, bits);
                    set_element(&mut dst, c * rows + r, value, bits);
                }
            }
        }
    }
    Ok(dst)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int8_transpose() {
        let src: Vec<u8> = (0..6).collect();
        let dst = subbyte_transpose(&src, 2, 3, BitWidth::Int8);
        // odd dims are fine for int8
        assert_eq!(dst.unwrap(), vec![0, 3, 1, 4, 2, 5]);
    }

    #[test]
    fn test_int4_transpose_nibbles() {
        // 2x2 matrix [[1, 2], [3, 4]] packed low nibble first
        let src = vec![0x21u8, 0x43];
        let dst = subbyte_transpose(&src, 2, 2, BitWidth::Int4).unwrap();
        // [[1, 3], [2, 4]]
        assert_eq!(dst, vec![0x31, 0x42]);
        assert_eq!(subbyte_transpose(&dst, 2, 2, BitWidth::Int4).unwrap(), src);
    }

    #[test]
    fn test_int4_odd_dimension_rejected() {
        assert!(subbyte_transpose(&[0u8; 3], 3, 2, BitWidth::Int4).is_err());
    }

    #[test]
    fn test_element_accessors() {
        let mut data = vec![0u8; 2];
        set_element(&mut data, 1, 0xF, BitWidth::Int4);
        set_element(&mut data, 2, 0x7, BitWidth::Int4);
        assert_eq!(data, vec![0xF0, 0x07]);
        assert_eq!(get_element(&data, 1, BitWidth::Int4), 0xF);
        assert_eq!(get_element(&data, 0, BitWidth::Int4), 0);
    }
}

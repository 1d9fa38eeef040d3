//! Tensor-core weight layouts.
//!
//! The quantized weight arrives as a packed row-major `(K, N)` matrix (4-bit
//! values two per byte along N, low nibble first). Kernels for each
//! architecture consume a different arrangement of the same bytes:
//!
//! | Family | Steps |
//! |---|---|
//! | Volta | bias + register interleave |
//! | Turing / Ampere | row permutation, transpose, column interleave, bias + register interleave |
//!
//! [`apply_pipeline`] produces the kernel layout, [`restore_row_major`] undoes
//! it for the host reference kernels.

pub mod bias;
pub mod interleave;
pub mod permute;
pub mod transpose;

use crate::backend::arch::GpuArchitecture;
use crate::error::ForgeResult;
use crate::quant::strategy::BitWidth;
use crate::shape_error;

/// Rows of one column tile in `ColumnMajorTileInterleave`
pub const ROWS_PER_COLUMN_TILE: usize = 64;

/// Bytes of one cache line the interleave packs per K-tile
const CACHE_LINE_BYTES: usize = 128;

/// How an architecture wants its B operand laid out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutDetails {
    pub arch: GpuArchitecture,
    pub bits: BitWidth,
    pub uses_imma_ldsm: bool,
    pub column_major: bool,
    pub rows_per_column_tile: usize,
    pub columns_interleaved: usize,
}

impl LayoutDetails {
    pub fn for_arch(arch: GpuArchitecture, bits: BitWidth) -> Self {
        match arch {
            GpuArchitecture::Volta => Self {
                arch,
                bits,
                uses_imma_ldsm: false,
                column_major: false,
                rows_per_column_tile: 1,
                columns_interleaved: 1,
            },
            GpuArchitecture::Turing | GpuArchitecture::Ampere => {
                let elements_per_cache_line = CACHE_LINE_BYTES * 8 / bits.bits();
                Self {
                    arch,
                    bits,
                    uses_imma_ldsm: true,
                    column_major: true,
                    rows_per_column_tile: ROWS_PER_COLUMN_TILE,
                    columns_interleaved: elements_per_cache_line / ROWS_PER_COLUMN_TILE,
                }
            }
        }
    }
}

fn check_len(data: &[u8], rows: usize, cols: usize, bits: BitWidth) -> ForgeResult<()> {
    if data.len() * 8 != rows * cols * bits.bits() {
        return Err(shape_error!(
            "buffer of {} bytes does not hold a {}x{} {}-bit matrix",
            data.len(),
            rows,
            cols,
            bits.bits()
        ));
    }
    Ok(())
}

/// Turn a packed row-major `(rows, cols)` matrix into the kernel layout for `arch`
pub fn apply_pipeline(
    row_major: &[u8],
    rows: usize,
    cols: usize,
    bits: BitWidth,
    arch: GpuArchitecture,
) -> ForgeResult<Vec<u8>> {
    check_len(row_major, rows, cols, bits)?;
    let details = LayoutDetails::for_arch(arch, bits);

    let mut data = if details.uses_imma_ldsm {
        permute::permute_rows(row_major, rows, cols, bits)?
    } else {
        row_major.to_vec()
    };

    if details.column_major {
        data = transpose::subbyte_transpose(&data, rows, cols, bits)?;
    }

    if details.columns_interleaved > 1 {
        data = interleave::interleave_columns(
            &data,
            rows,
            cols,
            bits,
            details.rows_per_column_tile,
            details.columns_interleaved,
        )?;
    }

    bias::add_bias_and_interleave(&mut data, bits)?;
    Ok(data)
}

/// Inverse of [`apply_pipeline`]: recover the packed row-major `(rows, cols)` matrix
pub fn restore_row_major(
    kernel_layout: &[u8],
    rows: usize,
    cols: usize,
    bits: BitWidth,
    arch: GpuArchitecture,
) -> ForgeResult<Vec<u8>> {
    check_len(kernel_layout, rows, cols, bits)?;
    let details = LayoutDetails::for_arch(arch, bits);

    let mut data = kernel_layout.to_vec();
    bias::remove_bias_and_deinterleave(&mut data, bits)?;

    if details.columns_interleaved > 1 {
        data = interleave::deinterleave_columns(
            &data,
            rows,
            cols,
            bits,
            details.rows_per_column_tile,
            details.columns_interleaved,
        )?;
    }

    if details.column_major {
        data = transpose::subbyte_transpose(&data, cols, rows, bits)?;
    }

    if details.uses_imma_ldsm {
        data = permute::unpermute_rows(&data, rows, cols, bits)?;
    }
    Ok(data)
}

/// Sign-extend packed elements into one `i8` per element
pub fn unpack_signed(packed: &[u8], bits: BitWidth) -> Vec<i8> {
    match bits {
        BitWidth::Int8 => packed.iter().map(|&b| b as i8).collect(),
        BitWidth::Int4 => packed
            .iter()
            .flat_map(|&b| [b & 0x0F, b >> 4])
            .map(|nibble| ((nibble << 4) as i8) >> 4)
            .collect(),
    }
}

/// Pack signed values into bytes, two per byte (low nibble first) for int4
pub fn pack_signed(values: &[i8], bits: BitWidth) -> ForgeResult<Vec<u8>> {
    match bits {
        BitWidth::Int8 => Ok(values.iter().map(|&v| v as u8).collect()),
        BitWidth::Int4 => {
            if values.len() % 2 != 0 {
                return Err(shape_error!(
                    "cannot pack an odd number ({}) of 4-bit values",
                    values.len()
                ));
            }
            if let Some(v) = values.iter().find(|v| !(-8..=7).contains(*v)) {
                return Err(shape_error!("{} does not fit in a signed 4-bit value", v));
            }
            Ok(values
                .chunks_exact(2)
                .map(|pair| ((pair[0] as u8) & 0x0F) | (((pair[1] as u8) & 0x0F) << 4))
                .collect())
        }
    }
}

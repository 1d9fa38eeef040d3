//! Signed-to-unsigned bias and in-register element interleave.
//!
//! The mixed-precision kernels convert weights to fp16 with a fast
//! integer-to-float trick that expects unsigned values laid out in a specific
//! order inside each 32-bit register:
//!
//! - int8: `+128`, lanes `[0, 1, 2, 3]` stored as `[0, 2, 1, 3]`
//! - int4: `+8`, lanes `[0..8]` stored as `[0, 2, 4, 6, 1, 3, 5, 7]`

use crate::error::ForgeResult;
use crate::quant::strategy::BitWidth;
use crate::shape_error;

const INT4_ORDER: [usize; 8] = [0, 2, 4, 6, 1, 3, 5, 7];

fn check_len(len: usize, bits: BitWidth) -> ForgeResult<()> {
    if len % 4 != 0 {
        return Err(shape_error!(
            "register interleave needs whole 32-bit registers, got {} bytes of {}-bit elements",
            len,
            bits.bits()
        ));
    }
    Ok(())
}

fn permute_nibbles(register: u32, forward: bool) -> u32 {
    let mut out = 0u32;
    for (dest, &src) in INT4_ORDER.iter().enumerate() {
        let (from, to) = if forward { (src, dest) } else { (dest, src) };
        out |= ((register >> (4 * from)) & 0xF) << (4 * to);
    }
    out
}

/// Bias and interleave in place
pub fn add_bias_and_interleave(data: &mut [u8], bits: BitWidth) -> ForgeResult<()> {
    check_len(data.len(), bits)?;
    match bits {
        BitWidth::Int8 => {
            for register in data.chunks_exact_mut(4) {
                for byte in register.iter_mut() {
                    *byte ^= 0x80;
                }
                register.swap(1, 2);
            }
        }
        BitWidth::Int4 => {
            for chunk in data.chunks_exact_mut(4) {
                let register = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                let biased = register ^ 0x8888_8888;
                chunk.copy_from_slice(&permute_nibbles(biased, true).to_le_bytes());
            }
        }
    }
    Ok(())
}

/// Inverse of [`add_bias_and_interleave`]
pub fn remove_bias_and_deinterleave(data: &mut [u8], bits: BitWidth) -> ForgeResult<()> {
    check_len(data.len(), bits)?;
    match bits {
        BitWidth::Int8 => {
            for register in data.chunks_exact_mut(4) {
                register.swap(1, 2);
                for byte in register.iter_mut() {
                    *byte ^= 0x80;
                }
            }
        }
        BitWidth::Int4 => {
            for chunk in data.chunks_exact_mut(4) {
                let register = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                let restored = permute_nibbles(register, false) ^ 0x8888_8888;
                chunk.copy_from_slice(&restored.to_le_bytes());
            }
        }
    }
    Ok(())
}

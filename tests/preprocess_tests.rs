//! Weight preprocessing tests: output shape, architecture families and
//! rejected inputs

mod common;

use common::QuantProblem;
use proptest::prelude::*;

use quantforge::backend::arch::GpuArchitecture;
use quantforge::quant::layout::{restore_row_major, unpack_signed};
use quantforge::quant::BitWidth;
use quantforge::{preprocess_weight, DType, Device, ForgeError, Tensor};

fn bytes(t: &Tensor) -> Vec<u8> {
    t.as_bytes().to_vec()
}

#[test]
fn test_turing_and_ampere_share_a_layout() {
    let problem = QuantProblem::new(1, 32, 128, 4).seed(17);
    let host = problem.row_major_weight();

    let volta = preprocess_weight(&host, 4, 70).unwrap();
    let turing = preprocess_weight(&host, 4, 75).unwrap();
    let ampere = preprocess_weight(&host, 4, 86).unwrap();

    assert_eq!(bytes(&turing), bytes(&ampere));
    assert_ne!(bytes(&turing), bytes(&volta));
    assert_eq!(turing.layout_tag().map(|s| s.as_u32()), Some(75));
    assert_eq!(ampere.layout_tag().map(|s| s.as_u32()), Some(86));
}

#[test]
fn test_preprocess_is_deterministic() {
    let problem = QuantProblem::new(1, 16, 256, 8).seed(4);
    let host = problem.row_major_weight();
    let a = preprocess_weight(&host, 8, 80).unwrap();
    let b = preprocess_weight(&host, 8, 80).unwrap();
    assert_eq!(bytes(&a), bytes(&b));
    // the input is left untouched
    assert_eq!(bytes(&host), bytes(&problem.row_major_weight()));
}

#[test]
fn test_int8_volta_only_flips_sign_bits_and_lanes() {
    let problem = QuantProblem::new(1, 8, 64, 8).seed(8);
    let host = problem.row_major_weight();
    let out = preprocess_weight(&host, 8, 70).unwrap();
    assert_eq!(out.shape(), &[8, 64]);

    let src = host.as_bytes();
    let dst = out.as_bytes();
    for (s, d) in src.chunks_exact(4).zip(dst.chunks_exact(4)) {
        assert_eq!(d[0], s[0] ^ 0x80);
        assert_eq!(d[1], s[2] ^ 0x80);
        assert_eq!(d[2], s[1] ^ 0x80);
        assert_eq!(d[3], s[3] ^ 0x80);
    }
}

#[test]
fn test_rejects_unsupported_bits_and_arch() {
    let host = QuantProblem::new(1, 8, 64, 8).row_major_weight();
    assert_eq!(
        preprocess_weight(&host, 2, 80).unwrap_err(),
        ForgeError::UnsupportedBitWidth(2)
    );
    assert_eq!(
        preprocess_weight(&host, 8, 90).unwrap_err(),
        ForgeError::UnsupportedArch(90)
    );
    assert_eq!(
        preprocess_weight(&host, 8, 61).unwrap_err(),
        ForgeError::UnsupportedArch(61)
    );
}

#[test]
fn test_rejects_malformed_tensors() {
    let f16_weight = Tensor::zeros(&[64, 8], DType::F16, Device::Cpu);
    assert!(matches!(
        preprocess_weight(&f16_weight, 8, 80),
        Err(ForgeError::DtypeError(_))
    ));

    let on_gpu = Tensor::zeros(&[64, 8], DType::I8, Device::Gpu(0));
    assert!(matches!(
        preprocess_weight(&on_gpu, 8, 80),
        Err(ForgeError::DeviceError(_))
    ));

    let strided = Tensor::zeros(&[8, 64], DType::I8, Device::Cpu).transpose().unwrap();
    assert!(matches!(
        preprocess_weight(&strided, 8, 80),
        Err(ForgeError::LayoutError(_))
    ));

    let rank3 = Tensor::zeros(&[2, 64, 8], DType::I8, Device::Cpu);
    assert!(matches!(
        preprocess_weight(&rank3, 8, 80),
        Err(ForgeError::ShapeError(_))
    ));

    let odd_rows = Tensor::zeros(&[63, 4], DType::I8, Device::Cpu);
    assert!(matches!(
        preprocess_weight(&odd_rows, 4, 70),
        Err(ForgeError::ShapeError(_))
    ));
}

fn arch_strategy() -> impl Strategy<Value = u32> {
    prop_oneof![70u32..75, 75u32..80, 80u32..90]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn test_output_shape_and_tag(
        row_tiles in 1usize..4,
        col_blocks in 1usize..5,
        int4 in any::<bool>(),
        arch in arch_strategy(),
        seed in 0u64..10_000,
    ) {
        let bits = if int4 { 4 } else { 8 };
        let epb = (8 / bits) as usize;
        let (k, n) = (64 * row_tiles, 8 * col_blocks);
        let problem = QuantProblem::new(1, n, k, bits).seed(seed);

        let out = preprocess_weight(&problem.row_major_weight(), bits, arch).unwrap();

        prop_assert_eq!(out.shape(), &[n, k / epb][..]);
        prop_assert_eq!(out.dtype(), DType::I8);
        prop_assert_eq!(out.device(), Device::Cpu);
        prop_assert_eq!(out.layout_tag().map(|s| s.as_u32()), Some(arch));
    }

    #[test]
    fn test_layout_decodes_to_original_values(
        row_tiles in 1usize..3,
        col_blocks in 1usize..4,
        int4 in any::<bool>(),
        arch in arch_strategy(),
        seed in 0u64..10_000,
    ) {
        let bits = if int4 { 4 } else { 8 };
        let width = if int4 { BitWidth::Int4 } else { BitWidth::Int8 };
        let (k, n) = (64 * row_tiles, 8 * col_blocks);
        let problem = QuantProblem::new(1, n, k, bits).seed(seed);
        let out = preprocess_weight(&problem.row_major_weight(), bits, arch).unwrap();

        let family = GpuArchitecture::from_sm(arch).unwrap();
        let restored = restore_row_major(out.as_bytes(), k, n, width, family).unwrap();
        prop_assert_eq!(unpack_signed(&restored, width), problem.values.clone());
    }
}

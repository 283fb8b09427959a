//! Property tests for packed sample copies and statistics merging.

use proptest::prelude::*;
use siglog::{DataType, Statistics};

/// Reference extraction of one sample value via the scalar path.
fn naive_samples(dt: DataType, bytes: &[u8], start: usize, count: usize) -> Vec<f64> {
    (start..start + count).map(|i| dt.read_sample(bytes, i)).collect()
}

fn packed_type() -> impl Strategy<Value = DataType> {
    prop_oneof![
        Just(DataType::U1),
        Just(DataType::U4),
        Just(DataType::I4),
        Just(DataType::U8),
        Just(DataType::U24),
        Just(DataType::I24),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// Copying at arbitrary sample offsets preserves every sample value.
    #[test]
    fn test_copy_samples_preserves_values(
        dt in packed_type(),
        bytes in proptest::collection::vec(any::<u8>(), 64..256),
        src_start in 0usize..100,
        dst_start in 0usize..100,
        count in 1usize..100,
    ) {
        let total = bytes.len() * 8 / dt.bit_width() as usize;
        prop_assume!(src_start + count <= total);

        let mut dst = vec![0u8; dt.bytes_for_samples(dst_start + count)];
        dt.copy_samples(&bytes, src_start, &mut dst, dst_start, count);

        let expect = naive_samples(dt, &bytes, src_start, count);
        let got = naive_samples(dt, &dst, dst_start, count);
        prop_assert_eq!(expect, got);
    }

    /// Merging split windows equals accumulating the whole window.
    #[test]
    fn test_statistics_combine_matches_sequential(
        values in proptest::collection::vec(-1e6f64..1e6, 1..400),
        split_num in 0usize..400,
    ) {
        let split = split_num % values.len();
        let mut whole = Statistics::new();
        for v in &values {
            whole.add(*v);
        }
        let mut a = Statistics::new();
        let mut b = Statistics::new();
        for v in &values[..split] {
            a.add(*v);
        }
        for v in &values[split..] {
            b.add(*v);
        }
        let merged = a.combine(&b);
        prop_assert_eq!(whole.count(), merged.count());
        prop_assert!((whole.mean() - merged.mean()).abs() <= 1e-9 * (1.0 + whole.mean().abs()));
        prop_assert!((whole.var() - merged.var()).abs() <= 1e-6 * (1.0 + whole.var().abs()));
        prop_assert_eq!(whole.min(), merged.min());
        prop_assert_eq!(whole.max(), merged.max());
    }

    /// Data type wire encoding round trips.
    #[test]
    fn test_datatype_raw_roundtrip(dt in packed_type()) {
        prop_assert_eq!(dt, DataType::from_raw(dt.as_raw()).unwrap());
    }
}

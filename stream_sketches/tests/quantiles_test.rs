use proptest::prelude::*;
use stream_sketches::quantiles::{QuantilesSketch, QuantilesUnion};

#[test]
fn test_merge_two_halves_of_a_stream() {
    // one sketch sees [1, 1000], the other [1001, 2000]
    let mut low = QuantilesSketch::with_seed(16, 1).unwrap();
    let mut high = QuantilesSketch::with_seed(16, 2).unwrap();
    for i in 1..=1000 {
        low.update(i as f64);
        high.update((1000 + i) as f64);
    }

    low.merge(&high).unwrap();
    assert_eq!(low.n(), 2000);
    assert_eq!(low.min_value(), 1.0);
    assert_eq!(low.max_value(), 2000.0);

    let median = low.quantile(0.5);
    let tolerance = 1.65 * 2000.0 / 16.0;
    assert!(
        (median - 1000.0).abs() <= tolerance,
        "median {} outside 1000 +/- {}",
        median,
        tolerance
    );
}

#[test]
fn test_bit_pattern_equals_n_over_2k() {
    let mut sketch = QuantilesSketch::with_seed(4, 3).unwrap();
    for i in 0..5000 {
        sketch.update(i as f64);
        assert_eq!(sketch.bit_pattern(), sketch.n() / 8, "at n = {}", sketch.n());
    }
}

#[test]
fn test_quantiles_of_shuffled_stream() {
    let mut sketch = QuantilesSketch::with_seed(64, 3).unwrap();
    // a fixed permutation of 0..10000 via a multiplicative stride
    for i in 0u64..10_000 {
        sketch.update((i * 7919 % 10_000) as f64);
    }

    let eps = sketch.normalized_rank_error() * 10_000.0;
    for (frac, expected) in [(0.1, 1_000.0), (0.5, 5_000.0), (0.9, 9_000.0)] {
        let q = sketch.quantile(frac);
        assert!(
            (q - expected).abs() <= 3.0 * eps,
            "quantile({}) = {} too far from {}",
            frac,
            q,
            expected
        );
    }
}

#[test]
fn test_rank_and_quantile_are_inverse_ish() {
    let mut sketch = QuantilesSketch::with_seed(32, 4).unwrap();
    for i in 0..4000 {
        sketch.update(i as f64);
    }
    for frac in [0.25, 0.5, 0.75] {
        let q = sketch.quantile(frac);
        let r = sketch.rank(q);
        assert!((r - frac).abs() < 0.1, "rank(quantile({})) = {}", frac, r);
    }
}

#[test]
fn test_cdf_monotone_and_ends_at_one() {
    let mut sketch = QuantilesSketch::with_seed(32, 5).unwrap();
    for i in 0..3000 {
        sketch.update(i as f64);
    }
    let cdf = sketch.cdf(&[500.0, 1500.0, 2500.0]).unwrap();
    assert_eq!(cdf.len(), 4);
    assert!(cdf.windows(2).all(|p| p[0] <= p[1]));
    assert!((cdf[3] - 1.0).abs() < 1e-12);
    assert!((cdf[1] - 0.5).abs() < 0.1);
}

#[test]
fn test_round_trip_preserves_everything() {
    let mut sketch = QuantilesSketch::with_seed(16, 6).unwrap();
    for i in 0..4321 {
        sketch.update((i * 13 % 997) as f64);
    }

    let bytes = sketch.to_bytes();
    let restored = QuantilesSketch::from_bytes(&bytes).unwrap();
    assert_eq!(restored, sketch);
    assert_eq!(restored.n(), sketch.n());
    assert_eq!(restored.bit_pattern(), sketch.bit_pattern());
    assert_eq!(restored.min_value(), sketch.min_value());
    assert_eq!(restored.max_value(), sketch.max_value());
    // a second serialization is byte-identical
    assert_eq!(restored.to_bytes(), bytes);
}

#[test]
fn test_deserialize_rejects_corruption() {
    let mut sketch = QuantilesSketch::with_seed(16, 6).unwrap();
    for i in 0..100 {
        sketch.update(i as f64);
    }
    let good = sketch.to_bytes();

    let mut bad = good.clone();
    bad[2] = 10; // wrong family
    assert!(QuantilesSketch::from_bytes(&bad).is_err());

    let mut bad = good.clone();
    bad[3] = 100; // k no longer a power of two
    assert!(QuantilesSketch::from_bytes(&bad).is_err());

    let bad = &good[..good.len() - 8]; // truncated payload
    assert!(QuantilesSketch::from_bytes(bad).is_err());

    assert!(QuantilesSketch::from_bytes(&good[..4]).is_err());
}

#[test]
fn test_union_of_mixed_k() {
    let mut fine = QuantilesSketch::with_seed(64, 7).unwrap();
    let mut coarse = QuantilesSketch::with_seed(16, 8).unwrap();
    for i in 0..2000 {
        fine.update(i as f64);
        coarse.update((2000 + i) as f64);
    }

    let mut union = QuantilesUnion::new(128).unwrap();
    union.update_sketch(&coarse).unwrap();
    union.update_sketch(&fine).unwrap();

    let result = union.result().unwrap();
    // accuracy settles at the coarsest participant
    assert_eq!(result.k(), 16);
    assert_eq!(result.n(), 4000);
    assert_eq!(result.min_value(), 0.0);
    assert_eq!(result.max_value(), 3999.0);
    assert_eq!(result.bit_pattern(), 4000 / 32);
}

#[test]
fn test_union_result_is_a_deep_copy() {
    let mut union = QuantilesUnion::new(16).unwrap();
    for i in 0..100 {
        union.update(i as f64).unwrap();
    }
    let snapshot = union.result().unwrap();
    let n_before = snapshot.n();

    for i in 100..200 {
        union.update(i as f64).unwrap();
    }
    // the earlier result is unaffected by later updates
    assert_eq!(snapshot.n(), n_before);
    assert_eq!(union.result().unwrap().n(), 200);
}

#[test]
fn test_reset() {
    let mut sketch = QuantilesSketch::with_seed(16, 9).unwrap();
    for i in 0..1000 {
        sketch.update(i as f64);
    }
    sketch.reset();
    assert!(sketch.is_empty());
    assert_eq!(sketch.bit_pattern(), 0);
    assert!(sketch.quantile(0.5).is_nan());
}

proptest! {
    // the carry-propagation invariant survives arbitrary streams
    #[test]
    fn prop_bit_pattern_invariant(
        values in proptest::collection::vec(-1e9f64..1e9, 1..400),
        seed in 0u64..50
    ) {
        let mut sketch = QuantilesSketch::with_seed(4, seed).unwrap();
        for v in values {
            sketch.update(v);
            prop_assert_eq!(sketch.bit_pattern(), sketch.n() / 8);
        }
    }

    // round trip preserves the full structural state
    #[test]
    fn prop_round_trip(
        values in proptest::collection::vec(-1e9f64..1e9, 0..300),
        seed in 0u64..50
    ) {
        let mut sketch = QuantilesSketch::with_seed(8, seed).unwrap();
        for v in values {
            sketch.update(v);
        }
        let restored = QuantilesSketch::from_bytes(&sketch.to_bytes()).unwrap();
        prop_assert_eq!(&restored, &sketch);
    }

    // quantiles always fall inside the observed range
    #[test]
    fn prop_quantiles_within_range(
        values in proptest::collection::vec(-1e6f64..1e6, 1..500),
        frac in 0.0f64..=1.0
    ) {
        let mut sketch = QuantilesSketch::with_seed(8, 0).unwrap();
        for &v in &values {
            sketch.update(v);
        }
        let q = sketch.quantile(frac);
        prop_assert!(q >= sketch.min_value() && q <= sketch.max_value());
    }
}

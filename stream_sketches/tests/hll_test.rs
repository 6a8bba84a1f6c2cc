use stream_sketches::cardinality::{compute_inv_pow2_sum, inv_pow2, DenseBuckets, HllSketch};
use stream_sketches::error::SketchError;
use stream_sketches::Mergeable;

#[test]
fn test_inv_pow2_domain_errors() {
    match inv_pow2(-1) {
        Err(SketchError::InvalidParameter { param, .. }) => assert_eq!(param, "e"),
        other => panic!("Expected InvalidParameter, got {:?}", other),
    }
    assert!(inv_pow2(1024).is_err());
    assert!(inv_pow2(0).is_ok());
    assert!(inv_pow2(1023).is_ok());
}

#[test]
fn test_inv_pow2_sum_of_empty_iterator_is_num_buckets() {
    let buckets = DenseBuckets::new(128).unwrap();
    assert_eq!(compute_inv_pow2_sum(128, buckets.iter()), 128.0);
}

#[test]
fn test_inv_pow2_sum_single_bucket() {
    let mut buckets = DenseBuckets::new(128).unwrap();
    buckets.update(5, 3);
    // (K - 1) + 2^-3
    assert_eq!(compute_inv_pow2_sum(128, buckets.iter()), 127.0 + 0.125);
}

#[test]
fn test_bucket_update_reports_each_raise_exactly_once() {
    let mut buckets = DenseBuckets::new(16).unwrap();

    let delta = buckets.update(2, 7).expect("first write must be observed");
    assert_eq!(delta.bucket, 2);
    assert_eq!(delta.old, 0);
    assert_eq!(delta.new, 7);

    // equal and lower writes are not observed
    assert!(buckets.update(2, 7).is_none());
    assert!(buckets.update(2, 3).is_none());
    assert_eq!(buckets.get(2), 7);

    let delta = buckets.update(2, 9).expect("raise must be observed");
    assert_eq!((delta.old, delta.new), (7, 9));
}

#[test]
fn test_estimate_tracks_cardinality() {
    let mut hll = HllSketch::new(12).unwrap();
    for i in 0..50_000u64 {
        hll.update(&i);
    }
    let estimate = hll.estimate();
    let error = (estimate - 50_000.0).abs() / 50_000.0;
    assert!(error < 0.05, "estimate {} off by {}", estimate, error);
}

#[test]
fn test_duplicates_do_not_inflate() {
    let mut hll = HllSketch::new(12).unwrap();
    for _ in 0..100 {
        for i in 0..1000u64 {
            hll.update(&i);
        }
    }
    let estimate = hll.estimate();
    assert!(
        (estimate - 1000.0).abs() / 1000.0 < 0.1,
        "estimate {}",
        estimate
    );
}

#[test]
fn test_merge_equals_union_of_streams() {
    let mut a = HllSketch::new(12).unwrap();
    let mut b = HllSketch::new(12).unwrap();
    for i in 0..10_000u64 {
        a.update(&i);
        b.update(&(i + 5_000)); // half overlapping
    }
    let mut merged = a.clone();
    Mergeable::merge(&mut merged, &b).unwrap();

    let mut direct = HllSketch::new(12).unwrap();
    for i in 0..15_000u64 {
        direct.update(&i);
    }
    // bucket-wise max makes the merge exactly the sketch of the union
    assert_eq!(merged, direct);
}

#[test]
fn test_serde_round_trip() {
    let mut hll = HllSketch::new(10).unwrap();
    for i in 0..2_000u64 {
        hll.update(&i);
    }
    let bytes = hll.to_bytes();
    let restored = HllSketch::from_bytes(&bytes).unwrap();
    assert_eq!(restored, hll);
    assert_eq!(restored.estimate(), hll.estimate());
}

#[test]
fn test_deserialize_rejects_corruption() {
    let mut hll = HllSketch::new(10).unwrap();
    hll.update(&1u64);
    let good = hll.to_bytes();

    let mut bad = good.clone();
    bad[2] = 10; // wrong family
    assert!(HllSketch::from_bytes(&bad).is_err());

    let mut bad = good.clone();
    bad[3] = 3; // precision out of range
    assert!(HllSketch::from_bytes(&bad).is_err());

    let bad = &good[..good.len() / 2]; // truncated registers
    assert!(HllSketch::from_bytes(bad).is_err());

    assert!(HllSketch::from_bytes(&[]).is_err());
}

#[test]
fn test_reset() {
    let mut hll = HllSketch::new(8).unwrap();
    for i in 0..100u64 {
        hll.update(&i);
    }
    assert!(!hll.is_empty());
    hll.reset();
    assert!(hll.is_empty());
    assert_eq!(hll.to_bytes().len(), 8);
}

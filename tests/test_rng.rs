// Tests for RNG reproducibility and distribution.
// Weight initialization and synthetic data both depend on these properties.

use rust_convnet::utils::SimpleRng;

// ============================================================================
// Seeding
// ============================================================================

mod seeding_tests {
    use super::*;

    #[test]
    fn test_rng_same_seed_produces_same_sequence() {
        let mut a = SimpleRng::new(12345);
        let mut b = SimpleRng::new(12345);
        for _ in 0..1000 {
            assert_eq!(a.next_u32(), b.next_u32());
        }
    }

    #[test]
    fn test_rng_different_seeds_produce_different_sequences() {
        let mut a = SimpleRng::new(1);
        let mut b = SimpleRng::new(2);
        let same = (0..100).filter(|_| a.next_u32() == b.next_u32()).count();
        assert!(same < 5);
    }

    #[test]
    fn test_rng_zero_seed_is_not_stuck() {
        let mut rng = SimpleRng::new(0);
        let first = rng.next_u32();
        let second = rng.next_u32();
        assert!(first != 0 || second != 0);
        assert_ne!(first, second);
    }

    #[test]
    fn test_reseed_from_time_changes_state() {
        let mut seeded = SimpleRng::new(99);
        let mut reseeded = SimpleRng::new(99);
        reseeded.reseed_from_time();
        let same = (0..20)
            .filter(|_| seeded.next_u32() == reseeded.next_u32())
            .count();
        assert!(same < 20);
    }
}

// ============================================================================
// Uniform Sampling
// ============================================================================

mod uniform_tests {
    use super::*;

    #[test]
    fn test_next_f32_range() {
        let mut rng = SimpleRng::new(7);
        for _ in 0..10_000 {
            let v = rng.next_f32();
            assert!((0.0..1.0).contains(&v));
        }
    }

    #[test]
    fn test_next_f32_mean() {
        let mut rng = SimpleRng::new(8);
        let n = 20_000;
        let mean: f32 = (0..n).map(|_| rng.next_f32()).sum::<f32>() / n as f32;
        assert!((mean - 0.5).abs() < 0.02);
    }

    #[test]
    fn test_gen_range_f32_within_bounds() {
        let mut rng = SimpleRng::new(9);
        for _ in 0..5_000 {
            let v = rng.gen_range_f32(-2.0, 3.0);
            assert!((-2.0..3.0).contains(&v));
        }
    }

    #[test]
    fn test_gen_usize_bounds() {
        let mut rng = SimpleRng::new(10);
        assert_eq!(rng.gen_usize(0), 0);
        assert_eq!(rng.gen_usize(1), 0);
        let mut counts = [0usize; 4];
        for _ in 0..4_000 {
            counts[rng.gen_usize(4)] += 1;
        }
        assert!(counts.iter().all(|&c| c > 800));
    }
}

// ============================================================================
// Normal Sampling and Shuffling
// ============================================================================

mod normal_tests {
    use super::*;

    #[test]
    fn test_fill_normal_moments() {
        let mut rng = SimpleRng::new(11);
        let mut data = vec![0.0f32; 20_000];
        rng.fill_normal(&mut data, 0.0, 0.1);

        let n = data.len() as f32;
        let mean = data.iter().sum::<f32>() / n;
        let variance = data.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / n;
        assert!(mean.abs() < 0.005, "mean {}", mean);
        assert!((variance.sqrt() - 0.1).abs() < 0.005, "std {}", variance.sqrt());
        assert!(data.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_normal_shifted_mean() {
        let mut rng = SimpleRng::new(12);
        let n = 10_000;
        let mean = (0..n).map(|_| rng.normal(5.0, 1.0)).sum::<f32>() / n as f32;
        assert!((mean - 5.0).abs() < 0.05);
    }

    #[test]
    fn test_shuffle_is_permutation() {
        let mut rng = SimpleRng::new(13);
        let mut data: Vec<usize> = (0..50).collect();
        rng.shuffle_usize(&mut data);
        assert_ne!(data, (0..50).collect::<Vec<_>>());
        let mut sorted = data.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..50).collect::<Vec<_>>());
    }
}

use ctmc_csl::matrix::{from_triplets, row_sums};
use ctmc_csl::{CslConfig, CtmcCslChecker, LraMethod, RewardModel, SparseMatrix, StateSet};
use ndarray::{array, Array1};
use num::BigRational;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

fn assert_close(got: &Array1<f64>, expected: &[f64], tol: f64) {
    assert_eq!(got.len(), expected.len());
    for (s, (g, e)) in got.iter().zip(expected).enumerate() {
        assert!((g - e).abs() <= tol, "state {s}: got {g}, expected {e} (all: {got})");
    }
}

/// M/M/1 queue truncated at `capacity` customers.
fn mm1k(arrival: f64, service: f64, capacity: usize) -> SparseMatrix<f64> {
    let mut t = Vec::new();
    for s in 0..capacity {
        t.push((s, s + 1, arrival));
        t.push((s + 1, s, service));
    }
    from_triplets(capacity + 1, capacity + 1, t).expect("queue triplets are in range")
}

#[test]
fn two_state_flip_flop_spends_half_the_time_in_each_state() {
    let m = from_triplets(2, 2, vec![(0, 1, 1.0), (1, 0, 1.0)]).expect("valid triplets");
    let psi = StateSet::from_states(2, [1]).expect("valid states");
    for method in [LraMethod::ValueIteration, LraMethod::LinearSystem] {
        let checker = CtmcCslChecker::new(&m)
            .and_then(|c| {
                c.with_config(CslConfig {
                    lra_method: Some(method),
                    ..CslConfig::default()
                })
            })
            .expect("valid model");
        let lra = checker
            .compute_long_run_average_probabilities(&psi)
            .expect("LRA should succeed");
        assert_close(&lra, &[0.5, 0.5], 1e-6);
    }
}

#[test]
fn absorbing_race_until_probabilities() {
    let m = from_triplets(3, 3, vec![(0, 1, 2.0), (0, 2, 1.0)]).expect("valid triplets");
    let checker = CtmcCslChecker::new(&m).expect("valid model");
    let all = StateSet::full(3);
    let psi = StateSet::from_states(3, [1]).expect("valid states");
    let until = checker
        .compute_until_probabilities(&all, &psi)
        .expect("until should succeed");
    assert_close(&until, &[2.0 / 3.0, 1.0, 0.0], 1e-10);

    // Same chain over exact rationals: no rounding at all.
    let r = |n: i64| BigRational::from_integer(n.into());
    let exact = from_triplets(3, 3, vec![(0, 1, r(2)), (0, 2, r(1))]).expect("valid triplets");
    let checker = CtmcCslChecker::new(&exact).expect("valid model");
    let until = checker
        .compute_until_probabilities(&all, &psi)
        .expect("exact until should succeed");
    assert_eq!(until, array![BigRational::new(2.into(), 3.into()), r(1), r(0)]);

    // Reaching psi eventually is the limit of reaching it within t.
    let checker = CtmcCslChecker::new(&m).expect("valid model");
    let late = checker
        .compute_bounded_until_probabilities(&all, &psi, 0.0, 40.0)
        .expect("bounded until should succeed");
    assert_close(&late, &[2.0 / 3.0, 1.0, 0.0], 1e-6);
}

#[test]
fn instantaneous_reward_at_time_zero_is_the_state_reward() {
    let mut rng = ChaCha8Rng::seed_from_u64(17);
    for n in [1usize, 4, 9] {
        let mut t = Vec::new();
        for i in 0..n {
            for j in 0..n {
                if i != j && rng.random_bool(0.5) {
                    t.push((i, j, 0.5 + rng.random::<f64>()));
                }
            }
        }
        let m = from_triplets(n, n, t).expect("valid triplets");
        let checker = CtmcCslChecker::new(&m).expect("valid model");
        let state_rewards = Array1::from_shape_fn(n, |_| 10.0 * rng.random::<f64>());
        let rewards = RewardModel::new().with_state_rewards(state_rewards.clone());
        let got = checker
            .compute_instantaneous_rewards(&rewards, 0.0)
            .expect("instantaneous rewards should succeed");
        assert_eq!(got, state_rewards);
    }
}

#[test]
fn mm1k_queue_measures_agree_with_closed_forms() {
    let (arrival, service, capacity) = (1.0, 2.0, 5usize);
    let m = mm1k(arrival, service, capacity);
    let checker = CtmcCslChecker::new(&m).expect("valid model");
    let n = capacity + 1;

    // Stationary distribution is geometric in rho = arrival / service.
    let rho: f64 = arrival / service;
    let norm: f64 = (0..n).map(|k| rho.powi(k as i32)).sum();
    let full = StateSet::from_states(n, [capacity]).expect("valid states");
    let blocking = rho.powi(capacity as i32) / norm;
    let lra = checker
        .compute_long_run_average_probabilities(&full)
        .expect("LRA should succeed");
    assert_close(&lra, &vec![blocking; n], 1e-5);

    let queue_length = Array1::from_shape_fn(n, |k| k as f64);
    let mean: f64 = (0..n).map(|k| k as f64 * rho.powi(k as i32)).sum::<f64>() / norm;
    let lra = checker
        .compute_long_run_average_rewards_from_vector(&queue_length)
        .expect("LRA rewards should succeed");
    assert_close(&lra, &vec![mean; n], 1e-4);

    // Transient occupancy at a large time approaches the stationary distribution.
    let empty = StateSet::from_states(n, [0]).expect("valid states");
    let dist = checker
        .compute_all_transient_probabilities(&empty, &StateSet::empty(n), 60.0)
        .expect("transient distribution should succeed");
    let stationary: Vec<f64> = (0..n).map(|k| rho.powi(k as i32) / norm).collect();
    assert_close(&dist, &stationary, 1e-5);
    assert!((dist.sum() - 1.0).abs() < 1e-6);

    // Probability of filling up within t grows with t.
    let all = StateSet::full(n);
    let mut previous = Array1::from_elem(n, 0.0);
    for t in [0.0, 0.5, 1.0, 2.0, 5.0, 10.0] {
        let p = checker
            .compute_bounded_until_probabilities(&all, &full, 0.0, t)
            .expect("bounded until should succeed");
        for (a, b) in previous.iter().zip(p.iter()) {
            assert!(*b >= *a - 1e-8, "t = {t}: {previous} -> {p}");
        }
        assert_eq!(p[capacity], 1.0);
        previous = p;
    }

    // Expected time to empty the queue from k customers is k / (service - arrival) without a
    // buffer limit; blocking at the limit only shortens it.
    let times = checker
        .compute_reachability_times(&empty)
        .expect("reachability times should succeed");
    assert_eq!(times[0], 0.0);
    for k in 1..n {
        assert!(times[k] > times[k - 1]);
        assert!(times[k] <= k as f64 / (service - arrival) + 1e-9);
    }
}

#[test]
fn cumulative_queue_length_grows_linearly_in_steady_state() {
    let m = mm1k(1.0, 1.0, 3);
    let checker = CtmcCslChecker::new(&m).expect("valid model");
    let exit = row_sums(&m);
    assert_eq!(checker.exit_rates(), &exit);
    let rewards = RewardModel::new().with_state_rewards(array![0.0, 1.0, 2.0, 3.0]);
    let a = checker
        .compute_cumulative_rewards(&rewards, 50.0)
        .expect("cumulative rewards should succeed");
    let b = checker
        .compute_cumulative_rewards(&rewards, 60.0)
        .expect("cumulative rewards should succeed");
    // Uniform stationary distribution: mean queue length 1.5 per time unit.
    for (x, y) in a.iter().zip(b.iter()) {
        assert!(((y - x) - 15.0).abs() < 1e-3, "{a} vs {b}");
    }
}

//! Property-based tests for the loop kernel using proptest.

use proptest::prelude::*;

use ritmo_core::{
    CallbackOutput, Elapsed, LoopDriver, LoopState, Logs, Period, Schedule, Unit, callback_fn,
    every,
};
use std::time::Duration;

// --- Elapsed properties ---

proptest! {
    #[test]
    fn advance_is_monotone(
        sizes in prop::collection::vec(0u64..512, 1..50),
        deltas_ms in prop::collection::vec(0u64..1000, 1..50),
    ) {
        let mut elapsed = Elapsed::ZERO;
        for (size, ms) in sizes.iter().zip(deltas_ms.iter()) {
            let next = elapsed.advance(*size, Duration::from_millis(*ms));
            prop_assert_eq!(next.steps, elapsed.steps + 1);
            prop_assert!(next.samples >= elapsed.samples);
            prop_assert!(next.time >= elapsed.time);
            elapsed = next;
        }
    }

    #[test]
    fn ge_empty_period_always_true(steps in any::<u32>(), samples in any::<u32>()) {
        let elapsed = Elapsed {
            steps: u64::from(steps),
            samples: u64::from(samples),
            time: Duration::ZERO,
        };
        prop_assert!(elapsed.ge(&Period::default()));
    }

    #[test]
    fn ge_matches_unit_comparison(steps in 0u64..1000, threshold in 0u64..1000) {
        let elapsed = Elapsed { steps, ..Elapsed::ZERO };
        prop_assert_eq!(elapsed.ge(&Period::steps(threshold)), steps >= threshold);
    }
}

// --- Every schedule properties ---

proptest! {
    #[test]
    fn every_fires_once_per_crossed_period(
        period in 1u64..20,
        jumps in prop::collection::vec(1u64..7, 1..100),
    ) {
        let mut schedule = every(Period::steps(period)).unwrap();
        let mut prev = 0u64;
        let mut fired = 0u64;
        for jump in jumps {
            let steps = prev + jump;
            let hit = schedule.evaluate(&Elapsed { steps, ..Elapsed::ZERO });
            // fires exactly when a new multiple of the period was reached since the last check
            prop_assert_eq!(hit, prev / period != steps / period);
            if hit {
                fired += 1;
            }
            prev = steps;
        }
        prop_assert!(fired <= prev / period);
    }

    #[test]
    fn every_unit_steps_fires_exactly_on_multiples(period in 1u64..10, total in 1u64..200) {
        let mut schedule = every(Period::steps(period)).unwrap();
        for steps in 1..=total {
            let fired = schedule.evaluate(&Elapsed { steps, ..Elapsed::ZERO });
            prop_assert_eq!(fired, steps % period == 0);
        }
    }
}

// --- Logs properties ---

fn arb_logs() -> impl Strategy<Value = Logs> {
    prop::collection::vec(
        (
            prop::sample::select(vec!["losses", "metrics", "stateful_metrics"]),
            "[a-z]{1,4}",
            any::<i32>(),
        ),
        0..12,
    )
    .prop_map(|entries| {
        let mut logs = Logs::new();
        for (category, name, value) in entries {
            logs.add(category, name, value);
        }
        logs
    })
}

proptest! {
    #[test]
    fn merge_is_idempotent(dst in arb_logs(), src in arb_logs()) {
        let mut once = dst.clone();
        once.merge(src.clone());
        let mut twice = once.clone();
        twice.merge(src);
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn merge_with_empty_is_identity(logs in arb_logs()) {
        let mut merged = logs.clone();
        merged.merge(Logs::new());
        prop_assert_eq!(merged, logs);
    }

    #[test]
    fn merge_source_wins_on_collisions(dst in arb_logs(), src in arb_logs()) {
        let mut merged = dst.clone();
        merged.merge(src.clone());
        for (category, name, value) in src.iter() {
            prop_assert_eq!(merged.get(category, name), Some(value));
        }
        for (category, name, value) in dst.iter() {
            if src.get(category, name).is_none() {
                prop_assert_eq!(merged.get(category, name), Some(value));
            }
        }
    }
}

// --- Driver properties ---

proptest! {
    #[test]
    fn history_length_equals_completed_iterations(
        n in 0usize..60,
        period in 1u64..6,
    ) {
        let mut driver: LoopDriver<'_, (), Vec<u8>> = LoopDriver::new().on(
            every(Period::steps(period)).unwrap(),
            callback_fn("hit", |_: &LoopState<(), Vec<u8>>| {
                let mut logs = Logs::new();
                logs.add_metric("hit", 1);
                Ok(CallbackOutput::logs(logs))
            }),
        );
        let batches = vec![vec![0u8; 3]; n];
        let outcome = driver.run((), batches).unwrap();
        prop_assert_eq!(outcome.history.len(), n);
        prop_assert_eq!(outcome.elapsed.samples, 3 * n as u64);

        let hits = outcome.history.collect(Unit::Steps, &["hit"]);
        let expected: Vec<f64> = (1..=n as u64)
            .filter(|s| s % period == 0)
            .map(|s| s as f64)
            .collect();
        prop_assert_eq!(hits[0].xs(), expected);

        let steps: Vec<u64> = outcome.history.iter().map(|e| e.elapsed.steps).collect();
        prop_assert!(steps.windows(2).all(|w| w[0] < w[1]));
    }
}

//! Deterministic CPU-bound stand-in for real computation.
//!
//! Each role accumulates `(i mod a) * (i mod b)` over `[0, iterations)` with its own modulus
//! pair, so master and slave burn CPU through different (but equally cheap) formulas.
//! `black_box` keeps the optimiser from folding the loop into a closed form.

use std::hint::black_box;

use crate::shared::workload::Role;

impl Role {
    /// Modulus pair used by this role's busy-work formula.
    pub fn moduli(&self) -> (u64, u64) {
        match self {
            Role::Master => (7, 5),
            Role::Slave => (3, 11),
        }
    }
}

/// Burn CPU proportionally to `iterations`; the result only exists so work is observable.
pub fn run(role: Role, iterations: u32) -> u64 {
    let (a, b) = role.moduli();
    let mut acc: u64 = 0;
    for i in 0..u64::from(iterations) {
        let i = black_box(i);
        acc = acc.wrapping_add((i % a) * (i % b));
    }
    black_box(acc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[test]
    fn zero_iterations_is_zero() {
        assert_eq!(run(Role::Master, 0), 0);
        assert_eq!(run(Role::Slave, 0), 0);
    }

    #[test]
    fn repeated_calls_agree() {
        for n in [1, 10, 12_345, 100_000] {
            assert_eq!(run(Role::Master, n), run(Role::Master, n));
            assert_eq!(run(Role::Slave, n), run(Role::Slave, n));
        }
    }

    #[test]
    fn matches_the_role_formula() {
        // i = 0..8 with (7, 5): 0,1,4,9,16,0,6,0 -> 36
        assert_eq!(run(Role::Master, 8), 36);
        // i = 0..6 with (3, 11): 0,1,4,0,4,10 -> 19
        assert_eq!(run(Role::Slave, 6), 19);
    }

    #[test]
    fn roles_use_different_formulas() {
        assert_ne!(run(Role::Master, 1_000), run(Role::Slave, 1_000));
    }

    fn best_of(role: Role, iterations: u32) -> Duration {
        (0..5)
            .map(|_| {
                let start = Instant::now();
                run(role, iterations);
                start.elapsed()
            })
            .min()
            .unwrap_or_default()
    }

    #[test]
    fn latency_grows_with_iterations() {
        let small = best_of(Role::Master, 10_000);
        let large = best_of(Role::Master, 1_500_000);
        assert!(large >= small, "small={:?} large={:?}", small, large);
    }
}

//! Level-capacity sizing: computes how big each of the map's `L`
//! open-addressed levels should be so that, together, they hold an expected
//! `C` entries at a target per-level occupancy `ρ`.

use std::fmt;

/// Target per-level occupancy used unless a [`super::Builder`] overrides it.
pub const DEFAULT_RHO: f64 = 0.989;

/// Default level count unless a [`super::Builder`] overrides it.
pub const DEFAULT_LEVELS: usize = 13;

/// Returned when the requested capacity/level/occupancy combination can't
/// be honored. An under-sized last level is surfaced here as a
/// caller-visible configuration error rather than silently producing a
/// best-effort map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizingError {
    /// After rescaling, the last level's capacity fell short of its even
    /// share of the expected capacity.
    UndersizedLastLevel,
    /// `levels` was zero.
    ZeroLevels,
    /// `rho` was outside `(0, 1)`.
    InvalidOccupancy,
}

impl fmt::Display for SizingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SizingError::UndersizedLastLevel => {
                f.write_str("computed capacity for the last level is smaller than its even share")
            }
            SizingError::ZeroLevels => f.write_str("level count must be at least 1"),
            SizingError::InvalidOccupancy => f.write_str("target occupancy must be in (0, 1)"),
        }
    }
}

impl std::error::Error for SizingError {}

fn is_prime(n: usize) -> bool {
    if n < 2 {
        return false;
    }
    if n % 2 == 0 {
        return n == 2;
    }
    let mut d = 3usize;
    while d.saturating_mul(d) <= n {
        if n % d == 0 {
            return false;
        }
        d += 2;
    }
    true
}

fn next_prime(n: usize) -> usize {
    let mut candidate = n.max(2);
    if candidate % 2 == 0 {
        candidate += 1;
    }
    while !is_prime(candidate) {
        candidate += 2;
    }
    candidate
}

/// Computes `levels` prime-sized level capacities for an expected total
/// capacity of `expected`, at target occupancy `rho`:
/// `next_prime(n / -ln(1 - ρ))`, iteratively subtracting `capacity * ρ`
/// from the remaining count, followed by one bootstrapping rescale pass
/// `n · C / total`.
pub(crate) fn compute_level_capacities(
    expected: usize,
    levels: usize,
    rho: f64,
) -> Result<Vec<usize>, SizingError> {
    if levels == 0 {
        return Err(SizingError::ZeroLevels);
    }
    if !(rho > 0.0 && rho < 1.0) {
        return Err(SizingError::InvalidOccupancy);
    }

    let expected = expected.max(1) as f64;
    let denom = -(1.0 - rho).ln();

    let mut remaining = expected;
    let mut raw_caps = Vec::with_capacity(levels);
    for _ in 0..levels {
        let raw = (remaining / denom).ceil().max(1.0) as usize;
        let cap = next_prime(raw);
        raw_caps.push(cap);
        remaining = (remaining - cap as f64 * rho).max(0.0);
    }

    let total: usize = raw_caps.iter().sum();
    let rescaled: Vec<usize> = raw_caps
        .iter()
        .map(|&c| {
            let n = ((c as f64) * expected / (total as f64)).ceil().max(1.0) as usize;
            next_prime(n)
        })
        .collect();

    let even_share = expected / levels as f64;
    let last = *rescaled.last().expect("levels > 0") as f64;
    if last < even_share {
        return Err(SizingError::UndersizedLastLevel);
    }

    Ok(rescaled)
}

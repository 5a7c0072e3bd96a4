use std::time::Duration;

use serde::Serialize;

use super::serde_micros;

/// Latency percentiles derived from a sample reservoir.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LatencyPercentiles {
    #[serde(rename = "median_us", serialize_with = "serde_micros")]
    pub median: Duration,
    #[serde(rename = "p90_us", serialize_with = "serde_micros")]
    pub p90: Duration,
    #[serde(rename = "p95_us", serialize_with = "serde_micros")]
    pub p95: Duration,
}

impl LatencyPercentiles {
    /// Sorts `samples` in place and computes median / p90 / p95.
    /// Returns `None` for an empty sample set.
    #[must_use]
    pub fn from_samples(samples: &mut [Duration]) -> Option<Self> {
        samples.sort_unstable();
        Some(Self {
            median: percentile(samples, 50)?,
            p90: percentile(samples, 90)?,
            p95: percentile(samples, 95)?,
        })
    }
}

/// Linearly interpolated percentile over an ascending slice.
///
/// The rank is `pct * (n - 1) / 100`; the fractional part interpolates
/// between the two neighbouring samples at nanosecond resolution.
#[must_use]
pub fn percentile(sorted: &[Duration], pct: u32) -> Option<Duration> {
    let last = sorted.len().checked_sub(1)?;
    let pct = u128::from(pct.min(100));
    let numerator = pct.saturating_mul(u128::try_from(last).ok()?);
    let lower_index = usize::try_from(numerator.checked_div(100)?).ok()?;
    let fraction = numerator.checked_rem(100)?;

    let lower = sorted.get(lower_index)?.as_nanos();
    let upper = sorted
        .get(lower_index.saturating_add(1))
        .map_or(lower, Duration::as_nanos);
    let step = upper
        .saturating_sub(lower)
        .saturating_mul(fraction)
        .checked_div(100)?;
    let nanos = u64::try_from(lower.saturating_add(step)).unwrap_or(u64::MAX);
    Some(Duration::from_nanos(nanos))
}

//! Clock and sleep scaling.
//!
//! All clock sources share one ratio (`AddTickSpeed` / `LowTickSpeed`) so a
//! guest comparing two of them still sees a coherent elapsed time. Sleep has
//! its own ratio (`AddSleepSpeed` / `LowSleepSpeed`). Both are re-read from
//! the policy on every call so the host can retune a running guest.

use crate::platform::{ClockApi, Platform, SleepApi};
use mirage_config::{keys, PolicyStore};
use std::sync::Arc;

/// A linear `numerator / denominator` time transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScalingRatio {
    pub numerator: u32,
    pub denominator: u32,
}

impl ScalingRatio {
    pub const IDENTITY: ScalingRatio = ScalingRatio::new(1, 1);

    pub const fn new(numerator: u32, denominator: u32) -> Self {
        Self {
            numerator,
            denominator,
        }
    }

    /// Current tick ratio; unset components default to 1.
    pub fn tick(policy: &dyn PolicyStore) -> Self {
        Self::new(
            policy.query_number(keys::ADD_TICK_SPEED, 1),
            policy.query_number(keys::LOW_TICK_SPEED, 1),
        )
    }

    /// Current sleep ratio; unset components default to 1.
    pub fn sleep(policy: &dyn PolicyStore) -> Self {
        Self::new(
            policy.query_number(keys::ADD_SLEEP_SPEED, 1),
            policy.query_number(keys::LOW_SLEEP_SPEED, 1),
        )
    }
}

impl Default for ScalingRatio {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// `real * n / d`, or `real * n` when `d` is 0. Wraps on overflow.
pub fn scale_tick(real: u64, ratio: ScalingRatio) -> u64 {
    let scaled = real.wrapping_mul(u64::from(ratio.numerator));
    match ratio.denominator {
        0 => scaled,
        d => scaled / u64::from(d),
    }
}

/// 32-bit tick counter: same transform, truncated back to the counter width.
pub fn scale_tick32(real: u32, ratio: ScalingRatio) -> u32 {
    scale_tick(u64::from(real), ratio) as u32
}

/// Unbiased interrupt time uses the tick transform.
pub fn scale_interrupt_time(real: u64, ratio: ScalingRatio) -> u64 {
    scale_tick(real, ratio)
}

/// Performance counter: scaled only when both components are non-zero.
pub fn scale_performance_counter(real: i64, ratio: ScalingRatio) -> i64 {
    if ratio.numerator == 0 || ratio.denominator == 0 {
        return real;
    }
    real.wrapping_mul(i64::from(ratio.numerator)) / i64::from(ratio.denominator)
}

/// Sleep duration: scaled only when both components are non-zero.
pub fn scale_sleep(requested_ms: u32, ratio: ScalingRatio) -> u32 {
    if ratio.numerator == 0 || ratio.denominator == 0 {
        return requested_ms;
    }
    requested_ms.wrapping_mul(ratio.numerator) / ratio.denominator
}

/// Substitute clock: real reading, then the current tick ratio.
pub struct ScaledClock {
    platform: Arc<dyn Platform>,
    policy: Arc<dyn PolicyStore>,
}

impl ScaledClock {
    pub fn new(platform: Arc<dyn Platform>, policy: Arc<dyn PolicyStore>) -> Self {
        Self { platform, policy }
    }

    fn ratio(&self) -> ScalingRatio {
        ScalingRatio::tick(self.policy.as_ref())
    }
}

impl ClockApi for ScaledClock {
    fn tick_count(&self) -> u32 {
        scale_tick32(self.platform.tick_count(), self.ratio())
    }

    fn tick_count64(&self) -> u64 {
        scale_tick(self.platform.tick_count64(), self.ratio())
    }

    fn unbiased_interrupt_time(&self) -> Option<u64> {
        let real = self.platform.unbiased_interrupt_time()?;
        Some(scale_interrupt_time(real, self.ratio()))
    }

    fn performance_counter(&self) -> Option<i64> {
        let real = self.platform.performance_counter()?;
        Some(scale_performance_counter(real, self.ratio()))
    }
}

/// Substitute sleep: scales the request, then delegates with the alertable
/// flag and return value untouched.
pub struct ScaledSleep {
    platform: Arc<dyn Platform>,
    policy: Arc<dyn PolicyStore>,
}

impl ScaledSleep {
    pub fn new(platform: Arc<dyn Platform>, policy: Arc<dyn PolicyStore>) -> Self {
        Self { platform, policy }
    }
}

impl SleepApi for ScaledSleep {
    fn sleep_ex(&self, millis: u32, alertable: bool) -> u32 {
        let ratio = ScalingRatio::sleep(self.policy.as_ref());
        self.platform.sleep_ex(scale_sleep(millis, ratio), alertable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakePlatform;
    use mirage_config::testing::TestPolicy;
    use mirage_config::Setting;

    #[test]
    fn test_scale_tick_basic() {
        assert_eq!(scale_tick(1000, ScalingRatio::new(2, 1)), 2000);
        assert_eq!(scale_tick(1000, ScalingRatio::new(1, 3)), 333);
        assert_eq!(scale_tick(7, ScalingRatio::new(3, 0)), 21);
        assert_eq!(scale_tick(12345, ScalingRatio::IDENTITY), 12345);
    }

    #[test]
    fn test_scale_tick_multiplies_before_dividing() {
        // 10 * (3/2) with integer division first would give 10
        assert_eq!(scale_tick(10, ScalingRatio::new(3, 2)), 15);
        assert_eq!(scale_interrupt_time(10, ScalingRatio::new(3, 2)), 15);
    }

    #[test]
    fn test_scale_tick_wraps_instead_of_panicking() {
        let r = scale_tick(u64::MAX, ScalingRatio::new(2, 1));
        assert_eq!(r, u64::MAX.wrapping_mul(2));
    }

    #[test]
    fn test_scale_tick32_matches_wide_transform() {
        assert_eq!(scale_tick32(1000, ScalingRatio::new(2, 1)), 2000);
        assert_eq!(scale_tick32(u32::MAX, ScalingRatio::new(1, 2)), u32::MAX / 2);
    }

    #[test]
    fn test_scale_tick32_keeps_wide_product() {
        // 32-bit wrapping of the product would give 426_258_176
        assert_eq!(scale_tick32(3_000_000_000, ScalingRatio::new(2, 4)), 1_500_000_000);
        assert_eq!(scale_tick32(3_000_000_000, ScalingRatio::new(2, 1)), 1_705_032_704);
    }

    #[test]
    fn test_scale_sleep() {
        assert_eq!(scale_sleep(100, ScalingRatio::new(1, 2)), 50);
        assert_eq!(scale_sleep(100, ScalingRatio::new(0, 2)), 100);
        assert_eq!(scale_sleep(100, ScalingRatio::new(3, 0)), 100);
        assert_eq!(scale_sleep(100, ScalingRatio::new(3, 2)), 150);
    }

    #[test]
    fn test_scale_performance_counter() {
        assert_eq!(scale_performance_counter(900, ScalingRatio::new(1, 3)), 300);
        assert_eq!(scale_performance_counter(900, ScalingRatio::new(4, 0)), 900);
    }

    #[test]
    fn test_scaled_clock_reads_ratio_per_call() {
        let platform = Arc::new(FakePlatform::new().with_ticks(1000));
        let shared = TestPolicy::new().number(keys::ADD_TICK_SPEED, 2).shared();
        let clock = ScaledClock::new(platform, Arc::new(shared.clone()));

        assert_eq!(clock.tick_count(), 2000);
        assert_eq!(clock.tick_count64(), 2000);

        shared.set(keys::ADD_TICK_SPEED, Setting::Number(1));
        shared.set(keys::LOW_TICK_SPEED, Setting::Number(4));
        assert_eq!(clock.tick_count(), 250);
        // the fake reports 10_000 interrupt units and 1_000 counts per tick
        assert_eq!(clock.unbiased_interrupt_time(), Some(2_500_000));
        assert_eq!(clock.performance_counter(), Some(250_000));
    }

    #[test]
    fn test_scaled_clock_passes_failure_through() {
        let platform = Arc::new(FakePlatform::new().with_failing_counters());
        let policy = TestPolicy::new().number(keys::ADD_TICK_SPEED, 2).shared();
        let clock = ScaledClock::new(platform, Arc::new(policy));
        assert_eq!(clock.performance_counter(), None);
        assert_eq!(clock.unbiased_interrupt_time(), None);
    }

    #[test]
    fn test_scaled_sleep_forwards_scaled_duration() {
        let platform = Arc::new(FakePlatform::new());
        let policy = TestPolicy::new()
            .number(keys::ADD_SLEEP_SPEED, 1)
            .number(keys::LOW_SLEEP_SPEED, 2)
            .shared();
        let sleep = ScaledSleep::new(platform.clone(), Arc::new(policy));

        assert_eq!(sleep.sleep_ex(100, true), 0);
        assert_eq!(platform.sleeps(), vec![(50, true)]);
    }
}

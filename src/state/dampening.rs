//! Throughput-driven damage multiplier.
//!
//! Sampling folds realised damage/sec into an exponential moving average; recomputing divides
//! the damage rate still allowed before the encounter's target end by that average. This is a
//! plain proportional controller: it only has to keep the boss alive until its minimum
//! lifetime, not track a setpoint.

use std::time::SystemTime;

use crate::config::DampeningConfig;

/// Floor applied to the smoothed throughput before dividing by it.
const MIN_THROUGHPUT_DPS: f64 = 1.0;

/// Dampening fields carried by an encounter.
#[derive(Debug, Clone, PartialEq)]
pub struct DampeningState {
    /// Scalar applied to every raw hit, within `[min_multiplier, max_multiplier]`.
    pub multiplier: f64,
    /// Smoothed damage per second.
    pub throughput_ema: f64,
    pub last_sample_at: SystemTime,
    pub last_sample_damage: u64,
}

impl DampeningState {
    /// Fresh state: no dampening until throughput has been observed.
    pub fn new(now: SystemTime, config: &DampeningConfig) -> Self {
        Self {
            multiplier: config.max_multiplier,
            throughput_ema: 0.0,
            last_sample_at: now,
            last_sample_damage: 0,
        }
    }

    /// Fold the damage dealt since the previous sample into the EMA and move the baseline.
    ///
    /// Returns the instantaneous damage/sec, or `None` when no time has elapsed.
    pub fn sample(&mut self, cumulative_damage: u64, now: SystemTime, alpha: f64) -> Option<f64> {
        let elapsed = now.duration_since(self.last_sample_at).ok()?.as_secs_f64();
        if elapsed <= 0.0 {
            return None;
        }

        let delta = cumulative_damage.saturating_sub(self.last_sample_damage) as f64;
        let instant_dps = delta / elapsed;
        self.throughput_ema = self.throughput_ema * (1.0 - alpha) + instant_dps * alpha;
        self.last_sample_at = now;
        self.last_sample_damage = cumulative_damage;
        Some(instant_dps)
    }

    /// Recompute the multiplier from the EMA and store it.
    pub fn recompute(
        &mut self,
        remaining_health: u64,
        now: SystemTime,
        target_end_at: SystemTime,
        config: &DampeningConfig,
    ) -> f64 {
        self.multiplier = compute_multiplier(
            remaining_health,
            now,
            target_end_at,
            self.throughput_ema,
            config,
        );
        self.multiplier
    }
}

/// Multiplier that would let `remaining_health` drain exactly at `target_end_at` given the
/// observed throughput, clamped to the configured range.
pub fn compute_multiplier(
    remaining_health: u64,
    now: SystemTime,
    target_end_at: SystemTime,
    throughput_ema: f64,
    config: &DampeningConfig,
) -> f64 {
    let seconds_left = match target_end_at.duration_since(now) {
        Ok(left) if !left.is_zero() => left.as_secs_f64(),
        _ => return config.max_multiplier,
    };

    let allowed_dps = remaining_health as f64 / seconds_left;
    let raw = allowed_dps / throughput_ema.max(MIN_THROUGHPUT_DPS);
    if raw.is_nan() {
        return config.max_multiplier;
    }
    raw.clamp(config.min_multiplier, config.max_multiplier)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn config() -> DampeningConfig {
        DampeningConfig::default()
    }

    #[test]
    fn ema_converges_to_constant_throughput() {
        let config = config();
        let start = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000);
        let mut state = DampeningState::new(start, &config);
        let window = Duration::from_secs(60);
        let constant_dps = 250.0;

        let mut cumulative = 0u64;
        let mut now = start;
        for _ in 0..60 {
            now += window;
            cumulative += (constant_dps * window.as_secs_f64()) as u64;
            let instant = state.sample(cumulative, now, config.alpha).unwrap();
            assert_eq!(instant, constant_dps);
        }

        // After k windows the error is constant * (1 - alpha)^k.
        let bound = constant_dps * (1.0 - config.alpha).powi(60) + 1e-9;
        assert!((state.throughput_ema - constant_dps).abs() < bound);
        assert!((state.throughput_ema - constant_dps).abs() < 1.0);
    }

    #[test]
    fn single_spike_is_smoothed() {
        let config = config();
        let start = SystemTime::UNIX_EPOCH + Duration::from_secs(10);
        let mut state = DampeningState::new(start, &config);
        state.sample(600_000, start + Duration::from_secs(60), config.alpha);
        assert!((state.throughput_ema - 1_000.0).abs() < 1e-6);
    }

    #[test]
    fn zero_elapsed_time_skips_sample() {
        let config = config();
        let now = SystemTime::UNIX_EPOCH + Duration::from_secs(10);
        let mut state = DampeningState::new(now, &config);
        assert_eq!(state.sample(500, now, config.alpha), None);
        assert_eq!(state.last_sample_damage, 0);
    }

    #[test]
    fn idle_encounter_is_not_dampened() {
        let config = config();
        let now = SystemTime::UNIX_EPOCH + Duration::from_secs(10);
        let target = now + Duration::from_secs(3_600);
        assert_eq!(compute_multiplier(1_000_000_000, now, target, 0.0, &config), 1.0);
    }

    #[test]
    fn proportional_multiplier_inside_range() {
        let config = config();
        let now = SystemTime::UNIX_EPOCH + Duration::from_secs(10);
        let target = now + Duration::from_secs(86_400);
        // 10 dps allowed, 20 dps observed.
        let multiplier = compute_multiplier(864_000, now, target, 20.0, &config);
        assert!((multiplier - 0.5).abs() < 1e-12);
    }

    #[test]
    fn heavy_throughput_clamps_to_minimum() {
        let config = config();
        let now = SystemTime::UNIX_EPOCH + Duration::from_secs(10);
        let target = now + Duration::from_secs(86_400);
        let multiplier = compute_multiplier(864_000, now, target, 1_000_000.0, &config);
        assert_eq!(multiplier, config.min_multiplier);
    }

    #[test]
    fn past_target_end_releases_dampening() {
        let config = config();
        let now = SystemTime::UNIX_EPOCH + Duration::from_secs(100_000);
        let target = now - Duration::from_secs(1);
        let mut state = DampeningState::new(now, &config);
        state.throughput_ema = 1_000_000.0;
        state.multiplier = config.min_multiplier;
        assert_eq!(state.recompute(5, now, target, &config), config.max_multiplier);
    }
}

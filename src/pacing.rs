//! Constant-rate frame pacing.
//!
//! [`PacingState`] owns the next due time and hands out evenly spaced
//! stream-relative timestamps. When the caller falls behind, the schedule
//! is rebased to the current time instead of accumulating a catch-up debt.

use std::fmt;
use std::time::{Duration, Instant};

use crate::error::{CaptureError, CaptureResult};

const MICROS_PER_SECOND: u64 = 1_000_000;
/// Decimal frame rates are parsed to this many fractional digits.
const MAX_DECIMAL_DIGITS: usize = 3;

/// Rational frames-per-second value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Framerate {
    num: u32,
    den: u32,
}

impl Framerate {
    pub fn new(num: u32, den: u32) -> CaptureResult<Self> {
        if num == 0 || den == 0 {
            return Err(CaptureError::InvalidConfig(format!(
                "framerate {num}/{den} must have a non-zero numerator and denominator"
            )));
        }
        let divisor = gcd(num, den);
        Ok(Self {
            num: num / divisor,
            den: den / divisor,
        })
    }

    /// Parse `"30"`, `"30000/1001"` or `"29.97"`.
    pub fn parse(raw: &str) -> CaptureResult<Self> {
        let raw = raw.trim();
        let invalid = || CaptureError::InvalidConfig(format!("unrecognized framerate {raw:?}"));

        if let Some((num, den)) = raw.split_once('/') {
            let num = num.trim().parse::<u32>().map_err(|_| invalid())?;
            let den = den.trim().parse::<u32>().map_err(|_| invalid())?;
            return Self::new(num, den);
        }

        if let Some((whole, fraction)) = raw.split_once('.') {
            if fraction.is_empty()
                || fraction.len() > MAX_DECIMAL_DIGITS
                || !fraction.bytes().all(|b| b.is_ascii_digit())
            {
                return Err(invalid());
            }
            let den = 10u32.pow(fraction.len() as u32);
            let whole = if whole.is_empty() {
                0
            } else {
                whole.parse::<u32>().map_err(|_| invalid())?
            };
            let fraction = fraction.parse::<u32>().map_err(|_| invalid())?;
            let num = whole
                .checked_mul(den)
                .and_then(|scaled| scaled.checked_add(fraction))
                .ok_or_else(invalid)?;
            return Self::new(num, den);
        }

        Self::new(raw.parse::<u32>().map_err(|_| invalid())?, 1)
    }

    pub fn numerator(&self) -> u32 {
        self.num
    }

    pub fn denominator(&self) -> u32 {
        self.den
    }

    pub fn as_f64(&self) -> f64 {
        f64::from(self.num) / f64::from(self.den)
    }

    /// Frame interval in whole microseconds.
    pub fn interval_us(&self) -> u64 {
        MICROS_PER_SECOND * u64::from(self.den) / u64::from(self.num)
    }
}

impl Default for Framerate {
    fn default() -> Self {
        Self { num: 30, den: 1 }
    }
}

impl fmt::Display for Framerate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

fn gcd(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

/// Time source for pacing. Times are microseconds since the clock was
/// created.
pub trait Clock: Send {
    fn now_us(&self) -> i64;
    fn sleep_us(&self, micros: u64);
}

#[derive(Debug)]
pub struct MonotonicClock {
    start: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_us(&self) -> i64 {
        i64::try_from(self.start.elapsed().as_micros()).unwrap_or(i64::MAX)
    }

    fn sleep_us(&self, micros: u64) {
        std::thread::sleep(Duration::from_micros(micros));
    }
}

/// What the scheduler decided for one frame request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameSchedule {
    /// Stream-relative timestamp to stamp on the emitted frame.
    pub timestamp_us: i64,
    pub slept_us: u64,
    /// The request arrived after its due time and the schedule was rebased.
    pub rebased: bool,
}

/// Evenly spaced schedule anchored at the last rebase.
///
/// Due times are computed from the anchor and a frame count in exact
/// rational arithmetic, so sub-microsecond remainders never accumulate.
#[derive(Debug)]
pub struct PacingState {
    framerate: Framerate,
    anchor_us: i64,
    frames_since_anchor: u64,
    next_frame_due: i64,
}

impl PacingState {
    pub fn new(framerate: Framerate) -> Self {
        Self {
            framerate,
            anchor_us: 0,
            frames_since_anchor: 0,
            next_frame_due: 0,
        }
    }

    /// Nominal interval, truncated to whole microseconds.
    pub fn interval_us(&self) -> i64 {
        i64::try_from(self.framerate.interval_us()).unwrap_or(i64::MAX)
    }

    pub fn next_frame_due(&self) -> i64 {
        self.next_frame_due
    }

    /// Offset of frame `frames` from the anchor, rounded down.
    fn offset_us(&self, frames: u64) -> i64 {
        let micros = u128::from(frames)
            * u128::from(MICROS_PER_SECOND)
            * u128::from(self.framerate.denominator())
            / u128::from(self.framerate.numerator());
        i64::try_from(micros).unwrap_or(i64::MAX)
    }

    /// Sleep until the next frame is due and schedule the one after it.
    /// A late request rebases the schedule onto the current time.
    pub fn wait_for_next(&mut self, clock: &dyn Clock) -> FrameSchedule {
        let now = clock.now_us();
        let delay = self.next_frame_due - now;
        let (timestamp_us, slept_us, rebased) = if delay <= 0 {
            self.anchor_us = now;
            self.frames_since_anchor = 0;
            (now, 0, true)
        } else {
            let delay = delay as u64;
            clock.sleep_us(delay);
            (self.next_frame_due, delay, false)
        };
        self.frames_since_anchor += 1;
        self.next_frame_due = self
            .anchor_us
            .saturating_add(self.offset_us(self.frames_since_anchor));
        FrameSchedule {
            timestamp_us,
            slept_us,
            rebased,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::ManualClock;

    #[test]
    fn framerate_parses_integer_rational_and_decimal_forms() -> CaptureResult<()> {
        assert_eq!(Framerate::parse("30")?, Framerate::new(30, 1)?);
        assert_eq!(Framerate::parse("30000/1001")?.to_string(), "30000/1001");
        assert_eq!(Framerate::parse(" 29.97 ")?, Framerate::new(2997, 100)?);
        assert_eq!(Framerate::parse("60/2")?.to_string(), "30/1");
        assert_eq!(Framerate::parse(".5")?, Framerate::new(1, 2)?);
        Ok(())
    }

    #[test]
    fn framerate_rejects_zero_and_garbage() {
        for raw in ["0", "30/0", "0/1", "fast", "29.", "1.23456", "-5"] {
            assert!(
                matches!(Framerate::parse(raw), Err(CaptureError::InvalidConfig(_))),
                "{raw:?} should be rejected"
            );
        }
    }

    #[test]
    fn interval_follows_the_rational_rate() -> CaptureResult<()> {
        assert_eq!(Framerate::default().interval_us(), 33_333);
        assert_eq!(Framerate::new(30000, 1001)?.interval_us(), 33_366);
        assert_eq!(Framerate::new(1, 2)?.interval_us(), 2_000_000);
        Ok(())
    }

    #[test]
    fn on_time_requests_sleep_and_emit_evenly_spaced_timestamps() -> CaptureResult<()> {
        let clock = ManualClock::new();
        let mut pacing = PacingState::new(Framerate::new(25, 1)?);

        let first = pacing.wait_for_next(&clock);
        assert_eq!(first.timestamp_us, 0);
        assert_eq!(first.slept_us, 0);

        clock.advance_us(1_000);
        let second = pacing.wait_for_next(&clock);
        assert_eq!(second.timestamp_us, 40_000);
        assert_eq!(second.slept_us, 39_000);
        assert!(!second.rebased);
        assert_eq!(clock.now_us(), 40_000);
        Ok(())
    }

    #[test]
    fn late_requests_rebase_instead_of_bursting() -> CaptureResult<()> {
        let clock = ManualClock::new();
        let mut pacing = PacingState::new(Framerate::new(10, 1)?);
        pacing.wait_for_next(&clock);

        clock.advance_us(350_000);
        let late = pacing.wait_for_next(&clock);
        assert!(late.rebased);
        assert_eq!(late.timestamp_us, 350_000);
        assert_eq!(pacing.next_frame_due(), 450_000);

        let next = pacing.wait_for_next(&clock);
        assert_eq!(next.timestamp_us, 450_000);
        assert_eq!(next.slept_us, 100_000);
        Ok(())
    }

    #[test]
    fn long_run_rate_does_not_drift() -> CaptureResult<()> {
        let clock = ManualClock::new();
        let framerate = Framerate::new(30000, 1001)?;
        let mut pacing = PacingState::new(framerate);
        let frames = 200_000u32;

        let mut timestamps = Vec::new();
        for _ in 0..frames {
            clock.advance_us(250);
            timestamps.push(pacing.wait_for_next(&clock).timestamp_us);
        }

        let elapsed = timestamps[timestamps.len() - 1] - timestamps[0];
        let expected = f64::from(frames - 1) / framerate.as_f64() * 1_000_000.0;
        assert!(
            (elapsed as f64 - expected).abs() <= pacing.interval_us() as f64,
            "elapsed {elapsed}us, expected {expected}us"
        );
        assert!(timestamps.windows(2).all(|pair| pair[1] > pair[0]));
        Ok(())
    }

    #[test]
    fn fractional_intervals_stay_on_the_exact_grid() -> CaptureResult<()> {
        let clock = ManualClock::new();
        let mut pacing = PacingState::new(Framerate::new(30, 1)?);
        pacing.wait_for_next(&clock);

        let mut last = 0;
        for _ in 0..90_000 {
            last = pacing.wait_for_next(&clock).timestamp_us;
        }
        // 90_000 frames at 30 fps is exactly 3000 s.
        assert_eq!(last, 3_000_000_000);
        assert_eq!(pacing.next_frame_due(), 3_000_033_333);
        Ok(())
    }

    #[test]
    fn rebase_restarts_the_grid_at_the_late_request() -> CaptureResult<()> {
        let clock = ManualClock::new();
        let mut pacing = PacingState::new(Framerate::new(3, 1)?);
        pacing.wait_for_next(&clock);
        pacing.wait_for_next(&clock);
        assert_eq!(pacing.next_frame_due(), 666_666);

        clock.advance_us(1_000_000);
        let late = pacing.wait_for_next(&clock);
        assert!(late.rebased);
        assert_eq!(late.timestamp_us, 1_333_333);
        assert_eq!(pacing.next_frame_due(), 1_666_666);
        let next = pacing.wait_for_next(&clock);
        assert_eq!(next.timestamp_us, 1_666_666);
        assert_eq!(pacing.next_frame_due(), 1_999_999);
        Ok(())
    }
}

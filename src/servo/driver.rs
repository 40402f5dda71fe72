// PWM output capability shared by the I2C expander, direct PWM pins and the simulator
//
// Drivers only know raw servo angles. Logical angles and range checks live in ServoMotor.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use crate::config::{DEFAULT_FREQUENCY_HZ, DEFAULT_MAX_SPAN_DEG, DEFAULT_PULSE_MAX_US, DEFAULT_PULSE_MIN_US};

/// Hardware channel-count ceiling (PCA9685 has 16 outputs)
pub const CHANNEL_COUNT: u8 = 16;

/// 12-bit duty resolution of the PCA9685 counter
pub const DUTY_RESOLUTION: f32 = 4096.0;
pub const DUTY_MAX: u16 = 4095;

/// Error types for PWM output
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("I2C bus error: {0}")]
    I2c(embedded_hal::i2c::ErrorKind),

    #[error("PWM output error: {0}")]
    Pwm(String),

    #[error("Channel {channel} is not served by this driver")]
    InvalidChannel { channel: u8 },

    #[error("Raw angle {raw_angle} on channel {channel} maps to duty {duty}, outside 0..={max}")]
    DutyOutOfRange {
        channel: u8,
        raw_angle: f32,
        duty: f32,
        max: u16,
    },

    #[error("Invalid PWM timing: {0}")]
    InvalidTiming(String),

    #[error("Channel {channel} has not been configured yet")]
    NotConfigured { channel: u8 },

    #[error("Failed to open device {device}: {reason}")]
    Open { device: String, reason: String },

    #[error("Injected bus failure on channel {channel}")]
    Injected { channel: u8 },
}

/// Capability every servo output backend provides
pub trait PwmDriver {
    /// Drive `channel` to the pulse matching `raw_angle_deg`
    fn configure(&mut self, channel: u8, raw_angle_deg: f32) -> Result<(), DriverError>;

    /// Read back the raw angle currently programmed on `channel`
    fn read(&mut self, channel: u8) -> Result<f32, DriverError>;

    /// De-energize `channel`
    fn disable(&mut self, channel: u8) -> Result<(), DriverError>;
}

/// Handle to a driver that several servos on the same bus write through.
///
/// The lock is only ever held for a single register sequence, never across an await.
pub type SharedDriver = Arc<Mutex<dyn PwmDriver + Send>>;

pub fn shared<D>(driver: D) -> SharedDriver
where
    D: PwmDriver + Send + 'static,
{
    Arc::new(Mutex::new(driver))
}

/// Lock a driver, recovering the guard if a previous holder panicked
pub(crate) fn lock(driver: &SharedDriver) -> MutexGuard<'_, dyn PwmDriver + Send + 'static> {
    driver.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Servo pulse timing: frequency and the pulse widths spanning `max_span_deg` raw degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PulseTiming {
    pub frequency_hz: f32,
    pub pulse_min_us: f32,
    pub pulse_max_us: f32,
    pub max_span_deg: f32,
}

impl Default for PulseTiming {
    fn default() -> Self {
        Self {
            frequency_hz: DEFAULT_FREQUENCY_HZ,
            pulse_min_us: DEFAULT_PULSE_MIN_US,
            pulse_max_us: DEFAULT_PULSE_MAX_US,
            max_span_deg: DEFAULT_MAX_SPAN_DEG,
        }
    }
}

impl PulseTiming {
    pub fn with_frequency(frequency_hz: f32) -> Self {
        Self {
            frequency_hz,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), DriverError> {
        if !(self.frequency_hz.is_finite() && self.frequency_hz > 0.0) {
            return Err(DriverError::InvalidTiming(format!(
                "frequency must be positive, got {} Hz",
                self.frequency_hz
            )));
        }
        if !(self.pulse_min_us < self.pulse_max_us) {
            return Err(DriverError::InvalidTiming(format!(
                "pulse_min_us ({}) must be below pulse_max_us ({})",
                self.pulse_min_us, self.pulse_max_us
            )));
        }
        if !(self.max_span_deg > 0.0) {
            return Err(DriverError::InvalidTiming(format!(
                "max_span_deg must be positive, got {}",
                self.max_span_deg
            )));
        }
        if self.pulse_max_us >= self.period_us() {
            return Err(DriverError::InvalidTiming(format!(
                "pulse_max_us ({}) does not fit in a {} us period",
                self.pulse_max_us,
                self.period_us()
            )));
        }
        Ok(())
    }

    pub fn period_us(&self) -> f32 {
        1_000_000.0 / self.frequency_hz
    }

    /// Linear pulse width for a raw angle, `pulse_min_us` at 0 and `pulse_max_us` at the full span
    pub fn pulse_us(&self, raw_angle_deg: f32) -> f32 {
        self.pulse_min_us
            + (raw_angle_deg / self.max_span_deg) * (self.pulse_max_us - self.pulse_min_us)
    }

    pub fn raw_angle_from_pulse_us(&self, pulse_us: f32) -> f32 {
        (pulse_us - self.pulse_min_us) / (self.pulse_max_us - self.pulse_min_us)
            * self.max_span_deg
    }
}

/// Raw angle -> 12-bit duty line, computed once per timing
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DutyCurve {
    offset: f32,
    slope: f32,
}

impl DutyCurve {
    pub fn new(timing: &PulseTiming) -> Result<Self, DriverError> {
        timing.validate()?;

        let period_us = timing.period_us();
        let min_duty = us_to_duty(timing.pulse_min_us, period_us);
        let max_duty = us_to_duty(timing.pulse_max_us, period_us);

        Ok(Self {
            offset: min_duty,
            slope: (max_duty - min_duty) / timing.max_span_deg,
        })
    }

    pub fn offset(&self) -> f32 {
        self.offset
    }

    pub fn slope(&self) -> f32 {
        self.slope
    }

    /// Duty for `raw_angle_deg`, rejected (never clamped) outside the 12-bit counter
    pub fn duty(&self, channel: u8, raw_angle_deg: f32) -> Result<u16, DriverError> {
        let duty = self.offset + self.slope * raw_angle_deg;
        if !(0.0..=DUTY_MAX as f32).contains(&duty) {
            return Err(DriverError::DutyOutOfRange {
                channel,
                raw_angle: raw_angle_deg,
                duty,
                max: DUTY_MAX,
            });
        }
        Ok(duty as u16)
    }

    pub fn raw_angle(&self, duty: u16) -> f32 {
        (duty as f32 - self.offset) / self.slope
    }
}

fn us_to_duty(us: f32, period_us: f32) -> f32 {
    (us / period_us) * DUTY_RESOLUTION
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_default_timing_is_valid() {
        let timing = PulseTiming::default();
        timing.validate().unwrap();
        assert_relative_eq!(timing.period_us(), 20_000.0);
        assert_relative_eq!(timing.pulse_us(0.0), 544.0);
        assert_relative_eq!(timing.pulse_us(180.0), 2400.0);
        assert_relative_eq!(timing.pulse_us(90.0), 1472.0);
    }

    #[test]
    fn test_invalid_timing() {
        assert!(PulseTiming::with_frequency(0.0).validate().is_err());

        let inverted = PulseTiming {
            pulse_min_us: 2400.0,
            pulse_max_us: 544.0,
            ..PulseTiming::default()
        };
        assert!(matches!(inverted.validate(), Err(DriverError::InvalidTiming(_))));

        // 2400 us pulses do not fit in a 1 kHz period
        assert!(PulseTiming::with_frequency(1000.0).validate().is_err());
    }

    #[test]
    fn test_duty_curve_endpoints() {
        let curve = DutyCurve::new(&PulseTiming::default()).unwrap();
        // 544 / 20000 * 4096 = 111.4, 2400 / 20000 * 4096 = 491.5
        assert_relative_eq!(curve.offset(), 111.4112, epsilon = 1e-3);
        assert_relative_eq!(curve.slope(), (491.52 - 111.4112) / 180.0, epsilon = 1e-4);
        assert_eq!(curve.duty(0, 0.0).unwrap(), 111);
        assert_eq!(curve.duty(0, 180.0).unwrap(), 491);
        // 111.41 + 8 * 2.1117 = 128.30; whole-count endpoints would give 127
        assert_eq!(curve.duty(0, 8.0).unwrap(), 128);
    }

    #[test]
    fn test_duty_rejects_negative_counter() {
        let curve = DutyCurve::new(&PulseTiming::default()).unwrap();
        let err = curve.duty(3, -90.0).unwrap_err();
        assert!(matches!(err, DriverError::DutyOutOfRange { channel: 3, .. }));
    }

    #[test]
    fn test_duty_back_to_raw() {
        let curve = DutyCurve::new(&PulseTiming::default()).unwrap();
        let duty = curve.duty(0, 45.0).unwrap();
        // Truncation to whole counts costs at most one count (~0.5 deg)
        assert_relative_eq!(curve.raw_angle(duty), 45.0, epsilon = 0.5);
    }
}

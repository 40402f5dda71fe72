// Servo driven straight from a PWM peripheral pin
//
// The raw angle is converted to a pulse width by linear interpolation between
// pulse_min_us and pulse_max_us, then scaled to the peripheral's duty resolution.
// THE WIDTH OF THE PULSE DRIVES THE ANGLE, NOT THE FREQUENCY.

use embedded_hal::pwm::SetDutyCycle;
use tracing::{debug, trace};

use super::driver::{DriverError, PulseTiming, PwmDriver};

/// One PWM pin serving exactly one servo channel
pub struct DirectPwm<P> {
    pin: P,
    channel: u8,
    timing: PulseTiming,
    pulse_ns: Option<u64>,
}

impl<P> DirectPwm<P>
where
    P: SetDutyCycle,
{
    pub fn new(pin: P, channel: u8, timing: PulseTiming) -> Result<Self, DriverError> {
        timing.validate()?;
        Ok(Self {
            pin,
            channel,
            timing,
            pulse_ns: None,
        })
    }

    /// Pulse width last written, if any
    pub fn pulse_ns(&self) -> Option<u64> {
        self.pulse_ns
    }

    pub fn into_inner(self) -> P {
        self.pin
    }

    fn check_channel(&self, channel: u8) -> Result<(), DriverError> {
        if channel != self.channel {
            return Err(DriverError::InvalidChannel { channel });
        }
        Ok(())
    }

    fn period_ns(&self) -> u64 {
        (self.timing.period_us() * 1000.0) as u64
    }
}

impl<P> PwmDriver for DirectPwm<P>
where
    P: SetDutyCycle,
{
    fn configure(&mut self, channel: u8, raw_angle_deg: f32) -> Result<(), DriverError> {
        self.check_channel(channel)?;

        let pulse_us = self.timing.pulse_us(raw_angle_deg);
        let period_ns = self.period_ns();
        let pulse_ns = (pulse_us * 1000.0) as i64;
        if pulse_ns <= 0 || pulse_ns as u64 >= period_ns {
            return Err(DriverError::DutyOutOfRange {
                channel,
                raw_angle: raw_angle_deg,
                duty: pulse_us,
                max: (period_ns / 1000) as u16,
            });
        }
        let pulse_ns = pulse_ns as u64;

        let max_duty = self.pin.max_duty_cycle() as u64;
        let duty = (pulse_ns * max_duty / period_ns) as u16;
        trace!(
            "Channel {}: raw={:.2} pulse={}ns duty={}/{}",
            channel, raw_angle_deg, pulse_ns, duty, max_duty
        );

        self.pin
            .set_duty_cycle(duty)
            .map_err(|e| DriverError::Pwm(format!("{:?}", e)))?;
        self.pulse_ns = Some(pulse_ns);
        Ok(())
    }

    fn read(&mut self, channel: u8) -> Result<f32, DriverError> {
        self.check_channel(channel)?;
        let pulse_ns = self.pulse_ns.ok_or(DriverError::NotConfigured { channel })?;
        Ok(self.timing.raw_angle_from_pulse_us(pulse_ns as f32 / 1000.0))
    }

    fn disable(&mut self, channel: u8) -> Result<(), DriverError> {
        self.check_channel(channel)?;
        debug!("Channel {}: duty 0", channel);
        self.pin
            .set_duty_cycle_fully_off()
            .map_err(|e| DriverError::Pwm(format!("{:?}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use embedded_hal::pwm::{ErrorKind, ErrorType};

    /// 16-bit duty register like most PWM peripherals
    struct FakePin {
        duty: u16,
    }

    impl ErrorType for FakePin {
        type Error = ErrorKind;
    }

    impl SetDutyCycle for FakePin {
        fn max_duty_cycle(&self) -> u16 {
            u16::MAX
        }

        fn set_duty_cycle(&mut self, duty: u16) -> Result<(), Self::Error> {
            self.duty = duty;
            Ok(())
        }
    }

    fn driver() -> DirectPwm<FakePin> {
        DirectPwm::new(FakePin { duty: 1 }, 16, PulseTiming::default()).unwrap()
    }

    #[test]
    fn test_pulse_width_interpolation() {
        let mut pwm = driver();

        pwm.configure(16, 0.0).unwrap();
        assert_eq!(pwm.pulse_ns(), Some(544_000));

        pwm.configure(16, 180.0).unwrap();
        assert_eq!(pwm.pulse_ns(), Some(2_400_000));

        // 2400us / 20000us of 65535
        assert_eq!(pwm.into_inner().duty, (2_400_000u64 * 65535 / 20_000_000) as u16);
    }

    #[test]
    fn test_read_back_raw_angle() {
        let mut pwm = driver();
        assert!(matches!(pwm.read(16), Err(DriverError::NotConfigured { channel: 16 })));

        pwm.configure(16, 72.5).unwrap();
        assert_relative_eq!(pwm.read(16).unwrap(), 72.5, epsilon = 0.01);
    }

    #[test]
    fn test_disable_sets_zero_duty() {
        let mut pwm = driver();
        pwm.configure(16, 90.0).unwrap();
        pwm.disable(16).unwrap();
        assert_eq!(pwm.into_inner().duty, 0);
    }

    #[test]
    fn test_other_channel_rejected() {
        let mut pwm = driver();
        assert!(matches!(
            pwm.configure(3, 90.0),
            Err(DriverError::InvalidChannel { channel: 3 })
        ));
    }

    #[test]
    fn test_negative_pulse_rejected() {
        let mut pwm = driver();
        assert!(matches!(
            pwm.configure(16, -200.0),
            Err(DriverError::DutyOutOfRange { .. })
        ));
    }
}

// PCA9685 16-channel I2C PWM expander
//
// Each channel owns a 4-byte register block at LED0_ON_L + 4 * channel:
// [ON_L, ON_H, OFF_L, OFF_H], little-endian 12-bit counters.
// Channels are driven with on-time = 0 and off-time = duty.

use std::thread::sleep;
use std::time::Duration;

use embedded_hal::i2c::{Error as _, I2c};
use tracing::{debug, info, trace};

use super::driver::{CHANNEL_COUNT, DriverError, DutyCurve, PulseTiming, PwmDriver};

/// Oscillator frequency of the internal clock
const OSCILLATOR_HZ: f32 = 25_000_000.0;
const COUNTER_STEPS: f32 = 4096.0;

/// Settle time after leaving sleep mode
const SETTLE_DELAY: Duration = Duration::from_micros(5);

/// Register addresses
#[repr(u8)]
#[derive(Debug, Clone, Copy)]
pub enum Register {
    Mode1 = 0x00,
    Led0OnL = 0x06,
    Prescale = 0xFE,
}

/// MODE1 bits
const MODE1_RESTART: u8 = 0x80;
const MODE1_AUTO_INCREMENT: u8 = 0x20;
const MODE1_SLEEP: u8 = 0x10;
const MODE1_ALLCALL: u8 = 0x01;

/// Valid prescale range from the datasheet
const PRESCALE_MIN: u8 = 3;

pub struct Pca9685<I2C> {
    i2c: I2C,
    address: u8,
    curve: DutyCurve,
}

impl<I2C> Pca9685<I2C>
where
    I2C: I2c,
{
    /// Reset the chip, program the PWM frequency and enable register auto-increment
    pub fn new(i2c: I2C, address: u8, timing: PulseTiming) -> Result<Self, DriverError> {
        let curve = DutyCurve::new(&timing)?;
        debug!(
            "Duty curve: offset {:.2}, slope {:.4} per degree",
            curve.offset(),
            curve.slope()
        );
        let mut pca = Self {
            i2c,
            address,
            curve,
        };

        info!(
            "Initializing PCA9685 at 0x{:02X} for {} Hz",
            address, timing.frequency_hz
        );
        pca.reset()?;
        pca.set_frequency(timing.frequency_hz)?;
        Ok(pca)
    }

    /// Clear MODE1
    pub fn reset(&mut self) -> Result<(), DriverError> {
        self.write_register(Register::Mode1, 0x00)
    }

    /// Program the prescaler. The chip must be asleep while the prescale register changes.
    pub fn set_frequency(&mut self, frequency_hz: f32) -> Result<(), DriverError> {
        let prescale = prescale_for(frequency_hz)?;
        debug!("PCA9685 prescale={} for {} Hz", prescale, frequency_hz);

        let old_mode = self.read_register(Register::Mode1)?;
        self.write_register(Register::Mode1, (old_mode & !MODE1_RESTART) | MODE1_SLEEP)?;
        self.write_register(Register::Prescale, prescale)?;
        self.write_register(Register::Mode1, old_mode)?;
        sleep(SETTLE_DELAY);
        self.write_register(
            Register::Mode1,
            old_mode | MODE1_RESTART | MODE1_AUTO_INCREMENT | MODE1_ALLCALL,
        )
    }

    /// Output frequency derived from the programmed prescale register
    pub fn frequency(&mut self) -> Result<f32, DriverError> {
        let prescale = self.read_register(Register::Prescale)?;
        Ok(OSCILLATOR_HZ / COUNTER_STEPS / prescale as f32)
    }

    /// Release the underlying bus
    pub fn into_inner(self) -> I2C {
        self.i2c
    }

    fn write_register(&mut self, register: Register, value: u8) -> Result<(), DriverError> {
        trace!("PCA9685 write reg={:?} value=0x{:02X}", register, value);
        self.i2c
            .write(self.address, &[register as u8, value])
            .map_err(|e| DriverError::I2c(e.kind()))
    }

    fn read_register(&mut self, register: Register) -> Result<u8, DriverError> {
        let mut buf = [0u8; 1];
        self.i2c
            .write_read(self.address, &[register as u8], &mut buf)
            .map_err(|e| DriverError::I2c(e.kind()))?;
        Ok(buf[0])
    }

    fn write_channel(&mut self, channel: u8, on: u16, off: u16) -> Result<(), DriverError> {
        let [on_l, on_h] = on.to_le_bytes();
        let [off_l, off_h] = off.to_le_bytes();
        let data = [channel_register(channel)?, on_l, on_h, off_l, off_h];
        self.i2c
            .write(self.address, &data)
            .map_err(|e| DriverError::I2c(e.kind()))
    }
}

impl<I2C> PwmDriver for Pca9685<I2C>
where
    I2C: I2c,
{
    fn configure(&mut self, channel: u8, raw_angle_deg: f32) -> Result<(), DriverError> {
        channel_register(channel)?;
        let duty = self.curve.duty(channel, raw_angle_deg)?;
        trace!("Channel {}: raw={:.2} duty={}", channel, raw_angle_deg, duty);
        self.write_channel(channel, 0, duty)
    }

    fn read(&mut self, channel: u8) -> Result<f32, DriverError> {
        let mut block = [0u8; 4];
        self.i2c
            .write_read(self.address, &[channel_register(channel)?], &mut block)
            .map_err(|e| DriverError::I2c(e.kind()))?;
        let duty = u16::from_le_bytes([block[2], block[3]]);
        Ok(self.curve.raw_angle(duty))
    }

    fn disable(&mut self, channel: u8) -> Result<(), DriverError> {
        debug!("Channel {}: output off", channel);
        self.write_channel(channel, 0, 0)
    }
}

/// prescale = round(osc / 4096 / freq)
fn prescale_for(frequency_hz: f32) -> Result<u8, DriverError> {
    if !(frequency_hz.is_finite() && frequency_hz > 0.0) {
        return Err(DriverError::InvalidTiming(format!(
            "frequency must be positive, got {} Hz",
            frequency_hz
        )));
    }
    let prescale = (OSCILLATOR_HZ / COUNTER_STEPS / frequency_hz).round();
    if prescale < PRESCALE_MIN as f32 || prescale > u8::MAX as f32 {
        return Err(DriverError::InvalidTiming(format!(
            "{} Hz needs prescale {}, outside {}..=255",
            frequency_hz, prescale, PRESCALE_MIN
        )));
    }
    Ok(prescale as u8)
}

fn channel_register(channel: u8) -> Result<u8, DriverError> {
    if channel >= CHANNEL_COUNT {
        return Err(DriverError::InvalidChannel { channel });
    }
    Ok(Register::Led0OnL as u8 + 4 * channel)
}

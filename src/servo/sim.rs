// In-memory PWM driver
//
// Records every write so simulation runs and tests can inspect exactly what would
// have reached the hardware. Bus failures can be injected per channel.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use super::driver::{DriverError, PwmDriver};

/// One recorded output event
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SimEvent {
    Configure { channel: u8, raw_angle: f32 },
    Disable { channel: u8 },
}

#[derive(Debug, Default)]
pub struct SimDriver {
    events: Vec<SimEvent>,
    outputs: HashMap<u8, f32>,
    failing: HashSet<u8>,
    fail_all: bool,
}

impl SimDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[SimEvent] {
        &self.events
    }

    /// Raw angles written by `configure`, in order, for every channel
    pub fn writes(&self) -> Vec<(u8, f32)> {
        self.events
            .iter()
            .filter_map(|event| match *event {
                SimEvent::Configure { channel, raw_angle } => Some((channel, raw_angle)),
                SimEvent::Disable { .. } => None,
            })
            .collect()
    }

    /// Raw angles written to one channel, in order
    pub fn channel_writes(&self, channel: u8) -> Vec<f32> {
        self.writes()
            .into_iter()
            .filter(|&(ch, _)| ch == channel)
            .map(|(_, raw)| raw)
            .collect()
    }

    /// Raw angle currently driven on `channel`, None if never written or disabled
    pub fn output(&self, channel: u8) -> Option<f32> {
        self.outputs.get(&channel).copied()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    /// Make every operation on `channel` fail until cleared
    pub fn fail_channel(&mut self, channel: u8, failing: bool) {
        if failing {
            self.failing.insert(channel);
        } else {
            self.failing.remove(&channel);
        }
    }

    /// Make every operation on every channel fail until cleared
    pub fn fail_all(&mut self, failing: bool) {
        self.fail_all = failing;
    }

    fn check(&self, channel: u8) -> Result<(), DriverError> {
        if self.fail_all || self.failing.contains(&channel) {
            return Err(DriverError::Injected { channel });
        }
        Ok(())
    }
}

impl PwmDriver for SimDriver {
    fn configure(&mut self, channel: u8, raw_angle_deg: f32) -> Result<(), DriverError> {
        self.check(channel)?;
        debug!("[sim] channel {} -> raw {:.2}", channel, raw_angle_deg);
        self.events.push(SimEvent::Configure {
            channel,
            raw_angle: raw_angle_deg,
        });
        self.outputs.insert(channel, raw_angle_deg);
        Ok(())
    }

    fn read(&mut self, channel: u8) -> Result<f32, DriverError> {
        self.check(channel)?;
        self.output(channel)
            .ok_or(DriverError::NotConfigured { channel })
    }

    fn disable(&mut self, channel: u8) -> Result<(), DriverError> {
        self.check(channel)?;
        debug!("[sim] channel {} off", channel);
        self.events.push(SimEvent::Disable { channel });
        self.outputs.remove(&channel);
        Ok(())
    }
}

// Single servo actuator
//
// Every motion funnels through write_angle, which is the only place that range-checks,
// talks to the driver and records the current logical angle.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, info};

use super::angle_map::AngleMap;
use super::driver::{self, DriverError, SharedDriver};
use super::gesture::GestureError;

/// Error types for servo motion
#[derive(Debug, thiserror::Error)]
pub enum ServoError {
    #[error("{servo}: angle {angle} is out of range [{start}, {end}]")]
    OutOfRange {
        servo: String,
        angle: f32,
        start: f32,
        end: f32,
    },

    #[error("{servo}: angle not initialized, write an angle first")]
    Uninitialized { servo: String },

    #[error("Invalid calibration: {0}")]
    InvalidCalibration(String),

    #[error("Invalid step: {0}")]
    InvalidStep(String),

    #[error("Expected {expected} angles, got {found}")]
    ShapeMismatch { expected: usize, found: usize },

    #[error("Servo index {index} does not exist in a group of {len}")]
    UnknownServo { index: usize, len: usize },

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error(transparent)]
    Gesture(#[from] GestureError),
}

/// Velocity-mode state
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionState {
    Stopped = 0,
    Increasing = 1,
    Decreasing = 2,
}

impl From<u8> for MotionState {
    fn from(value: u8) -> Self {
        match value {
            1 => MotionState::Increasing,
            2 => MotionState::Decreasing,
            _ => MotionState::Stopped,
        }
    }
}

/// Cloneable handle to a servo's velocity-mode state.
///
/// The command source holds a clone while the velocity loop owns the motor; the loop
/// observes changes at its next iteration.
#[derive(Debug, Clone)]
pub struct MotionControl {
    name: Arc<str>,
    state: Arc<AtomicU8>,
}

impl MotionControl {
    fn new(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            state: Arc::new(AtomicU8::new(MotionState::Stopped as u8)),
        }
    }

    pub fn state(&self) -> MotionState {
        MotionState::from(self.state.load(Ordering::Acquire))
    }

    pub fn start_increasing(&self) {
        self.set(MotionState::Increasing);
    }

    pub fn start_decreasing(&self) {
        self.set(MotionState::Decreasing);
    }

    pub fn stop(&self) {
        self.set(MotionState::Stopped);
    }

    pub fn set(&self, state: MotionState) {
        let previous = MotionState::from(self.state.swap(state as u8, Ordering::AcqRel));
        if previous != state {
            info!("{}: {:?} -> {:?}", self.name, previous, state);
        }
    }
}

pub struct ServoMotor {
    name: String,
    channel: u8,
    angle_map: AngleMap,
    angle_home: f32,
    current_angle: Option<f32>,
    motion: MotionControl,
    driver: SharedDriver,
}

impl ServoMotor {
    /// Create a servo on `channel` of `driver`. Nothing is written until the first move.
    pub fn new(
        name: impl Into<String>,
        channel: u8,
        angle_map: AngleMap,
        angle_home: f32,
        driver: SharedDriver,
    ) -> Result<Self, ServoError> {
        let name = name.into();
        let name = if name.is_empty() {
            format!("Servo {}", channel)
        } else {
            name
        };

        if !angle_map.in_range(angle_home) {
            return Err(ServoError::InvalidCalibration(format!(
                "{}: home angle {} is outside [{}, {}]",
                name,
                angle_home,
                angle_map.angle_start(),
                angle_map.angle_end()
            )));
        }

        let motion = MotionControl::new(&name);
        Ok(Self {
            name,
            channel,
            angle_map,
            angle_home,
            current_angle: None,
            motion,
            driver,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn channel(&self) -> u8 {
        self.channel
    }

    pub fn angle_map(&self) -> &AngleMap {
        &self.angle_map
    }

    pub fn angle_home(&self) -> f32 {
        self.angle_home
    }

    pub fn angle_start(&self) -> f32 {
        self.angle_map.angle_start()
    }

    pub fn angle_end(&self) -> f32 {
        self.angle_map.angle_end()
    }

    pub fn is_initialized(&self) -> bool {
        self.current_angle.is_some()
    }

    /// Current logical angle. Unknown until the first successful write.
    pub fn angle(&self) -> Result<f32, ServoError> {
        self.current_angle.ok_or_else(|| ServoError::Uninitialized {
            servo: self.name.clone(),
        })
    }

    pub fn raw_angle(&self) -> Result<f32, ServoError> {
        Ok(self.angle_map.to_raw(self.angle()?))
    }

    pub fn in_range(&self, angle: f32) -> bool {
        self.angle_map.in_range(angle)
    }

    pub fn check_range(&self, angle: f32) -> Result<(), ServoError> {
        if !self.in_range(angle) {
            return Err(ServoError::OutOfRange {
                servo: self.name.clone(),
                angle,
                start: self.angle_start(),
                end: self.angle_end(),
            });
        }
        Ok(())
    }

    /// Range-check, convert to raw and write. Updates the current angle only on success.
    pub fn write_angle(&mut self, angle: f32) -> Result<(), ServoError> {
        self.check_range(angle)?;
        let raw = self.angle_map.to_raw(angle);
        driver::lock(&self.driver).configure(self.channel, raw)?;
        self.current_angle = Some(angle);
        Ok(())
    }

    /// Move to `target` over `duration` in steps of roughly `step_size_deg`
    pub async fn move_to_angle(
        &mut self,
        target: f32,
        duration: Duration,
        step_size_deg: f32,
    ) -> Result<(), ServoError> {
        if !(step_size_deg.is_finite() && step_size_deg > 0.0) {
            return Err(ServoError::InvalidStep(format!(
                "step size must be positive, got {}",
                step_size_deg
            )));
        }
        self.check_range(target)?;

        // No known start: nothing to interpolate from
        let Some(start) = self.current_angle else {
            return self.write_angle(target);
        };

        let steps = ((target - start).abs() / step_size_deg).round().max(1.0) as u32;
        if duration.is_zero() || steps <= 1 {
            return self.write_angle(target);
        }

        let angle_inc = (target - start) / steps as f32;
        let time_inc = duration / (steps - 1);
        debug!(
            "{}: {} -> {} in {} steps of {:?}",
            self.name, start, target, steps, time_inc
        );

        for n in 1..=steps {
            let angle = if n == steps {
                target
            } else {
                start + n as f32 * angle_inc
            };
            self.write_angle(angle)?;
            if n < steps {
                sleep(time_inc).await;
            }
        }
        Ok(())
    }

    /// Jog by `delta`. Returns whether the servo moved; deltas that would leave the range
    /// are ignored.
    pub fn move_by(&mut self, delta: f32) -> Result<bool, ServoError> {
        let new_angle = self.angle()? + delta;
        if !self.in_range(new_angle) {
            debug!("{}: jog to {} ignored, out of range", self.name, new_angle);
            return Ok(false);
        }
        self.write_angle(new_angle)?;
        Ok(true)
    }

    pub async fn home(&mut self, duration: Duration, step_size_deg: f32) -> Result<(), ServoError> {
        self.move_to_angle(self.angle_home, duration, step_size_deg)
            .await
    }

    pub async fn move_to_start(
        &mut self,
        duration: Duration,
        step_size_deg: f32,
    ) -> Result<(), ServoError> {
        self.move_to_angle(self.angle_start(), duration, step_size_deg)
            .await
    }

    pub async fn move_to_end(
        &mut self,
        duration: Duration,
        step_size_deg: f32,
    ) -> Result<(), ServoError> {
        self.move_to_angle(self.angle_end(), duration, step_size_deg)
            .await
    }

    /// Handle for changing the velocity-mode state from another task
    pub fn motion_control(&self) -> MotionControl {
        self.motion.clone()
    }

    pub fn motion_state(&self) -> MotionState {
        self.motion.state()
    }

    pub fn start_increasing(&self) {
        self.motion.start_increasing();
    }

    pub fn start_decreasing(&self) {
        self.motion.start_decreasing();
    }

    pub fn stop(&self) {
        self.motion.stop();
    }

    /// De-energize the output. The logical angle is kept.
    pub fn off(&mut self) -> Result<(), ServoError> {
        info!("{}: off", self.name);
        driver::lock(&self.driver).disable(self.channel)?;
        Ok(())
    }
}

impl fmt::Display for ServoMotor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on channel {}: angle ", self.name, self.channel)?;
        match self.current_angle {
            Some(angle) => write!(f, "{}", angle)?,
            None => f.write_str("unknown")?,
        }
        write!(
            f,
            ", range {}..{}, home {}, raw_angle_0 {}, sign {}",
            self.angle_start(),
            self.angle_end(),
            self.angle_home,
            self.angle_map.raw_angle_0(),
            self.angle_map.sign()
        )
    }
}

impl fmt::Debug for ServoMotor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServoMotor")
            .field("name", &self.name)
            .field("channel", &self.channel)
            .field("angle_map", &self.angle_map)
            .field("angle_home", &self.angle_home)
            .field("current_angle", &self.current_angle)
            .field("motion_state", &self.motion.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::servo::angle_map::Sign;
    use crate::servo::driver::shared;
    use crate::servo::sim::SimDriver;
    use approx::assert_relative_eq;
    use std::sync::Mutex;

    fn servo(sim: &Arc<Mutex<SimDriver>>, start: f32, end: f32, home: f32) -> ServoMotor {
        let map = AngleMap::new(0.0, Sign::Positive, start, end).unwrap();
        ServoMotor::new("test", 3, map, home, sim.clone()).unwrap()
    }

    fn sim() -> Arc<Mutex<SimDriver>> {
        Arc::new(Mutex::new(SimDriver::new()))
    }

    #[test]
    fn test_angle_unknown_before_first_write() {
        let sim = sim();
        let motor = servo(&sim, 0.0, 180.0, 90.0);
        assert!(matches!(motor.angle(), Err(ServoError::Uninitialized { .. })));
        assert!(!motor.is_initialized());
    }

    #[test]
    fn test_write_angle_out_of_range_does_not_touch_driver() {
        let sim = sim();
        let mut motor = servo(&sim, 0.0, 90.0, 45.0);
        let err = motor.write_angle(91.0).unwrap_err();
        assert!(matches!(err, ServoError::OutOfRange { .. }));
        assert!(sim.lock().unwrap().writes().is_empty());
        assert!(!motor.is_initialized());
    }

    #[test]
    fn test_reversed_mount_raw_angles() {
        let sim = sim();
        let map = AngleMap::new(90.0, Sign::Negative, 0.0, 180.0).unwrap();
        let mut motor = ServoMotor::new("flipped", 0, map, 90.0, sim.clone()).unwrap();

        motor.write_angle(0.0).unwrap();
        motor.write_angle(180.0).unwrap();
        assert_eq!(sim.lock().unwrap().channel_writes(0), vec![90.0, -90.0]);
        assert_eq!(motor.raw_angle().unwrap(), -90.0);
    }

    #[test]
    fn test_home_must_be_in_range() {
        let map = AngleMap::new(0.0, Sign::Positive, 0.0, 90.0).unwrap();
        let result = ServoMotor::new("bad", 0, map, 120.0, shared(SimDriver::new()));
        assert!(matches!(result, Err(ServoError::InvalidCalibration(_))));
    }

    #[test]
    fn test_move_by_requires_initialization() {
        let sim = sim();
        let mut motor = servo(&sim, 0.0, 180.0, 90.0);
        assert!(matches!(motor.move_by(1.0), Err(ServoError::Uninitialized { .. })));

        motor.write_angle(170.0).unwrap();
        assert!(motor.move_by(5.0).unwrap());
        assert_eq!(motor.angle().unwrap(), 175.0);

        // Would leave the range: silently ignored
        assert!(!motor.move_by(10.0).unwrap());
        assert_eq!(motor.angle().unwrap(), 175.0);
        assert_eq!(sim.lock().unwrap().writes().len(), 2);
    }

    #[test]
    fn test_bus_failure_keeps_previous_angle() {
        let sim = sim();
        let mut motor = servo(&sim, 0.0, 180.0, 90.0);
        motor.write_angle(30.0).unwrap();

        sim.lock().unwrap().fail_channel(3, true);
        assert!(matches!(motor.write_angle(40.0), Err(ServoError::Driver(_))));
        assert_eq!(motor.angle().unwrap(), 30.0);
    }

    #[test]
    fn test_off_keeps_logical_angle() {
        let sim = sim();
        let mut motor = servo(&sim, 0.0, 180.0, 90.0);
        motor.write_angle(60.0).unwrap();
        motor.off().unwrap();
        assert_eq!(motor.angle().unwrap(), 60.0);
        assert_eq!(sim.lock().unwrap().output(3), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_move_to_angle_steps_linearly() {
        let sim = sim();
        let mut motor = servo(&sim, 0.0, 180.0, 90.0);
        motor.write_angle(0.0).unwrap();

        let started = tokio::time::Instant::now();
        motor
            .move_to_angle(10.0, Duration::from_millis(900), 1.0)
            .await
            .unwrap();

        let writes = sim.lock().unwrap().channel_writes(3);
        // initial write + 10 steps
        assert_eq!(writes.len(), 11);
        for (n, raw) in writes.iter().enumerate() {
            assert_relative_eq!(*raw, n as f32, epsilon = 1e-4);
        }
        // 10 steps -> 9 sleeps of 100ms
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(900) && elapsed < Duration::from_millis(950));
        assert_eq!(motor.angle().unwrap(), 10.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_move_to_angle_degenerates_to_single_write() {
        let sim = sim();
        let mut motor = servo(&sim, 0.0, 180.0, 90.0);
        motor.write_angle(50.0).unwrap();

        // zero duration
        motor.move_to_angle(80.0, Duration::ZERO, 1.0).await.unwrap();
        // single step
        motor
            .move_to_angle(80.5, Duration::from_secs(1), 1.0)
            .await
            .unwrap();
        assert_eq!(sim.lock().unwrap().channel_writes(3), vec![50.0, 80.0, 80.5]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_move_to_angle_uninitialized_writes_target() {
        let sim = sim();
        let mut motor = servo(&sim, 0.0, 180.0, 90.0);
        motor.home(Duration::from_secs(2), 1.0).await.unwrap();
        assert_eq!(sim.lock().unwrap().channel_writes(3), vec![90.0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_move_to_angle_rejects_target_before_writing() {
        let sim = sim();
        let mut motor = servo(&sim, -45.0, 45.0, 0.0);
        motor.write_angle(0.0).unwrap();

        let err = motor
            .move_to_angle(60.0, Duration::from_secs(1), 1.0)
            .await
            .unwrap_err();
        assert!(matches!(err, ServoError::OutOfRange { .. }));
        assert_eq!(sim.lock().unwrap().writes().len(), 1);
        assert_eq!(motor.angle().unwrap(), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_move_aborts_on_bus_failure() {
        let sim = sim();
        let mut motor = servo(&sim, 0.0, 180.0, 90.0);
        motor.write_angle(0.0).unwrap();
        sim.lock().unwrap().fail_all(true);

        let err = motor
            .move_to_angle(90.0, Duration::from_secs(1), 1.0)
            .await
            .unwrap_err();
        assert!(matches!(err, ServoError::Driver(DriverError::Injected { .. })));
        assert_eq!(motor.angle().unwrap(), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_and_end_wrappers() {
        let sim = sim();
        let mut motor = servo(&sim, 20.0, 160.0, 90.0);
        motor.move_to_start(Duration::ZERO, 1.0).await.unwrap();
        assert_eq!(motor.angle().unwrap(), 20.0);
        motor.move_to_end(Duration::ZERO, 1.0).await.unwrap();
        assert_eq!(motor.angle().unwrap(), 160.0);
    }

    #[tokio::test]
    async fn test_invalid_step_size() {
        let sim = sim();
        let mut motor = servo(&sim, 0.0, 180.0, 90.0);
        let err = motor
            .move_to_angle(10.0, Duration::from_secs(1), 0.0)
            .await
            .unwrap_err();
        assert!(matches!(err, ServoError::InvalidStep(_)));
    }

    #[test]
    fn test_motion_state_transitions() {
        let sim = sim();
        let motor = servo(&sim, 0.0, 180.0, 90.0);
        let control = motor.motion_control();
        assert_eq!(motor.motion_state(), MotionState::Stopped);

        motor.start_increasing();
        assert_eq!(control.state(), MotionState::Increasing);

        // direct reversal without stopping first
        control.start_decreasing();
        assert_eq!(motor.motion_state(), MotionState::Decreasing);

        motor.stop();
        assert_eq!(control.state(), MotionState::Stopped);
    }

    #[test]
    fn test_display_summary() {
        let sim = sim();
        let mut motor = servo(&sim, 0.0, 180.0, 90.0);
        assert!(motor.to_string().contains("angle unknown"));
        motor.write_angle(12.0).unwrap();
        assert!(motor.to_string().starts_with("test on channel 3: angle 12"));
    }
}

// Continuous velocity-mode motion
//
// A held joystick axis becomes a stream of small move_by steps. The loop never ends on
// its own; errors only stop the motion.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::sleep;
use tracing::{error, info};

use super::motor::{MotionControl, MotionState, ServoError, ServoMotor};
use crate::feedback::StatusSink;

impl ServoMotor {
    /// One velocity-mode iteration: step by `angle_inc` in the current direction.
    ///
    /// Returns whether a write happened.
    pub fn jog_step(&mut self, angle_inc: f32) -> Result<bool, ServoError> {
        let sign = self.angle_map().sign().as_f32();
        match self.motion_state() {
            MotionState::Increasing => self.move_by(sign * angle_inc),
            MotionState::Decreasing => self.move_by(-sign * angle_inc),
            MotionState::Stopped => Ok(false),
        }
    }

    /// Poll the motion state every `interval` and jog while it is not Stopped.
    ///
    /// Any error is logged, reported to `status`, and forces the state back to Stopped.
    pub async fn run_velocity_loop(
        &mut self,
        angle_inc: f32,
        interval: Duration,
        status: &dyn StatusSink,
    ) {
        loop {
            if let Err(e) = self.jog_step(angle_inc) {
                error!("{}: velocity loop error: {}", self.name(), e);
                status.error(&format!("{}: {}", self.name(), e));
                self.stop();
            }
            sleep(interval).await;
        }
    }
}

/// Velocity loop running as its own task, owning one motor until shut down
pub struct JogTask {
    control: MotionControl,
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<ServoMotor>,
}

impl JogTask {
    pub fn spawn(
        motor: ServoMotor,
        angle_inc: f32,
        interval: Duration,
        status: Arc<dyn StatusSink>,
    ) -> Self {
        let control = motor.motion_control();
        let (shutdown, mut shutdown_rx) = oneshot::channel();

        let handle = tokio::spawn(async move {
            let mut motor = motor;
            info!("{}: velocity loop started", motor.name());
            tokio::select! {
                _ = motor.run_velocity_loop(angle_inc, interval, status.as_ref()) => {}
                _ = &mut shutdown_rx => {}
            }
            motor.stop();
            info!("{}: velocity loop finished", motor.name());
            motor
        });

        Self {
            control,
            shutdown,
            handle,
        }
    }

    pub fn control(&self) -> MotionControl {
        self.control.clone()
    }

    /// Stop the loop and take the motor back
    pub async fn shutdown(self) -> Result<ServoMotor, JoinError> {
        // Receiver already gone means the task ended on its own
        let _ = self.shutdown.send(());
        self.handle.await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feedback::TracingStatus;
    use crate::servo::angle_map::{AngleMap, Sign};
    use crate::servo::sim::SimDriver;
    use approx::assert_relative_eq;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingStatus {
        errors: AtomicUsize,
    }

    impl StatusSink for CountingStatus {
        fn connected(&self) {}
        fn disconnected(&self) {}
        fn error(&self, _message: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn motor(sim: &Arc<Mutex<SimDriver>>, sign: Sign) -> ServoMotor {
        let map = AngleMap::new(90.0, sign, -90.0, 90.0).unwrap();
        ServoMotor::new("jog", 1, map, 0.0, sim.clone()).unwrap()
    }

    #[test]
    fn test_jog_step_follows_sign() {
        let sim = Arc::new(Mutex::new(SimDriver::new()));
        let mut reversed = motor(&sim, Sign::Negative);
        reversed.write_angle(0.0).unwrap();

        reversed.start_increasing();
        assert!(reversed.jog_step(2.0).unwrap());
        assert_eq!(reversed.angle().unwrap(), -2.0);

        reversed.start_decreasing();
        reversed.jog_step(2.0).unwrap();
        reversed.jog_step(2.0).unwrap();
        assert_eq!(reversed.angle().unwrap(), 2.0);

        reversed.stop();
        assert!(!reversed.jog_step(2.0).unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_writes_match_iterations_until_stopped() {
        let sim = Arc::new(Mutex::new(SimDriver::new()));
        let mut servo = motor(&sim, Sign::Positive);
        servo.write_angle(0.0).unwrap();

        let task = JogTask::spawn(
            servo,
            2.0,
            Duration::from_millis(10),
            Arc::new(TracingStatus),
        );
        let control = task.control();

        control.start_increasing();
        sleep(Duration::from_millis(95)).await;
        control.stop();
        // let the loop observe the stop
        sleep(Duration::from_millis(20)).await;
        let writes_at_stop = sim.lock().unwrap().writes().len();

        sleep(Duration::from_millis(500)).await;
        assert_eq!(sim.lock().unwrap().writes().len(), writes_at_stop);

        let servo = task.shutdown().await.unwrap();
        let jog_writes = writes_at_stop - 1;
        assert!((9..=11).contains(&jog_writes), "jog writes {}", jog_writes);
        assert_relative_eq!(servo.angle().unwrap(), 2.0 * jog_writes as f32);
        assert_eq!(servo.motion_state(), MotionState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_jog_holds_at_range_end() {
        let sim = Arc::new(Mutex::new(SimDriver::new()));
        let mut servo = motor(&sim, Sign::Positive);
        servo.write_angle(85.0).unwrap();

        let task = JogTask::spawn(
            servo,
            2.0,
            Duration::from_millis(10),
            Arc::new(TracingStatus),
        );
        task.control().start_increasing();
        sleep(Duration::from_millis(200)).await;

        // Still increasing, but pinned below the end of the range
        assert_eq!(task.control().state(), MotionState::Increasing);
        let servo = task.shutdown().await.unwrap();
        assert_eq!(servo.angle().unwrap(), 89.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bus_error_stops_motion_but_not_loop() {
        let sim = Arc::new(Mutex::new(SimDriver::new()));
        let mut servo = motor(&sim, Sign::Positive);
        servo.write_angle(0.0).unwrap();
        sim.lock().unwrap().fail_channel(1, true);

        let status = Arc::new(CountingStatus::default());
        let task = JogTask::spawn(servo, 2.0, Duration::from_millis(10), status.clone());

        task.control().start_increasing();
        sleep(Duration::from_millis(50)).await;
        assert_eq!(task.control().state(), MotionState::Stopped);
        assert_eq!(status.errors.load(Ordering::SeqCst), 1);

        // The loop is still alive and resumes once the bus recovers
        sim.lock().unwrap().fail_channel(1, false);
        task.control().start_decreasing();
        sleep(Duration::from_millis(25)).await;
        let servo = task.shutdown().await.unwrap();
        assert!(servo.angle().unwrap() < 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_uninitialized_motor_stops_loop_motion() {
        let sim = Arc::new(Mutex::new(SimDriver::new()));
        let servo = motor(&sim, Sign::Positive);

        let status = Arc::new(CountingStatus::default());
        let task = JogTask::spawn(servo, 2.0, Duration::from_millis(10), status.clone());
        task.control().start_increasing();
        sleep(Duration::from_millis(30)).await;

        assert_eq!(task.control().state(), MotionState::Stopped);
        assert_eq!(status.errors.load(Ordering::SeqCst), 1);
        assert!(sim.lock().unwrap().writes().is_empty());
        task.shutdown().await.unwrap();
    }
}

// Timeouts, topics, servo timing defaults
use std::time::Duration;

// Runtime loop frequency
pub const LOOP_HZ: u64 = 50;

// Jog commands older than this stop every jogging servo
pub const CMD_TIMEOUT: Duration = Duration::from_millis(250);

// Velocity-mode loop: poll interval and degrees per iteration
pub const JOG_INTERVAL: Duration = Duration::from_millis(10);
pub const JOG_ANGLE_INC: f32 = 2.0;

// Default step size for timed single-servo moves (degrees)
pub const DEFAULT_STEP_DEG: f32 = 1.0;

// Default number of lock-step increments for group moves
pub const DEFAULT_GROUP_STEPS: usize = 100;

// Servo pulse timing
pub const DEFAULT_FREQUENCY_HZ: f32 = 50.0;
pub const DEFAULT_PULSE_MIN_US: f32 = 544.0;
pub const DEFAULT_PULSE_MAX_US: f32 = 2400.0;
pub const DEFAULT_MAX_SPAN_DEG: f32 = 180.0;

// PCA9685 on the default I2C bus
pub const PCA9685_ADDRESS: u8 = 0x40;
pub const I2C_BUS: &str = "/dev/i2c-1";

// Zenoh topics
pub const TOPIC_CMD_JOG: &str = "servo/cmd/jog"; // velocity-mode commands
pub const TOPIC_CMD_POSITION: &str = "servo/cmd/position"; // named positions
pub const TOPIC_CMD_GESTURE: &str = "servo/cmd/gesture"; // gesture playback
pub const TOPIC_CMD_OFF: &str = "servo/cmd/off"; // de-energize all outputs
pub const TOPIC_HEALTH: &str = "servo/state/health"; // health status

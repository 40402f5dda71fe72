// Servo motion control
//
// Provides:
// - Logical <-> raw angle mapping per servo
// - PWM driver backends (PCA9685 over I2C, direct PWM pin, in-memory simulation)
// - Single-servo motion, velocity-mode jogging, claw mechanisms
// - Multi-servo groups, named positions and gestures

pub mod angle_map;
pub mod direct;
pub mod driver;
pub mod gesture;
pub mod group;
pub mod jog;
pub mod mechanism;
pub mod motor;
pub mod pca9685;
pub mod sim;

pub use angle_map::{AngleMap, Sign};
pub use direct::DirectPwm;
pub use driver::{DriverError, PulseTiming, PwmDriver, SharedDriver, shared};
pub use gesture::{Gesture, GestureError};
pub use group::{Movement, Position, PositionBook, PositionId, ServoGroup};
pub use jog::JogTask;
pub use mechanism::{Gripper, Lifter};
pub use motor::{MotionControl, MotionState, ServoError, ServoMotor};
pub use pca9685::Pca9685;
pub use sim::{SimDriver, SimEvent};

// Message types exchanged with the runtime

use serde::{Deserialize, Serialize};

use crate::servo::MotionState;

/// Direction of a velocity-mode command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JogDirection {
    Increase,
    Decrease,
    Stop,
}

impl JogDirection {
    /// Map a raw joystick axis reading to a direction.
    ///
    /// Readings within `deadband` of `center` mean Stop; above is Increase, below Decrease.
    pub fn from_axis(raw: i32, center: i32, deadband: i32) -> Self {
        let offset = raw - center;
        if offset > deadband {
            JogDirection::Increase
        } else if offset < -deadband {
            JogDirection::Decrease
        } else {
            JogDirection::Stop
        }
    }
}

impl From<JogDirection> for MotionState {
    fn from(direction: JogDirection) -> Self {
        match direction {
            JogDirection::Increase => MotionState::Increasing,
            JogDirection::Decrease => MotionState::Decreasing,
            JogDirection::Stop => MotionState::Stopped,
        }
    }
}

// Teleop -> runtime, repeated while an axis is held
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JogCommand {
    pub servo: String,
    pub direction: JogDirection,
}

// Move the whole group to a named position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionCommand {
    pub position: String,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub steps: Option<usize>,
}

// Play a named gesture
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GestureCommand {
    pub gesture: String,
    pub duration_ms: u64,
    pub num_steps: usize,
    #[serde(default = "one")]
    pub repeat: usize,
}

fn one() -> usize {
    1
}

/// Health status published by runtime
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeHealth {
    Ok,
    CmdStale,
    Fault,
}

#[cfg(test)]
mod tests {
    use super::*;

    // Claw joystick: centred around 13447 with a +-400 dead band
    const CENTER: i32 = 13447;
    const DEADBAND: i32 = 400;

    #[test]
    fn test_axis_mapping() {
        assert_eq!(JogDirection::from_axis(CENTER, CENTER, DEADBAND), JogDirection::Stop);
        assert_eq!(JogDirection::from_axis(CENTER + 400, CENTER, DEADBAND), JogDirection::Stop);
        assert_eq!(JogDirection::from_axis(CENTER + 401, CENTER, DEADBAND), JogDirection::Increase);
        assert_eq!(JogDirection::from_axis(0, CENTER, DEADBAND), JogDirection::Decrease);
        assert_eq!(MotionState::from(JogDirection::Decrease), MotionState::Decreasing);
    }

    #[test]
    fn test_command_json() {
        let jog: JogCommand =
            serde_json::from_str(r#"{"servo": "gripper", "direction": "increase"}"#).unwrap();
        assert_eq!(jog.direction, JogDirection::Increase);

        let position: PositionCommand = serde_json::from_str(r#"{"position": "stand"}"#).unwrap();
        assert_eq!(position.duration_ms, 0);
        assert_eq!(position.steps, None);

        let gesture: GestureCommand =
            serde_json::from_str(r#"{"gesture": "wave", "duration_ms": 2000, "num_steps": 40}"#)
                .unwrap();
        assert_eq!(gesture.repeat, 1);

        assert_eq!(
            serde_json::to_string(&RuntimeHealth::CmdStale).unwrap(),
            "\"cmd_stale\""
        );
    }
}

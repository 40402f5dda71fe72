// Named wrappers for single-servo mechanisms on the claw
//
// Gripper: start = closed, end = open.
// Lifter: start = top, end = bottom.

use std::ops::{Deref, DerefMut};
use std::time::Duration;

use super::motor::{ServoError, ServoMotor};

pub struct Gripper(ServoMotor);

impl Gripper {
    pub fn new(servo: ServoMotor) -> Self {
        Self(servo)
    }

    pub async fn open(&mut self, duration: Duration, step_size_deg: f32) -> Result<(), ServoError> {
        self.0.move_to_end(duration, step_size_deg).await
    }

    pub async fn close(&mut self, duration: Duration, step_size_deg: f32) -> Result<(), ServoError> {
        self.0.move_to_start(duration, step_size_deg).await
    }

    pub fn start_open(&self) {
        self.0.start_increasing();
    }

    pub fn start_close(&self) {
        self.0.start_decreasing();
    }

    pub fn into_inner(self) -> ServoMotor {
        self.0
    }
}

impl Deref for Gripper {
    type Target = ServoMotor;

    fn deref(&self) -> &ServoMotor {
        &self.0
    }
}

impl DerefMut for Gripper {
    fn deref_mut(&mut self) -> &mut ServoMotor {
        &mut self.0
    }
}

pub struct Lifter(ServoMotor);

impl Lifter {
    pub fn new(servo: ServoMotor) -> Self {
        Self(servo)
    }

    pub async fn lift(&mut self, duration: Duration, step_size_deg: f32) -> Result<(), ServoError> {
        self.0.move_to_start(duration, step_size_deg).await
    }

    pub async fn lower(&mut self, duration: Duration, step_size_deg: f32) -> Result<(), ServoError> {
        self.0.move_to_end(duration, step_size_deg).await
    }

    pub fn start_lift(&self) {
        self.0.start_decreasing();
    }

    pub fn start_lower(&self) {
        self.0.start_increasing();
    }

    pub fn into_inner(self) -> ServoMotor {
        self.0
    }
}

impl Deref for Lifter {
    type Target = ServoMotor;

    fn deref(&self) -> &ServoMotor {
        &self.0
    }
}

impl DerefMut for Lifter {
    fn deref_mut(&mut self) -> &mut ServoMotor {
        &mut self.0
    }
}

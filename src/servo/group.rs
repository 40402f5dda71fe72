// Ordered set of servos moved together
//
// Servo order defines the index space used by Position and Gesture.

use std::collections::HashMap;
use std::fmt;
use std::ops::Index;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::{Instant, sleep};
use tracing::{debug, info};

use super::gesture::Gesture;
use super::motor::{ServoError, ServoMotor};
use crate::config::DEFAULT_STEP_DEG;

/// One named snapshot of target angles, index-aligned with a group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub name: String,
    pub angles: Vec<f32>,
}

impl Position {
    pub fn new(name: impl Into<String>, angles: Vec<f32>) -> Self {
        Self {
            name: name.into(),
            angles,
        }
    }

    pub fn len(&self) -> usize {
        self.angles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.angles.is_empty()
    }
}

impl Index<usize> for Position {
    type Output = f32;

    fn index(&self, index: usize) -> &f32 {
        &self.angles[index]
    }
}

/// Identifier handed out by a PositionBook
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PositionId(pub u32);

/// Registry of named positions; owns its id counter
#[derive(Debug, Default)]
pub struct PositionBook {
    next_id: u32,
    positions: Vec<(PositionId, Position)>,
    by_name: HashMap<String, usize>,
}

impl PositionBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `position`, replacing any earlier one with the same name
    pub fn insert(&mut self, position: Position) -> PositionId {
        let id = PositionId(self.next_id);
        self.next_id += 1;

        match self.by_name.get(&position.name) {
            Some(&slot) => self.positions[slot] = (id, position),
            None => {
                self.by_name
                    .insert(position.name.clone(), self.positions.len());
                self.positions.push((id, position));
            }
        }
        id
    }

    pub fn get(&self, name: &str) -> Option<&Position> {
        self.by_name.get(name).map(|&slot| &self.positions[slot].1)
    }

    pub fn get_by_id(&self, id: PositionId) -> Option<&Position> {
        self.positions
            .iter()
            .find(|(pid, _)| *pid == id)
            .map(|(_, position)| position)
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Position> {
        self.positions.iter().map(|(_, position)| position)
    }
}

/// Sequence of positions, each reached over its own duration
#[derive(Debug, Clone, PartialEq)]
pub struct Movement {
    name: String,
    positions: Vec<Position>,
    times: Vec<Duration>,
}

impl Movement {
    /// Without `times`, the n-th position is reached over n seconds
    pub fn new(
        name: impl Into<String>,
        positions: Vec<Position>,
        times: Vec<Duration>,
    ) -> Result<Self, ServoError> {
        let times = if times.is_empty() {
            (0..positions.len() as u64).map(Duration::from_secs).collect()
        } else if times.len() != positions.len() {
            return Err(ServoError::ShapeMismatch {
                expected: positions.len(),
                found: times.len(),
            });
        } else {
            times
        };

        Ok(Self {
            name: name.into(),
            positions,
            times,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<(Duration, &Position)> {
        Some((*self.times.get(index)?, self.positions.get(index)?))
    }

    pub fn iter(&self) -> impl Iterator<Item = (Duration, &Position)> {
        self.times.iter().copied().zip(&self.positions)
    }
}

/// Duration only divides by u32
fn step_count(steps: usize) -> Result<u32, ServoError> {
    u32::try_from(steps)
        .map_err(|_| ServoError::InvalidStep(format!("{} steps is too many", steps)))
}

#[derive(Debug)]
pub struct ServoGroup {
    name: String,
    servos: Vec<ServoMotor>,
}

impl ServoGroup {
    pub fn new(name: impl Into<String>, servos: Vec<ServoMotor>) -> Self {
        Self {
            name: name.into(),
            servos,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.servos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servos.is_empty()
    }

    pub fn servos(&self) -> &[ServoMotor] {
        &self.servos
    }

    pub fn servo(&self, index: usize) -> Option<&ServoMotor> {
        self.servos.get(index)
    }

    pub fn servo_mut(&mut self, index: usize) -> Option<&mut ServoMotor> {
        self.servos.get_mut(index)
    }

    pub fn position_of(&self, name: &str) -> Option<usize> {
        self.servos.iter().position(|servo| servo.name() == name)
    }

    /// Hand the servos back, e.g. to run them in separate velocity loops
    pub fn into_servos(self) -> Vec<ServoMotor> {
        self.servos
    }

    pub fn angles(&self) -> Result<Vec<f32>, ServoError> {
        self.servos.iter().map(ServoMotor::angle).collect()
    }

    pub fn raw_angles(&self) -> Result<Vec<f32>, ServoError> {
        self.servos.iter().map(ServoMotor::raw_angle).collect()
    }

    pub fn get_home_position(&self) -> Position {
        self.project("home", ServoMotor::angle_home)
    }

    pub fn get_start_position(&self) -> Position {
        self.project("start", ServoMotor::angle_start)
    }

    pub fn get_end_position(&self) -> Position {
        self.project("end", ServoMotor::angle_end)
    }

    fn project(&self, label: &str, angle: fn(&ServoMotor) -> f32) -> Position {
        Position::new(
            format!("{} {}", self.name, label),
            self.servos.iter().map(angle).collect(),
        )
    }

    /// Shape and range check for a full set of angles. Nothing is written.
    pub fn check_angles(&self, angles: &[f32]) -> Result<(), ServoError> {
        if angles.len() != self.servos.len() {
            return Err(ServoError::ShapeMismatch {
                expected: self.servos.len(),
                found: angles.len(),
            });
        }
        for (servo, &angle) in self.servos.iter().zip(angles) {
            servo.check_range(angle)?;
        }
        Ok(())
    }

    /// Write every servo immediately, after checking the whole request
    pub fn set_angles(&mut self, angles: &[f32]) -> Result<(), ServoError> {
        self.check_angles(angles)?;
        for (servo, &angle) in self.servos.iter_mut().zip(angles) {
            servo.write_angle(angle)?;
        }
        Ok(())
    }

    /// Move all servos to `position` in lock-step over `duration`.
    ///
    /// Rejected requests fail before any servo is written.
    pub async fn move_to_position(
        &mut self,
        position: &Position,
        duration: Duration,
        steps: usize,
    ) -> Result<(), ServoError> {
        self.check_angles(&position.angles)?;
        let step_count = step_count(steps)?;

        if steps <= 1 || duration.is_zero() {
            info!("{}: -> {} (immediate)", self.name, position.name);
            return self.set_angles(&position.angles);
        }

        let start = self.angles()?;
        let increments: Vec<f32> = position
            .angles
            .iter()
            .zip(&start)
            .map(|(target, current)| (target - current) / steps as f32)
            .collect();
        let time_per_step = duration / step_count;
        info!(
            "{}: -> {} in {} steps over {:?}",
            self.name, position.name, steps, duration
        );

        for n in 1..=steps {
            for (i, servo) in self.servos.iter_mut().enumerate() {
                let angle = if n == steps {
                    position.angles[i]
                } else {
                    start[i] + n as f32 * increments[i]
                };
                servo.write_angle(angle)?;
            }
            debug!("{}: step {}/{}", self.name, n, steps);
            sleep(time_per_step).await;
        }
        Ok(())
    }

    /// Visit each position of `movement` in turn, each move taking its own time.
    ///
    /// Every position is checked against the group before the first write.
    pub async fn execute_movement(
        &mut self,
        movement: &Movement,
        steps: usize,
    ) -> Result<(), ServoError> {
        step_count(steps)?;
        for (_, position) in movement.iter() {
            self.check_angles(&position.angles)?;
        }

        info!(
            "{}: movement '{}' through {} positions",
            self.name,
            movement.name(),
            movement.len()
        );
        for (duration, position) in movement.iter() {
            self.move_to_position(position, duration, steps).await?;
        }
        Ok(())
    }

    /// Play `gesture` `repeat` times, sampling it `num_steps + 1` times per pass
    pub async fn execute(
        &mut self,
        gesture: &Gesture,
        duration: Duration,
        num_steps: usize,
        repeat: usize,
    ) -> Result<(), ServoError> {
        if num_steps == 0 {
            return Err(ServoError::InvalidStep(
                "gesture playback needs at least one step".to_string(),
            ));
        }
        let step_count = step_count(num_steps)?;
        self.check_gesture(gesture)?;

        let step_budget = duration / step_count;
        info!(
            "{}: gesture '{}' x{} over {:?} in {} steps",
            self.name,
            gesture.name(),
            repeat,
            duration,
            num_steps
        );

        for pass in 0..repeat {
            for n in 0..=num_steps {
                let started = Instant::now();
                let t = n as f32 / num_steps as f32;
                let angles = gesture.angles_at(t)?;
                for (&index, &angle) in gesture.servo_indices().iter().zip(&angles) {
                    self.servos[index].write_angle(angle)?;
                }
                let elapsed = started.elapsed();
                debug!(
                    "{}: pass {} t={:.3} writes took {:?}",
                    self.name, pass, t, elapsed
                );
                sleep(step_budget.saturating_sub(elapsed)).await;
            }
        }
        Ok(())
    }

    /// Every referenced servo must exist and every knot angle must be in its range.
    /// Interpolated angles then stay in range too.
    pub fn check_gesture(&self, gesture: &Gesture) -> Result<(), ServoError> {
        gesture.validate()?;
        for (k, &index) in gesture.servo_indices().iter().enumerate() {
            let servo = self.servos.get(index).ok_or(ServoError::UnknownServo {
                index,
                len: self.servos.len(),
            })?;
            for &angle in gesture.angles(k).unwrap_or_default() {
                servo.check_range(angle)?;
            }
        }
        Ok(())
    }

    pub async fn home(&mut self) -> Result<(), ServoError> {
        for servo in &mut self.servos {
            servo.home(Duration::ZERO, DEFAULT_STEP_DEG).await?;
        }
        Ok(())
    }

    /// De-energize every output
    pub fn off(&mut self) -> Result<(), ServoError> {
        for servo in &mut self.servos {
            servo.off()?;
        }
        Ok(())
    }
}

impl fmt::Display for ServoGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: [", self.name)?;
        for (i, servo) in self.servos.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            match servo.angle() {
                Ok(angle) => write!(f, "{}", angle)?,
                Err(_) => f.write_str("?")?,
            }
        }
        f.write_str("]")
    }
}

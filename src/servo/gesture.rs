// Time-parameterized multi-servo trajectories
//
// A gesture samples a set of servos at normalized time knots in [0, 1] and is
// piecewise-linear between knots.

use std::collections::HashSet;
use std::ops::Add;

use serde::{Deserialize, Serialize};

use super::driver::CHANNEL_COUNT;

/// Error types for gesture data and playback
#[derive(Debug, thiserror::Error)]
pub enum GestureError {
    #[error("Time {t} is outside [{start}, {end}]")]
    OutOfDomain { t: f32, start: f32, end: f32 },

    #[error("Malformed gesture '{name}': {reason}")]
    Malformed { name: String, reason: String },

    #[error("Cannot chain '{first}' and '{second}': servo indices differ")]
    Incompatible { first: String, second: String },

}

/// Immutable, validated trajectory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "GestureData")]
pub struct Gesture {
    name: String,
    time_knots: Vec<f32>,
    servo_indices: Vec<usize>,
    angles: Vec<Vec<f32>>,
}

/// Unchecked wire form; every deserialized gesture goes through `Gesture::new`
#[derive(Deserialize)]
struct GestureData {
    name: String,
    time_knots: Vec<f32>,
    servo_indices: Vec<usize>,
    angles: Vec<Vec<f32>>,
}

impl TryFrom<GestureData> for Gesture {
    type Error = GestureError;

    fn try_from(data: GestureData) -> Result<Self, Self::Error> {
        Gesture::new(data.name, data.time_knots, data.servo_indices, data.angles)
    }
}

impl Gesture {
    /// `angles[k]` holds one angle per knot for servo `servo_indices[k]`
    pub fn new(
        name: impl Into<String>,
        time_knots: Vec<f32>,
        servo_indices: Vec<usize>,
        angles: Vec<Vec<f32>>,
    ) -> Result<Self, GestureError> {
        let gesture = Self {
            name: name.into(),
            time_knots,
            servo_indices,
            angles,
        };
        gesture.validate()?;
        Ok(gesture)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn time_knots(&self) -> &[f32] {
        &self.time_knots
    }

    pub fn servo_indices(&self) -> &[usize] {
        &self.servo_indices
    }

    /// Knot angles of the k-th referenced servo
    pub fn angles(&self, k: usize) -> Option<&[f32]> {
        self.angles.get(k).map(Vec::as_slice)
    }

    pub fn knot_count(&self) -> usize {
        self.time_knots.len()
    }

    /// Angle vector (one per referenced servo) at knot `i`
    pub fn knot(&self, i: usize) -> Option<Vec<f32>> {
        if i >= self.time_knots.len() {
            return None;
        }
        Some(self.angles.iter().map(|servo| servo[i]).collect())
    }

    /// Check shapes, knot ordering and servo indices
    pub fn validate(&self) -> Result<(), GestureError> {
        let knots = &self.time_knots;
        if knots.len() < 2 {
            return Err(self.malformed(format!("needs at least 2 time knots, got {}", knots.len())));
        }
        if knots[0] != 0.0 || knots[knots.len() - 1] != 1.0 {
            return Err(self.malformed(format!(
                "time knots must run from 0.0 to 1.0, got {} to {}",
                knots[0],
                knots[knots.len() - 1]
            )));
        }
        if let Some(pair) = knots.windows(2).find(|pair| !(pair[0] <= pair[1])) {
            return Err(self.malformed(format!(
                "time knots must be increasing, got {} then {}",
                pair[0], pair[1]
            )));
        }
        // A repeated interior knot marks an instantaneous jump
        let last = knots.len() - 1;
        if knots[1] == knots[0] || knots[last - 1] == knots[last] {
            return Err(self.malformed("first and last time knots may not repeat".to_string()));
        }
        if let Some(triple) = knots.windows(3).find(|w| w[0] == w[1] && w[1] == w[2]) {
            return Err(self.malformed(format!(
                "time knot {} appears more than twice",
                triple[0]
            )));
        }

        if self.angles.len() != self.servo_indices.len() {
            return Err(self.malformed(format!(
                "{} angle lists for {} servo indices",
                self.angles.len(),
                self.servo_indices.len()
            )));
        }

        let mut seen = HashSet::new();
        for (k, &index) in self.servo_indices.iter().enumerate() {
            if index >= CHANNEL_COUNT as usize {
                return Err(self.malformed(format!(
                    "servo index {} is too large (max {})",
                    index,
                    CHANNEL_COUNT - 1
                )));
            }
            if !seen.insert(index) {
                return Err(self.malformed(format!("servo index {} appears twice", index)));
            }

            let servo_angles = &self.angles[k];
            if servo_angles.len() != knots.len() {
                return Err(self.malformed(format!(
                    "servo {} has {} angles for {} time knots",
                    index,
                    servo_angles.len(),
                    knots.len()
                )));
            }
            if let Some(angle) = servo_angles.iter().find(|a| !a.is_finite()) {
                return Err(self.malformed(format!("servo {} has non-finite angle {}", index, angle)));
            }
        }

        Ok(())
    }

    /// Interpolated angle vector at normalized time `t`, ordered like `servo_indices`
    pub fn angles_at(&self, t: f32) -> Result<Vec<f32>, GestureError> {
        let start = self.time_knots[0];
        let end = self.time_knots[self.time_knots.len() - 1];
        if !(start..=end).contains(&t) {
            return Err(GestureError::OutOfDomain { t, start, end });
        }

        // first bracketing pair wins; zero-width jump intervals never bracket
        let i = self
            .time_knots
            .windows(2)
            .position(|pair| pair[0] < pair[1] && pair[0] <= t && t <= pair[1])
            .ok_or(GestureError::OutOfDomain { t, start, end })?;

        let (t0, t1) = (self.time_knots[i], self.time_knots[i + 1]);
        let x = (t - t0) / (t1 - t0);
        Ok(self
            .angles
            .iter()
            .map(|servo| servo[i] * (1.0 - x) + servo[i + 1] * x)
            .collect())
    }

    /// Play `self` in the first half of the time span and `next` in the second.
    ///
    /// Both must drive the same servos in the same order. Where they meet at the same
    /// angles the junction knot is shared; otherwise the servos jump at t = 0.5.
    pub fn then(&self, next: &Gesture) -> Result<Gesture, GestureError> {
        if self.servo_indices != next.servo_indices {
            return Err(GestureError::Incompatible {
                first: self.name.clone(),
                second: next.name.clone(),
            });
        }

        let last = self.time_knots.len() - 1;
        let continuous = self
            .angles
            .iter()
            .zip(&next.angles)
            .all(|(a, b)| a[last] == b[0]);
        let skip = usize::from(continuous);

        let time_knots = self
            .time_knots
            .iter()
            .map(|t| t * 0.5)
            .chain(next.time_knots.iter().skip(skip).map(|t| 0.5 + t * 0.5))
            .collect();
        let angles = self
            .angles
            .iter()
            .zip(&next.angles)
            .map(|(a, b)| a.iter().chain(b.iter().skip(skip)).copied().collect())
            .collect();

        Gesture::new(
            format!("{}+{}", self.name, next.name),
            time_knots,
            self.servo_indices.clone(),
            angles,
        )
    }

    fn malformed(&self, reason: String) -> GestureError {
        GestureError::Malformed {
            name: self.name.clone(),
            reason,
        }
    }
}

impl Add for &Gesture {
    type Output = Result<Gesture, GestureError>;

    fn add(self, rhs: &Gesture) -> Self::Output {
        self.then(rhs)
    }
}

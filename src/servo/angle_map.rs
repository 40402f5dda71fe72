// Logical <-> raw angle transform for a single mounted servo
//
// raw = raw_angle_0 + sign * angle
// angle = sign * (raw - raw_angle_0)

use serde::{Deserialize, Serialize};
use std::fmt;

use super::motor::ServoError;

/// Direction in which the raw angle moves as the logical angle grows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i8", into = "i8")]
pub enum Sign {
    Positive,
    Negative,
}

impl Sign {
    pub fn as_f32(self) -> f32 {
        match self {
            Sign::Positive => 1.0,
            Sign::Negative => -1.0,
        }
    }

    pub fn flipped(self) -> Self {
        match self {
            Sign::Positive => Sign::Negative,
            Sign::Negative => Sign::Positive,
        }
    }
}

impl TryFrom<i8> for Sign {
    type Error = String;

    fn try_from(value: i8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Sign::Positive),
            -1 => Ok(Sign::Negative),
            other => Err(format!("sign must be 1 or -1, got {}", other)),
        }
    }
}

impl From<Sign> for i8 {
    fn from(sign: Sign) -> Self {
        match sign {
            Sign::Positive => 1,
            Sign::Negative => -1,
        }
    }
}

impl fmt::Display for Sign {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", i8::from(*self))
    }
}

/// Calibration of one servo mount.
///
/// The logical range is the closed interval between `angle_start` and `angle_end`
/// in whichever order they were given.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AngleMap {
    raw_angle_0: f32,
    sign: Sign,
    angle_start: f32,
    angle_end: f32,
}

impl AngleMap {
    pub fn new(
        raw_angle_0: f32,
        sign: Sign,
        angle_start: f32,
        angle_end: f32,
    ) -> Result<Self, ServoError> {
        if !(raw_angle_0.is_finite() && angle_start.is_finite() && angle_end.is_finite()) {
            return Err(ServoError::InvalidCalibration(
                "calibration values must be finite".to_string(),
            ));
        }
        if angle_start == angle_end {
            return Err(ServoError::InvalidCalibration(format!(
                "empty angle range: start and end are both {}",
                angle_start
            )));
        }

        Ok(Self {
            raw_angle_0,
            sign,
            angle_start,
            angle_end,
        })
    }

    pub fn raw_angle_0(&self) -> f32 {
        self.raw_angle_0
    }

    pub fn sign(&self) -> Sign {
        self.sign
    }

    pub fn angle_start(&self) -> f32 {
        self.angle_start
    }

    pub fn angle_end(&self) -> f32 {
        self.angle_end
    }

    /// Logical angle -> raw servo angle
    pub fn to_raw(&self, angle: f32) -> f32 {
        self.raw_angle_0 + self.sign.as_f32() * angle
    }

    /// Raw servo angle -> logical angle
    pub fn to_logical(&self, raw: f32) -> f32 {
        self.sign.as_f32() * (raw - self.raw_angle_0)
    }

    /// True if `angle` lies between start and end, inclusive.
    ///
    /// Uses the product-sign test so decreasing ranges (start > end) work unchanged.
    pub fn in_range(&self, angle: f32) -> bool {
        (self.angle_end - angle) * (angle - self.angle_start) >= 0.0
    }
}

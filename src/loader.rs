// Configuration files: servo descriptors, named positions, gestures
//
// Servo file, one servo per line:
//   kind, name, channel, raw_angle_0, sign, angle_start, angle_end, angle_home
// Position file, one position per line:
//   name, angle, angle, ...
// '#' starts a comment line, blank lines are skipped. One bad line rejects the file.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::{debug, info};

use crate::servo::{
    AngleMap, DriverError, Gesture, Position, PositionBook, ServoError, ServoGroup, ServoMotor,
    SharedDriver, Sign,
};
use crate::servo::driver::CHANNEL_COUNT;

/// Error types for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Line {line}: {reason}")]
    Malformed { line: usize, reason: String },

    #[error("Invalid gesture file: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Servo(#[from] ServoError),

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error("No driver available for {kind} '{name}'")]
    MissingDriver { kind: DriverKind, name: String },

    #[error("Unknown position '{0}'")]
    UnknownPosition(String),

    #[error("Unknown gesture '{0}'")]
    UnknownGesture(String),
}

/// Which backend a servo line asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriverKind {
    I2c,
    Pwm,
}

impl FromStr for DriverKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "i2c servo" => Ok(DriverKind::I2c),
            "pwm servo" => Ok(DriverKind::Pwm),
            other => Err(format!(
                "unknown servo kind '{}', expected 'i2c servo' or 'pwm servo'",
                other
            )),
        }
    }
}

impl fmt::Display for DriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverKind::I2c => f.write_str("i2c servo"),
            DriverKind::Pwm => f.write_str("pwm servo"),
        }
    }
}

/// One parsed servo line. Calibration is already checked.
#[derive(Debug, Clone, PartialEq)]
pub struct ServoDescriptor {
    pub kind: DriverKind,
    pub name: String,
    pub channel: u8,
    pub angle_map: AngleMap,
    pub angle_home: f32,
}

const SERVO_FIELDS: usize = 8;

/// Yield (1-based line number, trimmed line) for every non-comment, non-blank line
fn content_lines(text: &str) -> impl Iterator<Item = (usize, &str)> {
    text.lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
}

fn field<T: FromStr>(line: usize, label: &str, raw: &str) -> Result<T, ConfigError> {
    raw.parse().map_err(|_| ConfigError::Malformed {
        line,
        reason: format!("{} '{}' is not valid", label, raw),
    })
}

fn parse_servo_line(line: usize, content: &str) -> Result<ServoDescriptor, ConfigError> {
    let fields: Vec<&str> = content.split(',').map(str::trim).collect();
    if fields.len() != SERVO_FIELDS {
        return Err(ConfigError::Malformed {
            line,
            reason: format!("expected {} fields, found {}", SERVO_FIELDS, fields.len()),
        });
    }

    let kind: DriverKind = fields[0]
        .parse()
        .map_err(|reason| ConfigError::Malformed { line, reason })?;
    let name = fields[1].to_string();
    let channel: u8 = field(line, "channel", fields[2])?;
    // pwm pins are board GPIO numbers, only the PCA9685 has a fixed channel count
    if kind == DriverKind::I2c && channel >= CHANNEL_COUNT {
        return Err(ConfigError::Malformed {
            line,
            reason: format!("i2c channel {} is not below {}", channel, CHANNEL_COUNT),
        });
    }
    let raw_angle_0: f32 = field(line, "raw_angle_0", fields[3])?;
    let sign: i8 = field(line, "sign", fields[4])?;
    let sign = Sign::try_from(sign).map_err(|reason| ConfigError::Malformed { line, reason })?;
    let angle_start: f32 = field(line, "angle_start", fields[5])?;
    let angle_end: f32 = field(line, "angle_end", fields[6])?;
    let angle_home: f32 = field(line, "angle_home", fields[7])?;

    let angle_map = AngleMap::new(raw_angle_0, sign, angle_start, angle_end).map_err(|e| {
        ConfigError::Malformed {
            line,
            reason: e.to_string(),
        }
    })?;
    if !angle_map.in_range(angle_home) {
        return Err(ConfigError::Malformed {
            line,
            reason: format!(
                "home angle {} is outside [{}, {}]",
                angle_home, angle_start, angle_end
            ),
        });
    }

    Ok(ServoDescriptor {
        kind,
        name,
        channel,
        angle_map,
        angle_home,
    })
}

/// Parse a whole servo file. Two servos of the same kind may not share a channel.
pub fn parse_servo_config(text: &str) -> Result<Vec<ServoDescriptor>, ConfigError> {
    let mut descriptors = Vec::new();
    let mut used = HashSet::new();

    for (line, content) in content_lines(text) {
        let descriptor = parse_servo_line(line, content)?;
        if !used.insert((descriptor.kind, descriptor.channel)) {
            return Err(ConfigError::Malformed {
                line,
                reason: format!(
                    "{} channel {} is already taken",
                    descriptor.kind, descriptor.channel
                ),
            });
        }
        debug!("line {}: {:?}", line, descriptor);
        descriptors.push(descriptor);
    }
    Ok(descriptors)
}

/// Parse a position file into a book, ids assigned in file order
pub fn parse_positions(text: &str) -> Result<PositionBook, ConfigError> {
    let mut book = PositionBook::new();

    for (line, content) in content_lines(text) {
        let mut fields = content.split(',').map(str::trim);
        let name = fields.next().unwrap_or_default();
        if name.is_empty() {
            return Err(ConfigError::Malformed {
                line,
                reason: "position name is empty".to_string(),
            });
        }
        let angles = fields
            .map(|raw| field::<f32>(line, "angle", raw))
            .collect::<Result<Vec<_>, _>>()?;
        if angles.is_empty() {
            return Err(ConfigError::Malformed {
                line,
                reason: format!("position '{}' has no angles", name),
            });
        }
        let id = book.insert(Position::new(name, angles));
        if let Some(position) = book.get_by_id(id) {
            debug!("line {}: position '{}' -> {:?}", line, position.name, id);
        }
    }
    Ok(book)
}

/// Parse a JSON array of gestures; each one is validated while decoding
pub fn parse_gestures(text: &str) -> Result<Vec<Gesture>, ConfigError> {
    Ok(serde_json::from_str(text)?)
}

fn read(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

pub fn read_servo_file(path: impl AsRef<Path>) -> Result<Vec<ServoDescriptor>, ConfigError> {
    let path = path.as_ref();
    let descriptors = parse_servo_config(&read(path)?)?;
    info!("Loaded {} servos from {}", descriptors.len(), path.display());
    Ok(descriptors)
}

pub fn read_position_file(path: impl AsRef<Path>) -> Result<PositionBook, ConfigError> {
    let path = path.as_ref();
    let book = parse_positions(&read(path)?)?;
    info!("Loaded {} positions from {}", book.len(), path.display());
    Ok(book)
}

pub fn read_gesture_file(path: impl AsRef<Path>) -> Result<Vec<Gesture>, ConfigError> {
    let path = path.as_ref();
    let gestures = parse_gestures(&read(path)?)?;
    info!("Loaded {} gestures from {}", gestures.len(), path.display());
    Ok(gestures)
}

/// Build a group in file order, asking `driver_for` for each servo's output
pub fn build_group<F>(
    name: &str,
    descriptors: &[ServoDescriptor],
    mut driver_for: F,
) -> Result<ServoGroup, ConfigError>
where
    F: FnMut(&ServoDescriptor) -> Result<SharedDriver, ConfigError>,
{
    let servos = descriptors
        .iter()
        .map(|d| {
            let driver = driver_for(d)?;
            Ok(ServoMotor::new(
                d.name.clone(),
                d.channel,
                d.angle_map,
                d.angle_home,
                driver,
            )?)
        })
        .collect::<Result<Vec<_>, ConfigError>>()?;
    Ok(ServoGroup::new(name, servos))
}

/// Check every position against the group's size and ranges
pub fn check_positions(book: &PositionBook, group: &ServoGroup) -> Result<(), ConfigError> {
    for position in book.iter() {
        group.check_angles(&position.angles)?;
    }
    Ok(())
}

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use servo_motion::config::{DEFAULT_FREQUENCY_HZ, I2C_BUS, PCA9685_ADDRESS};
use servo_motion::feedback::TracingStatus;
use servo_motion::loader::{self, ConfigError, DriverKind, ServoDescriptor};
use servo_motion::runtime::{self, Runtime};
use servo_motion::servo::{PositionBook, PulseTiming, SharedDriver, SimDriver, shared};

/// Servo motion runtime: drives a servo group from zenoh commands
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Servo descriptor file
    #[arg(long)]
    servos: PathBuf,

    /// Named positions for the group
    #[arg(long)]
    positions: Option<PathBuf>,

    /// Gestures (JSON array)
    #[arg(long)]
    gestures: Option<PathBuf>,

    /// Group name used in logs
    #[arg(long, default_value = "servos")]
    name: String,

    #[arg(long, default_value = I2C_BUS)]
    i2c_bus: String,

    #[arg(long, default_value_t = PCA9685_ADDRESS)]
    address: u8,

    /// PWM frequency in Hz
    #[arg(long, default_value_t = DEFAULT_FREQUENCY_HZ)]
    frequency: f32,

    /// Record writes in memory instead of driving hardware
    #[arg(long)]
    simulate: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    if let Err(e) = run(Args::parse()).await {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let descriptors = loader::read_servo_file(&args.servos)?;
    let positions = match &args.positions {
        Some(path) => loader::read_position_file(path)?,
        None => PositionBook::new(),
    };
    let gestures = match &args.gestures {
        Some(path) => loader::read_gesture_file(path)?,
        None => Vec::new(),
    };

    let timing = PulseTiming::with_frequency(args.frequency);
    timing.validate()?;

    let mut drivers = Drivers::new(&args, timing);
    let mut group = loader::build_group(&args.name, &descriptors, |d| drivers.open(d))?;
    loader::check_positions(&positions, &group)?;

    info!("Homing {} servos", group.len());
    group.home().await?;
    info!("{}", group);

    let runtime = Runtime::new(group, positions, gestures, Arc::new(TracingStatus));
    runtime::run(runtime).await
}

/// Opens each backend once; every i2c servo shares the one PCA9685
struct Drivers<'a> {
    args: &'a Args,
    timing: PulseTiming,
    i2c: Option<SharedDriver>,
    pwm_sim: Option<SharedDriver>,
}

impl<'a> Drivers<'a> {
    fn new(args: &'a Args, timing: PulseTiming) -> Self {
        Self {
            args,
            timing,
            i2c: None,
            pwm_sim: None,
        }
    }

    fn open(&mut self, descriptor: &ServoDescriptor) -> Result<SharedDriver, ConfigError> {
        if self.args.simulate {
            // Channel numbers of the two kinds overlap, so each gets its own recorder
            let slot = match descriptor.kind {
                DriverKind::I2c => &mut self.i2c,
                DriverKind::Pwm => &mut self.pwm_sim,
            };
            return Ok(slot.get_or_insert_with(|| shared(SimDriver::new())).clone());
        }
        match descriptor.kind {
            DriverKind::I2c => {
                if let Some(driver) = &self.i2c {
                    return Ok(driver.clone());
                }
                let driver = self.open_pca9685(descriptor)?;
                self.i2c = Some(driver.clone());
                Ok(driver)
            }
            DriverKind::Pwm => self.open_pwm(descriptor),
        }
    }

    #[cfg(feature = "linux")]
    fn open_pca9685(&self, _descriptor: &ServoDescriptor) -> Result<SharedDriver, ConfigError> {
        use servo_motion::servo::{DriverError, Pca9685};

        info!(
            "Opening PCA9685 at {:#04x} on {}",
            self.args.address, self.args.i2c_bus
        );
        let bus = linux_embedded_hal::I2cdev::new(&self.args.i2c_bus).map_err(|e| {
            DriverError::Open {
                device: self.args.i2c_bus.clone(),
                reason: e.to_string(),
            }
        })?;
        let mut chip = Pca9685::new(bus, self.args.address, self.timing)?;
        info!("PCA9685 running at {:.2} Hz", chip.frequency()?);
        Ok(shared(chip))
    }

    #[cfg(not(feature = "linux"))]
    fn open_pca9685(&self, descriptor: &ServoDescriptor) -> Result<SharedDriver, ConfigError> {
        Err(ConfigError::MissingDriver {
            kind: descriptor.kind,
            name: descriptor.name.clone(),
        })
    }

    #[cfg(feature = "rpi")]
    fn open_pwm(&self, descriptor: &ServoDescriptor) -> Result<SharedDriver, ConfigError> {
        use rppal::pwm::{Channel, Polarity, Pwm};
        use servo_motion::servo::{DirectPwm, DriverError};

        let channel = match descriptor.channel {
            0 => Channel::Pwm0,
            1 => Channel::Pwm1,
            2 => Channel::Pwm2,
            3 => Channel::Pwm3,
            channel => return Err(DriverError::InvalidChannel { channel }.into()),
        };
        info!("Opening PWM channel {} for {}", descriptor.channel, descriptor.name);
        let pwm = Pwm::with_frequency(
            channel,
            f64::from(self.timing.frequency_hz),
            0.0,
            Polarity::Normal,
            true,
        )
        .map_err(|e| DriverError::Open {
            device: format!("pwm{}", descriptor.channel),
            reason: e.to_string(),
        })?;
        Ok(shared(DirectPwm::new(pwm, descriptor.channel, self.timing)?))
    }

    #[cfg(not(feature = "rpi"))]
    fn open_pwm(&self, descriptor: &ServoDescriptor) -> Result<SharedDriver, ConfigError> {
        Err(ConfigError::MissingDriver {
            kind: descriptor.kind,
            name: descriptor.name.clone(),
        })
    }
}

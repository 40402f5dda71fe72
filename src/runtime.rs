// 50 Hz command loop with watchdog
//
// Jog commands split the group into one velocity-loop task per servo. Position, gesture
// and off commands take the servos back and drive the group as a whole.
// If jog commands stop arriving (teleop crashed, link dropped) every jogging servo is stopped.

use std::collections::HashMap;
use std::mem;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use tokio::task::JoinError;
use tokio::time::{Instant, interval};
use tracing::{info, warn};

use crate::config::{
    CMD_TIMEOUT, DEFAULT_GROUP_STEPS, JOG_ANGLE_INC, JOG_INTERVAL, LOOP_HZ, TOPIC_CMD_GESTURE,
    TOPIC_CMD_JOG, TOPIC_CMD_OFF, TOPIC_CMD_POSITION, TOPIC_HEALTH,
};
use crate::feedback::StatusSink;
use crate::loader::ConfigError;
use crate::messages::{GestureCommand, JogCommand, PositionCommand, RuntimeHealth};
use crate::servo::{Gesture, JogTask, MotionControl, PositionBook, ServoError, ServoGroup};

/// Error types for command handling
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Servo(#[from] ServoError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("No servo named '{0}'")]
    UnknownServo(String),

    #[error("Velocity loop task failed: {0}")]
    Join(#[from] JoinError),

    #[error("Servos were lost after a velocity loop failure")]
    Lost,
}

impl RuntimeError {
    /// Errors after which the runtime cannot drive the servos anymore
    pub fn is_fatal(&self) -> bool {
        matches!(self, RuntimeError::Join(_) | RuntimeError::Lost)
    }
}

struct Jogger {
    name: String,
    control: MotionControl,
    task: JogTask,
}

enum Mode {
    Group(ServoGroup),
    Jog { group_name: String, joggers: Vec<Jogger> },
    Lost,
}

pub struct Runtime {
    mode: Mode,
    positions: PositionBook,
    gestures: HashMap<String, Gesture>,
    status: Arc<dyn StatusSink>,
    cmd_received_at: Option<Instant>,
    connected: bool,
    fault: bool,
    health: RuntimeHealth,
}

impl Runtime {
    pub fn new(
        group: ServoGroup,
        positions: PositionBook,
        gestures: Vec<Gesture>,
        status: Arc<dyn StatusSink>,
    ) -> Self {
        let gestures = gestures
            .into_iter()
            .map(|g| (g.name().to_string(), g))
            .collect();
        Self {
            mode: Mode::Group(group),
            positions,
            gestures,
            status,
            cmd_received_at: None,
            connected: false,
            fault: false,
            health: RuntimeHealth::CmdStale, // Start stale until first cmd
        }
    }

    pub fn health(&self) -> RuntimeHealth {
        self.health
    }

    pub fn is_jogging(&self) -> bool {
        matches!(self.mode, Mode::Jog { .. })
    }

    /// The group, if the servos are not currently split into velocity loops
    pub fn group(&self) -> Option<&ServoGroup> {
        match &self.mode {
            Mode::Group(group) => Some(group),
            _ => None,
        }
    }

    /// Set one servo's velocity-mode direction
    pub fn on_jog(&mut self, cmd: JogCommand) -> Result<(), RuntimeError> {
        self.touch();
        self.enter_jog()?;

        let Mode::Jog { joggers, .. } = &self.mode else {
            return Err(RuntimeError::Lost);
        };
        let jogger = joggers
            .iter()
            .find(|j| j.name == cmd.servo)
            .ok_or_else(|| RuntimeError::UnknownServo(cmd.servo.clone()))?;
        jogger.control.set(cmd.direction.into());
        Ok(())
    }

    pub async fn on_position(&mut self, cmd: PositionCommand) -> Result<(), RuntimeError> {
        info!("Received command: {:?}", &cmd);
        self.touch();
        let position = self
            .positions
            .get(&cmd.position)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownPosition(cmd.position.clone()))?;

        let group = self.enter_group().await?;
        group
            .move_to_position(
                &position,
                Duration::from_millis(cmd.duration_ms),
                cmd.steps.unwrap_or(DEFAULT_GROUP_STEPS),
            )
            .await?;
        Ok(())
    }

    pub async fn on_gesture(&mut self, cmd: GestureCommand) -> Result<(), RuntimeError> {
        info!("Received command: {:?}", &cmd);
        self.touch();
        let gesture = self
            .gestures
            .get(&cmd.gesture)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownGesture(cmd.gesture.clone()))?;

        let group = self.enter_group().await?;
        group
            .execute(
                &gesture,
                Duration::from_millis(cmd.duration_ms),
                cmd.num_steps,
                cmd.repeat,
            )
            .await?;
        Ok(())
    }

    pub async fn on_off(&mut self) -> Result<(), RuntimeError> {
        info!("Received command: off");
        self.touch();
        let group = self.enter_group().await?;
        group.off()?;
        Ok(())
    }

    /// Record the outcome of a command for the health report
    pub fn record(&mut self, result: &Result<(), RuntimeError>) {
        match result {
            Ok(()) => self.fault = false,
            Err(e) => {
                warn!("Command failed: {}", e);
                self.status.error(&e.to_string());
                self.fault = true;
            }
        }
    }

    /// Watchdog: stop every jogging servo once commands go stale, then report health
    pub fn check_watchdog(&mut self) -> RuntimeHealth {
        let stale = match self.cmd_received_at {
            Some(at) => at.elapsed() > CMD_TIMEOUT,
            None => true,
        };

        if stale {
            if let Mode::Jog { joggers, .. } = &self.mode {
                for jogger in joggers {
                    jogger.control.stop();
                }
            }
            if self.connected {
                warn!("Command stale, stopping all jogging servos");
                self.connected = false;
                self.status.disconnected();
            }
        }

        self.health = if self.fault {
            RuntimeHealth::Fault
        } else if stale {
            RuntimeHealth::CmdStale
        } else {
            RuntimeHealth::Ok
        };
        self.health
    }

    /// Take the servos back from the velocity loops, in their original order
    pub async fn shutdown(self) -> Result<ServoGroup, RuntimeError> {
        let mut runtime = self;
        runtime.enter_group().await?;
        match runtime.mode {
            Mode::Group(group) => Ok(group),
            _ => Err(RuntimeError::Lost),
        }
    }

    fn touch(&mut self) {
        self.cmd_received_at = Some(Instant::now());
        if !self.connected {
            self.connected = true;
            self.status.connected();
        }
    }

    fn enter_jog(&mut self) -> Result<(), RuntimeError> {
        match mem::replace(&mut self.mode, Mode::Lost) {
            Mode::Group(group) => {
                info!("Switching {} to jog mode", group.name());
                let group_name = group.name().to_string();
                let joggers = group
                    .into_servos()
                    .into_iter()
                    .map(|servo| {
                        let name = servo.name().to_string();
                        let task =
                            JogTask::spawn(servo, JOG_ANGLE_INC, JOG_INTERVAL, self.status.clone());
                        Jogger {
                            name,
                            control: task.control(),
                            task,
                        }
                    })
                    .collect();
                self.mode = Mode::Jog { group_name, joggers };
                Ok(())
            }
            jog @ Mode::Jog { .. } => {
                self.mode = jog;
                Ok(())
            }
            Mode::Lost => Err(RuntimeError::Lost),
        }
    }

    async fn enter_group(&mut self) -> Result<&mut ServoGroup, RuntimeError> {
        if matches!(self.mode, Mode::Jog { .. }) {
            if let Mode::Jog { group_name, joggers } = mem::replace(&mut self.mode, Mode::Lost) {
                info!("Switching {} to group mode", group_name);
                let mut servos = Vec::with_capacity(joggers.len());
                for jogger in joggers {
                    servos.push(jogger.task.shutdown().await?);
                }
                self.mode = Mode::Group(ServoGroup::new(group_name, servos));
            }
        }

        match &mut self.mode {
            Mode::Group(group) => Ok(group),
            _ => Err(RuntimeError::Lost),
        }
    }
}

fn parse<T: DeserializeOwned>(payload: &[u8]) -> Option<T> {
    match serde_json::from_slice::<T>(payload) {
        Ok(cmd) => Some(cmd),
        Err(e) => {
            warn!("Failed to parse command: {}", e);
            None
        }
    }
}

pub async fn run(mut runtime: Runtime) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    info!("Setting up publishers and subscribers...");
    let sub_jog = session.declare_subscriber(TOPIC_CMD_JOG).await?;
    let sub_position = session.declare_subscriber(TOPIC_CMD_POSITION).await?;
    let sub_gesture = session.declare_subscriber(TOPIC_CMD_GESTURE).await?;
    let sub_off = session.declare_subscriber(TOPIC_CMD_OFF).await?;
    let pub_health = session.declare_publisher(TOPIC_HEALTH).await?;

    let mut tick = interval(Duration::from_millis(1000 / LOOP_HZ));

    info!(
        "Runtime started: {}Hz loop, {}ms watchdog timeout",
        LOOP_HZ,
        CMD_TIMEOUT.as_millis()
    );
    info!(
        "Subscribed to: {}, {}, {}, {}",
        TOPIC_CMD_JOG, TOPIC_CMD_POSITION, TOPIC_CMD_GESTURE, TOPIC_CMD_OFF
    );
    info!("Publishing to: {}", TOPIC_HEALTH);

    loop {
        tick.tick().await;

        // 1. Drain all pending commands (non-blocking)
        let mut results = Vec::new();
        while let Ok(Some(sample)) = sub_jog.try_recv() {
            if let Some(cmd) = parse::<JogCommand>(&sample.payload().to_bytes()) {
                results.push(runtime.on_jog(cmd));
            }
        }
        while let Ok(Some(sample)) = sub_position.try_recv() {
            if let Some(cmd) = parse::<PositionCommand>(&sample.payload().to_bytes()) {
                results.push(runtime.on_position(cmd).await);
            }
        }
        while let Ok(Some(sample)) = sub_gesture.try_recv() {
            if let Some(cmd) = parse::<GestureCommand>(&sample.payload().to_bytes()) {
                results.push(runtime.on_gesture(cmd).await);
            }
        }
        while let Ok(Some(_)) = sub_off.try_recv() {
            results.push(runtime.on_off().await);
        }

        for result in results {
            runtime.record(&result);
            if let Err(e) = result {
                if e.is_fatal() {
                    return Err(Box::new(e));
                }
            }
        }

        // 2. Watchdog
        let health = runtime.check_watchdog();

        // 3. Publish health
        let health_json = serde_json::to_string(&health)?;
        pub_health.put(health_json).await?;
    }
}

// Keyboard jog teleop: Tab/Shift-Tab select servo, Up/Down jog, G/H positions, O off, Q quit
//
// Usage: cargo run --example jog_teleop -- hip knee gripper
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use std::time::{Duration, Instant};
use tracing::info;

use servo_motion::config::{TOPIC_CMD_JOG, TOPIC_CMD_OFF, TOPIC_CMD_POSITION};
use servo_motion::messages::{JogCommand, JogDirection, PositionCommand};

const INPUT_TIMEOUT_MS: u64 = 100; // Stop jogging after this much time with no input
const POSITION_MOVE_MS: u64 = 1000;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let servos: Vec<String> = std::env::args().skip(1).collect();
    if servos.is_empty() {
        return Err("usage: jog_teleop <servo name>...".into());
    }

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;
    let pub_jog = session.declare_publisher(TOPIC_CMD_JOG).await?;
    let pub_position = session.declare_publisher(TOPIC_CMD_POSITION).await?;
    let pub_off = session.declare_publisher(TOPIC_CMD_OFF).await?;

    info!("Controls: Tab/Shift-Tab=select, Up/Down=jog, G=home, H=stand, O=off, Q=quit");
    info!("Selected: {}", servos[0]);

    enable_raw_mode()?;
    let result = run_teleop(&servos, &pub_jog, &pub_position, &pub_off).await;
    disable_raw_mode()?;

    result
}

async fn run_teleop(
    servos: &[String],
    pub_jog: &zenoh::pubsub::Publisher<'_>,
    pub_position: &zenoh::pubsub::Publisher<'_>,
    pub_off: &zenoh::pubsub::Publisher<'_>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut selected: usize = 0;
    let mut direction = JogDirection::Stop;
    let mut last_jog_input = Instant::now();

    loop {
        // Poll for key with 20ms timeout (50Hz effective rate)
        if event::poll(Duration::from_millis(20))? {
            if let Event::Key(KeyEvent { code, kind, .. }) = event::read()? {
                let pressed = kind == KeyEventKind::Press || kind == KeyEventKind::Repeat;

                match code {
                    KeyCode::Up if pressed => {
                        direction = JogDirection::Increase;
                        last_jog_input = Instant::now();
                    }
                    KeyCode::Down if pressed => {
                        direction = JogDirection::Decrease;
                        last_jog_input = Instant::now();
                    }

                    // Servo selection; the old servo gets an explicit stop first
                    KeyCode::Tab | KeyCode::BackTab if pressed => {
                        publish_jog(pub_jog, &servos[selected], JogDirection::Stop).await?;
                        selected = if code == KeyCode::Tab {
                            (selected + 1) % servos.len()
                        } else {
                            (selected + servos.len() - 1) % servos.len()
                        };
                        direction = JogDirection::Stop;
                        info!("Selected: {}", servos[selected]);
                    }

                    KeyCode::Char('g') if pressed => {
                        publish_position(pub_position, "home").await?;
                    }
                    KeyCode::Char('h') if pressed => {
                        publish_position(pub_position, "stand").await?;
                    }
                    KeyCode::Char('o') if pressed => {
                        pub_off.put("{}").await?;
                        info!("Off");
                    }

                    // Quit
                    KeyCode::Char('q') | KeyCode::Esc if pressed => break,

                    _ => {}
                }
            }
        }

        // Reset direction if no jog input for INPUT_TIMEOUT_MS
        if last_jog_input.elapsed() > Duration::from_millis(INPUT_TIMEOUT_MS) {
            direction = JogDirection::Stop;
        }

        // Always publish at ~50Hz so the runtime watchdog stays fed
        publish_jog(pub_jog, &servos[selected], direction).await?;
    }

    publish_jog(pub_jog, &servos[selected], JogDirection::Stop).await?;
    Ok(())
}

async fn publish_jog(
    publisher: &zenoh::pubsub::Publisher<'_>,
    servo: &str,
    direction: JogDirection,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cmd = JogCommand {
        servo: servo.to_string(),
        direction,
    };
    publisher.put(serde_json::to_string(&cmd)?).await?;
    Ok(())
}

async fn publish_position(
    publisher: &zenoh::pubsub::Publisher<'_>,
    position: &str,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cmd = PositionCommand {
        position: position.to_string(),
        duration_ms: POSITION_MOVE_MS,
        steps: None,
    };
    publisher.put(serde_json::to_string(&cmd)?).await?;
    info!("Position: {}", position);
    Ok(())
}

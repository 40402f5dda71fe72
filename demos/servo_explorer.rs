// Servo explorer: interactive console for a servo group from a descriptor file
//
// Usage: cargo run --example servo_explorer -- leg.srv
//
// Writes go to an in-memory driver; every raw angle that would reach the hardware is printed.
//
// Commands:
//   h, home     move to home position
//   s, start    move to start position
//   e, end      move to end position
//   <a> <b> ..  set logical angles directly
//   off         de-energize all servos
//   q, quit, x  quit

use std::io::{self, BufRead, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use servo_motion::config::DEFAULT_GROUP_STEPS;
use servo_motion::loader;
use servo_motion::servo::{Position, ServoGroup, SharedDriver, SimDriver};

const MOVE_TIME: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let path = std::env::args()
        .nth(1)
        .ok_or("usage: servo_explorer <servo file>")?;
    let descriptors = loader::read_servo_file(&path)?;

    let sim = Arc::new(Mutex::new(SimDriver::new()));
    let driver: SharedDriver = sim.clone();
    let mut group = loader::build_group(&path, &descriptors, |_| Ok(driver.clone()))?;
    group.home().await?;

    println!("Servo group: {}", group.name());
    for servo in group.servos() {
        println!("  {}", servo);
    }
    print_angles(&group);

    let stdin = io::stdin();
    loop {
        print!("\nCommand: ");
        io::stdout().flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let words: Vec<&str> = line.split_whitespace().collect();
        let Some(&first) = words.first() else {
            continue;
        };

        sim.lock().map_err(|_| "driver lock poisoned")?.clear();
        let result = match first.to_ascii_lowercase().as_str() {
            "q" | "quit" | "x" => break,
            "h" | "home" => {
                let home = group.get_home_position();
                move_to(&mut group, home).await
            }
            "s" | "start" => {
                let start = group.get_start_position();
                move_to(&mut group, start).await
            }
            "e" | "end" => {
                let end = group.get_end_position();
                move_to(&mut group, end).await
            }
            "off" => group.off().map_err(Into::into),
            "?" | "help" => {
                println!("h=home s=start e=end off <angles...> q=quit");
                Ok(())
            }
            _ => match words
                .iter()
                .map(|w| w.parse::<f32>())
                .collect::<Result<Vec<_>, _>>()
            {
                Ok(angles) => group.set_angles(&angles).map_err(Into::into),
                Err(e) => Err(e.into()),
            },
        };

        match result {
            Ok(()) => {
                let writes = sim.lock().map_err(|_| "driver lock poisoned")?.writes();
                if let Some(last) = writes.len().checked_sub(group.len()) {
                    println!("Final writes (channel, raw): {:?}", &writes[last..]);
                }
                print_angles(&group);
            }
            Err(e) => println!("Error: {} (type servo angles or 'x' to quit)", e),
        }
    }

    Ok(())
}

async fn move_to(
    group: &mut ServoGroup,
    position: Position,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    group
        .move_to_position(&position, MOVE_TIME, DEFAULT_GROUP_STEPS)
        .await?;
    Ok(())
}

fn print_angles(group: &ServoGroup) {
    match (group.angles(), group.raw_angles()) {
        (Ok(logical), Ok(raw)) => {
            println!("Logical angles: {:?}", logical);
            println!("Raw angles: {:?}", raw);
        }
        _ => println!("Angles unknown"),
    }
}

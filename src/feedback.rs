// Status feedback collaborator (LEDs, buzzer, display)
//
// Calls are fire-and-forget: implementations must not block and cannot fail the caller.

use tracing::{error, info, warn};

pub trait StatusSink: Send + Sync {
    fn connected(&self);
    fn disconnected(&self);
    fn error(&self, message: &str);
}

/// Reports status through the log only
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingStatus;

impl StatusSink for TracingStatus {
    fn connected(&self) {
        info!("Command source connected");
    }

    fn disconnected(&self) {
        warn!("Command source disconnected");
    }

    fn error(&self, message: &str) {
        error!("{}", message);
    }
}

pub mod config;
pub mod feedback;
pub mod loader;
pub mod messages;
pub mod runtime;
pub mod servo;

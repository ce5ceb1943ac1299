pub mod command;
pub mod progress;
pub mod shell;

pub use command::{CommandRunner, HostCommand, SystemRunner};

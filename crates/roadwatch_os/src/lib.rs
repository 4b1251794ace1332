#![forbid(unsafe_code)]

pub mod archive;
pub mod config;
pub mod console;
pub mod evidence;
pub mod media;
pub mod nav;
pub mod poll;
pub mod router;
pub mod session;

pub use config::ConsoleConfig;
pub use console::{Console, ConsoleError, ConsoleView};

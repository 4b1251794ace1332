#![forbid(unsafe_code)]

pub mod console_cli;

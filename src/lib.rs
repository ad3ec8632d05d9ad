#[macro_use]
extern crate log;

pub mod cli;
pub mod env;
pub mod error;
pub mod external_procs;
pub mod launcher;
pub mod logger;
pub mod platform;
pub mod port_probe;
pub mod port_registry;
pub mod procs;
pub mod project;
pub mod project_type;
pub mod reaper;
pub mod settings;
pub mod shell;
pub mod sniffer;
pub mod supervisor;
pub mod ui;

pub use miette::Result;
pub use supervisor::{LogEvent, StatusEvent, Supervisor};

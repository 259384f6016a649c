pub mod config;
pub mod discovery;
pub mod drive;
pub mod messages;
pub mod runtime;
pub mod supervisor;

pub mod cli;
pub mod config;
pub mod controller;
pub mod logs;
pub mod preview;
pub mod telemetry;
pub mod workspace;

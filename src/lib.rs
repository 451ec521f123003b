pub mod aggregate;
pub mod api;
pub mod cli;
pub mod config;
pub mod core;
pub mod exit;
pub mod logs;
pub mod refresh;
pub mod rows;
pub mod select;
pub mod session;
pub mod tui;
pub mod ui;

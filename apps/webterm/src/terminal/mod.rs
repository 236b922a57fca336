//! Local command-line shell around the session driver.

pub mod app;
pub mod cli;
pub mod error;
pub mod keys;
pub mod surface;
pub mod tty;

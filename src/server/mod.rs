//! Server module for Kiln
//!
//! # Module Structure
//!
//! - `config`: Configuration structures and validation
//! - `loader`: Configuration loading from files and environment
//! - `init`: Component wiring, router construction and the run loop

pub mod config;
mod init;
mod loader;

pub use init::{build_router, run, AppState};
pub use loader::{environment_name, load_config};

//! nmsmods - a profile-aware mod manager for No Man's Sky
//!
//! This crate provides:
//! - Bounded, traversal-safe zip extraction with layout detection
//! - Per-profile mod stores with ownership-checked atomic deployment
//! - A versioned state file with forward migrations
//! - An exclusive repository lock shared by every mutating command

pub mod app;
pub mod config;
pub mod error;
pub mod lock;
pub mod mods;
pub mod profiles;
pub mod state;

pub use app::App;
pub use config::Config;
pub use error::{Error, Result};

//! Core engine for managing `nativepc` game mods.
//!
//! Installs mods from archives into managed storage, keeps a load order,
//! detects path conflicts between enabled mods and applies the winners to
//! the live game directory.

pub mod activation;
pub mod archive;
pub mod categories;
pub mod config;
pub mod conflict;
pub mod error;
pub mod lock;
pub mod manager;
pub mod modinfo;
pub mod paths;
pub mod progress;
pub mod registry;
pub mod store;

pub use error::{Error, Result};
pub use manager::{ModManager, OperationResult, SharedModManager};

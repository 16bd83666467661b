//! Gates humanos, decisiones y aplicación de patches.

pub mod manager;

pub use manager::GateManager;

// TabGrid shared type definitions
// Each submodule defines types used across the engine.

pub mod errors;
pub mod grid;
pub mod interaction;
pub mod persistence;
pub mod registry;
pub mod settings;

// marksync shared type definitions
// Each submodule defines types used across the engine and its collaborators.

pub mod bookmark;
pub mod errors;
pub mod settings;
pub mod sync;

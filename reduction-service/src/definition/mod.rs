// Reduction definitions
// Loading and validating declarative reduction node sets

pub mod error;
pub mod loader;
pub mod models;

pub use error::{DefinitionError, DefinitionErrorKind, DefinitionResult};
pub use loader::DefinitionLoader;
pub use models::*;

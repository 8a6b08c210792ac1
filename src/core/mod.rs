// Public modules
pub mod checks;
pub mod compiler;
pub mod config;
pub mod environment;
pub mod error;
pub mod kube;
pub mod local_files;
pub mod overlay;
pub mod profile;
pub mod variables;
pub mod version;
pub mod workflow;

// Internal modules - not part of public API
pub(crate) mod paths;

// Public modules for CLI access
pub mod defaults;

// Re-export common types for convenience
pub use error::{Error, ErrorCode, Result};
pub use workflow::{CommandPolicy, Overrides, ProfileChecks, Settings, Workflow};

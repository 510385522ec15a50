//! Local process supervisor: named command launchers ("terminals"), their
//! child processes, captured output, and the command surface a UI drives.

pub mod api;
pub mod config;
pub mod error;
pub mod supervisor;
pub mod utils;

pub use error::AppError;
pub use supervisor::{Supervisor, SupervisorSettings};

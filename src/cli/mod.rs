//! Command-line interface layer.

pub mod args;
pub mod run;

pub use args::{Arguments, Command};
pub use run::run;

use std::process::ExitCode;

/// Process exit behavior of a completed command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Finished without issues.
    Success,
    /// Finished, but issues were found.
    Failure,
    /// Did not finish.
    Error,
}

impl From<ExitStatus> for ExitCode {
    fn from(status: ExitStatus) -> Self {
        match status {
            ExitStatus::Success => ExitCode::SUCCESS,
            ExitStatus::Failure => ExitCode::from(1),
            ExitStatus::Error => ExitCode::from(2),
        }
    }
}

//! Command errors and the replies sent back to the originating channel

use crate::machine::MachineRequirement;
use crate::params::ParamError;
use crate::sink::EmissionError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CommandError {
    #[error("{0} parameter not found")]
    MissingParameter(char),

    #[error("{0}")]
    InvalidParameter(String),

    #[error(transparent)]
    Param(ParamError),

    #[error("{}", .0.message())]
    Mode(MachineRequirement),

    #[error("No modal command active")]
    NoModalCommand,

    #[error("{code} - You need set {axis} axis!")]
    MissingAxis { code: String, axis: char },

    #[error("{0}")]
    Emission(#[from] EmissionError),

    #[error("System Timeout!")]
    InterlockTimeout,

    #[error("{0}")]
    Interlock(String),
}

impl From<ParamError> for CommandError {
    fn from(e: ParamError) -> Self {
        match e {
            ParamError::NotFound { letter } => CommandError::MissingParameter(letter),
            other => CommandError::Param(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Parameter,
    Mode,
    AxisConfiguration,
    Emission,
    InterlockTimeout,
    Abort,
}

impl CommandError {
    pub fn invalid(message: impl Into<String>) -> Self {
        CommandError::InvalidParameter(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            CommandError::MissingParameter(_)
            | CommandError::InvalidParameter(_)
            | CommandError::Param(_) => ErrorKind::Parameter,
            CommandError::Mode(_) | CommandError::NoModalCommand => ErrorKind::Mode,
            CommandError::MissingAxis { .. } => ErrorKind::AxisConfiguration,
            CommandError::Emission(_) => ErrorKind::Emission,
            CommandError::InterlockTimeout => ErrorKind::InterlockTimeout,
            CommandError::Interlock(_) => ErrorKind::Abort,
        }
    }

    /// Errors that abort the modal command instead of just failing the line
    pub fn escalates(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Emission | ErrorKind::InterlockTimeout | ErrorKind::Abort
        )
    }
}

pub type CommandResult<T> = std::result::Result<T, CommandError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GCodeResult {
    Ok,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub channel: usize,
    pub line: String,
    pub result: GCodeResult,
    pub text: String,
}

impl Reply {
    pub fn is_error(&self) -> bool {
        self.result == GCodeResult::Error
    }
}

impl std::fmt::Display for Reply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.result {
            GCodeResult::Ok => write!(f, "ok {}", self.text),
            GCodeResult::Warning => write!(f, "warning: {}", self.text),
            GCodeResult::Error => write!(f, "error: {}", self.text),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_operator_wording() {
        assert_eq!(
            CommandError::MissingParameter('R').to_string(),
            "R parameter not found"
        );
        assert_eq!(
            CommandError::Mode(MachineRequirement::MillingOrLathe).to_string(),
            "Change to Milling, HMC, or Lathe Mode First!"
        );
        assert_eq!(
            CommandError::MissingAxis {
                code: "G83".into(),
                axis: 'Z'
            }
            .to_string(),
            "G83 - You need set Z axis!"
        );
    }

    #[test]
    fn test_not_found_maps_to_missing_parameter() {
        let err: CommandError = ParamError::NotFound { letter: 'Q' }.into();
        assert_eq!(err, CommandError::MissingParameter('Q'));
        assert_eq!(err.kind(), ErrorKind::Parameter);
        assert!(!err.escalates());
    }

    #[test]
    fn test_escalation() {
        assert!(CommandError::InterlockTimeout.escalates());
        assert!(CommandError::Emission(EmissionError::Closed).escalates());
        assert!(!CommandError::Mode(MachineRequirement::Lathe).escalates());
    }
}

//! Console-list helper messages
//!
//! The request travels as the helper's single command-line argument; the
//! response travels back as exactly one frame on the helper's stdout.

use serde::{Deserialize, Serialize};

/// Error parsing the helper's command line
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestArgsError {
    #[error("expected exactly one argument (target pid), got {0}")]
    WrongArgCount(usize),

    #[error("target pid is not a decimal process id: {0:?}")]
    InvalidPid(String),
}

/// Query for the processes attached to the console of `target_pid`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleListRequest {
    pub target_pid: u32,
}

impl ConsoleListRequest {
    pub fn new(target_pid: u32) -> Self {
        Self { target_pid }
    }

    /// Encode as the helper's positional argument
    pub fn to_arg(&self) -> String {
        self.target_pid.to_string()
    }

    /// Parse from the helper's arguments (program name already stripped)
    pub fn from_args<I, S>(args: I) -> Result<Self, RequestArgsError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let args: Vec<S> = args.into_iter().collect();
        if args.len() != 1 {
            return Err(RequestArgsError::WrongArgCount(args.len()));
        }

        let raw = args[0].as_ref();
        raw.trim()
            .parse::<u32>()
            .map(Self::new)
            .map_err(|_| RequestArgsError::InvalidPid(raw.to_string()))
    }
}

/// One process attached to a console
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessRecord {
    pub pid: u32,
    /// Executable image name (file name only, e.g. `cmd.exe`)
    pub image_name: String,
}

impl ProcessRecord {
    pub fn new(pid: u32, image_name: impl Into<String>) -> Self {
        Self {
            pid,
            image_name: image_name.into(),
        }
    }
}

/// The helper's single reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsoleListResponse {
    /// Processes attached to the target's console, in console order
    ///
    /// Empty when the target has no console.
    Processes {
        target_pid: u32,
        processes: Vec<ProcessRecord>,
    },

    /// The native capability loaded but the query itself failed
    Failed { target_pid: u32, reason: String },
}

impl ConsoleListResponse {
    pub fn target_pid(&self) -> u32 {
        match self {
            Self::Processes { target_pid, .. } | Self::Failed { target_pid, .. } => *target_pid,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_arg_is_decimal() {
        assert_eq!(ConsoleListRequest::new(4242).to_arg(), "4242");
    }

    #[test]
    fn test_request_from_args() {
        let req = ConsoleListRequest::from_args(["1234"]).unwrap();
        assert_eq!(req.target_pid, 1234);
    }

    #[test]
    fn test_request_from_args_rejects_missing_pid() {
        let args: [&str; 0] = [];
        assert_eq!(
            ConsoleListRequest::from_args(args),
            Err(RequestArgsError::WrongArgCount(0))
        );
    }

    #[test]
    fn test_request_from_args_rejects_extra_args() {
        assert_eq!(
            ConsoleListRequest::from_args(["1", "2"]),
            Err(RequestArgsError::WrongArgCount(2))
        );
    }

    #[test]
    fn test_request_from_args_rejects_non_numeric() {
        assert!(matches!(
            ConsoleListRequest::from_args(["0x10"]),
            Err(RequestArgsError::InvalidPid(_))
        ));
        assert!(matches!(
            ConsoleListRequest::from_args(["-5"]),
            Err(RequestArgsError::InvalidPid(_))
        ));
    }

    #[test]
    fn test_response_target_pid() {
        let ok = ConsoleListResponse::Processes {
            target_pid: 7,
            processes: vec![ProcessRecord::new(7, "cmd.exe")],
        };
        let failed = ConsoleListResponse::Failed {
            target_pid: 9,
            reason: "AttachConsole failed".into(),
        };
        assert_eq!(ok.target_pid(), 7);
        assert_eq!(failed.target_pid(), 9);
    }
}

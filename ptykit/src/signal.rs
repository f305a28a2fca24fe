//! Signals deliverable through [`Terminal::kill`]
//!
//! [`Terminal::kill`]: crate::Terminal::kill

use std::fmt;
use std::str::FromStr;

use ptykit_utils::PtykitError;

/// A POSIX signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Signal {
    Hup,
    Int,
    Quit,
    Kill,
    Usr1,
    Usr2,
    #[default]
    Term,
    Cont,
    Stop,
    Winch,
    /// Any other signal by number
    Other(i32),
}

impl Signal {
    /// Conventional name, e.g. `SIGTERM`
    pub fn name(&self) -> String {
        match self {
            Self::Hup => "SIGHUP".into(),
            Self::Int => "SIGINT".into(),
            Self::Quit => "SIGQUIT".into(),
            Self::Kill => "SIGKILL".into(),
            Self::Usr1 => "SIGUSR1".into(),
            Self::Usr2 => "SIGUSR2".into(),
            Self::Term => "SIGTERM".into(),
            Self::Cont => "SIGCONT".into(),
            Self::Stop => "SIGSTOP".into(),
            Self::Winch => "SIGWINCH".into(),
            Self::Other(n) => format!("signal {}", n),
        }
    }

    /// Platform signal number
    #[cfg(unix)]
    pub fn as_raw(&self) -> i32 {
        match self {
            Self::Hup => libc::SIGHUP,
            Self::Int => libc::SIGINT,
            Self::Quit => libc::SIGQUIT,
            Self::Kill => libc::SIGKILL,
            Self::Usr1 => libc::SIGUSR1,
            Self::Usr2 => libc::SIGUSR2,
            Self::Term => libc::SIGTERM,
            Self::Cont => libc::SIGCONT,
            Self::Stop => libc::SIGSTOP,
            Self::Winch => libc::SIGWINCH,
            Self::Other(n) => *n,
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl FromStr for Signal {
    type Err = PtykitError;

    /// Accepts `SIGTERM`, `TERM`, or `term`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        let name = upper.strip_prefix("SIG").unwrap_or(&upper);
        Ok(match name {
            "HUP" => Self::Hup,
            "INT" => Self::Int,
            "QUIT" => Self::Quit,
            "KILL" => Self::Kill,
            "USR1" => Self::Usr1,
            "USR2" => Self::Usr2,
            "TERM" => Self::Term,
            "CONT" => Self::Cont,
            "STOP" => Self::Stop,
            "WINCH" => Self::Winch,
            _ => {
                return Err(PtykitError::invalid_options(format!(
                    "unknown signal: {}",
                    s
                )))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_signal_names() {
        assert_eq!("SIGTERM".parse::<Signal>().unwrap(), Signal::Term);
        assert_eq!("hup".parse::<Signal>().unwrap(), Signal::Hup);
        assert_eq!("SIGKILL".parse::<Signal>().unwrap(), Signal::Kill);
        assert!("SIGBOGUS".parse::<Signal>().is_err());
    }

    #[test]
    fn test_default_is_term() {
        assert_eq!(Signal::default(), Signal::Term);
        assert_eq!(Signal::default().to_string(), "SIGTERM");
    }

    #[cfg(unix)]
    #[test]
    fn test_raw_numbers() {
        assert_eq!(Signal::Kill.as_raw(), libc::SIGKILL);
        assert_eq!(Signal::Other(42).as_raw(), 42);
    }
}

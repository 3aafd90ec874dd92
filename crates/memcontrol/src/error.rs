use std::fmt;

/// Returned by [`Interception::install`](crate::Interception::install) when
/// the instrumented routing is already active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallError {
    AlreadyInstalled,
}

impl fmt::Display for InstallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstallError::AlreadyInstalled => {
                write!(f, "allocation interception is already installed")
            }
        }
    }
}

impl std::error::Error for InstallError {}

/// Failure to parse a [`ReportMode`](crate::ReportMode) or [`Format`](crate::Format) name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    kind: &'static str,
    value: String,
    expected: &'static [&'static str],
}

impl ParseError {
    pub(crate) fn new(kind: &'static str, value: &str, expected: &'static [&'static str]) -> Self {
        Self {
            kind,
            value: value.to_string(),
            expected,
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid {} '{}', expected one of: {}",
            self.kind,
            self.value,
            self.expected.join(", ")
        )
    }
}

impl std::error::Error for ParseError {}

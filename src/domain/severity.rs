//! Severity levels attached to every payload.

use std::fmt;

/// Ordered severity of an item.
///
/// `None` sorts lowest and is used for items that carry no level of their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "UPPERCASE"))]
#[repr(u8)]
pub enum Severity {
    /// No severity
    None = 0,
    /// Fine grained tracing
    Trace = 1,
    /// Debugging detail
    Debug = 2,
    /// Informational
    #[default]
    Info = 3,
    /// Normal but significant
    Notice = 4,
    /// Potential problem
    Warning = 5,
    /// Operation error
    Error = 6,
    /// Operation failure
    Failure = 7,
    /// Critical condition
    Critical = 8,
    /// Fatal condition
    Fatal = 9,
    /// System halt
    Halt = 10,
}

impl Severity {
    /// Upper-case name of the level.
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::None => "NONE",
            Severity::Trace => "TRACE",
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Notice => "NOTICE",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
            Severity::Failure => "FAILURE",
            Severity::Critical => "CRITICAL",
            Severity::Fatal => "FATAL",
            Severity::Halt => "HALT",
        }
    }

    /// Raw value for atomic storage.
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl From<u8> for Severity {
    fn from(value: u8) -> Self {
        match value {
            0 => Severity::None,
            1 => Severity::Trace,
            2 => Severity::Debug,
            3 => Severity::Info,
            4 => Severity::Notice,
            5 => Severity::Warning,
            6 => Severity::Error,
            7 => Severity::Failure,
            8 => Severity::Critical,
            9 => Severity::Fatal,
            _ => Severity::Halt,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

//! Classification shared by the error types of all federator crates.

use std::fmt;

/// How a failed operation should be treated by its caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad input or configuration; fatal to the operation, never retried automatically and
    /// surfaced to the operator.
    Input,

    /// An expected operational condition (funds, timeouts, network rejections); the caller may
    /// back off and retry with a fresh read of chain state.
    Resource,

    /// A software bug or a faulty/malicious peer; the offending candidate is rejected and the
    /// node carries on with other candidates.
    Protocol,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Input => write!(f, "input"),
            ErrorKind::Resource => write!(f, "resource"),
            ErrorKind::Protocol => write!(f, "protocol"),
        }
    }
}

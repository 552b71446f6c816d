//! Error types for topology discovery and target selection

use std::fmt;

use thiserror::Error;

/// Cluster error types
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Transport failure, timeout or cancellation talking to a node or monitor
    #[error("Node {address} unreachable: {reason}")]
    NodeUnreachable { address: String, reason: String },

    /// Monitor and data plane disagree, or a role query failed right after
    /// the monitor claimed a role
    #[error("Shard {shard} not converged at {address}: {reason}")]
    Convergence {
        shard: String,
        address: String,
        reason: String,
    },

    #[error("Wrong master count for shard {shard}: {count} != 1")]
    WrongMasterCount { shard: String, count: usize },

    /// The server answered, but rejected the command or replied unexpectedly
    #[error("Command rejected by {address}: {reason}")]
    Command { address: String, reason: String },

    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Bootstrap stopped early; `changed` lists the nodes already reconfigured
    #[error("Bootstrap of shard {shard} aborted after {} change(s): {source}", .changed.len())]
    Bootstrap {
        shard: String,
        changed: Vec<String>,
        #[source]
        source: Box<Error>,
    },

    #[error("Shard {shard}: {source}")]
    Shard {
        shard: String,
        #[source]
        source: Box<Error>,
    },

    #[error("{0}")]
    Multiple(Errors),
}

/// Coarse classification callers match on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Unreachable,
    Convergence,
    InvariantViolation,
    Command,
    Configuration,
}

impl Error {
    pub fn unreachable(address: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::NodeUnreachable {
            address: address.into(),
            reason: reason.to_string(),
        }
    }

    pub fn convergence(
        shard: impl Into<String>,
        address: impl Into<String>,
        reason: impl fmt::Display,
    ) -> Self {
        Self::Convergence {
            shard: shard.into(),
            address: address.into(),
            reason: reason.to_string(),
        }
    }

    pub fn command(address: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::Command {
            address: address.into(),
            reason: reason.to_string(),
        }
    }

    #[must_use]
    pub fn in_shard(self, shard: impl Into<String>) -> Self {
        Self::Shard {
            shard: shard.into(),
            source: Box::new(self),
        }
    }

    /// Classification of the error; wrappers report the class of what they wrap
    /// and a multi-error reports its most severe member.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::NodeUnreachable { .. } => ErrorClass::Unreachable,
            Self::Convergence { .. } => ErrorClass::Convergence,
            Self::WrongMasterCount { .. } => ErrorClass::InvariantViolation,
            Self::Command { .. } => ErrorClass::Command,
            Self::Configuration(_) => ErrorClass::Configuration,
            Self::Bootstrap { source, .. } | Self::Shard { source, .. } => source.class(),
            Self::Multiple(errors) => errors
                .iter()
                .map(Self::class)
                .max_by_key(|class| class.severity())
                .unwrap_or(ErrorClass::Convergence),
        }
    }

    /// Whether the reconciliation loop can expect a later pass to succeed
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Multiple(errors) => errors.iter().all(Self::is_retryable),
            _ => matches!(
                self.class(),
                ErrorClass::Unreachable | ErrorClass::Convergence | ErrorClass::Command
            ),
        }
    }
}

impl ErrorClass {
    const fn severity(self) -> u8 {
        match self {
            Self::Convergence => 0,
            Self::Unreachable => 1,
            Self::Command => 2,
            Self::InvariantViolation => 3,
            Self::Configuration => 4,
        }
    }
}

/// Ordered list of errors collected during a pass
#[derive(Debug, Clone, Default)]
pub struct Errors(Vec<Error>);

impl Errors {
    #[must_use]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, err: Error) {
        self.0.push(err);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Error> {
        self.0.iter()
    }

    /// `Ok` when empty, the error itself when there is exactly one,
    /// `Error::Multiple` otherwise
    pub fn into_result(mut self) -> Result<()> {
        match self.0.len() {
            0 => Ok(()),
            1 => Err(self.0.remove(0)),
            _ => Err(Error::Multiple(self)),
        }
    }
}

impl fmt::Display for Errors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error(s): ", self.0.len())?;
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{err}")?;
        }
        Ok(())
    }
}

impl Extend<Error> for Errors {
    fn extend<I: IntoIterator<Item = Error>>(&mut self, iter: I) {
        self.0.extend(iter);
    }
}

impl FromIterator<Error> for Errors {
    fn from_iter<I: IntoIterator<Item = Error>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for Errors {
    type Item = Error;
    type IntoIter = std::vec::IntoIter<Error>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Result type for cluster operations
pub type Result<T> = std::result::Result<T, Error>;

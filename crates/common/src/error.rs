use thiserror::Error;

/// Canonical nexq error taxonomy used across crates.
///
/// Classification guidance:
/// - [`NexqError::MalformedAddress`]: mailbox address tokens that fail to parse
/// - [`NexqError::Precondition`]: plan-construction contract violations
/// - [`NexqError::ChannelClosed`]: operations against cancelled/completed channels
/// - [`NexqError::Upstream`]: sender failures propagated into a receiving stage
/// - [`NexqError::Execution`]: runtime routing/merge/data-shape failures
/// - [`NexqError::Unsupported`]: syntactically valid but intentionally unimplemented behavior
#[derive(Debug, Error)]
pub enum NexqError {
    /// Mailbox address token with the wrong field count or a non-integer field.
    ///
    /// Deterministic, never retried: a malformed address means sender and
    /// receiver disagree about topology, and the decode failure surfaces as
    /// a stage-level failure rather than a per-message retry.
    #[error("malformed mailbox address: {0}")]
    MalformedAddress(String),

    /// Plan-time contract violation.
    ///
    /// Examples:
    /// - constructing an exchange spec with sort-on-sender requested
    /// - a hash/range exchange without a partition key selector
    ///
    /// Fails while the plan is being built and never reaches execution.
    #[error("precondition violated: {0}")]
    Precondition(String),

    /// Operation attempted on a channel after cancellation or completion.
    ///
    /// Signals the caller to stop producing/consuming; not a user-visible
    /// query error on its own.
    #[error("channel closed: {0}")]
    ChannelClosed(String),

    /// Failure propagated from an upstream sender into a receiving stage.
    ///
    /// Terminal for the receiving stage; triggers cancellation of the
    /// sibling channels of the same request.
    #[error("upstream failure: {0}")]
    Upstream(String),

    /// Runtime execution failures after planning succeeded.
    ///
    /// Examples:
    /// - partition key column out of range for a batch
    /// - merge input that is missing a collation column
    #[error("execution error: {0}")]
    Execution(String),

    /// Valid request for a feature not implemented in the current version.
    #[error("unsupported: {0}")]
    Unsupported(String),
}

/// Standard nexq result alias.
pub type Result<T> = std::result::Result<T, NexqError>;

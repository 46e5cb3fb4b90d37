use thiserror::Error;

/// Invalid setup of a test stage. Raised before any stressor starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("No operations set!")]
    NoOperations,
    #[error("operation #{index}: interval {interval} ms must be positive")]
    InvalidInterval { index: usize, interval: i64 },
    #[error("operation #{index}: {invocations} invocations per interval exceed the supported maximum")]
    InvocationsOutOfRange { index: usize, invocations: i64 },
    #[error("number of stressor threads must be positive")]
    NoThreads,
    #[error("operation {0} is not supported by the service under test")]
    UnsupportedOperation(String),
    #[error("cluster size must be positive and worker index {worker_index} below it (got {cluster_size})")]
    InvalidPartition {
        worker_index: usize,
        cluster_size: usize,
    },
    #[error("number of keys must not be negative (got {0})")]
    NegativeKeys(i64),
    #[error("cannot parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Misuse of the statistics model: mixing incompatible representations or
/// conflicting operation groups.
#[derive(Debug, Error)]
pub enum StatsError {
    #[error("cannot merge {this} statistics with {other} statistics")]
    MismatchedMerge {
        this: &'static str,
        other: &'static str,
    },
    #[error(
        "cannot merge histograms bounded by {this_max_value} ns / {this_digits} digits with {other_max_value} ns / {other_digits} digits"
    )]
    MismatchedHistogramBounds {
        this_max_value: u64,
        this_digits: u8,
        other_max_value: u64,
        other_digits: u8,
    },
    #[error("cannot merge composite statistics of {this} and {other} children")]
    MismatchedChildren { this: usize, other: usize },
    #[error("different periods: {this} ms vs. {other} ms")]
    DifferentPeriods { this: u64, other: u64 },
    #[error("statistics don't have begin/end set correctly")]
    UnsetWindow,
    #[error("operations group {0} is already registered with different operations")]
    GroupConflict(String),
    #[error("operation {operation} already belongs to group {group}")]
    OperationInOtherGroup { operation: String, group: String },
    #[error("invalid histogram: {0}")]
    Histogram(String),
}

/// Failure of a single invocation against the service under test.
#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    #[error("service unavailable: {0}")]
    Unavailable(String),
    #[error("{operation} failed: {message}")]
    Operation { operation: String, message: String },
}

/// Failure to reach or query one cluster endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PollError {
    #[error("cannot connect to {url}: {message}")]
    Connect { url: String, message: String },
    #[error("polling {node} failed: {message}")]
    Query { node: String, message: String },
    #[error("polling was interrupted")]
    Interrupted,
}

/// Errors surfaced by an executor running a scenario.
#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Stats(#[from] StatsError),
    #[error("cannot spawn stressor thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// The calling thread was asked to stop while blocked. Callers treat this as
/// a normal shutdown path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("thread was interrupted")]
pub struct Interrupted;

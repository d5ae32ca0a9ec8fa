//! Node errors and their classification into user-meaningful causes.

use crate::node::TxHash;
use std::fmt;
use thiserror::Error;

/// EIP-1193 "user rejected request" code.
pub const USER_REJECTED_CODE: i64 = 4001;

const REJECTION_MARKERS: &[&str] = &["user rejected", "user denied", "rejected the request"];
const SIMULATION_MARKERS: &[&str] = &["simulation failed", "execution reverted"];
const MAX_DETAIL_CHARS: usize = 160;
const GENERIC_DETAIL: &str = "Transaction failed";

/// Failure raised by the node or wallet boundary.
#[derive(Debug, Clone, Error)]
pub enum NodeError {
    /// Connection failure or timeout, after the transport's own retries.
    #[error("transport error: {0}")]
    Transport(String),
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("decode error: {0}")]
    Decode(String),
    /// The dry run of a call failed; wraps the underlying error.
    #[error("simulation failed: {0}")]
    Simulation(Box<NodeError>),
    #[error("transaction 0x{} reverted", hex::encode(.0))]
    Reverted(TxHash),
    #[error("log subscription closed")]
    Closed,
    /// The node serves a different chain than the client is configured for.
    #[error("wrong chain: expected chain id {expected}, node reports {actual}")]
    WrongChain { expected: u64, actual: u64 },
}

impl From<reqwest::Error> for NodeError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            NodeError::Decode(e.to_string())
        } else {
            NodeError::Transport(e.to_string())
        }
    }
}

impl From<anyhow::Error> for NodeError {
    fn from(e: anyhow::Error) -> Self {
        NodeError::Decode(format!("{:#}", e))
    }
}

/// Closed taxonomy of failure causes shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    UserRejected,
    SimulationFailed,
    WalletNotConnected,
    NetworkError,
    Unknown,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::UserRejected => "user rejected the request",
            ErrorKind::SimulationFailed => "simulation failed",
            ErrorKind::WalletNotConnected => "wallet not connected",
            ErrorKind::NetworkError => "network error occurred",
            ErrorKind::Unknown => "unknown error",
        };
        f.write_str(s)
    }
}

/// A classified failure. `source` keeps the original node error for callers that log it.
#[derive(Debug, Clone, Error)]
#[error("{kind}{}", .detail.as_ref().map(|d| format!(": {}", d)).unwrap_or_default())]
pub struct ClassifiedError {
    pub kind: ErrorKind,
    pub detail: Option<String>,
    pub source: Option<NodeError>,
}

impl ClassifiedError {
    pub fn wallet_not_connected() -> Self {
        Self {
            kind: ErrorKind::WalletNotConnected,
            detail: None,
            source: None,
        }
    }

    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind == kind
    }
}

/// Classify a node error. Rejection wins over everything else, since wallets attach
/// rejection markers to errors that also carry revert or generic messages.
pub fn classify(err: &NodeError) -> ClassifiedError {
    let detail = short_message(err);
    let kind = if is_user_rejection(err) {
        ErrorKind::UserRejected
    } else if is_simulation_failure(err) {
        ErrorKind::SimulationFailed
    } else if matches!(err, NodeError::Transport(_)) {
        ErrorKind::NetworkError
    } else {
        ErrorKind::Unknown
    };
    let detail = match (kind, detail) {
        (_, Some(d)) => Some(d),
        (ErrorKind::Unknown, None) => Some(GENERIC_DETAIL.to_string()),
        (_, None) => None,
    };
    ClassifiedError {
        kind,
        detail,
        source: Some(err.clone()),
    }
}

fn is_user_rejection(err: &NodeError) -> bool {
    match err {
        NodeError::Rpc { code, message } => {
            *code == USER_REJECTED_CODE || contains_marker(message, REJECTION_MARKERS)
        }
        NodeError::Simulation(inner) => is_user_rejection(inner),
        other => contains_marker(&other.to_string(), REJECTION_MARKERS),
    }
}

fn is_simulation_failure(err: &NodeError) -> bool {
    matches!(err, NodeError::Simulation(_)) || contains_marker(&err.to_string(), SIMULATION_MARKERS)
}

fn contains_marker(message: &str, markers: &[&str]) -> bool {
    let lower = message.to_lowercase();
    markers.iter().any(|m| lower.contains(m))
}

/// The innermost human-readable message, if it is short enough to show.
fn short_message(err: &NodeError) -> Option<String> {
    let message = match err {
        NodeError::Rpc { message, .. } => message.clone(),
        NodeError::Simulation(inner) => return short_message(inner),
        NodeError::Transport(m) | NodeError::Decode(m) => m.clone(),
        other => other.to_string(),
    };
    let message = message.trim();
    if message.is_empty() || message.chars().count() > MAX_DETAIL_CHARS {
        None
    } else {
        Some(message.to_string())
    }
}

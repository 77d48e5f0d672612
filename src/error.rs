//! Crate-wide error taxonomy (§4.9 / §7).
//!
//! Every error kind named in the error-handling table is represented as its
//! own hand-rolled `Display` + `std::error::Error` type, mirroring the
//! convention already used throughout this codebase (`ToolError`,
//! `OrchestrationError`) rather than reaching for `thiserror`. Each type also
//! implements [`CallerVisibility`] so the HTTP surface (when the `server`
//! feature is enabled) can map it to the right status code without
//! duplicating the §7 rule of thumb in two places.

use std::fmt;

/// Classifies how an error should surface to the caller, per §7's rule of
/// thumb: caller-fixable input errors are 4xx, operator-fixable errors are
/// 5xx, and the model's own mistakes surface as 200 with error-flagged
/// content so the conversation stays coherent.
pub trait CallerVisibility {
    /// The HTTP status code this error maps to.
    fn status_code(&self) -> u16;
    /// Whether this error still produces a 200 with error-flagged assistant
    /// content rather than an HTTP error status (e.g. `CommandFailed`
    /// surfaced inline in a non-chain turn).
    fn is_model_fault(&self) -> bool {
        false
    }
}

/// Provider-rotation errors (§4.1, §7).
#[derive(Debug, Clone)]
pub enum ProviderError {
    /// 5xx, 429, or a network error. The router retries with backoff/rotation.
    Transient(String),
    /// 4xx configuration error or missing key. No local recovery.
    Fatal(String),
    /// Total attempts across all candidates exceeded `max_failures * |candidates|`.
    Exhausted {
        /// Providers that were attempted, in attempt order.
        tried: Vec<String>,
    },
    /// The provider does not declare the requested service/capability.
    Unsupported {
        provider: String,
        service: String,
    },
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderError::Transient(msg) => write!(f, "transient provider error: {msg}"),
            ProviderError::Fatal(msg) => write!(f, "fatal provider error: {msg}"),
            ProviderError::Exhausted { tried } => {
                write!(f, "provider candidates exhausted, tried: {}", tried.join(", "))
            }
            ProviderError::Unsupported { provider, service } => {
                write!(f, "provider '{provider}' does not support service '{service}'")
            }
        }
    }
}

impl std::error::Error for ProviderError {}

impl CallerVisibility for ProviderError {
    fn status_code(&self) -> u16 {
        match self {
            ProviderError::Transient(_) => 502,
            ProviderError::Fatal(_) => 400,
            ProviderError::Exhausted { .. } => 503,
            ProviderError::Unsupported { .. } => 400,
        }
    }
}

/// Extension/command dispatch errors (§4.2, §7).
#[derive(Debug, Clone)]
pub enum DispatchError {
    /// No extension registers a command with this name.
    CommandUnknown(String),
    /// The command exists but is not in the agent's enabled-commands set.
    CommandDisabled(String),
    /// A required argument was missing, or a provided one failed type coercion.
    ArgumentError { command: String, reason: String },
    /// The command executed but returned a non-zero exit / threw / the
    /// sandbox reported a non-zero exit code.
    CommandFailed {
        command: String,
        cause: String,
        stderr: Option<String>,
    },
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchError::CommandUnknown(name) => write!(f, "unknown command: {name}"),
            DispatchError::CommandDisabled(name) => write!(f, "command disabled for agent: {name}"),
            DispatchError::ArgumentError { command, reason } => {
                write!(f, "argument error in '{command}': {reason}")
            }
            DispatchError::CommandFailed { command, cause, stderr } => {
                write!(f, "command '{command}' failed: {cause}")?;
                if let Some(stderr) = stderr {
                    write!(f, " (stderr: {stderr})")?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for DispatchError {}

impl CallerVisibility for DispatchError {
    fn status_code(&self) -> u16 {
        match self {
            DispatchError::CommandUnknown(_) => 400,
            DispatchError::CommandDisabled(_) => 400,
            DispatchError::ArgumentError { .. } => 400,
            DispatchError::CommandFailed { .. } => 200,
        }
    }

    fn is_model_fault(&self) -> bool {
        matches!(self, DispatchError::CommandFailed { .. })
    }
}

/// Conversation persistence errors (§4.3, §7).
#[derive(Debug, Clone)]
pub enum ConversationError {
    /// I/O or (de)serialization failure reading/writing persisted state.
    StorageError(String),
    /// Referenced interaction id does not exist in this conversation.
    NotFound { conversation: String, id: u64 },
    /// A rename target collides with an existing conversation name.
    Conflict(String),
}

impl fmt::Display for ConversationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConversationError::StorageError(msg) => write!(f, "storage error: {msg}"),
            ConversationError::NotFound { conversation, id } => {
                write!(f, "interaction {id} not found in conversation '{conversation}'")
            }
            ConversationError::Conflict(name) => write!(f, "conversation name conflict: {name}"),
        }
    }
}

impl std::error::Error for ConversationError {}

impl CallerVisibility for ConversationError {
    fn status_code(&self) -> u16 {
        match self {
            ConversationError::StorageError(_) => 500,
            ConversationError::NotFound { .. } => 404,
            ConversationError::Conflict(_) => 409,
        }
    }
}

/// Startup/configuration errors (§4.8, §6 exit codes).
#[derive(Debug, Clone)]
pub struct ConfigError(pub String);

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "configuration error: {}", self.0)
    }
}

impl std::error::Error for ConfigError {}

/// Chain-run errors (§4.5, §7). Wraps whichever step-level error triggered
/// the transition to `Failed`, plus chain-specific conditions.
#[derive(Debug, Clone)]
pub enum ChainError {
    /// A step failed; `step` is the 1-based step number, `cause` the
    /// underlying error's display text.
    StepFailed { step: u32, cause: String },
    /// Two steps in the same chain declared the same `step_number`.
    DuplicateStepNumber(u32),
    /// Nested-chain recursion exceeded the configured bound, rejected
    /// before the nested run starts.
    RecursionLimitExceeded { limit: u32 },
    /// The run was cancelled by the caller or by deadline expiry.
    Cancelled,
    /// The per-step or overall request deadline elapsed.
    DeadlineExceeded,
    /// The heavy-task concurrency ceiling (§5) was already saturated; the
    /// request was refused rather than queued.
    ConcurrencyLimitExceeded,
}

impl fmt::Display for ChainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainError::StepFailed { step, cause } => write!(f, "step {step} failed: {cause}"),
            ChainError::DuplicateStepNumber(n) => write!(f, "duplicate step_number: {n}"),
            ChainError::RecursionLimitExceeded { limit } => {
                write!(f, "chain recursion depth exceeded limit of {limit}")
            }
            ChainError::Cancelled => write!(f, "chain run cancelled"),
            ChainError::DeadlineExceeded => write!(f, "chain run deadline exceeded"),
            ChainError::ConcurrencyLimitExceeded => write!(f, "heavy-task concurrency ceiling reached"),
        }
    }
}

impl std::error::Error for ChainError {}

impl CallerVisibility for ChainError {
    fn status_code(&self) -> u16 {
        match self {
            ChainError::StepFailed { .. } => 200,
            ChainError::DuplicateStepNumber(_) => 400,
            ChainError::RecursionLimitExceeded { .. } => 400,
            ChainError::Cancelled => 499,
            ChainError::DeadlineExceeded => 504,
            ChainError::ConcurrencyLimitExceeded => 503,
        }
    }

    fn is_model_fault(&self) -> bool {
        matches!(self, ChainError::StepFailed { .. })
    }
}

impl From<DispatchError> for ChainError {
    fn from(e: DispatchError) -> Self {
        // step number is filled in by the caller, which knows which step
        // is active; callers use `ChainError::StepFailed` directly when
        // they have that context. This conversion exists for `?`-propagation
        // sites that attach the step number immediately after.
        ChainError::StepFailed { step: 0, cause: e.to_string() }
    }
}

impl From<ProviderError> for ChainError {
    fn from(e: ProviderError) -> Self {
        ChainError::StepFailed { step: 0, cause: e.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_status_codes() {
        assert_eq!(ProviderError::Transient("x".into()).status_code(), 502);
        assert_eq!(ProviderError::Fatal("x".into()).status_code(), 400);
        assert_eq!(
            ProviderError::Exhausted { tried: vec!["P1".into()] }.status_code(),
            503
        );
    }

    #[test]
    fn dispatch_command_failed_is_model_fault() {
        let e = DispatchError::CommandFailed {
            command: "echo".into(),
            cause: "boom".into(),
            stderr: None,
        };
        assert!(e.is_model_fault());
        assert_eq!(e.status_code(), 200);
    }

    #[test]
    fn chain_step_failed_is_model_fault_but_cancelled_is_not() {
        let step = ChainError::StepFailed { step: 2, cause: "x".into() };
        assert!(step.is_model_fault());
        assert!(!ChainError::Cancelled.is_model_fault());
        assert_eq!(ChainError::Cancelled.status_code(), 499);
        assert_eq!(ChainError::DeadlineExceeded.status_code(), 504);
    }
}

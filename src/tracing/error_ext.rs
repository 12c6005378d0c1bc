//! Error tracing extensions
//!
//! Log a bridge error once, with its code, classification and source chain.

use crate::types::BridgeError;
use std::error::Error as StdError;

/// Extension trait for adding tracing context to errors
pub trait ErrorTraceExt {
    /// Log the error with its code, retryable status and source chain
    fn trace_error(&self) -> &Self;
}

/// Sources below the error, outermost first
fn source_chain(error: &dyn StdError) -> Vec<String> {
    let mut chain = Vec::new();
    let mut current = error.source();
    while let Some(source) = current {
        chain.push(source.to_string());
        current = source.source();
    }
    chain
}

impl ErrorTraceExt for BridgeError {
    fn trace_error(&self) -> &Self {
        let error_code = self.error_code();
        let chain = source_chain(self);

        // Client errors are logged at warn without the chain
        if self.is_client_error() {
            tracing::warn!(
                error = %self,
                error_code = error_code.code(),
                error_code_name = ?error_code,
                "Request rejected"
            );
        } else {
            tracing::error!(
                error = %self,
                error_code = error_code.code(),
                error_code_name = ?error_code,
                notification_code = self.notification_code(),
                is_retryable = self.is_retryable(),
                error_chain_len = chain.len(),
                error_chain = ?chain,
                "Error occurred with full context"
            );
        }
        self
    }
}

/// Extension trait for Result types
pub trait ResultTraceExt<T>: Sized {
    /// Convert the error into a [`BridgeError`] and log it
    fn trace_context(self) -> Result<T, BridgeError>;
}

impl<T, E> ResultTraceExt<T> for Result<T, E>
where
    BridgeError: From<E>,
{
    fn trace_context(self) -> Result<T, BridgeError> {
        self.map_err(|e| {
            let error = BridgeError::from(e);
            error.trace_error();
            error
        })
    }
}

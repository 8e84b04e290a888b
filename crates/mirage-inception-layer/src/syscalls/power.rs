//! Execution-state blocking.
//!
//! A sandboxed guest must not keep the display or system awake. The
//! substitute refuses every request and never reaches the real entry point.

use crate::error::LayerError;
use crate::platform::PowerApi;
use crate::reals::Symbol;

#[derive(Debug, Clone, Copy, Default)]
pub struct ExecutionStateBlocker;

impl PowerApi for ExecutionStateBlocker {
    fn set_thread_execution_state(&self, flags: u32) -> Result<u32, LayerError> {
        mirage_config::log_layer_debug!("execution state request denied", flags = flags);
        Err(LayerError::AccessDenied(Symbol::SetThreadExecutionState))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ERROR_ACCESS_DENIED;

    #[test]
    fn test_every_request_is_denied() {
        // ES_CONTINUOUS | ES_SYSTEM_REQUIRED | ES_DISPLAY_REQUIRED
        let err = ExecutionStateBlocker
            .set_thread_execution_state(0x8000_0003)
            .unwrap_err();
        assert_eq!(err, LayerError::AccessDenied(Symbol::SetThreadExecutionState));
        assert_eq!(err.os_code(), ERROR_ACCESS_DENIED);
    }
}

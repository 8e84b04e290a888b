use crate::reals::Symbol;

/// Win32 `ERROR_ACCESS_DENIED`.
pub const ERROR_ACCESS_DENIED: u32 = 5;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LayerError {
    /// The substitute refuses the call outright; the real entry point is not invoked.
    #[error("{0} denied by policy")]
    AccessDenied(Symbol),

    /// A handle's object name does not fit the fixed name buffer.
    #[error("object name of {len} characters exceeds the {max} character limit")]
    ObjectNameTooLong { len: usize, max: usize },

    /// The real entry point reported failure with the given OS error code.
    #[error("{symbol} failed with OS error {code}")]
    Os { symbol: Symbol, code: u32 },

    /// The real entry point does not exist on this platform.
    #[error("{0} is not available on this platform")]
    Unsupported(Symbol),
}

impl LayerError {
    /// Win32-style last-error code reported to the guest.
    pub fn os_code(&self) -> u32 {
        match self {
            LayerError::AccessDenied(_) => ERROR_ACCESS_DENIED,
            LayerError::ObjectNameTooLong { .. } => 206, // ERROR_FILENAME_EXCED_RANGE
            LayerError::Os { code, .. } => *code,
            LayerError::Unsupported(_) => 120, // ERROR_CALL_NOT_IMPLEMENTED
        }
    }
}

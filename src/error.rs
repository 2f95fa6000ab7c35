use thiserror::Error;

/// Failure category shared by every fallible VFX entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    CapacityExceeded,
    OutOfMemory,
    BackendFailure,
}

impl ErrorKind {
    pub fn label(self) -> &'static str {
        match self {
            ErrorKind::InvalidArgument => "invalid argument",
            ErrorKind::NotFound => "not found",
            ErrorKind::CapacityExceeded => "capacity exceeded",
            ErrorKind::OutOfMemory => "out of memory",
            ErrorKind::BackendFailure => "backend failure",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VfxError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("capacity exceeded: {0}")]
    CapacityExceeded(String),
    #[error("out of memory: {0}")]
    OutOfMemory(String),
    #[error("backend failure: {0}")]
    BackendFailure(String),
}

impl VfxError {
    pub fn invalid(message: impl Into<String>) -> Self {
        VfxError::InvalidArgument(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        VfxError::NotFound(message.into())
    }

    pub fn capacity(message: impl Into<String>) -> Self {
        VfxError::CapacityExceeded(message.into())
    }

    pub fn out_of_memory(message: impl Into<String>) -> Self {
        VfxError::OutOfMemory(message.into())
    }

    pub fn backend(message: impl Into<String>) -> Self {
        VfxError::BackendFailure(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            VfxError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            VfxError::NotFound(_) => ErrorKind::NotFound,
            VfxError::CapacityExceeded(_) => ErrorKind::CapacityExceeded,
            VfxError::OutOfMemory(_) => ErrorKind::OutOfMemory,
            VfxError::BackendFailure(_) => ErrorKind::BackendFailure,
        }
    }
}

pub type VfxResult<T> = Result<T, VfxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_matches_variant() {
        assert_eq!(VfxError::invalid("x").kind(), ErrorKind::InvalidArgument);
        assert_eq!(VfxError::not_found("x").kind(), ErrorKind::NotFound);
        assert_eq!(VfxError::capacity("x").kind(), ErrorKind::CapacityExceeded);
        assert_eq!(VfxError::out_of_memory("x").kind(), ErrorKind::OutOfMemory);
        assert_eq!(VfxError::backend("x").kind(), ErrorKind::BackendFailure);
    }

    #[test]
    fn display_includes_category_and_context() {
        let err = VfxError::not_found("emitter 3v1");
        assert_eq!(err.to_string(), "not found: emitter 3v1");
        assert_eq!(err.kind().label(), "not found");
    }
}

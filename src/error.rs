//! Failure classification shared by every stage of the pipeline.
use std::convert::Infallible;

/// How a failure affects the capture-to-present pipeline.
#[derive(Eq, PartialEq, Clone, Copy, Debug, Hash)]
pub enum ErrorKind {
    /// Device, shader or buffer creation failed while starting up. Aborts startup.
    FatalInit,
    /// Timeout, access loss or a present that was not accepted. The loop keeps
    /// presenting the last good frame.
    TransientCapture,
    /// The capture changed size or format. Dependent views are recreated lazily.
    ResourceInvalidated,
}

impl ErrorKind {
    /// Returns `true` when the failure must abort startup.
    #[must_use]
    #[inline]
    pub const fn is_fatal(self) -> bool {
        matches!(self, Self::FatalInit)
    }
}

/// Errors that can be classified into an [`ErrorKind`].
pub trait Classify {
    /// Returns the pipeline impact of this error.
    fn kind(&self) -> ErrorKind;
}

impl Classify for Infallible {
    fn kind(&self) -> ErrorKind {
        match *self {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_init_failures_are_fatal() {
        assert!(ErrorKind::FatalInit.is_fatal());
        assert!(!ErrorKind::TransientCapture.is_fatal());
        assert!(!ErrorKind::ResourceInvalidated.is_fatal());
    }
}

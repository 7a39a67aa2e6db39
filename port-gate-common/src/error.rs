use crate::cursor::CursorError;

/// Conditions that stop a gate short of a port comparison.
///
/// None of these escape a gate: each is turned into a verdict where it is
/// detected. They are kept as values so callers can log the reason.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum GateError {
    PolicyUnconfigured,
    OutOfBounds,
    Malformed,
    /// IPv4 fragment other than the first; it carries no TCP header.
    NonInitialFragment,
    UnsupportedEtherType(u16),
    UnsupportedTransport(u8),
}

impl From<CursorError> for GateError {
    #[inline(always)]
    fn from(err: CursorError) -> Self {
        match err {
            CursorError::OutOfBounds => GateError::OutOfBounds,
            CursorError::Malformed => GateError::Malformed,
        }
    }
}

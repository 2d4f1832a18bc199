//! Code generation error types.

/// Error type for emission.
///
/// Three kinds, mirroring how emission fails: a construct the lowerer
/// has no translation for, an SSA invariant the input violates, and
/// formatting failures from the output sink. All are propagated with
/// `?`; none is recoverable by the caller beyond discarding the
/// partial output.
#[derive(Debug)]
pub enum CodeGenError {
    /// An opcode, type, or builtin the lowerer does not handle. The
    /// payload carries the offending SSA rendering.
    Unsupported(String),
    /// The input broke an SSA invariant the emitter relies on.
    Invariant(String),
    /// A formatting error while writing C text.
    Format(std::fmt::Error),
}

impl std::fmt::Display for CodeGenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodeGenError::Unsupported(s) => write!(f, "unsupported construct: {s}"),
            CodeGenError::Invariant(s) => write!(f, "SSA invariant violation: {s}"),
            CodeGenError::Format(e) => write!(f, "C generation error: {e}"),
        }
    }
}

impl std::error::Error for CodeGenError {}

impl From<std::fmt::Error> for CodeGenError {
    fn from(e: std::fmt::Error) -> Self {
        CodeGenError::Format(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_carries_kind_and_payload() {
        let e = CodeGenError::Unsupported("Select of 0 states".to_string());
        assert_eq!(e.to_string(), "unsupported construct: Select of 0 states");
        let e = CodeGenError::Invariant("missing parent".to_string());
        assert!(e.to_string().starts_with("SSA invariant violation"));
    }
}

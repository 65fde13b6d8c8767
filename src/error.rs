use thiserror::Error;

/// Coarse classification of a [`CircuitError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Duplicate ids, fan-in conflicts, width mismatches, dangling references.
    Structural,
    /// Undeclared parameter symbols, bad parameter values, memory size mismatches.
    Parameter,
    /// Malformed project input; the load was rolled back.
    Load,
    /// Internal engine invariant broken. Never expected.
    Simulation,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CircuitError {
    #[error("Duplicate id '{0}'")]
    DuplicateId(String),

    #[error("Width mismatch on {context}: expected {expected} bits, found {actual}")]
    WidthMismatch {
        context: String,
        expected: u32,
        actual: u32,
    },

    #[error("Input {component}.{port} is already driven by wire '{existing}'")]
    FanInConflict {
        component: String,
        port: String,
        existing: String,
    },

    #[error("Unknown component '{0}'")]
    UnknownComponent(String),

    #[error("Component '{component}' has no port '{port}'")]
    UnknownPort { component: String, port: String },

    #[error("Unknown wire '{0}'")]
    UnknownWire(String),

    #[error("Unknown component type '{0}'")]
    UnknownType(String),

    #[error("Invalid port {component}.{port}: {reason}")]
    InvalidPort {
        component: String,
        port: String,
        reason: String,
    },

    #[error("Unknown parameter '${symbol}' in {context}")]
    UnknownParameter { symbol: String, context: String },

    #[error("Invalid value for '{name}' on {context}: {reason}")]
    InvalidParameter {
        name: String,
        context: String,
        reason: String,
    },

    #[error("Memory '{component}' holds {capacity} words, got {actual}")]
    SizeMismatch {
        component: String,
        capacity: usize,
        actual: usize,
    },

    #[error("Definition '{0}' instantiates itself")]
    RecursiveDefinition(String),

    #[error("Unknown custom definition '{0}'")]
    UnknownDefinition(String),

    #[error("Edit context: {0}")]
    EditContext(String),

    #[error("Expression error: {0}")]
    Expression(String),

    #[error("Malformed project at {entry}: {reason}")]
    Load { entry: String, reason: String },

    #[error("Assembly error on line {line}: {message}")]
    Assembly { line: usize, message: String },

    #[error("Simulation invariant violated: {0}")]
    SimulationInvariant(String),
}

impl CircuitError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CircuitError::DuplicateId(_)
            | CircuitError::WidthMismatch { .. }
            | CircuitError::FanInConflict { .. }
            | CircuitError::UnknownComponent(_)
            | CircuitError::UnknownPort { .. }
            | CircuitError::UnknownWire(_)
            | CircuitError::UnknownType(_)
            | CircuitError::InvalidPort { .. }
            | CircuitError::UnknownDefinition(_)
            | CircuitError::RecursiveDefinition(_)
            | CircuitError::EditContext(_) => ErrorKind::Structural,
            CircuitError::UnknownParameter { .. }
            | CircuitError::InvalidParameter { .. }
            | CircuitError::SizeMismatch { .. }
            | CircuitError::Expression(_)
            | CircuitError::Assembly { .. } => ErrorKind::Parameter,
            CircuitError::Load { .. } => ErrorKind::Load,
            CircuitError::SimulationInvariant(_) => ErrorKind::Simulation,
        }
    }

    /// Wrap an error raised while building one entry of a project.
    pub fn at_entry(self, entry: impl Into<String>) -> Self {
        match self {
            CircuitError::Load { .. } => self,
            other => CircuitError::Load {
                entry: entry.into(),
                reason: other.to_string(),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, CircuitError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(CircuitError::DuplicateId("a".into()).kind(), ErrorKind::Structural);
        assert_eq!(
            CircuitError::SizeMismatch { component: "rom".into(), capacity: 4, actual: 5 }.kind(),
            ErrorKind::Parameter
        );
        assert_eq!(
            CircuitError::SimulationInvariant("x".into()).kind(),
            ErrorKind::Simulation
        );
    }

    #[test]
    fn test_at_entry_wraps_once() {
        let err = CircuitError::UnknownComponent("x".into()).at_entry("main.wires[0]");
        assert_eq!(err.kind(), ErrorKind::Load);
        let again = err.clone().at_entry("outer");
        assert_eq!(err, again);
        assert!(err.to_string().contains("main.wires[0]"));
    }
}

use std::fmt::{self, Display, Formatter};

use log::{error, warn};
use thiserror::Error;

use crate::frontend::{Position, Token};

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum CompileError {
    // lexical
    #[error("unexpected character `{0}`")]
    UnexpectedCharacter(char),
    #[error("expected `=` after `{0}`")]
    IncompleteOperator(char),
    #[error("integer literal {0} does not fit in 64 bits")]
    NumberTooLarge(String),

    // syntactic
    #[error("expected {expected}, received {received}")]
    UnexpectedToken { expected: String, received: Token },
    #[error("expected a statement, received {0}")]
    ExpectedStatement(Token),
    #[error("expected a factor, received {0}")]
    ExpectedFactor(Token),
    #[error("expected a relational operator, received {0}")]
    ExpectedRelation(Token),

    // semantic
    #[error("identifier `{0}` is not defined")]
    UndefinedIdentifier(String),
    #[error("`{name}` is already defined in scope `{scope}`")]
    Redefinition { name: String, scope: String },
    #[error("`{0}` is not a function or procedure")]
    NotCallable(String),
    #[error("{kind} `{name}` takes {expected} parameters, {actual} given")]
    ArityMismatch {
        kind: &'static str,
        name: String,
        expected: usize,
        actual: usize,
    },
    #[error("cannot assign to {kind} `{name}`")]
    NotAssignable { kind: &'static str, name: String },
    #[error("{kind} `{name}` cannot be used as a value")]
    NotAValue { kind: &'static str, name: String },
    #[error("cannot use the result of a procedure as a value")]
    ProcedureAsValue,
    #[error("variable `{0}` first needs to be initialized")]
    Uninitialized(String),
    #[error("global variable `{0}` might not be initialized")]
    PossiblyUninitializedGlobal(String),
    #[error("`{0}` is not an array")]
    NotAnArray(String),
    #[error("array `{0}` cannot be used without indices")]
    ArrayWithoutIndices(String),
    #[error("array `{name}` has {expected} dimensions, {actual} indices given")]
    DimensionMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },
    #[error("array `{name}` has dimension {dimension}, expected at least 1")]
    InvalidDimension { name: String, dimension: i64 },
    #[error("array `{0}` is too large to allocate")]
    ArrayTooLarge(String),
    #[error("division by constant zero is left to run time")]
    DivisionByZero,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Clone, Debug)]
pub struct Diagnostic {
    pub severity: Severity,
    pub position: Position,
    pub error: CompileError,
}

impl Display for Diagnostic {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let label = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(f, "{}: {}: {}", self.position, label, self.error)
    }
}

#[derive(Debug, Default)]
pub struct Diagnostics {
    errors: Vec<Diagnostic>,
    warnings: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&mut self, position: Position, error: CompileError) {
        error!("{error} at {position}");
        self.errors.push(Diagnostic {
            severity: Severity::Error,
            position,
            error,
        });
    }

    pub fn warn(&mut self, position: Position, error: CompileError) {
        warn!("{error} at {position}");
        self.warnings.push(Diagnostic {
            severity: Severity::Warning,
            position,
            error,
        });
    }

    pub fn errors(&self) -> &[Diagnostic] {
        &self.errors
    }

    pub fn warnings(&self) -> &[Diagnostic] {
        &self.warnings
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

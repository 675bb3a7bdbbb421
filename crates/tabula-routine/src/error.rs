use thiserror::Error;

/// Everything that can go wrong while parsing or running a routine.
///
/// The `Display` text is what ends up in repair feedback, so messages name
/// the offending column, variable or function directly.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RoutineError {
    #[error("syntax error at line {line}, column {column}: {message}")]
    Parse {
        line: usize,
        column: usize,
        message: String,
    },
    #[error("routine `{0}` must declare a `table` parameter")]
    MissingTable(String),
    #[error("parameter `{0}` is declared more than once")]
    DuplicateParameter(String),
    #[error("column `{0}` does not exist in the table header")]
    UnknownColumn(String),
    #[error("`{0}` is not defined")]
    UnknownVariable(String),
    #[error("unknown function `{0}`")]
    UnknownFunction(String),
    #[error("key `{0}` is not present in the map")]
    MissingKey(String),
    #[error("`{name}` expects {expected} argument(s) but got {found}")]
    Arity {
        name: String,
        expected: String,
        found: usize,
    },
    #[error("type error: {0}")]
    Type(String),
    #[error("index {index} is out of range for length {len}")]
    IndexOutOfRange { index: i64, len: usize },
    #[error("division by zero")]
    DivisionByZero,
    #[error("`{0}` outside of a loop")]
    StrayControl(String),
    #[error("routine exceeded {0} evaluation steps")]
    StepLimit(usize),
    #[error("routine built values larger than the {0}-unit memory budget; work on fewer rows or smaller strings")]
    ResourceLimit(usize),
}

impl RoutineError {
    pub(crate) fn type_error(message: impl Into<String>) -> Self {
        Self::Type(message.into())
    }
}

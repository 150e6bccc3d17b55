use smol_str::SmolStr;
use thiserror::Error;

/// Compile-time resolution failures.
///
/// Note that an identifier that resolves nowhere is *not* an error: it
/// becomes an implicit global, by design.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("'{0}' is already declared in this scope")]
    AlreadyDeclared(SmolStr),
    #[error("too many local variables in one function")]
    TooManyLocals,
    #[error("too many captured variables in one function")]
    TooManyUpvalues,
    #[error("too many global variables")]
    TooManyGlobals,
}

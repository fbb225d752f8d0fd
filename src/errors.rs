//! Error types for assembly and execution.
//!
//! Two kinds of failure exist:
//! - [`Error`]: structural problems (bad source, broken topology, operand
//!   type confusion that indicates an assembler bug). These abort assembly
//!   or the whole run and surface to the caller.
//! - [`MachineFailure`]: runtime faults scoped to a single exa (division by
//!   zero, file misuse, out-of-reach hardware, HALT). The engine terminates
//!   only the offending exa and keeps running.

use exanet_derive::Error;

/// Structural errors that abort assembly or the run.
#[derive(Debug, Error)]
pub enum Error {
    /// Wraps any assembly-phase error with its 1-based source line.
    #[error("line {line}: {source}")]
    Assembly { line: usize, source: String },
    /// Line starting with `.` that matches no known directive.
    #[error("unrecognized config directive: {0}")]
    UnknownDirective(String),
    /// Line starting with `@` that is neither `@rep` nor `@end`.
    #[error("unrecognized preprocessor directive: {0}")]
    UnknownPreprocessor(String),
    /// A recognized directive with arguments that do not parse.
    #[error("malformed {directive} directive: {line}")]
    MalformedDirective {
        directive: &'static str,
        line: String,
    },
    #[error("unknown node: {0}")]
    UnknownNode(String),
    #[error("node {node} already has a link with id {id}")]
    DuplicateLink { node: String, id: i64 },
    #[error("node {node} already has a hardware register named {name}")]
    DuplicateRegister { node: String, name: String },
    #[error("duplicate label: {0}")]
    DuplicateLabel(String),
    #[error("jump or repl to unrecognized label: {0}")]
    UnknownLabel(String),
    /// Node cannot take another resident at assembly time.
    #[error("node {0} is already full")]
    NodeFull(String),
    #[error("encountered an instruction before .start")]
    InstructionBeforeStart,
    #[error("tried to finalize a machine before .home named a node")]
    HomeUnset,
    #[error("unrecognized mnemonic: {0}")]
    UnknownMnemonic(String),
    #[error("unrecognized or invalid instruction: {0}")]
    MalformedInstruction(String),
    #[error("unrecognized register: {0}")]
    UnknownRegister(String),
    /// Operand token that is no register, hardware name, or integer.
    #[error("unrecognized operand: {0}")]
    InvalidOperand(String),
    #[error("unterminated string literal: {0}")]
    UnterminatedString(String),
    #[error("referenced the m register more than once in one instruction")]
    MultipleMReferences,
    #[error("found @end without a matching @rep")]
    UnexpectedEnd,
    #[error("missing @end after @rep")]
    MissingEnd,
    #[error("@rep blocks cannot nest")]
    NestedRep,
    #[error("{path}: {source}")]
    Io { path: String, source: String },

    // Runtime type confusion. Reaching any of these means the assembler
    // emitted an operand shape the engine does not accept.
    #[error("branch target is not a code address")]
    BranchTarget,
    #[error("tried to use an unassigned operand")]
    UnassignedOperand,
    #[error("tried to use an unresolved label operand")]
    UnresolvedLabel,
    #[error("tried to read a code address as a value")]
    AddressAsValue,
    #[error("tried to write to a literal")]
    LiteralDestination,
    #[error("tried to write to a code address")]
    AddressDestination,
    #[error("test only accepts the m or f register")]
    TestRegister,
    #[error("void only accepts the m or f register")]
    VoidRegister,
    #[error("unrecognized dump argument: {0}")]
    DumpArgument(String),
}

/// Runtime faults that terminate a single exa.
#[derive(Debug, Error)]
pub enum MachineFailure {
    #[error("halted")]
    Halted,
    #[error("no more instructions")]
    OutOfInstructions,
    #[error("tried to do arithmetic with a string")]
    ArithmeticOnString,
    #[error("tried to divide by zero")]
    DivisionByZero,
    #[error("tried to swiz a string")]
    SwizStringInput,
    #[error("tried to use a string as a swiz mask")]
    SwizStringMask,
    #[error("tried to read past the end of the file")]
    ReadPastEof,
    #[error("tried to void past the end of the file")]
    VoidPastEof,
    /// A file operation ran without a held file; the payload names the
    /// operation for the diagnostic.
    #[error("cannot {0}: no file held")]
    NoFileHeld(&'static str),
    #[error("cannot {0}: already holding a file")]
    FileAlreadyHeld(&'static str),
    #[error("tried to link through a string")]
    LinkWithString,
    #[error("no link with id {0} from this node")]
    NoSuchLink(i64),
    #[error("tried to grab a file by string name")]
    GrabWithString,
    #[error("no file with id {0} on this node")]
    NoSuchFile(i64),
    #[error("tried to seek by a string offset")]
    SeekWithString,
    #[error("tried to access hardware register {0} from another node")]
    HardwareOutOfReach(String),
}

/// Error channel for a single instruction step. `Failure` is caught at the
/// per-instruction boundary and terminates the exa; `Fatal` propagates out
/// of the run loop.
#[derive(Debug)]
pub(crate) enum StepError {
    Failure(MachineFailure),
    Fatal(Error),
}

impl From<MachineFailure> for StepError {
    fn from(failure: MachineFailure) -> Self {
        StepError::Failure(failure)
    }
}

impl From<Error> for StepError {
    fn from(error: Error) -> Self {
        StepError::Fatal(error)
    }
}

pub(crate) type StepResult<T> = Result<T, StepError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = Error::Assembly {
            line: 3,
            source: "unknown node: Z".to_string(),
        };
        assert_eq!(err.to_string(), "line 3: unknown node: Z");
        assert_eq!(
            Error::UnknownLabel("loop".to_string()).to_string(),
            "jump or repl to unrecognized label: loop"
        );
    }

    #[test]
    fn machine_failure_display() {
        assert_eq!(MachineFailure::Halted.to_string(), "halted");
        assert_eq!(
            MachineFailure::NoFileHeld("seek").to_string(),
            "cannot seek: no file held"
        );
        assert_eq!(
            MachineFailure::NoSuchFile(301).to_string(),
            "no file with id 301 on this node"
        );
    }

    #[test]
    fn step_error_from_both_kinds() {
        assert!(matches!(
            StepError::from(MachineFailure::DivisionByZero),
            StepError::Failure(MachineFailure::DivisionByZero)
        ));
        assert!(matches!(
            StepError::from(Error::BranchTarget),
            StepError::Fatal(Error::BranchTarget)
        ));
    }
}

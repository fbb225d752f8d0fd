//! Instruction set definitions.
//!
//! The [`for_each_opcode!`] macro holds the canonical opcode list and
//! invokes a callback macro for code generation, so other modules can
//! generate opcode-related code without duplicating the table. Here it
//! generates the [`Opcode`] enum and its mnemonic lookup.
//!
//! Operands are a tagged union over registers, literals, resolved code
//! addresses, hardware-register handles, and raw text. Text operands exist
//! only between parse and label resolution (branch targets) or carry the
//! DUMP argument; after finalize every branch operand is an [`Operand::Address`].

use std::fmt;

/// Invokes a callback macro with the complete opcode list.
#[macro_export]
macro_rules! for_each_opcode {
    ($callback:ident) => {
        $callback! {
            /// COPY src dst
            Copy => "COPY",
            /// ADDI a b dst
            Addi => "ADDI",
            /// SUBI a b dst
            Subi => "SUBI",
            /// MULI a b dst
            Muli => "MULI",
            /// DIVI a b dst
            Divi => "DIVI",
            /// MODI a b dst
            Modi => "MODI",
            /// SWIZ input mask dst
            Swiz => "SWIZ",
            /// JUMP label
            Jump => "JUMP",
            /// TJMP label ; taken when T is a string or a nonzero number
            Tjmp => "TJMP",
            /// FJMP label ; taken when T is the number 0
            Fjmp => "FJMP",
            /// TEST MRD / TEST EOF ; register operand selects the probe
            Test => "TEST",
            /// TEST a = b
            TestEq => "TEST",
            /// TEST a > b
            TestGt => "TEST",
            /// TEST a < b
            TestLt => "TEST",
            /// HALT ; terminate self
            Halt => "HALT",
            /// KILL ; terminate a random other exa on this node
            Kill => "KILL",
            /// LINK id ; migrate over the outbound link
            Link => "LINK",
            /// HOST dst ; write this node's name
            Host => "HOST",
            /// MODE ; toggle between global and local channel
            Mode => "MODE",
            /// VOID M / VOID F
            Void => "VOID",
            /// MAKE ; create and hold a fresh file
            Make => "MAKE",
            /// GRAB id ; take a file from this node
            Grab => "GRAB",
            /// FILE dst ; write the held file's id
            File => "FILE",
            /// SEEK delta ; move the held file's cursor
            Seek => "SEEK",
            /// DROP ; put the held file on this node
            Drop => "DROP",
            /// WIPE ; empty the held file
            Wipe => "WIPE",
            /// NOOP
            Noop => "NOOP",
            /// RAND dst ; next engine RNG draw
            Rand => "RAND",
            /// REPL label ; fork onto this node
            Repl => "REPL",
            /// DUMP ; print the network state
            Dump => "DUMP",
            /// DUMP me|code ; print this machine or its code
            DumpArg => "DUMP",
        }
    };
}

macro_rules! define_opcodes {
    (
        $(
            $(#[$doc:meta])*
            $name:ident => $mnemonic:literal
        ),* $(,)?
    ) => {
        /// Executable operation, one per instruction.
        #[derive(Copy, Clone, Debug, Eq, PartialEq)]
        pub enum Opcode {
            $(
                $(#[$doc])*
                $name,
            )*
        }

        impl Opcode {
            /// Returns the assembly mnemonic for this opcode.
            pub const fn mnemonic(&self) -> &'static str {
                match self {
                    $( Opcode::$name => $mnemonic, )*
                }
            }
        }
    };
}

for_each_opcode!(define_opcodes);

/// The four exa-visible registers.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Register {
    X,
    T,
    /// Message register, routed to the global or local channel.
    M,
    /// File register, backed by the held file.
    F,
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Register::X => write!(f, "X"),
            Register::T => write!(f, "T"),
            Register::M => write!(f, "M"),
            Register::F => write!(f, "F"),
        }
    }
}

/// One instruction operand.
#[derive(Clone, Debug, PartialEq)]
pub enum Operand {
    /// No operand in this slot.
    Unassigned,
    Register(Register),
    Number(i64),
    /// Resolved branch target (code index).
    Address(usize),
    /// Handle into the network's hardware arena.
    Hardware(usize),
    /// Unresolved label or DUMP argument.
    Text(String),
}

impl Operand {
    /// True when the operand names the M register.
    pub(crate) fn is_m(&self) -> bool {
        matches!(self, Operand::Register(Register::M))
    }
}

/// Opcode plus up to three operands.
#[derive(Clone, Debug, PartialEq)]
pub struct Instruction {
    pub opcode: Opcode,
    pub op1: Operand,
    pub op2: Operand,
    pub op3: Operand,
}

impl Instruction {
    pub fn nullary(opcode: Opcode) -> Self {
        Self {
            opcode,
            op1: Operand::Unassigned,
            op2: Operand::Unassigned,
            op3: Operand::Unassigned,
        }
    }

    pub fn unary(opcode: Opcode, op1: Operand) -> Self {
        Self {
            op1,
            ..Self::nullary(opcode)
        }
    }

    pub fn binary(opcode: Opcode, op1: Operand, op2: Operand) -> Self {
        Self {
            op1,
            op2,
            ..Self::nullary(opcode)
        }
    }

    pub fn ternary(opcode: Opcode, op1: Operand, op2: Operand, op3: Operand) -> Self {
        Self {
            opcode,
            op1,
            op2,
            op3,
        }
    }

    /// Counts how many operands reference the M register.
    pub(crate) fn m_references(&self) -> usize {
        [&self.op1, &self.op2, &self.op3]
            .into_iter()
            .filter(|op| op.is_m())
            .count()
    }
}

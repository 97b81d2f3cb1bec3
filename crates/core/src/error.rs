use thiserror::Error;

use crate::version::PythonVersion;

/// Failures while decoding the packed parts of a code object.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("opcode {opcode} is not defined for Python {version}")]
    UnknownOpcode { opcode: u8, version: PythonVersion },
    #[error("code bytes are truncated or not a whole number of code units")]
    TruncatedCode,
    #[error("EXTENDED_ARG at the end of the code")]
    DanglingExtendedArg,
    #[error("malformed line number table")]
    MalformedLineTable,
    #[error("malformed exception table")]
    MalformedExceptionTable,
    #[error("jump at offset {offset} does not land on an instruction boundary")]
    BadJumpTarget { offset: u32 },
    #[error("instruction at offset {offset} references {pool} index {index} out of range")]
    BadPoolIndex {
        offset: u32,
        pool: &'static str,
        index: u32,
    },
    #[error("instruction at offset {offset} carries invalid argument {arg}")]
    BadArgValue { offset: u32, arg: u32 },
}

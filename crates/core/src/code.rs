//! The packed code-object record: the interchange value this library reads
//! from and writes back to the host interpreter.

use std::fmt;

use crate::constant::ConstantData;
use crate::flags::CompilerFlags;
use crate::version::PythonVersion;

/// An opaque compiled code unit, carrying its bytes and tables exactly as
/// the interpreter packs them.
///
/// Field availability follows the version: `qualname` is meaningful from
/// 3.11, `exceptiontable` is empty before 3.11, and `linetable` holds the
/// per-version format selected by [`PythonVersion::line_table_kind`].
#[derive(Clone, Debug)]
pub struct CodeObject {
    pub version: PythonVersion,
    /// Raw instruction bytes (`co_code`).
    pub code: Vec<u8>,
    pub consts: Vec<ConstantData>,
    pub names: Vec<String>,
    pub varnames: Vec<String>,
    pub cellvars: Vec<String>,
    pub freevars: Vec<String>,
    pub filename: String,
    pub name: String,
    /// Qualified name (3.11+; mirrors `name` on earlier versions).
    pub qualname: String,
    pub flags: CompilerFlags,
    pub first_lineno: u32,
    pub argcount: u32,
    pub posonlyargcount: u32,
    pub kwonlyargcount: u32,
    pub nlocals: u32,
    pub stacksize: u32,
    /// Packed line table (`co_lnotab` through 3.9, `co_linetable` from 3.10).
    pub linetable: Vec<u8>,
    /// Packed exception table (3.11+, empty before).
    pub exceptiontable: Vec<u8>,
}

impl CodeObject {
    /// Number of code units (2-byte instruction words) in `code`.
    pub fn code_units(&self) -> usize {
        self.code.len() / 2
    }
}

impl fmt::Display for CodeObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<code object {} at file {:?}, line {}>",
            self.name, self.filename, self.first_lineno
        )
    }
}

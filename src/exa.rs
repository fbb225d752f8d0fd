//! The exa: a resident stack-less machine.
//!
//! An exa owns its instruction stream (shared with forks), two
//! general-purpose value registers, an optional held file, an instruction
//! pointer, and the mode flag that routes its M register to the global or
//! node-local channel.

use crate::file::File;
use crate::isa::Instruction;
use crate::value::Value;
use std::fmt;
use std::sync::Arc;

#[derive(Debug)]
pub struct Exa {
    pub(crate) name: String,
    pub(crate) x: Value,
    pub(crate) t: Value,
    pub(crate) file: Option<File>,
    pub(crate) code: Arc<[Instruction]>,
    pub(crate) ip: usize,
    pub(crate) repl_count: usize,
    /// True while M routes to the global channel; MODE toggles.
    pub(crate) global_mode: bool,
    pub(crate) terminated: bool,
}

impl Exa {
    pub(crate) fn new(name: String, code: Arc<[Instruction]>) -> Self {
        Self {
            name,
            x: Value::Number(0),
            t: Value::Number(0),
            file: None,
            code,
            ip: 0,
            repl_count: 0,
            global_mode: true,
            terminated: false,
        }
    }

    /// Forks a copy starting at `address`.
    ///
    /// The fork shares the code, copies x, t, and the mode flag, takes the
    /// parent's name with a `:<n>` suffix, and holds no file. The parent's
    /// fork counter increments.
    pub(crate) fn fork(&mut self, address: usize) -> Exa {
        let name = format!("{}:{}", self.name, self.repl_count);
        self.repl_count += 1;
        Exa {
            name,
            x: self.x.clone(),
            t: self.t.clone(),
            file: None,
            code: Arc::clone(&self.code),
            ip: address,
            repl_count: 0,
            global_mode: self.global_mode,
            terminated: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn x(&self) -> &Value {
        &self.x
    }

    pub fn t(&self) -> &Value {
        &self.t
    }

    /// The held file, if any.
    pub fn file(&self) -> Option<&File> {
        self.file.as_ref()
    }

    pub fn ip(&self) -> usize {
        self.ip
    }

    pub fn global_mode(&self) -> bool {
        self.global_mode
    }
}

impl fmt::Display for Exa {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Exa{{name={}; x={}; t={}; file=", self.name, self.x, self.t)?;
        match &self.file {
            Some(file) => write!(f, "{{{file}}}")?,
            None => write!(f, "<none>")?,
        }
        write!(f, "; ip={}}}", self.ip)
    }
}

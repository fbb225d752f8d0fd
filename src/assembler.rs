//! Assembly source to network compilation.
//!
//! The assembler is line-oriented. Each raw line is truncated at `;` and at
//! the first case-insensitive `NOTE`, then trimmed; empty lines are
//! skipped. Lines starting with `.` are configuration directives (keywords
//! case-insensitive, node names case-sensitive). Anything else requires an
//! active `.start` machine and is ASCII-lowercased before being dispatched
//! as an `@` preprocessor directive or an instruction.
//!
//! Branch operands are recorded as raw label text and resolved against the
//! exa-local label table when the machine is finalized (at the next
//! `.start` or at end of input). `@rep N ... @end` buffers instruction
//! lines and replays them N times, substituting the first `@{START,INC}`
//! occurrence per line.
//!
//! Errors carry the 1-based source line via [`Error::Assembly`].

use crate::errors::Error;
use crate::exa::Exa;
use crate::file::File;
use crate::hardware::Hardware;
use crate::isa::{Instruction, Opcode, Operand, Register};
use crate::network::{Network, DEFAULT_SEED};
use crate::node::Node;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Assembles a source string with the default engine seed.
pub fn assemble_source(source: &str) -> Result<Network, Error> {
    assemble_source_seeded(source, DEFAULT_SEED)
}

/// Assembles a source string with an explicit engine seed.
pub fn assemble_source_seeded(source: &str, seed: u64) -> Result<Network, Error> {
    let mut asm = Assembler::new(seed);
    let mut line_no = 0;

    for raw in source.lines() {
        line_no += 1;
        asm.process_line(raw).map_err(|e| at_line(line_no, e))?;
    }

    asm.finish().map_err(|e| at_line(line_no, e))
}

/// Convenience: assemble directly from a file path.
pub fn assemble_file<P: AsRef<Path>>(path: P) -> Result<Network, Error> {
    assemble_file_seeded(path, DEFAULT_SEED)
}

pub fn assemble_file_seeded<P: AsRef<Path>>(path: P, seed: u64) -> Result<Network, Error> {
    let path = path.as_ref();
    let source = fs::read_to_string(path).map_err(|e| Error::Io {
        path: path.display().to_string(),
        source: e.to_string(),
    })?;
    assemble_source_seeded(&source, seed)
}

/// Attaches the source line to an assembly error.
fn at_line(line: usize, source: Error) -> Error {
    Error::Assembly {
        line,
        source: source.to_string(),
    }
}

struct PendingExa {
    name: String,
    code: Vec<Instruction>,
}

struct Assembler {
    network: Network,
    /// Home node for machines finalized from here on.
    home: Option<usize>,
    /// Machine currently being assembled, between `.start` and finalize.
    pending: Option<PendingExa>,
    /// Global operand-lookup table: lowercased register name to hardware
    /// handle. First registration wins across nodes.
    hw_lookup: HashMap<String, usize>,
    /// Exa-local label table, cleared at finalize.
    labels: HashMap<String, usize>,
    rep_lines: Vec<String>,
    rep_count: usize,
    rep_active: bool,
}

impl Assembler {
    fn new(seed: u64) -> Self {
        Self {
            network: Network::new(seed),
            home: None,
            pending: None,
            hw_lookup: HashMap::new(),
            labels: HashMap::new(),
            rep_lines: Vec::new(),
            rep_count: 0,
            rep_active: false,
        }
    }

    fn process_line(&mut self, raw: &str) -> Result<(), Error> {
        let line = strip_comments(raw).trim();
        if line.is_empty() {
            return Ok(());
        }

        if line.starts_with('.') {
            return self.config_directive(line);
        }

        if self.pending.is_none() {
            return Err(Error::InstructionBeforeStart);
        }

        let line = line.to_ascii_lowercase();
        if line.starts_with('@') {
            self.preprocessor_directive(&line)
        } else if self.rep_active {
            self.rep_lines.push(line);
            Ok(())
        } else {
            self.instruction(&line)
        }
    }

    /// Finalizes the trailing machine and hands the network over.
    fn finish(mut self) -> Result<Network, Error> {
        self.finalize_pending()?;
        Ok(self.network)
    }

    // ==================== Configuration directives ====================

    fn config_directive(&mut self, line: &str) -> Result<(), Error> {
        let tokens = tokenize(line)?;
        let keyword = tokens[0].to_ascii_lowercase();

        match keyword.as_str() {
            ".range" => self.directive_range(&tokens, line),
            ".node" => self.directive_node(&tokens, line),
            ".link" => self.directive_link(line),
            ".file" => self.directive_file(&tokens, line),
            ".reg" => self.directive_reg(&tokens, line),
            ".start" => self.directive_start(&tokens, line),
            ".home" => self.directive_home(&tokens, line),
            _ => Err(Error::UnknownDirective(line.to_string())),
        }
    }

    fn directive_range(&mut self, tokens: &[&str], line: &str) -> Result<(), Error> {
        let [_, min, max] = tokens else {
            return Err(malformed(".range", line));
        };
        self.network.range_min = min.parse().map_err(|_| malformed(".range", line))?;
        self.network.range_max = max.parse().map_err(|_| malformed(".range", line))?;
        Ok(())
    }

    fn directive_node(&mut self, tokens: &[&str], line: &str) -> Result<(), Error> {
        let (name, capacity) = match tokens {
            [_, name] => (name, usize::MAX),
            [_, name, cap] => (name, cap.parse().map_err(|_| malformed(".node", line))?),
            _ => return Err(malformed(".node", line)),
        };
        self.network
            .nodes
            .push(Node::new(name.to_string(), capacity));
        Ok(())
    }

    fn directive_link(&mut self, line: &str) -> Result<(), Error> {
        let groups = paren_groups(line).ok_or_else(|| malformed(".link", line))?;
        let [from_group, to_group] = groups.as_slice() else {
            return Err(malformed(".link", line));
        };

        let [from_name, from_id] = from_group.as_slice() else {
            return Err(malformed(".link", line));
        };
        let (to_name, to_id) = match to_group.as_slice() {
            [name] => (name, None),
            [name, id] => (name, Some(*id)),
            _ => return Err(malformed(".link", line)),
        };

        let from = self.node_index(from_name)?;
        let to = self.node_index(to_name)?;

        let from_id: i64 = from_id.parse().map_err(|_| malformed(".link", line))?;
        self.add_link(from, from_id, to)?;

        if let Some(to_id) = to_id {
            let to_id: i64 = to_id.parse().map_err(|_| malformed(".link", line))?;
            self.add_link(to, to_id, from)?;
        }

        Ok(())
    }

    fn add_link(&mut self, from: usize, id: i64, to: usize) -> Result<(), Error> {
        let node = &mut self.network.nodes[from];
        if node.links.contains_key(&id) {
            return Err(Error::DuplicateLink {
                node: node.name.clone(),
                id,
            });
        }
        node.links.insert(id, to);
        Ok(())
    }

    fn directive_file(&mut self, tokens: &[&str], line: &str) -> Result<(), Error> {
        let [_, path, node_name, id, access, unit, parse, rest @ ..] = tokens else {
            return Err(malformed(".file", line));
        };

        let readonly = match *access {
            a if a.eq_ignore_ascii_case("ro") => true,
            a if a.eq_ignore_ascii_case("rw") => false,
            _ => return Err(malformed(".file", line)),
        };
        let byte_mode = match *unit {
            u if u.eq_ignore_ascii_case("byte") => true,
            u if u.eq_ignore_ascii_case("word") => false,
            _ => return Err(malformed(".file", line)),
        };
        let parse_ints = match *parse {
            p if p.eq_ignore_ascii_case("int") => true,
            p if p.eq_ignore_ascii_case("noint") => false,
            _ => return Err(malformed(".file", line)),
        };
        let locked = match rest {
            [] => false,
            [l] if l.eq_ignore_ascii_case("locked") => true,
            _ => return Err(malformed(".file", line)),
        };

        let node = self.node_index(node_name)?;
        let id: u16 = id.parse().map_err(|_| malformed(".file", line))?;
        let path = PathBuf::from(unquote(path));

        let file = File::from_disk(path.clone(), id, readonly, locked, byte_mode, parse_ints)
            .map_err(|e| Error::Io {
                path: path.display().to_string(),
                source: e.to_string(),
            })?;

        if !self.network.nodes[node].has_room() {
            return Err(Error::NodeFull(node_name.to_string()));
        }
        self.network.nodes[node].files.insert(id, file);
        Ok(())
    }

    fn directive_reg(&mut self, tokens: &[&str], line: &str) -> Result<(), Error> {
        let [_, kind, name, node_name, rest @ ..] = tokens else {
            return Err(malformed(".reg", line));
        };
        let arg = match rest {
            [] => None,
            [arg] => Some(unquote(arg)),
            _ => return Err(malformed(".reg", line)),
        };

        let stripped = name.strip_prefix('#').ok_or_else(|| malformed(".reg", line))?;
        if stripped.is_empty() || !stripped.bytes().all(|b| b.is_ascii_alphabetic()) {
            return Err(malformed(".reg", line));
        }

        let node = self.node_index(node_name)?;
        let key = name.to_ascii_lowercase();
        if self.network.nodes[node].registers.contains_key(&key) {
            return Err(Error::DuplicateRegister {
                node: node_name.to_string(),
                name: name.to_string(),
            });
        }

        let display = name.to_string();
        let hardware = match kind.to_ascii_lowercase().as_str() {
            "sink" => Hardware::sink(display, node),
            "stdin" => Hardware::stdin(display, node),
            "stdout" => Hardware::stdout(display, node),
            "stderr" => Hardware::stderr(display, node),
            "rand" => {
                let seed: i64 = arg
                    .and_then(|a| a.parse().ok())
                    .ok_or_else(|| malformed(".reg", line))?;
                Hardware::rand(display, node, seed as u64)
            }
            "file_in" => {
                let path = arg.ok_or_else(|| malformed(".reg", line))?;
                Hardware::file_in(display, node, Path::new(path)).map_err(|e| Error::Io {
                    path: path.to_string(),
                    source: e.to_string(),
                })?
            }
            "file_out" => {
                let path = arg.ok_or_else(|| malformed(".reg", line))?;
                Hardware::file_out(display, node, Path::new(path)).map_err(|e| Error::Io {
                    path: path.to_string(),
                    source: e.to_string(),
                })?
            }
            _ => return Err(malformed(".reg", line)),
        };

        let handle = self.network.hardware.len();
        self.network.hardware.push(hardware);
        self.network.nodes[node].registers.insert(key.clone(), handle);
        self.hw_lookup.entry(key).or_insert(handle);
        Ok(())
    }

    fn directive_start(&mut self, tokens: &[&str], line: &str) -> Result<(), Error> {
        let [_, name] = tokens else {
            return Err(malformed(".start", line));
        };

        self.finalize_pending()?;
        self.pending = Some(PendingExa {
            name: name.to_string(),
            code: Vec::new(),
        });
        Ok(())
    }

    fn directive_home(&mut self, tokens: &[&str], line: &str) -> Result<(), Error> {
        let [_, name] = tokens else {
            return Err(malformed(".home", line));
        };
        self.home = Some(self.node_index(name)?);
        Ok(())
    }

    fn node_index(&self, name: &str) -> Result<usize, Error> {
        self.network
            .node_index(name)
            .ok_or_else(|| Error::UnknownNode(name.to_string()))
    }

    // ==================== Preprocessor ====================

    fn preprocessor_directive(&mut self, line: &str) -> Result<(), Error> {
        if let Some(rest) = line.strip_prefix("@rep") {
            if self.rep_active {
                return Err(Error::NestedRep);
            }
            self.rep_count = rest
                .trim()
                .parse()
                .map_err(|_| malformed("@rep", line))?;
            self.rep_active = true;
            Ok(())
        } else if line.starts_with("@end") {
            if !self.rep_active {
                return Err(Error::UnexpectedEnd);
            }
            self.rep_active = false;

            let lines = std::mem::take(&mut self.rep_lines);
            for iteration in 0..self.rep_count {
                for buffered in &lines {
                    let expanded = substitute_rep(buffered, iteration as i64);
                    self.instruction(&expanded)?;
                }
            }
            Ok(())
        } else {
            Err(Error::UnknownPreprocessor(line.to_string()))
        }
    }

    // ==================== Instructions ====================

    fn instruction(&mut self, line: &str) -> Result<(), Error> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        match tokens.as_slice() {
            [mne] => self.no_arg(mne),
            [mne, op1] => self.single_arg(mne, op1, line),
            [mne, op1, op2] => self.double_arg(mne, op1, op2, line),
            [mne, op1, op2, op3] => self.triple_arg(mne, op1, op2, op3, line),
            _ => Err(Error::MalformedInstruction(line.to_string())),
        }
    }

    fn no_arg(&mut self, mne: &str) -> Result<(), Error> {
        let opcode = match mne {
            "halt" => Opcode::Halt,
            "kill" => Opcode::Kill,
            "mode" => Opcode::Mode,
            "make" => Opcode::Make,
            "drop" => Opcode::Drop,
            "wipe" => Opcode::Wipe,
            "noop" => Opcode::Noop,
            "dump" => Opcode::Dump,
            _ => return Err(Error::UnknownMnemonic(mne.to_string())),
        };
        self.emit(Instruction::nullary(opcode))
    }

    fn single_arg(&mut self, mne: &str, op1: &str, line: &str) -> Result<(), Error> {
        let inst = match mne {
            "mark" => {
                let code_len = self.code_len();
                if self.labels.insert(op1.to_string(), code_len).is_some() {
                    return Err(Error::DuplicateLabel(op1.to_string()));
                }
                return Ok(());
            }
            "repl" => Instruction::unary(Opcode::Repl, Operand::Text(op1.to_string())),
            "jump" => Instruction::unary(Opcode::Jump, Operand::Text(op1.to_string())),
            "tjmp" => Instruction::unary(Opcode::Tjmp, Operand::Text(op1.to_string())),
            "fjmp" => Instruction::unary(Opcode::Fjmp, Operand::Text(op1.to_string())),
            "test" => match op1 {
                "mrd" => Instruction::unary(Opcode::Test, Operand::Register(Register::M)),
                "eof" => Instruction::unary(Opcode::Test, Operand::Register(Register::F)),
                _ => return Err(Error::MalformedInstruction(line.to_string())),
            },
            "link" => Instruction::unary(Opcode::Link, self.reg_or_val(op1)?),
            "host" => Instruction::unary(Opcode::Host, self.reg(op1)?),
            "void" => match op1 {
                "m" => Instruction::unary(Opcode::Void, Operand::Register(Register::M)),
                "f" => Instruction::unary(Opcode::Void, Operand::Register(Register::F)),
                _ => return Err(Error::VoidRegister),
            },
            "grab" => Instruction::unary(Opcode::Grab, self.reg_or_val(op1)?),
            "file" => Instruction::unary(Opcode::File, self.reg(op1)?),
            "seek" => Instruction::unary(Opcode::Seek, self.reg_or_val(op1)?),
            "rand" => Instruction::unary(Opcode::Rand, self.reg(op1)?),
            "dump" => Instruction::unary(Opcode::DumpArg, Operand::Text(unquote(op1).to_string())),
            _ => return Err(Error::UnknownMnemonic(mne.to_string())),
        };
        self.emit(inst)
    }

    fn double_arg(&mut self, mne: &str, op1: &str, op2: &str, line: &str) -> Result<(), Error> {
        match mne {
            "copy" => {
                let inst =
                    Instruction::binary(Opcode::Copy, self.reg_or_val(op1)?, self.reg(op2)?);
                self.emit(inst)
            }
            _ => Err(Error::MalformedInstruction(line.to_string())),
        }
    }

    fn triple_arg(
        &mut self,
        mne: &str,
        op1: &str,
        op2: &str,
        op3: &str,
        line: &str,
    ) -> Result<(), Error> {
        let opcode = match mne {
            "addi" => Opcode::Addi,
            "subi" => Opcode::Subi,
            "muli" => Opcode::Muli,
            "divi" => Opcode::Divi,
            "modi" => Opcode::Modi,
            "swiz" => Opcode::Swiz,
            "test" => {
                let opcode = match op2 {
                    "<" => Opcode::TestLt,
                    "=" => Opcode::TestEq,
                    ">" => Opcode::TestGt,
                    _ => return Err(Error::MalformedInstruction(line.to_string())),
                };
                let inst =
                    Instruction::binary(opcode, self.reg_or_val(op1)?, self.reg_or_val(op3)?);
                return self.emit(inst);
            }
            _ => return Err(Error::MalformedInstruction(line.to_string())),
        };

        let inst = Instruction::ternary(
            opcode,
            self.reg_or_val(op1)?,
            self.reg_or_val(op2)?,
            self.reg(op3)?,
        );
        self.emit(inst)
    }

    /// Appends an instruction to the machine under assembly, enforcing the
    /// single-M-reference rule.
    fn emit(&mut self, inst: Instruction) -> Result<(), Error> {
        if inst.m_references() > 1 {
            return Err(Error::MultipleMReferences);
        }
        let pending = self.pending.as_mut().ok_or(Error::InstructionBeforeStart)?;
        pending.code.push(inst);
        Ok(())
    }

    fn code_len(&self) -> usize {
        self.pending.as_ref().map_or(0, |p| p.code.len())
    }

    /// Register, hardware register, or signed literal.
    fn reg_or_val(&self, op: &str) -> Result<Operand, Error> {
        if let Some(operand) = self.named_register(op) {
            return Ok(operand);
        }
        op.parse::<i64>()
            .map(Operand::Number)
            .map_err(|_| Error::InvalidOperand(op.to_string()))
    }

    /// Register or hardware register; literals rejected.
    fn reg(&self, op: &str) -> Result<Operand, Error> {
        self.named_register(op)
            .ok_or_else(|| Error::UnknownRegister(op.to_string()))
    }

    fn named_register(&self, op: &str) -> Option<Operand> {
        match op {
            "x" => Some(Operand::Register(Register::X)),
            "t" => Some(Operand::Register(Register::T)),
            "m" => Some(Operand::Register(Register::M)),
            "f" => Some(Operand::Register(Register::F)),
            _ => self
                .hw_lookup
                .get(op)
                .map(|&handle| Operand::Hardware(handle)),
        }
    }

    // ==================== Finalize ====================

    /// Resolves branch labels, charges the size statistic, and moves the
    /// machine under assembly onto its home node.
    fn finalize_pending(&mut self) -> Result<(), Error> {
        let Some(mut pending) = self.pending.take() else {
            return Ok(());
        };

        if self.rep_active {
            return Err(Error::MissingEnd);
        }
        let home = self.home.ok_or(Error::HomeUnset)?;
        if !self.network.nodes[home].has_room() {
            return Err(Error::NodeFull(self.network.nodes[home].name.clone()));
        }

        for inst in &mut pending.code {
            if !matches!(
                inst.opcode,
                Opcode::Jump | Opcode::Tjmp | Opcode::Fjmp | Opcode::Repl
            ) {
                continue;
            }
            if let Operand::Text(label) = &inst.op1 {
                let address = self
                    .labels
                    .get(label)
                    .copied()
                    .ok_or_else(|| Error::UnknownLabel(label.clone()))?;
                inst.op1 = Operand::Address(address);
            }
        }

        self.network.stats.size += pending.code.len();
        let exa = Exa::new(pending.name, Arc::from(pending.code));
        self.network.nodes[home].machines.push(Some(exa));
        self.labels.clear();
        Ok(())
    }
}

fn malformed(directive: &'static str, line: &str) -> Error {
    Error::MalformedDirective {
        directive,
        line: line.to_string(),
    }
}

/// Truncates at `;` and at the first case-insensitive `NOTE`.
fn strip_comments(line: &str) -> &str {
    let mut end = line.len();
    if let Some(pos) = line.find(';') {
        end = pos;
    }
    if let Some(pos) = line
        .as_bytes()
        .windows(4)
        .position(|w| w.eq_ignore_ascii_case(b"NOTE"))
    {
        end = end.min(pos);
    }
    &line[..end]
}

/// Splits a directive line into whitespace-separated tokens, keeping
/// double-quoted spans (paths with spaces) together.
fn tokenize(line: &str) -> Result<Vec<&str>, Error> {
    let bytes = line.as_bytes();
    let mut tokens = Vec::new();
    let mut start: Option<usize> = None;
    let mut in_str = false;

    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b'"' => {
                if start.is_none() {
                    start = Some(i);
                }
                in_str = !in_str;
            }
            b' ' | b'\t' if !in_str => {
                if let Some(s) = start.take() {
                    tokens.push(&line[s..i]);
                }
            }
            _ => {
                if start.is_none() {
                    start = Some(i);
                }
            }
        }
    }

    if in_str {
        return Err(Error::UnterminatedString(line.to_string()));
    }
    if let Some(s) = start {
        tokens.push(&line[s..]);
    }
    Ok(tokens)
}

/// Strips one pair of surrounding double quotes, if present.
fn unquote(token: &str) -> &str {
    token
        .strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .unwrap_or(token)
}

/// Extracts the `( ... )` groups of a `.link` line, each split into tokens.
fn paren_groups(line: &str) -> Option<Vec<Vec<&str>>> {
    let mut groups = Vec::new();
    let mut rest = line;

    while let Some(open) = rest.find('(') {
        let close = open + rest[open..].find(')')?;
        groups.push(rest[open + 1..close].split_whitespace().collect());
        rest = &rest[close + 1..];
    }

    Some(groups)
}

/// Replaces the first `@{START,INC}` with `START + INC * iteration`; lines
/// without the pattern pass through unchanged.
fn substitute_rep(line: &str, iteration: i64) -> String {
    let Some(open) = line.find("@{") else {
        return line.to_string();
    };
    let Some(close) = line[open..].find('}').map(|c| open + c) else {
        return line.to_string();
    };
    let Some((start, inc)) = line[open + 2..close].split_once(',') else {
        return line.to_string();
    };
    let (Ok(start), Ok(inc)) = (start.trim().parse::<i64>(), inc.trim().parse::<i64>()) else {
        return line.to_string();
    };

    let value = start.wrapping_add(inc.wrapping_mul(iteration));
    format!("{}{}{}", &line[..open], value, &line[close + 1..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::test_utils::temp_path;
    use crate::value::Value;

    fn assembles(source: &str) -> Network {
        assemble_source(source).expect("assembly failed")
    }

    fn assembly_error(source: &str) -> String {
        assemble_source(source).expect_err("expected error").to_string()
    }

    // ==================== Line handling ====================

    #[test]
    fn comments_and_blank_lines_are_skipped() {
        let network = assembles(
            "; leading comment\n\
             .node A ; trailing comment\n\
             NOTE a note line\n\
             \n\
             .home A\n",
        );
        assert!(network.node("A").is_some());
    }

    #[test]
    fn note_truncates_mid_line() {
        // everything after the first case-insensitive NOTE disappears
        let network = assembles(".node A note .node B\n");
        assert!(network.node("A").is_some());
        assert!(network.node("B").is_none());
    }

    #[test]
    fn instruction_before_start_is_rejected() {
        let err = assembly_error(".node A\n.home A\nnoop\n");
        assert!(err.contains("before .start"), "{err}");
    }

    #[test]
    fn errors_carry_line_numbers() {
        let err = assembly_error(".node A\n.bogus\n");
        assert!(err.starts_with("line 2:"), "{err}");
    }

    // ==================== Directives ====================

    #[test]
    fn range_overrides_bounds() {
        let network = assembles(".range -100 100\n.node A\n");
        assert_eq!(network.clamp(Value::Number(500)), Value::Number(100));
        assert_eq!(network.clamp(Value::Number(-500)), Value::Number(-100));
    }

    #[test]
    fn default_range_is_9999() {
        let network = assembles(".node A\n");
        assert_eq!(network.clamp(Value::Number(100_000)), Value::Number(9999));
    }

    #[test]
    fn node_capacity_defaults_to_unbounded() {
        let network = assembles(".node A\n.node B 3\n");
        assert_eq!(network.node("A").unwrap().capacity(), usize::MAX);
        assert_eq!(network.node("B").unwrap().capacity(), 3);
    }

    #[test]
    fn directives_are_case_insensitive() {
        let network = assembles(".NODE A\n.Home A\n.START main\nnoop\n");
        assert!(network.node("A").is_some());
    }

    #[test]
    fn unknown_directive_is_rejected() {
        let err = assembly_error(".frobnicate A\n");
        assert!(err.contains("unrecognized config directive"), "{err}");
    }

    #[test]
    fn link_creates_directed_edges() {
        let network = assembles(".node A\n.node B\n.link (A 800) (B -1)\n");
        let a = network.node("A").unwrap();
        let b = network.node("B").unwrap();
        assert_eq!(a.links.get(&800), Some(&1));
        assert_eq!(b.links.get(&-1), Some(&0));
    }

    #[test]
    fn link_without_back_edge() {
        let network = assembles(".node A\n.node B\n.link (A 1) (B)\n");
        assert_eq!(network.node("A").unwrap().links.len(), 1);
        assert!(network.node("B").unwrap().links.is_empty());
    }

    #[test]
    fn duplicate_link_id_is_rejected() {
        let err = assembly_error(".node A\n.node B\n.link (A 1) (B)\n.link (A 1) (B)\n");
        assert!(err.contains("already has a link"), "{err}");
    }

    #[test]
    fn link_to_unknown_node_is_rejected() {
        let err = assembly_error(".node A\n.link (A 1) (Z)\n");
        assert!(err.contains("unknown node: Z"), "{err}");
    }

    #[test]
    fn file_directive_loads_words() {
        let path = temp_path("boot_words");
        std::fs::write(&path, "1 two 3").unwrap();
        let source = format!(".node A\n.file \"{}\" A 300 rw word int\n", path.display());
        let network = assembles(&source);
        let file = network.node("A").unwrap().file(300).unwrap();
        assert_eq!(
            file.values(),
            &[
                Value::Number(1),
                Value::String("two".to_string()),
                Value::Number(3)
            ]
        );
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn file_directive_noint_keeps_strings() {
        let path = temp_path("boot_noint");
        std::fs::write(&path, "1 2").unwrap();
        let source = format!(".node A\n.file \"{}\" A 300 ro word noint\n", path.display());
        let network = assembles(&source);
        let file = network.node("A").unwrap().file(300).unwrap();
        assert_eq!(
            file.values(),
            &[Value::String("1".to_string()), Value::String("2".to_string())]
        );
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn file_directive_byte_mode() {
        let path = temp_path("boot_bytes");
        std::fs::write(&path, "AB").unwrap();
        let source = format!(".node A\n.file \"{}\" A 300 rw byte noint\n", path.display());
        let network = assembles(&source);
        let file = network.node("A").unwrap().file(300).unwrap();
        assert_eq!(file.values(), &[Value::Number(65), Value::Number(66)]);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn file_on_full_node_is_rejected() {
        let path = temp_path("boot_full");
        std::fs::write(&path, "1").unwrap();
        let source = format!(
            ".node A 1\n.file \"{0}\" A 300 rw word int\n.file \"{0}\" A 301 rw word int\n",
            path.display()
        );
        let err = assemble_source(&source).expect_err("expected error").to_string();
        assert!(err.contains("already full"), "{err}");
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn missing_boot_file_is_an_error() {
        let path = temp_path("boot_missing");
        let source = format!(".node A\n.file \"{}\" A 300 rw word int\n", path.display());
        assert!(assemble_source(&source).is_err());
    }

    #[test]
    fn reg_directive_attaches_hardware() {
        let network = assembles(".node A\n.reg sink #NULL A\n");
        assert!(network.node("A").unwrap().registers.contains_key("#null"));
        assert_eq!(network.hardware.len(), 1);
        assert_eq!(network.hardware[0].name(), "#NULL");
    }

    #[test]
    fn duplicate_register_name_is_case_insensitive() {
        let err = assembly_error(".node A\n.reg sink #NULL A\n.reg sink #null A\n");
        assert!(err.contains("already has a hardware register"), "{err}");
    }

    #[test]
    fn rand_register_requires_seed() {
        let err = assembly_error(".node A\n.reg rand #RNG A\n");
        assert!(err.contains("malformed .reg"), "{err}");
        assembles(".node A\n.reg rand #RNG A \"42\"\n");
    }

    #[test]
    fn register_name_must_be_hash_alpha() {
        assert!(assemble_source(".node A\n.reg sink NULL A\n").is_err());
        assert!(assemble_source(".node A\n.reg sink #N1 A\n").is_err());
    }

    #[test]
    fn home_must_name_a_known_node() {
        let err = assembly_error(".home Z\n");
        assert!(err.contains("unknown node: Z"), "{err}");
    }

    // ==================== Machines and labels ====================

    #[test]
    fn start_places_machine_on_home_node() {
        let network = assembles(".node A\n.home A\n.start main\nnoop\nhalt\n");
        let exa = network.node("A").unwrap().machine("main").unwrap();
        assert_eq!(exa.code.len(), 2);
        assert_eq!(network.stats().size, 2);
    }

    #[test]
    fn size_sums_across_machines() {
        let network = assembles(
            ".node A\n.home A\n.start one\nnoop\nhalt\n.start two\nhalt\n",
        );
        assert_eq!(network.stats().size, 3);
        assert_eq!(network.node("A").unwrap().machines().count(), 2);
    }

    #[test]
    fn finalize_without_home_is_rejected() {
        let err = assembly_error(".node A\n.start main\nhalt\n");
        assert!(err.contains(".home"), "{err}");
    }

    #[test]
    fn machine_on_full_node_is_rejected() {
        let err = assembly_error(".node A 0\n.home A\n.start main\nhalt\n");
        assert!(err.contains("already full"), "{err}");
    }

    #[test]
    fn labels_resolve_to_addresses() {
        let network = assembles(
            ".node A\n.home A\n.start main\nmark top\nnoop\njump top\n",
        );
        let exa = network.node("A").unwrap().machine("main").unwrap();
        assert_eq!(exa.code[1].op1, Operand::Address(0));
    }

    #[test]
    fn labels_are_machine_local() {
        // both machines may define "top" since the table clears at finalize
        assembles(
            ".node A\n.home A\n\
             .start one\nmark top\njump top\n\
             .start two\nmark top\njump top\n",
        );
    }

    #[test]
    fn unknown_label_is_rejected() {
        let err = assembly_error(".node A\n.home A\n.start main\njump nowhere\n");
        assert!(err.contains("unrecognized label: nowhere"), "{err}");
    }

    #[test]
    fn duplicate_label_is_rejected() {
        let err = assembly_error(
            ".node A\n.home A\n.start main\nmark top\nnoop\nmark top\n",
        );
        assert!(err.contains("duplicate label"), "{err}");
    }

    // ==================== Instruction parsing ====================

    #[test]
    fn mnemonics_are_case_insensitive() {
        let network = assembles(".node A\n.home A\n.start main\nCOPY 1 X\nHALT\n");
        let exa = network.node("A").unwrap().machine("main").unwrap();
        assert_eq!(exa.code[0].opcode, Opcode::Copy);
    }

    #[test]
    fn copy_rejects_literal_destination() {
        let err = assembly_error(".node A\n.home A\n.start main\ncopy 1 2\n");
        assert!(err.contains("unrecognized register: 2"), "{err}");
    }

    #[test]
    fn unknown_mnemonic_is_rejected() {
        let err = assembly_error(".node A\n.home A\n.start main\nfrob\n");
        assert!(err.contains("unrecognized mnemonic: frob"), "{err}");
    }

    #[test]
    fn arity_mismatch_is_rejected() {
        let err = assembly_error(".node A\n.home A\n.start main\naddi 1 2\n");
        assert!(err.contains("unrecognized or invalid instruction"), "{err}");
    }

    #[test]
    fn test_forms_parse() {
        let network = assembles(
            ".node A\n.home A\n.start main\n\
             test mrd\ntest eof\ntest x = 1\ntest x > 1\ntest x < 1\n",
        );
        let exa = network.node("A").unwrap().machine("main").unwrap();
        let opcodes: Vec<Opcode> = exa.code.iter().map(|i| i.opcode).collect();
        assert_eq!(
            opcodes,
            vec![
                Opcode::Test,
                Opcode::Test,
                Opcode::TestEq,
                Opcode::TestGt,
                Opcode::TestLt
            ]
        );
    }

    #[test]
    fn test_with_unknown_probe_is_rejected() {
        let err = assembly_error(".node A\n.home A\n.start main\ntest x\n");
        assert!(err.contains("unrecognized or invalid instruction"), "{err}");
    }

    #[test]
    fn void_accepts_only_m_or_f() {
        let err = assembly_error(".node A\n.home A\n.start main\nvoid x\n");
        assert!(err.contains("void only accepts"), "{err}");
    }

    #[test]
    fn double_m_reference_is_rejected() {
        let err = assembly_error(".node A\n.home A\n.start main\ncopy m m\n");
        assert!(err.contains("more than once"), "{err}");

        let err = assembly_error(".node A\n.home A\n.start main\naddi m 1 m\n");
        assert!(err.contains("more than once"), "{err}");
    }

    #[test]
    fn hardware_names_resolve_as_operands() {
        let network = assembles(
            ".node A\n.reg sink #NULL A\n.home A\n.start main\ncopy 1 #null\n",
        );
        let exa = network.node("A").unwrap().machine("main").unwrap();
        assert_eq!(exa.code[0].op2, Operand::Hardware(0));
    }

    #[test]
    fn unknown_operand_is_rejected() {
        let err = assembly_error(".node A\n.home A\n.start main\nlink bogus\n");
        assert!(err.contains("unrecognized operand: bogus"), "{err}");
    }

    // ==================== Preprocessor ====================

    #[test]
    fn rep_expands_block() {
        let network = assembles(
            ".node A\n.home A\n.start main\n@rep 3\nnoop\n@end\nhalt\n",
        );
        let exa = network.node("A").unwrap().machine("main").unwrap();
        assert_eq!(exa.code.len(), 4);
    }

    #[test]
    fn rep_substitutes_incrementor() {
        let network = assembles(
            ".node A\n.home A\n.start main\n@rep 3\ncopy @{10,5} x\n@end\n",
        );
        let exa = network.node("A").unwrap().machine("main").unwrap();
        assert_eq!(exa.code[0].op1, Operand::Number(10));
        assert_eq!(exa.code[1].op1, Operand::Number(15));
        assert_eq!(exa.code[2].op1, Operand::Number(20));
    }

    #[test]
    fn end_without_rep_is_rejected() {
        let err = assembly_error(".node A\n.home A\n.start main\n@end\n");
        assert!(err.contains("without a matching @rep"), "{err}");
    }

    #[test]
    fn rep_without_end_is_rejected() {
        let err = assembly_error(".node A\n.home A\n.start main\n@rep 2\nnoop\n");
        assert!(err.contains("missing @end"), "{err}");
    }

    #[test]
    fn substitute_rep_first_occurrence_only() {
        assert_eq!(substitute_rep("copy @{1,2} x", 3), "copy 7 x");
        assert_eq!(
            substitute_rep("copy @{0,1} @{0,1}", 1),
            "copy 1 @{0,1}"
        );
        assert_eq!(substitute_rep("noop", 5), "noop");
    }

    // ==================== Helpers ====================

    #[test]
    fn tokenize_keeps_quoted_spans() {
        let tokens = tokenize(r#".file "a b.txt" N 300"#).unwrap();
        assert_eq!(tokens, vec![".file", "\"a b.txt\"", "N", "300"]);
    }

    #[test]
    fn tokenize_rejects_unterminated_string() {
        assert!(tokenize(r#".file "open N"#).is_err());
    }

    #[test]
    fn strip_comments_handles_both_markers() {
        assert_eq!(strip_comments("noop ; comment"), "noop ");
        assert_eq!(strip_comments("noop NOTE comment"), "noop ");
        assert_eq!(strip_comments("noop note comment"), "noop ");
        assert_eq!(strip_comments("noop"), "noop");
    }

    #[test]
    fn unquote_strips_matched_quotes() {
        assert_eq!(unquote("\"path\""), "path");
        assert_eq!(unquote("path"), "path");
    }
}

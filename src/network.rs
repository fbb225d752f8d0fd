//! The network: global state and the cycle-stepped execution engine.
//!
//! A [`Network`] owns every node, the hardware arena, the global channel,
//! the clamp range, the engine RNG, and the run statistics. The engine
//! advances each live exa by at most one instruction per cycle:
//!
//! - nodes are visited in declaration order, machines in list order;
//! - an instruction that cannot complete (channel not ready, destination
//!   node full) leaves the instruction pointer alone and retries next cycle;
//! - LINK moves the exa into the destination's `incoming` buffer, which is
//!   drained only after every node has stepped, so an exa never executes
//!   twice in one cycle;
//! - a [`MachineFailure`] terminates the offending exa and the run goes on;
//!   structural [`Error`]s abort the whole run.
//!
//! The run ends when no machines remain anywhere; files still sitting on
//! nodes are then written back to disk.

use crate::channel::Channel;
use crate::errors::{Error, MachineFailure, StepError, StepResult};
use crate::exa::Exa;
use crate::file::File;
use crate::hardware::Hardware;
use crate::isa::{Instruction, Opcode, Operand, Register};
use crate::node::Node;
use crate::value::{swiz, Value};
use rand::Rng;
use rand_mt::Mt64;
use std::fmt;

/// Seed used when no override is given; fixed so that runs are reproducible
/// by default.
pub const DEFAULT_SEED: u64 = 4604955068226825093;

/// Counters reported to the caller after a run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunStats {
    /// Total instruction count across all finalized exas.
    pub size: usize,
    /// Cycles executed.
    pub cycles: usize,
    /// LINK and KILL operations that took effect.
    pub activity: usize,
}

/// What a single instruction step did to the exa.
enum Step {
    /// Completed; bump the instruction pointer.
    Advance,
    /// Either retrying next cycle or the instruction set ip itself.
    Stay,
    /// Migrated; the exa now belongs in this node's incoming buffer.
    Moved(usize),
}

fn advance(flag: bool) -> Step {
    if flag {
        Step::Advance
    } else {
        Step::Stay
    }
}

#[derive(Debug)]
pub struct Network {
    pub(crate) nodes: Vec<Node>,
    pub(crate) hardware: Vec<Hardware>,
    pub(crate) global_channel: Channel,
    pub(crate) range_min: i64,
    pub(crate) range_max: i64,
    pub(crate) next_file_id: u16,
    pub(crate) rng: Mt64,
    pub(crate) stats: RunStats,
}

impl Network {
    pub(crate) fn new(seed: u64) -> Self {
        Self {
            nodes: Vec::new(),
            hardware: Vec::new(),
            global_channel: Channel::default(),
            range_min: -9999,
            range_max: 9999,
            next_file_id: 400,
            rng: Mt64::new(seed),
            stats: RunStats::default(),
        }
    }

    /// Looks up a node by name.
    pub fn node(&self, name: &str) -> Option<&Node> {
        self.nodes.iter().find(|node| node.name == name)
    }

    /// Nodes in declaration order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    /// Searches every node for a resident machine by name.
    pub fn machine(&self, name: &str) -> Option<&Exa> {
        self.nodes.iter().find_map(|node| node.machine(name))
    }

    pub fn global_channel(&self) -> &Channel {
        &self.global_channel
    }

    pub fn stats(&self) -> RunStats {
        self.stats
    }

    pub(crate) fn node_index(&self, name: &str) -> Option<usize> {
        self.nodes.iter().position(|node| node.name == name)
    }

    /// Runs cycles until no machines remain, then persists node files.
    ///
    /// Note that even an empty network executes one cycle before the
    /// survivor count is examined.
    pub fn run(&mut self) -> Result<RunStats, Error> {
        loop {
            if self.cycle()? == 0 {
                break;
            }
        }

        self.persist()?;
        Ok(self.stats)
    }

    /// Executes one cycle; returns how many machines remain afterwards.
    pub fn cycle(&mut self) -> Result<usize, Error> {
        self.stats.cycles += 1;

        for node_idx in 0..self.nodes.len() {
            let machine_count = self.nodes[node_idx].machines.len();
            for slot in 0..machine_count {
                let Some(mut exa) = self.nodes[node_idx].machines[slot].take() else {
                    continue;
                };
                if exa.terminated {
                    self.nodes[node_idx].machines[slot] = Some(exa);
                    continue;
                }

                match self.step_machine(node_idx, &mut exa) {
                    Ok(Some(dest)) => self.nodes[dest].incoming.push(exa),
                    Ok(None) => self.nodes[node_idx].machines[slot] = Some(exa),
                    Err(error) => {
                        self.nodes[node_idx].machines[slot] = Some(exa);
                        return Err(error);
                    }
                }
            }

            self.drain_terminated(node_idx);
        }

        let mut remaining = 0;
        for node in &mut self.nodes {
            let arrivals = std::mem::take(&mut node.incoming);
            node.machines.extend(arrivals.into_iter().map(Some));
            remaining += node.machines.len();
        }

        Ok(remaining)
    }

    /// Steps one exa; `Some(dest)` means it migrated. A machine failure is
    /// absorbed here: the exa is flagged terminated, the diagnostic goes to
    /// stderr, and the run continues.
    fn step_machine(&mut self, node: usize, exa: &mut Exa) -> Result<Option<usize>, Error> {
        match self.execute(node, exa) {
            Ok(Step::Advance) => {
                exa.ip += 1;
                Ok(None)
            }
            Ok(Step::Stay) => Ok(None),
            Ok(Step::Moved(dest)) => Ok(Some(dest)),
            Err(StepError::Failure(failure)) => {
                exa.terminated = true;
                eprintln!("{}: {}", exa.name, failure);
                Ok(None)
            }
            Err(StepError::Fatal(error)) => Err(error),
        }
    }

    /// Returns any held file of terminated machines to the node, then
    /// compacts the machine list (dropping holes and the terminated).
    fn drain_terminated(&mut self, node_idx: usize) {
        let node = &mut self.nodes[node_idx];
        for slot in node.machines.iter_mut() {
            if let Some(exa) = slot {
                if exa.terminated {
                    if let Some(file) = exa.file.take() {
                        node.files.insert(file.id, file);
                    }
                }
            }
        }
        node.machines
            .retain(|slot| slot.as_ref().is_some_and(|exa| !exa.terminated));
    }

    /// Writes every node-resident file back to disk.
    fn persist(&self) -> Result<(), Error> {
        for node in &self.nodes {
            for file in node.files.values() {
                file.write_to_disk().map_err(|e| Error::Io {
                    path: file.filename.display().to_string(),
                    source: e.to_string(),
                })?;
            }
        }
        Ok(())
    }

    // ==================== Instruction execution ====================

    fn execute(&mut self, node: usize, exa: &mut Exa) -> StepResult<Step> {
        let inst = exa
            .code
            .get(exa.ip)
            .cloned()
            .ok_or(MachineFailure::OutOfInstructions)?;

        let step = match inst.opcode {
            Opcode::Copy => advance(self.op_copy(node, exa, &inst)?),
            Opcode::Addi => advance(self.op_binary(node, exa, &inst, Value::add)?),
            Opcode::Subi => advance(self.op_binary(node, exa, &inst, Value::sub)?),
            Opcode::Muli => advance(self.op_binary(node, exa, &inst, Value::mul)?),
            Opcode::Divi => advance(self.op_binary(node, exa, &inst, Value::div)?),
            Opcode::Modi => advance(self.op_binary(node, exa, &inst, Value::rem)?),
            Opcode::Swiz => advance(self.op_swiz(node, exa, &inst)?),
            Opcode::Jump => {
                exa.ip = branch_target(&inst)?;
                Step::Stay
            }
            Opcode::Tjmp => {
                let target = branch_target(&inst)?;
                if exa.t.is_truthy() {
                    exa.ip = target;
                    Step::Stay
                } else {
                    Step::Advance
                }
            }
            Opcode::Fjmp => {
                let target = branch_target(&inst)?;
                if exa.t == Value::Number(0) {
                    exa.ip = target;
                    Step::Stay
                } else {
                    Step::Advance
                }
            }
            Opcode::Test => {
                self.op_test_probe(node, exa, &inst)?;
                Step::Advance
            }
            Opcode::TestEq => advance(self.op_test_cmp(node, exa, &inst, |a, b| a == b)?),
            Opcode::TestGt => advance(self.op_test_cmp(node, exa, &inst, Value::gt)?),
            Opcode::TestLt => advance(self.op_test_cmp(node, exa, &inst, Value::lt)?),
            Opcode::Halt => return Err(MachineFailure::Halted.into()),
            Opcode::Kill => {
                self.op_kill(node);
                Step::Advance
            }
            Opcode::Link => self.op_link(node, exa, &inst)?,
            Opcode::Host => {
                let name = self.nodes[node].name.clone();
                advance(self.set(node, exa, &inst.op1, Value::String(name))?)
            }
            Opcode::Mode => {
                exa.global_mode = !exa.global_mode;
                Step::Advance
            }
            Opcode::Void => advance(self.op_void(node, exa, &inst)?),
            Opcode::Make => {
                self.op_make(exa)?;
                Step::Advance
            }
            Opcode::Grab => advance(self.op_grab(node, exa, &inst)?),
            Opcode::File => advance(self.op_file_id(node, exa, &inst)?),
            Opcode::Seek => advance(self.op_seek(node, exa, &inst)?),
            Opcode::Drop => advance(self.op_drop(node, exa)?),
            Opcode::Wipe => {
                let file = exa
                    .file
                    .as_mut()
                    .ok_or(MachineFailure::NoFileHeld("wipe"))?;
                file.wipe();
                Step::Advance
            }
            Opcode::Noop => Step::Advance,
            Opcode::Rand => {
                let draw = self.rng.next_u64() as i64;
                advance(self.set(node, exa, &inst.op1, Value::Number(draw))?)
            }
            Opcode::Repl => advance(self.op_repl(node, exa, &inst)?),
            Opcode::Dump => {
                println!("{self}");
                Step::Advance
            }
            Opcode::DumpArg => {
                self.op_dump_arg(exa, &inst)?;
                Step::Advance
            }
        };

        Ok(step)
    }

    fn op_copy(&mut self, node: usize, exa: &mut Exa, inst: &Instruction) -> StepResult<bool> {
        match self.get(node, exa, &inst.op1)? {
            Some(value) => self.set(node, exa, &inst.op2, value),
            None => Ok(false),
        }
    }

    /// Shared shape of ADDI/SUBI/MULI/DIVI/MODI: two sources, one register
    /// destination, retried until both sources are ready.
    fn op_binary(
        &mut self,
        node: usize,
        exa: &mut Exa,
        inst: &Instruction,
        op: fn(&Value, &Value) -> Result<Value, MachineFailure>,
    ) -> StepResult<bool> {
        let left = self.get(node, exa, &inst.op1)?;
        let right = self.get(node, exa, &inst.op2)?;
        match (left, right) {
            (Some(left), Some(right)) => self.set(node, exa, &inst.op3, op(&left, &right)?),
            _ => Ok(false),
        }
    }

    fn op_swiz(&mut self, node: usize, exa: &mut Exa, inst: &Instruction) -> StepResult<bool> {
        let input = self.get(node, exa, &inst.op1)?;
        let mask = self.get(node, exa, &inst.op2)?;
        match (input, mask) {
            (Some(input), Some(mask)) => {
                let swizzed = swiz(&input, &mask)?;
                self.set(node, exa, &inst.op3, swizzed)
            }
            _ => Ok(false),
        }
    }

    /// TEST MRD / TEST EOF: probes channel or file state into T without
    /// consuming anything.
    fn op_test_probe(&mut self, node: usize, exa: &mut Exa, inst: &Instruction) -> StepResult<()> {
        let Operand::Register(register) = inst.op1 else {
            return Err(Error::TestRegister.into());
        };

        match register {
            Register::M => {
                let channel = self.channel_for(node, exa);
                exa.t = Value::Number(channel.available() as i64);
            }
            Register::F => {
                let file = exa
                    .file
                    .as_ref()
                    .ok_or(MachineFailure::NoFileHeld("check for eof"))?;
                exa.t = Value::Number(file.eof() as i64);
            }
            _ => return Err(Error::TestRegister.into()),
        }

        Ok(())
    }

    fn op_test_cmp(
        &mut self,
        node: usize,
        exa: &mut Exa,
        inst: &Instruction,
        cmp: fn(&Value, &Value) -> bool,
    ) -> StepResult<bool> {
        let left = self.get(node, exa, &inst.op1)?;
        let right = self.get(node, exa, &inst.op2)?;
        match (left, right) {
            (Some(left), Some(right)) => {
                exa.t = Value::Number(cmp(&left, &right) as i64);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Terminates one uniformly-random other live exa on the node. Counts
    /// as activity even when there is nobody to kill.
    fn op_kill(&mut self, node: usize) {
        self.stats.activity += 1;

        let candidates: Vec<usize> = self.nodes[node]
            .machines
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.as_ref().is_some_and(|exa| !exa.terminated))
            .map(|(idx, _)| idx)
            .collect();

        if candidates.is_empty() {
            return;
        }

        let victim = candidates[self.rng.gen_range(0..candidates.len())];
        if let Some(exa) = &mut self.nodes[node].machines[victim] {
            exa.terminated = true;
        }
    }

    fn op_link(&mut self, node: usize, exa: &mut Exa, inst: &Instruction) -> StepResult<Step> {
        let Some(dest) = self.get(node, exa, &inst.op1)? else {
            return Ok(Step::Stay);
        };
        let Value::Number(id) = dest else {
            return Err(MachineFailure::LinkWithString.into());
        };

        let target = *self.nodes[node]
            .links
            .get(&id)
            .ok_or(MachineFailure::NoSuchLink(id))?;

        if self.nodes[target].full() {
            return Ok(Step::Stay);
        }

        self.stats.activity += 1;
        exa.ip += 1;
        Ok(Step::Moved(target))
    }

    fn op_void(&mut self, node: usize, exa: &mut Exa, inst: &Instruction) -> StepResult<bool> {
        let Operand::Register(register) = inst.op1 else {
            return Err(Error::VoidRegister.into());
        };

        match register {
            Register::M => Ok(self.get(node, exa, &inst.op1)?.is_some()),
            Register::F => {
                let file = exa
                    .file
                    .as_mut()
                    .ok_or(MachineFailure::NoFileHeld("void"))?;
                file.void_current()?;
                Ok(true)
            }
            _ => Err(Error::VoidRegister.into()),
        }
    }

    fn op_make(&mut self, exa: &mut Exa) -> StepResult<()> {
        if exa.file.is_some() {
            return Err(MachineFailure::FileAlreadyHeld("make").into());
        }

        exa.file = Some(File::new(self.next_file_id));
        self.next_file_id = self.next_file_id.wrapping_add(1);
        Ok(())
    }

    fn op_grab(&mut self, node: usize, exa: &mut Exa, inst: &Instruction) -> StepResult<bool> {
        let Some(id) = self.get(node, exa, &inst.op1)? else {
            return Ok(false);
        };
        let Value::Number(id) = id else {
            return Err(MachineFailure::GrabWithString.into());
        };
        if exa.file.is_some() {
            return Err(MachineFailure::FileAlreadyHeld("grab").into());
        }

        let file = u16::try_from(id)
            .ok()
            .and_then(|key| self.nodes[node].files.remove(&key))
            .ok_or(MachineFailure::NoSuchFile(id))?;
        exa.file = Some(file);
        Ok(true)
    }

    fn op_file_id(&mut self, node: usize, exa: &mut Exa, inst: &Instruction) -> StepResult<bool> {
        let id = exa
            .file
            .as_ref()
            .map(|file| file.id)
            .ok_or(MachineFailure::NoFileHeld("get file id"))?;
        self.set(node, exa, &inst.op1, Value::Number(id as i64))
    }

    fn op_seek(&mut self, node: usize, exa: &mut Exa, inst: &Instruction) -> StepResult<bool> {
        if exa.file.is_none() {
            return Err(MachineFailure::NoFileHeld("seek").into());
        }

        let Some(offset) = self.get(node, exa, &inst.op1)? else {
            return Ok(false);
        };
        let Value::Number(delta) = offset else {
            return Err(MachineFailure::SeekWithString.into());
        };

        if let Some(file) = exa.file.as_mut() {
            file.seek(delta);
        }
        Ok(true)
    }

    fn op_drop(&mut self, node: usize, exa: &mut Exa) -> StepResult<bool> {
        if exa.file.is_none() {
            return Err(MachineFailure::NoFileHeld("drop").into());
        }
        if self.nodes[node].full() {
            return Ok(false);
        }

        let file = exa.file.take().expect("presence checked above");
        self.nodes[node].files.insert(file.id, file);
        Ok(true)
    }

    fn op_repl(&mut self, node: usize, exa: &mut Exa, inst: &Instruction) -> StepResult<bool> {
        let Operand::Address(address) = inst.op1 else {
            return Err(Error::BranchTarget.into());
        };

        if self.nodes[node].full() {
            return Ok(false);
        }

        let fork = exa.fork(address);
        self.nodes[node].incoming.push(fork);
        Ok(true)
    }

    fn op_dump_arg(&mut self, exa: &Exa, inst: &Instruction) -> StepResult<()> {
        let Operand::Text(arg) = &inst.op1 else {
            return Err(Error::DumpArgument(String::new()).into());
        };

        match arg.as_str() {
            "me" => println!("{exa}"),
            "code" => {
                let listing: Vec<String> = exa
                    .code
                    .iter()
                    .map(|inst| self.format_instruction(inst))
                    .collect();
                println!("Code:[{}]", listing.join("; "));
            }
            other => return Err(Error::DumpArgument(other.to_string()).into()),
        }

        Ok(())
    }

    // ==================== Operand resolution ====================

    /// The channel an exa's M register currently routes to.
    fn channel_for(&mut self, node: usize, exa: &Exa) -> &mut Channel {
        if exa.global_mode {
            &mut self.global_channel
        } else {
            &mut self.nodes[node].local_channel
        }
    }

    /// Evaluates a source operand. `None` means "not ready, retry next
    /// cycle" (an empty channel behind M). Consuming M clears the slot; no
    /// other path does. Every Number produced is clamped.
    fn get(&mut self, node: usize, exa: &mut Exa, operand: &Operand) -> StepResult<Option<Value>> {
        let value = match operand {
            Operand::Unassigned => return Err(Error::UnassignedOperand.into()),
            Operand::Register(Register::X) => Some(exa.x.clone()),
            Operand::Register(Register::T) => Some(exa.t.clone()),
            Operand::Register(Register::M) => self.channel_for(node, exa).slot.take(),
            Operand::Register(Register::F) => {
                let file = exa
                    .file
                    .as_mut()
                    .ok_or(MachineFailure::NoFileHeld("read from file"))?;
                Some(file.read()?)
            }
            Operand::Number(n) => Some(Value::Number(*n)),
            Operand::Address(_) => return Err(Error::AddressAsValue.into()),
            Operand::Hardware(id) => {
                let hw = &mut self.hardware[*id];
                if hw.host != node {
                    return Err(MachineFailure::HardwareOutOfReach(hw.name.clone()).into());
                }
                Some(hw.read())
            }
            Operand::Text(_) => return Err(Error::UnresolvedLabel.into()),
        };

        Ok(value.map(|v| self.clamp(v)))
    }

    /// Writes to a destination operand. `false` means "channel occupied,
    /// retry next cycle". The value is clamped before it lands anywhere.
    fn set(
        &mut self,
        node: usize,
        exa: &mut Exa,
        operand: &Operand,
        value: Value,
    ) -> StepResult<bool> {
        let value = self.clamp(value);

        match operand {
            Operand::Unassigned => Err(Error::UnassignedOperand.into()),
            Operand::Register(Register::X) => {
                exa.x = value;
                Ok(true)
            }
            Operand::Register(Register::T) => {
                exa.t = value;
                Ok(true)
            }
            Operand::Register(Register::M) => Ok(self.channel_for(node, exa).send(value)),
            Operand::Register(Register::F) => {
                let file = exa
                    .file
                    .as_mut()
                    .ok_or(MachineFailure::NoFileHeld("write to file"))?;
                file.write(value);
                Ok(true)
            }
            Operand::Number(_) => Err(Error::LiteralDestination.into()),
            Operand::Address(_) => Err(Error::AddressDestination.into()),
            Operand::Hardware(id) => {
                let hw = &mut self.hardware[*id];
                if hw.host != node {
                    return Err(MachineFailure::HardwareOutOfReach(hw.name.clone()).into());
                }
                hw.write(&value);
                Ok(true)
            }
            Operand::Text(_) => Err(Error::UnresolvedLabel.into()),
        }
    }

    /// Clamps numbers into the network range; strings pass through.
    pub(crate) fn clamp(&self, value: Value) -> Value {
        match value {
            Value::Number(n) => Value::Number(n.clamp(self.range_min, self.range_max)),
            other => other,
        }
    }

    // ==================== Formatting ====================

    fn format_operand(&self, operand: &Operand) -> String {
        match operand {
            Operand::Unassigned => String::new(),
            Operand::Register(register) => register.to_string(),
            Operand::Number(n) => n.to_string(),
            Operand::Address(address) => address.to_string(),
            Operand::Hardware(id) => self.hardware[*id].name.clone(),
            Operand::Text(text) => text.clone(),
        }
    }

    /// Renders one finalized instruction for DUMP code.
    pub(crate) fn format_instruction(&self, inst: &Instruction) -> String {
        let symbol = match inst.opcode {
            Opcode::TestEq => Some("="),
            Opcode::TestGt => Some(">"),
            Opcode::TestLt => Some("<"),
            _ => None,
        };

        if let Some(symbol) = symbol {
            return format!(
                "{} {} {} {}",
                inst.opcode.mnemonic(),
                self.format_operand(&inst.op1),
                symbol,
                self.format_operand(&inst.op2)
            );
        }

        let mut out = inst.opcode.mnemonic().to_string();
        for operand in [&inst.op1, &inst.op2, &inst.op3] {
            if *operand == Operand::Unassigned {
                break;
            }
            out.push(' ');
            out.push_str(&self.format_operand(operand));
        }
        out
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Network{{cycles={}; activity={}; global_channel={}}}",
            self.stats.cycles,
            self.stats.activity,
            match self.global_channel.receive() {
                Some(value) => value.to_string(),
                None => "<empty>".to_string(),
            }
        )?;

        for node in &self.nodes {
            let machines: Vec<&str> = node.machines().map(Exa::name).collect();
            let files: Vec<String> = node.files.keys().map(u16::to_string).collect();
            writeln!(
                f,
                "  Node{{name={}; machines=[{}]; files=[{}]; channel={}}}",
                node.name,
                machines.join(", "),
                files.join(", "),
                match node.local_channel.receive() {
                    Some(value) => value.to_string(),
                    None => "<empty>".to_string(),
                }
            )?;
        }

        Ok(())
    }
}

/// Extracts the resolved address of a branch instruction.
fn branch_target(inst: &Instruction) -> StepResult<usize> {
    match inst.op1 {
        Operand::Address(address) => Ok(address),
        _ => Err(Error::BranchTarget.into()),
    }
}

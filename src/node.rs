//! Nodes: capacity-bounded hosts for exas, files, and hardware.
//!
//! The machine list keeps a stable order within a cycle; an exa that
//! migrates away leaves a `None` hole behind until the node's end-of-step
//! compaction, which keeps iteration indices valid. Arrivals (LINK, REPL)
//! buffer in `incoming` and join the machine list only after every node has
//! stepped, so a migrated exa never runs twice in one cycle.

use crate::channel::Channel;
use crate::exa::Exa;
use crate::file::File;
use std::collections::BTreeMap;

#[derive(Debug)]
pub struct Node {
    pub(crate) name: String,
    pub(crate) capacity: usize,
    /// Directed outbound links, keyed by signed link id.
    pub(crate) links: BTreeMap<i64, usize>,
    pub(crate) machines: Vec<Option<Exa>>,
    pub(crate) incoming: Vec<Exa>,
    pub(crate) files: BTreeMap<u16, File>,
    /// Hardware handles by lowercased register name.
    pub(crate) registers: BTreeMap<String, usize>,
    pub(crate) local_channel: Channel,
}

impl Node {
    pub(crate) fn new(name: String, capacity: usize) -> Self {
        Self {
            name,
            capacity,
            links: BTreeMap::new(),
            machines: Vec::new(),
            incoming: Vec::new(),
            files: BTreeMap::new(),
            registers: BTreeMap::new(),
            local_channel: Channel::default(),
        }
    }

    /// The runtime fullness predicate. Counting `incoming` closes the race
    /// between a LINK accept decision and other arrivals in the same cycle;
    /// mid-cycle holes still count because their exa has not left the node's
    /// books until compaction.
    pub fn full(&self) -> bool {
        self.machines.len() + self.files.len() + self.incoming.len() >= self.capacity
    }

    /// The assembly-time check used when placing boot files and finalized
    /// machines.
    pub(crate) fn has_room(&self) -> bool {
        self.machines.len() + self.files.len() < self.capacity
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Live machines currently resident (skips mid-cycle holes).
    pub fn machines(&self) -> impl Iterator<Item = &Exa> {
        self.machines.iter().flatten()
    }

    /// Looks up a resident machine by name.
    pub fn machine(&self, name: &str) -> Option<&Exa> {
        self.machines().find(|exa| exa.name() == name)
    }

    pub fn file(&self, id: u16) -> Option<&File> {
        self.files.get(&id)
    }

    pub fn file_ids(&self) -> impl Iterator<Item = u16> + '_ {
        self.files.keys().copied()
    }

    pub fn local_channel(&self) -> &Channel {
        &self.local_channel
    }
}

//! Trace observers.
//!
//! Observers are pure sinks: they may record anything the core reports but
//! can neither fail the VM nor mutate its state. A VM with no observers
//! registered pays only an emptiness check per hook.

use super::cpu::structs::Psr;

/// Register snapshot handed to the instruction hook: R0..R14 plus the raw PC.
pub type RegSnapshot = [u32; 16];

/// Hook interface consumed by optional observers. Every method has an empty
/// default body; implementors override the events they care about.
#[allow(unused_variables)]
pub trait Observer: Send {
    /// One completed instruction, with register file before and after.
    fn on_instruction(
        &mut self,
        cycle: u64,
        pc: u32,
        opcode: u32,
        disasm: &str,
        before: &RegSnapshot,
        after: &RegSnapshot,
        flags_after: Psr,
    ) {
    }

    /// A completed memory read (`size` in bytes: 1, 2 or 4).
    fn on_read(&mut self, cycle: u64, pc: u32, addr: u32, value: u32, size: u8) {}

    /// A completed memory write.
    fn on_write(&mut self, cycle: u64, pc: u32, addr: u32, value: u32, size: u8) {}

    /// Coverage: this PC was reached (predicated-false instructions count).
    fn on_execute(&mut self, pc: u32, cycle: u64) {}

    /// SP changed, whether by push, pop, or a plain register move.
    fn on_sp_change(&mut self, cycle: u64, pc: u32, old_sp: u32, new_sp: u32) {}

    /// Flags changed from the previous instruction's snapshot.
    fn on_flags(&mut self, cycle: u64, pc: u32, disasm: &str, flags: Psr) {}

    /// A register was read through the operand path.
    fn on_register_read(&mut self, cycle: u64, pc: u32, reg: &'static str, value: u32) {}

    /// A register was written.
    fn on_register_write(&mut self, cycle: u64, pc: u32, reg: &'static str, old: u32, new: u32) {}
}

/// Trait for an object that owns the observer registry.
pub trait WithTracers {
    fn tracers(&self) -> &Tracers;
    fn tracers_mut(&mut self) -> &mut Tracers;
}

/// Broadcast container for registered observers.
#[derive(Default)]
pub struct Tracers {
    observers: Vec<Box<dyn Observer>>,
}

impl Tracers {
    pub fn new() -> Tracers {
        Tracers::default()
    }

    pub fn register(&mut self, observer: Box<dyn Observer>) {
        self.observers.push(observer);
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    pub fn instruction(
        &mut self,
        cycle: u64,
        pc: u32,
        opcode: u32,
        disasm: &str,
        before: &RegSnapshot,
        after: &RegSnapshot,
        flags_after: Psr,
    ) {
        for obs in self.observers.iter_mut() {
            obs.on_instruction(cycle, pc, opcode, disasm, before, after, flags_after);
        }
    }

    pub fn read(&mut self, cycle: u64, pc: u32, addr: u32, value: u32, size: u8) {
        for obs in self.observers.iter_mut() {
            obs.on_read(cycle, pc, addr, value, size);
        }
    }

    pub fn write(&mut self, cycle: u64, pc: u32, addr: u32, value: u32, size: u8) {
        for obs in self.observers.iter_mut() {
            obs.on_write(cycle, pc, addr, value, size);
        }
    }

    pub fn execute(&mut self, pc: u32, cycle: u64) {
        for obs in self.observers.iter_mut() {
            obs.on_execute(pc, cycle);
        }
    }

    pub fn sp_change(&mut self, cycle: u64, pc: u32, old_sp: u32, new_sp: u32) {
        for obs in self.observers.iter_mut() {
            obs.on_sp_change(cycle, pc, old_sp, new_sp);
        }
    }

    pub fn flags(&mut self, cycle: u64, pc: u32, disasm: &str, flags: Psr) {
        for obs in self.observers.iter_mut() {
            obs.on_flags(cycle, pc, disasm, flags);
        }
    }

    pub fn register_read(&mut self, cycle: u64, pc: u32, reg: &'static str, value: u32) {
        for obs in self.observers.iter_mut() {
            obs.on_register_read(cycle, pc, reg, value);
        }
    }

    pub fn register_write(&mut self, cycle: u64, pc: u32, reg: &'static str, old: u32, new: u32) {
        for obs in self.observers.iter_mut() {
            obs.on_register_write(cycle, pc, reg, old, new);
        }
    }
}

/// Built-in observer that keeps first-read/first-write sequence numbers per
/// register, enough to flag registers consumed before anything wrote them.
#[derive(Default)]
pub struct RegisterUseTracker {
    seq: u64,
    first_read: std::collections::HashMap<&'static str, u64>,
    first_write: std::collections::HashMap<&'static str, u64>,
}

impl RegisterUseTracker {
    pub fn new() -> RegisterUseTracker {
        RegisterUseTracker::default()
    }

    /// Registers whose first read happened before any write. SP, LR and PC
    /// are excluded: bootstrap gives them meaningful values.
    pub fn read_before_write(&self) -> Vec<&'static str> {
        let mut out = Vec::new();
        for (&reg, &read_seq) in self.first_read.iter() {
            if matches!(reg, "SP" | "LR" | "PC") {
                continue;
            }
            let uninitialized = match self.first_write.get(reg) {
                Some(&write_seq) => read_seq < write_seq,
                None => true,
            };
            if uninitialized {
                out.push(reg);
            }
        }
        out.sort_unstable();
        out
    }
}

impl Observer for RegisterUseTracker {
    fn on_register_read(&mut self, _cycle: u64, _pc: u32, reg: &'static str, _value: u32) {
        self.seq += 1;
        let seq = self.seq;
        self.first_read.entry(reg).or_insert(seq);
    }

    fn on_register_write(&mut self, _cycle: u64, _pc: u32, reg: &'static str, _old: u32, _new: u32) {
        self.seq += 1;
        let seq = self.seq;
        self.first_write.entry(reg).or_insert(seq);
    }
}

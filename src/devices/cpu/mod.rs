//! The ARM2 core: state, decoder, barrel shifter, and per-class executors.

pub mod decode;
pub mod disasm;
pub mod exec;
pub mod shifter;
pub mod structs;
pub mod utils;

pub use structs::{Condition, Cpu, Flow, Psr};

use super::fault::Fault;
use super::trace::WithTracers;
use super::Machine;
use self::structs::reg_name;

/// Trait for a device that owns a CPU, such as the VM or a test harness.
pub trait WithCpu {
    fn cpu(&self) -> &Cpu;
    fn cpu_mut(&mut self) -> &mut Cpu;
}

/// Read a register through the operand path.
///
/// R15 reads as `PC + 8`: the classic two-stage prefetch is visible to every
/// operand, and a fair amount of real code depends on it.
pub fn reg_get<T: WithCpu + WithTracers>(mb: &mut T, r: u32) -> u32 {
    let r = r & 0xF;
    let cpu = mb.cpu();
    let value = if r == 15 {
        cpu.pc.wrapping_add(8)
    } else {
        cpu.regs[r as usize]
    };
    if !mb.tracers().is_empty() {
        let (cycle, pc) = (mb.cpu().cycles, mb.cpu().pc);
        mb.tracers_mut().register_read(cycle, pc, reg_name(r), value);
    }
    value
}

/// Write a register. Writing R15 sets PC directly; the executor that did it
/// must return [`Flow::Jump`] so the step loop leaves PC alone.
pub fn reg_set<T: WithCpu + WithTracers>(mb: &mut T, r: u32, value: u32) {
    let r = r & 0xF;
    let (cycle, pc) = (mb.cpu().cycles, mb.cpu().pc);
    let old = if r == 15 {
        let old = mb.cpu().pc;
        mb.cpu_mut().pc = value;
        old
    } else {
        let old = mb.cpu().regs[r as usize];
        mb.cpu_mut().regs[r as usize] = value;
        old
    };
    if !mb.tracers().is_empty() {
        mb.tracers_mut()
            .register_write(cycle, pc, reg_name(r), old, value);
        if r == 13 && old != value {
            mb.tracers_mut().sp_change(cycle, pc, old, value);
        }
    }
}

/// Fetch, decode, check the condition, and execute one instruction.
///
/// Cycle accounting and PC advancement stay with the caller (the VM step
/// loop): a predicated-false instruction and a fall-through both ask the
/// caller to advance, while branches and PC loads return [`Flow::Jump`].
pub fn exec<T: Machine>(mb: &mut T) -> Result<Flow, Fault> {
    let pc = mb.cpu().pc;
    let word = mb.fetch(pc)?;
    let class = decode::classify(word).ok_or_else(|| Fault::decode(word, pc))?;
    if !Condition::from_word(word).passes(mb.cpu().cpsr) {
        return Ok(Flow::Advance);
    }
    exec::dispatch(mb, class, word)
}

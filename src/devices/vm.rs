//! The virtual machine: CPU, memory, host services, and observers as one
//! steppable unit with a four-state lifecycle.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::bus::{layout, Bus};
use super::cpu::structs::LR_SENTINEL;
use super::cpu::{self, disasm, Cpu, Flow, WithCpu};
use super::fault::{Fault, FaultKind};
use super::mem::{Memory, WithMem};
use super::trace::{Observer, Tracers, WithTracers};
use crate::host::{Host, WithHost};

/// Label -> address mapping supplied by the assembler.
pub type SymbolTable = HashMap<String, u32>;

/// Entry-point labels, searched in order.
const ENTRY_LABELS: [&str; 4] = ["_start", "main", "__start", "start"];

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum VmState {
    Halted,
    Running,
    Breakpoint,
    Error,
}

pub struct Vm {
    cpu: Cpu,
    mem: Memory,
    host: Host,
    tracers: Tracers,
    state: VmState,
    entry: u32,
    exit_code: i32,
    cycle_limit: u64,
    fault: Option<Fault>,
    stop: Arc<AtomicBool>,
}

impl Vm {
    pub fn new(host: Host) -> Vm {
        let mut vm = Vm {
            cpu: Cpu::new(),
            mem: Memory::new(),
            host,
            tracers: Tracers::new(),
            state: VmState::Halted,
            entry: layout::CODE.start(),
            exit_code: 0,
            cycle_limit: u64::MAX,
            fault: None,
            stop: Arc::new(AtomicBool::new(false)),
        };
        vm.bootstrap();
        vm
    }

    //region Lifecycle

    /// Copy an assembled image into guest memory and pick the entry point:
    /// the first of `_start`, `main`, `__start`, `start` present in the
    /// symbol table, otherwise the load address (default 0x8000).
    pub fn load(
        &mut self,
        image: &[u8],
        base: Option<u32>,
        symbols: Option<&SymbolTable>,
    ) -> Result<(), Fault> {
        let base = base.unwrap_or_else(|| layout::CODE.start());
        self.mem.load_image(base, image)?;
        self.entry = symbols
            .and_then(|table| {
                ENTRY_LABELS
                    .iter()
                    .find_map(|label| table.get(*label).copied())
            })
            .unwrap_or(base);
        self.bootstrap();
        Ok(())
    }

    /// Reset registers to the post-bootstrap configuration: PC at the entry
    /// point, SP at the stack top, the LR sentinel installed, everything
    /// else zero. Memory contents are left alone.
    fn bootstrap(&mut self) {
        self.cpu = Cpu::new();
        self.cpu.pc = self.entry;
        self.cpu.regs[13] = layout::STACK_TOP;
        self.cpu.regs[14] = LR_SENTINEL;
        self.state = VmState::Halted;
        self.exit_code = 0;
        self.fault = None;
    }

    /// Back to the post-bootstrap register state without reloading bytes.
    pub fn reset(&mut self) {
        self.bootstrap();
    }

    /// Reset and additionally zero every segment (the program image included;
    /// a new `load` is needed before the VM can run again).
    pub fn full_reset(&mut self) {
        self.mem.clear();
        self.bootstrap();
    }

    //endregion

    //region Stepping

    /// Execute one instruction.
    ///
    /// Runs from `Halted` (start), `Running`, or `Breakpoint` (resume); the
    /// error state is terminal until a reset. All state mutation happens
    /// here, synchronously, on the caller's thread.
    pub fn step(&mut self) -> Result<VmState, Fault> {
        if self.state == VmState::Error {
            return Err(self
                .fault
                .clone()
                .unwrap_or_else(|| Fault::new(FaultKind::Decode, "VM is in the error state")));
        }
        self.state = VmState::Running;
        // Cooperative stop: honored at the step boundary only, so an
        // instruction is never left half-applied
        if self.stop.swap(false, Ordering::SeqCst) {
            self.state = VmState::Halted;
            return Ok(self.state);
        }
        if self.cpu.cycles >= self.cycle_limit {
            return Err(self.fail(Fault::new(
                FaultKind::CycleLimit,
                format!("limit of {} cycles reached", self.cycle_limit),
            )));
        }

        let pc_before = self.cpu.pc;
        let tracing = !self.tracers.is_empty();
        let (regs_before, flags_before, word) = if tracing {
            (
                self.cpu.snapshot(),
                self.cpu.cpsr,
                self.mem.fetch_word(pc_before).unwrap_or(0),
            )
        } else {
            (Default::default(), self.cpu.cpsr, 0)
        };

        let flow = match cpu::exec(self) {
            Ok(flow) => flow,
            Err(fault) => return Err(self.fail(fault)),
        };
        self.cpu.cycles += 1;

        match flow {
            Flow::Advance | Flow::Halt(_) | Flow::Break => {
                self.cpu.pc = pc_before.wrapping_add(4);
            }
            Flow::Jump => {}
        }
        match flow {
            Flow::Halt(code) => {
                self.exit_code = code;
                self.state = VmState::Halted;
            }
            Flow::Break => self.state = VmState::Breakpoint,
            Flow::Advance | Flow::Jump => {}
        }

        if tracing {
            let cycle = self.cpu.cycles;
            let regs_after = self.cpu.snapshot();
            let flags_after = self.cpu.cpsr;
            let text = disasm::disasm(word, pc_before);
            self.tracers.execute(pc_before, cycle);
            self.tracers.instruction(
                cycle,
                pc_before,
                word,
                &text,
                &regs_before,
                &regs_after,
                flags_after,
            );
            if flags_after != flags_before {
                self.tracers.flags(cycle, pc_before, &text, flags_after);
            }
        }
        Ok(self.state)
    }

    /// Step until the machine leaves the running state.
    pub fn run(&mut self) -> Result<VmState, Fault> {
        loop {
            if self.step()? != VmState::Running {
                return Ok(self.state);
            }
        }
    }

    /// Step at most `n` instructions.
    pub fn run_for(&mut self, n: u64) -> Result<VmState, Fault> {
        for _ in 0..n {
            if self.step()? != VmState::Running {
                break;
            }
        }
        Ok(self.state)
    }

    /// Disassemble the next instruction, execute it, and hand back a
    /// one-line trace. Debugging and test helper.
    pub fn debug_step(&mut self) -> Result<String, Fault> {
        let pc = self.cpu.pc;
        let word = self.mem.fetch_word(pc)?;
        let line = format!(
            "{:08X}  {:08X}  {:<28} R0:{:08X} R1:{:08X} SP:{:08X} {} CYC:{}",
            pc,
            word,
            disasm::disasm(word, pc),
            self.cpu.regs[0],
            self.cpu.regs[1],
            self.cpu.regs[13],
            self.cpu.cpsr,
            self.cpu.cycles,
        );
        self.step()?;
        Ok(line)
    }

    fn fail(&mut self, fault: Fault) -> Fault {
        self.state = VmState::Error;
        self.fault = Some(fault.clone());
        fault
    }

    //endregion

    //region Accessors

    pub fn state(&self) -> VmState {
        self.state
    }

    pub fn exit_code(&self) -> i32 {
        self.exit_code
    }

    pub fn fault(&self) -> Option<&Fault> {
        self.fault.as_ref()
    }

    pub fn entry(&self) -> u32 {
        self.entry
    }

    pub fn cycle_limit(&self) -> u64 {
        self.cycle_limit
    }

    /// A single limit governs both stepping and free running; hitting it is
    /// a fault, not a clean halt.
    pub fn set_cycle_limit(&mut self, limit: u64) {
        self.cycle_limit = limit;
    }

    pub fn register(&mut self, observer: Box<dyn Observer>) {
        self.tracers.register(observer);
    }

    /// Flag handle for cooperative cancellation from another thread; the VM
    /// halts at the next step boundary after it is set.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    //endregion
}

impl Default for Vm {
    fn default() -> Vm {
        Vm::new(Host::new())
    }
}

impl WithCpu for Vm {
    fn cpu(&self) -> &Cpu {
        &self.cpu
    }

    fn cpu_mut(&mut self) -> &mut Cpu {
        &mut self.cpu
    }
}

impl WithMem for Vm {
    fn mem(&self) -> &Memory {
        &self.mem
    }

    fn mem_mut(&mut self) -> &mut Memory {
        &mut self.mem
    }
}

impl WithHost for Vm {
    fn host(&self) -> &Host {
        &self.host
    }

    fn host_mut(&mut self) -> &mut Host {
        &mut self.host
    }
}

impl WithTracers for Vm {
    fn tracers(&self) -> &Tracers {
        &self.tracers
    }

    fn tracers_mut(&mut self) -> &mut Tracers {
        &mut self.tracers
    }
}

impl Vm {
    fn note_read(&mut self, addr: u32, value: u32, size: u8) {
        if !self.tracers.is_empty() {
            let (cycle, pc) = (self.cpu.cycles, self.cpu.pc);
            self.tracers.read(cycle, pc, addr, value, size);
        }
    }

    fn note_write(&mut self, addr: u32, value: u32, size: u8) {
        if !self.tracers.is_empty() {
            let (cycle, pc) = (self.cpu.cycles, self.cpu.pc);
            self.tracers.write(cycle, pc, addr, value, size);
        }
    }
}

impl Bus for Vm {
    fn load_byte(&mut self, addr: u32) -> Result<u8, Fault> {
        let value = self.mem.read_byte(addr)?;
        self.note_read(addr, u32::from(value), 1);
        Ok(value)
    }

    fn load_half(&mut self, addr: u32) -> Result<u16, Fault> {
        let value = self.mem.read_half(addr)?;
        self.note_read(addr, u32::from(value), 2);
        Ok(value)
    }

    fn load_word(&mut self, addr: u32) -> Result<u32, Fault> {
        let value = self.mem.read_word(addr)?;
        self.note_read(addr, value, 4);
        Ok(value)
    }

    fn store_byte(&mut self, addr: u32, value: u8) -> Result<(), Fault> {
        self.mem.write_byte(addr, value)?;
        self.note_write(addr, u32::from(value), 1);
        Ok(())
    }

    fn store_half(&mut self, addr: u32, value: u16) -> Result<(), Fault> {
        self.mem.write_half(addr, value)?;
        self.note_write(addr, u32::from(value), 2);
        Ok(())
    }

    fn store_word(&mut self, addr: u32, value: u32) -> Result<(), Fault> {
        self.mem.write_word(addr, value)?;
        self.note_write(addr, value, 4);
        Ok(())
    }

    fn fetch(&mut self, addr: u32) -> Result<u32, Fault> {
        self.mem.fetch_word(addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vm_with_program(words: &[u32]) -> Vm {
        let mut vm = Vm::new(Host::new());
        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
        vm.load(&bytes, None, None).unwrap();
        vm
    }

    #[test]
    fn bootstrap_state() {
        let vm = Vm::default();
        assert_eq!(vm.state(), VmState::Halted);
        assert_eq!(vm.cpu().pc, 0x8000);
        assert_eq!(vm.cpu().regs[13], 0x0005_0000);
        assert_eq!(vm.cpu().regs[14], 0xFFFF_FFFF);
        assert_eq!(vm.cpu().regs[..13], [0u32; 13]);
        assert_eq!(vm.cpu().cycles, 0);
    }

    #[test]
    fn entry_point_selection() {
        let mut vm = Vm::default();
        let mut symbols = SymbolTable::new();
        symbols.insert("main".into(), 0x8100);
        symbols.insert("start".into(), 0x8200);
        vm.load(&[0, 0, 0, 0], None, Some(&symbols)).unwrap();
        assert_eq!(vm.entry(), 0x8100, "main outranks start");
        symbols.insert("_start".into(), 0x8300);
        vm.load(&[0, 0, 0, 0], None, Some(&symbols)).unwrap();
        assert_eq!(vm.entry(), 0x8300, "_start outranks main");
    }

    #[test]
    fn mov_advances_pc_and_cycles() {
        // MOV R0, #1
        let mut vm = vm_with_program(&[0xE3A0_0001]);
        vm.step().unwrap();
        assert_eq!(vm.cpu().regs[0], 1);
        assert_eq!(vm.cpu().pc, 0x8004);
        assert_eq!(vm.cpu().cycles, 1);
    }

    #[test]
    fn predicated_false_instruction_is_skipped() {
        // MOVEQ R0, #1 with Z clear
        let mut vm = vm_with_program(&[0x03A0_0001]);
        vm.step().unwrap();
        assert_eq!(vm.cpu().regs[0], 0);
        assert_eq!(vm.cpu().pc, 0x8004);
        assert_eq!(vm.cpu().cycles, 1);
    }

    #[test]
    fn exit_service_halts_with_code() {
        // MOV R0, #7 ; SWI #0
        let mut vm = vm_with_program(&[0xE3A0_0007, 0xEF00_0000]);
        assert_eq!(vm.run().unwrap(), VmState::Halted);
        assert_eq!(vm.exit_code(), 7);
        assert_eq!(vm.cpu().cycles, 2);
    }

    #[test]
    fn breakpoint_parks_and_resumes() {
        // SWI #0xF1 ; MOV R0, #5 ; SWI #0
        let mut vm = vm_with_program(&[0xEF00_00F1, 0xE3A0_0005, 0xEF00_0000]);
        assert_eq!(vm.run().unwrap(), VmState::Breakpoint);
        assert_eq!(vm.cpu().regs[0], 0);
        assert_eq!(vm.run().unwrap(), VmState::Halted);
        assert_eq!(vm.exit_code(), 5);
    }

    #[test]
    fn alignment_fault_is_terminal() {
        // MOV R0, #0x8001 is not encodable as a rotated immediate; build the
        // address with MOV/ORR instead, then LDR R1, [R0]
        let mut vm = vm_with_program(&[
            0xE3A0_0C80, // MOV R0, #0x8000
            0xE380_0001, // ORR R0, R0, #1
            0xE590_1000, // LDR R1, [R0]
        ]);
        let err = vm.run().unwrap_err();
        assert_eq!(err.kind, FaultKind::Alignment);
        assert_eq!(vm.state(), VmState::Error);
        assert_eq!(vm.cpu().regs[1], 0, "R1 must be left unchanged");
        // the error state is sticky
        assert!(vm.step().is_err());
    }

    #[test]
    fn cycle_limit_faults() {
        // B . (spin forever)
        let mut vm = vm_with_program(&[0xEAFF_FFFE]);
        vm.set_cycle_limit(10);
        let err = vm.run().unwrap_err();
        assert_eq!(err.kind, FaultKind::CycleLimit);
        assert_eq!(vm.state(), VmState::Error);
    }

    #[test]
    fn reset_restores_registers_but_not_memory() {
        let mut vm = vm_with_program(&[0xE3A0_0007, 0xEF00_0000]);
        vm.run().unwrap();
        vm.reset();
        assert_eq!(vm.state(), VmState::Halted);
        assert_eq!(vm.cpu().regs[0], 0);
        assert_eq!(vm.cpu().pc, 0x8000);
        // program bytes survive a plain reset
        assert_eq!(vm.mem().read_word(0x8000).unwrap(), 0xE3A0_0007);
        vm.full_reset();
        assert_eq!(vm.mem().read_word(0x8000).unwrap(), 0);
    }

    #[test]
    fn stop_handle_halts_at_step_boundary() {
        let mut vm = vm_with_program(&[0xEAFF_FFFE]);
        let stop = vm.stop_handle();
        vm.step().unwrap();
        stop.store(true, std::sync::atomic::Ordering::SeqCst);
        assert_eq!(vm.step().unwrap(), VmState::Halted);
    }

    #[test]
    fn decode_failure_faults() {
        let mut vm = vm_with_program(&[0xEE00_0000]);
        let err = vm.run().unwrap_err();
        assert_eq!(err.kind, FaultKind::Decode);
    }
}

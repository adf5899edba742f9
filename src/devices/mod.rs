//! Emulated devices: the ARM2 CPU, the segmented guest memory, the software
//! interrupt services, and the trace observers, tied together by the VM.

pub mod bus;
pub mod cpu;
pub mod fault;
pub mod mem;
pub mod swi;
pub mod trace;
pub mod vm;

use crate::host::WithHost;
use self::bus::Bus;
use self::cpu::WithCpu;
use self::mem::WithMem;
use self::trace::WithTracers;

/// Blanket trait for anything the executors can drive: the real [`vm::Vm`],
/// or a reduced harness in tests.
pub trait Machine: WithCpu + WithMem + Bus + WithTracers + WithHost {}

impl<T: WithCpu + WithMem + Bus + WithTracers + WithHost> Machine for T {}

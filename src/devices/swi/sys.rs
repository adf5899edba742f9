//! Memory, system-information, error-cell, and debug services.

use super::super::cpu::structs::reg_name;
use super::super::cpu::{reg_get, reg_set, Flow};
use super::super::fault::{Fault, FaultKind};
use super::super::Machine;
use super::ERR;

//region Heap

/// ALLOCATE: R0 = size; R0 comes back as the block address, or 0.
pub fn allocate<T: Machine>(mb: &mut T) -> Result<Flow, Fault> {
    let size = reg_get(mb, 0);
    let addr = mb.mem_mut().heap_alloc(size).unwrap_or(0);
    reg_set(mb, 0, addr);
    Ok(Flow::Advance)
}

/// FREE: R0 = address; 0 on success, -1 for an address that is not live.
pub fn free<T: Machine>(mb: &mut T) -> Result<Flow, Fault> {
    let addr = reg_get(mb, 0);
    let ok = mb.mem_mut().heap_free(addr);
    if !ok {
        log::warn!("FREE: {:#010X} is not a live allocation", addr);
    }
    reg_set(mb, 0, if ok { 0 } else { ERR });
    Ok(Flow::Advance)
}

/// REALLOCATE: R0 = address (0 allocates fresh), R1 = new size. New address
/// in R0, or 0 with the old block left intact.
pub fn reallocate<T: Machine>(mb: &mut T) -> Result<Flow, Fault> {
    let addr = reg_get(mb, 0);
    let new_size = reg_get(mb, 1);
    let moved = mb.mem_mut().heap_realloc(addr, new_size)?.unwrap_or(0);
    reg_set(mb, 0, moved);
    Ok(Flow::Advance)
}

//endregion

//region System information

/// GET_TIME: milliseconds since the epoch, low 32 bits.
pub fn get_time<T: Machine>(mb: &mut T) -> Result<Flow, Fault> {
    let ms = mb.host_mut().now_ms() as u32;
    reg_set(mb, 0, ms);
    Ok(Flow::Advance)
}

/// GET_RANDOM: 32 random bits in R0.
pub fn get_random<T: Machine>(mb: &mut T) -> Result<Flow, Fault> {
    let value = mb.host_mut().random();
    reg_set(mb, 0, value);
    Ok(Flow::Advance)
}

/// GET_ARGUMENTS: argc in R0; R1 = 0 since the vector is not materialized
/// into guest memory.
pub fn get_arguments<T: Machine>(mb: &mut T) -> Result<Flow, Fault> {
    let argc = mb.host().args().len() as u32;
    reg_set(mb, 0, argc);
    reg_set(mb, 1, 0);
    Ok(Flow::Advance)
}

/// GET_ENVIRONMENT: entry count in R0; R1 = 0, same as GET_ARGUMENTS.
pub fn get_environment<T: Machine>(mb: &mut T) -> Result<Flow, Fault> {
    let count = mb.host().env().len() as u32;
    reg_set(mb, 0, count);
    reg_set(mb, 1, 0);
    Ok(Flow::Advance)
}

//endregion

//region Error cell

pub fn get_error<T: Machine>(mb: &mut T) -> Result<Flow, Fault> {
    let code = mb.host().last_error;
    reg_set(mb, 0, code);
    Ok(Flow::Advance)
}

pub fn set_error<T: Machine>(mb: &mut T) -> Result<Flow, Fault> {
    let code = reg_get(mb, 0);
    let host = mb.host_mut();
    host.last_error = code;
    host.last_error_text = None;
    Ok(Flow::Advance)
}

pub fn print_error<T: Machine>(mb: &mut T) -> Result<Flow, Fault> {
    let host = mb.host_mut();
    let line = match &host.last_error_text {
        Some(text) => format!("error {:#010X}: {}\n", host.last_error, text),
        None => format!("error {:#010X}\n", host.last_error),
    };
    let _ = host.write_err(line.as_bytes());
    Ok(Flow::Advance)
}

//endregion

//region Debug

/// DEBUG_PRINT: NUL-terminated string at R0, to the host stderr sink.
pub fn debug_print<T: Machine>(mb: &mut T) -> Result<Flow, Fault> {
    let addr = reg_get(mb, 0);
    let bytes = mb.mem().read_cstring(addr)?;
    let _ = mb.host_mut().write_err(&bytes);
    Ok(Flow::Advance)
}

/// BREAKPOINT: park the VM; resuming continues after this instruction.
pub fn breakpoint<T: Machine>(_mb: &mut T) -> Result<Flow, Fault> {
    Ok(Flow::Break)
}

/// DUMP_REGISTERS: the whole register file plus flags, to stderr.
pub fn dump_registers<T: Machine>(mb: &mut T) -> Result<Flow, Fault> {
    let cpu = *mb.cpu();
    let mut out = String::new();
    for (i, value) in cpu.regs.iter().enumerate() {
        out.push_str(&format!("{:>3} = {:#010X}\n", reg_name(i as u32), value));
    }
    out.push_str(&format!(" PC = {:#010X}\n", cpu.pc));
    out.push_str(&format!("CPSR = {}  cycles = {}\n", cpu.cpsr, cpu.cycles));
    let _ = mb.host_mut().write_err(out.as_bytes());
    Ok(Flow::Advance)
}

/// DUMP_MEMORY: R0 = address, R1 = length, capped at 1 KiB. An unreadable
/// range is an expected failure, not a fault.
pub fn dump_memory<T: Machine>(mb: &mut T) -> Result<Flow, Fault> {
    let addr = reg_get(mb, 0);
    let len = reg_get(mb, 1).min(1024);
    let bytes = match mb.mem().read_bytes(addr, len) {
        Ok(bytes) => bytes,
        Err(fault) => {
            log::warn!("DUMP_MEMORY: {}", fault);
            reg_set(mb, 0, ERR);
            return Ok(Flow::Advance);
        }
    };
    let mut out = String::new();
    for (i, chunk) in bytes.chunks(16).enumerate() {
        out.push_str(&format!("{:08X} ", addr as usize + i * 16));
        for byte in chunk {
            out.push_str(&format!(" {:02X}", byte));
        }
        out.push('\n');
    }
    let _ = mb.host_mut().write_err(out.as_bytes());
    Ok(Flow::Advance)
}

/// ASSERT: R0 = condition; zero halts the VM with the message at R1.
pub fn assert<T: Machine>(mb: &mut T) -> Result<Flow, Fault> {
    if reg_get(mb, 0) != 0 {
        return Ok(Flow::Advance);
    }
    let msg_addr = reg_get(mb, 1);
    let message = if msg_addr == 0 {
        String::from("assertion failed")
    } else {
        let bytes = mb.mem().read_cstring(msg_addr)?;
        String::from_utf8_lossy(&bytes).into_owned()
    };
    Err(Fault::new(FaultKind::Assertion, message))
}

//endregion

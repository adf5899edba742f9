//! Software-interrupt dispatch.
//!
//! The bottom 24 bits of the SWI word name a host service. Flags are
//! snapshotted before the handler runs and restored afterwards: a service
//! may touch registers and memory, never the CPSR.

pub mod console;
pub mod file;
pub mod sys;

use super::cpu::{reg_set, Flow};
use super::fault::Fault;
use super::Machine;

//region Service numbers

pub const EXIT: u32 = 0x00;
pub const WRITE_CHAR: u32 = 0x01;
pub const WRITE_STRING: u32 = 0x02;
pub const WRITE_INT: u32 = 0x03;
pub const READ_CHAR: u32 = 0x04;
pub const READ_STRING: u32 = 0x05;
pub const READ_INT: u32 = 0x06;
pub const WRITE_NEWLINE: u32 = 0x07;

pub const FILE_OPEN: u32 = 0x10;
pub const FILE_CLOSE: u32 = 0x11;
pub const FILE_READ: u32 = 0x12;
pub const FILE_WRITE: u32 = 0x13;
pub const FILE_SEEK: u32 = 0x14;
pub const FILE_TELL: u32 = 0x15;
pub const FILE_SIZE: u32 = 0x16;

pub const ALLOCATE: u32 = 0x20;
pub const FREE: u32 = 0x21;
pub const REALLOCATE: u32 = 0x22;

pub const GET_TIME: u32 = 0x30;
pub const GET_RANDOM: u32 = 0x31;
pub const GET_ARGUMENTS: u32 = 0x32;
pub const GET_ENVIRONMENT: u32 = 0x33;

pub const GET_ERROR: u32 = 0x40;
pub const SET_ERROR: u32 = 0x41;
pub const PRINT_ERROR: u32 = 0x42;

pub const DEBUG_PRINT: u32 = 0xF0;
pub const BREAKPOINT: u32 = 0xF1;
pub const DUMP_REGISTERS: u32 = 0xF2;
pub const DUMP_MEMORY: u32 = 0xF3;
pub const ASSERT: u32 = 0xF4;

//endregion

/// Failure code handed back in R0 by the I/O services.
pub const ERR: u32 = 0xFFFF_FFFF;

pub fn dispatch<T: Machine>(mb: &mut T, number: u32) -> Result<Flow, Fault> {
    let saved = mb.cpu().cpsr;
    let result = invoke(mb, number);
    mb.cpu_mut().cpsr = saved;
    result
}

fn invoke<T: Machine>(mb: &mut T, number: u32) -> Result<Flow, Fault> {
    match number {
        EXIT => console::exit(mb),
        WRITE_CHAR => console::write_char(mb),
        WRITE_STRING => console::write_string(mb),
        WRITE_INT => console::write_int(mb),
        READ_CHAR => console::read_char(mb),
        READ_STRING => console::read_string(mb),
        READ_INT => console::read_int(mb),
        WRITE_NEWLINE => console::write_newline(mb),

        FILE_OPEN => file::open(mb),
        FILE_CLOSE => file::close(mb),
        FILE_READ => file::read(mb),
        FILE_WRITE => file::write(mb),
        FILE_SEEK => file::seek(mb),
        FILE_TELL => file::tell(mb),
        FILE_SIZE => file::size(mb),

        ALLOCATE => sys::allocate(mb),
        FREE => sys::free(mb),
        REALLOCATE => sys::reallocate(mb),

        GET_TIME => sys::get_time(mb),
        GET_RANDOM => sys::get_random(mb),
        GET_ARGUMENTS => sys::get_arguments(mb),
        GET_ENVIRONMENT => sys::get_environment(mb),

        GET_ERROR => sys::get_error(mb),
        SET_ERROR => sys::set_error(mb),
        PRINT_ERROR => sys::print_error(mb),

        DEBUG_PRINT => sys::debug_print(mb),
        BREAKPOINT => sys::breakpoint(mb),
        DUMP_REGISTERS => sys::dump_registers(mb),
        DUMP_MEMORY => sys::dump_memory(mb),
        ASSERT => sys::assert(mb),

        _ => {
            log::warn!("SWI {:#04X} is not a known service", number);
            reg_set(mb, 0, ERR);
            Ok(Flow::Advance)
        }
    }
}

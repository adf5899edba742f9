//! Console I/O services (0x00..0x07).

use super::super::cpu::{reg_get, reg_set, Flow};
use super::super::fault::Fault;
use super::super::Machine;
use super::ERR;

/// EXIT: halt cleanly; the low 32 bits of R0 become the exit code.
pub fn exit<T: Machine>(mb: &mut T) -> Result<Flow, Fault> {
    let code = reg_get(mb, 0) as i32;
    Ok(Flow::Halt(code))
}

/// WRITE_CHAR: the low byte of R0.
pub fn write_char<T: Machine>(mb: &mut T) -> Result<Flow, Fault> {
    let byte = reg_get(mb, 0) as u8;
    if mb.host_mut().write_out(&[byte]).is_err() {
        reg_set(mb, 0, ERR);
    }
    Ok(Flow::Advance)
}

/// WRITE_STRING: NUL-terminated string at R0.
pub fn write_string<T: Machine>(mb: &mut T) -> Result<Flow, Fault> {
    let addr = reg_get(mb, 0);
    let bytes = mb.mem().read_cstring(addr)?;
    if mb.host_mut().write_out(&bytes).is_err() {
        reg_set(mb, 0, ERR);
    }
    Ok(Flow::Advance)
}

/// WRITE_INT: R0 in the base named by R1 (2, 8, 10 or 16; anything else
/// falls back to 10). Base 10 prints signed, the power-of-two bases print
/// the raw bit pattern.
pub fn write_int<T: Machine>(mb: &mut T) -> Result<Flow, Fault> {
    let value = reg_get(mb, 0);
    let text = match reg_get(mb, 1) {
        2 => format!("{:b}", value),
        8 => format!("{:o}", value),
        16 => format!("{:x}", value),
        _ => format!("{}", value as i32),
    };
    if mb.host_mut().write_out(text.as_bytes()).is_err() {
        reg_set(mb, 0, ERR);
    }
    Ok(Flow::Advance)
}

/// READ_CHAR: one byte of input in R0; end of input reads as failure.
pub fn read_char<T: Machine>(mb: &mut T) -> Result<Flow, Fault> {
    let value = match mb.host_mut().read_byte() {
        Ok(Some(byte)) => u32::from(byte),
        _ => ERR,
    };
    reg_set(mb, 0, value);
    Ok(Flow::Advance)
}

/// READ_STRING: R0 = buffer, R1 = capacity. One line is read, CR/LF is
/// trimmed, at most `capacity - 1` bytes land in the buffer followed by a
/// NUL, and R0 reports the byte count.
pub fn read_string<T: Machine>(mb: &mut T) -> Result<Flow, Fault> {
    let buf = reg_get(mb, 0);
    let cap = reg_get(mb, 1);
    if cap == 0 {
        reg_set(mb, 0, ERR);
        return Ok(Flow::Advance);
    }
    let line = match mb.host_mut().read_line() {
        Ok(Some(line)) => line,
        _ => {
            reg_set(mb, 0, ERR);
            return Ok(Flow::Advance);
        }
    };
    let mut bytes = line.into_bytes();
    bytes.truncate(cap as usize - 1);
    bytes.push(0);
    mb.mem_mut().write_bytes(buf, &bytes)?;
    reg_set(mb, 0, bytes.len() as u32 - 1);
    Ok(Flow::Advance)
}

/// READ_INT: parse a signed decimal line into R0.
pub fn read_int<T: Machine>(mb: &mut T) -> Result<Flow, Fault> {
    let line = match mb.host_mut().read_line() {
        Ok(Some(line)) => line,
        _ => {
            return fail_parse(mb, "end of input");
        }
    };
    let trimmed = line.trim();
    match parse_int(trimmed) {
        Some(value) => reg_set(mb, 0, value),
        None => return fail_parse(mb, trimmed),
    }
    Ok(Flow::Advance)
}

fn fail_parse<T: Machine>(mb: &mut T, what: &str) -> Result<Flow, Fault> {
    let host = mb.host_mut();
    host.last_error = ERR;
    host.last_error_text = Some(format!("READ_INT: not a number: {:?}", what));
    reg_set(mb, 0, ERR);
    Ok(Flow::Advance)
}

/// Accepts an optional sign and decimal digits. Unsigned values up to
/// 2^32-1 are accepted as raw bit patterns.
fn parse_int(text: &str) -> Option<u32> {
    if text.is_empty() {
        return None;
    }
    match text.parse::<i64>() {
        Ok(v) if (i64::from(i32::MIN)..=u32::MAX as i64).contains(&v) => Some(v as u32),
        _ => None,
    }
}

/// WRITE_NEWLINE.
pub fn write_newline<T: Machine>(mb: &mut T) -> Result<Flow, Fault> {
    if mb.host_mut().write_out(b"\n").is_err() {
        reg_set(mb, 0, ERR);
    }
    Ok(Flow::Advance)
}

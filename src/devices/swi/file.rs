//! File services (0x10..0x16), all routed through the host's sandboxed
//! filesystem. Every failure here is an expected one: R0 comes back as
//! 0xFFFF_FFFF and the guest keeps running.

use super::super::cpu::{reg_get, reg_set, Flow};
use super::super::fault::Fault;
use super::super::Machine;
use super::ERR;
use crate::host::FsError;

fn report<T: Machine>(mb: &mut T, what: &str, err: FsError) {
    match err {
        FsError::Sandbox(reason) => log::warn!("{}: sandbox refused: {}", what, reason),
        FsError::TooManyFiles => log::warn!("{}: descriptor table full", what),
        FsError::BadRequest => log::warn!("{}: bad request", what),
        FsError::Io(err) => log::warn!("{}: {}", what, err),
    }
    reg_set(mb, 0, ERR);
}

/// OPEN: path at R0 (NUL-terminated), mode in R1 (0 read, 1 write, 2
/// append). Returns the descriptor in R0.
pub fn open<T: Machine>(mb: &mut T) -> Result<Flow, Fault> {
    let path_addr = reg_get(mb, 0);
    let mode = reg_get(mb, 1);
    let raw = mb.mem().read_cstring(path_addr)?;
    let raw = String::from_utf8_lossy(&raw).into_owned();
    match mb.host_mut().fs_open(&raw, mode) {
        Ok(fd) => reg_set(mb, 0, fd),
        Err(err) => report(mb, "OPEN", err),
    }
    Ok(Flow::Advance)
}

/// CLOSE: descriptor in R0; 0 on success.
pub fn close<T: Machine>(mb: &mut T) -> Result<Flow, Fault> {
    let fd = reg_get(mb, 0);
    match mb.host_mut().fs_close(fd) {
        Ok(()) => reg_set(mb, 0, 0),
        Err(err) => report(mb, "CLOSE", err),
    }
    Ok(Flow::Advance)
}

/// READ: R0 = fd, R1 = buffer, R2 = length (1 MiB cap). Count in R0.
pub fn read<T: Machine>(mb: &mut T) -> Result<Flow, Fault> {
    let fd = reg_get(mb, 0);
    let buf = reg_get(mb, 1);
    let len = reg_get(mb, 2);
    match mb.host_mut().fs_read(fd, len) {
        Ok(bytes) => {
            mb.mem_mut().write_bytes(buf, &bytes)?;
            reg_set(mb, 0, bytes.len() as u32);
        }
        Err(err) => report(mb, "READ", err),
    }
    Ok(Flow::Advance)
}

/// WRITE: R0 = fd, R1 = buffer, R2 = length (1 MiB cap). Count in R0.
pub fn write<T: Machine>(mb: &mut T) -> Result<Flow, Fault> {
    let fd = reg_get(mb, 0);
    let buf = reg_get(mb, 1);
    let len = reg_get(mb, 2);
    if len > crate::host::MAX_TRANSFER {
        report(mb, "WRITE", FsError::BadRequest);
        return Ok(Flow::Advance);
    }
    let bytes = mb.mem().read_bytes(buf, len)?;
    match mb.host_mut().fs_write(fd, &bytes) {
        Ok(count) => reg_set(mb, 0, count),
        Err(err) => report(mb, "WRITE", err),
    }
    Ok(Flow::Advance)
}

/// SEEK: R0 = fd, R1 = offset (signed), R2 = whence (0 set, 1 cur, 2 end).
/// New position in R0.
pub fn seek<T: Machine>(mb: &mut T) -> Result<Flow, Fault> {
    let fd = reg_get(mb, 0);
    let offset = i64::from(reg_get(mb, 1) as i32);
    let whence = reg_get(mb, 2);
    match mb.host_mut().fs_seek(fd, offset, whence) {
        Ok(pos) => reg_set(mb, 0, pos),
        Err(err) => report(mb, "SEEK", err),
    }
    Ok(Flow::Advance)
}

/// TELL: current position of R0's descriptor, in R0.
pub fn tell<T: Machine>(mb: &mut T) -> Result<Flow, Fault> {
    let fd = reg_get(mb, 0);
    match mb.host_mut().fs_tell(fd) {
        Ok(pos) => reg_set(mb, 0, pos),
        Err(err) => report(mb, "TELL", err),
    }
    Ok(Flow::Advance)
}

/// FILE_SIZE: byte length of R0's descriptor, in R0.
pub fn size<T: Machine>(mb: &mut T) -> Result<Flow, Fault> {
    let fd = reg_get(mb, 0);
    match mb.host_mut().fs_size(fd) {
        Ok(len) => reg_set(mb, 0, len),
        Err(err) => report(mb, "FILE_SIZE", err),
    }
    Ok(Flow::Advance)
}

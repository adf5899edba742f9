//! VM-integrity faults.
//!
//! A fault halts the machine (the VM transitions to its error state); it is
//! distinct from an expected service failure, which only sets an error code
//! in R0 and lets the guest continue.

use std::error::Error;
use std::fmt;

/// The kind tag is part of the ABI; the message text is not.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum FaultKind {
    /// Access to an address outside every segment
    Unmapped,
    /// Misaligned word or halfword access
    Alignment,
    /// Access denied by segment permissions
    Permission,
    /// Instruction word not handled by this profile
    Decode,
    /// Multiply operand restriction violated (Rd == Rm, or R15 used)
    MultiplyConstraint,
    /// LDM/STM with an empty register list
    EmptyRegList,
    /// 32-bit wraparound while forming an address
    AddressWrap,
    /// NUL-terminated string exceeding the 1 MiB cap
    StringTooLong,
    /// The configured cycle limit was reached
    CycleLimit,
    /// Guest assertion failed (SWI 0xF4)
    Assertion,
}

impl FaultKind {
    fn as_str(self) -> &'static str {
        match self {
            FaultKind::Unmapped => "unmapped address",
            FaultKind::Alignment => "alignment violation",
            FaultKind::Permission => "permission violation",
            FaultKind::Decode => "undecodable instruction",
            FaultKind::MultiplyConstraint => "invalid multiply operands",
            FaultKind::EmptyRegList => "empty register list",
            FaultKind::AddressWrap => "address wraparound",
            FaultKind::StringTooLong => "string too long",
            FaultKind::CycleLimit => "cycle limit exceeded",
            FaultKind::Assertion => "assertion failed",
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Fault {
    pub kind: FaultKind,
    pub detail: String,
}

impl Fault {
    pub fn new(kind: FaultKind, detail: impl Into<String>) -> Fault {
        Fault {
            kind,
            detail: detail.into(),
        }
    }

    pub fn unmapped(addr: u32) -> Fault {
        Fault::new(FaultKind::Unmapped, format!("no segment maps {:#010X}", addr))
    }

    pub fn alignment(addr: u32, size: u32) -> Fault {
        Fault::new(
            FaultKind::Alignment,
            format!("{}-byte access at {:#010X}", size, addr),
        )
    }

    pub fn permission(addr: u32, what: &str) -> Fault {
        Fault::new(
            FaultKind::Permission,
            format!("{} denied at {:#010X}", what, addr),
        )
    }

    pub fn decode(word: u32, pc: u32) -> Fault {
        Fault::new(
            FaultKind::Decode,
            format!("word {:#010X} at {:#010X}", word, pc),
        )
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.detail.is_empty() {
            write!(f, "{}", self.kind.as_str())
        } else {
            write!(f, "{}: {}", self.kind.as_str(), self.detail)
        }
    }
}

impl Error for Fault {}

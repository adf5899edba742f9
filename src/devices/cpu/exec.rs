//! Per-class instruction executors.
//!
//! Each executor re-extracts the fields it needs from the raw word, mutates
//! machine state through the register accessors and the bus, and reports how
//! control flow should continue. A fault returns before any partial commit
//! the step loop could observe as half-applied.

use super::super::fault::{Fault, FaultKind};
use super::super::swi;
use super::super::Machine;
use super::decode::Class;
use super::shifter::{add_with_carry, shift_imm, shift_reg, sub_with_carry};
use super::structs::{AluOp, Flow, Psr, ShiftKind};
use super::utils::multiply_cycles;
use super::{reg_get, reg_set};
use crate::{bit, field};

pub fn dispatch<T: Machine>(mb: &mut T, class: Class, word: u32) -> Result<Flow, Fault> {
    match class {
        Class::DataProcessing => data_processing(mb, word),
        Class::Multiply => multiply(mb, word),
        Class::MultiplyLong => multiply_long(mb, word),
        Class::SingleTransfer => single_transfer(mb, word),
        Class::HalfwordTransfer => halfword_transfer(mb, word),
        Class::BlockTransfer => block_transfer(mb, word),
        Class::Branch => branch(mb, word),
        Class::BranchExchange => branch_exchange(mb, word),
        Class::Mrs => mrs(mb, word),
        Class::Msr => msr(mb, word),
        Class::SoftwareInterrupt => swi::dispatch(mb, word & 0x00FF_FFFF),
    }
}

/// Resolve operand 2 of a data-processing (or MSR-immediate) instruction:
/// either an 8-bit immediate rotated right by twice the rotation field, or a
/// register run through the barrel shifter.
fn operand2<T: Machine>(mb: &mut T, word: u32) -> (u32, bool) {
    let carry_in = mb.cpu().cpsr.c;
    if bit!(word, 25) {
        let imm = field!(word, 0, 8);
        let rot = field!(word, 8, 4) * 2;
        let value = imm.rotate_right(rot);
        let carry = if rot == 0 { carry_in } else { value >> 31 != 0 };
        (value, carry)
    } else {
        let value = reg_get(mb, field!(word, 0, 4));
        let kind = ShiftKind::from_bits(field!(word, 5, 2));
        let out = if bit!(word, 4) {
            let amount = reg_get(mb, field!(word, 8, 4)) & 0xFF;
            shift_reg(kind, value, amount, carry_in)
        } else {
            shift_imm(kind, value, field!(word, 7, 5), carry_in)
        };
        (out.value, out.carry)
    }
}

//region Data processing

fn data_processing<T: Machine>(mb: &mut T, word: u32) -> Result<Flow, Fault> {
    let op = AluOp::from_bits(field!(word, 21, 4));
    let s = bit!(word, 20);
    let rn = field!(word, 16, 4);
    let rd = field!(word, 12, 4);

    let (op2, shifter_carry) = operand2(mb, word);
    let carry_in = mb.cpu().cpsr.c;
    // MOV and MVN ignore Rn entirely
    let a = match op {
        AluOp::Mov | AluOp::Mvn => 0,
        _ => reg_get(mb, rn),
    };

    // Logical results carry (result, shifter carry-out); arithmetic results
    // carry the ALU's carry and overflow.
    let (result, carry, overflow, arithmetic) = match op {
        AluOp::And | AluOp::Tst => (a & op2, shifter_carry, false, false),
        AluOp::Eor | AluOp::Teq => (a ^ op2, shifter_carry, false, false),
        AluOp::Orr => (a | op2, shifter_carry, false, false),
        AluOp::Bic => (a & !op2, shifter_carry, false, false),
        AluOp::Mov => (op2, shifter_carry, false, false),
        AluOp::Mvn => (!op2, shifter_carry, false, false),
        AluOp::Sub | AluOp::Cmp => {
            let (r, c, v) = sub_with_carry(a, op2, true);
            (r, c, v, true)
        }
        AluOp::Rsb => {
            let (r, c, v) = sub_with_carry(op2, a, true);
            (r, c, v, true)
        }
        AluOp::Add | AluOp::Cmn => {
            let (r, c, v) = add_with_carry(a, op2, false);
            (r, c, v, true)
        }
        AluOp::Adc => {
            let (r, c, v) = add_with_carry(a, op2, carry_in);
            (r, c, v, true)
        }
        AluOp::Sbc => {
            let (r, c, v) = sub_with_carry(a, op2, carry_in);
            (r, c, v, true)
        }
        AluOp::Rsc => {
            let (r, c, v) = sub_with_carry(op2, a, carry_in);
            (r, c, v, true)
        }
    };

    // The compares set flags with or without S
    if s || op.is_compare() {
        let cpsr = &mut mb.cpu_mut().cpsr;
        cpsr.n = result >> 31 != 0;
        cpsr.z = result == 0;
        cpsr.c = carry;
        if arithmetic {
            cpsr.v = overflow;
        }
    }

    if op.is_compare() {
        return Ok(Flow::Advance);
    }
    if rd == 15 {
        // Branch via ALU result; clear the Thumb bit like BX would
        reg_set(mb, 15, result & !1);
        return Ok(Flow::Jump);
    }
    reg_set(mb, rd, result);
    Ok(Flow::Advance)
}

//endregion

//region Multiply

fn multiply<T: Machine>(mb: &mut T, word: u32) -> Result<Flow, Fault> {
    let accumulate = bit!(word, 21);
    let s = bit!(word, 20);
    let rd = field!(word, 16, 4);
    let rn = field!(word, 12, 4);
    let rs = field!(word, 8, 4);
    let rm = field!(word, 0, 4);

    if rd == rm {
        return Err(Fault::new(
            FaultKind::MultiplyConstraint,
            format!("MUL destination R{} equals operand Rm", rd),
        ));
    }
    if rd == 15 || rm == 15 || rs == 15 || (accumulate && rn == 15) {
        return Err(Fault::new(
            FaultKind::MultiplyConstraint,
            "R15 is not a valid multiply operand",
        ));
    }

    let m = reg_get(mb, rm);
    let multiplier = reg_get(mb, rs);
    let mut result = m.wrapping_mul(multiplier);
    if accumulate {
        result = result.wrapping_add(reg_get(mb, rn));
    }
    reg_set(mb, rd, result);

    if s {
        // N and Z only; C is left unchanged for determinism, V preserved
        let cpsr = &mut mb.cpu_mut().cpsr;
        cpsr.n = result >> 31 != 0;
        cpsr.z = result == 0;
    }

    // The step loop charges 1 cycle for every instruction
    mb.cpu_mut().cycles += multiply_cycles(multiplier) - 1;
    Ok(Flow::Advance)
}

fn multiply_long<T: Machine>(mb: &mut T, word: u32) -> Result<Flow, Fault> {
    let signed = bit!(word, 22);
    let accumulate = bit!(word, 21);
    let s = bit!(word, 20);
    let rd_hi = field!(word, 16, 4);
    let rd_lo = field!(word, 12, 4);
    let rs = field!(word, 8, 4);
    let rm = field!(word, 0, 4);

    if rd_hi == rd_lo || rd_hi == rm || rd_lo == rm {
        return Err(Fault::new(
            FaultKind::MultiplyConstraint,
            "long multiply needs RdHi, RdLo and Rm pairwise distinct",
        ));
    }
    if rd_hi == 15 || rd_lo == 15 || rs == 15 || rm == 15 {
        return Err(Fault::new(
            FaultKind::MultiplyConstraint,
            "R15 is not a valid multiply operand",
        ));
    }

    let m = reg_get(mb, rm);
    let r = reg_get(mb, rs);
    let mut product = if signed {
        (i64::from(m as i32) * i64::from(r as i32)) as u64
    } else {
        u64::from(m) * u64::from(r)
    };
    if accumulate {
        let acc = (u64::from(reg_get(mb, rd_hi)) << 32) | u64::from(reg_get(mb, rd_lo));
        product = product.wrapping_add(acc);
    }
    reg_set(mb, rd_lo, product as u32);
    reg_set(mb, rd_hi, (product >> 32) as u32);

    if s {
        let cpsr = &mut mb.cpu_mut().cpsr;
        cpsr.n = product >> 63 != 0;
        cpsr.z = product == 0;
    }

    mb.cpu_mut().cycles += if accumulate { 3 } else { 2 };
    Ok(Flow::Advance)
}

//endregion

//region Single and halfword transfer

/// Form the effective address of a single transfer, refusing to wrap.
fn transfer_address(base: u32, offset: u32, up: bool) -> Result<u32, Fault> {
    let ea = if up {
        base.checked_add(offset)
    } else {
        base.checked_sub(offset)
    };
    ea.ok_or_else(|| {
        Fault::new(
            FaultKind::AddressWrap,
            format!(
                "base {:#010X} {} offset {:#X} leaves the address space",
                base,
                if up { "+" } else { "-" },
                offset
            ),
        )
    })
}

fn writeback<T: Machine>(mb: &mut T, rn: u32, value: u32) -> Result<(), Fault> {
    if rn == 15 {
        return Err(Fault::new(
            FaultKind::Decode,
            "writeback to PC is not allowed",
        ));
    }
    reg_set(mb, rn, value);
    Ok(())
}

fn single_transfer<T: Machine>(mb: &mut T, word: u32) -> Result<Flow, Fault> {
    let register_offset = bit!(word, 25);
    let pre = bit!(word, 24);
    let up = bit!(word, 23);
    let byte = bit!(word, 22);
    let wb = bit!(word, 21);
    let load = bit!(word, 20);
    let rn = field!(word, 16, 4);
    let rd = field!(word, 12, 4);

    let offset = if register_offset {
        let value = reg_get(mb, field!(word, 0, 4));
        let kind = ShiftKind::from_bits(field!(word, 5, 2));
        let carry = mb.cpu().cpsr.c;
        shift_imm(kind, value, field!(word, 7, 5), carry).value
    } else {
        field!(word, 0, 12)
    };

    let base = reg_get(mb, rn);
    let ea = transfer_address(base, offset, up)?;
    let addr = if pre { ea } else { base };

    if load {
        let value = if byte {
            u32::from(mb.load_byte(addr)?)
        } else {
            mb.load_word(addr)?
        };
        // Post-indexing always writes back; the loaded value wins if Rd == Rn
        if !pre || wb {
            writeback(mb, rn, ea)?;
        }
        if rd == 15 {
            reg_set(mb, 15, value & !1);
            return Ok(Flow::Jump);
        }
        reg_set(mb, rd, value);
    } else {
        let value = if rd == 15 {
            mb.cpu().pc.wrapping_add(12)
        } else {
            reg_get(mb, rd)
        };
        if byte {
            mb.store_byte(addr, value as u8)?;
        } else {
            mb.store_word(addr, value)?;
        }
        if !pre || wb {
            writeback(mb, rn, ea)?;
        }
    }
    Ok(Flow::Advance)
}

fn halfword_transfer<T: Machine>(mb: &mut T, word: u32) -> Result<Flow, Fault> {
    let pre = bit!(word, 24);
    let up = bit!(word, 23);
    let immediate = bit!(word, 22);
    let wb = bit!(word, 21);
    let load = bit!(word, 20);
    let rn = field!(word, 16, 4);
    let rd = field!(word, 12, 4);

    let offset = if immediate {
        (field!(word, 8, 4) << 4) | field!(word, 0, 4)
    } else {
        reg_get(mb, field!(word, 0, 4))
    };

    let base = reg_get(mb, rn);
    let ea = transfer_address(base, offset, up)?;
    let addr = if pre { ea } else { base };

    if load {
        let value = u32::from(mb.load_half(addr)?);
        if !pre || wb {
            writeback(mb, rn, ea)?;
        }
        if rd == 15 {
            reg_set(mb, 15, value & !1);
            return Ok(Flow::Jump);
        }
        reg_set(mb, rd, value);
    } else {
        let value = if rd == 15 {
            mb.cpu().pc.wrapping_add(12)
        } else {
            reg_get(mb, rd)
        };
        mb.store_half(addr, value as u16)?;
        if !pre || wb {
            writeback(mb, rn, ea)?;
        }
    }
    Ok(Flow::Advance)
}

//endregion

//region Block transfer

fn block_transfer<T: Machine>(mb: &mut T, word: u32) -> Result<Flow, Fault> {
    let pre = bit!(word, 24);
    let up = bit!(word, 23);
    let psr = bit!(word, 22);
    let wb = bit!(word, 21);
    let load = bit!(word, 20);
    let rn = field!(word, 16, 4);
    let list = field!(word, 0, 16);

    if list == 0 {
        return Err(Fault::new(
            FaultKind::EmptyRegList,
            "LDM/STM with no registers",
        ));
    }

    let count = list.count_ones();
    let base = reg_get(mb, rn);
    let span = count * 4;
    // Transfer order is always lowest register to lowest address
    let (start, new_base) = match (pre, up) {
        (false, true) => (base, base.wrapping_add(span)), // IA
        (true, true) => (base.wrapping_add(4), base.wrapping_add(span)), // IB
        (false, false) => (
            base.wrapping_sub(span).wrapping_add(4),
            base.wrapping_sub(span),
        ), // DA
        (true, false) => (base.wrapping_sub(span), base.wrapping_sub(span)), // DB
    };

    let mut addr = start;
    let mut flow = Flow::Advance;
    for r in 0..16u32 {
        if list & (1 << r) == 0 {
            continue;
        }
        if load {
            let value = mb.load_word(addr)?;
            if r == 15 {
                reg_set(mb, 15, value & !1);
                if psr {
                    // Exception return: CPSR comes back from SPSR
                    let spsr = mb.cpu().spsr;
                    mb.cpu_mut().cpsr = Psr::from_bits(spsr);
                }
                flow = Flow::Jump;
            } else {
                reg_set(mb, r, value);
            }
        } else {
            let value = if r == 15 {
                mb.cpu().pc.wrapping_add(12)
            } else {
                reg_get(mb, r)
            };
            mb.store_word(addr, value)?;
        }
        addr = addr.wrapping_add(4);
    }

    if wb && rn != 15 {
        reg_set(mb, rn, new_base);
    }
    Ok(flow)
}

//endregion

//region Branches and PSR transfer

fn branch<T: Machine>(mb: &mut T, word: u32) -> Result<Flow, Fault> {
    let link = bit!(word, 24);
    // 24-bit signed offset, shifted left by two
    let offset = (((word & 0x00FF_FFFF) << 8) as i32) >> 6;
    let pc = mb.cpu().pc;
    if link {
        reg_set(mb, 14, pc.wrapping_add(4));
    }
    let target = pc.wrapping_add(8).wrapping_add(offset as u32);
    reg_set(mb, 15, target);
    Ok(Flow::Jump)
}

fn branch_exchange<T: Machine>(mb: &mut T, word: u32) -> Result<Flow, Fault> {
    let link = bit!(word, 5);
    let target = reg_get(mb, field!(word, 0, 4)) & !1;
    if link {
        let pc = mb.cpu().pc;
        reg_set(mb, 14, pc.wrapping_add(4));
    }
    reg_set(mb, 15, target);
    Ok(Flow::Jump)
}

fn mrs<T: Machine>(mb: &mut T, word: u32) -> Result<Flow, Fault> {
    let rd = field!(word, 12, 4);
    if rd == 15 {
        return Err(Fault::new(
            FaultKind::Decode,
            "MRS destination cannot be PC",
        ));
    }
    let value = if bit!(word, 22) {
        mb.cpu().spsr
    } else {
        mb.cpu().cpsr.to_bits()
    };
    reg_set(mb, rd, value);
    Ok(Flow::Advance)
}

fn msr<T: Machine>(mb: &mut T, word: u32) -> Result<Flow, Fault> {
    let value = if bit!(word, 25) {
        let imm = field!(word, 0, 8);
        imm.rotate_right(field!(word, 8, 4) * 2)
    } else {
        reg_get(mb, field!(word, 0, 4))
    };
    // Only the flag nibble of the target is writable in this profile
    if bit!(word, 22) {
        let cpu = mb.cpu_mut();
        cpu.spsr = (cpu.spsr & 0x0FFF_FFFF) | (value & 0xF000_0000);
    } else {
        mb.cpu_mut().cpsr = Psr::from_bits(value);
    }
    Ok(Flow::Advance)
}

//endregion

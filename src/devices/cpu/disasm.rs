//! One-line disassembly for the trace hooks and `debug_step`.
//!
//! The output is meant for trace logs, not for reassembly: block-transfer
//! register lists are spelled out individually and addressing modes use the
//! plain IA/IB/DA/DB suffixes rather than the stack aliases.

use super::decode::{classify, Class};
use super::structs::{reg_name, AluOp, Condition, ShiftKind};
use crate::{bit, field};

pub fn disasm(word: u32, pc: u32) -> String {
    match classify(word) {
        Some(Class::DataProcessing) => data_processing(word),
        Some(Class::Multiply) => multiply(word),
        Some(Class::MultiplyLong) => multiply_long(word),
        Some(Class::SingleTransfer) => single_transfer(word),
        Some(Class::HalfwordTransfer) => halfword_transfer(word),
        Some(Class::BlockTransfer) => block_transfer(word),
        Some(Class::Branch) => branch(word, pc),
        Some(Class::BranchExchange) => branch_exchange(word),
        Some(Class::Mrs) => mrs(word),
        Some(Class::Msr) => msr(word),
        Some(Class::SoftwareInterrupt) => {
            format!("SWI{} {:#04X}", cond(word), word & 0x00FF_FFFF)
        }
        None => format!("DCD {:#010X}", word),
    }
}

fn cond(word: u32) -> &'static str {
    Condition::from_word(word).suffix()
}

/// Render the register form of operand 2, shift suffix included.
fn shifted_register(word: u32) -> String {
    let rm = reg_name(field!(word, 0, 4));
    let kind = ShiftKind::from_bits(field!(word, 5, 2));
    if bit!(word, 4) {
        return format!("{}, {} {}", rm, kind, reg_name(field!(word, 8, 4)));
    }
    let amount = field!(word, 7, 5);
    match (kind, amount) {
        (ShiftKind::Lsl, 0) => rm.to_string(),
        (ShiftKind::Ror, 0) => format!("{}, RRX", rm),
        (ShiftKind::Lsr, 0) | (ShiftKind::Asr, 0) => format!("{}, {} #32", rm, kind),
        _ => format!("{}, {} #{}", rm, kind, amount),
    }
}

fn operand2(word: u32) -> String {
    if bit!(word, 25) {
        let imm = field!(word, 0, 8).rotate_right(field!(word, 8, 4) * 2);
        format!("#{}", imm)
    } else {
        shifted_register(word)
    }
}

fn data_processing(word: u32) -> String {
    let op = AluOp::from_bits(field!(word, 21, 4));
    let s = bit!(word, 20);
    let rn = reg_name(field!(word, 16, 4));
    let rd = reg_name(field!(word, 12, 4));
    let op2 = operand2(word);
    match op {
        AluOp::Mov | AluOp::Mvn => {
            let s = if s { "S" } else { "" };
            format!("{}{}{} {}, {}", op, cond(word), s, rd, op2)
        }
        AluOp::Tst | AluOp::Teq | AluOp::Cmp | AluOp::Cmn => {
            format!("{}{} {}, {}", op, cond(word), rn, op2)
        }
        _ => {
            let s = if s { "S" } else { "" };
            format!("{}{}{} {}, {}, {}", op, cond(word), s, rd, rn, op2)
        }
    }
}

fn multiply(word: u32) -> String {
    let s = if bit!(word, 20) { "S" } else { "" };
    let rd = reg_name(field!(word, 16, 4));
    let rm = reg_name(field!(word, 0, 4));
    let rs = reg_name(field!(word, 8, 4));
    if bit!(word, 21) {
        let rn = reg_name(field!(word, 12, 4));
        format!("MLA{}{} {}, {}, {}, {}", cond(word), s, rd, rm, rs, rn)
    } else {
        format!("MUL{}{} {}, {}, {}", cond(word), s, rd, rm, rs)
    }
}

fn multiply_long(word: u32) -> String {
    let mnemonic = match (bit!(word, 22), bit!(word, 21)) {
        (false, false) => "UMULL",
        (false, true) => "UMLAL",
        (true, false) => "SMULL",
        (true, true) => "SMLAL",
    };
    let s = if bit!(word, 20) { "S" } else { "" };
    format!(
        "{}{}{} {}, {}, {}, {}",
        mnemonic,
        cond(word),
        s,
        reg_name(field!(word, 12, 4)),
        reg_name(field!(word, 16, 4)),
        reg_name(field!(word, 0, 4)),
        reg_name(field!(word, 8, 4)),
    )
}

fn address_operand(word: u32, offset: String) -> String {
    let rn = reg_name(field!(word, 16, 4));
    let pre = bit!(word, 24);
    let wb = if bit!(word, 21) { "!" } else { "" };
    if offset.is_empty() {
        return format!("[{}]", rn);
    }
    if pre {
        format!("[{}, {}]{}", rn, offset, wb)
    } else {
        format!("[{}], {}", rn, offset)
    }
}

fn single_transfer(word: u32) -> String {
    let load = bit!(word, 20);
    let byte = if bit!(word, 22) { "B" } else { "" };
    let mnemonic = if load { "LDR" } else { "STR" };
    let rd = reg_name(field!(word, 12, 4));
    let sign = if bit!(word, 23) { "" } else { "-" };
    let offset = if bit!(word, 25) {
        format!("{}{}", sign, shifted_register(word))
    } else {
        let imm = field!(word, 0, 12);
        if imm == 0 {
            String::new()
        } else {
            format!("#{}{}", sign, imm)
        }
    };
    format!(
        "{}{}{} {}, {}",
        mnemonic,
        cond(word),
        byte,
        rd,
        address_operand(word, offset)
    )
}

fn halfword_transfer(word: u32) -> String {
    let mnemonic = if bit!(word, 20) { "LDRH" } else { "STRH" };
    let rd = reg_name(field!(word, 12, 4));
    let sign = if bit!(word, 23) { "" } else { "-" };
    let offset = if bit!(word, 22) {
        let imm = (field!(word, 8, 4) << 4) | field!(word, 0, 4);
        if imm == 0 {
            String::new()
        } else {
            format!("#{}{}", sign, imm)
        }
    } else {
        format!("{}{}", sign, reg_name(field!(word, 0, 4)))
    };
    format!(
        "{}{} {}, {}",
        mnemonic,
        cond(word),
        rd,
        address_operand(word, offset)
    )
}

fn block_transfer(word: u32) -> String {
    let mnemonic = if bit!(word, 20) { "LDM" } else { "STM" };
    let mode = match (bit!(word, 24), bit!(word, 23)) {
        (false, true) => "IA",
        (true, true) => "IB",
        (false, false) => "DA",
        (true, false) => "DB",
    };
    let rn = reg_name(field!(word, 16, 4));
    let wb = if bit!(word, 21) { "!" } else { "" };
    let hat = if bit!(word, 22) { "^" } else { "" };
    let list = field!(word, 0, 16);
    let regs: Vec<&str> = (0..16u32)
        .filter(|r| list & (1 << r) != 0)
        .map(reg_name)
        .collect();
    format!(
        "{}{}{} {}{}, {{{}}}{}",
        mnemonic,
        cond(word),
        mode,
        rn,
        wb,
        regs.join(", "),
        hat
    )
}

fn branch(word: u32, pc: u32) -> String {
    let link = if bit!(word, 24) { "L" } else { "" };
    let offset = (((word & 0x00FF_FFFF) << 8) as i32) >> 6;
    let target = pc.wrapping_add(8).wrapping_add(offset as u32);
    format!("B{}{} {:#010X}", link, cond(word), target)
}

fn branch_exchange(word: u32) -> String {
    let link = if bit!(word, 5) { "L" } else { "" };
    format!("B{}X{} {}", link, cond(word), reg_name(field!(word, 0, 4)))
}

fn mrs(word: u32) -> String {
    let src = if bit!(word, 22) { "SPSR" } else { "CPSR" };
    format!("MRS{} {}, {}", cond(word), reg_name(field!(word, 12, 4)), src)
}

fn msr(word: u32) -> String {
    let dst = if bit!(word, 22) { "SPSR" } else { "CPSR" };
    let src = if bit!(word, 25) {
        let imm = field!(word, 0, 8).rotate_right(field!(word, 8, 4) * 2);
        format!("#{:#X}", imm)
    } else {
        reg_name(field!(word, 0, 4)).to_string()
    };
    format!("MSR{} {}_flg, {}", cond(word), dst, src)
}

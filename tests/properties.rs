//! Randomized invariant tests over the CPU, shifter, and allocator, driven
//! by a deterministic xorshift generator so failures reproduce.

mod util;

use armature::devices::cpu::shifter::{add_with_carry, shift_imm, shift_reg, sub_with_carry};
use armature::devices::cpu::structs::{Psr, ShiftKind};
use armature::devices::cpu::WithCpu;
use armature::devices::mem::Memory;
use armature::devices::vm::VmState;
use util::asm::*;
use util::{capture_vm, image};

struct Rng(u32);

impl Rng {
    fn new(seed: u32) -> Rng {
        Rng(if seed == 0 { 0xDEAD_BEEF } else { seed })
    }

    fn next(&mut self) -> u32 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.0 = x;
        x
    }

    fn below(&mut self, n: u32) -> u32 {
        self.next() % n
    }
}

/// Condition predicate spelled out independently of the implementation.
fn predicate(cond: u32, f: Psr) -> bool {
    match cond {
        0x0 => f.z,
        0x1 => !f.z,
        0x2 => f.c,
        0x3 => !f.c,
        0x4 => f.n,
        0x5 => !f.n,
        0x6 => f.v,
        0x7 => !f.v,
        0x8 => f.c && !f.z,
        0x9 => !f.c || f.z,
        0xA => f.n == f.v,
        0xB => f.n != f.v,
        0xC => !f.z && f.n == f.v,
        0xD => f.z || f.n != f.v,
        0xE => true,
        _ => false,
    }
}

fn random_flags(rng: &mut Rng) -> Psr {
    Psr {
        n: rng.below(2) == 1,
        z: rng.below(2) == 1,
        c: rng.below(2) == 1,
        v: rng.below(2) == 1,
    }
}

#[test]
fn predicated_false_instructions_change_nothing_but_pc() {
    let mut rng = Rng::new(1);
    for cond in 0..16u32 {
        for _ in 0..8 {
            let flags = random_flags(&mut rng);
            // condition field grafted onto MOV R1, #1
            let word = (cond << 28) | (mov_imm(1, 1) & 0x0FFF_FFFF);
            let (mut vm, _out, _err) = capture_vm(&image(&[word, swi(0)]), b"");
            vm.cpu_mut().cpsr = flags;
            vm.step().unwrap();
            let cpu = vm.cpu();
            assert_eq!(cpu.pc, 0x8004, "PC advances by exactly 4");
            assert_eq!(cpu.cycles, 1);
            assert_eq!(cpu.cpsr, flags, "flags stay put");
            let executed = predicate(cond, flags);
            assert_eq!(
                cpu.regs[1],
                u32::from(executed),
                "cond {:X} with flags {} must {}",
                cond,
                flags,
                if executed { "execute" } else { "skip" }
            );
        }
    }
}

#[test]
fn add_flag_rules() {
    let mut rng = Rng::new(2);
    for _ in 0..200 {
        let a = rng.next();
        let b = rng.next();
        let (mut vm, _out, _err) = capture_vm(&image(&[adds_reg(2, 0, 1), swi(0)]), b"");
        vm.cpu_mut().regs[0] = a;
        vm.cpu_mut().regs[1] = b;
        vm.step().unwrap();
        let cpu = vm.cpu();
        let expected = a.wrapping_add(b);
        assert_eq!(cpu.regs[2], expected);
        assert_eq!(
            cpu.cpsr.c,
            u64::from(a) + u64::from(b) > u64::from(u32::MAX),
            "C is the unsigned carry-out of {:#X} + {:#X}",
            a,
            b
        );
        assert_eq!(cpu.cpsr.v, ((a ^ expected) & (b ^ expected)) >> 31 != 0);
        assert_eq!(cpu.cpsr.n, expected >> 31 != 0);
        assert_eq!(cpu.cpsr.z, expected == 0);
    }
}

#[test]
fn sub_flag_rules() {
    let mut rng = Rng::new(3);
    for _ in 0..200 {
        let a = rng.next();
        let b = rng.next();
        let (mut vm, _out, _err) = capture_vm(&image(&[subs_reg(2, 0, 1), swi(0)]), b"");
        vm.cpu_mut().regs[0] = a;
        vm.cpu_mut().regs[1] = b;
        vm.step().unwrap();
        let cpu = vm.cpu();
        let expected = a.wrapping_sub(b);
        assert_eq!(cpu.regs[2], expected);
        assert_eq!(cpu.cpsr.c, a >= b, "C means no borrow");
        assert_eq!(cpu.cpsr.v, ((a ^ b) & (a ^ expected)) >> 31 != 0);
    }
}

#[test]
fn adc_carries_through_either_sum() {
    // ADC with carry-in must report carry when either partial sum wraps
    let (result, carry, _) = add_with_carry(0xFFFF_FFFF, 0, true);
    assert_eq!(result, 0);
    assert!(carry);
    let (result, carry, _) = add_with_carry(0xFFFF_FFFF, 1, false);
    assert_eq!(result, 0);
    assert!(carry);
    let mut rng = Rng::new(4);
    for _ in 0..200 {
        let a = rng.next();
        let b = rng.next();
        let cin = rng.below(2) == 1;
        let (r, c, _) = add_with_carry(a, b, cin);
        let wide = u64::from(a) + u64::from(b) + u64::from(cin);
        assert_eq!(r, wide as u32);
        assert_eq!(c, wide > u64::from(u32::MAX));
    }
}

#[test]
fn sbc_is_sub_with_inverted_borrow() {
    let mut rng = Rng::new(5);
    for _ in 0..200 {
        let a = rng.next();
        let b = rng.next();
        let cin = rng.below(2) == 1;
        let (r, c, _) = sub_with_carry(a, b, cin);
        let borrow = u32::from(!cin);
        assert_eq!(r, a.wrapping_sub(b).wrapping_sub(borrow));
        assert_eq!(
            c,
            u64::from(a) >= u64::from(b) + u64::from(borrow),
            "no-borrow convention"
        );
    }
}

#[test]
fn shifter_zero_amount_quirks_hold_for_all_inputs() {
    let mut rng = Rng::new(6);
    for _ in 0..500 {
        let x = rng.next();
        let c = rng.below(2) == 1;
        // LSL #0: identity, carry untouched
        assert_eq!(shift_imm(ShiftKind::Lsl, x, 0, c).value, x);
        assert_eq!(shift_imm(ShiftKind::Lsl, x, 0, c).carry, c);
        // LSR #0 is LSR #32
        let out = shift_imm(ShiftKind::Lsr, x, 0, c);
        assert_eq!((out.value, out.carry), (0, x >> 31 != 0));
        // ASR #0 is ASR #32
        let out = shift_imm(ShiftKind::Asr, x, 0, c);
        let sign = x >> 31 != 0;
        assert_eq!(
            (out.value, out.carry),
            (if sign { 0xFFFF_FFFF } else { 0 }, sign)
        );
        // ROR #0 is RRX: same bits as (x >> 1) | (C << 31)
        let out = shift_imm(ShiftKind::Ror, x, 0, c);
        assert_eq!(out.value, (x >> 1) | (u32::from(c) << 31));
        assert_eq!(out.carry, x & 1 != 0);
    }
}

#[test]
fn register_shift_amounts_use_the_low_byte() {
    let mut rng = Rng::new(7);
    for _ in 0..200 {
        let x = rng.next();
        let c = rng.below(2) == 1;
        let amount = rng.below(64);
        for kind in [ShiftKind::Lsl, ShiftKind::Lsr, ShiftKind::Asr, ShiftKind::Ror] {
            // bits above the low 8 of the amount register are ignored
            assert_eq!(
                shift_reg(kind, x, amount, c),
                shift_reg(kind, x, amount + 0x100 * (1 + rng.below(0xFF)), c),
            );
            // amount 0 never disturbs the value or the carry
            assert_eq!(shift_reg(kind, x, 0, c).value, x);
            assert_eq!(shift_reg(kind, x, 0, c).carry, c);
        }
        // LSL/LSR beyond 32 produce zero and shift out nothing
        let big = 33 + rng.below(200);
        assert_eq!(shift_reg(ShiftKind::Lsl, x, big, c).value, 0);
        assert!(!shift_reg(ShiftKind::Lsr, x, big, c).carry);
    }
}

#[test]
fn allocator_addresses_are_disjoint_and_free_is_single_shot() {
    let mut rng = Rng::new(8);
    let mut mem = Memory::new();
    let mut live: Vec<(u32, u32)> = Vec::new();
    for _ in 0..400 {
        if live.is_empty() || rng.below(2) == 0 {
            let size = 1 + rng.below(256);
            if let Some(addr) = mem.heap_alloc(size) {
                assert!((0x3_0000..0x4_0000).contains(&addr), "inside the heap");
                let rounded = (size + 3) & !3;
                for &(a, s) in &live {
                    assert!(
                        addr + rounded <= a || a + s <= addr,
                        "{:#X}+{} overlaps {:#X}+{}",
                        addr,
                        rounded,
                        a,
                        s
                    );
                }
                live.push((addr, rounded));
            }
        } else {
            let idx = rng.below(live.len() as u32) as usize;
            let (addr, _) = live.swap_remove(idx);
            assert!(mem.heap_free(addr), "freeing a live block succeeds");
            assert!(!mem.heap_free(addr), "double free fails");
        }
    }
}

#[test]
fn store_load_round_trip() {
    let mut rng = Rng::new(9);
    for _ in 0..100 {
        let addr = 0x2_0000 + (rng.below(0x4000) & !3);
        let value = rng.next();
        let words = [
            str_imm(1, 0, 0),
            ldr_imm(2, 0, 0),
            strb_imm(1, 0, 5),
            ldrb_imm(3, 0, 5),
            strh_imm(1, 0, 8),
            ldrh_imm(4, 0, 8),
            swi(0),
        ];
        let (mut vm, _out, _err) = capture_vm(&image(&words), b"");
        vm.cpu_mut().regs[0] = addr;
        vm.cpu_mut().regs[1] = value;
        assert_eq!(vm.run().unwrap(), VmState::Halted);
        let cpu = vm.cpu();
        assert_eq!(cpu.regs[2], value, "word round trip at {:#X}", addr);
        assert_eq!(cpu.regs[3], value & 0xFF, "byte round trip");
        assert_eq!(cpu.regs[4], value & 0xFFFF, "halfword round trip");
    }
}

#[test]
fn block_transfer_pairs_are_inverses() {
    let mut rng = Rng::new(10);
    // (store P, store U); the inverse load flips both
    for (pre, up) in [(true, false), (false, true), (true, true), (false, false)] {
        for _ in 0..25 {
            let mut list = rng.next() & 0x01FE; // some subset of R1..R8
            if list == 0 {
                list = 0x2;
            }
            let values: Vec<(u32, u32)> = (1u32..9)
                .filter(|r| list & (1 << r) != 0)
                .map(|r| (r, rng.next()))
                .collect();
            let mut words = vec![block(false, pre, up, true, 13, list)];
            for &(r, _) in &values {
                words.push(mov_imm(r, 0));
            }
            words.push(block(true, !pre, !up, true, 13, list));
            words.push(swi(0));
            let (mut vm, _out, _err) = capture_vm(&image(&words), b"");
            // keep both descending and ascending modes inside the segment
            vm.cpu_mut().regs[13] = 0x4_8000;
            for &(r, v) in &values {
                vm.cpu_mut().regs[r as usize] = v;
            }
            assert_eq!(vm.run().unwrap(), VmState::Halted);
            for &(r, v) in &values {
                assert_eq!(
                    vm.cpu().regs[r as usize],
                    v,
                    "P={} U={} list {:#06X}",
                    pre,
                    up,
                    list
                );
            }
            assert_eq!(vm.cpu().regs[13], 0x4_8000, "SP round trips");
        }
    }
}

#[test]
fn exit_reports_the_code_and_one_cycle() {
    let mut rng = Rng::new(11);
    for _ in 0..50 {
        let code = rng.below(256);
        let (mut vm, _out, _err) = capture_vm(&image(&[mov_imm(0, code), swi(0)]), b"");
        assert_eq!(vm.run().unwrap(), VmState::Halted);
        assert_eq!(vm.exit_code(), code as i32);
        assert_eq!(vm.cpu().cycles, 2, "one cycle for MOV, one for the SWI");
    }
}

//! Per-opcode execution semantics.

use super::{Exception, ExecutionResult, Hart, WriteBack};
use crate::instruction::{CsrOp, FenceOrderCombination, StoreWidth};
use crate::memory::{Memory, MemoryError};
use crate::registers::Specifier;
use crate::xlen::Xlen;
use crate::{Alignment, PrivilegeLevel, RawPrivilegeLevel};
use crate::core::csr::CsrSpecifier;

/// Applies one decoded instruction to the hart's architectural state.
///
/// The run loop has already advanced `pc` past the instruction being
/// executed; `curr_pc` still holds the instruction's own address. Branches
/// and jumps overwrite `pc`, every other opcode leaves it at its post-fetch
/// value. Each handler either returns what it wrote (so the run loop can
/// drive tracing and the tohost stop condition) or an exception descriptor
/// for the trap unit.
#[derive(Debug)]
pub(super) struct Executor<'h, X: Xlen> {
    pub hart: &'h mut Hart<X>,
    /// The instruction bits, used as the trap value for illegal-instruction
    /// exceptions.
    pub raw_instruction: u32,
}

impl<'h, X: Xlen> Executor<'h, X> {
    /// Executes an `addi` instruction.
    ///
    /// > ADDI adds the sign-extended 12-bit immediate to register rs1.
    /// > Arithmetic overflow is ignored and the result is simply the low
    /// > XLEN bits of the result. ADDI rd, rs1, 0 is used to implement the
    /// > MV rd, rs1 assembler pseudoinstruction.
    pub fn addi(&mut self, dest: Specifier, src: Specifier, immediate: i64) -> ExecutionResult<X> {
        self.reg_imm_op(dest, src, immediate, |s, imm| {
            X::from_u64(s.to_u64().wrapping_add_signed(imm))
        })
    }

    /// Executes a `slti` instruction.
    ///
    /// > SLTI (set less than immediate) places the value 1 in register rd if
    /// > register rs1 is less than the sign-extended immediate when both are
    /// > treated as signed numbers, else 0 is written to rd.
    pub fn slti(&mut self, dest: Specifier, src: Specifier, immediate: i64) -> ExecutionResult<X> {
        self.reg_imm_op(dest, src, immediate, |s, imm| {
            X::from_u64((s.to_i64() < imm) as u64)
        })
    }

    /// Executes a `sltiu` instruction.
    ///
    /// > SLTIU is similar but compares the values as unsigned numbers (i.e.,
    /// > the immediate is first sign-extended to XLEN bits then treated as
    /// > an unsigned number). Note, SLTIU rd, rs1, 1 sets rd to 1 if rs1
    /// > equals zero, otherwise sets rd to 0 (assembler pseudoinstruction
    /// > SEQZ rd, rs).
    pub fn sltiu(&mut self, dest: Specifier, src: Specifier, immediate: i64) -> ExecutionResult<X> {
        self.reg_imm_op(dest, src, immediate, |s, imm| {
            X::from_u64((s.to_u64() < X::from_i64(imm).to_u64()) as u64)
        })
    }

    pub fn xori(&mut self, dest: Specifier, src: Specifier, immediate: i64) -> ExecutionResult<X> {
        self.reg_imm_op(dest, src, immediate, |s, imm| {
            X::from_u64(s.to_u64() ^ X::from_i64(imm).to_u64())
        })
    }

    pub fn ori(&mut self, dest: Specifier, src: Specifier, immediate: i64) -> ExecutionResult<X> {
        self.reg_imm_op(dest, src, immediate, |s, imm| {
            X::from_u64(s.to_u64() | X::from_i64(imm).to_u64())
        })
    }

    pub fn andi(&mut self, dest: Specifier, src: Specifier, immediate: i64) -> ExecutionResult<X> {
        self.reg_imm_op(dest, src, immediate, |s, imm| {
            X::from_u64(s.to_u64() & X::from_i64(imm).to_u64())
        })
    }

    /// Executes an `addiw` instruction (RV64 only).
    ///
    /// > ADDIW is an RV64I instruction that adds the sign-extended 12-bit
    /// > immediate to register rs1 and produces the proper sign-extension of
    /// > a 32-bit result in rd.
    pub fn addiw(&mut self, dest: Specifier, src: Specifier, immediate: i64) -> ExecutionResult<X> {
        self.reg_imm_op(dest, src, immediate, |s, imm| {
            X::from_i64((s.to_u64() as u32).wrapping_add(imm as u32) as i32 as i64)
        })
    }

    /// Executes a `slli` instruction. The decoder guarantees the shift
    /// amount is in range for the register width.
    pub fn slli(&mut self, dest: Specifier, src: Specifier, shift_amount: u32) -> ExecutionResult<X> {
        self.reg_shamt_op(dest, src, shift_amount, |s, shamt| {
            X::from_u64(s.to_u64() << shamt)
        })
    }

    /// Executes a `srli` instruction (logical: zeros shift into the upper
    /// bits).
    pub fn srli(&mut self, dest: Specifier, src: Specifier, shift_amount: u32) -> ExecutionResult<X> {
        self.reg_shamt_op(dest, src, shift_amount, |s, shamt| {
            X::from_u64(s.to_u64() >> shamt)
        })
    }

    /// Executes a `srai` instruction (arithmetic: the sign bit is copied
    /// into the vacated upper bits).
    pub fn srai(&mut self, dest: Specifier, src: Specifier, shift_amount: u32) -> ExecutionResult<X> {
        self.reg_shamt_op(dest, src, shift_amount, |s, shamt| {
            X::from_i64(s.to_i64() >> shamt)
        })
    }

    /// Executes a `slliw` instruction (RV64 only): 32-bit shift,
    /// sign-extended result.
    pub fn slliw(&mut self, dest: Specifier, src: Specifier, shift_amount: u32) -> ExecutionResult<X> {
        self.reg_shamt_op(dest, src, shift_amount, |s, shamt| {
            X::from_i64((((s.to_u64() as u32) << shamt) as i32) as i64)
        })
    }

    pub fn srliw(&mut self, dest: Specifier, src: Specifier, shift_amount: u32) -> ExecutionResult<X> {
        self.reg_shamt_op(dest, src, shift_amount, |s, shamt| {
            X::from_i64((((s.to_u64() as u32) >> shamt) as i32) as i64)
        })
    }

    pub fn sraiw(&mut self, dest: Specifier, src: Specifier, shift_amount: u32) -> ExecutionResult<X> {
        self.reg_shamt_op(dest, src, shift_amount, |s, shamt| {
            X::from_i64(((s.to_u64() as u32 as i32) >> shamt) as i64)
        })
    }

    /// Executes a `lui` instruction.
    ///
    /// > LUI (load upper immediate) is used to build 32-bit constants. LUI
    /// > places the U-immediate value in the top 20 bits of the destination
    /// > register rd, filling in the lowest 12 bits with zeros.
    ///
    /// The immediate arrives already shifted and sign-extended (on RV64 the
    /// 32-bit value is sign-extended to 64 bits).
    pub fn lui(&mut self, dest: Specifier, immediate: i64) -> ExecutionResult<X> {
        let registers = self.hart.registers_mut();
        registers.set_x(dest, X::from_i64(immediate));
        Ok(WriteBack::Register {
            specifier: dest,
            value: registers.x(dest),
        })
    }

    /// Executes an `auipc` instruction.
    ///
    /// > AUIPC (add upper immediate to pc) is used to build pc-relative
    /// > addresses. AUIPC forms a 32-bit offset from the 20-bit U-immediate,
    /// > filling in the lowest 12 bits with zeros, adds this offset to the
    /// > address of the AUIPC instruction, then places the result in
    /// > register rd.
    pub fn auipc(&mut self, dest: Specifier, immediate: i64) -> ExecutionResult<X> {
        let value = X::from_u64(self.hart.curr_pc().to_u64().wrapping_add_signed(immediate));
        let registers = self.hart.registers_mut();
        registers.set_x(dest, value);
        Ok(WriteBack::Register {
            specifier: dest,
            value: registers.x(dest),
        })
    }

    pub fn add(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult<X> {
        self.reg_reg_op(dest, src1, src2, |s1, s2| {
            X::from_u64(s1.to_u64().wrapping_add(s2.to_u64()))
        })
    }

    pub fn sub(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult<X> {
        self.reg_reg_op(dest, src1, src2, |s1, s2| {
            X::from_u64(s1.to_u64().wrapping_sub(s2.to_u64()))
        })
    }

    pub fn slt(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult<X> {
        self.reg_reg_op(dest, src1, src2, |s1, s2| {
            X::from_u64((s1.to_i64() < s2.to_i64()) as u64)
        })
    }

    pub fn sltu(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult<X> {
        self.reg_reg_op(dest, src1, src2, |s1, s2| {
            X::from_u64((s1.to_u64() < s2.to_u64()) as u64)
        })
    }

    pub fn and(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult<X> {
        self.reg_reg_op(dest, src1, src2, |s1, s2| {
            X::from_u64(s1.to_u64() & s2.to_u64())
        })
    }

    pub fn or(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult<X> {
        self.reg_reg_op(dest, src1, src2, |s1, s2| {
            X::from_u64(s1.to_u64() | s2.to_u64())
        })
    }

    pub fn xor(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult<X> {
        self.reg_reg_op(dest, src1, src2, |s1, s2| {
            X::from_u64(s1.to_u64() ^ s2.to_u64())
        })
    }

    /// Executes a `sll` instruction.
    ///
    /// > SLL, SRL, and SRA perform logical left, logical right, and
    /// > arithmetic right shifts on the value in register rs1 by the shift
    /// > amount held in the lower 5 bits of register rs2 (lower 6 bits on
    /// > RV64).
    pub fn sll(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult<X> {
        self.reg_reg_op(dest, src1, src2, |s1, s2| {
            X::from_u64(s1.to_u64() << (s2.to_u64() & X::shift_mask()))
        })
    }

    pub fn srl(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult<X> {
        self.reg_reg_op(dest, src1, src2, |s1, s2| {
            X::from_u64(s1.to_u64() >> (s2.to_u64() & X::shift_mask()))
        })
    }

    pub fn sra(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult<X> {
        self.reg_reg_op(dest, src1, src2, |s1, s2| {
            X::from_i64(s1.to_i64() >> (s2.to_u64() & X::shift_mask()))
        })
    }

    /// Executes a `mul` instruction.
    ///
    /// > MUL performs an XLEN-bit × XLEN-bit multiplication of rs1 by rs2
    /// > and places the lower XLEN bits in the destination register.
    pub fn mul(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult<X> {
        self.reg_reg_op(dest, src1, src2, |s1, s2| {
            X::from_u64(s1.to_u64().wrapping_mul(s2.to_u64()))
        })
    }

    /// Executes a `mulh` instruction: upper XLEN bits of the
    /// signed × signed product.
    pub fn mulh(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult<X> {
        self.reg_reg_op(dest, src1, src2, |s1, s2| {
            X::from_i64(((s1.to_i64() as i128 * s2.to_i64() as i128) >> X::BITS) as i64)
        })
    }

    /// Executes a `mulhsu` instruction: upper XLEN bits of the
    /// signed(rs1) × unsigned(rs2) product.
    pub fn mulhsu(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult<X> {
        self.reg_reg_op(dest, src1, src2, |s1, s2| {
            X::from_i64(((s1.to_i64() as i128 * s2.to_u64() as i128) >> X::BITS) as i64)
        })
    }

    /// Executes a `mulhu` instruction: upper XLEN bits of the
    /// unsigned × unsigned product.
    pub fn mulhu(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult<X> {
        self.reg_reg_op(dest, src1, src2, |s1, s2| {
            X::from_u64(((s1.to_u64() as u128 * s2.to_u64() as u128) >> X::BITS) as u64)
        })
    }

    /// Executes a `div` instruction.
    ///
    /// > The quotient of division by zero has all bits set. Signed division
    /// > overflow occurs only when the most-negative integer is divided by
    /// > −1; the quotient then equals the dividend. Division never raises
    /// > an exception.
    pub fn div(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult<X> {
        self.reg_reg_op(dest, src1, src2, |s1, s2| {
            let (dividend, divisor) = (s1.to_i64(), s2.to_i64());
            match divisor {
                0 => X::from_i64(-1),
                // wrapping_div returns the dividend in the overflow case.
                _ => X::from_i64(dividend.wrapping_div(divisor)),
            }
        })
    }

    pub fn divu(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult<X> {
        self.reg_reg_op(dest, src1, src2, |s1, s2| match s2.to_u64() {
            0 => X::from_i64(-1),
            divisor => X::from_u64(s1.to_u64() / divisor),
        })
    }

    /// Executes a `rem` instruction.
    ///
    /// > The remainder of division by zero equals the dividend. For signed
    /// > overflow the remainder is zero.
    pub fn rem(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult<X> {
        self.reg_reg_op(dest, src1, src2, |s1, s2| {
            let (dividend, divisor) = (s1.to_i64(), s2.to_i64());
            match divisor {
                0 => X::from_i64(dividend),
                _ => X::from_i64(dividend.wrapping_rem(divisor)),
            }
        })
    }

    pub fn remu(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult<X> {
        self.reg_reg_op(dest, src1, src2, |s1, s2| match s2.to_u64() {
            0 => s1,
            divisor => X::from_u64(s1.to_u64() % divisor),
        })
    }

    // RV64 W-form register-register operations: 32-bit arithmetic with the
    // result sign-extended to 64 bits.

    pub fn addw(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult<X> {
        self.reg_reg_word_op(dest, src1, src2, |s1, s2| s1.wrapping_add(s2) as i32)
    }

    pub fn subw(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult<X> {
        self.reg_reg_word_op(dest, src1, src2, |s1, s2| s1.wrapping_sub(s2) as i32)
    }

    pub fn sllw(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult<X> {
        self.reg_reg_word_op(dest, src1, src2, |s1, s2| (s1 << (s2 & 0x1F)) as i32)
    }

    pub fn srlw(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult<X> {
        self.reg_reg_word_op(dest, src1, src2, |s1, s2| (s1 >> (s2 & 0x1F)) as i32)
    }

    pub fn sraw(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult<X> {
        self.reg_reg_word_op(dest, src1, src2, |s1, s2| (s1 as i32) >> (s2 & 0x1F))
    }

    pub fn mulw(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult<X> {
        self.reg_reg_word_op(dest, src1, src2, |s1, s2| s1.wrapping_mul(s2) as i32)
    }

    pub fn divw(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult<X> {
        self.reg_reg_word_op(dest, src1, src2, |s1, s2| {
            let (dividend, divisor) = (s1 as i32, s2 as i32);
            match divisor {
                0 => -1,
                _ => dividend.wrapping_div(divisor),
            }
        })
    }

    pub fn divuw(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult<X> {
        self.reg_reg_word_op(dest, src1, src2, |s1, s2| match s2 {
            0 => -1,
            divisor => (s1 / divisor) as i32,
        })
    }

    pub fn remw(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult<X> {
        self.reg_reg_word_op(dest, src1, src2, |s1, s2| {
            let (dividend, divisor) = (s1 as i32, s2 as i32);
            match divisor {
                0 => dividend,
                _ => dividend.wrapping_rem(divisor),
            }
        })
    }

    pub fn remuw(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult<X> {
        self.reg_reg_word_op(dest, src1, src2, |s1, s2| match s2 {
            0 => s1 as i32,
            divisor => (s1 % divisor) as i32,
        })
    }

    /// Executes a `jal` instruction.
    ///
    /// The link (address of the next instruction) is written before the pc
    /// is redirected.
    pub fn jal(&mut self, dest: Specifier, offset: i64) -> ExecutionResult<X> {
        let target = X::from_u64(self.hart.curr_pc().to_u64().wrapping_add_signed(offset));
        self.jump_to(dest, target)
    }

    /// Executes a `jalr` instruction.
    ///
    /// > The target address is obtained by adding the sign-extended 12-bit
    /// > I-immediate to the register rs1, then setting the least-significant
    /// > bit of the result to zero.
    ///
    /// The target is computed from rs1 before the link write, so
    /// `rd == rs1` behaves correctly.
    pub fn jalr(&mut self, dest: Specifier, base: Specifier, offset: i64) -> ExecutionResult<X> {
        let registers = self.hart.registers();
        let target = X::from_u64(registers.x(base).to_u64().wrapping_add_signed(offset) & !1);
        self.jump_to(dest, target)
    }

    pub fn beq(&mut self, src1: Specifier, src2: Specifier, offset: i64) -> ExecutionResult<X> {
        self.cond_branch(src1, src2, offset, |s1, s2| s1.to_u64() == s2.to_u64())
    }

    pub fn bne(&mut self, src1: Specifier, src2: Specifier, offset: i64) -> ExecutionResult<X> {
        self.cond_branch(src1, src2, offset, |s1, s2| s1.to_u64() != s2.to_u64())
    }

    pub fn blt(&mut self, src1: Specifier, src2: Specifier, offset: i64) -> ExecutionResult<X> {
        self.cond_branch(src1, src2, offset, |s1, s2| s1.to_i64() < s2.to_i64())
    }

    pub fn bltu(&mut self, src1: Specifier, src2: Specifier, offset: i64) -> ExecutionResult<X> {
        self.cond_branch(src1, src2, offset, |s1, s2| s1.to_u64() < s2.to_u64())
    }

    pub fn bge(&mut self, src1: Specifier, src2: Specifier, offset: i64) -> ExecutionResult<X> {
        self.cond_branch(src1, src2, offset, |s1, s2| s1.to_i64() >= s2.to_i64())
    }

    pub fn bgeu(&mut self, src1: Specifier, src2: Specifier, offset: i64) -> ExecutionResult<X> {
        self.cond_branch(src1, src2, offset, |s1, s2| s1.to_u64() >= s2.to_u64())
    }

    pub fn lb(&mut self, dest: Specifier, base: Specifier, offset: i64) -> ExecutionResult<X> {
        self.load_op(dest, base, offset, Alignment::BYTE, |memory, address| {
            memory.read_u8(address).map(|value| value as i8 as i64 as u64)
        })
    }

    pub fn lbu(&mut self, dest: Specifier, base: Specifier, offset: i64) -> ExecutionResult<X> {
        self.load_op(dest, base, offset, Alignment::BYTE, |memory, address| {
            memory.read_u8(address).map(|value| value as u64)
        })
    }

    pub fn lh(&mut self, dest: Specifier, base: Specifier, offset: i64) -> ExecutionResult<X> {
        self.load_op(dest, base, offset, Alignment::HALFWORD, |memory, address| {
            memory
                .read_u16(address)
                .map(|value| value as i16 as i64 as u64)
        })
    }

    pub fn lhu(&mut self, dest: Specifier, base: Specifier, offset: i64) -> ExecutionResult<X> {
        self.load_op(dest, base, offset, Alignment::HALFWORD, |memory, address| {
            memory.read_u16(address).map(|value| value as u64)
        })
    }

    pub fn lw(&mut self, dest: Specifier, base: Specifier, offset: i64) -> ExecutionResult<X> {
        self.load_op(dest, base, offset, Alignment::WORD, |memory, address| {
            memory
                .read_u32(address)
                .map(|value| value as i32 as i64 as u64)
        })
    }

    pub fn lwu(&mut self, dest: Specifier, base: Specifier, offset: i64) -> ExecutionResult<X> {
        self.load_op(dest, base, offset, Alignment::WORD, |memory, address| {
            memory.read_u32(address).map(|value| value as u64)
        })
    }

    pub fn ld(&mut self, dest: Specifier, base: Specifier, offset: i64) -> ExecutionResult<X> {
        self.load_op(dest, base, offset, Alignment::DOUBLEWORD, |memory, address| {
            memory.read_u64(address)
        })
    }

    pub fn sb(&mut self, src: Specifier, base: Specifier, offset: i64) -> ExecutionResult<X> {
        self.store_op(src, base, offset, StoreWidth::Sb, |memory, address, value| {
            memory.write_u8(address, value as u8)
        })
    }

    pub fn sh(&mut self, src: Specifier, base: Specifier, offset: i64) -> ExecutionResult<X> {
        self.store_op(src, base, offset, StoreWidth::Sh, |memory, address, value| {
            memory.write_u16(address, value as u16)
        })
    }

    pub fn sw(&mut self, src: Specifier, base: Specifier, offset: i64) -> ExecutionResult<X> {
        self.store_op(src, base, offset, StoreWidth::Sw, |memory, address, value| {
            memory.write_u32(address, value as u32)
        })
    }

    pub fn sd(&mut self, src: Specifier, base: Specifier, offset: i64) -> ExecutionResult<X> {
        self.store_op(src, base, offset, StoreWidth::Sd, |memory, address, value| {
            memory.write_u64(address, value)
        })
    }

    /// FENCE orders memory accesses; with a single in-order hart there is
    /// nothing to order, so it retires as a no-op.
    pub fn fence(
        &mut self,
        predecessor: FenceOrderCombination,
        successor: FenceOrderCombination,
    ) -> ExecutionResult<X> {
        let _ = predecessor;
        let _ = successor;
        Ok(WriteBack::None)
    }

    /// FENCE.I synchronizes the instruction stream; instructions are always
    /// fetched from memory (there is no decode cache), so it retires as a
    /// no-op.
    pub fn fence_i(&mut self) -> ExecutionResult<X> {
        Ok(WriteBack::None)
    }

    /// ECALL raises an environment-call exception for the current privilege
    /// mode.
    pub fn ecall(&mut self) -> ExecutionResult<X> {
        Err(match self.hart.privilege_mode() {
            PrivilegeLevel::User => Exception::EnvironmentCallFromUMode,
            PrivilegeLevel::Supervisor => Exception::EnvironmentCallFromSMode,
            PrivilegeLevel::Machine => Exception::EnvironmentCallFromMMode,
        })
    }

    pub fn ebreak(&mut self) -> ExecutionResult<X> {
        Err(Exception::Breakpoint)
    }

    /// Executes an `mret` instruction.
    ///
    /// > When executing an xRET instruction, supposing xPP holds the value
    /// > y, xIE is set to xPIE; the privilege mode is changed to y; xPIE is
    /// > set to 1; and xPP is set to the least-privileged supported mode.
    ///
    /// The pc is restored from mepc. Executing mret below M-mode raises an
    /// illegal-instruction exception.
    pub fn mret(&mut self) -> ExecutionResult<X> {
        if self.hart.privilege_mode() < PrivilegeLevel::Machine {
            return Err(self.illegal());
        }
        let new_pc = X::from_u64(self.hart.trap.read_mepc());
        let previous_privilege = self.hart.status.mpp();
        let previous_interrupt_enable = self.hart.status.mpie();
        self.hart.status.set_mie(previous_interrupt_enable);
        self.hart.status.set_mpie(true);
        self.hart.status.set_mpp(RawPrivilegeLevel::User);
        self.hart.privilege_mode = previous_privilege;
        self.hart.registers_mut().set_pc(new_pc);
        Ok(WriteBack::None)
    }

    /// SRET: no supervisor trap-setup CSRs are implemented (all traps
    /// target M-mode), so the instruction is illegal.
    pub fn sret(&mut self) -> ExecutionResult<X> {
        Err(self.illegal())
    }

    /// URET: user-mode trap handling is not implemented.
    pub fn uret(&mut self) -> ExecutionResult<X> {
        Err(self.illegal())
    }

    /// WFI retires as a no-op: interrupts are sampled at every instruction
    /// boundary, so there is nothing to wait for.
    pub fn wfi(&mut self) -> ExecutionResult<X> {
        Ok(WriteBack::None)
    }

    /// Executes a `csrrw`/`csrrs`/`csrrc` instruction.
    ///
    /// > For both CSRRS and CSRRC, if rs1=x0, then the instruction will not
    /// > write to the CSR at all, and so shall not cause any of the side
    /// > effects that might otherwise occur on a CSR write, such as raising
    /// > illegal instruction exceptions on accesses to read-only CSRs.
    /// > A CSRRW with rs1=x0 will attempt to write zero to the destination
    /// > CSR.
    pub fn csr_reg_op(
        &mut self,
        op: CsrOp,
        dest: Specifier,
        csr: CsrSpecifier,
        src: Specifier,
    ) -> ExecutionResult<X> {
        let src_value = (op == CsrOp::ReadWrite || src != Specifier::X0)
            .then(|| self.hart.registers().x(src));
        self.csr_op(op, dest, csr, src_value)
    }

    /// Executes a `csrrwi`/`csrrsi`/`csrrci` instruction.
    ///
    /// > For CSRRSI and CSRRCI, if the uimm[4:0] field is zero, then these
    /// > instructions will not write to the CSR, and shall not cause any of
    /// > the side effects that might otherwise occur on a CSR write.
    pub fn csr_imm_op(
        &mut self,
        op: CsrOp,
        dest: Specifier,
        csr: CsrSpecifier,
        immediate: u32,
    ) -> ExecutionResult<X> {
        let src_value = (op == CsrOp::ReadWrite || immediate != 0)
            .then_some(X::from_u64(immediate as u64));
        self.csr_op(op, dest, csr, src_value)
    }

    // Private generic implementations

    fn illegal(&self) -> Exception {
        Exception::IllegalInstruction {
            instruction: self.raw_instruction,
        }
    }

    fn reg_imm_op<F>(
        &mut self,
        dest: Specifier,
        src: Specifier,
        immediate: i64,
        op: F,
    ) -> ExecutionResult<X>
    where
        F: FnOnce(X, i64) -> X,
    {
        let registers = self.hart.registers_mut();
        let value = op(registers.x(src), immediate);
        registers.set_x(dest, value);
        Ok(WriteBack::Register {
            specifier: dest,
            value: registers.x(dest),
        })
    }

    fn reg_shamt_op<F>(
        &mut self,
        dest: Specifier,
        src: Specifier,
        shift_amount: u32,
        op: F,
    ) -> ExecutionResult<X>
    where
        F: FnOnce(X, u32) -> X,
    {
        debug_assert!(shift_amount < X::BITS, "decoder must bound shift amounts");
        let registers = self.hart.registers_mut();
        let value = op(registers.x(src), shift_amount);
        registers.set_x(dest, value);
        Ok(WriteBack::Register {
            specifier: dest,
            value: registers.x(dest),
        })
    }

    fn reg_reg_op<F>(
        &mut self,
        dest: Specifier,
        src1: Specifier,
        src2: Specifier,
        op: F,
    ) -> ExecutionResult<X>
    where
        F: FnOnce(X, X) -> X,
    {
        let registers = self.hart.registers_mut();
        let value = op(registers.x(src1), registers.x(src2));
        registers.set_x(dest, value);
        Ok(WriteBack::Register {
            specifier: dest,
            value: registers.x(dest),
        })
    }

    /// W-form helper: operands are the low 32 bits, the 32-bit result is
    /// sign-extended to the register width.
    fn reg_reg_word_op<F>(
        &mut self,
        dest: Specifier,
        src1: Specifier,
        src2: Specifier,
        op: F,
    ) -> ExecutionResult<X>
    where
        F: FnOnce(u32, u32) -> i32,
    {
        self.reg_reg_op(dest, src1, src2, |s1, s2| {
            X::from_i64(op(s1.to_u64() as u32, s2.to_u64() as u32) as i64)
        })
    }

    fn jump_to(&mut self, dest: Specifier, target: X) -> ExecutionResult<X> {
        if !Alignment::HALFWORD.is_aligned(target.to_u64()) {
            return Err(Exception::InstructionAddressMisaligned {
                address: target.to_u64(),
            });
        }
        let registers = self.hart.registers_mut();
        // pc has already been advanced past this instruction, so it holds
        // the link address.
        let link = registers.pc();
        registers.set_x(dest, link);
        registers.set_pc(target);
        Ok(WriteBack::Register {
            specifier: dest,
            value: registers.x(dest),
        })
    }

    // Takes the branch if `predicate` returns `true`.
    fn cond_branch<P>(
        &mut self,
        src1: Specifier,
        src2: Specifier,
        offset: i64,
        predicate: P,
    ) -> ExecutionResult<X>
    where
        P: FnOnce(X, X) -> bool,
    {
        let registers = self.hart.registers();
        if predicate(registers.x(src1), registers.x(src2)) {
            let target = X::from_u64(self.hart.curr_pc().to_u64().wrapping_add_signed(offset));
            if !Alignment::HALFWORD.is_aligned(target.to_u64()) {
                return Err(Exception::InstructionAddressMisaligned {
                    address: target.to_u64(),
                });
            }
            self.hart.registers_mut().set_pc(target);
        }
        Ok(WriteBack::None)
    }

    fn load_op<F>(
        &mut self,
        dest: Specifier,
        base: Specifier,
        offset: i64,
        alignment: Alignment,
        read: F,
    ) -> ExecutionResult<X>
    where
        F: FnOnce(&Memory, u64) -> Result<u64, MemoryError>,
    {
        let registers = self.hart.registers();
        let address = X::from_u64(registers.x(base).to_u64().wrapping_add_signed(offset)).to_u64();
        if !alignment.is_aligned(address) {
            return Err(Exception::LoadAddressMisaligned { address });
        }
        match read(self.hart.memory(), address) {
            Ok(value) => {
                let registers = self.hart.registers_mut();
                registers.set_x(dest, X::from_u64(value));
                Ok(WriteBack::Register {
                    specifier: dest,
                    value: registers.x(dest),
                })
            }
            Err(MemoryError::AccessFault) => Err(Exception::LoadAccessFault { address }),
        }
    }

    fn store_op<F>(
        &mut self,
        src: Specifier,
        base: Specifier,
        offset: i64,
        width: StoreWidth,
        write: F,
    ) -> ExecutionResult<X>
    where
        F: FnOnce(&mut Memory, u64, u64) -> Result<(), MemoryError>,
    {
        let registers = self.hart.registers();
        let value = registers.x(src).to_u64();
        let address = X::from_u64(registers.x(base).to_u64().wrapping_add_signed(offset));
        let address_u64 = address.to_u64();
        let alignment = match width {
            StoreWidth::Sb => Alignment::BYTE,
            StoreWidth::Sh => Alignment::HALFWORD,
            StoreWidth::Sw => Alignment::WORD,
            StoreWidth::Sd => Alignment::DOUBLEWORD,
        };
        if !alignment.is_aligned(address_u64) {
            return Err(Exception::StoreAddressMisaligned { address: address_u64 });
        }
        match write(self.hart.memory_mut(), address_u64, value) {
            Ok(()) => {
                let stored = match width {
                    StoreWidth::Sb => value as u8 as u64,
                    StoreWidth::Sh => value as u16 as u64,
                    StoreWidth::Sw => value as u32 as u64,
                    StoreWidth::Sd => value,
                };
                Ok(WriteBack::Store {
                    address,
                    value: stored,
                    width,
                })
            }
            Err(MemoryError::AccessFault) => Err(Exception::StoreAccessFault { address: address_u64 }),
        }
    }

    /// Shared CSR access sequence. The read is suppressed only for CSRRW
    /// with rd=x0; the write is suppressed when `src_value` is `None`
    /// (CSRRS/CSRRC with rs1=x0 or a zero immediate), in which case a
    /// read-only CSR does not trap. Both halves are performed at the
    /// privilege level the instruction started in.
    fn csr_op(
        &mut self,
        op: CsrOp,
        dest: Specifier,
        csr: CsrSpecifier,
        src_value: Option<X>,
    ) -> ExecutionResult<X> {
        let privilege_level = self.hart.privilege_mode();
        let mut write_back = WriteBack::None;
        if op != CsrOp::ReadWrite || dest != Specifier::X0 {
            let old_value = self
                .hart
                .read_csr(csr, privilege_level)
                .map_err(|_| self.illegal())?;
            let registers = self.hart.registers_mut();
            registers.set_x(dest, old_value);
            write_back = WriteBack::Register {
                specifier: dest,
                value: registers.x(dest),
            };
        }
        if let Some(src_value) = src_value {
            let (value, mask) = match op {
                CsrOp::ReadWrite => (src_value, X::from_i64(-1)),
                CsrOp::ReadSet => (X::from_i64(-1), src_value),
                CsrOp::ReadClear => (X::default(), src_value),
            };
            self.hart
                .write_csr(csr, privilege_level, value, mask)
                .map_err(|_| self.illegal())?;
            write_back = WriteBack::Csr {
                specifier: csr,
                value: self.hart.peek_csr(csr).unwrap_or_default(),
            };
        }
        Ok(write_back)
    }
}

//! Built-in self-test: runs each opcode family against reference outcomes.
//!
//! The test sequences are destructive to the hart's register, CSR, and
//! memory state.

use thiserror::Error;

use crate::core::{csr, Config, Hart, StepResult};
use crate::xlen::Xlen;

#[derive(Error, Debug)]
#[error("self-test case `{case}` failed: {detail}")]
pub struct SelfTestError {
    pub case: &'static str,
    pub detail: String,
}

/// Runs the self-test on a scratch hart of width `X`. Returns the first
/// failing check, if any.
pub fn self_test<X: Xlen>() -> Result<(), SelfTestError> {
    let mut hart: Hart<X> = Hart::new(Config {
        hart_id: 0,
        memory_size: 1 << 16,
        reset_vector: 0,
    });
    alu_immediate(&mut hart)?;
    upper_immediate(&mut hart)?;
    comparisons(&mut hart)?;
    shifts(&mut hart)?;
    jumps_and_branches(&mut hart)?;
    loads_and_stores(&mut hart)?;
    multiply_divide(&mut hart)?;
    csr_access(&mut hart)?;
    compressed(&mut hart)?;
    traps(&mut hart)?;
    Ok(())
}

fn check<X: Xlen>(
    case: &'static str,
    reg: u8,
    actual: &Hart<X>,
    expected: u64,
) -> Result<(), SelfTestError> {
    let value = actual.peek_int_reg(reg).map(Xlen::to_u64);
    if value != Some(expected) {
        return Err(SelfTestError {
            case,
            detail: format!("x{reg} = {value:#x?}, expected {expected:#x}"),
        });
    }
    Ok(())
}

fn load_program<X: Xlen>(hart: &mut Hart<X>, program: &[u32]) {
    hart.reset();
    for (index, word) in program.iter().enumerate() {
        assert!(hart.poke_memory_u32(4 * index as u64, *word));
    }
}

fn run_steps<X: Xlen>(hart: &mut Hart<X>, steps: usize) {
    for _ in 0..steps {
        hart.step();
    }
}

fn alu_immediate<X: Xlen>(hart: &mut Hart<X>) -> Result<(), SelfTestError> {
    let program = [
        enc::addi(1, 0, 5),
        enc::addi(2, 1, 7),
        enc::addi(3, 2, -2),
        enc::xori(4, 1, -1),
        enc::andi(5, 2, 0xF),
        enc::ori(6, 0, 0x55),
    ];
    load_program(hart, &program);
    run_steps(hart, program.len());
    check("addi", 1, hart, 5)?;
    check("addi", 2, hart, 12)?;
    check("addi", 3, hart, 10)?;
    check("xori", 4, hart, X::from_i64(!5).to_u64())?;
    check("andi", 5, hart, 12)?;
    check("ori", 6, hart, 0x55)?;
    Ok(())
}

fn upper_immediate<X: Xlen>(hart: &mut Hart<X>) -> Result<(), SelfTestError> {
    let program = [enc::lui(1, 0x12345), enc::auipc(2, 0x1000)];
    load_program(hart, &program);
    run_steps(hart, program.len());
    check("lui", 1, hart, X::from_i64(0x12345 << 12).to_u64())?;
    // auipc executes at address 4.
    check("auipc", 2, hart, (0x1000 << 12) + 4)?;
    Ok(())
}

fn comparisons<X: Xlen>(hart: &mut Hart<X>) -> Result<(), SelfTestError> {
    let program = [
        enc::addi(1, 0, -1),
        enc::addi(2, 0, 1),
        enc::slt(3, 1, 2),  // -1 < 1 signed
        enc::sltu(4, 1, 2), // all-ones is large unsigned
        enc::sltiu(5, 0, 1), // seqz of x0
        enc::sltiu(6, 2, 1), // seqz of 1
    ];
    load_program(hart, &program);
    run_steps(hart, program.len());
    check("slt", 3, hart, 1)?;
    check("sltu", 4, hart, 0)?;
    check("sltiu", 5, hart, 1)?;
    check("sltiu", 6, hart, 0)?;
    Ok(())
}

fn shifts<X: Xlen>(hart: &mut Hart<X>) -> Result<(), SelfTestError> {
    let program = [
        enc::addi(1, 0, -8),
        enc::srai(2, 1, 2),
        enc::srli(3, 1, 2),
        enc::slli(4, 1, 1),
        enc::addi(5, 0, 1),
        enc::sll(6, 5, 1), // shift amount from register: low bits of -8
    ];
    load_program(hart, &program);
    run_steps(hart, program.len());
    check("srai", 2, hart, X::from_i64(-2).to_u64())?;
    check("srli", 3, hart, X::from_i64(-8).to_u64() >> 2)?;
    check("slli", 4, hart, X::from_i64(-16).to_u64())?;
    // -8 masked to the shift width is BITS-8, so 1 << (BITS-8).
    check("sll", 6, hart, 1u64 << (X::BITS - 8))?;
    Ok(())
}

fn jumps_and_branches<X: Xlen>(hart: &mut Hart<X>) -> Result<(), SelfTestError> {
    let program = [
        enc::jal(1, 8),           // 0x00: jump to 0x08, link 0x04
        enc::addi(2, 0, 99),      // 0x04: skipped
        enc::addi(3, 0, 1),       // 0x08
        enc::beq(0, 0, 8),        // 0x0C: taken, to 0x14
        enc::addi(3, 0, 99),      // 0x10: skipped
        enc::bne(0, 0, 8),        // 0x14: not taken
        enc::addi(4, 0, 2),       // 0x18
        enc::jalr(5, 1, 0x20),    // 0x1C: to x1 + 0x20 = 0x24, link 0x20
        enc::addi(6, 0, 99),      // 0x20: skipped
        enc::addi(6, 0, 3),       // 0x24
    ];
    load_program(hart, &program);
    run_steps(hart, 7);
    check("jal", 1, hart, 4)?;
    check("jal", 2, hart, 0)?;
    check("beq", 3, hart, 1)?;
    check("bne", 4, hart, 2)?;
    check("jalr", 5, hart, 0x20)?;
    check("jalr", 6, hart, 3)?;
    Ok(())
}

fn loads_and_stores<X: Xlen>(hart: &mut Hart<X>) -> Result<(), SelfTestError> {
    let program = [
        enc::addi(1, 0, 0x100),
        enc::lui(2, 0x80088),     // a value with high and sign bits set
        enc::sw(1, 2, 0),
        enc::lw(3, 1, 0),
        enc::lh(4, 1, 2),
        enc::lhu(5, 1, 2),
        enc::lb(6, 1, 3),
        enc::lbu(7, 1, 3),
    ];
    load_program(hart, &program);
    run_steps(hart, program.len());
    let stored = X::from_i64(0x80088 << 12).to_u64();
    check("lw", 3, hart, X::from_i64(0x8008_8000u32 as i32 as i64).to_u64())?;
    if hart.peek_memory_u32(0x100) != Some(stored as u32) {
        return Err(SelfTestError {
            case: "sw",
            detail: "stored word not visible in memory".to_string(),
        });
    }
    check("lh", 4, hart, X::from_i64(0x8008u16 as i16 as i64).to_u64())?;
    check("lhu", 5, hart, 0x8008)?;
    check("lb", 6, hart, X::from_i64(0x80u8 as i8 as i64).to_u64())?;
    check("lbu", 7, hart, 0x80)?;
    Ok(())
}

fn multiply_divide<X: Xlen>(hart: &mut Hart<X>) -> Result<(), SelfTestError> {
    let program = [
        enc::addi(1, 0, 7),
        enc::addi(2, 0, -6),
        enc::mul(3, 1, 2),
        enc::mulh(4, 1, 2),
        enc::mulhu(5, 1, 2),
        enc::div(6, 2, 1),
        enc::rem(7, 2, 1),
        enc::addi(8, 0, 0),
        enc::div(9, 1, 8),  // divide by zero
        enc::rem(10, 1, 8), // remainder by zero
    ];
    load_program(hart, &program);
    run_steps(hart, program.len());
    check("mul", 3, hart, X::from_i64(-42).to_u64())?;
    // High half of 7 * -6 is all ones.
    check("mulh", 4, hart, X::from_i64(-1).to_u64())?;
    // Unsigned: 7 * (2^XLEN - 6) has high half 6.
    check("mulhu", 5, hart, 6)?;
    check("div", 6, hart, 0)?;
    check("rem", 7, hart, X::from_i64(-6).to_u64())?;
    check("div-by-zero", 9, hart, X::from_i64(-1).to_u64())?;
    check("rem-by-zero", 10, hart, 7)?;

    // Signed overflow: INT_MIN / -1 returns the dividend, remainder 0.
    let int_min = 1u64 << (X::BITS - 1);
    let program = [enc::addi(2, 0, -1), enc::div(3, 1, 2), enc::rem(4, 1, 2)];
    load_program(hart, &program);
    assert!(hart.poke_int_reg(1, X::from_u64(int_min)));
    run_steps(hart, program.len());
    check("div-overflow", 3, hart, int_min)?;
    check("rem-overflow", 4, hart, 0)?;
    Ok(())
}

fn csr_access<X: Xlen>(hart: &mut Hart<X>) -> Result<(), SelfTestError> {
    let program = [
        enc::addi(1, 0, 0x5A),
        enc::csrrw(0, csr::MSCRATCH, 1),
        enc::csrrs(2, csr::MSCRATCH, 0),
        enc::csrrci(3, csr::MSCRATCH, 0xA),
        enc::csrrs(4, csr::MSCRATCH, 0),
        enc::csrrs(5, csr::MISA, 0),
    ];
    load_program(hart, &program);
    run_steps(hart, program.len());
    check("csrrw/csrrs", 2, hart, 0x5A)?;
    check("csrrci-read", 3, hart, 0x5A)?;
    check("csrrci-clear", 4, hart, 0x50)?;
    check("misa", 5, hart, Hart::<X>::misa_value())?;
    Ok(())
}

fn compressed<X: Xlen>(hart: &mut Hart<X>) -> Result<(), SelfTestError> {
    // c.addi a0, 1 followed by c.addi a0, 2.
    hart.reset();
    assert!(hart.poke_memory_u16(0, 0x0505));
    assert!(hart.poke_memory_u16(2, 0x0509));
    hart.step();
    if hart.peek_pc().to_u64() != 2 {
        return Err(SelfTestError {
            case: "c.addi",
            detail: format!("pc = {:#x}, expected 2", hart.peek_pc().to_u64()),
        });
    }
    check("c.addi", 10, hart, 1)?;
    hart.step();
    check("c.addi", 10, hart, 3)?;
    Ok(())
}

fn traps<X: Xlen>(hart: &mut Hart<X>) -> Result<(), SelfTestError> {
    // A write to a read-only CSR must trap with ILLEGAL_INST, mtval holding
    // the instruction bits.
    let illegal = enc::csrrw(0, csr::MVENDORID, 0);
    let program = [enc::addi(1, 0, 1), illegal];
    load_program(hart, &program);
    assert!(hart.poke_csr(csr::MTVEC, X::from_u64(0x200)));
    run_steps(hart, 2);
    let mcause = hart.peek_csr(csr::MCAUSE).map(Xlen::to_u64);
    let mepc = hart.peek_csr(csr::MEPC).map(Xlen::to_u64);
    let mtval = hart.peek_csr(csr::MTVAL).map(Xlen::to_u64);
    if mcause != Some(2) || mepc != Some(4) || mtval != Some(illegal as u64) {
        return Err(SelfTestError {
            case: "illegal-csr-write",
            detail: format!("mcause={mcause:x?} mepc={mepc:x?} mtval={mtval:x?}"),
        });
    }
    if hart.peek_pc().to_u64() != 0x200 {
        return Err(SelfTestError {
            case: "illegal-csr-write",
            detail: format!("pc = {:#x}, expected trap vector", hart.peek_pc().to_u64()),
        });
    }

    // ebreak, then mret from the handler.
    let program = [enc::addi(1, 0, 1), enc::ebreak()];
    load_program(hart, &program);
    assert!(hart.poke_csr(csr::MTVEC, X::from_u64(0x200)));
    assert!(hart.poke_memory_u32(0x200, enc::mret()));
    run_steps(hart, 2);
    let mcause = hart.peek_csr(csr::MCAUSE).map(Xlen::to_u64);
    if mcause != Some(3) {
        return Err(SelfTestError {
            case: "ebreak",
            detail: format!("mcause = {mcause:x?}, expected 3"),
        });
    }
    assert!(hart.poke_csr(csr::MEPC, X::from_u64(8)));
    match hart.step() {
        StepResult::Retired(_) => {}
        StepResult::Trapped(exception) => {
            return Err(SelfTestError {
                case: "mret",
                detail: format!("unexpected trap: {exception}"),
            });
        }
    }
    if hart.peek_pc().to_u64() != 8 {
        return Err(SelfTestError {
            case: "mret",
            detail: format!("pc = {:#x}, expected 8", hart.peek_pc().to_u64()),
        });
    }
    Ok(())
}

/// Minimal instruction encoders for the test sequences.
mod enc {
    use crate::core::csr::CsrSpecifier;

    fn r_type(opcode: u32, rd: u8, funct3: u32, rs1: u8, rs2: u8, funct7: u32) -> u32 {
        (funct7 << 25)
            | ((rs2 as u32) << 20)
            | ((rs1 as u32) << 15)
            | (funct3 << 12)
            | ((rd as u32) << 7)
            | opcode
    }

    fn i_type(opcode: u32, rd: u8, funct3: u32, rs1: u8, imm: i32) -> u32 {
        ((imm as u32 & 0xFFF) << 20) | ((rs1 as u32) << 15) | (funct3 << 12) | ((rd as u32) << 7) | opcode
    }

    fn s_type(opcode: u32, funct3: u32, rs1: u8, rs2: u8, imm: i32) -> u32 {
        let imm = imm as u32;
        ((imm & 0xFE0) << 20)
            | ((rs2 as u32) << 20)
            | ((rs1 as u32) << 15)
            | (funct3 << 12)
            | ((imm & 0x1F) << 7)
            | opcode
    }

    fn b_type(opcode: u32, funct3: u32, rs1: u8, rs2: u8, imm: i32) -> u32 {
        let imm = imm as u32;
        ((imm & 0x1000) << 19)
            | ((imm & 0x7E0) << 20)
            | ((rs2 as u32) << 20)
            | ((rs1 as u32) << 15)
            | (funct3 << 12)
            | ((imm & 0x1E) << 7)
            | ((imm & 0x800) >> 4)
            | opcode
    }

    fn u_type(opcode: u32, rd: u8, imm20: u32) -> u32 {
        (imm20 << 12) | ((rd as u32) << 7) | opcode
    }

    fn j_type(opcode: u32, rd: u8, imm: i32) -> u32 {
        let imm = imm as u32;
        ((imm & 0x10_0000) << 11)
            | ((imm & 0x7FE) << 20)
            | ((imm & 0x800) << 9)
            | (imm & 0xF_F000)
            | ((rd as u32) << 7)
            | opcode
    }

    pub fn addi(rd: u8, rs1: u8, imm: i32) -> u32 {
        i_type(0x13, rd, 0b000, rs1, imm)
    }

    pub fn xori(rd: u8, rs1: u8, imm: i32) -> u32 {
        i_type(0x13, rd, 0b100, rs1, imm)
    }

    pub fn ori(rd: u8, rs1: u8, imm: i32) -> u32 {
        i_type(0x13, rd, 0b110, rs1, imm)
    }

    pub fn andi(rd: u8, rs1: u8, imm: i32) -> u32 {
        i_type(0x13, rd, 0b111, rs1, imm)
    }

    pub fn sltiu(rd: u8, rs1: u8, imm: i32) -> u32 {
        i_type(0x13, rd, 0b011, rs1, imm)
    }

    pub fn slli(rd: u8, rs1: u8, shamt: u32) -> u32 {
        i_type(0x13, rd, 0b001, rs1, shamt as i32)
    }

    pub fn srli(rd: u8, rs1: u8, shamt: u32) -> u32 {
        i_type(0x13, rd, 0b101, rs1, shamt as i32)
    }

    pub fn srai(rd: u8, rs1: u8, shamt: u32) -> u32 {
        i_type(0x13, rd, 0b101, rs1, (shamt | 0x400) as i32)
    }

    pub fn lui(rd: u8, imm20: u32) -> u32 {
        u_type(0x37, rd, imm20)
    }

    pub fn auipc(rd: u8, imm20: u32) -> u32 {
        u_type(0x17, rd, imm20)
    }

    pub fn sll(rd: u8, rs1: u8, rs2: u8) -> u32 {
        r_type(0x33, rd, 0b001, rs1, rs2, 0)
    }

    pub fn slt(rd: u8, rs1: u8, rs2: u8) -> u32 {
        r_type(0x33, rd, 0b010, rs1, rs2, 0)
    }

    pub fn sltu(rd: u8, rs1: u8, rs2: u8) -> u32 {
        r_type(0x33, rd, 0b011, rs1, rs2, 0)
    }

    pub fn mul(rd: u8, rs1: u8, rs2: u8) -> u32 {
        r_type(0x33, rd, 0b000, rs1, rs2, 1)
    }

    pub fn mulh(rd: u8, rs1: u8, rs2: u8) -> u32 {
        r_type(0x33, rd, 0b001, rs1, rs2, 1)
    }

    pub fn mulhu(rd: u8, rs1: u8, rs2: u8) -> u32 {
        r_type(0x33, rd, 0b011, rs1, rs2, 1)
    }

    pub fn div(rd: u8, rs1: u8, rs2: u8) -> u32 {
        r_type(0x33, rd, 0b100, rs1, rs2, 1)
    }

    pub fn rem(rd: u8, rs1: u8, rs2: u8) -> u32 {
        r_type(0x33, rd, 0b110, rs1, rs2, 1)
    }

    pub fn jal(rd: u8, offset: i32) -> u32 {
        j_type(0x6F, rd, offset)
    }

    pub fn jalr(rd: u8, rs1: u8, offset: i32) -> u32 {
        i_type(0x67, rd, 0b000, rs1, offset)
    }

    pub fn beq(rs1: u8, rs2: u8, offset: i32) -> u32 {
        b_type(0x63, 0b000, rs1, rs2, offset)
    }

    pub fn bne(rs1: u8, rs2: u8, offset: i32) -> u32 {
        b_type(0x63, 0b001, rs1, rs2, offset)
    }

    pub fn lb(rd: u8, rs1: u8, offset: i32) -> u32 {
        i_type(0x03, rd, 0b000, rs1, offset)
    }

    pub fn lh(rd: u8, rs1: u8, offset: i32) -> u32 {
        i_type(0x03, rd, 0b001, rs1, offset)
    }

    pub fn lw(rd: u8, rs1: u8, offset: i32) -> u32 {
        i_type(0x03, rd, 0b010, rs1, offset)
    }

    pub fn lbu(rd: u8, rs1: u8, offset: i32) -> u32 {
        i_type(0x03, rd, 0b100, rs1, offset)
    }

    pub fn lhu(rd: u8, rs1: u8, offset: i32) -> u32 {
        i_type(0x03, rd, 0b101, rs1, offset)
    }

    pub fn sw(rs1: u8, rs2: u8, offset: i32) -> u32 {
        s_type(0x23, 0b010, rs1, rs2, offset)
    }

    pub fn csrrw(rd: u8, csr: CsrSpecifier, rs1: u8) -> u32 {
        i_type(0x73, rd, 0b001, rs1, csr as i32)
    }

    pub fn csrrs(rd: u8, csr: CsrSpecifier, rs1: u8) -> u32 {
        i_type(0x73, rd, 0b010, rs1, csr as i32)
    }

    pub fn csrrci(rd: u8, csr: CsrSpecifier, uimm: u8) -> u32 {
        i_type(0x73, rd, 0b111, uimm, csr as i32)
    }

    pub fn ebreak() -> u32 {
        i_type(0x73, 0, 0b000, 0, 1)
    }

    pub fn mret() -> u32 {
        i_type(0x73, 0, 0b000, 0, 0x302)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_self_test_rv32() {
        self_test::<u32>().unwrap();
    }

    #[test]
    fn test_self_test_rv64() {
        self_test::<u64>().unwrap();
    }
}

//! Expansion of compressed (RVC) instructions to their 32-bit equivalents.
//!
//! The C extension defines each 16-bit instruction as an alias for a 32-bit
//! one, so the expander is a pure syntactic mapping and the rest of the
//! engine only ever sees 32-bit codes.
//!
//! > The C extension is compatible with all other standard instruction
//! > extensions. The C extension allows 16-bit instructions to be freely
//! > intermixed with 32-bit instructions, with the latter now able to start
//! > on any 16-bit boundary.

use crate::instruction::DecodeError;
use crate::xlen::Xlen;

/// Expands a 16-bit instruction to its 32-bit equivalent.
///
/// Reserved and illegal patterns (including the all-zero halfword and the
/// floating-point forms, since this engine implements no F/D extension)
/// fail with [`DecodeError::IllegalInstruction`]. Encodings that only exist
/// on one register width (C.JAL on RV32; C.ADDIW, C.LD, C.SD and friends on
/// RV64) are gated on `X`.
pub fn expand<X: Xlen>(code: u16) -> Result<u32, DecodeError> {
    let rv64 = X::BITS == 64;
    let x = code as u32;
    let funct3 = (x >> 13) & 0b111;
    match x & 0b11 {
        0b00 => expand_quadrant0(x, funct3, rv64),
        0b01 => expand_quadrant1(x, funct3, rv64),
        0b10 => expand_quadrant2(x, funct3, rv64),
        _ => Err(DecodeError::IllegalInstruction),
    }
}

/// Quadrant 0: stack-pointer-relative allocation and register-relative
/// loads/stores of the eight most-used registers (`x8`..`x15`).
fn expand_quadrant0(x: u32, funct3: u32, rv64: bool) -> Result<u32, DecodeError> {
    match funct3 {
        0b000 => {
            // C.ADDI4SPN: addi rd', x2, nzuimm. The all-zero halfword
            // decodes here and is defined to be illegal.
            let nzuimm =
                ((x >> 7) & 0x30) | ((x >> 1) & 0x3C0) | ((x >> 4) & 0x4) | ((x >> 2) & 0x8);
            if nzuimm == 0 {
                return Err(DecodeError::IllegalInstruction);
            }
            Ok(encode_i(OP_IMM, rd_prime(x), 0b000, 2, nzuimm as i32))
        }
        0b010 => {
            // C.LW: lw rd', uimm(rs1')
            let uimm = ((x >> 7) & 0x38) | ((x >> 4) & 0x4) | ((x << 1) & 0x40);
            Ok(encode_i(LOAD, rd_prime(x), 0b010, rs1_prime(x), uimm as i32))
        }
        0b011 if rv64 => {
            // C.LD: ld rd', uimm(rs1')
            let uimm = ((x >> 7) & 0x38) | ((x << 1) & 0xC0);
            Ok(encode_i(LOAD, rd_prime(x), 0b011, rs1_prime(x), uimm as i32))
        }
        0b110 => {
            // C.SW: sw rs2', uimm(rs1')
            let uimm = ((x >> 7) & 0x38) | ((x >> 4) & 0x4) | ((x << 1) & 0x40);
            Ok(encode_s(STORE, 0b010, rs1_prime(x), rd_prime(x), uimm as i32))
        }
        0b111 if rv64 => {
            // C.SD: sd rs2', uimm(rs1')
            let uimm = ((x >> 7) & 0x38) | ((x << 1) & 0xC0);
            Ok(encode_s(STORE, 0b011, rs1_prime(x), rd_prime(x), uimm as i32))
        }
        // 0b001/0b101 are C.FLD/C.FSD, 0b011/0b111 are C.FLW/C.FSW on
        // RV32; no floating-point extension is implemented. 0b100 is
        // reserved.
        _ => Err(DecodeError::IllegalInstruction),
    }
}

/// Quadrant 1: immediate arithmetic, control transfer, and the
/// register-register ALU group on `x8`..`x15`.
fn expand_quadrant1(x: u32, funct3: u32, rv64: bool) -> Result<u32, DecodeError> {
    match funct3 {
        0b000 => {
            // C.NOP / C.ADDI: addi rd, rd, nzimm. A zero immediate with a
            // non-zero rd is a HINT; HINTs execute as their expansion.
            let rd = rd_full(x);
            Ok(encode_i(OP_IMM, rd, 0b000, rd, imm6(x)))
        }
        0b001 if rv64 => {
            // C.ADDIW: addiw rd, rd, imm. rd == x0 is reserved.
            let rd = rd_full(x);
            if rd == 0 {
                return Err(DecodeError::IllegalInstruction);
            }
            Ok(encode_i(OP_IMM_32, rd, 0b000, rd, imm6(x)))
        }
        0b001 => {
            // C.JAL (RV32 only): jal x1, offset
            Ok(encode_j(JAL, 1, cj_imm(x)))
        }
        0b010 => {
            // C.LI: addi rd, x0, imm
            Ok(encode_i(OP_IMM, rd_full(x), 0b000, 0, imm6(x)))
        }
        0b011 => {
            let rd = rd_full(x);
            if rd == 2 {
                // C.ADDI16SP: addi x2, x2, nzimm
                let v = ((x >> 3) & 0x200)
                    | ((x >> 2) & 0x10)
                    | ((x << 1) & 0x40)
                    | ((x << 4) & 0x180)
                    | ((x << 3) & 0x20);
                if v == 0 {
                    return Err(DecodeError::IllegalInstruction);
                }
                let imm = ((v as i32) << 22) >> 22;
                Ok(encode_i(OP_IMM, 2, 0b000, 2, imm))
            } else {
                // C.LUI: lui rd, nzimm. A zero immediate is reserved.
                let v = ((x >> 7) & 0x20) | ((x >> 2) & 0x1F);
                if v == 0 {
                    return Err(DecodeError::IllegalInstruction);
                }
                let imm = (((v as i32) << 26) >> 26) << 12;
                Ok(encode_u(LUI, rd, imm))
            }
        }
        0b100 => {
            let rd = rd_prime(x);
            match (x >> 10) & 0b11 {
                0b00 | 0b01 => {
                    // C.SRLI / C.SRAI: shift rd', rd', shamt
                    let shamt = shamt6(x, rv64)?;
                    let funct7 = match (x >> 10) & 0b11 {
                        0b00 => 0b0000000,
                        _ => 0b0100000,
                    };
                    // Bit 25 carries shamt[5] on RV64.
                    Ok(encode_r(OP_IMM, rd, 0b101, rd, shamt & 0x1F, funct7 | (shamt >> 5)))
                }
                0b10 => {
                    // C.ANDI: andi rd', rd', imm
                    Ok(encode_i(OP_IMM, rd, 0b111, rd, imm6(x)))
                }
                _ => {
                    let rs2 = rs2_prime(x);
                    match ((x >> 12) & 1, (x >> 5) & 0b11) {
                        (0, 0b00) => Ok(encode_r(OP, rd, 0b000, rd, rs2, 0b0100000)), // C.SUB
                        (0, 0b01) => Ok(encode_r(OP, rd, 0b100, rd, rs2, 0b0000000)), // C.XOR
                        (0, 0b10) => Ok(encode_r(OP, rd, 0b110, rd, rs2, 0b0000000)), // C.OR
                        (0, 0b11) => Ok(encode_r(OP, rd, 0b111, rd, rs2, 0b0000000)), // C.AND
                        (1, 0b00) if rv64 => {
                            Ok(encode_r(OP_32, rd, 0b000, rd, rs2, 0b0100000)) // C.SUBW
                        }
                        (1, 0b01) if rv64 => {
                            Ok(encode_r(OP_32, rd, 0b000, rd, rs2, 0b0000000)) // C.ADDW
                        }
                        _ => Err(DecodeError::IllegalInstruction),
                    }
                }
            }
        }
        0b101 => {
            // C.J: jal x0, offset
            Ok(encode_j(JAL, 0, cj_imm(x)))
        }
        0b110 => {
            // C.BEQZ: beq rs1', x0, offset
            Ok(encode_b(BRANCH, 0b000, rs1_prime(x), 0, cb_imm(x)))
        }
        0b111 => {
            // C.BNEZ: bne rs1', x0, offset
            Ok(encode_b(BRANCH, 0b001, rs1_prime(x), 0, cb_imm(x)))
        }
        _ => unreachable!("funct3 is 3 bits"),
    }
}

/// Quadrant 2: stack-pointer-relative loads/stores and the full-register
/// move/jump group.
fn expand_quadrant2(x: u32, funct3: u32, rv64: bool) -> Result<u32, DecodeError> {
    match funct3 {
        0b000 => {
            // C.SLLI: slli rd, rd, shamt
            let rd = rd_full(x);
            let shamt = shamt6(x, rv64)?;
            Ok(encode_r(OP_IMM, rd, 0b001, rd, shamt & 0x1F, shamt >> 5))
        }
        0b010 => {
            // C.LWSP: lw rd, uimm(x2). rd == x0 is reserved.
            let rd = rd_full(x);
            if rd == 0 {
                return Err(DecodeError::IllegalInstruction);
            }
            let uimm = ((x >> 7) & 0x20) | ((x >> 2) & 0x1C) | ((x << 4) & 0xC0);
            Ok(encode_i(LOAD, rd, 0b010, 2, uimm as i32))
        }
        0b011 if rv64 => {
            // C.LDSP: ld rd, uimm(x2). rd == x0 is reserved.
            let rd = rd_full(x);
            if rd == 0 {
                return Err(DecodeError::IllegalInstruction);
            }
            let uimm = ((x >> 7) & 0x20) | ((x >> 2) & 0x18) | ((x << 4) & 0x1C0);
            Ok(encode_i(LOAD, rd, 0b011, 2, uimm as i32))
        }
        0b100 => {
            let rs1 = rd_full(x);
            let rs2 = (x >> 2) & 0x1F;
            match ((x >> 12) & 1, rs1, rs2) {
                (0, 0, 0) => Err(DecodeError::IllegalInstruction),
                // C.JR: jalr x0, 0(rs1)
                (0, _, 0) => Ok(encode_i(JALR, 0, 0b000, rs1, 0)),
                // C.MV: add rd, x0, rs2
                (0, _, _) => Ok(encode_r(OP, rs1, 0b000, 0, rs2, 0b0000000)),
                // C.EBREAK
                (1, 0, 0) => Ok(encode_i(SYSTEM, 0, 0b000, 0, 1)),
                // C.JALR: jalr x1, 0(rs1)
                (1, _, 0) => Ok(encode_i(JALR, 1, 0b000, rs1, 0)),
                // C.ADD: add rd, rd, rs2
                (1, _, _) => Ok(encode_r(OP, rs1, 0b000, rs1, rs2, 0b0000000)),
                _ => unreachable!("bit 12 is one bit"),
            }
        }
        0b110 => {
            // C.SWSP: sw rs2, uimm(x2)
            let uimm = ((x >> 7) & 0x3C) | ((x >> 1) & 0xC0);
            Ok(encode_s(STORE, 0b010, 2, (x >> 2) & 0x1F, uimm as i32))
        }
        0b111 if rv64 => {
            // C.SDSP: sd rs2, uimm(x2)
            let uimm = ((x >> 7) & 0x38) | ((x >> 1) & 0x1C0);
            Ok(encode_s(STORE, 0b011, 2, (x >> 2) & 0x1F, uimm as i32))
        }
        // 0b001/0b101 are C.FLDSP/C.FSDSP, 0b011/0b111 are C.FLWSP/C.FSWSP
        // on RV32; no floating-point extension is implemented.
        _ => Err(DecodeError::IllegalInstruction),
    }
}

// Major opcodes of the expansion targets.
const LOAD: u32 = 0b00_000_11;
const OP_IMM: u32 = 0b00_100_11;
const LUI: u32 = 0b01_101_11;
const OP_IMM_32: u32 = 0b00_110_11;
const STORE: u32 = 0b01_000_11;
const OP: u32 = 0b01_100_11;
const OP_32: u32 = 0b01_110_11;
const BRANCH: u32 = 0b11_000_11;
const JALR: u32 = 0b11_001_11;
const JAL: u32 = 0b11_011_11;
const SYSTEM: u32 = 0b11_100_11;

/// The 3-bit register fields of the compressed formats address `x8`..`x15`.
fn rd_prime(x: u32) -> u32 {
    8 + ((x >> 2) & 0b111)
}

fn rs1_prime(x: u32) -> u32 {
    8 + ((x >> 7) & 0b111)
}

fn rs2_prime(x: u32) -> u32 {
    8 + ((x >> 2) & 0b111)
}

/// Full 5-bit rd/rs1 field of the CI/CR formats.
fn rd_full(x: u32) -> u32 {
    (x >> 7) & 0x1F
}

/// The 6-bit immediate of the CI format, sign-extended.
fn imm6(x: u32) -> i32 {
    let v = ((x >> 7) & 0x20) | ((x >> 2) & 0x1F);
    ((v as i32) << 26) >> 26
}

/// The 6-bit shift amount of C.SRLI/C.SRAI/C.SLLI. A set bit 5 is reserved
/// on RV32.
fn shamt6(x: u32, rv64: bool) -> Result<u32, DecodeError> {
    let shamt = ((x >> 7) & 0x20) | ((x >> 2) & 0x1F);
    if !rv64 && shamt >= 32 {
        return Err(DecodeError::IllegalInstruction);
    }
    Ok(shamt)
}

/// The CJ-format jump offset, sign-extended.
fn cj_imm(x: u32) -> i32 {
    let v = ((x >> 1) & 0x800)
        | ((x >> 7) & 0x10)
        | ((x >> 1) & 0x300)
        | ((x << 2) & 0x400)
        | ((x >> 1) & 0x40)
        | ((x << 1) & 0x80)
        | ((x >> 2) & 0xE)
        | ((x << 3) & 0x20);
    ((v as i32) << 20) >> 20
}

/// The CB-format branch offset, sign-extended.
fn cb_imm(x: u32) -> i32 {
    let v = ((x >> 4) & 0x100)
        | ((x >> 7) & 0x18)
        | ((x << 1) & 0xC0)
        | ((x >> 2) & 0x6)
        | ((x << 3) & 0x20);
    ((v as i32) << 23) >> 23
}

fn encode_r(opcode: u32, rd: u32, funct3: u32, rs1: u32, rs2: u32, funct7: u32) -> u32 {
    (funct7 << 25) | (rs2 << 20) | (rs1 << 15) | (funct3 << 12) | (rd << 7) | opcode
}

fn encode_i(opcode: u32, rd: u32, funct3: u32, rs1: u32, imm: i32) -> u32 {
    ((imm as u32 & 0xFFF) << 20) | (rs1 << 15) | (funct3 << 12) | (rd << 7) | opcode
}

fn encode_s(opcode: u32, funct3: u32, rs1: u32, rs2: u32, imm: i32) -> u32 {
    let imm = imm as u32;
    ((imm & 0xFE0) << 20) | (rs2 << 20) | (rs1 << 15) | (funct3 << 12) | ((imm & 0x1F) << 7) | opcode
}

fn encode_b(opcode: u32, funct3: u32, rs1: u32, rs2: u32, imm: i32) -> u32 {
    let imm = imm as u32;
    ((imm & 0x1000) << 19)
        | ((imm & 0x7E0) << 20)
        | (rs2 << 20)
        | (rs1 << 15)
        | (funct3 << 12)
        | ((imm & 0x1E) << 7)
        | ((imm & 0x800) >> 4)
        | opcode
}

fn encode_u(opcode: u32, rd: u32, imm: i32) -> u32 {
    (imm as u32 & 0xFFFF_F000) | (rd << 7) | opcode
}

fn encode_j(opcode: u32, rd: u32, imm: i32) -> u32 {
    let imm = imm as u32;
    ((imm & 0x10_0000) << 11)
        | ((imm & 0x7FE) << 20)
        | ((imm & 0x800) << 9)
        | (imm & 0xF_F000)
        | (rd << 7)
        | opcode
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::{
        BranchCondition, Instruction, LoadWidth, RegImmOp, RegRegOp, RegShiftImmOp, StoreWidth,
    };
    use crate::registers::Specifier;

    fn decode32(code: u16) -> Instruction {
        Instruction::decode::<u32>(expand::<u32>(code).unwrap()).unwrap()
    }

    fn decode64(code: u16) -> Instruction {
        Instruction::decode::<u64>(expand::<u64>(code).unwrap()).unwrap()
    }

    fn x(index: u8) -> Specifier {
        Specifier::from_u5(index)
    }

    #[test]
    fn test_all_zero_halfword_is_illegal() {
        assert_eq!(Err(DecodeError::IllegalInstruction), expand::<u32>(0x0000));
        assert_eq!(Err(DecodeError::IllegalInstruction), expand::<u64>(0x0000));
    }

    #[test]
    fn test_c_addi() {
        // c.addi a0, 1
        assert_eq!(
            Instruction::OpImm {
                op: RegImmOp::Addi,
                dest: x(10),
                src: x(10),
                immediate: 1,
            },
            decode32(0x0505)
        );
    }

    #[test]
    fn test_c_li_negative() {
        // c.li a0, -1
        assert_eq!(
            Instruction::OpImm {
                op: RegImmOp::Addi,
                dest: x(10),
                src: x(0),
                immediate: -1,
            },
            decode32(0x557D)
        );
    }

    #[test]
    fn test_c_lui() {
        // c.lui a0, 1
        assert_eq!(
            Instruction::Lui {
                dest: x(10),
                immediate: 0x1000,
            },
            decode32(0x6505)
        );
        // c.lui with a zero immediate is reserved.
        assert_eq!(Err(DecodeError::IllegalInstruction), expand::<u32>(0x6501));
    }

    #[test]
    fn test_c_addi4spn() {
        // c.addi4spn a0, 16
        assert_eq!(
            Instruction::OpImm {
                op: RegImmOp::Addi,
                dest: x(10),
                src: x(2),
                immediate: 16,
            },
            decode32(0x0808)
        );
    }

    #[test]
    fn test_c_addi16sp() {
        // c.addi16sp 16
        assert_eq!(
            Instruction::OpImm {
                op: RegImmOp::Addi,
                dest: x(2),
                src: x(2),
                immediate: 16,
            },
            decode32(0x6141)
        );
    }

    #[test]
    fn test_c_loads_and_stores() {
        // c.lw a2, 8(a0)
        assert_eq!(
            Instruction::Load {
                width: LoadWidth::Lw,
                dest: x(12),
                base: x(10),
                offset: 8,
            },
            decode32(0x4510)
        );
        // c.sw a2, 8(a0)
        assert_eq!(
            Instruction::Store {
                width: StoreWidth::Sw,
                src: x(12),
                base: x(10),
                offset: 8,
            },
            decode32(0xC510)
        );
        // c.lwsp a0, 4
        assert_eq!(
            Instruction::Load {
                width: LoadWidth::Lw,
                dest: x(10),
                base: x(2),
                offset: 4,
            },
            decode32(0x4512)
        );
        // c.swsp a0, 4
        assert_eq!(
            Instruction::Store {
                width: StoreWidth::Sw,
                src: x(10),
                base: x(2),
                offset: 4,
            },
            decode32(0xC22A)
        );
    }

    #[test]
    fn test_c_register_group() {
        // c.mv a0, a1
        assert_eq!(
            Instruction::Op {
                op: RegRegOp::Add,
                dest: x(10),
                src1: x(0),
                src2: x(11),
            },
            decode32(0x852E)
        );
        // c.add a0, a1
        assert_eq!(
            Instruction::Op {
                op: RegRegOp::Add,
                dest: x(10),
                src1: x(10),
                src2: x(11),
            },
            decode32(0x952E)
        );
        // c.sub a0, a1
        assert_eq!(
            Instruction::Op {
                op: RegRegOp::Sub,
                dest: x(10),
                src1: x(10),
                src2: x(11),
            },
            decode32(0x8D0D)
        );
        // c.srli a0, 2
        assert_eq!(
            Instruction::OpShiftImm {
                op: RegShiftImmOp::Srli,
                dest: x(10),
                src: x(10),
                shift_amount: 2,
            },
            decode32(0x8109)
        );
        // c.andi a0, 15
        assert_eq!(
            Instruction::OpImm {
                op: RegImmOp::Andi,
                dest: x(10),
                src: x(10),
                immediate: 15,
            },
            decode32(0x893D)
        );
    }

    #[test]
    fn test_c_control_transfer() {
        // c.j +8
        assert_eq!(
            Instruction::Jal {
                dest: x(0),
                offset: 8,
            },
            decode32(0xA021)
        );
        // c.beqz a0, +8
        assert_eq!(
            Instruction::Branch {
                condition: BranchCondition::Beq,
                src1: x(10),
                src2: x(0),
                offset: 8,
            },
            decode32(0xC501)
        );
        // c.jr ra
        assert_eq!(
            Instruction::Jalr {
                dest: x(0),
                base: x(1),
                offset: 0,
            },
            decode32(0x8082)
        );
        // c.jalr a0
        assert_eq!(
            Instruction::Jalr {
                dest: x(1),
                base: x(10),
                offset: 0,
            },
            decode32(0x9502)
        );
        // c.ebreak
        assert_eq!(Instruction::Ebreak, decode32(0x9002));
    }

    #[test]
    fn test_width_gated_encodings() {
        // 0x357D is c.addiw a0, -1 on RV64 and c.jal on RV32.
        assert_eq!(
            Instruction::OpImm {
                op: RegImmOp::Addiw,
                dest: x(10),
                src: x(10),
                immediate: -1,
            },
            decode64(0x357D)
        );
        assert!(matches!(
            decode32(0x357D),
            Instruction::Jal {
                dest: Specifier::X1,
                ..
            }
        ));
        // c.ld a2, 16(a0) only exists on RV64.
        assert_eq!(
            Instruction::Load {
                width: LoadWidth::Ld,
                dest: x(12),
                base: x(10),
                offset: 16,
            },
            decode64(0x6910)
        );
        assert_eq!(Err(DecodeError::IllegalInstruction), expand::<u32>(0x6910));
        // c.sdsp a0, 8 only exists on RV64.
        assert_eq!(
            Instruction::Store {
                width: StoreWidth::Sd,
                src: x(10),
                base: x(2),
                offset: 8,
            },
            decode64(0xE42A)
        );
        assert_eq!(Err(DecodeError::IllegalInstruction), expand::<u32>(0xE42A));
        // A 6-bit shift amount is reserved on RV32.
        // c.slli a0, 33
        assert_eq!(Err(DecodeError::IllegalInstruction), expand::<u32>(0x1506));
        assert_eq!(
            Instruction::OpShiftImm {
                op: RegShiftImmOp::Slli,
                dest: x(10),
                src: x(10),
                shift_amount: 33,
            },
            decode64(0x1506)
        );
    }
}

//! Textual rendering of instructions, backed by the decoder.

use crate::compressed;
use crate::core::csr;
use crate::instruction::{
    BranchCondition, CsrOp, FenceOrderCombination, Instruction, LoadWidth, RegImmOp, RegRegOp,
    RegShiftImmOp, StoreWidth,
};
use crate::xlen::Xlen;

/// Disassembles a 32-bit instruction into conventional RISC-V assembly
/// (mnemonic, comma-separated operands, ABI register names). Unknown
/// encodings render as a raw-word placeholder.
pub fn disassemble<X: Xlen>(raw_instruction: u32) -> String {
    match Instruction::decode::<X>(raw_instruction) {
        Ok(instruction) => render(instruction),
        Err(_) => format!(".word {raw_instruction:#010x}"),
    }
}

/// Disassembles a 16-bit compressed instruction by expanding it first; the
/// expansion is a pure syntactic mapping, so the canonical form is exact.
pub fn disassemble_compressed<X: Xlen>(code: u16) -> String {
    match compressed::expand::<X>(code) {
        Ok(expanded) => disassemble::<X>(expanded),
        Err(_) => format!(".half {code:#06x}"),
    }
}

fn render(instruction: Instruction) -> String {
    match instruction {
        Instruction::OpImm {
            op,
            dest,
            src,
            immediate,
        } => {
            let mnemonic = match op {
                RegImmOp::Addi => "addi",
                RegImmOp::Slti => "slti",
                RegImmOp::Sltiu => "sltiu",
                RegImmOp::Xori => "xori",
                RegImmOp::Ori => "ori",
                RegImmOp::Andi => "andi",
                RegImmOp::Addiw => "addiw",
            };
            format!(
                "{mnemonic} {}, {}, {immediate}",
                dest.abi_name(),
                src.abi_name()
            )
        }
        Instruction::OpShiftImm {
            op,
            dest,
            src,
            shift_amount,
        } => {
            let mnemonic = match op {
                RegShiftImmOp::Slli => "slli",
                RegShiftImmOp::Srli => "srli",
                RegShiftImmOp::Srai => "srai",
                RegShiftImmOp::Slliw => "slliw",
                RegShiftImmOp::Srliw => "srliw",
                RegShiftImmOp::Sraiw => "sraiw",
            };
            format!(
                "{mnemonic} {}, {}, {shift_amount}",
                dest.abi_name(),
                src.abi_name()
            )
        }
        Instruction::Lui { dest, immediate } => {
            format!("lui {}, {:#x}", dest.abi_name(), upper_immediate(immediate))
        }
        Instruction::Auipc { dest, immediate } => {
            format!(
                "auipc {}, {:#x}",
                dest.abi_name(),
                upper_immediate(immediate)
            )
        }
        Instruction::Op {
            op,
            dest,
            src1,
            src2,
        } => {
            let mnemonic = match op {
                RegRegOp::Add => "add",
                RegRegOp::Slt => "slt",
                RegRegOp::Sltu => "sltu",
                RegRegOp::And => "and",
                RegRegOp::Or => "or",
                RegRegOp::Xor => "xor",
                RegRegOp::Sll => "sll",
                RegRegOp::Srl => "srl",
                RegRegOp::Sub => "sub",
                RegRegOp::Sra => "sra",
                RegRegOp::Mul => "mul",
                RegRegOp::Mulh => "mulh",
                RegRegOp::Mulhsu => "mulhsu",
                RegRegOp::Mulhu => "mulhu",
                RegRegOp::Div => "div",
                RegRegOp::Divu => "divu",
                RegRegOp::Rem => "rem",
                RegRegOp::Remu => "remu",
                RegRegOp::Addw => "addw",
                RegRegOp::Subw => "subw",
                RegRegOp::Sllw => "sllw",
                RegRegOp::Srlw => "srlw",
                RegRegOp::Sraw => "sraw",
                RegRegOp::Mulw => "mulw",
                RegRegOp::Divw => "divw",
                RegRegOp::Divuw => "divuw",
                RegRegOp::Remw => "remw",
                RegRegOp::Remuw => "remuw",
            };
            format!(
                "{mnemonic} {}, {}, {}",
                dest.abi_name(),
                src1.abi_name(),
                src2.abi_name()
            )
        }
        Instruction::Jal { dest, offset } => {
            format!("jal {}, {offset}", dest.abi_name())
        }
        Instruction::Jalr { dest, base, offset } => {
            format!("jalr {}, {offset}({})", dest.abi_name(), base.abi_name())
        }
        Instruction::Branch {
            condition,
            src1,
            src2,
            offset,
        } => {
            let mnemonic = match condition {
                BranchCondition::Beq => "beq",
                BranchCondition::Bne => "bne",
                BranchCondition::Blt => "blt",
                BranchCondition::Bltu => "bltu",
                BranchCondition::Bge => "bge",
                BranchCondition::Bgeu => "bgeu",
            };
            format!(
                "{mnemonic} {}, {}, {offset}",
                src1.abi_name(),
                src2.abi_name()
            )
        }
        Instruction::Load {
            width,
            dest,
            base,
            offset,
        } => {
            let mnemonic = match width {
                LoadWidth::Lb => "lb",
                LoadWidth::Lh => "lh",
                LoadWidth::Lw => "lw",
                LoadWidth::Lbu => "lbu",
                LoadWidth::Lhu => "lhu",
                LoadWidth::Lwu => "lwu",
                LoadWidth::Ld => "ld",
            };
            format!("{mnemonic} {}, {offset}({})", dest.abi_name(), base.abi_name())
        }
        Instruction::Store {
            width,
            src,
            base,
            offset,
        } => {
            let mnemonic = match width {
                StoreWidth::Sb => "sb",
                StoreWidth::Sh => "sh",
                StoreWidth::Sw => "sw",
                StoreWidth::Sd => "sd",
            };
            format!("{mnemonic} {}, {offset}({})", src.abi_name(), base.abi_name())
        }
        Instruction::Fence {
            predecessor,
            successor,
        } => {
            format!(
                "fence {}, {}",
                fence_operand(predecessor),
                fence_operand(successor)
            )
        }
        Instruction::FenceI => "fence.i".to_string(),
        Instruction::Ecall => "ecall".to_string(),
        Instruction::Ebreak => "ebreak".to_string(),
        Instruction::Mret => "mret".to_string(),
        Instruction::Sret => "sret".to_string(),
        Instruction::Uret => "uret".to_string(),
        Instruction::Wfi => "wfi".to_string(),
        Instruction::Csr { op, dest, csr, src } => {
            let mnemonic = match op {
                CsrOp::ReadWrite => "csrrw",
                CsrOp::ReadSet => "csrrs",
                CsrOp::ReadClear => "csrrc",
            };
            format!(
                "{mnemonic} {}, {}, {}",
                dest.abi_name(),
                csr_operand(csr),
                src.abi_name()
            )
        }
        Instruction::Csri {
            op,
            dest,
            csr,
            immediate,
        } => {
            let mnemonic = match op {
                CsrOp::ReadWrite => "csrrwi",
                CsrOp::ReadSet => "csrrsi",
                CsrOp::ReadClear => "csrrci",
            };
            format!(
                "{mnemonic} {}, {}, {immediate}",
                dest.abi_name(),
                csr_operand(csr)
            )
        }
    }
}

/// The 20-bit upper-immediate field as written in assembly.
fn upper_immediate(immediate: i64) -> u64 {
    (immediate as u64 >> 12) & 0xF_FFFF
}

fn csr_operand(specifier: csr::CsrSpecifier) -> String {
    match csr::name(specifier) {
        Some(name) => name.to_string(),
        None => format!("{specifier:#05x}"),
    }
}

fn fence_operand(combination: FenceOrderCombination) -> String {
    let mut operand = String::new();
    if combination.device_input {
        operand.push('i');
    }
    if combination.device_output {
        operand.push('o');
    }
    if combination.memory_reads {
        operand.push('r');
    }
    if combination.memory_writes {
        operand.push('w');
    }
    if operand.is_empty() {
        operand.push('0');
    }
    operand
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_forms() {
        // addi x1, x0, 5
        assert_eq!("addi ra, zero, 5", disassemble::<u32>(0x0050_0093));
        // lui x1, 0x80000
        assert_eq!("lui ra, 0x80000", disassemble::<u32>(0x8000_00B7));
        // sw x2, 0(x1)
        assert_eq!("sw sp, 0(ra)", disassemble::<u32>(0x0020_A023));
        // div x3, x1, x2
        assert_eq!("div gp, ra, sp", disassemble::<u32>(0x0220_C1B3));
        // fence rw, rw
        assert_eq!("fence rw, rw", disassemble::<u32>(0x0330_000F));
        assert_eq!("ebreak", disassemble::<u32>(0x0010_0073));
    }

    #[test]
    fn test_csr_names() {
        // csrrw x0, mvendorid, x0
        assert_eq!(
            "csrrw zero, mvendorid, zero",
            disassemble::<u32>(0xF110_1073)
        );
        // csrrsi x7, mstatus, 21
        assert_eq!("csrrsi t2, mstatus, 21", disassemble::<u32>(0x300A_E3F3));
        // An unimplemented CSR renders by number.
        assert_eq!("csrrw zero, 0x5a8, zero", disassemble::<u32>(0x5A80_1073));
    }

    #[test]
    fn test_negative_offsets() {
        // jal x0, -16
        assert_eq!("jal zero, -16", disassemble::<u32>(0xFF1F_F06F));
        // beq x1, x2, -4
        assert_eq!("beq ra, sp, -4", disassemble::<u32>(0xFE20_8EE3));
    }

    #[test]
    fn test_unknown_encodings() {
        assert_eq!(".word 0xffffffff", disassemble::<u32>(0xFFFF_FFFF));
        assert_eq!(".half 0x0000", disassemble_compressed::<u32>(0x0000));
    }

    #[test]
    fn test_compressed() {
        // c.addi a0, 1 renders as its expansion.
        assert_eq!("addi a0, a0, 1", disassemble_compressed::<u32>(0x0505));
    }
}

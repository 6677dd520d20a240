//! Provides a simulatable RV32IMC/RV64IMC hart implementation.

pub mod csr;
mod counters;
mod execute;
mod interrupts;
mod status;
mod trap;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use execute::Executor;
use log::trace;
use thiserror::Error;

use crate::compressed;
use crate::instruction::{
    BranchCondition, Instruction, LoadWidth, RegImmOp, RegRegOp, RegShiftImmOp, StoreWidth,
};
use crate::memory::Memory;
use crate::registers::{self, Registers, Specifier};
use crate::trace::{TraceRecord, TraceSink};
use crate::xlen::Xlen;
use crate::{PrivilegeLevel, RawPrivilegeLevel};

pub use counters::Counters;
pub use csr::CsrSpecifier;
pub use interrupts::Interrupts;
pub use status::Status;
pub use trap::TrapCsrs;

/// Construction-time parameters of a hart.
#[derive(Debug, Clone)]
pub struct Config {
    /// > The mhartid CSR is an MXLEN-bit read-only register containing the
    /// > integer ID of the hardware thread running the code. This register
    /// > must be readable in any implementation. [...] at least one hart
    /// > must have a hart ID of zero.
    pub hart_id: u32,
    /// Size of the flat guest memory in bytes.
    pub memory_size: usize,
    /// Address to which the hart's pc register is reset.
    pub reset_vector: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hart_id: 0,
            memory_size: 1 << 20,
            reset_vector: 0,
        }
    }
}

/// A single RISC-V hardware thread with its architectural state.
///
/// The hart exclusively owns its register file, CSRs, and memory; the
/// executor and the trap unit borrow it mutably for the duration of one
/// instruction's retirement.
///
/// > From the perspective of software running in a given execution
/// > environment, a hart is a resource that autonomously fetches and
/// > executes RISC-V instructions within that execution environment.
///
/// The type parameter selects the register width: `Hart<u32>` implements
/// RV32IMC, `Hart<u64>` implements RV64IMC.
#[derive(Debug)]
pub struct Hart<X: Xlen> {
    config: Config,
    registers: Registers<X>,
    memory: Memory,
    status: Status,
    trap: TrapCsrs,
    interrupts: Interrupts,
    counters: Counters,
    privilege_mode: PrivilegeLevel,
    /// Address of the instruction currently being executed; `pc` already
    /// points past it.
    curr_pc: X,
    stop_address: Option<X>,
    to_host: Option<X>,
}

impl<X: Xlen> Hart<X> {
    /// The mvendorid CSR is 0 to indicate a non-commercial implementation.
    pub const MVENDORID: u64 = 0;
    /// The marchid CSR is 0 to indicate it is not implemented.
    pub const MARCHID: u64 = 0;
    /// The mimpid CSR is 0 to indicate it is not implemented.
    pub const MIMPID: u64 = 0;

    pub fn new(config: Config) -> Self {
        let memory = Memory::new(config.memory_size);
        let reset_pc = X::from_u64(config.reset_vector);
        Self {
            memory,
            registers: Registers::new(reset_pc),
            status: Status::new(),
            trap: TrapCsrs::new(),
            interrupts: Interrupts::new(),
            counters: Counters::new(),
            privilege_mode: PrivilegeLevel::Machine,
            curr_pc: reset_pc,
            stop_address: None,
            to_host: None,
            config,
        }
    }

    /// Forces the hart back to its reset state: zeroed registers and CSRs,
    /// pc at the reset vector, M-mode. Memory contents are preserved so a
    /// loaded image survives a reset.
    pub fn reset(&mut self) {
        let reset_pc = X::from_u64(self.config.reset_vector);
        self.registers = Registers::new(reset_pc);
        self.status = Status::new();
        self.trap = TrapCsrs::new();
        self.interrupts = Interrupts::new();
        self.counters = Counters::new();
        self.privilege_mode = PrivilegeLevel::Machine;
        self.curr_pc = reset_pc;
    }

    /// The misa value: MXL for this register width, extensions I, M, C,
    /// and U.
    ///
    /// > The misa CSR is a WARL read-write register reporting the ISA
    /// > supported by the hart.
    pub fn misa_value() -> u64 {
        const C: u64 = 1 << 2;
        const I: u64 = 1 << 8;
        const M: u64 = 1 << 12;
        const U: u64 = 1 << 20;
        (X::MXL << (X::BITS - 2)) | I | M | C | U
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registers(&self) -> &Registers<X> {
        &self.registers
    }

    pub fn registers_mut(&mut self) -> &mut Registers<X> {
        &mut self.registers
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut Memory {
        &mut self.memory
    }

    /// Size of the guest memory in bytes.
    pub fn memory_size(&self) -> usize {
        self.memory.size()
    }

    /// Number of integer registers (32; provided for the debug interface).
    pub fn int_reg_count(&self) -> usize {
        registers::LEN as usize
    }

    pub fn privilege_mode(&self) -> PrivilegeLevel {
        self.privilege_mode
    }

    /// Address of the instruction currently (or most recently) executed.
    pub fn curr_pc(&self) -> X {
        self.curr_pc
    }

    /// Count of retired instructions.
    pub fn retired_instructions(&self) -> u64 {
        self.counters.read_minstret()
    }

    /// Count of simulated cycles (one per fetch-execute iteration).
    pub fn cycle_count(&self) -> u64 {
        self.counters.read_mcycle()
    }

    /// Defines the pc value at which [`run`](Self::run) stops.
    pub fn set_stop_address(&mut self, address: X) {
        self.stop_address = Some(address);
    }

    pub fn clear_stop_address(&mut self) {
        self.stop_address = None;
    }

    /// Defines the address a store to which stops the simulator after the
    /// store retires.
    pub fn set_to_host_address(&mut self, address: X) {
        self.to_host = Some(address);
    }

    pub fn clear_to_host_address(&mut self) {
        self.to_host = None;
    }

    /// Finds an integer register by name (`x4`, or an ABI name like `tp`).
    pub fn find_int_reg(&self, name: &str) -> Option<u8> {
        Specifier::from_name(name).map(u8::from)
    }

    /// Finds a supported CSR by its conventional name.
    pub fn find_csr(&self, name: &str) -> Option<CsrSpecifier> {
        csr::find_by_name(name)
    }

    //
    // CSR access
    //

    /// Read the value of a CSR by its specifier.
    ///
    /// `privilege_level` indicates at what privilege level the read is
    /// performed. If the CSR that is being read requires a higher privilege
    /// level (see [`csr::required_privilege_level`]), then a
    /// [`CsrAccessError::Privileged`] is returned.
    pub fn read_csr(
        &self,
        specifier: CsrSpecifier,
        privilege_level: PrivilegeLevel,
    ) -> Result<X, CsrAccessError> {
        Self::check_csr_access(specifier, privilege_level)?;
        let value = match specifier {
            //
            // Machine info registers
            //
            csr::MISA => Self::misa_value(),
            csr::MVENDORID => Self::MVENDORID,
            csr::MARCHID => Self::MARCHID,
            csr::MIMPID => Self::MIMPID,
            csr::MHARTID => self.config.hart_id as u64,
            //
            // Machine trap setup / handling
            //
            csr::MSTATUS => self.status.read(),
            csr::MIE => self.interrupts.read_mie(),
            csr::MIP => self.interrupts.read_mip(),
            csr::MTVEC => self.trap.read_mtvec(),
            csr::MSCRATCH => self.trap.read_mscratch(),
            csr::MEPC => self.trap.read_mepc(),
            csr::MCAUSE => self.trap.read_mcause(),
            csr::MTVAL => self.trap.read_mtval(),
            //
            // Counter registers
            //
            // There is no memory-mapped timer device, so time shadows the
            // cycle counter.
            csr::CYCLE | csr::MCYCLE | csr::TIME => self.counters.read_mcycle(),
            csr::INSTRET | csr::MINSTRET => self.counters.read_minstret(),
            csr::CYCLEH | csr::MCYCLEH | csr::TIMEH if X::BITS == 32 => {
                self.counters.read_mcycle() >> 32
            }
            csr::INSTRETH | csr::MINSTRETH if X::BITS == 32 => {
                self.counters.read_minstret() >> 32
            }
            // The hpm counters are implemented but hardwired to zero.
            csr::HPMCOUNTER3..=csr::HPMCOUNTER31 => 0,
            csr::MHPMCOUNTER3..=csr::MHPMCOUNTER31 => 0,
            csr::MHPMEVENT3..=csr::MHPMEVENT31 => 0,
            csr::HPMCOUNTER3H..=csr::HPMCOUNTER31H if X::BITS == 32 => 0,
            csr::MHPMCOUNTER3H..=csr::MHPMCOUNTER31H if X::BITS == 32 => 0,
            _ => return Err(CsrAccessError::CsrUnsupported(specifier)),
        };
        Ok(X::from_u64(value))
    }

    /// Write `value` to a CSR under `mask`.
    ///
    /// Fails if the CSR is unknown, requires a higher privilege level, or
    /// is read-only. WARL fields apply their own masks inside the
    /// individual registers, so the stored value may differ from `value`.
    pub fn write_csr(
        &mut self,
        specifier: CsrSpecifier,
        privilege_level: PrivilegeLevel,
        value: X,
        mask: X,
    ) -> Result<(), CsrWriteError> {
        Self::check_csr_access(specifier, privilege_level).map_err(CsrWriteError::AccessError)?;
        if csr::is_read_only(specifier) {
            return Err(CsrWriteError::WriteToReadOnly);
        }
        self.write_csr_unchecked(specifier, value.to_u64(), mask.to_u64())
            .map_err(CsrWriteError::AccessError)
    }

    /// The write dispatch shared by [`write_csr`](Self::write_csr) and the
    /// debug [`poke_csr`](Self::poke_csr) path (which bypasses privilege
    /// and read-only checks but not existence checks).
    fn write_csr_unchecked(
        &mut self,
        specifier: CsrSpecifier,
        value: u64,
        mask: u64,
    ) -> Result<(), CsrAccessError> {
        match specifier {
            // The machine info registers are read-only WARL; debug writes
            // are ignored.
            csr::MISA | csr::MVENDORID | csr::MARCHID | csr::MIMPID | csr::MHARTID => {}
            csr::MSTATUS => self.status.write(value, mask),
            csr::MIE => self.interrupts.write_mie(value, mask),
            csr::MIP => self.interrupts.write_mip(value, mask),
            csr::MTVEC => self.trap.write_mtvec(value, mask),
            csr::MSCRATCH => self.trap.write_mscratch(value, mask),
            csr::MEPC => self.trap.write_mepc(value, mask),
            csr::MCAUSE => self.trap.write_mcause(value, mask),
            csr::MTVAL => self.trap.write_mtval(value, mask),
            csr::MCYCLE => self.counters.write_mcycle(value, mask),
            csr::MINSTRET => self.counters.write_minstret(value, mask),
            csr::MCYCLEH if X::BITS == 32 => {
                self.counters.write_mcycle(value << 32, mask << 32)
            }
            csr::MINSTRETH if X::BITS == 32 => {
                self.counters.write_minstret(value << 32, mask << 32)
            }
            // The unprivileged counters are read-only shadows; the hpm
            // group is hardwired to zero. Debug writes are ignored.
            csr::CYCLE | csr::TIME | csr::INSTRET => {}
            csr::CYCLEH | csr::TIMEH | csr::INSTRETH if X::BITS == 32 => {}
            csr::HPMCOUNTER3..=csr::HPMCOUNTER31 => {}
            csr::MHPMCOUNTER3..=csr::MHPMCOUNTER31 => {}
            csr::MHPMEVENT3..=csr::MHPMEVENT31 => {}
            csr::HPMCOUNTER3H..=csr::HPMCOUNTER31H if X::BITS == 32 => {}
            csr::MHPMCOUNTER3H..=csr::MHPMCOUNTER31H if X::BITS == 32 => {}
            _ => return Err(CsrAccessError::CsrUnsupported(specifier)),
        }
        Ok(())
    }

    fn check_csr_access(
        specifier: CsrSpecifier,
        privilege_level: PrivilegeLevel,
    ) -> Result<(), CsrAccessError> {
        if !csr::is_valid(specifier) {
            return Err(CsrAccessError::CsrUnsupported(specifier));
        }
        let required_level = csr::required_privilege_level(specifier);
        if privilege_level < required_level {
            return Err(CsrAccessError::Privileged {
                specifier,
                required_level,
                actual_level: privilege_level,
            });
        }
        Ok(())
    }

    //
    // Debug (peek/poke) interface. All accessors fail on out-of-range
    // input and leave the state unchanged on failure.
    //

    pub fn peek_pc(&self) -> X {
        self.registers.pc()
    }

    pub fn poke_pc(&mut self, address: X) {
        self.registers.set_pc(address);
    }

    pub fn peek_int_reg(&self, reg: u8) -> Option<X> {
        Specifier::new(reg).map(|specifier| self.registers.x(specifier))
    }

    pub fn poke_int_reg(&mut self, reg: u8, value: X) -> bool {
        match Specifier::new(reg) {
            Some(specifier) => {
                self.registers.set_x(specifier, value);
                true
            }
            None => false,
        }
    }

    /// Reads a CSR bypassing the privilege check.
    pub fn peek_csr(&self, specifier: CsrSpecifier) -> Option<X> {
        self.read_csr(specifier, PrivilegeLevel::Machine).ok()
    }

    /// Writes a CSR bypassing the privilege and read-only checks (but not
    /// the existence check, and not the WARL behavior of the individual
    /// fields).
    pub fn poke_csr(&mut self, specifier: CsrSpecifier, value: X) -> bool {
        self.write_csr_unchecked(specifier, value.to_u64(), X::from_i64(-1).to_u64())
            .is_ok()
    }

    pub fn peek_memory_u8(&self, address: u64) -> Option<u8> {
        self.memory.read_u8(address).ok()
    }

    pub fn peek_memory_u16(&self, address: u64) -> Option<u16> {
        self.memory.read_u16(address).ok()
    }

    pub fn peek_memory_u32(&self, address: u64) -> Option<u32> {
        self.memory.read_u32(address).ok()
    }

    pub fn peek_memory_u64(&self, address: u64) -> Option<u64> {
        self.memory.read_u64(address).ok()
    }

    pub fn poke_memory_u8(&mut self, address: u64, value: u8) -> bool {
        self.memory.write_u8(address, value).is_ok()
    }

    pub fn poke_memory_u16(&mut self, address: u64, value: u16) -> bool {
        self.memory.write_u16(address, value).is_ok()
    }

    pub fn poke_memory_u32(&mut self, address: u64, value: u32) -> bool {
        self.memory.write_u32(address, value).is_ok()
    }

    pub fn poke_memory_u64(&mut self, address: u64, value: u64) -> bool {
        self.memory.write_u64(address, value).is_ok()
    }

    //
    // Fetch, execute, run
    //

    /// "Independent instruction fetch unit"
    ///
    /// > Instructions are stored in memory as a sequence of 16-bit
    /// > little-endian parcels, regardless of memory system endianness.
    ///
    /// The width of the instruction is determined by the low two bits of
    /// the first parcel: `0b11` means 32-bit, anything else 16-bit
    /// (compressed). Returns the raw code and its size in bytes.
    fn fetch(&self) -> Result<(u32, u64), Exception> {
        let pc = self.registers.pc().to_u64();
        if !crate::Alignment::HALFWORD.is_aligned(pc) {
            return Err(Exception::InstructionAddressMisaligned { address: pc });
        }
        let low = self
            .memory
            .read_u16(pc)
            .map_err(|_| Exception::InstructionAccessFault { address: pc })?;
        if low & 0b11 != 0b11 {
            return Ok((low as u32, 2));
        }
        let high = self
            .memory
            .read_u16(pc.wrapping_add(2))
            .map_err(|_| Exception::InstructionAccessFault { address: pc })?;
        Ok(((high as u32) << 16 | low as u32, 4))
    }

    /// Executes one instruction, including interrupt sampling, fetch,
    /// decode, and trap delivery.
    ///
    /// The cycle counter advances on every call; the retired-instruction
    /// counter only when the instruction completes without trapping.
    pub fn step(&mut self) -> StepResult<X> {
        // Interrupts are sampled at the instruction boundary, before fetch.
        self.deliver_pending_interrupt();

        let pc = self.registers.pc();
        self.curr_pc = pc;
        let (raw, size) = match self.fetch() {
            Ok(fetched) => fetched,
            Err(exception) => {
                self.initiate_exception(&exception);
                self.counters.increment_cycle();
                return StepResult::Trapped(exception);
            }
        };
        self.registers
            .set_pc(X::from_u64(pc.to_u64().wrapping_add(size)));

        let decoded = match size {
            2 => compressed::expand::<X>(raw as u16).and_then(Instruction::decode::<X>),
            _ => Instruction::decode::<X>(raw),
        };
        let result = match decoded {
            Ok(instruction) => self.execute_instruction(raw, instruction),
            Err(_) => Err(Exception::IllegalInstruction { instruction: raw }),
        };
        match result {
            Ok(write_back) => {
                self.counters.increment_instret();
                self.counters.increment_cycle();
                StepResult::Retired(Retired {
                    pc,
                    instruction: raw,
                    size: size as u32,
                    write_back,
                })
            }
            Err(exception) => {
                self.initiate_exception(&exception);
                self.counters.increment_cycle();
                StepResult::Trapped(exception)
            }
        }
    }

    /// Delivers the highest-priority pending enabled interrupt, if any.
    /// Delivery consumes the host-raised external-interrupt signal.
    fn deliver_pending_interrupt(&mut self) {
        if let Some(interrupt) = self.pending_interrupt() {
            if interrupt == Interrupt::MachineExternalInterrupt {
                self.interrupts.set_m_external(false);
            }
            self.initiate_interrupt(interrupt);
        }
    }

    /// Executes a decoded instruction. `raw_instruction` provides the trap
    /// value for illegal-instruction exceptions.
    ///
    /// Assumes `curr_pc` holds the instruction's address and `pc` has
    /// already been advanced past it.
    pub fn execute_instruction(
        &mut self,
        raw_instruction: u32,
        instruction: Instruction,
    ) -> ExecutionResult<X> {
        let mut executor = Executor {
            hart: self,
            raw_instruction,
        };
        match instruction {
            Instruction::OpImm {
                op,
                dest,
                src,
                immediate,
            } => {
                let op = match op {
                    RegImmOp::Addi => Executor::addi,
                    RegImmOp::Slti => Executor::slti,
                    RegImmOp::Sltiu => Executor::sltiu,
                    RegImmOp::Xori => Executor::xori,
                    RegImmOp::Ori => Executor::ori,
                    RegImmOp::Andi => Executor::andi,
                    RegImmOp::Addiw => Executor::addiw,
                };
                op(&mut executor, dest, src, immediate)
            }
            Instruction::OpShiftImm {
                op,
                dest,
                src,
                shift_amount,
            } => {
                let op = match op {
                    RegShiftImmOp::Slli => Executor::slli,
                    RegShiftImmOp::Srli => Executor::srli,
                    RegShiftImmOp::Srai => Executor::srai,
                    RegShiftImmOp::Slliw => Executor::slliw,
                    RegShiftImmOp::Srliw => Executor::srliw,
                    RegShiftImmOp::Sraiw => Executor::sraiw,
                };
                op(&mut executor, dest, src, shift_amount)
            }
            Instruction::Auipc { dest, immediate } => executor.auipc(dest, immediate),
            Instruction::Lui { dest, immediate } => executor.lui(dest, immediate),
            Instruction::Op {
                op,
                dest,
                src1,
                src2,
            } => {
                let op = match op {
                    RegRegOp::Add => Executor::add,
                    RegRegOp::Slt => Executor::slt,
                    RegRegOp::Sltu => Executor::sltu,
                    RegRegOp::And => Executor::and,
                    RegRegOp::Or => Executor::or,
                    RegRegOp::Xor => Executor::xor,
                    RegRegOp::Sll => Executor::sll,
                    RegRegOp::Srl => Executor::srl,
                    RegRegOp::Sub => Executor::sub,
                    RegRegOp::Sra => Executor::sra,
                    RegRegOp::Mul => Executor::mul,
                    RegRegOp::Mulh => Executor::mulh,
                    RegRegOp::Mulhsu => Executor::mulhsu,
                    RegRegOp::Mulhu => Executor::mulhu,
                    RegRegOp::Div => Executor::div,
                    RegRegOp::Divu => Executor::divu,
                    RegRegOp::Rem => Executor::rem,
                    RegRegOp::Remu => Executor::remu,
                    RegRegOp::Addw => Executor::addw,
                    RegRegOp::Subw => Executor::subw,
                    RegRegOp::Sllw => Executor::sllw,
                    RegRegOp::Srlw => Executor::srlw,
                    RegRegOp::Sraw => Executor::sraw,
                    RegRegOp::Mulw => Executor::mulw,
                    RegRegOp::Divw => Executor::divw,
                    RegRegOp::Divuw => Executor::divuw,
                    RegRegOp::Remw => Executor::remw,
                    RegRegOp::Remuw => Executor::remuw,
                };
                op(&mut executor, dest, src1, src2)
            }
            Instruction::Jal { dest, offset } => executor.jal(dest, offset),
            Instruction::Jalr { dest, base, offset } => executor.jalr(dest, base, offset),
            Instruction::Branch {
                condition,
                src1,
                src2,
                offset,
            } => {
                let op = match condition {
                    BranchCondition::Beq => Executor::beq,
                    BranchCondition::Bne => Executor::bne,
                    BranchCondition::Blt => Executor::blt,
                    BranchCondition::Bltu => Executor::bltu,
                    BranchCondition::Bge => Executor::bge,
                    BranchCondition::Bgeu => Executor::bgeu,
                };
                op(&mut executor, src1, src2, offset)
            }
            Instruction::Load {
                width,
                dest,
                base,
                offset,
            } => {
                let op = match width {
                    LoadWidth::Lb => Executor::lb,
                    LoadWidth::Lh => Executor::lh,
                    LoadWidth::Lw => Executor::lw,
                    LoadWidth::Lbu => Executor::lbu,
                    LoadWidth::Lhu => Executor::lhu,
                    LoadWidth::Lwu => Executor::lwu,
                    LoadWidth::Ld => Executor::ld,
                };
                op(&mut executor, dest, base, offset)
            }
            Instruction::Store {
                width,
                src,
                base,
                offset,
            } => {
                let op = match width {
                    StoreWidth::Sb => Executor::sb,
                    StoreWidth::Sh => Executor::sh,
                    StoreWidth::Sw => Executor::sw,
                    StoreWidth::Sd => Executor::sd,
                };
                op(&mut executor, src, base, offset)
            }
            Instruction::Fence {
                predecessor,
                successor,
            } => executor.fence(predecessor, successor),
            Instruction::FenceI => executor.fence_i(),
            Instruction::Ecall => executor.ecall(),
            Instruction::Ebreak => executor.ebreak(),
            Instruction::Mret => executor.mret(),
            Instruction::Sret => executor.sret(),
            Instruction::Uret => executor.uret(),
            Instruction::Wfi => executor.wfi(),
            Instruction::Csr { op, dest, csr, src } => executor.csr_reg_op(op, dest, csr, src),
            Instruction::Csri {
                op,
                dest,
                csr,
                immediate,
            } => executor.csr_imm_op(op, dest, csr, immediate),
        }
    }

    /// Runs the fetch-decode-execute loop until a stop condition fires.
    ///
    /// Per iteration: host signal flags are polled (SIGTERM stops the loop;
    /// SIGUSR2 raises mip.MEIP), a pending enabled interrupt is delivered,
    /// the stop address is checked against `pc`, and one instruction is
    /// executed. A retired store to the configured tohost address stops the
    /// loop after the store is visible in memory.
    ///
    /// Guest traps never terminate the loop; they redirect control to the
    /// guest's trap vector.
    pub fn run(
        &mut self,
        signals: &HostSignals,
        mut tracer: Option<&mut dyn TraceSink<X>>,
    ) -> StopReason {
        loop {
            if signals.take_terminate() {
                return StopReason::HostSignal;
            }
            if signals.take_external_interrupt() {
                self.interrupts.set_m_external(true);
            }
            // Delivery happens before the stop-address check, so a pending
            // interrupt redirects the pc rather than hitting the stop.
            self.deliver_pending_interrupt();
            if self.stop_address == Some(self.registers.pc()) {
                return StopReason::StopAddress;
            }
            match self.step() {
                StepResult::Retired(retired) => {
                    if let Some(tracer) = tracer.as_deref_mut() {
                        let record =
                            TraceRecord::new(self.counters.read_minstret(), &retired);
                        tracer.record(&record);
                    }
                    if let WriteBack::Store { address, .. } = retired.write_back {
                        if self.to_host == Some(address) {
                            trace!("tohost write at {:#x}, stopping", address.to_u64());
                            return StopReason::ToHostWrite;
                        }
                    }
                }
                StepResult::Trapped(_) => {}
            }
        }
    }

    /// Runs until `pc` reaches `address` (or another stop condition fires),
    /// then restores the previously configured stop address.
    pub fn run_until_address(
        &mut self,
        address: X,
        signals: &HostSignals,
        tracer: Option<&mut dyn TraceSink<X>>,
    ) -> StopReason {
        let saved = self.stop_address;
        self.stop_address = Some(address);
        let reason = self.run(signals, tracer);
        self.stop_address = saved;
        reason
    }
}

/// Result of executing a single instruction: what the instruction wrote on
/// retirement, or the exception it raised.
pub type ExecutionResult<X> = Result<WriteBack<X>, Exception>;

/// The architecturally visible destination written by a retired
/// instruction. Used for tracing and for the tohost stop condition; the
/// executor has already performed the write.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum WriteBack<X: Xlen> {
    /// Nothing was written (branches, fences, wfi, xret).
    None,
    /// An integer register was written. `value` is the value actually
    /// stored, so a write to `x0` reports zero.
    Register { specifier: Specifier, value: X },
    /// A CSR was written. `value` is the value the CSR holds afterwards
    /// (WARL fields may differ from the written value).
    Csr { specifier: CsrSpecifier, value: X },
    /// Memory was written at `address`.
    Store {
        address: X,
        value: u64,
        width: StoreWidth,
    },
}

/// One retired instruction, as reported by [`Hart::step`].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Retired<X: Xlen> {
    /// Address the instruction was fetched from.
    pub pc: X,
    /// The raw code: 32 bits, or a 16-bit compressed code zero-extended.
    pub instruction: u32,
    /// Instruction size in bytes (2 or 4).
    pub size: u32,
    pub write_back: WriteBack<X>,
}

/// Outcome of one [`Hart::step`] call.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum StepResult<X: Xlen> {
    /// The instruction retired; the retirement record describes it.
    Retired(Retired<X>),
    /// The instruction (or its fetch) raised an exception, which has been
    /// delivered to the trap unit. Interrupt delivery alone does not
    /// produce a `Trapped` result; the first handler instruction executes
    /// in the same step.
    Trapped(Exception),
}

/// Why [`Hart::run`] returned.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum StopReason {
    /// The pc reached the configured stop address.
    StopAddress,
    /// A store instruction wrote to the configured tohost address.
    ToHostWrite,
    /// The host delivered a termination signal.
    HostSignal,
}

/// Host-signal flags, written by the driver's signal handlers and polled by
/// the run loop at instruction boundaries only. No other work happens in
/// the handlers, which keeps trap delivery at a well-defined architectural
/// state.
#[derive(Debug)]
pub struct HostSignals {
    terminate: AtomicBool,
    external_interrupt: AtomicBool,
}

impl HostSignals {
    pub const fn new() -> Self {
        Self {
            terminate: AtomicBool::new(false),
            external_interrupt: AtomicBool::new(false),
        }
    }

    /// Requests a graceful stop (SIGTERM). Async-signal-safe.
    pub fn request_terminate(&self) {
        self.terminate.store(true, Ordering::Relaxed);
    }

    /// Requests a simulated external interrupt (SIGUSR2).
    /// Async-signal-safe.
    pub fn request_external_interrupt(&self) {
        self.external_interrupt.store(true, Ordering::Relaxed);
    }

    fn take_terminate(&self) -> bool {
        self.terminate.swap(false, Ordering::Relaxed)
    }

    fn take_external_interrupt(&self) -> bool {
        self.external_interrupt.swap(false, Ordering::Relaxed)
    }
}

impl Default for HostSignals {
    fn default() -> Self {
        Self::new()
    }
}

/// Errors that can occur when attempting to access a CSR.
#[derive(Error, Debug)]
pub enum CsrAccessError {
    #[error("unsupported CSR: {0:#05X}")]
    CsrUnsupported(CsrSpecifier),
    /// Attempt to access a CSR that requires a higher privilege level.
    #[error(
        "cannot access CSR {specifier:#05X} from privilege level {actual_level}, \
         since it requires privilege level {required_level}"
    )]
    Privileged {
        /// The CSR for which access was requested.
        specifier: CsrSpecifier,
        /// The minimum required privilege level to access that CSR.
        required_level: RawPrivilegeLevel,
        /// The actual privilege level from which the access was performed.
        actual_level: PrivilegeLevel,
    },
}

/// Errors that can occur when attempting to write to a CSR.
#[derive(Error, Debug)]
pub enum CsrWriteError {
    /// A non-write specific access error. See [`CsrAccessError`].
    #[error("{0}")]
    AccessError(CsrAccessError),
    /// Attempt to write to a read-only register.
    #[error("writing to read-only CSR is invalid")]
    WriteToReadOnly,
}

/// Synchronous exceptions, with the auxiliary information recorded in
/// mtval on trap entry.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Exception {
    /// Instruction address is not aligned to a 2-byte boundary (the C
    /// extension lowers IALIGN to 16).
    InstructionAddressMisaligned { address: u64 },
    InstructionAccessFault { address: u64 },
    /// One of many possible scenarios:
    ///
    /// - Attempt to decode a reserved or unsupported encoding.
    /// - Attempt to access a non-existent CSR.
    /// - Attempt to access a CSR without the appropriate privilege level.
    /// - Attempt to write to a read-only CSR.
    /// - A privileged instruction issued from insufficient privilege.
    IllegalInstruction { instruction: u32 },
    Breakpoint,
    LoadAddressMisaligned { address: u64 },
    LoadAccessFault { address: u64 },
    StoreAddressMisaligned { address: u64 },
    StoreAccessFault { address: u64 },
    EnvironmentCallFromUMode,
    EnvironmentCallFromSMode,
    EnvironmentCallFromMMode,
}

impl Exception {
    /// Returns the exception code (cause) for this exception.
    pub fn code(&self) -> u64 {
        match self {
            Self::InstructionAddressMisaligned { .. } => 0,
            Self::InstructionAccessFault { .. } => 1,
            Self::IllegalInstruction { .. } => 2,
            Self::Breakpoint => 3,
            Self::LoadAddressMisaligned { .. } => 4,
            Self::LoadAccessFault { .. } => 5,
            Self::StoreAddressMisaligned { .. } => 6,
            Self::StoreAccessFault { .. } => 7,
            Self::EnvironmentCallFromUMode => 8,
            Self::EnvironmentCallFromSMode => 9,
            Self::EnvironmentCallFromMMode => 11,
        }
    }

    /// The value recorded in mtval on trap entry: the faulting address for
    /// access and misalignment faults, the instruction bits for
    /// illegal-instruction, zero otherwise.
    pub fn trap_value(&self) -> u64 {
        match *self {
            Self::InstructionAddressMisaligned { address }
            | Self::InstructionAccessFault { address }
            | Self::LoadAddressMisaligned { address }
            | Self::LoadAccessFault { address }
            | Self::StoreAddressMisaligned { address }
            | Self::StoreAccessFault { address } => address,
            Self::IllegalInstruction { instruction } => instruction as u64,
            Self::Breakpoint
            | Self::EnvironmentCallFromUMode
            | Self::EnvironmentCallFromSMode
            | Self::EnvironmentCallFromMMode => 0,
        }
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::InstructionAddressMisaligned { .. } => "instruction address misaligned",
            Self::InstructionAccessFault { .. } => "instruction access fault",
            Self::IllegalInstruction { .. } => "illegal instruction",
            Self::Breakpoint => "breakpoint",
            Self::LoadAddressMisaligned { .. } => "load address misaligned",
            Self::LoadAccessFault { .. } => "load access fault",
            Self::StoreAddressMisaligned { .. } => "store address misaligned",
            Self::StoreAccessFault { .. } => "store access fault",
            Self::EnvironmentCallFromUMode => "environment call from U-mode",
            Self::EnvironmentCallFromSMode => "environment call from S-mode",
            Self::EnvironmentCallFromMMode => "environment call from M-mode",
        })
    }
}

/// Asynchronous interrupts. The discriminants are the mcause codes (with
/// the interrupt bit set in the MSB on delivery).
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Interrupt {
    UserSoftwareInterrupt = 0,
    SupervisorSoftwareInterrupt = 1,
    MachineSoftwareInterrupt = 3,
    UserTimerInterrupt = 4,
    SupervisorTimerInterrupt = 5,
    MachineTimerInterrupt = 7,
    UserExternalInterrupt = 8,
    SupervisorExternalInterrupt = 9,
    MachineExternalInterrupt = 11,
}

impl Interrupt {
    /// Returns the exception code (cause) for this interrupt.
    pub fn code(&self) -> u64 {
        *self as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hart32() -> Hart<u32> {
        Hart::new(Config {
            hart_id: 0,
            memory_size: 4096,
            reset_vector: 0,
        })
    }

    #[test]
    fn test_misa_reports_imcu() {
        let c_i_m_u = (1 << 2) | (1 << 8) | (1 << 12) | (1 << 20);
        assert_eq!(0x4000_0000 | c_i_m_u, Hart::<u32>::misa_value());
        assert_eq!(0x8000_0000_0000_0000 | c_i_m_u, Hart::<u64>::misa_value());
    }

    #[test]
    fn test_reset_state() {
        let hart = hart32();
        assert_eq!(PrivilegeLevel::Machine, hart.privilege_mode());
        assert_eq!(0, hart.peek_pc());
        assert_eq!(0, hart.retired_instructions());
        assert_eq!(Some(0), hart.peek_int_reg(0));
    }

    #[test]
    fn test_csr_privilege_checks() {
        let hart = hart32();
        assert!(hart.read_csr(csr::MSTATUS, PrivilegeLevel::Machine).is_ok());
        assert!(matches!(
            hart.read_csr(csr::MSTATUS, PrivilegeLevel::User),
            Err(CsrAccessError::Privileged { .. })
        ));
        assert!(hart.read_csr(csr::CYCLE, PrivilegeLevel::User).is_ok());
        assert!(matches!(
            hart.read_csr(0x5A8, PrivilegeLevel::Machine),
            Err(CsrAccessError::CsrUnsupported(_))
        ));
    }

    #[test]
    fn test_read_only_csr_write_fails() {
        let mut hart = hart32();
        assert!(matches!(
            hart.write_csr(csr::MVENDORID, PrivilegeLevel::Machine, 1, !0),
            Err(CsrWriteError::WriteToReadOnly)
        ));
        assert!(matches!(
            hart.write_csr(csr::CYCLE, PrivilegeLevel::Machine, 1, !0),
            Err(CsrWriteError::WriteToReadOnly)
        ));
    }

    #[test]
    fn test_high_half_counters_are_rv32_only() {
        let hart32 = hart32();
        assert!(hart32.peek_csr(csr::MCYCLEH).is_some());
        assert!(hart32.peek_csr(csr::CYCLEH).is_some());
        let hart64: Hart<u64> = Hart::new(Config::default());
        assert_eq!(None, hart64.peek_csr(csr::MCYCLEH));
        assert_eq!(None, hart64.peek_csr(csr::INSTRETH));
    }

    #[test]
    fn test_peek_poke_bounds() {
        let mut hart = hart32();
        assert!(hart.poke_int_reg(31, 7));
        assert_eq!(Some(7), hart.peek_int_reg(31));
        assert!(!hart.poke_int_reg(32, 7));
        assert_eq!(None, hart.peek_int_reg(32));
        // x0 pokes are accepted but discarded.
        assert!(hart.poke_int_reg(0, 7));
        assert_eq!(Some(0), hart.peek_int_reg(0));
        assert!(!hart.poke_memory_u32(4094, 0));
        assert_eq!(None, hart.peek_memory_u32(4094));
        assert!(hart.poke_memory_u32(4092, 0xAABBCCDD));
        assert_eq!(Some(0xAABBCCDD), hart.peek_memory_u32(4092));
    }

    #[test]
    fn test_find_by_name() {
        let hart = hart32();
        assert_eq!(Some(4), hart.find_int_reg("tp"));
        assert_eq!(Some(4), hart.find_int_reg("x4"));
        assert_eq!(None, hart.find_int_reg("frob"));
        assert_eq!(Some(csr::MEPC), hart.find_csr("mepc"));
        assert_eq!(None, hart.find_csr("sepc"));
    }
}

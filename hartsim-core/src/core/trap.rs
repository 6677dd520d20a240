//! Trap CSRs and the trap-entry sequence.

use log::trace;

use super::{Exception, Hart, Interrupt};
use crate::xlen::Xlen;
use crate::RawPrivilegeLevel;

/// The machine trap-handling registers.
///
/// All values are held in 64 bits regardless of XLEN; the hart truncates
/// reads to its register width.
#[derive(Debug, Clone)]
pub struct TrapCsrs {
    mscratch: u64,
    mepc: u64,
    mcause: u64,
    mtval: u64,
    mtvec: u64,
}

impl Default for TrapCsrs {
    fn default() -> Self {
        Self::new()
    }
}

impl TrapCsrs {
    pub fn new() -> Self {
        Self {
            mscratch: 0,
            mepc: 0,
            mcause: 0,
            mtval: 0,
            mtvec: 0,
        }
    }

    pub fn read_mscratch(&self) -> u64 {
        self.mscratch
    }

    pub fn write_mscratch(&mut self, value: u64, mask: u64) {
        self.mscratch = self.mscratch & !mask | value & mask;
    }

    pub fn read_mepc(&self) -> u64 {
        self.mepc
    }

    /// mepc is **WARL**: the low bit always reads as zero, since an IALIGN
    /// of 16 (C extension) makes bit 0 the only invalid pc bit.
    pub fn write_mepc(&mut self, value: u64, mask: u64) {
        self.mepc = self.mepc & !mask | value & mask;
        self.mepc &= !0b1;
    }

    pub fn read_mcause(&self) -> u64 {
        self.mcause
    }

    pub fn write_mcause(&mut self, value: u64, mask: u64) {
        self.mcause = self.mcause & !mask | value & mask;
    }

    pub fn read_mtval(&self) -> u64 {
        self.mtval
    }

    pub fn write_mtval(&mut self, value: u64, mask: u64) {
        self.mtval = self.mtval & !mask | value & mask;
    }

    pub fn read_mtvec(&self) -> u64 {
        self.mtvec
    }

    /// mtvec is **WARL**: only the Direct (0) and Vectored (1) modes are
    /// supported, so the reserved mode bit is hardwired to zero.
    pub fn write_mtvec(&mut self, value: u64, mask: u64) {
        self.mtvec = (self.mtvec & !mask | value & mask) & !0b10;
    }

    /// The trap-vector base address (mode bits masked off).
    pub fn mtvec_base(&self) -> u64 {
        self.mtvec & !0b11
    }

    /// `true` if mtvec selects Vectored mode.
    pub fn mtvec_vectored(&self) -> bool {
        self.mtvec & 0b11 == 1
    }
}

impl<X: Xlen> Hart<X> {
    /// Starts a synchronous exception.
    ///
    /// The pc saved in mepc is the address of the faulting instruction
    /// (`curr_pc`); mtval receives the exception's auxiliary value (the
    /// faulting address, the offending instruction bits, or zero).
    pub(crate) fn initiate_exception(&mut self, exception: &Exception) {
        trace!(
            "Taking exception {} (cause {}) at pc {:#x}",
            exception,
            exception.code(),
            self.curr_pc().to_u64(),
        );
        self.initiate_trap(false, exception.code(), self.curr_pc(), exception.trap_value());
    }

    /// Starts an asynchronous exception (interrupt).
    ///
    /// The pc saved in mepc is the address of the next instruction to
    /// execute, so that an xRET resumes exactly where the hart was
    /// interrupted.
    pub(crate) fn initiate_interrupt(&mut self, interrupt: Interrupt) {
        trace!(
            "Taking interrupt {:?} (cause {}) at pc {:#x}",
            interrupt,
            interrupt.code(),
            self.registers().pc().to_u64(),
        );
        self.initiate_trap(true, interrupt.code(), self.registers().pc(), 0);
    }

    /// Changes machine state and program counter in reaction to an
    /// exception or an interrupt:
    ///
    /// 1. mcause holds the cause code, with the interrupt bit in the MSB.
    /// 2. mtval holds the auxiliary trap value.
    /// 3. mepc holds the pc to save.
    /// 4. The interrupt-enable stack is pushed:
    ///    MPIE ← MIE, MIE ← 0, MPP ← current privilege.
    /// 5. The hart enters M-mode.
    /// 6. The pc is redirected to the trap vector; in Vectored mode,
    ///    interrupts target `base + 4 * cause`.
    fn initiate_trap(&mut self, interrupt: bool, code: u64, pc_to_save: X, value: u64) {
        let interrupt_bit = (interrupt as u64) << (X::BITS - 1);
        self.trap.write_mcause(interrupt_bit | code, !0);
        self.trap.write_mtval(value, !0);
        self.trap.write_mepc(pc_to_save.to_u64(), !0);

        let previous_interrupt_enable = self.status.mie();
        self.status.set_mpie(previous_interrupt_enable);
        self.status.set_mie(false);
        self.status
            .set_mpp(RawPrivilegeLevel::from(self.privilege_mode));
        self.privilege_mode = crate::PrivilegeLevel::Machine;

        let target = match interrupt && self.trap.mtvec_vectored() {
            false => self.trap.mtvec_base(),
            true => self.trap.mtvec_base().wrapping_add(4 * code),
        };
        self.registers_mut().set_pc(X::from_u64(target));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mepc_low_bit_reads_zero() {
        let mut trap = TrapCsrs::new();
        trap.write_mepc(0x1003, !0);
        assert_eq!(0x1002, trap.read_mepc());
    }

    #[test]
    fn test_mtvec_mode_warl() {
        let mut trap = TrapCsrs::new();
        trap.write_mtvec(0x8000_0001, !0);
        assert_eq!(0x8000_0001, trap.read_mtvec());
        assert!(trap.mtvec_vectored());
        assert_eq!(0x8000_0000, trap.mtvec_base());
        // The reserved mode bit cannot be set.
        trap.write_mtvec(0x8000_0002, !0);
        assert_eq!(0x8000_0000, trap.read_mtvec());
        assert!(!trap.mtvec_vectored());
        trap.write_mtvec(0x8000_0003, !0);
        assert_eq!(0x8000_0001, trap.read_mtvec());
    }

    #[test]
    fn test_masked_writes() {
        let mut trap = TrapCsrs::new();
        trap.write_mscratch(0xFFFF_FFFF, 0x0000_FFFF);
        assert_eq!(0x0000_FFFF, trap.read_mscratch());
        trap.write_mcause(0xB, !0);
        trap.write_mcause(0x2, 0x3);
        assert_eq!(0xA, trap.read_mcause());
    }
}

//! The mie/mip registers and interrupt selection.

use bitvec::{array::BitArray, field::BitField, order::Lsb0};
use log::trace;

use super::{Hart, Interrupt};
use crate::xlen::Xlen;
use crate::PrivilegeLevel;

const USER_SOFTWARE_INTERRUPT: usize = Interrupt::UserSoftwareInterrupt as usize;
const SUPERVISOR_SOFTWARE_INTERRUPT: usize = Interrupt::SupervisorSoftwareInterrupt as usize;
const MACHINE_SOFTWARE_INTERRUPT: usize = Interrupt::MachineSoftwareInterrupt as usize;
const USER_TIMER_INTERRUPT: usize = Interrupt::UserTimerInterrupt as usize;
const SUPERVISOR_TIMER_INTERRUPT: usize = Interrupt::SupervisorTimerInterrupt as usize;
const MACHINE_TIMER_INTERRUPT: usize = Interrupt::MachineTimerInterrupt as usize;
const USER_EXTERNAL_INTERRUPT: usize = Interrupt::UserExternalInterrupt as usize;
const SUPERVISOR_EXTERNAL_INTERRUPT: usize = Interrupt::SupervisorExternalInterrupt as usize;
const MACHINE_EXTERNAL_INTERRUPT: usize = Interrupt::MachineExternalInterrupt as usize;

#[allow(clippy::identity_op)]
const VALID_INTERRUPTS_MASK: u16 = 0
    | (1 << USER_SOFTWARE_INTERRUPT)
    | (1 << SUPERVISOR_SOFTWARE_INTERRUPT)
    | (1 << MACHINE_SOFTWARE_INTERRUPT)
    | (1 << USER_TIMER_INTERRUPT)
    | (1 << SUPERVISOR_TIMER_INTERRUPT)
    | (1 << MACHINE_TIMER_INTERRUPT)
    | (1 << USER_EXTERNAL_INTERRUPT)
    | (1 << SUPERVISOR_EXTERNAL_INTERRUPT)
    | (1 << MACHINE_EXTERNAL_INTERRUPT);

/// The M-level pending bits are controlled by the platform (for this
/// simulator: the host-signal plumbing), not by guest stores to mip.
#[allow(clippy::identity_op)]
const GUEST_WRITABLE_MIP_MASK: u16 = 0
    | (1 << USER_SOFTWARE_INTERRUPT)
    | (1 << SUPERVISOR_SOFTWARE_INTERRUPT)
    | (1 << USER_TIMER_INTERRUPT)
    | (1 << SUPERVISOR_TIMER_INTERRUPT)
    | (1 << USER_EXTERNAL_INTERRUPT)
    | (1 << SUPERVISOR_EXTERNAL_INTERRUPT);

/// Standard priority order when multiple interrupts are pending.
///
/// > Multiple simultaneous interrupts destined for different privilege modes
/// > are handled in decreasing order of destined privilege mode. Multiple
/// > simultaneous interrupts destined for the same privilege mode are
/// > handled in the following decreasing priority order: MEI, MSI, MTI,
/// > SEI, SSI, STI, UEI, USI, UTI.
const PRIORITY_ORDER: [Interrupt; 9] = [
    Interrupt::MachineExternalInterrupt,
    Interrupt::MachineSoftwareInterrupt,
    Interrupt::MachineTimerInterrupt,
    Interrupt::SupervisorExternalInterrupt,
    Interrupt::SupervisorSoftwareInterrupt,
    Interrupt::SupervisorTimerInterrupt,
    Interrupt::UserExternalInterrupt,
    Interrupt::UserSoftwareInterrupt,
    Interrupt::UserTimerInterrupt,
];

/// Interrupt-pending and interrupt-enable state.
#[derive(Debug, Clone)]
pub struct Interrupts {
    /// The mip register.
    mip: BitArray<[u16; 1], Lsb0>,
    /// The mie register.
    mie: BitArray<[u16; 1], Lsb0>,
}

impl Default for Interrupts {
    fn default() -> Self {
        Self::new()
    }
}

impl Interrupts {
    pub fn new() -> Self {
        Self {
            mip: BitArray::new([0x0000]),
            mie: BitArray::new([0x0000]),
        }
    }

    /// Indicate whether there is an M-level external interrupt pending
    /// (MEIP).
    ///
    /// Raised by the host-signal plumbing (SIGUSR2) and lowered when the
    /// interrupt is taken by the trap handler's source.
    pub fn set_m_external(&mut self, value: bool) {
        trace!("Setting mip.MEIP to {value}");
        self.mip.set(MACHINE_EXTERNAL_INTERRUPT, value);
    }

    /// Indicate whether there is an M-level timer interrupt pending (MTIP).
    pub fn set_m_timer(&mut self, value: bool) {
        trace!("Setting mip.MTIP to {value}");
        self.mip.set(MACHINE_TIMER_INTERRUPT, value);
    }

    /// Indicate whether an M-level software interrupt is pending (MSIP).
    pub fn set_m_software(&mut self, value: bool) {
        trace!("Setting mip.MSIP to {value}");
        self.mip.set(MACHINE_SOFTWARE_INTERRUPT, value);
    }

    pub fn read_mip(&self) -> u64 {
        self.mip.load_le::<u16>() as u64
    }

    /// Guest-visible mip write. The M-level pending bits are managed
    /// externally and ignore guest writes.
    pub fn write_mip(&mut self, value: u64, mask: u64) {
        let mask = mask as u16 & GUEST_WRITABLE_MIP_MASK;
        let mip = self.mip.load_le::<u16>();
        self.mip.store_le(mip & !mask | value as u16 & mask);
    }

    pub fn read_mie(&self) -> u64 {
        self.mie.load_le::<u16>() as u64
    }

    /// mie is **WARL**: only the bits of implemented interrupt sources can
    /// be set.
    pub fn write_mie(&mut self, value: u64, mask: u64) {
        let mask = mask as u16 & VALID_INTERRUPTS_MASK;
        let mie = self.mie.load_le::<u16>();
        self.mie.store_le(mie & !mask | value as u16 & mask);
    }

    /// Returns `Some(interrupt)` if an interrupt is both pending in mip and
    /// enabled in mie. If there are multiple, `interrupt` is the one with
    /// the highest priority.
    pub fn highest_priority_ready(&self) -> Option<Interrupt> {
        let ready = self.mip & self.mie;
        PRIORITY_ORDER.into_iter().find(|&i| ready[i as usize])
    }
}

impl<X: Xlen> Hart<X> {
    /// The interrupt to deliver at the next instruction boundary, if any.
    ///
    /// All traps target M-mode (there is no delegation), so interrupts are
    /// globally enabled whenever the hart runs below M-mode, and gated on
    /// mstatus.MIE in M-mode itself.
    pub(crate) fn pending_interrupt(&self) -> Option<Interrupt> {
        if self.privilege_mode() == PrivilegeLevel::Machine && !self.status.mie() {
            return None;
        }
        self.interrupts.highest_priority_ready()
    }
}

//! The mstatus register.

use bitvec::{field::BitField, order::Lsb0, view::BitView};

use crate::{PrivilegeLevel, RawPrivilegeLevel};

/// Provides the mstatus register.
///
/// > The mstatus register is an MXLEN-bit read/write register [...]. The
/// > mstatus register keeps track of and controls the hart's current
/// > operating state.
///
/// The register is held in 64 bits regardless of XLEN; the hart truncates
/// reads to its register width. Only the interrupt-stack fields
/// (xIE/xPIE/xPP) are implemented; the remaining fields are WPRI here and
/// read as zero.
#[derive(Debug, Clone)]
pub struct Status {
    mstatus: u64,
}

impl Default for Status {
    fn default() -> Self {
        Self::new()
    }
}

impl Status {
    pub fn new() -> Self {
        Self {
            mstatus: 0x0000_0000,
        }
    }

    /// Returns the raw register value.
    pub fn read(&self) -> u64 {
        self.mstatus
    }

    /// Returns `true` if the MIE (M-mode Interrupt Enable) bit is set.
    pub fn mie(&self) -> bool {
        self.mstatus.view_bits::<Lsb0>()[idx::MIE]
    }

    /// Sets the MIE (M-mode Interrupt Enable) bit to `value`.
    pub fn set_mie(&mut self, value: bool) {
        self.mstatus.view_bits_mut::<Lsb0>().set(idx::MIE, value);
    }

    /// Returns `true` if the SIE (S-mode Interrupt Enable) bit is set.
    pub fn sie(&self) -> bool {
        self.mstatus.view_bits::<Lsb0>()[idx::SIE]
    }

    /// Sets the SIE (S-mode Interrupt Enable) bit to `value`.
    pub fn set_sie(&mut self, value: bool) {
        self.mstatus.view_bits_mut::<Lsb0>().set(idx::SIE, value);
    }

    /// Returns `true` if the UIE (U-mode Interrupt Enable) bit is set.
    pub fn uie(&self) -> bool {
        self.mstatus.view_bits::<Lsb0>()[idx::UIE]
    }

    /// Sets the UIE (U-mode Interrupt Enable) bit to `value`.
    pub fn set_uie(&mut self, value: bool) {
        self.mstatus.view_bits_mut::<Lsb0>().set(idx::UIE, value);
    }

    /// Returns `true` if the MPIE (M-mode Previous Interrupt Enable) bit is
    /// set.
    pub fn mpie(&self) -> bool {
        self.mstatus.view_bits::<Lsb0>()[idx::MPIE]
    }

    /// Sets the MPIE (M-mode Previous Interrupt Enable) bit to `value`.
    pub fn set_mpie(&mut self, value: bool) {
        self.mstatus.view_bits_mut::<Lsb0>().set(idx::MPIE, value);
    }

    /// Returns `true` if the SPIE (S-mode Previous Interrupt Enable) bit is
    /// set.
    pub fn spie(&self) -> bool {
        self.mstatus.view_bits::<Lsb0>()[idx::SPIE]
    }

    /// Sets the SPIE (S-mode Previous Interrupt Enable) bit to `value`.
    pub fn set_spie(&mut self, value: bool) {
        self.mstatus.view_bits_mut::<Lsb0>().set(idx::SPIE, value);
    }

    /// Returns the privilege level encoded by the MPP (M-mode Previous
    /// Privilege level) field.
    ///
    /// The MPP field is **WARL**, so this is always a defined level.
    pub fn mpp(&self) -> PrivilegeLevel {
        RawPrivilegeLevel::from_u2(
            self.mstatus.view_bits::<Lsb0>()[idx::MPP..(idx::MPP + 2)].load_le(),
        )
        .try_into()
        .unwrap()
    }

    /// Sets the privilege level encoded by the MPP (M-mode Previous
    /// Privilege level) field to `value`.
    ///
    /// The MPP field is **WARL**; writes of the reserved level are ignored.
    pub fn set_mpp(&mut self, value: RawPrivilegeLevel) {
        let Ok(value) = PrivilegeLevel::try_from(value) else {
            return;
        };
        self.mstatus.view_bits_mut::<Lsb0>()[idx::MPP..(idx::MPP + 2)].store_le(value as u8);
    }

    /// Returns the privilege level encoded by the SPP (S-mode Previous
    /// Privilege level) field.
    pub fn spp(&self) -> PrivilegeLevel {
        match self.mstatus.view_bits::<Lsb0>()[idx::SPP] {
            false => PrivilegeLevel::User,
            true => PrivilegeLevel::Supervisor,
        }
    }

    /// Sets the privilege level encoded by the SPP (S-mode Previous
    /// Privilege level) field to `value`.
    ///
    /// The SPP field is **WARL**; levels above Supervisor are ignored.
    pub fn set_spp(&mut self, value: RawPrivilegeLevel) {
        match PrivilegeLevel::try_from(value) {
            Ok(value) if value <= PrivilegeLevel::Supervisor => {
                let bit = value as u8 != 0;
                self.mstatus.view_bits_mut::<Lsb0>().set(idx::SPP, bit);
            }
            _ => {}
        };
    }

    /// Applies a masked write, updating each implemented field through its
    /// setter so WARL fields are treated correctly. WPRI bits are ignored.
    pub fn write(&mut self, value: u64, mask: u64) {
        let mask_bits = mask.view_bits::<Lsb0>();
        let updated = self.mstatus & !mask | value & mask;
        let updated_bits = updated.view_bits::<Lsb0>();

        let uie = updated_bits[idx::UIE];
        let sie = updated_bits[idx::SIE];
        let mie = updated_bits[idx::MIE];
        let upie = updated_bits[idx::UPIE];
        let spie = updated_bits[idx::SPIE];
        let mpie = updated_bits[idx::MPIE];
        let spp = RawPrivilegeLevel::from_u2(updated_bits[idx::SPP] as u8);
        let mpp = RawPrivilegeLevel::from_u2(updated_bits[idx::MPP..(idx::MPP + 2)].load_le());

        if mask_bits[idx::UIE] {
            self.set_uie(uie);
        }
        if mask_bits[idx::SIE] {
            self.set_sie(sie);
        }
        if mask_bits[idx::MIE] {
            self.set_mie(mie);
        }
        if mask_bits[idx::UPIE] {
            self.set_upie(upie);
        }
        if mask_bits[idx::SPIE] {
            self.set_spie(spie);
        }
        if mask_bits[idx::MPIE] {
            self.set_mpie(mpie);
        }
        if mask_bits[idx::SPP] {
            self.set_spp(spp);
        }
        if mask_bits[idx::MPP] | mask_bits[idx::MPP + 1] {
            self.set_mpp(mpp);
        }
    }

    /// Returns `true` if the UPIE (U-mode Previous Interrupt Enable) bit is
    /// set.
    pub fn upie(&self) -> bool {
        self.mstatus.view_bits::<Lsb0>()[idx::UPIE]
    }

    /// Sets the UPIE (U-mode Previous Interrupt Enable) bit to `value`.
    pub fn set_upie(&mut self, value: bool) {
        self.mstatus.view_bits_mut::<Lsb0>().set(idx::UPIE, value);
    }
}

/// Bit indices into the mstatus register.
mod idx {
    pub const UIE: usize = 0;
    pub const SIE: usize = 1;
    pub const MIE: usize = 3;
    pub const UPIE: usize = 4;
    pub const SPIE: usize = 5;
    pub const MPIE: usize = 7;
    pub const SPP: usize = 8;
    pub const MPP: usize = 11;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_value() {
        let status = Status::new();
        assert_eq!(0, status.read());
        assert!(!status.mie());
        assert_eq!(PrivilegeLevel::User, status.mpp());
    }

    #[test]
    fn test_mpp_warl() {
        let mut status = Status::new();
        status.set_mpp(RawPrivilegeLevel::Machine);
        assert_eq!(PrivilegeLevel::Machine, status.mpp());
        // Writes of the reserved level are ignored.
        status.set_mpp(RawPrivilegeLevel::Reserved);
        assert_eq!(PrivilegeLevel::Machine, status.mpp());
        status.set_mpp(RawPrivilegeLevel::User);
        assert_eq!(PrivilegeLevel::User, status.mpp());
    }

    #[test]
    fn test_masked_write() {
        let mut status = Status::new();
        // Set MIE and MPP = M in one masked write.
        status.write(0x1888, !0);
        assert!(status.mie());
        assert!(status.mpie());
        assert_eq!(PrivilegeLevel::Machine, status.mpp());
        // A write whose mask does not cover MIE leaves it unchanged.
        status.write(0, 1 << 1);
        assert!(status.mie());
        assert!(!status.sie());
        // WPRI bits read as zero even if written.
        status.write(!0, !0);
        assert_eq!(0, status.read() & !0x19BB);
    }
}

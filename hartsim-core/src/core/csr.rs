//! Specifiers for all supported CSRs.
//!
//! Only the machine-mode registers of a single M/U-capable hart are
//! implemented; debug-mode, hypervisor, and supervisor trap-setup CSRs are
//! not supported.

use crate::RawPrivilegeLevel;

/// General 12-bit value representing a CSR specifier. Note that this can
/// hold any 12-bit value, even if the value represents an unsupported or
/// non-existent CSR.
pub type CsrSpecifier = u16;

//
// Unprivileged counters/timers (`0xC00..=0xC1F`, `0xC80..=0xC9F`).
//
/// Cycle counter for RDCYCLE instruction.
pub const CYCLE: CsrSpecifier = 0xC00;
/// Timer for RDTIME instruction.
pub const TIME: CsrSpecifier = 0xC01;
/// Instructions-retired counter for RDINSTRET instruction.
pub const INSTRET: CsrSpecifier = 0xC02;
/// First performance-monitoring counter.
pub const HPMCOUNTER3: CsrSpecifier = 0xC03;
/// Last performance-monitoring counter.
pub const HPMCOUNTER31: CsrSpecifier = 0xC1F;
/// Upper 32 bits of [`CYCLE`], RV32 only.
pub const CYCLEH: CsrSpecifier = 0xC80;
/// Upper 32 bits of [`TIME`], RV32 only.
pub const TIMEH: CsrSpecifier = 0xC81;
/// Upper 32 bits of [`INSTRET`], RV32 only.
pub const INSTRETH: CsrSpecifier = 0xC82;
/// Upper 32 bits of [`HPMCOUNTER3`], RV32 only.
pub const HPMCOUNTER3H: CsrSpecifier = 0xC83;
/// Upper 32 bits of [`HPMCOUNTER31`], RV32 only.
pub const HPMCOUNTER31H: CsrSpecifier = 0xC9F;

//
// Machine information registers (`0xF11..=0xF14`).
//
/// Vendor ID.
pub const MVENDORID: CsrSpecifier = 0xF11;
/// Architecture ID.
pub const MARCHID: CsrSpecifier = 0xF12;
/// Implementation ID.
pub const MIMPID: CsrSpecifier = 0xF13;
/// Hardware thread ID.
pub const MHARTID: CsrSpecifier = 0xF14;

//
// Machine trap setup (`0x300..=0x305`).
//
/// Machine status register.
pub const MSTATUS: CsrSpecifier = 0x300;
/// ISA and extensions.
pub const MISA: CsrSpecifier = 0x301;
/// Machine interrupt-enable register.
pub const MIE: CsrSpecifier = 0x304;
/// Machine trap-handler base address.
pub const MTVEC: CsrSpecifier = 0x305;

//
// Machine trap handling (`0x340..=0x344`).
//
/// Scratch register for machine trap handlers.
pub const MSCRATCH: CsrSpecifier = 0x340;
/// Machine exception program counter.
pub const MEPC: CsrSpecifier = 0x341;
/// Machine trap cause.
pub const MCAUSE: CsrSpecifier = 0x342;
/// Machine bad address or instruction.
pub const MTVAL: CsrSpecifier = 0x343;
/// Machine interrupt pending.
pub const MIP: CsrSpecifier = 0x344;

//
// Machine counters/timers (`0xB00`, `0xB02`, `0xB80`, `0xB82`, and the
// hpm groups).
//
/// Machine cycle counter.
pub const MCYCLE: CsrSpecifier = 0xB00;
/// Machine instructions-retired counter.
pub const MINSTRET: CsrSpecifier = 0xB02;
/// First machine performance-monitoring counter.
pub const MHPMCOUNTER3: CsrSpecifier = 0xB03;
/// Last machine performance-monitoring counter.
pub const MHPMCOUNTER31: CsrSpecifier = 0xB1F;
/// Upper 32 bits of [`MCYCLE`], RV32 only.
pub const MCYCLEH: CsrSpecifier = 0xB80;
/// Upper 32 bits of [`MINSTRET`], RV32 only.
pub const MINSTRETH: CsrSpecifier = 0xB82;
/// Upper 32 bits of [`MHPMCOUNTER3`], RV32 only.
pub const MHPMCOUNTER3H: CsrSpecifier = 0xB83;
/// Upper 32 bits of [`MHPMCOUNTER31`], RV32 only.
pub const MHPMCOUNTER31H: CsrSpecifier = 0xB9F;
/// First machine performance-monitoring event selector.
pub const MHPMEVENT3: CsrSpecifier = 0x323;
/// Last machine performance-monitoring event selector.
pub const MHPMEVENT31: CsrSpecifier = 0x33F;

/// Returns `true` if `specifier` is valid, which is the case if it fits in
/// 12 bits.
pub fn is_valid(specifier: CsrSpecifier) -> bool {
    specifier < 1 << 12
}

/// Returns `true` if this CSR only supports read access.
///
/// Requires [`is_valid(specifier)`](is_valid), otherwise the return value is
/// undefined.
pub fn is_read_only(specifier: CsrSpecifier) -> bool {
    // The top two bits of a CSR specifier indicate whether the CSR is
    // read-only (0b11) or read/write (0b00, 0b01, 0b10).
    specifier >> 10 == 0b11
}

/// Returns the minimum required privilege level to access this CSR.
///
/// Requires [`is_valid(specifier)`](is_valid), otherwise the return value is
/// undefined.
///
/// Note that this returns a [`RawPrivilegeLevel`], meaning the minimum
/// required privilege level may be a reserved level. This still has a
/// defined meaning: only higher privilege levels are allowed to access the
/// CSR.
pub fn required_privilege_level(specifier: CsrSpecifier) -> RawPrivilegeLevel {
    // Bits `9:8` indicate the minimum required privilege level.
    RawPrivilegeLevel::from_u2(((specifier >> 8) & 0b11) as u8)
}

/// Returns the conventional lowercase name of a supported CSR, or `None`
/// for specifiers this engine does not implement.
pub fn name(specifier: CsrSpecifier) -> Option<&'static str> {
    Some(match specifier {
        CYCLE => "cycle",
        TIME => "time",
        INSTRET => "instret",
        CYCLEH => "cycleh",
        TIMEH => "timeh",
        INSTRETH => "instreth",
        MVENDORID => "mvendorid",
        MARCHID => "marchid",
        MIMPID => "mimpid",
        MHARTID => "mhartid",
        MSTATUS => "mstatus",
        MISA => "misa",
        MIE => "mie",
        MTVEC => "mtvec",
        MSCRATCH => "mscratch",
        MEPC => "mepc",
        MCAUSE => "mcause",
        MTVAL => "mtval",
        MIP => "mip",
        MCYCLE => "mcycle",
        MINSTRET => "minstret",
        MCYCLEH => "mcycleh",
        MINSTRETH => "minstreth",
        _ => return None,
    })
}

/// Looks up a supported CSR by its conventional lowercase name.
pub fn find_by_name(csr_name: &str) -> Option<CsrSpecifier> {
    const NAMED: &[CsrSpecifier] = &[
        CYCLE, TIME, INSTRET, CYCLEH, TIMEH, INSTRETH, MVENDORID, MARCHID, MIMPID, MHARTID,
        MSTATUS, MISA, MIE, MTVEC, MSCRATCH, MEPC, MCAUSE, MTVAL, MIP, MCYCLE, MINSTRET, MCYCLEH,
        MINSTRETH,
    ];
    NAMED
        .iter()
        .copied()
        .find(|&specifier| name(specifier) == Some(csr_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PrivilegeLevel;

    #[test]
    fn test_permission_encoding() {
        assert!(is_read_only(MVENDORID));
        assert!(is_read_only(CYCLE));
        assert!(is_read_only(TIMEH));
        assert!(!is_read_only(MSTATUS));
        assert!(!is_read_only(MCYCLE));
        assert_eq!(
            RawPrivilegeLevel::Machine,
            required_privilege_level(MSTATUS)
        );
        assert_eq!(RawPrivilegeLevel::Machine, required_privilege_level(MEPC));
        assert_eq!(RawPrivilegeLevel::User, required_privilege_level(CYCLE));
        assert!(PrivilegeLevel::User < required_privilege_level(MSTATUS));
    }

    #[test]
    fn test_names_round_trip() {
        assert_eq!(Some(MSTATUS), find_by_name("mstatus"));
        assert_eq!(Some(MEPC), find_by_name("mepc"));
        assert_eq!(Some("mtvec"), name(MTVEC));
        assert_eq!(None, find_by_name("stvec"));
        assert_eq!(None, name(0x5A8));
        for specifier in [MSTATUS, MISA, MIE, MTVEC, MEPC, MCAUSE, MTVAL, MIP] {
            let n = name(specifier).unwrap();
            assert_eq!(Some(specifier), find_by_name(n));
        }
    }
}

//! Whole-hart execution scenarios.

use hartsim_core::core::{
    csr, Config, Hart, HostSignals, StepResult, StopReason, WriteBack,
};
use hartsim_core::xlen::Xlen;
use hartsim_core::PrivilegeLevel;

fn hart32() -> Hart<u32> {
    Hart::new(Config {
        hart_id: 0,
        memory_size: 1 << 16,
        reset_vector: 0,
    })
}

fn hart64() -> Hart<u64> {
    Hart::new(Config {
        hart_id: 0,
        memory_size: 1 << 16,
        reset_vector: 0,
    })
}

fn load_words<X: Xlen>(hart: &mut Hart<X>, words: &[u32]) {
    for (index, word) in words.iter().enumerate() {
        assert!(hart.poke_memory_u32(4 * index as u64, *word));
    }
}

fn step_n<X: Xlen>(hart: &mut Hart<X>, steps: usize) {
    for _ in 0..steps {
        hart.step();
    }
}

fn reg<X: Xlen>(hart: &Hart<X>, index: u8) -> u64 {
    hart.peek_int_reg(index).unwrap().to_u64()
}

fn csr_value<X: Xlen>(hart: &Hart<X>, specifier: csr::CsrSpecifier) -> u64 {
    hart.peek_csr(specifier).unwrap().to_u64()
}

/// Spec scenario: an ADDI chain terminated by EBREAK. After the breakpoint
/// trap, the results are architecturally visible and the trap CSRs point at
/// the ebreak.
#[test]
fn addi_chain_with_ebreak() {
    let mut hart = hart32();
    load_words(
        &mut hart,
        &[
            0x0050_0093, // addi x1, x0, 5
            0x0070_8113, // addi x2, x1, 7
            0xFFE1_0193, // addi x3, x2, -2
            0x0010_0073, // ebreak
        ],
    );
    step_n(&mut hart, 4);
    assert_eq!(5, reg(&hart, 1));
    assert_eq!(12, reg(&hart, 2));
    assert_eq!(10, reg(&hart, 3));
    assert_eq!(3, csr_value(&hart, csr::MCAUSE));
    assert_eq!(0x0C, csr_value(&hart, csr::MEPC));
    // intRegs[0] is still zero and pc sits at the (direct-mode) trap
    // vector, which is zero by reset.
    assert_eq!(0, reg(&hart, 0));
    assert_eq!(0, hart.peek_pc());
}

/// Spec scenario: signed division overflow returns the dividend without
/// trapping.
#[test]
fn signed_division_overflow() {
    let mut hart = hart32();
    load_words(
        &mut hart,
        &[
            0x8000_00B7, // lui x1, 0x80000
            0x0000_5113, // srli x2, x0, 0
            0xFFF0_0113, // addi x2, x0, -1
            0x0220_C1B3, // div x3, x1, x2
        ],
    );
    step_n(&mut hart, 4);
    assert_eq!(0x8000_0000, reg(&hart, 1));
    assert_eq!(0x8000_0000, reg(&hart, 3));
    // No trap was taken.
    assert_eq!(0, csr_value(&hart, csr::MCAUSE));
    assert_eq!(4, hart.retired_instructions());
}

/// Spec scenario: division by zero yields all-ones quotient and the
/// dividend as remainder, with no trap.
#[test]
fn divide_by_zero() {
    let mut hart = hart32();
    load_words(
        &mut hart,
        &[
            0x02A0_0093, // addi x1, x0, 42
            0x0000_0113, // addi x2, x0, 0
            0x0220_C1B3, // div x3, x1, x2
            0x0220_E233, // rem x4, x1, x2
        ],
    );
    step_n(&mut hart, 4);
    assert_eq!(0xFFFF_FFFF, reg(&hart, 3));
    assert_eq!(42, reg(&hart, 4));
    assert_eq!(0, csr_value(&hart, csr::MCAUSE));
}

/// Spec scenario: CSRRW always writes, so `csrrw x0, mvendorid, x0` traps
/// with ILLEGAL_INST even though the read is suppressed.
#[test]
fn write_to_read_only_csr_traps() {
    let mut hart = hart32();
    load_words(&mut hart, &[0xF110_1073]); // csrrw x0, mvendorid, x0
    match hart.step() {
        StepResult::Trapped(_) => {}
        StepResult::Retired(retired) => panic!("expected a trap, retired {retired:?}"),
    }
    assert_eq!(2, csr_value(&hart, csr::MCAUSE));
    assert_eq!(0xF110_1073, csr_value(&hart, csr::MTVAL));
    assert_eq!(0, csr_value(&hart, csr::MEPC));
    // The read-only CSR is unchanged.
    assert_eq!(0, csr_value(&hart, csr::MVENDORID));
}

/// CSRRS with rs1=x0 suppresses the write, so reading a read-only CSR that
/// way does not trap.
#[test]
fn read_only_csr_read_does_not_trap() {
    let mut hart = hart32();
    load_words(&mut hart, &[0xF110_2573]); // csrrs x10, mvendorid, x0
    match hart.step() {
        StepResult::Retired(_) => {}
        StepResult::Trapped(exception) => panic!("unexpected trap: {exception}"),
    }
    assert_eq!(0, reg(&hart, 10));
    assert_eq!(1, hart.retired_instructions());
}

/// Spec scenario: a compressed c.addi executes identically to its 32-bit
/// expansion, advancing pc by 2.
#[test]
fn compressed_addi() {
    let mut hart = hart32();
    assert!(hart.poke_memory_u16(0, 0x0505)); // c.addi a0, 1
    match hart.step() {
        StepResult::Retired(retired) => {
            assert_eq!(2, retired.size);
            assert_eq!(0x0505, retired.instruction);
        }
        StepResult::Trapped(exception) => panic!("unexpected trap: {exception}"),
    }
    assert_eq!(1, reg(&hart, 10));
    assert_eq!(2, hart.peek_pc());
}

/// Spec scenario: a store to the configured tohost address terminates the
/// run after the store retires and is visible in memory.
#[test]
fn tohost_termination() {
    let mut hart = hart32();
    load_words(
        &mut hart,
        &[
            0x0000_10B7, // lui x1, 1
            0x0010_0113, // addi x2, x0, 1
            0x0020_A023, // sw x2, 0(x1)
        ],
    );
    hart.set_to_host_address(0x1000);
    let signals = HostSignals::new();
    let reason = hart.run(&signals, None);
    assert_eq!(StopReason::ToHostWrite, reason);
    assert_eq!(Some(1), hart.peek_memory_u32(0x1000));
    assert_eq!(3, hart.retired_instructions());
}

/// The stop address terminates the run before the instruction at that
/// address executes.
#[test]
fn stop_address_termination() {
    let mut hart = hart32();
    load_words(
        &mut hart,
        &[
            0x0050_0093, // addi x1, x0, 5
            0x0070_8113, // addi x2, x1, 7
            0x0000_0013, // nop
        ],
    );
    hart.set_stop_address(8);
    let signals = HostSignals::new();
    assert_eq!(StopReason::StopAddress, hart.run(&signals, None));
    assert_eq!(8, hart.peek_pc());
    assert_eq!(2, hart.retired_instructions());
}

/// A SIGTERM-style host signal stops the loop between instructions.
#[test]
fn host_signal_termination() {
    let mut hart = hart32();
    // An infinite loop: jal x0, 0.
    load_words(&mut hart, &[0x0000_006F]);
    let signals = HostSignals::new();
    signals.request_terminate();
    assert_eq!(StopReason::HostSignal, hart.run(&signals, None));
}

/// A SIGUSR2-style host signal raises mip.MEIP; with MIE and MEIE set, the
/// guest observes a clean external-interrupt trap with mepc holding the
/// address of the next uninterrupted instruction.
#[test]
fn external_interrupt_delivery() {
    let mut hart = hart32();
    load_words(
        &mut hart,
        &[
            0x0000_0013, // 0x00: nop
            0x0000_0013, // 0x04: nop (interrupted before executing)
        ],
    );
    // Handler at 0x40: a store to tohost (0x1000) to end the run.
    assert!(hart.poke_memory_u32(0x40, 0x0000_10B7)); // lui x1, 1
    assert!(hart.poke_memory_u32(0x44, 0x0020_A023)); // sw x2, 0(x1)
    assert!(hart.poke_csr(csr::MTVEC, 0x40));
    assert!(hart.poke_csr(csr::MIE, 1 << 11)); // MEIE
    assert!(hart.poke_csr(csr::MSTATUS, 1 << 3)); // MIE
    hart.set_to_host_address(0x1000);

    let signals = HostSignals::new();
    // Let one instruction retire, then raise the interrupt.
    hart.step();
    signals.request_external_interrupt();
    assert_eq!(StopReason::ToHostWrite, hart.run(&signals, None));

    assert_eq!(0x8000_000B, csr_value(&hart, csr::MCAUSE));
    assert_eq!(0x04, csr_value(&hart, csr::MEPC));
    // Trap entry pushed the interrupt-enable stack.
    let mstatus = csr_value(&hart, csr::MSTATUS);
    assert_eq!(0, mstatus & (1 << 3)); // MIE cleared
    assert_ne!(0, mstatus & (1 << 7)); // MPIE holds the old MIE
}

/// Vectored mtvec mode sends interrupts to base + 4 * cause. The external
/// interrupt is raised through the host-signal path, so delivery happens in
/// [`Hart::run`]'s signal polling.
#[test]
fn vectored_interrupt_dispatch() {
    let mut hart = hart32();
    load_words(&mut hart, &[0x0000_0013]); // 0x00: nop (never reached)
    assert!(hart.poke_csr(csr::MTVEC, 0x80 | 1)); // vectored
    assert!(hart.poke_csr(csr::MIE, 1 << 11)); // MEIE
    assert!(hart.poke_csr(csr::MSTATUS, 1 << 3)); // MIE
    // MEIP delivery must land exactly at 0x80 + 4 * 11 = 0xAC, where the
    // only instruction is a store to tohost that ends the run.
    assert!(hart.poke_int_reg(1, 0x1000));
    assert!(hart.poke_memory_u32(0xAC, 0x0020_A023)); // sw x2, 0(x1)
    hart.set_to_host_address(0x1000);

    let signals = HostSignals::new();
    signals.request_external_interrupt();
    assert_eq!(StopReason::ToHostWrite, hart.run(&signals, None));

    assert_eq!(0x8000_000B, csr_value(&hart, csr::MCAUSE));
    // The interrupt fired before the nop at 0 could retire.
    assert_eq!(0, csr_value(&hart, csr::MEPC));
    // pc advanced past the handler's store at 0xAC, proving entry there.
    assert_eq!(0xB0, hart.peek_pc());
    assert_eq!(1, hart.retired_instructions());
}

/// In vectored mode only interrupts are vectored; synchronous exceptions
/// still enter at the base.
#[test]
fn vectored_exception_enters_at_base() {
    let mut hart = hart32();
    load_words(&mut hart, &[0x0010_0073]); // ebreak
    assert!(hart.poke_csr(csr::MTVEC, 0x80 | 1)); // vectored
    hart.step();
    assert_eq!(3, csr_value(&hart, csr::MCAUSE));
    // Not base + 4 * 3.
    assert_eq!(0x80, hart.peek_pc());
}

/// MRET returns to mepc, restores the stacked interrupt enable, and drops
/// back to the previous privilege mode.
#[test]
fn mret_round_trip() {
    let mut hart = hart32();
    load_words(
        &mut hart,
        &[
            0x0010_0073, // 0x00: ebreak
            0x0000_0013, // 0x04: nop
        ],
    );
    assert!(hart.poke_csr(csr::MTVEC, 0x100));
    assert!(hart.poke_memory_u32(0x100, 0x3020_0073)); // mret
    hart.step(); // ebreak -> trap
    assert_eq!(0x100, hart.peek_pc());
    assert_eq!(PrivilegeLevel::Machine, hart.privilege_mode());
    assert!(hart.poke_csr(csr::MEPC, 0x04));
    hart.step(); // mret
    assert_eq!(0x04, hart.peek_pc());
    assert_eq!(PrivilegeLevel::Machine, hart.privilege_mode());
}

/// Misaligned loads raise LOAD_ADDR_MISALIGNED with the bad address in
/// mtval, before memory is touched.
#[test]
fn misaligned_load_traps() {
    let mut hart = hart32();
    load_words(
        &mut hart,
        &[
            0x0010_0093, // addi x1, x0, 1
            0x0000_A103, // lw x2, 0(x1)
        ],
    );
    step_n(&mut hart, 2);
    assert_eq!(4, csr_value(&hart, csr::MCAUSE));
    assert_eq!(1, csr_value(&hart, csr::MTVAL));
    assert_eq!(4, csr_value(&hart, csr::MEPC));
}

/// An out-of-range store raises STORE_ACCESS_FAULT and the memory image is
/// unchanged.
#[test]
fn out_of_range_store_faults() {
    let mut hart = hart32();
    load_words(
        &mut hart,
        &[
            0x0010_0137, // lui x2, 0x100 (0x100000, beyond 64 KiB)
            0x0001_0223, // sb x0, 4(x2)
        ],
    );
    step_n(&mut hart, 2);
    assert_eq!(7, csr_value(&hart, csr::MCAUSE));
    assert_eq!(0x0010_0004, csr_value(&hart, csr::MTVAL));
}

/// Fetching from an odd pc raises INST_ADDR_MISALIGNED.
#[test]
fn misaligned_fetch_traps() {
    let mut hart = hart32();
    hart.poke_pc(0x3);
    hart.step();
    assert_eq!(0, csr_value(&hart, csr::MCAUSE));
    assert_eq!(0x3, csr_value(&hart, csr::MTVAL));
}

/// cycle counts every iteration; instret only counts retirements.
#[test]
fn counters_track_retirement() {
    let mut hart = hart32();
    load_words(
        &mut hart,
        &[
            0x0050_0093, // addi x1, x0, 5
            0xFFFF_FFFF, // illegal
        ],
    );
    step_n(&mut hart, 2);
    assert_eq!(1, hart.retired_instructions());
    assert_eq!(2, hart.cycle_count());
    assert!(hart.cycle_count() >= hart.retired_instructions());
    assert_eq!(2, csr_value(&hart, csr::MCAUSE));
    assert_eq!(0xFFFF_FFFF, csr_value(&hart, csr::MTVAL));
}

/// RV64: word-form arithmetic sign-extends 32-bit results, and 64-bit
/// loads/stores round-trip.
#[test]
fn rv64_word_forms() {
    let mut hart = hart64();
    load_words(
        &mut hart,
        &[
            0xFFF0_0093, // addi x1, x0, -1
            0x0010_809B, // addiw x1, x1, 1  -> 0
            0x7FF0_0113, // addi x2, x0, 2047
            0x0021_0133, // add x2, x2, x2
            0x0011_011B, // addiw x2, x2, 1
        ],
    );
    step_n(&mut hart, 5);
    assert_eq!(0, reg(&hart, 1));
    assert_eq!(4095, reg(&hart, 2));

    let mut hart = hart64();
    load_words(
        &mut hart,
        &[
            0xFFF0_0093, // addi x1, x0, -1
            0x0010_D09B, // srliw x1, x1, 1 -> 0x7FFFFFFF
            0x0010_809B, // addiw x1, x1, 1 -> 0xFFFFFFFF80000000
        ],
    );
    step_n(&mut hart, 3);
    assert_eq!(0xFFFF_FFFF_8000_0000, reg(&hart, 1));

    let mut hart = hart64();
    load_words(
        &mut hart,
        &[
            0xFFF0_0093, // addi x1, x0, -1
            0x0010_3423, // sd x1, 8(x0)
            0x0080_3103, // ld x2, 8(x0)
        ],
    );
    step_n(&mut hart, 3);
    assert_eq!(u64::MAX, reg(&hart, 2));
    assert_eq!(Some(u64::MAX), hart.peek_memory_u64(8));
}

/// The tohost stop also fires for RV64 SD stores.
#[test]
fn rv64_tohost_with_sd() {
    let mut hart = hart64();
    load_words(
        &mut hart,
        &[
            0x0000_10B7, // lui x1, 1
            0x0010_0113, // addi x2, x0, 1
            0x0020_B023, // sd x2, 0(x1)
        ],
    );
    hart.set_to_host_address(0x1000);
    let signals = HostSignals::new();
    assert_eq!(StopReason::ToHostWrite, hart.run(&signals, None));
    assert_eq!(Some(1), hart.peek_memory_u64(0x1000));
}

/// A retired store reports its effective address and value.
#[test]
fn store_write_back_is_reported() {
    let mut hart = hart32();
    load_words(
        &mut hart,
        &[
            0x1230_0093, // addi x1, x0, 0x123
            0x0010_2A23, // sw x1, 20(x0)
        ],
    );
    hart.step();
    match hart.step() {
        StepResult::Retired(retired) => match retired.write_back {
            WriteBack::Store { address, value, .. } => {
                assert_eq!(20, address);
                assert_eq!(0x123, value);
            }
            other => panic!("expected a store write-back, got {other:?}"),
        },
        StepResult::Trapped(exception) => panic!("unexpected trap: {exception}"),
    }
}

/// run_until_address stops at the requested pc and restores the previous
/// stop address.
#[test]
fn run_until_address_stops() {
    let mut hart = hart32();
    load_words(
        &mut hart,
        &[
            0x0050_0093, // addi x1, x0, 5
            0x0070_8113, // addi x2, x1, 7
            0x0000_0013, // nop
        ],
    );
    let signals = HostSignals::new();
    assert_eq!(
        StopReason::StopAddress,
        hart.run_until_address(4, &signals, None)
    );
    assert_eq!(4, hart.peek_pc());
    assert_eq!(5, reg(&hart, 1));
    assert_eq!(0, reg(&hart, 2));
}

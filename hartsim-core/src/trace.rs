//! Per-retirement trace records.
//!
//! The executor never knows whether tracing is enabled: the run loop builds
//! a [`TraceRecord`] from each retirement and hands it to a [`TraceSink`]
//! only when one is attached.

use std::io;

use crate::core::{csr, Retired, WriteBack};
use crate::disassembler;
use crate::xlen::Xlen;

/// Everything known about one retired instruction.
#[derive(Debug, Clone)]
pub struct TraceRecord<X: Xlen> {
    /// Monotonically increasing retirement tag (the retired-instruction
    /// count after this instruction).
    pub tag: u64,
    /// Address the instruction was fetched from.
    pub pc: X,
    /// Raw instruction code (16-bit codes zero-extended).
    pub instruction: u32,
    /// Instruction size in bytes (2 or 4).
    pub size: u32,
    /// Conventional assembly rendering.
    pub disassembly: String,
    /// The destination the instruction wrote, if any.
    pub write_back: WriteBack<X>,
}

impl<X: Xlen> TraceRecord<X> {
    pub fn new(tag: u64, retired: &Retired<X>) -> Self {
        let disassembly = match retired.size {
            2 => disassembler::disassemble_compressed::<X>(retired.instruction as u16),
            _ => disassembler::disassemble::<X>(retired.instruction),
        };
        Self {
            tag,
            pc: retired.pc,
            instruction: retired.instruction,
            size: retired.size,
            disassembly,
            write_back: retired.write_back,
        }
    }
}

/// Consumer of trace records.
pub trait TraceSink<X: Xlen> {
    fn record(&mut self, record: &TraceRecord<X>);
}

/// A sink that writes one text line per retirement.
#[derive(Debug)]
pub struct TextTracer<W: io::Write> {
    out: W,
}

impl<W: io::Write> TextTracer<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<X: Xlen, W: io::Write> TraceSink<X> for TextTracer<W> {
    fn record(&mut self, record: &TraceRecord<X>) {
        let width = (X::BITS / 4) as usize;
        let code = match record.size {
            2 => format!("{:#06x}", record.instruction),
            _ => format!("{:#010x}", record.instruction),
        };
        let destination = match record.write_back {
            WriteBack::None => String::new(),
            WriteBack::Register { specifier, value } => {
                format!("  {}={:#0w$x}", specifier.abi_name(), value, w = width + 2)
            }
            WriteBack::Csr { specifier, value } => {
                let name = csr::name(specifier)
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("{specifier:#05x}"));
                format!("  {}={:#0w$x}", name, value, w = width + 2)
            }
            WriteBack::Store { address, value, width: store_width } => {
                let digits = 2 * store_width.size() as usize;
                format!(
                    "  [{:#0w$x}]={:#0vw$x}",
                    address,
                    value,
                    w = width + 2,
                    vw = digits + 2
                )
            }
        };
        // Trace output is best-effort; a failing sink must not stop the
        // simulation.
        let _ = writeln!(
            self.out,
            "#{} {:#0w$x} ({}) {}{}",
            record.tag,
            record.pc,
            code,
            record.disassembly,
            destination,
            w = width + 2,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::StoreWidth;
    use crate::registers::Specifier;

    fn record_line(record: TraceRecord<u32>) -> String {
        let mut tracer = TextTracer::new(Vec::new());
        TraceSink::record(&mut tracer, &record);
        String::from_utf8(tracer.into_inner()).unwrap()
    }

    #[test]
    fn test_register_write_line() {
        let retired = Retired {
            pc: 0u32,
            instruction: 0x0050_0093,
            size: 4,
            write_back: WriteBack::Register {
                specifier: Specifier::X1,
                value: 5,
            },
        };
        let line = record_line(TraceRecord::new(1, &retired));
        assert_eq!(
            "#1 0x00000000 (0x00500093) addi ra, zero, 5  ra=0x00000005\n",
            line
        );
    }

    #[test]
    fn test_store_line() {
        let retired = Retired {
            pc: 8u32,
            instruction: 0x0020_A023,
            size: 4,
            write_back: WriteBack::Store {
                address: 0x1000,
                value: 1,
                width: StoreWidth::Sw,
            },
        };
        let line = record_line(TraceRecord::new(3, &retired));
        assert_eq!(
            "#3 0x00000008 (0x0020a023) sw sp, 0(ra)  [0x00001000]=0x00000001\n",
            line
        );
    }
}

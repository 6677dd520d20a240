//! Flat, bounds-checked guest memory.

use thiserror::Error;

macro_rules! access_fns {
    ( $( $read_fn:ident, $write_fn:ident => $u:ident ),* $(,)? ) => {
        $(
            /// Little-endian read of the value at `address`.
            ///
            /// The address does not need to be naturally aligned; alignment
            /// policy belongs to the load/store/fetch handlers so that the
            /// correct architectural exception can be raised. The whole
            /// access must fall inside the memory bounds.
            pub fn $read_fn(&self, address: u64) -> Result<$u, MemoryError> {
                let mut buf = [0u8; std::mem::size_of::<$u>()];
                self.read(address, &mut buf).map(|()| $u::from_le_bytes(buf))
            }

            /// Little-endian write of `value` at `address`.
            ///
            /// The address does not need to be naturally aligned. The whole
            /// access must fall inside the memory bounds.
            pub fn $write_fn(&mut self, address: u64, value: $u) -> Result<(), MemoryError> {
                self.write(address, &value.to_le_bytes())
            }
        )*
    };
}

/// Byte-addressable little-endian memory covering `0..size`.
///
/// All multi-byte accesses decompose into little-endian byte sequences.
/// Accesses that do not fit within the bounds fail with
/// [`MemoryError::AccessFault`]; nothing is read or written in that case.
#[derive(Debug, Clone)]
pub struct Memory {
    bytes: Vec<u8>,
}

impl Memory {
    /// Allocates `size` bytes of zeroed memory. The size is fixed for the
    /// lifetime of the simulation.
    pub fn new(size: usize) -> Self {
        Self {
            bytes: vec![0; size],
        }
    }

    /// Size of the memory in bytes.
    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    fn range(&self, address: u64, len: usize) -> Result<std::ops::Range<usize>, MemoryError> {
        let start = usize::try_from(address).map_err(|_| MemoryError::AccessFault)?;
        let end = start.checked_add(len).ok_or(MemoryError::AccessFault)?;
        if end > self.bytes.len() {
            return Err(MemoryError::AccessFault);
        }
        Ok(start..end)
    }

    pub fn read(&self, address: u64, buf: &mut [u8]) -> Result<(), MemoryError> {
        let range = self.range(address, buf.len())?;
        buf.copy_from_slice(&self.bytes[range]);
        Ok(())
    }

    pub fn write(&mut self, address: u64, buf: &[u8]) -> Result<(), MemoryError> {
        let range = self.range(address, buf.len())?;
        self.bytes[range].copy_from_slice(buf);
        Ok(())
    }

    access_fns! {
        read_u8, write_u8 => u8,
        read_u16, write_u16 => u16,
        read_u32, write_u32 => u32,
        read_u64, write_u64 => u64,
    }

    /// Copies a loader-provided image into memory starting at `address`.
    pub fn load_image(&mut self, address: u64, image: &[u8]) -> Result<(), MemoryError> {
        self.write(address, image)
    }
}

#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum MemoryError {
    #[error("access fault")]
    AccessFault,
}

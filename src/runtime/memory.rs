use crate::error::LoadError;
use crate::isa::INSTR_LEN;

/// Consolite can address 64KB of memory.
pub const MEMORY_SIZE: usize = 1 << 16;

/// Byte-addressable main memory. Words are big-endian and addresses wrap at 64KB, so a word
/// read at `0xFFFF` takes its low byte from `0x0000`.
#[derive(Clone)]
pub struct Memory {
    bytes: Box<[u8; MEMORY_SIZE]>,
}

impl Memory {
    pub fn new() -> Self {
        Memory {
            bytes: Box::new([0; MEMORY_SIZE]),
        }
    }

    /// Memory holding `image` from address 0, zero everywhere else.
    pub fn load(image: &[u8]) -> Result<Self, LoadError> {
        if image.len() > MEMORY_SIZE {
            return Err(LoadError::ImageTooLarge {
                len: image.len(),
                max: MEMORY_SIZE,
            });
        }
        let mut mem = Memory::new();
        mem.bytes[..image.len()].copy_from_slice(image);
        Ok(mem)
    }

    #[inline]
    pub fn read_byte(&self, addr: u16) -> u8 {
        self.bytes[addr as usize]
    }

    #[inline]
    pub fn write_byte(&mut self, addr: u16, val: u8) {
        self.bytes[addr as usize] = val;
    }

    pub fn read_word(&self, addr: u16) -> u16 {
        u16::from_be_bytes([self.read_byte(addr), self.read_byte(addr.wrapping_add(1))])
    }

    pub fn write_word(&mut self, addr: u16, val: u16) {
        let [hi, lo] = val.to_be_bytes();
        self.write_byte(addr, hi);
        self.write_byte(addr.wrapping_add(1), lo);
    }

    /// Raw bytes of the instruction at `addr`.
    pub fn fetch(&self, addr: u16) -> [u8; INSTR_LEN] {
        let mut instr = [0; INSTR_LEN];
        for (offs, byte) in (0u16..).zip(instr.iter_mut()) {
            *byte = self.read_byte(addr.wrapping_add(offs));
        }
        instr
    }
}

impl Default for Memory {
    fn default() -> Self {
        Memory::new()
    }
}

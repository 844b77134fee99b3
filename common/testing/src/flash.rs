// Licensed under the Apache-2.0 license

use obc_bootloader::flash::{FlashDrvError, FlashStorage};
use std::cell::{Cell, RefCell};

const ERASED: u8 = 0xff;

/// NOR flash backed by a byte vector. Programming can only clear bits, like
/// the real device.
pub struct MemFlash {
    memory: RefCell<Vec<u8>>,
    failing_reads: Cell<u32>,
    pub reads: Cell<usize>,
}

impl MemFlash {
    pub fn erased(size: usize) -> Self {
        MemFlash {
            memory: RefCell::new(vec![ERASED; size]),
            failing_reads: Cell::new(0),
            reads: Cell::new(0),
        }
    }

    /// Stores `data` at `address` regardless of the current content.
    pub fn load(&self, address: usize, data: &[u8]) {
        self.memory.borrow_mut()[address..address + data.len()].copy_from_slice(data);
    }

    pub fn flip_bit(&self, address: usize, bit: u8) {
        self.memory.borrow_mut()[address] ^= 1 << bit;
    }

    pub fn contents(&self, address: usize, len: usize) -> Vec<u8> {
        self.memory.borrow()[address..address + len].to_vec()
    }

    /// Fails the next `count` reads with `FlashDrvError::FAIL`.
    pub fn fail_reads(&self, count: u32) {
        self.failing_reads.set(count);
    }

    fn check(&self, address: usize, len: usize) -> Result<(), FlashDrvError> {
        match address.checked_add(len) {
            Some(end) if end <= self.memory.borrow().len() => Ok(()),
            _ => Err(FlashDrvError::SIZE),
        }
    }
}

impl FlashStorage for MemFlash {
    fn read(&self, buffer: &mut [u8], address: usize) -> Result<(), FlashDrvError> {
        self.reads.set(self.reads.get() + 1);
        if self.failing_reads.get() > 0 {
            self.failing_reads.set(self.failing_reads.get() - 1);
            return Err(FlashDrvError::FAIL);
        }
        self.check(address, buffer.len())?;
        buffer.copy_from_slice(&self.memory.borrow()[address..address + buffer.len()]);
        Ok(())
    }

    fn write(&self, buffer: &[u8], address: usize) -> Result<(), FlashDrvError> {
        self.check(address, buffer.len())?;
        let mut memory = self.memory.borrow_mut();
        for (cell, byte) in memory[address..].iter_mut().zip(buffer) {
            *cell &= *byte;
        }
        if &memory[address..address + buffer.len()] != buffer {
            return Err(FlashDrvError::VERIFY);
        }
        Ok(())
    }

    fn erase(&self, address: usize, length: usize) -> Result<(), FlashDrvError> {
        self.check(address, length)?;
        self.memory.borrow_mut()[address..address + length].fill(ERASED);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.memory.borrow().len()
    }
}

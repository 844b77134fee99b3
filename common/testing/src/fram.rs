// Licensed under the Apache-2.0 license

use boot_image::FRAM_UNINITIALIZED;
use obc_bootloader::fram::{FramBus, FramBusAsync, FramError};

/// FRAM backed by a byte vector with injectable transfer failures.
pub struct MemFram {
    memory: Vec<u8>,
    failing_reads: u32,
    failing_writes: u32,
    failure: FramError,
    pub reads: usize,
    pub writes: usize,
    pub aborts: usize,
}

impl MemFram {
    /// A device that was never written.
    pub fn erased(size: usize) -> Self {
        MemFram {
            memory: vec![FRAM_UNINITIALIZED; size],
            failing_reads: 0,
            failing_writes: 0,
            failure: FramError::Timeout,
            reads: 0,
            writes: 0,
            aborts: 0,
        }
    }

    /// Fails the next `count` reads with `err`.
    pub fn fail_reads(&mut self, count: u32, err: FramError) {
        self.failing_reads = count;
        self.failure = err;
    }

    /// Fails the next `count` writes with `err`.
    pub fn fail_writes(&mut self, count: u32, err: FramError) {
        self.failing_writes = count;
        self.failure = err;
    }

    pub fn memory(&self) -> &[u8] {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut [u8] {
        &mut self.memory
    }

    fn range(&self, address: u32, len: usize) -> Result<core::ops::Range<usize>, FramError> {
        let start = address as usize;
        match start.checked_add(len) {
            Some(end) if end <= self.memory.len() => Ok(start..end),
            _ => Err(FramError::OutOfRange),
        }
    }

    fn read_sync(&mut self, address: u32, buf: &mut [u8]) -> Result<(), FramError> {
        self.reads += 1;
        if self.failing_reads > 0 {
            self.failing_reads -= 1;
            return Err(self.failure);
        }
        let range = self.range(address, buf.len())?;
        buf.copy_from_slice(&self.memory[range]);
        Ok(())
    }

    fn write_sync(&mut self, address: u32, data: &[u8]) -> Result<(), FramError> {
        self.writes += 1;
        if self.failing_writes > 0 {
            self.failing_writes -= 1;
            return Err(self.failure);
        }
        let range = self.range(address, data.len())?;
        self.memory[range].copy_from_slice(data);
        Ok(())
    }
}

impl FramBus for MemFram {
    fn read(&mut self, address: u32, buf: &mut [u8]) -> Result<(), FramError> {
        self.read_sync(address, buf)
    }

    fn write(&mut self, address: u32, data: &[u8]) -> Result<(), FramError> {
        self.write_sync(address, data)
    }

    fn size(&self) -> u32 {
        self.memory.len() as u32
    }
}

impl FramBusAsync for MemFram {
    async fn read(&mut self, address: u32, buf: &mut [u8]) -> Result<(), FramError> {
        self.read_sync(address, buf)
    }

    async fn write(&mut self, address: u32, data: &[u8]) -> Result<(), FramError> {
        self.write_sync(address, data)
    }

    fn abort(&mut self) {
        self.aborts += 1;
    }

    fn size(&self) -> u32 {
        self.memory.len() as u32
    }
}

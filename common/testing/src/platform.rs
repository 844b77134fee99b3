// Licensed under the Apache-2.0 license

use boot_image::SlotId;
use embedded_hal_async::delay::DelayNs;
use obc_bootloader::{
    BootReport, ExecutionMemory, Handoff, MemoryError, StatusReporter, ValidatedImage, Watchdog,
};

/// Execution memory backed by a byte vector. Can be told to corrupt one byte
/// on its way in, to exercise the read back check.
pub struct RamExecMemory {
    base: u32,
    memory: Vec<u8>,
    corrupt: Option<(u32, u8)>,
}

impl RamExecMemory {
    pub fn new(base: u32, size: usize) -> Self {
        RamExecMemory {
            base,
            memory: vec![0; size],
            corrupt: None,
        }
    }

    /// XORs `mask` into the byte at `offset` whenever it is written.
    pub fn corrupt_writes_at(&mut self, offset: u32, mask: u8) {
        self.corrupt = Some((offset, mask));
    }

    pub fn contents(&self, len: usize) -> &[u8] {
        &self.memory[..len]
    }
}

impl ExecutionMemory for RamExecMemory {
    fn base_address(&self) -> u32 {
        self.base
    }

    fn capacity(&self) -> u32 {
        self.memory.len() as u32
    }

    fn write(&mut self, offset: u32, data: &[u8]) -> Result<(), MemoryError> {
        let start = offset as usize;
        let end = start + data.len();
        if end > self.memory.len() {
            return Err(MemoryError::OutOfRange);
        }
        self.memory[start..end].copy_from_slice(data);
        if let Some((target, mask)) = self.corrupt {
            if (start..end).contains(&(target as usize)) {
                self.memory[target as usize] ^= mask;
            }
        }
        Ok(())
    }

    fn read(&self, offset: u32, buf: &mut [u8]) -> Result<(), MemoryError> {
        let start = offset as usize;
        let end = start + buf.len();
        if end > self.memory.len() {
            return Err(MemoryError::OutOfRange);
        }
        buf.copy_from_slice(&self.memory[start..end]);
        Ok(())
    }
}

#[derive(Default)]
pub struct CountingWatchdog {
    pub kicks: usize,
}

impl Watchdog for CountingWatchdog {
    fn kick(&mut self) {
        self.kicks += 1;
    }
}

#[derive(Default)]
pub struct RecordingReporter {
    pub reports: Vec<BootReport>,
}

impl RecordingReporter {
    pub fn last(&self) -> Option<&BootReport> {
        self.reports.last()
    }
}

impl StatusReporter for RecordingReporter {
    fn publish(&mut self, report: &BootReport) {
        self.reports.push(*report);
    }
}

/// Records the image it was asked to start, then panics in place of the jump.
#[derive(Default)]
pub struct RecordingHandoff {
    pub started: Option<(SlotId, u32, u32)>,
}

impl Handoff for RecordingHandoff {
    fn jump(&mut self, image: ValidatedImage) -> ! {
        self.started = Some((image.slot(), image.entry_point(), image.size()));
        panic!("handoff to {}", image.slot());
    }
}

/// Delay that never completes, so bounded record store accesses never time out.
#[derive(Clone, Copy, Default)]
pub struct NeverExpires;

impl DelayNs for NeverExpires {
    async fn delay_ns(&mut self, _ns: u32) {
        core::future::pending::<()>().await
    }
}

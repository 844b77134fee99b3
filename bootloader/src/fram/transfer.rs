// Licensed under the Apache-2.0 license

use super::{check_range, FramBus, FramBusAsync, FramError};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;

/// Completion status reported by the driver's transfer callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    Done,
    Failed(u8),
}

impl TransferStatus {
    fn into_result(self) -> Result<(), FramError> {
        match self {
            TransferStatus::Done => Ok(()),
            TransferStatus::Failed(code) => Err(FramError::Transfer(code)),
        }
    }
}

/// Completion flag shared between a waiting context and the driver interrupt.
pub struct TransferCompletion {
    signal: Signal<CriticalSectionRawMutex, TransferStatus>,
}

impl TransferCompletion {
    pub const fn new() -> Self {
        TransferCompletion {
            signal: Signal::new(),
        }
    }

    /// Called from the driver's completion callback.
    pub fn complete(&self, status: TransferStatus) {
        self.signal.signal(status);
    }

    pub fn reset(&self) {
        self.signal.reset();
    }

    pub fn try_take(&self) -> Option<TransferStatus> {
        self.signal.try_take()
    }

    pub async fn wait(&self) -> TransferStatus {
        self.signal.wait().await
    }
}

impl Default for TransferCompletion {
    fn default() -> Self {
        Self::new()
    }
}

/// Interrupt driven FRAM driver.
///
/// A started transfer reports its end through `completion`. The buffer passed
/// to a `start_*` call must stay untouched until completion was signalled or
/// the transfer was aborted; the wrappers in this module uphold that.
pub trait FramDriver {
    fn start_read(
        &mut self,
        address: u32,
        buf: &mut [u8],
        completion: &TransferCompletion,
    ) -> Result<(), FramError>;

    fn start_write(
        &mut self,
        address: u32,
        data: &[u8],
        completion: &TransferCompletion,
    ) -> Result<(), FramError>;

    /// Stops a transfer that did not complete.
    fn abort(&mut self);

    fn size(&self) -> u32;
}

/// Blocking access for code running without a scheduler: the transfer is
/// started and the completion flag polled a bounded number of times.
pub struct PolledFram<'a, D: FramDriver> {
    driver: D,
    completion: &'a TransferCompletion,
    poll_budget: u32,
}

impl<'a, D: FramDriver> PolledFram<'a, D> {
    pub fn new(driver: D, completion: &'a TransferCompletion, poll_budget: u32) -> Self {
        PolledFram {
            driver,
            completion,
            poll_budget,
        }
    }

    fn wait(&mut self) -> Result<(), FramError> {
        for _ in 0..self.poll_budget {
            if let Some(status) = self.completion.try_take() {
                return status.into_result();
            }
            core::hint::spin_loop();
        }
        self.driver.abort();
        Err(FramError::Timeout)
    }
}

impl<D: FramDriver> FramBus for PolledFram<'_, D> {
    fn read(&mut self, address: u32, buf: &mut [u8]) -> Result<(), FramError> {
        check_range(self.driver.size(), address, buf.len())?;
        self.completion.reset();
        self.driver.start_read(address, buf, self.completion)?;
        self.wait()
    }

    fn write(&mut self, address: u32, data: &[u8]) -> Result<(), FramError> {
        check_range(self.driver.size(), address, data.len())?;
        self.completion.reset();
        self.driver.start_write(address, data, self.completion)?;
        self.wait()
    }

    fn size(&self) -> u32 {
        self.driver.size()
    }
}

/// Async access for tasks: the task sleeps until the driver callback signals
/// completion. Timeouts are applied by the caller.
pub struct NotifiedFram<'a, D: FramDriver> {
    driver: D,
    completion: &'a TransferCompletion,
}

impl<'a, D: FramDriver> NotifiedFram<'a, D> {
    pub fn new(driver: D, completion: &'a TransferCompletion) -> Self {
        NotifiedFram { driver, completion }
    }
}

impl<D: FramDriver> FramBusAsync for NotifiedFram<'_, D> {
    async fn read(&mut self, address: u32, buf: &mut [u8]) -> Result<(), FramError> {
        check_range(self.driver.size(), address, buf.len())?;
        self.completion.reset();
        self.driver.start_read(address, buf, self.completion)?;
        self.completion.wait().await.into_result()
    }

    async fn write(&mut self, address: u32, data: &[u8]) -> Result<(), FramError> {
        check_range(self.driver.size(), address, data.len())?;
        self.completion.reset();
        self.driver.start_write(address, data, self.completion)?;
        self.completion.wait().await.into_result()
    }

    fn abort(&mut self) {
        self.driver.abort();
    }

    fn size(&self) -> u32 {
        self.driver.size()
    }
}

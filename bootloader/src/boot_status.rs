/*++

Licensed under the Apache-2.0 license.

File Name:

    boot_status.rs

Abstract:

    Boot status left in SRAM for the on-board software.

--*/

use boot_image::SlotId;
use core::mem::size_of;
use num_enum::IntoPrimitive;
use zerocopy::byteorder::{LittleEndian, U32};
use obc_config::ObcMemoryMap;
use zerocopy::{Immutable, IntoBytes, KnownLayout};

/// Ordered by severity, the most severe status seen during a boot is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, IntoPrimitive)]
#[repr(u8)]
pub enum BootStatus {
    Ok = 0,
    FramIssues = 1,
    HammingSingleBitCorrected = 2,
    HammingEccCorrupted = 3,
    HammingMultiBit = 4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootReport {
    pub status: BootStatus,
    /// Slot that was handed over to, `None` when every candidate failed.
    pub booted_slot: Option<SlotId>,
    pub failed_attempts: u8,
}

pub trait StatusReporter {
    fn publish(&mut self, report: &BootReport);
}

pub const BOOT_STATUS_MAGIC: u32 = u32::from_be_bytes(*b"BTST");
const NO_SLOT: u8 = 0xff;

#[repr(C)]
#[derive(Debug, IntoBytes, Immutable, KnownLayout)]
struct StatusField {
    magic: U32<LittleEndian>,
    status: u8,
    booted_slot: u8,
    failed_attempts: u8,
    reserved: u8,
}

/// Status field at a fixed SRAM address that survives the jump to the image.
pub struct SramStatusField {
    address: *mut u8,
}

impl SramStatusField {
    /// # Safety
    ///
    /// `address` must point to eight bytes of SRAM reserved for the status field.
    pub const unsafe fn new(address: usize) -> Self {
        SramStatusField {
            address: address as *mut u8,
        }
    }

    /// Status field at the address reserved by the memory map, `None` when
    /// that address is not inside the SRAM.
    ///
    /// # Safety
    ///
    /// The memory map must describe the running board.
    pub unsafe fn from_memory_map(map: &ObcMemoryMap) -> Option<Self> {
        let address = map.boot_status_address(size_of::<StatusField>() as u32)?;
        // Safety: the address lies inside the SRAM of the described board.
        Some(unsafe { Self::new(address as usize) })
    }
}

impl StatusReporter for SramStatusField {
    fn publish(&mut self, report: &BootReport) {
        let field = StatusField {
            magic: U32::new(BOOT_STATUS_MAGIC),
            status: report.status.into(),
            booted_slot: report.booted_slot.map_or(NO_SLOT, u8::from),
            failed_attempts: report.failed_attempts,
            reserved: 0,
        };
        for (i, byte) in field.as_bytes().iter().enumerate() {
            // Safety: the reserved area was provided at construction.
            unsafe { core::ptr::write_volatile(self.address.add(i), *byte) };
        }
    }
}

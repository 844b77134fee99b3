// Licensed under the Apache-2.0 license

//! Transfer of control to a validated image.

use crate::selector::{BootOutcome, BootSelector};
use crate::{fatal_error, FATAL_ALL_CANDIDATES_EXHAUSTED};
use boot_image::SlotId;
use log::info;

/// Proof that an image was copied into execution memory and passed
/// validation. Only the boot selector creates one.
#[derive(Debug, PartialEq, Eq)]
pub struct ValidatedImage {
    slot: SlotId,
    entry_point: u32,
    size: u32,
    crc: u16,
}

impl ValidatedImage {
    pub(crate) fn new(slot: SlotId, entry_point: u32, size: u32, crc: u16) -> Self {
        ValidatedImage {
            slot,
            entry_point,
            size,
            crc,
        }
    }

    pub fn slot(&self) -> SlotId {
        self.slot
    }

    pub fn entry_point(&self) -> u32 {
        self.entry_point
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn crc(&self) -> u16 {
        self.crc
    }
}

pub trait Handoff {
    fn jump(&mut self, image: ValidatedImage) -> !;
}

/// Branches to the entry point of the image.
pub struct JumpToImage;

impl Handoff for JumpToImage {
    fn jump(&mut self, image: ValidatedImage) -> ! {
        info!(
            "Starting {} at {:#010x} ({} bytes, crc {:#06x})",
            image.slot, image.entry_point, image.size, image.crc
        );
        log::logger().flush();
        branch(image.entry_point)
    }
}

#[cfg(target_arch = "arm")]
fn branch(entry_point: u32) -> ! {
    // Safety: the image was copied to its link address and validated.
    unsafe {
        core::arch::asm!("bx {0}", in(reg) entry_point, options(noreturn));
    }
}

#[cfg(not(target_arch = "arm"))]
fn branch(entry_point: u32) -> ! {
    panic!("cannot start an image at {:#010x} on the host", entry_point);
}

/// Runs the selector and hands over to the validated image. Halts when no
/// candidate could be validated.
pub fn boot(selector: &mut BootSelector<'_>, handoff: &mut dyn Handoff) -> ! {
    match selector.run() {
        BootOutcome::Ready(image) => handoff.jump(image),
        BootOutcome::Exhausted => fatal_error(FATAL_ALL_CANDIDATES_EXHAUSTED),
    }
}

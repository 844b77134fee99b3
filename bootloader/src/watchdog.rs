// Licensed under the Apache-2.0 license

/// Hardware watchdog that must be serviced during long operations.
pub trait Watchdog {
    fn kick(&mut self);
}

/// AT91SAM9 watchdog timer.
pub struct At91Watchdog {
    control_register: *mut u32,
}

const WDT_CR_KEY: u32 = 0xa500_0000;
const WDT_CR_WDRSTT: u32 = 0x1;

impl At91Watchdog {
    pub const DEFAULT_CONTROL_REGISTER: usize = 0xffff_fd40;

    /// # Safety
    ///
    /// `control_register` must be the address of the WDT_CR register.
    pub const unsafe fn new(control_register: usize) -> Self {
        At91Watchdog {
            control_register: control_register as *mut u32,
        }
    }
}

impl Watchdog for At91Watchdog {
    fn kick(&mut self) {
        // Safety: the register address was provided at construction.
        unsafe {
            core::ptr::write_volatile(self.control_register, WDT_CR_KEY | WDT_CR_WDRSTT);
        }
    }
}

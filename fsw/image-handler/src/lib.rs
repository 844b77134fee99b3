/*++

Licensed under the Apache-2.0 license.

File Name:

    lib.rs

Abstract:

    Flight software side of the boot image management: periodic copy
    operations between the boot media and reception of uplinked images.

--*/

#![cfg_attr(target_arch = "arm", no_std)]

pub mod countdown;
pub use countdown::{Clock, Countdown, PeriodCountdown};
pub mod error;
pub use error::{HandlerError, UplinkError};
pub mod handler;
pub use handler::{Command, OperationStatus, SoftwareImageHandler};
pub mod uplink;
pub use uplink::UplinkProgress;

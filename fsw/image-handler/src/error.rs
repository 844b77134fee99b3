// Licensed under the Apache-2.0 license

use boot_image::{ImageError, SlotId};
use obc_bootloader::flash::FlashDrvError;
use obc_bootloader::fs::FsError;
use obc_config::RecordError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerError {
    /// Another operation is in progress.
    Busy,
    /// The slot cannot take part in the requested command.
    InvalidSlot(SlotId),
    Filesystem(FsError),
    Flash(FlashDrvError),
    /// The boot record could not be read or updated.
    Record(RecordError),
    EmptySource,
    TooLarge { size: u32, capacity: u32 },
    /// The source ended before the announced size was read.
    ShortRead,
    TooManyReadErrors,
}

impl From<FsError> for HandlerError {
    fn from(err: FsError) -> Self {
        HandlerError::Filesystem(err)
    }
}

impl From<FlashDrvError> for HandlerError {
    fn from(err: FlashDrvError) -> Self {
        HandlerError::Flash(err)
    }
}

impl From<RecordError> for HandlerError {
    fn from(err: RecordError) -> Self {
        HandlerError::Record(err)
    }
}

impl core::fmt::Display for HandlerError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            HandlerError::Busy => write!(f, "operation in progress"),
            HandlerError::InvalidSlot(slot) => write!(f, "invalid slot {}", slot),
            HandlerError::Filesystem(err) => write!(f, "file system: {}", err),
            HandlerError::Flash(err) => write!(f, "flash: {:?}", err),
            HandlerError::Record(err) => write!(f, "boot record: {}", err),
            HandlerError::EmptySource => write!(f, "source is empty"),
            HandlerError::TooLarge { size, capacity } => {
                write!(f, "{} bytes exceed the capacity of {} bytes", size, capacity)
            }
            HandlerError::ShortRead => write!(f, "source ended early"),
            HandlerError::TooManyReadErrors => write!(f, "too many read errors"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UplinkError {
    LeadPacket(ImageError),
    /// A data packet arrived without an announcing lead packet.
    NoSession,
    OutOfSequence { expected: u16, received: u16 },
    /// The packets carry more bytes than the lead packet announced.
    TooMuchData,
    SizeMismatch { expected: u32, received: u32 },
    Handler(HandlerError),
}

impl From<ImageError> for UplinkError {
    fn from(err: ImageError) -> Self {
        UplinkError::LeadPacket(err)
    }
}

impl From<HandlerError> for UplinkError {
    fn from(err: HandlerError) -> Self {
        UplinkError::Handler(err)
    }
}

impl From<FsError> for UplinkError {
    fn from(err: FsError) -> Self {
        UplinkError::Handler(err.into())
    }
}

impl From<FlashDrvError> for UplinkError {
    fn from(err: FlashDrvError) -> Self {
        UplinkError::Handler(err.into())
    }
}

impl From<RecordError> for UplinkError {
    fn from(err: RecordError) -> Self {
        UplinkError::Handler(err.into())
    }
}

impl core::fmt::Display for UplinkError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            UplinkError::LeadPacket(err) => write!(f, "lead packet: {}", err),
            UplinkError::NoSession => write!(f, "no upload in progress"),
            UplinkError::OutOfSequence { expected, received } => {
                write!(f, "packet {} received, {} expected", received, expected)
            }
            UplinkError::TooMuchData => write!(f, "more data than announced"),
            UplinkError::SizeMismatch { expected, received } => {
                write!(f, "{} bytes received, {} announced", received, expected)
            }
            UplinkError::Handler(err) => write!(f, "{}", err),
        }
    }
}

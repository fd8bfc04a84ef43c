//! The seam to the bootloader protocol engine
//!
//! The station does not speak the ROM loader protocol itself. An engine
//! implementing [ProtocolEngine] does, and performs all of its I/O through
//! the [LoaderPort] it is handed on every call.

use std::time::Duration;

use crate::{error::EngineError, image::Chip, port::LoaderPort};

/// Parameters for synchronising with the bootloader
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectArgs {
    /// Time to wait for a reply to each sync attempt
    pub sync_timeout: Duration,
    /// Number of sync attempts before giving up
    pub trials: u32,
}

impl Default for ConnectArgs {
    fn default() -> Self {
        Self {
            sync_timeout: Duration::from_millis(100),
            trials: 10,
        }
    }
}

/// A bootloader protocol implementation
pub trait ProtocolEngine {
    /// Synchronise with a target that has been strapped into its bootloader
    fn connect(&mut self, port: &mut dyn LoaderPort, args: &ConnectArgs)
        -> Result<(), EngineError>;

    /// The chip found by the last successful connect, if it is a known one
    fn target(&self) -> Option<Chip>;

    /// Ask the target to switch to `baud`
    ///
    /// Only the target side changes; the caller updates the host side once
    /// this succeeds.
    fn change_transport_speed(
        &mut self,
        port: &mut dyn LoaderPort,
        baud: u32,
    ) -> Result<(), EngineError>;

    /// Erase the region for an image and prepare to receive it
    fn flash_start(
        &mut self,
        port: &mut dyn LoaderPort,
        offset: u32,
        image_size: u32,
        block_size: u32,
    ) -> Result<(), EngineError>;

    /// Write the next block of the image announced by `flash_start`
    fn flash_write(&mut self, port: &mut dyn LoaderPort, data: &[u8]) -> Result<(), EngineError>;
}

impl<E: ProtocolEngine + ?Sized> ProtocolEngine for Box<E> {
    fn connect(
        &mut self,
        port: &mut dyn LoaderPort,
        args: &ConnectArgs,
    ) -> Result<(), EngineError> {
        (**self).connect(port, args)
    }

    fn target(&self) -> Option<Chip> {
        (**self).target()
    }

    fn change_transport_speed(
        &mut self,
        port: &mut dyn LoaderPort,
        baud: u32,
    ) -> Result<(), EngineError> {
        (**self).change_transport_speed(port, baud)
    }

    fn flash_start(
        &mut self,
        port: &mut dyn LoaderPort,
        offset: u32,
        image_size: u32,
        block_size: u32,
    ) -> Result<(), EngineError> {
        (**self).flash_start(port, offset, image_size, block_size)
    }

    fn flash_write(&mut self, port: &mut dyn LoaderPort, data: &[u8]) -> Result<(), EngineError> {
        (**self).flash_write(port, data)
    }
}

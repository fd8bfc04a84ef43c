//! Job-driven firmware flashing for Espressif targets
//!
//! `flash-station` runs a single background worker which takes flash jobs,
//! each a list of stored images and the offsets to write them at, and drives
//! a target's serial bootloader through a pluggable [ProtocolEngine] to
//! write them. Progress, the latest status message and a bounded log of
//! every status change are published on a shared [StatusBoard] which any
//! number of readers may poll while a job runs.
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use flash_station::{*, engine::ProtocolEngine};
//! # fn engine() -> Box<dyn ProtocolEngine + Send> { unimplemented!() }
//! let board = Arc::new(StatusBoard::default());
//! let port = SerialLoaderPort::open_with_modem_lines("/dev/ttyUSB0", 115_200, DEFAULT_HOLD)?;
//! let station = Station::start(
//!     board.clone(),
//!     port,
//!     engine(),
//!     DirStore::new("/mnt/sdcard"),
//!     StationSettings::default(),
//! )?;
//!
//! let job = FlashJob::new("esp32", vec![
//!     FlashImage::new("partition-table.bin", 0x8000),
//!     FlashImage::new("firmware.bin", 0x10000),
//! ])?;
//! station.submit(job)?;
//! # Ok::<(), Error>(())
//! ```
//!
//! ## Cargo Features
//!
//! - `cli`: the `flash-station` binary and its configuration file
//! - `serialport`: [SerialLoaderPort], driving a target over a host serial
//!   port and strapping it through the port's modem lines
//! - `gpio`: strapping through Linux GPIO character devices instead
//!
//! [ProtocolEngine]: engine::ProtocolEngine
//! [SerialLoaderPort]: port::SerialLoaderPort

#![cfg_attr(docsrs, feature(doc_cfg))]

#[cfg(feature = "serialport")]
#[cfg_attr(docsrs, doc(cfg(feature = "serialport")))]
pub use self::port::SerialLoaderPort;
pub use self::{
    error::{EngineError, Error},
    flasher::{Station, StationSettings},
    image::{Chip, FlashImage, FlashJob},
    port::DEFAULT_HOLD,
    status::StatusBoard,
    storage::DirStore,
};

#[cfg(feature = "cli")]
#[cfg_attr(docsrs, doc(cfg(feature = "cli")))]
pub mod cli;
pub mod engine;
pub mod error;
pub mod flasher;
pub mod image;
#[cfg(feature = "cli")]
#[cfg_attr(docsrs, doc(cfg(feature = "cli")))]
pub mod logging;
pub mod port;
pub mod status;
pub mod storage;

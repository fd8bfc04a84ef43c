//! Library and application errors

use std::io;

use miette::Diagnostic;
use thiserror::Error;

/// All possible errors returned by flash-station
#[derive(Debug, Diagnostic, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("System busy, a flash job is already running")]
    #[diagnostic(
        code(flash_station::busy),
        help("Wait for the current job to finish before submitting another one")
    )]
    Busy,

    #[error("Connect Error: {0}")]
    #[diagnostic(
        code(flash_station::connect),
        help("Check the wiring of the reset and boot lines, and that the target is powered")
    )]
    Connect(#[source] EngineError),

    #[error("Job contains no images")]
    #[diagnostic(code(flash_station::empty_job))]
    EmptyJob,

    #[error("Erase Error: {source} ({image})")]
    #[diagnostic(code(flash_station::erase))]
    Erase {
        image: String,
        #[source]
        source: EngineError,
    },

    #[error("Image `{image}` is {size} bytes, which exceeds the addressable flash range")]
    #[diagnostic(code(flash_station::image_too_large))]
    ImageTooLarge { image: String, size: u64 },

    #[error("Invalid flash address `{0}`")]
    #[diagnostic(
        code(flash_station::invalid_address),
        help("Addresses are decimal, or hexadecimal with a `0x` prefix")
    )]
    InvalidAddress(String),

    #[error("Invalid job description")]
    #[diagnostic(code(flash_station::invalid_job))]
    InvalidJob(#[source] toml::de::Error),

    #[error("Error: {0} missing")]
    #[diagnostic(
        code(flash_station::missing_image),
        help("Use the `list` subcommand to see which images are present in storage")
    )]
    MissingImage(String),

    #[error("Malformed image `{0}`")]
    #[diagnostic(
        code(flash_station::malformed_image),
        help("Images are given as NAME@ADDRESS, e.g. `firmware.bin@0x10000`")
    )]
    MalformedImage(String),

    #[error("Failed to change the transport speed: {0}")]
    #[diagnostic(code(flash_station::speed_negotiation))]
    SpeedNegotiation(#[source] EngineError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Startup(#[from] StartupError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Storage(#[from] StorageError),

    #[error("The flashing worker is no longer running")]
    #[diagnostic(
        code(flash_station::worker_halted),
        help("The station has to be restarted before new jobs can be accepted")
    )]
    WorkerHalted,

    #[error("Write Error: {source} ({image} at {offset:#x})")]
    #[diagnostic(code(flash_station::write))]
    Write {
        image: String,
        offset: u32,
        #[source]
        source: EngineError,
    },
}

/// Outcome codes reported by the protocol engine
#[derive(Clone, Copy, Debug, Default, Diagnostic, Error, PartialEq, Eq, strum::FromRepr)]
#[non_exhaustive]
#[repr(u8)]
pub enum EngineError {
    #[default]
    #[error("Operation failed")]
    #[diagnostic(code(flash_station::engine::fail))]
    Fail = 1,

    #[error("Timed out waiting for the target")]
    #[diagnostic(code(flash_station::engine::timeout))]
    Timeout = 2,

    #[error("Image size is invalid")]
    #[diagnostic(code(flash_station::engine::image_size))]
    ImageSize = 3,

    #[error("MD5 of flashed data does not match")]
    #[diagnostic(code(flash_station::engine::invalid_md5))]
    InvalidMd5 = 4,

    #[error("Invalid parameter")]
    #[diagnostic(code(flash_station::engine::invalid_param))]
    InvalidParam = 5,

    #[error("Invalid target")]
    #[diagnostic(code(flash_station::engine::invalid_target))]
    InvalidTarget = 6,

    #[error("Unsupported chip")]
    #[diagnostic(code(flash_station::engine::unsupported_chip))]
    UnsupportedChip = 7,

    #[error("Unsupported function")]
    #[diagnostic(code(flash_station::engine::unsupported_func))]
    UnsupportedFunc = 8,

    #[error("Invalid response from the target")]
    #[diagnostic(code(flash_station::engine::invalid_response))]
    InvalidResponse = 9,
}

impl EngineError {
    /// Map a raw engine status code onto a result, `0` being success
    pub fn check(raw: u8) -> Result<(), EngineError> {
        match raw {
            0 => Ok(()),
            other => Err(Self::from(other)),
        }
    }
}

impl From<u8> for EngineError {
    fn from(raw: u8) -> Self {
        Self::from_repr(raw).unwrap_or_default()
    }
}

/// Errors raised while accessing stored images
#[derive(Debug, Diagnostic, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("Image name `{0}` is not a plain file name")]
    #[diagnostic(
        code(flash_station::storage::invalid_name),
        help("Image names may not contain path separators or `..`")
    )]
    InvalidName(String),

    #[error("Failed to access `{name}` in image storage")]
    #[diagnostic(code(flash_station::storage::io))]
    Io {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("Image `{0}` not found in storage")]
    #[diagnostic(code(flash_station::storage::not_found))]
    NotFound(String),

    #[error("Image storage root `{0}` is not available")]
    #[diagnostic(
        code(flash_station::storage::unavailable),
        help("Make sure the storage medium is mounted and the configured root exists")
    )]
    Unavailable(String),
}

/// Failures while acquiring hardware or spawning the worker
#[derive(Debug, Diagnostic, Error)]
#[non_exhaustive]
pub enum StartupError {
    #[cfg(all(feature = "gpio", target_os = "linux"))]
    #[error("Failed to request strap lines from `{chip}`")]
    #[diagnostic(
        code(flash_station::startup::gpio),
        help("Check the configured GPIO chip and line offsets, and that no process holds them")
    )]
    Gpio {
        chip: String,
        #[source]
        source: gpiocdev::Error,
    },

    #[cfg(feature = "serialport")]
    #[error("Failed to open serial port `{port}`")]
    #[diagnostic(
        code(flash_station::startup::serial),
        help("Make sure the port exists and that you have permission to open it")
    )]
    Serial {
        port: String,
        #[source]
        source: serialport::Error,
    },

    #[error("Failed to spawn the flashing worker")]
    #[diagnostic(code(flash_station::startup::spawn))]
    Spawn(#[source] io::Error),
}

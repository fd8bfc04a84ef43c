//! Hardware access handed to the protocol engine
//!
//! The engine never touches the serial port or the strap lines directly; it
//! goes through a [LoaderPort], which bundles byte transfer, line strapping,
//! baud changes and a single deadline timer.

use std::time::{Duration, Instant};

use log::debug;

use crate::error::EngineError;

#[cfg(feature = "serialport")]
pub mod serial;
pub mod strap;

#[cfg(feature = "serialport")]
pub use self::serial::SerialLoaderPort;
#[cfg(all(feature = "gpio", target_os = "linux"))]
pub use self::strap::GpioLines;
#[cfg(feature = "serialport")]
pub use self::strap::ModemLines;
pub use self::strap::{Level, StrapLine, StrapLines, Strapping};

/// Default time to hold a strap line before changing the next one
pub const DEFAULT_HOLD: Duration = Duration::from_millis(50);
/// Interval between polls while waiting for incoming bytes
pub const READ_POLL: Duration = Duration::from_millis(1);

/// Everything the protocol engine needs from the host
pub trait LoaderPort {
    /// Send all of `data`, failing with [EngineError::Timeout] if the
    /// transport does not accept it in time
    fn write(&mut self, data: &[u8], timeout: Duration) -> Result<(), EngineError>;

    /// Fill `buf` completely, failing with [EngineError::Timeout] if not
    /// enough bytes arrive before `timeout` elapses
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<(), EngineError>;

    fn delay(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }

    /// Current host side transport speed
    fn transport_speed(&self) -> u32;

    fn change_transport_speed(&mut self, baud: u32) -> Result<(), EngineError>;

    /// Strap the target into its serial bootloader
    fn enter_bootloader(&mut self);

    /// Pulse the target's reset line
    fn reset_target(&mut self);

    /// Arm the deadline timer
    fn start_timer(&mut self, timeout: Duration);

    /// Time left until the armed deadline, zero once it has passed
    fn remaining_time(&self) -> Duration;

    fn debug_print(&mut self, message: &str) {
        debug!("{message}");
    }
}

impl<P: LoaderPort + ?Sized> LoaderPort for Box<P> {
    fn write(&mut self, data: &[u8], timeout: Duration) -> Result<(), EngineError> {
        (**self).write(data, timeout)
    }

    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<(), EngineError> {
        (**self).read(buf, timeout)
    }

    fn delay(&mut self, duration: Duration) {
        (**self).delay(duration)
    }

    fn transport_speed(&self) -> u32 {
        (**self).transport_speed()
    }

    fn change_transport_speed(&mut self, baud: u32) -> Result<(), EngineError> {
        (**self).change_transport_speed(baud)
    }

    fn enter_bootloader(&mut self) {
        (**self).enter_bootloader()
    }

    fn reset_target(&mut self) {
        (**self).reset_target()
    }

    fn start_timer(&mut self, timeout: Duration) {
        (**self).start_timer(timeout)
    }

    fn remaining_time(&self) -> Duration {
        (**self).remaining_time()
    }

    fn debug_print(&mut self, message: &str) {
        (**self).debug_print(message)
    }
}

/// A single armed-or-not deadline
#[derive(Debug, Default, Clone, Copy)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    pub fn start(&mut self, timeout: Duration) {
        self.0 = Some(Instant::now() + timeout);
    }

    /// Time left, zero when unarmed or expired
    pub fn remaining(&self) -> Duration {
        self.0
            .map(|at| at.saturating_duration_since(Instant::now()))
            .unwrap_or_default()
    }

    pub fn expired(&self) -> bool {
        self.remaining().is_zero()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadline_counts_down() {
        let mut deadline = Deadline::default();
        assert!(deadline.expired());

        deadline.start(Duration::from_secs(60));
        let remaining = deadline.remaining();
        assert!(remaining > Duration::from_secs(59));
        assert!(remaining <= Duration::from_secs(60));

        deadline.start(Duration::ZERO);
        assert!(deadline.expired());
    }
}

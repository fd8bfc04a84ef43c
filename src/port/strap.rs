//! Driving the target's reset and boot strap lines

use std::{io, thread::sleep, time::Duration};

use log::{debug, error};
use strum::Display;

/// Logic level of a strap line, as seen on the target pin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Level {
    Low,
    High,
}

/// The two lines used to strap a target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum StrapLine {
    /// Chip enable, target held in reset while low
    Reset,
    /// Boot mode select, serial bootloader when low at reset release
    Boot,
}

/// Something that can set the target's strap lines
pub trait StrapLines {
    fn drive(&mut self, line: StrapLine, level: Level) -> io::Result<()>;
}

impl<L: StrapLines + ?Sized> StrapLines for Box<L> {
    fn drive(&mut self, line: StrapLine, level: Level) -> io::Result<()> {
        (**self).drive(line, level)
    }
}

/// Timed strap sequences on top of a set of [StrapLines]
///
/// Failures to drive a line are logged and the sequence carries on; the
/// protocol engine will notice a target that did not come up.
#[derive(Debug)]
pub struct Strapping<L> {
    lines: L,
    hold: Duration,
}

impl<L: StrapLines> Strapping<L> {
    pub fn new(lines: L, hold: Duration) -> Self {
        Self { lines, hold }
    }

    /// Release both lines, letting the target run
    pub fn idle(&mut self) {
        self.drive(StrapLine::Boot, Level::High);
        self.drive(StrapLine::Reset, Level::High);
    }

    /// Reset the target with boot held low, so it comes up in its bootloader
    pub fn enter_bootloader(&mut self) {
        debug!("Entering bootloader with a hold time of {:?}", self.hold);

        self.drive(StrapLine::Reset, Level::Low);
        self.drive(StrapLine::Boot, Level::Low);
        sleep(self.hold);
        self.drive(StrapLine::Reset, Level::High);
        sleep(self.hold);
        self.drive(StrapLine::Boot, Level::High);
    }

    /// Pulse reset, booting whatever the target has in flash
    pub fn reset_target(&mut self) {
        debug!("Resetting target");

        self.drive(StrapLine::Reset, Level::Low);
        sleep(self.hold);
        self.drive(StrapLine::Reset, Level::High);
    }

    pub fn into_inner(self) -> L {
        self.lines
    }

    fn drive(&mut self, line: StrapLine, level: Level) {
        if let Err(e) = self.lines.drive(line, level) {
            error!("Failed to drive {line} line {level}: {e}");
        }
    }
}

/// Strap lines wired to the modem control lines of a serial adapter
///
/// This is the usual auto-reset circuit of development boards: RTS drives
/// EN and DTR drives IO0, both inverted.
#[cfg(feature = "serialport")]
pub struct ModemLines {
    port: Box<dyn serialport::SerialPort>,
}

#[cfg(feature = "serialport")]
impl ModemLines {
    /// Take over the modem lines of `port`, usually a `try_clone` of the
    /// data port
    pub fn new(port: Box<dyn serialport::SerialPort>) -> Self {
        Self { port }
    }
}

#[cfg(feature = "serialport")]
impl std::fmt::Debug for ModemLines {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModemLines")
            .field("port", &self.port.name())
            .finish()
    }
}

#[cfg(feature = "serialport")]
impl StrapLines for ModemLines {
    fn drive(&mut self, line: StrapLine, level: Level) -> io::Result<()> {
        let asserted = level == Level::Low;

        match line {
            StrapLine::Reset => self.port.write_request_to_send(asserted)?,
            StrapLine::Boot => self.port.write_data_terminal_ready(asserted)?,
        }

        Ok(())
    }
}

#[cfg(all(feature = "gpio", target_os = "linux"))]
pub use self::gpio::GpioLines;

#[cfg(all(feature = "gpio", target_os = "linux"))]
mod gpio {
    use std::io;

    use gpiocdev::{
        line::{Offset, Value},
        request::{Config, Request},
    };
    use log::info;

    use super::{Level, StrapLine, StrapLines};
    use crate::error::StartupError;

    /// Strap lines wired directly to host GPIOs
    pub struct GpioLines {
        request: Request,
        reset: Offset,
        boot: Offset,
    }

    impl GpioLines {
        /// Request both lines as outputs, initially high
        pub fn open(chip: &str, reset: Offset, boot: Offset) -> Result<Self, StartupError> {
            let mut config = Config::default();
            config.with_line(reset).as_output(Value::Active);
            config.with_line(boot).as_output(Value::Active);

            let request = Request::from_config(config)
                .on_chip(chip)
                .with_consumer("flash-station")
                .request()
                .map_err(|source| StartupError::Gpio {
                    chip: chip.to_owned(),
                    source,
                })?;

            info!("Strapping through {chip} (reset={reset}, boot={boot})");

            Ok(Self {
                request,
                reset,
                boot,
            })
        }
    }

    impl StrapLines for GpioLines {
        fn drive(&mut self, line: StrapLine, level: Level) -> io::Result<()> {
            let offset = match line {
                StrapLine::Reset => self.reset,
                StrapLine::Boot => self.boot,
            };
            let value = match level {
                Level::High => Value::Active,
                Level::Low => Value::Inactive,
            };

            self.request
                .set_value(offset, value)
                .map(|_| ())
                .map_err(io::Error::other)
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[derive(Default)]
    struct Recorder {
        events: Vec<(StrapLine, Level)>,
        fail_boot: bool,
    }

    impl StrapLines for Recorder {
        fn drive(&mut self, line: StrapLine, level: Level) -> io::Result<()> {
            if self.fail_boot && line == StrapLine::Boot {
                return Err(io::Error::other("line busy"));
            }
            self.events.push((line, level));
            Ok(())
        }
    }

    #[test]
    fn bootloader_sequence() {
        let mut strap = Strapping::new(Recorder::default(), Duration::ZERO);
        strap.enter_bootloader();

        assert_eq!(
            strap.into_inner().events,
            vec![
                (StrapLine::Reset, Level::Low),
                (StrapLine::Boot, Level::Low),
                (StrapLine::Reset, Level::High),
                (StrapLine::Boot, Level::High),
            ]
        );
    }

    #[test]
    fn reset_pulse() {
        let mut strap = Strapping::new(Recorder::default(), Duration::ZERO);
        strap.reset_target();

        assert_eq!(
            strap.into_inner().events,
            vec![
                (StrapLine::Reset, Level::Low),
                (StrapLine::Reset, Level::High),
            ]
        );
    }

    #[test]
    fn line_failures_do_not_abort_the_sequence() {
        let recorder = Recorder {
            fail_boot: true,
            ..Default::default()
        };
        let mut strap = Strapping::new(recorder, Duration::ZERO);
        strap.enter_bootloader();

        assert_eq!(
            strap.into_inner().events,
            vec![
                (StrapLine::Reset, Level::Low),
                (StrapLine::Reset, Level::High),
            ]
        );
    }
}

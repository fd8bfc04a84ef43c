//! [LoaderPort] over a host serial port

use std::{
    io::{self, Read, Write},
    thread::sleep,
    time::{Duration, Instant},
};

use log::{debug, info, warn};
use serialport::{FlowControl, SerialPort};

use super::{
    strap::{ModemLines, StrapLines, Strapping},
    Deadline, LoaderPort, READ_POLL,
};
use crate::{
    error::{EngineError, StartupError},
    flasher::DEFAULT_BAUD,
};

/// A serial connection to the target, plus the lines used to strap it
pub struct SerialLoaderPort<L> {
    serial: Box<dyn SerialPort>,
    strap: Strapping<L>,
    baud: u32,
    deadline: Deadline,
}

impl SerialLoaderPort<ModemLines> {
    /// Open `port`, strapping the target through its own DTR and RTS lines
    pub fn open_with_modem_lines(
        port: &str,
        baud: u32,
        hold: Duration,
    ) -> Result<Self, StartupError> {
        let serial = open_serial(port, baud)?;
        let lines = serial.try_clone().map_err(|source| StartupError::Serial {
            port: port.to_owned(),
            source,
        })?;

        let strap = Strapping::new(ModemLines::new(lines), hold);
        Ok(Self::with_baud(serial, strap, baud))
    }
}

impl<L: StrapLines> SerialLoaderPort<L> {
    /// Open `port`, strapping the target through separately provided lines
    pub fn open(port: &str, baud: u32, strap: Strapping<L>) -> Result<Self, StartupError> {
        Ok(Self::with_baud(open_serial(port, baud)?, strap, baud))
    }

    /// Wrap an already opened port, releasing the strap lines
    ///
    /// The port's current speed is taken as the speed to return to after
    /// every job, [DEFAULT_BAUD] if it cannot be queried.
    pub fn new(serial: Box<dyn SerialPort>, strap: Strapping<L>) -> Self {
        let baud = initial_baud(serial.baud_rate(), DEFAULT_BAUD);
        Self::with_baud(serial, strap, baud)
    }

    fn with_baud(serial: Box<dyn SerialPort>, mut strap: Strapping<L>, baud: u32) -> Self {
        strap.idle();

        Self {
            serial,
            strap,
            baud,
            deadline: Deadline::default(),
        }
    }

    pub fn name(&self) -> Option<String> {
        self.serial.name()
    }
}

fn open_serial(port: &str, baud: u32) -> Result<Box<dyn SerialPort>, StartupError> {
    let serial = serialport::new(port, baud)
        .flow_control(FlowControl::None)
        .timeout(READ_POLL)
        .open()
        .map_err(|source| StartupError::Serial {
            port: port.to_owned(),
            source,
        })?;

    info!("Opened {port} at {baud} baud");

    Ok(serial)
}

fn initial_baud(queried: serialport::Result<u32>, fallback: u32) -> u32 {
    match queried {
        Ok(baud) if baud != 0 => baud,
        Ok(_) => fallback,
        Err(e) => {
            warn!("Failed to query the port's baud rate, assuming {fallback}: {e}");
            fallback
        }
    }
}

fn engine_error(context: &str, e: io::Error) -> EngineError {
    debug!("{context}: {e}");

    match e.kind() {
        io::ErrorKind::TimedOut => EngineError::Timeout,
        _ => EngineError::Fail,
    }
}

impl<L: StrapLines> LoaderPort for SerialLoaderPort<L> {
    fn write(&mut self, data: &[u8], timeout: Duration) -> Result<(), EngineError> {
        self.serial
            .set_timeout(timeout)
            .map_err(|e| engine_error("Failed to set write timeout", e.into()))?;

        let written = self
            .serial
            .write_all(data)
            .and_then(|_| self.serial.flush());

        self.serial
            .set_timeout(READ_POLL)
            .map_err(|e| engine_error("Failed to restore read timeout", e.into()))?;

        written.map_err(|e| engine_error("Serial write failed", e))
    }

    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<(), EngineError> {
        let deadline = Instant::now() + timeout;
        let mut filled = 0;

        while filled < buf.len() {
            let available = self
                .serial
                .bytes_to_read()
                .map_err(|e| engine_error("Failed to poll serial port", e.into()))?;

            if available > 0 {
                match self.serial.read(&mut buf[filled..]) {
                    Ok(n) => filled += n,
                    Err(e) if e.kind() == io::ErrorKind::TimedOut => {}
                    Err(e) => return Err(engine_error("Serial read failed", e)),
                }
                continue;
            }

            if Instant::now() >= deadline {
                return Err(EngineError::Timeout);
            }
            sleep(READ_POLL);
        }

        Ok(())
    }

    fn transport_speed(&self) -> u32 {
        self.baud
    }

    fn change_transport_speed(&mut self, baud: u32) -> Result<(), EngineError> {
        self.serial
            .set_baud_rate(baud)
            .map_err(|e| engine_error("Failed to change baud rate", e.into()))?;
        self.baud = baud;

        debug!("Host baud rate set to {baud}");

        Ok(())
    }

    fn enter_bootloader(&mut self) {
        self.strap.enter_bootloader();
    }

    fn reset_target(&mut self) {
        self.strap.reset_target();
    }

    fn start_timer(&mut self, timeout: Duration) {
        self.deadline.start(timeout);
    }

    fn remaining_time(&self) -> Duration {
        self.deadline.remaining()
    }
}

#[cfg(test)]
mod tests {
    use serialport::ErrorKind;

    use super::*;

    #[test]
    fn unknown_port_speed_falls_back() {
        assert_eq!(initial_baud(Ok(921_600), DEFAULT_BAUD), 921_600);
        assert_eq!(initial_baud(Ok(0), DEFAULT_BAUD), DEFAULT_BAUD);

        let gone = serialport::Error::new(ErrorKind::NoDevice, "device unplugged");
        assert_eq!(initial_baud(Err(gone), DEFAULT_BAUD), DEFAULT_BAUD);
    }

    #[test]
    fn timeouts_are_reported_as_such() {
        let timeout = io::Error::new(io::ErrorKind::TimedOut, "no data");
        assert_eq!(engine_error("read", timeout), EngineError::Timeout);

        let broken = io::Error::new(io::ErrorKind::BrokenPipe, "gone");
        assert_eq!(engine_error("write", broken), EngineError::Fail);
    }
}

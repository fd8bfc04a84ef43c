//! Simulated hardware shared by the integration tests

#![allow(dead_code)]

use std::{
    collections::HashMap,
    io::{Cursor, Read},
    sync::{mpsc::Receiver, Arc, Mutex},
    time::{Duration, Instant},
};

use flash_station::{
    engine::{ConnectArgs, ProtocolEngine},
    error::StorageError,
    port::{Deadline, LoaderPort},
    status::StatusBoard,
    storage::{ImageEntry, ImageStore, ImageStream},
    Chip, EngineError,
};

/// Everything that happened to the simulated target, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    EnterBootloader,
    Reset,
    HostBaud(u32),
    Connect,
    TargetBaud(u32),
    Open(String),
    FlashStart { offset: u32, size: u32, block: u32 },
    FlashWrite(usize),
}

#[derive(Debug, Clone, Default)]
pub struct Trace(Arc<Mutex<Vec<Event>>>);

impl Trace {
    pub fn push(&self, event: Event) {
        self.0.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, event: &Event) -> usize {
        self.events().iter().filter(|e| *e == event).count()
    }

    /// Offsets of every erase the engine was asked for
    pub fn flash_starts(&self) -> Vec<u32> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::FlashStart { offset, .. } => Some(offset),
                _ => None,
            })
            .collect()
    }
}

pub struct SimPort {
    trace: Trace,
    baud: u32,
    refused_baud: Option<u32>,
    deadline: Deadline,
}

impl SimPort {
    pub fn new(trace: &Trace, baud: u32) -> Self {
        Self {
            trace: trace.clone(),
            baud,
            refused_baud: None,
            deadline: Deadline::default(),
        }
    }

    /// Fail every attempt to switch the host side to `baud`
    pub fn refusing(mut self, baud: u32) -> Self {
        self.refused_baud = Some(baud);
        self
    }
}

impl LoaderPort for SimPort {
    fn write(&mut self, _data: &[u8], _timeout: Duration) -> Result<(), EngineError> {
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<(), EngineError> {
        buf.fill(0);
        Ok(())
    }

    fn transport_speed(&self) -> u32 {
        self.baud
    }

    fn change_transport_speed(&mut self, baud: u32) -> Result<(), EngineError> {
        if self.refused_baud == Some(baud) {
            return Err(EngineError::Fail);
        }

        self.trace.push(Event::HostBaud(baud));
        self.baud = baud;
        Ok(())
    }

    fn enter_bootloader(&mut self) {
        self.trace.push(Event::EnterBootloader);
    }

    fn reset_target(&mut self) {
        self.trace.push(Event::Reset);
    }

    fn start_timer(&mut self, timeout: Duration) {
        self.deadline.start(timeout);
    }

    fn remaining_time(&self) -> Duration {
        self.deadline.remaining()
    }
}

/// An engine following a script instead of talking to a bootloader
#[derive(Default)]
pub struct ScriptedEngine {
    pub trace: Trace,
    pub target: Option<Chip>,
    pub connect_error: Option<EngineError>,
    pub baud_error: Option<EngineError>,
    pub start_error: Option<EngineError>,
    /// Fail the n-th write of the job, counting from zero
    pub fail_write: Option<(usize, EngineError)>,
    /// Block in connect until this fires
    pub gate: Option<Receiver<()>>,
    pub panic_on_connect: bool,
    /// Board to sample progress from before every write
    pub board: Option<Arc<StatusBoard>>,
    pub progress_seen: Arc<Mutex<Vec<u8>>>,
    pub writes: usize,
}

impl ScriptedEngine {
    pub fn new(trace: &Trace) -> Self {
        Self {
            trace: trace.clone(),
            target: Some(Chip::Esp32),
            ..Default::default()
        }
    }
}

impl ProtocolEngine for ScriptedEngine {
    fn connect(
        &mut self,
        port: &mut dyn LoaderPort,
        args: &ConnectArgs,
    ) -> Result<(), EngineError> {
        port.start_timer(args.sync_timeout);
        if let Some(gate) = &self.gate {
            gate.recv().unwrap();
        }
        if self.panic_on_connect {
            panic!("engine exploded");
        }

        self.trace.push(Event::Connect);
        match self.connect_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn target(&self) -> Option<Chip> {
        self.target
    }

    fn change_transport_speed(
        &mut self,
        _port: &mut dyn LoaderPort,
        baud: u32,
    ) -> Result<(), EngineError> {
        match self.baud_error {
            Some(e) => Err(e),
            None => {
                self.trace.push(Event::TargetBaud(baud));
                Ok(())
            }
        }
    }

    fn flash_start(
        &mut self,
        _port: &mut dyn LoaderPort,
        offset: u32,
        image_size: u32,
        block_size: u32,
    ) -> Result<(), EngineError> {
        if let Some(e) = self.start_error {
            return Err(e);
        }
        self.trace.push(Event::FlashStart {
            offset,
            size: image_size,
            block: block_size,
        });
        Ok(())
    }

    fn flash_write(&mut self, _port: &mut dyn LoaderPort, data: &[u8]) -> Result<(), EngineError> {
        if let Some(board) = &self.board {
            self.progress_seen.lock().unwrap().push(board.progress());
        }

        let index = self.writes;
        self.writes += 1;
        if let Some((at, e)) = self.fail_write {
            if at == index {
                return Err(e);
            }
        }

        self.trace.push(Event::FlashWrite(data.len()));
        Ok(())
    }
}

struct MemStream {
    data: Cursor<Vec<u8>>,
    size: u64,
}

impl Read for MemStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.data.read(buf)
    }
}

impl ImageStream for MemStream {
    fn size(&self) -> u64 {
        self.size
    }
}

#[derive(Default)]
pub struct MemoryStore {
    trace: Trace,
    images: HashMap<String, Vec<u8>>,
}

impl MemoryStore {
    pub fn new(trace: &Trace) -> Self {
        Self {
            trace: trace.clone(),
            images: HashMap::new(),
        }
    }

    pub fn with(mut self, name: &str, size: usize) -> Self {
        let data = (0..size).map(|i| i as u8).collect();
        self.images.insert(name.to_owned(), data);
        self
    }
}

impl ImageStore for MemoryStore {
    fn open(&self, name: &str) -> Result<Box<dyn ImageStream>, StorageError> {
        self.trace.push(Event::Open(name.to_owned()));

        let data = self
            .images
            .get(name)
            .ok_or_else(|| StorageError::NotFound(name.to_owned()))?;

        Ok(Box::new(MemStream {
            size: data.len() as u64,
            data: Cursor::new(data.clone()),
        }))
    }

    fn list(&self) -> Result<Vec<ImageEntry>, StorageError> {
        let mut images = self
            .images
            .iter()
            .map(|(name, data)| ImageEntry {
                name: name.clone(),
                size: data.len() as u64,
            })
            .collect::<Vec<_>>();
        images.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(images)
    }
}

/// Poll `condition` until it holds, panicking after a few seconds
pub fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for condition");
        std::thread::sleep(Duration::from_millis(1));
    }
}

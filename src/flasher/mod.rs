//! The flashing worker
//!
//! A [Station] owns one background thread which flashes jobs one at a time.
//! Jobs are handed over through [Station::submit]; everything else is
//! observed through the shared [StatusBoard].
//!
//! Each job walks through the same stages: strap the target into its
//! bootloader, connect, optionally raise the baud rate, then erase and write
//! every image in order. The first failure ends the job. Whatever happens,
//! the job finishes by restoring the original baud rate and resetting the
//! target once.

use std::{
    io::Read,
    panic::{self, AssertUnwindSafe},
    sync::{
        mpsc::{self, Receiver, SyncSender, TrySendError},
        Arc,
    },
    thread::{self, JoinHandle},
};

use log::{debug, error, info, warn};

use crate::{
    engine::{ConnectArgs, ProtocolEngine},
    error::{Error, StartupError, StorageError},
    image::{FlashImage, FlashJob},
    port::LoaderPort,
    status::{JobOutcome, Stage, StatusBoard},
    storage::ImageStore,
};

/// Size of each block handed to the engine's flash write
pub const FLASH_WRITE_SIZE: usize = 0x1000;
/// Default transport speed
pub const DEFAULT_BAUD: u32 = 115_200;
/// Transport speed negotiated once connected, unless configured otherwise
pub const DEFAULT_HIGH_BAUD: u32 = 230_400;

/// Worker behaviour that is fixed for the lifetime of a [Station]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StationSettings {
    /// Speed to switch to after connecting, `None` to stay at the port's
    /// initial speed
    pub high_baud: Option<u32>,
    pub connect: ConnectArgs,
}

impl Default for StationSettings {
    fn default() -> Self {
        Self {
            high_baud: Some(DEFAULT_HIGH_BAUD),
            connect: ConnectArgs::default(),
        }
    }
}

/// A running flashing worker
pub struct Station {
    board: Arc<StatusBoard>,
    jobs: Option<SyncSender<FlashJob>>,
    worker: Option<JoinHandle<()>>,
}

impl Station {
    /// Spawn the worker
    ///
    /// The worker takes ownership of the port, the engine and the image
    /// store. `board` must not be shared with another station.
    pub fn start<P, E, S>(
        board: Arc<StatusBoard>,
        port: P,
        engine: E,
        store: S,
        settings: StationSettings,
    ) -> Result<Self, Error>
    where
        P: LoaderPort + Send + 'static,
        E: ProtocolEngine + Send + 'static,
        S: ImageStore + Send + 'static,
    {
        let (jobs, queue) = mpsc::sync_channel(1);
        let mut worker = Worker {
            port,
            engine,
            store,
            settings,
            board: board.clone(),
        };

        let handle = thread::Builder::new()
            .name("flasher".into())
            .spawn(move || worker.serve(queue))
            .map_err(StartupError::Spawn)?;

        debug!("Flashing worker started with {settings:?}");

        Ok(Self {
            board,
            jobs: Some(jobs),
            worker: Some(handle),
        })
    }

    /// Hand `job` to the worker
    ///
    /// Fails with [Error::Busy] while another job is running, leaving that
    /// job untouched.
    pub fn submit(&self, job: FlashJob) -> Result<(), Error> {
        let Some(jobs) = &self.jobs else {
            return Err(Error::WorkerHalted);
        };

        self.board.try_begin(&job)?;
        info!(
            "Accepted job for {} with {} image(s)",
            job.target(),
            job.images().len()
        );

        match jobs.try_send(job) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.board.abandon();
                Err(Error::Busy)
            }
            Err(TrySendError::Disconnected(_)) => {
                self.board.halt();
                Err(Error::WorkerHalted)
            }
        }
    }

    pub fn board(&self) -> &Arc<StatusBoard> {
        &self.board
    }
}

impl Drop for Station {
    fn drop(&mut self) {
        // Closing the queue lets the worker return once it is idle
        self.jobs.take();

        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("Flashing worker panicked");
            }
        }
    }
}

/// Marks the board halted when the worker thread exits, including by panic
struct HaltOnExit(Arc<StatusBoard>);

impl Drop for HaltOnExit {
    fn drop(&mut self) {
        self.0.halt();
    }
}

struct Worker<P, E, S> {
    port: P,
    engine: E,
    store: S,
    settings: StationSettings,
    board: Arc<StatusBoard>,
}

impl<P, E, S> Worker<P, E, S>
where
    P: LoaderPort,
    E: ProtocolEngine,
    S: ImageStore,
{
    fn serve(&mut self, queue: Receiver<FlashJob>) {
        let _halt = HaltOnExit(self.board.clone());

        for job in queue {
            let outcome = self.run(&job);
            self.board.finish(outcome);
        }

        debug!("Job queue closed, flashing worker exiting");
    }

    fn run(&mut self, job: &FlashJob) -> JobOutcome {
        self.board.set_status("Starting...");
        let original_baud = self.port.transport_speed();

        let result = match panic::catch_unwind(AssertUnwindSafe(|| self.flash(job))) {
            Ok(result) => result,
            Err(payload) => {
                error!("Worker panicked during the job for {}", job.target());
                self.board.set_status(Error::WorkerHalted.to_string());
                self.cleanup(original_baud);
                self.board.halt();
                panic::resume_unwind(payload);
            }
        };

        let outcome = match result {
            Ok(()) => {
                info!("Job for {} finished", job.target());
                self.board.set_status("Success");
                JobOutcome::Success
            }
            Err(e) => {
                error!("Job for {} failed: {e}", job.target());
                let message = e.to_string();
                self.board.set_status(message.clone());
                JobOutcome::Failed(message)
            }
        };

        self.cleanup(original_baud);

        outcome
    }

    fn flash(&mut self, job: &FlashJob) -> Result<(), Error> {
        self.board.set_stage(Stage::EnteringBootloader);
        self.board.set_status("Entering bootloader...");
        self.port.enter_bootloader();

        self.board.set_stage(Stage::Connecting);
        self.board.set_status("Connecting...");
        self.engine
            .connect(&mut self.port, &self.settings.connect)
            .map_err(Error::Connect)?;

        match (self.engine.target(), job.chip()) {
            (Some(found), Some(expected)) if found != expected => {
                let message = format!("Job is tagged for {expected}, but {found} is connected");
                warn!("{message}");
                self.board.log().append(message);
            }
            (Some(found), _) => info!("Connected to {found}"),
            (None, _) => info!("Connected to an unidentified target"),
        }
        if job.chip().is_none() {
            warn!("Unknown target chip tag `{}`", job.target());
        }

        if let Some(baud) = self.settings.high_baud {
            self.negotiate_speed(baud);
        }

        let count = job.images().len();
        for (index, image) in job.images().iter().enumerate() {
            self.flash_image(index, count, image)?;
        }

        Ok(())
    }

    /// Failing to speed up is not fatal, the job continues at the old speed
    fn negotiate_speed(&mut self, baud: u32) {
        let current = self.port.transport_speed();
        if baud == current {
            return;
        }

        self.board.set_stage(Stage::NegotiatingBaud);
        self.board.set_status("Setting baud rate...");

        if let Err(e) = self.engine.change_transport_speed(&mut self.port, baud) {
            let e = Error::SpeedNegotiation(e);
            warn!("{e}, continuing at {current} baud");
            return;
        }

        if let Err(e) = self.port.change_transport_speed(baud) {
            // The target already listens at the new speed
            let message = format!("Target is at {baud} baud, the port could not follow: {e}");
            error!("{message}");
            self.board.log().append(message);

            match self.engine.change_transport_speed(&mut self.port, current) {
                Ok(()) => warn!("Target switched back to {current} baud"),
                Err(e) => error!("Failed to switch the target back to {current} baud: {e}"),
            }
            return;
        }

        info!("Transport speed raised to {baud} baud");
    }

    fn flash_image(&mut self, index: usize, count: usize, image: &FlashImage) -> Result<(), Error> {
        let name = &image.name;
        self.board
            .set_status(format!("Flashing {}/{}: {}", index + 1, count, name));
        self.board.set_progress(0, job_percent(index, count, 0));

        let mut stream = match self.store.open(name) {
            Ok(stream) => stream,
            Err(StorageError::NotFound(_)) => return Err(Error::MissingImage(name.clone())),
            Err(e) => return Err(e.into()),
        };
        let size = u32::try_from(stream.size()).map_err(|_| Error::ImageTooLarge {
            image: name.clone(),
            size: stream.size(),
        })?;

        self.board.set_stage(Stage::Erasing);
        self.board.set_status(format!("Erasing {name}..."));
        self.engine
            .flash_start(&mut self.port, image.address, size, FLASH_WRITE_SIZE as u32)
            .map_err(|source| Error::Erase {
                image: name.clone(),
                source,
            })?;

        self.board.set_stage(Stage::Writing);
        let chunks = (size as usize).div_ceil(FLASH_WRITE_SIZE);
        let mut buffer = vec![0; FLASH_WRITE_SIZE];
        let mut written = 0u32;

        for chunk in 1..=chunks {
            let want = FLASH_WRITE_SIZE.min((size - written) as usize);
            stream
                .read_exact(&mut buffer[..want])
                .map_err(|source| StorageError::Io {
                    name: name.clone(),
                    source,
                })?;

            self.engine
                .flash_write(&mut self.port, &buffer[..want])
                .map_err(|source| Error::Write {
                    image: name.clone(),
                    offset: image.address + written,
                    source,
                })?;
            written += want as u32;

            let image_percent = percent(written, size);
            self.board
                .set_progress(image_percent, job_percent(index, count, image_percent));
            self.board
                .set_status(format!("Writing {name}: chunk {chunk}/{chunks}"));
        }

        if size == 0 {
            self.board.set_progress(100, job_percent(index, count, 100));
        }

        info!("Flashed {name} ({size} bytes) at {:#x}", image.address);

        Ok(())
    }

    fn cleanup(&mut self, original_baud: u32) {
        self.board.set_stage(Stage::Finishing);

        if let Err(e) = self.port.change_transport_speed(original_baud) {
            error!("Failed to restore {original_baud} baud: {e}");
        }
        self.port.reset_target();
    }
}

fn percent(done: u32, total: u32) -> u8 {
    if total == 0 {
        return 100;
    }

    (u64::from(done) * 100 / u64::from(total)).min(100) as u8
}

/// Whole job progress, weighting every image equally
fn job_percent(index: usize, count: usize, image_percent: u8) -> u8 {
    let done = index * 100 + usize::from(image_percent);
    (done / count.max(1)).min(100) as u8
}

//! A fake data-logger that speaks the same wire protocol as the real ones.
//!
//! It serves a single host, answers handshake requests, waits for the start
//! frame of its plan and then streams synthetic blocks until it sees the
//! stop frame or the host goes away.

use crate::error::{Error, Result};
use crate::frame::ConfigFrame;
use crate::handshake::{ProbeSettings, Request, RESPONSE_LEN};
use crate::plan::AcquisitionPlan;
use crate::profile::{ChannelKind, DeviceProfile};
use log::{debug, info, warn};
use rand::prelude::*;
use std::f64::consts::PI;
use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::{mpsc, Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

const POLL: Duration = Duration::from_millis(2);
const STALL: Duration = Duration::from_secs(1);
const FIRMWARE: &[u8] = b"biolink-sim 1.0";
const BATTERY: u8 = 87;

enum Signal {
    Stop,
}

enum Endpoint {
    Listen(TcpListener),
    Connect(SocketAddr),
}

/// Configures a [`Simulator`] before it starts serving.
pub struct SimulatorBuilder {
    plan: AcquisitionPlan,
    probes: ProbeSettings,
    noise: f64,
    paced: bool,
}

impl SimulatorBuilder {
    /// What to answer a probe settings request with.
    pub fn probes(mut self, probes: ProbeSettings) -> Self {
        self.probes = probes;
        self
    }

    /// Amplitude of the uniform noise added to every sine, in raw counts.
    pub fn noise(mut self, noise: f64) -> Self {
        self.noise = noise.abs();
        self
    }

    /// Stream blocks as fast as the socket takes them.
    pub fn unpaced(mut self) -> Self {
        self.paced = false;
        self
    }

    /// Bind `addr` and wait for the host to dial in, like the amplifiers do.
    pub fn listen(self, addr: impl ToSocketAddrs) -> Result<Simulator> {
        let listener = TcpListener::bind(addr)?;
        let local = listener.local_addr()?;
        info!("Simulator listening on {}", local);
        Ok(self.spawn(Endpoint::Listen(listener), Some(local)))
    }

    /// Dial a host that is listening, like the wireless probes do.
    pub fn connect(self, addr: impl ToSocketAddrs) -> Result<Simulator> {
        let addr = addr
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| Error::invalid("no address to connect the simulator to"))?;
        Ok(self.spawn(Endpoint::Connect(addr), None))
    }

    fn spawn(self, endpoint: Endpoint, local_addr: Option<SocketAddr>) -> Simulator {
        let (tx, rx) = mpsc::channel::<Signal>();
        let received = Arc::new(Mutex::new(Vec::new()));
        let th_received = Arc::clone(&received);

        let handle = thread::spawn(move || -> Result<()> {
            let stream = match endpoint {
                Endpoint::Listen(listener) => listener.accept()?.0,
                Endpoint::Connect(addr) => TcpStream::connect(addr)?,
            };
            stream.set_read_timeout(Some(POLL))?;
            stream.set_write_timeout(Some(STALL))?;
            stream.set_nodelay(true)?;
            Device::new(self, stream, th_received, rx).run()
        });

        Simulator {
            handle: Some(handle),
            tx,
            received,
            local_addr,
        }
    }
}

/// A running fake device.
pub struct Simulator {
    handle: Option<thread::JoinHandle<Result<()>>>,
    tx: mpsc::Sender<Signal>,
    received: Arc<Mutex<Vec<Vec<u8>>>>,
    local_addr: Option<SocketAddr>,
}

impl Simulator {
    /// A simulator of the device `plan` talks to: sines plus a little
    /// noise, paced at the plan's frame rate.
    pub fn builder(plan: AcquisitionPlan) -> SimulatorBuilder {
        SimulatorBuilder {
            plan,
            probes: ProbeSettings::default(),
            noise: 2.0,
            paced: true,
        }
    }

    /// Where a listening simulator accepts its host.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Every command frame received so far, in order.
    pub fn received(&self) -> Vec<Vec<u8>> {
        self.received
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Ask the device to hang up and wait for it.
    pub fn stop(mut self) -> Result<()> {
        let _ = self.tx.send(Signal::Stop);
        self.join_inner()
    }

    /// Wait for the device to finish on its own, after a stop frame or a
    /// disconnect.
    pub fn join(mut self) -> Result<()> {
        self.join_inner()
    }

    fn join_inner(&mut self) -> Result<()> {
        match self.handle.take() {
            Some(thread) => thread.join().map_err(|_| Error::SessionPanicked)?,
            None => Ok(()),
        }
    }
}

impl Drop for Simulator {
    /// Signals the device but does not wait: a listener nobody dialed
    /// would never return from `accept`.
    fn drop(&mut self) {
        let _ = self.tx.send(Signal::Stop);
    }
}

/// Everything the device thread owns.
struct Device {
    plan: AcquisitionPlan,
    probes: ProbeSettings,
    noise: f64,
    paced: bool,
    stream: TcpStream,
    received: Arc<Mutex<Vec<Vec<u8>>>>,
    rx: mpsc::Receiver<Signal>,
    pending: Vec<u8>,
    streaming: bool,
    sample: usize,
}

impl Device {
    fn new(
        builder: SimulatorBuilder,
        stream: TcpStream,
        received: Arc<Mutex<Vec<Vec<u8>>>>,
        rx: mpsc::Receiver<Signal>,
    ) -> Self {
        Self {
            plan: builder.plan,
            probes: builder.probes,
            noise: builder.noise,
            paced: builder.paced,
            stream,
            received,
            rx,
            pending: Vec::new(),
            streaming: false,
            sample: 0,
        }
    }

    fn run(mut self) -> Result<()> {
        let block_time =
            Duration::from_secs_f64(self.plan.frames_per_block as f64 / self.plan.frame_rate_hz as f64);
        let mut next_block = Instant::now();

        loop {
            if let Ok(Signal::Stop) = self.rx.try_recv() {
                info!("Simulator stopped");
                return Ok(());
            }
            if !self.receive()? {
                info!("Host hung up");
                return Ok(());
            }
            if !self.handle_commands()? {
                info!("Stop frame received");
                return Ok(());
            }
            if !self.streaming {
                continue;
            }

            if self.paced {
                let now = Instant::now();
                if next_block > now {
                    spin_sleep::sleep(next_block - now);
                }
                next_block += block_time;
            }
            let block = self.next_block()?;
            match self.stream.write_all(&block) {
                Ok(()) => {}
                Err(e) if matches!(
                    e.kind(),
                    ErrorKind::BrokenPipe | ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted
                ) =>
                {
                    info!("Host went away while streaming");
                    return Ok(());
                }
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    warn!("Host stopped reading, hanging up");
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Pull whatever the host sent. False once the host has closed.
    fn receive(&mut self) -> Result<bool> {
        let mut buf = [0u8; 256];
        match self.stream.read(&mut buf) {
            Ok(0) => Ok(false),
            Ok(n) => {
                self.pending.extend_from_slice(&buf[..n]);
                Ok(true)
            }
            Err(e) if matches!(
                e.kind(),
                ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
            ) =>
            {
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::ConnectionReset => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn record(&self, frame: &[u8]) {
        self.received
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(frame.to_vec());
    }

    /// Consume `frame` if `pending` starts with it.
    fn take(&mut self, frame: &ConfigFrame) -> bool {
        if self.pending.starts_with(frame.as_bytes()) {
            self.pending.drain(..frame.len());
            self.record(frame.as_bytes());
            true
        } else {
            false
        }
    }

    /// Act on every complete command in `pending`. False once the stop
    /// frame has arrived.
    fn handle_commands(&mut self) -> Result<bool> {
        loop {
            if self.pending.is_empty() {
                return Ok(true);
            }
            let stop = self.plan.stop.clone();
            if self.streaming && self.take(&stop) {
                return Ok(false);
            }
            let starts = self.plan.start.clone();
            if starts.iter().any(|start| self.take(start)) {
                if !self.streaming {
                    info!("Start frame received, streaming");
                }
                self.streaming = true;
                continue;
            }
            if !self.streaming && self.answer_request()? {
                continue;
            }

            let longest = self
                .plan
                .start
                .iter()
                .chain(std::iter::once(&self.plan.stop))
                .map(ConfigFrame::len)
                .max()
                .unwrap_or(1);
            if self.pending.len() < longest.max(2) {
                return Ok(true);
            }
            warn!("Simulator discarding unexpected byte {:#04X}", self.pending[0]);
            self.pending.remove(0);
        }
    }

    fn answer_request(&mut self) -> Result<bool> {
        let Some(request) = self.pending.first().copied().and_then(Request::from_code) else {
            return Ok(false);
        };
        if !self.take(&request.frame()) {
            return Ok(false);
        }

        let mut response = [0u8; RESPONSE_LEN];
        match request {
            Request::ProbeSettings => response = self.probes.to_response(),
            Request::FirmwareVersion => {
                response[0] = request.code();
                response[1..=FIRMWARE.len()].copy_from_slice(FIRMWARE);
            }
            Request::BatteryLevel => {
                response[0] = request.code();
                response[1] = BATTERY;
            }
        }
        debug!("Simulator answering {:?}", request);
        self.stream.write_all(&response)?;
        Ok(true)
    }

    fn next_block(&mut self) -> Result<Vec<u8>> {
        let frames = self.plan.frames_per_block;
        let mut rng = thread_rng();
        let counts: Vec<Vec<Vec<i32>>> = self
            .plan
            .layout
            .segments()
            .into_iter()
            .map(|profile| synthesize(profile, frames, self.sample, self.noise, &mut rng))
            .collect();
        self.sample += frames;
        self.plan.layout.encode(&counts, frames)
    }
}

/// Raw counts for one segment: a sine per measuring channel, a counter on
/// control channels. `first_frame` keeps the signal continuous between
/// blocks.
fn synthesize(
    profile: &DeviceProfile,
    frames: usize,
    first_frame: usize,
    noise: f64,
    rng: &mut impl Rng,
) -> Vec<Vec<i32>> {
    let per_frame = profile.samples_per_frame;
    let half = (1i64 << (8 * profile.bytes_per_sample - 1)) as f64;
    let amplitude = half / 8.0;
    let rate = profile.sample_rate_hz.max(1) as f64;

    profile
        .channels
        .iter()
        .enumerate()
        .map(|(c, spec)| {
            let freq = 5.0 + c as f64;
            (0..frames * per_frame)
                .map(|s| {
                    let n = first_frame * per_frame + s;
                    match spec.kind {
                        ChannelKind::Control => (n % 1000) as i32,
                        ChannelKind::Bioelectric | ChannelKind::Auxiliary => {
                            let t = n as f64 / rate;
                            let jitter = rng.gen_range(-noise..=noise);
                            (amplitude * (2.0 * PI * freq * t).sin() + jitter).round() as i32
                        }
                    }
                })
                .collect()
        })
        .collect()
}

//! A running acquisition: the link, the decode loop on its own thread, and
//! the window consumers read from.
//!
//! The loop reads one block at a time, decodes it and feeds every group of
//! it into the shared [`SignalWindow`] under a single lock, so a reader never
//! sees half a block. Control messages are checked between reads; the link's
//! read timeout bounds how long a stop request waits.

use crate::component::Component;
use crate::decoder::BlockDecoder;
use crate::demux::ChannelGroup;
use crate::error::{Error, Result};
use crate::plan::AcquisitionPlan;
use crate::transport::{BlockReader, Link};
use crate::window::{GroupSnapshot, SignalWindow};
use log::{debug, error, info, warn};
use std::net::TcpStream;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Called with every decoded block, on the session thread.
pub type BlockHook = Box<dyn FnMut(&[ChannelGroup]) + Send>;

const DEFAULT_WINDOW: Duration = Duration::from_secs(5);
const DEFAULT_POLL: Duration = Duration::from_millis(100);

enum Signal {
    Resize(Duration),
    Stop,
}

/// Totals of a finished session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionReport {
    /// Blocks decoded and fed to the window
    pub blocks: usize,
    /// Bytes read off the link
    pub bytes: usize,
    /// Blocks that failed to decode and were skipped
    pub dropped: usize,
}

/// Configures a [`Session`] before anything is sent.
pub struct SessionBuilder {
    link: Link,
    plan: AcquisitionPlan,
    window: Duration,
    poll: Duration,
    on_block: Option<BlockHook>,
}

impl SessionBuilder {
    /// How much history the window keeps. Five seconds by default.
    pub fn window(mut self, span: Duration) -> Self {
        self.window = span;
        self
    }

    /// Longest a single read may wait, which is also the longest a stop
    /// request may go unnoticed.
    pub fn poll_interval(mut self, poll: Duration) -> Self {
        self.poll = poll;
        self
    }

    /// Push every decoded block to `hook` as well as into the window.
    pub fn on_block(mut self, hook: impl FnMut(&[ChannelGroup]) + Send + 'static) -> Self {
        self.on_block = Some(Box::new(hook));
        self
    }

    /// Send the start frames and begin streaming in the background.
    pub fn spawn(self) -> Result<Session> {
        let SessionBuilder {
            mut link,
            plan,
            window,
            poll,
            on_block,
        } = self;

        let block_size = plan.block_size();
        if block_size == 0 {
            return Err(Error::invalid("the plan has no channels to stream"));
        }
        if poll.is_zero() {
            return Err(Error::invalid("poll interval must be longer than zero"));
        }

        link.set_read_timeout(Some(poll))?;
        let reader = link.reader()?;
        for frame in &plan.start {
            link.send_frame(frame)?;
        }
        info!(
            "Streaming from {}: {} bytes per block, {} frames per block",
            link.peer_addr(),
            block_size,
            plan.frames_per_block
        );

        let window = Arc::new(Mutex::new(SignalWindow::new(plan.group_specs(), window)));
        let (tx, rx) = mpsc::channel();
        let acquisition = Acquisition {
            link,
            reader,
            decoder: BlockDecoder::new(&plan),
            plan,
            window: Arc::clone(&window),
            on_block,
            rx,
            report: SessionReport::default(),
        };
        let handle = thread::spawn(move || acquisition.run());

        Ok(Session {
            handle: Some(handle),
            tx,
            window,
        })
    }
}

/// A live acquisition. Dropping it stops the acquisition.
pub struct Session {
    handle: Option<JoinHandle<Result<SessionReport>>>,
    tx: Sender<Signal>,
    window: Arc<Mutex<SignalWindow>>,
}

impl Session {
    /// Prepare a session on an open link.
    pub fn builder(link: Link, plan: AcquisitionPlan) -> SessionBuilder {
        SessionBuilder {
            link,
            plan,
            window: DEFAULT_WINDOW,
            poll: DEFAULT_POLL,
            on_block: None,
        }
    }

    /// The recent past of every group, oldest sample first.
    pub fn snapshot(&self) -> Vec<GroupSnapshot> {
        self.window
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshot()
    }

    /// Change how much history the window keeps.
    pub fn resize(&self, span: Duration) {
        if self.tx.send(Signal::Resize(span)).is_err() {
            debug!("Resize after the session ended, ignored");
        }
    }

    /// False once the loop has ended, whether asked to or not.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Send the stop frame, close the link and return the totals, or the
    /// error that ended the session early.
    pub fn stop(mut self) -> Result<SessionReport> {
        self.finish()
    }

    fn finish(&mut self) -> Result<SessionReport> {
        let _ = self.tx.send(Signal::Stop);
        match self.handle.take() {
            Some(thread) => thread.join().map_err(|_| Error::SessionPanicked)?,
            None => Ok(SessionReport::default()),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            warn!("Session ended with an error: {}", e);
        }
    }
}

/// Everything the session thread owns.
struct Acquisition {
    link: Link,
    reader: BlockReader<TcpStream>,
    decoder: BlockDecoder,
    plan: AcquisitionPlan,
    window: Arc<Mutex<SignalWindow>>,
    on_block: Option<BlockHook>,
    rx: Receiver<Signal>,
    report: SessionReport,
}

impl Acquisition {
    fn run(mut self) -> Result<SessionReport> {
        let outcome = self.pump();
        if let Err(e) = &outcome {
            error!("Acquisition ended: {}", e);
        }

        // The device may still be listening even if its stream went away.
        match self.link.send_frame(&self.plan.stop) {
            Ok(()) => info!("Stop frame sent"),
            Err(e) => warn!("Could not send the stop frame: {}", e),
        }
        if let Err(e) = self.link.shutdown() {
            debug!("Shutdown: {}", e);
        }
        if let Err(e) = self.decoder.finalize() {
            warn!("{}", e);
        }

        outcome.map(|()| {
            info!(
                "Session finished: {} blocks, {} bytes, {} dropped",
                self.report.blocks, self.report.bytes, self.report.dropped
            );
            self.report
        })
    }

    /// Read and decode until told to stop or the transport fails.
    fn pump(&mut self) -> Result<()> {
        let block_size = self.plan.block_size();
        loop {
            match self.rx.try_recv() {
                Ok(Signal::Stop) | Err(TryRecvError::Disconnected) => return Ok(()),
                Ok(Signal::Resize(span)) => {
                    debug!("Window resized to {:?}", span);
                    self.lock_window().resize(span);
                }
                Err(TryRecvError::Empty) => {}
            }

            let Some(raw) = self.reader.poll_block(block_size)? else {
                continue;
            };
            self.report.bytes += raw.len();

            let groups = match self.absorb(raw) {
                Ok(groups) => groups,
                Err(e) if e.is_terminal() => return Err(e),
                Err(e) => {
                    warn!("Dropping block: {}", e);
                    self.report.dropped += 1;
                    continue;
                }
            };
            self.report.blocks += 1;
            if let Some(hook) = self.on_block.as_mut() {
                hook(&groups);
            }
        }
    }

    /// Decode one block and feed every group to the window in one lock scope.
    fn absorb(&mut self, raw: Vec<u8>) -> Result<Vec<ChannelGroup>> {
        let groups = self.decoder.convert(raw)?;
        self.lock_window().feed(&groups)?;
        Ok(groups)
    }

    fn lock_window(&self) -> std::sync::MutexGuard<'_, SignalWindow> {
        self.window.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::family::{ProbeConfig, ProbeKind, QuattrocentoConfig, SlotConfig, SyncStationConfig};
    use crate::plan::FrameLayout;
    use crate::simulator::Simulator;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn wait_for(mut done: impl FnMut() -> bool) {
        for _ in 0..500 {
            if done() {
                return;
            }
            thread::sleep(Duration::from_millis(10));
        }
        panic!("timed out");
    }

    #[test]
    fn streams_from_the_simulator_and_stops_it() {
        let plan = SyncStationConfig {
            slots: vec![SlotConfig::new(0), SlotConfig::new(6)],
        }
        .plan()
        .unwrap()
        .with_frames_per_block(20);
        let sim = Simulator::builder(plan.clone())
            .listen("127.0.0.1:0")
            .unwrap();
        let link = Link::connect(sim.local_addr().unwrap(), None).unwrap();

        let seen = Arc::new(AtomicUsize::new(0));
        let th_seen = Arc::clone(&seen);
        let session = Session::builder(link, plan.clone())
            .window(Duration::from_millis(100))
            .poll_interval(Duration::from_millis(20))
            .on_block(move |groups| {
                assert_eq!(groups.len(), 3);
                th_seen.fetch_add(1, Ordering::SeqCst);
            })
            .spawn()
            .unwrap();

        wait_for(|| seen.load(Ordering::SeqCst) >= 15);
        assert!(session.is_running());

        let snapshot = session.snapshot();
        let names: Vec<_> = snapshot.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["Muovi 1", "Due+ 7", "SyncStation"]);
        // 100 ms at 2 kHz
        assert_eq!(snapshot[0].samples.samples_per_channel(), 200);
        assert_eq!(snapshot[0].samples.channel_count(), 38);
        let ramp = snapshot[2].samples.row(5).unwrap();
        assert!(ramp.windows(2).all(|w| w[1] == (w[0] + 1.0) % 1000.0));

        let report = session.stop().unwrap();
        assert!(report.blocks >= 15);
        assert_eq!(report.dropped, 0);
        assert_eq!(report.bytes, report.blocks * plan.block_size());

        wait_for(|| sim.received().len() == 2);
        assert_eq!(sim.received()[1], [0, 0]);
        sim.join().unwrap();
    }

    #[test]
    fn stop_frame_reaches_the_device() {
        let plan = ProbeConfig {
            kind: ProbeKind::QuattroPlus,
            ..Default::default()
        }
        .plan()
        .unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let sim = Simulator::builder(plan.clone())
            .connect(listener.local_addr().unwrap())
            .unwrap();
        let link = Link::accept_on(&listener, None).unwrap();

        let session = Session::builder(link, plan.clone()).spawn().unwrap();
        wait_for(|| !session.snapshot()[0].samples.rows()[0].is_empty());
        session.stop().unwrap();

        // The simulator only hangs up on its own after seeing the stop frame.
        wait_for(|| sim.received().len() == 2);
        assert_eq!(
            sim.received(),
            vec![
                plan.start[0].as_bytes().to_vec(),
                plan.stop.as_bytes().to_vec()
            ]
        );
        sim.join().unwrap();
    }

    #[test]
    fn every_start_frame_is_sent() {
        let plan = QuattrocentoConfig {
            fsamp: 0,
            nch: 0,
            ..Default::default()
        }
        .plan()
        .unwrap();
        let sim = Simulator::builder(plan.clone())
            .listen("127.0.0.1:0")
            .unwrap();
        let link = Link::connect(sim.local_addr().unwrap(), None).unwrap();
        let session = Session::builder(link, plan.clone()).spawn().unwrap();
        wait_for(|| sim.received().len() == 2);
        let report = session.stop().unwrap();
        assert_eq!(report.dropped, 0);
        wait_for(|| sim.received().len() == 3);
        assert_eq!(sim.received()[1], plan.start[1].as_bytes());
    }

    #[test]
    fn peer_disconnect_is_terminal() {
        let plan = ProbeConfig::default().plan().unwrap().with_frames_per_block(1);
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let device = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut start = [0u8; 1];
            stream.read_exact(&mut start).unwrap();
            // Half a block, then hang up.
            stream.write_all(&[0u8; 38]).unwrap();
        });

        let link = Link::connect(addr, None).unwrap();
        let session = Session::builder(link, plan)
            .poll_interval(Duration::from_millis(10))
            .spawn()
            .unwrap();
        device.join().unwrap();
        wait_for(|| !session.is_running());
        assert!(matches!(session.stop(), Err(Error::ConnectionClosed)));
    }

    #[test]
    fn resize_reaches_the_window() {
        let plan = ProbeConfig::default().plan().unwrap();
        let sim = Simulator::builder(plan.clone())
            .listen("127.0.0.1:0")
            .unwrap();
        let link = Link::connect(sim.local_addr().unwrap(), None).unwrap();
        let session = Session::builder(link, plan)
            .window(Duration::from_secs(1))
            .spawn()
            .unwrap();

        session.resize(Duration::from_millis(10));
        wait_for(|| session.snapshot()[0].samples.samples_per_channel() == 20);
        drop(session);
        sim.join().unwrap();
    }

    #[test]
    fn undecodable_blocks_are_dropped() {
        let mut plan = ProbeConfig::default().plan().unwrap().with_frames_per_block(1);
        let FrameLayout::Single(profile) = &mut plan.layout else {
            panic!("expected a single device");
        };
        // Four-byte samples never decode.
        profile.bytes_per_sample = 4;
        let block = plan.block_size();

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let device = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut frame = [0u8; 1];
            stream.read_exact(&mut frame).unwrap();
            stream.write_all(&vec![0u8; 2 * block]).unwrap();
            stream.read_exact(&mut frame).unwrap();
            frame[0]
        });

        let link = Link::connect(addr, None).unwrap();
        let hooked = Arc::new(AtomicUsize::new(0));
        let th_hooked = Arc::clone(&hooked);
        let session = Session::builder(link, plan.clone())
            .poll_interval(Duration::from_millis(10))
            .on_block(move |_| {
                th_hooked.fetch_add(1, Ordering::SeqCst);
            })
            .spawn()
            .unwrap();
        thread::sleep(Duration::from_millis(300));
        assert!(session.is_running());

        let report = session.stop().unwrap();
        assert_eq!(report.dropped, 2);
        assert_eq!(report.blocks, 0);
        assert_eq!(report.bytes, 2 * block);
        assert_eq!(hooked.load(Ordering::SeqCst), 0);
        assert_eq!(device.join().unwrap(), plan.stop.as_bytes()[0]);
    }
}

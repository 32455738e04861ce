//! # Bus Broker
//!
//! Store-nothing relay at the centre of the network transport.
//!
//! ```text
//!  publisher ──push──┐                      ┌──► subscriber (prefix filter)
//!  publisher ──push──┼──► collector ─relay─► broadcaster ──► subscriber
//!  publisher ──push──┘                      └──► subscriber
//! ```
//!
//! Every accepted collector connection gets a reader thread that decodes
//! frames and forwards them to the relay loop over one channel, so frames
//! from one publisher keep their order. The relay loop re-emits each frame
//! verbatim to every subscriber whose prefix set matches the channel.
//!
//! # Delivery semantics
//!
//! At-most-once and best-effort. Each subscriber owns a bounded queue of
//! `send_queue` frames; when a slow subscriber's queue is full new frames
//! for it are dropped and counted, and the relay moves on to the other
//! subscribers. The queue between publisher readers and the relay is
//! bounded by `send_queue` as well: when the relay falls behind, reader
//! threads block and TCP flow control throttles publishers. There is no
//! cross-publisher ordering guarantee.
//!
//! # Failure policy
//!
//! Errors on one connection are logged and end that connection only; the
//! relay loop keeps running until the stop signal is raised.

use crate::frame::{Control, Frame, FrameReader, ReadOutcome};
use crate::{BusError, BusResult, NetworkSettings};
use parking_lot::RwLock;
use rover_common::stop::StopSignal;
use std::io::{self, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Maximum frames relayed per loop iteration before accepting again.
const RELAY_BATCH: usize = 256;

/// A write stalled this long means the subscriber is gone.
const WRITE_TIMEOUT: Duration = Duration::from_secs(2);

/// Counters reported when the broker stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BrokerStats {
    /// Frames received from publishers and offered to subscribers.
    pub relayed: u64,
    /// Frames dropped because a subscriber queue was full.
    pub dropped: u64,
    /// Publisher connections accepted.
    pub publishers: u64,
    /// Subscriber connections accepted.
    pub subscribers: u64,
}

/// The relay endpoint pair.
#[derive(Debug)]
pub struct Broker {
    collector: TcpListener,
    broadcaster: TcpListener,
    settings: NetworkSettings,
}

impl Broker {
    /// Bind the collector and broadcaster sockets.
    ///
    /// # Errors
    /// Returns [`BusError::InvalidSettings`] or an I/O error if a port is taken.
    pub fn bind(settings: &NetworkSettings) -> BusResult<Self> {
        settings.validate().map_err(BusError::InvalidSettings)?;

        let broadcaster = TcpListener::bind(settings.broadcaster_bind())?;
        let collector = TcpListener::bind(settings.collector_bind())?;
        broadcaster.set_nonblocking(true)?;
        collector.set_nonblocking(true)?;

        info!(
            "Bus broker bound: collector={}, broadcaster={}",
            collector.local_addr()?,
            broadcaster.local_addr()?
        );

        Ok(Self {
            collector,
            broadcaster,
            settings: settings.clone(),
        })
    }

    /// Actual collector address (resolves port 0).
    pub fn collector_addr(&self) -> BusResult<SocketAddr> {
        Ok(self.collector.local_addr()?)
    }

    /// Actual broadcaster address (resolves port 0).
    pub fn broadcaster_addr(&self) -> BusResult<SocketAddr> {
        Ok(self.broadcaster.local_addr()?)
    }

    /// Settings clients should use to reach this broker.
    pub fn client_settings(&self) -> BusResult<NetworkSettings> {
        Ok(NetworkSettings {
            collector_port: self.collector_addr()?.port(),
            broadcaster_port: self.broadcaster_addr()?.port(),
            ..self.settings.clone()
        })
    }

    /// Run the relay on a dedicated thread until `stop` is raised.
    pub fn spawn(self, stop: StopSignal) -> BusResult<JoinHandle<BrokerStats>> {
        let handle = thread::Builder::new()
            .name("bus-broker".to_string())
            .spawn(move || self.run(&stop))?;
        Ok(handle)
    }

    /// Run the relay loop on the current thread until `stop` is raised.
    pub fn run(self, stop: &StopSignal) -> BrokerStats {
        let poll = self.settings.poll_interval();
        let (frames_tx, frames_rx) = mpsc::sync_channel::<Frame>(self.settings.send_queue);
        let mut relay = Relay::default();
        let mut workers: Vec<JoinHandle<()>> = Vec::new();
        let mut stats = BrokerStats::default();

        info!("Bus broker started");

        while !stop.is_set() {
            self.accept_publishers(&frames_tx, stop, &mut workers, &mut stats);
            self.accept_subscribers(stop, &mut relay, &mut workers, &mut stats);

            match frames_rx.recv_timeout(poll) {
                Ok(frame) => {
                    relay.broadcast(&frame);
                    for frame in frames_rx.try_iter().take(RELAY_BATCH) {
                        relay.broadcast(&frame);
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }

            workers.retain(|handle| !handle.is_finished());
        }

        stats.relayed = relay.relayed;
        stats.dropped = relay.dropped;

        // Dropping the queues ends every subscriber writer and unblocks
        // publisher readers waiting on a full relay queue.
        drop(relay);
        drop(frames_rx);
        drop(frames_tx);
        for worker in workers {
            if worker.join().is_err() {
                error!("Broker worker thread panicked");
            }
        }

        info!(
            "Bus broker stopped: relayed={}, dropped={}, publishers={}, subscribers={}",
            stats.relayed, stats.dropped, stats.publishers, stats.subscribers
        );
        stats
    }

    fn accept_publishers(
        &self,
        frames_tx: &SyncSender<Frame>,
        stop: &StopSignal,
        workers: &mut Vec<JoinHandle<()>>,
        stats: &mut BrokerStats,
    ) {
        loop {
            match self.collector.accept() {
                Ok((stream, peer)) => {
                    stats.publishers += 1;
                    debug!(%peer, "Publisher connected");
                    let tx = frames_tx.clone();
                    let stop = stop.clone();
                    let poll = self.settings.poll_interval();
                    let spawned = thread::Builder::new()
                        .name("broker-collect".to_string())
                        .spawn(move || pump_publisher(stream, peer, tx, stop, poll));
                    match spawned {
                        Ok(handle) => workers.push(handle),
                        Err(e) => error!(%peer, "Failed to start publisher reader: {}", e),
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    error!("Failed to accept publisher: {}", e);
                    break;
                }
            }
        }
    }

    fn accept_subscribers(
        &self,
        stop: &StopSignal,
        relay: &mut Relay,
        workers: &mut Vec<JoinHandle<()>>,
        stats: &mut BrokerStats,
    ) {
        loop {
            match self.broadcaster.accept() {
                Ok((stream, peer)) => {
                    stats.subscribers += 1;
                    debug!(%peer, "Subscriber connected");
                    if let Err(e) = self.attach_subscriber(stream, peer, stop, relay, workers) {
                        error!(%peer, "Failed to attach subscriber: {}", e);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    error!("Failed to accept subscriber: {}", e);
                    break;
                }
            }
        }
    }

    fn attach_subscriber(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
        stop: &StopSignal,
        relay: &mut Relay,
        workers: &mut Vec<JoinHandle<()>>,
    ) -> io::Result<()> {
        let poll = self.settings.poll_interval();
        stream.set_nonblocking(false)?;
        stream.set_nodelay(true)?;
        stream.set_write_timeout(Some(WRITE_TIMEOUT))?;
        stream.set_read_timeout(Some(poll))?;
        let control_stream = stream.try_clone()?;

        let filters = Arc::new(RwLock::new(Vec::new()));
        let alive = Arc::new(AtomicBool::new(true));
        let (queue, rx) = mpsc::sync_channel(self.settings.send_queue);

        {
            let alive = Arc::clone(&alive);
            let stop = stop.clone();
            workers.push(
                thread::Builder::new()
                    .name("broker-send".to_string())
                    .spawn(move || feed_subscriber(stream, peer, rx, alive, stop, poll))?,
            );
        }
        {
            let filters = Arc::clone(&filters);
            let alive = Arc::clone(&alive);
            let stop = stop.clone();
            workers.push(
                thread::Builder::new()
                    .name("broker-filter".to_string())
                    .spawn(move || track_subscriptions(control_stream, peer, filters, alive, stop))?,
            );
        }

        relay.subscribers.push(SubscriberSlot {
            peer,
            filters,
            queue,
            alive,
            dropped: 0,
        });
        Ok(())
    }
}

// ─── Relay ──────────────────────────────────────────────────────────

struct SubscriberSlot {
    peer: SocketAddr,
    filters: Arc<RwLock<Vec<Vec<u8>>>>,
    queue: SyncSender<Arc<Vec<u8>>>,
    alive: Arc<AtomicBool>,
    dropped: u64,
}

impl SubscriberSlot {
    fn matches(&self, channel: &[u8]) -> bool {
        self.filters
            .read()
            .iter()
            .any(|prefix| channel.starts_with(prefix))
    }
}

#[derive(Default)]
struct Relay {
    subscribers: Vec<SubscriberSlot>,
    relayed: u64,
    dropped: u64,
}

impl Relay {
    fn broadcast(&mut self, frame: &Frame) {
        let encoded = Arc::new(frame.encode());
        let channel = frame.channel.as_bytes();
        self.relayed += 1;

        let Relay {
            subscribers,
            dropped,
            ..
        } = self;
        subscribers.retain_mut(|sub| {
            if !sub.alive.load(Ordering::Acquire) {
                debug!(peer = %sub.peer, "Subscriber detached");
                return false;
            }
            if !sub.matches(channel) {
                return true;
            }
            match sub.queue.try_send(Arc::clone(&encoded)) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    sub.dropped += 1;
                    *dropped += 1;
                    if sub.dropped == 1 || sub.dropped % 1000 == 0 {
                        warn!(
                            peer = %sub.peer,
                            dropped = sub.dropped,
                            "Slow subscriber, dropping messages"
                        );
                    }
                    true
                }
                Err(TrySendError::Disconnected(_)) => false,
            }
        });
    }
}

// ─── Connection workers ─────────────────────────────────────────────

fn pump_publisher(
    mut stream: TcpStream,
    peer: SocketAddr,
    frames: SyncSender<Frame>,
    stop: StopSignal,
    poll: Duration,
) {
    if let Err(e) = stream
        .set_nonblocking(false)
        .and_then(|_| stream.set_read_timeout(Some(poll)))
    {
        error!(%peer, "Failed to configure publisher socket: {}", e);
        return;
    }

    let mut reader = FrameReader::new();
    while !stop.is_set() {
        match reader.fill(&mut stream) {
            Ok(ReadOutcome::Data(_)) => loop {
                match reader.next_frame() {
                    Ok(Some(frame)) => {
                        if frames.send(frame).is_err() {
                            return;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        error!(%peer, "Failed to broadcast message: {}", e);
                        if reader.is_corrupt() {
                            return;
                        }
                    }
                }
            },
            Ok(ReadOutcome::Idle) => {}
            Ok(ReadOutcome::Closed) => {
                debug!(%peer, "Publisher disconnected");
                return;
            }
            Err(e) => {
                error!(%peer, "Failed to read from publisher: {}", e);
                return;
            }
        }
    }
}

fn feed_subscriber(
    mut stream: TcpStream,
    peer: SocketAddr,
    queue: Receiver<Arc<Vec<u8>>>,
    alive: Arc<AtomicBool>,
    stop: StopSignal,
    poll: Duration,
) {
    loop {
        match queue.recv_timeout(poll) {
            Ok(bytes) => {
                if let Err(e) = stream.write_all(&bytes) {
                    warn!(%peer, "Failed to broadcast message: {}", e);
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                if stop.is_set() || !alive.load(Ordering::Acquire) {
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    alive.store(false, Ordering::Release);
    let _ = stream.shutdown(Shutdown::Both);
}

fn track_subscriptions(
    mut stream: TcpStream,
    peer: SocketAddr,
    filters: Arc<RwLock<Vec<Vec<u8>>>>,
    alive: Arc<AtomicBool>,
    stop: StopSignal,
) {
    let mut reader = FrameReader::new();
    while !stop.is_set() && alive.load(Ordering::Acquire) {
        match reader.fill(&mut stream) {
            Ok(ReadOutcome::Data(_)) => loop {
                match reader.next_control() {
                    Ok(Some(Control::Subscribe(prefix))) => {
                        debug!(%peer, prefix = %String::from_utf8_lossy(&prefix), "Subscription added");
                        filters.write().push(prefix);
                    }
                    Ok(Some(Control::Unsubscribe(prefix))) => {
                        let mut filters = filters.write();
                        if let Some(pos) = filters.iter().position(|p| *p == prefix) {
                            filters.remove(pos);
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(%peer, "Invalid subscription request: {}", e);
                        if reader.is_corrupt() {
                            alive.store(false, Ordering::Release);
                            return;
                        }
                    }
                }
            },
            Ok(ReadOutcome::Idle) => {}
            Ok(ReadOutcome::Closed) => {
                debug!(%peer, "Subscriber disconnected");
                break;
            }
            Err(e) => {
                warn!(%peer, "Failed to read subscription requests: {}", e);
                break;
            }
        }
    }
    alive.store(false, Ordering::Release);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Payload;
    use std::time::Instant;

    fn read_frame(
        stream: &mut TcpStream,
        reader: &mut FrameReader,
        deadline: Duration,
    ) -> Option<Frame> {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if let Some(frame) = reader.next_frame().unwrap() {
                return Some(frame);
            }
            if reader.fill(stream).unwrap() == ReadOutcome::Closed {
                return None;
            }
        }
        None
    }

    #[test]
    fn relays_frames_verbatim_to_matching_prefix() {
        let broker = Broker::bind(&NetworkSettings::loopback_ephemeral()).unwrap();
        let settings = broker.client_settings().unwrap();
        let stop = StopSignal::new();
        let handle = broker.spawn(stop.clone()).unwrap();

        let mut sub = TcpStream::connect(settings.broadcaster_endpoint()).unwrap();
        sub.set_read_timeout(Some(Duration::from_millis(20))).unwrap();
        let mut reader = FrameReader::new();
        sub.write_all(&Control::Subscribe(b"cam".to_vec()).encode())
            .unwrap();
        let mut push = TcpStream::connect(settings.collector_endpoint()).unwrap();

        let frame = Frame::from_message("camera", &Payload::from("frame-1")).unwrap();
        let other = Frame::from_message("throttle", &Payload::from(0.3)).unwrap();

        // The subscription is registered asynchronously; resend until it lands.
        let start = Instant::now();
        let received = loop {
            push.write_all(&other.encode()).unwrap();
            push.write_all(&frame.encode()).unwrap();
            if let Some(got) = read_frame(&mut sub, &mut reader, Duration::from_millis(100)) {
                break got;
            }
            assert!(start.elapsed() < Duration::from_secs(5), "no frame relayed");
        };
        assert_eq!(received, frame);
        assert_eq!(received.encode(), frame.encode());

        stop.trigger();
        let stats = handle.join().unwrap();
        assert!(stats.relayed >= 2);
        assert_eq!(stats.subscribers, 1);
        assert_eq!(stats.publishers, 1);
    }

    #[test]
    fn bind_rejects_invalid_settings() {
        let settings = NetworkSettings {
            send_queue: 0,
            ..NetworkSettings::loopback_ephemeral()
        };
        assert!(matches!(
            Broker::bind(&settings),
            Err(BusError::InvalidSettings(_))
        ));
    }

    #[test]
    fn stops_promptly_without_traffic() {
        let broker = Broker::bind(&NetworkSettings::loopback_ephemeral()).unwrap();
        let stop = StopSignal::new();
        let handle = broker.spawn(stop.clone()).unwrap();

        thread::sleep(Duration::from_millis(30));
        let start = Instant::now();
        stop.trigger();
        let stats = handle.join().unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(stats, BrokerStats::default());
    }
}

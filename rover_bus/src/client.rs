//! Network transport client.
//!
//! One client per component (or per process): a push connection to the
//! broker's collector and a subscription connection to its broadcaster.
//! Publishing is fire-and-forget. Received frames are decoded on the
//! client's receive thread and dispatched to local listeners in
//! registration order.
//!
//! A dropped broker connection is logged once and never re-established;
//! from then on messages are silently lost until the process is restarted.

use crate::frame::{Control, Frame, FrameReader, ReadOutcome, check_section};
use crate::registry::ListenerRegistry;
use crate::{Bus, BusError, BusResult, Listener, NetworkSettings, Payload};
use parking_lot::Mutex;
use rover_common::stop::StopSignal;
use std::io::{self, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace};

/// Delay between connection attempts while the broker is coming up.
const CONNECT_RETRY: Duration = Duration::from_millis(50);

/// Bus handle attached to a remote broker.
#[derive(Debug)]
pub struct NetworkBus {
    push: Mutex<TcpStream>,
    control: Mutex<TcpStream>,
    inbound: Mutex<Option<TcpStream>>,
    listeners: Arc<ListenerRegistry>,
    receiver: Mutex<Option<JoinHandle<()>>>,
    poll_interval: Duration,
}

impl NetworkBus {
    /// Connect to the broker described by `settings`.
    ///
    /// Retries until `connect_timeout` so clients may start before the
    /// broker process has bound its sockets.
    ///
    /// # Errors
    /// Returns [`BusError::NotConnected`] when the retry budget is spent.
    pub fn connect(settings: &NetworkSettings) -> BusResult<Self> {
        settings.validate().map_err(BusError::InvalidSettings)?;
        let timeout = settings.connect_timeout();

        let inbound = connect_with_retry(&settings.broadcaster_endpoint(), timeout)?;
        let push = connect_with_retry(&settings.collector_endpoint(), timeout)?;
        push.set_nodelay(true)?;
        inbound.set_nodelay(true)?;
        inbound.set_read_timeout(Some(settings.poll_interval()))?;
        let control = inbound.try_clone()?;

        info!(
            "Bus client connected: collector={}, broadcaster={}",
            settings.collector_endpoint(),
            settings.broadcaster_endpoint()
        );

        Ok(Self {
            push: Mutex::new(push),
            control: Mutex::new(control),
            inbound: Mutex::new(Some(inbound)),
            listeners: Arc::new(ListenerRegistry::new()),
            receiver: Mutex::new(None),
            poll_interval: settings.poll_interval(),
        })
    }

    /// Start the receive loop; it runs until `stop` is raised.
    ///
    /// Calling `start` again is a no-op.
    pub fn start(&self, stop: StopSignal) -> BusResult<()> {
        let Some(stream) = self.inbound.lock().take() else {
            debug!("Bus client receive loop already running");
            return Ok(());
        };
        let listeners = Arc::clone(&self.listeners);
        let poll = self.poll_interval;
        let handle = thread::Builder::new()
            .name("bus-client-rx".to_string())
            .spawn(move || receive_loop(stream, listeners, stop, poll))?;
        *self.receiver.lock() = Some(handle);
        Ok(())
    }

    /// Wait for the receive loop to exit (after the stop signal is raised).
    pub fn join(&self) {
        let handle = self.receiver.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("Bus client receive loop panicked");
            }
        }
    }

    /// Locally registered listeners.
    pub fn listeners(&self) -> &ListenerRegistry {
        &self.listeners
    }
}

impl Bus for NetworkBus {
    fn publish(&self, channel: &str, message: Payload) -> BusResult<()> {
        let bytes = Frame::from_message(channel, &message)?.encode();
        self.push.lock().write_all(&bytes)?;
        trace!(channel, bytes = bytes.len(), "Pushed message");
        Ok(())
    }

    fn subscribe(&self, channels: &[String], listener: Listener) -> BusResult<()> {
        info!("Subscribe to {:?}", channels);
        for channel in channels {
            check_section("channel name", channel, channel.len())?;
        }
        let fresh = self.listeners.add(channels, &listener);
        let mut control = self.control.lock();
        for channel in fresh {
            control.write_all(&Control::Subscribe(channel.into_bytes()).encode())?;
        }
        Ok(())
    }
}

fn connect_with_retry(endpoint: &str, timeout: Duration) -> BusResult<TcpStream> {
    let start = Instant::now();
    loop {
        match TcpStream::connect(endpoint) {
            Ok(stream) => return Ok(stream),
            Err(e) if start.elapsed() < timeout => {
                trace!(endpoint, "Broker not reachable yet: {}", e);
                thread::sleep(CONNECT_RETRY);
            }
            Err(e) => {
                return Err(BusError::NotConnected {
                    addr: endpoint.to_string(),
                    reason: e.to_string(),
                });
            }
        }
    }
}

fn receive_loop(
    mut stream: TcpStream,
    listeners: Arc<ListenerRegistry>,
    stop: StopSignal,
    poll: Duration,
) {
    let mut reader = FrameReader::new();
    let mut degraded = false;

    while !stop.is_set() {
        if degraded {
            stop.wait_timeout(poll);
            continue;
        }
        match reader.fill(&mut stream) {
            Ok(ReadOutcome::Data(_)) => loop {
                match reader.next_frame() {
                    Ok(Some(frame)) => deliver(&listeners, &frame),
                    Ok(None) => break,
                    Err(e) => {
                        error!("Failed to consume message: {}", e);
                        if reader.is_corrupt() {
                            degraded = true;
                            break;
                        }
                    }
                }
            },
            Ok(ReadOutcome::Idle) => {}
            Ok(ReadOutcome::Closed) => {
                error!("Broker closed the subscription stream, messages will be lost");
                degraded = true;
            }
            Err(e) if is_disconnect(&e) => {
                error!("Broker connection lost, messages will be lost: {}", e);
                degraded = true;
            }
            Err(e) => {
                error!("Failed to consume message: {}", e);
                stop.wait_timeout(poll);
            }
        }
    }
    debug!("Bus client receive loop stopped");
}

fn deliver(listeners: &ListenerRegistry, frame: &Frame) {
    match frame.decode_payload() {
        Ok(payload) => {
            listeners.dispatch(&frame.channel, &payload);
        }
        Err(e) => error!("Failed to consume message: {}", e),
    }
}

fn is_disconnect(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
    )
}

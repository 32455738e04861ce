//! Listener registry shared by both transports.
//!
//! Maps a channel name to the ordered list of listeners registered for it.
//! Registration happens on the supervisor's setup thread while dispatch may
//! run concurrently on any component thread, so the map sits behind a
//! read-write lock and dispatch works on a snapshot taken under the read
//! lock. Listeners may therefore publish (or subscribe) re-entrantly.

use crate::{Listener, Payload};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{error, trace};

/// Channel → listeners map with fault-isolated dispatch.
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: RwLock<HashMap<String, Vec<Listener>>>,
}

impl ListenerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listener` on every channel in `channels`.
    ///
    /// Each channel holds a listener at most once: repeated channel names
    /// and re-registration of the same listener are ignored. Returns the
    /// channels that had no listener before this call, in the order given.
    pub fn add(&self, channels: &[String], listener: &Listener) -> Vec<String> {
        let mut map = self.listeners.write();
        let mut fresh = Vec::new();
        for channel in channels {
            let entry = map.entry(channel.clone()).or_default();
            if entry.iter().any(|known| Arc::ptr_eq(known, listener)) {
                continue;
            }
            if entry.is_empty() {
                fresh.push(channel.clone());
            }
            entry.push(Arc::clone(listener));
        }
        fresh
    }

    /// Snapshot of the listeners registered on `channel`, in registration order.
    pub fn listeners(&self, channel: &str) -> Vec<Listener> {
        self.listeners
            .read()
            .get(channel)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of listeners registered on `channel`.
    pub fn listener_count(&self, channel: &str) -> usize {
        self.listeners.read().get(channel).map_or(0, Vec::len)
    }

    /// All channels with at least one listener.
    pub fn channels(&self) -> Vec<String> {
        self.listeners.read().keys().cloned().collect()
    }

    /// Invoke every listener of `channel` in registration order.
    ///
    /// A listener that returns an error or panics is logged and skipped;
    /// the remaining listeners still receive the message. Returns the number
    /// of listeners that handled the message successfully.
    pub fn dispatch(&self, channel: &str, payload: &Payload) -> usize {
        let listeners = self.listeners(channel);
        if listeners.is_empty() {
            trace!(channel, "No listener for message");
            return 0;
        }

        let mut delivered = 0;
        for (index, listener) in listeners.iter().enumerate() {
            match panic::catch_unwind(AssertUnwindSafe(|| listener(channel, payload))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => {
                    error!(channel, listener = index, "Listener failed: {}", e);
                }
                Err(panic) => {
                    error!(
                        channel,
                        listener = index,
                        "Listener panicked: {}",
                        panic_message(panic.as_ref())
                    );
                }
            }
        }
        delivered
    }
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let map = self.listeners.read();
        let mut counts: Vec<_> = map.iter().map(|(k, v)| (k.clone(), v.len())).collect();
        counts.sort();
        f.debug_struct("ListenerRegistry")
            .field("listeners", &counts)
            .finish()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ListenerResult;
    use parking_lot::Mutex;

    fn recorder(tag: &'static str, log: &Arc<Mutex<Vec<String>>>) -> Listener {
        let log = Arc::clone(log);
        Arc::new(move |channel: &str, payload: &Payload| {
            log.lock().push(format!("{tag}:{channel}:{payload}"));
            Ok(())
        })
    }

    fn channels(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn add_reports_fresh_channels_once() {
        let registry = ListenerRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let fresh = registry.add(&channels(&["a", "b", "a"]), &recorder("one", &log));
        assert_eq!(fresh, channels(&["a", "b"]));
        assert_eq!(registry.listener_count("a"), 1);

        let fresh = registry.add(&channels(&["b", "c"]), &recorder("two", &log));
        assert_eq!(fresh, channels(&["c"]));
        assert_eq!(registry.listener_count("b"), 2);
    }

    #[test]
    fn repeated_channel_delivers_once() {
        let registry = ListenerRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let listener = recorder("only", &log);

        registry.add(&channels(&["x", "x"]), &listener);
        assert!(registry.add(&channels(&["x"]), &listener).is_empty());

        assert_eq!(registry.dispatch("x", &Payload::from(7)), 1);
        assert_eq!(*log.lock(), vec!["only:x:7"]);
    }

    #[test]
    fn dispatch_follows_registration_order() {
        let registry = ListenerRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        registry.add(&channels(&["x"]), &recorder("first", &log));
        registry.add(&channels(&["x"]), &recorder("second", &log));

        assert_eq!(registry.dispatch("x", &Payload::from(1)), 2);
        assert_eq!(*log.lock(), vec!["first:x:1", "second:x:1"]);
    }

    #[test]
    fn failing_and_panicking_listeners_do_not_block_others() {
        let registry = ListenerRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let failing: Listener =
            Arc::new(|_: &str, _: &Payload| -> ListenerResult { Err("boom".into()) });
        let panicking: Listener =
            Arc::new(|_: &str, _: &Payload| -> ListenerResult { panic!("listener bug") });
        registry.add(&channels(&["x"]), &failing);
        registry.add(&channels(&["x"]), &panicking);
        registry.add(&channels(&["x"]), &recorder("healthy", &log));

        assert_eq!(registry.dispatch("x", &Payload::Null), 1);
        assert_eq!(*log.lock(), vec!["healthy:x:null"]);
    }

    #[test]
    fn dispatch_without_listeners_is_a_no_op() {
        let registry = ListenerRegistry::new();
        assert_eq!(registry.dispatch("nobody", &Payload::Null), 0);
        assert!(registry.channels().is_empty());
    }
}

//! In-process transport.
//!
//! `publish` invokes every listener of the channel synchronously, in
//! registration order, on the publisher's own thread. Nothing is
//! serialized: all listeners see the very same [`Payload`] by reference,
//! so a publisher must treat a value as read-only once published.

use crate::registry::ListenerRegistry;
use crate::{Bus, BusResult, Listener, Payload};
use tracing::{info, trace};

/// Direct-dispatch bus shared by all components of one process.
#[derive(Debug, Default)]
pub struct DirectBus {
    listeners: ListenerRegistry,
}

impl DirectBus {
    /// Create a bus with no subscriptions.
    pub fn new() -> Self {
        Self::default()
    }

    /// Access the underlying listener registry.
    pub fn listeners(&self) -> &ListenerRegistry {
        &self.listeners
    }
}

impl Bus for DirectBus {
    fn publish(&self, channel: &str, message: Payload) -> BusResult<()> {
        let delivered = self.listeners.dispatch(channel, &message);
        trace!(channel, delivered, "Published message");
        Ok(())
    }

    fn subscribe(&self, channels: &[String], listener: Listener) -> BusResult<()> {
        info!("Subscribe to {:?}", channels);
        self.listeners.add(channels, &listener);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn fan_out_in_subscription_order() {
        let bus = DirectBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["a", "b"] {
            let seen = Arc::clone(&seen);
            bus.subscribe(
                &["x".to_string()],
                Arc::new(move |_: &str, p: &Payload| {
                    seen.lock().push((tag, p.clone()));
                    Ok(())
                }),
            )
            .unwrap();
        }

        bus.publish("x", Payload::from(42)).unwrap();
        assert_eq!(
            *seen.lock(),
            vec![("a", Payload::Int(42)), ("b", Payload::Int(42))]
        );
    }

    #[test]
    fn delivery_happens_on_publisher_thread() {
        let bus = Arc::new(DirectBus::new());
        let seen = Arc::new(Mutex::new(None));
        {
            let seen = Arc::clone(&seen);
            bus.subscribe(
                &["x".to_string()],
                Arc::new(move |_: &str, _: &Payload| {
                    *seen.lock() = Some(thread::current().id());
                    Ok(())
                }),
            )
            .unwrap();
        }

        let publisher = {
            let bus = Arc::clone(&bus);
            thread::spawn(move || {
                bus.publish("x", Payload::Null).unwrap();
                thread::current().id()
            })
        };
        let publisher_id = publisher.join().unwrap();
        assert_eq!(*seen.lock(), Some(publisher_id));
    }

    #[test]
    fn per_publisher_order_is_preserved() {
        let bus = DirectBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = Arc::clone(&seen);
            bus.subscribe(
                &["seq".to_string()],
                Arc::new(move |_: &str, p: &Payload| {
                    seen.lock().push(p.as_i64().unwrap_or(-1));
                    Ok(())
                }),
            )
            .unwrap();
        }

        for i in 0..100 {
            bus.publish("seq", Payload::from(i)).unwrap();
        }
        assert_eq!(*seen.lock(), (0..100).collect::<Vec<i64>>());
    }

    #[test]
    fn listener_may_publish_reentrantly() {
        let bus = Arc::new(DirectBus::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let relay = Arc::clone(&bus);
            bus.subscribe(
                &["in".to_string()],
                Arc::new(move |_: &str, p: &Payload| {
                    relay.publish("out", p.clone())?;
                    Ok(())
                }),
            )
            .unwrap();
        }
        {
            let seen = Arc::clone(&seen);
            bus.subscribe(
                &["out".to_string()],
                Arc::new(move |c: &str, p: &Payload| {
                    seen.lock().push((c.to_string(), p.clone()));
                    Ok(())
                }),
            )
            .unwrap();
        }

        bus.publish("in", Payload::from("hello")).unwrap();
        assert_eq!(
            *seen.lock(),
            vec![("out".to_string(), Payload::from("hello"))]
        );
    }

    #[test]
    fn publishing_to_unsubscribed_channel_succeeds() {
        let bus = DirectBus::new();
        assert!(bus.publish("void", Payload::Null).is_ok());
    }

    #[test]
    fn repeated_subscription_channel_delivers_once() {
        let bus = DirectBus::new();
        let count = Arc::new(Mutex::new(0));
        {
            let count = Arc::clone(&count);
            bus.subscribe(
                &["x".to_string(), "x".to_string()],
                Arc::new(move |_: &str, _: &Payload| {
                    *count.lock() += 1;
                    Ok(())
                }),
            )
            .unwrap();
        }

        bus.publish("x", Payload::from(1)).unwrap();
        assert_eq!(*count.lock(), 1);
    }
}

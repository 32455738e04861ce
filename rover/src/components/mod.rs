//! Built-in components.
//!
//! | Module | Class | Role |
//! |--------|-------|------|
//! | `ticker` | `Ticker` | Publishes an incrementing counter at a fixed interval |
//! | `logger` | `MessageLogger` | Logs every message it receives |
//! | `recorder` | `Recorder` | Appends received messages to a JSON-lines file |
//! | `signal` | `MapRange` | Linear mapping of numeric inputs between two ranges |
//! | `signal` | `Threshold` | Turns numeric inputs into on/off flags |

pub mod logger;
pub mod recorder;
pub mod signal;
pub mod ticker;

use crate::registry::ComponentRegistry;

/// Register every built-in component.
pub fn register_builtins(registry: &mut ComponentRegistry) {
    registry.register("ticker", "Ticker", ticker::Ticker::new);
    registry.register("logger", "MessageLogger", logger::MessageLogger::new);
    registry.register("recorder", "Recorder", recorder::Recorder::new);
    registry.register("signal", "MapRange", signal::MapRange::new);
    registry.register("signal", "Threshold", signal::Threshold::new);
}

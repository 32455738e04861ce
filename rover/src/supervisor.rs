//! # Car Supervisor
//!
//! Builds every configured component, wires it onto the bus and drives
//! the lifecycle of the whole set.
//!
//! # Lifecycle
//!
//! ```text
//!  Registered ──start()──► Started ──(long-running)──► Running
//!       │                     │                           │
//!       └─────────────────────┴────────shutdown()─────────┴──► Stopped
//! ```
//!
//! # Thread mode
//!
//! All components live in this process. With the network transport the
//! broker runs on a thread and every component gets its own client.
//! Start order per component: build, attach bus, `start()`, subscribe,
//! spawn the run loop thread.
//!
//! # Process mode
//!
//! The broker and every component run in their own child process (this
//! executable re-invoked with a serialized [`ChildSpec`]). Children are
//! started one at a time: the next one is spawned only after the previous
//! one reported that its role is up. A failed or missing report fails the
//! whole start. Children stop on their own after the configured time to
//! live, on SIGTERM, or when the supervisor dies.

use crate::component::{Component, ComponentError, listener_for};
use crate::config::{CarConfig, ComponentSpec, Parallelism, Transport};
use crate::error::{CarError, CarResult};
use crate::process::{BROKER_MODULE, ChildRole, ChildSpec, ProcessWatchdog};
use crate::registry::ComponentRegistry;
use rover_bus::{Broker, BrokerStats, BusHandle, DirectBus, NetworkBus, NetworkSettings};
use rover_common::config::LogLevel;
use rover_common::consts::JOIN_POLL_INTERVAL;
use rover_common::stop::StopSignal;
use rover_common::watchdog::{HealthStatus, Watchdog};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Where a component is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Declared and validated, not started.
    Registered,
    /// `start()` succeeded; no run loop.
    Started,
    /// Hosted by a run loop thread or a child process.
    Running,
    /// `shutdown()` has been called (or the child was stopped).
    Stopped,
}

/// Per-component bookkeeping.
struct LifecycleRecord {
    spec: ComponentSpec,
    state: LifecycleState,
    component: Option<Arc<dyn Component>>,
    run: Option<JoinHandle<()>>,
    client: Option<Arc<NetworkBus>>,
    pid: Option<u32>,
}

impl LifecycleRecord {
    fn new(spec: ComponentSpec) -> Self {
        Self {
            spec,
            state: LifecycleState::Registered,
            component: None,
            run: None,
            client: None,
            pid: None,
        }
    }
}

/// Bus wiring chosen for thread mode.
enum BusPlan {
    None,
    Direct(Arc<DirectBus>),
    Network(NetworkSettings),
}

/// The supervisor.
pub struct Car {
    config: CarConfig,
    registry: ComponentRegistry,
    records: Vec<LifecycleRecord>,
    stop: StopSignal,
    executable: Option<PathBuf>,
    child_log_level: LogLevel,
    child_json_logs: bool,
    broker: Option<JoinHandle<BrokerStats>>,
    watchdog: ProcessWatchdog,
    started: bool,
    stopped: bool,
}

impl Car {
    /// Register every configured component.
    ///
    /// All configuration problems surface here, before anything starts.
    ///
    /// # Errors
    /// Any configuration variant of [`CarError`].
    pub fn new(config: CarConfig, registry: ComponentRegistry) -> CarResult<Self> {
        config.validate()?;
        info!("Parsing config to add car components...");

        let mut records = Vec::new();
        let mut names = HashSet::new();
        for (module, entry) in &config.components {
            for spec in registry.resolve(module, entry)? {
                registry.validate(&spec)?;
                if !names.insert(spec.name().to_string()) {
                    return Err(CarError::DuplicateComponent {
                        component: spec.name().to_string(),
                    });
                }
                info!("Added car component - {}", spec.name());
                records.push(LifecycleRecord::new(spec));
            }
        }

        match &config.bus {
            None => {
                if let Some(record) = records.iter().find(|r| r.spec.has_channels()) {
                    return Err(CarError::MissingBus {
                        component: record.spec.name().to_string(),
                    });
                }
                warn!("No [bus] defined in config, components will not be able to communicate");
            }
            Some(bus) if config.parallel == Parallelism::Process => {
                if bus.transport == Transport::Direct {
                    return Err(CarError::BusRequired);
                }
            }
            Some(_) => {}
        }

        let child_log_level = config.shared.log_level;
        Ok(Self {
            config,
            registry,
            records,
            stop: StopSignal::new(),
            executable: None,
            child_log_level,
            child_json_logs: false,
            broker: None,
            watchdog: ProcessWatchdog::new(),
            started: false,
            stopped: false,
        })
    }

    /// Load `path` and register its components.
    pub fn from_file(path: &Path, registry: ComponentRegistry) -> CarResult<Self> {
        Self::new(CarConfig::from_file(path)?, registry)
    }

    /// Use `stop` instead of a private signal (e.g. one wired to Ctrl+C).
    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    /// Executable re-invoked for process-mode children.
    ///
    /// Defaults to the current executable, which must be the `rover` binary.
    pub fn with_executable(mut self, path: impl Into<PathBuf>) -> Self {
        self.executable = Some(path.into());
        self
    }

    /// Log level and format forwarded to process-mode children.
    pub fn with_child_logging(mut self, level: LogLevel, json: bool) -> Self {
        self.child_log_level = level;
        self.child_json_logs = json;
        self
    }

    /// Set the process-mode child lifetime when the file leaves it unset.
    pub fn set_default_ttl(&mut self, ttl: Duration) {
        if self.config.process.ttl_secs.is_none() {
            self.config.process.ttl_secs = Some(ttl.as_secs_f64());
        }
    }

    /// Loaded configuration.
    pub fn config(&self) -> &CarConfig {
        &self.config
    }

    /// Cancellation signal observed by run loops and bus clients.
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Block until the stop signal is raised or `timeout` elapses.
    ///
    /// Returns `true` if the signal was raised.
    pub fn wait(&self, timeout: Duration) -> bool {
        self.stop.wait_timeout(timeout)
    }

    /// Instance names in declaration (start) order.
    pub fn component_names(&self) -> Vec<&str> {
        self.records.iter().map(|r| r.spec.name()).collect()
    }

    /// Lifecycle state of component `name`.
    pub fn state(&self, name: &str) -> Option<LifecycleState> {
        self.record(name).map(|r| r.state)
    }

    /// In-process instance of component `name` (thread mode, once started).
    pub fn component(&self, name: &str) -> Option<Arc<dyn Component>> {
        self.record(name).and_then(|r| r.component.clone())
    }

    /// Health of every child process (process mode), broker first.
    pub fn process_health(&mut self) -> Vec<(String, HealthStatus)> {
        let mut names: Vec<String> = Vec::new();
        if self.watchdog.is_tracked(BROKER_MODULE) {
            names.push(BROKER_MODULE.to_string());
        }
        names.extend(
            self.records
                .iter()
                .filter(|r| r.pid.is_some())
                .map(|r| r.spec.name().to_string()),
        );
        names
            .into_iter()
            .map(|name| {
                let status = self.watchdog.health_check(&name);
                (name, status)
            })
            .collect()
    }

    fn record(&self, name: &str) -> Option<&LifecycleRecord> {
        self.records.iter().find(|r| r.spec.name() == name)
    }

    // ─── Start ──────────────────────────────────────────────────────

    /// Start the bus, then every component in declaration order.
    ///
    /// On failure the components already started are stopped and shut
    /// down before the error is returned. Calling `start` twice is a no-op.
    ///
    /// # Errors
    /// [`CarError::StartFailed`], transport or spawn errors.
    pub fn start(&mut self) -> CarResult<()> {
        if self.started {
            warn!("Car already started");
            return Ok(());
        }
        self.started = true;
        info!(
            "Starting {} component(s) in {:?} mode",
            self.records.len(),
            self.config.parallel
        );

        let result = match self.config.parallel {
            Parallelism::Thread => self.start_threads(),
            Parallelism::Process => self.start_processes(),
        };
        if let Err(e) = &result {
            error!("Car start failed: {}", e);
            if let Err(e) = self.shutdown() {
                error!("Cleanup after failed start: {}", e);
            }
        }
        result
    }

    fn start_bus(&mut self) -> CarResult<BusPlan> {
        let Some(bus) = &self.config.bus else {
            return Ok(BusPlan::None);
        };
        match bus.transport {
            Transport::Direct => Ok(BusPlan::Direct(Arc::new(DirectBus::new()))),
            Transport::Network => {
                let broker = Broker::bind(&bus.network)?;
                let settings = broker.client_settings()?;
                self.broker = Some(broker.spawn(self.stop.clone())?);
                Ok(BusPlan::Network(settings))
            }
        }
    }

    fn start_threads(&mut self) -> CarResult<()> {
        let plan = self.start_bus()?;

        for record in &mut self.records {
            let name = record.spec.name().to_string();
            let component = self.registry.build(&record.spec)?;

            let bus: Option<BusHandle> = match &plan {
                BusPlan::None => None,
                BusPlan::Direct(bus) => Some(Arc::clone(bus) as BusHandle),
                BusPlan::Network(settings) => {
                    let client = Arc::new(NetworkBus::connect(settings)?);
                    client.start(self.stop.clone())?;
                    record.client = Some(Arc::clone(&client));
                    Some(client as BusHandle)
                }
            };
            if let Some(bus) = &bus {
                component.ports().attach(Arc::clone(bus));
            }
            record.component = Some(Arc::clone(&component));

            let long_running = component
                .start()
                .map_err(|source| CarError::StartFailed {
                    component: name.clone(),
                    source,
                })?;
            record.state = LifecycleState::Started;

            if let Some(bus) = &bus {
                if !record.spec.subscription.is_empty() {
                    bus.subscribe(&record.spec.subscription, listener_for(&component))?;
                }
            }

            if long_running {
                record.run = Some(spawn_run_loop(&component, &self.stop)?);
                record.state = LifecycleState::Running;
            }
            info!("Started component {}", name);
        }
        Ok(())
    }

    fn start_processes(&mut self) -> CarResult<()> {
        let executable = match &self.executable {
            Some(path) => path.clone(),
            None => std::env::current_exe().map_err(|source| CarError::Spawn {
                what: "child processes (cannot locate the current executable)".to_string(),
                source,
            })?,
        };
        let network = self.config.bus.as_ref().map(|bus| bus.network.clone());
        let template = ChildSpec {
            role: ChildRole::Broker,
            network: network.clone(),
            ttl_secs: self.config.process.ttl_secs,
            grace_period_ms: self.config.process.grace_period_ms,
            log_level: self.child_log_level,
            json_logs: self.child_json_logs,
        };

        let timeout = self.config.process.start_timeout();

        if network.is_some() {
            let pid = self
                .watchdog
                .spawn_module(BROKER_MODULE, template.command(&executable)?)?;
            await_start(&mut self.watchdog, BROKER_MODULE, timeout)?;
            info!("Started broker process (pid {})", pid);
        }

        for record in &mut self.records {
            let name = record.spec.name().to_string();
            let spec = ChildSpec {
                role: ChildRole::Component(record.spec.clone()),
                ..template.clone()
            };
            let pid = self
                .watchdog
                .spawn_module(&name, spec.command(&executable)?)?;
            record.pid = Some(pid);
            await_start(&mut self.watchdog, &name, timeout)?;
            record.state = LifecycleState::Running;
            info!("Started component {} (pid {})", name, pid);
        }
        Ok(())
    }

    // ─── Shutdown ───────────────────────────────────────────────────

    /// Stop everything.
    ///
    /// Raises the stop signal, waits up to the grace period for run loops,
    /// calls `shutdown()` once on every started component, joins the bus
    /// and terminates child processes (SIGTERM, then SIGKILL after the
    /// grace period). Subsequent calls are no-ops.
    ///
    /// # Errors
    /// [`CarError::Watchdog`] if child processes could not be stopped.
    pub fn shutdown(&mut self) -> CarResult<()> {
        if self.stopped {
            debug!("Car already shut down");
            return Ok(());
        }
        self.stopped = true;
        info!("Shutting down car...");

        if !self.stop.trigger() {
            debug!("Stop signal was already raised");
        }
        let grace = self.config.process.grace_period();

        let deadline = Instant::now() + grace;
        for record in &mut self.records {
            if let Some(handle) = record.run.take() {
                join_within(record.spec.name(), handle, deadline);
            }
        }

        for record in &mut self.records {
            if !matches!(
                record.state,
                LifecycleState::Started | LifecycleState::Running
            ) {
                continue;
            }
            if let Some(component) = &record.component {
                match component.shutdown() {
                    Ok(()) => info!("Stopped component {}", record.spec.name()),
                    Err(e) => error!("Failed to shut down {}: {}", record.spec.name(), e),
                }
            }
            record.state = LifecycleState::Stopped;
        }

        for record in &mut self.records {
            if let Some(client) = record.client.take() {
                client.join();
            }
        }
        if let Some(broker) = self.broker.take() {
            match broker.join() {
                Ok(stats) => info!(
                    "Broker stopped: {} relayed, {} dropped",
                    stats.relayed, stats.dropped
                ),
                Err(_) => error!("Broker thread panicked"),
            }
        }

        let result = self.watchdog.shutdown_all(grace);
        info!("Car shut down");
        result.map_err(CarError::from)
    }
}

impl Drop for Car {
    fn drop(&mut self) {
        if self.started && !self.stopped {
            if let Err(e) = self.shutdown() {
                error!("Shutdown on drop failed: {}", e);
            }
        }
    }
}

/// Wait for the start report of child `name`.
fn await_start(watchdog: &mut ProcessWatchdog, name: &str, timeout: Duration) -> CarResult<()> {
    watchdog
        .await_start(name, timeout)
        .map_err(|reason| CarError::StartFailed {
            component: name.to_string(),
            source: ComponentError::Child(reason),
        })
}

// ─── Run loop helpers (shared with process-mode children) ───────────

/// Run `component.run(stop)` on a thread named after the component.
pub(crate) fn spawn_run_loop(
    component: &Arc<dyn Component>,
    stop: &StopSignal,
) -> CarResult<JoinHandle<()>> {
    let component = Arc::clone(component);
    let stop = stop.clone();
    let name = component.name().to_string();
    thread::Builder::new()
        .name(name.clone())
        .spawn(move || {
            debug!("{} run loop started", component.name());
            match component.run(&stop) {
                Ok(()) => debug!("{} run loop finished", component.name()),
                Err(e) => error!("{} run loop failed: {}", component.name(), e),
            }
        })
        .map_err(|source| CarError::Spawn {
            what: format!("run loop of {name}"),
            source,
        })
}

/// Join `handle` if it finishes before `deadline`, otherwise detach it.
pub(crate) fn join_within(name: &str, handle: JoinHandle<()>, deadline: Instant) -> bool {
    while !handle.is_finished() && Instant::now() < deadline {
        thread::sleep(JOIN_POLL_INTERVAL);
    }
    if !handle.is_finished() {
        warn!("{} did not stop within the grace period, abandoning its run loop", name);
        return false;
    }
    if handle.join().is_err() {
        error!("{} run loop panicked", name);
    }
    true
}

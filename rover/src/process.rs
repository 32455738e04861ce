//! # Process Mode
//!
//! In process mode the supervisor re-invokes its own executable once for
//! the broker and once per component:
//!
//! ```text
//! rover child --spec '{"role":{"kind":"component","spec":{...}},...}'
//! ```
//!
//! Each child installs its own OS signal handler, asks the kernel to send
//! it SIGTERM when the supervisor dies (Linux), runs until its time to
//! live expires or it is signalled, then shuts its component down.
//!
//! # Start report
//!
//! Once its role is up (broker bound, or component started and
//! subscribed) a child prints a single report line on stdout:
//!
//! ```text
//! rover:ready
//! rover:failed: <error>
//! ```
//!
//! Any other stdout line is forwarded to the supervisor's stdout. A child
//! that exits without a report failed to start.
//!
//! [`ProcessWatchdog`] is the supervisor side: it tracks the children,
//! waits for their start reports and stops them with SIGTERM, escalating
//! to SIGKILL after the grace period.

use crate::component::{Component, listener_for};
use crate::config::ComponentSpec;
use crate::error::{CarError, CarResult};
use crate::registry::ComponentRegistry;
use crate::supervisor::{join_within, spawn_run_loop};
use rover_bus::{Broker, Bus, NetworkBus, NetworkSettings};
use rover_common::config::LogLevel;
use rover_common::consts::JOIN_POLL_INTERVAL;
use rover_common::stop::StopSignal;
use rover_common::watchdog::{HealthStatus, Watchdog, WatchdogError};
use serde::{Deserialize, Serialize};
use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;
use std::process::{Child, ChildStdout, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Watchdog name of the broker child.
pub const BROKER_MODULE: &str = "bus-broker";

/// Start report of a child whose role is up.
pub const READY_LINE: &str = "rover:ready";

/// Prefix of the start report of a child whose role failed.
pub const FAILED_PREFIX: &str = "rover:failed:";

// ─── Child specification ────────────────────────────────────────────

/// What a child process hosts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "spec", rename_all = "lowercase")]
pub enum ChildRole {
    /// The network bus broker.
    Broker,
    /// One component.
    Component(ComponentSpec),
}

/// Everything a child needs, passed as JSON on its command line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildSpec {
    /// Broker or component.
    pub role: ChildRole,
    /// Broker endpoints; `None` when the car has no bus.
    pub network: Option<NetworkSettings>,
    /// Self-termination delay in seconds.
    pub ttl_secs: Option<f64>,
    /// Grace period for the component's run loop.
    pub grace_period_ms: u64,
    /// Log verbosity.
    pub log_level: LogLevel,
    /// Log as JSON.
    pub json_logs: bool,
}

impl ChildSpec {
    /// Name used in logs and by the watchdog.
    pub fn name(&self) -> &str {
        match &self.role {
            ChildRole::Broker => BROKER_MODULE,
            ChildRole::Component(spec) => spec.name(),
        }
    }

    /// Serialize for the command line.
    pub fn to_json(&self) -> CarResult<String> {
        serde_json::to_string(self).map_err(|e| CarError::ChildSpec(e.to_string()))
    }

    /// Parse a command line argument.
    pub fn from_json(text: &str) -> CarResult<Self> {
        serde_json::from_str(text).map_err(|e| CarError::ChildSpec(e.to_string()))
    }

    /// Command launching this child through `executable`.
    pub fn command(&self, executable: &Path) -> CarResult<Command> {
        let mut command = Command::new(executable);
        command
            .arg("child")
            .arg("--spec")
            .arg(self.to_json()?)
            .stdin(Stdio::null())
            .stdout(Stdio::piped());
        Ok(command)
    }

    fn ttl(&self) -> Option<Duration> {
        self.ttl_secs
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
    }

    fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}

// ─── Child entry point ──────────────────────────────────────────────

/// Body of a process-mode child. Returns when the child should exit.
///
/// # Errors
/// Build, start or transport errors of the hosted role. Start errors are
/// also reported to the supervisor on stdout.
pub fn run_child(registry: &ComponentRegistry, spec: ChildSpec) -> CarResult<()> {
    let stop = StopSignal::with_os_signals()?;
    arm_parent_death_signal();
    info!("{} process started (pid {})", spec.name(), std::process::id());

    let ttl = spec.ttl();
    let grace = spec.grace_period();
    match spec.role {
        ChildRole::Broker => run_broker(spec.network, &stop, ttl),
        ChildRole::Component(component) => {
            run_component(registry, &component, spec.network, &stop, ttl, grace)
        }
    }
}

fn run_broker(
    network: Option<NetworkSettings>,
    stop: &StopSignal,
    ttl: Option<Duration>,
) -> CarResult<()> {
    let started = network
        .ok_or_else(|| CarError::ChildSpec("broker needs network settings".to_string()))
        .and_then(|settings| Ok(Broker::bind(&settings)?.spawn(stop.clone())?));
    let handle = report_start(started)?;

    wait_for_stop(stop, ttl);
    match handle.join() {
        Ok(stats) => info!(
            "Broker exiting: {} relayed, {} dropped",
            stats.relayed, stats.dropped
        ),
        Err(_) => warn!("Broker thread panicked"),
    }
    Ok(())
}

/// A component brought up inside a child.
struct Hosted {
    component: Arc<dyn Component>,
    client: Option<Arc<NetworkBus>>,
    run: Option<JoinHandle<()>>,
}

fn run_component(
    registry: &ComponentRegistry,
    spec: &ComponentSpec,
    network: Option<NetworkSettings>,
    stop: &StopSignal,
    ttl: Option<Duration>,
    grace: Duration,
) -> CarResult<()> {
    let name = spec.name();
    let hosted = report_start(start_component(registry, spec, network, stop))?;
    info!("Started component {}", name);

    wait_for_stop(stop, ttl);

    if let Some(handle) = hosted.run {
        join_within(name, handle, Instant::now() + grace);
    }
    if let Err(e) = hosted.component.shutdown() {
        warn!("Failed to shut down {}: {}", name, e);
    }
    if let Some(client) = hosted.client {
        client.join();
    }
    info!("{} process exiting", name);
    Ok(())
}

fn start_component(
    registry: &ComponentRegistry,
    spec: &ComponentSpec,
    network: Option<NetworkSettings>,
    stop: &StopSignal,
) -> CarResult<Hosted> {
    let component = registry.build(spec)?;

    let client = match network {
        Some(settings) => {
            let client = Arc::new(NetworkBus::connect(&settings)?);
            client.start(stop.clone())?;
            component.ports().attach(client.clone());
            Some(client)
        }
        None => None,
    };

    let long_running = component
        .start()
        .map_err(|source| CarError::StartFailed {
            component: spec.name().to_string(),
            source,
        })?;
    if let Some(client) = &client {
        if !spec.subscription.is_empty() {
            client.subscribe(&spec.subscription, listener_for(&component))?;
        }
    }
    let run = if long_running {
        Some(spawn_run_loop(&component, stop)?)
    } else {
        None
    };
    Ok(Hosted {
        component,
        client,
        run,
    })
}

/// Print the start report for `started` and pass it through.
fn report_start<T>(started: CarResult<T>) -> CarResult<T> {
    let line = match &started {
        Ok(_) => READY_LINE.to_string(),
        Err(e) => format!("{FAILED_PREFIX} {}", e.to_string().replace('\n', " ")),
    };
    let mut stdout = io::stdout().lock();
    if let Err(e) = writeln!(stdout, "{line}").and_then(|()| stdout.flush()) {
        warn!("Cannot report start to the supervisor: {}", e);
    }
    started
}

/// Block until `stop` is raised or `ttl` expires (raising it).
fn wait_for_stop(stop: &StopSignal, ttl: Option<Duration>) {
    match ttl {
        Some(ttl) => {
            if !stop.wait_timeout(ttl) {
                info!("Time to live of {:?} expired", ttl);
                stop.trigger();
            }
        }
        None => stop.wait(),
    }
}

#[cfg(target_os = "linux")]
fn arm_parent_death_signal() {
    use nix::sys::signal::Signal;
    if let Err(e) = nix::sys::prctl::set_pdeathsig(Signal::SIGTERM) {
        warn!("Cannot tie process lifetime to the supervisor: {}", e);
    }
}

#[cfg(not(target_os = "linux"))]
fn arm_parent_death_signal() {}

// ─── Watchdog ───────────────────────────────────────────────────────

/// Start report received from a child.
#[derive(Debug, Clone, PartialEq, Eq)]
enum StartReport {
    Ready,
    Failed(String),
}

#[derive(Debug)]
struct TrackedChild {
    module: String,
    child: Child,
    status: Option<ExitStatus>,
    report: Option<Receiver<StartReport>>,
}

impl TrackedChild {
    /// Exit status, reaping the child if it has exited.
    fn reap(&mut self) -> Option<ExitStatus> {
        if self.status.is_none() {
            match self.child.try_wait() {
                Ok(status) => self.status = status,
                Err(e) => warn!("Cannot query {} (pid {}): {}", self.module, self.child.id(), e),
            }
        }
        self.status
    }
}

/// [`Watchdog`] over `std::process::Child` handles.
#[derive(Debug, Default)]
pub struct ProcessWatchdog {
    children: Vec<TrackedChild>,
}

impl ProcessWatchdog {
    /// Watchdog with no children.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `module` was spawned by this watchdog.
    pub fn is_tracked(&self, module: &str) -> bool {
        self.children.iter().any(|c| c.module == module)
    }

    /// `(module, pid)` of every tracked child in spawn order.
    pub fn pids(&self) -> Vec<(&str, u32)> {
        self.children
            .iter()
            .map(|c| (c.module.as_str(), c.child.id()))
            .collect()
    }

    /// Wait up to `timeout` for `module` to report that it started.
    ///
    /// Children spawned without a piped stdout are taken as started.
    ///
    /// # Errors
    /// The reason reported by the child, or why no report arrived.
    pub fn await_start(&mut self, module: &str, timeout: Duration) -> Result<(), String> {
        let Some(tracked) = self.children.iter_mut().find(|c| c.module == module) else {
            return Err(format!("{module} is not tracked"));
        };
        let Some(report) = tracked.report.take() else {
            return Ok(());
        };
        match report.recv_timeout(timeout) {
            Ok(StartReport::Ready) => Ok(()),
            Ok(StartReport::Failed(reason)) => Err(reason),
            Err(RecvTimeoutError::Timeout) => Err(format!("no start report within {timeout:?}")),
            Err(RecvTimeoutError::Disconnected) => Err(match tracked.reap() {
                Some(status) => format!("exited with {status} before reporting"),
                None => "closed its output before reporting".to_string(),
            }),
        }
    }
}

/// Forward `stdout` of `module` line by line, picking out its start report.
fn watch_output(module: &str, stdout: ChildStdout) -> Option<Receiver<StartReport>> {
    let (tx, rx) = mpsc::channel();
    let owner = module.to_string();
    let spawned = thread::Builder::new()
        .name(format!("{module}-stdout"))
        .spawn(move || forward_output(&owner, stdout, tx));
    match spawned {
        Ok(_) => Some(rx),
        Err(e) => {
            error!("Cannot watch {} output: {}", module, e);
            None
        }
    }
}

fn forward_output(module: &str, stdout: ChildStdout, report: Sender<StartReport>) {
    for line in BufReader::new(stdout).lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                debug!("{} output closed: {}", module, e);
                break;
            }
        };
        let trimmed = line.trim();
        if trimmed == READY_LINE {
            let _ = report.send(StartReport::Ready);
        } else if let Some(reason) = trimmed.strip_prefix(FAILED_PREFIX) {
            let _ = report.send(StartReport::Failed(reason.trim().to_string()));
        } else {
            let _ = writeln!(io::stdout().lock(), "{line}");
        }
    }
}

impl Watchdog for ProcessWatchdog {
    fn spawn_module(&mut self, module: &str, mut command: Command) -> Result<u32, WatchdogError> {
        if self.is_tracked(module) {
            return Err(WatchdogError::AlreadyTracked {
                module: module.to_string(),
            });
        }
        let mut child = command.spawn().map_err(|e| WatchdogError::SpawnFailed {
            module: module.to_string(),
            reason: e.to_string(),
        })?;
        let pid = child.id();
        debug!("Spawned {} (pid {})", module, pid);
        let report = child
            .stdout
            .take()
            .and_then(|stdout| watch_output(module, stdout));
        self.children.push(TrackedChild {
            module: module.to_string(),
            child,
            status: None,
            report,
        });
        Ok(pid)
    }

    fn health_check(&mut self, module: &str) -> HealthStatus {
        let Some(tracked) = self.children.iter_mut().find(|c| c.module == module) else {
            return HealthStatus::Unknown;
        };
        match tracked.reap() {
            Some(status) => HealthStatus::Exited {
                exit_code: status.code(),
            },
            None => HealthStatus::Running,
        }
    }

    fn shutdown_all(&mut self, grace: Duration) -> Result<(), WatchdogError> {
        for tracked in self.children.iter_mut().rev() {
            if tracked.reap().is_none() {
                match terminate(&tracked.child) {
                    Ok(()) => debug!("Sent SIGTERM to {}", tracked.module),
                    Err(e) => warn!("Cannot signal {}: {}", tracked.module, e),
                }
            }
        }

        let deadline = Instant::now() + grace;
        while Instant::now() < deadline {
            let mut alive = 0;
            for tracked in self.children.iter_mut() {
                if tracked.reap().is_none() {
                    alive += 1;
                }
            }
            if alive == 0 {
                break;
            }
            thread::sleep(JOIN_POLL_INTERVAL);
        }

        let mut failures = Vec::new();
        for tracked in self.children.iter_mut().rev() {
            if tracked.reap().is_none() {
                warn!(
                    "{} did not exit within {:?}, sending SIGKILL",
                    tracked.module, grace
                );
                if let Err(e) = tracked.child.kill() {
                    failures.push(format!("{}: {}", tracked.module, e));
                }
                match tracked.child.wait() {
                    Ok(status) => tracked.status = Some(status),
                    Err(e) => failures.push(format!("{}: {}", tracked.module, e)),
                }
            }
            match tracked.status {
                Some(status) if status.success() => debug!("{} exited cleanly", tracked.module),
                Some(status) => warn!("{} exited with {}", tracked.module, status),
                None => {}
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(WatchdogError::Other(format!(
                "failed to stop: {}",
                failures.join("; ")
            )))
        }
    }
}

#[cfg(unix)]
fn terminate(child: &Child) -> std::io::Result<()> {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let pid = i32::try_from(child.id())
        .map_err(|_| std::io::Error::other(format!("pid {} out of range", child.id())))?;
    kill(Pid::from_raw(pid), Signal::SIGTERM).map_err(std::io::Error::from)
}

#[cfg(not(unix))]
fn terminate(child: &Child) -> std::io::Result<()> {
    let _ = child;
    Ok(())
}

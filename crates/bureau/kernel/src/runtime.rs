//! The kernel instance: construction, lifecycle, invocation, introspection
//!
//! Every collaborator enters through the builder — work implementations,
//! object sources, governance sources, administrators, teams, and the
//! top-level escalation handler. `build()` validates each office graph and
//! refuses an inconsistent one; nothing is checked at schedule time that
//! can be checked at startup.

use crate::asset::AssetMonitor;
use crate::escalation::{Diagnostic, EscalationHandler, LoggingEscalationHandler};
use crate::flow::Flow;
use crate::handle::ProcessHandle;
use crate::job::build_chain;
use crate::object::ObjectSource;
use crate::office::{OfficeRegistry, OfficeRuntime, OfficeSummary};
use crate::process::ProcessState;
use crate::team::Team;
use crate::thread::ThreadState;
use crate::work::{Param, Payload};
use bureau_types::{
    Failure, KernelError, KernelResult, OfficeModel, OfficeName, ProcessId, TeamName, UnitName,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Kernel tuning knobs
#[derive(Clone, Debug)]
pub struct KernelConfig {
    /// How often the monitor thread sweeps for expired bounded waits
    pub monitor_interval: Duration,
    /// How long `close()` waits for active processes to drain
    pub close_timeout: Duration,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            monitor_interval: Duration::from_millis(10),
            close_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum KernelPhase {
    Closed,
    Open,
    Closing,
}

struct KernelState {
    phase: KernelPhase,
    processes: HashMap<ProcessId, Arc<ProcessState>>,
}

pub(crate) struct KernelCore {
    config: KernelConfig,
    offices: HashMap<OfficeName, Arc<OfficeRuntime>>,
    teams: HashMap<TeamName, Arc<dyn Team>>,
    handler: Arc<dyn EscalationHandler>,
    monitor: AssetMonitor,
    state: Mutex<KernelState>,
    drained: Condvar,
    diagnostics: Mutex<Vec<Diagnostic>>,
    ids: AtomicU64,
}

impl KernelCore {
    pub(crate) fn next_id(&self) -> u64 {
        self.ids.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn monitor(&self) -> &AssetMonitor {
        &self.monitor
    }

    /// Create a process for the unit and schedule its first job node
    pub(crate) fn spawn_process(
        core: &Arc<KernelCore>,
        office: &Arc<OfficeRuntime>,
        unit_index: usize,
        param: Param,
        source_handler: Option<Arc<dyn ObjectSource>>,
    ) -> KernelResult<Arc<ProcessState>> {
        let process = ProcessState::new(Arc::clone(core), Arc::clone(office), source_handler);
        {
            let mut state = core.state.lock().expect("kernel lock poisoned");
            if state.phase != KernelPhase::Open {
                return Err(KernelError::NotOpen);
            }
            state.processes.insert(process.id(), Arc::clone(&process));
        }
        Self::start_thread(core, &process, office, unit_index, param, false);
        Ok(process)
    }

    /// Start a logical thread of the process running the given unit
    pub(crate) fn start_thread(
        core: &Arc<KernelCore>,
        process: &Arc<ProcessState>,
        office: &Arc<OfficeRuntime>,
        unit_index: usize,
        param: Param,
        escalation_handling: bool,
    ) {
        let thread = ThreadState::spawn(
            Arc::clone(process),
            Arc::clone(office),
            Arc::clone(core),
            escalation_handling,
        );
        let flow = Flow::new(thread);
        let head = build_chain(core, office, &flow, unit_index, param, None);
        head.activate();
    }

    /// Invoke a unit on behalf of a managed object source
    pub(crate) fn invoke_for_source(
        core: &Arc<KernelCore>,
        office: &Arc<OfficeRuntime>,
        unit: &UnitName,
        parameter: Option<Payload>,
        source: Arc<dyn ObjectSource>,
    ) -> KernelResult<()> {
        let unit_index = office.model().unit_index(unit).ok_or_else(|| {
            KernelError::UnknownUnit {
                office: office.name().clone(),
                unit: unit.clone(),
            }
        })?;
        let param = match parameter {
            Some(payload) => Param::Value(payload),
            None => Param::None,
        };
        Self::spawn_process(core, office, unit_index, param, Some(source))?;
        Ok(())
    }

    /// Deliver a failure to the terminal sink. The handle captures it; a
    /// failure of the handler itself is fatal to the process and recorded
    /// as a diagnostic, never re-escalated.
    pub(crate) fn top_level(&self, process: &Arc<ProcessState>, failure: Failure) {
        process.record_failure(failure.clone());
        if let Err(second) = self.handler.handle(process.id(), &failure) {
            tracing::error!(
                process = %process.id(),
                failure = %second,
                "top-level handler failed; forcing process completion"
            );
            self.diagnostics
                .lock()
                .expect("diagnostics lock poisoned")
                .push(Diagnostic::handler_failure(process.id(), second));
            self.force_complete_process(process, "top-level handler failure");
        }
    }

    /// Cancel a process's pending work so its completion count drains.
    /// Running bodies finish naturally; nothing is interrupted.
    pub(crate) fn force_complete_process(&self, process: &Arc<ProcessState>, reason: &str) {
        if !process.force_cancel() {
            return;
        }
        self.diagnostics
            .lock()
            .expect("diagnostics lock poisoned")
            .push(Diagnostic::forced_completion(process.id(), reason));
        for job in self.monitor.drain_process(process.id()) {
            job.reactivate(None);
        }
    }

    pub(crate) fn deregister_process(&self, id: ProcessId) {
        let mut state = self.state.lock().expect("kernel lock poisoned");
        state.processes.remove(&id);
        if state.processes.is_empty() {
            self.drained.notify_all();
        }
    }
}

/// The execution kernel
pub struct Bureau {
    core: Arc<KernelCore>,
    monitor_thread: Mutex<Option<JoinHandle<()>>>,
}

impl Bureau {
    pub fn builder() -> BureauBuilder {
        BureauBuilder::new()
    }

    /// Open the kernel: start teams and the deadline monitor
    pub fn open(&self) -> KernelResult<()> {
        {
            let mut state = self.core.state.lock().expect("kernel lock poisoned");
            if state.phase != KernelPhase::Closed {
                return Err(KernelError::AlreadyOpen);
            }
            state.phase = KernelPhase::Open;
        }
        for team in self.core.teams.values() {
            team.open();
        }
        self.core.monitor.startup();
        let core = Arc::clone(&self.core);
        let interval = self.core.config.monitor_interval;
        let spawned = std::thread::Builder::new()
            .name("bureau-asset-monitor".into())
            .spawn(move || core.monitor.run(interval));
        match spawned {
            Ok(handle) => {
                *self
                    .monitor_thread
                    .lock()
                    .expect("monitor handle lock poisoned") = Some(handle);
            }
            Err(error) => tracing::error!(%error, "failed to start asset monitor thread"),
        }
        tracing::debug!(offices = self.core.offices.len(), "kernel open");
        Ok(())
    }

    /// Invoke a unit of work, returning its completion handle. With an
    /// inline team the process may already be complete on return.
    pub fn invoke(
        &self,
        office: &OfficeName,
        unit: &UnitName,
        parameter: Option<Payload>,
    ) -> KernelResult<ProcessHandle> {
        let office = self
            .core
            .offices
            .get(office)
            .cloned()
            .ok_or_else(|| KernelError::UnknownOffice(office.clone()))?;
        let unit_index =
            office
                .model()
                .unit_index(unit)
                .ok_or_else(|| KernelError::UnknownUnit {
                    office: office.name().clone(),
                    unit: unit.clone(),
                })?;
        let param = match parameter {
            Some(payload) => Param::Value(payload),
            None => Param::None,
        };
        let process = KernelCore::spawn_process(&self.core, &office, unit_index, param, None)?;
        Ok(ProcessHandle::new(process))
    }

    /// Forced shutdown: cancel pending work, wait bounded for running
    /// work to drain, stop teams and the monitor
    pub fn close(&self) -> KernelResult<()> {
        let snapshot: Vec<Arc<ProcessState>> = {
            let mut state = self.core.state.lock().expect("kernel lock poisoned");
            match state.phase {
                KernelPhase::Closed | KernelPhase::Closing => return Ok(()),
                KernelPhase::Open => state.phase = KernelPhase::Closing,
            }
            state.processes.values().cloned().collect()
        };
        for process in &snapshot {
            self.core.force_complete_process(process, "kernel close");
        }

        let deadline = Instant::now() + self.core.config.close_timeout;
        let remaining = {
            let mut state = self.core.state.lock().expect("kernel lock poisoned");
            while !state.processes.is_empty() {
                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                let (guard, _) = self
                    .core
                    .drained
                    .wait_timeout(state, deadline - now)
                    .expect("kernel lock poisoned");
                state = guard;
            }
            state.processes.len()
        };

        self.core.monitor.shutdown();
        if let Some(handle) = self
            .monitor_thread
            .lock()
            .expect("monitor handle lock poisoned")
            .take()
        {
            if handle.join().is_err() {
                tracing::warn!("asset monitor thread exited with a panic");
            }
        }
        for team in self.core.teams.values() {
            team.close();
        }
        self.core.state.lock().expect("kernel lock poisoned").phase = KernelPhase::Closed;

        if remaining > 0 {
            tracing::error!(remaining, "close timed out with processes still active");
            Err(KernelError::CloseTimeout { remaining })
        } else {
            tracing::debug!("kernel closed");
            Ok(())
        }
    }

    /// Point-in-time snapshot of the active offices and their units
    pub fn offices(&self) -> Vec<OfficeSummary> {
        self.core
            .offices
            .values()
            .map(|office| office.summary())
            .collect()
    }

    /// Recorded kernel incidents: handler failures and forced completions
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.core
            .diagnostics
            .lock()
            .expect("diagnostics lock poisoned")
            .clone()
    }
}

/// Assembles a kernel from offices, teams, and the top-level handler
pub struct BureauBuilder {
    offices: Vec<(OfficeModel, OfficeRegistry)>,
    teams: Vec<(TeamName, Arc<dyn Team>)>,
    handler: Arc<dyn EscalationHandler>,
    config: KernelConfig,
}

impl BureauBuilder {
    fn new() -> Self {
        Self {
            offices: Vec::new(),
            teams: Vec::new(),
            handler: Arc::new(LoggingEscalationHandler),
            config: KernelConfig::default(),
        }
    }

    pub fn with_office(mut self, model: OfficeModel, registry: OfficeRegistry) -> Self {
        self.offices.push((model, registry));
        self
    }

    pub fn with_team(mut self, name: impl Into<String>, team: impl Team + 'static) -> Self {
        self.teams.push((TeamName::new(name), Arc::new(team)));
        self
    }

    pub fn with_shared_team(mut self, name: impl Into<String>, team: Arc<dyn Team>) -> Self {
        self.teams.push((TeamName::new(name), team));
        self
    }

    pub fn with_escalation_handler(
        mut self,
        handler: impl EscalationHandler + 'static,
    ) -> Self {
        self.handler = Arc::new(handler);
        self
    }

    pub fn monitor_interval(mut self, interval: Duration) -> Self {
        self.config.monitor_interval = interval;
        self
    }

    pub fn close_timeout(mut self, timeout: Duration) -> Self {
        self.config.close_timeout = timeout;
        self
    }

    /// Validate every office graph and assemble the kernel. Configuration
    /// failures are fatal here — an inconsistent office is refused, not
    /// scheduled.
    pub fn build(self) -> KernelResult<Bureau> {
        let mut teams: HashMap<TeamName, Arc<dyn Team>> = HashMap::new();
        for (name, team) in self.teams {
            if teams.insert(name.clone(), team).is_some() {
                return Err(KernelError::DuplicateTeam(name));
            }
        }

        let mut offices: HashMap<OfficeName, Arc<OfficeRuntime>> = HashMap::new();
        for (model, registry) in self.offices {
            let name = model.name.clone();
            let office = OfficeRuntime::build(model, registry, &teams).map_err(|error| {
                tracing::error!(office = %name, %error, "office configuration refused");
                error
            })?;
            if offices.insert(name.clone(), Arc::new(office)).is_some() {
                return Err(KernelError::DuplicateOffice(name));
            }
        }

        Ok(Bureau {
            core: Arc::new(KernelCore {
                config: self.config,
                offices,
                teams,
                handler: self.handler,
                monitor: AssetMonitor::new(),
                state: Mutex::new(KernelState {
                    phase: KernelPhase::Closed,
                    processes: HashMap::new(),
                }),
                drained: Condvar::new(),
                diagnostics: Mutex::new(Vec::new()),
                ids: AtomicU64::new(1),
            }),
            monitor_thread: Mutex::new(None),
        })
    }
}

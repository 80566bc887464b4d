//! Job nodes: the atomic schedulable actions of a flow
//!
//! A node moves through `Pending → Executing → {Complete | Awaiting |
//! Escalated}`. It parks (never blocking its team thread) when a bound
//! managed object is not yet ready or a joined flow is incomplete, and is
//! reassigned to its team on wake — never executed inline by the notifier.
//! Escalation abandons the rest of the node's chain.
//!
//! A unit invocation builds a chain: pre-duties, the unit body, then
//! post-duties, all sharing the unit's bound containers. Every node but
//! the last holds the proxied container view; finalization — unit-scoped
//! container release and chain continuation — belongs to the tail.

use crate::duty::{DutyContext, GovernanceRequest};
use crate::escalation::{route, EscalationRoute};
use crate::flow::Flow;
use crate::governance::DeactivationStrategy;
use crate::object::{ContainerPoll, ContainerView, ObjectContainer};
use crate::office::OfficeRuntime;
use crate::runtime::KernelCore;
use crate::team::{Assignment, Team};
use crate::thread::ThreadState;
use crate::work::{BodyEffects, Instigation, JoinRequest, Param, WorkContext};
use bureau_types::{
    DutyMetadata, Failure, FailureCategory, GovernanceIndex, ObjectIndex, ObjectScope, ProcessId,
};
use std::sync::{Arc, Mutex};
use std::time::Instant;

pub(crate) enum JobKind {
    /// Runs the configured unit-of-work body
    Unit { unit_index: usize },
    /// Runs one pre/post administrative hook
    Duty { duty: DutyMetadata },
    /// Applies a requested governance deactivation
    Governance {
        index: GovernanceIndex,
        strategy: DeactivationStrategy,
    },
}

/// State shared by every node of one unit chain
pub(crate) struct ChainShared {
    /// The unit's bound containers, by dependency position
    containers: Vec<Arc<ObjectContainer>>,
    /// Sequential instigations deferred to the chain tail
    pending_sequential: Mutex<Vec<(usize, Param)>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum JobPhase {
    Dormant,
    Pending,
    Executing,
    Awaiting,
    Complete,
    Escalated,
}

struct JobCore {
    phase: JobPhase,
    body_done: bool,
    /// A failure to deliver on the next slice (sourcing failure, expired
    /// wait)
    wake_failure: Option<Failure>,
    /// Intra-chain successor
    next: Option<Arc<JobNode>>,
    is_tail: bool,
    /// On the tail: the unit's static next link, resolved to a unit index
    next_unit: Option<usize>,
    /// On the tail: the dormant node a spliced chain returns control to
    return_to: Option<Arc<JobNode>>,
    /// Joins still pending after the body ran
    joins: Vec<JoinRequest>,
}

pub(crate) struct JobNode {
    id: u64,
    kind: JobKind,
    view: ContainerView,
    param: Param,
    chain: Arc<ChainShared>,
    flow: Arc<Flow>,
    office: Arc<OfficeRuntime>,
    core: Arc<KernelCore>,
    team: Arc<dyn Team>,
    state: Mutex<JobCore>,
}

enum SliceOutcome {
    /// The node is parked; whoever claims it reassigns it
    Parked,
    Escalate(Failure),
    Advance {
        instigations: Vec<Instigation>,
        requests: Vec<GovernanceRequest>,
    },
}

/// What the node does once it leaves the front of its chain
enum Continuation {
    Node(Arc<JobNode>),
    Tail {
        next_unit: Option<usize>,
        return_to: Option<Arc<JobNode>>,
    },
    End,
}

/// Build the job chain for one unit invocation: pre-duties, the unit,
/// post-duties, linked sequentially and sharing the unit's containers.
/// The returned head is dormant; the caller activates it.
pub(crate) fn build_chain(
    core: &Arc<KernelCore>,
    office: &Arc<OfficeRuntime>,
    flow: &Arc<Flow>,
    unit_index: usize,
    param: Param,
    return_to: Option<Arc<JobNode>>,
) -> Arc<JobNode> {
    let unit = &office.model().units[unit_index];
    let thread = flow.thread();
    let containers: Vec<Arc<ObjectContainer>> = unit
        .dependencies
        .iter()
        .map(|index| bind_object(core, office, thread, *index))
        .collect();
    let chain = Arc::new(ChainShared {
        containers,
        pending_sequential: Mutex::new(Vec::new()),
    });
    let team = office.team_for(unit_index);
    let next_unit = unit
        .next
        .as_ref()
        .and_then(|next| office.model().unit_index(next));

    let mut kinds: Vec<JobKind> = Vec::new();
    for duty in &unit.pre_duties {
        kinds.push(JobKind::Duty { duty: duty.clone() });
    }
    kinds.push(JobKind::Unit { unit_index });
    for duty in &unit.post_duties {
        kinds.push(JobKind::Duty { duty: duty.clone() });
    }

    let last = kinds.len() - 1;
    let nodes: Vec<Arc<JobNode>> = kinds
        .into_iter()
        .enumerate()
        .map(|(position, kind)| {
            let is_tail = position == last;
            // Only the tail sees the real container view, so partial
            // administration stays invisible until the phase completes
            let view = if is_tail {
                ContainerView::Real
            } else {
                ContainerView::Proxied
            };
            Arc::new(JobNode {
                id: core.next_id(),
                kind,
                view,
                param: param.clone(),
                chain: Arc::clone(&chain),
                flow: Arc::clone(flow),
                office: Arc::clone(office),
                core: Arc::clone(core),
                team: Arc::clone(&team),
                state: Mutex::new(JobCore {
                    phase: JobPhase::Dormant,
                    body_done: false,
                    wake_failure: None,
                    next: None,
                    is_tail,
                    next_unit: if is_tail { next_unit } else { None },
                    return_to: None,
                    joins: Vec::new(),
                }),
            })
        })
        .collect();

    for pair in nodes.windows(2) {
        pair[0].state.lock().expect("job lock poisoned").next = Some(Arc::clone(&pair[1]));
    }
    nodes[last]
        .state
        .lock()
        .expect("job lock poisoned")
        .return_to = return_to;
    Arc::clone(&nodes[0])
}

/// Resolve the container for one object binding, creating it in its scope
/// owner on first use
pub(crate) fn bind_object(
    core: &Arc<KernelCore>,
    office: &Arc<OfficeRuntime>,
    thread: &Arc<ThreadState>,
    index: ObjectIndex,
) -> Arc<ObjectContainer> {
    let scope = office.model().objects[index.0].scope;
    match scope {
        ObjectScope::Unit => create_container(core, office, thread, index),
        ObjectScope::Thread => {
            thread.get_or_create_object(index, || create_container(core, office, thread, index))
        }
        ObjectScope::Process => thread
            .process()
            .get_or_create_object(index, || create_container(core, office, thread, index)),
    }
}

fn create_container(
    core: &Arc<KernelCore>,
    office: &Arc<OfficeRuntime>,
    thread: &Arc<ThreadState>,
    index: ObjectIndex,
) -> Arc<ObjectContainer> {
    let metadata = office.model().objects[index.0].clone();
    let dependencies: Vec<Arc<ObjectContainer>> = metadata
        .dependencies
        .iter()
        .map(|dependency| bind_object(core, office, thread, *dependency))
        .collect();
    let container = ObjectContainer::new(core.next_id(), metadata, office.object_source(index));
    ObjectContainer::start_sourcing(
        &container,
        dependencies,
        Arc::clone(office),
        Arc::clone(core),
    );
    container
}

impl JobNode {
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn process_id(&self) -> ProcessId {
        self.flow.thread().process().id()
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.flow.thread().process().is_cancelled()
    }

    /// Count the node into its flow and hand it to its team
    pub(crate) fn activate(self: Arc<Self>) {
        self.flow.job_activated();
        {
            let mut state = self.state.lock().expect("job lock poisoned");
            debug_assert!(state.phase == JobPhase::Dormant, "activated twice");
            state.phase = JobPhase::Pending;
        }
        let team = Arc::clone(&self.team);
        team.assign(Assignment::new(self));
    }

    /// Reassign a woken node to its team, optionally delivering a failure
    /// on its next slice. Only the claimer of a parked entry may call this.
    pub(crate) fn reactivate(self: Arc<Self>, failure: Option<Failure>) {
        {
            let mut state = self.state.lock().expect("job lock poisoned");
            state.wake_failure = failure;
            state.phase = JobPhase::Pending;
        }
        let team = Arc::clone(&self.team);
        team.assign(Assignment::new(self));
    }

    /// Wake the node if it is still parked; losing the claim means another
    /// waker owns it
    pub(crate) fn claim_and_reactivate(self: Arc<Self>, failure: Option<Failure>) {
        if self.core.monitor().claim(self.id).is_some() {
            self.reactivate(failure);
        }
    }

    /// One execution slice on a team thread
    pub(crate) fn run_slice(self: Arc<Self>) {
        let thread = Arc::clone(self.flow.thread());
        if self.is_cancelled() {
            tracing::debug!(job = self.id, "job cancelled; retiring without running");
            self.finish(JobPhase::Complete, true);
            return;
        }
        let outcome = {
            let _slice = thread.begin_slice();
            Self::execute_slice(&self, &thread)
        };
        Self::apply(&self, outcome, &thread);
    }

    fn execute_slice(this: &Arc<Self>, thread: &Arc<ThreadState>) -> SliceOutcome {
        {
            let mut state = this.state.lock().expect("job lock poisoned");
            if matches!(state.phase, JobPhase::Complete | JobPhase::Escalated) {
                tracing::warn!(job = this.id, "stale wake-up of a terminal job ignored");
                return SliceOutcome::Parked;
            }
            if let Some(failure) = state.wake_failure.take() {
                return SliceOutcome::Escalate(failure);
            }
            if state.body_done {
                // Woken from a join park: re-check the joined flows
                drop(state);
                return Self::await_joins(this);
            }
            state.phase = JobPhase::Executing;
        }

        // Every bound container must be sourced with no operation in
        // flight. Spurious wake-ups simply re-park here.
        loop {
            let mut unready = None;
            for container in &this.chain.containers {
                match container.poll_ready() {
                    ContainerPoll::Ready => {}
                    ContainerPoll::NotReady => {
                        unready = Some(Arc::clone(container));
                        break;
                    }
                    ContainerPoll::Failed(failure) => return SliceOutcome::Escalate(failure),
                }
            }
            let Some(container) = unready else { break };

            // Park first, then register; whoever claims the entry wakes us
            this.state.lock().expect("job lock poisoned").phase = JobPhase::Awaiting;
            this.core.monitor().park(
                Arc::clone(this),
                container.pending_deadline(),
                container.metadata().name.to_string(),
            );
            container.add_waiter(Arc::clone(this));
            match container.poll_ready() {
                ContainerPoll::NotReady => return SliceOutcome::Parked,
                _ => {
                    // Raced to readiness or failure: reclaim our own entry
                    // if no waker beat us to it
                    if this.core.monitor().claim(this.id).is_some() {
                        this.state.lock().expect("job lock poisoned").phase = JobPhase::Executing;
                        continue;
                    }
                    return SliceOutcome::Parked;
                }
            }
        }

        // Governed containers register their extensions lazily, on first
        // ready use within the thread
        for container in &this.chain.containers {
            for index in container.metadata().governance.clone() {
                if let Err(failure) = thread.govern_container(index, container) {
                    return SliceOutcome::Escalate(failure);
                }
            }
        }

        match &this.kind {
            JobKind::Unit { unit_index } => {
                let unit = &this.office.model().units[*unit_index];
                let work = this.office.work_for(*unit_index);
                let mut ctx = WorkContext {
                    objects: &this.chain.containers,
                    view: this.view,
                    param: &this.param,
                    unit,
                    office: &this.office,
                    thread,
                    effects: BodyEffects::default(),
                };
                if let Err(failure) = work.execute(&mut ctx) {
                    // Flows created for parallel instigations were counted
                    // at creation; nothing will ever activate them now
                    for instigation in ctx.effects.instigations {
                        if let Instigation::Parallel { flow, .. } = instigation {
                            flow.abandon();
                        }
                    }
                    return SliceOutcome::Escalate(failure);
                }
                let BodyEffects { instigations, joins } = ctx.effects;
                {
                    let mut state = this.state.lock().expect("job lock poisoned");
                    state.body_done = true;
                    state.joins = joins;
                }
                SliceOutcome::Advance {
                    instigations,
                    requests: Vec::new(),
                }
            }
            JobKind::Duty { duty } => {
                let administrator = match this.office.administrator(&duty.administrator) {
                    Ok(administrator) => administrator,
                    Err(failure) => return SliceOutcome::Escalate(failure),
                };
                let mut ctx = DutyContext {
                    objects: &this.chain.containers,
                    view: this.view,
                    duty,
                    requests: Vec::new(),
                };
                // Administration is a side-effecting interceptor: nothing
                // propagates to the next node
                if let Err(failure) = administrator.administer(&duty.duty, &mut ctx) {
                    return SliceOutcome::Escalate(failure);
                }
                this.state.lock().expect("job lock poisoned").body_done = true;
                SliceOutcome::Advance {
                    instigations: Vec::new(),
                    requests: ctx.requests,
                }
            }
            JobKind::Governance { index, strategy } => {
                if let Err(failure) = thread.deactivate_governance(*index, *strategy) {
                    return SliceOutcome::Escalate(failure);
                }
                this.state.lock().expect("job lock poisoned").body_done = true;
                SliceOutcome::Advance {
                    instigations: Vec::new(),
                    requests: Vec::new(),
                }
            }
        }
    }

    /// Park on the still-incomplete joined flows, tolerating completions
    /// that race with registration
    fn await_joins(this: &Arc<Self>) -> SliceOutcome {
        loop {
            let pending: Vec<(Arc<Flow>, Option<Instant>)> = {
                let mut state = this.state.lock().expect("job lock poisoned");
                state.joins.retain(|join| !join.flow.is_complete());
                state
                    .joins
                    .iter()
                    .map(|join| (Arc::clone(&join.flow), join.deadline))
                    .collect()
            };
            if pending.is_empty() {
                return SliceOutcome::Advance {
                    instigations: Vec::new(),
                    requests: Vec::new(),
                };
            }
            let deadline = pending.iter().filter_map(|(_, deadline)| *deadline).min();
            this.state.lock().expect("job lock poisoned").phase = JobPhase::Awaiting;
            this.core
                .monitor()
                .park(Arc::clone(this), deadline, "joined flow");
            let mut waiting = false;
            for (flow, _) in &pending {
                if flow.add_join_waiter(Arc::clone(this)) {
                    waiting = true;
                }
            }
            if waiting {
                return SliceOutcome::Parked;
            }
            // Every joined flow completed while we registered
            if this.core.monitor().claim(this.id).is_some() {
                this.state.lock().expect("job lock poisoned").phase = JobPhase::Executing;
                continue;
            }
            return SliceOutcome::Parked;
        }
    }

    fn apply(this: &Arc<Self>, outcome: SliceOutcome, thread: &Arc<ThreadState>) {
        match outcome {
            SliceOutcome::Parked => {}
            SliceOutcome::Escalate(failure) => Self::escalate(this, failure, thread),
            SliceOutcome::Advance {
                instigations,
                requests,
            } => {
                if !requests.is_empty() {
                    this.splice_governance(requests);
                }
                for instigation in instigations {
                    match instigation {
                        Instigation::Sequential { unit_index, param } => {
                            this.chain
                                .pending_sequential
                                .lock()
                                .expect("chain lock poisoned")
                                .push((unit_index, param));
                        }
                        Instigation::Parallel {
                            flow,
                            unit_index,
                            param,
                        } => {
                            let head = build_chain(
                                &this.core,
                                &this.office,
                                &flow,
                                unit_index,
                                param,
                                None,
                            );
                            head.activate();
                        }
                        Instigation::Asynchronous { unit_index, param } => {
                            if let Err(error) = KernelCore::spawn_process(
                                &this.core,
                                &this.office,
                                unit_index,
                                param,
                                None,
                            ) {
                                tracing::warn!(%error, "asynchronous instigation refused");
                            }
                        }
                    }
                }
                let has_joins = !this
                    .state
                    .lock()
                    .expect("job lock poisoned")
                    .joins
                    .is_empty();
                if has_joins {
                    if let SliceOutcome::Parked = Self::await_joins(this) {
                        return;
                    }
                }
                this.advance();
            }
        }
    }

    /// Splice requested governance actions as job nodes directly after
    /// this one, carrying any tail duties to the last spliced node
    fn splice_governance(&self, requests: Vec<GovernanceRequest>) {
        let mut state = self.state.lock().expect("job lock poisoned");
        let mut next = state.next.take();
        let mut carried_tail = if state.is_tail {
            state.is_tail = false;
            Some((state.next_unit.take(), state.return_to.take()))
        } else {
            None
        };
        for request in requests.into_iter().rev() {
            let node = Arc::new(JobNode {
                id: self.core.next_id(),
                kind: JobKind::Governance {
                    index: request.index,
                    strategy: request.strategy,
                },
                view: self.view,
                param: Param::None,
                chain: Arc::clone(&self.chain),
                flow: Arc::clone(&self.flow),
                office: Arc::clone(&self.office),
                core: Arc::clone(&self.core),
                team: Arc::clone(&self.team),
                state: Mutex::new(JobCore {
                    phase: JobPhase::Dormant,
                    body_done: false,
                    wake_failure: None,
                    next: next.take(),
                    is_tail: false,
                    next_unit: None,
                    return_to: None,
                    joins: Vec::new(),
                }),
            });
            if let Some((next_unit, return_to)) = carried_tail.take() {
                let mut spliced = node.state.lock().expect("job lock poisoned");
                spliced.is_tail = true;
                spliced.next_unit = next_unit;
                spliced.return_to = return_to;
            }
            next = Some(node);
        }
        state.next = next;
    }

    /// Activate the successor before retiring this node, so the flow's
    /// active count never falsely reaches zero
    fn advance(&self) {
        let decision = {
            let mut state = self.state.lock().expect("job lock poisoned");
            if let Some(next) = state.next.take() {
                Continuation::Node(next)
            } else if state.is_tail {
                Continuation::Tail {
                    next_unit: state.next_unit.take(),
                    return_to: state.return_to.take(),
                }
            } else {
                Continuation::End
            }
        };
        match decision {
            Continuation::Node(next) => {
                next.activate();
                self.finish(JobPhase::Complete, false);
            }
            Continuation::Tail {
                next_unit,
                return_to,
            } => {
                // Leaving the chain: deferred sequential flows run first,
                // then the static next unit, then the return link
                let pending = std::mem::take(
                    &mut *self
                        .chain
                        .pending_sequential
                        .lock()
                        .expect("chain lock poisoned"),
                );
                let mut continuation: Option<Arc<JobNode>> = match next_unit {
                    Some(unit_index) => Some(build_chain(
                        &self.core,
                        &self.office,
                        &self.flow,
                        unit_index,
                        Param::None,
                        return_to,
                    )),
                    None => return_to,
                };
                for (unit_index, param) in pending.into_iter().rev() {
                    continuation = Some(build_chain(
                        &self.core,
                        &self.office,
                        &self.flow,
                        unit_index,
                        param,
                        continuation,
                    ));
                }
                if let Some(successor) = continuation {
                    successor.activate();
                }
                self.finish(JobPhase::Complete, true);
            }
            Continuation::End => self.finish(JobPhase::Complete, false),
        }
    }

    /// Route a failure through the escalation chain, then retire the node.
    /// The handling thread is started before this node retires so the
    /// process can never falsely complete in between.
    fn escalate(this: &Arc<Self>, failure: Failure, thread: &Arc<ThreadState>) {
        tracing::debug!(job = this.id, %failure, "job node escalated");
        thread.mark_poisoned();
        let process = Arc::clone(thread.process());
        match route(
            thread.is_escalation_handling(),
            process.source_handler().is_some(),
            this.office.procedure(),
            &failure,
        ) {
            EscalationRoute::Handle(unit_index) => {
                KernelCore::start_thread(
                    &this.core,
                    &process,
                    &this.office,
                    unit_index,
                    Param::Failure(failure),
                    true,
                );
            }
            EscalationRoute::Source => {
                let handled = process
                    .source_handler()
                    .cloned()
                    .and_then(|source| source.handle_escalation(&failure));
                match handled {
                    Some(Ok(())) => {
                        tracing::debug!(job = this.id, "object source handled its flow's failure");
                    }
                    Some(Err(second)) => {
                        let wrapped = Failure::handler(format!(
                            "object escalation handler failed: {second}"
                        ));
                        this.core.top_level(&process, wrapped);
                    }
                    None => this.core.top_level(&process, failure),
                }
            }
            EscalationRoute::TopLevel => {
                let failure = if thread.is_escalation_handling()
                    && failure.category() != FailureCategory::Handler
                {
                    Failure::handler(format!("escalation handling flow failed: {failure}"))
                } else {
                    failure
                };
                this.core.top_level(&process, failure);
            }
        }
        this.finish(JobPhase::Escalated, true);
    }

    /// Terminal transition: record the phase, release the chain's
    /// unit-scoped containers when leaving the chain, and retire from the
    /// flow (which may cascade to thread and process completion)
    fn finish(&self, phase: JobPhase, release_chain: bool) {
        self.state.lock().expect("job lock poisoned").phase = phase;
        if release_chain {
            for container in &self.chain.containers {
                if container.metadata().scope == ObjectScope::Unit {
                    container.release();
                }
            }
        }
        self.flow.job_retired();
    }
}

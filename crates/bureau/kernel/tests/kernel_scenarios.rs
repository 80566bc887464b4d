//! End-to-end scheduling scenarios against a full kernel

use bureau_kernel::{
    payload, Administration, AsyncContext, Bureau, DutyContext, DutyMetadata, EscalationEntry,
    EscalationHandler, Failure, FailureCategory, FailureKind, FailureMatch, FlowStrategy,
    Governance, GovernanceMetadata, GovernanceSource, InlineTeam, ObjectInstance, ObjectMetadata,
    ObjectScope, ObjectSource, OfficeModel, OfficeName, OfficeRegistry, ProcessId, SourcingContext,
    SpawnTeam, ThreadSynchroniser, UnitMetadata, UnitName, Work, WorkContext,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::{Duration, Instant};

fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .try_init();
    });
}

fn orders() -> OfficeName {
    OfficeName::new("orders")
}

fn unit(name: &str) -> UnitName {
    UnitName::new(name)
}

type Log = Arc<Mutex<Vec<String>>>;

fn new_log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

fn entries(log: &Log) -> Vec<String> {
    log.lock().unwrap().clone()
}

/// Appends its label to the shared log
struct RecordingWork {
    label: String,
    log: Log,
}

impl Work for RecordingWork {
    fn execute(&self, _ctx: &mut WorkContext<'_>) -> Result<(), Failure> {
        self.log.lock().unwrap().push(self.label.clone());
        Ok(())
    }
}

/// Fails with the configured failure
struct FailingWork {
    failure: Failure,
}

impl Work for FailingWork {
    fn execute(&self, _ctx: &mut WorkContext<'_>) -> Result<(), Failure> {
        Err(self.failure.clone())
    }
}

/// Counts deliveries to the top-level handler
struct CountingHandler {
    count: Arc<AtomicUsize>,
    last: Arc<Mutex<Option<Failure>>>,
}

impl CountingHandler {
    fn new() -> (Self, Arc<AtomicUsize>, Arc<Mutex<Option<Failure>>>) {
        let count = Arc::new(AtomicUsize::new(0));
        let last = Arc::new(Mutex::new(None));
        (
            Self {
                count: Arc::clone(&count),
                last: Arc::clone(&last),
            },
            count,
            last,
        )
    }
}

impl EscalationHandler for CountingHandler {
    fn handle(&self, _process: ProcessId, failure: &Failure) -> Result<(), Failure> {
        self.count.fetch_add(1, Ordering::SeqCst);
        *self.last.lock().unwrap() = Some(failure.clone());
        Ok(())
    }
}

/// Supplies a value immediately
struct ImmediateSource<T: Clone + Send + Sync + 'static> {
    value: T,
}

impl<T: Clone + Send + Sync + 'static> ObjectSource for ImmediateSource<T> {
    fn source(&self, ctx: SourcingContext) -> Result<(), Failure> {
        ctx.supply(self.value.clone());
        Ok(())
    }
}

/// Supplies a value from another thread after a delay; optionally supplies
/// a second time to prove the extra notification is ignored
struct DelayedSource {
    delay: Duration,
    double_supply: bool,
}

impl ObjectSource for DelayedSource {
    fn source(&self, ctx: SourcingContext) -> Result<(), Failure> {
        let delay = self.delay;
        let double = self.double_supply;
        std::thread::spawn(move || {
            std::thread::sleep(delay);
            ctx.supply(1_u32);
            if double {
                ctx.supply(2_u32);
            }
        });
        Ok(())
    }
}

/// Never supplies; used for forced-shutdown scenarios
struct SilentSource;

impl ObjectSource for SilentSource {
    fn source(&self, _ctx: SourcingContext) -> Result<(), Failure> {
        Ok(())
    }
}

// ── Inline synchronous completion ────────────────────────────────────

#[test]
fn inline_team_completes_before_invoke_returns() {
    init_tracing();
    let log = new_log();
    let bureau = Bureau::builder()
        .with_team("inline", InlineTeam::new())
        .with_office(
            OfficeModel::new("orders").with_unit(UnitMetadata::new("bill", "inline")),
            OfficeRegistry::new().with_work(
                "bill",
                RecordingWork {
                    label: "bill".into(),
                    log: Arc::clone(&log),
                },
            ),
        )
        .build()
        .unwrap();
    bureau.open().unwrap();

    let fired = Arc::new(AtomicUsize::new(0));
    let handle = bureau.invoke(&orders(), &unit("bill"), None).unwrap();
    // No duties, no governance, inline team: complete synchronously
    assert!(handle.is_complete());

    let fired_in_callback = Arc::clone(&fired);
    handle.on_completion(move |outcome| {
        assert!(outcome.failure.is_none());
        fired_in_callback.fetch_add(1, Ordering::SeqCst);
    });
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert_eq!(entries(&log), vec!["bill"]);

    bureau.close().unwrap();
}

// ── Asynchronous sourcing ────────────────────────────────────────────

#[test]
fn async_sourcing_completes_after_delay_with_single_callback() {
    init_tracing();
    let log = new_log();
    let bureau = Bureau::builder()
        .with_team("workers", SpawnTeam::new())
        .with_office(
            OfficeModel::new("orders")
                .with_object(
                    ObjectMetadata::new("ledger", ObjectScope::Process).callback_sourced(),
                )
                .with_unit(UnitMetadata::new("bill", "workers").with_dependency(0)),
            OfficeRegistry::new()
                .with_work(
                    "bill",
                    RecordingWork {
                        label: "bill".into(),
                        log: Arc::clone(&log),
                    },
                )
                .with_object_source(
                    "ledger",
                    DelayedSource {
                        delay: Duration::from_millis(50),
                        double_supply: false,
                    },
                ),
        )
        .build()
        .unwrap();
    bureau.open().unwrap();

    let started = Instant::now();
    let fired = Arc::new(AtomicUsize::new(0));
    let handle = bureau.invoke(&orders(), &unit("bill"), None).unwrap();
    let fired_in_callback = Arc::clone(&fired);
    handle.on_completion(move |_| {
        fired_in_callback.fetch_add(1, Ordering::SeqCst);
    });

    assert!(handle.wait(Some(Duration::from_secs(5))));
    assert!(started.elapsed() >= Duration::from_millis(50));
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert_eq!(entries(&log), vec!["bill"]);
    assert!(handle.failure().is_none());

    bureau.close().unwrap();
}

#[test]
fn second_sourcing_notification_is_ignored() {
    init_tracing();
    let seen = Arc::new(Mutex::new(None::<u32>));

    struct ReadLedger {
        seen: Arc<Mutex<Option<u32>>>,
    }

    impl Work for ReadLedger {
        fn execute(&self, ctx: &mut WorkContext<'_>) -> Result<(), Failure> {
            let ledger = ctx.object(0)?.get::<u32>()?;
            *self.seen.lock().unwrap() = Some(*ledger);
            Ok(())
        }
    }

    let bureau = Bureau::builder()
        .with_team("workers", SpawnTeam::new())
        .with_office(
            OfficeModel::new("orders")
                .with_object(
                    ObjectMetadata::new("ledger", ObjectScope::Process).callback_sourced(),
                )
                .with_unit(UnitMetadata::new("bill", "workers").with_dependency(0)),
            OfficeRegistry::new()
                .with_work(
                    "bill",
                    ReadLedger {
                        seen: Arc::clone(&seen),
                    },
                )
                .with_object_source(
                    "ledger",
                    DelayedSource {
                        delay: Duration::from_millis(20),
                        double_supply: true,
                    },
                ),
        )
        .build()
        .unwrap();
    bureau.open().unwrap();

    let handle = bureau.invoke(&orders(), &unit("bill"), None).unwrap();
    assert!(handle.wait(Some(Duration::from_secs(5))));
    // The first notification wins; the second is rejected
    assert_eq!(*seen.lock().unwrap(), Some(1));

    bureau.close().unwrap();
}

// ── Duty ordering ────────────────────────────────────────────────────

/// A resource whose operations run on a timer thread, keeping dependent
/// jobs suspended until each completes
struct SlowResource {
    async_ctx: AsyncContext,
}

impl SlowResource {
    fn begin_operation(&self, delay: Duration) {
        let ctx = self.async_ctx.clone();
        ctx.start();
        std::thread::spawn(move || {
            std::thread::sleep(delay);
            ctx.complete();
        });
    }
}

struct SlowResourceSource;

impl ObjectSource for SlowResourceSource {
    fn source(&self, ctx: SourcingContext) -> Result<(), Failure> {
        let resource = SlowResource {
            async_ctx: ctx.async_context(),
        };
        ctx.supply(resource);
        Ok(())
    }
}

/// Logs the duty and kicks off an asynchronous operation on the resource
struct SuspendingAdmin {
    log: Log,
}

impl Administration for SuspendingAdmin {
    fn administer(
        &self,
        duty: &bureau_kernel::DutyName,
        ctx: &mut DutyContext<'_>,
    ) -> Result<(), Failure> {
        self.log.lock().unwrap().push(duty.as_str().to_string());
        let resource = ctx.object(0)?.get::<SlowResource>()?;
        resource.begin_operation(Duration::from_millis(20));
        Ok(())
    }
}

#[test]
fn duties_run_in_configured_order_even_when_suspending() {
    init_tracing();
    let log = new_log();
    let bureau = Bureau::builder()
        .with_team("workers", SpawnTeam::new())
        .with_office(
            OfficeModel::new("orders")
                .with_object(ObjectMetadata::new("resource", ObjectScope::Thread))
                .with_unit(
                    UnitMetadata::new("bill", "workers")
                        .with_dependency(0)
                        .with_pre_duty(DutyMetadata::new("audit", "a"))
                        .with_pre_duty(DutyMetadata::new("audit", "b"))
                        .with_post_duty(DutyMetadata::new("audit", "c")),
                ),
            OfficeRegistry::new()
                .with_work(
                    "bill",
                    RecordingWork {
                        label: "unit".into(),
                        log: Arc::clone(&log),
                    },
                )
                .with_object_source("resource", SlowResourceSource)
                .with_administrator(
                    "audit",
                    SuspendingAdmin {
                        log: Arc::clone(&log),
                    },
                ),
        )
        .build()
        .unwrap();
    bureau.open().unwrap();

    let handle = bureau.invoke(&orders(), &unit("bill"), None).unwrap();
    assert!(handle.wait(Some(Duration::from_secs(5))));
    assert_eq!(entries(&log), vec!["a", "b", "unit", "c"]);

    bureau.close().unwrap();
}

// ── Escalation ───────────────────────────────────────────────────────

#[test]
fn unmatched_failure_reaches_top_level_exactly_once() {
    init_tracing();
    let (handler, count, last) = CountingHandler::new();
    let bureau = Bureau::builder()
        .with_team("inline", InlineTeam::new())
        .with_escalation_handler(handler)
        .with_office(
            OfficeModel::new("orders")
                .with_unit(UnitMetadata::new("bill", "inline"))
                .with_unit(UnitMetadata::new("on-timeout", "inline"))
                .with_escalation(EscalationEntry::new(
                    FailureMatch::Category(FailureCategory::Timeout),
                    "on-timeout",
                )),
            OfficeRegistry::new()
                .with_work(
                    "bill",
                    FailingWork {
                        failure: Failure::resource("ledger store offline"),
                    },
                )
                .with_work(
                    "on-timeout",
                    RecordingWork {
                        label: "on-timeout".into(),
                        log: new_log(),
                    },
                ),
        )
        .build()
        .unwrap();
    bureau.open().unwrap();

    let handle = bureau.invoke(&orders(), &unit("bill"), None).unwrap();
    assert!(handle.wait(Some(Duration::from_secs(5))));
    assert_eq!(count.load(Ordering::SeqCst), 1);
    let captured = handle.failure().expect("handle captures the failure");
    assert_eq!(captured.kind, FailureKind::Resource);
    assert!(last.lock().unwrap().is_some());

    bureau.close().unwrap();
}

/// The handling flow records the failure it was routed
struct HandlingWork {
    log: Log,
}

impl Work for HandlingWork {
    fn execute(&self, ctx: &mut WorkContext<'_>) -> Result<(), Failure> {
        let failure = ctx.failure().expect("handling flow receives the failure");
        self.log
            .lock()
            .unwrap()
            .push(format!("handled:{}", failure.kind));
        Ok(())
    }
}

#[test]
fn category_entry_handles_unlisted_code() {
    init_tracing();
    let log = new_log();
    let (handler, top_level_count, _) = CountingHandler::new();
    let bureau = Bureau::builder()
        .with_team("inline", InlineTeam::new())
        .with_escalation_handler(handler)
        .with_office(
            OfficeModel::new("orders")
                .with_unit(UnitMetadata::new("bill", "inline"))
                .with_unit(UnitMetadata::new("on-business", "inline"))
                .with_escalation(EscalationEntry::new(
                    FailureMatch::Category(FailureCategory::Business),
                    "on-business",
                )),
            OfficeRegistry::new()
                .with_work(
                    "bill",
                    FailingWork {
                        failure: Failure::business("cancelled-card", "card was cancelled"),
                    },
                )
                .with_work(
                    "on-business",
                    HandlingWork {
                        log: Arc::clone(&log),
                    },
                ),
        )
        .build()
        .unwrap();
    bureau.open().unwrap();

    let handle = bureau.invoke(&orders(), &unit("bill"), None).unwrap();
    assert!(handle.wait(Some(Duration::from_secs(5))));

    // The category entry handled it; the top-level handler saw nothing
    assert_eq!(entries(&log), vec!["handled:business failure (cancelled-card)"]);
    assert_eq!(top_level_count.load(Ordering::SeqCst), 0);
    assert!(handle.failure().is_none());

    bureau.close().unwrap();
}

#[test]
fn failing_handling_flow_escalates_to_top_level_only() {
    init_tracing();
    let (handler, count, last) = CountingHandler::new();
    let bureau = Bureau::builder()
        .with_team("inline", InlineTeam::new())
        .with_escalation_handler(handler)
        .with_office(
            OfficeModel::new("orders")
                .with_unit(UnitMetadata::new("bill", "inline"))
                .with_unit(UnitMetadata::new("on-any", "inline"))
                .with_escalation(EscalationEntry::new(FailureMatch::Any, "on-any")),
            OfficeRegistry::new()
                .with_work(
                    "bill",
                    FailingWork {
                        failure: Failure::business("cancelled-card", ""),
                    },
                )
                .with_work(
                    "on-any",
                    FailingWork {
                        failure: Failure::business("handler-bug", ""),
                    },
                ),
        )
        .build()
        .unwrap();
    bureau.open().unwrap();

    let handle = bureau.invoke(&orders(), &unit("bill"), None).unwrap();
    assert!(handle.wait(Some(Duration::from_secs(5))));

    // The handling flow failed once; its failure reached the top level
    // and was not re-matched against the table
    assert_eq!(count.load(Ordering::SeqCst), 1);
    let captured = last.lock().unwrap().clone().unwrap();
    assert_eq!(captured.category(), FailureCategory::Handler);

    bureau.close().unwrap();
}

// ── Governance ───────────────────────────────────────────────────────

struct SharedCounts {
    governed: AtomicUsize,
    enforced: AtomicUsize,
    disregarded: AtomicUsize,
}

struct CountingGovernance {
    counts: Arc<SharedCounts>,
}

impl Governance for CountingGovernance {
    fn govern(&self, _extension: ObjectInstance) -> Result<(), Failure> {
        self.counts.governed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn enforce(&self) -> Result<(), Failure> {
        self.counts.enforced.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn disregard(&self) -> Result<(), Failure> {
        self.counts.disregarded.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct CountingGovernanceSource {
    counts: Arc<SharedCounts>,
}

impl GovernanceSource for CountingGovernanceSource {
    fn create(&self) -> Arc<dyn Governance> {
        Arc::new(CountingGovernance {
            counts: Arc::clone(&self.counts),
        })
    }
}

fn governed_office(counts: &Arc<SharedCounts>, work_fails: bool) -> (OfficeModel, OfficeRegistry) {
    let model = OfficeModel::new("orders")
        .with_governance(GovernanceMetadata::new("audit-window"))
        .with_object(ObjectMetadata::new("ledger", ObjectScope::Thread).with_governance(0))
        .with_unit(UnitMetadata::new("bill", "inline").with_dependency(0));
    let registry = if work_fails {
        OfficeRegistry::new().with_work(
            "bill",
            FailingWork {
                failure: Failure::business("cancelled-card", ""),
            },
        )
    } else {
        OfficeRegistry::new().with_work(
            "bill",
            RecordingWork {
                label: "bill".into(),
                log: new_log(),
            },
        )
    };
    let registry = registry
        .with_object_source("ledger", ImmediateSource { value: 10_u64 })
        .with_governance_source(
            "audit-window",
            CountingGovernanceSource {
                counts: Arc::clone(counts),
            },
        );
    (model, registry)
}

#[test]
fn governance_commits_once_on_normal_completion() {
    init_tracing();
    let counts = Arc::new(SharedCounts {
        governed: AtomicUsize::new(0),
        enforced: AtomicUsize::new(0),
        disregarded: AtomicUsize::new(0),
    });
    let (model, registry) = governed_office(&counts, false);
    let bureau = Bureau::builder()
        .with_team("inline", InlineTeam::new())
        .with_office(model, registry)
        .build()
        .unwrap();
    bureau.open().unwrap();

    let handle = bureau.invoke(&orders(), &unit("bill"), None).unwrap();
    assert!(handle.wait(Some(Duration::from_secs(5))));

    assert_eq!(counts.governed.load(Ordering::SeqCst), 1);
    assert_eq!(counts.enforced.load(Ordering::SeqCst), 1);
    assert_eq!(counts.disregarded.load(Ordering::SeqCst), 0);

    bureau.close().unwrap();
}

#[test]
fn governance_rolls_back_once_on_escalated_teardown() {
    init_tracing();
    let counts = Arc::new(SharedCounts {
        governed: AtomicUsize::new(0),
        enforced: AtomicUsize::new(0),
        disregarded: AtomicUsize::new(0),
    });
    let (model, registry) = governed_office(&counts, true);
    let bureau = Bureau::builder()
        .with_team("inline", InlineTeam::new())
        .with_office(model, registry)
        .build()
        .unwrap();
    bureau.open().unwrap();

    let handle = bureau.invoke(&orders(), &unit("bill"), None).unwrap();
    assert!(handle.wait(Some(Duration::from_secs(5))));

    // Exactly one of enforce/disregard, and on this path it is rollback
    assert_eq!(counts.enforced.load(Ordering::SeqCst), 0);
    assert_eq!(counts.disregarded.load(Ordering::SeqCst), 1);

    bureau.close().unwrap();
}

/// Requests commit of the governance mapped at local index zero
struct CommittingAdmin;

impl Administration for CommittingAdmin {
    fn administer(
        &self,
        _duty: &bureau_kernel::DutyName,
        ctx: &mut DutyContext<'_>,
    ) -> Result<(), Failure> {
        ctx.enforce(0)
    }
}

#[test]
fn duty_triggered_enforce_preempts_thread_close() {
    init_tracing();
    let counts = Arc::new(SharedCounts {
        governed: AtomicUsize::new(0),
        enforced: AtomicUsize::new(0),
        disregarded: AtomicUsize::new(0),
    });
    let model = OfficeModel::new("orders")
        .with_governance(GovernanceMetadata::new("audit-window"))
        .with_object(ObjectMetadata::new("ledger", ObjectScope::Thread).with_governance(0))
        .with_unit(
            UnitMetadata::new("bill", "inline")
                .with_dependency(0)
                .with_post_duty(DutyMetadata::new("audit", "commit").with_governance(0, 0)),
        );
    let registry = OfficeRegistry::new()
        .with_work(
            "bill",
            RecordingWork {
                label: "bill".into(),
                log: new_log(),
            },
        )
        .with_object_source("ledger", ImmediateSource { value: 10_u64 })
        .with_governance_source(
            "audit-window",
            CountingGovernanceSource {
                counts: Arc::clone(&counts),
            },
        )
        .with_administrator("audit", CommittingAdmin);
    let bureau = Bureau::builder()
        .with_team("inline", InlineTeam::new())
        .with_office(model, registry)
        .build()
        .unwrap();
    bureau.open().unwrap();

    let handle = bureau.invoke(&orders(), &unit("bill"), None).unwrap();
    assert!(handle.wait(Some(Duration::from_secs(5))));

    // The duty's governance node committed; thread close found nothing
    // left to deactivate
    assert_eq!(counts.enforced.load(Ordering::SeqCst), 1);
    assert_eq!(counts.disregarded.load(Ordering::SeqCst), 0);

    bureau.close().unwrap();
}

// ── Thread-local synchronisers ───────────────────────────────────────

struct RecordingSynchroniser {
    log: Log,
}

impl ThreadSynchroniser for RecordingSynchroniser {
    fn suspend(&self) {
        self.log.lock().unwrap().push("suspend".into());
    }

    fn resume(&self) {
        self.log.lock().unwrap().push("resume".into());
    }
}

/// Registers a synchroniser on its logical thread
struct RegisteringWork {
    log: Log,
}

impl Work for RegisteringWork {
    fn execute(&self, ctx: &mut WorkContext<'_>) -> Result<(), Failure> {
        ctx.register_synchroniser(Arc::new(RecordingSynchroniser {
            log: Arc::clone(&self.log),
        }));
        Ok(())
    }
}

#[test]
fn synchroniser_suspends_and_resumes_in_matching_pairs() {
    init_tracing();
    let log = new_log();
    let bureau = Bureau::builder()
        .with_team("workers", SpawnTeam::new())
        .with_office(
            OfficeModel::new("orders")
                .with_unit(
                    UnitMetadata::new("first", "workers").with_next("second"),
                )
                .with_unit(UnitMetadata::new("second", "workers").with_next("third"))
                .with_unit(UnitMetadata::new("third", "workers")),
            OfficeRegistry::new()
                .with_work(
                    "first",
                    RegisteringWork {
                        log: Arc::clone(&log),
                    },
                )
                .with_work(
                    "second",
                    RecordingWork {
                        label: "second".into(),
                        log: new_log(),
                    },
                )
                .with_work(
                    "third",
                    RecordingWork {
                        label: "third".into(),
                        log: new_log(),
                    },
                ),
        )
        .build()
        .unwrap();
    bureau.open().unwrap();

    let handle = bureau.invoke(&orders(), &unit("first"), None).unwrap();
    assert!(handle.wait(Some(Duration::from_secs(5))));

    // Registered during the first slice: suspended at its end, then
    // resumed before and suspended after each later slice
    let observed = entries(&log);
    assert_eq!(
        observed,
        vec!["suspend", "resume", "suspend", "resume", "suspend"]
    );

    bureau.close().unwrap();
}

// ── Flows: sequential, parallel, joins ───────────────────────────────

struct SequentialInstigator {
    log: Log,
}

impl Work for SequentialInstigator {
    fn execute(&self, ctx: &mut WorkContext<'_>) -> Result<(), Failure> {
        self.log.lock().unwrap().push("first".into());
        ctx.instigate(0, Some(payload("spliced")), FlowStrategy::Sequential)?;
        Ok(())
    }
}

#[test]
fn sequential_flow_runs_before_static_successor() {
    init_tracing();
    let log = new_log();
    let bureau = Bureau::builder()
        .with_team("inline", InlineTeam::new())
        .with_office(
            OfficeModel::new("orders")
                .with_unit(
                    UnitMetadata::new("first", "inline")
                        .with_flow("spliced")
                        .with_next("last"),
                )
                .with_unit(UnitMetadata::new("spliced", "inline"))
                .with_unit(UnitMetadata::new("last", "inline")),
            OfficeRegistry::new()
                .with_work(
                    "first",
                    SequentialInstigator {
                        log: Arc::clone(&log),
                    },
                )
                .with_work(
                    "spliced",
                    RecordingWork {
                        label: "spliced".into(),
                        log: Arc::clone(&log),
                    },
                )
                .with_work(
                    "last",
                    RecordingWork {
                        label: "last".into(),
                        log: Arc::clone(&log),
                    },
                ),
        )
        .build()
        .unwrap();
    bureau.open().unwrap();

    let handle = bureau.invoke(&orders(), &unit("first"), None).unwrap();
    assert!(handle.wait(Some(Duration::from_secs(5))));
    assert_eq!(entries(&log), vec!["first", "spliced", "last"]);

    bureau.close().unwrap();
}

struct JoiningParent {
    timeout: Duration,
}

impl Work for JoiningParent {
    fn execute(&self, ctx: &mut WorkContext<'_>) -> Result<(), Failure> {
        let handle = ctx
            .instigate(0, None, FlowStrategy::Parallel)?
            .expect("parallel instigation returns a handle");
        ctx.join(handle, Some(self.timeout));
        Ok(())
    }
}

#[test]
fn join_completes_when_parallel_flow_finishes() {
    init_tracing();
    let log = new_log();
    let bureau = Bureau::builder()
        .with_team("workers", SpawnTeam::new())
        .with_office(
            OfficeModel::new("orders")
                .with_object(
                    ObjectMetadata::new("late", ObjectScope::Process).callback_sourced(),
                )
                .with_unit(
                    UnitMetadata::new("parent", "workers")
                        .with_flow("child")
                        .with_next("after-join"),
                )
                .with_unit(UnitMetadata::new("child", "workers").with_dependency(0))
                .with_unit(UnitMetadata::new("after-join", "workers")),
            OfficeRegistry::new()
                .with_work(
                    "parent",
                    JoiningParent {
                        timeout: Duration::from_secs(5),
                    },
                )
                .with_work(
                    "child",
                    RecordingWork {
                        label: "child".into(),
                        log: Arc::clone(&log),
                    },
                )
                .with_work(
                    "after-join",
                    RecordingWork {
                        label: "after-join".into(),
                        log: Arc::clone(&log),
                    },
                )
                .with_object_source(
                    "late",
                    DelayedSource {
                        delay: Duration::from_millis(40),
                        double_supply: false,
                    },
                ),
        )
        .build()
        .unwrap();
    bureau.open().unwrap();

    let handle = bureau.invoke(&orders(), &unit("parent"), None).unwrap();
    assert!(handle.wait(Some(Duration::from_secs(5))));
    // The join held the parent's successor until the child completed
    assert_eq!(entries(&log), vec!["child", "after-join"]);
    assert!(handle.failure().is_none());

    bureau.close().unwrap();
}

#[test]
fn expired_join_escalates_a_timeout_failure() {
    init_tracing();
    let (handler, count, _) = CountingHandler::new();
    let bureau = Bureau::builder()
        .with_team("workers", SpawnTeam::new())
        .with_escalation_handler(handler)
        .monitor_interval(Duration::from_millis(5))
        .with_office(
            OfficeModel::new("orders")
                .with_object(
                    ObjectMetadata::new("late", ObjectScope::Process).callback_sourced(),
                )
                .with_unit(UnitMetadata::new("parent", "workers").with_flow("child"))
                .with_unit(UnitMetadata::new("child", "workers").with_dependency(0)),
            OfficeRegistry::new()
                .with_work(
                    "parent",
                    JoiningParent {
                        timeout: Duration::from_millis(40),
                    },
                )
                .with_work(
                    "child",
                    RecordingWork {
                        label: "child".into(),
                        log: new_log(),
                    },
                )
                .with_object_source(
                    "late",
                    DelayedSource {
                        delay: Duration::from_millis(150),
                        double_supply: false,
                    },
                ),
        )
        .build()
        .unwrap();
    bureau.open().unwrap();

    let handle = bureau.invoke(&orders(), &unit("parent"), None).unwrap();
    assert!(handle.wait(Some(Duration::from_secs(5))));

    // The parent was woken with a timeout failure and escalated; the
    // process still completed once the child's flow finished
    assert_eq!(count.load(Ordering::SeqCst), 1);
    let captured = handle.failure().expect("timeout captured on the handle");
    assert_eq!(captured.kind, FailureKind::Timeout);

    bureau.close().unwrap();
}

// ── Completion monotonicity ──────────────────────────────────────────

#[test]
fn completion_is_monotonic() {
    init_tracing();
    let bureau = Bureau::builder()
        .with_team("workers", SpawnTeam::new())
        .with_office(
            OfficeModel::new("orders")
                .with_object(
                    ObjectMetadata::new("ledger", ObjectScope::Process).callback_sourced(),
                )
                .with_unit(UnitMetadata::new("bill", "workers").with_dependency(0)),
            OfficeRegistry::new()
                .with_work(
                    "bill",
                    RecordingWork {
                        label: "bill".into(),
                        log: new_log(),
                    },
                )
                .with_object_source(
                    "ledger",
                    DelayedSource {
                        delay: Duration::from_millis(30),
                        double_supply: false,
                    },
                ),
        )
        .build()
        .unwrap();
    bureau.open().unwrap();

    let handle = bureau.invoke(&orders(), &unit("bill"), None).unwrap();
    assert!(handle.wait(Some(Duration::from_secs(5))));
    for _ in 0..100 {
        assert!(handle.is_complete());
    }

    bureau.close().unwrap();
}

// ── Forced shutdown ──────────────────────────────────────────────────

#[test]
fn close_force_completes_parked_processes() {
    init_tracing();
    let bureau = Bureau::builder()
        .with_team("workers", SpawnTeam::new())
        .close_timeout(Duration::from_secs(2))
        .with_office(
            OfficeModel::new("orders")
                .with_object(
                    ObjectMetadata::new("never", ObjectScope::Process).callback_sourced(),
                )
                .with_unit(UnitMetadata::new("bill", "workers").with_dependency(0)),
            OfficeRegistry::new()
                .with_work(
                    "bill",
                    RecordingWork {
                        label: "bill".into(),
                        log: new_log(),
                    },
                )
                .with_object_source("never", SilentSource),
        )
        .build()
        .unwrap();
    bureau.open().unwrap();

    let handle = bureau.invoke(&orders(), &unit("bill"), None).unwrap();
    // Give the job time to park on the never-ready object
    std::thread::sleep(Duration::from_millis(50));
    assert!(!handle.is_complete());

    bureau.close().unwrap();
    assert!(handle.is_complete());
    let diagnostics = bureau.diagnostics();
    assert!(diagnostics
        .iter()
        .any(|d| d.kind == bureau_kernel::DiagnosticKind::ForcedCompletion));
}

// ── Asynchronous instigation ─────────────────────────────────────────

struct AsyncInstigator;

impl Work for AsyncInstigator {
    fn execute(&self, ctx: &mut WorkContext<'_>) -> Result<(), Failure> {
        ctx.instigate(0, None, FlowStrategy::Asynchronous)?;
        Ok(())
    }
}

#[test]
fn asynchronous_instigation_runs_as_its_own_process() {
    init_tracing();
    let log = new_log();
    let bureau = Bureau::builder()
        .with_team("workers", SpawnTeam::new())
        .with_office(
            OfficeModel::new("orders")
                .with_unit(UnitMetadata::new("parent", "workers").with_flow("detached"))
                .with_unit(UnitMetadata::new("detached", "workers")),
            OfficeRegistry::new()
                .with_work("parent", AsyncInstigator)
                .with_work(
                    "detached",
                    RecordingWork {
                        label: "detached".into(),
                        log: Arc::clone(&log),
                    },
                ),
        )
        .build()
        .unwrap();
    bureau.open().unwrap();

    let handle = bureau.invoke(&orders(), &unit("parent"), None).unwrap();
    // The parent completes without waiting on the detached process
    assert!(handle.wait(Some(Duration::from_secs(5))));

    let deadline = Instant::now() + Duration::from_secs(5);
    while entries(&log).is_empty() {
        assert!(Instant::now() < deadline, "detached process never ran");
        std::thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(entries(&log), vec!["detached"]);

    bureau.close().unwrap();
}

// ── Object-source invoked flows ──────────────────────────────────────

/// Invokes a unit on its own office when sourced and handles that flow's
/// failures itself
struct InvokingSource {
    handled: Arc<AtomicUsize>,
}

impl ObjectSource for InvokingSource {
    fn source(&self, ctx: SourcingContext) -> Result<(), Failure> {
        ctx.supply(7_u32);
        ctx.invoke(&UnitName::new("reindex"), None)?;
        Ok(())
    }

    fn handle_escalation(&self, _failure: &Failure) -> Option<Result<(), Failure>> {
        self.handled.fetch_add(1, Ordering::SeqCst);
        Some(Ok(()))
    }
}

#[test]
fn source_invoked_flow_failures_route_to_the_source_handler() {
    init_tracing();
    let handled = Arc::new(AtomicUsize::new(0));
    let (handler, top_level_count, _) = CountingHandler::new();
    let bureau = Bureau::builder()
        .with_team("workers", SpawnTeam::new())
        .with_escalation_handler(handler)
        .with_office(
            OfficeModel::new("orders")
                .with_object(ObjectMetadata::new("feed", ObjectScope::Process))
                .with_unit(UnitMetadata::new("bill", "workers").with_dependency(0))
                .with_unit(UnitMetadata::new("reindex", "workers")),
            OfficeRegistry::new()
                .with_work(
                    "bill",
                    RecordingWork {
                        label: "bill".into(),
                        log: new_log(),
                    },
                )
                .with_work(
                    "reindex",
                    FailingWork {
                        failure: Failure::resource("index store offline"),
                    },
                )
                .with_object_source(
                    "feed",
                    InvokingSource {
                        handled: Arc::clone(&handled),
                    },
                ),
        )
        .build()
        .unwrap();
    bureau.open().unwrap();

    let handle = bureau.invoke(&orders(), &unit("bill"), None).unwrap();
    assert!(handle.wait(Some(Duration::from_secs(5))));

    let deadline = Instant::now() + Duration::from_secs(5);
    while handled.load(Ordering::SeqCst) == 0 {
        assert!(Instant::now() < deadline, "source handler never ran");
        std::thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(handled.load(Ordering::SeqCst), 1);
    assert_eq!(top_level_count.load(Ordering::SeqCst), 0);

    bureau.close().unwrap();
}

// ── Sourcing timeout ─────────────────────────────────────────────────

#[test]
fn bounded_sourcing_expires_with_a_timeout_failure() {
    init_tracing();
    let (handler, count, _) = CountingHandler::new();
    let bureau = Bureau::builder()
        .with_team("workers", SpawnTeam::new())
        .with_escalation_handler(handler)
        .monitor_interval(Duration::from_millis(5))
        .with_office(
            OfficeModel::new("orders")
                .with_object(
                    ObjectMetadata::new("never", ObjectScope::Process)
                        .callback_sourced()
                        .with_timeout_ms(40),
                )
                .with_unit(UnitMetadata::new("bill", "workers").with_dependency(0)),
            OfficeRegistry::new()
                .with_work(
                    "bill",
                    RecordingWork {
                        label: "bill".into(),
                        log: new_log(),
                    },
                )
                .with_object_source("never", SilentSource),
        )
        .build()
        .unwrap();
    bureau.open().unwrap();

    let handle = bureau.invoke(&orders(), &unit("bill"), None).unwrap();
    assert!(handle.wait(Some(Duration::from_secs(5))));
    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert_eq!(
        handle.failure().expect("timeout captured").kind,
        FailureKind::Timeout
    );

    bureau.close().unwrap();
}

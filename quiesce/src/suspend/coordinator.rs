//! SuspendCoordinator: drives every registered gate through suspend and resume.
//!
//! Suspend is asynchronous. `suspend()` closes every gate and returns; the
//! coordinator reaches SUSPENDED when the last gate reports drained, which
//! happens on whichever thread releases that gate's last permit.
//!
//! Each suspend attempt and each resume bumps a generation counter. Drain
//! callbacks carry the generation they were issued under, so a callback from
//! an attempt that was cancelled by `resume()` is ignored.
//!
//! Listener hooks are queued under the lock in transition order and delivered
//! after it is released, one thread at a time.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, Weak};

use chrono::{DateTime, Utc};
use tokio::sync::watch;

use super::listener::{SuspendListener, notify_all, sandboxed};
use crate::gate::{GateId, QuiescenceGate};
use crate::state::{SuspendSnapshot, SuspendState};

/// Gates the current suspend attempt is still waiting on.
struct PendingDrain {
    generation: u64,
    /// Insertion order is irrelevant; names are kept for diagnostics.
    gates: HashMap<GateId, String>,
}

struct Control {
    state: SuspendState,
    generation: u64,
    gates: Vec<QuiescenceGate>,
    listeners: Vec<Arc<dyn SuspendListener>>,
    /// Present iff state is SUSPENDING.
    pending: Option<PendingDrain>,
    suspended_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Hook {
    SuspendStarted,
    SuspendComplete,
    Resumed,
}

impl Hook {
    fn name(self) -> &'static str {
        match self {
            Hook::SuspendStarted => "suspend_started",
            Hook::SuspendComplete => "suspend_complete",
            Hook::Resumed => "resumed",
        }
    }

    fn call(self, listener: &dyn SuspendListener) {
        match self {
            Hook::SuspendStarted => listener.suspend_started(),
            Hook::SuspendComplete => listener.suspend_complete(),
            Hook::Resumed => listener.resumed(),
        }
    }
}

/// A hook bound to the listeners subscribed when its transition happened.
struct Notification {
    hook: Hook,
    listeners: Vec<Arc<dyn SuspendListener>>,
}

#[derive(Default)]
struct Outbox {
    queue: VecDeque<Notification>,
    /// Set while some thread is delivering the queue.
    dispatching: bool,
}

struct CoordinatorInner {
    control: StdMutex<Control>,
    /// Always locked after `control`, never the other way round.
    outbox: StdMutex<Outbox>,
    state_tx: watch::Sender<SuspendState>,
}

impl CoordinatorInner {
    fn lock_control(&self) -> MutexGuard<'_, Control> {
        match self.control.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("Suspend coordinator mutex poisoned - recovering");
                poisoned.into_inner()
            }
        }
    }

    fn lock_outbox(&self) -> MutexGuard<'_, Outbox> {
        match self.outbox.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("Suspend notification queue poisoned - recovering");
                poisoned.into_inner()
            }
        }
    }

    fn set_state(&self, control: &mut Control, state: SuspendState) {
        control.state = state;
        self.state_tx.send_replace(state);
    }

    /// Queue `hook` for the listeners subscribed right now.
    fn notify(&self, control: &Control, hook: Hook) {
        if control.listeners.is_empty() {
            return;
        }
        self.lock_outbox().queue.push_back(Notification {
            hook,
            listeners: control.listeners.clone(),
        });
    }

    /// Deliver queued hooks. Must be called with `control` unlocked.
    ///
    /// If another thread is already delivering, it picks up whatever was
    /// queued here, including hooks queued by hooks.
    fn dispatch(&self) {
        let mut outbox = self.lock_outbox();
        if outbox.dispatching {
            return;
        }
        outbox.dispatching = true;

        loop {
            let Some(notification) = outbox.queue.pop_front() else {
                break;
            };
            drop(outbox);
            let hook = notification.hook;
            notify_all(&notification.listeners, hook.name(), |l| hook.call(l));
            outbox = self.lock_outbox();
        }
        outbox.dispatching = false;
    }

    fn gate_drained(&self, generation: u64, gate_id: GateId) {
        let mut control = self.lock_control();

        let last = match control.pending.as_mut() {
            Some(pending) if pending.generation == generation => {
                match pending.gates.remove(&gate_id) {
                    Some(name) => {
                        tracing::debug!(gate = %name, generation, remaining = pending.gates.len(), "Gate reported drained");
                        pending.gates.is_empty()
                    }
                    None => false,
                }
            }
            _ => {
                tracing::debug!(generation, "Ignoring drain callback from a cancelled suspend");
                false
            }
        };

        if last {
            self.complete(&mut control);
        }
        drop(control);
        self.dispatch();
    }

    fn complete(&self, control: &mut Control) {
        control.pending = None;
        control.suspended_at = Some(Utc::now());
        self.set_state(control, SuspendState::Suspended);
        tracing::info!(generation = control.generation, "Suspend complete");
        self.notify(control, Hook::SuspendComplete);
    }
}

/// Callback handed to a gate for one suspend attempt.
fn drain_callback(
    inner: Weak<CoordinatorInner>,
    generation: u64,
    gate_id: GateId,
) -> impl FnOnce() + Send + 'static {
    move || {
        if let Some(inner) = inner.upgrade() {
            inner.gate_drained(generation, gate_id);
        }
    }
}

/// Process-wide (per server instance) suspend/resume state machine.
///
/// Cloning is cheap; clones drive the same coordinator.
#[derive(Clone)]
pub struct SuspendCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl Default for SuspendCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl SuspendCoordinator {
    pub fn new() -> Self {
        let (state_tx, _) = watch::channel(SuspendState::Running);
        Self {
            inner: Arc::new(CoordinatorInner {
                control: StdMutex::new(Control {
                    state: SuspendState::Running,
                    generation: 0,
                    gates: Vec::new(),
                    listeners: Vec::new(),
                    pending: None,
                    suspended_at: None,
                }),
                outbox: StdMutex::new(Outbox::default()),
                state_tx,
            }),
        }
    }

    /// Current state. Lock-free.
    pub fn state(&self) -> SuspendState {
        *self.inner.state_tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SuspendState> {
        self.inner.state_tx.subscribe()
    }

    /// Wait until the coordinator is in `target`.
    pub async fn wait_for(&self, target: SuspendState) {
        let mut rx = self.subscribe();
        // The sender lives as long as `self`, so the channel cannot close here.
        let _ = rx.wait_for(|state| *state == target).await;
    }

    pub fn generation(&self) -> u64 {
        self.inner.lock_control().generation
    }

    /// Close every gate and start waiting for in-flight work to finish.
    ///
    /// A no-op if a suspend is already in progress or complete.
    pub fn suspend(&self) {
        {
            let mut control = self.inner.lock_control();
            if control.state != SuspendState::Running {
                tracing::info!(state = %control.state, "Suspend requested while already suspending, ignoring");
                return;
            }

            control.generation += 1;
            let generation = control.generation;
            tracing::info!(generation, gates = control.gates.len(), "Suspend started");

            self.inner.notify(&control, Hook::SuspendStarted);
            self.inner.set_state(&mut control, SuspendState::Suspending);

            let mut pending = HashMap::new();
            for gate in &control.gates {
                let callback = drain_callback(Arc::downgrade(&self.inner), generation, gate.id());
                if !gate.begin_drain(callback) {
                    pending.insert(gate.id(), gate.name().to_string());
                }
            }

            if pending.is_empty() {
                self.inner.complete(&mut control);
            } else {
                tracing::info!(generation, waiting = pending.len(), "Waiting for gates to drain");
                control.pending = Some(PendingDrain {
                    generation,
                    gates: pending,
                });
            }
        }
        self.inner.dispatch();
    }

    /// Reopen every gate. Cancels an in-progress suspend.
    ///
    /// A no-op if already running.
    pub fn resume(&self) {
        {
            let mut control = self.inner.lock_control();
            if control.state == SuspendState::Running {
                tracing::debug!("Resume requested while running, ignoring");
                return;
            }

            let cancelled = control.state == SuspendState::Suspending;
            control.generation += 1;
            control.pending = None;
            control.suspended_at = None;
            self.inner.set_state(&mut control, SuspendState::Running);

            for gate in &control.gates {
                gate.resume();
            }

            tracing::info!(
                generation = control.generation,
                cancelled_suspend = cancelled,
                "Resumed"
            );
            self.inner.notify(&control, Hook::Resumed);
        }
        self.inner.dispatch();
    }

    /// Create a gate and register it.
    pub fn register_gate(&self, name: impl Into<String>) -> QuiescenceGate {
        let gate = QuiescenceGate::new(name);
        self.add_gate(gate.clone());
        gate
    }

    /// Register a gate. A gate added while suspending or suspended is closed
    /// immediately; a suspend in progress also waits for it.
    pub fn add_gate(&self, gate: QuiescenceGate) {
        let mut control = self.inner.lock_control();
        if control.gates.iter().any(|g| g.id() == gate.id()) {
            tracing::warn!(gate = %gate.name(), "Gate already registered");
            return;
        }

        if control.state.is_suspending_or_suspended() {
            let generation = control.generation;
            let callback = drain_callback(Arc::downgrade(&self.inner), generation, gate.id());
            let drained = gate.begin_drain(callback);
            match control.pending.as_mut() {
                Some(pending) if !drained => {
                    pending.gates.insert(gate.id(), gate.name().to_string());
                }
                None if !drained => {
                    tracing::warn!(
                        gate = %gate.name(),
                        outstanding = gate.outstanding_count(),
                        "Gate registered while suspended still has work in flight"
                    );
                }
                _ => {}
            }
        }

        tracing::debug!(gate = %gate.name(), "Gate registered");
        control.gates.push(gate);
    }

    /// Unregister a gate. If a suspend was waiting only on this gate, it completes.
    pub fn remove_gate(&self, gate: &QuiescenceGate) -> bool {
        let removed = {
            let mut control = self.inner.lock_control();
            let before = control.gates.len();
            control.gates.retain(|g| g.id() != gate.id());
            let removed = control.gates.len() != before;

            let was_last_pending = match control.pending.as_mut() {
                Some(pending) => {
                    pending.gates.remove(&gate.id()).is_some() && pending.gates.is_empty()
                }
                None => false,
            };

            if removed {
                tracing::debug!(gate = %gate.name(), "Gate unregistered");
            }
            if was_last_pending {
                tracing::info!(gate = %gate.name(), "Last pending gate unregistered");
                self.inner.complete(&mut control);
            }
            removed
        };
        self.inner.dispatch();
        removed
    }

    /// Offer a listener the current state; subscribe it unless it declines.
    ///
    /// `listener_added` runs under the coordinator lock so no transition can
    /// slip between the state it is shown and its subscription.
    pub fn add_listener(&self, listener: Arc<dyn SuspendListener>) -> bool {
        let mut control = self.inner.lock_control();
        let state = control.state;
        let accepted = sandboxed(listener.as_ref(), "listener_added", || {
            listener.listener_added(state)
        })
        .unwrap_or(false);

        if accepted {
            control.listeners.push(listener);
        }
        accepted
    }

    /// Unsubscribe a listener. Hooks already queued for it may still be delivered.
    pub fn remove_listener(&self, listener: &Arc<dyn SuspendListener>) -> bool {
        let mut control = self.inner.lock_control();
        let before = control.listeners.len();
        control.listeners.retain(|l| !Arc::ptr_eq(l, listener));
        control.listeners.len() != before
    }

    pub fn gates(&self) -> Vec<QuiescenceGate> {
        self.inner.lock_control().gates.clone()
    }

    /// `(name, outstanding)` for every registered gate still holding permits.
    pub fn list_outstanding_gates(&self) -> Vec<(String, i64)> {
        self.inner
            .lock_control()
            .gates
            .iter()
            .filter_map(|g| {
                let outstanding = g.outstanding_count();
                (outstanding > 0).then(|| (g.name().to_string(), outstanding))
            })
            .collect()
    }

    pub fn snapshot(&self) -> SuspendSnapshot {
        let control = self.inner.lock_control();
        let mut pending: Vec<String> = control
            .pending
            .as_ref()
            .map(|p| p.gates.values().cloned().collect())
            .unwrap_or_default();
        pending.sort();

        SuspendSnapshot {
            state: control.state,
            generation: control.generation,
            suspended_at: control.suspended_at.map(|t| t.to_rfc3339()),
            gates: control.gates.iter().map(QuiescenceGate::status).collect(),
            pending,
        }
    }
}

impl std::fmt::Debug for SuspendCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let control = self.inner.lock_control();
        f.debug_struct("SuspendCoordinator")
            .field("state", &control.state)
            .field("generation", &control.generation)
            .field("gates", &control.gates.len())
            .field("listeners", &control.listeners.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::GateError;
    use crate::state::GateState;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    /// Counts every hook invocation and logs them in delivery order
    /// (`S` started, `C` complete, `R` resumed).
    #[derive(Default)]
    struct RecordingListener {
        started: AtomicUsize,
        complete: AtomicUsize,
        resumed: AtomicUsize,
        events: StdMutex<String>,
    }

    impl RecordingListener {
        fn counts(&self) -> (usize, usize, usize) {
            (
                self.started.load(Ordering::SeqCst),
                self.complete.load(Ordering::SeqCst),
                self.resumed.load(Ordering::SeqCst),
            )
        }

        fn events(&self) -> String {
            self.events.lock().unwrap().clone()
        }
    }

    impl SuspendListener for RecordingListener {
        fn suspend_started(&self) {
            self.started.fetch_add(1, Ordering::SeqCst);
            self.events.lock().unwrap().push('S');
        }

        fn suspend_complete(&self) {
            self.complete.fetch_add(1, Ordering::SeqCst);
            self.events.lock().unwrap().push('C');
        }

        fn resumed(&self) {
            self.resumed.fetch_add(1, Ordering::SeqCst);
            self.events.lock().unwrap().push('R');
        }
    }

    fn with_listener() -> (SuspendCoordinator, Arc<RecordingListener>) {
        let coordinator = SuspendCoordinator::new();
        let listener = Arc::new(RecordingListener::default());
        assert!(coordinator.add_listener(listener.clone()));
        (coordinator, listener)
    }

    #[test]
    fn suspend_without_work_completes_immediately() {
        let (coordinator, listener) = with_listener();
        coordinator.register_gate("http");
        coordinator.register_gate("timer");

        coordinator.suspend();

        assert_eq!(coordinator.state(), SuspendState::Suspended);
        assert_eq!(listener.counts(), (1, 1, 0));
        assert!(coordinator.snapshot().suspended_at.is_some());
        for gate in coordinator.gates() {
            assert_eq!(gate.state(), GateState::Drained);
        }
    }

    #[test]
    fn suspend_waits_for_busy_gate_only() {
        // Two gates: one with five permits out, one idle.
        let (coordinator, listener) = with_listener();
        let busy = coordinator.register_gate("http");
        coordinator.register_gate("timer");
        let permits: Vec<_> = (0..5).map(|_| busy.acquire_permit().unwrap()).collect();

        coordinator.suspend();
        assert_eq!(coordinator.state(), SuspendState::Suspending);
        assert_eq!(coordinator.snapshot().pending, vec!["http".to_string()]);
        assert_eq!(listener.counts(), (1, 0, 0));

        for permit in permits {
            permit.release().unwrap();
        }

        assert_eq!(coordinator.state(), SuspendState::Suspended);
        assert!(coordinator.snapshot().pending.is_empty());
        assert_eq!(listener.counts(), (1, 1, 0));
    }

    #[test]
    fn suspend_twice_is_idempotent() {
        let (coordinator, listener) = with_listener();
        let gate = coordinator.register_gate("http");
        let permit = gate.acquire_permit().unwrap();

        coordinator.suspend();
        let generation = coordinator.generation();
        coordinator.suspend();

        assert_eq!(coordinator.generation(), generation);
        assert_eq!(coordinator.snapshot().pending.len(), 1);
        assert_eq!(listener.counts(), (1, 0, 0));

        drop(permit);
        assert_eq!(listener.counts(), (1, 1, 0));

        coordinator.suspend();
        assert_eq!(listener.counts(), (1, 1, 0));
    }

    #[test]
    fn resume_cancels_in_progress_suspend() {
        let (coordinator, listener) = with_listener();
        let gate = coordinator.register_gate("http");
        let permit = gate.acquire_permit().unwrap();

        coordinator.suspend();
        assert_eq!(gate.state(), GateState::Draining);
        coordinator.resume();

        assert_eq!(coordinator.state(), SuspendState::Running);
        assert_eq!(gate.state(), GateState::Running);
        assert!(coordinator.snapshot().pending.is_empty());

        drop(permit);
        assert_eq!(coordinator.state(), SuspendState::Running);
        assert_eq!(listener.counts(), (1, 0, 1));
        assert!(gate.acquire_permit().is_ok());
    }

    #[test]
    fn late_callback_from_cancelled_attempt_is_ignored() {
        let (coordinator, listener) = with_listener();
        let gate = coordinator.register_gate("http");
        let permit = gate.acquire_permit().unwrap();

        coordinator.suspend();
        let stale = coordinator.generation();
        coordinator.resume();
        coordinator.suspend();
        assert_eq!(coordinator.state(), SuspendState::Suspending);

        // A callback that was already in flight for the first attempt.
        coordinator.inner.gate_drained(stale, gate.id());
        assert_eq!(coordinator.state(), SuspendState::Suspending);

        drop(permit);
        assert_eq!(coordinator.state(), SuspendState::Suspended);
        assert_eq!(listener.counts(), (2, 1, 1));
    }

    #[test]
    fn resume_while_running_is_a_no_op() {
        let (coordinator, listener) = with_listener();
        coordinator.resume();
        assert_eq!(coordinator.generation(), 0);
        assert_eq!(listener.counts(), (0, 0, 0));
    }

    #[test]
    fn removing_last_pending_gate_completes_suspend() {
        let (coordinator, listener) = with_listener();
        let gate = coordinator.register_gate("ejb");
        let _stuck = gate.acquire_permit().unwrap();

        coordinator.suspend();
        assert_eq!(coordinator.state(), SuspendState::Suspending);

        assert!(coordinator.remove_gate(&gate));
        assert_eq!(coordinator.state(), SuspendState::Suspended);
        assert_eq!(listener.counts(), (1, 1, 0));
        assert!(coordinator.gates().is_empty());
        assert!(!coordinator.remove_gate(&gate));
    }

    #[test]
    fn removing_one_of_several_pending_gates_keeps_waiting() {
        let (coordinator, _listener) = with_listener();
        let a = coordinator.register_gate("a");
        let b = coordinator.register_gate("b");
        let _pa = a.acquire_permit().unwrap();
        let pb = b.acquire_permit().unwrap();

        coordinator.suspend();
        coordinator.remove_gate(&a);
        assert_eq!(coordinator.state(), SuspendState::Suspending);

        drop(pb);
        assert_eq!(coordinator.state(), SuspendState::Suspended);
    }

    #[test]
    fn removed_gate_drain_callback_does_not_double_complete() {
        let (coordinator, listener) = with_listener();
        let gate = coordinator.register_gate("ejb");
        let permit = gate.acquire_permit().unwrap();

        coordinator.suspend();
        coordinator.remove_gate(&gate);
        drop(permit);

        assert_eq!(listener.counts(), (1, 1, 0));
    }

    #[test]
    fn listener_may_decline_subscription() {
        struct OnlyIfRunning(AtomicBool);
        impl SuspendListener for OnlyIfRunning {
            fn listener_added(&self, state: SuspendState) -> bool {
                state == SuspendState::Running
            }
            fn suspend_complete(&self) {
                self.0.store(true, Ordering::SeqCst);
            }
        }

        let coordinator = SuspendCoordinator::new();
        coordinator.suspend();

        let late = Arc::new(OnlyIfRunning(AtomicBool::new(false)));
        assert!(!coordinator.add_listener(late.clone()));

        coordinator.resume();
        let early = Arc::new(OnlyIfRunning(AtomicBool::new(false)));
        assert!(coordinator.add_listener(early.clone()));
        coordinator.suspend();

        assert!(early.0.load(Ordering::SeqCst));
        assert!(!late.0.load(Ordering::SeqCst));
    }

    #[test]
    fn remove_listener_stops_notifications() {
        let (coordinator, listener) = with_listener();
        let handle: Arc<dyn SuspendListener> = listener.clone();
        assert!(coordinator.remove_listener(&handle));
        assert!(!coordinator.remove_listener(&handle));

        coordinator.suspend();
        assert_eq!(listener.counts(), (0, 0, 0));
    }

    #[test]
    fn panicking_listener_does_not_block_suspend() {
        struct Broken;
        impl SuspendListener for Broken {
            fn suspend_started(&self) {
                panic!("broken observer");
            }
            fn suspend_complete(&self) {
                panic!("still broken");
            }
        }

        let coordinator = SuspendCoordinator::new();
        assert!(coordinator.add_listener(Arc::new(Broken)));
        let listener = Arc::new(RecordingListener::default());
        coordinator.add_listener(listener.clone());

        coordinator.suspend();
        assert_eq!(coordinator.state(), SuspendState::Suspended);
        assert_eq!(listener.counts(), (1, 1, 0));
    }

    #[test]
    fn listener_panicking_on_add_is_not_subscribed() {
        struct Broken;
        impl SuspendListener for Broken {
            fn listener_added(&self, _state: SuspendState) -> bool {
                panic!("cannot subscribe");
            }
        }

        let coordinator = SuspendCoordinator::new();
        assert!(!coordinator.add_listener(Arc::new(Broken)));
    }

    /// Hook that inspects the coordinator the way a diagnostics listener would.
    struct SnapshotReader {
        coordinator: SuspendCoordinator,
        seen: StdMutex<Vec<(SuspendState, usize)>>,
    }

    impl SnapshotReader {
        fn record(&self) {
            let snapshot = self.coordinator.snapshot();
            self.seen
                .lock()
                .unwrap()
                .push((self.coordinator.state(), snapshot.pending.len()));
        }
    }

    impl SuspendListener for SnapshotReader {
        fn suspend_started(&self) {
            self.record();
        }
        fn suspend_complete(&self) {
            self.record();
        }
    }

    #[test]
    fn listener_can_read_snapshot_from_hook() {
        let coordinator = SuspendCoordinator::new();
        let gate = coordinator.register_gate("http");
        let permit = gate.acquire_permit().unwrap();
        let reader = Arc::new(SnapshotReader {
            coordinator: coordinator.clone(),
            seen: StdMutex::new(Vec::new()),
        });
        coordinator.add_listener(reader.clone());

        coordinator.suspend();
        assert_eq!(
            *reader.seen.lock().unwrap(),
            vec![(SuspendState::Suspending, 1)]
        );

        // The last permit comes back on another thread, which then runs
        // suspend_complete and its snapshot() call.
        let (done_tx, done_rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            drop(permit);
            let _ = done_tx.send(());
        });
        done_rx
            .recv_timeout(Duration::from_secs(3))
            .expect("releasing the last permit did not return");

        assert_eq!(coordinator.state(), SuspendState::Suspended);
        assert_eq!(
            *reader.seen.lock().unwrap(),
            vec![(SuspendState::Suspending, 1), (SuspendState::Suspended, 0)]
        );
        // The coordinator is still usable afterwards.
        coordinator.resume();
        assert_eq!(coordinator.snapshot().state, SuspendState::Running);
    }

    #[test]
    fn hook_may_resume_the_coordinator() {
        struct ResumeOnComplete(SuspendCoordinator);
        impl SuspendListener for ResumeOnComplete {
            fn suspend_complete(&self) {
                self.0.resume();
            }
        }

        let (coordinator, listener) = with_listener();
        coordinator.add_listener(Arc::new(ResumeOnComplete(coordinator.clone())));

        coordinator.suspend();

        assert_eq!(coordinator.state(), SuspendState::Running);
        assert_eq!(listener.events(), "SCR");
    }

    #[test]
    fn gate_added_while_suspended_starts_closed() {
        let coordinator = SuspendCoordinator::new();
        coordinator.suspend();

        let gate = coordinator.register_gate("late");
        assert_eq!(gate.state(), GateState::Drained);
        assert!(matches!(
            gate.acquire_permit(),
            Err(GateError::Draining { .. })
        ));

        coordinator.resume();
        assert!(gate.acquire_permit().is_ok());
    }

    #[test]
    fn busy_gate_added_while_suspending_joins_pending() {
        let (coordinator, listener) = with_listener();
        let first = coordinator.register_gate("first");
        let p1 = first.acquire_permit().unwrap();
        coordinator.suspend();

        let second = QuiescenceGate::new("second");
        let p2 = second.acquire_permit().unwrap();
        coordinator.add_gate(second.clone());
        assert_eq!(coordinator.snapshot().pending.len(), 2);

        drop(p1);
        assert_eq!(coordinator.state(), SuspendState::Suspending);
        drop(p2);
        assert_eq!(coordinator.state(), SuspendState::Suspended);
        assert_eq!(listener.counts(), (1, 1, 0));
    }

    #[test]
    fn duplicate_gate_registration_is_ignored() {
        let coordinator = SuspendCoordinator::new();
        let gate = coordinator.register_gate("http");
        coordinator.add_gate(gate.clone());
        assert_eq!(coordinator.gates().len(), 1);
    }

    #[test]
    fn list_outstanding_gates_reports_busy_gates() {
        let coordinator = SuspendCoordinator::new();
        let http = coordinator.register_gate("http");
        coordinator.register_gate("timer");
        let _a = http.acquire_permit().unwrap();
        let _b = http.acquire_permit().unwrap();

        assert_eq!(
            coordinator.list_outstanding_gates(),
            vec![("http".to_string(), 2)]
        );
    }

    #[test]
    fn concurrent_work_and_suspend_settles_consistently() {
        let (coordinator, listener) = with_listener();
        let gates: Vec<_> = (0..4)
            .map(|i| coordinator.register_gate(format!("gate-{i}")))
            .collect();

        std::thread::scope(|s| {
            for gate in &gates {
                s.spawn(move || {
                    for _ in 0..300 {
                        if let Ok(permit) = gate.acquire_permit() {
                            std::thread::yield_now();
                            drop(permit);
                        }
                    }
                });
            }
            for _ in 0..20 {
                coordinator.suspend();
                std::thread::yield_now();
                coordinator.resume();
            }
            coordinator.suspend();
        });

        assert_eq!(coordinator.state(), SuspendState::Suspended);
        for gate in &gates {
            assert_eq!(gate.outstanding_count(), 0);
            assert_eq!(gate.state(), GateState::Drained);
        }
        let (started, _, resumed) = listener.counts();
        assert_eq!(started, 21);
        assert_eq!(resumed, 20);

        // Delivery follows transition order, so a completion from an attempt
        // that resume() cancelled would show up as a C not directly after its S.
        let events = listener.events();
        let mut previous = None;
        for event in events.chars() {
            if event == 'C' {
                assert_eq!(previous, Some('S'), "stray completion in {events}");
            }
            previous = Some(event);
        }
        assert!(events.ends_with("SC"), "last attempt did not complete: {events}");
    }

    #[tokio::test]
    async fn wait_for_observes_async_completion() {
        let coordinator = SuspendCoordinator::new();
        let gate = coordinator.register_gate("http");
        let permit = gate.acquire_permit().unwrap();
        coordinator.suspend();

        let releaser = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            drop(permit);
        });

        tokio::time::timeout(
            Duration::from_secs(2),
            coordinator.wait_for(SuspendState::Suspended),
        )
        .await
        .expect("coordinator never reached SUSPENDED");
        releaser.join().unwrap();
    }
}

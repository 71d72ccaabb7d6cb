//! Single-flight gating with resettable failure.
//!
//! A [`SingleFlightGuard`] lets at most one invocation of its operation be
//! in flight. A failure reopens the guard; a success closes it for good.
//!
//! ```text
//!          call                ok
//!   Idle ───────▶ InFlight ───────▶ Succeeded (terminal)
//!    ▲               │
//!    └───── err ─────┘
//! ```
//!
//! Calls made while `InFlight` or `Succeeded` are *gated*: they do not invoke
//! the operation and their [`Invocation`] never settles.

use crate::error::{Error, Result};
use crate::invocation::{Invocation, current_runtime};
use std::borrow::Cow;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use tracing::{Instrument, debug, debug_span, warn};

const IDLE: u8 = 0;
const IN_FLIGHT: u8 = 1;
const SUCCEEDED: u8 = 2;

/// Lifecycle phase of a [`SingleFlightGuard`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardPhase {
    /// No invocation outstanding; the next call dispatches.
    Idle,
    /// An invocation is outstanding; calls are gated.
    InFlight,
    /// The operation succeeded; every further call is gated.
    Succeeded,
}

impl GuardPhase {
    fn from_raw(raw: u8) -> Self {
        match raw {
            IN_FLIGHT => Self::InFlight,
            SUCCEEDED => Self::Succeeded,
            _ => Self::Idle,
        }
    }
}

/// Snapshot of a guard's flags.
///
/// `settled_successfully` and `in_flight` are never both `true`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GuardState {
    /// The operation completed successfully and the guard is closed.
    pub settled_successfully: bool,
    /// An invocation is outstanding.
    pub in_flight: bool,
}

impl From<GuardPhase> for GuardState {
    fn from(phase: GuardPhase) -> Self {
        Self {
            settled_successfully: phase == GuardPhase::Succeeded,
            in_flight: phase == GuardPhase::InFlight,
        }
    }
}

/// Atomic phase cell shared between the guard and its in-flight task.
#[derive(Debug, Default)]
struct PhaseCell(AtomicU8);

impl PhaseCell {
    fn load(&self) -> GuardPhase {
        GuardPhase::from_raw(self.0.load(Ordering::Acquire))
    }

    /// Move `Idle -> InFlight`, or report the phase that blocked it.
    fn try_enter(&self) -> std::result::Result<(), GuardPhase> {
        self.0
            .compare_exchange(IDLE, IN_FLIGHT, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(GuardPhase::from_raw)
    }

    fn settle(&self, succeeded: bool) {
        let next = if succeeded { SUCCEEDED } else { IDLE };
        self.0.store(next, Ordering::Release);
    }
}

/// Ownership of the single in-flight slot.
///
/// Dropping it without settling (panic in the operation, runtime shutdown)
/// counts as a failure, so the guard reopens.
struct InFlightSlot {
    cell: Arc<PhaseCell>,
    settled: bool,
}

impl InFlightSlot {
    fn new(cell: Arc<PhaseCell>) -> Self {
        Self {
            cell,
            settled: false,
        }
    }

    fn settle(mut self, succeeded: bool) {
        self.cell.settle(succeeded);
        self.settled = true;
    }
}

impl Drop for InFlightSlot {
    fn drop(&mut self) {
        if !self.settled {
            self.cell.settle(false);
        }
    }
}

/// Wraps an async operation so that it runs at most once at a time, and
/// never again after it has succeeded.
///
/// The operation is called as `operation(receiver, args)`, where `receiver`
/// is the context captured when the guard was built (`()` for free
/// functions) and `args` are the call arguments, forwarded verbatim.
///
/// # Examples
///
/// ```rust
/// use callguard::guard::{GuardPhase, SingleFlightGuard};
/// use std::sync::Arc;
///
/// # #[tokio::main]
/// # async fn main() -> callguard::Result<()> {
/// let submit = SingleFlightGuard::new(|_: Arc<()>, form: &'static str| async move {
///     println!("submitting {form}");
///     Ok::<_, std::io::Error>(())
/// });
///
/// submit.call("order").await?;
/// assert_eq!(submit.phase(), GuardPhase::Succeeded);
///
/// // Closed for good: the operation is not invoked again.
/// assert!(submit.call("order").is_gated());
/// # Ok(())
/// # }
/// ```
pub struct SingleFlightGuard<R, F> {
    operation: F,
    receiver: Arc<R>,
    state: Arc<PhaseCell>,
    name: Cow<'static, str>,
}

impl<F> SingleFlightGuard<(), F> {
    /// Guard a free-standing operation.
    pub fn new(operation: F) -> Self {
        Self::with_receiver(Arc::new(()), operation)
    }

    /// Create a builder for configuring a guard.
    ///
    /// The builder starts with the unit receiver; use
    /// [`SingleFlightGuardBuilder::receiver`] to bind a different one.
    pub fn builder() -> SingleFlightGuardBuilder<(), F> {
        SingleFlightGuardBuilder::default()
    }
}

impl<R, F> SingleFlightGuard<R, F> {
    /// Guard an operation bound to `receiver`.
    pub fn with_receiver(receiver: Arc<R>, operation: F) -> Self {
        Self {
            operation,
            receiver,
            state: Arc::new(PhaseCell::default()),
            name: Cow::Borrowed("anonymous"),
        }
    }

    /// Call the guarded operation.
    ///
    /// If the guard is idle, the operation is invoked now and dispatched onto
    /// the current Tokio runtime; the returned [`Invocation`] resolves to
    /// `Ok(())` on success or [`Error::OperationFailed`] on failure. The
    /// operation's own error is logged and dropped.
    ///
    /// # Never-settling calls
    ///
    /// If an invocation is already in flight, or the operation has already
    /// succeeded, the operation is **not** invoked and the returned
    /// `Invocation` never resolves. Awaiting it without a timeout hangs
    /// forever. [`Invocation::is_gated`] reports this case.
    ///
    /// Gating does not need a runtime. An idle guard called outside a Tokio
    /// runtime resolves to [`Error::NoRuntime`] and stays idle.
    pub fn call<A, Fut, T, E>(&self, args: A) -> Invocation
    where
        F: Fn(Arc<R>, A) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: std::error::Error + Send + 'static,
    {
        if let Err(phase) = self.state.try_enter() {
            debug!(guard = %self.name, ?phase, "Call gated, invocation will never settle");
            return Invocation::gated();
        }

        let slot = InFlightSlot::new(Arc::clone(&self.state));
        let runtime = match current_runtime() {
            Ok(runtime) => runtime,
            Err(err) => {
                slot.settle(false);
                return Invocation::ready(Err(err));
            }
        };
        let span = debug_span!("single_flight", guard = %self.name);
        let future = span.in_scope(|| {
            debug!("Dispatching invocation");
            (self.operation)(Arc::clone(&self.receiver), args)
        });

        let handle = runtime.spawn(
            async move {
                match future.await {
                    Ok(_) => {
                        slot.settle(true);
                        debug!("Invocation succeeded, guard closed");
                        Ok(())
                    }
                    Err(err) => {
                        slot.settle(false);
                        warn!(error = %err, "Invocation failed, guard reopened");
                        Err(Error::OperationFailed)
                    }
                }
            }
            .instrument(span),
        );

        Invocation::dispatched(handle)
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> GuardPhase {
        self.state.load()
    }

    /// Current flags, as a snapshot.
    pub fn state(&self) -> GuardState {
        self.phase().into()
    }

    /// The receiver the operation is invoked with.
    pub fn receiver(&self) -> &Arc<R> {
        &self.receiver
    }

    /// Label used in log output.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<R, F> fmt::Debug for SingleFlightGuard<R, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingleFlightGuard")
            .field("name", &self.name)
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}

/// Builder for [`SingleFlightGuard`].
///
/// ```rust
/// use callguard::guard::SingleFlightGuard;
/// use std::sync::Arc;
///
/// struct Session {
///     user: String,
/// }
///
/// let guard = SingleFlightGuard::builder()
///     .name("login")
///     .receiver(Arc::new(Session { user: "ada".into() }))
///     .operation(|session: Arc<Session>, _: ()| async move {
///         println!("logging in {}", session.user);
///         Ok::<_, std::io::Error>(())
///     })
///     .build()
///     .unwrap();
///
/// assert_eq!(guard.name(), "login");
/// ```
#[derive(Debug)]
pub struct SingleFlightGuardBuilder<R, F> {
    receiver: Arc<R>,
    operation: Option<F>,
    name: Option<Cow<'static, str>>,
}

impl<F> Default for SingleFlightGuardBuilder<(), F> {
    fn default() -> Self {
        Self {
            receiver: Arc::new(()),
            operation: None,
            name: None,
        }
    }
}

impl<R, F> SingleFlightGuardBuilder<R, F> {
    /// Bind the receiver the operation is invoked with.
    pub fn receiver<R2>(self, receiver: Arc<R2>) -> SingleFlightGuardBuilder<R2, F> {
        SingleFlightGuardBuilder {
            receiver,
            operation: self.operation,
            name: self.name,
        }
    }

    /// Set the operation to guard.
    pub fn operation(mut self, operation: F) -> Self {
        self.operation = Some(operation);
        self
    }

    /// Set the label used in log output.
    pub fn name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Build the guard.
    ///
    /// Fails with [`Error::InvalidArgument`] if no operation was set.
    pub fn build(self) -> Result<SingleFlightGuard<R, F>> {
        let operation = self
            .operation
            .ok_or_else(|| Error::invalid_argument("SingleFlightGuard requires an operation"))?;

        let mut guard = SingleFlightGuard::with_receiver(self.receiver, operation);
        if let Some(name) = self.name {
            guard.name = name;
        }
        Ok(guard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::pin::Pin;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;
    use tokio::sync::oneshot;
    use tokio_test::{assert_pending, task};

    type BoxedOutcome = Pin<Box<dyn Future<Output = io::Result<()>> + Send>>;

    /// Operation whose outcome is decided by the caller through a channel.
    fn controlled(
        calls: Arc<AtomicU32>,
    ) -> impl Fn(Arc<()>, oneshot::Receiver<bool>) -> BoxedOutcome {
        move |_, outcome| {
            calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                match outcome.await {
                    Ok(true) => Ok(()),
                    _ => Err(io::Error::other("rejected")),
                }
            })
        }
    }

    #[test]
    fn test_phase_state_mapping() {
        assert_eq!(GuardState::from(GuardPhase::Idle), GuardState::default());
        assert_eq!(
            GuardState::from(GuardPhase::InFlight),
            GuardState {
                settled_successfully: false,
                in_flight: true
            }
        );
        assert_eq!(
            GuardState::from(GuardPhase::Succeeded),
            GuardState {
                settled_successfully: true,
                in_flight: false
            }
        );
    }

    #[test]
    fn test_phase_cell_transitions() {
        let cell = PhaseCell::default();
        assert_eq!(cell.load(), GuardPhase::Idle);

        assert!(cell.try_enter().is_ok());
        assert_eq!(cell.try_enter(), Err(GuardPhase::InFlight));

        cell.settle(false);
        assert_eq!(cell.load(), GuardPhase::Idle);

        assert!(cell.try_enter().is_ok());
        cell.settle(true);
        assert_eq!(cell.try_enter(), Err(GuardPhase::Succeeded));
    }

    #[test]
    fn test_unsettled_slot_reopens_guard() {
        let cell = Arc::new(PhaseCell::default());
        cell.try_enter().unwrap();

        drop(InFlightSlot::new(Arc::clone(&cell)));
        assert_eq!(cell.load(), GuardPhase::Idle);

        cell.try_enter().unwrap();
        InFlightSlot::new(Arc::clone(&cell)).settle(true);
        assert_eq!(cell.load(), GuardPhase::Succeeded);
    }

    #[tokio::test]
    async fn test_call_while_in_flight_never_settles() {
        let calls = Arc::new(AtomicU32::new(0));
        let guard = SingleFlightGuard::new(controlled(Arc::clone(&calls)));

        let (release, outcome) = oneshot::channel();
        let first = guard.call(outcome);
        assert!(first.is_dispatched());
        assert!(guard.state().in_flight);

        let (_never_sent, outcome) = oneshot::channel();
        let mut second = task::spawn(guard.call(outcome));
        assert!(second.is_gated());
        assert_pending!(second.poll());

        release.send(true).unwrap();
        first.await.unwrap();

        // Settling the first call does not complete the gated one.
        assert_pending!(second.poll());
        assert!(!second.is_woken());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_reopens_guard() {
        let calls = Arc::new(AtomicU32::new(0));
        let guard = SingleFlightGuard::new(controlled(Arc::clone(&calls)));

        let (release, outcome) = oneshot::channel();
        let first = guard.call(outcome);
        release.send(false).unwrap();
        assert!(matches!(first.await, Err(Error::OperationFailed)));
        assert_eq!(guard.phase(), GuardPhase::Idle);

        let (release, outcome) = oneshot::channel();
        let second = guard.call(outcome);
        assert!(second.is_dispatched());
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        release.send(true).unwrap();
        second.await.unwrap();
        assert_eq!(guard.phase(), GuardPhase::Succeeded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_closes_guard_forever() {
        let calls = Arc::new(AtomicU32::new(0));
        let guard = SingleFlightGuard::new(controlled(Arc::clone(&calls)));

        let (release, outcome) = oneshot::channel();
        let first = guard.call(outcome);
        release.send(true).unwrap();
        first.await.unwrap();

        for _ in 0..3 {
            let (release, outcome) = oneshot::channel();
            let _ = release.send(true);
            let gated = guard.call(outcome);
            assert!(gated.is_gated());
            assert!(
                tokio::time::timeout(Duration::from_secs(3600), gated)
                    .await
                    .is_err()
            );
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(guard.state().settled_successfully);
    }

    #[tokio::test]
    async fn test_operation_runs_to_completion_when_call_dropped() {
        let calls = Arc::new(AtomicU32::new(0));
        let guard = SingleFlightGuard::new(controlled(Arc::clone(&calls)));

        let (release, outcome) = oneshot::channel();
        drop(guard.call(outcome));
        release.send(true).unwrap();

        while guard.phase() == GuardPhase::InFlight {
            tokio::task::yield_now().await;
        }
        assert_eq!(guard.phase(), GuardPhase::Succeeded);
    }

    #[tokio::test]
    async fn test_receiver_captured_at_construction() {
        struct Account {
            deposits: AtomicU32,
        }

        let account = Arc::new(Account {
            deposits: AtomicU32::new(0),
        });
        let guard = SingleFlightGuard::with_receiver(
            Arc::clone(&account),
            |account: Arc<Account>, amount: u32| async move {
                account.deposits.fetch_add(amount, Ordering::SeqCst);
                Ok::<_, io::Error>(())
            },
        );

        guard.call(25).await.unwrap();
        assert_eq!(account.deposits.load(Ordering::SeqCst), 25);
        assert!(Arc::ptr_eq(guard.receiver(), &account));
    }

    #[tokio::test]
    async fn test_panicking_operation_reopens_guard() {
        let guard = SingleFlightGuard::new(|_: Arc<()>, explode: bool| async move {
            if explode {
                panic!("operation exploded");
            }
            Ok::<_, io::Error>(())
        });

        let first = guard.call(true);
        let outcome = tokio::spawn(first).await;
        assert!(outcome.unwrap_err().is_panic());
        assert_eq!(guard.phase(), GuardPhase::Idle);

        guard.call(false).await.unwrap();
        assert_eq!(guard.phase(), GuardPhase::Succeeded);
    }

    #[test]
    fn test_call_outside_runtime() {
        let calls = Arc::new(AtomicU32::new(0));
        let guard = SingleFlightGuard::new(controlled(Arc::clone(&calls)));

        let (_release, outcome) = oneshot::channel();
        let mut invocation = task::spawn(guard.call(outcome));
        let result = tokio_test::assert_ready!(invocation.poll());

        assert!(matches!(result, Err(Error::NoRuntime)));
        assert_eq!(guard.phase(), GuardPhase::Idle);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_gating_holds_on_threads_without_runtime() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let calls = Arc::new(AtomicU32::new(0));
        let guard = Arc::new(SingleFlightGuard::new(controlled(Arc::clone(&calls))));

        let call_from_plain_thread = |guard: &Arc<SingleFlightGuard<_, _>>| {
            let guard = Arc::clone(guard);
            std::thread::spawn(move || {
                let (_release, outcome) = oneshot::channel();
                guard.call(outcome).is_gated()
            })
            .join()
            .unwrap()
        };

        // In flight
        let (release, outcome) = oneshot::channel();
        let first = runtime.block_on(async { guard.call(outcome) });
        assert!(call_from_plain_thread(&guard));

        release.send(true).unwrap();
        runtime.block_on(first).unwrap();

        // Succeeded
        assert!(call_from_plain_thread(&guard));
        assert_eq!(guard.phase(), GuardPhase::Succeeded);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_builder_requires_operation() {
        let result = SingleFlightGuard::<(), fn(Arc<()>, ()) -> BoxedOutcome>::builder()
            .name("empty")
            .build();

        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_builder_sets_name_and_receiver() {
        let guard = SingleFlightGuard::builder()
            .receiver(Arc::new(7u8))
            .name("refresh")
            .operation(|_: Arc<u8>, _: ()| async { Ok::<_, io::Error>(()) })
            .build()
            .unwrap();

        assert_eq!(guard.name(), "refresh");
        assert_eq!(**guard.receiver(), 7);
        assert_eq!(guard.phase(), GuardPhase::Idle);
        assert!(format!("{guard:?}").contains("refresh"));
    }
}

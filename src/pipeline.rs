use bitflags::bitflags;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use crate::component::{ComponentInstance, ErrorBag};
use crate::error::ProtocolError;
use crate::wire::{Action, RequestPayload, ResponsePayload};
use crate::{ComponentId, PropertyMap, SessionId};

bitflags! {
    /// Passes a step takes part in
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Passes: u8 {
        /// Hydrate pass of a subsequent request.
        const HYDRATE = 1 << 0;
        /// Dehydrate pass of a subsequent request.
        const DEHYDRATE = 1 << 1;
        /// Dehydrate pass of the first render.
        const INITIAL = 1 << 2;
    }
}

/// One middleware step.
pub trait HydrationStep: Send + Sync {
    /// Stable name used in configuration and logs.
    fn name(&self) -> &'static str;

    fn passes(&self) -> Passes {
        Passes::all()
    }

    fn hydrate(
        &self,
        _instance: &mut ComponentInstance,
        _request: &mut RequestContext,
    ) -> Result<(), ProtocolError> {
        Ok(())
    }

    fn dehydrate(
        &self,
        _instance: &mut ComponentInstance,
        _response: &mut ResponseContext,
    ) -> Result<(), ProtocolError> {
        Ok(())
    }
}

/// Everything known about the incoming request, plus what hydrate steps stash
/// for their dehydrate half.
#[derive(Clone, Debug)]
pub struct RequestContext {
    pub id: ComponentId,
    pub name: String,
    /// Public properties exactly as received.
    pub data: PropertyMap,
    pub checksum: String,
    pub action_queue: Vec<Action>,
    pub children: Vec<ComponentId>,
    pub error_bag: ErrorBag,
    pub torn_down: Vec<ComponentId>,
    pub live: Option<HashSet<ComponentId>>,
    pub session: Option<SessionId>,
    pub from_prefetch: bool,
    /// Per-property hashes taken after hydrate, for dirty detection.
    pub property_hashes: BTreeMap<String, u32>,
    initial: bool,
}

impl RequestContext {
    /// Context for a first render: no incoming payload.
    pub fn initial(id: ComponentId, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            data: PropertyMap::new(),
            checksum: String::new(),
            action_queue: Vec::new(),
            children: Vec::new(),
            error_bag: ErrorBag::new(),
            torn_down: Vec::new(),
            live: None,
            session: None,
            from_prefetch: false,
            property_hashes: BTreeMap::new(),
            initial: true,
        }
    }

    pub fn is_initial(&self) -> bool {
        self.initial
    }
}

impl From<RequestPayload> for RequestContext {
    fn from(request: RequestPayload) -> Self {
        Self {
            id: request.id,
            name: request.name,
            data: request.data,
            checksum: request.checksum,
            action_queue: request.action_queue,
            children: request.children,
            error_bag: request.error_bag,
            torn_down: request.gc,
            live: request.live.map(|ids| ids.into_iter().collect()),
            session: request.session,
            from_prefetch: request.from_prefetch,
            property_hashes: BTreeMap::new(),
            initial: false,
        }
    }
}

type Commit = Box<dyn FnOnce(&mut ResponsePayload) + Send>;

/// The request context carried over from hydrate plus the payload being built.
pub struct ResponseContext {
    pub request: RequestContext,
    pub payload: ResponsePayload,
    commits: Vec<Commit>,
}

impl ResponseContext {
    pub fn new(request: RequestContext) -> Self {
        let payload = ResponsePayload::empty(request.id.clone(), &request.name);
        Self {
            request,
            payload,
            commits: Vec::new(),
        }
    }

    /// Queue a side effect that must only happen once the whole dehydrate
    /// pass has succeeded. Commits run in the order they were deferred.
    pub fn defer(&mut self, commit: impl FnOnce(&mut ResponsePayload) + Send + 'static) {
        self.commits.push(Box::new(commit));
    }

    /// Apply every deferred side effect.
    pub fn commit(&mut self) {
        for commit in std::mem::take(&mut self.commits) {
            commit(&mut self.payload);
        }
    }

    pub fn pending_commits(&self) -> usize {
        self.commits.len()
    }
}

impl std::fmt::Debug for ResponseContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseContext")
            .field("request", &self.request)
            .field("payload", &self.payload)
            .field("commits", &self.commits.len())
            .finish()
    }
}

/// Per-request state machine.
///
/// `Hydrating -> Hydrated | Rejected`, `Hydrated -> Executing -> Dehydrating ->
/// Dehydrated`, and `Dehydrating -> Rejected` when a dehydrate step fails. A
/// first render enters at `Dehydrating`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RequestPhase {
    Hydrating,
    Hydrated,
    Rejected,
    Executing,
    Dehydrating,
    Dehydrated,
}

impl RequestPhase {
    pub fn can_advance_to(self, next: RequestPhase) -> bool {
        use RequestPhase::*;
        matches!(
            (self, next),
            (Hydrating, Hydrated)
                | (Hydrating, Rejected)
                | (Hydrated, Executing)
                | (Executing, Dehydrating)
                | (Dehydrating, Dehydrated)
                | (Dehydrating, Rejected)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RequestPhase::Rejected | RequestPhase::Dehydrated)
    }
}

/// Tracks one request through [`RequestPhase`].
#[derive(Debug)]
pub(crate) struct PhaseTracker {
    phase: RequestPhase,
}

impl PhaseTracker {
    pub(crate) fn start(phase: RequestPhase) -> Self {
        tracing::trace!(?phase, "request phase");
        Self { phase }
    }

    pub(crate) fn advance(&mut self, next: RequestPhase) {
        debug_assert!(
            self.phase.can_advance_to(next),
            "illegal phase transition {:?} -> {:?}",
            self.phase,
            next
        );
        tracing::trace!(from = ?self.phase, to = ?next, "request phase");
        self.phase = next;
    }

    pub(crate) fn phase(&self) -> RequestPhase {
        self.phase
    }
}

#[derive(Clone, Default)]
pub struct Pipeline {
    steps: Vec<Arc<dyn HydrationStep>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a step; it runs after every step registered before it.
    pub fn register(mut self, step: impl HydrationStep + 'static) -> Self {
        self.steps.push(Arc::new(step));
        self
    }

    pub fn register_arc(mut self, step: Arc<dyn HydrationStep>) -> Self {
        self.steps.push(step);
        self
    }

    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Run the hydrate pass. Stops at, and returns, the first failure.
    pub fn hydrate(
        &self,
        instance: &mut ComponentInstance,
        request: &mut RequestContext,
    ) -> Result<(), ProtocolError> {
        let _span = tracing::debug_span!("hydrate", id = %request.id, component = %request.name).entered();
        for step in self.steps.iter().filter(|s| s.passes().contains(Passes::HYDRATE)) {
            let _step = tracing::trace_span!("step", step = step.name()).entered();
            if let Err(err) = step.hydrate(instance, request) {
                tracing::warn!(step = step.name(), error = %err, "hydrate step rejected request");
                return Err(err);
            }
        }
        Ok(())
    }

    /// Run the dehydrate pass. Stops at, and returns, the first failure.
    ///
    /// On a first render only steps carrying [`Passes::INITIAL`] run. Side
    /// effects steps deferred are applied only when every step succeeded.
    pub fn dehydrate(
        &self,
        instance: &mut ComponentInstance,
        response: &mut ResponseContext,
    ) -> Result<(), ProtocolError> {
        let pass = if response.request.is_initial() {
            Passes::INITIAL
        } else {
            Passes::DEHYDRATE
        };
        let _span = tracing::debug_span!(
            "dehydrate",
            id = %response.request.id,
            component = %response.request.name,
            initial = response.request.is_initial()
        )
        .entered();
        for step in self.steps.iter().filter(|s| s.passes().contains(pass)) {
            let _step = tracing::trace_span!("step", step = step.name()).entered();
            if let Err(err) = step.dehydrate(instance, response) {
                tracing::warn!(
                    step = step.name(),
                    error = %err,
                    dropped_commits = response.pending_commits(),
                    "dehydrate step failed"
                );
                return Err(err);
            }
        }
        response.commit();
        Ok(())
    }
}

use serde_json::Value;
use std::sync::Arc;

use crate::cache::ComponentCache;
use crate::component::{Component, ComponentInstance, ComponentRegistry};
use crate::error::{ActionError, ProtocolError, Rejection};
use crate::hydrator;
use crate::pipeline::{PhaseTracker, Pipeline, RequestContext, RequestPhase, ResponseContext};
use crate::wire::{self, Action, ActionFailure, RequestPayload, ResponsePayload, WireResponse};
use crate::ComponentId;

/// Served when even the rejection cannot be encoded.
const FALLBACK_REJECTION: &[u8] =
    br#"{"error":{"kind":"pipeline","message":"the component could not be processed","status":500}}"#;

/// Request boundary. [`ConnectionHandler::handle`] always produces response
/// bytes: a complete payload or a generic rejection, never a raw error.
pub struct ConnectionHandler {
    registry: ComponentRegistry,
    pipeline: Pipeline,
    cache: Arc<ComponentCache>,
}

impl ConnectionHandler {
    /// `cache` must be the same cache the pipeline's steps were built with.
    pub fn new(registry: ComponentRegistry, pipeline: Pipeline, cache: Arc<ComponentCache>) -> Self {
        Self {
            registry,
            pipeline,
            cache,
        }
    }

    pub fn cache(&self) -> &Arc<ComponentCache> {
        &self.cache
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Handle one wire request end to end.
    pub fn handle(&self, wire_request: &[u8]) -> Vec<u8> {
        let response = match wire::decode_request(wire_request) {
            Ok(request) => self.respond(request),
            Err(err) => {
                tracing::warn!(error = %err, "rejecting malformed request");
                err.rejection().into()
            }
        };
        wire::encode_response(&response).unwrap_or_else(|err| {
            tracing::error!(error = %err, "failed to encode response");
            FALLBACK_REJECTION.to_vec()
        })
    }

    /// Handle a decoded request, mapping failures onto a rejection.
    pub fn respond(&self, request: RequestPayload) -> WireResponse {
        match self.handle_request(request) {
            Ok(payload) => WireResponse::Payload(payload),
            Err(rejection) => rejection.into(),
        }
    }

    /// Hydrate, run the action queue, dehydrate.
    ///
    /// # Errors
    ///
    /// Returns a [`Rejection`] for unknown components and for any failure of
    /// the hydrate or dehydrate pass. Action failures are not rejections:
    /// they are reported in `effects.error` of a complete payload.
    pub fn handle_request(&self, request: RequestPayload) -> Result<ResponsePayload, Rejection> {
        let _span = tracing::info_span!("component_request", id = %request.id, component = %request.name).entered();

        let class = self.class(&request.name).map_err(|err| err.rejection())?;

        let mut phase = PhaseTracker::start(RequestPhase::Hydrating);
        let mut instance = ComponentInstance::new(request.id.clone(), class.schema());
        let mut context = RequestContext::from(request);

        if let Err(err) = self
            .pipeline
            .hydrate(&mut instance, &mut context)
            .and_then(|()| run_hook("hydrate", class.hydrate(&mut instance)))
        {
            phase.advance(RequestPhase::Rejected);
            return Err(err.rejection());
        }
        phase.advance(RequestPhase::Hydrated);

        phase.advance(RequestPhase::Executing);
        let failure = self.run_actions(class.as_ref(), &mut instance, &context.action_queue);

        phase.advance(RequestPhase::Dehydrating);
        let mut response = ResponseContext::new(context);
        response.payload.effects.error = failure;
        match self.dehydrate(class.as_ref(), &mut instance, &mut response) {
            Ok(()) => {
                phase.advance(RequestPhase::Dehydrated);
                Ok(response.payload)
            }
            Err(err) => {
                phase.advance(RequestPhase::Rejected);
                tracing::debug!(phase = ?phase.phase(), "response discarded");
                Err(err.rejection())
            }
        }
    }

    /// First render of the component registered as `name`.
    ///
    /// # Errors
    ///
    /// Fails if the class is unknown, its `mount` hook fails, or the initial
    /// dehydrate pass fails.
    pub fn mount(&self, name: &str, params: &[Value]) -> Result<ResponsePayload, ProtocolError> {
        let class = self.class(name)?;
        let id = ComponentId::generate();
        let _span = tracing::info_span!("component_mount", %id, component = name).entered();

        let mut phase = PhaseTracker::start(RequestPhase::Dehydrating);
        let mut instance = ComponentInstance::new(id.clone(), class.schema());
        run_hook("mount", class.mount(&mut instance, params))?;

        let mut response = ResponseContext::new(RequestContext::initial(id, name));
        self.dehydrate(class.as_ref(), &mut instance, &mut response)?;
        phase.advance(RequestPhase::Dehydrated);
        tracing::debug!(id = %response.payload.id, "component mounted");
        Ok(response.payload)
    }

    fn class(&self, name: &str) -> Result<Arc<dyn Component>, ProtocolError> {
        self.registry
            .get(name)
            .ok_or_else(|| ProtocolError::UnknownComponent(name.to_string()))
    }

    fn dehydrate(
        &self,
        class: &dyn Component,
        instance: &mut ComponentInstance,
        response: &mut ResponseContext,
    ) -> Result<(), ProtocolError> {
        run_hook("dehydrate", class.dehydrate(instance))?;
        self.pipeline.dehydrate(instance, response)
    }

    /// Run the queue in order. A failed action is rolled back and ends the
    /// queue; earlier actions keep their effect.
    fn run_actions(
        &self,
        class: &dyn Component,
        instance: &mut ComponentInstance,
        queue: &[Action],
    ) -> Option<ActionFailure> {
        for action in queue {
            let snapshot = instance.snapshot();
            if let Err(err) = apply_action(class, instance, action) {
                instance.restore(snapshot);
                tracing::warn!(
                    id = %instance.id(),
                    action = action.label(),
                    error = %err,
                    "action failed, changes rolled back"
                );
                return Some(ActionFailure {
                    action: action.label().to_string(),
                    message: format!("`{}` could not be completed", action.label()),
                });
            }
        }
        None
    }
}

fn run_hook(hook: &'static str, result: anyhow::Result<()>) -> Result<(), ProtocolError> {
    result.map_err(|source| ProtocolError::Hook { hook, source })
}

fn apply_action(class: &dyn Component, instance: &mut ComponentInstance, action: &Action) -> Result<(), ActionError> {
    match action {
        Action::SyncInput { name, value } => update_property(class, instance, name, value),
        Action::CallMethod { method, params } => call_method(class, instance, method, params),
        Action::FireEvent { event, params } => match instance.schema().listener_for(event) {
            Some(method) => {
                let method = method.to_string();
                call_method(class, instance, &method, params)
            }
            None => {
                tracing::debug!(id = %instance.id(), event = %event, "component does not listen for event");
                Ok(())
            }
        },
    }
}

fn call_method(
    class: &dyn Component,
    instance: &mut ComponentInstance,
    method: &str,
    params: &[Value],
) -> Result<(), ActionError> {
    match method {
        "$refresh" => Ok(()),
        "$set" => {
            let (name, value) = match params {
                [Value::String(name), value] => (name.as_str(), value),
                _ => {
                    return Err(ActionError::InvalidParams {
                        method: method.to_string(),
                        reason: "expected a property name and a value".to_string(),
                    })
                }
            };
            update_property(class, instance, name, value)
        }
        "$toggle" => {
            let Some(Value::String(name)) = params.first() else {
                return Err(ActionError::InvalidParams {
                    method: method.to_string(),
                    reason: "expected a property name".to_string(),
                });
            };
            let current = instance.get(name).and_then(Value::as_bool).unwrap_or(false);
            update_property(class, instance, name, &Value::Bool(!current))
        }
        _ if method.starts_with('$') => Err(ActionError::UnknownMethod(method.to_string())),
        _ => class.call(instance, method, params),
    }
}

/// Client-driven write of a public property, with the same coercion as hydrate.
fn update_property(
    class: &dyn Component,
    instance: &mut ComponentInstance,
    name: &str,
    value: &Value,
) -> Result<(), ActionError> {
    let prop = instance
        .schema()
        .get(name)
        .ok_or_else(|| ActionError::UnknownProperty(name.to_string()))?;
    if prop.visibility != crate::Visibility::Public {
        return Err(ActionError::NotPublic(name.to_string()));
    }
    let value = hydrator::coerce(prop, value).map_err(|err| ActionError::InvalidParams {
        method: name.to_string(),
        reason: err.to_string(),
    })?;
    instance.set(name, value)?;
    class.updated(instance, name)?;
    Ok(())
}

impl ConnectionHandler {
    /// Like [`ConnectionHandler::mount`], with the failure mapped to its wire
    /// rejection.
    pub fn mount_response(&self, name: &str, params: &[Value]) -> WireResponse {
        match self.mount(name, params) {
            Ok(payload) => WireResponse::Payload(payload),
            Err(err) => {
                tracing::warn!(component = name, error = %err, "mount failed");
                err.rejection().into()
            }
        }
    }
}

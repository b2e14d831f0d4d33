use std::collections::HashSet;
use std::mem;
use std::sync::Arc;

use crate::cache::ComponentCache;
use crate::checksum::{self, SigningKey};
use crate::component::ComponentInstance;
use crate::error::{ConfigError, ProtocolError};
use crate::hydrator;
use crate::pipeline::{HydrationStep, Passes, Pipeline, RequestContext, ResponseContext};

pub const GARBAGE_COLLECT: &str = "garbage_collect";
pub const CLEAR_FLASH: &str = "clear_flash_unless_redirecting";
pub const REGISTER_LISTENERS: &str = "register_listeners";
pub const REGISTER_EMITTED_EVENTS: &str = "register_emitted_events";
pub const PERSIST_ERROR_BAG: &str = "persist_error_bag";
pub const PUBLIC_PROPERTIES: &str = "public_properties";
pub const PROTECTED_PROPERTIES: &str = "protected_properties";
pub const CHILDREN: &str = "previously_rendered_children";
pub const DIRTY_DETECTION: &str = "dirty_detection";
pub const CHECKSUM: &str = "checksum";
pub const VERIFY_CHECKSUM: &str = "verify_checksum";
pub const INTERCEPT_REDIRECTS: &str = "intercept_redirects";
pub const PRIORITIZE_DATA_UPDATES: &str = "prioritize_data_updates";
pub const FORWARD_PREFETCH: &str = "forward_prefetch";

/// Default registration order.
///
/// `verify_checksum` runs first on hydrate; `checksum` signs after every
/// property-writing step on dehydrate.
pub const DEFAULT_ORDER: [&str; 14] = [
    VERIFY_CHECKSUM,
    GARBAGE_COLLECT,
    CLEAR_FLASH,
    REGISTER_LISTENERS,
    REGISTER_EMITTED_EVENTS,
    PERSIST_ERROR_BAG,
    PUBLIC_PROPERTIES,
    PROTECTED_PROPERTIES,
    CHILDREN,
    DIRTY_DETECTION,
    CHECKSUM,
    INTERCEPT_REDIRECTS,
    PRIORITIZE_DATA_UPDATES,
    FORWARD_PREFETCH,
];

/// Applies the client's GC report to the component cache.
///
/// Torn-down ids are forgotten outright. A liveness report only collects
/// entries owned by the reporting session. The component being handled always
/// counts as live. Cache changes are deferred until the response is complete.
pub struct GarbageCollectUnusedComponents {
    cache: Arc<ComponentCache>,
}

impl GarbageCollectUnusedComponents {
    pub fn new(cache: Arc<ComponentCache>) -> Self {
        Self { cache }
    }
}

impl HydrationStep for GarbageCollectUnusedComponents {
    fn name(&self) -> &'static str {
        GARBAGE_COLLECT
    }

    fn passes(&self) -> Passes {
        Passes::HYDRATE | Passes::DEHYDRATE
    }

    fn hydrate(&self, _: &mut ComponentInstance, request: &mut RequestContext) -> Result<(), ProtocolError> {
        let id = request.id.clone();
        if request.torn_down.contains(&id) {
            tracing::debug!(%id, "ignoring teardown report for the component being handled");
            request.torn_down.retain(|torn| *torn != id);
        }
        if let Some(live) = request.live.as_mut() {
            live.insert(id);
        }
        Ok(())
    }

    fn dehydrate(&self, _: &mut ComponentInstance, response: &mut ResponseContext) -> Result<(), ProtocolError> {
        let request = &response.request;
        let id = request.id.clone();
        let torn_down = request.torn_down.clone();
        let report = match (&request.session, &request.live) {
            (Some(session), Some(live)) => Some((session.clone(), live.clone())),
            (None, Some(_)) => {
                tracing::debug!(%id, "liveness report without a session, only teardowns apply");
                None
            }
            _ => None,
        };

        let cache = self.cache.clone();
        response.defer(move |payload| {
            let mut collected = cache.forget(&torn_down);
            if let Some((session, live)) = report {
                collected += cache.collect_session(&session, &live);
            }
            if collected > 0 {
                tracing::info!(%id, collected, "reclaimed cached component state");
            }
            payload.gc = collected;
        });
        Ok(())
    }
}

/// Flash messages only survive when the response navigates away.
pub struct ClearFlashMessagesIfNotRedirectingAway;

impl HydrationStep for ClearFlashMessagesIfNotRedirectingAway {
    fn name(&self) -> &'static str {
        CLEAR_FLASH
    }

    fn passes(&self) -> Passes {
        Passes::DEHYDRATE | Passes::INITIAL
    }

    fn dehydrate(&self, instance: &mut ComponentInstance, _: &mut ResponseContext) -> Result<(), ProtocolError> {
        if instance.redirect.is_none() && !instance.flash.is_empty() {
            tracing::debug!(id = %instance.id(), dropped = instance.flash.len(), "clearing flash messages");
            instance.flash.clear();
        }
        Ok(())
    }
}

pub struct RegisterEventsBeingListenedFor;

impl HydrationStep for RegisterEventsBeingListenedFor {
    fn name(&self) -> &'static str {
        REGISTER_LISTENERS
    }

    fn passes(&self) -> Passes {
        Passes::DEHYDRATE | Passes::INITIAL
    }

    fn dehydrate(&self, instance: &mut ComponentInstance, response: &mut ResponseContext) -> Result<(), ProtocolError> {
        response.payload.events = instance.schema().listened_events();
        Ok(())
    }
}

pub struct RegisterEmittedEvents;

impl HydrationStep for RegisterEmittedEvents {
    fn name(&self) -> &'static str {
        REGISTER_EMITTED_EVENTS
    }

    fn hydrate(&self, instance: &mut ComponentInstance, _: &mut RequestContext) -> Result<(), ProtocolError> {
        instance.emitted.clear();
        Ok(())
    }

    fn dehydrate(&self, instance: &mut ComponentInstance, response: &mut ResponseContext) -> Result<(), ProtocolError> {
        response.payload.effects.emits = mem::take(&mut instance.emitted);
        Ok(())
    }
}

pub struct PersistErrorBag;

impl HydrationStep for PersistErrorBag {
    fn name(&self) -> &'static str {
        PERSIST_ERROR_BAG
    }

    fn hydrate(&self, instance: &mut ComponentInstance, request: &mut RequestContext) -> Result<(), ProtocolError> {
        instance.error_bag = request.error_bag.clone();
        Ok(())
    }

    fn dehydrate(&self, instance: &mut ComponentInstance, response: &mut ResponseContext) -> Result<(), ProtocolError> {
        response.payload.effects.error_bag = instance.error_bag.clone();
        Ok(())
    }
}

pub struct HydratePublicProperties;

impl HydrationStep for HydratePublicProperties {
    fn name(&self) -> &'static str {
        PUBLIC_PROPERTIES
    }

    fn hydrate(&self, instance: &mut ComponentInstance, request: &mut RequestContext) -> Result<(), ProtocolError> {
        hydrator::hydrate_public(instance, &request.data)
    }

    fn dehydrate(&self, instance: &mut ComponentInstance, response: &mut ResponseContext) -> Result<(), ProtocolError> {
        response.payload.data = hydrator::dehydrate_public(instance);
        Ok(())
    }
}

/// Keeps protected properties server-side, in the component cache.
pub struct HydrateProtectedProperties {
    cache: Arc<ComponentCache>,
}

impl HydrateProtectedProperties {
    pub fn new(cache: Arc<ComponentCache>) -> Self {
        Self { cache }
    }
}

impl HydrationStep for HydrateProtectedProperties {
    fn name(&self) -> &'static str {
        PROTECTED_PROPERTIES
    }

    fn hydrate(&self, instance: &mut ComponentInstance, _: &mut RequestContext) -> Result<(), ProtocolError> {
        let fingerprint = instance.fingerprint();
        match self.cache.get(&fingerprint) {
            Some(cached) => hydrator::hydrate_protected(instance, cached),
            None => {
                tracing::warn!(
                    id = %instance.id(),
                    %fingerprint,
                    "protected state not cached, falling back to class defaults"
                );
            }
        }
        Ok(())
    }

    fn dehydrate(&self, instance: &mut ComponentInstance, response: &mut ResponseContext) -> Result<(), ProtocolError> {
        let snapshot = self.cache.encode(&hydrator::dehydrate_protected(instance))?;
        let (cache, fingerprint, id) = (self.cache.clone(), instance.fingerprint(), instance.id().clone());
        response.defer(move |_| cache.insert(fingerprint, &id, snapshot));
        Ok(())
    }
}

pub struct HydratePreviouslyRenderedChildren;

impl HydrationStep for HydratePreviouslyRenderedChildren {
    fn name(&self) -> &'static str {
        CHILDREN
    }

    fn hydrate(&self, instance: &mut ComponentInstance, request: &mut RequestContext) -> Result<(), ProtocolError> {
        instance.children = request.children.clone();
        Ok(())
    }

    fn dehydrate(&self, instance: &mut ComponentInstance, response: &mut ResponseContext) -> Result<(), ProtocolError> {
        response.payload.children = instance.children.clone();
        Ok(())
    }
}

/// Reports which public properties changed during the request.
pub struct HashPropertiesForDirtyDetection;

impl HashPropertiesForDirtyDetection {
    fn hash(value: &serde_json::Value) -> u32 {
        crc32fast::hash(value.to_string().as_bytes())
    }
}

impl HydrationStep for HashPropertiesForDirtyDetection {
    fn name(&self) -> &'static str {
        DIRTY_DETECTION
    }

    fn passes(&self) -> Passes {
        Passes::HYDRATE | Passes::DEHYDRATE
    }

    fn hydrate(&self, instance: &mut ComponentInstance, request: &mut RequestContext) -> Result<(), ProtocolError> {
        request.property_hashes = instance
            .public
            .iter()
            .map(|(name, value)| (name.clone(), Self::hash(value)))
            .collect();
        Ok(())
    }

    fn dehydrate(&self, _: &mut ComponentInstance, response: &mut ResponseContext) -> Result<(), ProtocolError> {
        let hashes = &response.request.property_hashes;
        response.payload.effects.dirty = response
            .payload
            .data
            .iter()
            .filter(|(name, value)| hashes.get(*name) != Some(&Self::hash(value)))
            .map(|(name, _)| name.clone())
            .collect();
        Ok(())
    }
}

/// Verifies the received public properties before anything is hydrated.
///
/// Verification covers the data exactly as received, before unknown names are
/// dropped or values coerced, so a tampered payload is always an integrity
/// failure.
pub struct SecureHydrationWithChecksum {
    key: SigningKey,
}

impl SecureHydrationWithChecksum {
    pub fn new(key: SigningKey) -> Self {
        Self { key }
    }
}

impl HydrationStep for SecureHydrationWithChecksum {
    fn name(&self) -> &'static str {
        VERIFY_CHECKSUM
    }

    fn passes(&self) -> Passes {
        Passes::HYDRATE
    }

    fn hydrate(&self, _: &mut ComponentInstance, request: &mut RequestContext) -> Result<(), ProtocolError> {
        if !checksum::verify_for_class(&request.checksum, &request.id, &request.name, &request.data, &self.key)? {
            return Err(ProtocolError::Integrity(request.id.clone()));
        }
        Ok(())
    }
}

/// Signs the final public properties.
pub struct SignDehydratedPayload {
    key: SigningKey,
}

impl SignDehydratedPayload {
    pub fn new(key: SigningKey) -> Self {
        Self { key }
    }
}

impl HydrationStep for SignDehydratedPayload {
    fn name(&self) -> &'static str {
        CHECKSUM
    }

    fn passes(&self) -> Passes {
        Passes::DEHYDRATE | Passes::INITIAL
    }

    fn dehydrate(&self, _: &mut ComponentInstance, response: &mut ResponseContext) -> Result<(), ProtocolError> {
        let payload = &mut response.payload;
        payload.checksum = checksum::compute_for_class(&payload.id, &payload.name, &payload.data, &self.key)?;
        Ok(())
    }
}

pub struct InterceptRedirects;

impl HydrationStep for InterceptRedirects {
    fn name(&self) -> &'static str {
        INTERCEPT_REDIRECTS
    }

    fn passes(&self) -> Passes {
        Passes::DEHYDRATE | Passes::INITIAL
    }

    fn dehydrate(&self, instance: &mut ComponentInstance, response: &mut ResponseContext) -> Result<(), ProtocolError> {
        let effects = &mut response.payload.effects;
        effects.redirect_to = instance.redirect.take();
        effects.flash = mem::take(&mut instance.flash);
        Ok(())
    }
}

/// Property updates run before method calls, whatever order the client
/// queued them in.
pub struct PrioritizeDataUpdatesBeforeActionCalls;

impl HydrationStep for PrioritizeDataUpdatesBeforeActionCalls {
    fn name(&self) -> &'static str {
        PRIORITIZE_DATA_UPDATES
    }

    fn passes(&self) -> Passes {
        Passes::HYDRATE
    }

    fn hydrate(&self, _: &mut ComponentInstance, request: &mut RequestContext) -> Result<(), ProtocolError> {
        request.action_queue.sort_by_key(|action| !action.is_data_update());
        Ok(())
    }
}

/// Tells the client the response answers a prefetch.
pub struct ForwardPrefetch;

impl HydrationStep for ForwardPrefetch {
    fn name(&self) -> &'static str {
        FORWARD_PREFETCH
    }

    fn passes(&self) -> Passes {
        Passes::HYDRATE | Passes::DEHYDRATE
    }

    fn hydrate(&self, _: &mut ComponentInstance, request: &mut RequestContext) -> Result<(), ProtocolError> {
        if request.from_prefetch {
            tracing::debug!(id = %request.id, "handling prefetch");
        }
        Ok(())
    }

    fn dehydrate(&self, _: &mut ComponentInstance, response: &mut ResponseContext) -> Result<(), ProtocolError> {
        response.payload.from_prefetch = response.request.from_prefetch;
        Ok(())
    }
}

/// Instantiate a standard step by its configuration name.
pub fn build_step(name: &str, key: &SigningKey, cache: &Arc<ComponentCache>) -> Option<Arc<dyn HydrationStep>> {
    let step: Arc<dyn HydrationStep> = match name {
        GARBAGE_COLLECT => Arc::new(GarbageCollectUnusedComponents::new(cache.clone())),
        CLEAR_FLASH => Arc::new(ClearFlashMessagesIfNotRedirectingAway),
        REGISTER_LISTENERS => Arc::new(RegisterEventsBeingListenedFor),
        REGISTER_EMITTED_EVENTS => Arc::new(RegisterEmittedEvents),
        PERSIST_ERROR_BAG => Arc::new(PersistErrorBag),
        PUBLIC_PROPERTIES => Arc::new(HydratePublicProperties),
        PROTECTED_PROPERTIES => Arc::new(HydrateProtectedProperties::new(cache.clone())),
        CHILDREN => Arc::new(HydratePreviouslyRenderedChildren),
        DIRTY_DETECTION => Arc::new(HashPropertiesForDirtyDetection),
        VERIFY_CHECKSUM => Arc::new(SecureHydrationWithChecksum::new(key.clone())),
        CHECKSUM => Arc::new(SignDehydratedPayload::new(key.clone())),
        INTERCEPT_REDIRECTS => Arc::new(InterceptRedirects),
        PRIORITIZE_DATA_UPDATES => Arc::new(PrioritizeDataUpdatesBeforeActionCalls),
        FORWARD_PREFETCH => Arc::new(ForwardPrefetch),
        _ => return None,
    };
    Some(step)
}

impl Pipeline {
    /// The standard steps in [`DEFAULT_ORDER`].
    pub fn standard(key: SigningKey, cache: Arc<ComponentCache>) -> Self {
        DEFAULT_ORDER
            .iter()
            .filter_map(|name| build_step(name, &key, &cache))
            .fold(Pipeline::new(), Pipeline::register_arc)
    }

    /// Build a pipeline from step names in the order given.
    ///
    /// # Errors
    ///
    /// Returns an error if a name is unknown or repeated, if `verify_checksum`
    /// or `checksum` is missing, if `verify_checksum` comes after
    /// `public_properties`, or if `checksum` comes before it.
    pub fn from_step_names<S: AsRef<str>>(
        names: &[S],
        key: SigningKey,
        cache: Arc<ComponentCache>,
    ) -> Result<Self, ConfigError> {
        let mut seen = HashSet::new();
        let mut pipeline = Pipeline::new();
        for name in names.iter().map(|n| n.as_ref()) {
            if !seen.insert(name) {
                return Err(ConfigError::DuplicateStep(name.to_string()));
            }
            let step = build_step(name, &key, &cache).ok_or_else(|| ConfigError::UnknownStep(name.to_string()))?;
            pipeline = pipeline.register_arc(step);
        }

        let order = pipeline.step_names();
        let position = |name| order.iter().position(|n| *n == name);
        let props = position(PUBLIC_PROPERTIES);
        match (position(VERIFY_CHECKSUM), position(CHECKSUM)) {
            (None, _) => Err(ConfigError::Validation(
                "the verify_checksum step is required".to_string(),
            )),
            (_, None) => Err(ConfigError::Validation(
                "the checksum step is required".to_string(),
            )),
            (Some(verify), _) if props.is_some_and(|props| verify > props) => Err(ConfigError::Validation(
                "the verify_checksum step must be registered before public_properties".to_string(),
            )),
            (_, Some(sign)) if props.is_some_and(|props| sign < props) => Err(ConfigError::Validation(
                "the checksum step must be registered after public_properties".to_string(),
            )),
            _ => Ok(pipeline),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{key, Counter};
    use crate::wire::Action;
    use crate::{Component, ComponentId, PropertyMap, SessionId};
    use serde_json::json;

    fn fresh() -> ComponentInstance {
        ComponentInstance::new(ComponentId::from("abc"), Counter::new().schema())
    }

    fn request_with(data: PropertyMap) -> RequestContext {
        let mut ctx = RequestContext::from(crate::wire::RequestPayload {
            id: ComponentId::from("abc"),
            name: "counter".to_string(),
            checksum: checksum::compute_for_class(&ComponentId::from("abc"), "counter", &data, &key()).unwrap(),
            data,
            action_queue: Vec::new(),
            children: Vec::new(),
            gc: Vec::new(),
            live: None,
            session: None,
            error_bag: Default::default(),
            from_prefetch: false,
        });
        ctx.children = vec![ComponentId::from("child")];
        ctx
    }

    #[test]
    fn test_standard_order() {
        let pipeline = Pipeline::standard(key(), Arc::new(ComponentCache::default()));
        assert_eq!(pipeline.step_names(), DEFAULT_ORDER.to_vec());
    }

    #[test]
    fn test_from_step_names_validation() {
        let cache = Arc::new(ComponentCache::default());
        assert!(matches!(
            Pipeline::from_step_names(&["checksum", "nope"], key(), cache.clone()),
            Err(ConfigError::UnknownStep(name)) if name == "nope"
        ));
        assert!(matches!(
            Pipeline::from_step_names(&["checksum", "checksum"], key(), cache.clone()),
            Err(ConfigError::DuplicateStep(_))
        ));
        assert!(matches!(
            Pipeline::from_step_names(&["public_properties"], key(), cache.clone()),
            Err(ConfigError::Validation(_))
        ));
        assert!(matches!(
            Pipeline::from_step_names(&["public_properties", "checksum"], key(), cache.clone()),
            Err(ConfigError::Validation(_))
        ));
        assert!(matches!(
            Pipeline::from_step_names(&["verify_checksum", "checksum", "public_properties"], key(), cache.clone()),
            Err(ConfigError::Validation(_))
        ));
        assert!(matches!(
            Pipeline::from_step_names(&["public_properties", "verify_checksum", "checksum"], key(), cache.clone()),
            Err(ConfigError::Validation(_))
        ));
        let pipeline =
            Pipeline::from_step_names(&["verify_checksum", "public_properties", "checksum"], key(), cache).unwrap();
        assert_eq!(pipeline.len(), 3);
    }

    #[test]
    fn test_checksum_rejects_tampered_data() {
        let step = SecureHydrationWithChecksum::new(key());
        let mut ctx = request_with(PropertyMap::from([("count".to_string(), json!(0))]));
        ctx.data.insert("count".to_string(), json!(1));

        let err = step.hydrate(&mut fresh(), &mut ctx).unwrap_err();
        assert!(matches!(err, ProtocolError::Integrity(_)));
    }

    #[test]
    fn test_checksum_binds_class_name() {
        let step = SecureHydrationWithChecksum::new(key());
        let mut ctx = request_with(PropertyMap::from([("count".to_string(), json!(0))]));
        ctx.name = "wallet".to_string();

        assert!(matches!(step.hydrate(&mut fresh(), &mut ctx), Err(ProtocolError::Integrity(_))));
    }

    #[test]
    fn test_signing_follows_final_data() {
        let step = SignDehydratedPayload::new(key());
        let mut resp = ResponseContext::new(request_with(PropertyMap::new()));
        resp.payload.data = PropertyMap::from([("count".to_string(), json!(3))]);
        step.dehydrate(&mut fresh(), &mut resp).unwrap();

        assert!(checksum::verify_for_class(&resp.payload.checksum, &resp.payload.id, "counter", &resp.payload.data, &key())
            .unwrap());
        assert_eq!(step.passes(), Passes::DEHYDRATE | Passes::INITIAL);
    }

    #[test]
    fn test_checksum_covers_unknown_fields() {
        let step = SecureHydrationWithChecksum::new(key());
        let mut ctx = request_with(PropertyMap::from([("count".to_string(), json!(0))]));
        ctx.data.insert("injected".to_string(), json!(true));

        assert!(step.hydrate(&mut fresh(), &mut ctx).is_err());
    }

    #[test]
    fn test_protected_round_trip_through_cache() {
        let cache = Arc::new(ComponentCache::default());
        let step = HydrateProtectedProperties::new(cache.clone());

        let mut instance = fresh();
        instance.set("secretSeed", 7).unwrap();
        let mut resp = ResponseContext::new(request_with(PropertyMap::new()));
        step.dehydrate(&mut instance, &mut resp).unwrap();
        assert!(!resp.payload.data.contains_key("secretSeed"));
        assert!(cache.is_empty());
        resp.commit();

        let mut rehydrated = fresh();
        step.hydrate(&mut rehydrated, &mut request_with(PropertyMap::new())).unwrap();
        assert_eq!(rehydrated.get("secretSeed"), Some(&json!(7)));
    }

    #[test]
    fn test_protected_cache_miss_uses_defaults() {
        let step = HydrateProtectedProperties::new(Arc::new(ComponentCache::default()));
        let mut instance = fresh();
        step.hydrate(&mut instance, &mut request_with(PropertyMap::new())).unwrap();
        assert_eq!(instance.get("secretSeed"), Some(&json!(42)));
    }

    #[test]
    fn test_dirty_detection() {
        let step = HashPropertiesForDirtyDetection;
        let mut instance = fresh();
        let mut ctx = request_with(PropertyMap::new());
        step.hydrate(&mut instance, &mut ctx).unwrap();

        let mut resp = ResponseContext::new(ctx);
        resp.payload.data = PropertyMap::from([("count".to_string(), json!(3))]);
        step.dehydrate(&mut instance, &mut resp).unwrap();
        assert_eq!(resp.payload.effects.dirty, vec!["count".to_string()]);

        resp.payload.data = PropertyMap::from([("count".to_string(), json!(0))]);
        step.dehydrate(&mut instance, &mut resp).unwrap();
        assert!(resp.payload.effects.dirty.is_empty());
    }

    #[test]
    fn test_prioritize_data_updates_is_stable() {
        let mut ctx = request_with(PropertyMap::new());
        ctx.action_queue = vec![
            Action::call("increment", vec![]),
            Action::sync("count", json!(5)),
            Action::call("decrement", vec![]),
            Action::sync("count", json!(6)),
        ];
        PrioritizeDataUpdatesBeforeActionCalls.hydrate(&mut fresh(), &mut ctx).unwrap();

        assert_eq!(
            ctx.action_queue,
            vec![
                Action::sync("count", json!(5)),
                Action::sync("count", json!(6)),
                Action::call("increment", vec![]),
                Action::call("decrement", vec![]),
            ]
        );
    }

    #[test]
    fn test_flash_cleared_unless_redirecting() {
        let mut instance = fresh();
        instance.flash("status", "saved");
        let mut resp = ResponseContext::new(request_with(PropertyMap::new()));
        ClearFlashMessagesIfNotRedirectingAway.dehydrate(&mut instance, &mut resp).unwrap();
        InterceptRedirects.dehydrate(&mut instance, &mut resp).unwrap();
        assert!(resp.payload.effects.flash.is_empty());

        let mut instance = fresh();
        instance.flash("status", "saved");
        instance.redirect("/home");
        ClearFlashMessagesIfNotRedirectingAway.dehydrate(&mut instance, &mut resp).unwrap();
        InterceptRedirects.dehydrate(&mut instance, &mut resp).unwrap();
        assert_eq!(resp.payload.effects.flash.len(), 1);
        assert_eq!(resp.payload.effects.redirect_to.as_deref(), Some("/home"));
    }

    #[test]
    fn test_children_round_trip() {
        let mut instance = fresh();
        let mut ctx = request_with(PropertyMap::new());
        HydratePreviouslyRenderedChildren.hydrate(&mut instance, &mut ctx).unwrap();
        let mut resp = ResponseContext::new(ctx);
        HydratePreviouslyRenderedChildren.dehydrate(&mut instance, &mut resp).unwrap();
        assert_eq!(resp.payload.children, vec![ComponentId::from("child")]);
    }

    #[test]
    fn test_gc_keeps_current_component() {
        let cache = Arc::new(ComponentCache::default());
        let session = SessionId::from("page");
        let other = ComponentId::from("other");
        cache
            .put(instance_fingerprint(&other), &other, &PropertyMap::new())
            .unwrap();
        cache
            .put(fresh().fingerprint(), &ComponentId::from("abc"), &PropertyMap::new())
            .unwrap();
        cache.collect_session(&session, &[ComponentId::from("abc"), other].into_iter().collect());

        let step = GarbageCollectUnusedComponents::new(cache.clone());
        let mut ctx = request_with(PropertyMap::new());
        ctx.live = Some(HashSet::new());
        ctx.session = Some(session);
        ctx.torn_down = vec![ComponentId::from("abc")];
        step.hydrate(&mut fresh(), &mut ctx).unwrap();
        let mut resp = ResponseContext::new(ctx);
        step.dehydrate(&mut fresh(), &mut resp).unwrap();
        assert_eq!(cache.len(), 2);
        resp.commit();

        assert_eq!(resp.payload.gc, 1);
        assert!(cache.contains(&fresh().fingerprint()));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_gc_without_session_only_forgets() {
        let cache = Arc::new(ComponentCache::default());
        let (kept, torn) = (ComponentId::from("kept"), ComponentId::from("torn"));
        cache.put(instance_fingerprint(&kept), &kept, &PropertyMap::new()).unwrap();
        cache.put(instance_fingerprint(&torn), &torn, &PropertyMap::new()).unwrap();

        let step = GarbageCollectUnusedComponents::new(cache.clone());
        let mut ctx = request_with(PropertyMap::new());
        ctx.live = Some(HashSet::new());
        ctx.torn_down = vec![torn];
        step.hydrate(&mut fresh(), &mut ctx).unwrap();
        let mut resp = ResponseContext::new(ctx);
        step.dehydrate(&mut fresh(), &mut resp).unwrap();
        resp.commit();

        assert_eq!(resp.payload.gc, 1);
        assert!(cache.contains(&instance_fingerprint(&kept)));
    }

    #[test]
    fn test_forward_prefetch_echoes_flag() {
        let mut ctx = request_with(PropertyMap::new());
        ctx.from_prefetch = true;
        ForwardPrefetch.hydrate(&mut fresh(), &mut ctx).unwrap();
        let mut resp = ResponseContext::new(ctx);
        ForwardPrefetch.dehydrate(&mut fresh(), &mut resp).unwrap();
        assert!(resp.payload.from_prefetch);

        let mut resp = ResponseContext::new(request_with(PropertyMap::new()));
        ForwardPrefetch.dehydrate(&mut fresh(), &mut resp).unwrap();
        assert!(!resp.payload.from_prefetch);
    }

    fn instance_fingerprint(id: &ComponentId) -> crate::Fingerprint {
        crate::Fingerprint::derive(id, "counter")
    }
}

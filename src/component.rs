use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::error::ActionError;
use crate::schema::{ComponentSchema, Visibility};
use crate::{ComponentId, Fingerprint, PropertyMap};

/// Validation messages keyed by field name.
pub type ErrorBag = BTreeMap<String, Vec<String>>;

/// Application side of a component.
///
/// Every hook except [`Component::call`] defaults to a no-op.
pub trait Component: Send + Sync {
    fn schema(&self) -> Arc<ComponentSchema>;

    /// First render only, before the initial dehydrate.
    fn mount(&self, _instance: &mut ComponentInstance, _params: &[Value]) -> anyhow::Result<()> {
        Ok(())
    }

    /// After the hydrate pass, before any action runs.
    fn hydrate(&self, _instance: &mut ComponentInstance) -> anyhow::Result<()> {
        Ok(())
    }

    /// After the last action, before the dehydrate pass.
    fn dehydrate(&self, _instance: &mut ComponentInstance) -> anyhow::Result<()> {
        Ok(())
    }

    /// After a public property was updated from the client.
    fn updated(&self, _instance: &mut ComponentInstance, _property: &str) -> anyhow::Result<()> {
        Ok(())
    }

    /// Invoke an application method by name.
    fn call(
        &self,
        instance: &mut ComponentInstance,
        method: &str,
        params: &[Value],
    ) -> Result<(), ActionError>;
}

/// Event emitted by a component during one request
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EmittedEvent {
    pub event: String,
    #[serde(default)]
    pub params: Vec<Value>,
}

/// Session flash message forwarded across a redirect
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlashMessage {
    pub key: String,
    pub message: String,
}

/// Live state of one component for the duration of a request.
#[derive(Clone, Debug)]
pub struct ComponentInstance {
    id: ComponentId,
    schema: Arc<ComponentSchema>,
    pub(crate) public: PropertyMap,
    pub(crate) protected: PropertyMap,
    transient: PropertyMap,
    pub(crate) children: Vec<ComponentId>,
    pub(crate) emitted: Vec<EmittedEvent>,
    pub(crate) error_bag: ErrorBag,
    pub(crate) redirect: Option<String>,
    pub(crate) flash: Vec<FlashMessage>,
}

/// Copy of the mutable parts of an instance, used to roll back a failed action.
#[derive(Clone, Debug)]
pub(crate) struct InstanceSnapshot {
    public: PropertyMap,
    protected: PropertyMap,
    transient: PropertyMap,
    children: Vec<ComponentId>,
    emitted: Vec<EmittedEvent>,
    error_bag: ErrorBag,
    redirect: Option<String>,
    flash: Vec<FlashMessage>,
}

impl ComponentInstance {
    /// Raw instance holding the class defaults for every property.
    pub fn new(id: ComponentId, schema: Arc<ComponentSchema>) -> Self {
        Self {
            id,
            public: schema.defaults(Visibility::Public),
            protected: schema.defaults(Visibility::Protected),
            transient: schema.defaults(Visibility::Transient),
            schema,
            children: Vec::new(),
            emitted: Vec::new(),
            error_bag: ErrorBag::new(),
            redirect: None,
            flash: Vec::new(),
        }
    }

    pub fn id(&self) -> &ComponentId {
        &self.id
    }

    pub fn name(&self) -> &str {
        self.schema.name()
    }

    pub fn schema(&self) -> &ComponentSchema {
        &self.schema
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::derive(&self.id, self.schema.name())
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        match self.schema.get(name)?.visibility {
            Visibility::Public => self.public.get(name),
            Visibility::Protected => self.protected.get(name),
            Visibility::Transient => self.transient.get(name),
        }
    }

    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(Value::as_i64)
    }

    /// Write a declared property regardless of its visibility.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<(), ActionError> {
        let visibility = self
            .schema
            .get(name)
            .map(|p| p.visibility)
            .ok_or_else(|| ActionError::UnknownProperty(name.to_string()))?;
        let map = match visibility {
            Visibility::Public => &mut self.public,
            Visibility::Protected => &mut self.protected,
            Visibility::Transient => &mut self.transient,
        };
        map.insert(name.to_string(), value.into());
        Ok(())
    }

    /// Current public properties.
    pub fn public(&self) -> &PropertyMap {
        &self.public
    }

    /// Current protected properties.
    pub fn protected(&self) -> &PropertyMap {
        &self.protected
    }

    pub fn children(&self) -> &[ComponentId] {
        &self.children
    }

    /// Replace the children rendered inside this component.
    pub fn set_children(&mut self, children: Vec<ComponentId>) {
        self.children = children;
    }

    pub fn emit(&mut self, event: impl Into<String>, params: Vec<Value>) {
        self.emitted.push(EmittedEvent {
            event: event.into(),
            params,
        });
    }

    pub fn emitted(&self) -> &[EmittedEvent] {
        &self.emitted
    }

    pub fn redirect(&mut self, url: impl Into<String>) {
        self.redirect = Some(url.into());
    }

    pub fn flash(&mut self, key: impl Into<String>, message: impl Into<String>) {
        self.flash.push(FlashMessage {
            key: key.into(),
            message: message.into(),
        });
    }

    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.error_bag
            .entry(field.into())
            .or_default()
            .push(message.into());
    }

    pub fn clear_errors(&mut self) {
        self.error_bag.clear();
    }

    pub fn errors(&self) -> &ErrorBag {
        &self.error_bag
    }

    pub(crate) fn snapshot(&self) -> InstanceSnapshot {
        InstanceSnapshot {
            public: self.public.clone(),
            protected: self.protected.clone(),
            transient: self.transient.clone(),
            children: self.children.clone(),
            emitted: self.emitted.clone(),
            error_bag: self.error_bag.clone(),
            redirect: self.redirect.clone(),
            flash: self.flash.clone(),
        }
    }

    pub(crate) fn restore(&mut self, snapshot: InstanceSnapshot) {
        self.public = snapshot.public;
        self.protected = snapshot.protected;
        self.transient = snapshot.transient;
        self.children = snapshot.children;
        self.emitted = snapshot.emitted;
        self.error_bag = snapshot.error_bag;
        self.redirect = snapshot.redirect;
        self.flash = snapshot.flash;
    }
}

/// Component classes by name, built once at startup.
#[derive(Default, Clone)]
pub struct ComponentRegistry {
    classes: HashMap<String, Arc<dyn Component>>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a class under its schema name, replacing any previous one.
    pub fn register(mut self, class: impl Component + 'static) -> Self {
        let name = class.schema().name().to_string();
        self.classes.insert(name, Arc::new(class));
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Component>> {
        self.classes.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }
}

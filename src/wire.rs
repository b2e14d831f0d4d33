use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::component::{EmittedEvent, ErrorBag, FlashMessage};
use crate::error::{ProtocolError, Rejection};
use crate::{ComponentId, PropertyMap, SessionId};

/// One entry of the request's action queue
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum Action {
    /// Invoke a component method.
    CallMethod {
        method: String,
        #[serde(default)]
        params: Vec<Value>,
    },
    /// Update one public property from client input.
    SyncInput { name: String, value: Value },
    /// Deliver a client-side event to the component's listener.
    FireEvent {
        event: String,
        #[serde(default)]
        params: Vec<Value>,
    },
}

impl Action {
    pub fn call(method: &str, params: Vec<Value>) -> Self {
        Action::CallMethod {
            method: method.to_string(),
            params,
        }
    }

    pub fn sync(name: &str, value: Value) -> Self {
        Action::SyncInput {
            name: name.to_string(),
            value,
        }
    }

    pub fn fire(event: &str, params: Vec<Value>) -> Self {
        Action::FireEvent {
            event: event.to_string(),
            params,
        }
    }

    /// Short label used in logs and error effects.
    pub fn label(&self) -> &str {
        match self {
            Action::CallMethod { method, .. } => method,
            Action::SyncInput { name, .. } => name,
            Action::FireEvent { event, .. } => event,
        }
    }

    pub fn is_data_update(&self) -> bool {
        matches!(self, Action::SyncInput { .. })
    }
}

/// Request sent by the client: its previous payload plus what to do
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestPayload {
    pub id: ComponentId,
    pub name: String,
    #[serde(default)]
    pub data: PropertyMap,
    pub checksum: String,
    #[serde(default)]
    pub action_queue: Vec<Action>,
    #[serde(default)]
    pub children: Vec<ComponentId>,
    /// Ids the client tore down since its last request.
    #[serde(default)]
    pub gc: Vec<ComponentId>,
    /// Every id the client still has mounted, when reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub live: Option<Vec<ComponentId>>,
    /// Scope of the `live` report. Without one, `live` collects nothing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionId>,
    #[serde(default, skip_serializing_if = "ErrorBag::is_empty")]
    pub error_bag: ErrorBag,
    #[serde(default, skip_serializing_if = "is_false")]
    pub from_prefetch: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Application failure reported back with an otherwise complete payload
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionFailure {
    pub action: String,
    pub message: String,
}

/// Side effects the client applies after replacing its payload
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Effects {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub emits: Vec<EmittedEvent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_to: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flash: Vec<FlashMessage>,
    #[serde(default, skip_serializing_if = "ErrorBag::is_empty")]
    pub error_bag: ErrorBag,
    /// Public properties whose value changed during this request.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dirty: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ActionFailure>,
}

/// Complete dehydrated component, replayable as the next request's input
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponsePayload {
    pub id: ComponentId,
    pub name: String,
    pub data: PropertyMap,
    pub checksum: String,
    #[serde(default)]
    pub children: Vec<ComponentId>,
    /// Events the component listens for.
    #[serde(default)]
    pub events: Vec<String>,
    #[serde(default)]
    pub effects: Effects,
    /// Number of cache entries collected while handling the request.
    #[serde(default)]
    pub gc: usize,
    /// Set when answering a prefetch, so the client can hold the payload back.
    #[serde(default, skip_serializing_if = "is_false")]
    pub from_prefetch: bool,
}

impl ResponsePayload {
    pub(crate) fn empty(id: ComponentId, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            data: PropertyMap::new(),
            checksum: String::new(),
            children: Vec::new(),
            events: Vec::new(),
            effects: Effects::default(),
            gc: 0,
            from_prefetch: false,
        }
    }
}

/// Either a payload or a rejection, as written to the client
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireResponse {
    Payload(ResponsePayload),
    Rejected { error: Rejection },
}

impl WireResponse {
    pub fn payload(&self) -> Option<&ResponsePayload> {
        match self {
            WireResponse::Payload(payload) => Some(payload),
            WireResponse::Rejected { .. } => None,
        }
    }

    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            WireResponse::Payload(_) => None,
            WireResponse::Rejected { error } => Some(error),
        }
    }
}

impl From<Rejection> for WireResponse {
    fn from(error: Rejection) -> Self {
        WireResponse::Rejected { error }
    }
}

/// Decode a request from its JSON wire form
pub fn decode_request(data: &[u8]) -> Result<RequestPayload, ProtocolError> {
    Ok(serde_json::from_slice(data)?)
}

/// Encode a response to its JSON wire form
pub fn encode_response(response: &WireResponse) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec(response)
}

/// Decode a response, as a client does
pub fn decode_response(data: &[u8]) -> serde_json::Result<WireResponse> {
    serde_json::from_slice(data)
}

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use crate::error::Rejection;
use crate::wire::{Action, RequestPayload, ResponsePayload, WireResponse};
use crate::{ComponentId, SessionId};

/// Client half of the protocol: keeps the last payload of every mounted
/// component and replaces it verbatim with each response.
#[derive(Debug)]
pub struct ClientStore {
    session: SessionId,
    components: HashMap<ComponentId, ResponsePayload>,
    torn_down: Vec<ComponentId>,
    in_background: bool,
}

impl Default for ClientStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientStore {
    pub fn new() -> Self {
        Self::with_session(SessionId::generate())
    }

    /// Store whose liveness reports are attributed to `session`.
    pub fn with_session(session: SessionId) -> Self {
        Self {
            session,
            components: HashMap::new(),
            torn_down: Vec::new(),
            in_background: false,
        }
    }

    pub fn session(&self) -> &SessionId {
        &self.session
    }

    /// Start tracking a freshly mounted component.
    pub fn add_component(&mut self, payload: ResponsePayload) {
        tracing::debug!(id = %payload.id, component = %payload.name, "component added");
        self.components.insert(payload.id.clone(), payload);
    }

    pub fn has_component(&self, id: &ComponentId) -> bool {
        self.components.contains_key(id)
    }

    pub fn find(&self, id: &ComponentId) -> Option<&ResponsePayload> {
        self.components.get(id)
    }

    /// Every mounted component id, sorted.
    pub fn live_ids(&self) -> Vec<ComponentId> {
        let mut ids: Vec<_> = self.components.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Tear down `id` and, recursively, the children it rendered.
    ///
    /// Returns false if the component was not mounted.
    pub fn remove_component(&mut self, id: &ComponentId) -> bool {
        let Some(payload) = self.components.remove(id) else {
            return false;
        };
        tracing::debug!(%id, "component torn down");
        self.torn_down.push(id.clone());
        for child in &payload.children {
            self.remove_component(child);
        }
        true
    }

    /// Tear down everything, as on page unload.
    pub fn tear_down_components(&mut self) {
        for id in self.live_ids() {
            self.remove_component(&id);
        }
    }

    /// Teardowns not yet reported to the server.
    pub fn pending_teardowns(&self) -> &[ComponentId] {
        &self.torn_down
    }

    /// Request for `id` carrying its previous payload and `actions`.
    ///
    /// Reports the full liveness set and drains the pending teardown list.
    /// Returns `None` if `id` is not mounted.
    pub fn build_request(&mut self, id: &ComponentId, actions: Vec<Action>) -> Option<RequestPayload> {
        let live = self.live_ids();
        let previous = self.components.get(id)?;
        Some(RequestPayload {
            id: previous.id.clone(),
            name: previous.name.clone(),
            data: previous.data.clone(),
            checksum: previous.checksum.clone(),
            action_queue: actions,
            children: previous.children.clone(),
            gc: std::mem::take(&mut self.torn_down),
            live: Some(live),
            session: Some(self.session.clone()),
            error_bag: previous.effects.error_bag.clone(),
            from_prefetch: false,
        })
    }

    /// Like [`build_request`](Self::build_request), flagged as a prefetch.
    pub fn build_prefetch_request(&mut self, id: &ComponentId, actions: Vec<Action>) -> Option<RequestPayload> {
        let mut request = self.build_request(id, actions)?;
        request.from_prefetch = true;
        Some(request)
    }

    /// Replace the stored payload with the server's response.
    ///
    /// Children missing from the new payload are torn down. A rejection
    /// leaves the store untouched and is handed back to the caller.
    pub fn apply_response(&mut self, response: WireResponse) -> Result<&ResponsePayload, Rejection> {
        let payload = match response {
            WireResponse::Payload(payload) => payload,
            WireResponse::Rejected { error } => {
                tracing::warn!(kind = ?error.kind, status = error.status, "server rejected request");
                return Err(error);
            }
        };

        let dropped: Vec<ComponentId> = self
            .components
            .get(&payload.id)
            .map(|old| {
                old.children
                    .iter()
                    .filter(|child| !payload.children.contains(child))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        for child in &dropped {
            self.remove_component(child);
        }

        let stored = match self.components.entry(payload.id.clone()) {
            Entry::Occupied(mut slot) => {
                slot.insert(payload);
                slot.into_mut()
            }
            Entry::Vacant(slot) => slot.insert(payload),
        };
        Ok(stored)
    }

    pub fn in_background(&self) -> bool {
        self.in_background
    }

    /// Mirror of document visibility. Only reported in logs.
    pub fn set_in_background(&mut self, in_background: bool) {
        if self.in_background != in_background {
            tracing::debug!(in_background, "visibility changed");
        }
        self.in_background = in_background;
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RejectionKind;
    use crate::testing::handler;
    use crate::Fingerprint;
    use serde_json::json;

    #[test]
    fn test_round_trip_through_store() {
        let handler = handler();
        let mut store = ClientStore::new();
        let mounted = handler.mount("counter", &[]).unwrap();
        let id = mounted.id.clone();
        store.add_component(mounted);

        let request = store.build_request(&id, vec![Action::call("increment", vec![])]).unwrap();
        assert_eq!(request.live, Some(vec![id.clone()]));
        let payload = store.apply_response(handler.respond(request)).unwrap();
        assert_eq!(payload.data["count"], json!(1));

        let request = store.build_request(&id, vec![Action::call("increment", vec![])]).unwrap();
        store.apply_response(handler.respond(request)).unwrap();
        assert_eq!(store.find(&id).unwrap().data["count"], json!(2));
    }

    #[test]
    fn test_liveness_does_not_cross_sessions() {
        let handler = handler();
        let mut alice = ClientStore::with_session(SessionId::from("alice"));
        let mut bob = ClientStore::with_session(SessionId::from("bob"));

        let mounted = handler.mount("counter", &[]).unwrap();
        let alice_id = mounted.id.clone();
        alice.add_component(mounted);
        let mounted = handler.mount("counter", &[json!(5)]).unwrap();
        let bob_id = mounted.id.clone();
        bob.add_component(mounted);

        let request = bob.build_request(&bob_id, vec![Action::call("reseed", vec![])]).unwrap();
        assert_eq!(request.session.as_ref(), Some(bob.session()));
        bob.apply_response(handler.respond(request)).unwrap();

        let request = alice.build_request(&alice_id, vec![Action::call("increment", vec![])]).unwrap();
        assert_eq!(request.live, Some(vec![alice_id.clone()]));
        let payload = alice.apply_response(handler.respond(request)).unwrap();
        assert_eq!(payload.gc, 0);

        let fingerprint = Fingerprint::derive(&bob_id, "counter");
        assert_eq!(handler.cache().get(&fingerprint).unwrap()["secretSeed"], json!(5));
        assert_eq!(handler.cache().owner(&fingerprint), Some(SessionId::from("bob")));
        assert_eq!(handler.cache().len(), 2);
    }

    #[test]
    fn test_prefetch_request_flagged() {
        let handler = handler();
        let mut store = ClientStore::new();
        let mounted = handler.mount("counter", &[]).unwrap();
        let id = mounted.id.clone();
        store.add_component(mounted);

        let request = store.build_prefetch_request(&id, vec![]).unwrap();
        assert!(request.from_prefetch);
        assert!(store.apply_response(handler.respond(request)).unwrap().from_prefetch);
        assert!(!store.build_request(&id, vec![]).unwrap().from_prefetch);
    }

    #[test]
    fn test_unknown_id_builds_nothing() {
        let mut store = ClientStore::new();
        assert!(store.build_request(&ComponentId::from("nope"), vec![]).is_none());
    }

    #[test]
    fn test_teardown_reported_once() {
        let handler = handler();
        let mut store = ClientStore::new();
        let a = handler.mount("counter", &[]).unwrap();
        let b = handler.mount("counter", &[]).unwrap();
        let (a_id, b_id) = (a.id.clone(), b.id.clone());
        store.add_component(a);
        store.add_component(b);

        assert!(store.remove_component(&b_id));
        assert!(!store.remove_component(&b_id));
        assert!(!store.has_component(&b_id));

        let request = store.build_request(&a_id, vec![]).unwrap();
        assert_eq!(request.gc, vec![b_id]);
        assert!(store.pending_teardowns().is_empty());

        let response = store.apply_response(handler.respond(request)).unwrap();
        assert_eq!(response.gc, 1);
        assert_eq!(handler.cache().len(), 1);
    }

    #[test]
    fn test_dropped_children_torn_down() {
        let handler = handler();
        let mut store = ClientStore::new();
        let parent = handler.mount("counter", &[]).unwrap();
        let parent_id = parent.id.clone();
        store.add_component(parent);

        let request = store
            .build_request(&parent_id, vec![Action::call("spawnChildren", vec![])])
            .unwrap();
        store.apply_response(handler.respond(request)).unwrap();
        let children = store.find(&parent_id).unwrap().children.clone();
        for child in &children {
            let mut payload = store.find(&parent_id).unwrap().clone();
            payload.id = child.clone();
            payload.children.clear();
            store.add_component(payload);
        }
        assert_eq!(store.len(), 3);

        let mut replacement = store.find(&parent_id).unwrap().clone();
        replacement.children.truncate(1);
        store.apply_response(WireResponse::Payload(replacement)).unwrap();

        assert_eq!(store.len(), 2);
        assert!(store.has_component(&children[0]));
        assert_eq!(store.pending_teardowns(), &children[1..]);
    }

    #[test]
    fn test_rejection_leaves_store_untouched() {
        let handler = handler();
        let mut store = ClientStore::new();
        let mounted = handler.mount("counter", &[]).unwrap();
        let id = mounted.id.clone();
        store.add_component(mounted.clone());

        let mut request = store.build_request(&id, vec![]).unwrap();
        request.data.insert("count".to_string(), json!(99));
        let rejection = store.apply_response(handler.respond(request)).unwrap_err();

        assert_eq!(rejection.kind, RejectionKind::Integrity);
        assert_eq!(store.find(&id), Some(&mounted));
    }

    #[test]
    fn test_tear_down_everything() {
        let handler = handler();
        let mut store = ClientStore::new();
        store.add_component(handler.mount("counter", &[]).unwrap());
        store.add_component(handler.mount("counter", &[]).unwrap());
        store.set_in_background(true);

        store.tear_down_components();
        assert!(store.is_empty());
        assert_eq!(store.pending_teardowns().len(), 2);
        assert!(store.in_background());
    }
}

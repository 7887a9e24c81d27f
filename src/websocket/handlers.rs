//! Message routing for inbound frames.
//!
//! Frames are decoded into `{action, data}` and delivered to every handler
//! registered for that action, plus every catch-all handler. Heartbeat acks
//! are classified separately by [`MessageRouter::decode`] and never reach
//! user handlers.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use serde_json::Value;

use crate::websocket::error::{WebSocketError, WsResult};
use crate::websocket::types::{WsFrame, CATCH_ALL_ACTION};

/// Callback invoked with the `data` field of a matching frame.
pub type MessageHandlerFn = Arc<dyn Fn(&Value) + Send + Sync>;

/// Callback invoked for contained internal failures.
pub type ErrorHandlerFn = Arc<dyn Fn(&WebSocketError) + Send + Sync>;

/// Registration handle returned by `on`/`on_error`, used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

/// Classification of a decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Liveness acknowledgement for the heartbeat monitor
    HeartbeatAck,
    /// Frame for user handlers
    Message(WsFrame),
}

/// Handler registry and dispatcher.
pub struct MessageRouter {
    handlers: RwLock<HashMap<String, Vec<(HandlerId, MessageHandlerFn)>>>,
    error_handlers: RwLock<Vec<(HandlerId, ErrorHandlerFn)>>,
    next_id: AtomicU64,
}

impl MessageRouter {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            error_handlers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Decode wire text and separate heartbeat acks from user frames.
    pub fn decode(raw: &str) -> WsResult<Inbound> {
        let frame = WsFrame::parse(raw)?;
        if frame.is_heartbeat_ack() {
            Ok(Inbound::HeartbeatAck)
        } else {
            Ok(Inbound::Message(frame))
        }
    }

    /// Register a handler for `action`. Several handlers per action are
    /// allowed; all of them fire.
    pub fn on<F>(&self, action: &str, handler: F) -> HandlerId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let id = self.next_id();
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        handlers
            .entry(action.to_string())
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Unregister a handler. Returns whether it was registered.
    pub fn off(&self, action: &str, id: HandlerId) -> bool {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        let Some(list) = handlers.get_mut(action) else {
            return false;
        };
        let before = list.len();
        list.retain(|(hid, _)| *hid != id);
        let removed = list.len() != before;
        if list.is_empty() {
            handlers.remove(action);
        }
        removed
    }

    /// Register an error handler.
    pub fn on_error<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&WebSocketError) + Send + Sync + 'static,
    {
        let id = self.next_id();
        self.error_handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(handler)));
        id
    }

    /// Unregister an error handler. Returns whether it was registered.
    pub fn off_error(&self, id: HandlerId) -> bool {
        let mut handlers = self
            .error_handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = handlers.len();
        handlers.retain(|(hid, _)| *hid != id);
        handlers.len() != before
    }

    /// Number of handlers registered for `action`
    pub fn handler_count(&self, action: &str) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(action)
            .map_or(0, Vec::len)
    }

    /// Remove every handler.
    pub fn clear(&self) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.error_handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Deliver a frame. Action handlers receive `data`; catch-all handlers
    /// receive the whole `{action, data}` object. A panicking handler is
    /// logged and skipped. Returns the number of handlers that completed.
    pub fn dispatch(&self, frame: &WsFrame) -> usize {
        let (targeted, catch_all) = {
            let handlers = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
            let targeted: Vec<MessageHandlerFn> = handlers
                .get(&frame.action)
                .map(|list| list.iter().map(|(_, h)| Arc::clone(h)).collect())
                .unwrap_or_default();
            let catch_all: Vec<MessageHandlerFn> = if frame.action == CATCH_ALL_ACTION {
                Vec::new()
            } else {
                handlers
                    .get(CATCH_ALL_ACTION)
                    .map(|list| list.iter().map(|(_, h)| Arc::clone(h)).collect())
                    .unwrap_or_default()
            };
            (targeted, catch_all)
        };

        if targeted.is_empty() && catch_all.is_empty() {
            tracing::debug!("No handler registered for action: {}", frame.action);
            return 0;
        }

        let mut completed = 0;
        for handler in &targeted {
            if invoke(&frame.action, || handler(&frame.data)) {
                completed += 1;
            }
        }

        if !catch_all.is_empty() {
            let whole = serde_json::json!({
                "action": frame.action,
                "data": frame.data,
            });
            for handler in &catch_all {
                if invoke(&frame.action, || handler(&whole)) {
                    completed += 1;
                }
            }
        }

        completed
    }

    /// Notify error handlers. Panics inside them are contained.
    pub fn report_error(&self, error: &WebSocketError) {
        let handlers: Vec<ErrorHandlerFn> = self
            .error_handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, h)| Arc::clone(h))
            .collect();

        for handler in handlers {
            invoke("error", || handler(error));
        }
    }

    fn next_id(&self) -> HandlerId {
        HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for MessageRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MessageRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let actions: Vec<String> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        f.debug_struct("MessageRouter")
            .field("actions", &actions)
            .finish()
    }
}

fn invoke(action: &str, f: impl FnOnce()) -> bool {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(()) => true,
        Err(_) => {
            tracing::error!("Handler for '{}' panicked; continuing dispatch", action);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    fn recorder() -> (Arc<Mutex<Vec<Value>>>, impl Fn(&Value) + Send + Sync + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (seen, move |v: &Value| sink.lock().unwrap().push(v.clone()))
    }

    #[test]
    fn test_decode_classifies_heartbeat_ack() {
        let inbound = MessageRouter::decode(r#"{"action":"heartbeat_ack","data":null}"#).unwrap();
        assert_eq!(inbound, Inbound::HeartbeatAck);
    }

    #[test]
    fn test_decode_malformed_is_error() {
        let err = MessageRouter::decode("{oops").unwrap_err();
        assert!(matches!(err, WebSocketError::MessageParseError(_)));
    }

    #[test]
    fn test_handler_receives_data_only() {
        let router = MessageRouter::new();
        let (seen, handler) = recorder();
        let (other_seen, other) = recorder();
        let (third_seen, third) = recorder();
        router.on("price_update", handler);
        router.on("order_fill", other);
        router.on("news", third);

        let frame = WsFrame::new("price_update", json!({"symbol": "BTC", "price": 101.5}));
        assert_eq!(router.dispatch(&frame), 1);

        assert_eq!(*seen.lock().unwrap(), vec![json!({"symbol": "BTC", "price": 101.5})]);
        assert!(other_seen.lock().unwrap().is_empty());
        assert!(third_seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_fan_out_to_all_handlers() {
        let router = MessageRouter::new();
        let (a_seen, a) = recorder();
        let (b_seen, b) = recorder();
        router.on("tick", a);
        router.on("tick", b);
        assert_eq!(router.dispatch(&WsFrame::new("tick", json!(1))), 2);
        assert_eq!(a_seen.lock().unwrap().len(), 1);
        assert_eq!(b_seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_catch_all_receives_whole_frame() {
        let router = MessageRouter::new();
        let (seen, handler) = recorder();
        router.on(CATCH_ALL_ACTION, handler);
        router.dispatch(&WsFrame::new("tick", json!({"n": 2})));
        assert_eq!(
            *seen.lock().unwrap(),
            vec![json!({"action": "tick", "data": {"n": 2}})]
        );
    }

    #[test]
    fn test_panicking_handler_is_isolated() {
        let router = MessageRouter::new();
        let (seen, handler) = recorder();
        router.on("tick", |_| panic!("handler bug"));
        router.on("tick", handler);
        assert_eq!(router.dispatch(&WsFrame::new("tick", json!(1))), 1);
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_off_removes_only_that_handler() {
        let router = MessageRouter::new();
        let (a_seen, a) = recorder();
        let (b_seen, b) = recorder();
        let a_id = router.on("tick", a);
        router.on("tick", b);

        assert!(router.off("tick", a_id));
        assert!(!router.off("tick", a_id));
        router.dispatch(&WsFrame::new("tick", json!(1)));

        assert!(a_seen.lock().unwrap().is_empty());
        assert_eq!(b_seen.lock().unwrap().len(), 1);
        assert_eq!(router.handler_count("tick"), 1);
    }

    #[test]
    fn test_error_handlers() {
        let router = MessageRouter::new();
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = errors.clone();
        let id = router.on_error(move |e| sink.lock().unwrap().push(e.clone()));

        router.report_error(&WebSocketError::Timeout);
        assert!(router.off_error(id));
        router.report_error(&WebSocketError::Timeout);

        assert_eq!(*errors.lock().unwrap(), vec![WebSocketError::Timeout]);
    }

    #[test]
    fn test_clear_drops_everything() {
        let router = MessageRouter::new();
        router.on("tick", |_| {});
        router.on_error(|_| {});
        router.clear();
        assert_eq!(router.handler_count("tick"), 0);
        assert_eq!(router.dispatch(&WsFrame::new("tick", json!(1))), 0);
    }
}

//! Scripted in-memory channel for exercising code above the transport.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio_tungstenite::tungstenite;

use super::{
    EventHandler, HandlerTable, HubChannel, HubError, HubState, LifecycleEvent, LifecycleHandler,
    LifecycleListeners,
};

/// Records every invocation and answers from a per-method script.
pub struct FakeChannel {
    url: String,
    state: Mutex<HubState>,
    handlers: HandlerTable,
    lifecycle: LifecycleListeners,
    calls: Mutex<Vec<(String, Vec<Value>)>>,
    script: Mutex<VecDeque<(String, Result<Value, String>)>>,
    pub starts: AtomicU32,
    pub stops: AtomicU32,
    fail_start: AtomicBool,
}

impl FakeChannel {
    pub fn new(url: &str, state: HubState) -> Arc<Self> {
        Arc::new(Self {
            url: url.to_string(),
            state: Mutex::new(state),
            handlers: HandlerTable::new(),
            lifecycle: LifecycleListeners::default(),
            calls: Mutex::new(Vec::new()),
            script: Mutex::new(VecDeque::new()),
            starts: AtomicU32::new(0),
            stops: AtomicU32::new(0),
            fail_start: AtomicBool::new(false),
        })
    }

    pub fn connected() -> Arc<Self> {
        Self::new("https://chat.test/hubs/chat", HubState::Connected)
    }

    /// Queue the outcome of the next invocation of `method`. Unscripted
    /// invocations succeed with `null`.
    pub fn script(&self, method: &str, outcome: Result<Value, &str>) {
        self.script
            .lock()
            .unwrap()
            .push_back((method.to_string(), outcome.map_err(str::to_string)));
    }

    pub fn fail_start(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<(String, Vec<Value>)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn set_state(&self, state: HubState) {
        *self.state.lock().unwrap() = state;
    }

    /// Deliver a server event.
    pub fn fire(&self, event: &str, args: Vec<Value>) -> bool {
        self.handlers.dispatch(event, &args)
    }

    /// Apply the state change implied by `event` and notify listeners.
    pub fn emit(&self, event: LifecycleEvent) {
        let next = match &event {
            LifecycleEvent::Reconnecting { .. } => HubState::Reconnecting,
            LifecycleEvent::Reconnected { .. } => HubState::Connected,
            LifecycleEvent::Closed { .. } => HubState::Disconnected,
        };
        self.set_state(next);
        self.lifecycle.emit(&event);
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

#[async_trait]
impl HubChannel for FakeChannel {
    fn url(&self) -> &str {
        &self.url
    }

    fn state(&self) -> HubState {
        *self.state.lock().unwrap()
    }

    fn connection_id(&self) -> Option<String> {
        Some("fake-connection".into())
    }

    async fn start(&self) -> Result<(), HubError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.fail_start.load(Ordering::SeqCst) {
            self.set_state(HubState::Disconnected);
            return Err(HubError::WebSocket(tungstenite::Error::ConnectionClosed));
        }
        self.set_state(HubState::Connected);
        Ok(())
    }

    async fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.set_state(HubState::Disconnected);
    }

    async fn invoke(&self, target: &str, args: Vec<Value>) -> Result<Value, HubError> {
        if self.state() != HubState::Connected {
            return Err(HubError::NotConnected);
        }
        self.calls
            .lock()
            .unwrap()
            .push((target.to_string(), args));
        let mut script = self.script.lock().unwrap();
        let position = script.iter().position(|(method, _)| method == target);
        match position.and_then(|i| script.remove(i)) {
            Some((_, Ok(value))) => Ok(value),
            Some((_, Err(message))) => Err(HubError::Invocation(message)),
            None => Ok(Value::Null),
        }
    }

    fn on(&self, event: &str, handler: EventHandler) {
        self.handlers.register(event, handler);
    }

    fn on_lifecycle(&self, handler: LifecycleHandler) {
        self.lifecycle.add(handler);
    }
}

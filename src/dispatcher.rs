use crate::connection::{ConnectionHandle, ID};
use crate::frame::Frame;
use crate::message::Message;
use log::{debug, error};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::mpsc::Receiver;
use tokio::sync::{watch, Mutex};

/// Capacity of the dispatcher event channel. Kept small so connections
/// feeding broadcasts feel backpressure instead of queueing unboundedly.
pub(crate) const EVENT_CAPACITY: usize = 16;

pub(crate) type ConnectionSet = Arc<Mutex<HashMap<ID, ConnectionHandle>>>;

pub(crate) type ConnectHook = Box<dyn Fn(&ConnectionHandle) + Send + Sync>;
pub(crate) type MessageHook = Box<dyn Fn(&[u8]) + Send + Sync>;
pub(crate) type CloseHook = Box<dyn Fn(&ConnectionHandle) + Send + Sync>;

/// User hooks, all invoked from the dispatcher task. They observe the
/// lifecycle; they must not block for long, since every event waits on
/// them.
#[derive(Default)]
pub(crate) struct Hooks {
    pub on_connect: Option<ConnectHook>,
    pub on_message: Option<MessageHook>,
    pub on_close: Option<CloseHook>,
}

/// Membership and fan-out events. A single consumer takes them one at a
/// time, so the connection set seen by a broadcast is exactly the set as
/// of the last join or leave before it.
pub(crate) enum DispatchEvent {
    Join(ConnectionHandle),
    Leave(ID),
    Broadcast(Frame),
}

pub(crate) struct Dispatcher {
    connections: ConnectionSet,
    events_rx: Receiver<DispatchEvent>,
    shutdown_rx: watch::Receiver<bool>,
    hooks: Hooks,
}

impl Dispatcher {
    pub fn new(
        connections: ConnectionSet,
        events_rx: Receiver<DispatchEvent>,
        shutdown_rx: watch::Receiver<bool>,
        hooks: Hooks,
    ) -> Self {
        Self {
            connections,
            events_rx,
            shutdown_rx,
            hooks,
        }
    }

    pub async fn run(mut self) {
        loop {
            tokio::select! {
                _ = self.shutdown_rx.changed() => {
                    self.close_all().await;
                    break;
                }
                event = self.events_rx.recv() => match event {
                    Some(DispatchEvent::Join(handle)) => self.handle_join(handle).await,
                    Some(DispatchEvent::Leave(id)) => self.handle_leave(id).await,
                    Some(DispatchEvent::Broadcast(frame)) => self.handle_broadcast(frame).await,
                    None => break,
                },
            }
        }
        debug!("dispatcher stopped");
    }

    async fn handle_join(&mut self, handle: ConnectionHandle) {
        if let Some(hook) = &self.hooks.on_connect {
            guard_hook("on_connect", || hook(&handle));
        }
        self.connections.lock().await.insert(handle.id(), handle);
    }

    async fn handle_leave(&mut self, id: ID) {
        let mut connections = self.connections.lock().await;
        if let Some(handle) = connections.get(&id).cloned() {
            if let Some(hook) = &self.hooks.on_close {
                guard_hook("on_close", || hook(&handle));
            }
            connections.remove(&id);
        }
    }

    async fn handle_broadcast(&mut self, frame: Frame) {
        if let Some(hook) = &self.hooks.on_message {
            guard_hook("on_message", || hook(&frame.payload));
        }

        // Serialize once, hand every peer a copy of the bytes. The lock is
        // held across the fan-out so membership stays stable; a slow peer
        // with a full outbound queue blocks the dispatcher here, which is
        // the backpressure this server runs on.
        let bytes = frame.to_bytes();
        let connections = self.connections.lock().await;
        for handle in connections.values() {
            if let Err(err) = handle.enqueue(Message::Raw(bytes.clone())).await {
                debug!("broadcast to {} skipped: {}", handle.id(), err);
            }
        }
    }

    async fn close_all(&mut self) {
        let connections = self.connections.lock().await;
        for handle in connections.values() {
            handle.close();
        }
    }
}

/// Hook panics are contained and logged; a misbehaving hook never takes
/// the dispatcher or a connection down with it.
fn guard_hook<F: FnOnce()>(name: &str, hook: F) {
    if catch_unwind(AssertUnwindSafe(hook)).is_err() {
        error!("{} hook panicked", name);
    }
}

//! Worker loop
//!
//! Drains the event queue and drives resolve → evaluate → enforce for each
//! event. Runs on its own thread; nothing here ever touches the notification
//! context.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, info, warn};

use super::queue::{Drained, EventQueue, StopHandle};
use crate::audit::AuditSink;
use crate::constants::events;
use crate::data::{DeviceAction, DeviceEvent, DeviceIdentity, PolicyAction};
use crate::enforcement::Enforcer;
use crate::engine::PolicyEngine;
use crate::error::{DevgateError, Result};
use crate::hw::Platform;
use crate::identity;

const WORKER_THREAD_NAME: &str = "devgate-worker";

/// Everything one event needs, owned by the worker thread
pub struct Worker {
    queue: EventQueue,
    platform: Arc<dyn Platform>,
    engine: Arc<PolicyEngine>,
    enforcer: Enforcer,
    audit: Arc<dyn AuditSink>,
}

/// Handle to a running worker thread
pub struct WorkerHandle {
    stop: StopHandle,
    thread: JoinHandle<()>,
}

impl Worker {
    pub fn new(
        queue: EventQueue,
        platform: Arc<dyn Platform>,
        engine: Arc<PolicyEngine>,
        audit: Arc<dyn AuditSink>,
        persist_disable: bool,
    ) -> Self {
        let enforcer = Enforcer::new(Arc::clone(&platform), persist_disable);
        Self {
            queue,
            platform,
            engine,
            enforcer,
            audit,
        }
    }

    /// Start the worker thread
    ///
    /// Failing to spawn is fatal: no event could ever be processed.
    pub fn spawn(self) -> Result<WorkerHandle> {
        let stop = self.queue.stop_handle();
        let thread = thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || self.run())
            .map_err(|e| DevgateError::startup(format!("cannot spawn worker thread: {}", e)))?;
        Ok(WorkerHandle { stop, thread })
    }

    /// Process events until stopped
    pub fn run(self) {
        debug!("Worker started");
        'outer: loop {
            match self.queue.wait_and_drain() {
                Drained::Stopped => break,
                Drained::Events(batch) => {
                    for event in &batch {
                        if self.queue.is_stopped() {
                            break 'outer;
                        }
                        self.handle(event);
                    }
                }
            }
        }
        debug!("Worker stopped");
    }

    /// Process a single event
    pub fn handle(&self, event: &DeviceEvent) {
        match event.action {
            DeviceAction::Removal => self.handle_removal(event),
            DeviceAction::Arrival | DeviceAction::NodeChange => self.handle_present(event),
            DeviceAction::Unknown => {
                debug!(path = %event.device_path, "Ignoring unknown device event");
            }
        }
    }

    fn handle_removal(&self, event: &DeviceEvent) {
        match self.engine.on_removal(&event.device_path) {
            Some(container) => self.audit.info(
                events::DEVICE_DISCONNECTED,
                &format!("Device removed: {} (container {})", event.device_path, container),
            ),
            None => debug!(path = %event.device_path, "Removal of untracked path"),
        }
    }

    fn handle_present(&self, event: &DeviceEvent) {
        let identity = identity::resolve(self.platform.as_ref(), &event.device_path, event.interface_class);

        if event.action == DeviceAction::Arrival {
            self.audit.info(
                events::DEVICE_CONNECTED,
                &format!("Device connected: {} ({})", identity.describe(), identity.device_path),
            );
        }

        let action = self.engine.evaluate(&identity);
        self.apply(action, &identity);
    }

    fn apply(&self, action: PolicyAction, identity: &DeviceIdentity) {
        match action {
            PolicyAction::Block => {
                let disabled = self.enforcer.block(identity);
                let outcome = if disabled { "disabled" } else { "disable failed" };
                self.audit.warn(
                    events::DEVICE_BLOCKED,
                    &format!("Device blocked ({}): {}", outcome, identity.describe()),
                );
            }
            PolicyAction::Allow => {
                self.audit
                    .info(events::DEVICE_ALLOWED, &format!("Device allowed: {}", identity.describe()));
            }
            PolicyAction::Audit => {
                self.audit
                    .info(events::DEVICE_AUDITED, &format!("Device audited: {}", identity.describe()));
            }
        }
    }
}

impl WorkerHandle {
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Raise stop and wait for the thread to exit
    pub fn stop_and_join(self) {
        self.stop.stop();
        if self.thread.join().is_err() {
            warn!("Worker thread panicked");
        } else {
            info!("Worker joined");
        }
    }
}

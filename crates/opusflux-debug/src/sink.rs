//! Tracking participant registered with the engine for one run.
//!
//! Every event is inspected synchronously on the engine's thread, filtered,
//! resolved through the correlation lookup and forwarded to the subscribers in
//! registration order before `track` returns.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use smol_str::SmolStr;
use tracing::{debug, trace, warn};

use crate::correlate::Correlation;
use crate::engine::TrackingParticipant;
use crate::error::SubscriberError;
use crate::event::{CorrelatedEvent, TrackingEvent};
use crate::profile::TrackingProfile;

/// Consumer of correlated events. Called on the worker thread and allowed to
/// block it.
pub trait EventSubscriber: Send + Sync {
    fn on_event(&self, event: &CorrelatedEvent) -> Result<(), SubscriberError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Instance-level record with no node.
    NoActivity,
    /// Rejected by the tracking profile.
    Profile,
    FrameworkInternal,
    /// Identity absent from both the lookup and the design map.
    Unmapped,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Dropped(DropReason),
    /// `resolved` is false for a correlation miss forwarded with its design span.
    Forwarded { resolved: bool },
}

pub struct EventSink {
    correlation: Arc<Correlation>,
    profile: TrackingProfile,
    internal_prefixes: Vec<SmolStr>,
    subscribers: RwLock<Vec<Arc<dyn EventSubscriber>>>,
    sequence: AtomicU64,
    faults: AtomicU64,
    closed: AtomicBool,
}

impl EventSink {
    pub fn new(
        correlation: Arc<Correlation>,
        profile: TrackingProfile,
        internal_prefixes: Vec<SmolStr>,
    ) -> Self {
        Self {
            correlation,
            profile,
            internal_prefixes,
            subscribers: RwLock::new(Vec::new()),
            sequence: AtomicU64::new(0),
            faults: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn subscribe(&self, subscriber: Arc<dyn EventSubscriber>) {
        self.subscribers.write().push(subscriber);
    }

    #[must_use]
    pub fn correlation(&self) -> &Arc<Correlation> {
        &self.correlation
    }

    /// Subscriber failures caught so far.
    #[must_use]
    pub fn fault_count(&self) -> u64 {
        self.faults.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn forwarded_count(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }

    /// Events arriving after close are dropped.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn is_internal(&self, type_name: &str) -> bool {
        self.internal_prefixes
            .iter()
            .any(|prefix| type_name.starts_with(prefix.as_str()))
    }

    pub fn deliver(&self, mut event: TrackingEvent) -> Delivery {
        if self.is_closed() {
            return Delivery::Dropped(DropReason::Closed);
        }
        let Some(source) = &event.source else {
            trace!("instance record '{}' ignored", event.state);
            return Delivery::Dropped(DropReason::NoActivity);
        };
        if self.is_internal(&source.type_name) {
            trace!("framework node {} ({}) ignored", source.id, source.type_name);
            return Delivery::Dropped(DropReason::FrameworkInternal);
        }
        if !self.profile.admits(&event) {
            return Delivery::Dropped(DropReason::Profile);
        }

        let (resolved, span) = match self.correlation.lookup(&source.id) {
            Some(node) => (Some(Arc::clone(node)), node.span.clone()),
            None => match self.correlation.design_map().get(&source.id) {
                Some(span) => {
                    warn!(
                        "no runtime counterpart for {} ({}); forwarding design span",
                        source.id, source.display_name
                    );
                    (None, Some(span.clone()))
                }
                None => {
                    trace!("unmapped node {} ignored", source.id);
                    return Delivery::Dropped(DropReason::Unmapped);
                }
            },
        };

        event.variables = self.profile.project_variables(event.variables.take());
        let correlated = CorrelatedEvent {
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst) + 1,
            event,
            resolved,
            span,
        };
        debug!(
            "event #{} {} {} at {}",
            correlated.sequence,
            correlated.display_name(),
            correlated.event.state,
            correlated
                .span
                .as_ref()
                .map_or_else(|| "-".to_string(), ToString::to_string)
        );

        let subscribers = self.subscribers.read().clone();
        for (index, subscriber) in subscribers.iter().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| subscriber.on_event(&correlated))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    self.faults.fetch_add(1, Ordering::Relaxed);
                    warn!("subscriber {index} failed on event #{}: {err}", correlated.sequence);
                }
                Err(_) => {
                    self.faults.fetch_add(1, Ordering::Relaxed);
                    warn!("subscriber {index} panicked on event #{}", correlated.sequence);
                }
            }
        }

        Delivery::Forwarded {
            resolved: correlated.resolved.is_some(),
        }
    }
}

impl TrackingParticipant for EventSink {
    fn track(&self, event: TrackingEvent) {
        let _ = self.deliver(event);
    }
}

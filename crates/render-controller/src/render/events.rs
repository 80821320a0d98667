//! Event and error sinks injected into the controller

use crate::crds::FragmentGroup;
use crate::render::types::Error;
use async_trait::async_trait;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Client, Resource, ResourceExt};
use tracing::{error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSeverity {
    Normal,
    Warning,
}

/// Records user-visible notifications on a group
#[async_trait]
pub trait EventRecorder: Send + Sync {
    async fn record(&self, group: &FragmentGroup, severity: EventSeverity, reason: &str, message: &str);
}

/// Receives errors for keys that exhausted their retries
pub trait ErrorReporter: Send + Sync {
    fn report(&self, key: &str, error: &Error);
}

/// Reports through the log
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingErrorReporter;

impl ErrorReporter for TracingErrorReporter {
    fn report(&self, key: &str, error: &Error) {
        error!(group = %key, error = %error, "FragmentGroup exceeded retry limit");
    }
}

/// Publishes Kubernetes events through `kube::runtime::events::Recorder`
#[derive(Clone)]
pub struct KubeEventRecorder {
    recorder: Recorder,
}

impl KubeEventRecorder {
    #[must_use]
    pub fn new(client: Client, controller: &str) -> Self {
        let reporter = Reporter {
            controller: controller.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventRecorder for KubeEventRecorder {
    async fn record(&self, group: &FragmentGroup, severity: EventSeverity, reason: &str, message: &str) {
        let event = Event {
            type_: match severity {
                EventSeverity::Normal => EventType::Normal,
                EventSeverity::Warning => EventType::Warning,
            },
            reason: reason.to_string(),
            note: Some(message.to_string()),
            action: "Render".to_string(),
            secondary: None,
        };

        if let Err(e) = self.recorder.publish(&event, &group.object_ref(&())).await {
            warn!(
                group = %group.name_any(),
                reason = %reason,
                error = %e,
                "Failed to publish event"
            );
        }
    }
}

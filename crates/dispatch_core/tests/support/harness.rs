#![allow(dead_code)]

use std::sync::Arc;

use dispatch_core::clock::ManualClock;
use dispatch_core::config::DispatchConfig;
use dispatch_core::model::{Ambulance, AmbulanceId, RequestId};
use dispatch_core::notify::{ChannelNotifier, DispatchEvent};
use dispatch_core::test_helpers::{test_clock, test_config, test_runtime};
use dispatch_core::DispatchCoordinator;
use tokio::runtime::Handle;
use tokio::sync::mpsc::UnboundedReceiver;

/// A coordinator wired to a manual clock and a channel notifier.
pub struct TestDispatch {
    pub coordinator: Arc<DispatchCoordinator>,
    pub clock: Arc<ManualClock>,
    pub events: UnboundedReceiver<DispatchEvent>,
}

impl TestDispatch {
    /// Every event published so far, in order.
    pub fn drain_events(&mut self) -> Vec<DispatchEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }

    pub fn ambulance(&self, id: u64) -> Ambulance {
        self.coordinator
            .fleet()
            .get(AmbulanceId(id))
            .expect("ambulance registered")
    }

    /// The code delivered to the customer for `request_id`, if one was sent.
    pub fn last_code(events: &[DispatchEvent], request_id: RequestId) -> Option<String> {
        events.iter().rev().find_map(|e| match e {
            DispatchEvent::OtpIssued {
                request_id: id,
                code,
                ..
            } if *id == request_id => Some(code.clone()),
            _ => None,
        })
    }
}

/// Builder for reproducible dispatch harnesses.
#[derive(Debug, Default)]
pub struct TestDispatchBuilder {
    config: Option<DispatchConfig>,
    fleet: Vec<Ambulance>,
}

impl TestDispatchBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: DispatchConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_ambulance(mut self, ambulance: Ambulance) -> Self {
        self.fleet.push(ambulance);
        self
    }

    /// Timers run on the calling test's runtime when there is one (so paused time steps
    /// them), otherwise on the shared background runtime.
    pub fn build(self) -> TestDispatch {
        let clock = test_clock();
        let (notifier, events) = ChannelNotifier::new();
        let runtime = Handle::try_current().unwrap_or_else(|_| test_runtime());
        let coordinator = DispatchCoordinator::builder(self.config.unwrap_or_else(test_config))
            .runtime(runtime)
            .clock(clock.clone())
            .notifier(Arc::new(notifier))
            .build()
            .expect("valid test config");
        for ambulance in self.fleet {
            coordinator
                .fleet()
                .register(ambulance)
                .expect("register fixture");
        }
        TestDispatch {
            coordinator: Arc::new(coordinator),
            clock,
            events,
        }
    }
}

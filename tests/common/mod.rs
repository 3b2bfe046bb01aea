#![allow(dead_code)]

use std::sync::Arc;

use chrono::Duration;
use gatekeeper::admission::{InMemoryCounterStore, RateCounterStore};
use gatekeeper::clock::ManualClock;
use gatekeeper::notify::{ChannelNotifier, Notification, NotificationKind};
use gatekeeper::{AppState, InMemoryCredentialStore, Settings};
use tokio::sync::mpsc::UnboundedReceiver;

pub struct Harness {
    pub state: AppState,
    pub store: Arc<InMemoryCredentialStore>,
    pub clock: Arc<ManualClock>,
    pub notifications: UnboundedReceiver<Notification>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(Settings::new_for_test().expect("Failed to load test config"))
    }

    pub fn with_settings(settings: Settings) -> Self {
        let clock = Arc::new(ManualClock::default());
        let counters = Arc::new(InMemoryCounterStore::new(clock.clone()));
        Self::with_counters(settings, clock, counters)
    }

    pub fn with_counters(
        settings: Settings,
        clock: Arc<ManualClock>,
        counters: Arc<dyn RateCounterStore>,
    ) -> Self {
        let store = Arc::new(InMemoryCredentialStore::new());
        let (notifier, notifications) = ChannelNotifier::channel();

        let state = AppState::from_parts(
            settings,
            store.clone(),
            counters,
            Arc::new(notifier),
            clock.clone(),
        )
        .expect("Failed to build state");

        Self {
            state,
            store,
            clock,
            notifications,
        }
    }

    /// Code from the next OTP notification.
    pub async fn next_code(&mut self) -> String {
        let notification = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            self.notifications.recv(),
        )
        .await
        .expect("no notification within 5s")
        .expect("notification queue closed");

        assert_eq!(notification.kind, NotificationKind::Otp);
        notification.payload["otp"]
            .as_str()
            .expect("otp in payload")
            .to_string()
    }

    pub fn advance(&self, by: Duration) {
        self.clock.advance(by);
    }
}

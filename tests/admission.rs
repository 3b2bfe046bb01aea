use std::sync::Arc;

use chrono::Duration;
use gatekeeper::admission::{caller_key, InMemoryCounterStore};
use gatekeeper::clock::ManualClock;
use gatekeeper::{AdmissionController, RatePolicy, Window};

fn controller(clock: Arc<ManualClock>) -> AdmissionController {
    AdmissionController::new(
        Arc::new(InMemoryCounterStore::new(clock)),
        RatePolicy::default(),
    )
}

#[tokio::test]
async fn test_twenty_per_minute_then_reset() {
    let clock = Arc::new(ManualClock::default());
    let controller = controller(clock.clone());
    let key = caller_key(Some(7), None);

    for i in 0..20 {
        assert!(
            controller.allow_default(&key).await.unwrap(),
            "request {} should be admitted",
            i + 1
        );
    }
    assert!(!controller.allow_default(&key).await.unwrap());
    assert!(!controller.allow_default(&key).await.unwrap());

    clock.advance(Duration::seconds(61));
    assert!(controller.allow_default(&key).await.unwrap());
}

#[tokio::test]
async fn test_callers_are_counted_separately() {
    let clock = Arc::new(ManualClock::default());
    let controller = controller(clock);

    let user = caller_key(Some(7), Some("10.0.0.1"));
    let anonymous = caller_key(None, Some("10.0.0.1"));

    assert!(controller.allow(&user, 1, Window::Minute).await.unwrap());
    assert!(!controller.allow(&user, 1, Window::Minute).await.unwrap());
    assert!(controller.allow(&anonymous, 1, Window::Minute).await.unwrap());
}

#[tokio::test]
async fn test_window_starts_at_first_request() {
    let clock = Arc::new(ManualClock::default());
    let controller = controller(clock.clone());

    assert!(controller.allow("ip:10.0.0.2", 2, Window::Second).await.unwrap());
    clock.advance(Duration::milliseconds(500));
    assert!(controller.allow("ip:10.0.0.2", 2, Window::Second).await.unwrap());
    assert!(!controller.allow("ip:10.0.0.2", 2, Window::Second).await.unwrap());

    clock.advance(Duration::milliseconds(500));
    assert!(controller.allow("ip:10.0.0.2", 2, Window::Second).await.unwrap());
}

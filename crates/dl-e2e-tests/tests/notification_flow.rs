//! E2E tests for the notification path: transport payload → scanner →
//! aggregator → consumer view and event stream.

mod helpers;

use dl_protocol::{CategoryFilter, CodeCategory, SessionEvent};
use dl_session::mock::MOCK_NOTIFY_CHANNEL;
use dl_session::{CodeRegistry, MockTransport};

use helpers::TestHarness;

/// Free text with one unknown token yields the known codes in arrival order.
#[tokio::test]
async fn e2e_noise_with_embedded_codes() {
    let h = TestHarness::listening().await;

    assert!(h.notify("random P0300 noise B9999 P0171"));

    let results = h.session.results();
    let summary: Vec<_> = results.iter().map(|c| (c.code.as_str(), c.category)).collect();
    assert_eq!(
        summary,
        vec![("P0300", CodeCategory::Ignition), ("P0171", CodeCategory::Fuel)]
    );
}

/// A code repeated in a later notification is not duplicated.
#[tokio::test]
async fn e2e_sequential_notifications_deduplicate() {
    let h = TestHarness::listening().await;

    h.notify("P0300");
    h.notify("P0300 P0420");

    assert_eq!(h.codes(), vec!["P0300", "P0420"]);
}

/// The same token any number of times produces one entry and one event.
#[tokio::test]
async fn e2e_repeated_token_is_idempotent() {
    let mut h = TestHarness::listening().await;
    h.drain_events();

    for _ in 0..25 {
        h.notify("C1201");
    }
    h.notify("C1201 C1201 C1201");

    assert_eq!(h.codes(), vec!["C1201"]);
    let detected: Vec<_> = h
        .drain_events()
        .into_iter()
        .filter(|e| matches!(e, SessionEvent::CodeDetected { .. }))
        .collect();
    assert_eq!(detected.len(), 1);
}

/// Well-formed tokens missing from the registry never reach the result set.
#[tokio::test]
async fn e2e_unknown_tokens_ignored() {
    let mut h = TestHarness::listening().await;
    h.drain_events();

    h.notify("P9999 U1234 B0001 C0000");

    assert!(h.session.results().is_empty());
    assert!(h.drain_events().is_empty());
}

/// Binary garbage and partial tokens are absorbed without effect.
#[tokio::test]
async fn e2e_malformed_payloads_absorbed() {
    let h = TestHarness::listening().await;

    assert!(h.mock.notify(MOCK_NOTIFY_CHANNEL, &[0xFF, 0xFE, 0x00, 0x80, 0xC3, 0x28]));
    h.notify("P030");
    h.notify("XP0300Y");
    h.notify("p0300");
    assert!(h.session.results().is_empty());

    // A valid frame afterwards still works.
    assert!(h.mock.notify(MOCK_NOTIFY_CHANNEL, b"\xFF\xFE P0217 \x00"));
    assert_eq!(h.codes(), vec!["P0217"]);
}

/// Category filter keeps insertion order; `All` returns everything.
#[tokio::test]
async fn e2e_filter_by_category() {
    let h = TestHarness::listening().await;

    h.notify("P0125 P0300 C1300 P0217 P0301 C1201");

    let cooling: Vec<_> = h
        .session
        .filter_by_category(CodeCategory::Cooling)
        .into_iter()
        .map(|c| c.code)
        .collect();
    assert_eq!(cooling, vec!["P0125", "P0217"]);

    let brakes: Vec<_> = h
        .session
        .filter_by_category("brakes".parse::<CategoryFilter>().unwrap())
        .into_iter()
        .map(|c| c.code)
        .collect();
    assert_eq!(brakes, vec!["C1300", "C1201"]);

    assert!(h.session.filter_by_category(CodeCategory::Transmission).is_empty());
    assert_eq!(h.session.filter_by_category(CategoryFilter::All).len(), 6);
}

/// Clear empties the set from any size and announces it.
#[tokio::test]
async fn e2e_clear_resets_results() {
    let mut h = TestHarness::listening().await;
    h.notify("P0300 P0171 P0420 B1000 U0100");
    assert_eq!(h.session.results().len(), 5);
    h.drain_events();

    h.session.clear();

    assert!(h.session.results().is_empty());
    assert!(h.session.filter_by_category(CategoryFilter::All).is_empty());
    assert_eq!(h.session.status(), "Codes cleared");
    let events = h.drain_events();
    assert!(events
        .iter()
        .any(|e| matches!(e, SessionEvent::ResultsCleared { removed: 5, .. })));

    // Codes seen before the clear can be detected again.
    h.notify("P0300");
    assert_eq!(h.codes(), vec!["P0300"]);
}

/// Clear on an idle session with no results is harmless.
#[tokio::test]
async fn e2e_clear_when_idle() {
    let h = TestHarness::new();
    h.session.clear();
    assert!(h.session.results().is_empty());
}

/// A deployment registry replaces the built-in table end to end.
#[tokio::test]
async fn e2e_custom_registry() {
    let registry = CodeRegistry::from_toml_str(
        r#"
[codes.P0101]
description = "MAF circuit range/performance"
category = "sensors"
"#,
    )
    .unwrap();
    let h = TestHarness::with_registry(MockTransport::new(), registry);
    h.session.begin().await.unwrap();

    h.notify("P0300 P0101");

    let results = h.session.results();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].code, "P0101");
    assert_eq!(results[0].description, "MAF circuit range/performance");
    assert_eq!(results[0].category, CodeCategory::Sensors);
}

/// Detection events serialize with the wire tag consumers key on.
#[tokio::test]
async fn e2e_code_detected_event_json() {
    let mut h = TestHarness::listening().await;
    h.drain_events();

    h.notify("P0420");

    let event = h.drain_events().pop().unwrap();
    let json = serde_json::to_value(&event).unwrap();
    assert_eq!(json["type"], "code_detected");
    assert_eq!(json["code"]["code"], "P0420");
    assert_eq!(json["code"]["category"], "emission");
    assert_eq!(json["total"], 1);
}

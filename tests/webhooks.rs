mod utils;

use boostboard::boosts::Boost;
use boostboard::verifier::SvixVerifier;
use serde_json::json;
use utils::{d_tag, helipad_boost, invoice, spawn_app, spawn_app_with, Options, CUSTODIAL_TOKEN, HELIPAD_TOKEN, WEBHOOK_SECRET};

#[tokio::test]
async fn test_health_check_works() {
    let app = spawn_app().await;

    let response = app
        .client
        .get(app.url("/health"))
        .send()
        .await
        .expect("Failed to execute request.");

    assert!(response.status().is_success());
    assert_eq!(Some(0), response.content_length());
}

#[tokio::test]
async fn test_helipad_boost_is_stored_and_published() {
    let app = spawn_app().await;

    let response = app
        .client
        .post(app.url("/api/helipad"))
        .bearer_auth(HELIPAD_TOKEN)
        .json(&helipad_boost(7, 2))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 204);

    let stored = app.store.get("helipad-7").expect("boost was not stored");
    assert_eq!(stored.boost.amount, 21.0);
    assert_eq!(stored.boostagram.guid, "feed-guid");
    assert_eq!(stored.boostagram.episode_guid, "item-guid");

    let sent = app.relays.sent();
    assert_eq!(sent.len(), 3);

    let event = &sent[0].1;
    let content: Boost = serde_json::from_str(&event.content).unwrap();
    assert_eq!(content.identifier, "helipad-7");
    assert!(event.verify().is_ok());
}

#[tokio::test]
async fn test_duplicate_delivery_is_stored_once() {
    let app = spawn_app().await;

    for _ in 0..2 {
        let response = app
            .client
            .post(app.url("/api/helipad"))
            .bearer_auth(HELIPAD_TOKEN)
            .json(&helipad_boost(8, 2))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status().as_u16(), 204);
    }

    assert_eq!(app.store.len(), 1);

    // both deliveries publish the same replaceable event
    let sent = app.relays.sent();
    assert_eq!(sent.len(), 6);
    assert_eq!(d_tag(&sent[0].1), d_tag(&sent[5].1));
}

#[tokio::test]
async fn test_helipad_non_boosts_are_acknowledged_but_ignored() {
    let app = spawn_app().await;

    let stream = helipad_boost(9, 1);

    let mut sent_payment = helipad_boost(10, 2);
    sent_payment["payment_info"] = json!({"payment_hash": "abc", "pubkey": "02ff", "amount": 21000});

    for payload in [stream, sent_payment] {
        let response = app
            .client
            .post(app.url("/api/helipad"))
            .bearer_auth(HELIPAD_TOKEN)
            .json(&payload)
            .send()
            .await
            .unwrap();

        assert_eq!(response.status().as_u16(), 204);
    }

    assert!(app.store.is_empty());
    assert!(app.relays.sent().is_empty());
}

#[tokio::test]
async fn test_helipad_requires_bearer_token() {
    let app = spawn_app().await;

    let missing = app
        .client
        .post(app.url("/api/helipad"))
        .json(&helipad_boost(11, 2))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status().as_u16(), 401);

    let wrong = app
        .client
        .post(app.url("/api/helipad"))
        .bearer_auth("not-the-token")
        .json(&helipad_boost(11, 2))
        .send()
        .await
        .unwrap();
    assert_eq!(wrong.status().as_u16(), 403);

    assert!(app.store.is_empty());
}

#[tokio::test]
async fn test_malformed_payload_is_bad_request() {
    let app = spawn_app().await;

    let response = app
        .client
        .post(app.url("/api/helipad"))
        .bearer_auth(HELIPAD_TOKEN)
        .header("content-type", "application/json")
        .body("{\"index\": ")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 400);
    assert!(app.store.is_empty());
}

#[tokio::test]
async fn test_signed_push_webhook() {
    let app = spawn_app().await;
    let verifier = SvixVerifier::new(WEBHOOK_SECRET).unwrap();

    let body = serde_json::to_vec(&invoice("inv-signed", 1712433600)).unwrap();
    let timestamp = chrono::Utc::now().timestamp();
    let signature = verifier.sign("msg_1", timestamp, &body);

    let response = app
        .client
        .post(app.url("/api/webhook"))
        .header("svix-id", "msg_1")
        .header("svix-timestamp", timestamp.to_string())
        .header("svix-signature", format!("v1,{}", signature))
        .header("content-type", "application/json")
        .body(body)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 204);
    assert!(app.store.get("inv-signed").is_some());
}

#[tokio::test]
async fn test_signed_push_webhook_with_bad_signature() {
    let app = spawn_app().await;
    let verifier = SvixVerifier::new(WEBHOOK_SECRET).unwrap();

    let body = serde_json::to_vec(&invoice("inv-forged", 1712433600)).unwrap();
    let timestamp = chrono::Utc::now().timestamp();
    let signature = verifier.sign("msg_2", timestamp, b"some other body");

    let response = app
        .client
        .post(app.url("/api/webhook"))
        .header("svix-id", "msg_2")
        .header("svix-timestamp", timestamp.to_string())
        .header("svix-signature", format!("v1,{}", signature))
        .body(body)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 400);
    assert!(app.store.is_empty());
    assert!(app.relays.sent().is_empty());
}

#[tokio::test]
async fn test_signed_push_webhook_with_extreme_timestamp() {
    let app = spawn_app().await;
    let body = serde_json::to_vec(&invoice("inv-ancient", 1712433600)).unwrap();

    for timestamp in [i64::MIN, i64::MAX] {
        let response = app
            .client
            .post(app.url("/api/webhook"))
            .header("svix-id", "msg_3")
            .header("svix-timestamp", timestamp.to_string())
            .header("svix-signature", "v1,bm90IGl0")
            .body(body.clone())
            .send()
            .await
            .unwrap();

        assert_eq!(response.status().as_u16(), 400);
    }

    assert!(app.store.is_empty());
}

#[tokio::test]
async fn test_custodial_push_with_null_fields() {
    let app = spawn_app().await;

    let mut payload = invoice("inv-nulls", 1712433600);
    payload["amount"] = serde_json::Value::Null;
    payload["created_at"] = serde_json::Value::Null;

    let response = app
        .client
        .post(app.url("/api/boost"))
        .bearer_auth(CUSTODIAL_TOKEN)
        .json(&payload)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 204);

    let stored = app.store.get("inv-nulls").unwrap();
    assert_eq!(stored.boost.amount, 0.0);
    assert_eq!(stored.boost.created_at, "");
}

#[tokio::test]
async fn test_custodial_push() {
    let app = spawn_app().await;

    let response = app
        .client
        .post(app.url("/api/boost"))
        .bearer_auth(CUSTODIAL_TOKEN)
        .json(&invoice("inv-pushed", 1712433600))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 204);

    let stored = app.store.get("inv-pushed").unwrap();
    assert_eq!(stored.boost.payer_name.as_deref(), Some("bob"));
    assert_eq!(stored.boostagram.podcast, "Show");
}

#[tokio::test]
async fn test_store_failure_is_server_error() {
    let app = spawn_app_with(Options {
        broken_store: true,
        ..Default::default()
    })
    .await;

    let response = app
        .client
        .post(app.url("/api/helipad"))
        .bearer_auth(HELIPAD_TOKEN)
        .json(&helipad_boost(12, 2))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 500);
    assert!(app.relays.sent().is_empty());
}

#[tokio::test]
async fn test_partial_relay_failure_still_succeeds() {
    let app = spawn_app_with(Options {
        failing_relays: vec![utils::RELAYS[1]],
        ..Default::default()
    })
    .await;

    let response = app
        .client
        .post(app.url("/api/helipad"))
        .bearer_auth(HELIPAD_TOKEN)
        .json(&helipad_boost(13, 2))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 204);
    assert!(app.store.get("helipad-13").is_some());

    let relays: Vec<String> = app.relays.sent().into_iter().map(|(relay, _)| relay).collect();
    assert_eq!(relays.len(), 2);
    assert!(!relays.contains(&utils::RELAYS[1].to_string()));
}

#[tokio::test]
async fn test_all_relays_failing_still_succeeds() {
    let app = spawn_app_with(Options {
        failing_relays: utils::RELAYS.to_vec(),
        ..Default::default()
    })
    .await;

    let response = app
        .client
        .post(app.url("/api/helipad"))
        .bearer_auth(HELIPAD_TOKEN)
        .json(&helipad_boost(14, 2))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 204);
    assert!(app.store.get("helipad-14").is_some());
}

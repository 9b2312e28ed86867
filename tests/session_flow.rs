//! End-to-end session scenarios against the in-memory transport.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use ledgerlink::crypto::{encrypted_payload, SessionCrypto, SymmetricKey};
use ledgerlink::dispatch::{BusError, Dispatched, EventBus, EventEnvelope, EventKind};
use ledgerlink::testing::{generate_bootstrap_key, MemoryTransport};
use ledgerlink::{
    Client, ClientSettings, Environment, ErrorDetails, NetworkSignal, ProbeStrategy, RemoteError,
    ResponseError, Scope, TransportEvent,
};
use parking_lot::Mutex;
use rsa::{Oaep, RsaPrivateKey};
use serde_json::{json, Value};
use sha2::Sha256;
use std::sync::Arc;
use std::time::Duration;

fn settings(max_tries: u32, connection_timeout: u64) -> ClientSettings {
    ClientSettings {
        environment: Environment::Test,
        max_tries,
        connection_timeout,
        ..ClientSettings::default()
    }
}

fn auth() -> Value {
    json!({ "key": "pk_test", "secret": "sk_test" })
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}

/// Recover the session key the client sealed into its login payload
fn session_key(private_key: &RsaPrivateKey, login: &Value) -> SymmetricKey {
    let mut plaintext = Vec::new();
    for chunk in login["chunks"].as_array().unwrap() {
        let ciphertext = STANDARD.decode(chunk.as_str().unwrap()).unwrap();
        plaintext.extend(private_key.decrypt(Oaep::new::<Sha256>(), &ciphertext).unwrap());
    }
    let inner: Value = serde_json::from_slice(&plaintext).unwrap();
    let key: [u8; 16] = STANDARD
        .decode(inner["encrypt"]["key"].as_str().unwrap())
        .unwrap()
        .try_into()
        .unwrap();
    let iv: [u8; 16] = STANDARD
        .decode(inner["encrypt"]["iv"].as_str().unwrap())
        .unwrap()
        .try_into()
        .unwrap();
    SymmetricKey::from_parts(key, iv)
}

fn recording_bus() -> (Arc<dyn EventBus>, Arc<Mutex<Vec<EventEnvelope>>>) {
    let published = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&published);
    let bus: Arc<dyn EventBus> = Arc::new(move |envelope: EventEnvelope| -> Result<(), BusError> {
        sink.lock().push(envelope);
        Ok(())
    });
    (bus, published)
}

#[tokio::test(start_paused = true)]
async fn two_failed_logins_are_counted() {
    let transport = Arc::new(MemoryTransport::new());
    transport.accept_login(false);
    let client = Client::new(settings(5, 10), &auth(), transport.clone(), None).unwrap();

    client.connect().await.unwrap();
    wait_until(|| client.manager().info().connection_counter == 1).await;

    tokio::time::sleep(Duration::from_secs(10)).await;
    wait_until(|| client.manager().info().connection_counter == 2).await;

    assert!(!client.is_authorized());
    assert_eq!(transport.auth_payloads().len(), 2);
    assert_eq!(transport.open_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn failed_login_recovers_once_the_server_accepts() {
    let transport = Arc::new(MemoryTransport::new());
    transport.accept_login(false);
    let signal = NetworkSignal::new(true);
    let client = Client::new(settings(5, 10), &auth(), transport.clone(), None)
        .unwrap()
        .with_probe(ProbeStrategy::Signal(signal.clone()));

    client.connect().await.unwrap();
    wait_until(|| client.manager().info().connection_counter == 1).await;
    transport.accept_login(true);

    // Online pulses alone do not bypass the timeout window
    signal.set_online(true);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!client.is_authorized());

    tokio::time::sleep(Duration::from_secs(10)).await;
    wait_until(|| client.is_authorized()).await;
    assert_eq!(transport.auth_payloads().len(), 2);
    assert_eq!(client.manager().info().connection_counter, 0);
}

#[tokio::test(start_paused = true)]
async fn exhausted_budget_stops_reconnects_until_connect() {
    let transport = Arc::new(MemoryTransport::new());
    transport.accept_login(false);
    let signal = NetworkSignal::new(true);
    let client = Client::new(settings(1, 10), &auth(), transport.clone(), None)
        .unwrap()
        .with_probe(ProbeStrategy::Signal(signal.clone()));

    client.connect().await.unwrap();
    wait_until(|| client.manager().info().connection_counter == 1).await;
    tokio::time::sleep(Duration::from_secs(11)).await;

    // Over budget: closed with no retry scheduled
    wait_until(|| client.manager().info().connection_counter == 2).await;
    wait_until(|| !client.is_connected()).await;
    assert!(client.manager().info().manually_disconnected);
    assert_eq!(transport.auth_payloads().len(), 2);
    assert_eq!(transport.open_count(), 2);

    // Neither the network signal nor time brings it back
    signal.set_online(false);
    signal.set_online(true);
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(transport.open_count(), 2);
    assert!(!client.is_connected());

    transport.accept_login(true);
    client.connect().await.unwrap();
    wait_until(|| client.is_authorized()).await;
    assert_eq!(transport.open_count(), 3);
    assert_eq!(client.manager().info().connection_counter, 0);
}

#[tokio::test]
async fn probe_reconnects_a_dropped_transport() {
    let transport = Arc::new(MemoryTransport::new());
    transport.accept_resume(true);
    let signal = NetworkSignal::new(true);
    let client = Client::new(settings(5, 0), &auth(), transport.clone(), None)
        .unwrap()
        .with_probe(ProbeStrategy::Signal(signal.clone()));

    client.connect().await.unwrap();
    wait_until(|| client.is_authorized()).await;

    signal.set_online(false);
    wait_until(|| !client.is_connected()).await;

    tokio::time::sleep(Duration::from_millis(10)).await;
    signal.set_online(true);
    wait_until(|| client.is_connected()).await;
    assert_eq!(transport.open_count(), 2);
    wait_until(|| transport.resume_count() == 2).await;
}

#[tokio::test(start_paused = true)]
async fn reconnect_inside_timeout_backs_off_once() {
    let transport = Arc::new(MemoryTransport::new());
    transport.accept_login(false);
    let client = Client::new(settings(5, 10), &auth(), transport.clone(), None).unwrap();

    client.connect().await.unwrap();
    wait_until(|| client.manager().info().connection_counter == 1).await;
    wait_until(|| client.manager().info().manually_disconnected).await;
    assert_eq!(transport.close_count(), 1);
    assert!(!client.is_connected());

    // A reconnect inside the window is closed again without another retry
    transport.emit(TransportEvent::Connect);
    wait_until(|| transport.close_count() == 2).await;
    assert_eq!(client.manager().info().connection_counter, 1);

    transport.accept_login(true);
    tokio::time::sleep(Duration::from_secs(10)).await;
    wait_until(|| client.is_authorized()).await;

    assert_eq!(transport.open_count(), 2);
    assert!(!client.manager().info().manually_disconnected);
    assert_eq!(transport.auth_payloads().len(), 2);
}

#[tokio::test]
async fn queries_are_encrypted_after_authentication() {
    let (private_key, wire) = generate_bootstrap_key(1024).unwrap();
    let transport = Arc::new(MemoryTransport::new().with_bootstrap(wire));
    let client = Client::new(settings(5, 10), &auth(), transport.clone(), None).unwrap();

    client.connect().await.unwrap();
    wait_until(|| client.is_authorized()).await;

    let key = session_key(&private_key, &transport.auth_payloads()[0]);
    let server = SessionCrypto::new(0).install(key);
    transport.push_response(Ok(server.encrypt_value(&json!({ "total": 1, "data": [{ "id": "t1" }] })).unwrap()));

    let result = client
        .find(&Scope::network("btc", "testnet"), "transfers", Some(json!({ "status": "pending" })), None)
        .await
        .unwrap();
    assert_eq!(result, Dispatched::Returned(json!({ "total": 1, "data": [{ "id": "t1" }] })));

    let sent = transport.calls().pop().unwrap();
    let query = sent.query.unwrap();
    assert!(encrypted_payload(&query).is_some());
    assert_eq!(server.decrypt_value(query).unwrap(), json!({ "status": "pending" }));
}

#[tokio::test]
async fn remote_errors_are_decrypted() {
    let (private_key, wire) = generate_bootstrap_key(1024).unwrap();
    let transport = Arc::new(MemoryTransport::new().with_bootstrap(wire));
    let client = Client::new(settings(5, 10), &auth(), transport.clone(), None).unwrap();
    client.connect().await.unwrap();
    wait_until(|| client.is_authorized()).await;

    let server = SessionCrypto::new(0).install(session_key(&private_key, &transport.auth_payloads()[0]));
    let data = server.encrypt_value(&json!({ "field": "amount" })).unwrap();
    transport.push_response(Err(RemoteError::new("BadRequest", "Invalid amount").with_code(400).with_data(data)));

    let err = client
        .create(&Scope::network("btc", "testnet"), "transfers", json!({ "amount": "-1" }), None)
        .await
        .unwrap_err();
    assert_eq!(
        err,
        ResponseError::BadRequest(ErrorDetails {
            name: "BadRequest".into(),
            message: "Invalid amount".into(),
            code: Some(400),
            data: Some(json!({ "field": "amount" })),
        })
    );
}

#[tokio::test]
async fn service_events_are_decrypted_and_stop_on_disconnect() {
    let (private_key, wire) = generate_bootstrap_key(1024).unwrap();
    let transport = Arc::new(MemoryTransport::new().with_bootstrap(wire));
    let client = Client::new(settings(5, 10), &auth(), transport.clone(), None).unwrap();
    client.connect().await.unwrap();
    wait_until(|| client.is_authorized()).await;
    let server = SessionCrypto::new(0).install(session_key(&private_key, &transport.auth_payloads()[0]));

    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);
    let path = "/v1/btc/testnet/transfers";
    let _subscription = client
        .service(path)
        .on("created", move |payload| sink.lock().push(payload))
        .unwrap();

    transport.emit_service_event(path, "created", server.encrypt_value(&json!({ "id": "t9" })).unwrap());
    wait_until(|| received.lock().len() == 1).await;
    assert_eq!(received.lock()[0], json!({ "id": "t9" }));

    client.disconnect().await;
    assert_eq!(transport.emit_service_event(path, "created", json!({ "id": "late" })), 0);
    assert_eq!(received.lock().len(), 1);
}

#[tokio::test]
async fn disconnect_twice_is_disconnect_once() {
    let (bus, published) = recording_bus();
    let mut settings = settings(5, 10);
    settings.respond_direct = false;
    let transport = Arc::new(MemoryTransport::new());
    let client = Client::new(settings, &auth(), transport.clone(), Some(bus)).unwrap();

    client.connect().await.unwrap();
    wait_until(|| client.is_authorized()).await;

    client.disconnect().await;
    client.disconnect().await;

    let kinds: Vec<EventKind> = published.lock().iter().map(|e| e.kind.clone()).collect();
    assert_eq!(kinds, vec![EventKind::Connected, EventKind::Authorized, EventKind::Disconnected]);
    assert_eq!(transport.close_count(), 1);
    assert!(!client.is_connected());

    let err = client
        .get(&Scope::network("btc", "testnet"), "transfers", "t1", Some(&json!({ "respondDirect": true })))
        .await
        .unwrap_err();
    assert_eq!(err, ResponseError::BadRequest(ErrorDetails::new("BadRequest", "No Service")));
}

#[tokio::test]
async fn direct_and_callback_modes_agree() {
    let scope = Scope::currency("btc");
    let outcomes = [
        Ok(json!({ "usd": 64000 })),
        Err(RemoteError::new("Unavailable", "Rates offline").with_code(503)),
    ];

    for outcome in outcomes {
        let direct_transport = Arc::new(MemoryTransport::new());
        direct_transport.push_response(outcome.clone());
        let direct = Client::new(settings(5, 10), &auth(), direct_transport, None).unwrap();
        direct.connect().await.unwrap();
        let returned = direct.rate(&scope.currency, None).await;

        let (bus, published) = recording_bus();
        let mut callback_settings = settings(5, 10);
        callback_settings.respond_direct = false;
        let callback_transport = Arc::new(MemoryTransport::new());
        callback_transport.push_response(outcome.clone());
        let callback = Client::new(callback_settings, &auth(), callback_transport, Some(bus)).unwrap();
        callback.connect().await.unwrap();
        assert_eq!(callback.rate(&scope.currency, None).await.unwrap(), Dispatched::Published);

        let envelope = published
            .lock()
            .iter()
            .find(|e| matches!(e.kind, EventKind::Response(_) | EventKind::Error(_)))
            .cloned()
            .unwrap();

        match returned {
            Ok(Dispatched::Returned(value)) => {
                assert_eq!(envelope.kind, EventKind::Response("rate".into()));
                assert_eq!(envelope.payload, value);
            }
            Err(err) => {
                assert_eq!(envelope.kind, EventKind::Error("rate".into()));
                assert_eq!(envelope.payload, serde_json::to_value(&err).unwrap());
            }
            Ok(Dispatched::Published) => panic!("direct client published"),
        }
    }
}

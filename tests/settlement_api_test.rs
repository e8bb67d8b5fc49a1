use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use bigdecimal::BigDecimal;
use donation_settlement::{
    adapters::InMemoryStore,
    create_app,
    domain::{Beneficiary, Donor, Organization},
    health::HealthChecks,
    middleware::request_logger::RequestLogConfig,
    payments::PaymentGatewayClient,
    ports::DonationRepository,
    services::{Notification, NotificationQueue, SettlementService, WalletService},
    AppState,
};
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

const SECRET: &str = "whsec_test";

struct TestApp {
    app: Router,
    server: mockito::ServerGuard,
    notifications: mpsc::Receiver<Notification>,
    organization: Organization,
    beneficiary: Beneficiary,
    donor: Donor,
}

fn dec(value: &str) -> BigDecimal {
    BigDecimal::from_str(value).unwrap()
}

fn sign(body: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(SECRET.as_bytes()).unwrap();
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

async fn setup() -> TestApp {
    let server = mockito::Server::new_async().await;
    let store = Arc::new(InMemoryStore::new());

    let organization = Organization {
        id: Uuid::new_v4(),
        name: "Shelter".to_string(),
        owner_user_id: Uuid::new_v4(),
        default_commission_percentage: dec("10"),
    };
    store.insert_organization(&organization).await.unwrap();
    let beneficiary = Beneficiary::register(Uuid::new_v4(), &organization, None).unwrap();
    store.insert_beneficiary(&beneficiary).await.unwrap();
    let donor = Donor::new(Uuid::new_v4());
    store.insert_donor(&donor).await.unwrap();

    let wallets = WalletService::new(store.clone());
    let gateway = PaymentGatewayClient::new(server.url(), Duration::from_secs(2));
    let (queue, notifications) = NotificationQueue::bounded(16);
    let settlements = SettlementService::new(
        store.clone(),
        wallets.clone(),
        Arc::new(gateway),
        queue,
        Duration::from_secs(2),
    );

    let app = create_app(AppState {
        settlements: Arc::new(settlements),
        wallets,
        webhook_secret: SECRET.to_string(),
        health: HealthChecks::new(),
        start_time: Instant::now(),
        request_log: RequestLogConfig { log_body: true },
        cors_allowed_origins: None,
    });

    TestApp {
        app,
        server,
        notifications,
        organization,
        beneficiary,
        donor,
    }
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, json)
}

fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn signed_callback(donation_number: &str, payment_reference: &str) -> Request<Body> {
    let body = json!({
        "donation_number": donation_number,
        "payment_reference": payment_reference,
    })
    .to_string();
    Request::builder()
        .method("POST")
        .uri("/payments/callback")
        .header("content-type", "application/json")
        .header("X-Payment-Signature", sign(body.as_bytes()))
        .body(Body::from(body))
        .unwrap()
}

async fn create_donation(t: &TestApp, amount: &str) -> String {
    let (status, json) = send(
        &t.app,
        post_json(
            "/donations",
            &json!({
                "donor_id": t.donor.id,
                "beneficiary_id": t.beneficiary.id,
                "kind": "monetary",
                "amount": amount,
                "currency": "USD",
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", json);
    assert_eq!(json["status"], "pending");
    json["donation_number"].as_str().unwrap().to_string()
}

fn amount(value: &Value) -> BigDecimal {
    match value {
        Value::String(s) => dec(s),
        other => dec(&other.to_string()),
    }
}

#[tokio::test]
async fn test_create_and_fetch_donation() {
    let t = setup().await;
    let number = create_donation(&t, "25.00").await;

    let (status, json) = send(&t.app, get(&format!("/donations/{}", number))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["donation_number"], number.as_str());
    assert_eq!(json["organization_id"], t.organization.id.to_string());
}

#[tokio::test]
async fn test_create_donation_rejects_bad_currency() {
    let t = setup().await;
    let (status, _) = send(
        &t.app,
        post_json(
            "/donations",
            &json!({
                "donor_id": t.donor.id,
                "beneficiary_id": t.beneficiary.id,
                "kind": "monetary",
                "amount": "25.00",
                "currency": "dollars",
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unknown_donation_is_404() {
    let t = setup().await;
    let (status, json) = send(&t.app, get("/donations/DON-20250101-FFFFFFFF")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["status"], 404);

    let (status, _) = send(&t.app, get("/donations/not-a-donation")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_callback_settles_once_and_credits_wallet() {
    let mut t = setup().await;
    let number = create_donation(&t, "103.20").await;

    let _payment = t
        .server
        .mock("GET", "/payments/pi_100")
        .with_status(200)
        .with_body(
            r#"{"status":"succeeded","reference_id":"pi_100","gross_amount":"103.20",
                "fee_amount":"3.20","net_amount":"100.00","currency":"USD"}"#,
        )
        .expect(2)
        .create_async()
        .await;

    let (status, receipt) = send(&t.app, signed_callback(&number, "pi_100")).await;
    assert_eq!(status, StatusCode::OK, "{}", receipt);
    assert_eq!(receipt["already_settled"], false);
    assert_eq!(receipt["ledger"]["status"], "credited");
    assert_eq!(receipt["donation"]["status"], "completed");
    assert_eq!(amount(&receipt["donation"]["organization_amount"]), dec("10.00"));
    assert_eq!(amount(&receipt["donation"]["beneficiary_amount"]), dec("90.00"));

    // Redelivery of the same callback.
    let (status, again) = send(&t.app, signed_callback(&number, "pi_100")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(again["already_settled"], true);
    assert_eq!(again["ledger"]["status"], "already_credited");

    let (status, wallet) = send(&t.app, get(&format!("/organizations/{}/wallet", t.organization.id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(amount(&wallet["current_balance"]), dec("10.00"));
    assert_eq!(amount(&wallet["total_earnings"]), dec("10.00"));

    let (status, entries) = send(
        &t.app,
        get(&format!("/organizations/{}/wallet/transactions?limit=10", t.organization.id)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let entries = entries.as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["direction"], "credit");
    assert_eq!(entries[0]["reference_kind"], "donation");

    let first = t.notifications.recv().await.unwrap();
    let second = t.notifications.recv().await.unwrap();
    let recipients = [first.recipient_user_id, second.recipient_user_id];
    assert!(recipients.contains(&t.beneficiary.user_id));
    assert!(recipients.contains(&t.organization.owner_user_id));
    assert!(t.notifications.try_recv().is_err());
}

#[tokio::test]
async fn test_pending_payment_is_accepted_without_settling() {
    let mut t = setup().await;
    let number = create_donation(&t, "50.00").await;

    let _payment = t
        .server
        .mock("GET", "/payments/pi_wait")
        .with_status(200)
        .with_body(r#"{"status":"pending","reference_id":"pi_wait","gross_amount":"50.00","currency":"USD"}"#)
        .create_async()
        .await;

    let (status, json) = send(&t.app, signed_callback(&number, "pi_wait")).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(json["payment_status"], "pending");

    let (_, donation) = send(&t.app, get(&format!("/donations/{}", number))).await;
    assert_eq!(donation["status"], "pending");

    let (status, _) = send(&t.app, get(&format!("/organizations/{}/wallet", t.organization.id))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unknown_payment_is_unprocessable() {
    let mut t = setup().await;
    let number = create_donation(&t, "50.00").await;

    let _payment = t
        .server
        .mock("GET", "/payments/pi_ghost")
        .with_status(404)
        .create_async()
        .await;

    let (status, _) = send(&t.app, signed_callback(&number, "pi_ghost")).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_gateway_outage_is_service_unavailable() {
    let mut t = setup().await;
    let number = create_donation(&t, "50.00").await;

    let _payment = t
        .server
        .mock("GET", "/payments/pi_down")
        .with_status(502)
        .create_async()
        .await;

    let (status, _) = send(&t.app, signed_callback(&number, "pi_down")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let (_, donation) = send(&t.app, get(&format!("/donations/{}", number))).await;
    assert_eq!(donation["status"], "pending");
}

#[tokio::test]
async fn test_callback_signature_is_required() {
    let t = setup().await;
    let body = json!({"donation_number": "DON-1", "payment_reference": "pi_1"});

    let (status, json) = send(&t.app, post_json("/payments/callback", &body)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["status"], 401);

    let request = Request::builder()
        .method("POST")
        .uri("/payments/callback")
        .header("content-type", "application/json")
        .header("X-Payment-Signature", "00ff")
        .body(Body::from(body.to_string()))
        .unwrap();
    let (status, _) = send(&t.app, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_signed_malformed_callback_is_bad_request() {
    let t = setup().await;
    let body = r#"{"donation_number": 42}"#;
    let request = Request::builder()
        .method("POST")
        .uri("/payments/callback")
        .header("X-Payment-Signature", sign(body.as_bytes()))
        .body(Body::from(body))
        .unwrap();

    let (status, _) = send(&t.app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_admin_cancel_then_complete_conflicts() {
    let t = setup().await;
    let number = create_donation(&t, "20.00").await;
    let uri = format!("/donations/{}/status", number);

    let (status, receipt) = send(&t.app, post_json(&uri, &json!({"status": "cancelled"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(receipt["donation"]["status"], "cancelled");
    assert_eq!(receipt["ledger"]["status"], "not_required");

    let (status, _) = send(&t.app, post_json(&uri, &json!({"status": "completed"}))).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_admin_completion_splits_gross() {
    let t = setup().await;
    let number = create_donation(&t, "20.00").await;

    let (status, receipt) = send(
        &t.app,
        post_json(&format!("/donations/{}/status", number), &json!({"status": "completed"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", receipt);
    assert_eq!(amount(&receipt["donation"]["organization_amount"]), dec("2.00"));
    assert_eq!(amount(&receipt["donation"]["beneficiary_amount"]), dec("18.00"));
    assert_eq!(receipt["ledger"]["status"], "credited");
}

#[tokio::test]
async fn test_health_without_dependencies_is_healthy() {
    let t = setup().await;
    let (status, json) = send(&t.app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "healthy");
}

//! PayPal client tests against a mock API server.

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use ledger_service::paypal::WebhookHeaders;
use ledger_service::PaypalClient;

async fn mount_oauth(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/v1/oauth2/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "token-123",
            "expires_in": 3600,
        })))
        .mount(server)
        .await;
}

fn test_headers() -> WebhookHeaders {
    WebhookHeaders {
        auth_algo: "SHA256withRSA".into(),
        cert_url: "https://api.paypal.com/cert".into(),
        transmission_id: "tx-1".into(),
        transmission_sig: "sig".into(),
        transmission_time: "2024-01-01T00:00:00Z".into(),
    }
}

#[tokio::test]
async fn get_subscription_parses_custom_id_and_plan() {
    let server = MockServer::start().await;
    mount_oauth(&server).await;
    Mock::given(method("GET"))
        .and(path("/v1/billing/subscriptions/I-ABC"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "I-ABC",
            "status": "ACTIVE",
            "custom_id": "uid-42",
            "plan_id": "P-GOOEY-CREATOR-20",
            "billing_info": {
                "last_payment": {
                    "amount": {"currency_code": "USD", "value": "20.00"},
                    "time": "2024-06-01T12:00:00Z",
                },
                "outstanding_balance": {"currency_code": "USD", "value": "0.00"},
            },
        })))
        .mount(&server)
        .await;

    let client = PaypalClient::new(server.uri(), "client-id", "client-secret", None);
    let sub = client.get_subscription("I-ABC").await.unwrap();

    assert_eq!(sub.status, "ACTIVE");
    assert_eq!(sub.custom_id.as_deref(), Some("uid-42"));
    assert_eq!(sub.plan_id.as_deref(), Some("P-GOOEY-CREATOR-20"));
    let billing = sub.billing_info.unwrap();
    assert_eq!(billing.last_payment.unwrap().amount.value, "20.00");
}

#[tokio::test]
async fn cancel_subscription_succeeds_on_no_content() {
    let server = MockServer::start().await;
    mount_oauth(&server).await;
    Mock::given(method("POST"))
        .and(path("/v1/billing/subscriptions/I-ABC/cancel"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let client = PaypalClient::new(server.uri(), "client-id", "client-secret", None);
    client
        .cancel_subscription("I-ABC", "Replaced by a newer subscription")
        .await
        .unwrap();
}

#[tokio::test]
async fn verify_webhook_accepts_success_status() {
    let server = MockServer::start().await;
    mount_oauth(&server).await;
    Mock::given(method("POST"))
        .and(path("/v1/notifications/verify-webhook-signature"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "verification_status": "SUCCESS"
        })))
        .mount(&server)
        .await;

    let client = PaypalClient::new(
        server.uri(),
        "client-id",
        "client-secret",
        Some("wh-1".into()),
    );
    client
        .verify_webhook(&test_headers(), r#"{"event_type":"PAYMENT.SALE.COMPLETED"}"#)
        .await
        .unwrap();
}

#[tokio::test]
async fn verify_webhook_rejects_failure_status() {
    let server = MockServer::start().await;
    mount_oauth(&server).await;
    Mock::given(method("POST"))
        .and(path("/v1/notifications/verify-webhook-signature"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "verification_status": "FAILURE"
        })))
        .mount(&server)
        .await;

    let client = PaypalClient::new(
        server.uri(),
        "client-id",
        "client-secret",
        Some("wh-1".into()),
    );
    let err = client
        .verify_webhook(&test_headers(), "{}")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ledger_service::PaypalError::InvalidSignature
    ));
}

#[tokio::test]
async fn verify_webhook_requires_configured_webhook_id() {
    let server = MockServer::start().await;
    let client = PaypalClient::new(server.uri(), "client-id", "client-secret", None);
    let err = client
        .verify_webhook(&test_headers(), "{}")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ledger_service::PaypalError::Configuration(_)
    ));
}

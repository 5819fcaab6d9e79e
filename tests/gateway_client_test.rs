use assert_matches::assert_matches;
use bazaar_api::{
    config::GatewaySettings,
    payment_gateway::{GatewayError, GatewayOutcome, InitializeRequest, PaymentGateway, PaystackGateway},
};
use rstest::rstest;
use serde_json::json;
use wiremock::{
    matchers::{body_partial_json, header, method, path},
    Mock, MockServer, ResponseTemplate,
};

const SECRET: &str = "sk_test_bazaar";

fn gateway(server: &MockServer) -> PaystackGateway {
    PaystackGateway::new(&GatewaySettings {
        base_url: server.uri(),
        secret_key: SECRET.to_string(),
        max_retries: 3,
        backoff_base_ms: 1,
        timeout_secs: 5,
        ..GatewaySettings::default()
    })
    .unwrap()
}

fn verify_body(status: &str, amount: i64) -> serde_json::Value {
    let gateway_response = if status == "success" {
        "Approved"
    } else {
        "Declined by issuer"
    };
    json!({
        "status": true,
        "message": "Verification successful",
        "data": {
            "id": 4099260516u64,
            "status": status,
            "reference": "PAY-S1-1700000000-0ABCD",
            "amount": amount,
            "currency": "NGN",
            "gateway_response": gateway_response,
            "metadata": { "order_id": "6f1c3a52-8a8d-4a4e-9d0b-3f1b7c9d2e10" }
        }
    })
}

#[tokio::test]
async fn initialize_sends_minor_units_with_bearer_secret() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/transaction/initialize"))
        .and(header("authorization", format!("Bearer {}", SECRET).as_str()))
        .and(body_partial_json(json!({
            "email": "buyer@example.com",
            "amount": 2700,
            "currency": "NGN",
            "reference": "PAY-REF-1",
            "metadata": { "order_id": "abc" }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": true,
            "message": "Authorization URL created",
            "data": {
                "authorization_url": "https://checkout.paystack.com/xyz",
                "access_code": "xyz",
                "reference": "PAY-REF-1"
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = gateway(&server)
        .initialize(InitializeRequest {
            email: "buyer@example.com".into(),
            amount_minor: 2700,
            currency: "NGN".into(),
            reference: "PAY-REF-1".into(),
            callback_url: None,
            metadata: json!({ "order_id": "abc" }),
        })
        .await
        .unwrap();

    assert_matches!(outcome, GatewayOutcome::Approved(tx) => {
        assert_eq!(tx.authorization_url, "https://checkout.paystack.com/xyz");
        assert_eq!(tx.access_code, "xyz");
        assert_eq!(tx.reference, "PAY-REF-1");
    });
}

#[tokio::test]
async fn verify_success_is_parsed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/transaction/verify/PAY-S1-1700000000-0ABCD"))
        .and(header("authorization", format!("Bearer {}", SECRET).as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(verify_body("success", 2700)))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = gateway(&server)
        .verify("PAY-S1-1700000000-0ABCD")
        .await
        .unwrap();

    assert_matches!(outcome, GatewayOutcome::Approved(tx) => {
        assert_eq!(tx.transaction_id, "4099260516");
        assert_eq!(tx.amount_minor, 2700);
        assert_eq!(tx.currency.as_deref(), Some("NGN"));
        assert_eq!(
            tx.metadata_order_id().map(|id| id.to_string()).as_deref(),
            Some("6f1c3a52-8a8d-4a4e-9d0b-3f1b7c9d2e10")
        );
        assert_eq!(tx.raw["status"], "success");
    });
}

#[tokio::test]
async fn failed_transaction_status_is_a_decline() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/transaction/verify/PAY-S1-1700000000-0ABCD"))
        .respond_with(ResponseTemplate::new(200).set_body_json(verify_body("failed", 2700)))
        .mount(&server)
        .await;

    let outcome = gateway(&server)
        .verify("PAY-S1-1700000000-0ABCD")
        .await
        .unwrap();

    assert_eq!(
        outcome,
        GatewayOutcome::Declined {
            message: "Declined by issuer".into()
        }
    );
}

#[tokio::test]
async fn verify_retries_server_errors_then_succeeds() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/transaction/verify/PAY-S1-1700000000-0ABCD"))
        .respond_with(ResponseTemplate::new(503).set_body_string("upstream unavailable"))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/transaction/verify/PAY-S1-1700000000-0ABCD"))
        .respond_with(ResponseTemplate::new(200).set_body_json(verify_body("success", 500)))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = gateway(&server)
        .verify("PAY-S1-1700000000-0ABCD")
        .await
        .unwrap();

    assert_matches!(outcome, GatewayOutcome::Approved(tx) if tx.amount_minor == 500);
}

#[tokio::test]
async fn verify_gives_up_after_max_retries() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(502))
        .expect(3)
        .mount(&server)
        .await;

    let result = gateway(&server).verify("PAY-S1-1700000000-0ABCD").await;

    assert_matches!(result, Err(GatewayError::UnexpectedStatus { status: 502, .. }));
}

#[tokio::test]
async fn bad_request_envelope_is_a_decline() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "status": false,
            "message": "Transaction reference not found"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = gateway(&server).verify("unknown-ref").await.unwrap();

    assert_eq!(
        outcome,
        GatewayOutcome::Declined {
            message: "Transaction reference not found".into()
        }
    );
}

#[rstest]
#[case(401)]
#[case(403)]
#[case(422)]
#[tokio::test]
async fn other_client_errors_are_not_declines(#[case] status: u16) {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(status).set_body_json(json!({
            "status": false,
            "message": "Invalid key"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let result = gateway(&server).verify("PAY-S1-1700000000-0ABCD").await;

    assert_matches!(result, Err(GatewayError::UnexpectedStatus { status: s, .. }) if s == status);
}

#[tokio::test]
async fn malformed_body_is_an_error_not_a_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>gateway maintenance</html>"))
        .expect(1)
        .mount(&server)
        .await;

    let result = gateway(&server).verify("PAY-S1-1700000000-0ABCD").await;

    assert_matches!(result, Err(GatewayError::Malformed(_)));
}

#[tokio::test]
async fn unreachable_gateway_is_a_transport_error() {
    // Bind and release a port so nothing is listening on it
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let gateway = PaystackGateway::new(&GatewaySettings {
        base_url: format!("http://127.0.0.1:{}", port),
        secret_key: SECRET.to_string(),
        max_retries: 2,
        backoff_base_ms: 1,
        timeout_secs: 2,
        ..GatewaySettings::default()
    })
    .unwrap();

    let result = gateway.verify("PAY-S1-1700000000-0ABCD").await;

    assert_matches!(
        result,
        Err(GatewayError::Transport(_)) | Err(GatewayError::Timeout(_))
    );
}

//! MpesaService tests against a mock provider.

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use axum::routing::{get, post};
    use axum::{Json, Router, http::StatusCode};
    use chrono::Duration;
    use mpesa_client::{GatewayClient, GatewayConfig, TokenCache};
    use mpesa_repo::InMemoryRepo;
    use mpesa_types::{
        AppError, B2CPaymentRequest, BalanceQueryRequest, C2BPaymentNotification,
        C2BRegisterRequest, CallbackEnvelope, ErrorCategory, ErrorCode, OperationKind,
        OperationStatus,
    };
    use serde_json::{Value, json};

    use crate::{MpesaService, ServiceSettings, Transition};

    /// Local stand-in for the provider API.
    pub struct MockProvider {
        pub base_url: String,
        pub auth_hits: Arc<AtomicUsize>,
        pub last_request: Arc<Mutex<Option<Value>>>,
    }

    impl MockProvider {
        /// Answers every operation endpoint with `status` and `reply`.
        pub async fn start(status: StatusCode, reply: Value) -> Self {
            Self::start_with_auth(StatusCode::OK, status, reply).await
        }

        pub async fn start_with_auth(auth_status: StatusCode, status: StatusCode, reply: Value) -> Self {
            Self::spawn(auth_status, status, reply, std::time::Duration::ZERO).await
        }

        /// Holds every operation reply back for `delay`.
        pub async fn start_delayed(reply: Value, delay: std::time::Duration) -> Self {
            Self::spawn(StatusCode::OK, StatusCode::OK, reply, delay).await
        }

        async fn spawn(
            auth_status: StatusCode,
            status: StatusCode,
            reply: Value,
            delay: std::time::Duration,
        ) -> Self {
            let auth_hits = Arc::new(AtomicUsize::new(0));
            let last_request = Arc::new(Mutex::new(None));

            let hits = auth_hits.clone();
            let auth = get(move || {
                let hits = hits.clone();
                async move {
                    let n = hits.fetch_add(1, Ordering::SeqCst) + 1;
                    (
                        auth_status,
                        Json(json!({ "access_token": format!("tok-{n}"), "expires_in": "3599" })),
                    )
                }
            });

            let seen = last_request.clone();
            let operation = post(move |Json(body): Json<Value>| {
                let seen = seen.clone();
                let reply = reply.clone();
                async move {
                    *seen.lock().unwrap() = Some(body);
                    tokio::time::sleep(delay).await;
                    (status, Json(reply))
                }
            });

            let router = Router::new()
                .route("/oauth/v1/generate", auth)
                .route("/mpesa/accountbalance/v1/query", operation.clone())
                .route("/mpesa/b2c/v3/paymentrequest", operation.clone())
                .route("/mpesa/c2b/v1/registerurl", operation);

            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let base_url = format!("http://{}", listener.local_addr().unwrap());
            tokio::spawn(async move {
                axum::serve(listener, router).await.unwrap();
            });

            Self {
                base_url,
                auth_hits,
                last_request,
            }
        }

        pub fn last_request(&self) -> Value {
            self.last_request.lock().unwrap().clone().unwrap_or_default()
        }
    }

    pub fn settings() -> ServiceSettings {
        ServiceSettings {
            initiator_name: "testapi".into(),
            security_credential: "encrypted-secret".into(),
            shortcode: "600000".into(),
            callback_base_url: "https://gateway.example.com/".into(),
        }
    }

    pub fn service_for(provider: &MockProvider) -> MpesaService<InMemoryRepo> {
        service_with_config(GatewayConfig::with_base_url(&provider.base_url, "key", "secret"))
    }

    pub fn service_with_config(config: GatewayConfig) -> MpesaService<InMemoryRepo> {
        let gateway = Arc::new(GatewayClient::new(config).unwrap());
        let tokens = Arc::new(TokenCache::new(gateway.clone()));
        MpesaService::new(InMemoryRepo::new(), gateway, tokens, settings())
    }

    pub fn accepted(conversation_id: &str) -> Value {
        json!({
            "ConversationID": conversation_id,
            "OriginatorConversationID": "5118-111210482-1",
            "ResponseCode": "0",
            "ResponseDescription": "Accept the service request successfully."
        })
    }

    fn payment() -> B2CPaymentRequest {
        B2CPaymentRequest {
            command_id: "BusinessPayment".into(),
            amount: "1500".into(),
            party_b: "254712345678".into(),
            remarks: Some("June payout".into()),
            occasion: None,
        }
    }

    fn envelope(value: Value) -> CallbackEnvelope {
        serde_json::from_value(value).unwrap()
    }

    fn gateway_code(err: AppError) -> ErrorCode {
        match err {
            AppError::Gateway(e) => e.code,
            other => panic!("unexpected error: {other:?}"),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Dispatch
    // ─────────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_b2c_payment_is_pending_after_ack() {
        let provider = MockProvider::start(StatusCode::OK, accepted("AG_B2C_1")).await;
        let service = service_for(&provider);

        let op = service.pay_b2c(payment()).await.unwrap();
        assert_eq!(op.kind, OperationKind::B2cPayment);
        assert_eq!(op.status, OperationStatus::Pending);
        assert_eq!(op.conversation_id.as_deref(), Some("AG_B2C_1"));

        let sent = provider.last_request();
        assert_eq!(sent["OriginatorConversationID"], op.originator_conversation_id.as_str());
        assert_eq!(sent["PartyA"], "600000");
        assert_eq!(sent["PartyB"], "254712345678");
        assert_eq!(sent["SecurityCredential"], "encrypted-secret");
        assert_eq!(
            sent["ResultURL"],
            "https://gateway.example.com/api/v1/mpesa/b2c/callback"
        );
        assert_eq!(
            sent["QueueTimeOutURL"],
            "https://gateway.example.com/api/v1/mpesa/b2c/timeout"
        );

        let raw_request = op.raw_request.unwrap();
        assert!(!raw_request.contains("encrypted-secret"));
    }

    #[tokio::test]
    async fn test_invalid_b2c_request_records_nothing() {
        let provider = MockProvider::start(StatusCode::OK, accepted("AG_1")).await;
        let service = service_for(&provider);

        let err = service
            .pay_b2c(B2CPaymentRequest {
                party_b: "0712345678".into(),
                ..payment()
            })
            .await
            .unwrap_err();
        assert_eq!(gateway_code(err), ErrorCode::InvalidRequestParameters);
        assert!(service.list_operations(None).await.unwrap().is_empty());
        assert_eq!(provider.auth_hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_provider_error_fails_the_record() {
        let provider = MockProvider::start(
            StatusCode::BAD_REQUEST,
            json!({
                "requestId": "11728-2929992-1",
                "errorCode": "500.003.02",
                "errorMessage": "Spike arrest violation"
            }),
        )
        .await;
        let service = service_for(&provider);

        let err = service.pay_b2c(payment()).await.unwrap_err();
        match err {
            AppError::Gateway(e) => {
                assert_eq!(e.code, ErrorCode::SpikeArrest);
                assert!(e.retriable);
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let ops = service.list_operations(None).await.unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].status, OperationStatus::Failed);
        assert_eq!(ops[0].result_code.as_deref(), Some("500.003.02"));
    }

    #[tokio::test]
    async fn test_rejected_acknowledgement_fails_the_record() {
        let provider = MockProvider::start(
            StatusCode::OK,
            json!({
                "ConversationID": "AG_X",
                "OriginatorConversationID": "x",
                "ResponseCode": "1",
                "ResponseDescription": "Rejected"
            }),
        )
        .await;
        let service = service_for(&provider);

        let op = service.pay_b2c(payment()).await.unwrap();
        assert_eq!(op.status, OperationStatus::Failed);
        assert_eq!(op.result_code.as_deref(), Some("1"));
        assert!(op.conversation_id.is_none());
    }

    #[tokio::test]
    async fn test_rejected_token_is_invalidated() {
        let provider = MockProvider::start(
            StatusCode::BAD_REQUEST,
            json!({ "requestId": "r-1", "errorCode": "400.003.01", "errorMessage": "Invalid Access Token" }),
        )
        .await;
        let service = service_for(&provider);

        let err = service.pay_b2c(payment()).await.unwrap_err();
        assert_eq!(gateway_code(err), ErrorCode::InvalidAccessToken);
        service.pay_b2c(payment()).await.unwrap_err();

        assert_eq!(provider.auth_hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_token_is_shared_between_dispatches() {
        let provider = MockProvider::start(StatusCode::OK, accepted("AG_1")).await;
        let service = service_for(&provider);

        service.query_balance(BalanceQueryRequest::default()).await.unwrap();
        // Same conversation id from the mock; the second acknowledgement conflicts.
        let err = service.query_balance(BalanceQueryRequest::default()).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        assert_eq!(provider.auth_hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_auth_failure_is_auth_category() {
        let provider = MockProvider::start_with_auth(
            StatusCode::UNAUTHORIZED,
            StatusCode::OK,
            accepted("AG_1"),
        )
        .await;
        let service = service_for(&provider);

        let err = service.pay_b2c(payment()).await.unwrap_err();
        match err {
            AppError::Gateway(e) => assert_eq!(e.category, ErrorCategory::Auth),
            other => panic!("unexpected error: {other:?}"),
        }
        let ops = service.list_operations(None).await.unwrap();
        assert_eq!(ops[0].status, OperationStatus::Failed);
    }

    #[tokio::test]
    async fn test_c2b_registration_completes_synchronously() {
        let provider = MockProvider::start(
            StatusCode::OK,
            json!({
                "OriginatorCoversationID": "6e86-45dd-91ac-fd5d4178ab523408729",
                "ResponseCode": "0",
                "ResponseDescription": "Success"
            }),
        )
        .await;
        let service = service_for(&provider);

        let op = service
            .register_c2b_urls(C2BRegisterRequest::default())
            .await
            .unwrap();
        assert_eq!(op.status, OperationStatus::Completed);

        let sent = provider.last_request();
        assert_eq!(sent["ShortCode"], "600000");
        assert_eq!(sent["ResponseType"], "Completed");
        assert_eq!(
            sent["ValidationURL"],
            "https://gateway.example.com/api/v1/mpesa/c2b/validation"
        );
    }

    #[tokio::test]
    async fn test_c2b_registration_rejects_unknown_response_type() {
        let provider = MockProvider::start(StatusCode::OK, accepted("AG_1")).await;
        let service = service_for(&provider);

        let err = service
            .register_c2b_urls(C2BRegisterRequest {
                response_type: Some("Maybe".into()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert_eq!(gateway_code(err), ErrorCode::InvalidRequestParameters);
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Notifications
    // ─────────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_balance_result_completes_with_balances() {
        let provider = MockProvider::start(StatusCode::OK, accepted("AG_BAL_1")).await;
        let service = service_for(&provider);
        let op = service
            .query_balance(BalanceQueryRequest::default())
            .await
            .unwrap();

        let t = service
            .handle_result(
                OperationKind::BalanceQuery,
                envelope(json!({
                    "Result": {
                        "ResultType": 0,
                        "ResultCode": 0,
                        "ResultDesc": "The service request is processed successfully.",
                        "OriginatorConversationID": op.originator_conversation_id,
                        "ConversationID": "AG_BAL_1",
                        "TransactionID": "OA90000000",
                        "ResultParameters": {
                            "ResultParameter": [
                                { "Key": "AccountBalance", "Value": "Working Account|KES|346568.83|6186.83|340382.00|0.00&Utility Account|KES|10.00|10.00|0.00|0.00" },
                                { "Key": "BOCompletedTime", "Value": 20200109125710u64 }
                            ]
                        }
                    }
                })),
                Some("raw".into()),
            )
            .await
            .unwrap();

        let op = t.into_operation();
        assert_eq!(op.status, OperationStatus::Completed);
        assert_eq!(op.transaction_id.as_deref(), Some("OA90000000"));
        let payload = op.result_payload.unwrap();
        assert_eq!(payload["balances"].as_array().unwrap().len(), 2);
        assert_eq!(payload["balances"][0]["account_type"], "Working Account");
        assert_eq!(op.raw_callback.as_deref(), Some("raw"));
    }

    #[tokio::test]
    async fn test_b2c_failure_callback() {
        let provider = MockProvider::start(StatusCode::OK, accepted("AG_B2C_2")).await;
        let service = service_for(&provider);
        service.pay_b2c(payment()).await.unwrap();

        let op = service
            .handle_result(
                OperationKind::B2cPayment,
                envelope(json!({
                    "Result": {
                        "ResultType": 0,
                        "ResultCode": 2001,
                        "ResultDesc": "The initiator information is invalid.",
                        "ConversationID": "AG_B2C_2",
                        "TransactionID": "NLJ41HAY6Q"
                    }
                })),
                None,
            )
            .await
            .unwrap()
            .into_operation();
        assert_eq!(op.status, OperationStatus::Failed);
        assert_eq!(op.result_code.as_deref(), Some("2001"));
        assert!(op.result_payload.is_none());
    }

    #[tokio::test]
    async fn test_callback_before_acknowledgement_is_recovered() {
        let provider = MockProvider::start(StatusCode::OK, accepted("unused")).await;
        let service = service_for(&provider);
        service
            .correlator()
            .begin(OperationKind::B2cPayment, "OC-early", None)
            .await
            .unwrap();

        let t = service
            .handle_result(
                OperationKind::B2cPayment,
                envelope(json!({
                    "Result": {
                        "ResultCode": "0",
                        "ResultDesc": "ok",
                        "OriginatorConversationID": "OC-early",
                        "ConversationID": "AG_EARLY"
                    }
                })),
                None,
            )
            .await
            .unwrap();

        assert!(t.is_applied());
        assert_eq!(t.operation().status, OperationStatus::Completed);
        assert_eq!(t.operation().conversation_id.as_deref(), Some("AG_EARLY"));
    }

    #[tokio::test]
    async fn test_orphan_callback_is_not_found() {
        let provider = MockProvider::start(StatusCode::OK, accepted("unused")).await;
        let service = service_for(&provider);

        let err = service
            .handle_result(
                OperationKind::B2cPayment,
                envelope(json!({
                    "Result": { "ResultCode": "0", "ResultDesc": "ok", "ConversationID": "AG_NOPE" }
                })),
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_timeout_then_late_result() {
        let provider = MockProvider::start(StatusCode::OK, accepted("AG_T")).await;
        let service = service_for(&provider);
        service.pay_b2c(payment()).await.unwrap();

        let timeout = envelope(json!({
            "Result": { "ResultCode": "1", "ResultDesc": "Timeout", "ConversationID": "AG_T" }
        }));
        let t = service.handle_timeout(timeout, None).await.unwrap();
        assert_eq!(t.operation().status, OperationStatus::Timeout);

        let late = service
            .handle_result(
                OperationKind::B2cPayment,
                envelope(json!({
                    "Result": { "ResultCode": "0", "ResultDesc": "ok", "ConversationID": "AG_T" }
                })),
                None,
            )
            .await
            .unwrap();
        assert!(matches!(late, Transition::Ignored(ref op) if op.status == OperationStatus::Timeout));
    }

    #[tokio::test]
    async fn test_sweep_stale() {
        let provider = MockProvider::start(StatusCode::OK, accepted("AG_S")).await;
        let service = service_for(&provider);
        service.pay_b2c(payment()).await.unwrap();

        assert!(service.sweep_stale(Duration::minutes(30)).await.unwrap().is_empty());
        let swept = service.sweep_stale(Duration::zero()).await.unwrap();
        assert_eq!(swept.len(), 1);
        assert_eq!(swept[0].status, OperationStatus::Timeout);
    }

    #[tokio::test]
    async fn test_timeout_before_acknowledgement_is_recovered() {
        let provider = MockProvider::start(StatusCode::OK, accepted("unused")).await;
        let service = service_for(&provider);
        service
            .correlator()
            .begin(OperationKind::B2cPayment, "OC-slow", None)
            .await
            .unwrap();

        let t = service
            .handle_timeout(
                envelope(json!({
                    "Result": {
                        "ResultCode": "1",
                        "ResultDesc": "The request timed out in the queue",
                        "OriginatorConversationID": "OC-slow",
                        "ConversationID": "AG_SLOW"
                    }
                })),
                None,
            )
            .await
            .unwrap();

        assert!(t.is_applied());
        assert_eq!(t.operation().status, OperationStatus::Timeout);
        assert_eq!(t.operation().conversation_id.as_deref(), Some("AG_SLOW"));
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Dispatch racing notifications
    // ─────────────────────────────────────────────────────────────────────────────

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_result_before_acknowledgement_keeps_dispatch_successful() {
        let provider =
            MockProvider::start_delayed(accepted("AG_RACE"), std::time::Duration::from_millis(300))
                .await;
        let service = Arc::new(service_for(&provider));

        let dispatch = tokio::spawn({
            let service = service.clone();
            async move { service.pay_b2c(payment()).await }
        });
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        let initiated = service
            .list_operations(Some(OperationStatus::Initiated))
            .await
            .unwrap();
        assert_eq!(initiated.len(), 1);
        let originator = initiated[0].originator_conversation_id.clone();

        let t = service
            .handle_result(
                OperationKind::B2cPayment,
                envelope(json!({
                    "Result": {
                        "ResultCode": "0",
                        "ResultDesc": "The service request is processed successfully.",
                        "OriginatorConversationID": originator,
                        "ConversationID": "AG_RACE",
                        "TransactionID": "NLJ41HAY6Q"
                    }
                })),
                None,
            )
            .await
            .unwrap();
        assert!(t.is_applied());

        let op = dispatch.await.unwrap().unwrap();
        assert_eq!(op.status, OperationStatus::Completed);
        assert_eq!(op.transaction_id.as_deref(), Some("NLJ41HAY6Q"));
        assert_eq!(service.correlator().tracked_locks(), 0);
    }

    #[tokio::test]
    async fn test_read_timeout_leaves_operation_recoverable() {
        let provider =
            MockProvider::start_delayed(accepted("AG_LATE"), std::time::Duration::from_millis(800))
                .await;
        let service = service_with_config(
            GatewayConfig::with_base_url(&provider.base_url, "key", "secret").with_timeouts(
                std::time::Duration::from_secs(2),
                std::time::Duration::from_millis(200),
            ),
        );

        let err = service.pay_b2c(payment()).await.unwrap_err();
        assert_eq!(gateway_code(err), ErrorCode::RequestTimeout);

        let ops = service.list_operations(None).await.unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].status, OperationStatus::Initiated);
        assert!(ops[0].result_code.is_none());

        let op = service
            .handle_result(
                OperationKind::B2cPayment,
                envelope(json!({
                    "Result": {
                        "ResultCode": 0,
                        "ResultDesc": "The service request is processed successfully.",
                        "OriginatorConversationID": ops[0].originator_conversation_id,
                        "ConversationID": "AG_LATE"
                    }
                })),
                None,
            )
            .await
            .unwrap()
            .into_operation();
        assert_eq!(op.status, OperationStatus::Completed);
        assert_eq!(op.conversation_id.as_deref(), Some("AG_LATE"));
    }

    #[tokio::test]
    async fn test_unanswered_operation_is_eventually_swept() {
        let provider =
            MockProvider::start_delayed(accepted("AG_LATE"), std::time::Duration::from_millis(800))
                .await;
        let service = service_with_config(
            GatewayConfig::with_base_url(&provider.base_url, "key", "secret").with_timeouts(
                std::time::Duration::from_secs(2),
                std::time::Duration::from_millis(200),
            ),
        );
        service.pay_b2c(payment()).await.unwrap_err();

        let swept = service.sweep_stale(Duration::zero()).await.unwrap();
        assert_eq!(swept.len(), 1);
        assert_eq!(swept[0].status, OperationStatus::Timeout);
        assert!(swept[0].conversation_id.is_none());
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // C2B notifications
    // ─────────────────────────────────────────────────────────────────────────────

    fn notification(bill_ref: Option<&str>) -> C2BPaymentNotification {
        serde_json::from_value(json!({
            "TransactionType": "Pay Bill",
            "TransID": "RKTQDM7W6S",
            "TransTime": "20191122063845",
            "TransAmount": "10",
            "BusinessShortCode": "600638",
            "BillRefNumber": bill_ref,
            "MSISDN": "254708374149",
            "FirstName": "John"
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_c2b_validation() {
        let provider = MockProvider::start(StatusCode::OK, accepted("unused")).await;
        let service = service_for(&provider);

        let ok = service.validate_c2b(&notification(Some("INV-001")));
        assert_eq!(ok.result_code, "0");
        assert_eq!(ok.result_desc, "Accepted");

        let rejected = service.validate_c2b(&notification(Some("  ")));
        assert_eq!(rejected.result_code, "C2B00012");
        let rejected = service.validate_c2b(&notification(None));
        assert_eq!(rejected.result_code, "C2B00012");

        let confirmed = service.confirm_c2b(&notification(Some("INV-001")));
        assert_eq!(confirmed.result_desc, "Success");
    }
}

//! End-to-end runs of the engine against an in-process chain.

mod common;

use alloy_consensus::{Transaction, TxEnvelope};
use alloy_primitives::U256;
use common::*;
use executor_core::{AutoApprove, ChannelApprovalGate, EngineError};
use executor_types::{
	CompletionResult, DappMetadata, DeeplinkRequest, InteractiveRequest, InternalRequest,
	NotificationKind, TransactionStatus,
};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

fn interactive(topic: &str, id: u64, method: &str, params: serde_json::Value) -> InteractiveRequest {
	InteractiveRequest {
		topic: topic.to_string(),
		id: Some(id),
		chain_id: format!("eip155:{}", CHAIN_ID),
		method: method.to_string(),
		params,
		account: Some(ACCOUNT.to_string()),
		dapp: DappMetadata {
			name: "Test dApp".to_string(),
			url: Some("https://dapp.example".to_string()),
			icons: Vec::new(),
		},
	}
}

fn contract_call() -> serde_json::Value {
	json!([{ "from": ACCOUNT.to_string(), "to": CONTRACT.to_string(), "value": "0x0", "data": "0x" }])
}

fn internal(value: serde_json::Value) -> InternalRequest {
	serde_json::from_value(value).unwrap()
}

fn deeplink(value: serde_json::Value) -> DeeplinkRequest {
	serde_json::from_value(value).unwrap()
}

#[tokio::test]
async fn test_user_rejection_answers_session_without_record() {
	let mut harness = Harness::start(Arc::new(RejectAll)).await;

	let response = harness
		.engine
		.submit_interactive(interactive("t1", 7, "eth_sendTransaction", contract_call()))
		.await
		.unwrap();

	assert_eq!(response.id, 7);
	let error = response.error.unwrap();
	assert_eq!(error.code, 5000);
	assert_eq!(error.message, "Signing error: User rejected the request");

	let notification = harness.next_notification().await;
	assert_eq!(notification.kind, NotificationKind::NotSent);
	assert!(notification.detail.is_none());
	assert!(harness.drain_notifications().await.is_empty());
	assert!(harness.records().await.is_empty());
	assert!(harness.chain.sent().is_empty());

	harness.stop().await;
}

#[tokio::test]
async fn test_rejected_message_signature_answers_session_without_record() {
	let mut harness = Harness::start(Arc::new(RejectAll)).await;

	let response = harness
		.engine
		.submit_interactive(interactive(
			"t1",
			8,
			"personal_sign",
			json!(["0x68656c6c6f", ACCOUNT.to_string()]),
		))
		.await
		.unwrap();

	assert_eq!(response.id, 8);
	assert!(response.result.is_none());
	let error = response.error.unwrap();
	assert_eq!(error.code, 5000);
	assert_eq!(error.message, "Signing error: User rejected the request");

	let notification = harness.next_notification().await;
	assert_eq!(notification.kind, NotificationKind::NotSent);
	assert!(harness.drain_notifications().await.is_empty());
	assert!(harness.records().await.is_empty());
	assert!(harness
		.engine
		.pending_for(&ACCOUNT)
		.await
		.unwrap()
		.is_empty());

	harness.stop().await;
}

#[tokio::test]
async fn test_message_signature_returned_to_session() {
	let mut harness = Harness::start(Arc::new(AutoApprove)).await;

	let response = harness
		.engine
		.submit_interactive(interactive(
			"t1",
			1,
			"personal_sign",
			json!(["0x68656c6c6f", ACCOUNT.to_string()]),
		))
		.await
		.unwrap();

	let signature = response.result.unwrap();
	let signature = signature.as_str().unwrap();
	assert!(signature.starts_with("0x"));
	assert_eq!(signature.len(), 2 + 65 * 2);
	assert_eq!(harness.next_notification().await.kind, NotificationKind::Success);

	harness.stop().await;
}

#[tokio::test]
async fn test_allowlisted_token_transfer_confirms() {
	let mut harness = Harness::start(Arc::new(AutoApprove)).await;

	let request_id = harness
		.engine
		.submit_deeplink(deeplink(json!({
			"requestId": "dl-1",
			"account": ACCOUNT.to_string(),
			"chainId": CHAIN_ID,
			"method": "erc20_send",
			"recipient": { "address": RECIPIENT.to_string() },
			"token": TOKEN.to_string(),
			"amount": "1000000",
		})))
		.await
		.unwrap();
	assert_eq!(request_id, "dl-1");

	let records = harness
		.wait_for_records(|records| {
			records.len() == 1 && records[0].status == TransactionStatus::Success
		})
		.await;
	assert_eq!(records.len(), 1);
	assert_eq!(records[0].status, TransactionStatus::Success);
	assert_eq!(records[0].request_id, "dl-1");

	let sent = harness.chain.sent();
	assert_eq!(sent.len(), 1);
	assert_eq!(sent[0].to(), Some(TOKEN));
	assert_eq!(sent[0].value(), U256::ZERO);

	assert_eq!(harness.next_notification().await.kind, NotificationKind::Pending);
	assert_eq!(harness.next_notification().await.kind, NotificationKind::Success);

	harness.stop().await;
}

#[tokio::test]
async fn test_value_above_limit_is_blocked() {
	let mut harness = Harness::start(Arc::new(AutoApprove)).await;

	harness
		.engine
		.submit_deeplink(deeplink(json!({
			"requestId": "dl-2",
			"account": ACCOUNT.to_string(),
			"chainId": CHAIN_ID,
			"method": "eth_sendTransaction",
			"value": { "to": CONTRACT.to_string(), "value": "2000000000000000" },
		})))
		.await
		.unwrap();

	let notification = harness.next_notification().await;
	assert_eq!(notification.kind, NotificationKind::Blocked);
	assert!(notification.detail.unwrap().contains("value exceeds maximum"));
	assert!(harness.records().await.is_empty());
	assert!(harness.chain.sent().is_empty());

	harness.stop().await;
}

#[tokio::test]
async fn test_consented_batch_is_one_eip7702_transaction() {
	let harness = Harness::start(Arc::new(AutoApprove)).await;
	harness.engine.grant_consent(&ACCOUNT).await.unwrap();

	let handle = harness
		.engine
		.submit_internal(internal(json!({
			"requestId": "batch-1",
			"account": ACCOUNT.to_string(),
			"chainId": CHAIN_ID,
			"type": "batch",
			"calls": [
				{ "to": CONTRACT.to_string(), "value": "0x0", "data": "0x" },
				{ "to": RECIPIENT.to_string(), "value": "0x1" },
			],
		})))
		.await
		.unwrap();

	let completion = handle.wait().await.unwrap();
	assert!(matches!(completion, CompletionResult::Transaction { .. }));

	let sent = harness.chain.sent();
	assert_eq!(sent.len(), 1);
	let TxEnvelope::Eip7702(signed) = &sent[0] else {
		panic!("expected an EIP-7702 transaction, got {:?}", sent[0]);
	};
	let tx = signed.tx();
	assert_eq!(tx.to, ACCOUNT);
	assert_eq!(tx.authorization_list.len(), 1);
	assert_eq!(tx.authorization_list[0].address, DELEGATION);
	assert_eq!(tx.authorization_list[0].nonce, tx.nonce + 1);
	assert_eq!(harness.chain.code_reads.load(std::sync::atomic::Ordering::SeqCst), 1);

	harness.stop().await;
}

#[tokio::test]
async fn test_submission_timeout_fails_record_once() {
	let chain = FakeChain::new();
	chain.delay_sends(Duration::from_secs(3));
	let mut harness = Harness::start_with(chain, Arc::new(AutoApprove), 1).await;

	let response = harness
		.engine
		.submit_interactive(interactive("t1", 3, "eth_sendTransaction", contract_call()))
		.await
		.unwrap();

	let error = response.error.unwrap();
	assert_eq!(error.code, 5000);
	assert!(error.message.contains("timed out"));

	let records = harness.records().await;
	assert_eq!(records.len(), 1);
	assert_eq!(records[0].status, TransactionStatus::Failed);
	assert!(records[0].failure_reason.is_some());

	let notification = harness.next_notification().await;
	assert_eq!(notification.kind, NotificationKind::Failed);
	assert!(harness.drain_notifications().await.is_empty());

	harness.stop().await;
}

#[tokio::test]
async fn test_concurrent_requests_get_consecutive_nonces() {
	let harness = Harness::start(Arc::new(AutoApprove)).await;

	let mut handles = Vec::new();
	for index in 0..5 {
		let handle = harness
			.engine
			.submit_internal(internal(json!({
				"requestId": format!("send-{}", index),
				"account": ACCOUNT.to_string(),
				"chainId": CHAIN_ID,
				"type": "transaction",
				"call": { "to": CONTRACT.to_string(), "value": "0x0" },
			})))
			.await
			.unwrap();
		handles.push(handle.wait());
	}

	let results = futures::future::join_all(handles).await;
	assert!(results.iter().all(Result::is_ok));

	let mut nonces = harness.chain.sent_nonces();
	nonces.sort_unstable();
	assert_eq!(nonces, vec![0, 1, 2, 3, 4]);
	let unique: HashSet<u64> = nonces.into_iter().collect();
	assert_eq!(unique.len(), 5);

	harness.stop().await;
}

#[tokio::test]
async fn test_private_nonces_stay_gap_free_while_receipts_lag() {
	let chain = FakeChain::new();
	chain.hold_receipts();
	let harness = Harness::start_private(chain, Arc::new(AutoApprove)).await;

	for index in 0..2 {
		let handle = harness
			.engine
			.submit_internal(internal(json!({
				"requestId": format!("private-{}", index),
				"account": ACCOUNT.to_string(),
				"chainId": CHAIN_ID,
				"submitPrivately": true,
				"type": "transaction",
				"call": { "to": CONTRACT.to_string() },
			})))
			.await
			.unwrap();
		handle.wait().await.unwrap();
	}

	assert_eq!(harness.chain.sent_nonces(), vec![0, 1]);
	let records = harness.records().await;
	assert_eq!(records.len(), 2);
	assert!(records
		.iter()
		.all(|record| record.private && record.status == TransactionStatus::Pending));

	harness.stop().await;
}

#[tokio::test]
async fn test_without_consent_code_is_never_read() {
	let harness = Harness::start(Arc::new(AutoApprove)).await;

	let handle = harness
		.engine
		.submit_internal(internal(json!({
			"account": ACCOUNT.to_string(),
			"chainId": CHAIN_ID,
			"type": "transaction",
			"call": { "to": CONTRACT.to_string() },
		})))
		.await
		.unwrap();
	handle.wait().await.unwrap();

	assert_eq!(harness.chain.code_reads.load(std::sync::atomic::Ordering::SeqCst), 0);
	assert!(matches!(harness.chain.sent()[0], TxEnvelope::Eip1559(_)));

	harness.stop().await;
}

#[tokio::test]
async fn test_batch_without_delegation_is_refused() {
	let harness = Harness::start(Arc::new(AutoApprove)).await;

	let handle = harness
		.engine
		.submit_internal(internal(json!({
			"account": ACCOUNT.to_string(),
			"chainId": CHAIN_ID,
			"type": "batch",
			"calls": [
				{ "to": CONTRACT.to_string() },
				{ "to": RECIPIENT.to_string() },
			],
		})))
		.await
		.unwrap();

	let error = handle.wait().await.unwrap_err();
	assert!(error.contains("Batched calls require a delegated account"));
	assert!(harness.records().await.is_empty());
	assert!(harness.chain.sent().is_empty());

	harness.stop().await;
}

#[tokio::test]
async fn test_disconnect_cancels_request_awaiting_approval() {
	let gate = Arc::new(ChannelApprovalGate::new(Duration::from_secs(60)));
	let mut harness = Harness::start(gate.clone()).await;

	let engine = harness.engine.clone();
	let pending = tokio::spawn(async move {
		engine
			.submit_interactive(interactive("t-cancel", 9, "eth_sendTransaction", contract_call()))
			.await
	});

	let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
	while gate.waiting().is_empty() {
		assert!(tokio::time::Instant::now() < deadline, "request never reached approval");
		tokio::time::sleep(Duration::from_millis(10)).await;
	}

	assert!(harness.engine.disconnect_session("t-cancel"));
	let result = pending.await.unwrap();
	assert!(matches!(result, Err(EngineError::Abandoned(id)) if id == "t-cancel:9"));

	assert_eq!(harness.next_notification().await.kind, NotificationKind::NotSent);
	assert!(gate.waiting().is_empty());
	assert!(harness.records().await.is_empty());
	assert!(harness.chain.sent().is_empty());

	harness.stop().await;
}

#[tokio::test]
async fn test_answered_request_id_is_refused() {
	let harness = Harness::start(Arc::new(AutoApprove)).await;
	let request = internal(json!({
		"requestId": "msg-1",
		"account": ACCOUNT.to_string(),
		"chainId": CHAIN_ID,
		"type": "message",
		"message": "hello",
	}));

	let handle = harness.engine.submit_internal(request.clone()).await.unwrap();
	assert!(matches!(
		handle.wait().await.unwrap(),
		CompletionResult::Signature { .. }
	));

	let again = harness.engine.submit_internal(request).await;
	assert!(matches!(again, Err(EngineError::Duplicate(id)) if id == "msg-1"));

	harness.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_replayed_deeplink_runs_once() {
	let harness = Harness::start(Arc::new(AutoApprove)).await;
	let link = deeplink(json!({
		"requestId": "dl-replay",
		"account": ACCOUNT.to_string(),
		"chainId": CHAIN_ID,
		"method": "eth_sendTransaction",
		"value": { "to": CONTRACT.to_string(), "value": "1" },
	}));

	let submissions: Vec<_> = (0..4)
		.map(|_| {
			let engine = harness.engine.clone();
			let link = link.clone();
			tokio::spawn(async move { engine.submit_deeplink(link).await })
		})
		.collect();
	let results: Vec<_> = futures::future::join_all(submissions)
		.await
		.into_iter()
		.map(Result::unwrap)
		.collect();

	assert_eq!(results.iter().filter(|result| result.is_ok()).count(), 1);
	assert!(results
		.iter()
		.filter_map(|result| result.as_ref().err())
		.all(|error| matches!(error, EngineError::Duplicate(id) if id == "dl-replay")));

	let records = harness.wait_for_records(|records| !records.is_empty()).await;
	assert_eq!(records.len(), 1);
	tokio::time::sleep(Duration::from_millis(100)).await;
	assert_eq!(harness.chain.sent().len(), 1);

	harness.stop().await;
}

#[tokio::test]
async fn test_malformed_interactive_request_gets_error_response() {
	let mut harness = Harness::start(Arc::new(AutoApprove)).await;

	let response = harness
		.engine
		.submit_interactive(interactive("t1", 4, "eth_foo", json!([])))
		.await
		.unwrap();

	let error = response.error.unwrap();
	assert_eq!(error.code, 10001);
	assert_eq!(harness.next_notification().await.kind, NotificationKind::Failed);

	harness.stop().await;
}

#[tokio::test]
async fn test_sent_calls_status_follows_the_record() {
	let harness = Harness::start(Arc::new(AutoApprove)).await;
	harness.engine.grant_consent(&ACCOUNT).await.unwrap();

	let calls = json!([{
		"from": ACCOUNT.to_string(),
		"id": "bundle-1",
		"calls": [
			{ "to": CONTRACT.to_string(), "value": "0x0", "data": "0x" },
			{ "to": CONTRACT.to_string(), "value": "0x0", "data": "0x01" },
		],
	}]);
	let sent = harness
		.engine
		.submit_interactive(interactive("t1", 20, "wallet_sendCalls", calls))
		.await
		.unwrap();
	assert!(!sent.is_error());

	harness
		.wait_for_records(|records| {
			records.len() == 1 && records[0].status == TransactionStatus::Success
		})
		.await;

	let status = harness
		.engine
		.submit_interactive(interactive("t1", 21, "wallet_getCallsStatus", json!(["bundle-1"])))
		.await
		.unwrap();
	assert_eq!(status.id, 21);
	let status = status.result.unwrap();
	assert_eq!(status["id"], "bundle-1");
	assert_eq!(status["status"], 200);
	assert_eq!(status["atomic"], true);
	assert_eq!(status["receipts"][0]["transactionHash"], sent.result.unwrap());

	let unknown = harness
		.engine
		.submit_interactive(interactive("t1", 22, "wallet_getCallsStatus", json!(["bundle-2"])))
		.await
		.unwrap();
	assert_eq!(unknown.error.unwrap().code, 5730);

	harness.stop().await;
}

#[tokio::test]
async fn test_capabilities_reflect_consent_and_delegation() {
	let mut harness = Harness::start(Arc::new(AutoApprove)).await;
	let chain = format!("{:#x}", CHAIN_ID);

	let before = harness
		.engine
		.submit_interactive(interactive(
			"t1",
			30,
			"wallet_getCapabilities",
			json!([ACCOUNT.to_string()]),
		))
		.await
		.unwrap()
		.result
		.unwrap();
	assert_eq!(before, json!({ (chain.clone()): { "atomic": { "status": "ready" } } }));

	harness.engine.grant_consent(&ACCOUNT).await.unwrap();
	let after = harness
		.engine
		.submit_interactive(interactive(
			"t1",
			31,
			"wallet_getCapabilities",
			json!([ACCOUNT.to_string(), [chain.clone(), "0x2105"]]),
		))
		.await
		.unwrap()
		.result
		.unwrap();
	assert_eq!(after[chain.as_str()]["atomic"]["status"], "supported");
	assert_eq!(after["0x2105"]["atomic"]["status"], "unsupported");

	let foreign = harness
		.engine
		.submit_interactive(interactive(
			"t1",
			32,
			"wallet_getCapabilities",
			json!(["0x9999999999999999999999999999999999999999"]),
		))
		.await
		.unwrap();
	assert_eq!(foreign.error.unwrap().code, -32602);

	assert!(harness.records().await.is_empty());
	assert!(harness.drain_notifications().await.is_empty());

	harness.stop().await;
}

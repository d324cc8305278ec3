//! End-to-end plugin calls over the mock provider.

use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use billkit_lib::test_utils::{
    owned_purchase, product_without_offers, purchase, subscription_product, MockBillingProvider,
    MockHost,
};
use billkit_lib::{hash_account_id, BillingConfig, BillingResult, PurchaseState, ResponseCode};
use billkit_mobile::{BillingPlugin, FnCall, MobileError, PluginCall};
use serde_json::{json, Value};

#[derive(Debug, PartialEq)]
enum Settled {
    Resolved(Value),
    Rejected { code: String, message: String },
}

fn recording_call() -> (Arc<dyn PluginCall>, mpsc::Receiver<Settled>) {
    let (tx, rx) = mpsc::channel();
    let resolve_tx = Mutex::new(tx.clone());
    let reject_tx = Mutex::new(tx);
    let call: Arc<dyn PluginCall> = FnCall::new(
        move |data| {
            let _ = resolve_tx.lock().unwrap().send(Settled::Resolved(data));
        },
        move |code, message| {
            let _ = reject_tx.lock().unwrap().send(Settled::Rejected {
                code: code.to_string(),
                message: message.to_string(),
            });
        },
    );
    (call, rx)
}

fn settled(rx: &mpsc::Receiver<Settled>) -> Settled {
    rx.recv_timeout(Duration::from_secs(5))
        .expect("call was not settled")
}

fn resolved(rx: &mpsc::Receiver<Settled>) -> Value {
    match settled(rx) {
        Settled::Resolved(data) => data,
        other => panic!("expected resolve, got {:?}", other),
    }
}

fn rejected_code(rx: &mpsc::Receiver<Settled>) -> String {
    match settled(rx) {
        Settled::Rejected { code, .. } => code,
        other => panic!("expected reject, got {:?}", other),
    }
}

fn eventually(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    false
}

fn plugin(provider: &Arc<MockBillingProvider>) -> BillingPlugin {
    BillingPlugin::new(provider.clone(), MockHost::new(), BillingConfig::default()).unwrap()
}

fn initialized(provider: &Arc<MockBillingProvider>) -> BillingPlugin {
    let plugin = plugin(provider);
    let (call, rx) = recording_call();
    plugin.initialize(call);
    assert_eq!(resolved(&rx), json!({}));
    plugin
}

#[test]
fn test_purchase_then_restore() {
    let provider = MockBillingProvider::new();
    let owner = hash_account_id("a@b.com").unwrap();
    provider.set_products(vec![
        subscription_product("sub_pro", "$4.99", 4_990_000),
        product_without_offers("legacy_item"),
    ]);
    let mut bought = purchase("T1", "sub_pro", PurchaseState::Purchased, false);
    bought.order_id = Some("O1".into());
    provider.respond_to_launch(BillingResult::ok(), vec![bought]);
    let plugin = initialized(&provider);

    let (call, rx) = recording_call();
    plugin.query_product_details(&json!({ "product_ids": ["sub_pro", "legacy_item"] }), call);
    let products = resolved(&rx)["products"].clone();
    assert_eq!(products[0]["product_id"], "sub_pro");
    assert_eq!(products[0]["formatted_price"], "$4.99");
    assert_eq!(products[0]["price_micros"], 4_990_000);
    assert_eq!(products[1]["product_id"], "legacy_item");
    assert!(products[1].get("formatted_price").is_none());

    let (call, rx) = recording_call();
    plugin.start_purchase(
        &json!({ "product_id": "sub_pro", "email_address": "a@b.com" }),
        call,
    );
    assert_eq!(
        resolved(&rx),
        json!({
            "purchase_token": "T1",
            "product_id": "sub_pro",
            "order_id": "O1",
            "pending": false
        })
    );
    assert!(eventually(|| provider.acknowledged_tokens() == vec!["T1".to_string()]));
    assert_eq!(
        provider.launched_flows()[0].obfuscated_account_id.as_deref(),
        Some(owner.as_str())
    );

    provider.set_purchases(vec![owned_purchase("T1", "sub_pro", owner.as_str())]);
    let (call, rx) = recording_call();
    plugin.query_purchases(&json!({ "email_address": "a@b.com" }), call);
    let purchases = resolved(&rx)["purchases"].clone();
    assert_eq!(purchases.as_array().map(Vec::len), Some(1));
    assert_eq!(purchases[0]["purchase_token"], "T1");
    assert_eq!(purchases[0]["purchase_state"], "purchased");
    assert_eq!(purchases[0]["currency_code"], "USD");

    let (call, rx) = recording_call();
    plugin.check_subscription(
        &json!({ "product_id": "sub_pro", "email_address": "a@b.com" }),
        call,
    );
    let status = resolved(&rx);
    assert_eq!(status["active"], true);
    assert_eq!(status["purchase"]["purchase_token"], "T1");
}

#[test]
fn test_cancelled_purchase_rejects() {
    let provider = MockBillingProvider::new();
    provider.set_products(vec![subscription_product("sub_pro", "$4.99", 4_990_000)]);
    provider.respond_to_launch(BillingResult::new(ResponseCode::UserCanceled, ""), vec![]);
    let plugin = initialized(&provider);

    let (call, rx) = recording_call();
    plugin.start_purchase(&json!({ "product_id": "sub_pro" }), call);
    match settled(&rx) {
        Settled::Rejected { code, message } => {
            assert_eq!(code, "USER_CANCELED");
            assert!(!message.is_empty());
        }
        other => panic!("expected reject, got {:?}", other),
    }
    assert!(provider.acknowledged_tokens().is_empty());
}

#[test]
fn test_missing_params_reject_without_provider_calls() {
    let provider = MockBillingProvider::new();
    let plugin = plugin(&provider);

    let (call, rx) = recording_call();
    plugin.query_product_details(&json!({ "product_ids": [] }), call);
    assert_eq!(rejected_code(&rx), "MISSING_PARAM");

    let (call, rx) = recording_call();
    plugin.start_purchase(&json!({}), call);
    assert_eq!(rejected_code(&rx), "MISSING_PARAM");

    let (call, rx) = recording_call();
    plugin.acknowledge_purchase(&json!({ "purchase_token": "" }), call);
    assert_eq!(rejected_code(&rx), "MISSING_PARAM");

    let (call, rx) = recording_call();
    plugin.check_subscription(&json!({ "email_address": "a@b.com" }), call);
    assert_eq!(rejected_code(&rx), "MISSING_PARAM");

    assert_eq!(provider.total_calls(), 0);
}

#[test]
fn test_restore_without_account_is_empty() {
    let provider = MockBillingProvider::new();
    let plugin = plugin(&provider);

    let (call, rx) = recording_call();
    plugin.query_purchases(&json!({}), call);
    assert_eq!(resolved(&rx), json!({ "purchases": [] }));

    let (call, rx) = recording_call();
    plugin.query_purchases(&json!({ "email_address": "" }), call);
    assert_eq!(resolved(&rx), json!({ "purchases": [] }));

    assert_eq!(provider.total_calls(), 0);
}

#[test]
fn test_operations_before_initialize_reject() {
    let provider = MockBillingProvider::new();
    let plugin = plugin(&provider);

    let (call, rx) = recording_call();
    plugin.start_purchase(&json!({ "product_id": "sub_pro" }), call);
    assert_eq!(rejected_code(&rx), "NOT_INITIALIZED");
}

#[test]
fn test_destroy_settles_pending_purchase() {
    let provider = MockBillingProvider::new();
    provider.set_products(vec![subscription_product("sub_pro", "$4.99", 4_990_000)]);
    let plugin = initialized(&provider);

    let (call, rx) = recording_call();
    plugin.start_purchase(&json!({ "product_id": "sub_pro" }), call);
    assert!(eventually(|| provider.launched_flows().len() == 1));

    plugin.on_destroy();
    assert_eq!(rejected_code(&rx), "DESTROYED");
    assert_eq!(provider.end_count(), 1);

    let (call, rx) = recording_call();
    plugin.initialize(call);
    assert_eq!(rejected_code(&rx), "INIT_FAILED");
}

#[test]
fn test_invalid_json_config() {
    let provider = MockBillingProvider::new();
    let result = BillingPlugin::from_json_config(provider.clone(), MockHost::new(), "{oops");
    assert!(matches!(result, Err(MobileError::Config { .. })));

    let plugin =
        BillingPlugin::from_json_config(provider, MockHost::new(), r#"{"max_connect_retries": 1}"#)
            .unwrap();
    assert_eq!(plugin.engine().config().max_connect_retries, 1);
}

use std::sync::Arc;

use payment_types::crypto::{self, SignType};
use payment_types::{Channel, GatewayParams, MerchantAuth, PaymentError, TradeType};

use super::transformers;
use super::Wechatpay;
use crate::utils::{FixedNonce, NonceProvider};

fn auth() -> MerchantAuth {
    MerchantAuth::new(
        "10000100",
        "wxd930ea5d5a258f4f",
        "192006250b4c09247ec02edce69f6a2d".to_string(),
    )
}

fn nonce() -> FixedNonce {
    FixedNonce("ibuaiVcKdpRxkhJA".to_string())
}

fn assert_invalid(result: payment_types::CustomResult<(), PaymentError>, expected: &str) {
    match result.unwrap_err().current_context() {
        PaymentError::InvalidParam { field, .. } => assert_eq!(*field, expected),
        other => panic!("expected InvalidParam, got {other:?}"),
    }
}

fn prepay_params() -> GatewayParams {
    GatewayParams::new()
        .set_body("test order")
        .set_out_trade_no("2026082800001")
        .set_total_fee(100)
        .set_spbill_create_ip("127.0.0.1")
        .set_notify_url("https://merchant.example/notify")
        .set_trade_type(TradeType::App)
}

#[test]
fn prepay_fills_defaults_and_signs() {
    let mut params = prepay_params();
    transformers::prepare_prepay(&mut params, &auth(), &nonce()).unwrap();

    assert_eq!(params.appid(), Some("wxd930ea5d5a258f4f"));
    assert_eq!(params.mch_id(), Some("10000100"));
    assert_eq!(params.nonce_str(), Some("ibuaiVcKdpRxkhJA"));
    assert_eq!(params.fee_type(), Some(payment_types::FeeType::Cny));
    assert_eq!(params.sign_type(), Some(SignType::Md5));
    assert!(crypto::verify_sign(Channel::Wechat, &params, &auth().api_key).unwrap());
}

#[test]
fn prepay_reports_the_first_missing_field() {
    let mut params = GatewayParams::new();
    let result = transformers::prepare_prepay(&mut params, &auth(), &nonce());
    assert_invalid(result, "body");
}

#[test]
fn prepay_rejects_a_non_positive_amount() {
    let mut params = prepay_params().set_total_fee(0);
    let result = transformers::prepare_prepay(&mut params, &auth(), &nonce());
    assert_invalid(result, "total_fee");
}

#[test]
fn jsapi_prepay_needs_the_payer_openid() {
    let mut params = prepay_params().set_trade_type(TradeType::Jsapi);
    let result = transformers::prepare_prepay(&mut params, &auth(), &nonce());
    assert_invalid(result, "openid");

    let mut params = prepay_params()
        .set_trade_type(TradeType::Jsapi)
        .set_openid("oUpF8uMuAJO_M2pxb1Q9zNjWeS6o");
    transformers::prepare_prepay(&mut params, &auth(), &nonce()).unwrap();
}

#[test]
fn native_prepay_needs_a_product_id() {
    let mut params = prepay_params().set_trade_type(TradeType::Native);
    let result = transformers::prepare_prepay(&mut params, &auth(), &nonce());
    assert_invalid(result, "product_id");
}

#[test]
fn unknown_trade_type_is_rejected() {
    let mut params = prepay_params().with_text("trade_type", "MWEB");
    let result = transformers::prepare_prepay(&mut params, &auth(), &nonce());
    assert_invalid(result, "trade_type");
}

#[test]
fn declared_hmac_sha256_is_rejected_at_signing() {
    let mut params = prepay_params().set_sign_type(SignType::HmacSha256);
    let result = transformers::prepare_prepay(&mut params, &auth(), &nonce());
    assert!(matches!(
        result.unwrap_err().current_context(),
        PaymentError::UnsupportedSignType { .. }
    ));
}

#[test]
fn order_query_accepts_either_order_identifier() {
    let mut by_transaction = GatewayParams::new().set_transaction_id("1008450740201411110005820873");
    transformers::prepare_order_query(&mut by_transaction, &auth(), &nonce()).unwrap();

    let mut by_merchant_no = GatewayParams::new().set_out_trade_no("2026082800001");
    transformers::prepare_order_query(&mut by_merchant_no, &auth(), &nonce()).unwrap();

    let mut neither = GatewayParams::new();
    let result = transformers::prepare_order_query(&mut neither, &auth(), &nonce());
    assert_invalid(result, "transaction_id|out_trade_no");
}

#[test]
fn close_order_needs_the_merchant_order_number() {
    let mut params = GatewayParams::new();
    let result = transformers::prepare_close_order(&mut params, &auth(), &nonce());
    assert_invalid(result, "out_trade_no");
}

fn refund_params() -> GatewayParams {
    GatewayParams::new()
        .set_out_trade_no("2026082800001")
        .set_out_refund_no("2026082800001R1")
        .set_total_fee(100)
        .set_refund_fee(50)
}

#[test]
fn refund_refuses_to_run_without_the_client_identity() {
    let mut params = refund_params();
    let result = transformers::prepare_refund(&mut params, &auth(), &nonce(), false);
    assert_invalid(result, "certificate");
}

#[test]
fn refund_defaults_the_operator_to_the_merchant_id() {
    let mut params = refund_params();
    transformers::prepare_refund(&mut params, &auth(), &nonce(), true).unwrap();
    assert_eq!(params.op_user_id(), Some("10000100"));
    assert!(crypto::verify_sign(Channel::Wechat, &params, &auth().api_key).unwrap());
}

#[test]
fn refund_needs_a_refund_number() {
    let mut params = refund_params();
    params.unset("out_refund_no");
    let result = transformers::prepare_refund(&mut params, &auth(), &nonce(), true);
    assert_invalid(result, "out_refund_no");
}

#[test]
fn refund_query_accepts_any_of_the_four_identifiers() {
    let mut params = GatewayParams::new().set_refund_id("2008450740201411110000174436");
    transformers::prepare_refund_query(&mut params, &auth(), &nonce()).unwrap();

    let mut neither = GatewayParams::new();
    let result = transformers::prepare_refund_query(&mut neither, &auth(), &nonce());
    assert_invalid(result, "transaction_id|out_trade_no|out_refund_no|refund_id");
}

#[test]
fn download_bill_defaults_the_bill_type_and_marks_compression() {
    let mut params = GatewayParams::new().set_bill_date("20260827");
    transformers::prepare_download_bill(&mut params, &auth(), &nonce(), true).unwrap();
    assert_eq!(params.bill_type(), Some("ALL"));
    assert_eq!(params.tar_type(), Some("GZIP"));

    let mut plain = GatewayParams::new().set_bill_date("20260827");
    transformers::prepare_download_bill(&mut plain, &auth(), &nonce(), false).unwrap();
    assert!(plain.tar_type().is_none());
}

fn redpack_params() -> GatewayParams {
    GatewayParams::new()
        .set_mch_billno("1000010020260828000001")
        .set_send_name("Merchant")
        .set_re_openid("oUpF8uMuAJO_M2pxb1Q9zNjWeS6o")
        .set_total_amount(100)
        .set_total_num(1)
        .set_wishing("\u{606d}\u{559c}\u{53d1}\u{8d22}")
        .set_client_ip("127.0.0.1")
        .set_act_name("promo")
        .set_remark("remark")
}

#[test]
fn redpack_authenticates_with_wxappid_and_drops_the_digest_declaration() {
    let client = Wechatpay::new(auth());
    let mut params = client.new_params();
    for (key, value) in redpack_params().iter() {
        match value {
            payment_types::FieldValue::Text(text) => params.insert_text(key, text.as_str()),
            payment_types::FieldValue::Number(number) => params.insert_number(key, *number),
        }
    }

    transformers::prepare_redpack(&mut params, &auth(), &nonce(), true).unwrap();
    assert!(params.appid().is_none());
    assert!(params.text("sign_type").is_none());
    assert_eq!(params.wxappid(), Some("wxd930ea5d5a258f4f"));
    assert!(crypto::verify_sign(Channel::Wechat, &params, &auth().api_key).unwrap());
}

#[test]
fn group_redpack_defaults_the_split_mode() {
    let mut params = redpack_params().set_total_num(3);
    transformers::prepare_group_redpack(&mut params, &auth(), &nonce(), true).unwrap();
    assert_eq!(params.amt_type(), Some("ALL_RAND"));
}

#[test]
fn redpack_without_identity_is_refused_before_validation() {
    let mut params = GatewayParams::new();
    let result = transformers::prepare_redpack(&mut params, &auth(), &nonce(), false);
    assert_invalid(result, "certificate");
}

#[test]
fn reply_document_matches_the_gateway_contract() {
    assert_eq!(
        Wechatpay::get_reply("\u{53c2}\u{6570}\u{9519}\u{8bef}", "FAIL"),
        "<xml><return_code><![CDATA[FAIL]]></return_code>\
         <return_msg><![CDATA[\u{53c2}\u{6570}\u{9519}\u{8bef}]]></return_msg></xml>"
    );
}

#[test]
fn jsapi_parameters_are_a_signed_json_object() {
    let client = Wechatpay::new(auth()).with_nonce_provider(Arc::new(nonce()));
    let rendered = client.get_jsapi_parameters("wx201410272009395522657a690389285100").unwrap();
    let object: serde_json::Value = serde_json::from_str(&rendered).unwrap();

    assert_eq!(object["appId"], "wxd930ea5d5a258f4f");
    assert_eq!(object["nonceStr"], "ibuaiVcKdpRxkhJA");
    assert_eq!(
        object["package"],
        "prepay_id=wx201410272009395522657a690389285100"
    );
    assert_eq!(object["signType"], "MD5");

    let mut unsigned = GatewayParams::new();
    for field in ["appId", "timeStamp", "nonceStr", "package", "signType"] {
        unsigned.insert_text(field, object[field].as_str().unwrap());
    }
    let expected =
        crypto::compute_sign(Channel::Wechat, &unsigned, &auth().api_key, SignType::Md5).unwrap();
    assert_eq!(object["paySign"], expected.as_str());
}

#[test]
fn notification_round_trip_and_tampering() {
    let client = Wechatpay::new(auth());
    let mut notification = GatewayParams::new()
        .set_return_code("SUCCESS")
        .set_result_code("SUCCESS")
        .set_out_trade_no("2026082800001")
        .set_transaction_id("1008450740201411110005820873")
        .with_text("total_fee", "100");
    let sign =
        crypto::compute_sign(Channel::Wechat, &notification, &auth().api_key, SignType::Md5)
            .unwrap();
    notification.insert_text("sign", sign);
    let body = crate::utils::encode_xml(&notification);

    let verified = client.verify_notification(body.as_bytes()).unwrap();
    assert_eq!(verified.out_trade_no(), Some("2026082800001"));
    assert_eq!(verified.total_fee(), Some(100));

    let tampered = body.replace("2026082800001", "2026082800002");
    assert!(matches!(
        client
            .verify_notification(tampered.as_bytes())
            .unwrap_err()
            .current_context(),
        PaymentError::SignatureMismatch { .. }
    ));

    let unsigned = crate::utils::encode_xml(&GatewayParams::new().set_return_code("SUCCESS"));
    assert!(client.verify_notification(unsigned.as_bytes()).is_err());
}

#[test]
fn new_params_carries_the_merchant_identity() {
    let client = Wechatpay::new(auth());
    let params = client.new_params();
    assert_eq!(params.appid(), Some("wxd930ea5d5a258f4f"));
    assert_eq!(params.mch_id(), Some("10000100"));
    assert_eq!(params.sign_type(), Some(SignType::Md5));
}

#[test]
fn decoded_error_documents_pass_through_without_a_signature() {
    let client = Wechatpay::new(auth());
    let body = Wechatpay::get_reply("appid missing", "FAIL");
    let params = client.decode_and_verify(body.as_bytes()).unwrap();
    assert_eq!(params.return_code(), Some("FAIL"));
}

#[test]
fn nonce_provider_reaches_the_prepared_request() {
    let provider = FixedNonce("A".repeat(32));
    assert_eq!(provider.nonce(32).len(), 32);
    let mut params = GatewayParams::new().set_out_trade_no("2026082800001");
    transformers::prepare_close_order(&mut params, &auth(), &provider).unwrap();
    assert_eq!(params.nonce_str(), Some("A".repeat(32).as_str()));
}

//! Request preparation for the WeChat gateway: identity defaults,
//! per-operation validation, and signing. Validation is short-circuit; the
//! first unmet requirement is reported and nothing else is inspected.

use std::str::FromStr;

use error_stack::report;
use payment_types::crypto::{self, SignType};
use payment_types::{
    Channel, CustomResult, FeeType, GatewayParams, MerchantAuth, PaymentError, TradeType,
};

use crate::utils::{NonceProvider, NONCE_LENGTH};

const CHANNEL: Channel = Channel::Wechat;

fn invalid(field: &'static str) -> error_stack::Report<PaymentError> {
    report!(PaymentError::InvalidParam {
        channel: CHANNEL,
        field,
    })
}

fn require(params: &GatewayParams, field: &'static str) -> CustomResult<(), PaymentError> {
    if params.contains(field) {
        Ok(())
    } else {
        Err(invalid(field))
    }
}

fn require_any(
    params: &GatewayParams,
    fields: &[&str],
    label: &'static str,
) -> CustomResult<(), PaymentError> {
    if fields.iter().any(|field| params.contains(field)) {
        Ok(())
    } else {
        Err(invalid(label))
    }
}

// Amounts are integer cents and must be strictly positive. A missing field
// fails here too, under the same field name.
fn require_positive(params: &GatewayParams, field: &'static str) -> CustomResult<(), PaymentError> {
    match params.number(field) {
        Some(value) if value > 0 => Ok(()),
        _ => Err(invalid(field)),
    }
}

fn require_client_identity(has_identity: bool) -> CustomResult<(), PaymentError> {
    if has_identity {
        Ok(())
    } else {
        Err(invalid("certificate"))
    }
}

fn fill_identity(params: &mut GatewayParams, auth: &MerchantAuth) {
    if !params.contains("appid") {
        params.insert_text("appid", auth.app_id.as_str());
    }
    if !params.contains("mch_id") {
        params.insert_text("mch_id", auth.mch_id.as_str());
    }
    if !params.contains("sign_type") {
        params.insert_text("sign_type", SignType::Md5.to_string());
    }
}

fn fill_nonce(params: &mut GatewayParams, nonce: &dyn NonceProvider) {
    if !params.contains("nonce_str") {
        params.insert_text("nonce_str", nonce.nonce(NONCE_LENGTH));
    }
}

/// Computes the digest over the prepared set and stores it under `sign`.
/// An already-present `sign` is never trusted; signing always recomputes.
fn attach_sign(params: &mut GatewayParams, auth: &MerchantAuth) -> CustomResult<(), PaymentError> {
    let sign_type = match params.text("sign_type") {
        None => SignType::Md5,
        Some(raw) => SignType::from_str(raw).map_err(|_| invalid("sign_type"))?,
    };
    let sign = crypto::compute_sign(CHANNEL, params, &auth.api_key, sign_type)?;
    params.insert_text(crypto::SIGN_FIELD, sign);
    Ok(())
}

pub(crate) fn prepare_prepay(
    params: &mut GatewayParams,
    auth: &MerchantAuth,
    nonce: &dyn NonceProvider,
) -> CustomResult<(), PaymentError> {
    fill_identity(params, auth);
    fill_nonce(params, nonce);
    if !params.contains("fee_type") {
        params.insert_text("fee_type", FeeType::Cny.to_string());
    }

    require(params, "appid")?;
    require(params, "mch_id")?;
    require(params, "nonce_str")?;
    require(params, "body")?;
    require(params, "out_trade_no")?;
    require_positive(params, "total_fee")?;
    require(params, "spbill_create_ip")?;
    require(params, "notify_url")?;
    require(params, "trade_type")?;
    match params.trade_type() {
        Some(TradeType::Jsapi) => require(params, "openid")?,
        Some(TradeType::Native) => require(params, "product_id")?,
        Some(TradeType::App) => {}
        // Present but not a known variant.
        None => return Err(invalid("trade_type")),
    }

    attach_sign(params, auth)
}

pub(crate) fn prepare_order_query(
    params: &mut GatewayParams,
    auth: &MerchantAuth,
    nonce: &dyn NonceProvider,
) -> CustomResult<(), PaymentError> {
    fill_identity(params, auth);
    fill_nonce(params, nonce);
    require_any(
        params,
        &["transaction_id", "out_trade_no"],
        "transaction_id|out_trade_no",
    )?;
    attach_sign(params, auth)
}

pub(crate) fn prepare_close_order(
    params: &mut GatewayParams,
    auth: &MerchantAuth,
    nonce: &dyn NonceProvider,
) -> CustomResult<(), PaymentError> {
    fill_identity(params, auth);
    fill_nonce(params, nonce);
    require(params, "out_trade_no")?;
    attach_sign(params, auth)
}

pub(crate) fn prepare_refund(
    params: &mut GatewayParams,
    auth: &MerchantAuth,
    nonce: &dyn NonceProvider,
    has_identity: bool,
) -> CustomResult<(), PaymentError> {
    require_client_identity(has_identity)?;
    fill_identity(params, auth);
    fill_nonce(params, nonce);
    if !params.contains("op_user_id") {
        params.insert_text("op_user_id", auth.mch_id.as_str());
    }

    require_any(
        params,
        &["transaction_id", "out_trade_no"],
        "transaction_id|out_trade_no",
    )?;
    require(params, "out_refund_no")?;
    require_positive(params, "total_fee")?;
    require_positive(params, "refund_fee")?;
    attach_sign(params, auth)
}

pub(crate) fn prepare_refund_query(
    params: &mut GatewayParams,
    auth: &MerchantAuth,
    nonce: &dyn NonceProvider,
) -> CustomResult<(), PaymentError> {
    fill_identity(params, auth);
    fill_nonce(params, nonce);
    require_any(
        params,
        &["transaction_id", "out_trade_no", "out_refund_no", "refund_id"],
        "transaction_id|out_trade_no|out_refund_no|refund_id",
    )?;
    attach_sign(params, auth)
}

pub(crate) fn prepare_download_bill(
    params: &mut GatewayParams,
    auth: &MerchantAuth,
    nonce: &dyn NonceProvider,
    compressed: bool,
) -> CustomResult<(), PaymentError> {
    fill_identity(params, auth);
    fill_nonce(params, nonce);
    require(params, "bill_date")?;
    if !params.contains("bill_type") {
        params.insert_text("bill_type", "ALL");
    }
    if compressed {
        params.insert_text("tar_type", "GZIP");
    }
    attach_sign(params, auth)
}

// Red packets authenticate with `wxappid` and carry no `sign_type` field;
// a stray `appid` or `sign_type` left over from `new_params` is dropped
// rather than sent to an endpoint that rejects unknown fields.
fn fill_redpack_identity(params: &mut GatewayParams, auth: &MerchantAuth) {
    params.unset("appid");
    params.unset("sign_type");
    if !params.contains("wxappid") {
        params.insert_text("wxappid", auth.app_id.as_str());
    }
    if !params.contains("mch_id") {
        params.insert_text("mch_id", auth.mch_id.as_str());
    }
}

fn validate_redpack(params: &GatewayParams) -> CustomResult<(), PaymentError> {
    require(params, "mch_billno")?;
    require(params, "send_name")?;
    require(params, "re_openid")?;
    require_positive(params, "total_amount")?;
    require_positive(params, "total_num")?;
    require(params, "wishing")?;
    require(params, "client_ip")?;
    require(params, "act_name")?;
    require(params, "remark")
}

pub(crate) fn prepare_redpack(
    params: &mut GatewayParams,
    auth: &MerchantAuth,
    nonce: &dyn NonceProvider,
    has_identity: bool,
) -> CustomResult<(), PaymentError> {
    require_client_identity(has_identity)?;
    fill_redpack_identity(params, auth);
    fill_nonce(params, nonce);
    validate_redpack(params)?;
    attach_sign(params, auth)
}

pub(crate) fn prepare_group_redpack(
    params: &mut GatewayParams,
    auth: &MerchantAuth,
    nonce: &dyn NonceProvider,
    has_identity: bool,
) -> CustomResult<(), PaymentError> {
    require_client_identity(has_identity)?;
    fill_redpack_identity(params, auth);
    fill_nonce(params, nonce);
    if !params.contains("amt_type") {
        params.insert_text("amt_type", "ALL_RAND");
    }
    validate_redpack(params)?;
    attach_sign(params, auth)
}

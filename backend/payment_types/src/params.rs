use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::crypto::SignType;
use crate::types::{FeeType, TradeType};

/// A single gateway field value. The gateway's wire format distinguishes
/// text from numbers: text is CDATA-wrapped in XML, numbers are emitted
/// bare. A `null` field does not exist in the map at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Text(String),
    Number(i64),
}

impl FieldValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value),
            Self::Number(_) => None,
        }
    }

    /// Numeric view of the value. Gateway responses deliver every field as
    /// text, so numeric getters parse on read.
    pub fn as_number(&self) -> Option<i64> {
        match self {
            Self::Number(value) => Some(*value),
            Self::Text(value) => value.parse().ok(),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(value) => f.write_str(value),
            Self::Number(value) => write!(f, "{value}"),
        }
    }
}

macro_rules! text_fields {
    ($(($key:literal, $get:ident, $set:ident)),+ $(,)?) => {
        $(
            pub fn $get(&self) -> Option<&str> {
                self.text($key)
            }

            pub fn $set(mut self, value: impl Into<String>) -> Self {
                self.insert_text($key, value);
                self
            }
        )+
    };
}

macro_rules! number_fields {
    ($(($key:literal, $get:ident, $set:ident)),+ $(,)?) => {
        $(
            pub fn $get(&self) -> Option<i64> {
                self.number($key)
            }

            pub fn $set(mut self, value: i64) -> Self {
                self.insert_number($key, value);
                self
            }
        )+
    };
}

/// The parameter set for one gateway call: a map from gateway-defined field
/// name to value, kept in byte-sorted key order at all times. Sorted order
/// is what the signing contract requires, and the gateway does not care
/// about element order in the XML body, so the map order is used for both.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GatewayParams {
    fields: BTreeMap<String, FieldValue>,
}

impl GatewayParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key)
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(FieldValue::as_text)
    }

    pub fn number(&self, key: &str) -> Option<i64> {
        self.fields.get(key).and_then(FieldValue::as_number)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Iterates fields in byte-sorted key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn insert_text(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(key.into(), FieldValue::Text(value.into()));
    }

    pub fn insert_number(&mut self, key: impl Into<String>, value: i64) {
        self.fields.insert(key.into(), FieldValue::Number(value));
    }

    /// Clears a field. A cleared field is absent from signing and from the
    /// serialized XML; there is no empty-tag form.
    pub fn unset(&mut self, key: &str) -> Option<FieldValue> {
        self.fields.remove(key)
    }

    pub fn with_text(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert_text(key, value);
        self
    }

    pub fn with_number(mut self, key: impl Into<String>, value: i64) -> Self {
        self.insert_number(key, value);
        self
    }

    /// The filtered, key-sorted, `&`-joined `k=v` form of the set. This is
    /// the canonical signing input minus the trailing `&key=<secret>`; the
    /// gateway recomputes the digest over the identical byte sequence.
    pub fn to_query_string(&self) -> String {
        self.iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&")
    }

    // Field table. Each entry fixes a gateway field name to a typed
    // accessor pair; values never nest.
    text_fields!(
        ("appid", appid, set_appid),
        ("wxappid", wxappid, set_wxappid),
        ("mch_id", mch_id, set_mch_id),
        ("device_info", device_info, set_device_info),
        ("nonce_str", nonce_str, set_nonce_str),
        ("sign", sign, set_sign),
        ("body", body, set_body),
        ("detail", detail, set_detail),
        ("attach", attach, set_attach),
        ("out_trade_no", out_trade_no, set_out_trade_no),
        ("spbill_create_ip", spbill_create_ip, set_spbill_create_ip),
        ("time_start", time_start, set_time_start),
        ("time_expire", time_expire, set_time_expire),
        ("goods_tag", goods_tag, set_goods_tag),
        ("notify_url", notify_url, set_notify_url),
        ("product_id", product_id, set_product_id),
        ("limit_pay", limit_pay, set_limit_pay),
        ("openid", openid, set_openid),
        ("transaction_id", transaction_id, set_transaction_id),
        ("out_refund_no", out_refund_no, set_out_refund_no),
        ("refund_id", refund_id, set_refund_id),
        ("op_user_id", op_user_id, set_op_user_id),
        ("bill_date", bill_date, set_bill_date),
        ("bill_type", bill_type, set_bill_type),
        ("tar_type", tar_type, set_tar_type),
        ("mch_billno", mch_billno, set_mch_billno),
        ("send_name", send_name, set_send_name),
        ("re_openid", re_openid, set_re_openid),
        ("wishing", wishing, set_wishing),
        ("act_name", act_name, set_act_name),
        ("remark", remark, set_remark),
        ("amt_type", amt_type, set_amt_type),
        ("client_ip", client_ip, set_client_ip),
        ("scene_id", scene_id, set_scene_id),
        ("return_code", return_code, set_return_code),
        ("return_msg", return_msg, set_return_msg),
        ("result_code", result_code, set_result_code),
        ("err_code", err_code, set_err_code),
        ("err_code_des", err_code_des, set_err_code_des),
        ("prepay_id", prepay_id, set_prepay_id),
        ("code_url", code_url, set_code_url),
    );

    number_fields!(
        ("total_fee", total_fee, set_total_fee),
        ("refund_fee", refund_fee, set_refund_fee),
        ("total_amount", total_amount, set_total_amount),
        ("total_num", total_num, set_total_num),
    );

    pub fn sign_type(&self) -> Option<SignType> {
        self.text("sign_type")
            .and_then(|value| SignType::from_str(value).ok())
    }

    pub fn set_sign_type(mut self, sign_type: SignType) -> Self {
        self.insert_text("sign_type", sign_type.to_string());
        self
    }

    pub fn trade_type(&self) -> Option<TradeType> {
        self.text("trade_type")
            .and_then(|value| TradeType::from_str(value).ok())
    }

    pub fn set_trade_type(mut self, trade_type: TradeType) -> Self {
        self.insert_text("trade_type", trade_type.to_string());
        self
    }

    pub fn fee_type(&self) -> Option<FeeType> {
        self.text("fee_type")
            .and_then(|value| FeeType::from_str(value).ok())
    }

    pub fn set_fee_type(mut self, fee_type: FeeType) -> Self {
        self.insert_text("fee_type", fee_type.to_string());
        self
    }
}

impl FromIterator<(String, FieldValue)> for GatewayParams {
    fn from_iter<I: IntoIterator<Item = (String, FieldValue)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_string_is_key_sorted_regardless_of_insertion_order() {
        let forward = GatewayParams::new()
            .set_appid("wx1")
            .set_body("test")
            .set_total_fee(100);
        let reverse = GatewayParams::new()
            .set_total_fee(100)
            .set_body("test")
            .set_appid("wx1");
        assert_eq!(forward.to_query_string(), reverse.to_query_string());
        assert_eq!(forward.to_query_string(), "appid=wx1&body=test&total_fee=100");
    }

    #[test]
    fn unset_field_disappears_from_query_string() {
        let mut params = GatewayParams::new().set_body("test").set_detail("gone");
        params.unset("detail");
        assert_eq!(params.to_query_string(), "body=test");
        assert!(params.detail().is_none());
    }

    #[test]
    fn numeric_getters_parse_text_values() {
        let params = GatewayParams::new().with_text("total_fee", "100");
        assert_eq!(params.total_fee(), Some(100));
    }

    #[test]
    fn typed_enum_accessors_round_trip_wire_form() {
        let params = GatewayParams::new()
            .set_trade_type(TradeType::Jsapi)
            .set_fee_type(FeeType::Cny);
        assert_eq!(params.text("trade_type"), Some("JSAPI"));
        assert_eq!(params.text("fee_type"), Some("CNY"));
        assert_eq!(params.trade_type(), Some(TradeType::Jsapi));
        assert_eq!(params.fee_type(), Some(FeeType::Cny));
    }
}

use masking::Secret;
use serde::{Deserialize, Serialize};

/// Payment channel identity, carried on every error so callers can tell
/// which gateway a failure originated from.
#[derive(
    Clone,
    Copy,
    Debug,
    Eq,
    PartialEq,
    Deserialize,
    Serialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum Channel {
    Wechat,
    Alipay,
}

/// Trade type selecting the payment flow variant. The variant decides which
/// extra fields a prepay call must carry.
#[derive(
    Clone,
    Copy,
    Debug,
    Eq,
    PartialEq,
    Deserialize,
    Serialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum TradeType {
    /// In-wallet browser payment. Requires the payer's `openid`.
    Jsapi,
    /// Native app payment.
    App,
    /// Scan-code payment. Requires `product_id`.
    Native,
}

/// ISO 4217 currency code accepted by the gateway.
#[derive(
    Clone,
    Copy,
    Debug,
    Eq,
    PartialEq,
    Deserialize,
    Serialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum FeeType {
    Cny,
}

/// Merchant credentials for a channel. Immutable once constructed; the API
/// key never appears in logs or Debug output.
#[derive(Clone, Debug)]
pub struct MerchantAuth {
    pub mch_id: String,
    pub app_id: String,
    pub api_key: Secret<String>,
}

impl MerchantAuth {
    pub fn new(mch_id: impl Into<String>, app_id: impl Into<String>, api_key: String) -> Self {
        Self {
            mch_id: mch_id.into(),
            app_id: app_id.into(),
            api_key: Secret::new(api_key),
        }
    }
}

/// Outbound proxy configuration for the HTTP collaborator.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Proxy {
    pub http_url: Option<String>,
    pub https_url: Option<String>,
    pub idle_pool_connection_timeout: Option<u64>,
    #[serde(default)]
    pub bypass_proxy_urls: Vec<String>,
}

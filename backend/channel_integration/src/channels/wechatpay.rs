pub mod transformers;

#[cfg(test)]
mod test;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use error_stack::report;
use external_services::request::{Method, RequestBuilder, RequestContent};
use external_services::service::{call_gateway_api, Response, DEFAULT_REQUEST_TIMEOUT};
use masking::Secret;
use payment_types::crypto::{self, SignType};
use payment_types::{Channel, CustomResult, GatewayParams, MerchantAuth, PaymentError, Proxy};

use crate::utils::{self, NonceProvider, RandomNonce, NONCE_LENGTH};

pub const BASE_URL: &str = "https://api.mch.weixin.qq.com";

const UNIFIED_ORDER: &str = "/pay/unifiedorder";
const ORDER_QUERY: &str = "/pay/orderquery";
const CLOSE_ORDER: &str = "/pay/closeorder";
const REFUND: &str = "/secapi/pay/refund";
const REFUND_QUERY: &str = "/pay/refundquery";
const DOWNLOAD_BILL: &str = "/pay/downloadbill";
const SEND_REDPACK: &str = "/mmpaymkttransfers/sendredpack";
const SEND_GROUP_REDPACK: &str = "/mmpaymkttransfers/sendgroupredpack";

/// Outcome of a bill download. The gateway answers with an XML error
/// document on failure and with raw bill bytes (possibly gzip-compressed)
/// on success, so the two cases surface as distinct variants.
#[derive(Debug)]
pub enum BillResponse {
    Raw(Bytes),
    Gateway(GatewayParams),
}

/// Client for the WeChat payment gateway. One instance per merchant; all
/// operations share the credentials, the proxy settings, and the optional
/// TLS client identity configured here.
#[derive(Clone)]
pub struct Wechatpay {
    auth: MerchantAuth,
    base_url: String,
    proxy: Proxy,
    timeout: Duration,
    certificate: Option<Secret<String>>,
    certificate_key: Option<Secret<String>>,
    ca_certificate: Option<Secret<String>>,
    nonce_provider: Arc<dyn NonceProvider>,
}

impl Wechatpay {
    pub fn new(auth: MerchantAuth) -> Self {
        Self {
            auth,
            base_url: BASE_URL.to_string(),
            proxy: Proxy::default(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
            certificate: None,
            certificate_key: None,
            ca_certificate: None,
            nonce_provider: Arc::new(RandomNonce),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_proxy(mut self, proxy: Proxy) -> Self {
        self.proxy = proxy;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_nonce_provider(mut self, provider: Arc<dyn NonceProvider>) -> Self {
        self.nonce_provider = provider;
        self
    }

    /// Installs the merchant TLS identity. All three pieces are PEM text;
    /// operations on certificate-gated endpoints refuse to run until this
    /// has been called.
    pub fn set_certificate(
        &mut self,
        certificate: Secret<String>,
        certificate_key: Secret<String>,
        ca_certificate: Secret<String>,
    ) {
        self.certificate = Some(certificate);
        self.certificate_key = Some(certificate_key);
        self.ca_certificate = Some(ca_certificate);
    }

    pub fn channel(&self) -> Channel {
        Channel::Wechat
    }

    /// A parameter set pre-filled with the merchant identity and the default
    /// digest declaration, ready for the caller to add order fields.
    pub fn new_params(&self) -> GatewayParams {
        GatewayParams::new()
            .set_appid(self.auth.app_id.as_str())
            .set_mch_id(self.auth.mch_id.as_str())
            .set_sign_type(SignType::Md5)
    }

    fn has_client_identity(&self) -> bool {
        self.certificate.is_some()
            && self.certificate_key.is_some()
            && self.ca_certificate.is_some()
    }

    /// Creates a prepayment order. On success the response carries
    /// `prepay_id` (and `code_url` for scan-code trades).
    pub async fn prepay(
        &self,
        mut params: GatewayParams,
    ) -> CustomResult<GatewayParams, PaymentError> {
        transformers::prepare_prepay(&mut params, &self.auth, self.nonce_provider.as_ref())?;
        let response = self.dispatch(UNIFIED_ORDER, &params, false).await?;
        self.decode_and_verify(&response.response)
    }

    /// Looks up an order by `transaction_id` or `out_trade_no`.
    pub async fn order_query(
        &self,
        mut params: GatewayParams,
    ) -> CustomResult<GatewayParams, PaymentError> {
        transformers::prepare_order_query(&mut params, &self.auth, self.nonce_provider.as_ref())?;
        let response = self.dispatch(ORDER_QUERY, &params, false).await?;
        self.decode_and_verify(&response.response)
    }

    pub async fn close_order(
        &self,
        mut params: GatewayParams,
    ) -> CustomResult<GatewayParams, PaymentError> {
        transformers::prepare_close_order(&mut params, &self.auth, self.nonce_provider.as_ref())?;
        let response = self.dispatch(CLOSE_ORDER, &params, false).await?;
        self.decode_and_verify(&response.response)
    }

    /// Refunds an order, in part or in full. Requires the merchant TLS
    /// identity to be configured.
    pub async fn refund(
        &self,
        mut params: GatewayParams,
    ) -> CustomResult<GatewayParams, PaymentError> {
        transformers::prepare_refund(
            &mut params,
            &self.auth,
            self.nonce_provider.as_ref(),
            self.has_client_identity(),
        )?;
        let response = self.dispatch(REFUND, &params, true).await?;
        self.decode_and_verify(&response.response)
    }

    pub async fn refund_query(
        &self,
        mut params: GatewayParams,
    ) -> CustomResult<GatewayParams, PaymentError> {
        transformers::prepare_refund_query(&mut params, &self.auth, self.nonce_provider.as_ref())?;
        let response = self.dispatch(REFUND_QUERY, &params, false).await?;
        self.decode_and_verify(&response.response)
    }

    /// Downloads a reconciliation bill. A body that opens with `<` is the
    /// gateway's XML error document; anything else is the bill itself and
    /// passes through untouched.
    pub async fn download_bill(
        &self,
        mut params: GatewayParams,
        compressed: bool,
    ) -> CustomResult<BillResponse, PaymentError> {
        transformers::prepare_download_bill(
            &mut params,
            &self.auth,
            self.nonce_provider.as_ref(),
            compressed,
        )?;
        let response = self.dispatch(DOWNLOAD_BILL, &params, false).await?;
        if response.response.first() == Some(&b'<') {
            Ok(BillResponse::Gateway(
                self.decode_and_verify(&response.response)?,
            ))
        } else {
            Ok(BillResponse::Raw(response.response))
        }
    }

    /// Sends a single red packet. Requires the merchant TLS identity.
    pub async fn send_redpack(
        &self,
        mut params: GatewayParams,
    ) -> CustomResult<GatewayParams, PaymentError> {
        transformers::prepare_redpack(
            &mut params,
            &self.auth,
            self.nonce_provider.as_ref(),
            self.has_client_identity(),
        )?;
        let response = self.dispatch(SEND_REDPACK, &params, true).await?;
        self.decode_and_verify(&response.response)
    }

    /// Sends a group red packet split across several recipients. Requires
    /// the merchant TLS identity.
    pub async fn send_group_redpack(
        &self,
        mut params: GatewayParams,
    ) -> CustomResult<GatewayParams, PaymentError> {
        transformers::prepare_group_redpack(
            &mut params,
            &self.auth,
            self.nonce_provider.as_ref(),
            self.has_client_identity(),
        )?;
        let response = self.dispatch(SEND_GROUP_REDPACK, &params, true).await?;
        self.decode_and_verify(&response.response)
    }

    /// Renders the acknowledgement document a notification endpoint must
    /// answer the gateway with.
    pub fn get_reply(return_msg: &str, return_code: &str) -> String {
        let params = GatewayParams::new()
            .set_return_code(return_code)
            .set_return_msg(return_msg);
        utils::encode_xml(&params)
    }

    /// Builds the JSON parameter object the in-wallet JSAPI bridge consumes
    /// to invoke payment for a created prepayment order. The input set is
    /// signed on its own; nothing here touches the prepay parameters.
    pub fn get_jsapi_parameters(&self, prepay_id: &str) -> CustomResult<String, PaymentError> {
        let params = GatewayParams::new()
            .with_text("appId", self.auth.app_id.as_str())
            .with_text("timeStamp", chrono::Utc::now().timestamp().to_string())
            .with_text("nonceStr", self.nonce_provider.nonce(NONCE_LENGTH))
            .with_text("package", format!("prepay_id={prepay_id}"))
            .with_text("signType", SignType::Md5.to_string());
        let pay_sign =
            crypto::compute_sign(self.channel(), &params, &self.auth.api_key, SignType::Md5)?;
        let params = params.with_text("paySign", pay_sign);

        let object = params
            .iter()
            .map(|(key, value)| (key.to_string(), serde_json::Value::String(value.to_string())))
            .collect::<serde_json::Map<_, _>>();
        Ok(serde_json::Value::Object(object).to_string())
    }

    /// Decodes an inbound payment notification and checks its signature.
    /// Unlike responses, a notification without a valid `sign` is always
    /// rejected: the body arrives over the merchant's own endpoint and the
    /// digest is the only proof of origin.
    pub fn verify_notification(&self, body: &[u8]) -> CustomResult<GatewayParams, PaymentError> {
        let channel = self.channel();
        let params = utils::decode_xml(channel, body)?;
        if !crypto::verify_sign(channel, &params, &self.auth.api_key)? {
            return Err(report!(PaymentError::SignatureMismatch { channel }));
        }
        Ok(params)
    }

    async fn dispatch(
        &self,
        path: &str,
        params: &GatewayParams,
        with_certificate: bool,
    ) -> CustomResult<Response, PaymentError> {
        let channel = self.channel();
        let document = utils::encode_xml(params);
        let mut builder = RequestBuilder::new()
            .method(Method::Post)
            .url(&format!("{}{}", self.base_url, path))
            .set_body(RequestContent::Xml(document))
            .timeout(self.timeout);
        if with_certificate {
            builder = builder
                .add_certificate(self.certificate.clone())
                .add_certificate_key(self.certificate_key.clone())
                .add_ca_certificate_pem(self.ca_certificate.clone());
        }

        tracing::info!(%path, fields = params.len(), "dispatching gateway call");
        let outcome = call_gateway_api(&self.proxy, builder.build())
            .await
            .map_err(|error| {
                let reason = error.current_context().to_string();
                error.change_context(PaymentError::RequestFailed { channel, reason })
            })?;
        match outcome {
            Ok(response) => Ok(response),
            Err(response) => Err(report!(PaymentError::Http {
                channel,
                status_code: response.status_code,
                body: String::from_utf8_lossy(&response.response).into_owned(),
            })),
        }
    }

    /// Decodes a response body and, when the gateway signed it, checks the
    /// digest. Error documents legitimately arrive unsigned; a present but
    /// wrong signature is always fatal. Gateway-level `return_code` or
    /// `result_code` failure is data for the caller, never an error here.
    fn decode_and_verify(&self, body: &[u8]) -> CustomResult<GatewayParams, PaymentError> {
        let channel = self.channel();
        let params = utils::decode_xml(channel, body)?;
        if params.contains(crypto::SIGN_FIELD)
            && !crypto::verify_sign(channel, &params, &self.auth.api_key)?
        {
            return Err(report!(PaymentError::SignatureMismatch { channel }));
        }
        Ok(params)
    }
}

impl std::fmt::Debug for Wechatpay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wechatpay")
            .field("mch_id", &self.auth.mch_id)
            .field("app_id", &self.auth.app_id)
            .field("base_url", &self.base_url)
            .field("has_client_identity", &self.has_client_identity())
            .finish()
    }
}

use std::str::FromStr;
use std::time::Duration;

use bytes::Bytes;
use error_stack::{report, ResultExt};
use masking::PeekInterface;
use once_cell::sync::OnceCell;
use payment_types::errors::CustomResult;
use payment_types::types::Proxy;
use reqwest::Client;

use crate::request::{Headers, Method, Request, RequestContent};

/// Applied when a request does not carry its own timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum ApiClientError {
    #[error("Failed to parse the request URL")]
    UrlParsingFailed,
    #[error("Failed to construct the HTTP client")]
    ClientConstructionFailed,
    #[error("Invalid proxy configuration")]
    InvalidProxyConfiguration,
    #[error("Failed to decode the client certificate or key")]
    CertificateDecodeFailed,
    #[error("Failed to construct the header map")]
    HeaderMapConstructionFailed,
    #[error("Request timed out")]
    RequestTimeoutReceived,
    #[error("Failed to send the request: {0}")]
    RequestNotSent(String),
    #[error("Failed to read the response body")]
    ResponseDecodingFailed,
    #[error("Unexpected status from server")]
    UnexpectedServerResponse,
}

/// Raw response from the gateway. The body stays as bytes: bill downloads
/// legitimately return binary payloads.
#[derive(Debug, Clone)]
pub struct Response {
    pub headers: Option<reqwest::header::HeaderMap>,
    pub response: Bytes,
    pub status_code: u16,
}

/// Sends one request and buckets the outcome by status class: `Ok(Ok)` for
/// 2xx, `Ok(Err)` for an error status with a readable body, `Err` for
/// transport-level failure. No retries; the caller owns retry policy.
#[tracing::instrument(skip_all, fields(url = %request.url, method = %request.method))]
pub async fn call_gateway_api(
    proxy: &Proxy,
    request: Request,
) -> CustomResult<Result<Response, Response>, ApiClientError> {
    let url = reqwest::Url::parse(&request.url).change_context(ApiClientError::UrlParsingFailed)?;
    let should_bypass_proxy = proxy.bypass_proxy_urls.contains(&url.to_string());
    let timeout = request.timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT);

    let client = create_client(
        proxy,
        should_bypass_proxy,
        request.certificate.as_ref(),
        request.certificate_key.as_ref(),
        request.ca_certificate.as_ref(),
    )?;

    let headers = request.headers.construct_header_map()?;

    let request_builder = match request.method {
        Method::Get => client.get(url),
        Method::Post => {
            let builder = client.post(url);
            match request.body {
                Some(RequestContent::Xml(document)) => builder
                    .body(document)
                    .header(reqwest::header::CONTENT_TYPE, "text/xml"),
                Some(RequestContent::RawBytes(bytes)) => builder.body(bytes),
                None => builder,
            }
        }
    }
    .headers(headers)
    .timeout(timeout);

    let response = request_builder.send().await.map_err(|error| {
        let api_error = if error.is_timeout() {
            ApiClientError::RequestTimeoutReceived
        } else {
            ApiClientError::RequestNotSent(error.to_string())
        };
        tracing::error!(?api_error, "unable to send request to gateway");
        report!(api_error)
    })?;

    handle_response(response).await
}

async fn handle_response(
    response: reqwest::Response,
) -> CustomResult<Result<Response, Response>, ApiClientError> {
    let status_code = response.status().as_u16();
    let headers = Some(response.headers().to_owned());
    let body = response
        .bytes()
        .await
        .change_context(ApiClientError::ResponseDecodingFailed)?;
    let response = Response {
        headers,
        response: body,
        status_code,
    };
    match status_code {
        200..=299 => Ok(Ok(response)),
        300..=599 => Ok(Err(response)),
        _ => {
            tracing::error!(status_code, "unexpected status from gateway");
            Err(report!(ApiClientError::UnexpectedServerResponse))
        }
    }
}

static NON_PROXIED_CLIENT: OnceCell<Client> = OnceCell::new();
static PROXIED_CLIENT: OnceCell<Client> = OnceCell::new();

/// Returns a client for the request. Certificate-authenticated requests get
/// a dedicated client carrying the TLS identity; everything else shares one
/// of two cached base clients (proxied / non-proxied).
fn create_client(
    proxy_config: &Proxy,
    should_bypass_proxy: bool,
    client_certificate: Option<&masking::Secret<String>>,
    client_certificate_key: Option<&masking::Secret<String>>,
    ca_certificate: Option<&masking::Secret<String>>,
) -> CustomResult<Client, ApiClientError> {
    match (client_certificate, client_certificate_key) {
        (Some(certificate), Some(certificate_key)) => {
            let mut client_builder = get_client_builder(proxy_config, should_bypass_proxy)?;

            let identity =
                create_identity_from_certificate_and_key(certificate, certificate_key)?;
            if let Some(ca_certificate) = ca_certificate {
                for trust_anchor in create_certificates(ca_certificate)? {
                    client_builder = client_builder.add_root_certificate(trust_anchor);
                }
            }
            client_builder
                .identity(identity)
                .use_rustls_tls()
                .build()
                .change_context(ApiClientError::ClientConstructionFailed)
        }
        _ => get_base_client(proxy_config, should_bypass_proxy),
    }
}

fn get_base_client(
    proxy_config: &Proxy,
    should_bypass_proxy: bool,
) -> CustomResult<Client, ApiClientError> {
    Ok(if should_bypass_proxy
        || (proxy_config.http_url.is_none() && proxy_config.https_url.is_none())
    {
        &NON_PROXIED_CLIENT
    } else {
        &PROXIED_CLIENT
    }
    .get_or_try_init(|| {
        get_client_builder(proxy_config, should_bypass_proxy)?
            .build()
            .change_context(ApiClientError::ClientConstructionFailed)
    })?
    .clone())
}

fn get_client_builder(
    proxy_config: &Proxy,
    should_bypass_proxy: bool,
) -> CustomResult<reqwest::ClientBuilder, ApiClientError> {
    let mut client_builder = Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .pool_idle_timeout(Duration::from_secs(
            proxy_config
                .idle_pool_connection_timeout
                .unwrap_or_default(),
        ));

    if should_bypass_proxy {
        return Ok(client_builder);
    }

    if let Some(url) = proxy_config.https_url.as_ref() {
        client_builder = client_builder.proxy(
            reqwest::Proxy::https(url).change_context(ApiClientError::InvalidProxyConfiguration)?,
        );
    }

    if let Some(url) = proxy_config.http_url.as_ref() {
        client_builder = client_builder.proxy(
            reqwest::Proxy::http(url).change_context(ApiClientError::InvalidProxyConfiguration)?,
        );
    }

    Ok(client_builder)
}

/// Builds a TLS client identity from PEM text. The key and the certificate
/// are concatenated into one chain, key first.
pub fn create_identity_from_certificate_and_key(
    certificate: &masking::Secret<String>,
    certificate_key: &masking::Secret<String>,
) -> CustomResult<reqwest::Identity, ApiClientError> {
    let key_chain = format!("{}{}", certificate_key.peek(), certificate.peek());
    reqwest::Identity::from_pem(key_chain.as_bytes())
        .change_context(ApiClientError::CertificateDecodeFailed)
}

pub fn create_certificates(
    ca_certificate: &masking::Secret<String>,
) -> CustomResult<Vec<reqwest::Certificate>, ApiClientError> {
    reqwest::Certificate::from_pem_bundle(ca_certificate.peek().as_bytes())
        .change_context(ApiClientError::CertificateDecodeFailed)
}

pub(crate) trait HeaderExt {
    fn construct_header_map(self) -> CustomResult<reqwest::header::HeaderMap, ApiClientError>;
}

impl HeaderExt for Headers {
    fn construct_header_map(self) -> CustomResult<reqwest::header::HeaderMap, ApiClientError> {
        use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

        self.into_iter().try_fold(
            HeaderMap::new(),
            |mut header_map, (header_name, header_value)| {
                let header_name = HeaderName::from_str(&header_name)
                    .change_context(ApiClientError::HeaderMapConstructionFailed)?;
                let header_value = header_value.into_inner();
                let header_value = HeaderValue::from_str(&header_value)
                    .change_context(ApiClientError::HeaderMapConstructionFailed)?;
                header_map.append(header_name, header_value);
                Ok(header_map)
            },
        )
    }
}

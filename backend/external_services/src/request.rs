use std::time::Duration;

use masking::{Maskable, Secret};
use serde::{Deserialize, Serialize};

pub type Headers = std::collections::HashSet<(String, Maskable<String>)>;

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
pub enum Method {
    Get,
    Post,
}

/// Body of an outbound gateway request. The gateway speaks a pre-rendered
/// XML dialect, so the XML variant carries the finished document rather
/// than a serializable value.
pub enum RequestContent {
    Xml(String),
    RawBytes(Vec<u8>),
}

impl std::fmt::Debug for RequestContent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Xml(_) => "XmlRequestBody",
            Self::RawBytes(_) => "RawBytesRequestBody",
        })
    }
}

impl RequestContent {
    pub fn bytes(&self) -> Vec<u8> {
        match self {
            Self::Xml(document) => document.clone().into_bytes(),
            Self::RawBytes(bytes) => bytes.clone(),
        }
    }
}

/// One outbound request. Certificate material is PEM text handed in by the
/// caller; when present the transport authenticates with it as a TLS client
/// identity.
#[derive(Debug)]
pub struct Request {
    pub url: String,
    pub headers: Headers,
    pub method: Method,
    pub body: Option<RequestContent>,
    pub certificate: Option<Secret<String>>,
    pub certificate_key: Option<Secret<String>>,
    pub ca_certificate: Option<Secret<String>>,
    pub timeout: Option<Duration>,
}

#[derive(Debug)]
pub struct RequestBuilder {
    url: String,
    headers: Headers,
    method: Method,
    body: Option<RequestContent>,
    certificate: Option<Secret<String>>,
    certificate_key: Option<Secret<String>>,
    ca_certificate: Option<Secret<String>>,
    timeout: Option<Duration>,
}

impl RequestBuilder {
    pub fn new() -> Self {
        Self {
            url: String::with_capacity(1024),
            headers: std::collections::HashSet::new(),
            method: Method::Get,
            body: None,
            certificate: None,
            certificate_key: None,
            ca_certificate: None,
            timeout: None,
        }
    }

    pub fn url(mut self, url: &str) -> Self {
        self.url = url.into();
        self
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn header(mut self, header: &str, value: &str) -> Self {
        self.headers.insert((header.into(), value.into()));
        self
    }

    pub fn set_body(mut self, body: RequestContent) -> Self {
        self.body.replace(body);
        self
    }

    pub fn add_certificate(mut self, certificate: Option<Secret<String>>) -> Self {
        self.certificate = certificate;
        self
    }

    pub fn add_certificate_key(mut self, certificate_key: Option<Secret<String>>) -> Self {
        self.certificate_key = certificate_key;
        self
    }

    pub fn add_ca_certificate_pem(mut self, ca_certificate: Option<Secret<String>>) -> Self {
        self.ca_certificate = ca_certificate;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn build(self) -> Request {
        Request {
            url: self.url,
            headers: self.headers,
            method: self.method,
            body: self.body,
            certificate: self.certificate,
            certificate_key: self.certificate_key,
            ca_certificate: self.ca_certificate,
            timeout: self.timeout,
        }
    }
}

impl Default for RequestBuilder {
    fn default() -> Self {
        Self::new()
    }
}

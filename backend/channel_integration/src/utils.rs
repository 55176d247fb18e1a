use error_stack::report;
use payment_types::{Channel, CustomResult, FieldValue, GatewayParams, PaymentError};
use quick_xml::events::Event;
use quick_xml::Reader;
use rand::distributions::Alphanumeric;
use rand::Rng;

/// Length of the `nonce_str` the gateway expects.
pub const NONCE_LENGTH: usize = 32;

/// Source of request nonces. The production implementation draws from the
/// thread RNG; tests pin the value to make signatures reproducible.
pub trait NonceProvider: Send + Sync {
    fn nonce(&self, length: usize) -> String;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RandomNonce;

impl NonceProvider for RandomNonce {
    fn nonce(&self, length: usize) -> String {
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(length)
            .map(char::from)
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct FixedNonce(pub String);

impl NonceProvider for FixedNonce {
    fn nonce(&self, _length: usize) -> String {
        self.0.clone()
    }
}

/// Renders a parameter set as the gateway's XML dialect: a flat `<xml>`
/// document where text values are CDATA-wrapped and numeric values are
/// emitted bare. Fields appear in the set's key-sorted order.
pub fn encode_xml(params: &GatewayParams) -> String {
    let mut document = String::from("<xml>");
    for (key, value) in params.iter() {
        match value {
            FieldValue::Number(number) => {
                document.push_str(&format!("<{key}>{number}</{key}>"));
            }
            FieldValue::Text(text) => {
                document.push_str(&format!("<{key}><![CDATA[{}]]></{key}>", escape_cdata(text)));
            }
        }
    }
    document.push_str("</xml>");
    document
}

// A literal "]]>" inside a value would terminate the section early; split
// it across two sections.
fn escape_cdata(value: &str) -> String {
    value.replace("]]>", "]]]]><![CDATA[>")
}

/// Parses a gateway XML document into a flat parameter set. Every value
/// comes back as text; numeric getters on the set parse on read. Entities
/// are never resolved against external definitions, so hostile documents
/// cannot reach the filesystem or network through the parser.
pub fn decode_xml(channel: Channel, body: &[u8]) -> CustomResult<GatewayParams, PaymentError> {
    let malformed = || report!(PaymentError::MalformedResponse { channel });
    if body.is_empty() {
        return Err(malformed());
    }

    let mut reader = Reader::from_reader(body);
    let mut buf = Vec::new();
    let mut params = GatewayParams::new();
    let mut depth = 0usize;
    let mut seen_root = false;
    let mut field: Option<String> = None;
    let mut value = String::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(start)) => {
                depth += 1;
                match depth {
                    1 => seen_root = true,
                    2 => {
                        field = Some(String::from_utf8_lossy(start.name().as_ref()).into_owned());
                        value.clear();
                    }
                    _ => {}
                }
            }
            Ok(Event::Empty(start)) => {
                if depth == 1 {
                    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
                    params.insert_text(name, "");
                }
            }
            Ok(Event::Text(text)) if depth == 2 => {
                value.push_str(text.unescape().map_err(|_| malformed())?.as_ref());
            }
            Ok(Event::CData(cdata)) if depth == 2 => {
                value.push_str(&String::from_utf8_lossy(&cdata.into_inner()));
            }
            Ok(Event::End(_)) => {
                if depth == 2 {
                    if let Some(name) = field.take() {
                        params.insert_text(name, std::mem::take(&mut value));
                    }
                }
                depth = depth.saturating_sub(1);
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(_) => return Err(malformed()),
        }
        buf.clear();
    }

    if !seen_root || depth != 0 {
        return Err(malformed());
    }
    Ok(params)
}

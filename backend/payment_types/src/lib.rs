pub mod crypto;
pub mod errors;
pub mod params;
pub mod types;

pub use errors::{CustomResult, PaymentError};
pub use params::{FieldValue, GatewayParams};
pub use types::{Channel, FeeType, MerchantAuth, Proxy, TradeType};

pub mod channels;
pub mod utils;

pub use channels::wechatpay::Wechatpay;

pub mod wechatpay;

pub use self::wechatpay::Wechatpay;

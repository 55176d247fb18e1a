pub mod request;
pub mod service;

pub use service::*;

//! Request keys.
//!
//! A logical request (method, path template, parameters) is encoded once
//! into a [`CacheKey`]; every other component works with keys only.

mod cache_key;
mod encoder;
mod params;

pub use cache_key::CacheKey;
pub use encoder::KeyEncoder;
pub use params::RequestParams;

#![allow(dead_code)]
use syncache_core::{CacheKey, KeyEncoder, Method, RequestParams};

/// Encodes a GET with the given query pairs, panicking on invalid shapes
/// (intended for tests).
pub fn get_key(path: &str, query: &[(&str, &str)]) -> CacheKey {
    let params = query
        .iter()
        .fold(RequestParams::new(), |params, (name, value)| {
            params.query(*name, *value)
        });
    KeyEncoder::new()
        .encode(Method::Get, path, &params)
        .expect("Failed to encode test key")
}

/// Returns every permutation of `items` (small inputs only).
pub fn permutations<T: Clone>(items: &[T]) -> Vec<Vec<T>> {
    if items.len() <= 1 {
        return vec![items.to_vec()];
    }

    let mut out = Vec::new();
    for i in 0..items.len() {
        let mut rest = items.to_vec();
        let head = rest.remove(i);
        for mut tail in permutations(&rest) {
            tail.insert(0, head.clone());
            out.push(tail);
        }
    }
    out
}

//! Reserved paths, marker headers and hop-by-hop header handling.
//!
//! Header names are built with `from_static` so call sites never parse at
//! runtime.

use hyper::header::HeaderName;
use hyper::HeaderMap;
use rand::Rng;

/// Internal liveness endpoint. Never forwarded, never captured.
pub const LIVENESS_PATH: &str = "/__lrok_health";

/// Marks readiness warm-up traffic. Only a value equal to the instance's
/// warm-up token suppresses capture. Never relayed to the target.
pub static X_LROK_WARMUP: HeaderName = HeaderName::from_static("x-lrok-warmup");

/// Connection-scoped headers an HTTP/1.1 intermediary must not relay.
static HOP_BY_HOP: [HeaderName; 9] = [
    HeaderName::from_static("connection"),
    HeaderName::from_static("keep-alive"),
    HeaderName::from_static("proxy-connection"),
    HeaderName::from_static("proxy-authenticate"),
    HeaderName::from_static("proxy-authorization"),
    HeaderName::from_static("te"),
    HeaderName::from_static("trailer"),
    HeaderName::from_static("transfer-encoding"),
    HeaderName::from_static("upgrade"),
];

pub fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.iter().any(|hop| hop == name)
}

/// Copy `headers`, leaving out hop-by-hop headers, the warm-up marker and any
/// header the `Connection` header nominates.
pub fn end_to_end_headers(headers: &HeaderMap) -> HeaderMap {
    let nominated: Vec<String> = headers
        .get_all(hyper::header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(|token| token.trim().to_ascii_lowercase())
        .filter(|token| !token.is_empty())
        .collect();

    let mut relayed = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers.iter() {
        if is_hop_by_hop(name)
            || *name == X_LROK_WARMUP
            || nominated.iter().any(|n| n == name.as_str())
        {
            continue;
        }
        relayed.append(name.clone(), value.clone());
    }
    relayed
}

/// Random per-instance value for the warm-up marker.
pub fn generate_warmup_token() -> String {
    let mut rng = rand::thread_rng();
    format!("{:016x}{:016x}", rng.gen::<u64>(), rng.gen::<u64>())
}

/// True when the request carries the warm-up marker set to `token`.
pub fn is_warmup(headers: &HeaderMap, token: &str) -> bool {
    headers
        .get(&X_LROK_WARMUP)
        .is_some_and(|v| v.as_bytes() == token.as_bytes())
}

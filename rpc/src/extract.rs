//! Pulling the caller's identity and signals out of an HTTP request.
//!
//! Authentication happens upstream; an authenticated user arrives as the
//! `X-User-Id` header. Everyone else is an anonymous voter keyed by a digest
//! of network and device signals.

use std::net::SocketAddr;

use axum::http::{header, HeaderMap};
use provote_fraud::RequestSignals;
use provote_types::digest::blake2b_256_hex;
use provote_types::{IdempotencyKey, VoterIdentity};

use crate::RpcError;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const FINGERPRINT_HEADER: &str = "x-fingerprint";
pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

/// Headers that make up a derived device fingerprint, in hashing order.
const FINGERPRINT_SOURCES: [&str; 6] = [
    "user-agent",
    "accept-language",
    "accept-encoding",
    "accept",
    "connection",
    "dnt",
];

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Client IP: first `X-Forwarded-For` hop, then `X-Real-IP`, then the peer.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    if let Some(first) = header_str(headers, "x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return first.to_string();
    }
    if let Some(real) = header_str(headers, "x-real-ip") {
        return real.to_string();
    }
    peer.map(|p| p.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

pub fn user_agent(headers: &HeaderMap) -> Option<String> {
    header_str(headers, header::USER_AGENT.as_str()).map(str::to_string)
}

/// Digest of the browser headers, for clients that send no fingerprint.
pub fn derived_fingerprint(headers: &HeaderMap) -> String {
    let values: Vec<&[u8]> = FINGERPRINT_SOURCES
        .iter()
        .map(|name| header_str(headers, name).unwrap_or_default().as_bytes())
        .collect();
    blake2b_256_hex(&values)
}

/// Signals gathered from one request.
#[derive(Clone, Debug, PartialEq)]
pub struct ClientContext {
    pub ip: String,
    /// Explicit fingerprint or client token if sent, otherwise derived.
    pub fingerprint: String,
    pub signals: RequestSignals,
}

impl ClientContext {
    pub fn from_request(
        headers: &HeaderMap,
        peer: Option<SocketAddr>,
        client_token: Option<&str>,
    ) -> Self {
        let explicit = header_str(headers, FINGERPRINT_HEADER)
            .or(client_token.map(str::trim).filter(|t| !t.is_empty()))
            .map(str::to_string);
        let signals = RequestSignals {
            user_agent: user_agent(headers),
            has_client_signals: explicit.is_some(),
        };
        Self {
            ip: client_ip(headers, peer),
            fingerprint: explicit.unwrap_or_else(|| derived_fingerprint(headers)),
            signals,
        }
    }

    /// The authenticated user, or an anonymous token over IP, user agent
    /// and fingerprint.
    pub fn voter(&self, headers: &HeaderMap) -> Result<VoterIdentity, RpcError> {
        match header_str(headers, USER_ID_HEADER) {
            Some(raw) => raw
                .parse::<u64>()
                .map(VoterIdentity::User)
                .map_err(|_| RpcError::BadRequest(format!("invalid {USER_ID_HEADER}: {raw}"))),
            None => Ok(VoterIdentity::anonymous(
                Some(&self.ip),
                self.signals.user_agent.as_deref(),
                Some(&self.fingerprint),
            )),
        }
    }
}

/// The `Idempotency-Key` header wins over the body field.
pub fn idempotency_key(
    headers: &HeaderMap,
    body_key: Option<&str>,
) -> Result<Option<IdempotencyKey>, RpcError> {
    let raw = header_str(headers, IDEMPOTENCY_KEY_HEADER).or(body_key);
    raw.map(IdempotencyKey::parse)
        .transpose()
        .map_err(|e| RpcError::BadRequest(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn forwarded_for_first_hop_wins() {
        let h = headers(&[
            ("x-forwarded-for", "198.51.100.1, 10.0.0.1"),
            ("x-real-ip", "10.0.0.2"),
        ]);
        let peer: SocketAddr = "127.0.0.1:5000".parse().unwrap();
        assert_eq!(client_ip(&h, Some(peer)), "198.51.100.1");
    }

    #[test]
    fn falls_back_to_real_ip_then_peer() {
        let peer: SocketAddr = "127.0.0.1:5000".parse().unwrap();
        assert_eq!(
            client_ip(&headers(&[("x-real-ip", "10.0.0.2")]), Some(peer)),
            "10.0.0.2"
        );
        assert_eq!(client_ip(&HeaderMap::new(), Some(peer)), "127.0.0.1");
        assert_eq!(client_ip(&HeaderMap::new(), None), "unknown");
    }

    #[test]
    fn derived_fingerprint_tracks_browser_headers() {
        let a = headers(&[("user-agent", "Mozilla/5.0"), ("accept-language", "en")]);
        let b = headers(&[("user-agent", "Mozilla/5.0"), ("accept-language", "fr")]);
        let a_again = headers(&[("accept-language", "en"), ("user-agent", "Mozilla/5.0")]);
        assert_eq!(derived_fingerprint(&a), derived_fingerprint(&a_again));
        assert_ne!(derived_fingerprint(&a), derived_fingerprint(&b));
        assert_eq!(derived_fingerprint(&a).len(), 64);
    }

    #[test]
    fn explicit_fingerprint_counts_as_client_signal() {
        let h = headers(&[("x-fingerprint", "fp-1"), ("user-agent", "Mozilla/5.0")]);
        let ctx = ClientContext::from_request(&h, None, None);
        assert_eq!(ctx.fingerprint, "fp-1");
        assert!(ctx.signals.has_client_signals);

        let bare = ClientContext::from_request(&HeaderMap::new(), None, None);
        assert!(!bare.signals.has_client_signals);
        assert_eq!(bare.fingerprint.len(), 64);
    }

    #[test]
    fn authenticated_user_header_overrides_anonymous_identity() {
        let h = headers(&[("x-user-id", "42")]);
        let ctx = ClientContext::from_request(&h, None, None);
        assert_eq!(ctx.voter(&h).unwrap(), VoterIdentity::User(42));

        let bad = headers(&[("x-user-id", "alice")]);
        assert!(ctx.voter(&bad).is_err());

        let anon = ctx.voter(&HeaderMap::new()).unwrap();
        assert!(anon.is_anonymous());
    }

    #[test]
    fn header_key_beats_body_key() {
        let h = headers(&[("idempotency-key", "from-header")]);
        let key = idempotency_key(&h, Some("from-body")).unwrap().unwrap();
        assert_eq!(key.as_str(), "from-header");

        let key = idempotency_key(&HeaderMap::new(), Some("from-body"))
            .unwrap()
            .unwrap();
        assert_eq!(key.as_str(), "from-body");

        assert!(idempotency_key(&HeaderMap::new(), None).unwrap().is_none());
        assert!(idempotency_key(&HeaderMap::new(), Some("has space")).is_err());
    }
}

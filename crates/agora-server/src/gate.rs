use std::net::{IpAddr, SocketAddr};

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::warn;

use agora_shared::types::NetworkIdentity;

use crate::api::AppState;
use crate::error::ApiError;

/// Network identity of the caller, resolved once per request by
/// [`block_gate`] and read by handlers as an extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity(pub NetworkIdentity);

/// Reject requests from blocked identities before any handler runs.
pub async fn block_gate(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let identity = extract_client_ip(&req, state.config.trust_proxy_headers)
        .map(NetworkIdentity::from_ip)
        .unwrap_or_else(NetworkIdentity::unknown);

    match state.with_db(|db| db.is_blocked(&identity)).await {
        Ok(false) => {}
        Ok(true) => {
            warn!(identity = %identity, path = %req.uri().path(), "Blocked identity rejected");
            return ApiError::AccessDenied.into_response();
        }
        Err(e) => return e.into_response(),
    }

    req.extensions_mut().insert(ClientIdentity(identity));
    next.run(req).await
}

/// Behind a trusted proxy the forwarding headers win; otherwise the socket
/// peer does, and the headers are only consulted when no peer address is
/// attached to the request.
fn extract_client_ip<B>(req: &axum::http::Request<B>, trust_proxy_headers: bool) -> Option<IpAddr> {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());

    if trust_proxy_headers {
        forwarded_ip(req).or(peer)
    } else {
        peer.or_else(|| forwarded_ip(req))
    }
}

/// X-Forwarded-For (first hop), then X-Real-IP.
fn forwarded_ip<B>(req: &axum::http::Request<B>) -> Option<IpAddr> {
    if let Some(forwarded) = req.headers().get("x-forwarded-for") {
        if let Ok(value) = forwarded.to_str() {
            if let Some(first) = value.split(',').next() {
                if let Ok(ip) = first.trim().parse::<IpAddr>() {
                    return Some(ip);
                }
            }
        }
    }

    if let Some(real_ip) = req.headers().get("x-real-ip") {
        if let Ok(value) = real_ip.to_str() {
            if let Ok(ip) = value.trim().parse::<IpAddr>() {
                return Some(ip);
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    use crate::api::tests::{call, harness, ADMIN_PASSWORD};

    fn request(headers: &[(&str, &str)], peer: Option<&str>) -> axum::http::Request<Body> {
        let mut builder = axum::http::Request::builder().uri("/health");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let mut req = builder.body(Body::empty()).unwrap();
        if let Some(peer) = peer {
            req.extensions_mut()
                .insert(ConnectInfo(peer.parse::<SocketAddr>().unwrap()));
        }
        req
    }

    #[test]
    fn test_untrusted_prefers_peer() {
        let req = request(&[("x-forwarded-for", "1.1.1.1")], Some("10.0.0.5:4000"));
        assert_eq!(
            extract_client_ip(&req, false),
            Some("10.0.0.5".parse().unwrap())
        );
    }

    #[test]
    fn test_trusted_prefers_headers() {
        let req = request(
            &[("x-forwarded-for", "203.0.113.9, 10.0.0.1")],
            Some("10.0.0.5:4000"),
        );
        assert_eq!(
            extract_client_ip(&req, true),
            Some("203.0.113.9".parse().unwrap())
        );

        let req = request(&[("x-real-ip", "198.51.100.2")], None);
        assert_eq!(
            extract_client_ip(&req, true),
            Some("198.51.100.2".parse().unwrap())
        );
    }

    #[test]
    fn test_garbage_headers_ignored() {
        let req = request(&[("x-forwarded-for", "not-an-ip")], None);
        assert_eq!(extract_client_ip(&req, true), None);
    }

    #[tokio::test]
    async fn test_blocked_identity_rejected_everywhere() {
        let h = harness();
        let admin = h
            .state
            .with_db(|db| db.find_user_by_username("admin"))
            .await
            .unwrap()
            .unwrap();
        h.state
            .with_db(|db| {
                db.block_identity(&NetworkIdentity::new("192.0.2.66"), "test", admin.id)
            })
            .await
            .unwrap();

        for (method, uri) in [
            (Method::GET, "/health"),
            (Method::GET, "/messages"),
            (Method::GET, "/does-not-exist"),
        ] {
            let (status, body) = call(&h.router, method, uri, "192.0.2.66", None, None).await;
            assert_eq!(status, StatusCode::FORBIDDEN);
            assert_eq!(body, json!({"success": false, "error": "ACCESS_DENIED"}));
        }

        let (status, _) = call(&h.router, Method::GET, "/health", "192.0.2.67", None, None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_mapped_address_matches_ipv4_block() {
        let h = harness();
        let (status, body) = call(
            &h.router,
            Method::POST,
            "/block-ip",
            "198.51.100.1",
            None,
            Some(json!({"ip": "192.0.2.10", "reason": "spam", "adminPassword": ADMIN_PASSWORD})),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{body}");

        for from in ["192.0.2.10", "::ffff:192.0.2.10"] {
            let (status, body) = call(
                &h.router,
                Method::POST,
                "/send-message",
                from,
                None,
                Some(json!({"name": "Mallory", "message": "still here"})),
            )
            .await;
            assert_eq!(status, StatusCode::FORBIDDEN, "{from}");
            assert_eq!(body, json!({"success": false, "error": "ACCESS_DENIED"}));
        }
    }

    #[test]
    fn test_mapped_peer_is_canonical() {
        let req = request(&[], Some("[::ffff:192.0.2.10]:4000"));
        let ip = extract_client_ip(&req, false).unwrap();
        assert_eq!(NetworkIdentity::from_ip(ip).as_str(), "192.0.2.10");
    }
}

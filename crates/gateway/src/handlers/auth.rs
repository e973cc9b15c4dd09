//! Login handler with per-source lockout

use crate::AppState;
use axum::{
    extract::{ConnectInfo, FromRequestParts, State},
    http::{request::Parts, HeaderMap},
    Json,
};
use invoiceflow_common::{
    auth::{verify_password, Actor, Role},
    errors::{AppError, Result},
    metrics,
};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};
use std::time::Instant;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1, max = 150))]
    pub username: String,

    #[validate(length(min = 1, max = 1024))]
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
    pub username: String,
    pub role: Role,
}

/// Caller address used as the lockout key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIp(pub String);

impl ClientIp {
    /// Key a request that arrived from `peer`.
    ///
    /// Forwarding headers are read only when `peer` is a trusted proxy, and
    /// then the right-most `X-Forwarded-For` hop that is not itself a trusted
    /// proxy wins. Anything else is keyed by the socket address.
    pub fn resolve(peer: Option<IpAddr>, headers: &HeaderMap, trusted_proxies: &[IpAddr]) -> Self {
        let forwarded = peer
            .filter(|ip| trusted_proxies.contains(ip))
            .and_then(|_| Self::from_headers(headers, trusted_proxies));

        let ip = forwarded
            .or(peer)
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        ClientIp(ip)
    }

    fn from_headers(headers: &HeaderMap, trusted_proxies: &[IpAddr]) -> Option<IpAddr> {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| {
                v.rsplit(',')
                    .filter_map(|hop| hop.trim().parse::<IpAddr>().ok())
                    .find(|ip| !trusted_proxies.contains(ip))
            });

        forwarded.or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse().ok())
        })
    }
}

impl FromRequestParts<AppState> for ClientIp {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> std::result::Result<Self, Infallible> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());

        Ok(Self::resolve(
            peer,
            &parts.headers,
            &state.config.login_throttle.trusted_proxies,
        ))
    }
}

/// Exchange credentials for a bearer token
pub async fn login(
    State(state): State<AppState>,
    ClientIp(source): ClientIp,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginResponse>> {
    request.validate()?;

    let limiter = &state.login_limiter;
    if let Some(until) = limiter.lockout_expiry(&source) {
        metrics::record_login("locked_out");
        return Err(AppError::LockedOut {
            retry_after_secs: until.saturating_duration_since(Instant::now()).as_secs().max(1),
        });
    }

    let user = state.repo.find_user_by_username(&request.username).await?;
    let authenticated = user
        .filter(|u| u.is_active && verify_password(&request.password, &u.password_hash));

    let Some(user) = authenticated else {
        let remaining = limiter.record_failed_attempt(&source);
        metrics::record_login("failure");
        tracing::warn!(source = %source, username = %request.username, remaining, "Failed login");

        if remaining == 0 {
            let retry_after_secs = limiter
                .lockout_expiry(&source)
                .map(|until| until.saturating_duration_since(Instant::now()).as_secs())
                .unwrap_or(state.config.login_throttle.lockout_secs)
                .max(1);
            return Err(AppError::LockedOut { retry_after_secs });
        }
        return Err(AppError::InvalidCredentials {
            remaining_attempts: remaining,
        });
    };

    limiter.record_successful_attempt(&source);
    metrics::record_login("success");

    let actor = Actor::new(user.id, user.username.clone(), user.role);
    let access_token = state.jwt.generate_token(&actor)?;
    tracing::info!(user_id = user.id, role = %user.role, "User logged in");

    Ok(Json(LoginResponse {
        access_token,
        token_type: "Bearer",
        expires_in: state.jwt.expiration_secs(),
        username: user.username,
        role: user.role,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use invoiceflow_common::rate_limit::AttemptLimiter;
    use std::time::Duration;

    const PROXY: [u8; 4] = [10, 0, 0, 1];

    fn forwarded_for(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_untrusted_peer_ignores_forwarding_headers() {
        let peer = Some(IpAddr::from([198, 51, 100, 7]));
        let mut headers = forwarded_for("203.0.113.4");
        headers.insert("x-real-ip", HeaderValue::from_static("203.0.113.5"));

        assert_eq!(ClientIp::resolve(peer, &headers, &[]).0, "198.51.100.7");
        assert_eq!(
            ClientIp::resolve(peer, &headers, &[IpAddr::from(PROXY)]).0,
            "198.51.100.7"
        );
    }

    #[test]
    fn test_trusted_proxy_uses_rightmost_untrusted_hop() {
        let trusted = [IpAddr::from(PROXY), IpAddr::from([10, 0, 0, 2])];
        let peer = Some(IpAddr::from(PROXY));

        // client-supplied left-most value is not believed
        let headers = forwarded_for("1.2.3.4, 203.0.113.4, 10.0.0.2");
        assert_eq!(ClientIp::resolve(peer, &headers, &trusted).0, "203.0.113.4");

        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static(" 203.0.113.9 "));
        assert_eq!(ClientIp::resolve(peer, &headers, &trusted).0, "203.0.113.9");

        assert_eq!(ClientIp::resolve(peer, &HeaderMap::new(), &trusted).0, "10.0.0.1");
        assert_eq!(ClientIp::resolve(None, &HeaderMap::new(), &trusted).0, "unknown");
    }

    #[test]
    fn test_rotating_forwarded_for_still_locks_out() {
        let limiter = AttemptLimiter::new(3, Duration::from_secs(900), Duration::from_secs(900));
        let peer = Some(IpAddr::from([198, 51, 100, 7]));

        let mut locked_checks = 0;
        for i in 0..20 {
            let headers = forwarded_for(&format!("203.0.113.{}", i));
            let ClientIp(source) = ClientIp::resolve(peer, &headers, &[]);
            if limiter.is_locked_out(&source) {
                locked_checks += 1;
                continue;
            }
            limiter.record_failed_attempt(&source);
        }

        assert_eq!(limiter.tracked_sources(), 1);
        assert_eq!(locked_checks, 17);
    }

    #[test]
    fn test_login_request_validation() {
        let request = LoginRequest {
            username: String::new(),
            password: "x".to_string(),
        };
        assert!(request.validate().is_err());
    }
}

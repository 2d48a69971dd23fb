//! Session authentication and rate limiting middleware.

use axum::{
    body::Body,
    extract::State,
    http::{header::AUTHORIZATION, HeaderMap, Request, StatusCode},
    middleware::Next,
    response::Response,
};
use std::{
    collections::HashMap,
    net::{IpAddr, Ipv4Addr},
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use super::{ApiError, AppState};
use crate::config::env_u64;

/// Security configuration loaded from environment variables.
#[derive(Clone, Debug)]
pub struct SecurityConfig {
    /// Allowed CORS origins (from TASKFOREST_CORS_ORIGINS, comma-separated)
    pub cors_origins: Option<Vec<String>>,
    /// Rate limiter instance (from TASKFOREST_RATE_LIMIT, requests per minute)
    pub rate_limiter: Option<RateLimiter>,
}

impl SecurityConfig {
    /// Load security configuration from environment variables.
    pub fn from_env() -> Self {
        let cors_origins = std::env::var("TASKFOREST_CORS_ORIGINS")
            .ok()
            .map(|s| s.split(',').map(|s| s.trim().to_string()).collect());

        let rate_limiter = rate_limit_from(env_u64("TASKFOREST_RATE_LIMIT"))
            .map(|limit| RateLimiter::new(limit, Duration::from_secs(60)));

        Self {
            cors_origins,
            rate_limiter,
        }
    }

    /// Create a config with CORS restrictions and rate limiting turned off.
    pub fn disabled() -> Self {
        Self {
            cors_origins: None,
            rate_limiter: None,
        }
    }

    /// Create a config with specific CORS origins.
    pub fn with_cors_origins(origins: Vec<String>) -> Self {
        Self {
            cors_origins: Some(origins),
            rate_limiter: None,
        }
    }

    /// Create a config with rate limiting enabled.
    pub fn with_rate_limit(max_requests: u32) -> Self {
        Self {
            cors_origins: None,
            rate_limiter: Some(RateLimiter::new(max_requests, Duration::from_secs(60))),
        }
    }
}

/// A usable per-minute request limit. Zero and values beyond `u32` are ignored.
fn rate_limit_from(configured: Option<u64>) -> Option<u32> {
    let limit = configured?;
    match u32::try_from(limit) {
        Ok(limit) if limit > 0 => Some(limit),
        _ => {
            tracing::warn!(limit, "Ignoring invalid TASKFOREST_RATE_LIMIT, rate limiting disabled");
            None
        }
    }
}

/// Simple in-memory rate limiter using sliding window.
#[derive(Clone, Debug)]
pub struct RateLimiter {
    /// Maximum requests allowed per window
    max_requests: u32,
    /// Time window duration
    window: Duration,
    /// Request timestamps per IP
    requests: Arc<Mutex<HashMap<IpAddr, Vec<Instant>>>>,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            requests: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Check if a request from the given IP is allowed.
    /// Returns true if allowed, false if rate limited.
    pub fn check(&self, ip: IpAddr) -> bool {
        let now = Instant::now();
        let cutoff = now.checked_sub(self.window);

        let mut requests = self.requests.lock().expect("rate limiter lock poisoned");
        let entry = requests.entry(ip).or_default();

        if let Some(cutoff) = cutoff {
            entry.retain(|&t| t > cutoff);
        }

        if entry.len() < self.max_requests as usize {
            entry.push(now);
            true
        } else {
            false
        }
    }

    /// Drop IPs with no requests inside the window. Run periodically.
    pub fn cleanup(&self) {
        let Some(cutoff) = Instant::now().checked_sub(self.window) else {
            return;
        };
        let mut requests = self.requests.lock().expect("rate limiter lock poisoned");

        requests.retain(|_, timestamps| {
            timestamps.retain(|&t| t > cutoff);
            !timestamps.is_empty()
        });
    }

    #[cfg(test)]
    fn tracked_ips(&self) -> usize {
        self.requests
            .lock()
            .expect("rate limiter lock poisoned")
            .len()
    }
}

/// Require a valid access token and attach the [`Caller`](crate::models::Caller)
/// to the request extensions.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(token) = bearer_token(request.headers()) else {
        tracing::debug!("Missing or malformed Authorization header");
        return Err(ApiError::Unauthorized);
    };

    let caller = state.sessions.authenticate(&token)?;
    request.extensions_mut().insert(caller);
    Ok(next.run(request).await)
}

/// Rate limiting middleware.
pub async fn rate_limit_middleware(
    State(rate_limiter): State<RateLimiter>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let ip = extract_client_ip(&request);

    if rate_limiter.check(ip) {
        Ok(next.run(request).await)
    } else {
        tracing::warn!(%ip, "Rate limit exceeded");
        Err(StatusCode::TOO_MANY_REQUESTS)
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?.trim();
    (!token.is_empty()).then(|| token.to_string())
}

/// Extract client IP from request.
fn extract_client_ip(request: &Request<Body>) -> IpAddr {
    // Try X-Forwarded-For header first (for proxied requests)
    if let Some(forwarded) = request.headers().get("X-Forwarded-For") {
        if let Ok(value) = forwarded.to_str() {
            if let Some(ip_str) = value.split(',').next() {
                if let Ok(ip) = ip_str.trim().parse() {
                    return ip;
                }
            }
        }
    }

    if let Some(real_ip) = request.headers().get("X-Real-IP") {
        if let Ok(value) = real_ip.to_str() {
            if let Ok(ip) = value.trim().parse() {
                return ip;
            }
        }
    }

    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

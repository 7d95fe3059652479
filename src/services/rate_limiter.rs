// src/services/rate_limiter.rs
use crate::errors::VigilError;
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use log::warn;
use std::net::{IpAddr, Ipv4Addr};
use std::num::NonZeroU32;

const MAX_TRACKED_CLIENTS: usize = 10_000;

/// Per-client-address quota for the analyze route.
pub struct RequestGate {
    limiter: Option<DefaultKeyedRateLimiter<IpAddr>>,
}

impl RequestGate {
    /// `per_minute == 0` disables the gate.
    pub fn per_minute(per_minute: u32) -> Self {
        Self {
            limiter: NonZeroU32::new(per_minute)
                .map(|n| RateLimiter::keyed(Quota::per_minute(n))),
        }
    }

    pub fn check(&self, client: Option<IpAddr>) -> Result<(), VigilError> {
        let Some(limiter) = &self.limiter else {
            return Ok(());
        };
        if limiter.len() > MAX_TRACKED_CLIENTS {
            limiter.retain_recent();
        }

        let client = client.unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        limiter.check_key(&client).map_err(|_| {
            warn!("Rate limit exceeded for {}", client);
            VigilError::TooManyRequests
        })
    }
}

//! Cached `Date` header values.
//!
//! Formatting an RFC 7231 date on every response is wasted work when the value
//! only changes once a second. The service keeps the last formatted value with
//! the instant it was made and swaps in a fresh one when it is stale. Readers
//! never block one another.

use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use bytes::Bytes;
use http::HeaderValue;
use once_cell::sync::Lazy;

const REFRESH_INTERVAL: Duration = Duration::from_secs(1);

static DATE_SERVICE: Lazy<DateService> = Lazy::new(|| DateService::with_refresh_interval(REFRESH_INTERVAL));

#[derive(Debug)]
pub struct DateService {
    current: ArcSwap<(Instant, HeaderValue)>,
    refresh_interval: Duration,
}

impl DateService {
    /// The process wide instance.
    pub fn global() -> &'static DateService {
        &DATE_SERVICE
    }

    pub fn with_refresh_interval(refresh_interval: Duration) -> Self {
        Self { current: ArcSwap::from_pointee((Instant::now(), format_now())), refresh_interval }
    }

    /// The current date, formatted for a `Date` header.
    pub fn http_date(&self) -> HeaderValue {
        let current = self.current.load();
        if current.0.elapsed() < self.refresh_interval {
            return current.1.clone();
        }

        let value = format_now();
        // racing refreshers store equivalent values, any of them may win
        self.current.store(Arc::new((Instant::now(), value.clone())));
        value
    }
}

/// Shorthand for `DateService::global().http_date()`.
pub fn http_date() -> HeaderValue {
    DateService::global().http_date()
}

fn format_now() -> HeaderValue {
    let mut buf = faf_http_date::get_date_buff_no_key();
    faf_http_date::get_date_no_key(&mut buf);
    HeaderValue::from_maybe_shared(Bytes::from_owner(buf)).unwrap_or_else(|_| HeaderValue::from_static("Thu, 01 Jan 1970 00:00:00 GMT"))
}

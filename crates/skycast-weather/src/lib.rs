//! Weather lookups for skycast
//!
//! Geocoding, current weather, forecasts and local time from the Open-Meteo
//! APIs, behind a per-resource TTL cache, one shared sliding-window rate
//! limiter and a retrying fetcher.

pub mod cache;
pub mod fetch;
pub mod forecast;
pub mod geocode;
pub mod lookup;
pub mod outcome;
pub mod rate_limit;
pub mod retry;
pub mod service;
pub mod suggest;
pub mod timezone;
pub mod tools;
pub mod types;

#[cfg(test)]
mod test_support;

pub use cache::TtlCache;
pub use fetch::{ApiRequest, FetchError, HttpResponse, HttpTransport, ResilientFetcher, Transport};
pub use lookup::{CacheKey, Lookup, ResourceKind, StatsSnapshot};
pub use outcome::LookupOutcome;
pub use rate_limit::RateLimiter;
pub use retry::RetryPolicy;
pub use service::WeatherService;
pub use tools::{ErrorKind, ToolReply, ToolRequest, ToolResponse, WeatherTools};
pub use types::*;

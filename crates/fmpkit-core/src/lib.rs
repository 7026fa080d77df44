//! # fmpkit Core
//!
//! Request orchestration core for the Financial Modeling Prep REST API.
//!
//! ## Overview
//!
//! Every logical call goes through the same pipeline:
//!
//! - **Quota admission** against daily, per-minute and per-second windows
//! - **Parameter validation** and URL construction from an endpoint descriptor
//! - **Classification** of the raw HTTP response into a payload or a typed error
//! - **Retry** with backoff for transient failures and tracker-driven waits for rate limits
//! - **Mapping** of the payload into typed records
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`classifier`] | HTTP status and body classification |
//! | [`client`] | Request executor ([`FmpClient`]) |
//! | [`config`] | Client configuration and `FMP_*` environment loading |
//! | [`endpoint`] | Endpoint descriptors and parameter validation |
//! | [`error`] | Error taxonomy |
//! | [`http_client`] | Transport abstraction and reqwest implementations |
//! | [`logging`] | Optional `tracing` subscriber setup |
//! | [`mapper`] | Payload to record mapping |
//! | [`quota`] | Sliding-window quota tracker |
//! | [`retry`] | Backoff policy and retry state machine |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use fmpkit_core::{
//!     ApiVersion, ClientConfig, Endpoint, EndpointParam, FmpClient, ParamType, Params,
//!     ResponseShape,
//! };
//! use serde::Deserialize;
//!
//! #[derive(Debug, Deserialize)]
//! struct Quote {
//!     symbol: String,
//!     price: f64,
//! }
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = FmpClient::new(ClientConfig::from_env()?)?;
//!
//!     let quote: Endpoint<Quote> = Endpoint::new("quote", "quote/{symbol}", ApiVersion::V3)
//!         .mandatory(EndpointParam::path("symbol", ParamType::String))
//!         .returns(ResponseShape::ListOfItems);
//!
//!     let quotes = client.request(&quote, &Params::new().with("symbol", "AAPL"))?;
//!     for quote in quotes.into_items() {
//!         println!("{}: ${:.2}", quote.symbol, quote.price);
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Error Handling
//!
//! Every call returns `Result<_, ApiError>`:
//!
//! ```rust
//! use fmpkit_core::{ApiError, ErrorKind};
//!
//! fn handle_error(error: ApiError) {
//!     match error.kind() {
//!         ErrorKind::RateLimit => {
//!             // error.retry_after() says how long to wait
//!         }
//!         ErrorKind::Authentication => {
//!             // Check FMP_API_KEY
//!         }
//!         ErrorKind::Validation => {
//!             // Report to user
//!         }
//!         _ => {}
//!     }
//! }
//! ```
//!
//! ## Security
//!
//! - The API key is sent as the `apikey` query parameter and never logged
//! - Logged URLs carry endpoint parameters only

pub mod classifier;
pub mod client;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod http_client;
pub mod logging;
pub mod mapper;
pub mod quota;
pub mod retry;

// Executor
pub use client::{FmpClient, FmpClientBuilder};

// Configuration
pub use config::{ClientConfig, ThrottleMode, DEFAULT_BASE_URL};
pub use logging::{init_logging, LogFormat, LoggingConfig};

// Endpoint descriptors
pub use endpoint::{
    ApiVersion, Endpoint, EndpointParam, ParamDefault, ParamLocation, ParamType, ParamValue,
    Params, ResponseShape, ValidatedParams,
};

// Error types
pub use error::{ApiError, ConfigError, ErrorKind};

// HTTP client types
pub use http_client::{
    BlockingHttpClient, HttpClient, HttpError, HttpMethod, HttpRequest, HttpResponse,
    ReqwestBlockingClient, ReqwestHttpClient,
};

// Pipeline stages
pub use classifier::classify;
pub use mapper::{map_response, Mapped};
pub use quota::{Clock, ManualClock, QuotaConfig, QuotaSnapshot, QuotaTracker, SystemClock};
pub use retry::{Backoff, RetryDecision, RetryPolicy, RetryState};

//! Request executor: quota admission, retries, classification and mapping
//! composed around a transport call.

use std::ops::ControlFlow;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use serde::de::DeserializeOwned;
use tracing::{debug, error, info, instrument, warn};

use crate::classifier::classify;
use crate::config::{ClientConfig, ThrottleMode};
use crate::endpoint::{Endpoint, Params};
use crate::error::{ApiError, ConfigError};
use crate::http_client::{
    BlockingHttpClient, HttpClient, HttpError, HttpRequest, HttpResponse, ReqwestBlockingClient,
    ReqwestHttpClient,
};
use crate::mapper::{map_response, Mapped};
use crate::quota::{Clock, QuotaSnapshot, QuotaTracker, SystemClock};
use crate::retry::{RetryDecision, RetryState};

const API_KEY_PARAM: &str = "apikey";

/// Builder for [`FmpClient`]; transports and clock default to production ones.
pub struct FmpClientBuilder {
    config: ClientConfig,
    blocking: Option<Arc<dyn BlockingHttpClient>>,
    transport: Option<Arc<dyn HttpClient>>,
    clock: Option<Arc<dyn Clock>>,
}

impl FmpClientBuilder {
    pub fn blocking_transport(mut self, transport: Arc<dyn BlockingHttpClient>) -> Self {
        self.blocking = Some(transport);
        self
    }

    pub fn async_transport(mut self, transport: Arc<dyn HttpClient>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> Result<FmpClient, ConfigError> {
        self.config.validate()?;

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let quota = QuotaTracker::with_clock(self.config.rate_limit, clock);
        let blocking = self.blocking.map(OnceLock::from).unwrap_or_default();

        info!(
            base_url = %self.config.base_url,
            timeout_secs = self.config.timeout.as_secs_f64(),
            "initializing API client"
        );

        Ok(FmpClient {
            transport: self
                .transport
                .unwrap_or_else(|| Arc::new(ReqwestHttpClient::new())),
            config: self.config,
            quota: Arc::new(quota),
            blocking,
        })
    }
}

/// Client for the Financial Modeling Prep REST API.
///
/// Every call made through one client shares a single [`QuotaTracker`].
/// Both entry points run the same retry state machine; [`request`](Self::request)
/// sleeps the calling thread between attempts and
/// [`request_async`](Self::request_async) awaits a tokio timer.
pub struct FmpClient {
    config: ClientConfig,
    quota: Arc<QuotaTracker>,
    blocking: OnceLock<Arc<dyn BlockingHttpClient>>,
    transport: Arc<dyn HttpClient>,
}

impl FmpClient {
    pub fn builder(config: ClientConfig) -> FmpClientBuilder {
        FmpClientBuilder {
            config,
            blocking: None,
            transport: None,
            clock: None,
        }
    }

    pub fn new(config: ClientConfig) -> Result<Self, ConfigError> {
        Self::builder(config).build()
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::new(ClientConfig::from_env()?)
    }

    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn quota(&self) -> &QuotaTracker {
        &self.quota
    }

    pub fn quota_snapshot(&self) -> QuotaSnapshot {
        self.quota.snapshot()
    }

    fn blocking_transport(&self) -> &Arc<dyn BlockingHttpClient> {
        self.blocking
            .get_or_init(|| Arc::new(ReqwestBlockingClient::new()))
    }

    /// Performs one logical call, blocking the current thread.
    #[instrument(skip_all, fields(endpoint = endpoint.name()))]
    pub fn request<T: DeserializeOwned>(
        &self,
        endpoint: &Endpoint<T>,
        params: &Params,
    ) -> Result<Mapped<T>, ApiError> {
        let mut retry = RetryState::new(self.config.retry);

        loop {
            let request = self.prepare(endpoint, params)?;
            while let Some(wait) = self.admit()? {
                std::thread::sleep(wait);
            }
            retry.begin_attempt();

            let outcome = self.blocking_transport().execute(request);
            match self.settle(endpoint, &mut retry, outcome) {
                ControlFlow::Break(result) => return result,
                ControlFlow::Continue(delay) => std::thread::sleep(delay),
            }
        }
    }

    /// Performs one logical call on the async transport.
    #[instrument(skip_all, fields(endpoint = endpoint.name()))]
    pub async fn request_async<T: DeserializeOwned>(
        &self,
        endpoint: &Endpoint<T>,
        params: &Params,
    ) -> Result<Mapped<T>, ApiError> {
        let mut retry = RetryState::new(self.config.retry);

        loop {
            let request = self.prepare(endpoint, params)?;
            while let Some(wait) = self.admit()? {
                tokio::time::sleep(wait).await;
            }
            retry.begin_attempt();

            let outcome = self.transport.execute(request).await;
            match self.settle(endpoint, &mut retry, outcome) {
                ControlFlow::Break(result) => return result,
                ControlFlow::Continue(delay) => tokio::time::sleep(delay).await,
            }
        }
    }

    /// `Ok(None)` once an attempt has been admitted and recorded,
    /// `Ok(Some(wait))` when the caller should sleep and ask again.
    fn admit(&self) -> Result<Option<Duration>, ApiError> {
        match self.quota.try_acquire() {
            Ok(()) => Ok(None),
            Err(wait) => match self.config.throttle_mode {
                ThrottleMode::Block => {
                    debug!(wait_secs = wait.as_secs_f64(), "waiting for quota");
                    Ok(Some(wait))
                }
                ThrottleMode::Reject => Err(ApiError::rate_limited(
                    format!(
                        "Rate limit exceeded. Please wait {:.1} seconds",
                        wait.as_secs_f64()
                    ),
                    wait,
                    None,
                )),
            },
        }
    }

    /// Validates parameters and builds the wire request. Runs once per attempt,
    /// before quota admission, so invalid parameters never consume quota.
    fn prepare<T>(
        &self,
        endpoint: &Endpoint<T>,
        params: &Params,
    ) -> Result<HttpRequest, ApiError> {
        let validated = endpoint.validate_params(params)?;
        let url = endpoint.build_url(&self.config.base_url, &validated)?;

        debug!(
            endpoint = endpoint.name(),
            url = %url,
            method = endpoint.method().as_str(),
            "sending request"
        );

        let mut request = HttpRequest::new(endpoint.method(), url)
            .with_header("Accept", "application/json")
            .with_timeout(self.config.timeout);
        for (name, value) in validated.query {
            request = request.with_query(name, value);
        }
        Ok(request.with_query(API_KEY_PARAM, self.config.api_key.as_str()))
    }

    /// Classifies and maps one attempt's outcome, then asks the retry state
    /// whether to stop or sleep and try again.
    fn settle<T: DeserializeOwned>(
        &self,
        endpoint: &Endpoint<T>,
        retry: &mut RetryState,
        outcome: Result<HttpResponse, HttpError>,
    ) -> ControlFlow<Result<Mapped<T>, ApiError>, Duration> {
        let result = outcome
            .map_err(ApiError::from)
            .and_then(|response| classify(&response, &self.quota))
            .and_then(|payload| map_response(endpoint, payload));

        let error = match result {
            Ok(mapped) => return ControlFlow::Break(Ok(mapped)),
            Err(error) => error,
        };

        match retry.on_failure(error) {
            RetryDecision::Retry { delay, error } => {
                warn!(
                    endpoint = endpoint.name(),
                    attempt = retry.attempts_made(),
                    kind = %error.kind(),
                    delay_secs = delay.as_secs_f64(),
                    error = %error,
                    "request failed, retrying"
                );
                ControlFlow::Continue(delay)
            }
            RetryDecision::Fail(error) => {
                error!(
                    endpoint = endpoint.name(),
                    attempts = retry.attempts_made(),
                    kind = %error.kind(),
                    error = %error,
                    "request failed"
                );
                ControlFlow::Break(Err(error))
            }
        }
    }
}

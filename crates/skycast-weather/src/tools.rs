//! Tool-call surface for the agent runtime.
//!
//! Arguments are validated before any cache or network work, and every
//! outcome becomes a [`ToolResponse`]. Nothing here returns an error.

use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use skycast_core::{DefaultsConfig, Units, WeatherError};
use tokio_util::sync::CancellationToken;

use crate::outcome::LookupOutcome;
use crate::service::WeatherService;

pub const MAX_FORECAST_DAYS: i64 = 7;
pub const MAX_FORECAST_HOURS: i64 = 48;

/// A tool call as the agent runtime sends it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolRequest {
    GetWeather {
        city: String,
        #[serde(default)]
        units: Option<String>,
        #[serde(default)]
        language: Option<String>,
    },
    GetForecast {
        city: String,
        #[serde(default)]
        days: Option<i64>,
        #[serde(default)]
        units: Option<String>,
        #[serde(default)]
        language: Option<String>,
    },
    GetHourlyForecast {
        city: String,
        #[serde(default)]
        hours: Option<i64>,
        #[serde(default)]
        units: Option<String>,
        #[serde(default)]
        language: Option<String>,
    },
    GetLocalTime {
        city: String,
        #[serde(default)]
        language: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad arguments; retrying unchanged will fail again
    Validation,
    /// Upstream trouble that may clear up
    Transient,
    Permanent,
}

impl From<&WeatherError> for ErrorKind {
    fn from(error: &WeatherError) -> Self {
        match error {
            WeatherError::InvalidArgument { .. } => ErrorKind::Validation,
            e if e.is_transient() => ErrorKind::Transient,
            _ => ErrorKind::Permanent,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolResponse {
    Success {
        data: serde_json::Value,
    },
    NotFound {
        error_message: String,
        suggestions: Vec<String>,
    },
    Error {
        error_kind: ErrorKind,
        error_message: String,
    },
}

/// A response paired with the `id` the caller sent, if any.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolReply {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<serde_json::Value>,
    #[serde(flatten)]
    pub response: ToolResponse,
}

impl ToolResponse {
    pub fn error(error: &WeatherError) -> Self {
        ToolResponse::Error {
            error_kind: ErrorKind::from(error),
            error_message: format!("{} ({})", error.user_message(), error),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ToolResponse::Success { .. })
    }

    fn from_outcome<T: Serialize>(outcome: LookupOutcome<T>) -> Self {
        match outcome {
            LookupOutcome::Found(data) => match serde_json::to_value(&data) {
                Ok(data) => ToolResponse::Success { data },
                Err(e) => ToolResponse::error(&WeatherError::InvalidResponse(e.to_string())),
            },
            LookupOutcome::NotFound { query, suggestions } => {
                let mut error_message = WeatherError::LocationNotFound(query).to_string();
                if !suggestions.is_empty() {
                    error_message.push_str(". Did you mean one of the suggestions?");
                }
                ToolResponse::NotFound {
                    error_message,
                    suggestions,
                }
            }
            LookupOutcome::Failed(e) => ToolResponse::error(&e),
        }
    }
}

/// Validated common arguments.
struct Args {
    city: String,
    units: Units,
    language: String,
}

#[derive(Debug, Clone)]
pub struct WeatherTools {
    service: Arc<WeatherService>,
    defaults: DefaultsConfig,
}

impl WeatherTools {
    pub fn new(service: Arc<WeatherService>) -> Self {
        let defaults = service.config().defaults.clone();
        Self { service, defaults }
    }

    pub fn service(&self) -> &Arc<WeatherService> {
        &self.service
    }

    pub async fn get_weather(
        &self,
        city: &str,
        units: Option<&str>,
        language: Option<&str>,
        cancel: &CancellationToken,
    ) -> ToolResponse {
        let args = match self.common_args(city, units, language) {
            Ok(args) => args,
            Err(e) => return ToolResponse::error(&e),
        };
        ToolResponse::from_outcome(
            self.service
                .current_weather(&args.city, args.units, &args.language, cancel)
                .await,
        )
    }

    pub async fn get_forecast(
        &self,
        city: &str,
        days: Option<i64>,
        units: Option<&str>,
        language: Option<&str>,
        cancel: &CancellationToken,
    ) -> ToolResponse {
        let validated = self.common_args(city, units, language).and_then(|args| {
            let days = validate_count(
                "days",
                days,
                i64::from(self.defaults.forecast_days),
                MAX_FORECAST_DAYS,
            )?;
            Ok((args, days))
        });
        let (args, days) = match validated {
            Ok(v) => v,
            Err(e) => return ToolResponse::error(&e),
        };
        ToolResponse::from_outcome(
            self.service
                .daily_forecast(&args.city, days, args.units, &args.language, cancel)
                .await,
        )
    }

    pub async fn get_hourly_forecast(
        &self,
        city: &str,
        hours: Option<i64>,
        units: Option<&str>,
        language: Option<&str>,
        cancel: &CancellationToken,
    ) -> ToolResponse {
        let validated = self.common_args(city, units, language).and_then(|args| {
            let hours = validate_count(
                "hours",
                hours,
                i64::from(self.defaults.forecast_hours),
                MAX_FORECAST_HOURS,
            )?;
            Ok((args, hours))
        });
        let (args, hours) = match validated {
            Ok(v) => v,
            Err(e) => return ToolResponse::error(&e),
        };
        ToolResponse::from_outcome(
            self.service
                .hourly_forecast(&args.city, hours, args.units, &args.language, cancel)
                .await,
        )
    }

    pub async fn get_local_time(
        &self,
        city: &str,
        language: Option<&str>,
        cancel: &CancellationToken,
    ) -> ToolResponse {
        let args = match self.common_args(city, None, language) {
            Ok(args) => args,
            Err(e) => return ToolResponse::error(&e),
        };
        ToolResponse::from_outcome(
            self.service
                .local_time(&args.city, &args.language, cancel)
                .await,
        )
    }

    pub async fn dispatch(&self, request: ToolRequest, cancel: &CancellationToken) -> ToolResponse {
        tracing::debug!("Dispatching tool call {:?}", request);
        match request {
            ToolRequest::GetWeather {
                city,
                units,
                language,
            } => {
                self.get_weather(&city, units.as_deref(), language.as_deref(), cancel)
                    .await
            }
            ToolRequest::GetForecast {
                city,
                days,
                units,
                language,
            } => {
                self.get_forecast(&city, days, units.as_deref(), language.as_deref(), cancel)
                    .await
            }
            ToolRequest::GetHourlyForecast {
                city,
                hours,
                units,
                language,
            } => {
                self.get_hourly_forecast(&city, hours, units.as_deref(), language.as_deref(), cancel)
                    .await
            }
            ToolRequest::GetLocalTime { city, language } => {
                self.get_local_time(&city, language.as_deref(), cancel).await
            }
        }
    }

    /// Parses a raw JSON tool call; unparseable input is a validation error.
    pub async fn dispatch_json(&self, raw: &str, cancel: &CancellationToken) -> ToolResponse {
        match serde_json::from_str::<ToolRequest>(raw) {
            Ok(request) => self.dispatch(request, cancel).await,
            Err(e) => ToolResponse::error(&WeatherError::invalid_argument("request", e.to_string())),
        }
    }

    /// Like `dispatch_json`, echoing the request's `id` so replies that
    /// finish out of order can be matched to their calls.
    pub async fn reply_json(&self, raw: &str, cancel: &CancellationToken) -> ToolReply {
        let id = serde_json::from_str::<serde_json::Value>(raw)
            .ok()
            .and_then(|value| value.get("id").cloned());
        ToolReply {
            id,
            response: self.dispatch_json(raw, cancel).await,
        }
    }

    fn common_args(
        &self,
        city: &str,
        units: Option<&str>,
        language: Option<&str>,
    ) -> Result<Args, WeatherError> {
        let city = city.trim();
        if city.is_empty() {
            return Err(WeatherError::invalid_argument("city", "must not be empty"));
        }

        let units = match units.map(str::trim).filter(|u| !u.is_empty()) {
            Some(raw) => Units::from_str(raw).map_err(|e| WeatherError::invalid_argument("units", e))?,
            None => self.defaults.units,
        };

        let language = match language.map(str::trim).filter(|l| !l.is_empty()) {
            Some(raw) => validate_language(raw)?,
            None => self.defaults.language.clone(),
        };

        Ok(Args {
            city: city.to_string(),
            units,
            language,
        })
    }
}

fn validate_count(field: &str, value: Option<i64>, default: i64, max: i64) -> Result<u8, WeatherError> {
    let value = value.unwrap_or(default);
    if !(1..=max).contains(&value) {
        return Err(WeatherError::invalid_argument(
            field,
            format!("must be between 1 and {}, got {}", max, value),
        ));
    }
    u8::try_from(value).map_err(|e| WeatherError::invalid_argument(field, e.to_string()))
}

/// ISO 639-1 style code, e.g. `en`, `zh`.
fn validate_language(raw: &str) -> Result<String, WeatherError> {
    let code = raw.to_ascii_lowercase();
    let valid = (2..=3).contains(&code.len()) && code.chars().all(|c| c.is_ascii_lowercase());
    if valid {
        Ok(code)
    } else {
        Err(WeatherError::invalid_argument(
            "language",
            format!("'{}' is not a language code", raw),
        ))
    }
}

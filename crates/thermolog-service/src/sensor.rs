//! Sensor endpoint client.
//!
//! The collector talks to the sensor through the [`SensorSource`] trait so
//! that the HTTP client can be swapped for [`MockSensor`] in tests.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use thermolog_service::sensor::{HttpSensor, SensorSource};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let sensor = HttpSensor::new("http://192.168.1.40/", Duration::from_secs(10))?;
//! let sample = sensor.fetch().await?;
//! println!("{} / {}", sample.temperature, sample.humidity);
//! # Ok(())
//! # }
//! ```

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use thermolog_types::SensorSample;

/// Errors from fetching a sensor sample.
#[derive(Debug, thiserror::Error)]
pub enum SensorError {
    /// Invalid sensor URL.
    #[error("Invalid sensor URL: {0}")]
    InvalidUrl(String),

    /// The sensor could not be reached or did not answer in time.
    #[error("Sensor not reachable at {url}: {source}")]
    NotReachable {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The sensor answered with a non-success status.
    #[error("Sensor returned HTTP {status}")]
    Status { status: u16 },

    /// The response body was not a valid sample.
    #[error("Malformed sensor payload: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Failed to build the HTTP client.
    #[error("HTTP client error: {0}")]
    Client(#[source] reqwest::Error),

    /// Failure injected by a mock sensor.
    #[error("{0}")]
    Mock(String),
}

/// A source of sensor samples.
#[async_trait]
pub trait SensorSource: Send + Sync {
    /// Fetch one sample.
    async fn fetch(&self) -> Result<SensorSample, SensorError>;
}

/// Sensor reached over HTTP with a single GET.
#[derive(Debug, Clone)]
pub struct HttpSensor {
    client: Client,
    url: String,
}

impl HttpSensor {
    /// Create a client for the sensor at `url`.
    ///
    /// `timeout` bounds the whole request; an elapsed timeout is reported
    /// as [`SensorError::NotReachable`].
    pub fn new(url: &str, timeout: Duration) -> Result<Self, SensorError> {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(SensorError::InvalidUrl(format!(
                "URL must start with http:// or https://, got: {}",
                url
            )));
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(SensorError::Client)?;

        Ok(Self {
            client,
            url: url.to_string(),
        })
    }

    /// The sensor URL.
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl SensorSource for HttpSensor {
    async fn fetch(&self) -> Result<SensorSample, SensorError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| SensorError::NotReachable {
                url: self.url.clone(),
                source: e,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SensorError::Status {
                status: status.as_u16(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| SensorError::NotReachable {
                url: self.url.clone(),
                source: e,
            })?;

        Ok(serde_json::from_slice(&body)?)
    }
}

/// A scripted sensor for tests and dry runs.
///
/// Queued results are returned first, in order; once the queue is empty
/// every fetch returns the default sample.
#[derive(Debug)]
pub struct MockSensor {
    default: SensorSample,
    queued: Mutex<VecDeque<Result<SensorSample, String>>>,
    fetch_count: AtomicU32,
}

impl MockSensor {
    /// A sensor that always returns `sample`.
    pub fn new(sample: SensorSample) -> Self {
        Self {
            default: sample,
            queued: Mutex::new(VecDeque::new()),
            fetch_count: AtomicU32::new(0),
        }
    }

    /// A sensor that always returns the given values.
    pub fn with_values(temperature: f64, humidity: f64) -> Self {
        Self::new(SensorSample {
            temperature,
            humidity,
        })
    }

    /// Queue a sample to return on a later fetch.
    pub fn push_sample(&self, sample: SensorSample) {
        self.queue().push_back(Ok(sample));
    }

    /// Queue a failure to return on a later fetch.
    pub fn push_failure(&self, message: &str) {
        self.queue().push_back(Err(message.to_string()));
    }

    /// Number of fetches made so far.
    pub fn fetch_count(&self) -> u32 {
        self.fetch_count.load(Ordering::SeqCst)
    }

    fn queue(&self) -> std::sync::MutexGuard<'_, VecDeque<Result<SensorSample, String>>> {
        self.queued.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl SensorSource for MockSensor {
    async fn fetch(&self) -> Result<SensorSample, SensorError> {
        self.fetch_count.fetch_add(1, Ordering::SeqCst);
        let next = self.queue().pop_front();
        match next {
            Some(Ok(sample)) => Ok(sample),
            Some(Err(message)) => Err(SensorError::Mock(message)),
            None => Ok(self.default),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_sensor_creation() {
        let sensor = HttpSensor::new("http://localhost:8081/", Duration::from_secs(5)).unwrap();
        assert_eq!(sensor.url(), "http://localhost:8081/");
    }

    #[test]
    fn test_http_sensor_invalid_url() {
        let result = HttpSensor::new("localhost:8081", Duration::from_secs(5));
        assert!(matches!(result, Err(SensorError::InvalidUrl(_))));
    }

    #[tokio::test]
    async fn test_http_sensor_unreachable() {
        // Port 9 (discard) is not expected to be listening on localhost
        let sensor = HttpSensor::new("http://127.0.0.1:9/", Duration::from_secs(2)).unwrap();
        let result = sensor.fetch().await;
        assert!(matches!(result, Err(SensorError::NotReachable { .. })));
    }

    #[tokio::test]
    async fn test_mock_sensor_script() {
        let sensor = MockSensor::with_values(20.0, 50.0);
        sensor.push_failure("offline");
        sensor.push_sample(SensorSample {
            temperature: 1.0,
            humidity: 2.0,
        });

        assert!(matches!(sensor.fetch().await, Err(SensorError::Mock(m)) if m == "offline"));
        assert_eq!(sensor.fetch().await.unwrap().temperature, 1.0);
        assert_eq!(sensor.fetch().await.unwrap().temperature, 20.0);
        assert_eq!(sensor.fetch_count(), 3);
    }

    #[test]
    fn test_sensor_error_display() {
        let err = SensorError::Status { status: 503 };
        assert_eq!(err.to_string(), "Sensor returned HTTP 503");

        let err = SensorError::from(serde_json::from_str::<SensorSample>("{}").unwrap_err());
        assert!(err.to_string().starts_with("Malformed sensor payload"));
    }
}

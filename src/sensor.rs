//! Periodic sensor publishing
//!
//! Hardware drivers live outside the crate. Anything that can produce a reading
//! implements [`Sensor`], and [`SensorPublisher`] samples it on a fixed period
//! and publishes the value on a channel.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::client::NodeClient;
use crate::error::Result;
use crate::protocol::validate_payload;

/// Source of numeric readings
pub trait Sensor: Send + 'static {
    /// Take one reading
    fn read(&mut self) -> Result<f32>;
}

impl<F> Sensor for F
where
    F: FnMut() -> Result<f32> + Send + 'static,
{
    fn read(&mut self) -> Result<f32> {
        self()
    }
}

/// Convert a 10-bit MCP3008 reading of the temperature probe to degrees Celsius
pub fn adc_to_celsius(raw: u16) -> f32 {
    (225.0 * raw as f32) / 256.0 - 58.0
}

/// Publishes a sensor's readings on a channel
pub struct SensorPublisher<S> {
    client: Arc<NodeClient>,
    channel: String,
    sensor: S,
    period: Duration,
    precision: usize,
}

impl<S: Sensor> SensorPublisher<S> {
    /// Publish readings from `sensor` on `channel` once per second
    pub fn new(client: Arc<NodeClient>, channel: impl Into<String>, sensor: S) -> Result<Self> {
        let channel = channel.into();
        validate_payload(&channel)?;

        Ok(Self {
            client,
            channel,
            sensor,
            period: Duration::from_secs(1),
            precision: 1,
        })
    }

    /// Set the sampling period
    pub fn period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    /// Set the number of decimal places published
    pub fn precision(mut self, digits: usize) -> Self {
        self.precision = digits;
        self
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Read the sensor and publish the value, returning the published payload
    pub async fn publish_once(&mut self) -> Result<String> {
        let value = self.sensor.read()?;
        let payload = format!("{:.*}", self.precision, value);
        self.client.publish(&self.channel, &payload).await?;

        tracing::trace!(channel = %self.channel, value = %payload, "Reading published");
        Ok(payload)
    }

    /// Publish on every period tick until a publish fails
    ///
    /// Failed sensor reads are logged and skipped. A failed publish means the
    /// Core connection is unusable, so the task ends with that error.
    pub fn spawn(mut self) -> JoinHandle<Result<()>> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            tracing::info!(
                channel = %self.channel,
                period_ms = self.period.as_millis() as u64,
                "Sensor publisher started"
            );

            loop {
                ticker.tick().await;

                let value = match self.sensor.read() {
                    Ok(value) => value,
                    Err(e) => {
                        tracing::warn!(channel = %self.channel, error = %e, "Sensor read failed");
                        continue;
                    }
                };

                let payload = format!("{:.*}", self.precision, value);
                if let Err(e) = self.client.publish(&self.channel, &payload).await {
                    tracing::error!(channel = %self.channel, error = %e, "Sensor publish failed");
                    return Err(e);
                }
            }
        })
    }
}

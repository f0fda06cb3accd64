use std::{future::Future, time::Duration};

use anyhow::Context;
use backon::{ConstantBuilder, Retryable};
use reqwest::Url;
use serde::Deserialize;

use crate::{
    buffer::RetentionBuffer, config::InfluxTarget, line_protocol::LineEncoder,
    measurement::MeasurementRecord,
};

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
pub const WRITE_RETRY_DELAY: Duration = Duration::from_secs(1);
pub const WRITE_RETRY_TIMES: usize = 3;

/// Sends a line-protocol body somewhere.
pub trait Transport {
    fn write(&self, body: &str) -> impl Future<Output = Result<(), anyhow::Error>> + Send;
}

#[derive(Debug, Deserialize)]
struct DeviceEnvironment {
    influx_url: String,
    influx_org: String,
    influx_token: String,
    influx_bucket: String,
}

/// IoT Center endpoint holding this device's write target. The device id is
/// a single percent-encoded path segment.
pub fn discovery_url(iot_center_url: &str, device_id: &str) -> Result<Url, anyhow::Error> {
    let mut url = Url::parse(iot_center_url)
        .with_context(|| format!("Invalid IoT Center URL: {iot_center_url}"))?;
    url.path_segments_mut()
        .map_err(|()| anyhow::anyhow!("IoT Center URL cannot have a path: {iot_center_url}"))?
        .pop_if_empty()
        .extend(["api", "env"])
        .push(device_id);
    Ok(url)
}

/// Asks IoT Center where this device should write to.
pub async fn discover(
    client: &reqwest::Client,
    iot_center_url: &str,
    device_id: &str,
) -> Result<InfluxTarget, anyhow::Error> {
    let url = discovery_url(iot_center_url, device_id)?;
    let env: DeviceEnvironment = client
        .get(url.clone())
        .send()
        .await
        .with_context(|| format!("Failed to reach IoT Center at {url}"))?
        .error_for_status()
        .context("IoT Center rejected configuration request")?
        .json()
        .await
        .context("Failed to parse IoT Center configuration")?;

    Ok(InfluxTarget {
        url: env.influx_url,
        org: env.influx_org,
        bucket: env.influx_bucket,
        token: env.influx_token,
    })
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    target: InfluxTarget,
}

impl HttpTransport {
    pub fn new(client: reqwest::Client, target: InfluxTarget) -> Self {
        Self { client, target }
    }
}

impl Transport for HttpTransport {
    async fn write(&self, body: &str) -> Result<(), anyhow::Error> {
        let url = format!("{}/api/v2/write", self.target.url.trim_end_matches('/'));
        self.client
            .post(&url)
            .query(&[
                ("org", self.target.org.as_str()),
                ("bucket", self.target.bucket.as_str()),
                ("precision", "ms"),
            ])
            .header(
                reqwest::header::AUTHORIZATION,
                format!("Token {}", self.target.token),
            )
            .header(reqwest::header::CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(body.to_owned())
            .send()
            .await
            .with_context(|| format!("Failed to send write request to {url}"))?
            .error_for_status()
            .context("InfluxDB rejected write request")?;
        Ok(())
    }
}

pub fn http_client() -> Result<reqwest::Client, anyhow::Error> {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .context("Failed to build HTTP client")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    /// Records delivered during this drain.
    pub sent: usize,
    /// Records copied out of the buffer but not yet delivered.
    pub pending: usize,
    /// Records still waiting in the buffer.
    pub remaining: usize,
}

/// Moves records from the retention buffer to a [`Transport`].
///
/// Records are copied out of the buffer into a pending batch before the
/// write. A failed batch stays pending and is resent first on the next
/// drain; it is never put back into the buffer.
pub struct Uplink<T> {
    encoder: LineEncoder,
    transport: T,
    batch_size: usize,
    pending: Vec<MeasurementRecord>,
    retry_delay: Duration,
    retry_times: usize,
}

impl<T: Transport> Uplink<T> {
    pub fn new(encoder: LineEncoder, transport: T, batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            encoder,
            transport,
            batch_size,
            pending: Vec::with_capacity(batch_size),
            retry_delay: WRITE_RETRY_DELAY,
            retry_times: WRITE_RETRY_TIMES,
        }
    }

    pub fn with_retry(mut self, delay: Duration, times: usize) -> Self {
        self.retry_delay = delay;
        self.retry_times = times;
        self
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    fn fill_batch<const N: usize>(&mut self, buffer: &mut RetentionBuffer<MeasurementRecord, N>) {
        while self.pending.len() < self.batch_size {
            match buffer.dequeue_oldest() {
                Some(record) => self.pending.push(record),
                None => break,
            }
        }
    }

    async fn write(&self, body: &str) -> Result<(), anyhow::Error> {
        let transport = &self.transport;
        (|| transport.write(body))
            .retry(
                ConstantBuilder::default()
                    .with_delay(self.retry_delay)
                    .with_max_times(self.retry_times),
            )
            .notify(|e, dur| {
                log::warn!("{e:#}");
                log::info!("Retrying upload in {:?}", dur);
            })
            .await
    }

    /// Sends batches until the buffer is empty or a write fails.
    pub async fn drain<const N: usize>(
        &mut self,
        buffer: &mut RetentionBuffer<MeasurementRecord, N>,
    ) -> DrainReport {
        let mut sent = 0;
        loop {
            if self.pending.is_empty() {
                self.fill_batch(buffer);
            }
            if self.pending.is_empty() {
                break;
            }

            let body = self.encoder.encode_batch(&self.pending);
            if !body.is_empty() {
                if let Err(e) = self.write(&body).await {
                    log::error!(
                        "Upload failed, keeping {} records for the next attempt: {e:#}",
                        self.pending.len()
                    );
                    break;
                }
            }

            sent += self.pending.len();
            self.pending.clear();
        }

        DrainReport {
            sent,
            pending: self.pending.len(),
            remaining: buffer.len(),
        }
    }
}

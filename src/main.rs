use std::time::Duration;

use anyhow::Context;
use buffer::OfflineBuffer;
use clap::Parser;
use config::Config;
use line_protocol::LineEncoder;
use log::LevelFilter;
use sensor::Sensors;
use simplelog::{ColorChoice, ConfigBuilder, TermLogger, TerminalMode};
use tokio::time::{Interval, MissedTickBehavior};
use uplink::{HttpTransport, Uplink};

mod buffer;
mod config;
mod line_protocol;
mod measurement;
mod mh_z19c;
mod sensor;
mod uplink;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let config = Config::parse();

    TermLogger::init(
        LevelFilter::from(config.log_level),
        ConfigBuilder::new()
            .set_time_format_rfc3339()
            .set_time_offset_to_local()
            .map_err(|_| anyhow::anyhow!("Failed to set time offset to local"))?
            .build(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )
    .context("Failed to initialize logger")?;

    if let Err(e) = run(config).await {
        log::error!("{e:#}");
    }

    Ok(())
}

pub async fn run(config: Config) -> Result<(), anyhow::Error> {
    config.validate().context("Invalid configuration")?;

    let fallback = config.fallback_location();
    let mut buffer = OfflineBuffer::default();
    log::info!(
        "Offline buffer holds {} records, fallback location {:.7}, {:.7}",
        buffer.capacity(),
        fallback.latitude,
        fallback.longitude
    );

    let mut sensors = Sensors::init();
    let encoder = LineEncoder::new(&config.device_id, sensors.names());

    let client = uplink::http_client()?;
    let mut drainer = config.influx_target().map(|target| {
        Uplink::new(
            encoder.clone(),
            HttpTransport::new(client.clone(), target),
            config.upload_batch_size,
        )
        .with_retry(uplink::WRITE_RETRY_DELAY, config.upload_retries)
    });

    let mut measurement_ticker = ticker(config.measurement_interval());
    let mut upload_ticker = ticker(config.upload_interval());

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = measurement_ticker.tick() => {
                let sample = sensors.sample();
                sensor::record_sample(&mut buffer, &sample, fallback, sensor::now_millis());
                log::info!(
                    "Buffered {} of {} records ({:?})",
                    buffer.len(),
                    buffer.capacity(),
                    buffer.state()
                );
            }
            _ = upload_ticker.tick() => {
                upload(&mut drainer, &client, &config, &encoder, &mut buffer).await;
            }
            result = &mut shutdown => {
                result.context("Failed to wait for Ctrl+C signal")?;
                break;
            }
        }
    }

    upload(&mut drainer, &client, &config, &encoder, &mut buffer).await;
    log::info!(
        "Shutting down with {} records buffered, {} dropped",
        buffer.len(),
        buffer.dropped()
    );

    Ok(())
}

/// Interval that skips the burst of catch-up ticks after a long blocking
/// sensor read or a slow drain.
fn ticker(period: Duration) -> Interval {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

async fn upload(
    drainer: &mut Option<Uplink<HttpTransport>>,
    client: &reqwest::Client,
    config: &Config,
    encoder: &LineEncoder,
    buffer: &mut OfflineBuffer,
) {
    if drainer.is_none() {
        match uplink::discover(client, &config.iot_center_url, &config.device_id).await {
            Ok(target) => {
                log::info!(
                    "Writing to {} (org {}, bucket {})",
                    target.url,
                    target.org,
                    target.bucket
                );
                *drainer = Some(Uplink::new(
                    encoder.clone(),
                    HttpTransport::new(client.clone(), target),
                    config.upload_batch_size,
                )
                .with_retry(uplink::WRITE_RETRY_DELAY, config.upload_retries));
            }
            Err(e) => {
                log::warn!("Uplink unavailable, {} records buffered: {e:#}", buffer.len());
                return;
            }
        }
    }
    let Some(drainer) = drainer.as_mut() else {
        return;
    };

    if buffer.is_empty() && drainer.pending() == 0 {
        return;
    }

    let report = drainer.drain(buffer).await;
    log::info!(
        "Uploaded {} records ({} pending, {} buffered, {} dropped)",
        report.sent,
        report.pending,
        report.remaining,
        buffer.dropped()
    );
}

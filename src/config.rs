use std::time::Duration;

use clap::{Parser, ValueEnum};
use log::LevelFilter;

use crate::measurement::Location;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Client id reported with every measurement
    #[arg(long, env = "IOT_DEVICE_ID")]
    pub device_id: String,

    /// IoT Center used to look up the InfluxDB write target
    #[arg(long, env = "IOT_CENTER_URL", default_value = "http://localhost:5000")]
    pub iot_center_url: String,

    #[arg(long, env = "INFLUX_URL")]
    pub influx_url: Option<String>,

    #[arg(long, env = "INFLUX_ORG")]
    pub influx_org: Option<String>,

    #[arg(long, env = "INFLUX_BUCKET")]
    pub influx_bucket: Option<String>,

    #[arg(long, env = "INFLUX_TOKEN", hide_env_values = true)]
    pub influx_token: Option<String>,

    /// Seconds between sensor samples
    #[arg(long, env = "MEASUREMENT_INTERVAL_SECS", default_value = "60")]
    pub measurement_interval_secs: u64,

    /// Seconds between upload attempts
    #[arg(long, env = "UPLOAD_INTERVAL_SECS", default_value = "60")]
    pub upload_interval_secs: u64,

    /// Maximum records per write request
    #[arg(long, env = "UPLOAD_BATCH_SIZE", default_value = "100")]
    pub upload_batch_size: usize,

    /// Extra attempts for a failed write before waiting for the next upload
    #[arg(long, env = "UPLOAD_RETRIES", default_value = "3")]
    pub upload_retries: usize,

    /// Latitude used when there is no GPS fix
    #[arg(
        long,
        env = "DEFAULT_LATITUDE",
        allow_negative_numbers = true,
        default_value_t = Location::DEFAULT.latitude
    )]
    pub default_latitude: f64,

    /// Longitude used when there is no GPS fix
    #[arg(
        long,
        env = "DEFAULT_LONGITUDE",
        allow_negative_numbers = true,
        default_value_t = Location::DEFAULT.longitude
    )]
    pub default_longitude: f64,

    #[arg(long, env = "LOG_LEVEL", value_enum, default_value = "info")]
    pub log_level: LogLevel,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        }
    }
}

/// Write target that skips IoT Center discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfluxTarget {
    pub url: String,
    pub org: String,
    pub bucket: String,
    pub token: String,
}

impl Config {
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.device_id.trim().is_empty() {
            return Err(anyhow::anyhow!("Device id must not be empty"));
        }
        if self.device_id.chars().any(char::is_control) {
            return Err(anyhow::anyhow!(
                "Device id must not contain control characters: {:?}",
                self.device_id
            ));
        }
        if self.measurement_interval_secs == 0 {
            return Err(anyhow::anyhow!("Measurement interval must be at least 1 second"));
        }
        if self.upload_interval_secs == 0 {
            return Err(anyhow::anyhow!("Upload interval must be at least 1 second"));
        }
        if self.upload_batch_size == 0 {
            return Err(anyhow::anyhow!("Upload batch size must be at least 1"));
        }
        if !(-90.0..=90.0).contains(&self.default_latitude) {
            return Err(anyhow::anyhow!(
                "Default latitude out of range: {}",
                self.default_latitude
            ));
        }
        if !(-180.0..=180.0).contains(&self.default_longitude) {
            return Err(anyhow::anyhow!(
                "Default longitude out of range: {}",
                self.default_longitude
            ));
        }
        Ok(())
    }

    pub fn measurement_interval(&self) -> Duration {
        Duration::from_secs(self.measurement_interval_secs)
    }

    pub fn upload_interval(&self) -> Duration {
        Duration::from_secs(self.upload_interval_secs)
    }

    pub fn fallback_location(&self) -> Location {
        Location {
            latitude: self.default_latitude,
            longitude: self.default_longitude,
        }
    }

    /// Returns the explicit write target when all four parts are set.
    pub fn influx_target(&self) -> Option<InfluxTarget> {
        Some(InfluxTarget {
            url: self.influx_url.clone()?,
            org: self.influx_org.clone()?,
            bucket: self.influx_bucket.clone()?,
            token: self.influx_token.clone()?,
        })
    }
}

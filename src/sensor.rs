use std::time::Duration;

use anyhow::Context as _;
use backon::{BlockingRetryable, ConstantBuilder};
use bme280::i2c::BME280;
use chrono::Utc;
use rppal::{hal::Delay, i2c::I2c};

use crate::{
    buffer::RetentionBuffer,
    measurement::{Location, MeasurementRecord, SensorNames},
    mh_z19c::MHZ19C,
};

const PASCALS_PER_HECTOPASCAL: f32 = 100.0;

pub const BME280_NAME: &str = "BME280";
pub const MHZ19C_NAME: &str = "MH-Z19C";

fn retry_builder() -> ConstantBuilder {
    ConstantBuilder::default()
        .with_delay(Duration::from_millis(100))
        .with_max_times(20)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Climate {
    pub temperature: f32,
    pub humidity: f32,
    pub pressure: f32,
}

/// Values read in one polling cycle. `None` means the sensor is absent or
/// its read failed.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Sample {
    pub climate: Option<Climate>,
    pub co2_ppm: Option<u16>,
}

impl Sample {
    /// Overwrites the fields this sample measured and leaves the rest alone.
    pub fn write_to(&self, slot: &mut MeasurementRecord) {
        if let Some(climate) = self.climate {
            slot.temperature = climate.temperature;
            slot.humidity = climate.humidity;
            slot.pressure = climate.pressure;
        }
        if let Some(co2) = self.co2_ppm {
            slot.co2 = f32::from(co2);
        }
    }
}

/// Stores `sample` as the newest record. Returns `true` if the oldest record
/// was evicted to make room.
pub fn record_sample<const N: usize>(
    buffer: &mut RetentionBuffer<MeasurementRecord, N>,
    sample: &Sample,
    fallback: Location,
    timestamp: u64,
) -> bool {
    let slot = buffer.acquire_write_slot();
    slot.reset(fallback, timestamp);
    sample.write_to(slot);

    let evicted = buffer.commit();
    if evicted {
        log::warn!(
            "Offline buffer full, dropped oldest record ({} dropped so far)",
            buffer.dropped()
        );
    }
    evicted
}

pub fn now_millis() -> u64 {
    u64::try_from(Utc::now().timestamp_millis()).unwrap_or_default()
}

pub struct Sensors {
    delay: Delay,
    bme280: Option<BME280<I2c>>,
    mhz19c: Option<MHZ19C>,
}

impl Sensors {
    /// Brings up every attached sensor. A sensor that cannot be initialized
    /// is left out and its fields stay unmeasured.
    pub fn init() -> Sensors {
        let mut delay = Delay;

        let bme280 = match init_bme280(&mut delay) {
            Ok(bme280) => {
                log::info!("Found BME280 sensor");
                Some(bme280)
            }
            Err(e) => {
                log::warn!("Missing BME280 sensor: {e:#}");
                None
            }
        };

        let mhz19c = match init_mhz19c() {
            Ok(mhz19c) => {
                log::info!("Found MH-Z19C sensor");
                Some(mhz19c)
            }
            Err(e) => {
                log::warn!("Missing MH-Z19C sensor: {e:#}");
                None
            }
        };

        Sensors {
            delay,
            bme280,
            mhz19c,
        }
    }

    pub fn names(&self) -> SensorNames {
        sensor_names(self.bme280.is_some(), self.mhz19c.is_some())
    }

    pub fn sample(&mut self) -> Sample {
        let climate = self.bme280.as_mut().and_then(|bme280| {
            let delay = &mut self.delay;
            match (|| bme280.measure(&mut *delay))
                .retry(retry_builder())
                .notify(|e, dur| {
                    log::error!("{e}");
                    log::info!("Retrying in {:?}", dur);
                })
                .call()
            {
                Ok(m) => Some(Climate {
                    temperature: m.temperature,
                    humidity: m.humidity,
                    pressure: m.pressure / PASCALS_PER_HECTOPASCAL,
                }),
                Err(e) => {
                    log::error!("Failed to read BME280 measurements: {e}");
                    None
                }
            }
        });

        let co2_ppm = self
            .mhz19c
            .as_mut()
            .and_then(|mhz19c| match mhz19c.read_co2_concentration() {
                Ok(co2) => Some(co2),
                Err(e) => {
                    log::error!("Failed to read MH-Z19C CO2 concentration: {e:#}");
                    None
                }
            });

        let sample = Sample { climate, co2_ppm };
        log::debug!("{sample:?}");
        sample
    }
}

pub fn sensor_names(has_bme280: bool, has_mhz19c: bool) -> SensorNames {
    let climate = has_bme280.then_some(BME280_NAME);
    SensorNames {
        temperature: climate,
        humidity: climate,
        pressure: climate,
        co2: has_mhz19c.then_some(MHZ19C_NAME),
        ..SensorNames::default()
    }
}

fn init_bme280(delay: &mut Delay) -> Result<BME280<I2c>, anyhow::Error> {
    let mut bme280 = BME280::new_primary(I2c::new().context("Failed to initialize I2C")?);
    (|| bme280.init(&mut *delay))
        .retry(retry_builder())
        .notify(|e, dur| {
            log::error!("{e}");
            log::info!("Retrying in {:?}", dur);
        })
        .call()
        .context("Failed to initialize BME280")?;
    Ok(bme280)
}

fn init_mhz19c() -> Result<MHZ19C, anyhow::Error> {
    let mut mhz19c = MHZ19C::new().context("Failed to initialize MH-Z19C")?;
    (|| mhz19c.init())
        .retry(retry_builder())
        .notify(|e, dur| {
            log::error!("{e}");
            log::info!("Retrying in {:?}", dur);
        })
        .call()?;
    Ok(mhz19c)
}

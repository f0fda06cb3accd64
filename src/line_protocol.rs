//! InfluxDB line protocol for measurement records.

use crate::measurement::{MeasurementRecord, SensorNames};

pub const MEASUREMENT: &str = "environment";
pub const DEVICE: &str = "raspberrypi";

#[derive(Debug, Clone)]
pub struct LineEncoder {
    tags: String,
    sensors: SensorNames,
}

impl LineEncoder {
    pub fn new(client_id: &str, sensors: SensorNames) -> Self {
        let tags = format!(
            "clientId={},device={}",
            escape_tag(client_id),
            escape_tag(DEVICE)
        );
        Self { tags, sensors }
    }

    /// Encodes one record, skipping unmeasured fields.
    ///
    /// Each measured field also gets a `<Field>Sensor` tag naming the sensor
    /// that produced it. Returns `None` when nothing in the record was
    /// measured, since a line needs at least one field.
    pub fn encode(&self, record: &MeasurementRecord) -> Option<String> {
        let mut tags = self.tags.clone();
        let mut fields = Vec::with_capacity(7);
        let location = record.location();
        let has_location = location.latitude.is_finite() && location.longitude.is_finite();

        for (key, value, sensor) in [
            ("Temperature", record.temperature, self.sensors.temperature),
            ("Humidity", record.humidity, self.sensors.humidity),
            ("Pressure", record.pressure, self.sensors.pressure),
        ] {
            if value.is_finite() {
                fields.push(format!("{key}={value}"));
                sensor_tag(&mut tags, key, sensor);
            }
        }
        for (key, value, sensor) in [
            ("CO2", record.co2, self.sensors.co2),
            ("TVOC", record.tvoc, self.sensors.tvoc),
        ] {
            if value.is_finite() {
                fields.push(format!("{key}={}i", value.round() as i64));
                sensor_tag(&mut tags, key, sensor);
            }
        }
        if has_location {
            fields.push(format!("Lat={}", location.latitude));
            fields.push(format!("Lon={}", location.longitude));
            sensor_tag(&mut tags, "GPS", self.sensors.gps);
        }

        if fields.is_empty() {
            return None;
        }

        Some(format!(
            "{MEASUREMENT},{tags} {} {}",
            fields.join(","),
            record.timestamp
        ))
    }

    /// Newline-separated body for a write request.
    pub fn encode_batch(&self, records: &[MeasurementRecord]) -> String {
        records
            .iter()
            .filter_map(|record| self.encode(record))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn sensor_tag(tags: &mut String, key: &str, sensor: Option<&str>) {
    if let Some(sensor) = sensor {
        tags.push_str(&format!(",{key}Sensor={}", escape_tag(sensor)));
    }
}

fn escape_tag(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, ',' | '=' | ' ') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

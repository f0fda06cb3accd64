/// Quiet NaN marking a field that was not measured this cycle.
pub const NOT_MEASURED: f32 = f32::NAN;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

impl Location {
    pub const DEFAULT: Location = Location {
        latitude: 50.0873254,
        longitude: 14.4071543,
    };
}

impl Default for Location {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Which sensor model feeds each field. `None` means nothing on this node
/// measures it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SensorNames {
    pub temperature: Option<&'static str>,
    pub humidity: Option<&'static str>,
    pub pressure: Option<&'static str>,
    pub co2: Option<&'static str>,
    pub tvoc: Option<&'static str>,
    pub gps: Option<&'static str>,
}

/// One sampled snapshot.
///
/// Every float field is independently optional: [`NOT_MEASURED`] in one of
/// them says nothing about the others. Records live as slots inside the
/// retention buffer and are overwritten in place.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeasurementRecord {
    /// °C
    pub temperature: f32,
    /// % RH
    pub humidity: f32,
    /// hPa
    pub pressure: f32,
    /// ppm
    pub co2: f32,
    /// ppb
    pub tvoc: f32,
    pub latitude: f64,
    pub longitude: f64,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
}

impl MeasurementRecord {
    pub const EMPTY: MeasurementRecord = MeasurementRecord {
        temperature: NOT_MEASURED,
        humidity: NOT_MEASURED,
        pressure: NOT_MEASURED,
        co2: NOT_MEASURED,
        tvoc: NOT_MEASURED,
        latitude: f64::NAN,
        longitude: f64::NAN,
        timestamp: 0,
    };

    /// A record with no sensor values, placed at `fallback`.
    pub fn unmeasured(fallback: Location, timestamp: u64) -> Self {
        Self {
            latitude: fallback.latitude,
            longitude: fallback.longitude,
            timestamp,
            ..Self::EMPTY
        }
    }

    /// Clears a reused slot before the producer fills it.
    pub fn reset(&mut self, fallback: Location, timestamp: u64) {
        *self = Self::unmeasured(fallback, timestamp);
    }

    pub fn location(&self) -> Location {
        Location {
            latitude: self.latitude,
            longitude: self.longitude,
        }
    }
}

impl Default for MeasurementRecord {
    fn default() -> Self {
        Self::EMPTY
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unmeasured_keeps_fallback_location() {
        let fallback = Location {
            latitude: 1.5,
            longitude: -2.25,
        };
        let record = MeasurementRecord::unmeasured(fallback, 42);

        assert!(record.temperature.is_nan());
        assert!(record.humidity.is_nan());
        assert!(record.pressure.is_nan());
        assert!(record.co2.is_nan());
        assert!(record.tvoc.is_nan());
        assert_eq!(record.location(), fallback);
        assert_eq!(record.timestamp, 42);
    }

    #[test]
    fn test_reset_clears_previous_values() {
        let mut record = MeasurementRecord {
            temperature: 21.5,
            humidity: 40.0,
            pressure: 1013.25,
            co2: 600.0,
            tvoc: 12.0,
            latitude: 0.0,
            longitude: 0.0,
            timestamp: 1,
        };
        record.reset(Location::DEFAULT, 2);

        assert!(record.temperature.is_nan());
        assert!(record.co2.is_nan());
        assert_eq!(record.location(), Location::DEFAULT);
        assert_eq!(record.timestamp, 2);
    }

    #[test]
    fn test_missing_field_does_not_affect_others() {
        let mut record = MeasurementRecord::unmeasured(Location::DEFAULT, 0);
        record.temperature = 19.0;

        assert_eq!(record.temperature, 19.0);
        assert!(record.humidity.is_nan());
    }
}

use serde::{Deserialize, Serialize};

/// A single measured quantity, published on its own topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Quantity name, also the last topic segment (e.g., "temperature").
    pub path: String,
    /// Measured value.
    pub value: f64,
    /// Unit of measurement (e.g., "C", "hPa", "%").
    pub unit: String,
}

impl Reading {
    pub fn new(path: impl Into<String>, value: f64, unit: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            value,
            unit: unit.into(),
        }
    }

    /// Serialize into the JSON wire payload, rounding `value` to 2 decimals.
    pub fn to_payload(&self) -> serde_json::Result<Vec<u8>> {
        let wire = Reading {
            value: round_hundredths(self.value),
            ..self.clone()
        };
        serde_json::to_vec(&wire)
    }
}

/// Round to 2 decimal places, exact halves to even (`21.125` -> `21.12`).
pub fn round_hundredths(value: f64) -> f64 {
    (value * 100.0).round_ties_even() / 100.0
}

/// Quantities reported by the environmental sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quantity {
    Temperature,
    Pressure,
    Humidity,
}

impl Quantity {
    /// Publish order within one sampling cycle.
    pub const ALL: [Quantity; 3] = [Quantity::Temperature, Quantity::Pressure, Quantity::Humidity];

    pub fn path(self) -> &'static str {
        match self {
            Quantity::Temperature => "temperature",
            Quantity::Pressure => "pressure",
            Quantity::Humidity => "humidity",
        }
    }

    pub fn unit(self) -> &'static str {
        match self {
            Quantity::Temperature => "C",
            Quantity::Pressure => "hPa",
            Quantity::Humidity => "%",
        }
    }
}

/// One fresh sample from the sensor, already in published units.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SensorSample {
    /// Degrees Celsius.
    pub temperature: f64,
    /// Hectopascals.
    pub pressure: f64,
    /// Relative humidity, percent.
    pub humidity: f64,
}

impl SensorSample {
    pub fn value(&self, quantity: Quantity) -> f64 {
        match quantity {
            Quantity::Temperature => self.temperature,
            Quantity::Pressure => self.pressure,
            Quantity::Humidity => self.humidity,
        }
    }

    /// Expand into temperature, pressure and humidity readings, in that order.
    pub fn readings(&self) -> [Reading; 3] {
        Quantity::ALL.map(|q| Reading::new(q.path(), self.value(q), q.unit()))
    }
}

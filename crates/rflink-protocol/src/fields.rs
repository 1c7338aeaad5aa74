//! Attribute tables: field names, units and value conversions.
//!
//! Gateway reports carry attributes as `KEY=value` pairs using short
//! abbreviations (`TEMP`, `HUM`, `WINSP`, ...). Each known abbreviation maps
//! to a descriptive field name, an optional display unit and an optional
//! conversion from the raw (often hexadecimal) wire value.

use std::fmt;

use serde::Serialize;

use crate::error::{PacketError, PacketResult};

/// A decoded attribute value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    Int(i64),
    Float(f64),
}

impl FieldValue {
    /// Get the value as a string slice, if it is text.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Text(s) => f.write_str(s),
            FieldValue::Int(v) => write!(f, "{}", v),
            // keep a trailing `.0` so readings look like readings
            FieldValue::Float(v) if v.is_finite() && v.fract() == 0.0 => write!(f, "{:.1}", v),
            FieldValue::Float(v) => write!(f, "{}", v),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

/// Conversion applied to a raw attribute value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conversion {
    /// Sign-magnitude hex in tenths, bit 15 is the sign (`800d` is -1.3).
    SignedTenths,
    /// Unsigned hex in tenths.
    HexTenths,
    /// Unsigned hex integer.
    Hex,
    /// Plain decimal integer.
    Decimal,
    /// Compass point index (0-15) converted to degrees.
    WindDirection,
    /// Weather forecast code.
    Forecast,
    /// Humidity status code.
    HumidityStatus,
}

const FORECAST_LOOKUP: &[(&str, &str)] = &[
    ("0", "no_info"),
    ("1", "sunny"),
    ("2", "partly_cloudy"),
    ("3", "cloudy"),
    ("4", "rain"),
];

const HUMIDITY_STATUS_LOOKUP: &[(&str, &str)] = &[
    ("0", "normal"),
    ("1", "comfortable"),
    ("2", "dry"),
    ("3", "wet"),
];

fn lookup(table: &[(&str, &'static str)], code: &str) -> FieldValue {
    let value = table
        .iter()
        .find(|(k, _)| *k == code)
        .map(|(_, v)| *v)
        .unwrap_or("Unknown");
    FieldValue::Text(value.to_string())
}

impl Conversion {
    /// Name of the conversion, used in diagnostics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Conversion::SignedTenths => "signed_tenths",
            Conversion::HexTenths => "hex_tenths",
            Conversion::Hex => "hex",
            Conversion::Decimal => "decimal",
            Conversion::WindDirection => "wind_direction",
            Conversion::Forecast => "forecast",
            Conversion::HumidityStatus => "humidity_status",
        }
    }

    /// Convert a raw (lower-cased) attribute value.
    pub fn apply(&self, key: &str, raw: &str) -> PacketResult<FieldValue> {
        let invalid = || PacketError::InvalidValue {
            key: key.to_string(),
            value: raw.to_string(),
            conversion: self.as_str(),
        };
        let hex = || i64::from_str_radix(raw, 16).map_err(|_| invalid());
        let decimal = || raw.parse::<i64>().map_err(|_| invalid());

        let value = match self {
            Conversion::SignedTenths => {
                let v = hex()?;
                if v & 0x8000 != 0 {
                    FieldValue::Float(-((v & 0x7FFF) as f64) / 10.0)
                } else {
                    FieldValue::Float(v as f64 / 10.0)
                }
            }
            Conversion::HexTenths => FieldValue::Float(hex()? as f64 / 10.0),
            Conversion::Hex => FieldValue::Int(hex()?),
            Conversion::Decimal => FieldValue::Int(decimal()?),
            Conversion::WindDirection => FieldValue::Float(decimal()? as f64 * 22.5),
            Conversion::Forecast => lookup(FORECAST_LOOKUP, raw),
            Conversion::HumidityStatus => lookup(HUMIDITY_STATUS_LOOKUP, raw),
        };
        Ok(value)
    }
}

/// Static description of one attribute abbreviation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    /// Lower-cased wire abbreviation (`temp`).
    pub abbrev: &'static str,
    /// Descriptive field name (`temperature`).
    pub name: &'static str,
    /// Display unit, when one is known independent of the sensor.
    pub unit: Option<&'static str>,
    /// Conversion from the raw wire value, if any.
    pub conversion: Option<Conversion>,
}

const fn spec(
    abbrev: &'static str,
    name: &'static str,
    unit: Option<&'static str>,
    conversion: Option<Conversion>,
) -> FieldSpec {
    FieldSpec {
        abbrev,
        name,
        unit,
        conversion,
    }
}

use Conversion::*;

/// All known attribute abbreviations, sorted by abbreviation.
///
/// Units left as `None` depend on the reporting sensor.
pub const FIELDS: &[FieldSpec] = &[
    spec("awinsp", "average_windspeed", Some("km/h"), Some(HexTenths)),
    spec("baro", "barometric_pressure", None, Some(Hex)),
    spec("bat", "battery", None, None),
    spec("bforecast", "weather_forecast", None, Some(Forecast)),
    spec("chime", "doorbell_melody", None, Some(Decimal)),
    spec("cmd", "command", None, None),
    spec("co2", "co2_air_quality", None, Some(Decimal)),
    spec("current", "current_phase_1", Some("A"), Some(Decimal)),
    spec("current2", "current_phase_2", Some("A"), Some(Decimal)),
    spec("current3", "current_phase_3", Some("A"), Some(Decimal)),
    spec("dist", "distance", None, Some(Decimal)),
    spec("fw", "firmware", None, None),
    spec("hstatus", "humidity_status", None, Some(HumidityStatus)),
    spec("hum", "humidity", Some("%"), Some(Decimal)),
    spec("hw", "hardware", None, None),
    spec("kwatt", "kilowatt", Some("kW"), Some(Hex)),
    spec("lux", "light_intensity", Some("lux"), Some(Hex)),
    spec("meter", "meter_value", None, Some(Decimal)),
    spec("rain", "total_rain", Some("mm"), Some(HexTenths)),
    spec("rainrate", "rain_rate", Some("mm"), Some(HexTenths)),
    spec("raintot", "total_rain", Some("mm"), Some(HexTenths)),
    spec("rev", "revision", None, None),
    spec("sound", "noise_level", None, Some(Decimal)),
    spec("temp", "temperature", Some("°C"), Some(SignedTenths)),
    spec("uv", "uv_intensity", None, Some(Hex)),
    spec("ver", "version", None, None),
    spec("volt", "voltage", Some("v"), Some(Decimal)),
    spec("watt", "watt", Some("w"), Some(Hex)),
    spec("winchl", "windchill", Some("°C"), Some(SignedTenths)),
    spec("windir", "winddirection", Some("°"), Some(WindDirection)),
    spec("wings", "windgusts", Some("km/h"), Some(HexTenths)),
    spec("winsp", "windspeed", Some("km/h"), Some(HexTenths)),
    spec("wintmp", "windtemp", Some("°C"), Some(SignedTenths)),
];

/// Look up the spec for a lower-cased wire abbreviation.
pub fn field_spec(abbrev: &str) -> Option<&'static FieldSpec> {
    FIELDS.iter().find(|f| f.abbrev == abbrev)
}

/// Reverse lookup: the abbreviation used in event ids for a field name.
///
/// Where several abbreviations share a name (`rain` and `raintot`), the
/// alphabetically first one wins.
pub fn abbreviation(name: &str) -> Option<&'static str> {
    FIELDS.iter().find(|f| f.name == name).map(|f| f.abbrev)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fields_sorted_and_unique() {
        for pair in FIELDS.windows(2) {
            assert!(pair[0].abbrev < pair[1].abbrev, "{} >= {}", pair[0].abbrev, pair[1].abbrev);
        }
    }

    #[test]
    fn test_signed_tenths() {
        assert_eq!(SignedTenths.apply("temp", "00cf").unwrap(), FieldValue::Float(20.7));
        assert_eq!(SignedTenths.apply("temp", "800d").unwrap(), FieldValue::Float(-1.3));
    }

    #[test]
    fn test_hex_and_decimal() {
        assert_eq!(HexTenths.apply("rain", "0010").unwrap(), FieldValue::Float(1.6));
        assert_eq!(Hex.apply("lux", "00ff").unwrap(), FieldValue::Int(255));
        assert_eq!(Decimal.apply("hum", "16").unwrap(), FieldValue::Int(16));
        assert_eq!(WindDirection.apply("windir", "0005").unwrap(), FieldValue::Float(112.5));
    }

    #[test]
    fn test_code_lookups() {
        assert_eq!(Forecast.apply("bforecast", "1").unwrap(), FieldValue::from("sunny"));
        assert_eq!(HumidityStatus.apply("hstatus", "0").unwrap(), FieldValue::from("normal"));
        assert_eq!(Forecast.apply("bforecast", "9").unwrap(), FieldValue::from("Unknown"));
    }

    #[test]
    fn test_invalid_value() {
        let err = Decimal.apply("hum", "zz").unwrap_err();
        assert!(matches!(err, PacketError::InvalidValue { ref key, .. } if key == "hum"));
    }

    #[test]
    fn test_abbreviation_prefers_first() {
        assert_eq!(abbreviation("total_rain"), Some("rain"));
        assert_eq!(abbreviation("temperature"), Some("temp"));
        assert_eq!(abbreviation("build"), None);
    }

    #[test]
    fn test_display_float() {
        assert_eq!(FieldValue::Float(1.0).to_string(), "1.0");
        assert_eq!(FieldValue::Float(20.7).to_string(), "20.7");
        assert_eq!(FieldValue::Int(16).to_string(), "16");
    }
}

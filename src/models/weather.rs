use serde::{Deserialize, Serialize};

/// Seven-day weather summary used to tailor treatment advice.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeeklyAverages {
    /// Degrees Celsius.
    pub avg_temp: f64,
    /// Relative humidity, percent.
    pub avg_humidity: f64,
    /// Sunshine hours per day.
    pub avg_sunlight: f64,
}

/// Caller location as sent by the client. Either coordinate may be absent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct Location {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl Location {
    /// Both coordinates, if the location is usable for a weather lookup.
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) if lat.is_finite() && lon.is_finite() => Some((lat, lon)),
            _ => None,
        }
    }
}

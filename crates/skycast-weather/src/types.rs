use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use skycast_core::Units;

/// Coarse sky state derived from an Open-Meteo weather code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WeatherCondition {
    #[default]
    Clear,
    PartlyCloudy,
    Cloudy,
    Fog,
    Drizzle,
    Rain,
    HeavyRain,
    Snow,
    Sleet,
    Thunderstorm,
    Unknown,
}

/// Per-code wording: (code, condition, English, Chinese).
const CODE_TABLE: &[(i32, WeatherCondition, &str, &str)] = &[
    (0, WeatherCondition::Clear, "Clear sky", "晴空"),
    (1, WeatherCondition::PartlyCloudy, "Mainly clear", "多云转晴"),
    (2, WeatherCondition::PartlyCloudy, "Partly cloudy", "多云"),
    (3, WeatherCondition::Cloudy, "Overcast", "阴"),
    (45, WeatherCondition::Fog, "Fog", "雾"),
    (48, WeatherCondition::Fog, "Depositing rime fog", "霜雾"),
    (51, WeatherCondition::Drizzle, "Light drizzle", "小毛毛雨"),
    (53, WeatherCondition::Drizzle, "Moderate drizzle", "中毛毛雨"),
    (55, WeatherCondition::Drizzle, "Dense drizzle", "大毛毛雨"),
    (56, WeatherCondition::Sleet, "Light freezing drizzle", "小冻雨"),
    (57, WeatherCondition::Sleet, "Dense freezing drizzle", "大冻雨"),
    (61, WeatherCondition::Rain, "Slight rain", "小雨"),
    (63, WeatherCondition::Rain, "Moderate rain", "中雨"),
    (65, WeatherCondition::HeavyRain, "Heavy rain", "大雨"),
    (66, WeatherCondition::Sleet, "Light freezing rain", "小冻雨"),
    (67, WeatherCondition::Sleet, "Heavy freezing rain", "大冻雨"),
    (71, WeatherCondition::Snow, "Slight snow fall", "小雪"),
    (73, WeatherCondition::Snow, "Moderate snow fall", "中雪"),
    (75, WeatherCondition::Snow, "Heavy snow fall", "大雪"),
    (77, WeatherCondition::Snow, "Snow grains", "米雪"),
    (80, WeatherCondition::Rain, "Slight rain showers", "小阵雨"),
    (81, WeatherCondition::HeavyRain, "Moderate rain showers", "中阵雨"),
    (82, WeatherCondition::HeavyRain, "Violent rain showers", "大阵雨"),
    (85, WeatherCondition::Snow, "Slight snow showers", "小阵雪"),
    (86, WeatherCondition::Snow, "Heavy snow showers", "大阵雪"),
    (95, WeatherCondition::Thunderstorm, "Thunderstorm", "雷暴"),
    (96, WeatherCondition::Thunderstorm, "Thunderstorm with slight hail", "雷暴伴小冰雹"),
    (99, WeatherCondition::Thunderstorm, "Thunderstorm with heavy hail", "雷暴伴大冰雹"),
];

fn code_entry(code: i32) -> Option<&'static (i32, WeatherCondition, &'static str, &'static str)> {
    CODE_TABLE.iter().find(|(c, ..)| *c == code)
}

impl WeatherCondition {
    /// Codes outside the published table map to `Unknown`.
    pub fn from_code(code: i32) -> Self {
        code_entry(code).map_or(WeatherCondition::Unknown, |(_, condition, ..)| *condition)
    }

    pub fn label(self) -> &'static str {
        match self {
            WeatherCondition::Clear => "clear",
            WeatherCondition::PartlyCloudy => "partly cloudy",
            WeatherCondition::Cloudy => "cloudy",
            WeatherCondition::Fog => "fog",
            WeatherCondition::Drizzle => "drizzle",
            WeatherCondition::Rain => "rain",
            WeatherCondition::HeavyRain => "heavy rain",
            WeatherCondition::Snow => "snow",
            WeatherCondition::Sleet => "sleet",
            WeatherCondition::Thunderstorm => "thunderstorm",
            WeatherCondition::Unknown => "unknown",
        }
    }
}

/// Text for a weather code in `language`. Only `zh` has its own wording;
/// every other language gets English.
pub fn describe_code(code: i32, language: &str) -> String {
    match code_entry(code) {
        Some((_, _, _, zh)) if language.eq_ignore_ascii_case("zh") => (*zh).to_string(),
        Some((_, _, en, _)) => (*en).to_string(),
        None if language.eq_ignore_ascii_case("zh") => format!("未知天气代码 {}", code),
        None => format!("Unknown code {}", code),
    }
}

/// One geocoding candidate, in provider relevance order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub name: String,
    pub country: Option<String>,
    /// State or province
    pub admin1: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub timezone: Option<String>,
}

impl Candidate {
    /// "Name, Region, Country" with empty and repeated parts dropped.
    pub fn label(&self) -> String {
        let mut parts: Vec<&str> = vec![self.name.trim()];
        for part in [self.admin1.as_deref(), self.country.as_deref()]
            .into_iter()
            .flatten()
        {
            let part = part.trim();
            if !part.is_empty() && !parts.contains(&part) {
                parts.push(part);
            }
        }
        parts.retain(|p| !p.is_empty());
        parts.join(", ")
    }
}

/// Cached result of one geocoding query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeocodeResult {
    /// Normalized query the candidates were returned for
    pub city_query: String,
    pub candidates: Vec<Candidate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentWeather {
    pub temperature: f64,
    pub wind_speed: f64,
    pub wind_direction: f64,
    pub weather_code: i32,
    pub condition: WeatherCondition,
    /// Code wording, English until the report is localized
    pub summary: String,
    pub is_day: bool,
    /// Observation time in the location's local time
    pub observed_at: NaiveDateTime,
}

/// One day of a daily forecast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayForecast {
    pub date: NaiveDate,
    pub high: f64,
    pub low: f64,
    pub weather_code: i32,
    pub condition: WeatherCondition,
    pub summary: String,
    pub precipitation_chance: Option<u8>,
}

/// One hour of an hourly forecast, in local time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourlyForecast {
    pub time: NaiveDateTime,
    pub temperature: f64,
    pub weather_code: i32,
    pub condition: WeatherCondition,
    pub summary: String,
    pub wind_speed: Option<f64>,
    pub humidity: Option<u8>,
    pub precipitation_chance: Option<u8>,
}

/// Local clock reading for a timezone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalTime {
    pub timezone: String,
    /// RFC 3339 timestamp with the local offset
    pub local_time: String,
    /// e.g. "UTC+8", "UTC-3:30"
    pub utc_offset: String,
    pub weekday: String,
    /// True when the zone was estimated from longitude
    pub estimated: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentReport {
    pub location: Candidate,
    pub units: Units,
    pub current: CurrentWeather,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyReport {
    pub location: Candidate,
    pub units: Units,
    pub days: Vec<DayForecast>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourlyReport {
    pub location: Candidate,
    pub units: Units,
    pub hours: Vec<HourlyForecast>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalTimeReport {
    pub location: Candidate,
    pub time: LocalTime,
}

impl CurrentReport {
    pub fn localize(mut self, language: &str) -> Self {
        self.current.summary = describe_code(self.current.weather_code, language);
        self
    }
}

impl DailyReport {
    pub fn localize(mut self, language: &str) -> Self {
        for day in &mut self.days {
            day.summary = describe_code(day.weather_code, language);
        }
        self
    }
}

impl HourlyReport {
    pub fn localize(mut self, language: &str) -> Self {
        for hour in &mut self.hours {
            hour.summary = describe_code(hour.weather_code, language);
        }
        self
    }
}

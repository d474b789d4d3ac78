use chrono::{DateTime, Datelike, Utc, Weekday};
use chrono_tz::Tz;
use std::str::FromStr;

/// Get the local timezone as a chrono_tz::Tz
/// If configured_timezone is provided, it will be used
/// Otherwise, falls back to the system timezone from iana-time-zone
/// If both fail, defaults to Asia::Tokyo
pub fn get_local_timezone(configured_timezone: Option<&str>) -> Tz {
    // First try to use the configured timezone if provided
    if let Some(tz_str) = configured_timezone {
        if let Ok(tz) = Tz::from_str(tz_str) {
            return tz;
        }
    }

    // Otherwise try to get the system timezone
    match iana_time_zone::get_timezone() {
        Ok(tz_str) => Tz::from_str(&tz_str).unwrap_or(chrono_tz::Asia::Tokyo),
        Err(_) => chrono_tz::Asia::Tokyo,
    }
}

/// Date label stored with an entry, e.g. `10月 19日`.
pub fn date_label(now: DateTime<Utc>, timezone: Tz) -> String {
    let local = now.with_timezone(&timezone);
    format!("{}月 {}日", local.month(), local.day())
}

/// Weekday in hiragana, e.g. `げつようび`.
pub fn day_label(now: DateTime<Utc>, timezone: Tz) -> &'static str {
    match now.with_timezone(&timezone).weekday() {
        Weekday::Sun => "にちようび",
        Weekday::Mon => "げつようび",
        Weekday::Tue => "かようび",
        Weekday::Wed => "すいようび",
        Weekday::Thu => "もくようび",
        Weekday::Fri => "きんようび",
        Weekday::Sat => "どようび",
    }
}

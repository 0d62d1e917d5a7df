// Display formatting shared by lead rows, bucket labels, and notices.

use std::fmt::Display;

use chrono::{DateTime, TimeZone};

/// Group the integer part in threes and keep up to three fraction digits,
/// e.g. `1200000.0 -> "1,200,000"`, `1500.25 -> "1,500.25"`.
pub fn grouped(value: f64) -> String {
    let negative = value < 0.0;
    let text = format!("{:.3}", value.abs());
    let (digits, fraction) = text.split_once('.').unwrap_or((text.as_str(), ""));
    let fraction = fraction.trim_end_matches('0');

    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 5);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    if !fraction.is_empty() {
        out.push('.');
        out.push_str(fraction);
    }
    if negative && out != "0" {
        out.insert(0, '-');
    }
    out
}

pub fn money(currency: &str, value: f64) -> String {
    format!("{currency}{}", grouped(value))
}

/// Compact bucket-boundary form: `0`, `200k`, `1m`, `1.5m`.
pub fn compact(currency: &str, value: f64) -> String {
    let (scaled, suffix) = if value >= 1_000_000.0 {
        (value / 1_000_000.0, "m")
    } else if value >= 1_000.0 {
        (value / 1_000.0, "k")
    } else {
        (value, "")
    };
    let scaled = (scaled * 100.0).round() / 100.0;
    format!("{currency}{scaled}{suffix}")
}

/// A fractional rate as a two-decimal percentage: `0.0425 -> "4.25%"`.
pub fn percent(rate: f64) -> String {
    format!("{:.2}%", rate * 100.0)
}

/// `3 March 2024`
pub fn long_date<Tz: TimeZone>(ts: &DateTime<Tz>) -> String
where
    Tz::Offset: Display,
{
    ts.format("%-d %B %Y").to_string()
}

/// `9:05:07 AM`
pub fn clock_time<Tz: TimeZone>(ts: &DateTime<Tz>) -> String
where
    Tz::Offset: Display,
{
    ts.format("%-I:%M:%S %p").to_string()
}

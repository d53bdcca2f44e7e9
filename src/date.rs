use std::sync::LazyLock;

use chrono::{Datelike, NaiveDate};
use regex::Regex;

pub const UNKNOWN: &str = "Unknown";

static WHOLE_YEAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([0-9]{4})\b").expect("valid year pattern"));
static CENTURY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)([0-9]{1,2})(?:st|nd|rd|th)?\s*century").expect("valid century pattern")
});
static DECADE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([0-9]{3})0s").expect("valid decade pattern"));
static ANY_YEAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[0-9]{4}").expect("valid digit pattern"));

/// Layouts tried in order once no standalone year was found. Partial layouts
/// are padded to a full date before parsing. Every layout needs a four-digit
/// year.
const LAYOUTS: &[(&str, &str, &str)] = &[
    ("%Y-%m-%d", "", "-01-01"),
    ("%Y-%m-%d", "", ""),
    ("%d/%m/%Y", "", ""),
    ("%d %B %Y", "1 ", ""),
    ("%Y-%m-%d", "", "-01"),
];

/// Best-effort year for free-form date text. `None` means unknown.
///
/// Rules apply in priority order: ranges, standalone years, exact layouts,
/// century and decade references, then any run of four digits.
pub fn normalize_year(text: &str) -> Option<i32> {
    let text = text.trim();
    if text.is_empty() || text == UNKNOWN {
        return None;
    }

    if text.contains('-') {
        let years = WHOLE_YEAR
            .captures_iter(text)
            .filter_map(|caps| caps[1].parse::<i32>().ok())
            .collect::<Vec<_>>();
        if years.len() >= 2 {
            return years.into_iter().min();
        }
    }

    if let Some(year) = WHOLE_YEAR
        .captures_iter(text)
        .find_map(|caps| caps[1].parse::<i32>().ok())
    {
        return Some(year);
    }

    if let Some(year) = parse_layouts(text) {
        return Some(year);
    }

    if let Some(caps) = CENTURY.captures(text) {
        let century: i32 = caps[1].parse().ok()?;
        return Some((century - 1) * 100 + 50);
    }

    if let Some(caps) = DECADE.captures(text) {
        return format!("{}5", &caps[1]).parse().ok();
    }

    ANY_YEAR
        .find(text)
        .and_then(|found| found.as_str().parse().ok())
}

fn parse_layouts(text: &str) -> Option<i32> {
    LAYOUTS.iter().find_map(|(layout, prefix, suffix)| {
        let padded = format!("{prefix}{text}{suffix}");
        NaiveDate::parse_from_str(&padded, layout)
            .ok()
            .map(|date| date.year())
            .filter(|year| (1000..=9999).contains(year))
    })
}

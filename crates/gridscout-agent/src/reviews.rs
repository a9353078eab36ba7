//! Review statistics derived from a listing's detail fetch.
//!
//! Review dates are usually shown relative to today ("3 weeks ago",
//! "vor 2 Monaten"), so parsing takes an explicit reference date. Months
//! count as 30 days and years as 365.

use crate::agent::DetailItem;
use chrono::{Duration, NaiveDate};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Ratings at or above this count as good.
const GOOD_RATING: u8 = 4;
/// Ratings at or below this (and above zero) count as bad.
const BAD_RATING: u8 = 2;
/// Window for the review frequency statistic.
const FREQUENCY_WINDOW_DAYS: i64 = 365;
/// Absolute date layouts, tried in order. Day-first wins over month-first.
const ABSOLUTE_FORMATS: [&str; 4] = ["%Y-%m-%d", "%d.%m.%Y", "%d/%m/%Y", "%m/%d/%Y"];

/// Aggregate statistics over one listing's reviews.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReviewMetrics {
    pub total: u32,
    pub good: u32,
    pub bad: u32,
    pub neutral: u32,
    /// Percentage of good reviews with an owner response
    pub good_reply_rate: f64,
    /// Percentage of bad reviews with an owner response
    pub bad_reply_rate: f64,
    /// Mean gap between consecutive reviews over the last year, when at
    /// least two dated reviews fall in that window
    pub avg_days_between_reviews: Option<f64>,
    /// Whether the detail fetch covered every review the listing advertises
    pub complete: bool,
}

fn english_relative() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(\d+|a|an|one)\s+(minute|hour|day|week|month|year)s?\s+ago$")
            .expect("valid english date regex")
    })
}

fn german_relative() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^vor\s+(\d+|einer|einem|eins)\s+(minute|minuten|stunde|stunden|tag|tagen|woche|wochen|monat|monaten|jahr|jahren)$")
            .expect("valid german date regex")
    })
}

/// Parse a displayed review date relative to `today`.
///
/// Understands English and German relative phrases, "today"/"yesterday"
/// and their German forms, and numeric absolute dates. Returns `None` for anything else.
pub fn parse_review_date(text: &str, today: NaiveDate) -> Option<NaiveDate> {
    let lowered = text.trim().to_lowercase();
    let cleaned = lowered
        .trim_start_matches("edited")
        .trim_start_matches("bearbeitet")
        .trim_start_matches(':')
        .trim();

    match cleaned {
        "today" | "heute" | "just now" | "gerade eben" => return Some(today),
        "yesterday" | "gestern" => return Some(today - Duration::days(1)),
        _ => {}
    }

    for format in ABSOLUTE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(cleaned, format) {
            return Some(date);
        }
    }

    let (amount, unit) = if let Some(caps) = english_relative().captures(cleaned) {
        (parse_amount(&caps[1])?, caps[2].to_string())
    } else if let Some(caps) = german_relative().captures(cleaned) {
        (parse_amount(&caps[1])?, caps[2].to_string())
    } else {
        return None;
    };

    let days = match unit.as_str() {
        "minute" | "minuten" | "hour" | "stunde" | "stunden" => 0,
        "day" | "tag" | "tagen" => amount,
        "week" | "woche" | "wochen" => amount.checked_mul(7)?,
        "month" | "monat" | "monaten" => amount.checked_mul(30)?,
        "year" | "jahr" | "jahren" => amount.checked_mul(365)?,
        _ => return None,
    };
    today.checked_sub_signed(Duration::try_days(days)?)
}

fn parse_amount(token: &str) -> Option<i64> {
    match token {
        "a" | "an" | "one" | "einer" | "einem" | "eins" => Some(1),
        digits => digits.parse().ok(),
    }
}

/// Compute review statistics, dating reviews against `today`.
///
/// Reviews with rating 0 count toward the total but toward no rating
/// class. Undatable reviews are left out of the frequency statistic.
pub fn analyze_reviews(items: &[DetailItem], complete: bool, today: NaiveDate) -> ReviewMetrics {
    let mut metrics = ReviewMetrics {
        total: u32::try_from(items.len()).unwrap_or(u32::MAX),
        complete,
        ..ReviewMetrics::default()
    };

    let (mut good_replied, mut bad_replied) = (0_u32, 0_u32);
    for item in items {
        match item.rating {
            0 => {}
            r if r >= GOOD_RATING => {
                metrics.good += 1;
                good_replied += u32::from(item.has_owner_response());
            }
            r if r <= BAD_RATING => {
                metrics.bad += 1;
                bad_replied += u32::from(item.has_owner_response());
            }
            _ => metrics.neutral += 1,
        }
    }
    metrics.good_reply_rate = percentage(good_replied, metrics.good);
    metrics.bad_reply_rate = percentage(bad_replied, metrics.bad);

    let cutoff = today - Duration::days(FREQUENCY_WINDOW_DAYS);
    let mut dates: Vec<NaiveDate> = items
        .iter()
        .filter_map(|item| {
            let date = parse_review_date(&item.date_text, today);
            if date.is_none() && !item.date_text.trim().is_empty() {
                tracing::trace!(date_text = %item.date_text, "Unrecognised review date");
            }
            date
        })
        .filter(|date| *date > cutoff)
        .collect();
    dates.sort_unstable();

    if dates.len() >= 2 {
        let gaps: i64 = dates.windows(2).map(|w| (w[1] - w[0]).num_days()).sum();
        #[allow(clippy::cast_precision_loss)]
        let mean = gaps as f64 / (dates.len() - 1) as f64;
        metrics.avg_days_between_reviews = Some(round1(mean));
    }

    metrics
}

fn percentage(part: u32, whole: u32) -> f64 {
    if whole == 0 {
        0.0
    } else {
        round1(f64::from(part) * 100.0 / f64::from(whole))
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

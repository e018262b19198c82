//! Date recognition for evidence checks.
//!
//! A deadline or issue date only survives the evidence filter when the chunk
//! actually mentions a date that resolves to the same day. Chunks write dates
//! every way imaginable ("2025-09-29", "29/09/2025", "Sept 29th, 2025",
//! "29 of September 2025"), so matching is two-stage: a permissive regex finds
//! mentions, then both sides are parsed and compared as calendar dates.

use chrono::NaiveDate;
use regex::Regex;
use std::sync::LazyLock;

static DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?xi)
        \b(
            # ISO: 2025-09-29
            \d{4}-(?:0[1-9]|1[0-2])-(?:0[1-9]|[12]\d|3[01])
            |
            # Numeric with . - or / separators, day-first or month-first
            (?:
                (?:0?[1-9]|[12]\d|3[01])[.\-/](?:0?[1-9]|1[0-2])[.\-/](?:\d{4}|\d{2})
                |
                (?:0?[1-9]|1[0-2])[.\-/](?:0?[1-9]|[12]\d|3[01])[.\-/](?:\d{4}|\d{2})
            )
            |
            # Month name first: September 29th, 2025 / Sep 29
            (?:Jan(?:uary)?|Feb(?:ruary)?|Mar(?:ch)?|Apr(?:il)?|May|Jun(?:e)?
              |Jul(?:y)?|Aug(?:ust)?|Sep(?:t(?:ember)?)?|Oct(?:ober)?
              |Nov(?:ember)?|Dec(?:ember)?)
            [\s,.-]*
            (?:the\s+)?
            (?:0?[1-9]|[12]\d|3[01])(?:st|nd|rd|th)?
            (?:,?\s+(?:\d{4}|\d{2}))?
            |
            # Day first: 29th of September 2025
            (?:0?[1-9]|[12]\d|3[01])(?:st|nd|rd|th)?\s+(?:of\s+)?
            (?:Jan(?:uary)?|Feb(?:ruary)?|Mar(?:ch)?|Apr(?:il)?|May|Jun(?:e)?
              |Jul(?:y)?|Aug(?:ust)?|Sep(?:t(?:ember)?)?|Oct(?:ober)?
              |Nov(?:ember)?|Dec(?:ember)?)
            (?:,?\s+(?:\d{4}|\d{2}))?
            |
            # Month and year only: September 2025
            (?:Jan(?:uary)?|Feb(?:ruary)?|Mar(?:ch)?|Apr(?:il)?|May|Jun(?:e)?
              |Jul(?:y)?|Aug(?:ust)?|Sep(?:t(?:ember)?)?|Oct(?:ober)?
              |Nov(?:ember)?|Dec(?:ember)?)
            \s+(?:\d{4}|\d{2})
        )\b",
    )
    .expect("date pattern is valid")
});

static ORDINAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d)(st|nd|rd|th)\b").expect("ordinal pattern is valid"));

const MONTHS: [&str; 12] = [
    "january",
    "february",
    "march",
    "april",
    "may",
    "june",
    "july",
    "august",
    "september",
    "october",
    "november",
    "december",
];

// Partial dates ("September 2025") parse with day 1; a bare month-day pair
// gets year 2000. Fixed fill values keep equality between two mentions of the
// same partial date stable.
const DEFAULT_YEAR: i32 = 2000;
const DEFAULT_DAY: u32 = 1;

/// True when the text mentions at least one date in any recognized form.
pub fn contains_date(text: &str) -> bool {
    DATE_RE.is_match(text)
}

/// All date mentions in the text, as written.
pub fn find_dates(text: &str) -> Vec<&str> {
    DATE_RE.find_iter(text).map(|m| m.as_str()).collect()
}

/// True when some date mentioned in the text resolves to the same calendar
/// day as `value`. This is how issue dates and deadlines are evidenced.
pub fn date_evidenced(value: &str, text: &str) -> bool {
    let Some(wanted) = parse_flexible(value) else {
        return false;
    };
    find_dates(text)
        .into_iter()
        .any(|m| parse_flexible(m) == Some(wanted))
}

pub fn dates_equal(a: &str, b: &str) -> bool {
    match (parse_flexible(a), parse_flexible(b)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// Best-effort parse of a human-written date. Day-first for ambiguous numeric
/// forms ("03/04/2025" is April 3rd). Returns `None` when nothing date-like
/// can be made of the input.
pub fn parse_flexible(raw: &str) -> Option<NaiveDate> {
    let cleaned = ORDINAL_RE.replace_all(raw.trim(), "$1");
    let cleaned = cleaned.to_lowercase();

    let tokens: Vec<&str> = cleaned
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect();
    if tokens.is_empty() {
        return None;
    }

    let mut month_from_name = None;
    let mut numbers = Vec::new();
    for token in &tokens {
        if token.chars().all(|c| c.is_ascii_digit()) {
            numbers.push(token.parse::<u32>().ok()?);
        } else if let Some(m) = month_number(token) {
            month_from_name = Some(m);
        } else if *token != "of" && *token != "the" {
            return None;
        }
    }

    if let Some(month) = month_from_name {
        return from_month_name_parts(month, &numbers);
    }
    from_numeric_parts(&numbers)
}

fn month_number(token: &str) -> Option<u32> {
    if token.len() < 3 {
        return None;
    }
    // "sept" is the one abbreviation longer than three letters in the wild.
    MONTHS
        .iter()
        .position(|m| m.starts_with(token) || (token == "sept" && *m == "september"))
        .map(|i| i as u32 + 1)
}

fn from_month_name_parts(month: u32, numbers: &[u32]) -> Option<NaiveDate> {
    let (day, year) = match numbers {
        [] => (DEFAULT_DAY, DEFAULT_YEAR),
        [n] if *n <= 31 => (*n, DEFAULT_YEAR),
        [n] => (DEFAULT_DAY, expand_year(*n)),
        [d, y, ..] => (*d, expand_year(*y)),
    };
    if day == 0 || day > 31 {
        return None;
    }
    NaiveDate::from_ymd_opt(year, month, day)
}

fn from_numeric_parts(numbers: &[u32]) -> Option<NaiveDate> {
    match numbers {
        // ISO order when the year leads.
        [y, m, d] if *y >= 1000 => NaiveDate::from_ymd_opt(*y as i32, *m, *d),
        [a, b, y] => {
            let year = expand_year(*y);
            // Day-first, falling back to month-first when day-first is
            // impossible ("09/29/2025").
            NaiveDate::from_ymd_opt(year, *b, *a).or_else(|| NaiveDate::from_ymd_opt(year, *a, *b))
        }
        _ => None,
    }
}

fn expand_year(n: u32) -> i32 {
    match n {
        0..=69 => 2000 + n as i32,
        70..=99 => 1900 + n as i32,
        other => other as i32,
    }
}

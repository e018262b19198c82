//! Normalization of raw model output before typed validation.
//!
//! Model replies are messy in predictable ways: strings where objects belong,
//! "N/A" placeholders, contacts written as "Jane Doe <jane@city.gov>", phone
//! numbers with decoration. This module coerces each list field into its
//! canonical shape and leaves scalars alone so validation can judge them.

use crate::schema::{Contact, Criterion, Deadline};
use regex::Regex;
use serde_json::{json, Value};
use std::sync::LazyLock;

static WS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("ws pattern is valid"));

/// Unanchored, for finding addresses inside prose.
pub static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)[A-Z0-9._%+-]+@[A-Z0-9.-]+\.[A-Z]{2,}").expect("email pattern is valid")
});

/// Anchored, for validating a whole candidate value.
static EMAIL_FULL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^[A-Z0-9._%+-]+@[A-Z0-9.-]+\.[A-Z]{2,}$").expect("email pattern is valid")
});

pub static PHONE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\+?\d[\d\-\s().]{6,}\d").expect("phone pattern is valid"));

const MISSING_TOKENS: [&str; 9] = [
    "",
    "none",
    "null",
    "n/a",
    "na",
    "-",
    "--",
    "n\\a",
    "not applicable",
];

/// True for the placeholder spellings models use instead of omitting a value.
pub fn is_missing(value: &str) -> bool {
    let v = value.trim().to_lowercase();
    MISSING_TOKENS.contains(&v.as_str())
}

/// Collapses internal whitespace and trims.
pub fn clean_text(value: &str) -> String {
    WS_RE.replace_all(value, " ").trim().to_string()
}

pub fn digits_only(value: &str) -> String {
    value.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Splits "Display Name <addr@host>" into its parts. Without angle brackets
/// the whole input is treated as the address.
pub fn parse_addr(value: &str) -> (String, String) {
    let value = value.trim();
    if let (Some(open), Some(close)) = (value.find('<'), value.rfind('>')) {
        if open < close {
            let name = value[..open].trim().trim_matches('"').trim();
            let addr = value[open + 1..close].trim();
            return (name.to_string(), addr.to_string());
        }
    }
    (String::new(), value.to_string())
}

/// Lowercased address when the input holds a valid one, empty otherwise.
/// Accepts both bare addresses and "Name <addr>" forms.
pub fn norm_email(value: &str) -> String {
    if value.trim().is_empty() {
        return String::new();
    }
    let (_, addr) = parse_addr(value);
    let addr = addr.to_lowercase();
    if EMAIL_FULL_RE.is_match(&addr) {
        addr
    } else {
        String::new()
    }
}

/// Readable name guessed from an address local part:
/// "jane.q.public42@city.gov" becomes "Jane Q Public".
pub fn name_from_email(email: &str) -> String {
    let local = email.split('@').next().unwrap_or("");
    let spaced: String = local
        .chars()
        .map(|c| if matches!(c, '.' | '_' | '-') { ' ' } else { c })
        .filter(|c| !c.is_ascii_digit())
        .collect();
    spaced
        .split_whitespace()
        .map(title_word)
        .collect::<Vec<_>>()
        .join(" ")
}

fn title_word(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(|c| c.to_lowercase())).collect(),
        None => String::new(),
    }
}

/// Keeps digits and a single leading "+", then drops zero padding after the
/// plus ("+0049 89..." becomes "+4989...").
pub fn norm_phone(value: &str) -> String {
    let mut out = String::new();
    for c in value.chars() {
        if c.is_ascii_digit() || (c == '+' && out.is_empty()) {
            out.push(c);
        }
    }
    if let Some(rest) = out.strip_prefix('+') {
        out = format!("+{}", rest.trim_start_matches('0'));
    }
    out
}

fn none_if_empty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

/// Builds a contact from loose parts, deriving a name from the address when
/// none was given and fishing an address out of a "Name <addr>" name. Yields
/// `None` when no identifying part survives.
pub fn contact_from_parts(name: &str, title: &str, email: &str, phone: &str) -> Option<Contact> {
    let mut name = if is_missing(name) { String::new() } else { clean_text(name) };
    let title = if is_missing(title) { String::new() } else { clean_text(title) };
    let mut email = norm_email(email);
    let phone = norm_phone(phone);

    if name.is_empty() && !email.is_empty() {
        name = name_from_email(&email);
    }
    if email.is_empty() && !name.is_empty() {
        let (parsed_name, parsed_addr) = parse_addr(&name);
        let parsed_addr = parsed_addr.to_lowercase();
        if EMAIL_FULL_RE.is_match(&parsed_addr) {
            email = parsed_addr;
            name = if parsed_name.is_empty() {
                name_from_email(&email)
            } else {
                clean_text(&parsed_name)
            };
        }
    }
    if name.is_empty() && email.is_empty() && phone.is_empty() {
        return None;
    }
    Some(Contact {
        name: none_if_empty(name),
        title: none_if_empty(title),
        email: none_if_empty(email),
        phone: none_if_empty(phone),
    })
}

/// Dedup key: the address when present, else name plus phone digits.
pub fn contact_key(contact: &Contact) -> String {
    if let Some(email) = contact.email.as_deref().filter(|e| !e.is_empty()) {
        return format!("e:{email}");
    }
    let name = contact.name.as_deref().unwrap_or("").to_lowercase();
    let phone = digits_only(contact.phone.as_deref().unwrap_or(""));
    format!("np:{name}|{phone}")
}

fn contact_from_string(raw: &str) -> Option<Contact> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    // A stringified object or array sometimes arrives where a contact belongs.
    if raw.starts_with('{') || raw.starts_with('[') {
        if let Ok(value) = serde_json::from_str::<Value>(raw) {
            return norm_contacts(&value).into_iter().next();
        }
    }
    let (name, addr) = parse_addr(raw);
    let email = norm_email(&addr);
    let name = if email.is_empty() { raw } else { name.as_str() };
    contact_from_parts(name, "", &email, "")
}

fn contact_from_value(value: &Value) -> Option<Contact> {
    match value {
        Value::Object(map) => {
            let part = |key: &str| {
                map.get(key)
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_string()
            };
            contact_from_parts(&part("name"), &part("title"), &part("email"), &part("phone"))
        }
        Value::String(s) => contact_from_string(s),
        _ => None,
    }
}

/// Coerces whatever landed in the contacts field into deduplicated contacts.
pub fn norm_contacts(value: &Value) -> Vec<Contact> {
    let items: Vec<&Value> = match value {
        Value::Null => Vec::new(),
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    };
    let mut seen = Vec::new();
    let mut out = Vec::new();
    for item in items {
        if let Some(contact) = contact_from_value(item) {
            let key = contact_key(&contact);
            if !seen.contains(&key) {
                seen.push(key);
                out.push(contact);
            }
        }
    }
    out
}

/// Coerces the deadlines field: objects keep their date and kind (accepting
/// "purpose" as an alias), bare strings become dates without a kind. Entries
/// without a date are dropped.
pub fn norm_deadlines(value: &Value) -> Vec<Deadline> {
    let items: Vec<&Value> = match value {
        Value::Null => Vec::new(),
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    };
    let mut out = Vec::new();
    for item in items {
        match item {
            Value::Object(map) => {
                let date = map
                    .get("date")
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .unwrap_or("");
                if date.is_empty() {
                    continue;
                }
                let kind = map
                    .get("kind")
                    .or_else(|| map.get("purpose"))
                    .and_then(Value::as_str)
                    .map(clean_text)
                    .filter(|k| !k.is_empty() && !is_missing(k));
                out.push(Deadline { date: date.to_string(), kind });
            }
            Value::String(s) if !s.trim().is_empty() => {
                out.push(Deadline { date: s.trim().to_string(), kind: None });
            }
            _ => {}
        }
    }
    out
}

/// Coerces the criteria field: strings and `{"criterion": ...}` objects both
/// count.
pub fn norm_criteria(value: &Value) -> Vec<Criterion> {
    let items: Vec<&Value> = match value {
        Value::Null => Vec::new(),
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    };
    let mut out = Vec::new();
    for item in items {
        let text = match item {
            Value::String(s) => s.trim().to_string(),
            Value::Object(map) => map
                .get("criterion")
                .and_then(Value::as_str)
                .map(str::trim)
                .unwrap_or("")
                .to_string(),
            _ => String::new(),
        };
        if !text.is_empty() {
            out.push(Criterion { criterion: text });
        }
    }
    out
}

/// Coerces a string-list field, trimming entries and dropping empties and
/// placeholders. A bare string becomes a one-element list.
pub fn to_str_list(value: &Value) -> Vec<String> {
    let items: Vec<&Value> = match value {
        Value::Null => Vec::new(),
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    };
    items
        .into_iter()
        .filter_map(|item| match item {
            Value::String(s) => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .filter(|s| !s.is_empty() && !is_missing(s))
        .collect()
}

/// Rewrites the six list fields of a raw reply into canonical shapes and
/// drops any identifier the model invented. Scalars pass through untouched
/// for validation to judge.
pub fn sanitize_payload(payload: Value) -> Value {
    let mut map = match payload {
        Value::Object(map) => map,
        other => return other,
    };
    map.remove("document_id");

    let deadlines = norm_deadlines(map.get("deadlines").unwrap_or(&Value::Null));
    let contacts = norm_contacts(map.get("contacts").unwrap_or(&Value::Null));
    let criteria = norm_criteria(map.get("evaluation_criteria").unwrap_or(&Value::Null));
    let requirements = to_str_list(map.get("requirements").unwrap_or(&Value::Null));
    let keywords = to_str_list(map.get("keywords").unwrap_or(&Value::Null));
    let standards = to_str_list(map.get("compliance_standards").unwrap_or(&Value::Null));

    map.insert("deadlines".into(), json!(deadlines));
    map.insert("contacts".into(), json!(contacts));
    map.insert("evaluation_criteria".into(), json!(criteria));
    map.insert("requirements".into(), json!(requirements));
    map.insert("keywords".into(), json!(keywords));
    map.insert("compliance_standards".into(), json!(standards));
    Value::Object(map)
}

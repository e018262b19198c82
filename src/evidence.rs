//! Evidence-backed merging of a model reply into the running state.
//!
//! The model is instructed to only report facts present in the chunk, but
//! instructions are not guarantees. This filter re-derives the merge from the
//! previous state and admits each proposed change only when the chunk itself
//! backs it: scalars must appear literally, dates must resolve to a mentioned
//! date, contacts need a verbatim email or phone. Everything else keeps its
//! previous value, so a hallucinated reply can never erase earlier work.

use crate::dates;
use crate::sanitize::{self, EMAIL_RE, PHONE_RE};
use crate::schema::{Contact, ExtractionState};
use std::collections::HashSet;

fn norm(text: &str) -> String {
    sanitize::clean_text(text).to_lowercase()
}

fn contains_literal(text_norm: &str, needle: &str) -> bool {
    let needle = norm(needle);
    !needle.is_empty() && text_norm.contains(&needle)
}

fn emails_in_text(text: &str) -> HashSet<String> {
    EMAIL_RE
        .find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .collect()
}

fn phones_in_text(text: &str) -> HashSet<String> {
    PHONE_RE
        .find_iter(text)
        .map(|m| sanitize::digits_only(m.as_str()))
        .collect()
}

/// Address from a contact's email field, lowercased but not validated;
/// handles the "Name <addr>" shape too.
fn email_from_any(value: Option<&str>) -> String {
    let Some(value) = value else {
        return String::new();
    };
    let (_, addr) = sanitize::parse_addr(value);
    addr.trim().to_lowercase()
}

/// Merges `payload` into `prev`, keeping only changes the chunk evidences.
/// Returns the merged state plus one decision line per accepted or rejected
/// change, for debug logging.
pub fn merge_with_evidence(
    payload: &ExtractionState,
    chunk_text: &str,
    prev: &ExtractionState,
) -> (ExtractionState, Vec<String>) {
    let mut merged = prev.clone();
    let mut log = Vec::new();
    let text_norm = norm(chunk_text);

    // document_type: token evidence, not literal value match.
    if let Some(dt_new) = payload.document_type {
        if Some(dt_new) != prev.document_type {
            let evidenced = dt_new
                .evidence_tokens()
                .iter()
                .any(|tok| text_norm.contains(tok));
            if evidenced {
                merged.document_type = Some(dt_new);
                log.push(format!("SET document_type from chunk: {:?}", dt_new.as_str()));
            } else {
                log.push(format!(
                    "KEEP previous document_type (new not evidenced): {:?}",
                    dt_new.as_str()
                ));
            }
        }
    }

    type ScalarGet = fn(&ExtractionState) -> &Option<String>;
    type ScalarGetMut = fn(&mut ExtractionState) -> &mut Option<String>;
    let scalar_fields: [(&str, ScalarGet, ScalarGetMut); 8] = [
        ("document_title", |s| &s.document_title, |s| &mut s.document_title),
        ("issue_date", |s| &s.issue_date, |s| &mut s.issue_date),
        ("client_organization", |s| &s.client_organization, |s| &mut s.client_organization),
        ("client_industry", |s| &s.client_industry, |s| &mut s.client_industry),
        ("project_scope", |s| &s.project_scope, |s| &mut s.project_scope),
        ("contract_term", |s| &s.contract_term, |s| &mut s.contract_term),
        ("submission_method", |s| &s.submission_method, |s| &mut s.submission_method),
        ("pricing_structure", |s| &s.pricing_structure, |s| &mut s.pricing_structure),
    ];
    for (name, get, get_mut) in scalar_fields {
        let Some(cand) = get(payload).as_deref().filter(|v| !v.is_empty()) else {
            continue;
        };
        if get(prev).as_deref() == Some(cand) {
            continue;
        }
        let evidenced = if name == "issue_date" {
            dates::date_evidenced(cand, chunk_text)
        } else {
            contains_literal(&text_norm, cand)
        };
        if evidenced {
            *get_mut(&mut merged) = Some(cand.to_string());
            log.push(format!("SET {name} from chunk: {cand:?}"));
        } else {
            log.push(format!("KEEP previous {name} (new not evidenced): {cand:?}"));
        }
    }

    // Deadlines: union keyed by (date, kind); the date must be mentioned.
    let mut deadline_keys: HashSet<(String, Option<String>)> = merged
        .deadlines
        .iter()
        .map(|d| (d.date.clone(), d.kind.clone()))
        .collect();
    for d in &payload.deadlines {
        let kind = d.kind.clone().filter(|k| !k.is_empty());
        let key = (d.date.clone(), kind.clone());
        if dates::date_evidenced(&d.date, chunk_text) {
            if deadline_keys.insert(key) {
                log.push(format!("ADD deadline from chunk: ({:?}, {:?})", d.date, kind));
                merged.deadlines.push(crate::schema::Deadline { date: d.date.clone(), kind });
            }
        } else {
            log.push(format!("SKIP deadline (not evidenced): {:?}", d.date));
        }
    }

    // Contacts: admitted only on a verbatim email or phone; name and title
    // ride along only when they appear literally too.
    let chunk_emails = emails_in_text(chunk_text);
    let chunk_phones = phones_in_text(chunk_text);
    let mut kept: Vec<(String, Contact)> = merged
        .contacts
        .iter()
        .map(|c| (sanitize::contact_key(c), c.clone()))
        .collect();
    for c in &payload.contacts {
        let email = email_from_any(c.email.as_deref());
        let phone = sanitize::digits_only(c.phone.as_deref().unwrap_or(""));
        let has_email = !email.is_empty() && chunk_emails.contains(&email);
        let has_phone = phone.len() >= 7 && chunk_phones.contains(&phone);
        if !has_email && !has_phone {
            log.push(format!("SKIP contact (no literal email/phone in chunk): {:?}", c.name));
            continue;
        }
        let key = if !email.is_empty() {
            format!("e:{email}")
        } else {
            format!(
                "np:{}|{phone}",
                c.name.as_deref().unwrap_or("").to_lowercase()
            )
        };
        let slot = kept.iter().position(|(k, _)| *k == key);
        let mut base = match slot {
            Some(i) => kept[i].1.clone(),
            None => Contact {
                name: None,
                title: None,
                email: if email.is_empty() { None } else { Some(email.clone()) },
                phone: if phone.is_empty() { None } else { Some(phone.clone()) },
            },
        };
        if let Some(name) = c.name.as_deref().filter(|n| contains_literal(&text_norm, n)) {
            base.name = Some(name.to_string());
        }
        if let Some(title) = c.title.as_deref().filter(|t| contains_literal(&text_norm, t)) {
            base.title = Some(title.to_string());
        }
        if !email.is_empty() {
            base.email = Some(email.clone());
        }
        if !phone.is_empty() {
            base.phone = Some(phone.clone());
        }
        match slot {
            Some(i) => kept[i].1 = base,
            None => kept.push((key.clone(), base)),
        }
        log.push(format!("MERGE/ADD contact from chunk: {key}"));
    }
    merged.contacts = kept.into_iter().map(|(_, c)| c).collect();

    // Criteria and requirements: union by normalized text, literal evidence
    // required for new entries.
    let mut criterion_keys: HashSet<String> = merged
        .evaluation_criteria
        .iter()
        .map(|c| norm(&c.criterion))
        .collect();
    for c in &payload.evaluation_criteria {
        if contains_literal(&text_norm, &c.criterion) {
            if criterion_keys.insert(norm(&c.criterion)) {
                log.push(format!("ADD evaluation_criterion from chunk: {:?}", c.criterion));
                merged.evaluation_criteria.push(c.clone());
            }
        } else {
            log.push(format!("SKIP evaluation_criterion (not evidenced): {:?}", c.criterion));
        }
    }

    let mut requirement_keys: HashSet<String> =
        merged.requirements.iter().map(|r| norm(r)).collect();
    for r in &payload.requirements {
        if contains_literal(&text_norm, r) {
            if requirement_keys.insert(norm(r)) {
                log.push(format!("ADD requirement from chunk: {r:?}"));
                merged.requirements.push(r.clone());
            }
        } else {
            log.push(format!("SKIP requirement (not evidenced): {r:?}"));
        }
    }

    // Token fields: keywords lowercase, standards uppercase.
    let mut keyword_keys: HashSet<String> =
        merged.keywords.iter().map(|k| k.to_lowercase()).collect();
    for k in &payload.keywords {
        let token = k.trim().to_lowercase();
        if token.is_empty() {
            continue;
        }
        if contains_literal(&text_norm, &token) {
            if keyword_keys.insert(token.clone()) {
                log.push(format!("ADD keyword from chunk: {token:?}"));
                merged.keywords.push(token);
            }
        } else {
            log.push(format!("SKIP keyword (not evidenced): {token:?}"));
        }
    }

    let mut standard_keys: HashSet<String> = merged
        .compliance_standards
        .iter()
        .map(|s| s.to_uppercase())
        .collect();
    for s in &payload.compliance_standards {
        let token = s.trim().to_uppercase();
        if token.is_empty() {
            continue;
        }
        if contains_literal(&text_norm, &token) {
            if standard_keys.insert(token.clone()) {
                log.push(format!("ADD compliance_standard from chunk: {token:?}"));
                merged.compliance_standards.push(token);
            }
        } else {
            log.push(format!("SKIP compliance_standard (not evidenced): {token:?}"));
        }
    }

    (merged, log)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Deadline, DocumentType};

    fn payload() -> ExtractionState {
        ExtractionState::default()
    }

    #[test]
    fn literal_scalars_are_accepted_and_others_kept() {
        let chunk = "The City of Lakewood seeks proposals for snow removal services.";
        let mut p = payload();
        p.client_organization = Some("City of Lakewood".into());
        p.document_title = Some("Completely Invented Title".into());

        let (merged, log) = merge_with_evidence(&p, chunk, &ExtractionState::default());
        assert_eq!(merged.client_organization.as_deref(), Some("City of Lakewood"));
        assert_eq!(merged.document_title, None);
        assert!(log.iter().any(|l| l.starts_with("SET client_organization")));
        assert!(log.iter().any(|l| l.starts_with("KEEP previous document_title")));
    }

    #[test]
    fn contradiction_is_replaced_when_evidenced() {
        let mut prev = ExtractionState::default();
        prev.client_industry = Some("transportation".into());
        let mut p = payload();
        p.client_industry = Some("public works".into());

        let (merged, _) =
            merge_with_evidence(&p, "the public works department will administer", &prev);
        assert_eq!(merged.client_industry.as_deref(), Some("public works"));
    }

    #[test]
    fn issue_date_matches_through_parsing() {
        let chunk = "This solicitation was released on September 29, 2025.";
        let mut p = payload();
        p.issue_date = Some("2025-09-29".into());
        let (merged, _) = merge_with_evidence(&p, chunk, &ExtractionState::default());
        assert_eq!(merged.issue_date.as_deref(), Some("2025-09-29"));

        let mut p = payload();
        p.issue_date = Some("2025-10-01".into());
        let (merged, _) = merge_with_evidence(&p, chunk, &ExtractionState::default());
        assert_eq!(merged.issue_date, None);
    }

    #[test]
    fn document_type_needs_its_token() {
        let mut p = payload();
        p.document_type = Some(DocumentType::Rfp);
        let (merged, _) =
            merge_with_evidence(&p, "This Request for Proposal covers plowing.", &ExtractionState::default());
        assert_eq!(merged.document_type, Some(DocumentType::Rfp));

        let (merged, _) =
            merge_with_evidence(&p, "General terms and conditions apply.", &ExtractionState::default());
        assert_eq!(merged.document_type, None);

        let mut p = payload();
        p.document_type = Some(DocumentType::SourcesSought);
        let (merged, _) =
            merge_with_evidence(&p, "This sources sought notice is for planning.", &ExtractionState::default());
        assert_eq!(merged.document_type, Some(DocumentType::SourcesSought));
    }

    #[test]
    fn deadlines_union_and_require_a_mentioned_date() {
        let mut prev = ExtractionState::default();
        prev.deadlines.push(Deadline { date: "2025-09-01".into(), kind: None });

        let mut p = payload();
        p.deadlines = vec![
            Deadline { date: "2025-09-29".into(), kind: Some("proposals due".into()) },
            Deadline { date: "2025-09-01".into(), kind: None },
            Deadline { date: "2025-12-31".into(), kind: None },
        ];
        let chunk = "Proposals are due 2025-09-29. Questions accepted until September 1, 2025.";
        let (merged, log) = merge_with_evidence(&p, chunk, &prev);

        let dates: Vec<&str> = merged.deadlines.iter().map(|d| d.date.as_str()).collect();
        assert_eq!(dates, vec!["2025-09-01", "2025-09-29"]);
        assert!(log.iter().any(|l| l.starts_with("SKIP deadline") && l.contains("2025-12-31")));
    }

    #[test]
    fn contacts_need_verbatim_email_or_phone() {
        let chunk = "Direct questions to Jane Doe, Procurement Officer, jane.doe@city.gov or (555) 123-4567.";
        let mut p = payload();
        p.contacts = vec![
            Contact {
                name: Some("Jane Doe".into()),
                title: Some("Procurement Officer".into()),
                email: Some("jane.doe@city.gov".into()),
                phone: None,
            },
            Contact {
                name: Some("Invented Person".into()),
                title: None,
                email: Some("nobody@nowhere.example".into()),
                phone: None,
            },
        ];
        let (merged, log) = merge_with_evidence(&p, chunk, &ExtractionState::default());
        assert_eq!(merged.contacts.len(), 1);
        assert_eq!(merged.contacts[0].name.as_deref(), Some("Jane Doe"));
        assert_eq!(merged.contacts[0].title.as_deref(), Some("Procurement Officer"));
        assert!(log.iter().any(|l| l.starts_with("SKIP contact")));
    }

    #[test]
    fn phone_only_contacts_pass_with_seven_digits() {
        let chunk = "Call the procurement desk at 555-123-4567.";
        let mut p = payload();
        p.contacts = vec![Contact {
            name: None,
            title: None,
            email: None,
            phone: Some("(555) 123-4567".into()),
        }];
        let (merged, _) = merge_with_evidence(&p, chunk, &ExtractionState::default());
        assert_eq!(merged.contacts.len(), 1);
        assert_eq!(merged.contacts[0].phone.as_deref(), Some("5551234567"));
    }

    #[test]
    fn later_chunk_enriches_an_existing_contact() {
        let mut prev = ExtractionState::default();
        prev.contacts.push(Contact {
            name: None,
            title: None,
            email: Some("jane.doe@city.gov".into()),
            phone: None,
        });
        let chunk = "Jane Doe (jane.doe@city.gov) will host the pre-bid call.";
        let mut p = payload();
        p.contacts = vec![Contact {
            name: Some("Jane Doe".into()),
            title: None,
            email: Some("jane.doe@city.gov".into()),
            phone: None,
        }];
        let (merged, _) = merge_with_evidence(&p, chunk, &prev);
        assert_eq!(merged.contacts.len(), 1);
        assert_eq!(merged.contacts[0].name.as_deref(), Some("Jane Doe"));
    }

    #[test]
    fn requirements_dedupe_by_normalized_text() {
        let mut prev = ExtractionState::default();
        prev.requirements.push("Plow all arterial routes within 4 hours".into());

        let chunk = "The contractor shall plow all arterial routes  within 4 hours of snowfall.";
        let mut p = payload();
        p.requirements = vec![
            "plow all arterial routes within 4 hours".into(),
            "maintain a fleet of 12 trucks".into(),
        ];
        let (merged, log) = merge_with_evidence(&p, chunk, &prev);
        assert_eq!(merged.requirements.len(), 1);
        assert!(log.iter().any(|l| l.starts_with("SKIP requirement")));
    }

    #[test]
    fn tokens_normalize_case_and_need_evidence() {
        let chunk = "Work must comply with ISO 9001. Experience with snowplows required.";
        let mut p = payload();
        p.keywords = vec!["Snowplows".into(), "teleportation".into()];
        p.compliance_standards = vec!["iso 9001".into()];
        let (merged, _) = merge_with_evidence(&p, chunk, &ExtractionState::default());
        assert_eq!(merged.keywords, vec!["snowplows"]);
        assert_eq!(merged.compliance_standards, vec!["ISO 9001"]);
    }

    #[test]
    fn empty_payload_leaves_prev_untouched() {
        let mut prev = ExtractionState::default();
        prev.document_title = Some("Kept".into());
        prev.requirements.push("existing requirement".into());
        let (merged, log) = merge_with_evidence(&payload(), "unrelated text", &prev);
        assert_eq!(merged, prev);
        assert!(log.is_empty());
    }
}

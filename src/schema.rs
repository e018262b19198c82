//! Typed extraction state for a harvested document.
//!
//! One `ExtractionState` accumulates across all chunks of a document: each
//! chunk's reply is merged into the running state, so later chunks see (and
//! must preserve) what earlier chunks established. Scalars are `Option` and
//! lists are plain `Vec`s that deserialize `null` as empty, mirroring how the
//! model is told to shape its JSON.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use std::collections::HashSet;

/// Solicitation classification, restricted to the values the model may emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentType {
    #[serde(rename = "RFP")]
    Rfp,
    #[serde(rename = "RFI")]
    Rfi,
    #[serde(rename = "RFQ")]
    Rfq,
    #[serde(rename = "Sources Sought")]
    SourcesSought,
    #[serde(rename = "Other")]
    Other,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::Rfp => "RFP",
            DocumentType::Rfi => "RFI",
            DocumentType::Rfq => "RFQ",
            DocumentType::SourcesSought => "Sources Sought",
            DocumentType::Other => "Other",
        }
    }

    /// Lowercased tokens whose literal presence in a chunk counts as evidence
    /// for this classification.
    pub fn evidence_tokens(&self) -> &'static [&'static str] {
        match self {
            DocumentType::Rfp => &["rfp", "request for proposal"],
            DocumentType::Rfi => &["rfi", "request for information"],
            DocumentType::Rfq => &["rfq", "request for quotation", "request for quote"],
            DocumentType::SourcesSought => &["sources sought"],
            DocumentType::Other => &["other"],
        }
    }
}

/// A dated milestone. `kind` is free text ("questions due", "award") and is
/// omitted from JSON when absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deadline {
    pub date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

/// A point of contact. Every part is optional: the evidence filter admits
/// contacts on a literal email or phone alone, so a name may arrive later.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Criterion {
    pub criterion: String,
}

/// The merged profile of one document. Field order matters: it is the order
/// the model sees in prompts and the order `unresolved_fields` reports.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionState {
    pub document_type: Option<DocumentType>,
    pub document_title: Option<String>,
    pub issue_date: Option<String>,
    #[serde(deserialize_with = "null_as_empty")]
    pub deadlines: Vec<Deadline>,
    pub client_organization: Option<String>,
    pub client_industry: Option<String>,
    #[serde(deserialize_with = "null_as_empty")]
    pub contacts: Vec<Contact>,
    pub project_scope: Option<String>,
    pub contract_term: Option<String>,
    pub submission_method: Option<String>,
    #[serde(deserialize_with = "null_as_empty")]
    pub evaluation_criteria: Vec<Criterion>,
    pub pricing_structure: Option<String>,
    #[serde(deserialize_with = "null_as_empty")]
    pub requirements: Vec<String>,
    #[serde(deserialize_with = "null_as_empty")]
    pub keywords: Vec<String>,
    #[serde(deserialize_with = "null_as_empty")]
    pub compliance_standards: Vec<String>,
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    let value = Option::<Vec<T>>::deserialize(deserializer)?;
    Ok(value.unwrap_or_default())
}

impl ExtractionState {
    pub const FIELD_NAMES: [&'static str; 15] = [
        "document_type",
        "document_title",
        "issue_date",
        "deadlines",
        "client_organization",
        "client_industry",
        "contacts",
        "project_scope",
        "contract_term",
        "submission_method",
        "evaluation_criteria",
        "pricing_structure",
        "requirements",
        "keywords",
        "compliance_standards",
    ];

    /// Names of fields still null or empty, in declaration order. Fed back to
    /// the model as a hint about where to focus next.
    pub fn unresolved_fields(&self) -> Vec<&'static str> {
        fn blank(s: &Option<String>) -> bool {
            s.as_deref().map_or(true, |v| v.is_empty())
        }
        let mut out = Vec::new();
        if self.document_type.is_none() {
            out.push("document_type");
        }
        if blank(&self.document_title) {
            out.push("document_title");
        }
        if blank(&self.issue_date) {
            out.push("issue_date");
        }
        if self.deadlines.is_empty() {
            out.push("deadlines");
        }
        if blank(&self.client_organization) {
            out.push("client_organization");
        }
        if blank(&self.client_industry) {
            out.push("client_industry");
        }
        if self.contacts.is_empty() {
            out.push("contacts");
        }
        if blank(&self.project_scope) {
            out.push("project_scope");
        }
        if blank(&self.contract_term) {
            out.push("contract_term");
        }
        if blank(&self.submission_method) {
            out.push("submission_method");
        }
        if self.evaluation_criteria.is_empty() {
            out.push("evaluation_criteria");
        }
        if blank(&self.pricing_structure) {
            out.push("pricing_structure");
        }
        if self.requirements.is_empty() {
            out.push("requirements");
        }
        if self.keywords.is_empty() {
            out.push("keywords");
        }
        if self.compliance_standards.is_empty() {
            out.push("compliance_standards");
        }
        out
    }

    /// Combines per-chunk snapshots: first non-empty value wins for scalars,
    /// lists union in order with duplicates dropped by canonical JSON.
    pub fn merge(snapshots: &[ExtractionState]) -> ExtractionState {
        fn first_scalar<F>(snapshots: &[ExtractionState], get: F) -> Option<String>
        where
            F: Fn(&ExtractionState) -> &Option<String>,
        {
            snapshots
                .iter()
                .find_map(|s| get(s).as_deref().filter(|v| !v.is_empty()))
                .map(str::to_string)
        }

        fn union<T, F>(snapshots: &[ExtractionState], get: F) -> Vec<T>
        where
            T: Serialize + Clone,
            F: Fn(&ExtractionState) -> &[T],
        {
            let mut seen = HashSet::new();
            let mut out = Vec::new();
            for snapshot in snapshots {
                for item in get(snapshot) {
                    let key = serde_json::to_string(item).unwrap_or_default();
                    if seen.insert(key) {
                        out.push(item.clone());
                    }
                }
            }
            out
        }

        ExtractionState {
            document_type: snapshots.iter().find_map(|s| s.document_type),
            document_title: first_scalar(snapshots, |s| &s.document_title),
            issue_date: first_scalar(snapshots, |s| &s.issue_date),
            deadlines: union(snapshots, |s| &s.deadlines),
            client_organization: first_scalar(snapshots, |s| &s.client_organization),
            client_industry: first_scalar(snapshots, |s| &s.client_industry),
            contacts: union(snapshots, |s| &s.contacts),
            project_scope: first_scalar(snapshots, |s| &s.project_scope),
            contract_term: first_scalar(snapshots, |s| &s.contract_term),
            submission_method: first_scalar(snapshots, |s| &s.submission_method),
            evaluation_criteria: union(snapshots, |s| &s.evaluation_criteria),
            pricing_structure: first_scalar(snapshots, |s| &s.pricing_structure),
            requirements: union(snapshots, |s| &s.requirements),
            keywords: union(snapshots, |s| &s.keywords),
            compliance_standards: union(snapshots, |s| &s.compliance_standards),
        }
    }

    /// JSON Schema handed to the model inside the system prompt. Every field
    /// is required and nullable so replies always carry the full shape.
    pub fn schema_json() -> Value {
        json!({
            "name": "ExtractionState",
            "schema": {
                "type": "object",
                "additionalProperties": false,
                "properties": {
                    "document_type": {
                        "type": ["string", "null"],
                        "enum": ["RFP", "RFI", "RFQ", "Sources Sought", "Other", null]
                    },
                    "document_title": { "type": ["string", "null"] },
                    "issue_date": { "type": ["string", "null"] },
                    "deadlines": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "additionalProperties": false,
                            "properties": {
                                "date": { "type": "string" },
                                "kind": { "type": ["string", "null"] }
                            },
                            "required": ["date"]
                        }
                    },
                    "client_organization": { "type": ["string", "null"] },
                    "client_industry": { "type": ["string", "null"] },
                    "contacts": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "additionalProperties": false,
                            "properties": {
                                "name": { "type": ["string", "null"] },
                                "title": { "type": ["string", "null"] },
                                "email": { "type": ["string", "null"] },
                                "phone": { "type": ["string", "null"] }
                            },
                            "required": []
                        }
                    },
                    "project_scope": { "type": ["string", "null"] },
                    "contract_term": { "type": ["string", "null"] },
                    "submission_method": { "type": ["string", "null"] },
                    "evaluation_criteria": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "additionalProperties": false,
                            "properties": {
                                "criterion": { "type": "string" }
                            },
                            "required": ["criterion"]
                        }
                    },
                    "pricing_structure": { "type": ["string", "null"] },
                    "requirements": { "type": "array", "items": { "type": "string" } },
                    "keywords": { "type": "array", "items": { "type": "string" } },
                    "compliance_standards": { "type": "array", "items": { "type": "string" } }
                },
                "required": Self::FIELD_NAMES.to_vec()
            },
            "strict": true
        })
    }
}

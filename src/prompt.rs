//! Prompt assembly for the merge-extraction loop.
//!
//! The model is driven as a merge agent: each call hands it the running
//! state plus one new chunk and asks for the merged state back. Templates
//! carry literal braces (they contain JSON), so placeholders are substituted
//! with plain string replacement rather than a formatting macro.

use crate::schema::ExtractionState;
use serde_json::Value;

const SYSTEM_PROMPT: &str = "\
ROLE
You are an expert RFP extraction & MERGE agent.

INPUT
You will receive two blocks:
<PREVIOUS_STATE>{a single JSON object already conforming to the schema}</PREVIOUS_STATE>
<NEW_CHUNK>{plain text from the next part of THE SAME document}</NEW_CHUNK>

GOAL
Return MERGED_STATE = PREVIOUS_STATE updated ONLY with facts that are explicitly present in NEW_CHUNK.

STRICT RULES (NO EXCEPTIONS)
1) Evidence-only: Use ONLY information that appears in NEW_CHUNK. No outside knowledge. No inference.
2) Preserve when absent: If NEW_CHUNK does not contain evidence for a field, KEEP the PREVIOUS_STATE value unchanged.
3) Scalars (strings/dates): Update ONLY if NEW_CHUNK clearly states the value. Otherwise leave as-is.
4) Arrays: Output the union of PREVIOUS_STATE and NEW_CHUNK items with de-duplication:
- deadlines: unique by (date, kind?) when present; if kind is absent, unique by date.
- contacts: unique by email (lowercased). If no email, unique by (normalized name, normalized phone).
- evaluation_criteria, requirements: dedupe by normalized text (trim, collapse internal whitespace).
- keywords: tokens lowercased; de-duplicate setwise.
- compliance_standards: tokens UPPERCASED; de-duplicate setwise.
5) Normalization ON UPDATE (do not transform existing PREVIOUS_STATE values unless you're updating them with NEW_CHUNK evidence):
- Dates: use YYYY-MM-DD when a full date is present in NEW_CHUNK; if only a month/year or ambiguous date is present, DO NOT update.
- submission_method, pricing_structure: lowercase strings.
- emails: lowercase.
- phones: strip surrounding spaces; do NOT reformat numerically unless NEW_CHUNK shows an explicit format.
- text fields (requirements, criteria): copy EXACTLY as in NEW_CHUNK (except trimming leading/trailing whitespace).
6) Contradictions: If NEW_CHUNK provides a value that conflicts with PREVIOUS_STATE, REPLACE the PREVIOUS_STATE value with the NEW_CHUNK value.
7) No invention: NEVER rephrase, summarize, expand, or guess. If NEW_CHUNK is silent, return PREVIOUS_STATE unchanged.
8) Schema-only: Include ONLY fields present in the schema. No comments. No extra keys. No document_id (that is system-generated).
9) Output format: Return ONLY the final JSON object, with no prose, no code fences, no prefixes or suffixes.

SCHEMA (you MUST validate against this exactly)
<SCHEMA>
{schema_json}
</SCHEMA>

PROCESS (internal; do NOT output these steps)
- Parse PREVIOUS_STATE (JSON) and read NEW_CHUNK (text).
- Extract ONLY the fields that are explicitly present in NEW_CHUNK.
- DO NOT add any contacts unless NEW_CHUNK shows an email or phone verbatim.
- Apply the merge & normalization rules above.
- Produce the MERGED_STATE JSON.

OUTPUT
Return ONLY the MERGED_STATE as a single JSON object that conforms EXACTLY to the SCHEMA above.
";

const USER_PROMPT: &str = "\
MERGE TASK (JSON ONLY)

<PREVIOUS_STATE>
{prev_state}
</PREVIOUS_STATE>

{hint}
<NEW_CHUNK>
{chunk_text}
</NEW_CHUNK>

RULE REMINDERS
- Evidence-only: Use ONLY facts explicitly present in NEW_CHUNK.
- Preserve when absent: If NEW_CHUNK lacks evidence for a field, KEEP the PREVIOUS_STATE value.
- Scalars: Update ONLY with explicit values from NEW_CHUNK; if conflicting, REPLACE with NEW_CHUNK.
- Arrays: Union with de-duplication per the system prompt rules.
- Normalize ON UPDATE only (dates YYYY-MM-DD when fully specified; emails lowercase; submission_method/pricing_structure lowercase).
- Schema-only: Include ONLY schema fields; do NOT add document_id; no extra keys, comments, or prose.

OUTPUT
Return ONLY the MERGED_STATE as a single valid JSON object that conforms EXACTLY to the SCHEMA above.
";

const ERROR_PROMPT: &str = "\n\n--- PREVIOUS_ATTEMPT_ERROR ---\n\
{error_message}\n\
Fix the issue and return a single JSON object that matches the schema (no extra keys, no comments).";

const HINT_PREFIX: &str = "UNRESOLVED_FIELDS (Focus on unresolved or empty fields first (if present), but DO NOT change any field unless NEW_CHUNK explicitly supports the change.): ";

pub fn build_system_prompt(schema: &Value) -> String {
    SYSTEM_PROMPT.replace("{schema_json}", &schema.to_string())
}

pub fn build_user_prompt(prev_state: &ExtractionState, chunk_text: &str, unresolved: &[&str]) -> String {
    let prev_json =
        serde_json::to_string(prev_state).unwrap_or_else(|_| "{}".to_string());
    let hint = if unresolved.is_empty() {
        String::new()
    } else {
        format!("{HINT_PREFIX}{}\n\n", unresolved.join(", "))
    };
    USER_PROMPT
        .replace("{prev_state}", &prev_json)
        .replace("{hint}", &hint)
        .replace("{chunk_text}", chunk_text)
}

/// Appended to the system prompt on retry so the model sees what went wrong
/// with its previous reply.
pub fn error_addendum(error: Option<&str>) -> String {
    match error {
        Some(message) if !message.is_empty() => {
            ERROR_PROMPT.replace("{error_message}", message)
        }
        _ => String::new(),
    }
}

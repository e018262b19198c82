use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn rfx_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("rfx");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let files_dir = root.join("files");
    fs::create_dir_all(&files_dir).unwrap();
    fs::write(
        files_dir.join("snow-removal-rfp.md"),
        "# Request for Proposal: Snow Removal Services\n\n\
         The City of Lakewood invites proposals for snow removal and ice control.\n\
         Proposals are due September 29, 2025 by 2:00 PM local time.\n\
         Questions may be sent to procurement@lakewood.gov or (303) 555-0142.\n\n\
         Contractors must carry commercial general liability insurance and comply\n\
         with ISO 9001 quality requirements.",
    )
    .unwrap();
    fs::write(
        files_dir.join("janitorial-rfq.md"),
        "# Request for Quotation: Janitorial Services\n\n\
         Orbital Freight seeks quotations for nightly janitorial services at its\n\
         Denver facility. The anticipated contract term is two years with three\n\
         one-year renewal options. Pricing must be quoted per square foot.",
    )
    .unwrap();
    fs::write(
        files_dir.join("fleet-notes.txt"),
        "Sources sought notice for fleet maintenance.\n\n\
         The county is conducting market research on fleet maintenance providers.\n\
         Capability statements should describe diesel engine experience.",
    )
    .unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/rfx.sqlite"

[ingest]
include_globs = ["**/*.md", "**/*.txt"]
exclude_globs = []

[chunking]
max_tokens = 700
overlap_tokens = 80

[retrieval]
final_limit = 12
"#,
        root.display()
    );

    let config_path = config_dir.join("rfx.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_rfx(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = rfx_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run rfx binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn files_dir(tmp: &TempDir) -> String {
    tmp.path().join("files").to_str().unwrap().to_string()
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_rfx(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data").join("rfx.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_rfx(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_rfx(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_missing_config_errors() {
    let (tmp, _) = setup_test_env();
    let bogus = tmp.path().join("config").join("nope.toml");

    let (_, stderr, success) = run_rfx(&bogus, &["init"]);
    assert!(!success, "Missing config should fail");
    assert!(
        stderr.contains("Failed to read config file"),
        "Should name the config problem, got: {}",
        stderr
    );
}

#[test]
fn test_ingest_files() {
    let (tmp, config_path) = setup_test_env();

    run_rfx(&config_path, &["init"]);
    let (stdout, stderr, success) = run_rfx(&config_path, &["ingest", &files_dir(&tmp)]);
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("scanned files: 3"));
    assert!(stdout.contains("upserted documents: 3"));
    assert!(stdout.contains("ok"));
    // LLM disabled: no harvest line
    assert!(!stdout.contains("documents harvested"));
}

#[test]
fn test_ingest_unchanged_files_skipped() {
    let (tmp, config_path) = setup_test_env();

    run_rfx(&config_path, &["init"]);
    run_rfx(&config_path, &["ingest", &files_dir(&tmp)]);

    let (stdout, _, success) = run_rfx(&config_path, &["ingest", &files_dir(&tmp)]);
    assert!(success);
    assert!(
        stdout.contains("unchanged documents: 3"),
        "Expected 3 unchanged, got: {}",
        stdout
    );
    assert!(stdout.contains("upserted documents: 0"));
}

#[test]
fn test_ingest_full_reingests_unchanged() {
    let (tmp, config_path) = setup_test_env();

    run_rfx(&config_path, &["init"]);
    run_rfx(&config_path, &["ingest", &files_dir(&tmp)]);

    let (stdout, _, _) = run_rfx(&config_path, &["ingest", &files_dir(&tmp), "--full"]);
    assert!(stdout.contains("upserted documents: 3"));
    assert!(stdout.contains("unchanged documents: 0"));
}

#[test]
fn test_ingest_modified_file_reingested() {
    let (tmp, config_path) = setup_test_env();

    run_rfx(&config_path, &["init"]);
    run_rfx(&config_path, &["ingest", &files_dir(&tmp)]);

    fs::write(
        tmp.path().join("files").join("fleet-notes.txt"),
        "Sources sought notice, amended.\n\nResponses now due one week later.",
    )
    .unwrap();

    let (stdout, _, _) = run_rfx(&config_path, &["ingest", &files_dir(&tmp)]);
    assert!(
        stdout.contains("upserted documents: 1"),
        "Expected 1 doc upserted after modification, got: {}",
        stdout
    );
    assert!(stdout.contains("unchanged documents: 2"));
}

#[test]
fn test_ingest_dry_run() {
    let (tmp, config_path) = setup_test_env();

    run_rfx(&config_path, &["init"]);
    let (stdout, _, success) = run_rfx(&config_path, &["ingest", &files_dir(&tmp), "--dry-run"]);
    assert!(success);
    assert!(stdout.contains("ingest (dry-run)"));
    assert!(stdout.contains("files found: 3"));
}

#[test]
fn test_ingest_with_limit() {
    let (tmp, config_path) = setup_test_env();

    run_rfx(&config_path, &["init"]);
    let (stdout, _, success) = run_rfx(&config_path, &["ingest", &files_dir(&tmp), "--limit", "1"]);
    assert!(success);
    assert!(stdout.contains("upserted documents: 1"));
}

#[test]
fn test_ingest_no_duplicate_documents() {
    let (tmp, config_path) = setup_test_env();

    run_rfx(&config_path, &["init"]);
    run_rfx(&config_path, &["ingest", &files_dir(&tmp), "--full"]);
    run_rfx(&config_path, &["ingest", &files_dir(&tmp), "--full"]);

    let (stdout, _, _) = run_rfx(&config_path, &["docs"]);
    assert_eq!(
        stdout.matches("snow-removal-rfp").count(),
        1,
        "Duplicate document rows in docs output: {}",
        stdout
    );
}

#[test]
fn test_search_keyword() {
    let (tmp, config_path) = setup_test_env();

    run_rfx(&config_path, &["init"]);
    run_rfx(&config_path, &["ingest", &files_dir(&tmp)]);

    let (stdout, _, success) = run_rfx(
        &config_path,
        &["search", "snow removal", "--mode", "keyword"],
    );
    assert!(success, "search failed");
    assert!(
        stdout.contains("snow-removal-rfp"),
        "Expected the snow removal RFP in results, got: {}",
        stdout
    );
    assert!(stdout.contains("id: "));
}

#[test]
fn test_search_hybrid_degrades_without_embeddings() {
    let (tmp, config_path) = setup_test_env();

    run_rfx(&config_path, &["init"]);
    run_rfx(&config_path, &["ingest", &files_dir(&tmp)]);

    // Default mode is hybrid; embeddings are disabled in the test config.
    let (stdout, stderr, success) = run_rfx(&config_path, &["search", "janitorial"]);
    assert!(success, "degraded hybrid search should still succeed");
    assert!(
        stderr.contains("keyword"),
        "Should warn about the keyword fallback, got: {}",
        stderr
    );
    assert!(stdout.contains("janitorial-rfq"));
}

#[test]
fn test_search_semantic_disabled_prints_notice() {
    let (_tmp, config_path) = setup_test_env();

    run_rfx(&config_path, &["init"]);
    let (stdout, _, success) = run_rfx(&config_path, &["search", "x", "--mode", "semantic"]);
    assert!(success, "semantic notice should exit cleanly");
    assert!(
        stdout.contains("Semantic search requires embeddings"),
        "Should mention embeddings, got: {}",
        stdout
    );
}

#[test]
fn test_search_unknown_mode_is_diagnostic() {
    let (_tmp, config_path) = setup_test_env();

    run_rfx(&config_path, &["init"]);
    let (stdout, _, success) = run_rfx(&config_path, &["search", "x", "--mode", "invalid"]);
    assert!(success, "Unknown mode is a diagnostic, not a crash");
    assert!(stdout.contains("Unknown search mode"));
    assert!(stdout.contains("keyword, semantic, hybrid"));
}

#[test]
fn test_search_unknown_collection_is_diagnostic() {
    let (_tmp, config_path) = setup_test_env();

    run_rfx(&config_path, &["init"]);
    let (stdout, _, success) = run_rfx(&config_path, &["search", "x", "--collection", "widgets"]);
    assert!(success);
    assert!(stdout.contains("Unknown collection"));
    assert!(stdout.contains("requirements"));
}

#[test]
fn test_search_empty_query() {
    let (_tmp, config_path) = setup_test_env();

    run_rfx(&config_path, &["init"]);
    let (stdout, _, success) = run_rfx(&config_path, &["search", ""]);
    assert!(success, "Empty query should not panic");
    assert!(stdout.contains("No results"));
}

#[test]
fn test_search_no_results() {
    let (tmp, config_path) = setup_test_env();

    run_rfx(&config_path, &["init"]);
    run_rfx(&config_path, &["ingest", &files_dir(&tmp)]);

    let (stdout, _, success) = run_rfx(
        &config_path,
        &["search", "xyznonexistent", "--mode", "keyword"],
    );
    assert!(success);
    assert!(stdout.contains("No results"));
}

#[test]
fn test_search_deterministic() {
    let (tmp, config_path) = setup_test_env();

    run_rfx(&config_path, &["init"]);
    run_rfx(&config_path, &["ingest", &files_dir(&tmp)]);

    let args = ["search", "services", "--mode", "keyword"];
    let (stdout1, _, _) = run_rfx(&config_path, &args);
    let (stdout2, _, _) = run_rfx(&config_path, &args);
    assert_eq!(
        stdout1, stdout2,
        "Search results should be deterministic across runs"
    );
}

#[test]
fn test_search_entity_collection_empty_without_harvest() {
    let (tmp, config_path) = setup_test_env();

    run_rfx(&config_path, &["init"]);
    run_rfx(&config_path, &["ingest", &files_dir(&tmp)]);

    let (stdout, _, success) = run_rfx(
        &config_path,
        &["search", "insurance", "--collection", "requirements", "--mode", "keyword"],
    );
    assert!(success);
    assert!(stdout.contains("No results"));
}

#[test]
fn test_search_doc_filter() {
    let (tmp, config_path) = setup_test_env();

    run_rfx(&config_path, &["init"]);
    run_rfx(&config_path, &["ingest", &files_dir(&tmp)]);

    // "services" matches both the RFP and the RFQ; filtering by the RFQ's id
    // must drop the RFP.
    let (all_out, _, _) = run_rfx(&config_path, &["search", "services", "--mode", "keyword"]);
    let rfq_id = all_out
        .lines()
        .skip_while(|l| !l.contains("janitorial-rfq"))
        .find(|l| l.trim().starts_with("id:"))
        .and_then(|l| l.split("id:").nth(1))
        .map(|s| s.trim().to_string())
        .expect("RFQ id in search output");

    let (stdout, _, success) = run_rfx(
        &config_path,
        &["search", "services", "--mode", "keyword", "--doc", &rfq_id],
    );
    assert!(success);
    assert!(stdout.contains(&rfq_id));
    assert!(!stdout.contains("snow-removal-rfp"));
}

#[test]
fn test_get_document() {
    let (tmp, config_path) = setup_test_env();

    run_rfx(&config_path, &["init"]);
    run_rfx(&config_path, &["ingest", &files_dir(&tmp)]);

    let (search_out, _, _) = run_rfx(&config_path, &["search", "snow", "--mode", "keyword"]);
    let id = search_out
        .lines()
        .find(|l| l.trim().starts_with("id:"))
        .and_then(|l| l.split("id:").nth(1))
        .map(|s| s.trim().to_string())
        .expect("search output should include an id line");

    let (stdout, _, success) = run_rfx(&config_path, &["get", &id]);
    assert!(success, "get should succeed");
    assert!(stdout.contains("--- Document ---"));
    assert!(stdout.contains(&id));
    assert!(stdout.contains("--- Extraction ---"));
    assert!(stdout.contains("status:       none"));
    assert!(stdout.contains("--- Entities ---"));
    // No --chunks: chunk texts stay hidden
    assert!(!stdout.contains("--- Chunks"));
}

#[test]
fn test_get_with_chunks() {
    let (tmp, config_path) = setup_test_env();

    run_rfx(&config_path, &["init"]);
    run_rfx(&config_path, &["ingest", &files_dir(&tmp)]);

    let (search_out, _, _) = run_rfx(&config_path, &["search", "snow", "--mode", "keyword"]);
    let id = search_out
        .lines()
        .find(|l| l.trim().starts_with("id:"))
        .and_then(|l| l.split("id:").nth(1))
        .map(|s| s.trim().to_string())
        .expect("search output should include an id line");

    let (stdout, _, success) = run_rfx(&config_path, &["get", &id, "--chunks"]);
    assert!(success);
    assert!(stdout.contains("--- Chunks"));
    assert!(stdout.contains("[chunk 0]"));
    assert!(stdout.contains("snow removal"));
}

#[test]
fn test_get_missing_document() {
    let (_tmp, config_path) = setup_test_env();

    run_rfx(&config_path, &["init"]);

    let (stdout, _, success) = run_rfx(&config_path, &["get", "nonexistent-id"]);
    assert!(success, "Unknown id is a diagnostic, not a crash");
    assert!(
        stdout.contains("Not found: nonexistent-id"),
        "Should report not found, got: {}",
        stdout
    );
}

#[test]
fn test_docs_lists_documents() {
    let (tmp, config_path) = setup_test_env();

    run_rfx(&config_path, &["init"]);
    run_rfx(&config_path, &["ingest", &files_dir(&tmp)]);

    let (stdout, _, success) = run_rfx(&config_path, &["docs"]);
    assert!(success);
    assert!(stdout.contains("TITLE"));
    assert!(stdout.contains("snow-removal-rfp"));
    assert!(stdout.contains("janitorial-rfq"));
    assert!(stdout.contains("fleet-notes"));
}

#[test]
fn test_docs_empty() {
    let (_tmp, config_path) = setup_test_env();

    run_rfx(&config_path, &["init"]);
    let (stdout, _, success) = run_rfx(&config_path, &["docs"]);
    assert!(success);
    assert!(stdout.contains("No documents."));
}

#[test]
fn test_harvest_disabled_prints_how_to_enable() {
    let (tmp, config_path) = setup_test_env();

    run_rfx(&config_path, &["init"]);
    run_rfx(&config_path, &["ingest", &files_dir(&tmp)]);

    let (stdout, _, success) = run_rfx(&config_path, &["harvest", "--all"]);
    assert!(success, "harvest with disabled provider should exit cleanly");
    assert!(
        stdout.contains("LLM provider is disabled"),
        "Should explain how to enable, got: {}",
        stdout
    );
    assert!(stdout.contains("OPENAI_API_KEY"));
}

#[test]
fn test_harvest_requires_id_or_all() {
    let (_tmp, config_path) = setup_test_env();

    run_rfx(&config_path, &["init"]);
    // Enable the provider so the command reaches argument validation.
    let enabled = enable_llm_config(&config_path);
    let (_, stderr, success) = run_rfx(&enabled, &["harvest"]);
    assert!(!success);
    assert!(
        stderr.contains("document id or --all"),
        "Should require a target, got: {}",
        stderr
    );
}

/// Copy the test config and append an enabled [llm] section pointing at a
/// placeholder endpoint. No request is made before argument validation.
fn enable_llm_config(config_path: &Path) -> PathBuf {
    let content = fs::read_to_string(config_path).unwrap();
    let enabled = format!(
        "{}\n[llm]\nprovider = \"openai\"\napi_base = \"http://127.0.0.1:9\"\n",
        content
    );
    let path = config_path.with_file_name("rfx-llm.toml");
    fs::write(&path, enabled).unwrap();
    path
}

#[test]
fn test_embed_pending_errors_when_disabled() {
    let (_tmp, config_path) = setup_test_env();

    run_rfx(&config_path, &["init"]);
    let (_, stderr, success) = run_rfx(&config_path, &["embed", "pending"]);
    assert!(!success, "embed pending should fail when provider disabled");
    assert!(
        stderr.contains("disabled"),
        "Should mention disabled, got: {}",
        stderr
    );
}

#[test]
fn test_embed_rebuild_errors_when_disabled() {
    let (_tmp, config_path) = setup_test_env();

    run_rfx(&config_path, &["init"]);
    let (_, stderr, success) = run_rfx(&config_path, &["embed", "rebuild"]);
    assert!(!success, "embed rebuild should fail when provider disabled");
    assert!(
        stderr.contains("disabled"),
        "Should mention disabled, got: {}",
        stderr
    );
}

#[test]
fn test_stats_overview() {
    let (tmp, config_path) = setup_test_env();

    run_rfx(&config_path, &["init"]);
    run_rfx(&config_path, &["ingest", &files_dir(&tmp)]);

    let (stdout, _, success) = run_rfx(&config_path, &["stats"]);
    assert!(success);
    assert!(stdout.contains("Database Stats"));
    assert!(stdout.contains("Documents:   3"));
    assert!(stdout.contains("Embedding:   disabled"));
    assert!(stdout.contains("LLM:         disabled"));
}

#[test]
fn test_import_element_json() {
    let (tmp, config_path) = setup_test_env();

    run_rfx(&config_path, &["init"]);

    let results = r#"[
      [
        {"type": "Title", "text": "Request for Information: Transit Scheduling Software",
         "metadata": {"page_number": 1, "source_metadata": {"source_id": "rfi/transit-scheduling.pdf"}}},
        {"type": "NarrativeText", "text": "Responses are due October 15, 2025.",
         "metadata": {"page_number": 2, "source_metadata": {"source_id": "rfi/transit-scheduling.pdf"}}}
      ],
      [
        {"type": "NarrativeText", "text": "Sources sought: grounds maintenance for the airport authority.",
         "metadata": {"page_number": 1, "source_metadata": {"source_id": "notices/grounds.pdf"}}}
      ]
    ]"#;
    let results_path = tmp.path().join("results.json");
    fs::write(&results_path, results).unwrap();

    let (stdout, stderr, success) = run_rfx(
        &config_path,
        &["import", results_path.to_str().unwrap()],
    );
    assert!(success, "import failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("documents found: 2"));
    assert!(stdout.contains("upserted documents: 2"));
    assert!(stdout.contains("chunks written: 3"));

    // Page numbers survive into get --chunks
    let (search_out, _, _) = run_rfx(&config_path, &["search", "transit", "--mode", "keyword"]);
    let id = search_out
        .lines()
        .find(|l| l.trim().starts_with("id:"))
        .and_then(|l| l.split("id:").nth(1))
        .map(|s| s.trim().to_string())
        .expect("imported doc id in search output");
    let (get_out, _, _) = run_rfx(&config_path, &["get", &id, "--chunks"]);
    assert!(get_out.contains("pages:        2"));
    assert!(get_out.contains("[chunk 0 / page 1]"));
    assert!(get_out.contains("[chunk 1 / page 2]"));
}

#[test]
fn test_import_dry_run() {
    let (tmp, config_path) = setup_test_env();

    run_rfx(&config_path, &["init"]);

    let results = r#"[
      {"type": "NarrativeText", "text": "Single document as a flat element array.",
       "metadata": {"page_number": 1}}
    ]"#;
    let results_path = tmp.path().join("flat.json");
    fs::write(&results_path, results).unwrap();

    let (stdout, _, success) = run_rfx(
        &config_path,
        &["import", results_path.to_str().unwrap(), "--dry-run"],
    );
    assert!(success);
    assert!(stdout.contains("import (dry-run)"));
    assert!(stdout.contains("documents found: 1"));
    assert!(stdout.contains("elements found: 1"));
}

#[test]
fn test_import_unchanged_skipped() {
    let (tmp, config_path) = setup_test_env();

    run_rfx(&config_path, &["init"]);

    let results = r#"[
      {"type": "NarrativeText", "text": "Quotation request for desktop hardware.",
       "metadata": {"page_number": 1, "source_metadata": {"source_id": "rfq/hardware.pdf"}}}
    ]"#;
    let results_path = tmp.path().join("hw.json");
    fs::write(&results_path, results).unwrap();

    run_rfx(&config_path, &["import", results_path.to_str().unwrap()]);
    let (stdout, _, _) = run_rfx(&config_path, &["import", results_path.to_str().unwrap()]);
    assert!(stdout.contains("unchanged documents: 1"));
    assert!(stdout.contains("upserted documents: 0"));
}

#[test]
fn test_unknown_progress_mode_errors() {
    let (tmp, config_path) = setup_test_env();

    run_rfx(&config_path, &["init"]);
    let (_, stderr, success) = run_rfx(
        &config_path,
        &["ingest", &files_dir(&tmp), "--progress", "fancy"],
    );
    assert!(!success);
    assert!(stderr.contains("Unknown progress mode"));
}

#[test]
fn test_progress_json_on_stderr_only() {
    let (tmp, config_path) = setup_test_env();

    run_rfx(&config_path, &["init"]);
    let (stdout, stderr, success) = run_rfx(
        &config_path,
        &["ingest", &files_dir(&tmp), "--progress", "json"],
    );
    assert!(success);
    assert!(
        stderr.contains("\"event\":\"progress\""),
        "JSON progress should land on stderr, got: {}",
        stderr
    );
    assert!(!stdout.contains("\"event\":\"progress\""));
    assert!(stdout.contains("upserted documents: 3"));
}

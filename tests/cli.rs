use std::io::Write;
use std::process::{Command, Output, Stdio};

use mockito::{Matcher, Server};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tempfile::NamedTempFile;

fn mapper_command() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_map-openai-embeddings"));
    cmd.env_remove("OPENAI_API_KEY")
        .env_remove("MAP_OPENAI_EMBEDDINGS_OPENAI_API_KEY")
        .env_remove("RUST_LOG");
    cmd
}

fn config_file(settings: Value) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp config");
    write!(file, "{settings}").expect("write config");
    file
}

fn run_with_stdin(mut cmd: Command, input: &str) -> Output {
    let mut child = cmd
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn CLI");
    child
        .stdin
        .as_mut()
        .expect("stdin open")
        .write_all(input.as_bytes())
        .expect("write stdin");
    child.wait_with_output().expect("read CLI output")
}

fn output_messages(output: &Output) -> Vec<Value> {
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(|line| serde_json::from_str(line).expect("stdout line is JSON"))
        .collect()
}

fn embedding_body(value: f64, dimensions: usize) -> String {
    json!({
        "object": "list",
        "data": [{"object": "embedding", "index": 0, "embedding": vec![value; dimensions]}],
        "model": "text-embedding-ada-002"
    })
    .to_string()
}

#[test]
fn about_prints_settings_as_json() {
    let output = mapper_command().arg("--about").output().expect("run CLI");

    assert!(output.status.success());
    let about: Value = serde_json::from_slice(&output.stdout).expect("about JSON");
    assert_eq!(about["name"], "map-openai-embeddings");
    assert!(about["settings"]
        .as_array()
        .expect("settings")
        .iter()
        .any(|setting| setting["name"] == "document_text_property"));
}

#[test]
fn about_prints_markdown() {
    let output = mapper_command()
        .args(["--about", "--format", "markdown"])
        .output()
        .expect("run CLI");

    assert!(output.status.success());
    let text = String::from_utf8_lossy(&output.stdout);
    assert!(text.contains("## Settings"));
}

#[test]
fn missing_api_key_fails_before_reading_input() {
    let output = run_with_stdin(mapper_command(), "");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("`openai_api_key` setting"), "stderr: {stderr}");
    assert!(stderr.contains("OPENAI_API_KEY"));
    assert!(output.stdout.is_empty());
}

#[test]
fn generic_env_key_is_accepted() {
    let mut cmd = mapper_command();
    cmd.env("OPENAI_API_KEY", "sk-from-env");
    let output = run_with_stdin(cmd, include_str!("fixtures/schema_only.jsonl"));

    assert!(
        output.status.success(),
        "cli exited with {}: {}",
        output.status,
        String::from_utf8_lossy(&output.stderr)
    );
}

#[test]
fn schema_and_passthrough_messages_match_fixture() {
    let config = config_file(json!({"openai_api_key": "sk-test"}));
    let mut cmd = mapper_command();
    cmd.arg("--config").arg(config.path());
    let output = run_with_stdin(cmd, include_str!("fixtures/schema_only.jsonl"));

    assert!(
        output.status.success(),
        "cli exited with {}: {}",
        output.status,
        String::from_utf8_lossy(&output.stderr)
    );
    assert_eq!(
        String::from_utf8_lossy(&output.stdout),
        include_str!("fixtures/schema_only.expected.jsonl")
    );
}

#[test]
fn embeds_records_from_input_file() {
    let mut server = Server::new();
    let mock = server
        .mock("POST", "/embeddings")
        .match_header("authorization", "Bearer sk-test")
        .match_body(Matcher::PartialJson(json!({
            "model": "text-embedding-ada-002",
            "input": ["Vectors for search."]
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(embedding_body(0.5, 1536))
        .expect(1)
        .create();
    let config = config_file(json!({
        "openai_api_key": "sk-test",
        "openai_base_url": server.url()
    }));

    let output = mapper_command()
        .arg("--config")
        .arg(config.path())
        .arg("--input")
        .arg("tests/fixtures/docs.jsonl")
        .output()
        .expect("run CLI");

    assert!(
        output.status.success(),
        "cli exited with {}: {}",
        output.status,
        String::from_utf8_lossy(&output.stderr)
    );
    mock.assert();

    let messages = output_messages(&output);
    let types: Vec<_> = messages
        .iter()
        .map(|message| message["type"].as_str().unwrap_or_default().to_string())
        .collect();
    assert_eq!(types, vec!["SCHEMA", "RECORD", "STATE"]);

    let record = &messages[1];
    assert_eq!(record["time_extracted"], "2024-05-01T12:00:00Z");
    assert_eq!(record["record"]["id"], "intro");
    assert_eq!(record["record"]["page_content"], "Vectors for\nsearch.");
    assert_eq!(record["record"]["metadata"], json!({"source": "intro.md"}));
    assert_eq!(record["record"]["segment_number"], 0);
    assert_eq!(
        record["record"]["embeddings"].as_array().expect("vector").len(),
        1536
    );
}

#[test]
fn long_document_becomes_three_segments() {
    let mut server = Server::new();
    let mock = server
        .mock("POST", "/embeddings")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(embedding_body(0.125, 1536))
        .expect(3)
        .create();
    let config = config_file(json!({
        "openai_api_key": "sk-test",
        "openai_base_url": server.url(),
        "splitter_config": {"chunk_size": 1000, "chunk_overlap": 200}
    }));
    let input = format!(
        "{}\n",
        json!({
            "type": "RECORD",
            "stream": "docs",
            "record": {"page_content": "A".repeat(2000), "metadata": {"source": "doc1"}}
        })
    );

    let mut cmd = mapper_command();
    cmd.arg("--config").arg(config.path());
    let output = run_with_stdin(cmd, &input);

    assert!(
        output.status.success(),
        "cli exited with {}: {}",
        output.status,
        String::from_utf8_lossy(&output.stderr)
    );
    mock.assert();

    let messages = output_messages(&output);
    assert_eq!(messages.len(), 3);
    for (idx, message) in messages.iter().enumerate() {
        let record = &message["record"];
        assert_eq!(record["segment_number"], idx);
        assert_eq!(record["metadata"]["source"], "doc1");
        assert!(record["page_content"].as_str().expect("text").len() <= 1000);
        assert_eq!(record["embeddings"].as_array().expect("vector").len(), 1536);
    }
}

#[test]
fn rate_limit_aborts_the_sync() {
    let mut server = Server::new();
    let _mock = server
        .mock("POST", "/embeddings")
        .with_status(429)
        .with_body(json!({"error": {"message": "Rate limit reached for requests"}}).to_string())
        .create();
    let config = config_file(json!({
        "openai_api_key": "sk-test",
        "openai_base_url": server.url()
    }));

    let output = mapper_command()
        .arg("--config")
        .arg(config.path())
        .arg("--input")
        .arg("tests/fixtures/docs.jsonl")
        .output()
        .expect("run CLI");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("Sync aborted due to OpenAI rate limit reached"),
        "stderr: {stderr}"
    );
    assert!(stderr.contains("Rate limit reached for requests"));

    let messages = output_messages(&output);
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["type"], "SCHEMA");
}

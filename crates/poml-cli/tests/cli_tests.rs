use std::fs;
use std::process::Command;

use tempfile::TempDir;

fn poml() -> Command {
    Command::new(env!("CARGO_BIN_EXE_poml"))
}

#[test]
fn renders_raw_text_with_context_file() {
    let dir = TempDir::new().unwrap();
    let prompt = dir.path().join("prompt.poml");
    let context = dir.path().join("ctx.json");
    fs::write(&prompt, "<task>Greet {{ name }}.</task>").unwrap();
    fs::write(&context, r#"{"name": "Alice"}"#).unwrap();

    let output = poml()
        .arg("-f")
        .arg(&prompt)
        .arg("--context-file")
        .arg(&context)
        .args(["--format", "raw"])
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert_eq!(
        String::from_utf8_lossy(&output.stdout),
        "# Task\n\nGreet Alice.\n"
    );
}

#[test]
fn writes_openai_chat_to_output_file() {
    let dir = TempDir::new().unwrap();
    let prompt = dir.path().join("prompt.poml");
    let out = dir.path().join("out.json");
    fs::write(
        &prompt,
        "<system-msg>Be brief.</system-msg><human-msg>Hi {{ who }}</human-msg>",
    )
    .unwrap();

    let status = poml()
        .arg("-f")
        .arg(&prompt)
        .args(["--context", r#"{"who": "there"}"#, "--format", "openai_chat", "-o"])
        .arg(&out)
        .status()
        .unwrap();
    assert!(status.success());

    let value: serde_json::Value = serde_json::from_str(&fs::read_to_string(&out).unwrap()).unwrap();
    assert_eq!(value["messages"][0]["role"], "system");
    assert_eq!(value["messages"][1]["content"], "Hi there");
}

#[test]
fn error_diagnostics_fail_the_run() {
    let dir = TempDir::new().unwrap();
    let prompt = dir.path().join("broken.poml");
    fs::write(&prompt, "<p>ok</p>\n</x>").unwrap();

    let output = poml().arg("-f").arg(&prompt).output().unwrap();
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("broken.poml:2:1: error:"), "{stderr}");
}

#[test]
fn unknown_format_is_rejected() {
    let dir = TempDir::new().unwrap();
    let prompt = dir.path().join("prompt.poml");
    fs::write(&prompt, "<p>x</p>").unwrap();

    let output = poml()
        .arg("-f")
        .arg(&prompt)
        .args(["--format", "yaml"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn trace_dir_keeps_each_run() {
    let dir = TempDir::new().unwrap();
    let prompt = dir.path().join("greet.poml");
    let stylesheet = dir.path().join("style.json");
    let traces = dir.path().join("traces");
    fs::write(&prompt, "<p>Hi {{ who }}</p>").unwrap();
    fs::write(&stylesheet, r#"{"p": {"speaker": "ai"}}"#).unwrap();

    for _ in 0..2 {
        let output = poml()
            .arg("-f")
            .arg(&prompt)
            .arg("--stylesheet-file")
            .arg(&stylesheet)
            .args(["--context", r#"{"who": "Bob"}"#, "--trace-dir"])
            .arg(&traces)
            .output()
            .unwrap();
        assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    }

    assert_eq!(
        fs::read_to_string(traces.join("0001.greet.poml")).unwrap(),
        "<p>Hi {{ who }}</p>"
    );
    let context: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(traces.join("0001.greet.context.json")).unwrap())
            .unwrap();
    assert_eq!(context["who"], "Bob");
    assert!(traces.join("0001.greet.stylesheet.json").exists());
    let result: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(traces.join("0002.greet.result.json")).unwrap())
            .unwrap();
    assert_eq!(result["messages"][0]["content"], "Hi Bob");
}

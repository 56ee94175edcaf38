use serde_json::{json, Value};
use std::io::Write;
use std::process::{Command, Output, Stdio};

const STUB_REPL: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/stub_repl.sh");

fn bridge_bin() -> &'static str {
    option_env!("CARGO_BIN_EXE_repl-bridge").expect("repl-bridge test binary not built")
}

fn run_bridge(repl_cmd: &str, extra: &[&str], input: &str) -> Output {
    let mut child = Command::new(bridge_bin())
        .args(["--repl-cmd", repl_cmd])
        .args(["--quiet-ms", "60", "--startup-timeout-ms", "5000"])
        .args(["--turn-timeout-ms", "5000", "--interrupt-settle-ms", "200"])
        .args(extra)
        .env_remove("REPL_BRIDGE_LOGS")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn repl-bridge");
    {
        let mut stdin = child.stdin.take().expect("stdin piped");
        stdin.write_all(input.as_bytes()).expect("write requests");
    }
    child.wait_with_output().expect("wait for repl-bridge")
}

fn records(output: &Output) -> Vec<Value> {
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(|line| serde_json::from_str(line).expect("stdout carries JSON records only"))
        .collect()
}

fn stub_cmd() -> String {
    format!("/bin/sh {STUB_REPL}")
}

#[test]
fn help_mentions_name() {
    let output = Command::new(bridge_bin())
        .arg("--help")
        .output()
        .expect("run repl-bridge --help");
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("REPL Bridge"));
}

#[test]
fn invalid_configuration_emits_fatal_record() {
    let output = run_bridge(&stub_cmd(), &["--rows", "0"], "");
    assert_eq!(output.status.code(), Some(1));
    let records = records(&output);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["status"], "error");
    assert!(records[0]["message"].as_str().unwrap().contains("--rows"));
    assert!(records[0].get("id").is_none());
}

#[test]
fn program_dying_before_prompt_is_fatal() {
    let output = run_bridge("/bin/sh -c 'echo booting; exit 4'", &[], "");
    assert_eq!(output.status.code(), Some(1));
    let records = records(&output);
    assert_eq!(records.len(), 1);
    let message = records[0]["message"].as_str().unwrap();
    assert!(message.contains("exited with status 4"), "{message}");
    assert!(String::from_utf8_lossy(&output.stderr).contains("exited with status 4"));
}

#[test]
fn full_session_round_trip() {
    let input = concat!(
        "{\"type\":\"execute\",\"id\":1,\"code\":\"print hello\"}\n",
        "{\"type\":\"execute\",\"id\":2,\"code\":\"print line1\\nfail boom\"}\n",
        "{\"type\":\"execute\",\"id\":3,\"code\":\"\"}\n",
        "not json\n",
        "{\"type\":\"complete\",\"id\":4,\"code\":\"pri\"}\n",
        "{\"type\":\"interrupt\",\"id\":5}\n",
        "{\"type\":\"execute\",\"id\":6,\"code\":\"color green\"}\n",
        "{\"type\":\"shutdown\",\"id\":7}\n",
        "{\"type\":\"execute\",\"id\":8,\"code\":\"print never\"}\n",
    );
    let output = run_bridge(&stub_cmd(), &[], input);
    assert_eq!(output.status.code(), Some(0));
    let records = records(&output);
    assert_eq!(records.len(), 8, "{records:?}");
    assert_eq!(records[0], json!({"status": "ready"}));
    assert_eq!(
        records[1],
        json!({"id": 1, "status": "ok", "stdout": "hello\n", "stderr": "", "value": ""})
    );
    assert_eq!(
        records[2],
        json!({
            "id": 2,
            "status": "error",
            "stdout": "line1\n",
            "stderr": "",
            "ename": "EvalError",
            "evalue": "boom",
            "traceback": ["boom", "at line 1"]
        })
    );
    assert_eq!(
        records[3],
        json!({"id": 3, "status": "ok", "stdout": "", "stderr": "", "value": ""})
    );
    assert_eq!(records[4]["id"], 0);
    assert_eq!(records[4]["ename"], "ProtocolError");
    assert_eq!(records[5], json!({"id": 4, "status": "ok", "completions": []}));
    assert_eq!(records[6], json!({"id": 5, "status": "ok"}));
    assert_eq!(records[7]["id"], 6);
    assert_eq!(records[7]["stdout"], "green\n");
    // Shutdown answers exactly once and nothing follows it.
    let last = String::from_utf8_lossy(&output.stdout)
        .lines()
        .last()
        .map(str::to_string);
    assert_eq!(last.as_deref(), Some("{\"id\":7,\"status\":\"ok\"}"));
}

#[test]
fn end_of_input_exits_cleanly() {
    let output = run_bridge(
        &stub_cmd(),
        &[],
        "{\"type\":\"execute\",\"id\":1,\"code\":\"print bye\"}\n",
    );
    assert_eq!(output.status.code(), Some(0));
    let records = records(&output);
    assert_eq!(records.len(), 2);
    assert_eq!(records[1]["stdout"], "bye\n");
}

#[test]
fn program_death_is_reported_and_exits_nonzero() {
    let input = concat!(
        "{\"type\":\"execute\",\"id\":1,\"code\":\"exit 3\"}\n",
        "{\"type\":\"execute\",\"id\":2,\"code\":\"print too late\"}\n",
    );
    let output = run_bridge(&stub_cmd(), &[], input);
    assert_eq!(output.status.code(), Some(1));
    let records = records(&output);
    assert_eq!(records.len(), 2, "{records:?}");
    assert_eq!(records[1]["id"], 1);
    assert_eq!(records[1]["ename"], "REPLError");
    assert_eq!(records[1]["evalue"], "REPL process died");
    assert_eq!(
        records[1]["traceback"],
        json!(["REPL process terminated unexpectedly", "exited with status 3"])
    );
}

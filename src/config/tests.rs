use super::{apply_config, load_config_file, types::ParameterValue};
use crate::args::{ControllerMode, FleetArgs};
use crate::error::{AppError, AppResult};
use clap::{CommandFactory, FromArgMatches};
use std::time::Duration;
use tempfile::tempdir;

fn parse_with_config(argv: &[&str], file: &str, content: &str) -> AppResult<FleetArgs> {
    let dir = tempdir()?;
    let path = dir.path().join(file);
    std::fs::write(&path, content)?;
    let config = load_config_file(&path)?;
    let matches = FleetArgs::command().try_get_matches_from(argv)?;
    let mut args = FleetArgs::from_arg_matches(&matches)?;
    apply_config(&mut args, &matches, &config)?;
    Ok(args)
}

#[test]
fn toml_config_fills_controller_and_run() -> AppResult<()> {
    let content = r#"
verbose = true

[controller]
listen = "127.0.0.1:7300"
mode = "auto"
min_workers = 3

[run]
workload = "echo"
concurrency = 2
total = 60
duration = "90s"

[run.parameters]
delay_ms = 5
url = "http://localhost:8080"
verbose = false
"#;
    let args = parse_with_config(&["fleetload"], "fleetload.toml", content)?;
    if args.controller_listen.as_deref() != Some("127.0.0.1:7300") {
        return Err(AppError::config("Unexpected listen address"));
    }
    if args.controller_mode != ControllerMode::Auto || args.min_workers.get() != 3 {
        return Err(AppError::config("Unexpected controller settings"));
    }
    if args.workload.as_deref() != Some("echo") || args.concurrency != 2 {
        return Err(AppError::config("Unexpected run settings"));
    }
    if args.total.map(u64::from) != Some(60) || args.duration != Some(Duration::from_secs(90)) {
        return Err(AppError::config("Unexpected run budget"));
    }
    if !args.verbose {
        return Err(AppError::config("Expected verbose from config"));
    }
    let expected = vec![
        ("delay_ms".to_owned(), "5".to_owned()),
        ("url".to_owned(), "http://localhost:8080".to_owned()),
        ("verbose".to_owned(), "false".to_owned()),
    ];
    if args.params != expected {
        return Err(AppError::config(format!("Unexpected params {:?}", args.params)));
    }
    Ok(())
}

#[test]
fn cli_values_win_over_config() -> AppResult<()> {
    let content = r#"
[run]
workload = "echo"
concurrency = 8

[run.parameters]
delay_ms = 5
"#;
    let args = parse_with_config(
        &["fleetload", "-w", "http", "-P", "url=http://x"],
        "fleetload.toml",
        content,
    )?;
    if args.workload.as_deref() != Some("http") {
        return Err(AppError::config("CLI workload should win"));
    }
    if args.concurrency != 8 {
        return Err(AppError::config("Config concurrency should apply"));
    }
    if args.params != vec![("url".to_owned(), "http://x".to_owned())] {
        return Err(AppError::config("CLI params should replace config params"));
    }
    Ok(())
}

#[test]
fn json_worker_config() -> AppResult<()> {
    let content = r#"{
  "worker": {
    "join": "10.0.0.5:7300",
    "id": "6f2b1c3e-9b1f-4a51-8f55-2b8e1a1c9d10",
    "standby": true,
    "batch_size": 1,
    "metadata": { "region": "eu" }
  }
}"#;
    let args = parse_with_config(&["fleetload"], "fleetload.json", content)?;
    if args.worker_join.as_deref() != Some("10.0.0.5:7300") {
        return Err(AppError::config("Unexpected join address"));
    }
    if args.worker_id.is_none() || !args.standby || args.batch_size.get() != 1 {
        return Err(AppError::config("Unexpected worker settings"));
    }
    if args.meta != vec![("region".to_owned(), "eu".to_owned())] {
        return Err(AppError::config("Unexpected metadata"));
    }
    Ok(())
}

#[test]
fn invalid_config_values_are_rejected() -> AppResult<()> {
    let cases = [
        "[run]\nconcurrency = 0\n",
        "[run]\nduration = \"5 days\"\n",
        "[worker]\nbatch_size = 0\n",
        "[worker]\nid = \"nope\"\n",
        "[controller]\nlisten = \"a:1\"\n[worker]\njoin = \"b:2\"\n",
        "unknown_key = 1\n",
    ];
    for content in cases {
        if parse_with_config(&["fleetload"], "fleetload.toml", content).is_ok() {
            return Err(AppError::config(format!("Expected rejection of {content:?}")));
        }
    }
    Ok(())
}

#[test]
fn unsupported_extension_is_rejected() -> AppResult<()> {
    let dir = tempdir()?;
    let path = dir.path().join("fleetload.yaml");
    std::fs::write(&path, "run: {}")?;
    if load_config_file(&path).is_ok() {
        return Err(AppError::config("Expected yaml to be rejected"));
    }
    Ok(())
}

#[test]
fn parameter_values_render_as_strings() -> AppResult<()> {
    let rendered = [
        ParameterValue::Bool(true).to_string(),
        ParameterValue::Integer(-3).to_string(),
        ParameterValue::Text("GET".to_owned()).to_string(),
    ];
    if rendered != ["true", "-3", "GET"] {
        return Err(AppError::config(format!("Unexpected rendering {rendered:?}")));
    }
    Ok(())
}

use std::future::Future;

use super::{
    ECHO_WORKLOAD, HTTP_WORKLOAD, ParameterKind, ParameterSpec, WorkloadContext,
    WorkloadDescriptor, WorkloadParameters, WorkloadRegistry,
};
use crate::engine::{RunId, WorkerId};
use crate::error::{AppError, AppResult, WorkloadError};

fn run_async_test<F>(future: F) -> AppResult<()>
where
    F: Future<Output = AppResult<()>>,
{
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::workload(format!("Failed to build runtime: {}", err)))?;
    runtime.block_on(future)
}

fn params(pairs: &[(&str, &str)]) -> WorkloadParameters {
    pairs
        .iter()
        .map(|(key, value)| ((*key).to_owned(), (*value).to_owned()))
        .collect()
}

fn sample_descriptor() -> WorkloadDescriptor {
    WorkloadDescriptor::new("sample")
        .with_parameter(ParameterSpec::new("count", ParameterKind::UInt))
        .with_parameter(ParameterSpec::new("offset", ParameterKind::Int).with_default("-1"))
        .with_parameter(ParameterSpec::new("verbose", ParameterKind::Bool).nullable())
        .with_parameter(
            ParameterSpec::new("mode", ParameterKind::Enum)
                .with_choices(&["fast", "slow"])
                .with_default("fast"),
        )
}

#[test]
fn resolve_fills_defaults_and_skips_nullable() -> AppResult<()> {
    let resolved = sample_descriptor().resolve(&params(&[("count", "3")]))?;
    if resolved.get("count").map(String::as_str) != Some("3") {
        return Err(AppError::workload("Expected count to be kept"));
    }
    if resolved.get("offset").map(String::as_str) != Some("-1") {
        return Err(AppError::workload("Expected offset default"));
    }
    if resolved.get("mode").map(String::as_str) != Some("fast") {
        return Err(AppError::workload("Expected mode default"));
    }
    if resolved.contains_key("verbose") {
        return Err(AppError::workload("Nullable parameter should stay absent"));
    }
    Ok(())
}

#[test]
fn resolve_rejects_unknown_missing_and_malformed_values() -> AppResult<()> {
    let descriptor = sample_descriptor();

    match descriptor.resolve(&params(&[("count", "1"), ("bogus", "x")])) {
        Err(WorkloadError::UnknownParameter { name }) if name == "bogus" => {}
        other => {
            return Err(AppError::workload(format!(
                "Expected unknown parameter, got {:?}",
                other
            )));
        }
    }
    match descriptor.resolve(&params(&[])) {
        Err(WorkloadError::MissingParameter { name }) if name == "count" => {}
        other => {
            return Err(AppError::workload(format!(
                "Expected missing parameter, got {:?}",
                other
            )));
        }
    }
    match descriptor.resolve(&params(&[("count", "-4")])) {
        Err(WorkloadError::InvalidParameterValue { name, .. }) if name == "count" => {}
        other => {
            return Err(AppError::workload(format!(
                "Expected invalid value, got {:?}",
                other
            )));
        }
    }
    match descriptor.resolve(&params(&[("count", "1"), ("mode", "medium")])) {
        Err(WorkloadError::InvalidChoice { name, .. }) if name == "mode" => {}
        other => {
            return Err(AppError::workload(format!(
                "Expected invalid choice, got {:?}",
                other
            )));
        }
    }
    Ok(())
}

#[test]
fn type_label_marks_nullable() -> AppResult<()> {
    let label = ParameterSpec::new("x", ParameterKind::String)
        .nullable()
        .type_label();
    if label != "String?" {
        return Err(AppError::workload(format!("Unexpected label {}", label)));
    }
    Ok(())
}

#[test]
fn descriptor_serializes_as_catalog_entry() -> AppResult<()> {
    let json = serde_json::to_value(sample_descriptor())?;
    let kind = json
        .get("parameters")
        .and_then(|parameters| parameters.get(0))
        .and_then(|parameter| parameter.get("kind"))
        .and_then(serde_json::Value::as_str);
    if kind != Some("uint") {
        return Err(AppError::workload(format!("Unexpected kind {:?}", kind)));
    }
    Ok(())
}

#[test]
fn registry_rejects_duplicate_and_unknown_names() -> AppResult<()> {
    let mut registry = WorkloadRegistry::with_builtins()?;
    if registry.len() != 2 {
        return Err(AppError::workload("Expected two built-in workloads"));
    }
    let names: Vec<String> = registry
        .catalog()
        .into_iter()
        .map(|descriptor| descriptor.name)
        .collect();
    if names != [ECHO_WORKLOAD, HTTP_WORKLOAD] {
        return Err(AppError::workload(format!("Unexpected catalog {:?}", names)));
    }

    let duplicate = registry.register(WorkloadDescriptor::new(ECHO_WORKLOAD), |_parameters| {
        Err(WorkloadError::Failed {
            message: "unused".to_owned(),
        })
    });
    if !matches!(duplicate, Err(WorkloadError::DuplicateWorkload { .. })) {
        return Err(AppError::workload("Expected duplicate registration error"));
    }

    if !matches!(
        registry.create("missing", &params(&[])),
        Err(WorkloadError::UnknownWorkload { .. })
    ) {
        return Err(AppError::workload("Expected unknown workload error"));
    }
    Ok(())
}

#[test]
fn http_workload_requires_valid_url() -> AppResult<()> {
    let registry = WorkloadRegistry::with_builtins()?;
    match registry.create(HTTP_WORKLOAD, &params(&[("url", "not a url")])) {
        Err(WorkloadError::InvalidUrl { .. }) => Ok(()),
        Err(err) => Err(AppError::workload(format!("Unexpected error {}", err))),
        Ok(_) => Err(AppError::workload("Expected invalid url error")),
    }
}

#[test]
fn echo_workload_fails_every_nth_execution() -> AppResult<()> {
    run_async_test(async {
        let registry = WorkloadRegistry::with_builtins()?;
        let mut workload = registry.create(ECHO_WORKLOAD, &params(&[("fail_every", "3")]))?;
        let context = WorkloadContext {
            worker_id: WorkerId::generate(),
            run_id: RunId::generate(),
            slot: 0,
        };
        workload.setup(&context).await?;
        let mut failures = 0_u32;
        for _ in 0..9 {
            if workload.execute(&context).await.is_err() {
                failures = failures.saturating_add(1);
            }
        }
        workload.teardown(&context).await?;
        if failures != 3 {
            return Err(AppError::workload(format!(
                "Expected 3 failures, got {}",
                failures
            )));
        }
        Ok(())
    })
}

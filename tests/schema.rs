use metricloom::config::parse_entries;
use metricloom::schema::{ParamKind, ParamSchema, ParamSpec, ValidationMessage};
use serde_json::json;

fn schema() -> ParamSchema {
    ParamSchema::new()
        .with(ParamSpec::new("path", ParamKind::Str).required())
        .with(ParamSpec::new("interval", ParamKind::Int).range(1.0, 3600.0))
        .with(ParamSpec::new("mode", ParamKind::Str).allowed(vec![json!("append"), json!("truncate")]))
        .with(ParamSpec::new("glob", ParamKind::Str).validator(|value| {
            if value.as_str().is_some_and(|s| s.contains('*')) {
                Ok(())
            } else {
                Err("must contain a wildcard".into())
            }
        }))
}

fn entry(params: serde_json::Value) -> metricloom::config::ModuleConfig {
    let text = json!([{ "id": "csv", "module_name": "outputs.csv", "params": params }]).to_string();
    parse_entries(&text).expect("parse").remove(0)
}

#[test]
fn valid_params_produce_no_findings() {
    let config = entry(json!({
        "path": "/tmp/out.csv",
        "interval": 30,
        "mode": "append",
        "glob": "*.csv",
    }));
    assert!(schema().validate(&config).is_empty());
}

#[test]
fn missing_required_parameter_is_reported() {
    let config = entry(json!({}));
    let findings = schema().validate(&config);
    assert_eq!(findings.len(), 1);
    assert!(findings[0].reason.contains("path"));
    assert_eq!(findings[0].module_id, "csv");
}

#[test]
fn type_range_and_enum_violations_are_all_collected() {
    let config = entry(json!({
        "path": 42,
        "interval": 0,
        "mode": "overwrite",
    }));
    let findings = schema().validate(&config);
    assert_eq!(findings.len(), 3, "expected all violations: {findings:?}");
}

#[test]
fn custom_validator_failure_names_the_parameter() {
    let config = entry(json!({ "path": "/tmp/x", "glob": "plain.csv" }));
    let findings = schema().validate(&config);
    assert_eq!(findings.len(), 1);
    assert!(findings[0].reason.contains("glob"));
    assert!(findings[0].reason.contains("wildcard"));
}

#[test]
fn messages_render_module_and_reason() {
    let message = ValidationMessage::new("csv", "outputs.csv", "required parameter `path` is missing");
    assert_eq!(
        message.to_string(),
        "module `csv` (outputs.csv): required parameter `path` is missing"
    );
    // Serializes verbatim for API consumers.
    let value = serde_json::to_value(&message).expect("serialize");
    assert_eq!(value["module_id"], "csv");
}

#[test]
fn optional_parameters_may_be_absent() {
    let config = entry(json!({ "path": "/tmp/x" }));
    assert!(schema().validate(&config).is_empty());
}

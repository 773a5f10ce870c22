use metricloom::dynamic::{Coerce, DynamicError, DynamicValue, ExprEvaluator};
use metricloom::record::Record;
use serde_json::json;

fn sample() -> Record {
    Record::new("cpu")
        .with_field("usage", json!(0.93))
        .with_field("cores", json!(8))
        .with_tag("host", json!("db-1"))
}

#[test]
fn literals_pass_through_unchanged() {
    let evaluator = ExprEvaluator::new();
    let value = DynamicValue::new(json!(42));
    assert_eq!(value.resolve(&sample(), &evaluator, None).unwrap(), json!(42));

    let plain = DynamicValue::new(json!("just a string"));
    assert_eq!(
        plain.resolve(&sample(), &evaluator, None).unwrap(),
        json!("just a string")
    );
}

#[test]
fn field_and_tag_references_read_the_record() {
    let evaluator = ExprEvaluator::new();
    let field = DynamicValue::new(json!("field:usage"));
    assert_eq!(
        field.resolve(&sample(), &evaluator, None).unwrap(),
        json!(0.93)
    );

    let tag = DynamicValue::new(json!("tag:host"));
    assert_eq!(
        tag.resolve(&sample(), &evaluator, None).unwrap(),
        json!("db-1")
    );
}

#[test]
fn missing_reference_is_an_error() {
    let evaluator = ExprEvaluator::new();
    let value = DynamicValue::new(json!("field:nope"));
    let error = value.resolve(&sample(), &evaluator, None).unwrap_err();
    assert!(matches!(
        error,
        DynamicError::MissingReference { space: "field", .. }
    ));
}

#[test]
fn expressions_compute_over_the_record() {
    let evaluator = ExprEvaluator::new();
    let value = DynamicValue::new(json!("expr:fields.cores * 2"));
    assert_eq!(
        value.resolve(&sample(), &evaluator, None).unwrap(),
        json!(16)
    );

    let name = DynamicValue::new(json!("expr:measurement + \"_total\""));
    assert_eq!(
        name.resolve(&sample(), &evaluator, None).unwrap(),
        json!("cpu_total")
    );
}

#[test]
fn broken_expressions_are_rejected() {
    let evaluator = ExprEvaluator::new();
    let value = DynamicValue::new(json!("expr:fields.cores +"));
    assert!(matches!(
        value.resolve(&sample(), &evaluator, None),
        Err(DynamicError::Expression(_))
    ));
    assert!(evaluator.validate("1 + ").is_err());
    assert!(evaluator.validate("fields.cores * 2").is_ok());
}

#[test]
fn statements_are_rejected_by_the_expression_sandbox() {
    let evaluator = ExprEvaluator::new();
    // Expression-only mode: no statements, no loops.
    let value = DynamicValue::new(json!("expr:loop { }"));
    assert!(value.resolve(&sample(), &evaluator, None).is_err());
    assert!(evaluator.validate("let x = 1; x").is_err());
}

#[test]
fn coercion_converts_between_scalar_types() {
    let evaluator = ExprEvaluator::new();
    let record = sample();

    let as_int = DynamicValue::new(json!("7"));
    assert_eq!(
        as_int.resolve(&record, &evaluator, Some(Coerce::Int)).unwrap(),
        json!(7)
    );

    let as_str = DynamicValue::new(json!("field:cores"));
    assert_eq!(
        as_str.resolve(&record, &evaluator, Some(Coerce::Str)).unwrap(),
        json!("8")
    );

    let as_bool = DynamicValue::new(json!("true"));
    assert_eq!(
        as_bool.resolve(&record, &evaluator, Some(Coerce::Bool)).unwrap(),
        json!(true)
    );

    let bad = DynamicValue::new(json!("not a number"));
    assert!(matches!(
        bad.resolve(&record, &evaluator, Some(Coerce::Float)),
        Err(DynamicError::Coercion { .. })
    ));
}

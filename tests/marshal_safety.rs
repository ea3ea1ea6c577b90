//! Parameter marshalling safety.
//!
//! Every string literal produced by the marshaller must evaluate back to
//! exactly the input, whatever quotes, backslashes or line breaks it holds.

mod common;

use std::collections::HashMap;

use common::eval_string_expr;
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use rstest::rstest;
use script_relay::config::LimitsConfig;
use script_relay::script::{marshal_params, marshal_value, quote_string, ParamHint};
use script_relay::ErrorKind;
use serde_json::{json, Value};

fn tricky_string() -> impl Strategy<Value = String> {
    prop::collection::vec(
        prop_oneof![
            Just("\"".to_string()),
            Just("\\".to_string()),
            Just("\\\"".to_string()),
            Just("\" & do shell script \"rm -rf ~\" & \"".to_string()),
            Just("\n".to_string()),
            Just("\r\n".to_string()),
            Just("\t".to_string()),
            Just("\u{1D}\u{1E}\u{1F}".to_string()),
            "[a-zA-Z0-9 ]{0,8}",
            any::<char>().prop_map(|c| c.to_string()),
        ],
        0..16,
    )
    .prop_map(|parts| parts.concat())
}

proptest! {
    #[test]
    fn test_quoted_strings_evaluate_back_exactly(s in tricky_string()) {
        let literal = quote_string(&s);
        prop_assert_eq!(eval_string_expr(&literal), Some(s));
    }

    #[test]
    fn test_marshalled_string_params_evaluate_back(s in tricky_string()) {
        let literal = marshal_value("note", &Value::String(s.clone()), ParamHint::Value, &LimitsConfig {
            max_string_bytes: usize::MAX,
            ..LimitsConfig::default()
        }).unwrap();
        prop_assert_eq!(eval_string_expr(&literal), Some(s));
    }

    #[test]
    fn test_objects_are_passed_as_json_text(key in "[a-z]{1,6}", s in tricky_string()) {
        let mut map = serde_json::Map::new();
        map.insert(key, Value::String(s));
        let value = Value::Object(map);
        let literal = marshal_value("payload", &value, ParamHint::Value, &LimitsConfig {
            max_string_bytes: usize::MAX,
            ..LimitsConfig::default()
        }).unwrap();
        let text = eval_string_expr(&literal).unwrap();
        let back: Value = serde_json::from_str(&text).unwrap();
        prop_assert_eq!(back, value);
    }
}

#[rstest]
#[case(json!(null), "missing value")]
#[case(json!(true), "true")]
#[case(json!(false), "false")]
#[case(json!(42), "42")]
#[case(json!(-1.5), "-1.5")]
#[case(json!(["a", 1, true]), r#"{"a", 1, true}"#)]
#[case(json!([]), "{}")]
fn test_non_string_literals(#[case] value: Value, #[case] expected: &str) {
    let literal = marshal_value("p", &value, ParamHint::Value, &LimitsConfig::default()).unwrap();
    assert_eq!(literal, expected);
}

#[rstest]
#[case(json!([[1]]))]
#[case(json!([{"a": 1}]))]
#[case(json!([null]))]
fn test_nested_arrays_are_rejected(#[case] value: Value) {
    let err = marshal_value("tags", &value, ParamHint::Value, &LimitsConfig::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Parameter);
    assert!(err.to_string().contains("tags"));
}

#[test]
fn test_limits_are_enforced_by_hint() {
    let limits = LimitsConfig {
        max_string_bytes: 4,
        max_array_len: 2,
        max_code_bytes: 8,
    };
    let long = Value::String("abcdef".to_string());

    let err = marshal_value("title", &long, ParamHint::Value, &limits).unwrap_err();
    assert!(err.to_string().contains("max_string_bytes"));
    assert!(marshal_value("source", &long, ParamHint::Code, &limits).is_ok());

    let err = marshal_value("tags", &json!(["a", "b", "c"]), ParamHint::Value, &limits).unwrap_err();
    assert!(err.to_string().contains("max_array_len"));
}

#[test]
fn test_params_are_sorted_with_unique_names() {
    let input = json!({"b-c": "x", "b_c": "y", "a": 1});
    let params = marshal_params(&input, &HashMap::new(), &LimitsConfig::default()).unwrap();
    let names: Vec<_> = params.iter().map(|p| p.var_name.as_str()).collect();
    let sources: Vec<_> = params.iter().map(|p| p.source.as_str()).collect();
    assert_eq!(sources, vec!["a", "b-c", "b_c"]);
    assert_eq!(names, vec!["p_a", "p_b_c", "p_b_c_2"]);
}

#[test]
fn test_non_object_input_is_rejected() {
    let err = marshal_params(&json!([1, 2]), &HashMap::new(), &LimitsConfig::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Parameter);
    assert!(marshal_params(&Value::Null, &HashMap::new(), &LimitsConfig::default())
        .unwrap()
        .is_empty());
}

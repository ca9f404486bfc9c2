use actionlog_core::model::{ActionDraft, ValidationError};
use serde_json::json;

fn draft(value: serde_json::Value) -> ActionDraft {
    ActionDraft(value)
}

#[test]
fn accepts_complete_action() {
    let rec = draft(json!({
        "taskId": "t1",
        "userId": "u1",
        "timestamp": 1_700_000_000_000_i64,
        "type": "run",
        "codeState": "print('hi')",
    }))
    .validate()
    .unwrap();

    assert_eq!(rec.task_id, "t1");
    assert_eq!(rec.kind, "run");
    assert_eq!(rec.log_id, 0, "log id is assigned at write time");
    assert_eq!(rec.code_state, Some(json!("print('hi')")));
}

#[test]
fn ignores_producer_supplied_log_id() {
    let rec = draft(json!({
        "taskId": "t1", "userId": "u1", "timestamp": 5, "type": "edit", "logId": 999,
    }))
    .validate()
    .unwrap();
    assert_eq!(rec.log_id, 0);
}

#[test]
fn null_code_state_is_absent() {
    let rec = draft(json!({
        "taskId": "t1", "userId": "u1", "timestamp": 5, "type": "edit", "codeState": null,
    }))
    .validate()
    .unwrap();
    assert_eq!(rec.code_state, None);
}

#[test]
fn rejects_non_objects() {
    assert_eq!(
        draft(json!("edit")).validate(),
        Err(ValidationError::NotAnObject)
    );
}

#[test]
fn names_the_missing_field() {
    let cases = vec![
        (json!({"userId": "u", "timestamp": 1, "type": "edit"}), "taskId"),
        (json!({"taskId": "t", "timestamp": 1, "type": "edit"}), "userId"),
        (json!({"taskId": "t", "userId": "u", "type": "edit"}), "timestamp"),
        (json!({"taskId": "t", "userId": "u", "timestamp": 1}), "type"),
    ];

    for (value, field) in cases {
        let err = draft(value).validate().unwrap_err();
        assert_eq!(err, ValidationError::Missing(field), "field {field}");
        assert!(err.to_string().contains(field));
    }
}

#[test]
fn rejects_wrong_types() {
    let err = draft(json!({"taskId": 7, "userId": "u", "timestamp": 1, "type": "edit"}))
        .validate()
        .unwrap_err();
    assert!(matches!(err, ValidationError::WrongType { field: "taskId", .. }));

    let err = draft(json!({"taskId": "t", "userId": "u", "timestamp": "yesterday", "type": "edit"}))
        .validate()
        .unwrap_err();
    assert!(matches!(err, ValidationError::WrongType { field: "timestamp", .. }));

    let err = draft(json!({"taskId": "t", "userId": "u", "timestamp": -1, "type": "edit"}))
        .validate()
        .unwrap_err();
    assert!(matches!(err, ValidationError::WrongType { field: "timestamp", .. }));
}

#[test]
fn rejects_blank_strings() {
    let err = draft(json!({"taskId": "  ", "userId": "u", "timestamp": 1, "type": "edit"}))
        .validate()
        .unwrap_err();
    assert_eq!(err, ValidationError::Empty("taskId"));
}

#[test]
fn exposes_task_id_and_kind_before_validation() {
    let d = draft(json!({"taskId": "t9", "type": "submit"}));
    assert_eq!(d.task_id(), Some("t9"));
    assert_eq!(d.kind(), Some("submit"));
    assert_eq!(draft(json!([])).task_id(), None);
}

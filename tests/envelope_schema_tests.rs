use ingest_pipeline::envelope::{EventType, IngestEvent};
use ingest_pipeline::error::IngestError;
use ingest_pipeline::schema::SchemaRegistry;
use serde_json::{json, Value};
use std::path::Path;

fn registry() -> SchemaRegistry {
    SchemaRegistry::from_documents(vec![
        ("envelope.v1.schema.json".to_string(), parse(include_str!("../schemas/envelope.v1.schema.json"))),
        ("ingest-file.v1.schema.json".to_string(), parse(include_str!("../schemas/ingest-file.v1.schema.json"))),
        ("ingest-http.v1.schema.json".to_string(), parse(include_str!("../schemas/ingest-http.v1.schema.json"))),
        ("ingest-stream.v1.schema.json".to_string(), parse(include_str!("../schemas/ingest-stream.v1.schema.json"))),
    ])
    .unwrap()
}

fn parse(text: &str) -> Value {
    serde_json::from_str(text).unwrap()
}

#[test]
fn example_events_are_valid() {
    let registry = registry();
    for (event_type, text) in [
        (EventType::File, include_str!("resources/ingest_file_event.json")),
        (EventType::Http, include_str!("resources/ingest_http_event.json")),
        (EventType::Stream, include_str!("resources/ingest_stream_event.json")),
    ] {
        let violations = registry.validate_value(event_type, &parse(text)).unwrap();
        assert!(violations.is_empty(), "{}: {:?}", event_type, violations);
    }
}

#[test]
fn examples_deserialize_into_typed_events() {
    let registry = registry();
    let event: IngestEvent = serde_json::from_str(include_str!("resources/ingest_stream_event.json")).unwrap();
    assert_eq!(event.event_type, EventType::Stream);
    registry.validate(&event).unwrap();
}

#[test]
fn schema_directory_loads_from_disk() {
    let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("schemas");
    let registry = SchemaRegistry::load_dir(&dir).unwrap();
    assert_eq!(registry.event_types().count(), 3);
}

#[test]
fn every_violation_is_reported_with_its_path() {
    let registry = registry();
    let mut invalid = parse(include_str!("resources/ingest_http_event.json"));
    invalid.as_object_mut().unwrap().remove("source");
    invalid["payload"]["http_status"] = json!("200");

    let violations = registry.validate_value(EventType::Http, &invalid).unwrap();
    assert_eq!(violations.len(), 2, "{:?}", violations);
    assert_eq!(violations[0].field(), "<root>");
    assert!(violations[0].message.contains("source"));
    assert_eq!(violations[1].field(), "payload.http_status");
}

#[test]
fn null_optional_fields_are_rejected() {
    let registry = registry();
    let mut with_null = parse(include_str!("resources/ingest_http_event.json"));
    with_null["payload"]["cursor"] = Value::Null;
    let violations = registry.validate_value(EventType::Http, &with_null).unwrap();
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].field(), "payload.cursor");
}

#[test]
fn origin_schema_pins_event_type_and_payload_shape() {
    let registry = registry();
    let file_event = parse(include_str!("resources/ingest_file_event.json"));
    let violations = registry.validate_value(EventType::Http, &file_event).unwrap();
    assert!(violations.iter().any(|v| v.field() == "event_type"));

    let mut extra = file_event.clone();
    extra["payload"]["unexpected"] = json!(true);
    assert!(!registry.validate_value(EventType::File, &extra).unwrap().is_empty());
}

#[test]
fn unknown_envelope_fields_are_rejected() {
    let registry = registry();
    let mut extra = parse(include_str!("resources/ingest_stream_event.json"));
    extra["payload_ref"] = json!("sha256://deadbeef");
    let violations = registry.validate_value(EventType::Stream, &extra).unwrap();
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].field(), "<root>");
}

#[test]
fn missing_origin_schema_is_a_configuration_error() {
    let result = SchemaRegistry::from_documents(vec![(
        "envelope.v1.schema.json".to_string(),
        parse(include_str!("../schemas/envelope.v1.schema.json")),
    )]);
    assert!(matches!(result, Err(IngestError::SchemaConfig(_))));
}

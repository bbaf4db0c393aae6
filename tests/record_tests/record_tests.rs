//! Record Encoding Tests
//!
//! Tests verify:
//! - Generic and schema-based body encodings
//! - Positional layout skips relationship columns
//! - Value coercion per declared scalar type
//! - Record page packing limits and layout tagging

use foliodb::page::Page;
use foliodb::record::{
    FieldValue, PageLayout, RecordLayout, RecordPage, SchemaBasedRecord, StoredRecord,
    PAGE_RECORD_CAPACITY,
};
use foliodb::schema::{parse_schema, ColumnDefinition};
use foliodb::FolioError;
use serde_json::json;

fn user_columns() -> Vec<ColumnDefinition> {
    parse_schema("name: String!\nage: Int\nscore: Float\nactive: Boolean\nfriends: [User]\ntags: [String]")
        .unwrap()
}

// =============================================================================
// Layout Encoding Tests
// =============================================================================

#[test]
fn test_generic_layout_keeps_value_text() {
    let layout = RecordLayout::Generic;
    let body = layout.encode("k", "plain text").unwrap();

    assert_eq!(layout.decode("k", &body).unwrap(), "plain text");
    assert_eq!(layout.decode_json("k", &body).unwrap(), json!("plain text"));
}

#[test]
fn test_generic_layout_parses_json_values() {
    let layout = RecordLayout::Generic;
    let body = layout.encode("k", r#"{"age": 4}"#).unwrap();
    assert_eq!(layout.decode_json("k", &body).unwrap(), json!({"age": 4}));
}

#[test]
fn test_schema_layout_round_trip() {
    let layout = RecordLayout::for_columns(&user_columns());
    assert_eq!(layout.page_layout(), PageLayout::SchemaBased);

    let body = layout
        .encode(
            "u1",
            r#"{"name": "ada", "age": 36, "score": 9.5, "active": true, "tags": ["x", "y"]}"#,
        )
        .unwrap();

    let value = layout.decode_json("u1", &body).unwrap();
    assert_eq!(
        value,
        json!({"name": "ada", "age": 36, "score": 9.5, "active": true, "tags": ["x", "y"]})
    );
}

#[test]
fn test_schema_layout_drops_undeclared_and_relationship_fields() {
    let layout = RecordLayout::for_columns(&user_columns());
    let body = layout
        .encode("u1", r#"{"name": "bob", "friends": ["u2"], "extra": 1}"#)
        .unwrap();

    assert_eq!(layout.decode_json("u1", &body).unwrap(), json!({"name": "bob"}));
}

#[test]
fn test_schema_layout_is_positional() {
    let columns = user_columns();
    let layout = RecordLayout::for_columns(&columns);
    let body = layout.encode("u1", r#"{"age": 7, "name": "c"}"#).unwrap();

    let values: Vec<FieldValue> = bincode::deserialize(&body).unwrap();
    // One slot per stored column, relationship column excluded
    assert_eq!(
        values,
        vec![
            FieldValue::Text("c".into()),
            FieldValue::Int(7),
            FieldValue::Null,
            FieldValue::Null,
            FieldValue::Null,
        ]
    );
}

#[test]
fn test_schema_layout_rejects_non_objects() {
    let layout = RecordLayout::for_columns(&user_columns());
    assert!(matches!(
        layout.encode("u1", "[1, 2]"),
        Err(FolioError::InvalidValue(_))
    ));
    assert!(matches!(
        layout.encode("u1", "not json"),
        Err(FolioError::InvalidValue(_))
    ));
}

#[test]
fn test_schema_layout_rejects_mistyped_values() {
    let layout = RecordLayout::for_columns(&user_columns());
    assert!(layout.encode("u1", r#"{"age": "old"}"#).is_err());
    assert!(layout.encode("u1", r#"{"age": 1.5}"#).is_err());
    assert!(layout.encode("u1", r#"{"active": "yes"}"#).is_err());
    assert!(layout.encode("u1", r#"{"tags": "x"}"#).is_err());
}

#[test]
fn test_int_column_rejects_out_of_range_numbers() {
    let layout = RecordLayout::for_columns(&user_columns());
    assert!(matches!(
        layout.encode("u1", r#"{"age": 1e20}"#),
        Err(FolioError::InvalidValue(_))
    ));
    assert!(layout.encode("u1", r#"{"age": -1e19}"#).is_err());

    let body = layout.encode("u1", r#"{"age": 4e3}"#).unwrap();
    assert_eq!(layout.decode_json("u1", &body).unwrap()["age"], json!(4000));
}

#[test]
fn test_value_coercion() {
    let layout = RecordLayout::for_columns(&user_columns());
    let body = layout
        .encode("u1", r#"{"age": "42", "score": 3, "active": "false", "name": "n"}"#)
        .unwrap();

    assert_eq!(
        layout.decode_json("u1", &body).unwrap(),
        json!({"name": "n", "age": 42, "score": 3.0, "active": false})
    );
}

#[test]
fn test_schema_record_value_count_mismatch_is_corruption() {
    let record = SchemaBasedRecord {
        key: "k".into(),
        values: vec![FieldValue::Int(1)],
    };
    assert!(matches!(
        record.to_json(&user_columns()),
        Err(FolioError::Corruption(_))
    ));
}

// =============================================================================
// Record Page Tests
// =============================================================================

#[test]
fn test_record_page_round_trip() {
    let mut records = RecordPage::new(PageLayout::Generic);
    assert!(records.try_add(StoredRecord::new("a", b"1".to_vec())));
    assert!(records.try_add(StoredRecord::new("b", b"2".to_vec())));

    let mut page = Page::new(1);
    records.write_to(&mut page).unwrap();

    let decoded = RecordPage::from_bytes(page.data(), PageLayout::Generic).unwrap();
    assert_eq!(decoded.len(), 2);
    assert_eq!(decoded.get("b").unwrap().body, b"2");
}

#[test]
fn test_zeroed_page_decodes_empty() {
    let page = Page::new(5);
    let decoded = RecordPage::from_bytes(page.data(), PageLayout::SchemaBased).unwrap();
    assert!(decoded.is_empty());
    assert_eq!(decoded.layout(), PageLayout::SchemaBased);
}

#[test]
fn test_layout_mismatch_is_corruption() {
    let mut records = RecordPage::new(PageLayout::Generic);
    records.try_add(StoredRecord::new("a", b"1".to_vec()));
    let mut page = Page::new(1);
    records.write_to(&mut page).unwrap();

    assert!(matches!(
        RecordPage::from_bytes(page.data(), PageLayout::SchemaBased),
        Err(FolioError::Corruption(_))
    ));
}

#[test]
fn test_page_capacity_is_three_quarters() {
    let mut records = RecordPage::new(PageLayout::Generic);
    let body = vec![0u8; 1000];
    let mut added = 0;
    while records.try_add(StoredRecord::new(format!("k{:04}", added), body.clone())) {
        added += 1;
    }

    assert!(records.used_bytes() <= PAGE_RECORD_CAPACITY);
    assert!(records.used_bytes() + 1021 > PAGE_RECORD_CAPACITY);
    assert_eq!(added, 48);

    // A full page still serializes into one page
    let mut page = Page::new(1);
    records.write_to(&mut page).unwrap();
}

#[test]
fn test_try_replace() {
    let mut records = RecordPage::new(PageLayout::Generic);
    records.try_add(StoredRecord::new("a", vec![1; 10]));

    assert!(records.try_replace(StoredRecord::new("a", vec![2; 20])));
    assert_eq!(records.get("a").unwrap().body, vec![2; 20]);
    assert_eq!(records.len(), 1);

    assert!(!records.try_replace(StoredRecord::new("missing", vec![])));
    assert!(!records.try_replace(StoredRecord::new("a", vec![0; PAGE_RECORD_CAPACITY])));
    assert_eq!(records.get("a").unwrap().body, vec![2; 20]);
}

#[test]
fn test_remove() {
    let mut records = RecordPage::new(PageLayout::Generic);
    records.try_add(StoredRecord::new("a", vec![1]));
    records.try_add(StoredRecord::new("b", vec![2]));

    assert_eq!(records.remove("a").unwrap().body, vec![1]);
    assert!(records.remove("a").is_none());
    assert_eq!(records.records().len(), 1);
}

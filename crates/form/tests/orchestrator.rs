use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};

use crudkit_api::{ApiError, EventBus, MockApi, ModelEventKind, SchemaCache};
use crudkit_core::{Accessible, FieldChange, FieldDescriptor, FieldSet, FieldType};
use crudkit_form::{FormError, FormMode, FormOrchestrator, FormState};
use crudkit_widgets::DispatchTable;

fn schema() -> Value {
    json!({
        "fields": [
            { "name": "title", "type": "Input", "options": { "required": true, "length": 40 } },
            { "name": "kind", "type": "EnumFilter", "value": "link", "options": {
                "enumData": { "link": "Link", "text": "Text" },
                "filterFields": { "link": ["url"], "text": ["body"] }
            } },
            { "name": "url", "type": "Input" },
            { "name": "body", "type": "TextArea" },
            { "name": "author", "type": "Association", "options": {
                "foreignOpts": [{ "modelName": "user", "association": { "name": "nickname" } }]
            } },
            { "name": "slug", "type": "Input", "options": { "accessible": "readonly" } },
            { "name": "secret", "type": "Input", "options": { "accessible": "hidden" } }
        ]
    })
}

fn api() -> Arc<MockApi> {
    let mut api = MockApi::new()
        .with_records("user", vec![json!({"id": 1, "nickname": "ada"}), json!({"id": 2, "nickname": "bob"})])
        .with_records("post", vec![json!({"id": 7, "title": "Old", "kind": "text", "body": "hello", "author": {"id": 2, "nickname": "bob"}, "slug": "old"})]);
    api.insert_schema_doc("post", &schema()).unwrap();
    Arc::new(api)
}

fn fields(api: &MockApi) -> FieldSet { api.schemas["post"].fields.clone() }

async fn insert_form(api: &Arc<MockApi>, bus: &EventBus) -> FormOrchestrator {
    let mut form = FormOrchestrator::new("post", fields(api), api.clone(), FormMode::Insert).with_bus(bus.clone());
    form.init().await.unwrap();
    form
}

#[tokio::test]
async fn insert_submit_closes_and_publishes() {
    let api = api();
    let bus = EventBus::new();
    let mut sub = bus.subscribe();
    let closes = Arc::new(AtomicUsize::new(0));
    let seen = closes.clone();
    let mut form = FormOrchestrator::new("post", fields(&api), api.clone(), FormMode::Insert)
        .with_bus(bus.clone())
        .on_close(move |entity| {
            assert_eq!(entity["title"], json!("Hello"));
            seen.fetch_add(1, Ordering::SeqCst);
        });
    form.init().await.unwrap();
    assert_eq!(form.state(), FormState::Done);

    form.on_field_change(&[FieldChange::value("title", json!("Hello"))]).await.unwrap();
    let entity = form.on_submit().await.unwrap();

    assert_eq!(entity["id"], json!(8));
    assert_eq!(form.state(), FormState::Done);
    assert!(!form.has_errors());
    assert!(form.is_closed());
    assert_eq!(closes.load(Ordering::SeqCst), 1);
    let ev = sub.try_recv().unwrap();
    assert_eq!(ev.kind, ModelEventKind::Insert);
    assert_eq!(ev.model_name, "post");

    let stored = api.records("post");
    let created = stored.last().unwrap();
    assert!(created.get("secret").is_none(), "hidden field submitted");
    assert!(created.get("body").is_none(), "field hidden by kind submitted");
    assert!(matches!(form.on_submit().await, Err(FormError::Closed)));
}

fn defaulted_fields() -> FieldSet {
    let mut kind = FieldDescriptor::new("kind", FieldType::EnumFilter);
    kind.options.enum_data = Some(json!({ "link": "Link", "text": "Text" }));
    kind.options.default_value = Some(json!("link"));
    kind.options.filter_fields.insert("link".into(), vec!["url".into()]);
    kind.options.filter_fields.insert("text".into(), vec!["body".into()]);
    let mut views = FieldDescriptor::new("views", FieldType::InputNumber);
    views.options.default_value = Some(json!(3));
    FieldSet::from_fields(vec![
        FieldDescriptor::new("title", FieldType::Input),
        kind,
        FieldDescriptor::new("url", FieldType::Input),
        FieldDescriptor::new("body", FieldType::TextArea),
        views,
    ])
    .unwrap()
}

#[tokio::test]
async fn defaults_drive_visibility_and_stay_cleared() {
    let api = Arc::new(MockApi::new());
    let mut form = FormOrchestrator::new("post", defaulted_fields(), api, FormMode::Insert).with_bus(EventBus::new());
    form.init().await.unwrap();
    assert_eq!(form.fields().value_of("kind"), &json!("link"));
    assert!(!form.fields().get("url").unwrap().is_hidden());
    assert!(form.fields().get("body").unwrap().is_hidden());
    assert!(form.values().contains_key("url"));
    assert_eq!(form.fields().value_of("views"), &json!(3));

    form.on_field_change(&[FieldChange::value("views", json!(""))]).await.unwrap();
    assert_eq!(form.fields().value_of("views"), &Value::Null);
    form.on_field_change(&[FieldChange::value("title", json!("x"))]).await.unwrap();
    assert_eq!(form.fields().value_of("views"), &Value::Null);
    assert_eq!(form.values()["views"], Value::Null);
}

#[tokio::test]
async fn server_validation_errors_keep_form_open() {
    let api = api();
    let bus = EventBus::new();
    let mut sub = bus.subscribe();
    let mut form = insert_form(&api, &bus).await;
    form.on_field_change(&[FieldChange::value("title", json!("Dup"))]).await.unwrap();

    api.fail_next_upsert(ApiError::from_response(400, &json!({
        "message": [
            { "property": "title", "constraints": { "unique": "title already exists" } },
            { "property": "url", "children": [{ "property": "host", "constraints": { "isUrl": "bad host" } }] }
        ]
    })));
    match form.on_submit().await {
        Err(FormError::Rejected { status, fields }) => {
            assert_eq!(status, 400);
            assert_eq!(fields, vec!["title", "url"]);
        }
        other => panic!("expected rejection, got {:?}", other.map(|_| ())),
    }
    assert!(form.has_errors());
    assert!(!form.is_closed());
    assert_eq!(form.fields().get("title").unwrap().errors.as_slice(), ["title already exists".to_string()]);
    assert_eq!(form.fields().get("url").unwrap().errors.as_slice(), ["bad host".to_string()]);
    assert!(sub.try_recv().is_none());

    // fixing the value clears the error and the retry succeeds
    form.on_field_change(&[FieldChange::value("title", json!("Unique"))]).await.unwrap();
    assert!(form.fields().get("title").unwrap().errors.is_empty());
    assert!(form.on_submit().await.is_ok());
}

#[tokio::test]
async fn client_validation_blocks_upsert() {
    let api = api();
    let mut form = insert_form(&api, &EventBus::new()).await;
    form.on_field_change(&[FieldChange::value("url", json!("x"))]).await.unwrap();
    match form.on_submit().await {
        Err(FormError::Invalid { fields }) => assert_eq!(fields, vec!["title"]),
        other => panic!("expected invalid, got {:?}", other.map(|_| ())),
    }
    assert!(form.has_errors());
    assert_eq!(form.fields().get("title").unwrap().errors.len(), 1);
    assert_eq!(api.call_count("upsert", "post"), 0);
}

#[tokio::test]
async fn transport_failure_leaves_fields_untouched() {
    let api = api();
    let mut form = insert_form(&api, &EventBus::new()).await;
    form.on_field_change(&[FieldChange::value("title", json!("T"))]).await.unwrap();
    let before = form.fields().clone();
    api.fail_next_upsert(ApiError::transport("connection reset"));
    assert!(matches!(form.on_submit().await, Err(FormError::Api(e)) if e.status == 0));
    assert_eq!(form.fields(), &before);
    assert!(!form.has_errors());
    assert!(!form.is_closed());
}

#[tokio::test]
async fn relation_and_enum_filter_changes_run_one_async_pass() {
    let api = api();
    let mut form = insert_form(&api, &EventBus::new()).await;
    let base = api.call_count("load", "user");

    assert!(!form.on_field_change(&[FieldChange::value("title", json!("a"))]).await.unwrap());
    assert!(!form.on_field_change(&[FieldChange::value("title", json!("ab"))]).await.unwrap());
    assert_eq!(api.call_count("load", "user"), base);

    assert!(form.on_field_change(&[FieldChange::value("kind", json!("text"))]).await.unwrap());
    assert_eq!(api.call_count("load", "user"), base + 1);
    assert!(form.fields().get("url").unwrap().is_hidden());
    assert!(!form.fields().get("body").unwrap().is_hidden());

    assert!(form.on_field_change(&[FieldChange::value("author", json!(1))]).await.unwrap());
    assert_eq!(api.call_count("load", "user"), base + 2);
    assert_eq!(form.state(), FormState::Done);
}

#[tokio::test]
async fn readonly_hidden_and_unknown_edits_are_dropped() {
    let api = api();
    let mut form = insert_form(&api, &EventBus::new()).await;
    let before = form.fields().clone();
    let ran = form
        .on_field_change(&[
            FieldChange::value("slug", json!("hack")),
            FieldChange::value("secret", json!("x")),
            FieldChange::value("body", json!("hidden by kind")),
            FieldChange::value("nope", json!(1)),
        ])
        .await
        .unwrap();
    assert!(!ran);
    assert_eq!(form.fields(), &before);
    assert_eq!(form.fields().get("slug").unwrap().options.accessible, Accessible::Readonly);
}

#[tokio::test]
async fn stale_decoration_results_are_discarded() {
    let api = api();
    let mut form = insert_form(&api, &EventBus::new()).await;

    let first = form.apply_changes(&[FieldChange::value("author", json!(1))]).unwrap().unwrap();
    let second = form.apply_changes(&[FieldChange::value("author", json!(2))]).unwrap().unwrap();
    assert!(second.token > first.token);
    assert_eq!(form.state(), FormState::Updating);

    let pipeline = form.pipeline();
    let newer = pipeline.run_async(second.fields.clone()).await;
    let mut older = pipeline.run_async(first.fields.clone()).await;
    older = older.update("author", |f| f.select_items.clear()).unwrap();

    assert!(form.complete_decoration(&second, newer));
    assert!(!form.complete_decoration(&first, older));
    assert_eq!(form.state(), FormState::Done);
    assert_eq!(form.fields().value_of("author"), &json!(2));
    assert_eq!(form.fields().get("author").unwrap().select_items.len(), 2);
}

#[tokio::test]
async fn edit_mode_loads_record_and_publishes_update() {
    let api = api();
    let bus = EventBus::new();
    let mut sub = bus.subscribe();
    let cache = SchemaCache::new(api.clone());
    let mut form = FormOrchestrator::open(&cache, api.clone(), "post", FormMode::Edit { id: json!(7) }).await.unwrap().with_bus(bus);

    assert_eq!(form.state(), FormState::Done);
    assert_eq!(form.fields().value_of("title"), &json!("Old"));
    assert_eq!(form.fields().value_of("author"), &json!(2));
    assert!(form.fields().get("url").unwrap().is_hidden());
    assert_eq!(api.call_count("fetch", "post"), 1);

    form.on_field_change(&[FieldChange::value("title", json!("New"))]).await.unwrap();
    let entity = form.on_submit().await.unwrap();
    assert_eq!(entity["title"], json!("New"));
    assert_eq!(entity["slug"], json!("old"));
    assert!(!form.is_closed());
    assert_eq!(sub.try_recv().unwrap().kind, ModelEventKind::Update);
    assert_eq!(api.records("post").len(), 1);
}

#[tokio::test]
async fn missing_record_fails_init() {
    let api = api();
    let mut form = FormOrchestrator::new("post", fields(&api), api.clone(), FormMode::Edit { id: json!(99) });
    assert!(matches!(form.init().await, Err(FormError::Api(e)) if e.status == 404));
}

#[tokio::test]
async fn widgets_and_search_through_the_form() {
    let api = api();
    let form = insert_form(&api, &EventBus::new()).await;
    let widgets = form.widgets(&DispatchTable::default());
    let names: Vec<_> = widgets.iter().map(|w| w.frame.name.as_str()).collect();
    assert_eq!(names, vec!["title", "kind", "url", "author", "slug"]);
    assert!(!widgets[4].frame.editable);

    let hits = form.search_options("author", "bo").await.unwrap();
    assert_eq!(hits.iter().map(|i| i.label.as_str()).collect::<Vec<_>>(), vec!["bob"]);
    assert!(form.search_options("nope", "x").await.is_err());
}

use std::sync::Arc;

use serde_json::json;

use crudkit_api::{ModelService, MockApi};
use crudkit_core::{EngineConfig, FieldSet, SelectItem};
use crudkit_decorate::{search_options, Pipeline};

fn post_fields() -> FieldSet {
    crudkit_schema::parse_fields(&json!([
        { "name": "title", "type": "Input", "options": { "required": true } },
        { "name": "kind", "type": "EnumFilter", "value": "link", "options": {
            "enumData": { "link": "Link", "text": "Text" },
            "filterFields": { "link": ["url"], "text": ["body"] }
        } },
        { "name": "url", "type": "Input" },
        { "name": "body", "type": "RichText" },
        { "name": "author", "type": "Association", "value": 42, "options": {
            "foreignOpts": [{ "modelName": "user", "association": { "name": "nickname", "value": "id" } }]
        } },
        { "name": "tags", "type": "ManyToMany", "options": {
            "foreignOpts": [{ "modelName": "tag" }]
        } }
    ]))
    .unwrap()
}

fn api() -> Arc<MockApi> {
    let users = (1..=3).map(|i| json!({"id": i, "nickname": format!("user{}", i)})).chain([json!({"id": 42, "nickname": "deep"})]).collect();
    Arc::new(
        MockApi::new()
            .with_records("user", users)
            .with_records("tag", vec![json!({"id": 1, "name": "rust"}), json!({"id": 2, "name": "web"})]),
    )
}

#[tokio::test]
async fn full_pass_decorates_every_stage() {
    let api = api();
    let config = EngineConfig { options_page_size: 3, ..EngineConfig::default() };
    let pipeline = Pipeline::standard(api.clone(), config);
    let out = pipeline.run(&post_fields()).await;

    assert!(out.get("body").unwrap().is_hidden());
    assert!(!out.get("url").unwrap().is_hidden());
    assert_eq!(out.get("kind").unwrap().select_items.len(), 2);
    assert_eq!(out.value_of("tags"), &json!([]));

    let author = out.get("author").unwrap();
    let labels: Vec<_> = author.select_items.iter().map(|i| i.label.as_str()).collect();
    assert_eq!(labels, vec!["user1", "user2", "user3", "deep"]);
    let binding = author.options.binding.as_ref().unwrap();
    assert_eq!(binding.label_field, "nickname");
    assert_eq!(binding.debounce_ms, 500);
    // page load plus the `$in` lookup for the selected id outside the page
    assert_eq!(api.call_count("load", "user"), 2);
    assert_eq!(out.get("tags").unwrap().select_items.len(), 2);
}

#[tokio::test]
async fn failed_association_load_degrades_to_empty_options() {
    let api = api();
    api.fail_loads_for("tag");
    let pipeline = Pipeline::standard(api.clone(), EngineConfig::default());
    let out = pipeline.run(&post_fields()).await;
    assert!(out.get("tags").unwrap().select_items.is_empty());
    assert!(!out.get("author").unwrap().select_items.is_empty());
}

#[tokio::test]
async fn failed_selected_lookup_keeps_the_loaded_page() {
    let api = api();
    api.fail_filtered_loads_for("user");
    let config = EngineConfig { options_page_size: 3, ..EngineConfig::default() };
    let out = Pipeline::standard(api.clone(), config).run(&post_fields()).await;
    let labels: Vec<_> = out.get("author").unwrap().select_items.iter().map(|i| i.label.as_str()).collect();
    assert_eq!(labels, vec!["user1", "user2", "user3"]);
    assert_eq!(api.call_count("load", "user"), 2);
}

#[tokio::test]
async fn fresh_options_replace_stale_ones() {
    let api = api();
    let fields = post_fields()
        .update("author", |f| {
            f.value = json!(1);
            f.select_items = vec![SelectItem::new(json!(1), "renamed"), SelectItem::new(json!(99), "gone")];
        })
        .unwrap();
    let config = EngineConfig { options_page_size: 3, ..EngineConfig::default() };
    let out = Pipeline::standard(api.clone(), config).run(&fields).await;
    let labels: Vec<_> = out.get("author").unwrap().select_items.iter().map(|i| i.label.as_str()).collect();
    assert_eq!(labels, vec!["user1", "user2", "user3"]);
    assert_eq!(api.call_count("load", "user"), 1);
}

#[tokio::test]
async fn sync_phase_never_touches_the_network() {
    let api = api();
    let pipeline = Pipeline::standard(api.clone(), EngineConfig::default());
    let _ = pipeline.run_sync(&post_fields());
    assert!(api.calls().is_empty());
}

#[tokio::test]
async fn remote_and_local_search() {
    let api = api();
    let config = EngineConfig::default();
    let out = Pipeline::standard(api.clone(), config.clone()).run(&post_fields()).await;

    let author = out.get("author").unwrap();
    let svc: &dyn ModelService = api.as_ref();
    let hits = search_options(svc, &config, author, "user2").await;
    let labels: Vec<_> = hits.iter().map(|i| i.label.as_str()).collect();
    assert_eq!(labels, vec!["user2", "deep"]);

    let kind = out.get("kind").unwrap();
    let local = search_options(svc, &config, kind, "txt").await;
    assert_eq!(local.first().map(|i| i.label.as_str()), Some("Text"));
    assert_eq!(search_options(svc, &config, kind, "  ").await.len(), 2);
}

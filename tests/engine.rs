use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use serde_json::{Map, Value, json};
use taxis::{
    ArchiveState, AttributeTypeRegistry, AttributeTypeSpec, AttributeValidator, AttributeValue, ChangeLog,
    ChangeRecord, Collection, Dtype, Engine, Entity, EntityKind, EntityType, Error, FilterParams, MemoryAdapter,
    Metric, Operator, QueryNode, SearchRequest, Section, VectorQuery,
};

const VIDEO: i64 = 1;
const BOX: i64 = 2;
const LINE: i64 = 3;
const TRACK: i64 = 4;
const OTHER_VIDEO: i64 = 5;

fn registry() -> AttributeTypeRegistry {
    AttributeTypeRegistry::from_types([
        EntityType::new(VIDEO, 1, EntityKind::Media, "Video")
            .with_attribute(AttributeTypeSpec::new("Camera", Dtype::String)),
        EntityType::new(BOX, 1, EntityKind::Localization, "Box")
            .with_attribute(AttributeTypeSpec::new("Species", Dtype::String))
            .with_attribute(AttributeTypeSpec::new("Kind", Dtype::String))
            .with_attribute(AttributeTypeSpec::new("Confidence", Dtype::Float).with_range(Some(0.0), Some(1.0)))
            .with_attribute(AttributeTypeSpec::new("Length", Dtype::Int))
            .with_attribute(AttributeTypeSpec::new("Embedding", Dtype::FloatArray).with_dimensions(3)),
        EntityType::new(LINE, 1, EntityKind::Localization, "Line")
            .with_attribute(AttributeTypeSpec::new("Species", Dtype::Enum).with_choices(["Tuna", "Cod"]))
            .with_attribute(AttributeTypeSpec::new("Length", Dtype::Float)),
        EntityType::new(TRACK, 1, EntityKind::State, "Track")
            .with_attribute(AttributeTypeSpec::new("Label", Dtype::String)),
        EntityType::new(OTHER_VIDEO, 2, EntityKind::Media, "Video"),
    ])
    .unwrap()
}

fn engine() -> Engine {
    Engine::new(registry(), Box::new(MemoryAdapter::new()))
}

fn doc(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

async fn create(engine: &Engine, type_id: i64, name: &str, attributes: Value) -> Entity {
    let entity_type = engine.registry().get(type_id).unwrap().clone();
    engine
        .create_entity(Entity::new(&entity_type, name).with_attributes(doc(attributes)))
        .await
        .unwrap()
}

fn names(rows: &[Entity]) -> Vec<&str> {
    rows.iter().map(|e| e.name.as_str()).collect()
}

fn localizations() -> Collection {
    Collection::new(1, EntityKind::Localization)
}

#[derive(Default)]
struct RecordingLog {
    entries: Mutex<Vec<(EntityKind, Vec<i64>, ChangeRecord)>>,
}

impl ChangeLog for RecordingLog {
    fn record(&self, kind: EntityKind, ids: &[i64], change: &ChangeRecord) {
        self.entries
            .lock()
            .unwrap()
            .push((kind, ids.to_vec(), change.clone()));
    }
}

#[test]
fn confidence_range_is_enforced() {
    let spec = AttributeTypeSpec::new("Confidence", Dtype::Float).with_range(Some(0.0), Some(1.0));
    assert!(matches!(
        AttributeValidator::convert(&spec, &json!("1.5")),
        Err(Error::ValueConversion { .. })
    ));
    assert_eq!(
        AttributeValidator::convert(&spec, &json!("0.87")).unwrap(),
        AttributeValue::Float(0.87)
    );
}

#[tokio::test]
async fn name_and_species_tree_spans_sibling_types() {
    let engine = engine();
    create(&engine, BOX, "Boat 1", json!({"Species": "Tuna"})).await;
    create(&engine, BOX, "boat two", json!({"Species": "Cod"})).await;
    create(&engine, BOX, "dock", json!({"Species": "Tuna"})).await;
    create(&engine, LINE, "BOAT line", json!({"Species": "Tuna"})).await;

    let tree = QueryNode::parse(
        r#"{"method": "and", "operations": [
            {"attribute": "$name", "operation": "icontains", "value": "boat"},
            {"attribute": "Species", "operation": "eq", "value": "Tuna"}
        ]}"#,
    )
    .unwrap();
    let request = SearchRequest::new().with_object_search(tree.clone());
    let rows = engine.search(&localizations(), &request).await.unwrap();
    assert_eq!(names(&rows), vec!["Boat 1", "BOAT line"]);

    let encoded = SearchRequest::new().with_object_search(QueryNode::parse(&tree.to_base64()).unwrap());
    assert_eq!(engine.count(&localizations(), &encoded).await.unwrap(), 2);
}

#[tokio::test]
async fn illegal_operator_is_a_schema_error() {
    let engine = engine();
    let request = SearchRequest::new().with_params(FilterParams::new().with(Operator::Lt, "Species::Tuna"));
    let err = engine
        .compile(&localizations().pinned(BOX), &request)
        .unwrap_err();
    assert!(matches!(err, Error::Schema { ref attribute, .. } if attribute == "Species"));
}

#[tokio::test]
async fn unknown_attribute_fails_when_no_sibling_declares_it() {
    let engine = engine();
    let request = SearchRequest::new().with_params(FilterParams::new().with(Operator::Eq, "Camera::a"));
    assert!(matches!(
        engine.compile(&localizations(), &request),
        Err(Error::Schema { .. })
    ));
}

#[tokio::test]
async fn siblings_without_the_attribute_drop_out() {
    let engine = engine();
    create(&engine, BOX, "low", json!({"Confidence": 0.2})).await;
    create(&engine, BOX, "high", json!({"Confidence": 0.9})).await;
    create(&engine, LINE, "line", json!({})).await;

    let request = SearchRequest::new().with_params(FilterParams::new().with(Operator::Lt, "Confidence::0.5"));
    let rows = engine.search(&localizations(), &request).await.unwrap();
    assert_eq!(names(&rows), vec!["low"]);

    let longer = SearchRequest::new().with_params(FilterParams::new().with(Operator::Gt, "Length::3"));
    create(&engine, BOX, "box 4", json!({"Length": 4})).await;
    create(&engine, LINE, "line 3.5", json!({"Length": 3.5})).await;
    let rows = engine.search(&localizations(), &longer).await.unwrap();
    assert_eq!(names(&rows), vec!["box 4", "line 3.5"]);
}

#[tokio::test]
async fn null_check_is_complementary() {
    let engine = engine();
    create(&engine, TRACK, "a", json!({})).await;
    create(&engine, TRACK, "b", json!({})).await;
    let states = Collection::new(1, EntityKind::State).pinned(TRACK);

    let null = SearchRequest::new().with_params(FilterParams::new().with(Operator::Null, "Label::true"));
    let not_null = SearchRequest::new().with_params(FilterParams::new().with(Operator::Null, "Label::false"));
    assert_eq!(engine.count(&states, &null).await.unwrap(), 2);
    assert_eq!(engine.count(&states, &not_null).await.unwrap(), 0);
}

#[tokio::test]
async fn saved_search_section_is_the_complement_of_live() {
    let engine = engine();
    let entity_type = engine.registry().get(VIDEO).unwrap().clone();
    for (name, state) in [
        ("live", ArchiveState::Live),
        ("archived", ArchiveState::Archived),
        ("to_archive", ArchiveState::ToArchive),
    ] {
        engine
            .create_entity(Entity::new(&entity_type, name).with_archive_state(state))
            .await
            .unwrap();
    }
    let other = engine.registry().get(OTHER_VIDEO).unwrap().clone();
    engine
        .create_entity(Entity::new(&other, "elsewhere").with_archive_state(ArchiveState::Archived))
        .await
        .unwrap();

    let not_live = QueryNode::not(QueryNode::leaf("$archive_state", "eq", json!("live")));
    let section = Section::saved_search(7, 1, "Not live", Some(not_live), None);
    let request = SearchRequest::new().in_section(section);
    let rows = engine
        .search(&Collection::new(1, EntityKind::Media), &request)
        .await
        .unwrap();
    assert_eq!(names(&rows), vec!["archived", "to_archive"]);
}

#[tokio::test]
async fn folder_and_playlist_sections() {
    let engine = engine();
    let entity_type = engine.registry().get(VIDEO).unwrap().clone();
    let a = engine
        .create_entity(Entity::new(&entity_type, "a").in_section(10))
        .await
        .unwrap();
    let b = create(&engine, VIDEO, "b", json!({})).await;
    create(&engine, VIDEO, "c", json!({})).await;
    let media = Collection::new(1, EntityKind::Media);

    let folder = SearchRequest::new().in_section(Section::folder(10, 1, "Folder"));
    assert_eq!(names(&engine.search(&media, &folder).await.unwrap()), vec!["a"]);

    let playlist = SearchRequest::new().in_section(Section::playlist(11, 1, "Playlist", [b.id]));
    assert_eq!(names(&engine.search(&media, &playlist).await.unwrap()), vec!["b"]);

    let both = SearchRequest::new()
        .in_section(Section::folder(10, 1, "Folder"))
        .in_section(Section::playlist(11, 1, "Playlist", [b.id]));
    let rows = engine.search(&media, &both).await.unwrap();
    assert_eq!(rows.iter().map(|e| e.id).collect::<Vec<_>>(), vec![a.id, b.id]);

    let empty = SearchRequest::new().in_section(Section::playlist(12, 1, "Empty", []));
    assert!(engine.search(&media, &empty).await.unwrap().is_empty());
}

#[tokio::test]
async fn related_search_finds_media_through_localizations() {
    let engine = engine();
    let with_tuna = create(&engine, VIDEO, "tuna.mp4", json!({})).await;
    let with_cod = create(&engine, VIDEO, "cod.mp4", json!({})).await;
    create(&engine, VIDEO, "empty.mp4", json!({})).await;

    let line = engine.registry().get(LINE).unwrap().clone();
    let boxes = engine.registry().get(BOX).unwrap().clone();
    engine
        .create_entity(
            Entity::new(&line, "l")
                .with_media([with_tuna.id])
                .with_attribute("Species", json!("Tuna")),
        )
        .await
        .unwrap();
    engine
        .create_entity(
            Entity::new(&boxes, "b")
                .with_media([with_cod.id])
                .with_attribute("Species", json!("Cod")),
        )
        .await
        .unwrap();

    let request = SearchRequest::new().with_related_search(QueryNode::leaf("Species", "eq", json!("Tuna")));
    let rows = engine
        .search(&Collection::new(1, EntityKind::Media), &request)
        .await
        .unwrap();
    assert_eq!(names(&rows), vec!["tuna.mp4"]);

    let unknown = SearchRequest::new().with_related_search(QueryNode::leaf("Nope", "eq", json!(1)));
    assert!(matches!(
        engine.compile(&Collection::new(1, EntityKind::Media), &unknown),
        Err(Error::Schema { .. })
    ));
}

#[tokio::test]
async fn vector_upper_bound_limits_distance() {
    let engine = engine();
    create(&engine, BOX, "far", json!({"Embedding": [2.0, 2.0, 2.0]})).await;
    create(&engine, BOX, "origin", json!({"Embedding": [0.0, 0.0, 0.0]})).await;
    create(&engine, BOX, "near", json!({"Embedding": [1.0, 1.0, 1.0]})).await;
    create(&engine, BOX, "none", json!({})).await;

    let query = VectorQuery::new("Embedding", vec![0.0, 0.0, 0.0], Metric::L2Norm).bounded(None, Some(2.0));
    let request = SearchRequest::new().with_vector(query.clone());
    let rows = engine
        .search(&localizations().pinned(BOX), &request)
        .await
        .unwrap();
    assert_eq!(names(&rows), vec!["origin", "near"]);

    let unpinned = SearchRequest::new().with_vector(query);
    assert!(matches!(
        engine.compile(&localizations(), &unpinned),
        Err(Error::AmbiguousType(_))
    ));
}

#[tokio::test]
async fn sort_and_paginate() {
    let engine = engine();
    for (name, length) in [("b", 2), ("d", 4), ("a", 1), ("c", 3)] {
        create(&engine, BOX, name, json!({ "Length": length })).await;
    }
    let request = SearchRequest::new().sort_by("-Length").paginate(2, 1);
    let rows = engine
        .search(&localizations().pinned(BOX), &request)
        .await
        .unwrap();
    assert_eq!(names(&rows), vec!["c", "b"]);

    let by_name = SearchRequest::new().sort_by("$name");
    let rows = engine.search(&localizations(), &by_name).await.unwrap();
    assert_eq!(names(&rows), vec!["a", "b", "c", "d"]);
}

#[tokio::test]
async fn rename_round_trip_restores_documents() {
    let log = Arc::new(RecordingLog::default());
    let engine = engine().with_changelog(log.clone());
    let a = create(&engine, BOX, "a", json!({"Species": "Tuna", "Length": 1})).await;
    let b = create(&engine, BOX, "b", json!({"Length": 2})).await;
    let scope = localizations().pinned(BOX);

    let forward = BTreeMap::from([("Species".to_string(), "Kind".to_string())]);
    let back = BTreeMap::from([("Kind".to_string(), "Species".to_string())]);
    let moved = engine
        .bulk_rename(&scope, &SearchRequest::new(), &forward, true)
        .await
        .unwrap();
    assert_eq!(moved, 1);
    let renamed = engine.fetch_entity(EntityKind::Localization, a.id).await.unwrap().unwrap();
    assert_eq!(renamed.attributes.get("Kind"), Some(&json!("Tuna")));
    assert!(!renamed.attributes.contains_key("Species"));

    engine
        .bulk_rename(&scope, &SearchRequest::new(), &back, true)
        .await
        .unwrap();
    let restored_a = engine.fetch_entity(EntityKind::Localization, a.id).await.unwrap().unwrap();
    let restored_b = engine.fetch_entity(EntityKind::Localization, b.id).await.unwrap().unwrap();
    assert_eq!(restored_a.attributes, a.attributes);
    assert_eq!(restored_b.attributes, b.attributes);

    let entries = log.entries.lock().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].1, vec![a.id]);
}

#[tokio::test]
async fn rename_requires_a_target_of_the_same_dtype() {
    let engine = engine();
    let a = create(&engine, BOX, "a", json!({"Species": "Tuna"})).await;
    create(&engine, LINE, "b", json!({"Species": "Cod"})).await;
    let all = SearchRequest::new();
    let pinned = localizations().pinned(BOX);

    let undeclared = BTreeMap::from([("Species".to_string(), "Undeclared".to_string())]);
    let err = engine.bulk_rename(&pinned, &all, &undeclared, true).await.unwrap_err();
    assert!(matches!(err, Error::Schema { ref attribute, .. } if attribute == "Undeclared"));

    let mistyped = BTreeMap::from([("Species".to_string(), "Length".to_string())]);
    let err = engine.bulk_rename(&pinned, &all, &mistyped, true).await.unwrap_err();
    assert!(matches!(err, Error::Schema { ref attribute, .. } if attribute == "Length"));

    // Line declares Species but not Kind.
    let across = BTreeMap::from([("Species".to_string(), "Kind".to_string())]);
    assert!(matches!(
        engine.bulk_rename(&localizations(), &all, &across, true).await,
        Err(Error::Schema { .. })
    ));

    let row = engine.fetch_entity(EntityKind::Localization, a.id).await.unwrap().unwrap();
    assert_eq!(row.attributes, a.attributes);
}

#[tokio::test]
async fn rename_is_scoped_to_types_declaring_the_source() {
    let engine = engine();
    let a = create(&engine, BOX, "a", json!({"Kind": "Cod"})).await;
    create(&engine, LINE, "b", json!({"Species": "Tuna"})).await;

    let pairs = BTreeMap::from([("Kind".to_string(), "Species".to_string())]);
    let moved = engine
        .bulk_rename(&localizations(), &SearchRequest::new(), &pairs, true)
        .await
        .unwrap();
    assert_eq!(moved, 1);
    let row = engine.fetch_entity(EntityKind::Localization, a.id).await.unwrap().unwrap();
    assert_eq!(row.attributes.get("Species"), Some(&json!("Cod")));
}

#[tokio::test]
async fn patch_then_delete_restores_key_sets() {
    let engine = engine();
    let a = create(&engine, BOX, "a", json!({"Species": "Tuna"})).await;
    let b = create(&engine, BOX, "b", json!({})).await;
    let scope = localizations().pinned(BOX);

    let patched = engine
        .bulk_patch(&scope, &SearchRequest::new(), &doc(json!({"Length": "5"})), true)
        .await
        .unwrap();
    assert_eq!(patched, 2);
    let row = engine.fetch_entity(EntityKind::Localization, b.id).await.unwrap().unwrap();
    assert_eq!(row.attributes.get("Length"), Some(&json!(5)));

    let deleted = engine
        .bulk_delete(&scope, &SearchRequest::new(), &["Length".to_string()])
        .await
        .unwrap();
    assert_eq!(deleted, 2);
    for original in [a, b] {
        let row = engine
            .fetch_entity(EntityKind::Localization, original.id)
            .await
            .unwrap()
            .unwrap();
        let keys: Vec<&String> = row.attributes.keys().collect();
        assert_eq!(keys, original.attributes.keys().collect::<Vec<_>>());
    }
}

#[tokio::test]
async fn bulk_patch_rejects_disagreeing_conversions() {
    let engine = engine();
    create(&engine, BOX, "a", json!({})).await;
    create(&engine, LINE, "b", json!({})).await;
    let err = engine
        .bulk_patch(&localizations(), &SearchRequest::new(), &doc(json!({"Length": 5})), true)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::AmbiguousType(_)));

    let confidence = engine
        .bulk_patch(
            &localizations(),
            &SearchRequest::new(),
            &doc(json!({"Confidence": 0.5})),
            true,
        )
        .await
        .unwrap();
    assert_eq!(confidence, 1);
}

#[tokio::test]
async fn update_entity_records_previous_values() {
    let log = Arc::new(RecordingLog::default());
    let engine = engine().with_changelog(log.clone());
    let a = create(&engine, BOX, "a", json!({"Species": "Cod"})).await;

    let updated = engine
        .update_entity(
            EntityKind::Localization,
            a.id,
            &doc(json!({"Species": "Tuna"})),
            &[],
            &["Length".to_string()],
        )
        .await
        .unwrap();
    assert_eq!(updated.attributes.get("Species"), Some(&json!("Tuna")));
    assert_eq!(updated.attributes.get("Length"), Some(&Value::Null));

    let entries = log.entries.lock().unwrap();
    let (_, ids, record) = &entries[0];
    assert_eq!(ids, &vec![a.id]);
    let species = record.old.iter().find(|e| e.name == "Species").unwrap();
    assert_eq!(species.value, json!("Cod"));
}

#[tokio::test]
async fn pinned_type_must_belong_to_the_collection() {
    let engine = engine();
    let err = engine
        .compile(&Collection::new(1, EntityKind::Media).pinned(BOX), &SearchRequest::new())
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

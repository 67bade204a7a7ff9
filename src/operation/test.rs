use std::time::Duration;

use pretty_assertions::assert_eq;

use super::{
    Aggregate,
    BatchedWrite,
    Count,
    Delete,
    DeleteModel,
    Find,
    GetMore,
    Insert,
    ListCollections,
    Operation,
    RunCommand,
    Update,
    UpdateModel,
};
use crate::{
    bson::{doc, Bson, Document},
    cmap::StreamDescription,
    cursor::options::{AggregateOptions, FindOptions, ListCollectionsOptions},
    error::ErrorKind,
    options::ServerAddress,
    results::CommandReply,
    router::{CommandOptions, WriteOptions},
    Namespace,
};

fn description(max_wire_version: i32, max_write_batch_size: i64) -> StreamDescription {
    StreamDescription {
        server_address: ServerAddress::parse("localhost:27017").unwrap(),
        max_wire_version: Some(max_wire_version),
        min_wire_version: Some(0),
        max_bson_object_size: 16 * 1024 * 1024,
        max_write_batch_size,
        max_message_size_bytes: 48_000_000,
        ..Default::default()
    }
}

fn ns() -> Namespace {
    Namespace::new("db", "coll")
}

fn reply(document: Document) -> CommandReply {
    CommandReply::from_document(document).unwrap()
}

#[test]
fn find_translates_options() {
    let options = FindOptions::builder()
        .sort(doc! { "a": 1 })
        .projection(doc! { "b": 0 })
        .skip(5_u64)
        .limit(10_i64)
        .batch_size(20_u32)
        .max_time(Duration::from_millis(300))
        .tailable(false)
        .build();
    let mut find = Find::new(ns(), doc! { "x": 1 }, options);

    let command = find.build(&description(6, 1000)).unwrap();
    assert_eq!(command.name, "find");
    assert_eq!(command.target_db, "db");
    assert_eq!(
        command.body,
        doc! {
            "find": "coll",
            "filter": { "x": 1 },
            "sort": { "a": 1 },
            "projection": { "b": 0 },
            "skip": 5_i64,
            "limit": 10_i64,
            "batchSize": 10_i64,
            "maxTimeMS": 300,
            "tailable": false,
        }
    );
}

#[test]
fn negative_limit_requests_a_single_batch() {
    let options = FindOptions::builder().limit(-3_i64).build();
    let body = Find::new(ns(), doc! {}, options).body().unwrap();

    assert_eq!(body.get_i64("limit").unwrap(), 3);
    assert!(body.get_bool("singleBatch").unwrap());
}

#[test]
fn collation_requires_a_capable_server() {
    let options = FindOptions::builder().collation(doc! { "locale": "fr" }).build();
    let mut find = Find::new(ns(), doc! {}, options);

    let error = find.build(&description(4, 1000)).unwrap_err();
    assert!(matches!(*error.kind, ErrorKind::IncompatibleServer { .. }));
    assert!(find.build(&description(5, 1000)).is_ok());
}

#[test]
fn find_reads_the_first_batch() {
    let find = Find::new(ns(), doc! {}, FindOptions::default());
    let batch = find
        .handle_response(
            reply(doc! {
                "ok": 1,
                "cursor": { "id": 99_i64, "ns": "db.coll", "firstBatch": [{ "_id": 1 }, { "_id": 2 }] },
            }),
            &description(6, 1000),
        )
        .unwrap();

    assert_eq!(batch.id, 99);
    assert_eq!(batch.documents.len(), 2);
    assert_eq!(batch.ns, Some(ns()));
    assert_eq!(batch.address, ServerAddress::parse("localhost:27017").unwrap());
}

#[test]
fn get_more_is_pinned_and_sized() {
    let address = ServerAddress::parse("b:27018").unwrap();
    let mut get_more = GetMore::new(ns(), 42, address, Some(7), None);

    let command = get_more.build(&description(6, 1000)).unwrap();
    assert_eq!(
        command.body,
        doc! { "getMore": 42_i64, "collection": "coll", "batchSize": 7 }
    );
    assert!(get_more.selection_criteria().is_some());
}

#[test]
fn count_reports_n_and_ignores_missing_namespaces() {
    let mut count = Count::new(
        ns(),
        doc! { "a": 1 },
        Some(2),
        Some(-5),
        Some("a_1".into()),
        None,
        CommandOptions::default(),
    );

    let command = count.build(&description(6, 1000)).unwrap();
    assert_eq!(
        command.body,
        doc! { "count": "coll", "query": { "a": 1 }, "skip": 2_i64, "limit": 5_i64, "hint": "a_1" }
    );

    let n = count
        .handle_response(reply(doc! { "ok": 1, "n": 4.0 }), &description(6, 1000))
        .unwrap();
    assert_eq!(n, 4);

    let ns_not_found = CommandReply::from_document(
        doc! { "ok": 0, "code": 26, "codeName": "NamespaceNotFound", "errmsg": "ns not found" },
    )
    .unwrap_err();
    assert_eq!(count.handle_error(ns_not_found).unwrap(), 0);
}

#[test]
fn aggregate_uses_the_cursor_form() {
    let options = AggregateOptions::builder()
        .batch_size(50_u32)
        .allow_disk_use(true)
        .build();
    let mut aggregate = Aggregate::new(ns(), vec![doc! { "$match": { "a": 1 } }], options);

    let command = aggregate.build(&description(6, 1000)).unwrap();
    assert_eq!(
        command.body,
        doc! {
            "aggregate": "coll",
            "pipeline": [{ "$match": { "a": 1 } }],
            "cursor": { "batchSize": 50 },
            "allowDiskUse": true,
        }
    );
}

#[test]
fn aggregate_with_out_stage_is_a_write() {
    let aggregate = Aggregate::new(
        ns(),
        vec![doc! { "$match": {} }, doc! { "$out": "other" }],
        AggregateOptions::default(),
    );
    assert_eq!(aggregate.kind(), crate::router::OperationKind::Write);
}

#[test]
fn list_collections_requires_the_command() {
    let mut list = ListCollections::new(
        "db".to_string(),
        doc! {},
        ListCollectionsOptions::builder().name_only(true).build(),
    );

    let error = list.build(&description(2, 1000)).unwrap_err();
    assert!(matches!(*error.kind, ErrorKind::IncompatibleServer { .. }));

    let command = list.build(&description(3, 1000)).unwrap();
    assert_eq!(
        command.body,
        doc! { "listCollections": 1, "filter": {}, "cursor": {}, "nameOnly": true }
    );
    assert!(list.namespace().is_command());
}

#[test]
fn run_command_is_named_by_its_first_key() {
    let command = RunCommand::new("admin".to_string(), doc! { "ping": 1 }, None).unwrap();
    assert_eq!(command.name(), "ping");
    assert_eq!(command.namespace(), &Namespace::command("admin"));

    let error = RunCommand::new("admin".to_string(), doc! {}, None).unwrap_err();
    assert!(error.is_usage_error());
}

#[test]
fn inserts_generate_ids_and_split_into_batches() {
    let documents = vec![doc! { "_id": 7, "a": 1 }, doc! { "a": 2 }, doc! { "a": 3 }];
    let mut insert = Insert::new(ns(), documents, None).unwrap();
    let description = description(6, 2);

    let first = insert.build(&description).unwrap();
    let sent = first.body.get_array("documents").unwrap();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].as_document().unwrap().get_i32("_id").unwrap(), 7);
    let generated = sent[1].as_document().unwrap();
    assert_eq!(generated.keys().next().map(String::as_str), Some("_id"));
    assert!(first.body.get_bool("ordered").unwrap());

    let result = insert
        .handle_response(reply(doc! { "ok": 1, "n": 2 }), &description)
        .unwrap();
    assert_eq!(result.inserted_ids.len(), 2);
    assert_eq!(result.inserted_ids[&0], Bson::Int32(7));

    assert!(insert.advance());
    let second = insert.build(&description).unwrap();
    assert_eq!(second.body.get_array("documents").unwrap().len(), 1);

    let result = insert
        .handle_response(
            reply(doc! {
                "ok": 1,
                "n": 0,
                "writeErrors": [{ "index": 0, "code": 11000, "errmsg": "duplicate key" }],
            }),
            &description,
        )
        .unwrap();
    assert_eq!(result.write_errors[0].index, 2);
    assert!(result.inserted_ids.is_empty());
    assert!(!insert.advance());
}

#[test]
fn unordered_inserts_report_every_successful_id() {
    let options = WriteOptions::builder().ordered(false).build();
    let documents = vec![doc! { "_id": 1 }, doc! { "_id": 1 }, doc! { "_id": 2 }];
    let mut insert = Insert::new(ns(), documents, Some(options)).unwrap();
    let description = description(6, 1000);

    let command = insert.build(&description).unwrap();
    assert!(!command.body.get_bool("ordered").unwrap());

    let result = insert
        .handle_response(
            reply(doc! {
                "ok": 1,
                "n": 2,
                "writeErrors": [{ "index": 1, "code": 11000, "errmsg": "duplicate key" }],
            }),
            &description,
        )
        .unwrap();
    let mut indexes: Vec<_> = result.inserted_ids.keys().copied().collect();
    indexes.sort_unstable();
    assert_eq!(indexes, vec![0, 2]);
}

#[test]
fn empty_writes_are_rejected() {
    assert!(Insert::new(ns(), vec![], None).unwrap_err().is_usage_error());
    assert!(Update::new(ns(), vec![], None).unwrap_err().is_usage_error());
    assert!(Delete::new(ns(), vec![], None).unwrap_err().is_usage_error());
}

#[test]
fn multi_updates_require_operators() {
    let replacement = UpdateModel::builder()
        .filter(doc! {})
        .update(doc! { "a": 1 })
        .multi(true)
        .build();
    assert!(Update::new(ns(), vec![replacement], None)
        .unwrap_err()
        .is_usage_error());
}

#[test]
fn update_statements_and_upserts() {
    let model = UpdateModel::builder()
        .filter(doc! { "a": 1 })
        .update(doc! { "$set": { "b": 2 } })
        .upsert(true)
        .build();
    let mut update = Update::new(ns(), vec![model.clone(), model], None).unwrap();
    let description = description(6, 1);

    let command = update.build(&description).unwrap();
    assert_eq!(
        command.body.get_array("updates").unwrap()[0],
        Bson::Document(doc! { "q": { "a": 1 }, "u": { "$set": { "b": 2 } }, "upsert": true })
    );

    assert!(update.advance());
    update.build(&description).unwrap();
    let result = update
        .handle_response(
            reply(doc! { "ok": 1, "n": 1, "nModified": 0, "upserted": [{ "index": 0, "_id": 5 }] }),
            &description,
        )
        .unwrap();
    assert_eq!(result.upserted[0].index, 1);
    assert_eq!(result.upserted[0].id, Bson::Int32(5));
}

#[test]
fn array_filters_require_a_capable_server() {
    let model = UpdateModel::builder()
        .filter(doc! {})
        .update(doc! { "$set": { "a.$[x]": 1 } })
        .array_filters(vec![doc! { "x": 0 }])
        .build();
    let mut update = Update::new(ns(), vec![model], None).unwrap();
    assert!(update.build(&description(5, 1000)).is_err());
    assert!(update.build(&description(6, 1000)).is_ok());
}

#[test]
fn delete_limits_single_statements() {
    let models = vec![
        DeleteModel::builder().filter(doc! { "a": 1 }).single(true).build(),
        DeleteModel::builder().filter(doc! { "b": 1 }).build(),
    ];
    let mut delete = Delete::new(ns(), models, None).unwrap();

    let command = delete.build(&description(6, 1000)).unwrap();
    assert_eq!(
        command.body,
        doc! {
            "delete": "coll",
            "deletes": [{ "q": { "a": 1 }, "limit": 1 }, { "q": { "b": 1 }, "limit": 0 }],
            "ordered": true,
        }
    );
}

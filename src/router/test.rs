use std::{sync::Arc, time::Duration};

use pretty_assertions::assert_eq;

use super::{
    decorate_command,
    resolve,
    CommandOptions,
    DecorationContext,
    OperationKind,
    OperationScope,
    ReadPreferenceSpec,
    ResolvedOptions,
    ScopeDefaults,
};
use crate::{
    bson::doc,
    cmap::Command,
    concern::{Acknowledgment, ReadConcern, WriteConcern},
    options::ServerAddress,
    sdam::{Capabilities, ServerType, TopologyDescription, TopologyType},
    selection_criteria::ReadPreference,
};

fn secondary() -> ReadPreference {
    ReadPreference::Secondary { options: None }
}

fn nearest() -> ReadPreference {
    ReadPreference::Nearest { options: None }
}

fn defaults(read_pref: Option<ReadPreference>, w: Option<i32>) -> ScopeDefaults {
    ScopeDefaults {
        read_preference: read_pref.map(Into::into),
        write_concern: w.map(WriteConcern::nodes),
        read_concern: None,
    }
}

fn options(
    call: Option<ScopeDefaults>,
    collection: Option<ScopeDefaults>,
    database: Option<ScopeDefaults>,
) -> CommandOptions {
    let call = call.unwrap_or_default();
    CommandOptions {
        read_preference: call.read_preference,
        write_concern: call.write_concern,
        read_concern: call.read_concern,
        scope: Some(OperationScope {
            database: database.map(Arc::new),
            collection: collection.map(Arc::new),
        }),
    }
}

fn read_pref_of(resolved: &ResolvedOptions) -> ReadPreference {
    resolved.selection_read_preference()
}

#[test]
fn call_beats_every_scope() {
    let topology = defaults(Some(ReadPreference::Primary), Some(1));
    let opts = options(
        Some(defaults(Some(nearest()), Some(4))),
        Some(defaults(Some(secondary()), Some(3))),
        Some(defaults(Some(ReadPreference::PrimaryPreferred { options: None }), Some(2))),
    );

    let resolved = resolve(Some(&opts), &topology);
    assert_eq!(read_pref_of(&resolved), nearest());
    assert_eq!(resolved.write_concern.w, Some(Acknowledgment::Nodes(4)));
}

#[test]
fn collection_beats_database_and_topology() {
    let topology = defaults(Some(ReadPreference::Primary), Some(1));
    let opts = options(
        None,
        Some(defaults(Some(secondary()), Some(3))),
        Some(defaults(Some(nearest()), Some(2))),
    );

    let resolved = resolve(Some(&opts), &topology);
    assert_eq!(read_pref_of(&resolved), secondary());
    assert_eq!(resolved.write_concern.w, Some(Acknowledgment::Nodes(3)));
}

#[test]
fn database_beats_topology() {
    let topology = defaults(Some(ReadPreference::Primary), Some(1));
    let opts = options(None, None, Some(defaults(Some(nearest()), Some(2))));

    let resolved = resolve(Some(&opts), &topology);
    assert_eq!(read_pref_of(&resolved), nearest());
    assert_eq!(resolved.write_concern.w, Some(Acknowledgment::Nodes(2)));
}

#[test]
fn topology_applies_when_nothing_else_is_set() {
    let topology = defaults(Some(secondary()), Some(1));

    let resolved = resolve(None, &topology);
    assert_eq!(read_pref_of(&resolved), secondary());
    assert_eq!(resolved.write_concern.w, Some(Acknowledgment::Nodes(1)));

    let resolved = resolve(Some(&options(None, None, None)), &topology);
    assert_eq!(read_pref_of(&resolved), secondary());
}

#[test]
fn call_beats_collection_without_database() {
    let topology = ScopeDefaults::default();
    let opts = options(
        Some(defaults(Some(nearest()), None)),
        Some(defaults(Some(secondary()), None)),
        None,
    );

    assert_eq!(read_pref_of(&resolve(Some(&opts), &topology)), nearest());
}

#[test]
fn call_beats_database_without_collection() {
    let topology = ScopeDefaults::default();
    let opts = options(
        Some(defaults(Some(nearest()), None)),
        None,
        Some(defaults(Some(secondary()), None)),
    );

    assert_eq!(read_pref_of(&resolve(Some(&opts), &topology)), nearest());
}

#[test]
fn write_concern_merges_per_key() {
    let topology = ScopeDefaults {
        write_concern: Some(WriteConcern::builder().journal(true).build()),
        ..Default::default()
    };
    let database = ScopeDefaults {
        write_concern: Some(
            WriteConcern::builder()
                .w(Acknowledgment::Majority)
                .w_timeout(Duration::from_millis(500))
                .build(),
        ),
        ..Default::default()
    };
    let opts = CommandOptions {
        write_concern: Some(WriteConcern::nodes(2)),
        scope: Some(OperationScope {
            database: Some(Arc::new(database)),
            collection: None,
        }),
        ..Default::default()
    };

    let resolved = resolve(Some(&opts), &topology);
    assert_eq!(
        resolved.write_concern,
        WriteConcern::builder()
            .w(Acknowledgment::Nodes(2))
            .w_timeout(Duration::from_millis(500))
            .journal(true)
            .build()
    );
}

#[test]
fn read_preference_strings_and_documents_resolve() {
    assert_eq!(
        ReadPreferenceSpec::from("SecondaryPreferred").resolve(),
        ReadPreferenceSpec::Resolved(ReadPreference::SecondaryPreferred { options: None })
    );

    let resolved = ReadPreferenceSpec::from(doc! { "mode": "nearest", "tags": [{ "dc": "ny" }] })
        .resolve();
    let read_pref = resolved.as_resolved().unwrap();
    assert_eq!(read_pref.mode(), "nearest");
    assert_eq!(read_pref.tag_sets().map(Vec::len), Some(1));
}

#[test]
fn unresolvable_read_preference_passes_through() {
    let spec = ReadPreferenceSpec::from("fastest");
    assert_eq!(spec.clone().resolve(), spec);

    let spec = ReadPreferenceSpec::from(doc! { "preference": 7 });
    assert_eq!(spec.clone().resolve(), spec);

    let opts = CommandOptions {
        read_preference: Some("fastest".into()),
        ..Default::default()
    };
    let resolved = resolve(Some(&opts), &ScopeDefaults::default());
    assert_eq!(resolved.read_preference, Some(ReadPreferenceSpec::from("fastest")));
    assert_eq!(resolved.selection_read_preference(), ReadPreference::Primary);
}

fn replica_set() -> TopologyDescription {
    TopologyDescription::new(
        TopologyType::ReplicaSetWithPrimary,
        &[ServerAddress::parse("a:27017").unwrap()],
        Some("rs".into()),
        Duration::from_millis(15),
        Duration::from_secs(10),
    )
}

fn decorate(
    name: &str,
    body: crate::bson::Document,
    kind: OperationKind,
    resolved: &ResolvedOptions,
    max_wire_version: i32,
) -> crate::bson::Document {
    let mut command = Command::new(name, "db", body);
    let description = replica_set();
    let capabilities = Capabilities::from_wire_versions(0, max_wire_version);
    decorate_command(
        &mut command,
        DecorationContext {
            kind,
            resolved: &resolved,
            capabilities: &capabilities,
            description: &description,
            server_type: ServerType::RsSecondary,
        },
    )
    .unwrap();
    command.body
}

#[test]
fn write_commands_always_carry_write_concern() {
    let resolved = ResolvedOptions {
        write_concern: WriteConcern::majority(),
        ..Default::default()
    };

    let body = decorate("insert", doc! { "insert": "c" }, OperationKind::Write, &resolved, 2);
    assert_eq!(body.get_document("writeConcern").unwrap(), &doc! { "w": "majority" });
}

#[test]
fn other_commands_carry_write_concern_only_when_supported() {
    let resolved = ResolvedOptions {
        write_concern: WriteConcern::nodes(2),
        ..Default::default()
    };

    let body = decorate("create", doc! { "create": "c" }, OperationKind::Command, &resolved, 4);
    assert!(!body.contains_key("writeConcern"));

    let body = decorate("create", doc! { "create": "c" }, OperationKind::Command, &resolved, 5);
    assert_eq!(body.get_document("writeConcern").unwrap(), &doc! { "w": 2 });
}

#[test]
fn caller_supplied_keys_are_not_overwritten() {
    let resolved = ResolvedOptions {
        read_preference: Some(secondary().into()),
        write_concern: WriteConcern::majority(),
        read_concern: Some(ReadConcern::majority()),
    };

    let body = decorate(
        "find",
        doc! {
            "find": "c",
            "readConcern": { "level": "local" },
            "$readPreference": { "mode": "nearest" },
        },
        OperationKind::Read,
        &resolved,
        6,
    );
    assert_eq!(body.get_document("readConcern").unwrap(), &doc! { "level": "local" });
    assert_eq!(body.get_document("$readPreference").unwrap(), &doc! { "mode": "nearest" });
}

#[test]
fn reads_carry_read_concern_and_read_preference() {
    let resolved = ResolvedOptions {
        read_preference: Some(secondary().into()),
        read_concern: Some(ReadConcern::majority()),
        ..Default::default()
    };

    let body = decorate("find", doc! { "find": "c" }, OperationKind::Read, &resolved, 6);
    assert_eq!(body.get_document("readConcern").unwrap(), &doc! { "level": "majority" });
    assert_eq!(body.get_document("$readPreference").unwrap(), &doc! { "mode": "secondary" });

    let body = decorate("find", doc! { "find": "c" }, OperationKind::Read, &resolved, 3);
    assert!(!body.contains_key("readConcern"));
}

#[test]
fn cursor_maintenance_is_not_decorated() {
    let resolved = ResolvedOptions {
        read_preference: Some(secondary().into()),
        write_concern: WriteConcern::majority(),
        read_concern: Some(ReadConcern::majority()),
    };

    let body = decorate(
        "getMore",
        doc! { "getMore": 42_i64, "collection": "c" },
        OperationKind::CursorMaintenance,
        &resolved,
        6,
    );
    assert_eq!(body, doc! { "getMore": 42_i64, "collection": "c" });
}

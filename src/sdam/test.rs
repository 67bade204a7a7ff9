use std::time::Duration;

use pretty_assertions::assert_eq;

use super::{
    Capabilities,
    ServerDescription,
    ServerType,
    TopologyDescription,
    TopologyType,
};
use crate::{
    bson::{doc, Document},
    hello::HelloReply,
    options::ServerAddress,
    selection_criteria::{ReadPreference, ReadPreferenceOptions, SelectionCriteria},
};

fn address(s: &str) -> ServerAddress {
    ServerAddress::parse(s).unwrap()
}

fn checked(addr: &str, response: Document, rtt_ms: u64) -> ServerDescription {
    let reply = HelloReply {
        server_address: address(addr),
        command_response: crate::bson::from_document(response.clone()).unwrap(),
        raw_command_response: response,
        round_trip_time: Duration::from_millis(rtt_ms),
    };
    ServerDescription::new_from_hello_reply(&address(addr), reply)
}

fn primary(addr: &str, hosts: &[&str]) -> ServerDescription {
    checked(
        addr,
        doc! {
            "ok": 1,
            "ismaster": true,
            "setName": "rs",
            "hosts": hosts.to_vec(),
            "me": addr,
            "minWireVersion": 0,
            "maxWireVersion": 6,
        },
        5,
    )
}

fn secondary(addr: &str, hosts: &[&str], rtt_ms: u64, tags: Document) -> ServerDescription {
    checked(
        addr,
        doc! {
            "ok": 1,
            "ismaster": false,
            "secondary": true,
            "setName": "rs",
            "hosts": hosts.to_vec(),
            "me": addr,
            "tags": tags,
            "minWireVersion": 0,
            "maxWireVersion": 6,
        },
        rtt_ms,
    )
}

fn replica_set(seeds: &[&str]) -> TopologyDescription {
    let hosts: Vec<_> = seeds.iter().map(|s| address(s)).collect();
    TopologyDescription::new(
        TopologyType::ReplicaSetNoPrimary,
        &hosts,
        Some("rs".to_string()),
        Duration::from_millis(15),
        Duration::from_secs(10),
    )
}

fn secondary_pref(tags: Option<Vec<crate::selection_criteria::TagSet>>) -> SelectionCriteria {
    SelectionCriteria::ReadPreference(ReadPreference::Secondary {
        options: tags.map(|tag_sets| {
            ReadPreferenceOptions::builder()
                .tag_sets(tag_sets)
                .build()
        }),
    })
}

#[test]
fn primary_reply_discovers_members() {
    let hosts = ["a:27017", "b:27017", "c:27017"];
    let mut description = replica_set(&["a:27017"]);

    description.update(primary("a:27017", &hosts)).unwrap();

    assert_eq!(
        description.topology_type(),
        TopologyType::ReplicaSetWithPrimary
    );
    let mut known: Vec<String> = description
        .server_addresses()
        .map(ToString::to_string)
        .collect();
    known.sort();
    assert_eq!(known, hosts.to_vec());
}

#[test]
fn primary_removes_members_it_does_not_report() {
    let mut description = replica_set(&["a:27017", "stale:27017"]);

    description
        .update(primary("a:27017", &["a:27017", "b:27017"]))
        .unwrap();

    assert!(description
        .get_server_description(&address("stale:27017"))
        .is_none());
    assert!(description
        .get_server_description(&address("b:27017"))
        .is_some());
}

#[test]
fn member_of_another_set_is_removed() {
    let mut description = replica_set(&["a:27017", "b:27017"]);

    let other = checked(
        "b:27017",
        doc! { "ok": 1, "secondary": true, "setName": "other", "hosts": ["b:27017"] },
        1,
    );
    description.update(other).unwrap();

    assert!(description
        .get_server_description(&address("b:27017"))
        .is_none());
}

#[test]
fn losing_the_primary_changes_topology_type() {
    let hosts = ["a:27017", "b:27017"];
    let mut description = replica_set(&hosts);
    description.update(primary("a:27017", &hosts)).unwrap();

    description
        .update(ServerDescription::new_from_error(
            &address("a:27017"),
            crate::error::Error::network_timeout(),
        ))
        .unwrap();

    assert_eq!(description.topology_type(), TopologyType::ReplicaSetNoPrimary);
    assert!(description.primary().is_none());
}

#[test]
fn round_trip_time_is_a_weighted_average() {
    let mut description = replica_set(&["a:27017"]);
    let hosts = ["a:27017"];

    description.update(secondary("a:27017", &hosts, 100, doc! {})).unwrap();
    description.update(secondary("a:27017", &hosts, 200, doc! {})).unwrap();

    let rtt = description
        .get_server_description(&address("a:27017"))
        .and_then(|s| s.average_round_trip_time);
    assert_eq!(rtt, Some(Duration::from_millis(120)));
}

#[test]
fn sharded_topology_drops_non_mongos_servers() {
    let hosts = vec![address("m1:27017"), address("m2:27017")];
    let mut description = TopologyDescription::new(
        TopologyType::Sharded,
        &hosts,
        None,
        Duration::from_millis(15),
        Duration::from_secs(10),
    );

    description
        .update(checked(
            "m1:27017",
            doc! { "ok": 1, "msg": "isdbgrid", "maxWireVersion": 6 },
            1,
        ))
        .unwrap();
    description
        .update(checked("m2:27017", doc! { "ok": 1, "ismaster": true }, 1))
        .unwrap();

    assert_eq!(
        description
            .get_server_description(&address("m1:27017"))
            .map(|s| s.server_type),
        Some(ServerType::Mongos)
    );
    assert!(description
        .get_server_description(&address("m2:27017"))
        .is_none());
}

#[test]
fn secondary_selection_honors_tag_sets() {
    let hosts = ["a:27017", "b:27017", "c:27017"];
    let mut description = replica_set(&hosts);
    description.update(primary("a:27017", &hosts)).unwrap();
    description
        .update(secondary("b:27017", &hosts, 5, doc! { "dc": "east" }))
        .unwrap();
    description
        .update(secondary("c:27017", &hosts, 5, doc! { "dc": "west" }))
        .unwrap();

    let west = [("dc".to_string(), "west".to_string())]
        .into_iter()
        .collect();
    let criteria = secondary_pref(Some(vec![west]));

    for _ in 0..10 {
        assert_eq!(
            description.select_server(&criteria).unwrap(),
            Some(address("c:27017"))
        );
    }

    let nowhere = [("dc".to_string(), "north".to_string())]
        .into_iter()
        .collect();
    assert_eq!(
        description
            .select_server(&secondary_pref(Some(vec![nowhere])))
            .unwrap(),
        None
    );
}

#[test]
fn selection_excludes_servers_outside_latency_window() {
    let hosts = ["a:27017", "b:27017", "c:27017"];
    let mut description = replica_set(&hosts);
    description.update(primary("a:27017", &hosts)).unwrap();
    description
        .update(secondary("b:27017", &hosts, 5, doc! {}))
        .unwrap();
    description
        .update(secondary("c:27017", &hosts, 500, doc! {}))
        .unwrap();

    let criteria = secondary_pref(None);
    for _ in 0..10 {
        assert_eq!(
            description.select_server(&criteria).unwrap(),
            Some(address("b:27017"))
        );
    }
}

#[test]
fn secondary_preferred_falls_back_to_primary() {
    let hosts = ["a:27017", "b:27017"];
    let mut description = replica_set(&hosts);
    description.update(primary("a:27017", &hosts)).unwrap();

    let criteria = SelectionCriteria::ReadPreference(ReadPreference::SecondaryPreferred {
        options: None,
    });
    assert_eq!(
        description.select_server(&criteria).unwrap(),
        Some(address("a:27017"))
    );
    assert_eq!(description.select_server(&secondary_pref(None)).unwrap(), None);
}

#[test]
fn predicate_selects_by_address() {
    let hosts = ["a:27017", "b:27017"];
    let mut description = replica_set(&hosts);
    description.update(primary("a:27017", &hosts)).unwrap();
    description
        .update(secondary("b:27017", &hosts, 1, doc! {}))
        .unwrap();

    let criteria = SelectionCriteria::from_address(address("b:27017"));
    assert_eq!(
        description.select_server(&criteria).unwrap(),
        Some(address("b:27017"))
    );
}

#[test]
fn max_staleness_below_minimum_is_rejected() {
    let hosts = ["a:27017"];
    let mut description = replica_set(&hosts);
    description.update(primary("a:27017", &hosts)).unwrap();

    let criteria = SelectionCriteria::ReadPreference(ReadPreference::Secondary {
        options: Some(
            ReadPreferenceOptions::builder()
                .max_staleness(Duration::from_secs(30))
                .build(),
        ),
    });
    assert!(description
        .select_server(&criteria)
        .unwrap_err()
        .is_usage_error());
}

#[test]
fn incompatible_server_fails_selection() {
    let hosts = vec![address("a:27017")];
    let mut description = TopologyDescription::new(
        TopologyType::Single,
        &hosts,
        None,
        Duration::from_millis(15),
        Duration::from_secs(10),
    );
    description
        .update(checked(
            "a:27017",
            doc! { "ok": 1, "ismaster": true, "minWireVersion": 0, "maxWireVersion": 1 },
            1,
        ))
        .unwrap();

    let error = description
        .select_server(&ReadPreference::Primary.into())
        .unwrap_err();
    assert!(matches!(
        *error.kind,
        crate::error::ErrorKind::IncompatibleServer { .. }
    ));
}

#[test]
fn capabilities_follow_wire_version_thresholds() {
    let caps = Capabilities::from_wire_versions(0, 2);
    assert!(caps.has_aggregation_cursor);
    assert!(caps.has_write_commands);
    assert!(!caps.has_list_collections_command);
    assert!(!caps.commands_take_write_concern);

    let caps = Capabilities::from_wire_versions(0, 5);
    assert!(caps.has_list_collections_command);
    assert!(caps.has_list_indexes_command);
    assert!(caps.commands_take_write_concern);
    assert!(caps.commands_take_collation);
}

#[test]
fn capabilities_use_the_narrowest_range() {
    let hosts = ["a:27017", "b:27017"];
    let mut description = replica_set(&hosts);
    description.update(primary("a:27017", &hosts)).unwrap();
    assert_eq!(Capabilities::from_description(&description).map(|c| c.max_wire_version), Some(6));

    let old_secondary = checked(
        "b:27017",
        doc! {
            "ok": 1, "secondary": true, "setName": "rs", "hosts": hosts.to_vec(),
            "minWireVersion": 0, "maxWireVersion": 3,
        },
        1,
    );
    description.update(old_secondary).unwrap();

    let caps = Capabilities::from_description(&description).unwrap();
    assert_eq!(caps.max_wire_version, 3);
    assert!(!caps.commands_take_write_concern);
}

#[test]
fn read_preference_forwarded_to_mongos_only_when_not_primary() {
    let hosts = vec![address("m:27017")];
    let description = TopologyDescription::new(
        TopologyType::Sharded,
        &hosts,
        None,
        Duration::from_millis(15),
        Duration::from_secs(10),
    );

    let mut command = doc! { "find": "c" };
    description
        .update_command_with_read_pref(
            ServerType::Mongos,
            &mut command,
            Some(&ReadPreference::Primary),
        )
        .unwrap();
    assert!(!command.contains_key("$readPreference"));

    description
        .update_command_with_read_pref(
            ServerType::Mongos,
            &mut command,
            Some(&ReadPreference::Nearest { options: None }),
        )
        .unwrap();
    assert_eq!(
        command.get_document("$readPreference").unwrap(),
        &doc! { "mode": "nearest" }
    );
}

#[test]
fn single_secondary_gets_primary_preferred() {
    let hosts = vec![address("a:27017")];
    let description = TopologyDescription::new(
        TopologyType::Single,
        &hosts,
        None,
        Duration::from_millis(15),
        Duration::from_secs(10),
    );

    let mut command = doc! { "find": "c" };
    description
        .update_command_with_read_pref(ServerType::RsSecondary, &mut command, None)
        .unwrap();
    assert_eq!(
        command.get_document("$readPreference").unwrap(),
        &doc! { "mode": "primaryPreferred" }
    );

    let mut command = doc! { "find": "c" };
    description
        .update_command_with_read_pref(ServerType::Standalone, &mut command, None)
        .unwrap();
    assert!(!command.contains_key("$readPreference"));
}

#[test]
fn diff_reports_added_and_changed_servers() {
    let hosts = ["a:27017", "b:27017"];
    let old = replica_set(&["a:27017"]);
    let mut new = old.clone();
    new.update(primary("a:27017", &hosts)).unwrap();

    let diff = old.diff(&new).unwrap();
    assert!(diff.added_addresses.contains(&address("b:27017")));
    assert!(diff.removed_addresses.is_empty());
    assert!(diff.changed_servers.contains_key(&address("a:27017")));
    assert!(new.diff(&new.clone()).is_none());
}

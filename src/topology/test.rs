use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use pretty_assertions::assert_eq;

use super::{Topology, TopologyKind, TopologyState};
use crate::{
    auth::Credential,
    bson::{doc, Document},
    cursor::options::FindOptions,
    error::ErrorKind,
    event::{command::CommandEvent, sdam::TopologyEvent, EventHandler},
    operation::{DeleteModel, UpdateModel},
    options::{ClientOptions, ServerAddress},
    router::{ReadPreferenceSpec, WriteOptions},
    sdam::ServerType,
    test::{mock::MockDeployment, options, wait_until},
    Namespace,
};

const HOST: &str = "localhost:27017";
const HOST_A: &str = "a:27017";
const HOST_B: &str = "b:27017";

fn ns() -> Namespace {
    Namespace::new("db", "coll")
}

/// Records the name of every topology event.
#[derive(Clone, Default)]
struct EventLog(Arc<Mutex<Vec<&'static str>>>);

impl EventLog {
    fn attach(topology: &Topology) -> Self {
        let log = Self::default();
        let sink = log.0.clone();
        topology
            .events()
            .subscribe(EventHandler::callback(move |event: TopologyEvent| {
                sink.lock().unwrap().push(event.name())
            }));
        log
    }

    fn names(&self) -> Vec<&'static str> {
        self.0.lock().unwrap().clone()
    }

    fn count(&self, name: &str) -> usize {
        self.names().into_iter().filter(|n| *n == name).count()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.names().into_iter().position(|n| n == name)
    }
}

fn topology(deployment: &MockDeployment, options: ClientOptions) -> Topology {
    Topology::with_connector(options, deployment.connector()).unwrap()
}

async fn connected_standalone() -> (MockDeployment, Topology) {
    let deployment = MockDeployment::new();
    deployment.standalone(HOST);
    let topology = topology(&deployment, options(&[HOST]));
    topology.connect().await.unwrap();
    (deployment, topology)
}

#[tokio::test]
async fn disabled_buffering_fails_fast_while_disconnected() {
    let deployment = MockDeployment::new();
    deployment.standalone(HOST);
    let mut options = options(&[HOST]);
    options.buffer_max_entries = Some(0);
    let topology = topology(&deployment, options);

    let error = topology
        .command(&ns(), doc! { "ping": 1 }, None)
        .await
        .unwrap_err();
    assert!(
        matches!(*error.kind, ErrorKind::NoConnectionAvailable { .. }),
        "{:?}",
        error
    );
    assert!(topology.pending().is_empty());
    assert!(deployment.received().is_empty());
}

#[tokio::test]
async fn buffered_operations_replay_in_arrival_order() {
    let deployment = MockDeployment::new();
    deployment.standalone(HOST);
    let topology = topology(&deployment, options(&[HOST]));

    let mut tasks = Vec::new();
    for i in 0..3_i32 {
        let inserting = topology.clone();
        tasks.push(tokio::spawn(async move {
            inserting
                .insert(&ns(), vec![doc! { "_id": i }], None)
                .await
        }));
        let expected = i as usize + 1;
        wait_until(|| topology.pending().len() == expected).await;
    }
    assert_eq!(
        topology.pending().entries()[0],
        ("db.coll".to_string(), "insert".to_string())
    );

    topology.connect().await.unwrap();
    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap().n, 1);
    }

    let order: Vec<i32> = deployment
        .documents("db.coll")
        .iter()
        .map(|document| document.get_i32("_id").unwrap())
        .collect();
    assert_eq!(order, vec![0, 1, 2]);
    assert!(topology.pending().is_empty());
}

#[tokio::test]
async fn full_buffer_rejects_new_operations() {
    let deployment = MockDeployment::new();
    deployment.standalone(HOST);
    let mut options = options(&[HOST]);
    options.buffer_max_entries = Some(1);
    let topology = topology(&deployment, options);

    let buffered = {
        let topology = topology.clone();
        tokio::spawn(async move { topology.command(&ns(), doc! { "ping": 1 }, None).await })
    };
    wait_until(|| topology.pending().len() == 1).await;

    let error = topology
        .command(&ns(), doc! { "ping": 1 }, None)
        .await
        .unwrap_err();
    assert!(matches!(*error.kind, ErrorKind::NoConnectionAvailable { .. }));

    topology.close().await;
    let error = buffered.await.unwrap().unwrap_err();
    assert!(matches!(*error.kind, ErrorKind::TopologyDestroyed), "{:?}", error);
}

#[tokio::test]
async fn connect_publishes_lifecycle_events() {
    let deployment = MockDeployment::new();
    deployment.standalone(HOST);
    let topology = topology(&deployment, options(&[HOST]));
    let events = EventLog::attach(&topology);

    assert_eq!(topology.state(), TopologyState::Disconnected);
    topology.connect().await.unwrap();
    assert!(topology.is_connected());
    assert_eq!(topology.kind(), TopologyKind::Server);

    let topology_opening = events.position("topologyOpening").unwrap();
    let open = events.position("open").unwrap();
    assert!(topology_opening < open);
    assert_eq!(events.count("open"), 1);
    assert_eq!(events.count("fullsetup"), 0);

    let capabilities = topology.capabilities().unwrap();
    assert_eq!(capabilities.max_wire_version, crate::test::mock::MAX_WIRE_VERSION);
    assert!(topology.last_hello().is_some());

    // Connecting again is a no-op.
    topology.connect().await.unwrap();
    assert_eq!(events.count("open"), 1);
}

#[tokio::test]
async fn unreachable_seed_fails_connect_and_destroys() {
    let deployment = MockDeployment::new();
    let topology = topology(&deployment, options(&[HOST]));
    let events = EventLog::attach(&topology);

    let error = topology.connect().await.unwrap_err();
    assert!(error.is_network_error(), "{:?}", error);
    assert!(topology.is_destroyed());
    assert_eq!(events.count("close"), 1);
    assert!(topology.connect().await.is_err());
}

#[tokio::test]
async fn single_mongos_seed_is_reestablished_as_mongos() {
    let deployment = MockDeployment::new();
    deployment.mongos(HOST);
    let topology = topology(&deployment, options(&[HOST]));
    let events = EventLog::attach(&topology);

    topology.connect().await.unwrap();
    assert_eq!(topology.kind(), TopologyKind::Mongos);
    assert!(topology.is_connected());

    // One monitoring connection before the switch and one after it.
    assert_eq!(deployment.connections_opened(HOST), 2);
    assert_eq!(events.count("open"), 1);
    assert_eq!(events.count("close"), 0);
    assert_eq!(events.count("fullsetup"), 1);

    let reply = topology
        .command(&ns(), doc! { "ping": 1 }, None)
        .await
        .unwrap();
    assert!(reply.ok);
}

#[tokio::test]
async fn several_seeds_form_a_mongos_topology() {
    let deployment = MockDeployment::new();
    deployment.mongos(HOST_A).mongos(HOST_B);
    let topology = topology(&deployment, options(&[HOST_A, HOST_B]));
    let events = EventLog::attach(&topology);

    topology.connect().await.unwrap();
    assert_eq!(topology.kind(), TopologyKind::Mongos);
    assert_eq!(events.count("fullsetup"), 1);
    assert_eq!(events.position("all"), events.position("fullsetup").map(|i| i + 1));
    assert_eq!(deployment.connections_opened(HOST_A), 1);
}

fn replica_set_options() -> ClientOptions {
    let mut options = options(&[HOST_A, HOST_B]);
    options.repl_set_name = Some("rs".to_string());
    options
}

#[tokio::test]
async fn replica_set_publishes_membership_events() {
    let deployment = MockDeployment::new();
    deployment
        .primary(HOST_A, "rs", &[HOST_A, HOST_B])
        .secondary(HOST_B, "rs", &[HOST_A, HOST_B]);
    let topology = topology(&deployment, replica_set_options());
    let events = EventLog::attach(&topology);

    topology.connect().await.unwrap();
    assert_eq!(topology.kind(), TopologyKind::ReplicaSet);
    assert_eq!(events.count("joined"), 2);
    assert_eq!(events.count("fullsetup"), 1);
    assert_eq!(events.count("all"), 1);
    assert_eq!(events.position("all"), events.position("fullsetup").map(|i| i + 1));

    let types: Vec<ServerType> = {
        let mut servers = topology.servers();
        servers.sort_by_key(|server| server.address().to_string());
        servers.iter().map(|server| server.server_type()).collect()
    };
    assert_eq!(types, vec![ServerType::RsPrimary, ServerType::RsSecondary]);

    // The primary drops b from the set.
    deployment.primary(HOST_A, "rs", &[HOST_A]);
    wait_until(|| events.count("serverClosed") == 1).await;
    assert_eq!(events.count("left"), 1);
    assert_eq!(topology.servers().len(), 1);

    // Membership changes never repeat fullsetup.
    assert_eq!(events.count("fullsetup"), 1);
}

#[tokio::test]
async fn secondary_reads_are_routed_and_get_more_is_pinned() {
    let deployment = MockDeployment::new();
    deployment
        .primary(HOST_A, "rs", &[HOST_A, HOST_B])
        .secondary(HOST_B, "rs", &[HOST_A, HOST_B]);
    deployment.seed(
        "db.coll",
        (0..4).map(|i| doc! { "_id": i }).collect(),
    );
    let topology = topology(&deployment, replica_set_options());
    topology.connect().await.unwrap();

    let options = FindOptions::builder()
        .batch_size(1_u32)
        .read_preference(ReadPreferenceSpec::from("secondary"))
        .build();
    let mut cursor = topology.cursor(&ns(), doc! {}, options).unwrap();
    assert_eq!(cursor.to_array().await.unwrap().len(), 4);

    let secondary = ServerAddress::parse(HOST_B).unwrap();
    assert_eq!(deployment.received_named("find")[0].address, secondary);
    let get_mores = deployment.received_named("getMore");
    assert_eq!(get_mores.len(), 3);
    assert!(get_mores.iter().all(|get_more| get_more.address == secondary));

    // Writes always go to the primary.
    topology
        .insert(&ns(), vec![doc! { "_id": 10 }], None)
        .await
        .unwrap();
    assert_eq!(
        deployment.received_named("insert")[0].address,
        ServerAddress::parse(HOST_A).unwrap()
    );
}

#[tokio::test]
async fn reconnect_is_published_once_and_releases_buffered_operations() {
    let deployment = MockDeployment::new();
    deployment.standalone(HOST);
    let mut options = options(&[HOST]);
    options.reconnect_tries = Some(1_000);
    let topology = topology(&deployment, options);
    let events = EventLog::attach(&topology);
    topology.connect().await.unwrap();

    deployment.set_down(HOST, true);
    wait_until(|| topology.state() == TopologyState::Reconnecting).await;

    let buffered = {
        let topology = topology.clone();
        tokio::spawn(async move {
            topology
                .insert(&ns(), vec![doc! { "_id": 1 }], None)
                .await
        })
    };
    wait_until(|| topology.pending().len() == 1).await;

    deployment.set_down(HOST, false);
    assert_eq!(buffered.await.unwrap().unwrap().n, 1);
    wait_until(|| events.count("reconnect") >= 1).await;
    assert!(topology.is_connected());

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(events.count("reconnect"), 1);
    assert_eq!(events.count("open"), 1);
}

#[tokio::test]
async fn exhausted_reconnect_tries_destroy_the_topology() {
    let deployment = MockDeployment::new();
    deployment.standalone(HOST);
    let mut options = options(&[HOST]);
    options.reconnect_tries = Some(3);
    let topology = topology(&deployment, options);
    let events = EventLog::attach(&topology);
    topology.connect().await.unwrap();

    deployment.set_down(HOST, true);
    wait_until(|| topology.is_destroyed()).await;
    wait_until(|| events.count("topologyClosed") == 1).await;

    assert_eq!(events.count("reconnectFailed"), 1);
    assert_eq!(events.count("close"), 1);

    let error = topology
        .command(&ns(), doc! { "ping": 1 }, None)
        .await
        .unwrap_err();
    assert!(matches!(*error.kind, ErrorKind::TopologyDestroyed), "{:?}", error);
}

#[tokio::test]
async fn lost_connectivity_without_auto_reconnect_destroys() {
    let deployment = MockDeployment::new();
    deployment.standalone(HOST);
    let mut options = options(&[HOST]);
    options.auto_reconnect = Some(false);
    let topology = topology(&deployment, options);
    let events = EventLog::attach(&topology);
    topology.connect().await.unwrap();

    deployment.set_down(HOST, true);
    wait_until(|| topology.is_destroyed()).await;
    assert_eq!(events.count("reconnect"), 0);
    assert_eq!(events.count("reconnectFailed"), 0);
}

#[tokio::test]
async fn closed_topology_rejects_every_entry_point() {
    let (_deployment, topology) = connected_standalone().await;
    let events = EventLog::attach(&topology);

    topology.close().await;
    topology.close().await;
    assert_eq!(events.count("close"), 1);
    assert_eq!(events.count("topologyClosed"), 1);
    assert_eq!(topology.state(), TopologyState::Destroyed);

    let errors = vec![
        topology.connect().await.unwrap_err(),
        topology
            .command(&ns(), doc! { "ping": 1 }, None)
            .await
            .unwrap_err(),
        topology
            .insert(&ns(), vec![doc! {}], None)
            .await
            .unwrap_err(),
        topology.cursor(&ns(), doc! {}, None).unwrap_err(),
    ];
    for error in errors {
        assert!(matches!(*error.kind, ErrorKind::TopologyDestroyed), "{:?}", error);
    }
}

#[tokio::test]
async fn writes_are_split_into_batches() {
    let deployment = MockDeployment::new();
    deployment.set_hello(HOST, doc! { "ismaster": true, "maxWriteBatchSize": 2_i64 });
    deployment.seed("db.coll", vec![doc! { "_id": 2 }]);

    let started: Arc<Mutex<Vec<(String, i32)>>> = Arc::default();
    let sink = started.clone();
    let mut options = options(&[HOST]);
    options.command_event_handler = Some(EventHandler::callback(move |event: CommandEvent| {
        if let CommandEvent::Started(event) = event {
            sink.lock()
                .unwrap()
                .push((event.command_name, event.operation_id));
        }
    }));
    let topology = topology(&deployment, options);
    topology.connect().await.unwrap();

    let documents: Vec<Document> = (0..5).map(|i| doc! { "_id": i }).collect();

    // Ordered: the duplicate in the second batch stops the call.
    let result = topology
        .insert(&ns(), documents.clone(), None)
        .await
        .unwrap();
    assert_eq!(result.n, 2);
    assert_eq!(result.write_errors.len(), 1);
    assert_eq!(result.write_errors[0].index, 2);
    assert_eq!(result.write_errors[0].code, 11000);
    assert_eq!(deployment.received_named("insert").len(), 2);

    let operation_ids: Vec<i32> = started
        .lock()
        .unwrap()
        .iter()
        .filter(|(name, _)| name == "insert")
        .map(|(_, id)| *id)
        .collect();
    assert_eq!(operation_ids.len(), 2);
    assert_eq!(operation_ids[0], operation_ids[1]);

    // Unordered: every batch is sent.
    deployment.clear_received();
    let result = topology
        .insert(
            &ns(),
            documents,
            WriteOptions::builder().ordered(false).build(),
        )
        .await
        .unwrap();
    assert_eq!(deployment.received_named("insert").len(), 3);
    assert_eq!(result.n, 2);
    assert_eq!(result.write_errors.len(), 3);
    assert!(!result.is_ok());
}

#[tokio::test]
async fn updates_and_removes() {
    let (deployment, topology) = connected_standalone().await;
    deployment.seed(
        "db.coll",
        vec![doc! { "_id": 1, "x": 1 }, doc! { "_id": 2, "x": 1 }],
    );

    let result = topology
        .update(
            &ns(),
            vec![
                UpdateModel::builder()
                    .filter(doc! { "x": 1 })
                    .update(doc! { "$set": { "y": true } })
                    .multi(true)
                    .build(),
                UpdateModel::builder()
                    .filter(doc! { "_id": 3 })
                    .update(doc! { "$set": { "x": 2 } })
                    .upsert(true)
                    .build(),
            ],
            None,
        )
        .await
        .unwrap();
    assert_eq!(result.n, 3);
    assert_eq!(result.n_modified, 2);
    assert_eq!(result.upserted.len(), 1);
    assert_eq!(result.upserted[0].index, 1);

    let result = topology
        .remove(
            &ns(),
            vec![DeleteModel::builder()
                .filter(doc! { "x": 1 })
                .single(true)
                .build()],
            None,
        )
        .await
        .unwrap();
    assert_eq!(result.n, 1);
    assert_eq!(deployment.documents("db.coll").len(), 2);
}

#[tokio::test]
async fn network_errors_mark_the_server_unknown_until_it_recovers() {
    let (deployment, topology) = connected_standalone().await;
    deployment.fail_network("ping", 1);

    let error = topology
        .command(&ns(), doc! { "ping": 1 }, None)
        .await
        .unwrap_err();
    assert!(error.is_network_error(), "{:?}", error);

    wait_until(|| topology.is_connected()).await;
    let reply = topology
        .command(&ns(), doc! { "ping": 1 }, None)
        .await
        .unwrap();
    assert!(reply.ok);
}

#[tokio::test]
async fn auth_requires_an_authenticator() {
    let (_deployment, topology) = connected_standalone().await;

    let error = topology
        .auth(Credential::builder().username("user".to_string()).build())
        .await
        .unwrap_err();
    assert!(matches!(*error.kind, ErrorKind::InvalidArgument { .. }), "{:?}", error);
    assert!(topology.is_connected());
}

#[tokio::test]
async fn find_against_an_unreachable_seed_without_buffering_fails_within_connect_timeout() {
    let deployment = MockDeployment::new();
    let mut options = options(&[HOST]);
    options.buffer_max_entries = Some(0);
    let connect_timeout = options.connect_timeout();
    let topology = topology(&deployment, options);

    let mut cursor = topology.cursor(&ns(), doc! {}, None).unwrap();
    let error = tokio::time::timeout(connect_timeout, cursor.next())
        .await
        .expect("find should be rejected before connectTimeoutMS")
        .unwrap_err();
    assert!(error.is_connectivity_error(), "{:?}", error);
    assert!(topology.pending().is_empty());

    let error = topology.connect().await.unwrap_err();
    assert!(error.is_network_error(), "{:?}", error);
    assert!(deployment.received_named("find").is_empty());
}

#[tokio::test]
async fn replica_set_reconnect_is_published_once() {
    let deployment = MockDeployment::new();
    deployment
        .primary(HOST_A, "rs", &[HOST_A, HOST_B])
        .secondary(HOST_B, "rs", &[HOST_A, HOST_B]);
    let mut options = replica_set_options();
    options.reconnect_tries = Some(1_000);
    let topology = topology(&deployment, options);
    let events = EventLog::attach(&topology);
    topology.connect().await.unwrap();

    deployment.set_down(HOST_A, true);
    deployment.set_down(HOST_B, true);
    wait_until(|| topology.state() == TopologyState::Reconnecting).await;

    deployment.set_down(HOST_A, false);
    deployment.set_down(HOST_B, false);
    wait_until(|| events.count("reconnect") >= 1).await;
    wait_until(|| topology.servers().len() == 2).await;

    // Both members coming back, one heartbeat after the other, is still one reconnection.
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(events.count("reconnect"), 1);
    assert_eq!(events.count("fullsetup"), 1);
    assert!(topology.is_connected());
}

#[tokio::test]
async fn removing_the_last_eligible_server_fails_its_in_flight_reads() {
    let deployment = MockDeployment::new();
    deployment
        .primary(HOST_A, "rs", &[HOST_A, HOST_B])
        .secondary(HOST_B, "rs", &[HOST_A, HOST_B]);
    deployment.seed("db.coll", vec![doc! { "_id": 0 }]);
    let topology = topology(&deployment, replica_set_options());
    topology.connect().await.unwrap();

    deployment.delay("find", Duration::from_secs(5));
    let read = {
        let topology = topology.clone();
        tokio::spawn(async move {
            let options = FindOptions::builder()
                .read_preference(ReadPreferenceSpec::from("secondary"))
                .build();
            let mut cursor = topology.cursor(&ns(), doc! {}, options).unwrap();
            cursor.next().await
        })
    };
    wait_until(|| deployment.received_named("find").len() == 1).await;

    // The primary drops the only secondary from the set.
    deployment.primary(HOST_A, "rs", &[HOST_A]);
    let error = read.await.unwrap().unwrap_err();
    assert!(
        matches!(*error.kind, ErrorKind::ServerSelection { .. }),
        "{:?}",
        error
    );
    assert_eq!(
        error.kind.to_string(),
        "no server available matching read preference"
    );

    // The primary is unaffected.
    let result = topology
        .insert(&ns(), vec![doc! { "_id": 1 }], None)
        .await
        .unwrap();
    assert_eq!(result.n, 1);
}

#[tokio::test]
async fn abandoned_commands_do_not_leave_their_connection_in_the_pool() {
    let (deployment, topology) = connected_standalone().await;
    topology
        .command(&ns(), doc! { "ping": 1 }, None)
        .await
        .unwrap();
    let opened = deployment.connections_opened(HOST);

    deployment.delay("ping", Duration::from_millis(300));
    let abandoned = tokio::time::timeout(
        Duration::from_millis(20),
        topology.command(&ns(), doc! { "ping": 1 }, None),
    )
    .await;
    assert!(abandoned.is_err());

    deployment.delay("ping", Duration::ZERO);
    let reply = topology
        .command(&ns(), doc! { "ping": 1 }, None)
        .await
        .unwrap();
    assert!(reply.ok);
    assert_eq!(deployment.connections_opened(HOST), opened + 1);
}

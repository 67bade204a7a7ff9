use std::{
    sync::{Arc, Mutex, RwLock},
    time::Duration,
};

use pretty_assertions::assert_eq;

use super::{Command, ConnectionEstablisher, ConnectionPool};
use crate::{
    bson::doc,
    error::ErrorKind,
    options::ServerAddress,
    test::{mock::MockDeployment, options},
};

const HOST: &str = "localhost:27017";

fn pool(deployment: &MockDeployment, max_pool_size: u32) -> ConnectionPool {
    let options = options(&[HOST]);
    let establisher = ConnectionEstablisher::new(
        deployment.connector(),
        &options,
        Arc::new(RwLock::new(None)),
    );
    ConnectionPool::new(ServerAddress::parse(HOST).unwrap(), establisher, max_pool_size)
}

fn ping() -> Command {
    Command::new("ping", "admin", doc! { "ping": 1 })
}

#[tokio::test]
async fn returned_connections_are_reused() {
    let deployment = MockDeployment::new();
    deployment.standalone(HOST);
    let pool = pool(&deployment, 2);

    let connection = pool.check_out().await.unwrap();
    assert_eq!(connection.max_wire_version(), Some(crate::test::mock::MAX_WIRE_VERSION));
    let id = connection.info().id;
    drop(connection);
    assert_eq!(pool.idle_count(), 1);

    let mut connection = pool.check_out().await.unwrap();
    assert_eq!(connection.info().id, id);
    connection.send_command(ping(), None).await.unwrap();
    assert_eq!(deployment.connections_opened(HOST), 1);
}

#[tokio::test]
async fn clearing_drops_connections_of_older_generations() {
    let deployment = MockDeployment::new();
    deployment.standalone(HOST);
    let pool = pool(&deployment, 2);

    let idle = pool.check_out().await.unwrap();
    let in_use = pool.check_out().await.unwrap();
    drop(idle);
    assert_eq!(pool.idle_count(), 1);

    pool.clear(None);
    assert_eq!(pool.generation(), 1);
    assert_eq!(pool.idle_count(), 0);

    // A connection checked out before the clear is not returned either.
    drop(in_use);
    assert_eq!(pool.idle_count(), 0);

    pool.check_out().await.unwrap();
    assert_eq!(deployment.connections_opened(HOST), 3);
}

#[tokio::test]
async fn waiting_checkouts_are_served_in_order() {
    let deployment = MockDeployment::new();
    deployment.standalone(HOST);
    let pool = pool(&deployment, 1);
    let order = Arc::new(Mutex::new(Vec::new()));

    let held = pool.check_out().await.unwrap();
    assert_eq!(pool.available_permits(), 0);

    let mut waiters = Vec::new();
    for name in ["first", "second", "third"] {
        let pool = pool.clone();
        let order = order.clone();
        waiters.push(tokio::spawn(async move {
            let connection = pool.check_out().await.unwrap();
            order.lock().unwrap().push(name);
            tokio::time::sleep(Duration::from_millis(5)).await;
            drop(connection);
        }));
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    drop(held);
    for waiter in waiters {
        waiter.await.unwrap();
    }
    assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    assert_eq!(deployment.connections_opened(HOST), 1);
}

#[tokio::test]
async fn discarded_and_errored_connections_are_not_returned() {
    let deployment = MockDeployment::new();
    deployment.standalone(HOST);
    let pool = pool(&deployment, 2);

    pool.check_out().await.unwrap().discard();
    assert_eq!(pool.idle_count(), 0);
    assert_eq!(pool.available_permits(), 2);

    deployment.fail_network("ping", 1);
    let mut connection = pool.check_out().await.unwrap();
    let error = connection.send_command(ping(), None).await.unwrap_err();
    assert!(error.is_network_error());
    drop(connection);
    assert_eq!(pool.idle_count(), 0);
}

#[tokio::test]
async fn closed_pool_rejects_checkouts() {
    let deployment = MockDeployment::new();
    deployment.standalone(HOST);
    let pool = pool(&deployment, 1);

    let held = pool.check_out().await.unwrap();
    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.check_out().await.map(|_| ()) })
    };
    tokio::time::sleep(Duration::from_millis(5)).await;

    pool.close();
    assert!(pool.is_closed());
    let error = waiter.await.unwrap().unwrap_err();
    assert!(
        matches!(*error.kind, ErrorKind::ConnectionPoolCleared { .. }),
        "{:?}",
        error
    );

    drop(held);
    assert_eq!(pool.idle_count(), 0);
    assert!(pool.check_out().await.is_err());
}

#[tokio::test]
async fn unreachable_server_fails_checkout() {
    let deployment = MockDeployment::new();
    let pool = pool(&deployment, 1);

    let error = pool.check_out().await.unwrap_err();
    assert!(error.is_network_error(), "{:?}", error);
    // The failed attempt gave its slot back.
    assert_eq!(pool.available_permits(), 1);
}

#[tokio::test]
async fn connections_abandoned_mid_exchange_are_not_returned() {
    let deployment = MockDeployment::new();
    deployment.standalone(HOST);
    deployment.delay("ping", Duration::from_millis(300));
    let pool = pool(&deployment, 1);

    let mut connection = pool.check_out().await.unwrap();
    let abandoned =
        tokio::time::timeout(Duration::from_millis(20), connection.send_command(ping(), None))
            .await;
    assert!(abandoned.is_err());
    assert!(!connection.is_reusable());

    drop(connection);
    assert_eq!(pool.idle_count(), 0);
    let _replacement = pool.check_out().await.unwrap();
    assert_eq!(deployment.connections_opened(HOST), 2);
}

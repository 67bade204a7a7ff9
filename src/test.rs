
use std::time::Duration;

use crate::options::{ClientOptions, ServerAddress};

/// Options for a topology over `hosts`, with monitoring fast enough for tests.
pub(crate) fn options(hosts: &[&str]) -> ClientOptions {
    ClientOptions::builder()
        .hosts(
            hosts
                .iter()
                .map(|host| ServerAddress::parse(host).unwrap())
                .collect::<Vec<_>>(),
        )
        .heartbeat_freq(Duration::from_millis(50))
        .reconnect_interval(Duration::from_millis(20))
        .connect_timeout(Duration::from_secs(2))
        .build()
}

/// Polls `condition` until it holds, failing the test after two seconds.
pub(crate) async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

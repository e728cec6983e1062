use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use vaktpost_core::events::{Direction, FlowRecord, Protocol, Severity};
use vaktpost_core::policy::{Policy, PolicyDirection};
use vaktpost_core::sink::{JsonlLogSink, LogQuery, LogSink};
use vaktpost_core::store::MemoryPolicyStore;
use vaktpost_core::time::TimestampParser;
use vaktpost_engine::VerdictService;
use vaktpost_transport::{TransportClient, TransportError, TransportServer};

const WIRE_TIME: &str = "2024-05-01 10:00:00.25 +0000 UTC";

fn record(source: &str, port: &str, time: &str) -> FlowRecord {
    FlowRecord::new(time, Direction::Incoming, source, "192.168.1.10", port, Protocol::Tcp)
}

#[tokio::test]
async fn classifies_persists_and_survives_bad_records() {
    let dir = tempfile::tempdir().unwrap();
    let store = MemoryPolicyStore::new(vec![Policy::new(1, "ssh", PolicyDirection::Ingress)
        .with_ip("10.0.0.5")
        .with_port("22")]);
    let service = VerdictService::new(
        Arc::new(store),
        Arc::new(JsonlLogSink::new(dir.path())),
        TimestampParser::default(),
    );

    let server = TransportServer::bind("127.0.0.1:0").await.unwrap();
    let addr = server.local_addr().unwrap().to_string();
    let (stop, stopped) = oneshot::channel::<()>();
    let serving = tokio::spawn(server.serve(Arc::new(service), async {
        let _ = stopped.await;
    }));

    let mut client = TransportClient::connect(&addr, Duration::from_secs(2))
        .await
        .unwrap();

    let high = client.classify(&record("10.0.0.5", "22", WIRE_TIME)).await.unwrap();
    assert_eq!(high.severity(), Severity::High);

    let rejected = client.classify(&record("10.0.0.5", "22", "not a time")).await;
    assert!(matches!(rejected, Err(TransportError::Rejected(_))));

    let low = client.classify(&record("8.8.8.8", "443", WIRE_TIME)).await.unwrap();
    assert_eq!(low.severity(), Severity::Low);

    let _ = stop.send(());
    serving.await.unwrap().unwrap();

    let reader = JsonlLogSink::new(dir.path());
    let all = reader.query(&LogQuery::new()).await.unwrap();
    assert_eq!(all.len(), 2);

    let matched = reader.query(&LogQuery::new().source("10.0.0.5")).await.unwrap();
    assert_eq!(matched.len(), 1);
    assert_eq!(matched[0].severity, Severity::High);
    assert_eq!(matched[0].port, "22");
}

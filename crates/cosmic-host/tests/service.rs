mod helpers;

use cosmic_host::{ActionOutcome, BlockError, BlockService};
use helpers::{Harness, Queue, after_commit, begin, commit, end, init, prices};

#[tokio::test]
async fn client_drives_blocks_through_the_service_task() {
    let mut h = Harness::new();
    h.queue(Queue::Normal, "via-service", 0);
    let deliveries = h.deliveries.clone();
    let (client, task) = BlockService::spawn(h.manager);

    assert_eq!(
        client.blocking_send(init(true, 1)).await.unwrap(),
        ActionOutcome::Initialized
    );
    for action in [
        begin(1, 2, &prices(1_000_000)),
        end(1, 2),
        commit(1, 2),
        after_commit(1, 2),
    ] {
        assert_eq!(client.blocking_send(action).await.unwrap(), ActionOutcome::Done);
    }
    assert_eq!(*deliveries.lock().unwrap(), ["via-service"]);

    client.shutdown().await.unwrap();
    let manager = task.await.unwrap();
    assert_eq!(manager.saved_height(), 1);

    let err = client.blocking_send(begin(2, 3, &prices(1))).await.unwrap_err();
    assert!(matches!(err, BlockError::ServiceStopped));
}

#[tokio::test]
async fn clones_share_one_manager() {
    let h = Harness::new();
    let (client, task) = BlockService::spawn(h.manager);
    let other = client.clone();

    client.blocking_send(init(true, 1)).await.unwrap();
    other.blocking_send(begin(1, 2, &prices(1_000))).await.unwrap();
    let err = client.blocking_send(begin(1, 2, &prices(1_000))).await.unwrap_err();
    assert!(err.decoherence().is_some());

    drop(client);
    drop(other);
    let manager = task.await.unwrap();
    assert!(manager.decoherence().is_some());
}

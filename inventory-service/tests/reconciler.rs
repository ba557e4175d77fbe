//! The reconciler driven by a stream worker over the in-memory log.

use inventory_service::memory::MemoryInventoryStore;
use inventory_service::reconciler::InventoryReconciler;
use inventory_service::store::{InventoryStore, Reservation};
use shared::{
    Backoff, ConsumerState, EventLog, InventoryStatus, InventoryUpdated, MemoryCursorStore,
    MemoryEventLog, OrderLine, OrderPlaced, StreamWorker, WorkerConfig, INVENTORY_STREAM,
    ORDERS_STREAM,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const CONSUMER: &str = "inventory-reconciler";

fn config() -> WorkerConfig {
    WorkerConfig {
        block: Duration::from_millis(20),
        backoff: Backoff {
            base: Duration::from_millis(5),
            max: Duration::from_millis(20),
            max_attempts: None,
        },
        ..WorkerConfig::new(CONSUMER, ORDERS_STREAM)
    }
}

fn order(order_id: i32, lines: &[(i32, i32)]) -> OrderPlaced {
    OrderPlaced {
        order_id,
        products: lines
            .iter()
            .map(|&(product_id, quantity)| OrderLine {
                product_id,
                price: "5.00".to_string(),
                quantity,
            })
            .collect(),
    }
}

async fn place(log: &MemoryEventLog, event: OrderPlaced) {
    log.append(ORDERS_STREAM, &event.to_fields().unwrap())
        .await
        .unwrap();
}

fn outcomes(log: &MemoryEventLog) -> Vec<(i32, InventoryStatus)> {
    log.records(INVENTORY_STREAM)
        .iter()
        .map(|record| {
            let update = InventoryUpdated::from_fields(&record.fields).unwrap();
            (update.order_id, update.status)
        })
        .collect()
}

async fn wait_for_outcomes(log: &MemoryEventLog, count: usize) {
    for _ in 0..300 {
        if log.records(INVENTORY_STREAM).len() >= count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("expected {count} outcomes, got {:?}", outcomes(log));
}

struct Running {
    shutdown: CancellationToken,
    task: JoinHandle<Result<(), shared::WorkerError>>,
    state: tokio::sync::watch::Receiver<ConsumerState>,
}

fn start(store: &MemoryInventoryStore, log: &MemoryEventLog, cursors: &MemoryCursorStore) -> Running {
    let reconciler = InventoryReconciler::new(Arc::new(store.clone()), Arc::new(log.clone()));
    let worker = StreamWorker::new(config(), Arc::new(log.clone()), Arc::new(cursors.clone()), reconciler);
    let state = worker.subscribe();
    let shutdown = CancellationToken::new();
    let task = tokio::spawn(worker.run(shutdown.clone()));
    Running {
        shutdown,
        task,
        state,
    }
}

impl Running {
    async fn listening(&mut self) {
        self.state
            .wait_for(|s| *s == ConsumerState::Listening)
            .await
            .unwrap();
    }

    async fn stop(self) {
        self.shutdown.cancel();
        self.task.await.unwrap().unwrap();
    }
}

#[tokio::test]
async fn orders_resolve_in_log_order() {
    let store = MemoryInventoryStore::with_stock(&[(1, 5), (2, 1)]);
    let log = MemoryEventLog::new();
    let cursors = MemoryCursorStore::new();
    let mut running = start(&store, &log, &cursors);
    running.listening().await;

    place(&log, order(1, &[(1, 3)])).await;
    place(&log, order(2, &[(1, 3)])).await;
    place(&log, order(3, &[(1, 2), (2, 1)])).await;
    place(&log, order(4, &[(2, 1)])).await;

    wait_for_outcomes(&log, 4).await;
    assert_eq!(
        outcomes(&log),
        vec![
            (1, InventoryStatus::Completed),
            (2, InventoryStatus::Failed),
            (3, InventoryStatus::Completed),
            (4, InventoryStatus::Failed),
        ]
    );
    assert_eq!(store.quantity(1), Some(0));
    assert_eq!(store.quantity(2), Some(0));

    running.stop().await;
}

#[tokio::test]
async fn resumes_after_restart_without_reprocessing() {
    let store = MemoryInventoryStore::with_stock(&[(1, 10)]);
    let log = MemoryEventLog::new();
    let cursors = MemoryCursorStore::new();

    let mut first = start(&store, &log, &cursors);
    first.listening().await;
    place(&log, order(1, &[(1, 1)])).await;
    wait_for_outcomes(&log, 1).await;
    first.stop().await;

    // Appended while nobody is consuming.
    place(&log, order(2, &[(1, 2)])).await;

    let second = start(&store, &log, &cursors);
    wait_for_outcomes(&log, 2).await;
    assert_eq!(
        outcomes(&log),
        vec![(1, InventoryStatus::Completed), (2, InventoryStatus::Completed)]
    );
    assert_eq!(store.quantity(1), Some(7));

    second.stop().await;
}

#[tokio::test]
async fn reconciler_waits_out_a_log_outage() {
    let store = MemoryInventoryStore::with_stock(&[(1, 5)]);
    let log = MemoryEventLog::new();
    let cursors = MemoryCursorStore::new();
    place(&log, order(1, &[(1, 1)])).await;
    log.set_available(false);

    let mut running = start(&store, &log, &cursors);
    running
        .state
        .wait_for(|s| matches!(s, ConsumerState::Reconnecting { attempt } if *attempt >= 2))
        .await
        .unwrap();
    assert!(outcomes(&log).is_empty());

    // The order service flushes its outbox as soon as the log is back,
    // possibly before the reconciler's next attempt.
    log.set_available(true);
    place(&log, order(2, &[(1, 3)])).await;

    wait_for_outcomes(&log, 2).await;
    assert_eq!(
        outcomes(&log),
        vec![(1, InventoryStatus::Completed), (2, InventoryStatus::Completed)]
    );
    assert_eq!(store.quantity(1), Some(1));

    running.stop().await;
}

#[tokio::test]
async fn replay_after_an_outage_does_not_reserve_twice() {
    let store = MemoryInventoryStore::with_stock(&[(1, 5)]);
    let log = MemoryEventLog::new();
    let cursors = MemoryCursorStore::new();

    // Order 1 was reconciled by an earlier process that never saved a cursor.
    store.reserve(1, &order(1, &[(1, 2)]).products).await.unwrap();
    place(&log, order(1, &[(1, 2)])).await;
    log.set_available(false);

    let mut running = start(&store, &log, &cursors);
    running
        .state
        .wait_for(|s| matches!(s, ConsumerState::Reconnecting { .. }))
        .await
        .unwrap();
    log.set_available(true);

    wait_for_outcomes(&log, 1).await;
    assert_eq!(outcomes(&log), vec![(1, InventoryStatus::Completed)]);
    assert_eq!(store.quantity(1), Some(3));

    running.stop().await;
}

#[tokio::test]
async fn concurrent_reservations_never_oversell() {
    let store = MemoryInventoryStore::with_stock(&[(1, 10)]);

    let tasks: Vec<_> = (1..=25)
        .map(|order_id| {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .reserve(order_id, &order(order_id, &[(1, 1)]).products)
                    .await
                    .unwrap()
            })
        })
        .collect();

    let mut reserved = 0;
    for task in tasks {
        if task.await.unwrap() == Reservation::Reserved {
            reserved += 1;
        }
    }
    assert_eq!(reserved, 10);
    assert_eq!(store.quantity(1), Some(0));
}

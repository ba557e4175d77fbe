//! PostgreSQL integration tests for the inventory store.
//!
//! They start a container, so they are ignored by default. Run with:
//!
//! ```bash
//! cargo test -p inventory-service --test postgres -- --ignored --test-threads=1
//! ```

use bigdecimal::BigDecimal;
use diesel_async::RunQueryDsl;
use diesel_migrations::{embed_migrations, EmbeddedMigrations};
use inventory_service::models::Product;
use inventory_service::schema::products;
use inventory_service::store::{InventoryStore, PgInventoryStore, Reservation};
use shared::{InventoryStatus, OrderLine};
use std::sync::Arc;
use testcontainers::{runners::AsyncRunner, ContainerAsync};
use testcontainers_modules::postgres::Postgres;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

struct TestDb {
    #[allow(dead_code)] // Container must stay alive for the test
    container: ContainerAsync<Postgres>,
    store: PgInventoryStore,
}

async fn start(stock: &[(i32, i32)]) -> TestDb {
    let container = Postgres::default().start().await.unwrap();
    let host = container.get_host().await.unwrap();
    let port = container.get_host_port_ipv4(5432).await.unwrap();
    let url = format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

    shared::db::run_migrations(&url, MIGRATIONS).await.unwrap();
    let pool = shared::db::build_pool(&url, 10).await.unwrap();

    let rows: Vec<Product> = stock
        .iter()
        .map(|&(id, quantity)| Product {
            id,
            name: format!("product-{}", id),
            price: BigDecimal::from(10),
            quantity,
        })
        .collect();
    let mut conn = pool.get().await.unwrap();
    diesel::insert_into(products::table)
        .values(&rows)
        .execute(&mut conn)
        .await
        .unwrap();
    drop(conn);

    TestDb {
        container,
        store: PgInventoryStore::new(pool),
    }
}

fn lines(items: &[(i32, i32)]) -> Vec<OrderLine> {
    items
        .iter()
        .map(|&(product_id, quantity)| OrderLine {
            product_id,
            price: "10.00".to_string(),
            quantity,
        })
        .collect()
}

async fn quantity(store: &PgInventoryStore, product_id: i32) -> i32 {
    store.stock(product_id).await.unwrap().unwrap().quantity
}

#[tokio::test]
#[ignore = "requires docker"]
async fn guarded_decrement_is_all_or_nothing() {
    let db = start(&[(1, 5), (2, 2)]).await;

    // Enough stock.
    assert_eq!(db.store.reserve(1, &lines(&[(1, 3)])).await.unwrap(), Reservation::Reserved);
    assert_eq!(quantity(&db.store, 1).await, 2);

    // Not enough stock.
    assert_eq!(
        db.store.reserve(2, &lines(&[(2, 3)])).await.unwrap(),
        Reservation::Rejected {
            product_id: 2,
            requested: 3
        }
    );
    assert_eq!(quantity(&db.store, 2).await, 2);

    // First line fits, second does not: the first is rolled back.
    assert_eq!(
        db.store.reserve(3, &lines(&[(1, 1), (2, 5)])).await.unwrap(),
        Reservation::Rejected {
            product_id: 2,
            requested: 5
        }
    );
    assert_eq!(quantity(&db.store, 1).await, 2);
    assert_eq!(quantity(&db.store, 2).await, 2);
}

#[tokio::test]
#[ignore = "requires docker"]
async fn processed_orders_are_not_reserved_twice() {
    let db = start(&[(1, 5)]).await;

    assert_eq!(db.store.reserve(1, &lines(&[(1, 2)])).await.unwrap(), Reservation::Reserved);
    assert_eq!(
        db.store.reserve(1, &lines(&[(1, 2)])).await.unwrap(),
        Reservation::AlreadyProcessed(InventoryStatus::Completed)
    );
    assert_eq!(quantity(&db.store, 1).await, 3);

    db.store.reserve(2, &lines(&[(1, 9)])).await.unwrap();
    assert_eq!(
        db.store.reserve(2, &lines(&[(1, 1)])).await.unwrap(),
        Reservation::AlreadyProcessed(InventoryStatus::Failed)
    );

    db.store.record_failure(3).await.unwrap();
    assert_eq!(
        db.store.reserve(3, &lines(&[(1, 1)])).await.unwrap(),
        Reservation::AlreadyProcessed(InventoryStatus::Failed)
    );
    assert_eq!(quantity(&db.store, 1).await, 3);
}

#[tokio::test]
#[ignore = "requires docker"]
async fn concurrent_orders_never_oversell() {
    let db = start(&[(1, 10)]).await;
    let store = Arc::new(db.store.clone());

    let tasks: Vec<_> = (1..=30)
        .map(|order_id| {
            let store = store.clone();
            tokio::spawn(async move { store.reserve(order_id, &lines(&[(1, 1)])).await.unwrap() })
        })
        .collect();

    let mut reserved = 0;
    for task in tasks {
        if task.await.unwrap() == Reservation::Reserved {
            reserved += 1;
        }
    }

    assert_eq!(reserved, 10);
    assert_eq!(quantity(&db.store, 1).await, 0);
}

#[tokio::test]
#[ignore = "requires docker"]
async fn concurrent_deliveries_of_one_order_reserve_once() {
    let db = start(&[(1, 10)]).await;
    let store = Arc::new(db.store.clone());

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let store = store.clone();
            tokio::spawn(async move { store.reserve(7, &lines(&[(1, 3)])).await.unwrap() })
        })
        .collect();

    let mut outcomes = Vec::new();
    for task in tasks {
        outcomes.push(task.await.unwrap());
    }

    assert_eq!(outcomes.iter().filter(|r| **r == Reservation::Reserved).count(), 1);
    assert!(outcomes
        .iter()
        .all(|r| matches!(r, Reservation::Reserved | Reservation::AlreadyProcessed(InventoryStatus::Completed))));
    assert_eq!(quantity(&db.store, 1).await, 7);
}

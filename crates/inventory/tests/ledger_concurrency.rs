//! Contention tests for the inventory ledger over the in-memory store.

use common::{Money, ProductId};
use domain::{InventoryLogEntry, Product};
use inventory::{InventoryLedger, LedgerError};
use store::InMemoryStore;

async fn ledger_with_stock(quantity: u32) -> InventoryLedger<InMemoryStore> {
    let ledger = InventoryLedger::new(InMemoryStore::new());
    let product = Product::new(ProductId::new(1), "SKU-001", "Widget", Money::from_cents(250))
        .unwrap();
    ledger.create_product(&product, quantity).await.unwrap();
    ledger
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_reservations_never_oversell() {
    let ledger = ledger_with_stock(10).await;

    let mut handles = Vec::new();
    for _ in 0..25 {
        let ledger = ledger.clone();
        handles.push(tokio::spawn(async move {
            ledger.reserve(ProductId::new(1), 1).await
        }));
    }

    let mut succeeded = 0;
    let mut refused = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(LedgerError::InsufficientStock { .. }) => refused += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(succeeded, 10);
    assert_eq!(refused, 15);

    let snapshot = ledger.snapshot(ProductId::new(1)).await.unwrap();
    assert_eq!(snapshot.reserved_quantity(), 10);
    assert_eq!(snapshot.quantity(), 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn three_concurrent_reservations_of_four_from_ten() {
    let ledger = ledger_with_stock(10).await;

    let attempts: Vec<_> = (0..3)
        .map(|_| {
            let ledger = ledger.clone();
            tokio::spawn(async move { ledger.reserve(ProductId::new(1), 4).await })
        })
        .collect();

    let mut results = Vec::new();
    for attempt in attempts {
        results.push(attempt.await.unwrap());
    }

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 2);
    assert!(results.iter().any(|r| matches!(
        r,
        Err(LedgerError::InsufficientStock {
            available: 2,
            requested: 4,
            ..
        })
    )));
    assert_eq!(
        ledger.snapshot(ProductId::new(1)).await.unwrap().reserved_quantity(),
        8
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn mixed_operations_keep_counters_and_log_consistent() {
    let ledger = ledger_with_stock(20).await;

    let mut handles = Vec::new();
    for i in 0..40u32 {
        let ledger = ledger.clone();
        handles.push(tokio::spawn(async move {
            let product_id = ProductId::new(1);
            match i % 4 {
                0 => ledger.reserve(product_id, 3).await.map(|_| ()),
                1 => ledger.release(product_id, 2).await.map(|_| ()),
                2 => ledger.commit_reduction(product_id, 1).await.map(|_| ()),
                _ => ledger.restock(product_id, 1).await.map(|_| ()),
            }
        }));
    }
    for handle in handles {
        let _ = handle.await.unwrap();
    }

    let snapshot = ledger.snapshot(ProductId::new(1)).await.unwrap();
    assert!(snapshot.reserved_quantity() <= snapshot.quantity());

    let log = ledger.log(ProductId::new(1)).await.unwrap();
    assert!(log.iter().all(InventoryLogEntry::is_consistent));

    // Replaying the audit trail reproduces the final counters.
    let replay = |counter| {
        log.iter()
            .filter(|entry| entry.counter == counter)
            .map(|entry| entry.change)
            .sum::<i64>()
    };
    assert_eq!(
        replay(domain::StockCounter::Quantity),
        i64::from(snapshot.quantity())
    );
    assert_eq!(
        replay(domain::StockCounter::Reserved),
        i64::from(snapshot.reserved_quantity())
    );
}

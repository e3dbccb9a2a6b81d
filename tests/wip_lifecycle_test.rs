mod common;

use assert_matches::assert_matches;
use batchline::{
    entities::wip_batch::BatchStatus,
    errors::ServiceError,
    events::Event,
    services::{inventory::NewInventoryItem, wip::AllocationLine},
};
use common::{raw, TestApp};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tempfile::TempDir;

fn line(item_id: i32, quantity: Decimal) -> AllocationLine {
    AllocationLine { item_id, quantity }
}

#[tokio::test]
async fn completion_consumes_reservations_and_stocks_jars() {
    let mut app = TestApp::new().await;
    let sugar = app.item("Sugar", "grams", dec!(50)).await;
    let (_, product, location) = app
        .product_line("JAR-1", vec![raw(sugar, dec!(5))], Some(dec!(12)))
        .await;
    let wip = &app.services.wip;

    let batch = wip.start_product_batch(product, location, Some(dec!(24))).await.unwrap();
    wip.allocate(batch.id, sugar, dec!(5)).await.unwrap();

    let reserved = app.item_state(sugar).await;
    assert_eq!(reserved.quantity_on_hand, dec!(50));
    assert_eq!(reserved.quantity_allocated, dec!(5));

    let completed = wip.complete(batch.id, dec!(22)).await.unwrap();
    assert_eq!(completed.status, BatchStatus::Completed);
    assert_eq!(completed.actual_yield, Some(dec!(22)));
    assert_eq!(completed.actual_yield_unit.as_deref(), Some("jars"));
    assert!(completed.completed_at.is_some());

    let consumed = app.item_state(sugar).await;
    assert_eq!(consumed.quantity_on_hand, dec!(45));
    assert_eq!(consumed.quantity_allocated, dec!(0));

    let log = app.adjustments(sugar).await;
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].adjustment_quantity, dec!(-5));
    assert_eq!(log[0].new_quantity_on_hand, dec!(45));
    assert_eq!(log[0].reason, format!("WIP Batch #{} Completed", batch.id));
    assert_eq!(log[0].wip_batch_id, Some(batch.id));

    assert_eq!(
        app.services.stock.location_stock(product, location).await.unwrap(),
        dec!(22)
    );

    let mut saw_completion = false;
    while let Ok(event) = app.events.try_recv() {
        if let Event::BatchCompleted { batch_id, actual_yield, .. } = event {
            assert_eq!(batch_id, batch.id);
            assert_eq!(actual_yield, dec!(22));
            saw_completion = true;
        }
    }
    assert!(saw_completion);
}

#[tokio::test]
async fn intermediate_completion_credits_linked_item() {
    let app = TestApp::new().await;
    let sugar = app.item("Sugar", "grams", dec!(1000)).await;
    let caramel_recipe = app
        .recipe("Caramel", Some(dec!(500)), Some("grams"), vec![raw(sugar, dec!(500))])
        .await;
    let caramel = app
        .services
        .inventory
        .create_item(NewInventoryItem {
            name: "Caramel".into(),
            unit: "grams".into(),
            quantity_on_hand: dec!(0),
            linked_recipe_id: Some(caramel_recipe),
        })
        .await
        .unwrap();

    let wip = &app.services.wip;
    let batch = wip.start_intermediate_batch(caramel.id, None).await.unwrap();
    assert_eq!(batch.recipe_id, caramel_recipe);
    wip.allocate(batch.id, sugar, dec!(500)).await.unwrap();

    let completed = wip.complete(batch.id, dec!(480)).await.unwrap();
    assert_eq!(completed.actual_yield_unit.as_deref(), Some("grams"));

    let output = app.item_state(caramel.id).await;
    assert_eq!(output.quantity_on_hand, dec!(480));
    let log = app.adjustments(caramel.id).await;
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].reason, format!("WIP Batch #{} Completed (Yield)", batch.id));
    assert_eq!(log[0].adjustment_quantity, dec!(480));
}

#[tokio::test]
async fn unlinked_item_cannot_start_intermediate_batch() {
    let app = TestApp::new().await;
    let sugar = app.item("Sugar", "grams", dec!(10)).await;
    assert_matches!(
        app.services.wip.start_intermediate_batch(sugar, None).await,
        Err(ServiceError::ValidationError(_))
    );
}

#[tokio::test]
async fn linking_an_item_enables_intermediate_batches() {
    let app = TestApp::new().await;
    let sugar = app.item("Sugar", "grams", dec!(500)).await;
    let syrup = app.item("Syrup", "mLs", dec!(0)).await;
    let recipe = app
        .recipe("Simple Syrup", Some(dec!(400)), Some("mLs"), vec![raw(sugar, dec!(250))])
        .await;
    let inventory = &app.services.inventory;

    assert_matches!(
        inventory.link_recipe(syrup, Some(404)).await,
        Err(ServiceError::RecipeNotFound(404))
    );

    let linked = inventory.link_recipe(syrup, Some(recipe)).await.unwrap();
    assert_eq!(linked.linked_recipe_id, Some(recipe));
    let batch = app
        .services
        .wip
        .start_intermediate_batch(syrup, Some(dec!(400)))
        .await
        .unwrap();
    assert_eq!(batch.recipe_id, recipe);

    let unlinked = inventory.link_recipe(syrup, None).await.unwrap();
    assert_eq!(unlinked.linked_recipe_id, None);
    assert_matches!(
        app.services.wip.start_intermediate_batch(syrup, None).await,
        Err(ServiceError::ValidationError(_))
    );
}

#[tokio::test]
async fn batch_without_allocations_cannot_complete() {
    let app = TestApp::new().await;
    let sugar = app.item("Sugar", "grams", dec!(10)).await;
    let (_, product, location) = app
        .product_line("EMPTY-1", vec![raw(sugar, dec!(5))], Some(dec!(12)))
        .await;
    let wip = &app.services.wip;
    let batch = wip.start_product_batch(product, location, None).await.unwrap();

    assert_matches!(
        wip.complete(batch.id, dec!(12)).await,
        Err(ServiceError::EmptyBatchCompletion(id)) if id == batch.id
    );
    assert!(wip.get_batch(batch.id).await.unwrap().is_in_progress());
    assert_eq!(
        app.services.stock.location_stock(product, location).await.unwrap(),
        dec!(0)
    );
}

#[tokio::test]
async fn deleting_a_batch_releases_reservations() {
    let app = TestApp::new().await;
    let butter = app.item("Butter", "grams", dec!(20)).await;
    let (_, product, location) = app
        .product_line("DEL-1", vec![raw(butter, dec!(3))], Some(dec!(12)))
        .await;
    let wip = &app.services.wip;
    let batch = wip.start_product_batch(product, location, None).await.unwrap();
    wip.allocate(batch.id, butter, dec!(3)).await.unwrap();

    wip.delete_batch(batch.id).await.unwrap();

    let state = app.item_state(butter).await;
    assert_eq!(state.quantity_allocated, dec!(0));
    assert_eq!(state.quantity_on_hand, dec!(20));
    assert!(app.adjustments(butter).await.is_empty());
    assert_matches!(wip.get_batch(batch.id).await, Err(ServiceError::BatchNotFound(_)));
    assert_matches!(wip.allocations(batch.id).await, Err(ServiceError::BatchNotFound(_)));
}

#[tokio::test]
async fn completed_batches_are_immutable() {
    let app = TestApp::new().await;
    let sugar = app.item("Sugar", "grams", dec!(100)).await;
    let (_, product, location) = app
        .product_line("DONE-1", vec![raw(sugar, dec!(5))], Some(dec!(12)))
        .await;
    let wip = &app.services.wip;
    let batch = wip.start_product_batch(product, location, None).await.unwrap();
    wip.allocate(batch.id, sugar, dec!(5)).await.unwrap();
    wip.complete(batch.id, dec!(12)).await.unwrap();

    assert_matches!(wip.delete_batch(batch.id).await, Err(ServiceError::InvalidStatus(_)));
    assert_matches!(
        wip.allocate(batch.id, sugar, dec!(1)).await,
        Err(ServiceError::InvalidStatus(_))
    );
    assert_matches!(wip.complete(batch.id, dec!(12)).await, Err(ServiceError::InvalidStatus(_)));
    assert_eq!(app.item_state(sugar).await.quantity_allocated, dec!(0));
}

#[tokio::test]
async fn bulk_allocation_is_all_or_nothing() {
    let app = TestApp::new().await;
    let flour = app.item("Flour", "grams", dec!(100)).await;
    let butter = app.item("Butter", "grams", dec!(10)).await;
    let sugar = app.item("Sugar", "grams", dec!(100)).await;
    let (_, product, location) = app
        .product_line(
            "BULK-1",
            vec![raw(flour, dec!(50)), raw(butter, dec!(20)), raw(sugar, dec!(30))],
            Some(dec!(12)),
        )
        .await;
    let wip = &app.services.wip;
    let batch = wip.start_product_batch(product, location, None).await.unwrap();

    let result = wip
        .bulk_allocate(
            batch.id,
            &[line(flour, dec!(50)), line(butter, dec!(20)), line(sugar, dec!(30))],
        )
        .await;

    assert_matches!(
        result,
        Err(ServiceError::InsufficientStock { item_id, requested, available, .. })
            if item_id == butter && requested == dec!(20) && available == dec!(10)
    );
    for item in [flour, butter, sugar] {
        assert_eq!(app.item_state(item).await.quantity_allocated, dec!(0));
    }
    assert!(wip.allocations(batch.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn duplicate_lines_are_checked_together() {
    let app = TestApp::new().await;
    let sugar = app.item("Sugar", "grams", dec!(10)).await;
    let (_, product, location) = app
        .product_line("DUP-1", vec![raw(sugar, dec!(5))], Some(dec!(12)))
        .await;
    let wip = &app.services.wip;
    let batch = wip.start_product_batch(product, location, None).await.unwrap();

    assert_matches!(
        wip.bulk_allocate(batch.id, &[line(sugar, dec!(6)), line(sugar, dec!(6))])
            .await,
        Err(ServiceError::InsufficientStock { .. })
    );

    let rows = wip
        .bulk_allocate(batch.id, &[line(sugar, dec!(4)), line(sugar, dec!(2))])
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].quantity_allocated, dec!(6));
}

#[tokio::test]
async fn repeated_allocations_accumulate() {
    let app = TestApp::new().await;
    let sugar = app.item("Sugar", "grams", dec!(20)).await;
    let (_, product, location) = app
        .product_line("ACC-1", vec![raw(sugar, dec!(5))], Some(dec!(12)))
        .await;
    let wip = &app.services.wip;
    let batch = wip.start_product_batch(product, location, None).await.unwrap();

    wip.allocate(batch.id, sugar, dec!(3)).await.unwrap();
    let row = wip.allocate(batch.id, sugar, dec!(4.5)).await.unwrap();

    assert_eq!(row.quantity_allocated, dec!(7.5));
    assert_eq!(wip.allocations(batch.id).await.unwrap().len(), 1);
    assert_eq!(app.item_state(sugar).await.quantity_allocated, dec!(7.5));
}

#[tokio::test]
async fn non_positive_allocation_is_rejected() {
    let app = TestApp::new().await;
    let sugar = app.item("Sugar", "grams", dec!(20)).await;
    let (_, product, location) = app
        .product_line("NEG-1", vec![raw(sugar, dec!(5))], Some(dec!(12)))
        .await;
    let wip = &app.services.wip;
    let batch = wip.start_product_batch(product, location, None).await.unwrap();

    assert_matches!(
        wip.allocate(batch.id, sugar, dec!(0)).await,
        Err(ServiceError::ValidationError(_))
    );
    assert_matches!(
        wip.allocate(batch.id, sugar, dec!(-1)).await,
        Err(ServiceError::ValidationError(_))
    );
}

#[derive(Debug, Default)]
struct RaceOutcome {
    successes: usize,
    shortages: usize,
    conflicts: usize,
}

/// Allocates `quantity` of the item to every batch at once.
async fn race_allocations(
    app: &TestApp,
    item_id: i32,
    batches: &[i32],
    quantity: Decimal,
) -> RaceOutcome {
    let tasks: Vec<_> = batches
        .iter()
        .map(|&batch_id| {
            let wip = app.services.wip.clone();
            tokio::spawn(async move { wip.allocate(batch_id, item_id, quantity).await })
        })
        .collect();

    let mut outcome = RaceOutcome::default();
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => outcome.successes += 1,
            Err(ServiceError::InsufficientStock { .. }) => outcome.shortages += 1,
            Err(ServiceError::ConcurrencyConflict(_)) => outcome.conflicts += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    outcome
}

async fn start_batches(app: &TestApp, product: i32, location: i32, count: usize) -> Vec<i32> {
    let mut ids = Vec::with_capacity(count);
    for _ in 0..count {
        let batch = app
            .services
            .wip
            .start_product_batch(product, location, None)
            .await
            .unwrap();
        ids.push(batch.id);
    }
    ids
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn overlapping_allocations_on_pooled_sqlite_never_overcommit() {
    let dir = TempDir::new().unwrap();
    let app = TestApp::on_sqlite_file(dir.path(), 4).await;
    let sugar = app.item("Sugar", "grams", dec!(10)).await;
    let (_, product, location) = app
        .product_line("RACE-1", vec![raw(sugar, dec!(3))], Some(dec!(12)))
        .await;
    let batches = start_batches(&app, product, location, 6).await;

    let outcome = race_allocations(&app, sugar, &batches, dec!(3)).await;

    assert_eq!(outcome.successes + outcome.shortages + outcome.conflicts, 6);
    assert!(
        (1..=3).contains(&outcome.successes),
        "10 grams covers at most three allocations of 3, got {outcome:?}"
    );
    let state = app.item_state(sugar).await;
    assert_eq!(
        state.quantity_allocated,
        dec!(3) * Decimal::from(outcome.successes as u32)
    );
    assert_eq!(app.allocated_by_rows(sugar).await, state.quantity_allocated);
    assert!(state.quantity_allocated <= state.quantity_on_hand);
}

// SQLite takes no row locks, so the item lock is only exercised against Postgres.
// Run with: BATCHLINE_TEST_POSTGRES_URL=postgres://... cargo test -- --ignored
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore]
async fn item_row_lock_serializes_allocations_on_postgres() {
    let url = std::env::var("BATCHLINE_TEST_POSTGRES_URL")
        .expect("BATCHLINE_TEST_POSTGRES_URL must point at a Postgres database");
    let app = TestApp::on_database(&url, 8).await;
    let run = chrono::Utc::now().timestamp_micros();
    let sugar = app.item(&format!("Sugar {run}"), "grams", dec!(10)).await;
    let (_, product, location) = app
        .product_line(&format!("RACE-{run}"), vec![raw(sugar, dec!(1))], Some(dec!(12)))
        .await;
    let batches = start_batches(&app, product, location, 20).await;

    let outcome = race_allocations(&app, sugar, &batches, dec!(1)).await;

    assert_eq!(outcome.successes, 10, "{outcome:?}");
    assert_eq!(outcome.shortages, 10, "{outcome:?}");
    assert_eq!(outcome.conflicts, 0, "{outcome:?}");
    let state = app.item_state(sugar).await;
    assert_eq!(state.quantity_allocated, dec!(10));
    assert_eq!(app.allocated_by_rows(sugar).await, dec!(10));
}

#[tokio::test]
async fn batch_requirements_scale_by_target_batches() {
    let app = TestApp::new().await;
    let sugar = app.item("Sugar", "grams", dec!(1000)).await;
    let cream = app.item("Cream", "mLs", dec!(100)).await;
    let (_, product, location) = app
        .product_line(
            "REQ-1",
            vec![raw(sugar, dec!(100)), raw(cream, dec!(50))],
            Some(dec!(12)),
        )
        .await;
    let wip = &app.services.wip;
    let batch = wip.start_product_batch(product, location, Some(dec!(25))).await.unwrap();
    wip.allocate(batch.id, sugar, dec!(120)).await.unwrap();

    let summary = wip.batch_requirements(batch.id).await.unwrap();
    assert_eq!(summary.batches, 3);

    let cream_row = &summary.rows[0];
    assert_eq!(cream_row.item_id, cream);
    assert_eq!(cream_row.needed, dec!(150));
    assert_eq!(cream_row.allocated, dec!(0));
    assert_eq!(cream_row.remaining, dec!(150));
    assert_eq!(cream_row.available, dec!(100));

    let sugar_row = &summary.rows[1];
    assert_eq!(sugar_row.needed, dec!(300));
    assert_eq!(sugar_row.allocated, dec!(120));
    assert_eq!(sugar_row.remaining, dec!(180));
    assert_eq!(sugar_row.available, dec!(880));
}

#[tokio::test]
async fn list_batches_filters_by_status() {
    let app = TestApp::new().await;
    let sugar = app.item("Sugar", "grams", dec!(100)).await;
    let (_, product, location) = app
        .product_line("LIST-1", vec![raw(sugar, dec!(5))], Some(dec!(12)))
        .await;
    let wip = &app.services.wip;
    let open = wip.start_product_batch(product, location, None).await.unwrap();
    let done = wip.start_product_batch(product, location, None).await.unwrap();
    wip.allocate(done.id, sugar, dec!(5)).await.unwrap();
    wip.complete(done.id, dec!(12)).await.unwrap();

    let in_progress = wip.list_batches(Some(BatchStatus::InProgress)).await.unwrap();
    assert_eq!(in_progress.iter().map(|b| b.id).collect::<Vec<_>>(), vec![open.id]);
    assert_eq!(wip.list_batches(None).await.unwrap().len(), 2);
}

mod common;

use chrono::Duration;
use common::{Harness, OPERATOR};
use shift_escrow::application::admin::AdminCommandHandler;
use shift_escrow::application::escrow::ReleaseOutcome;
use shift_escrow::application::scheduler::ReleaseScheduler;
use shift_escrow::domain::actor::Actor;
use shift_escrow::domain::payment::PaymentState;
use shift_escrow::error::EscrowError;
use shift_escrow::infrastructure::providers::simulated::ScriptedPayout;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_releases_pay_once() {
    let h = Harness::new();
    h.enrol_nurse().await;
    let payment = h.escrow(1).await;
    h.engine.force_ready(payment.id, OPERATOR).await.unwrap();

    // Keep the winner inside the provider call while the loser tries.
    h.paypal
        .script(ScriptedPayout::Delay(std::time::Duration::from_millis(100)));

    let first = tokio::spawn({
        let engine = h.engine.clone();
        async move { engine.release(payment.id).await }
    });
    let second = tokio::spawn({
        let engine = h.engine.clone();
        async move { engine.release(payment.id).await }
    });
    let results = [first.await.unwrap(), second.await.unwrap()];

    let released = results
        .iter()
        .filter(|r| matches!(r, Ok(ReleaseOutcome::Released(_))))
        .count();
    let conflicts = results
        .iter()
        .filter(|r| matches!(r, Err(EscrowError::Conflict(_))))
        .count();
    assert_eq!(released, 1);
    assert_eq!(conflicts, 1);

    assert_eq!(h.paypal.payout_calls(), 1);
    assert_eq!(h.paypal.transfers().len(), 1);
    let stored = h.engine.get(payment.id).await.unwrap();
    assert_eq!(stored.state, PaymentState::Released);
    assert_eq!(stored.payout_attempts, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_schedulers_share_the_work() {
    let h = Harness::new();
    h.enrol_nurse().await;
    for shift in 1..=20 {
        h.escrow(shift).await;
    }
    h.clock.advance(Duration::days(3) + Duration::minutes(1));

    let mut handles = Vec::new();
    for _ in 0..4 {
        let scheduler = ReleaseScheduler::new(h.engine.clone(), std::time::Duration::from_secs(1));
        handles.push(tokio::spawn(async move { scheduler.tick().await }));
    }
    let mut released = 0;
    for handle in handles {
        released += handle.await.unwrap().unwrap().released;
    }

    assert_eq!(released, 20);
    assert_eq!(h.paypal.transfers().len(), 20);
    let mut keys: Vec<String> = h
        .paypal
        .transfers()
        .into_iter()
        .map(|t| t.idempotency_key)
        .collect();
    keys.sort();
    keys.dedup();
    assert_eq!(keys.len(), 20);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_force_release_racing_the_scheduler() {
    let h = Harness::new();
    h.enrol_nurse().await;
    let payment = h.escrow(7).await;
    h.clock.advance(Duration::days(3) + Duration::minutes(1));

    let admin = AdminCommandHandler::new(h.engine.clone());
    let scheduler = ReleaseScheduler::new(h.engine.clone(), std::time::Duration::from_secs(1));
    let operator = Actor::admin(OPERATOR);

    let (forced, tick) = tokio::join!(admin.force_release(&operator, payment.id), scheduler.tick());
    tick.unwrap();
    // The admin either released it or found it already taken.
    match forced {
        Ok(outcome) => assert_eq!(outcome.payment().state, PaymentState::Released),
        Err(e) => assert!(
            matches!(e, EscrowError::Conflict(_) | EscrowError::InvalidTransition { .. }),
            "unexpected error: {}",
            e
        ),
    }

    assert_eq!(h.paypal.transfers().len(), 1);
    assert_eq!(
        h.engine.get(payment.id).await.unwrap().state,
        PaymentState::Released
    );
}

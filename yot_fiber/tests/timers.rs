use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use yot_fiber::Scheduler;

fn scheduler() -> Scheduler {
    let _ = env_logger::builder().is_test(true).try_init();
    Scheduler::new().unwrap()
}

#[test]
fn empty_scheduler_returns_immediately() {
    let mut scheduler = scheduler();
    let started = Instant::now();
    scheduler.run().unwrap();
    assert!(started.elapsed() < Duration::from_millis(100));
}

#[test]
fn shorter_sleep_resumes_first_and_sleeps_overlap() {
    let mut scheduler = scheduler();
    let order = Arc::new(Mutex::new(Vec::new()));

    for (name, millis) in [("a", 50), ("b", 10)] {
        let handle = scheduler.handle();
        let order = order.clone();
        scheduler
            .spawn(async move {
                handle
                    .wait_sleep(Duration::from_millis(millis))
                    .await
                    .unwrap();
                order.lock().unwrap().push(name);
            })
            .unwrap();
    }

    let started = Instant::now();
    scheduler.run().unwrap();
    let elapsed = started.elapsed();

    assert_eq!(*order.lock().unwrap(), vec!["b", "a"]);
    assert!(elapsed >= Duration::from_millis(50), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(60 + 250), "{elapsed:?}");
}

#[test]
fn equal_sleeps_resume_in_registration_order() {
    let mut scheduler = scheduler();
    let order = Arc::new(Mutex::new(Vec::new()));

    for id in 0..5 {
        let handle = scheduler.handle();
        let order = order.clone();
        scheduler
            .spawn(async move {
                handle.wait_sleep(Duration::from_millis(5)).await.unwrap();
                order.lock().unwrap().push(id);
            })
            .unwrap();
    }

    scheduler.run().unwrap();
    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
}

#[test]
fn zero_sleep_still_yields_to_the_loop() {
    let mut scheduler = scheduler();
    let order = Arc::new(Mutex::new(Vec::new()));

    let handle = scheduler.handle();
    let log = order.clone();
    scheduler
        .spawn(async move {
            log.lock().unwrap().push("a1");
            handle.wait_sleep(Duration::ZERO).await.unwrap();
            log.lock().unwrap().push("a2");
        })
        .unwrap();

    let log = order.clone();
    scheduler
        .spawn(async move {
            log.lock().unwrap().push("b");
        })
        .unwrap();

    scheduler.run().unwrap();
    assert_eq!(*order.lock().unwrap(), vec!["a1", "b", "a2"]);
}

#[test]
fn fiber_can_sleep_again_after_waking() {
    let mut scheduler = scheduler();
    let handle = scheduler.handle();
    let ticks = Arc::new(Mutex::new(0));

    let counter = ticks.clone();
    scheduler
        .spawn(async move {
            for _ in 0..3 {
                handle.wait_sleep(Duration::from_millis(2)).await.unwrap();
                *counter.lock().unwrap() += 1;
            }
        })
        .unwrap();

    let started = Instant::now();
    scheduler.run().unwrap();
    assert_eq!(*ticks.lock().unwrap(), 3);
    assert!(started.elapsed() >= Duration::from_millis(6));
}

#[test]
fn killing_a_sleeper_lets_run_return() {
    let mut scheduler = scheduler();
    let handle = scheduler.handle();

    let sleeper_handle = handle.clone();
    let sleeper = scheduler
        .spawn(async move {
            sleeper_handle
                .wait_sleep(Duration::from_secs(30))
                .await
                .unwrap();
            panic!("killed fiber resumed");
        })
        .unwrap();

    scheduler
        .spawn(async move {
            handle.wait_sleep(Duration::from_millis(5)).await.unwrap();
            assert!(handle.kill(sleeper).unwrap());
            assert!(!handle.is_alive(sleeper));
            assert!(!handle.kill(sleeper).unwrap());
        })
        .unwrap();

    let started = Instant::now();
    scheduler.run().unwrap();
    assert!(started.elapsed() < Duration::from_secs(5));
}

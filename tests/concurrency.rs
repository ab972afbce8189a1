//! Agents on a real multi-threaded pool, fed from many threads at once

use ensemble::runtime::event::{Event, EventType};
use ensemble::runtime::message;
use ensemble::runtime::role::{NamedRole, RoleRef};
use ensemble::runtime::scheduler::ChainCursor;
use ensemble::{Agent, AgentConfig};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

const INFORM: &str = r#"{"performative":"INFORM","sender":"a","receiver":"b","content":"x"}"#;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .unwrap()
}

fn wait_for(mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    done()
}

#[test]
fn concurrent_senders_are_dispatched_one_step_at_a_time() {
    let runtime = runtime();
    let received = Arc::new(AtomicUsize::new(0));
    let in_flight = Arc::new(AtomicUsize::new(0));
    let overlap = Arc::new(AtomicUsize::new(0));
    let (count, busy, clash) = (received.clone(), in_flight.clone(), overlap.clone());

    let agent = Agent::builder(Arc::new(runtime.handle().clone()))
        .config(AgentConfig {
            max_events_per_step: 8,
            ..AgentConfig::named("sink")
        })
        .on("count", EventType::MessageReceived, move |_, _| {
            if busy.fetch_add(1, Ordering::SeqCst) > 0 {
                clash.fetch_add(1, Ordering::SeqCst);
            }
            count.fetch_add(1, Ordering::SeqCst);
            busy.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        })
        .build();
    agent.start().unwrap();

    let senders: Vec<_> = (0..4)
        .map(|_| {
            let agent = agent.clone();
            thread::spawn(move || {
                for _ in 0..250 {
                    agent.receive_message(INFORM).unwrap();
                }
            })
        })
        .collect();
    for sender in senders {
        sender.join().unwrap();
    }

    assert!(wait_for(|| received.load(Ordering::SeqCst) == 1000));
    assert_eq!(overlap.load(Ordering::SeqCst), 0);
    assert!(wait_for(|| agent.chain_cursor() == ChainCursor::Parked));
    assert_eq!(agent.pending_events(), 0);

    agent.stop().unwrap();
    runtime.shutdown_timeout(Duration::from_secs(1));
}

#[test]
fn concurrent_role_mutation_keeps_registry_consistent() {
    let runtime = runtime();
    let added = Arc::new(AtomicUsize::new(0));
    let removed = Arc::new(AtomicUsize::new(0));
    let (adds, removes) = (added.clone(), removed.clone());

    let agent = Agent::builder(Arc::new(runtime.handle().clone()))
        .on("added", EventType::RoleAdded, move |_, _| {
            adds.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .on("removed", EventType::RoleRemoved, move |_, _| {
            removes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .build();
    agent.start().unwrap();

    let workers: Vec<_> = (0..4)
        .map(|worker| {
            let agent = agent.clone();
            thread::spawn(move || {
                let roles: Vec<RoleRef> = (0..50)
                    .map(|i| RoleRef::new(NamedRole::new(format!("w{worker}-{i}"))))
                    .collect();
                for role in &roles {
                    assert!(agent.roles().add(role.clone()));
                    assert!(!agent.roles().add(role.clone()));
                }
                // Drop every other role in one batch; absent ones are ignored.
                let doomed: Vec<RoleRef> = roles.iter().step_by(2).cloned().collect();
                assert!(agent.roles().remove_all(&doomed));
                assert!(!agent.roles().remove_all(&doomed));
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(agent.roles().len(), 100);
    assert!(wait_for(|| added.load(Ordering::SeqCst) == 200
        && removed.load(Ordering::SeqCst) == 100));

    agent.stop().unwrap();
    runtime.shutdown_timeout(Duration::from_secs(1));
}

#[test]
fn synchronous_fire_overlaps_with_chain_dispatch() {
    let runtime = runtime();
    let received = Arc::new(AtomicUsize::new(0));
    let count = received.clone();

    let agent = Agent::builder(Arc::new(runtime.handle().clone()))
        .on("count", EventType::MessageReceived, move |_, _| {
            count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .build();
    agent.start().unwrap();
    let event = Event::message_received(message::decode(INFORM).unwrap());

    let firing: Vec<_> = (0..2)
        .map(|_| {
            let (agent, event) = (agent.clone(), event.clone());
            thread::spawn(move || {
                for _ in 0..100 {
                    assert!(agent.fire(&event).is_clean());
                }
            })
        })
        .collect();
    let queueing: Vec<_> = (0..2)
        .map(|_| {
            let agent = agent.clone();
            thread::spawn(move || {
                for _ in 0..100 {
                    agent.receive_message(INFORM).unwrap();
                }
            })
        })
        .collect();
    for worker in firing.into_iter().chain(queueing) {
        worker.join().unwrap();
    }

    assert!(wait_for(|| received.load(Ordering::SeqCst) == 400));
    assert!(wait_for(|| agent.pending_events() == 0));

    agent.stop().unwrap();
    runtime.shutdown_timeout(Duration::from_secs(1));
}

// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::sync::{Arc, Barrier};
use std::thread;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use test_log::test;
use tokio::sync::mpsc;

use bodyflow_flow_control::test_util::RecordingRequester;
use bodyflow_flow_control::{
    ByteBudget, ContractViolation, FlowControlGate, GateState, ReadAction, from_fn,
};
use bodyflow_test_util::{assert, assert_eq, let_assert};

fn counting_gate(threshold: usize) -> (FlowControlGate<RecordingRequester>, RecordingRequester) {
    let requester = RecordingRequester::default();
    let gate = FlowControlGate::new(NonZeroUsize::new(threshold).unwrap(), requester.clone());
    (gate, requester)
}

#[test]
fn threshold_walkthrough() {
    let (gate, requester) = counting_gate(100);

    // arrivals of 40, 40, 40
    assert_eq!(gate.on_chunk_arrived(40, false), Ok(ReadAction::RequestedMore));
    assert_eq!(gate.on_chunk_arrived(40, false), Ok(ReadAction::RequestedMore));
    assert_eq!(gate.on_chunk_arrived(40, false), Ok(ReadAction::Paused));
    assert_eq!(gate.buffered_bytes(), 120);
    assert_eq!(gate.state(), GateState::Saturated);
    assert_eq!(requester.requests(), 2);

    // consuming 30 resumes
    assert_eq!(gate.on_chunk_consumed(30), Ok(ReadAction::RequestedMore));
    assert_eq!(gate.buffered_bytes(), 90);
    assert_eq!(gate.state(), GateState::Active);
    assert_eq!(requester.requests(), 3);

    // terminal arrival landing exactly on the threshold
    assert_eq!(gate.on_chunk_arrived(10, true), Ok(ReadAction::Completed));
    assert_eq!(gate.buffered_bytes(), 100);
    assert_eq!(gate.state(), GateState::Completed);
    assert_eq!(requester.requests(), 3);

    // draining a completed stream requests nothing
    assert_eq!(gate.on_chunk_consumed(100), Ok(ReadAction::Completed));
    assert_eq!(gate.buffered_bytes(), 0);
    assert!(gate.is_drained());
    assert_eq!(requester.requests(), 3);
}

#[test]
fn over_consumption_is_reported() {
    let (gate, requester) = counting_gate(100);
    gate.on_chunk_arrived(30, false).unwrap();

    let_assert!(
        Err(ContractViolation::BudgetUnderflow { buffered, delta }) = gate.on_chunk_consumed(50)
    );
    assert_eq!(buffered, 30);
    assert_eq!(delta, -50);
    assert_eq!(gate.buffered_bytes(), 30);
    assert_eq!(requester.requests(), 1);
}

#[test]
fn random_event_sequences_follow_the_decision_rule() {
    const THRESHOLD: i64 = 100;

    for seed in 0..64 {
        let mut rng = StdRng::seed_from_u64(seed);
        let (gate, requester) = counting_gate(THRESHOLD as usize);
        let mut in_flight = VecDeque::new();
        let (mut arrived, mut consumed) = (0usize, 0usize);
        let mut completed = false;

        for _ in 0..200 {
            let before = requester.requests();
            let arrive = !completed && (in_flight.is_empty() || rng.random_bool(0.5));

            let action = if arrive {
                let size: usize = rng.random_range(0..=60);
                let is_terminal = rng.random_bool(0.05);
                in_flight.push_back(size);
                arrived += size;
                completed |= is_terminal;
                gate.on_chunk_arrived(size, is_terminal).unwrap()
            } else if let Some(size) = in_flight.pop_front() {
                consumed += size;
                gate.on_chunk_consumed(size).unwrap()
            } else {
                break;
            };

            let total = (arrived - consumed) as i64;
            assert_eq!(gate.buffered_bytes(), total, "seed {seed}");

            let should_request = !completed && total < THRESHOLD;
            let requested = requester.requests() - before;
            assert_eq!(requested, usize::from(should_request), "seed {seed}");
            assert_eq!(action.requested_more(), should_request, "seed {seed}");
            if completed {
                assert_eq!(action, ReadAction::Completed, "seed {seed}");
                assert_eq!(gate.state(), GateState::Completed, "seed {seed}");
            }
        }
    }
}

#[test]
fn concurrent_producer_and_consumer_conserve_bytes() {
    const CHUNKS: usize = 5_000;

    for _ in 0..8 {
        let (gate, requester) = counting_gate(1024);
        let gate = Arc::new(gate);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let producer = {
            let gate = Arc::clone(&gate);
            thread::spawn(move || {
                let mut arrived = 0;
                for i in 0..CHUNKS {
                    let size = (i % 97) + 1;
                    gate.on_chunk_arrived(size, i == CHUNKS - 1).unwrap();
                    arrived += size;
                    tx.send(size).unwrap();
                }
                arrived
            })
        };
        let consumer = {
            let gate = Arc::clone(&gate);
            thread::spawn(move || {
                let mut consumed = 0;
                // leave every tenth chunk buffered
                for (i, size) in std::iter::from_fn(|| rx.blocking_recv()).enumerate() {
                    if i % 10 != 0 {
                        gate.on_chunk_consumed(size).unwrap();
                        consumed += size;
                    }
                }
                consumed
            })
        };

        let arrived = producer.join().unwrap();
        let consumed = consumer.join().unwrap();
        assert_eq!(gate.buffered_bytes(), (arrived - consumed) as i64);
        assert_eq!(gate.state(), GateState::Completed);

        // the stream completed, draining it never asks for data again
        let before = requester.requests();
        let remaining = gate.buffered_bytes() as usize;
        let_assert!(Ok(ReadAction::Completed) = gate.on_chunk_consumed(remaining));
        assert!(gate.is_drained());
        assert_eq!(requester.requests(), before);
    }
}

#[test]
fn racing_arrival_and_consumption_leave_a_consistent_state() {
    for _ in 0..2_000 {
        let (gate, _requester) = counting_gate(100);
        let gate = Arc::new(gate);
        gate.on_chunk_arrived(90, false).unwrap();
        let barrier = Arc::new(Barrier::new(2));

        let arrival = {
            let (gate, barrier) = (Arc::clone(&gate), Arc::clone(&barrier));
            thread::spawn(move || {
                barrier.wait();
                gate.on_chunk_arrived(30, false).unwrap();
            })
        };
        let consumption = {
            let (gate, barrier) = (Arc::clone(&gate), Arc::clone(&barrier));
            thread::spawn(move || {
                barrier.wait();
                gate.on_chunk_consumed(50).unwrap();
            })
        };
        arrival.join().unwrap();
        consumption.join().unwrap();

        // 120 or 40 in between, but 70 in the end whatever the order
        assert_eq!(gate.buffered_bytes(), 70);
        assert_eq!(gate.state(), GateState::Active);
    }
}

#[test]
fn shared_budget_is_observable_from_outside() {
    let budget = ByteBudget::new();
    let gate = FlowControlGate::with_budget(
        NonZeroUsize::new(10).unwrap(),
        budget.clone(),
        from_fn(|| {}),
    );

    gate.on_chunk_arrived(7, false).unwrap();
    assert_eq!(budget.buffered(), 7);
    gate.on_chunk_consumed(7).unwrap();
    assert_eq!(budget.buffered(), 0);
}

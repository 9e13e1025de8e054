use cdbus::schedule::MessageStatus;
use cdbus::{
    AbandonPolicy, BusSimulation, SimulationConfig, SimulationError, StationEvent, StationOrder, StationState,
    Symbol, TickSnapshot,
};
use std::collections::HashMap;

fn run_ticks(sim: &mut BusSimulation, ticks: u64) -> Vec<TickSnapshot> {
    (0..ticks).map(|_| sim.tick().unwrap()).collect()
}

/// Tick until settled, keeping every snapshot.
fn run_to_completion(sim: &mut BusSimulation, max_ticks: u64) -> Vec<TickSnapshot> {
    let mut snapshots = Vec::new();
    while !sim.is_settled() {
        assert!(sim.current_tick() < max_ticks, "not settled within {} ticks", max_ticks);
        snapshots.push(sim.tick().unwrap());
    }
    snapshots
}

fn events_with_tick(snapshots: &[TickSnapshot]) -> Vec<(u64, StationEvent)> {
    snapshots
        .iter()
        .flat_map(|s| s.events.iter().map(move |e| (s.tick, *e)))
        .collect()
}

/// Two stations four segments apart on a ten-segment bus, both ready at tick 0.
fn two_station_contention(length: u32) -> SimulationConfig {
    SimulationConfig::new(10)
        .with_station(0, 2)
        .with_station(1, 6)
        .with_message(0, 0, length, 'a')
        .with_message(1, 0, length, 'b')
}

#[cfg(test)]
mod single_sender_tests {
    use super::*;

    #[test]
    fn test_lone_sender_at_bus_edge() {
        let config = SimulationConfig::new(10).with_station(0, 0).with_message(0, 0, 3, 'a');
        let mut sim = BusSimulation::new(config).unwrap();
        let snapshots = run_ticks(&mut sim, 13);

        for k in 0..10usize {
            let first_seen = snapshots
                .iter()
                .find(|s| s.symbol_at(k) == Symbol::Data('a'))
                .map(|s| s.tick);
            assert_eq!(first_seen, Some(k as u64), "position {}", k);
        }

        assert!(snapshots.iter().all(|s| !s.has_conflict()));
        assert_eq!(snapshots[1].completed_count, 0);
        assert_eq!(snapshots[2].completed_count, 1);
        assert_eq!(snapshots[2].station(0).unwrap().state, StationState::Idle);
        assert!(snapshots[12].segments.iter().all(|s| s.is_empty()));
        assert!(sim.is_settled());
    }

    #[test]
    fn test_lone_sender_event_sequence() {
        let config = SimulationConfig::new(10).with_station(0, 0).with_message(0, 0, 3, 'a');
        let mut sim = BusSimulation::new(config).unwrap();
        let snapshots = run_ticks(&mut sim, 3);

        assert_eq!(
            events_with_tick(&snapshots),
            vec![
                (0, StationEvent::Claimed { station: 0, message: 0 }),
                (2, StationEvent::Completed { station: 0, message: 0 }),
            ]
        );
    }

    #[test]
    fn test_waiting_for_late_message() {
        let config = SimulationConfig::new(5).with_station(0, 2).with_message(0, 7, 1, 'z');
        let mut sim = BusSimulation::new(config).unwrap();

        let snapshot = sim.run(7).unwrap().unwrap();
        assert_eq!(snapshot.tick, 6);
        assert_eq!(snapshot.pending_count, 1);
        assert_eq!(snapshot.earliest_pending_ready_tick, Some(7));
        assert!(!sim.is_settled());

        let snapshot = sim.tick().unwrap();
        assert_eq!(snapshot.symbol_at(2), Symbol::Data('z'));
        assert_eq!(snapshot.completed_count, 1);
        assert_eq!(snapshot.earliest_pending_ready_tick, None);
    }

    #[test]
    fn test_no_snapshot_before_first_tick() {
        let config = SimulationConfig::new(5).with_station(0, 2).with_message(0, 0, 2, 'k');
        let mut sim = BusSimulation::new(config).unwrap();
        assert_eq!(sim.snapshot(), None);
        assert_eq!(sim.run(0).unwrap(), None);
        assert_eq!(sim.current_tick(), 0);

        let first = sim.tick().unwrap();
        assert_eq!(first.tick, 0);
        assert_eq!(sim.snapshot(), Some(first.clone()));
        assert_eq!(sim.run(0).unwrap(), Some(first));
    }

    #[test]
    fn test_empty_scenario_is_settled_immediately() {
        let config = SimulationConfig::new(5).with_station(0, 2);
        let mut sim = BusSimulation::new(config).unwrap();
        assert_eq!(sim.run_until_settled(10).unwrap(), Some(0));
        assert_eq!(sim.snapshot(), None);
    }
}

#[cfg(test)]
mod contention_tests {
    use super::*;

    #[test]
    fn test_collision_detected_jammed_and_resolved() {
        let mut sim = BusSimulation::new(two_station_contention(6).with_seed(11)).unwrap();
        let snapshots = run_to_completion(&mut sim, 20_000);

        // The waves meet halfway between the stations.
        assert_eq!(snapshots[2].symbol_at(4), Symbol::Conflict);
        assert!(!snapshots[1].has_conflict());

        // The conflict reaches both taps two ticks later.
        let collisions: Vec<_> = snapshots[4]
            .events
            .iter()
            .filter(|e| matches!(e, StationEvent::Collision { .. }))
            .map(|e| e.station())
            .collect();
        assert_eq!(collisions, vec![0, 1]);
        for id in [0, 1] {
            let station = snapshots[4].station(id).unwrap();
            assert_eq!(station.state, StationState::Jamming);
            assert_eq!(station.jam_ticks_remaining, 9);
        }
        assert_eq!(snapshots[4].symbol_at(2), Symbol::Jam);
        assert_eq!(snapshots[4].symbol_at(6), Symbol::Jam);

        for tick in 5..13 {
            for id in [0, 1] {
                assert_eq!(snapshots[tick].station(id).unwrap().state, StationState::Jamming);
            }
        }

        // Ten jam ticks including the first, then one draw each.
        let backoffs: Vec<_> = snapshots[13]
            .events
            .iter()
            .filter_map(|e| match *e {
                StationEvent::BackoffStarted {
                    station,
                    tries,
                    multiplier,
                    ticks,
                    ..
                } => Some((station, tries, multiplier, ticks)),
                _ => None,
            })
            .collect();
        assert_eq!(backoffs.len(), 2);
        for (_, tries, multiplier, ticks) in backoffs {
            assert_eq!(tries, 1);
            assert!(multiplier <= 1);
            assert_eq!(ticks, multiplier * 20);
        }

        let last = snapshots.last().unwrap();
        assert_eq!(last.completed_count, 2);
        assert_eq!(last.failed_count, 0);
        for id in [0, 1] {
            let station = sim.station(id).unwrap();
            assert!(station.stats().collisions >= 1);
            assert_eq!(station.stats().completed, 1);
            assert_eq!(station.state(), StationState::Idle);
        }
    }

    #[test]
    fn test_contention_resolves_for_many_seeds() {
        for seed in 0..25 {
            let mut sim = BusSimulation::new(two_station_contention(6).with_seed(seed)).unwrap();
            let ran = sim.run_until_settled(50_000).unwrap();
            assert!(ran.is_some(), "seed {} did not settle", seed);
            assert_eq!(sim.schedule().completed_count(), 2, "seed {}", seed);
        }
    }

    #[test]
    fn test_short_frames_collide_undetected() {
        // Four frames are over before the conflict travels back to either tap.
        let mut sim = BusSimulation::new(two_station_contention(4)).unwrap();
        let snapshots = run_to_completion(&mut sim, 100);

        assert!(snapshots[2].has_conflict());
        assert_eq!(snapshots[3].completed_count, 2);
        assert!(events_with_tick(&snapshots)
            .iter()
            .all(|(_, e)| !matches!(e, StationEvent::Collision { .. })));
        assert_eq!(sim.backoff_draws(), 0);
    }

    #[test]
    fn test_late_station_defers_to_carrier() {
        let config = SimulationConfig::new(10)
            .with_station(0, 0)
            .with_station(1, 3)
            .with_message(0, 0, 8, 'a')
            .with_message(1, 4, 2, 'b');
        let mut sim = BusSimulation::new(config).unwrap();
        let snapshots = run_to_completion(&mut sim, 100);
        let events = events_with_tick(&snapshots);

        let deferred_ticks: Vec<u64> = events
            .iter()
            .filter(|(_, e)| matches!(e, StationEvent::Deferred { station: 1, .. }))
            .map(|(tick, _)| *tick)
            .collect();
        assert_eq!(deferred_ticks, (4..=10).collect::<Vec<u64>>());

        assert!(events.contains(&(7, StationEvent::Completed { station: 0, message: 0 })));
        assert!(events.contains(&(12, StationEvent::Completed { station: 1, message: 1 })));
        assert_eq!(snapshots[11].symbol_at(3), Symbol::Data('b'));
        assert!(events.iter().all(|(_, e)| !matches!(e, StationEvent::Collision { .. })));
        assert!(snapshots.iter().all(|s| s.station(1).unwrap().tries == 0));
    }

    #[test]
    fn test_no_retries_abandons_after_first_jam() {
        for seed in [1, 2, 3] {
            let config = two_station_contention(6).with_seed(seed).with_max_retries(0);
            let mut sim = BusSimulation::new(config).unwrap();
            let snapshots = run_to_completion(&mut sim, 100);

            let abandoned: Vec<_> = snapshots[13]
                .events
                .iter()
                .filter(|e| matches!(e, StationEvent::Abandoned { status: MessageStatus::Failed, .. }))
                .collect();
            assert_eq!(abandoned.len(), 2);
            for station in &snapshots[13].stations {
                assert_eq!(station.state, StationState::Idle);
                assert_eq!(station.tries, 0);
                assert_eq!(station.active_message, None);
            }
            assert_eq!(sim.backoff_draws(), 0);
            assert_eq!(sim.schedule().failed_count(), 2);
            assert_eq!(sim.schedule().completed_count(), 0);
        }
    }

    #[test]
    fn test_dropped_messages_are_not_counted() {
        let config = two_station_contention(6)
            .with_max_retries(0)
            .with_abandon_policy(AbandonPolicy::Drop);
        let mut sim = BusSimulation::new(config).unwrap();
        sim.run_until_settled(100).unwrap().unwrap();

        let snapshot = sim.snapshot().unwrap();
        assert_eq!(snapshot.failed_count, 0);
        assert_eq!(snapshot.completed_count, 0);
        assert_eq!(snapshot.pending_count, 0);
        assert_eq!(sim.schedule().stats().total_dropped, 2);
    }

    #[test]
    fn test_single_retry_settles_either_way() {
        for seed in 0..20 {
            let config = two_station_contention(6).with_seed(seed).with_max_retries(1);
            let mut sim = BusSimulation::new(config).unwrap();
            let snapshots = run_to_completion(&mut sim, 1_000);

            let schedule = sim.schedule();
            assert_eq!(schedule.completed_count() + schedule.failed_count(), 2);
            for (_, event) in events_with_tick(&snapshots) {
                if let StationEvent::BackoffStarted { tries, .. } = event {
                    assert_eq!(tries, 1);
                }
            }
        }
    }
}

#[cfg(test)]
mod property_tests {
    use super::*;

    /// Three stations with two long messages each keep the bus busy.
    fn crowded(seed: u64) -> SimulationConfig {
        SimulationConfig::new(10)
            .with_station(0, 1)
            .with_station(1, 5)
            .with_station(2, 8)
            .with_message(0, 0, 8, 'a')
            .with_message(1, 0, 8, 'b')
            .with_message(2, 1, 8, 'c')
            .with_message(0, 3, 8, 'd')
            .with_message(1, 5, 8, 'e')
            .with_message(2, 9, 8, 'f')
            .with_seed(seed)
    }

    #[test]
    fn test_backoff_draws_within_window() {
        for seed in 0..10 {
            let mut sim = BusSimulation::new(crowded(seed)).unwrap();
            let snapshots = run_to_completion(&mut sim, 200_000);

            let mut draws = 0;
            for (_, event) in events_with_tick(&snapshots) {
                if let StationEvent::BackoffStarted {
                    tries,
                    multiplier,
                    ticks,
                    ..
                } = event
                {
                    draws += 1;
                    assert!(tries >= 1);
                    assert!(multiplier <= (1u64 << tries.min(10)) - 1);
                    assert_eq!(ticks, multiplier * 20);
                }
            }
            assert_eq!(draws, sim.backoff_draws());
        }
    }

    #[test]
    fn test_resume_follows_backoff_length() {
        let mut sim = BusSimulation::new(crowded(3)).unwrap();
        let snapshots = run_to_completion(&mut sim, 200_000);
        let events = events_with_tick(&snapshots);

        for (tick, event) in &events {
            if let StationEvent::BackoffStarted {
                station,
                message,
                ticks,
                ..
            } = *event
            {
                let expected = tick + ticks.max(1);
                assert!(
                    events.contains(&(expected, StationEvent::Resumed { station, message })),
                    "station {} should resume at tick {}",
                    station,
                    expected
                );
            }
        }
    }

    #[test]
    fn test_each_message_completes_at_most_once() {
        for seed in 0..10 {
            let mut sim = BusSimulation::new(crowded(seed)).unwrap();
            let snapshots = run_to_completion(&mut sim, 200_000);

            let mut completions: HashMap<usize, u64> = HashMap::new();
            for (tick, event) in events_with_tick(&snapshots) {
                if let StationEvent::Completed { station, message } = event {
                    assert!(completions.insert(message, tick).is_none(), "message {} completed twice", message);
                    let view = snapshots[tick as usize].station(station).unwrap();
                    assert_eq!(view.state, StationState::Idle);
                    assert_eq!(view.active_message, None);
                    assert_eq!(sim.schedule().get(message).unwrap().completed_tick, Some(tick));
                }
            }
            assert_eq!(completions.len(), sim.schedule().completed_count());
        }
    }

    #[test]
    fn test_claim_starts_with_fresh_tries() {
        let mut sim = BusSimulation::new(crowded(5)).unwrap();
        let snapshots = run_to_completion(&mut sim, 200_000);

        for snapshot in &snapshots {
            for event in &snapshot.events {
                if let StationEvent::Claimed { station, .. } = *event {
                    assert_eq!(snapshot.station(station).unwrap().tries, 0);
                }
            }
        }
    }

    #[test]
    fn test_deferral_only_before_first_frame() {
        let mut sim = BusSimulation::new(crowded(8)).unwrap();
        let snapshots = run_to_completion(&mut sim, 200_000);

        for snapshot in &snapshots {
            for event in &snapshot.events {
                if let StationEvent::Deferred { station, .. } = *event {
                    assert_eq!(snapshot.station(station).unwrap().frames_sent, 0);
                }
                if let StationEvent::Collision { frames_sent, .. } = *event {
                    assert!(frames_sent > 0);
                }
            }
        }
    }

    #[test]
    fn test_same_seed_same_history() {
        let mut first = BusSimulation::new(crowded(99)).unwrap();
        let mut second = BusSimulation::new(crowded(99)).unwrap();
        assert_eq!(run_ticks(&mut first, 2_000), run_ticks(&mut second, 2_000));
        assert_eq!(first.backoff_draws(), second.backoff_draws());
    }
}

#[cfg(test)]
mod ordering_tests {
    use super::*;

    #[test]
    fn test_rotating_order_changes_turns() {
        let config = two_station_contention(6).with_station_order(StationOrder::Rotating);
        let mut sim = BusSimulation::new(config).unwrap();
        let snapshots = run_ticks(&mut sim, 14);

        // Tick 4 starts with station 0, tick 13 with station 1.
        let collision_order: Vec<_> = snapshots[4].events.iter().map(|e| e.station()).collect();
        assert_eq!(collision_order, vec![0, 1]);
        let backoff_order: Vec<_> = snapshots[13].events.iter().map(|e| e.station()).collect();
        assert_eq!(backoff_order, vec![1, 0]);
    }

    #[test]
    fn test_ascending_order_is_default() {
        let mut sim = BusSimulation::new(two_station_contention(6)).unwrap();
        let snapshots = run_ticks(&mut sim, 14);
        let backoff_order: Vec<_> = snapshots[13].events.iter().map(|e| e.station()).collect();
        assert_eq!(backoff_order, vec![0, 1]);
    }

    #[test]
    fn test_rotating_order_still_delivers() {
        for seed in 0..10 {
            let config = two_station_contention(6)
                .with_seed(seed)
                .with_station_order(StationOrder::Rotating);
            let mut sim = BusSimulation::new(config).unwrap();
            assert!(sim.run_until_settled(50_000).unwrap().is_some());
            assert_eq!(sim.schedule().completed_count(), 2);
        }
    }

    #[test]
    fn test_invalid_scenario_rejected_before_first_tick() {
        let config = SimulationConfig::new(4).with_station(0, 9);
        assert!(BusSimulation::new(config).is_err());
    }

    #[test]
    fn test_simulation_error_names_tick() {
        let err = SimulationError::InvariantViolation {
            tick: 42,
            source: cdbus::schedule::ScheduleError::UnknownMessage(3),
        };
        assert_eq!(
            err.to_string(),
            "simulation invariant violated at tick 42: message 3 does not exist"
        );
    }
}

//! Behavioural scenarios for the playback controller driven through a
//! recording engine.
//!
//! Run with: cargo test --test playback_scenarios

mod common;

use common::fake_engine::{station, Call, RecordingEngine};
use genradio_daemon::controller::PlaybackController;
use genradio_daemon::engine::{EngineEvent, EngineSignal, LoadId, PlaybackError};
use genradio_proto::session::Phase;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn controller() -> (PlaybackController<RecordingEngine>, RecordingEngine) {
    let engine = RecordingEngine::new();
    (PlaybackController::new(engine.clone(), 0.5), engine)
}

fn signal(c: &mut PlaybackController<RecordingEngine>, signal: EngineSignal) {
    let load = c.current_load().expect("a source is loaded");
    c.handle_engine_event(EngineEvent::new(load, signal));
}

#[test]
fn selecting_the_same_station_twice_loads_once() {
    let (mut c, engine) = controller();
    let s = station("a");

    c.select(s.clone());
    c.select(s);

    assert_eq!(c.session().phase, Phase::Loading);
    assert_eq!(engine.sources().len(), 1);
    assert!(c.session().invariants_hold());
}

#[test]
fn reselecting_while_playing_is_a_toggle() {
    let (mut via_select, select_engine) = controller();
    let (mut via_toggle, toggle_engine) = controller();
    for c in [&mut via_select, &mut via_toggle] {
        c.select(station("a"));
        signal(c, EngineSignal::Playing);
    }
    select_engine.clear();
    toggle_engine.clear();

    via_select.select(station("a"));
    via_toggle.toggle();

    assert_eq!(via_select.session(), via_toggle.session());
    assert_eq!(select_engine.calls(), toggle_engine.calls());
    assert_eq!(select_engine.calls(), vec![Call::Pause]);
    assert_eq!(via_select.session().phase, Phase::Playing);
}

#[test]
fn volume_is_clamped_and_forwarded() {
    let (mut c, engine) = controller();
    c.select(station("a"));
    engine.clear();

    c.set_volume(-1.0);
    assert_eq!(c.session().volume, 0.0);
    c.set_volume(2.0);
    assert_eq!(c.session().volume, 1.0);
    c.set_volume(0.4);
    assert_eq!(c.session().volume, 0.4);

    assert_eq!(
        engine.calls(),
        vec![Call::Volume(0.0), Call::Volume(1.0), Call::Volume(0.4)]
    );
}

#[test]
fn nan_volume_is_ignored() {
    let (mut c, engine) = controller();
    c.select(station("a"));
    engine.clear();
    c.set_volume(f32::NAN);
    assert_eq!(c.session().volume, 0.5);
    assert!(engine.calls().is_empty());
}

#[test]
fn late_confirmation_for_previous_station_is_dropped() {
    let (mut c, engine) = controller();
    c.select(station("a"));
    let load_a = c.current_load().unwrap();
    c.select(station("b"));
    let load_b = c.current_load().unwrap();
    assert_ne!(load_a, load_b);
    assert_eq!(engine.sources(), vec![load_a, load_b]);

    c.handle_engine_event(EngineEvent::new(load_a, EngineSignal::Playing));
    assert_eq!(c.session().phase, Phase::Loading);
    assert_eq!(c.session().station_id(), Some("b"));

    c.handle_engine_event(EngineEvent::new(
        load_a,
        EngineSignal::Errored(PlaybackError::StreamInterrupted("old".into())),
    ));
    assert_eq!(c.session().phase, Phase::Loading);

    c.handle_engine_event(EngineEvent::new(load_b, EngineSignal::Playing));
    assert_eq!(c.session().phase, Phase::Playing);
}

#[test]
fn errored_session_recovers_on_any_select() {
    for next in ["a", "b"] {
        let (mut c, _engine) = controller();
        c.select(station("a"));
        signal(
            &mut c,
            EngineSignal::Errored(PlaybackError::StreamRejected("404".into())),
        );
        assert_eq!(c.session().phase, Phase::Errored);
        assert_eq!(
            c.session().error_message.as_deref(),
            Some("Cannot play this stream: 404")
        );

        c.select(station(next));
        assert_eq!(c.session().phase, Phase::Loading, "select({})", next);
        assert!(c.session().error_message.is_none());
        assert_eq!(c.session().station_id(), Some(next));
    }
}

#[test]
fn play_pause_resume_round_trip() {
    let (mut c, engine) = controller();
    let mut rx = c.subscribe();

    c.select(station("x"));
    assert_eq!(c.session().phase, Phase::Loading);
    signal(&mut c, EngineSignal::Playing);
    assert_eq!(c.session().phase, Phase::Playing);

    c.toggle();
    assert_eq!(engine.count(&Call::Pause), 1);
    signal(&mut c, EngineSignal::Paused);
    assert_eq!(c.session().phase, Phase::Paused);

    c.toggle();
    assert_eq!(c.session().phase, Phase::Loading);
    signal(&mut c, EngineSignal::Playing);
    assert_eq!(c.session().phase, Phase::Playing);
    assert_eq!(c.session().station_id(), Some("x"));

    // one source, two starts
    assert_eq!(engine.sources().len(), 1);
    assert_eq!(engine.count(&Call::Start), 2);

    assert!(rx.has_changed().unwrap());
    assert_eq!(rx.borrow_and_update().phase, Phase::Playing);
}

#[test]
fn unreachable_engine_errors_but_keeps_station() {
    let (mut c, engine) = controller();
    engine.reject_with(Some(PlaybackError::StreamRejected(
        "audio engine is not running".into(),
    )));

    c.select(station("y"));

    let session = c.session();
    assert_eq!(session.phase, Phase::Errored);
    assert_eq!(session.station_id(), Some("y"));
    assert_eq!(
        session.error_message.as_deref(),
        Some("Cannot play this stream: audio engine is not running")
    );
    assert!(session.invariants_hold());

    engine.reject_with(None);
    c.toggle();
    assert_eq!(c.session().phase, Phase::Loading);
    assert!(c.session().error_message.is_none());
}

#[test]
fn invariants_hold_across_random_walks() {
    let stations = [station("a"), station("b"), station("c")];

    for seed in 0..32u64 {
        let mut rng = StdRng::seed_from_u64(seed);
        let (mut c, engine) = controller();
        let mut loads: Vec<LoadId> = Vec::new();

        for _ in 0..200 {
            match rng.gen_range(0..9) {
                0 | 1 => c.select(stations[rng.gen_range(0..stations.len())].clone()),
                2 => c.toggle(),
                3 => c.set_volume(rng.gen_range(-0.5f32..1.5)),
                4 => engine.reject_with(if rng.gen_bool(0.2) {
                    Some(PlaybackError::StreamRejected("refused".into()))
                } else {
                    None
                }),
                n => {
                    if let Some(load) = c.current_load() {
                        if !loads.contains(&load) {
                            loads.push(load);
                        }
                    }
                    if loads.is_empty() {
                        continue;
                    }
                    // mostly current, sometimes stale
                    let load = if rng.gen_bool(0.8) {
                        *loads.last().unwrap()
                    } else {
                        loads[rng.gen_range(0..loads.len())]
                    };
                    let signal = match n {
                        5 => EngineSignal::Buffering,
                        6 => EngineSignal::Playing,
                        7 => EngineSignal::Paused,
                        _ => EngineSignal::Errored(PlaybackError::StreamInterrupted("eof".into())),
                    };
                    c.handle_engine_event(EngineEvent::new(load, signal));
                }
            }
            assert!(
                c.session().invariants_hold(),
                "seed {}: {:?}",
                seed,
                c.session()
            );
        }
    }
}

//! End-to-end cue list scenarios.
//!
//! Covers:
//! - A cue with a one second action stopping on its own
//! - Post-wait chaining from one cue to its sibling
//! - Two constant signals summing and clipping on a shared channel
//! - The same behaviour driven by the real scheduler thread

use std::thread;
use std::time::{Duration, Instant};

use cuestack_core::cue::{CueAction, CueState, CueUid, PostTrigger};
use cuestack_core::cue_list::{CueList, CueListConfig, CueListState};
use cuestack_core::property::{PropertyValue, PropertyVersion};
use cuestack_core::timing::{millis, seconds, ClockTime};

// ═══════════════════════════════════════════════════════════════════════════════
// HELPERS
// ═══════════════════════════════════════════════════════════════════════════════

fn two_channel_list() -> CueList {
    let _ = env_logger::builder().is_test(true).try_init();
    CueList::without_scheduler(CueListConfig {
        channels: 2,
        ..CueListConfig::default()
    })
}

fn timed(state: &mut CueListState, class: &str, action: ClockTime, trigger: PostTrigger) -> CueUid {
    let uid = state.append(class).expect("built-in class");
    state
        .cue_mut(uid)
        .expect("just appended")
        .core
        .set_timing(0, action, 0, trigger);
    uid
}

/// Pulse every millisecond from `from` to `to` inclusive.
fn pulse_range(state: &mut CueListState, from: i64, to: i64) {
    for ms in from..=to {
        state.pulse_all(millis(ms));
    }
}

fn constant_signal(state: &mut CueListState, channel: u32) -> CueUid {
    let uid = timed(state, "SignalCue", -1, PostTrigger::None);
    let defined = PropertyVersion::Defined;
    assert!(state.set_property(uid, "waveform", defined, PropertyValue::String("constant".into())));
    assert!(state.set_property(uid, "amplitude", defined, PropertyValue::Double(0.0)));
    assert!(state.set_property(uid, "first_channel", defined, PropertyValue::UInt32(channel)));
    assert!(state.set_property(uid, "channel_count", defined, PropertyValue::UInt32(1)));
    uid
}

// ═══════════════════════════════════════════════════════════════════════════════
// SCENARIOS
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn one_second_cue_stops_after_its_action() {
    let list = two_channel_list();
    let mut guard = list.lock();
    let state = &mut *guard;
    let cue = timed(state, "Cue", seconds(1.0), PostTrigger::None);

    assert!(state.perform(cue, CueAction::Play, 0));
    assert_eq!(state.cue(cue).unwrap().state(), CueState::PlayingAction);

    pulse_range(state, 0, 999);
    assert_eq!(state.cue(cue).unwrap().state(), CueState::PlayingAction);

    pulse_range(state, 1000, 1100);
    assert_eq!(state.cue(cue).unwrap().state(), CueState::Stopped);
}

#[test]
fn after_action_post_wait_plays_the_next_cue_once() {
    let list = two_channel_list();
    let mut guard = list.lock();
    let state = &mut *guard;
    let first = timed(state, "Cue", millis(500), PostTrigger::AfterAction);
    let second = timed(state, "Cue", -1, PostTrigger::None);

    assert!(state.perform(first, CueAction::Play, 0));
    pulse_range(state, 0, 499);
    assert_eq!(state.cue(second).unwrap().state(), CueState::Stopped);

    pulse_range(state, 500, 600);
    assert_eq!(state.cue(first).unwrap().state(), CueState::Stopped);
    assert_eq!(state.cue(second).unwrap().state(), CueState::PlayingAction);
    // Started at 500 ms, not restarted since.
    assert_eq!(
        state.cue(second).unwrap().core.running_times(millis(600)).real,
        millis(100)
    );
}

#[test]
fn two_unity_signals_sum_and_clip() {
    let list = two_channel_list();
    let mut guard = list.lock();
    let state = &mut *guard;
    let a = constant_signal(state, 0);
    let b = constant_signal(state, 0);

    assert!(state.perform(a, CueAction::Play, 0));
    assert!(state.perform(b, CueAction::Play, 0));
    state.pulse_all(0);

    let channels = state.render_offline(64, 0);
    assert_eq!(channels.len(), 2);
    assert!(channels[0].iter().all(|s| (*s - 2.0).abs() < 1e-6));
    assert!(channels[1].iter().all(|s| *s == 0.0));

    let master = state.master_rms();
    assert!(master.channel(0).unwrap().clipped);
    assert!(!master.channel(1).unwrap().clipped);
    // Each source alone stays at unity.
    assert!(!state.cue_rms(a).unwrap().channel(0).unwrap().clipped);

    state.reset_peaks();
    assert!(!state.master_rms().channel(0).unwrap().clipped);
}

#[test]
fn group_volume_scales_children() {
    let list = two_channel_list();
    let mut guard = list.lock();
    let state = &mut *guard;
    let group = state.append("GroupCue").unwrap();
    let child = state.append_child(group, "SignalCue").unwrap();
    let defined = PropertyVersion::Defined;
    state.set_property(child, "waveform", defined, PropertyValue::String("constant".into()));
    state.set_property(child, "channel_count", defined, PropertyValue::UInt32(2));
    state.cue_mut(child).unwrap().core.set_timing(0, -1, 0, PostTrigger::None);
    state.set_property(group, "play_volume", defined, PropertyValue::Double(0.5));

    assert!(state.perform(group, CueAction::Play, 0));
    state.pulse_all(0);
    assert!(state.cue(child).unwrap().state().is_playing());

    let channels = state.render_offline(16, 0);
    for channel in &channels {
        assert!(channel.iter().all(|s| (*s - 0.5).abs() < 1e-6));
    }
}

#[test]
fn get_audio_interleaves_requested_channels() {
    let list = two_channel_list();
    let mut guard = list.lock();
    let cue = constant_signal(&mut guard, 1);
    assert!(guard.play(cue));

    let mut out = vec![9.0f32; 8];
    let frames = guard.get_audio(&mut out, 4, &[1, 0]);
    assert_eq!(frames, 4);
    assert_eq!(out, vec![1.0, 0.0, 1.0, 0.0, 1.0, 0.0, 1.0, 0.0]);
}

#[test]
fn scheduler_thread_stops_a_short_cue() {
    let _ = env_logger::builder().is_test(true).try_init();
    let list = CueList::new(CueListConfig::default()).expect("scheduler starts");
    let cue = {
        let mut guard = list.lock();
        let cue = timed(&mut guard, "Cue", millis(50), PostTrigger::None);
        assert!(guard.play(cue));
        cue
    };

    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        let state = list.lock().cue(cue).map(|c| c.state());
        if state == Some(CueState::Stopped) {
            break;
        }
        assert!(Instant::now() < deadline, "cue still {:?}", state);
        thread::sleep(Duration::from_millis(10));
    }
    list.shutdown();
}

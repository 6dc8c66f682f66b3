use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{Local, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use serde::{Deserialize, Serialize};

use super::{do_action, Watcher};
use crate::cue::{CueAction, CueUid};
use crate::cue_list::CueListHandle;

/// Fires at a wall-clock time, optionally repeating.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimeTrigger {
    /// Day of the first firing; the day the trigger starts when absent
    #[serde(default)]
    pub date: Option<NaiveDate>,
    pub time: NaiveTime,
    /// Seconds between firings, 0 for a single shot
    #[serde(default)]
    pub repeat_secs: u64,
    pub action: CueAction,
}

impl TimeTrigger {
    pub const CLASS: &'static str = "TimeTrigger";

    /// First firing when started on `today`.
    pub fn first_fire(&self, today: NaiveDate) -> NaiveDateTime {
        self.date.unwrap_or(today).and_time(self.time)
    }

    /// The first firing at or after `now`.
    ///
    /// A start in the past skips whole repeat intervals instead of firing
    /// once for every missed one. Single shots in the past never fire.
    pub fn next_fire_from(&self, start: NaiveDateTime, now: NaiveDateTime) -> Option<NaiveDateTime> {
        if start >= now {
            return Some(start);
        }
        if self.repeat_secs == 0 {
            return None;
        }
        let repeat = self.repeat_secs as i64;
        let behind = (now - start).num_seconds();
        let steps = (behind + repeat - 1) / repeat;
        let mut next = start + TimeDelta::seconds(steps * repeat);
        // Sub-second remainder
        if next < now {
            next += TimeDelta::seconds(repeat);
        }
        Some(next)
    }

    /// The firing after one that just happened at `fired`.
    pub fn following(&self, fired: NaiveDateTime) -> Option<NaiveDateTime> {
        (self.repeat_secs > 0).then(|| fired + TimeDelta::seconds(self.repeat_secs as i64))
    }
}

pub(super) fn watch(spec: TimeTrigger, cue: CueUid, handle: CueListHandle, poll: Duration) -> Option<Watcher> {
    Watcher::spawn("cuestack-time-trigger", move |running, stop_rx| {
        run(&spec, cue, &handle, poll, &running, &stop_rx)
    })
}

fn run(
    spec: &TimeTrigger,
    cue: CueUid,
    handle: &CueListHandle,
    poll: Duration,
    running: &AtomicBool,
    stop_rx: &Receiver<()>,
) {
    let now = Local::now().naive_local();
    let mut next = spec.next_fire_from(spec.first_fire(now.date()), now);
    match next {
        Some(at) => log::debug!("Time trigger for cue {} armed for {}", cue, at),
        None => log::info!("Time trigger for cue {} is in the past and does not repeat", cue),
    }

    while let Some(at) = next {
        match stop_rx.recv_timeout(poll) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }
        if !running.load(Ordering::Relaxed) {
            break;
        }
        let now = Local::now().naive_local();
        if now < at {
            continue;
        }
        log::info!("Time trigger fired: {} cue {}", spec.action, cue);
        do_action(handle, cue, spec.action);
        next = spec.following(at).and_then(|following| spec.next_fire_from(following, now));
    }
    running.store(false, Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap().and_hms_opt(h, m, s).unwrap()
    }

    fn trigger(repeat_secs: u64) -> TimeTrigger {
        TimeTrigger {
            date: None,
            time: NaiveTime::from_hms_opt(20, 0, 0).unwrap(),
            repeat_secs,
            action: CueAction::Play,
        }
    }

    #[test]
    fn test_first_fire_uses_given_date() {
        let mut t = trigger(0);
        let today = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert_eq!(t.first_fire(today), at(20, 0, 0));
        t.date = NaiveDate::from_ymd_opt(2024, 3, 5);
        assert_eq!(t.first_fire(today).date(), NaiveDate::from_ymd_opt(2024, 3, 5).unwrap());
    }

    #[test]
    fn test_future_start_is_kept() {
        assert_eq!(trigger(60).next_fire_from(at(20, 0, 0), at(19, 0, 0)), Some(at(20, 0, 0)));
    }

    #[test]
    fn test_past_single_shot_never_fires() {
        assert_eq!(trigger(0).next_fire_from(at(20, 0, 0), at(21, 0, 0)), None);
    }

    #[test]
    fn test_past_repeat_fast_forwards() {
        let t = trigger(600);
        assert_eq!(t.next_fire_from(at(20, 0, 0), at(20, 25, 0)), Some(at(20, 30, 0)));
        assert_eq!(t.next_fire_from(at(20, 0, 0), at(20, 30, 0)), Some(at(20, 30, 0)));
    }

    #[test]
    fn test_following() {
        assert_eq!(trigger(0).following(at(20, 0, 0)), None);
        assert_eq!(trigger(30).following(at(20, 0, 0)), Some(at(20, 0, 30)));
    }

    #[test]
    fn test_json_uses_plain_times() {
        let mut t = trigger(3600);
        t.date = NaiveDate::from_ymd_opt(2024, 3, 1);
        let value = serde_json::to_value(&t).unwrap();
        assert_eq!(value["time"], "20:00:00");
        assert_eq!(value["date"], "2024-03-01");
        let parsed: TimeTrigger = serde_json::from_value(serde_json::json!({
            "time": "20:00:00",
            "action": "stop"
        }))
        .unwrap();
        assert_eq!(parsed.repeat_secs, 0);
        assert_eq!(parsed.date, None);
    }
}

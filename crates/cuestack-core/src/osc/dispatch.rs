use super::codec::{OscArg, OscMessage};
use crate::cue::{CueAction, CueId};
use crate::cue_list::{CueListGuard, CueListHandle};

/// A cue list operation addressed by an OSC message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OscCommand {
    Cue(CueAction, CueId),
    StopAll,
    Go,
    Next,
    Previous,
    Goto(CueId),
}

impl OscCommand {
    /// Map `msg` to a command, with addresses taken relative to `prefix`.
    pub fn parse(prefix: &str, msg: &OscMessage) -> Option<Self> {
        let path = msg.address.strip_prefix(prefix)?;
        let id = || cue_id(msg.args.first());
        match path {
            "cue/play" => Some(Self::Cue(CueAction::Play, id()?)),
            "cue/pause" => Some(Self::Cue(CueAction::Pause, id()?)),
            "cue/stop" => Some(Self::Cue(CueAction::Stop, id()?)),
            "list/stopall" => Some(Self::StopAll),
            "list/go" => Some(Self::Go),
            "list/next" => Some(Self::Next),
            "list/previous" => Some(Self::Previous),
            "list/goto" => Some(Self::Goto(id()?)),
            _ => None,
        }
    }

    pub fn apply(self, list: &mut CueListGuard<'_>) -> bool {
        match self {
            Self::Cue(action, id) => list.perform_by_id(id, action),
            Self::StopAll => {
                list.stop_all();
                true
            }
            Self::Go => list.go(),
            Self::Next => list.next().is_some(),
            Self::Previous => list.previous().is_some(),
            Self::Goto(id) => list.goto(id),
        }
    }
}

/// Cue ids usually arrive as strings ("1.250"); numeric arguments are
/// read as the same decimal number.
fn cue_id(arg: Option<&OscArg>) -> Option<CueId> {
    match arg? {
        OscArg::String(s) => CueId::parse(s),
        OscArg::Int(i) => u32::try_from(*i).ok().and_then(|i| i.checked_mul(1000)).map(CueId),
        OscArg::Float(f) if f.is_finite() && *f >= 0.0 => Some(CueId((f64::from(*f) * 1000.0).round() as u32)),
        OscArg::Float(_) => None,
    }
}

/// Routes decoded messages to a cue list.
#[derive(Clone)]
pub struct OscDispatcher {
    prefix: String,
    handle: CueListHandle,
}

impl OscDispatcher {
    /// `prefix` is normalized to start and end with '/'.
    pub fn new(prefix: &str, handle: CueListHandle) -> Self {
        let trimmed = prefix.trim_matches('/');
        let prefix = if trimmed.is_empty() {
            "/".to_string()
        } else {
            format!("/{}/", trimmed)
        };
        Self { prefix, handle }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Run the command addressed by `msg`. Returns false for unknown
    /// addresses, missing arguments and failed operations.
    pub fn dispatch(&self, msg: &OscMessage) -> bool {
        let Some(command) = OscCommand::parse(&self.prefix, msg) else {
            log::warn!("Ignoring OSC message {}", msg);
            return false;
        };
        log::debug!("OSC {:?}", command);
        self.handle.with_lock(|list| command.apply(list)).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cue_list::{CueList, CueListConfig};

    fn msg(address: &str, args: Vec<OscArg>) -> OscMessage {
        OscMessage::new(address, args)
    }

    #[test]
    fn test_parse_routes() {
        assert_eq!(
            OscCommand::parse("/", &msg("/cue/play", vec!["1.000".into()])),
            Some(OscCommand::Cue(CueAction::Play, CueId(1000)))
        );
        assert_eq!(
            OscCommand::parse("/show/", &msg("/show/list/goto", vec!["2.5".into()])),
            Some(OscCommand::Goto(CueId(2500)))
        );
        assert_eq!(OscCommand::parse("/", &msg("/list/stopall", vec![])), Some(OscCommand::StopAll));
        assert_eq!(
            OscCommand::parse("/", &msg("/cue/stop", vec![OscArg::Int(3)])),
            Some(OscCommand::Cue(CueAction::Stop, CueId(3000)))
        );
    }

    #[test]
    fn test_parse_rejects() {
        assert_eq!(OscCommand::parse("/", &msg("/cue/play", vec![])), None);
        assert_eq!(OscCommand::parse("/", &msg("/cue/play", vec![OscArg::Int(-1)])), None);
        assert_eq!(OscCommand::parse("/show/", &msg("/list/go", vec![])), None);
        assert_eq!(OscCommand::parse("/", &msg("/list/rewind", vec![])), None);
    }

    #[test]
    fn test_prefix_is_normalized() {
        let list = CueList::without_scheduler(CueListConfig::default());
        assert_eq!(OscDispatcher::new("", list.handle()).prefix(), "/");
        assert_eq!(OscDispatcher::new("show", list.handle()).prefix(), "/show/");
        assert_eq!(OscDispatcher::new("/a/b/", list.handle()).prefix(), "/a/b/");
    }

    #[test]
    fn test_dispatch_plays_by_id() {
        let list = CueList::without_scheduler(CueListConfig::default());
        let uid = list.lock().append("Cue").unwrap();
        let dispatcher = OscDispatcher::new("/", list.handle());

        assert!(dispatcher.dispatch(&msg("/cue/play", vec!["1".into()])));
        assert!(list.lock().cue(uid).unwrap().state().is_playing());
        assert!(!dispatcher.dispatch(&msg("/cue/play", vec!["9".into()])));
        assert!(dispatcher.dispatch(&msg("/list/stopall", vec![])));
        assert!(!list.lock().cue(uid).unwrap().state().is_running());
    }

    #[test]
    fn test_dispatch_after_list_is_gone() {
        let list = CueList::without_scheduler(CueListConfig::default());
        let dispatcher = OscDispatcher::new("/", list.handle());
        drop(list);
        assert!(!dispatcher.dispatch(&msg("/list/go", vec![])));
    }
}

//! In-memory multiplexer for tests.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use super::{Multiplexer, MuxError, Pane, Result};

#[derive(Debug, Clone)]
struct Session {
    cwd: PathBuf,
    env: BTreeMap<String, String>,
    /// Keystrokes sent, in order; trailing newline marks Enter.
    keys: Vec<String>,
    pane_command: String,
    pane_contents: String,
}

#[derive(Debug, Default)]
struct State {
    sessions: BTreeMap<String, Session>,
}

#[derive(Clone, Default)]
pub struct FakeMux {
    state: Arc<Mutex<State>>,
}

impl FakeMux {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock()
    }

    /// Simulate the runtime coming up in a pane.
    pub fn set_pane_command(&self, session: &str, command: &str) {
        if let Some(s) = self.lock().sessions.get_mut(session) {
            s.pane_command = command.to_string();
        }
    }

    pub fn set_pane_contents(&self, session: &str, contents: &str) {
        if let Some(s) = self.lock().sessions.get_mut(session) {
            s.pane_contents = contents.to_string();
        }
    }

    /// Everything typed into a session, for assertions.
    pub fn sent_keys(&self, session: &str) -> Vec<String> {
        self.lock()
            .sessions
            .get(session)
            .map(|s| s.keys.clone())
            .unwrap_or_default()
    }

    pub fn env_of(&self, session: &str) -> BTreeMap<String, String> {
        self.lock()
            .sessions
            .get(session)
            .map(|s| s.env.clone())
            .unwrap_or_default()
    }

    pub fn cwd_of(&self, session: &str) -> Option<PathBuf> {
        self.lock().sessions.get(session).map(|s| s.cwd.clone())
    }
}

impl Multiplexer for FakeMux {
    fn has_session(&self, name: &str) -> Result<bool> {
        Ok(self.lock().sessions.contains_key(name))
    }

    fn new_session(&self, name: &str, cwd: &Path) -> Result<()> {
        let mut state = self.lock();
        if state.sessions.contains_key(name) {
            return Err(MuxError::SpawnFailed(format!(
                "session already exists: {name}"
            )));
        }
        state.sessions.insert(
            name.to_string(),
            Session {
                cwd: cwd.to_path_buf(),
                env: BTreeMap::new(),
                keys: Vec::new(),
                pane_command: "zsh".to_string(),
                pane_contents: String::new(),
            },
        );
        Ok(())
    }

    fn kill_session(&self, name: &str) -> Result<()> {
        self.lock().sessions.remove(name);
        Ok(())
    }

    fn list_sessions(&self) -> Result<Vec<String>> {
        Ok(self.lock().sessions.keys().cloned().collect())
    }

    fn list_panes(&self, session: &str) -> Result<Vec<Pane>> {
        let state = self.lock();
        let s = state
            .sessions
            .get(session)
            .ok_or_else(|| MuxError::NotFound(session.to_string()))?;
        Ok(vec![Pane {
            pane_id: "%0".to_string(),
            pid: 4242,
            command: s.pane_command.clone(),
        }])
    }

    fn send_keys(&self, session: &str, text: &str, enter: bool) -> Result<()> {
        let mut state = self.lock();
        let s = state
            .sessions
            .get_mut(session)
            .ok_or_else(|| MuxError::NotFound(session.to_string()))?;
        let mut entry = text.to_string();
        if enter {
            entry.push('\n');
        }
        s.keys.push(entry);
        Ok(())
    }

    fn send_raw(&self, session: &str, keycode: &str) -> Result<()> {
        let mut state = self.lock();
        let s = state
            .sessions
            .get_mut(session)
            .ok_or_else(|| MuxError::NotFound(session.to_string()))?;
        s.keys.push(format!("<{keycode}>"));
        Ok(())
    }

    fn set_environment(&self, session: &str, key: &str, value: &str) -> Result<()> {
        let mut state = self.lock();
        let s = state
            .sessions
            .get_mut(session)
            .ok_or_else(|| MuxError::NotFound(session.to_string()))?;
        s.env.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn capture_pane(&self, session: &str) -> Result<String> {
        let state = self.lock();
        let s = state
            .sessions
            .get(session)
            .ok_or_else(|| MuxError::NotFound(session.to_string()))?;
        Ok(s.pane_contents.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_lifecycle() {
        let mux = FakeMux::new();
        assert!(!mux.has_session("gt-wyvern-toast").unwrap());

        mux.new_session("gt-wyvern-toast", Path::new("/tmp")).unwrap();
        assert!(mux.has_session("gt-wyvern-toast").unwrap());
        assert_eq!(mux.list_sessions().unwrap(), vec!["gt-wyvern-toast"]);

        mux.kill_session("gt-wyvern-toast").unwrap();
        assert!(!mux.has_session("gt-wyvern-toast").unwrap());
    }

    #[test]
    fn duplicate_session_rejected() {
        let mux = FakeMux::new();
        mux.new_session("gt-a", Path::new("/tmp")).unwrap();
        assert!(mux.new_session("gt-a", Path::new("/tmp")).is_err());
    }

    #[test]
    fn keys_are_recorded_in_order() {
        let mux = FakeMux::new();
        mux.new_session("gt-a", Path::new("/tmp")).unwrap();
        mux.send_keys("gt-a", "gt prime", true).unwrap();
        mux.send_raw("gt-a", "Escape").unwrap();
        assert_eq!(mux.sent_keys("gt-a"), vec!["gt prime\n", "<Escape>"]);
    }

    #[test]
    fn send_to_missing_session_fails() {
        let mux = FakeMux::new();
        assert!(matches!(
            mux.send_keys("gt-missing", "hi", false),
            Err(MuxError::NotFound(_))
        ));
    }

    #[test]
    fn environment_is_stored() {
        let mux = FakeMux::new();
        mux.new_session("gt-a", Path::new("/tmp")).unwrap();
        mux.set_environment("gt-a", "GT_ROLE", "polecat").unwrap();
        assert_eq!(
            mux.env_of("gt-a").get("GT_ROLE").map(String::as_str),
            Some("polecat")
        );
    }
}

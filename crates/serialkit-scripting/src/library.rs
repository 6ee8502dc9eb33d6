//! Saved scripts
//!
//! The library is the operator's list of scripts, one of which is selected
//! for running. It is exported as a JSON blob; persisting the blob is up to
//! the embedding application.

use serde::{Deserialize, Serialize};

/// Storage key for the exported library
pub const SCRIPTS_STORAGE_KEY: &str = "config.serialScripts";

/// Name given to new scripts
pub const DEFAULT_SCRIPT_NAME: &str = "New script";

/// Seed code for new scripts: buffers the simulated IMU stream into lines
/// and publishes each complete line as a `user-data` record.
pub const IMU_DEMO: &str = r#"// Incoming lines look like "pitch:-0.13,roll:0.00,yaw:0.07"

fn init() {
    #{ cache: "" }
}

// Called for every received chunk; the return value is what gets logged
fn on_receive(data) {
    this.cache += decode(data);
    if this.cache.contains("\n") {
        let lines = this.cache.split("\n");
        this.cache = lines.pop();
        for line in lines {
            let fields = parse_fields(line);
            if fields.len() > 0 {
                publish(fields);
            }
        }
    }
    data
}

// Called for every payload before it is written
fn on_send(data) {
    data
}

// Periodic output:
// start_timer("heartbeat", 1000, "heartbeat");
//
// fn heartbeat() {
//     send_hex("AA 55 01");
// }
"#;

/// A saved script
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptItem {
    /// Script id, unique within the library
    pub id: u64,
    /// Display name
    pub name: String,
    /// Rhai source
    pub code: String,
    /// Whether this script is the running one
    #[serde(default, alias = "isRunning")]
    pub running: bool,
}

/// The operator's scripts plus the selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptLibrary {
    scripts: Vec<ScriptItem>,
    current: u64,
    next_id: u64,
}

impl Default for ScriptLibrary {
    fn default() -> Self {
        let mut library = Self {
            scripts: Vec::new(),
            current: 0,
            next_id: 1,
        };
        library.add();
        library
    }
}

impl ScriptLibrary {
    /// All scripts in creation order
    pub fn scripts(&self) -> &[ScriptItem] {
        &self.scripts
    }

    /// Look up a script
    pub fn get(&self, id: u64) -> Option<&ScriptItem> {
        self.scripts.iter().find(|s| s.id == id)
    }

    fn get_mut(&mut self, id: u64) -> Option<&mut ScriptItem> {
        self.scripts.iter_mut().find(|s| s.id == id)
    }

    /// The selected script
    pub fn current(&self) -> &ScriptItem {
        // The library is never empty and `current` always names a member
        self.get(self.current).unwrap_or(&self.scripts[0])
    }

    /// Select a script. Unknown ids are ignored.
    pub fn select(&mut self, id: u64) -> bool {
        if self.get(id).is_none() {
            return false;
        }
        self.current = id;
        true
    }

    /// Add a script seeded with [`IMU_DEMO`] and select it
    pub fn add(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.scripts.push(ScriptItem {
            id,
            name: DEFAULT_SCRIPT_NAME.to_string(),
            code: IMU_DEMO.to_string(),
            running: false,
        });
        self.current = id;
        id
    }

    /// Remove a script.
    ///
    /// Removing the selected script selects the first one; removing the
    /// last one seeds a fresh script.
    pub fn remove(&mut self, id: u64) -> bool {
        let Some(index) = self.scripts.iter().position(|s| s.id == id) else {
            return false;
        };
        self.scripts.remove(index);
        if self.scripts.is_empty() {
            self.add();
        }
        if self.current == id {
            self.current = self.scripts[0].id;
        }
        true
    }

    /// Rename a script
    pub fn rename(&mut self, id: u64, name: &str) -> bool {
        match self.get_mut(id) {
            Some(script) => {
                script.name = name.to_string();
                true
            }
            None => false,
        }
    }

    /// Replace a script's code
    pub fn set_code(&mut self, id: u64, code: &str) -> bool {
        match self.get_mut(id) {
            Some(script) => {
                script.code = code.to_string();
                true
            }
            None => false,
        }
    }

    /// Mark a script as running or stopped
    pub fn set_running(&mut self, id: u64, running: bool) -> bool {
        match self.get_mut(id) {
            Some(script) => {
                script.running = running;
                true
            }
            None => false,
        }
    }

    /// Mark every script as stopped
    pub fn clear_running(&mut self) {
        for script in &mut self.scripts {
            script.running = false;
        }
    }

    /// Export the scripts as JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.scripts)
    }

    /// Import scripts exported with [`ScriptLibrary::to_json`].
    ///
    /// Nothing is running after a load. The first script is selected; an
    /// empty list yields the default library.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        let mut scripts: Vec<ScriptItem> = serde_json::from_str(json)?;
        if scripts.is_empty() {
            return Ok(Self::default());
        }
        for script in &mut scripts {
            script.running = false;
        }
        let next_id = scripts.iter().map(|s| s.id).max().unwrap_or(0) + 1;
        Ok(Self {
            current: scripts[0].id,
            scripts,
            next_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_library_has_demo() {
        let library = ScriptLibrary::default();
        assert_eq!(library.scripts().len(), 1);
        assert_eq!(library.current().code, IMU_DEMO);
        assert_eq!(library.current().name, DEFAULT_SCRIPT_NAME);
    }

    #[test]
    fn test_add_select_remove() {
        let mut library = ScriptLibrary::default();
        let first = library.current().id;
        let second = library.add();
        assert_eq!(library.current().id, second);

        assert!(library.select(first));
        assert!(!library.select(99));
        assert!(library.rename(second, "Checksum"));
        assert!(library.set_code(second, "fn on_send(data) { append_checksum(data) }"));

        assert!(library.remove(first));
        assert_eq!(library.current().id, second);

        assert!(library.remove(second));
        assert_eq!(library.scripts().len(), 1);
        assert_ne!(library.current().id, second);
        assert_eq!(library.current().code, IMU_DEMO);
    }

    #[test]
    fn test_load_resets_running_flags() {
        let json = r#"[
            { "id": 1700000000000, "name": "a", "code": "", "isRunning": true },
            { "id": 5, "name": "b", "code": "", "running": true }
        ]"#;
        let mut library = ScriptLibrary::from_json(json).unwrap();
        assert!(library.scripts().iter().all(|s| !s.running));
        assert_eq!(library.current().id, 1_700_000_000_000);
        assert_eq!(library.add(), 1_700_000_000_001);

        let restored = ScriptLibrary::from_json(&library.to_json().unwrap()).unwrap();
        assert_eq!(restored.scripts(), library.scripts());
        assert_eq!(ScriptLibrary::from_json("[]").unwrap(), ScriptLibrary::default());
    }
}

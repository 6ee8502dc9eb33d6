//! The current-script slot
//!
//! A session has at most one active script. [`ScriptHost`] owns that slot,
//! is installed once as the session's [`DataInterceptor`] and forwards
//! both directions to whichever run is current.

use parking_lot::RwLock;
use serialkit_communication::{DataInterceptor, Session};
use serialkit_core::ScriptError;
use std::sync::Arc;

use crate::library::ScriptLibrary;
use crate::runtime::{ScriptContext, ScriptRuntime};

/// Holder of the current script run
pub struct ScriptHost {
    context: ScriptContext,
    current: RwLock<Option<ScriptRuntime>>,
}

impl ScriptHost {
    /// Create a host with no script running
    pub fn new(context: ScriptContext) -> Arc<Self> {
        Arc::new(Self {
            context,
            current: RwLock::new(None),
        })
    }

    /// Route `session`'s traffic through this host
    pub fn install(self: &Arc<Self>, session: &Session) {
        session.set_interceptor(Some(self.clone() as Arc<dyn DataInterceptor>));
    }

    /// Stop the current run, then start `source` as the new one
    pub fn run(&self, name: &str, source: &str) -> Result<ScriptRuntime, ScriptError> {
        self.stop();

        let runtime = ScriptRuntime::start(name, source, &self.context)?;
        if let Some(previous) = self.current.write().replace(runtime.clone()) {
            // Another run was installed concurrently
            previous.stop();
        }
        Ok(runtime)
    }

    /// Run the library's current script and update the `running` flags
    pub fn run_selected(&self, library: &mut ScriptLibrary) -> Result<ScriptRuntime, ScriptError> {
        let script = library.current().clone();
        library.clear_running();
        let runtime = self.run(&script.name, &script.code)?;
        library.set_running(script.id, true);
        Ok(runtime)
    }

    /// Stop the current run. Returns false if nothing was running.
    pub fn stop(&self) -> bool {
        match self.current.write().take() {
            Some(runtime) => runtime.stop(),
            None => false,
        }
    }

    /// The current run, if it is still active
    pub fn current(&self) -> Option<ScriptRuntime> {
        let runtime = self.current.read().clone()?;
        if runtime.is_running() {
            return Some(runtime);
        }

        // Stopped by a script error; release the slot
        let mut slot = self.current.write();
        if slot.as_ref().is_some_and(|r| r.run_id() == runtime.run_id()) {
            slot.take();
        }
        None
    }

    /// Whether a script is running
    pub fn is_running(&self) -> bool {
        self.current().is_some()
    }

    /// Services handed to script runs
    pub fn context(&self) -> &ScriptContext {
        &self.context
    }
}

impl DataInterceptor for ScriptHost {
    fn on_receive(&self, data: Vec<u8>) -> Vec<u8> {
        match self.current() {
            Some(runtime) => runtime.on_receive(data),
            None => data,
        }
    }

    fn on_send(&self, data: Vec<u8>) -> Vec<u8> {
        match self.current() {
            Some(runtime) => runtime.on_send(data),
            None => data,
        }
    }
}

impl std::fmt::Debug for ScriptHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptHost")
            .field("current", &*self.current.read())
            .finish()
    }
}

//! One run of a user script
//!
//! A [`ScriptRuntime`] compiles a script, evaluates its top level, calls
//! its optional `init()` and then serves the `on_receive`/`on_send` hooks
//! and any timers the script starts. Hooks and timer functions share one
//! `this` map, which is how state survives between calls:
//!
//! ```rhai
//! fn init() { #{ count: 0 } }
//!
//! fn on_receive(data) {
//!     this.count += 1;
//!     data
//! }
//! ```
//!
//! A hook may return a blob, a string (sent as UTF-8) or nothing (the
//! chunk passes through). Any failure publishes a `script-error` event,
//! stops the runtime and lets the chunk through unchanged.

use parking_lot::Mutex;
use rhai::{CallFnOptions, Dynamic, Engine, Map, Scope, AST};
use serialkit_communication::SendPipeline;
use serialkit_core::{BusEvent, EventBus, Scheduler, ScriptError};
use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};

use crate::engine::{build_engine, Capabilities, ScriptLimits, TimerOp};

/// Inbound hook name
pub const RECEIVE_HOOK: &str = "on_receive";

/// Outbound hook name
pub const SEND_HOOK: &str = "on_send";

/// State initialiser name
pub const INIT_FN: &str = "init";

/// Services a script run may use
#[derive(Clone)]
pub struct ScriptContext {
    /// Bus for `user-data` and `script-error` events
    pub bus: EventBus,
    /// Outbound queue behind `send`
    pub pipeline: SendPipeline,
    /// Scheduler behind `start_timer`
    pub scheduler: Arc<Scheduler>,
    /// Engine limits
    pub limits: ScriptLimits,
}

impl ScriptContext {
    /// Create a context with default limits
    pub fn new(bus: EventBus, pipeline: SendPipeline, scheduler: Arc<Scheduler>) -> Self {
        Self {
            bus,
            pipeline,
            scheduler,
            limits: ScriptLimits::default(),
        }
    }
}

struct ScriptState {
    this: Dynamic,
    scope: Scope<'static>,
}

struct RuntimeInner {
    run_id: String,
    name: String,
    engine: Engine,
    ast: AST,
    caps: Arc<Capabilities>,
    scheduler: Arc<Scheduler>,
    state: Mutex<ScriptState>,
    timers: Mutex<HashSet<String>>,
    has_receive: bool,
    has_send: bool,
}

impl RuntimeInner {
    fn has_fn(ast: &AST, name: &str, arity: usize) -> bool {
        ast.iter_functions()
            .any(|f| f.name == name && f.params.len() == arity)
    }

    fn timer_id(&self, id: &str) -> String {
        format!("script:{}:{}", self.run_id, id)
    }

    fn is_running(&self) -> bool {
        self.caps.is_running()
    }

    /// Top-level statements, then `init()`
    fn initialise(self: &Arc<Self>) -> Result<(), ScriptError> {
        {
            let mut state = self.state.lock();
            let ScriptState { this, scope } = &mut *state;
            self.engine
                .run_ast_with_scope(scope, &self.ast)
                .map_err(|e| ScriptError::Execution {
                    context: "top level".to_string(),
                    message: e.to_string(),
                })?;

            if Self::has_fn(&self.ast, INIT_FN, 0) {
                let value = self
                    .engine
                    .call_fn_with_options::<Dynamic>(
                        CallFnOptions::new().eval_ast(false),
                        scope,
                        &self.ast,
                        INIT_FN,
                        (),
                    )
                    .map_err(|e| ScriptError::Execution {
                        context: INIT_FN.to_string(),
                        message: e.to_string(),
                    })?;
                if value.is_map() {
                    *this = value;
                } else if !value.is_unit() {
                    return Err(ScriptError::InvalidReturn {
                        hook: INIT_FN.to_string(),
                        type_name: value.type_name().to_string(),
                    });
                }
            }
        }
        self.apply_timer_ops();
        Ok(())
    }

    fn call_hook(self: &Arc<Self>, hook: &'static str, data: Vec<u8>) -> Vec<u8> {
        if !self.is_running() {
            return data;
        }

        let result = {
            let mut state = self.state.lock();
            let ScriptState { this, scope } = &mut *state;
            self.engine.call_fn_with_options::<Dynamic>(
                CallFnOptions::new().eval_ast(false).bind_this_ptr(this),
                scope,
                &self.ast,
                hook,
                (Dynamic::from_blob(data.clone()),),
            )
        };

        let outcome = result
            .map_err(|e| ScriptError::Execution {
                context: hook.to_string(),
                message: e.to_string(),
            })
            .and_then(|value| hook_output(hook, value));

        match outcome {
            Ok(Some(bytes)) => {
                self.apply_timer_ops();
                bytes
            }
            Ok(None) => {
                self.apply_timer_ops();
                data
            }
            Err(e) => {
                self.fail(e);
                data
            }
        }
    }

    fn fire_timer(self: &Arc<Self>, func: &str) {
        if !self.is_running() {
            return;
        }

        let result = {
            let mut state = self.state.lock();
            let ScriptState { this, scope } = &mut *state;
            self.engine.call_fn_with_options::<Dynamic>(
                CallFnOptions::new().eval_ast(false).bind_this_ptr(this),
                scope,
                &self.ast,
                func,
                (),
            )
        };

        match result {
            Ok(_) => self.apply_timer_ops(),
            Err(e) => self.fail(ScriptError::Execution {
                context: format!("timer function {}", func),
                message: e.to_string(),
            }),
        }
    }

    /// Apply timer requests recorded during the last call.
    ///
    /// Must not run with the state lock held: scheduler calls wait for any
    /// callback in flight, and callbacks take the state lock.
    fn apply_timer_ops(self: &Arc<Self>) {
        for op in self.caps.take_timer_ops() {
            match op {
                TimerOp::Start { id, interval, func } => {
                    if !self.is_running() {
                        return;
                    }
                    let timer_id = self.timer_id(&id);
                    let weak: Weak<RuntimeInner> = Arc::downgrade(self);
                    self.scheduler.start(timer_id.clone(), interval, move || {
                        if let Some(inner) = weak.upgrade() {
                            inner.fire_timer(&func);
                        }
                    });
                    self.timers.lock().insert(timer_id.clone());
                    tracing::debug!(
                        "Script '{}' started timer {} every {:?}",
                        self.name,
                        id,
                        interval
                    );

                    // Lost a race with stop(); nobody else will clear it
                    if !self.is_running() {
                        self.scheduler.clear(&timer_id);
                        self.timers.lock().remove(&timer_id);
                    }
                }
                TimerOp::Stop { id } => {
                    let timer_id = self.timer_id(&id);
                    self.timers.lock().remove(&timer_id);
                    if self.scheduler.clear(&timer_id) {
                        tracing::debug!("Script '{}' stopped timer {}", self.name, id);
                    }
                }
            }
        }
    }

    fn fail(&self, error: ScriptError) {
        tracing::warn!("Script '{}' failed: {}", self.name, error);
        self.caps.bus.publish(BusEvent::ScriptError {
            message: error.to_string(),
        });
        self.stop();
    }

    fn stop(&self) -> bool {
        if !self.caps.running.swap(false, Ordering::SeqCst) {
            return false;
        }
        self.caps.take_timer_ops();
        let timers: Vec<String> = self.timers.lock().drain().collect();
        for id in &timers {
            self.scheduler.clear(id);
        }
        tracing::info!("Script '{}' stopped, {} timers cleared", self.name, timers.len());
        true
    }
}

impl Drop for RuntimeInner {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Convert a hook result into bytes. `None` means pass the input through.
fn hook_output(hook: &str, value: Dynamic) -> Result<Option<Vec<u8>>, ScriptError> {
    let type_name = value.type_name().to_string();
    let invalid = || ScriptError::InvalidReturn {
        hook: hook.to_string(),
        type_name: type_name.clone(),
    };

    if value.is_unit() {
        Ok(None)
    } else if value.is_blob() {
        value.into_blob().map(Some).map_err(|_| invalid())
    } else if value.is_string() {
        value
            .into_string()
            .map(|s| Some(s.into_bytes()))
            .map_err(|_| invalid())
    } else {
        Err(invalid())
    }
}

/// A running (or stopped) script. Cheap to clone.
#[derive(Clone)]
pub struct ScriptRuntime {
    inner: Arc<RuntimeInner>,
}

impl ScriptRuntime {
    /// Compile and start `source`.
    ///
    /// Failures are also published on `script-error`; nothing of the run
    /// is left behind.
    pub fn start(name: &str, source: &str, context: &ScriptContext) -> Result<Self, ScriptError> {
        let publish_error = |error: &ScriptError| {
            context.bus.publish(BusEvent::ScriptError {
                message: error.to_string(),
            });
        };

        let caps = Arc::new(Capabilities::new(
            context.pipeline.clone(),
            context.bus.clone(),
            name,
        ));
        let engine = build_engine(&context.limits, &caps);
        let ast = engine.compile(source).map_err(|e| {
            let error = ScriptError::Compile {
                message: e.to_string(),
            };
            tracing::warn!("Script '{}' does not compile: {}", name, error);
            publish_error(&error);
            error
        })?;

        let run_id = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
        let inner = Arc::new(RuntimeInner {
            has_receive: RuntimeInner::has_fn(&ast, RECEIVE_HOOK, 1),
            has_send: RuntimeInner::has_fn(&ast, SEND_HOOK, 1),
            run_id,
            name: name.to_string(),
            engine,
            ast,
            caps,
            scheduler: context.scheduler.clone(),
            state: Mutex::new(ScriptState {
                this: Dynamic::from_map(Map::new()),
                scope: Scope::new(),
            }),
            timers: Mutex::new(HashSet::new()),
        });

        if let Err(error) = inner.initialise() {
            inner.fail(error.clone());
            return Err(error);
        }

        tracing::info!(
            "Script '{}' started (run {}, receive hook: {}, send hook: {})",
            inner.name,
            inner.run_id,
            inner.has_receive,
            inner.has_send
        );
        Ok(Self { inner })
    }

    /// Run the inbound hook. Without one, or once stopped, bytes pass through.
    pub fn on_receive(&self, data: Vec<u8>) -> Vec<u8> {
        if !self.inner.has_receive {
            return data;
        }
        self.inner.call_hook(RECEIVE_HOOK, data)
    }

    /// Run the outbound hook. Without one, or once stopped, bytes pass through.
    pub fn on_send(&self, data: Vec<u8>) -> Vec<u8> {
        if !self.inner.has_send {
            return data;
        }
        self.inner.call_hook(SEND_HOOK, data)
    }

    /// Stop the run and clear its timers. Returns false if already stopped.
    pub fn stop(&self) -> bool {
        self.inner.stop()
    }

    /// Whether the run is still active
    pub fn is_running(&self) -> bool {
        self.inner.is_running()
    }

    /// Script name given at start
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Identifier of this run, used to namespace its timers
    pub fn run_id(&self) -> &str {
        &self.inner.run_id
    }

    /// Scheduler ids of the timers this run owns
    pub fn timers(&self) -> Vec<String> {
        let mut timers: Vec<String> = self.inner.timers.lock().iter().cloned().collect();
        timers.sort();
        timers
    }

    /// Whether the script defines `on_receive`
    pub fn has_receive_hook(&self) -> bool {
        self.inner.has_receive
    }

    /// Whether the script defines `on_send`
    pub fn has_send_hook(&self) -> bool {
        self.inner.has_send
    }
}

impl std::fmt::Debug for ScriptRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptRuntime")
            .field("name", &self.inner.name)
            .field("run_id", &self.inner.run_id)
            .field("running", &self.is_running())
            .finish()
    }
}

//! Rhai engine construction
//!
//! Builds a [`rhai::Engine`] with safety limits and the fixed capability
//! set available to user scripts.
//!
//! ## Codec
//!
//! - `encode(text)` - UTF-8 bytes of `text`
//! - `encode_hex(text)` - bytes of a `"48 49"` style hex string
//! - `decode(bytes)` - best-effort text
//! - `to_hex(bytes)` - uppercase space separated pairs
//! - `checksum(bytes)` - XOR fold
//! - `append_checksum(bytes)` / `verify_checksum(bytes)`
//! - `parse_fields(line)` - `"k:v,k:v"` to a map of floats
//!
//! ## Output
//!
//! - `send(bytes)` / `send(text)` / `send_hex(text)` - queue on the send pipeline
//! - `publish(map)` - emit a `user-data` event
//!
//! ## Timers
//!
//! - `start_timer(id, ms, fn_name)` - call `fn_name` every `ms` milliseconds
//! - `stop_timer(id)`
//!
//! Timer changes take effect once the current script call returns.
//! Every capability becomes a no-op after the runtime stops.

use parking_lot::Mutex;
use rhai::{Blob, Dynamic, Engine, EvalAltResult, Map, INT};
use serialkit_communication::SendPipeline;
use serialkit_core::codec;
use serialkit_core::{BusEvent, EventBus};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

type RhaiResult<T> = Result<T, Box<EvalAltResult>>;

/// Engine safety limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScriptLimits {
    /// Operations per script call
    pub max_operations: u64,
    /// Nested function calls
    pub max_call_levels: usize,
    /// Expression nesting, both global and in functions
    pub max_expr_depth: usize,
    /// String length in bytes
    pub max_string_size: usize,
    /// Array length
    pub max_array_size: usize,
    /// Map entries
    pub max_map_size: usize,
}

impl Default for ScriptLimits {
    fn default() -> Self {
        Self {
            max_operations: 100_000,
            max_call_levels: 32,
            max_expr_depth: 64,
            max_string_size: 64 * 1024,
            max_array_size: 10_000,
            max_map_size: 1_000,
        }
    }
}

/// Timer request recorded by a script call
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TimerOp {
    Start {
        id: String,
        interval: Duration,
        func: String,
    },
    Stop {
        id: String,
    },
}

/// Host services shared by every capability of one runtime
pub(crate) struct Capabilities {
    pub(crate) pipeline: SendPipeline,
    pub(crate) bus: EventBus,
    pub(crate) running: AtomicBool,
    timer_ops: Mutex<Vec<TimerOp>>,
    script_name: String,
}

impl Capabilities {
    pub(crate) fn new(pipeline: SendPipeline, bus: EventBus, script_name: &str) -> Self {
        Self {
            pipeline,
            bus,
            running: AtomicBool::new(true),
            timer_ops: Mutex::new(Vec::new()),
            script_name: script_name.to_string(),
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub(crate) fn take_timer_ops(&self) -> Vec<TimerOp> {
        std::mem::take(&mut *self.timer_ops.lock())
    }

    fn push_timer_op(&self, op: TimerOp) {
        if self.is_running() {
            self.timer_ops.lock().push(op);
        }
    }

    fn send(&self, bytes: Blob) -> RhaiResult<()> {
        if !self.is_running() {
            return Ok(());
        }
        self.pipeline
            .enqueue(bytes)
            .map_err(|e| format!("send failed: {}", e).into())
    }

    fn publish(&self, map: Map) -> RhaiResult<()> {
        if !self.is_running() {
            return Ok(());
        }
        let value: serde_json::Value = rhai::serde::from_dynamic(&Dynamic::from_map(map))?;
        self.bus.publish(BusEvent::UserData(value));
        Ok(())
    }
}

fn codec_error(e: serialkit_core::CodecError) -> Box<EvalAltResult> {
    e.to_string().into()
}

/// Split `"pitch:1.5,roll:-2"` into a map of floats.
///
/// Pairs that are not `key:number` are skipped.
pub fn parse_fields(line: &str) -> Map {
    let mut fields = Map::new();
    for pair in line.trim().split(',') {
        let mut parts = pair.split(':');
        let (Some(key), Some(value), None) = (parts.next(), parts.next(), parts.next()) else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        if let Ok(value) = value.trim().parse::<f64>() {
            fields.insert(key.into(), Dynamic::from_float(value));
        }
    }
    fields
}

/// Build an engine with limits and capabilities for one runtime
pub(crate) fn build_engine(limits: &ScriptLimits, caps: &Arc<Capabilities>) -> Engine {
    let mut engine = Engine::new();

    engine.set_max_operations(limits.max_operations);
    engine.set_max_call_levels(limits.max_call_levels);
    engine.set_max_expr_depths(limits.max_expr_depth, limits.max_expr_depth);
    engine.set_max_string_size(limits.max_string_size);
    engine.set_max_array_size(limits.max_array_size);
    engine.set_max_map_size(limits.max_map_size);

    {
        let name = caps.script_name.clone();
        engine.on_print(move |text| tracing::info!(script = %name, "{}", text));
    }
    {
        let name = caps.script_name.clone();
        engine.on_debug(move |text, _source, pos| {
            tracing::debug!(script = %name, "{} @ {}", text, pos)
        });
    }

    register_codec(&mut engine);

    {
        let caps = caps.clone();
        engine.register_fn("send", move |bytes: Blob| caps.send(bytes));
    }
    {
        let caps = caps.clone();
        engine.register_fn("send", move |text: &str| caps.send(text.as_bytes().to_vec()));
    }
    {
        let caps = caps.clone();
        engine.register_fn("send_hex", move |text: &str| -> RhaiResult<()> {
            let bytes = codec::encode(text, true).map_err(codec_error)?;
            caps.send(bytes)
        });
    }
    {
        let caps = caps.clone();
        engine.register_fn("publish", move |map: Map| caps.publish(map));
    }
    {
        let caps = caps.clone();
        engine.register_fn(
            "start_timer",
            move |id: &str, ms: INT, func: &str| -> RhaiResult<()> {
                if ms <= 0 {
                    return Err(
                        format!("timer '{}' needs a positive interval, got {}", id, ms).into(),
                    );
                }
                caps.push_timer_op(TimerOp::Start {
                    id: id.to_string(),
                    interval: Duration::from_millis(ms as u64),
                    func: func.to_string(),
                });
                Ok(())
            },
        );
    }
    {
        let caps = caps.clone();
        engine.register_fn("stop_timer", move |id: &str| {
            caps.push_timer_op(TimerOp::Stop { id: id.to_string() });
        });
    }

    engine
}

fn register_codec(engine: &mut Engine) {
    engine.register_fn("encode", |text: &str| -> Blob { text.as_bytes().to_vec() });
    engine.register_fn("encode_hex", |text: &str| -> RhaiResult<Blob> {
        codec::encode(text, true).map_err(codec_error)
    });
    engine.register_fn("decode", |bytes: Blob| -> String { codec::decode(&bytes) });
    engine.register_fn("to_hex", |bytes: Blob| -> String { codec::to_hex_string(&bytes) });
    engine.register_fn("checksum", |bytes: Blob| -> INT { codec::checksum(&bytes) as INT });
    engine.register_fn("append_checksum", |bytes: Blob| -> Blob {
        codec::append_checksum(&bytes)
    });
    engine.register_fn("verify_checksum", |bytes: Blob| -> bool {
        codec::verify_checksum(&bytes)
    });
    engine.register_fn("parse_fields", parse_fields);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> Engine {
        let caps = Arc::new(Capabilities::new(
            SendPipeline::new(EventBus::new(), Default::default()),
            EventBus::new(),
            "test",
        ));
        build_engine(&ScriptLimits::default(), &caps)
    }

    #[test]
    fn test_parse_fields() {
        let fields = parse_fields("pitch:-0.13,roll:0.00,yaw:0.07\n");
        assert_eq!(fields.len(), 3);
        assert_eq!(fields["pitch"].as_float().unwrap(), -0.13);

        let fields = parse_fields("a:1,broken,b:x,c:2:3,:4,d: 5 ");
        let keys: Vec<&str> = fields.keys().map(|k| k.as_str()).collect();
        assert_eq!(keys, vec!["a", "d"]);
    }

    #[test]
    fn test_codec_functions() {
        let engine = engine();
        let hex: String = engine.eval(r#"to_hex(encode("HI"))"#).unwrap();
        assert_eq!(hex, "48 49");

        let text: String = engine.eval(r#"decode(encode_hex("48 49"))"#).unwrap();
        assert_eq!(text, "HI");

        let sum: INT = engine.eval(r#"checksum(encode_hex("01 02 04"))"#).unwrap();
        assert_eq!(sum, 7);

        let ok: bool = engine
            .eval(r#"verify_checksum(append_checksum(encode("abc")))"#)
            .unwrap();
        assert!(ok);

        assert!(engine.eval::<Blob>(r#"encode_hex("4G")"#).is_err());
    }

    #[test]
    fn test_limits_are_enforced() {
        let engine = engine();
        assert!(engine.run("loop { }").is_err());
        assert!(engine
            .run(r#"let s = "x"; loop { s += s; }"#)
            .is_err());
    }

    #[test]
    fn test_capabilities_are_inert_after_stop() {
        let caps = Arc::new(Capabilities::new(
            SendPipeline::new(EventBus::new(), Default::default()),
            EventBus::new(),
            "test",
        ));
        let engine = build_engine(&ScriptLimits::default(), &caps);

        engine.run(r#"start_timer("a", 100, "tick");"#).unwrap();
        assert_eq!(caps.take_timer_ops().len(), 1);

        caps.running.store(false, Ordering::SeqCst);
        engine
            .run(r#"start_timer("a", 100, "tick"); send("x"); publish(#{ a: 1.0 });"#)
            .unwrap();
        assert!(caps.take_timer_ops().is_empty());
    }

    #[test]
    fn test_send_requires_connection() {
        let engine = engine();
        let err = engine.run(r#"send("x")"#).unwrap_err();
        assert!(err.to_string().contains("send failed"));
    }
}

//! Type aliases for commonly used complex types.
//!
//! Shared state in the pipeline is always thread-safe: transports, the send
//! pipeline and the scheduler are handed out as `Arc`s and may be touched
//! from tokio tasks and scheduler callbacks alike.

use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

/// A thread-safe, mutex-protected shared value.
pub type ThreadSafe<T> = Arc<Mutex<T>>;

/// A thread-safe optional value, for state that exists only while connected.
pub type ThreadSafeOption<T> = Arc<Mutex<Option<T>>>;

/// A thread-safe read-mostly shared value.
pub type ThreadSafeRw<T> = Arc<RwLock<T>>;

/// A periodic timer callback.
///
/// Stored behind `Arc` so the scheduler can invoke it without holding its
/// registry lock.
pub type TimerCallback = Arc<dyn Fn() + Send + Sync>;

/// Create a new thread-safe value.
#[inline]
pub fn thread_safe<T>(value: T) -> ThreadSafe<T> {
    Arc::new(Mutex::new(value))
}

/// Create a new empty thread-safe option.
#[inline]
pub fn thread_safe_none<T>() -> ThreadSafeOption<T> {
    Arc::new(Mutex::new(None))
}

/// Create a new thread-safe read-mostly value.
#[inline]
pub fn thread_safe_rw<T>(value: T) -> ThreadSafeRw<T> {
    Arc::new(RwLock::new(value))
}

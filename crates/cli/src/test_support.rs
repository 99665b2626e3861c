use std::sync::{Mutex, OnceLock, PoisonError};

fn env_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

/// Locks process environment mutation for the entire test body.
///
/// A test that panicked while holding the lock does not poison later ones.
pub(crate) fn with_locked_env<R>(run: impl FnOnce() -> R) -> R {
    let _guard = env_lock().lock().unwrap_or_else(PoisonError::into_inner);
    run()
}

/// Runs `run` with `vars` set, restoring previous values afterwards.
pub(crate) fn with_env_vars<R>(vars: &[(&str, &str)], run: impl FnOnce() -> R) -> R {
    with_locked_env(|| {
        let saved: Vec<(&str, Option<String>)> = vars
            .iter()
            .map(|(key, value)| {
                let previous = std::env::var(key).ok();
                set_env_var(key, value);
                (*key, previous)
            })
            .collect();
        let out = run();
        for (key, previous) in saved {
            match previous {
                Some(value) => set_env_var(key, &value),
                None => remove_env_var(key),
            }
        }
        out
    })
}

/// Set an environment variable in test contexts.
///
/// Callers must hold the lock taken by `with_locked_env`.
fn set_env_var(key: &str, value: &str) {
    // SAFETY: serialized by `env_lock`.
    unsafe {
        std::env::set_var(key, value);
    }
}

/// Remove an environment variable in test contexts.
fn remove_env_var(key: &str) {
    // SAFETY: serialized by `env_lock`.
    unsafe {
        std::env::remove_var(key);
    }
}

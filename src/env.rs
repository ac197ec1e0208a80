//! Process configuration read from environment variables.

use std::{cell::RefCell, ffi::OsStr, time::Duration};

use tracing::warn;

#[derive(Clone, Copy)]
struct Env {
    batch_budget: Option<Duration>,
    check_interval: Option<u32>,
}

thread_local! {
    /// Must only be mutated within `set_env`
    static ENV: RefCell<Option<Env>> = const { RefCell::new(None) };
}

pub fn init() {
    let value = Env {
        batch_budget: var_parse("CONSOLITE_BATCH_MS").map(Duration::from_millis),
        check_interval: var_parse("CONSOLITE_CHECK_INTERVAL").filter(|&n| n > 0),
    };
    set_env(value);
}

/// `CONSOLITE_BATCH_MS`, if set to a valid number of milliseconds.
pub fn batch_budget() -> Option<Duration> {
    with_env(|env| env.batch_budget)
}

/// `CONSOLITE_CHECK_INTERVAL`, if set to a positive number of cycles.
pub fn check_interval() -> Option<u32> {
    with_env(|env| env.check_interval)
}

fn set_env(value: Env) {
    ENV.with(|env| {
        let mut env = env.borrow_mut();
        assert!(
            env.is_none(),
            "tried to initialize environment state multiple times"
        );
        *env = Some(value);
    });
}

fn with_env<F, R>(callback: F) -> R
where
    F: Fn(&Env) -> R,
{
    ENV.with(|env| {
        let env = env.borrow();
        let env = env.unwrap_or_else(|| {
            panic!("tried to access environment state before initialization");
        });
        callback(&env)
    })
}

fn var_parse<T: std::str::FromStr>(name: impl AsRef<OsStr>) -> Option<T> {
    let name = name.as_ref();
    let value = std::env::var(name).ok()?;
    match value.trim().parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            warn!(var = ?name, value, "ignoring invalid environment variable");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_variables_once() {
        // `ENV` is per thread, but the variables are process-wide. No other test reads them
        std::env::set_var("CONSOLITE_BATCH_MS", "25");
        std::env::set_var("CONSOLITE_CHECK_INTERVAL", "0");
        init();
        assert_eq!(batch_budget(), Some(Duration::from_millis(25)));
        assert_eq!(check_interval(), None);
    }

    #[test]
    #[should_panic(expected = "before initialization")]
    fn read_before_init() {
        batch_budget();
    }
}

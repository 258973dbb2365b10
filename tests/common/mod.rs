//! Shared test utilities for the integration test suites.
//!
//! Import via `#[path = "../common/mod.rs"] mod common;` from a suite's main.rs.

#![allow(dead_code)]

use parking_lot::Mutex;
use std::io;
use std::sync::Arc;
use txstore::prelude::*;

// ============================================================================
// Value types
// ============================================================================

/// A value type with read-only support
#[derive(Debug, Clone, PartialEq)]
pub struct Person {
    name: String,
    balance: i64,
    flag: ReadOnlyFlag,
}

impl Person {
    pub fn new(name: &str, balance: i64) -> Self {
        Person {
            name: name.to_string(),
            balance,
            flag: ReadOnlyFlag::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn balance(&self) -> i64 {
        self.balance
    }

    pub fn set_name(&mut self, name: &str) -> Result<()> {
        self.flag.check_writable("name")?;
        self.name = name.to_string();
        Ok(())
    }

    pub fn set_balance(&mut self, balance: i64) -> Result<()> {
        self.flag.check_writable("balance")?;
        self.balance = balance;
        Ok(())
    }
}

impl TxValue for Person {
    const READ_ONLY_SUPPORTED: bool = true;

    fn switch_to_read_only(&mut self) {
        self.flag.switch_to_read_only();
    }

    fn switch_to_read_write(&mut self) {
        self.flag.switch_to_read_write();
    }
}

pub fn key(s: &str) -> String {
    s.to_string()
}

// ============================================================================
// Tracked views
// ============================================================================

/// Number of people whose name starts with a prefix
#[derive(Debug, Clone, PartialEq)]
pub struct PrefixCount {
    pub prefix: String,
    pub count: usize,
}

impl PrefixCount {
    pub fn new(prefix: &str) -> Self {
        PrefixCount {
            prefix: prefix.to_string(),
            count: 0,
        }
    }

    fn matches(&self, p: Option<&Person>) -> bool {
        p.map_or(false, |p| p.name().starts_with(&self.prefix))
    }
}

impl TrackedView<Person> for PrefixCount {
    fn clear(&mut self) {
        self.count = 0;
    }

    fn track_modification(
        &mut self,
        old: Option<&Person>,
        new: Option<&Person>,
    ) -> std::result::Result<(), ViewError> {
        if self.matches(old) {
            self.count -= 1;
        }
        if self.matches(new) {
            self.count += 1;
        }
        Ok(())
    }

    fn check_view(&self, values: &[Person]) -> std::result::Result<(), ViewError> {
        let actual = values.iter().filter(|p| self.matches(Some(p))).count();
        if actual == self.count {
            Ok(())
        } else {
            Err(ViewError::new(format!(
                "{} people start with '{}', view says {}",
                actual, self.prefix, self.count
            )))
        }
    }
}

/// Sum and count of balances
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Totals {
    pub sum: i64,
    pub count: usize,
}

impl TrackedView<Person> for Totals {
    fn clear(&mut self) {
        *self = Totals::default();
    }

    fn track_modification(
        &mut self,
        old: Option<&Person>,
        new: Option<&Person>,
    ) -> std::result::Result<(), ViewError> {
        if let Some(o) = old {
            self.sum -= o.balance();
            self.count -= 1;
        }
        if let Some(n) = new {
            self.sum += n.balance();
            self.count += 1;
        }
        Ok(())
    }

    fn check_view(&self, values: &[Person]) -> std::result::Result<(), ViewError> {
        let sum: i64 = values.iter().map(Person::balance).sum();
        if sum == self.sum && values.len() == self.count {
            Ok(())
        } else {
            Err(ViewError::new(format!("totals {:?} drifted", self)))
        }
    }
}

// ============================================================================
// Setup
// ============================================================================

pub fn people(config: StoreConfig) -> (Container, Store<String, Person>) {
    let container = Container::new();
    let store = container.create_store_with("people", config).unwrap();
    (container, store)
}

/// Commit one person per name, balance 0
pub fn seed(container: &Container, store: &Store<String, Person>, names: &[&str]) {
    container
        .with_local_tx("seed", || {
            for name in names {
                store.update(key(name), Person::new(name, 0))?;
            }
            Ok(())
        })
        .unwrap();
}

// ============================================================================
// Log capture
// ============================================================================

#[derive(Clone)]
struct BufMakeWriter(Arc<Mutex<Vec<u8>>>);

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for BufMakeWriter {
    type Writer = BufWriter;

    fn make_writer(&'a self) -> Self::Writer {
        BufWriter(Arc::clone(&self.0))
    }
}

struct BufWriter(Arc<Mutex<Vec<u8>>>);

impl io::Write for BufWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Run `f` with a debug-level subscriber on this thread, returning its output
pub fn with_tracing_capture<F, R>(f: F) -> (R, String)
where
    F: FnOnce() -> R,
{
    let buf = Arc::new(Mutex::new(Vec::new()));
    let subscriber = tracing_subscriber::fmt()
        .with_ansi(false)
        .with_max_level(tracing::Level::DEBUG)
        .with_writer(BufMakeWriter(Arc::clone(&buf)))
        .finish();

    let result = tracing::subscriber::with_default(subscriber, f);
    let bytes = buf.lock().clone();
    (result, String::from_utf8_lossy(&bytes).to_string())
}

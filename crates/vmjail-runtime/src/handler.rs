//! Named handler pipelines.
//!
//! A [`HandlerList`] is an ordered list of named steps. This module only
//! orders them; the machine lifecycle decides when a list runs.

use std::fmt;
use std::sync::Arc;

use vmjail_common::config::MachineConfig;
use vmjail_common::error::{JailError, Result};

/// State handed to every handler.
#[derive(Debug, Clone)]
pub struct Machine {
    /// Configuration, rewritten by provisioning handlers.
    pub config: MachineConfig,
    /// Pid of the launched jailer, once started.
    pub pid: Option<u32>,
}

impl Machine {
    /// Wraps a configuration for a machine that has not been started.
    #[must_use]
    pub const fn new(config: MachineConfig) -> Self {
        Self { config, pid: None }
    }
}

type HandlerFn = dyn Fn(&mut Machine) -> Result<()> + Send + Sync;

/// A named, side-effecting pipeline step.
#[derive(Clone)]
pub struct Handler {
    name: String,
    func: Arc<HandlerFn>,
}

impl Handler {
    /// Creates a handler from a name and an action.
    pub fn new(
        name: impl Into<String>,
        func: impl Fn(&mut Machine) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    /// Name of the handler.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runs the handler's action.
    ///
    /// # Errors
    ///
    /// Returns whatever the action returns.
    pub fn call(&self, machine: &mut Machine) -> Result<()> {
        (self.func)(machine)
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler").field("name", &self.name).finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
struct Entry {
    handler: Handler,
    // Anchor this entry was placed after, so later insertions after the
    // same anchor queue behind it.
    inserted_after: Option<String>,
}

/// Ordered list of uniquely named handlers.
///
/// Inserting a handler whose name is already present removes the old
/// entry first, except in [`swap_or_append`], which replaces in place.
///
/// [`swap_or_append`]: HandlerList::swap_or_append
#[derive(Debug, Clone, Default)]
pub struct HandlerList {
    entries: Vec<Entry>,
}

impl HandlerList {
    /// Creates an empty list.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Returns whether a handler with this name is present.
    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Number of handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns whether the list is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Handler names in execution order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.handler.name()).collect()
    }

    /// Returns the handler with this name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Handler> {
        self.position(name).map(|i| &self.entries[i].handler)
    }

    /// Appends a handler at the end.
    pub fn append(&mut self, handler: Handler) {
        let _ = self.remove(handler.name());
        self.entries.push(Entry {
            handler,
            inserted_after: None,
        });
    }

    /// Inserts a handler at the front.
    pub fn prepend(&mut self, handler: Handler) {
        let _ = self.remove(handler.name());
        self.entries.insert(
            0,
            Entry {
                handler,
                inserted_after: None,
            },
        );
    }

    /// Inserts `handler` after the handler named `anchor`.
    ///
    /// Handlers appended after the same anchor keep their call order: the
    /// new one lands behind the run that directly follows the anchor and
    /// was inserted after it, or after a member of that run. Chains such as
    /// `[A, X (after A), Y (after X)]` are therefore never split.
    ///
    /// # Errors
    ///
    /// Returns [`JailError::MissingHandler`] and leaves the list untouched
    /// if `anchor` is absent, or [`JailError::Config`] if `handler` is
    /// named like its own anchor.
    pub fn append_after(&mut self, anchor: &str, handler: Handler) -> Result<()> {
        if !self.has(anchor) {
            return Err(JailError::MissingHandler {
                name: anchor.to_string(),
            });
        }
        if handler.name() == anchor {
            return Err(JailError::Config {
                message: format!("handler {anchor} cannot be appended after itself"),
            });
        }

        let _ = self.remove(handler.name());
        let mut at = self.position(anchor).map_or(self.entries.len(), |i| i + 1);
        let mut chain = vec![anchor];
        while let Some(entry) = self.entries.get(at) {
            match entry.inserted_after.as_deref() {
                Some(after) if chain.contains(&after) => {
                    chain.push(entry.handler.name());
                    at += 1;
                }
                _ => break,
            }
        }
        tracing::debug!(anchor, handler = handler.name(), position = at, "inserting handler");
        self.entries.insert(
            at,
            Entry {
                handler,
                inserted_after: Some(anchor.to_string()),
            },
        );
        Ok(())
    }

    /// Replaces the handler with the same name in place, or appends it.
    pub fn swap_or_append(&mut self, handler: Handler) {
        if let Some(i) = self.position(handler.name()) {
            self.entries[i].handler = handler;
        } else {
            self.entries.push(Entry {
                handler,
                inserted_after: None,
            });
        }
    }

    /// Removes and returns the handler with this name.
    pub fn remove(&mut self, name: &str) -> Option<Handler> {
        self.position(name).map(|i| self.entries.remove(i).handler)
    }

    /// Removes every handler.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Runs every handler in order, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// Returns [`JailError::Handler`] naming the failed handler.
    pub fn run(&self, machine: &mut Machine) -> Result<()> {
        for entry in &self.entries {
            let name = entry.handler.name();
            tracing::debug!(handler = name, "running handler");
            entry.handler.call(machine).map_err(|e| JailError::Handler {
                name: name.to_string(),
                source: Box::new(e),
            })?;
        }
        Ok(())
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.handler.name() == name)
    }
}

/// The handler lists driven by the machine lifecycle.
#[derive(Debug, Clone, Default)]
pub struct Handlers {
    /// Steps that bring the machine up.
    pub init: HandlerList,
    /// Steps run when the machine shuts down.
    pub finish: HandlerList,
}

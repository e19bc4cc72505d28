//! Ordered shutdown registry, grounded on the original `singleton.cpp`: long-lived services
//! (object repositories, knowledge bases, endpoints) register a teardown closure in the
//! order they're constructed, and `ShutdownRegistry::shutdown_all` runs them in reverse so
//! nothing tears itself down while something built on top of it might still touch it.

pub struct ShutdownRegistry {
    teardowns: Vec<(&'static str, Box<dyn FnOnce() + Send>)>,
}

impl ShutdownRegistry {
    pub fn new() -> ShutdownRegistry {
        ShutdownRegistry { teardowns: Vec::new() }
    }

    /// Registers a named teardown closure. `name` is purely for the shutdown log line.
    pub fn register<F: FnOnce() + Send + 'static>(&mut self, name: &'static str, teardown: F) {
        self.teardowns.push((name, Box::new(teardown)));
    }

    /// Runs every registered teardown in reverse registration order, consuming the registry.
    pub fn shutdown_all(mut self, log: &flux::logging::Logger) {
        while let Some((name, teardown)) = self.teardowns.pop() {
            flux::logging::debug!(log, "running shutdown hook"; "name" => name);
            teardown();
        }
    }
}

impl Default for ShutdownRegistry {
    fn default() -> Self {
        ShutdownRegistry::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sloggers::types::Severity;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_teardowns_run_in_reverse_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut registry = ShutdownRegistry::new();

        let first = order.clone();
        registry.register("first", move || first.lock().unwrap().push("first"));

        let second = order.clone();
        registry.register("second", move || second.lock().unwrap().push("second"));

        registry.shutdown_all(&flux::logging::terminal(Severity::Critical));

        assert_eq!(*order.lock().unwrap(), vec!["second", "first"]);
    }
}

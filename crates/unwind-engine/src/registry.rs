use indexmap::IndexMap;
use std::sync::Mutex;

/// Per-function invocation counter shared by every session of a run.
///
/// Each session registers its function once at construction and receives
/// the function's invocation index, which names the session's definition
/// (`_{name}_{index}`).
#[derive(Debug, Default)]
pub struct InvocationRegistry {
    counts: Mutex<IndexMap<String, usize>>,
}

impl InvocationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one more invocation of `name`; returns the previous count.
    pub fn register(&self, name: &str) -> usize {
        let mut counts = match self.counts.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let count = counts.entry(name.to_string()).or_insert(0);
        let index = *count;
        *count += 1;
        index
    }

    /// Invocations of `name` registered so far.
    pub fn count(&self, name: &str) -> usize {
        let counts = match self.counts.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        counts.get(name).copied().unwrap_or(0)
    }
}

/// Definition name of the `index`-th invocation of `function`.
pub fn definition_name(function: &str, index: usize) -> String {
    format!("_{function}_{index}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn counts_per_function() {
        let registry = InvocationRegistry::new();
        assert_eq!(registry.register("run"), 0);
        assert_eq!(registry.register("run"), 1);
        assert_eq!(registry.register("main"), 0);
        assert_eq!(registry.count("run"), 2);
        assert_eq!(registry.count("other"), 0);
        assert_eq!(definition_name("run", 1), "_run_1");
    }

    #[test]
    fn registration_is_thread_safe() {
        let registry = Arc::new(InvocationRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || registry.register("shared"))
            })
            .collect();
        let mut seen: Vec<usize> = handles
            .into_iter()
            .map(|h| h.join().expect("thread finished"))
            .collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..8).collect::<Vec<_>>());
    }
}

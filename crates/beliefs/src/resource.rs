use std::fmt;
use std::sync::Arc;

/// Seam through which a resource announces count changes to its owning
/// agent's event queue. Installed by the runtime when the agent is created.
pub trait PerceptSink: Send + Sync {
    fn resource_changed(&self, resource: &str, count: i64);
}

/// A bounded integer counter used to de-conflict plans.
///
/// A resource belongs to exactly one agent's belief context; the agent never
/// controls the underlying quantity (a battery level, a winch), it only
/// reserves it. External systems may move the count at any time, triggering a
/// replan through the percept sink.
#[derive(Clone)]
pub struct Resource {
    name: String,
    count: i64,
    min: i64,
    max: i64,
    sink: Option<Arc<dyn PerceptSink>>,
}

impl Resource {
    pub fn new(name: impl Into<String>, min: i64, max: i64) -> Self {
        Self {
            name: name.into(),
            count: max,
            min,
            max,
            sink: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn count(&self) -> i64 {
        self.count
    }

    pub fn min(&self) -> i64 {
        self.min
    }

    pub fn max(&self) -> i64 {
        self.max
    }

    pub fn is_valid(&self) -> bool {
        self.count >= self.min && self.count <= self.max
    }

    pub fn set_sink(&mut self, sink: Arc<dyn PerceptSink>) {
        self.sink = Some(sink);
    }

    /// Set the count from an external system. Setting the current value is a
    /// no-op so that consuming zero does not emit spurious percepts.
    pub fn set(&mut self, count: i64) {
        if self.count == count {
            return;
        }
        self.count = count;
        if let Some(sink) = &self.sink {
            sink.resource_changed(&self.name, self.count);
        }
    }

    /// Consume an amount of the resource, returning the new count. The count
    /// may go out of bounds; callers gate on [`Resource::try_lock`] when they
    /// need the bound respected.
    pub fn consume(&mut self, amount: i64) -> i64 {
        let next = self.count - amount;
        self.set(next);
        next
    }

    /// Reserve one unit if that leaves the count within bounds.
    pub fn try_lock(&mut self) -> bool {
        if self.count - 1 >= self.min {
            self.consume(1);
            true
        } else {
            false
        }
    }

    /// True if one unit could be reserved right now.
    pub fn available(&self) -> bool {
        self.count - 1 >= self.min
    }

    pub fn unlock(&mut self) {
        self.set(self.count + 1);
    }
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("name", &self.name)
            .field("count", &self.count)
            .field("min", &self.min)
            .field("max", &self.max)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    struct Recorder(Mutex<Vec<i64>>);

    impl PerceptSink for Recorder {
        fn resource_changed(&self, _resource: &str, count: i64) {
            self.0.lock().unwrap().push(count);
        }
    }

    #[test]
    fn test_starts_at_max() {
        let r = Resource::new("battery", 0, 100);
        assert_eq!(r.count(), 100);
        assert!(r.is_valid());
    }

    #[test]
    fn test_lock_unlock_cycle() {
        let mut r = Resource::new("winch", 0, 1);
        assert!(r.try_lock());
        assert_eq!(r.count(), 0);
        assert!(!r.try_lock());
        r.unlock();
        assert_eq!(r.count(), 1);
        assert!(r.try_lock());
    }

    #[test]
    fn test_set_publishes_percepts() {
        let sink = Arc::new(Recorder(Mutex::new(Vec::new())));
        let mut r = Resource::new("battery", 0, 3);
        r.set_sink(sink.clone());
        r.try_lock();
        r.set(3);
        r.set(3); // unchanged, no percept
        assert_eq!(*sink.0.lock().unwrap(), vec![2, 3]);
    }

    #[test]
    fn test_consume_returns_new_count() {
        let mut r = Resource::new("fuel", 0, 10);
        assert_eq!(r.consume(4), 6);
        assert_eq!(r.count(), 6);
    }
}

//! Broker topology declared by the bus at startup.

// ============================================================================
// Queue Specification
// ============================================================================

/// A durable queue and the routing patterns that feed it.
///
/// `initialize()` declares every queue listed on the bus, binds it to the
/// bus exchange once per pattern, and starts a consumer task for it.
/// Patterns are dot-delimited routing keys where `*` matches exactly one
/// segment (`"achievement.*"` matches `"achievement.completed"` but not
/// `"achievement.progress.updated"`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueueSpec {
    /// Queue name as declared on the broker.
    pub name: String,
    /// Binding patterns routing exchange traffic into this queue.
    pub bindings: Vec<String>,
}

impl QueueSpec {
    /// Create a queue specification.
    pub fn new(
        name: impl Into<String>,
        bindings: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            name: name.into(),
            bindings: bindings.into_iter().map(Into::into).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_spec_collects_bindings() {
        let spec = QueueSpec::new("progression", ["achievement.*", "quest.*"]);
        assert_eq!(spec.name, "progression");
        assert_eq!(spec.bindings, vec!["achievement.*", "quest.*"]);
    }
}

/// Configuration for query behavior.
///
/// This controls which triggers make a query fetch on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryConfig {
    /// Whether the query fetches when it is created.
    ///
    /// When `false`, nothing is fetched until [`refetch`](crate::query::QueryHandle::refetch)
    /// is called explicitly.
    pub enabled: bool,

    /// Whether the query refetches when the host page becomes visible again.
    pub refetch_on_window_focus: bool,

    /// Whether the query refetches when the host navigates.
    pub refetch_on_navigate: bool,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            refetch_on_window_focus: true,
            refetch_on_navigate: true,
        }
    }
}

impl QueryConfig {
    /// Creates a configuration with every trigger on.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            enabled: true,
            refetch_on_window_focus: true,
            refetch_on_navigate: true,
        }
    }

    #[must_use]
    pub const fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    #[must_use]
    pub const fn refetch_on_window_focus(mut self, refetch: bool) -> Self {
        self.refetch_on_window_focus = refetch;
        self
    }

    #[must_use]
    pub const fn refetch_on_navigate(mut self, refetch: bool) -> Self {
        self.refetch_on_navigate = refetch;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = QueryConfig::default();
        assert!(config.enabled);
        assert!(config.refetch_on_window_focus);
        assert!(config.refetch_on_navigate);
        assert_eq!(config, QueryConfig::new());
    }

    #[test]
    fn test_builder() {
        let config = QueryConfig::new()
            .enabled(false)
            .refetch_on_window_focus(false);
        assert!(!config.enabled);
        assert!(!config.refetch_on_window_focus);
        assert!(config.refetch_on_navigate);
    }
}

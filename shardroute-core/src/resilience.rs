//! Deadlines for calls against data and monitor nodes

pub mod timeout {
    //! Timeout configuration for node calls

    use std::time::Duration;

    /// Default deadline for a single node command
    pub const NODE_CALL_TIMEOUT: Duration = Duration::from_secs(2);

    /// Default deadline for establishing a connection
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

    /// Timeout configuration
    #[derive(Debug, Clone, Copy)]
    pub struct TimeoutConfig {
        pub call: Duration,
        pub connect: Duration,
    }

    impl Default for TimeoutConfig {
        fn default() -> Self {
            Self {
                call: NODE_CALL_TIMEOUT,
                connect: CONNECT_TIMEOUT,
            }
        }
    }

    impl TimeoutConfig {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Set the per-command timeout
        #[must_use]
        pub const fn with_call_timeout(mut self, timeout: Duration) -> Self {
            self.call = timeout;
            self
        }

        /// Set the connection setup timeout
        #[must_use]
        pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
            self.connect = timeout;
            self
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_builder() {
            let config = TimeoutConfig::new()
                .with_call_timeout(Duration::from_millis(250))
                .with_connect_timeout(Duration::from_secs(1));
            assert_eq!(config.call, Duration::from_millis(250));
            assert_eq!(config.connect, Duration::from_secs(1));
            assert_eq!(TimeoutConfig::default().call, NODE_CALL_TIMEOUT);
        }
    }
}

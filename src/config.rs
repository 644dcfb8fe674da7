//! Tunables for the negotiation service and the sled-backed event store
use crate::approvers::ImplicitGiver;
use crate::types::TimeSpan;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiationConfig {
    /// Attempts at load, mutate and save before a version conflict is surfaced.
    pub max_save_attempts: u32,
    pub implicit_giver: ImplicitGiver,
    /// Applied to candidates that carry no expiration time of their own.
    pub default_offer_ttl: Option<TimeSpan>,
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            max_save_attempts: 5,
            implicit_giver: ImplicitGiver::default(),
            default_offer_ttl: None,
        }
    }
}

impl NegotiationConfig {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_max_save_attempts(mut self, attempts: u32) -> Self {
        // one attempt is the floor, zero would never save anything
        self.max_save_attempts = attempts.max(1);
        self
    }
    pub fn set_implicit_giver(mut self, policy: ImplicitGiver) -> Self {
        self.implicit_giver = policy;
        self
    }
    /// A negative span is rejected and leaves offers without a default
    /// expiration.
    pub fn set_default_offer_ttl(mut self, ttl: TimeSpan) -> Self {
        self.default_offer_ttl = (!ttl.is_negative()).then_some(ttl);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventStoreConfig {
    pub path: Option<PathBuf>,
    /// Delete the database when the store is dropped.
    pub temporary: bool,
}

impl EventStoreConfig {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }
    pub fn set_temporary(mut self, temporary: bool) -> Self {
        self.temporary = temporary;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_setters() {
        let config = NegotiationConfig::new()
            .set_max_save_attempts(0)
            .set_implicit_giver(ImplicitGiver::ResourceOwner)
            .set_default_offer_ttl(TimeSpan::hours(48));

        assert_eq!(config.max_save_attempts, 1);
        assert_eq!(config.implicit_giver, ImplicitGiver::ResourceOwner);
        assert_eq!(config.default_offer_ttl, Some(TimeSpan::hours(48)));
        assert_eq!(NegotiationConfig::default().max_save_attempts, 5);
    }

    #[test]
    fn negative_ttl_is_rejected() {
        let config = NegotiationConfig::new()
            .set_default_offer_ttl(TimeSpan::hours(1))
            .set_default_offer_ttl(TimeSpan::minutes(-5));

        assert_eq!(config.default_offer_ttl, None);
        assert_eq!(
            NegotiationConfig::new()
                .set_default_offer_ttl(TimeSpan::seconds(0))
                .default_offer_ttl,
            Some(TimeSpan::seconds(0))
        );
    }
}

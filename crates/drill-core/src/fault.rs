//! Declarative fault rules and the injector contract.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::ConnectionMode;
use crate::error::DrillResult;
use crate::store::ContainerRef;

/// Store operation a rule applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FaultOperationType {
    ReadItem,
    CreateItem,
    UpsertItem,
    QueryItems,
}

impl fmt::Display for FaultOperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ReadItem => "READ_ITEM",
            Self::CreateItem => "CREATE_ITEM",
            Self::UpsertItem => "UPSERT_ITEM",
            Self::QueryItems => "QUERY_ITEMS",
        };
        f.write_str(name)
    }
}

/// Which requests a rule matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultCondition {
    pub operation: FaultOperationType,
    pub connection: ConnectionMode,
    pub region: String,
}

/// What a matching request experiences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FaultEffect {
    /// Delay the response; with suppression the service never sees the
    /// request.
    ResponseDelay {
        delay: Duration,
        suppress_service_requests: bool,
    },
}

/// Time-windowed fault rule.
///
/// The window is `[start_delay, start_delay + duration)` measured from the
/// moment the rule is configured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultRule {
    pub id: String,
    pub condition: FaultCondition,
    pub start_delay: Duration,
    pub duration: Duration,
    pub effect: FaultEffect,
}

impl FaultRule {
    /// Whether `elapsed` (since configuration) falls inside the window.
    #[must_use]
    pub fn is_active_at(&self, elapsed: Duration) -> bool {
        elapsed >= self.start_delay && elapsed < self.start_delay + self.duration
    }

    /// Whether a request matches the rule's condition.
    #[must_use]
    pub fn matches(
        &self,
        operation: FaultOperationType,
        connection: ConnectionMode,
        region: &str,
    ) -> bool {
        self.condition.operation == operation
            && self.condition.connection == connection
            && self.condition.region.eq_ignore_ascii_case(region)
    }
}

/// Accepts fault rules for a container.
#[async_trait]
pub trait FaultInjector: Send + Sync {
    /// Registers `rules` against `target`. Windows start counting now.
    async fn configure_rules(&self, target: &ContainerRef, rules: Vec<FaultRule>) -> DrillResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule() -> FaultRule {
        FaultRule {
            id: "response-delay-test".to_string(),
            condition: FaultCondition {
                operation: FaultOperationType::ReadItem,
                connection: ConnectionMode::Direct,
                region: "East US".to_string(),
            },
            start_delay: Duration::from_secs(60),
            duration: Duration::from_secs(30),
            effect: FaultEffect::ResponseDelay {
                delay: Duration::from_secs(11),
                suppress_service_requests: true,
            },
        }
    }

    #[test]
    fn test_window_bounds() {
        let rule = rule();
        assert!(!rule.is_active_at(Duration::from_secs(59)));
        assert!(rule.is_active_at(Duration::from_secs(60)));
        assert!(rule.is_active_at(Duration::from_secs(89)));
        assert!(!rule.is_active_at(Duration::from_secs(90)));
    }

    #[test]
    fn test_condition_matching() {
        let rule = rule();
        assert!(rule.matches(FaultOperationType::ReadItem, ConnectionMode::Direct, "east us"));
        assert!(!rule.matches(FaultOperationType::QueryItems, ConnectionMode::Direct, "East US"));
        assert!(!rule.matches(FaultOperationType::ReadItem, ConnectionMode::Gateway, "East US"));
        assert!(!rule.matches(FaultOperationType::ReadItem, ConnectionMode::Direct, "West US"));
    }
}

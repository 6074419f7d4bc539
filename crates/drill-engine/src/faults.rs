//! Response-delay fault schedule.

use drill_core::{
    ConnectionMode, ContainerRef, DrillResult, FaultCondition, FaultEffect, FaultInjectionConfig,
    FaultInjector, FaultOperationType, FaultRule,
};
use uuid::Uuid;

/// Builds the windowed read-delay rules for a continuous drill.
///
/// Window `i` starts at `first_window_offset + i * window_spacing` after the
/// rules are configured. Returns no rules when injection is disabled.
#[must_use]
pub fn build_fault_rules(config: &FaultInjectionConfig, connection: ConnectionMode) -> Vec<FaultRule> {
    if !config.enabled {
        return Vec::new();
    }

    (0..config.windows)
        .map(|window| FaultRule {
            id: format!("response-delay-{}", Uuid::new_v4()),
            condition: FaultCondition {
                operation: FaultOperationType::ReadItem,
                connection,
                region: config.region.clone(),
            },
            start_delay: config.first_window_offset + config.window_spacing * window,
            duration: config.window_duration,
            effect: FaultEffect::ResponseDelay {
                delay: config.response_delay,
                suppress_service_requests: config.suppress_service_requests,
            },
        })
        .collect()
}

/// Hands `rules` to the injector once. An empty rule set never reaches it.
pub async fn submit_fault_rules(
    injector: &dyn FaultInjector,
    target: &ContainerRef,
    rules: Vec<FaultRule>,
) -> DrillResult<usize> {
    if rules.is_empty() {
        tracing::info!(%target, "fault injection disabled, no rules submitted");
        return Ok(0);
    }

    for rule in &rules {
        tracing::info!(
            rule_id = %rule.id,
            operation = %rule.condition.operation,
            region = %rule.condition.region,
            connection = %rule.condition.connection,
            start_delay = %humantime::format_duration(rule.start_delay),
            duration = %humantime::format_duration(rule.duration),
            "scheduling fault rule"
        );
    }

    let count = rules.len();
    injector.configure_rules(target, rules).await?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn enabled() -> FaultInjectionConfig {
        FaultInjectionConfig {
            enabled: true,
            ..FaultInjectionConfig::default()
        }
    }

    #[test]
    fn test_default_schedule() {
        let rules = build_fault_rules(&enabled(), ConnectionMode::Direct);
        assert_eq!(rules.len(), 2);

        assert_eq!(rules[0].start_delay, Duration::from_secs(11 * 60));
        assert_eq!(rules[1].start_delay, Duration::from_secs(41 * 60));
        for rule in &rules {
            assert!(rule.id.starts_with("response-delay-"));
            assert_eq!(rule.duration, Duration::from_secs(20 * 60));
            assert_eq!(rule.condition.operation, FaultOperationType::ReadItem);
            assert_eq!(rule.condition.connection, ConnectionMode::Direct);
            assert_eq!(rule.condition.region, "East US");
            assert_eq!(
                rule.effect,
                FaultEffect::ResponseDelay {
                    delay: Duration::from_secs(11),
                    suppress_service_requests: true,
                }
            );
        }
        assert_ne!(rules[0].id, rules[1].id);
    }

    #[test]
    fn test_window_offsets() {
        let config = FaultInjectionConfig {
            windows: 5,
            first_window_offset: Duration::from_secs(30),
            window_spacing: Duration::from_secs(90),
            ..enabled()
        };
        let rules = build_fault_rules(&config, ConnectionMode::Gateway);

        let starts: Vec<u64> = rules.iter().map(|rule| rule.start_delay.as_secs()).collect();
        assert_eq!(starts, vec![30, 120, 210, 300, 390]);
        assert!(rules
            .iter()
            .all(|rule| rule.condition.connection == ConnectionMode::Gateway));
    }

    #[test]
    fn test_disabled_builds_nothing() {
        let rules = build_fault_rules(&FaultInjectionConfig::default(), ConnectionMode::Direct);
        assert!(rules.is_empty());
    }
}

//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, addresses parse, ordered thresholds)
//! - Check command templates reference the placeholders they need
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: LinkguardConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::LinkguardConfig;

/// One semantic problem, named by its dotted field path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Check every section, collecting all problems.
pub fn validate_config(config: &LinkguardConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.storage.data_dir.trim().is_empty() {
        errors.push(ValidationError::new("storage.data_dir", "must not be empty"));
    }
    if config.storage.credential_service.trim().is_empty() {
        errors.push(ValidationError::new("storage.credential_service", "must not be empty"));
    }

    if url::Url::parse(&config.probe.url).is_err() {
        errors.push(ValidationError::new(
            "probe.url",
            format!("'{}' is not a valid URL", config.probe.url),
        ));
    }
    if config.probe.timeout_ms == 0 {
        errors.push(ValidationError::new("probe.timeout_ms", "must be greater than 0"));
    }

    if config.source.poll_interval_secs == 0 {
        errors.push(ValidationError::new("source.poll_interval_secs", "must be greater than 0"));
    }

    let monitor = &config.monitor;
    if monitor.history_size < 5 {
        errors.push(ValidationError::new("monitor.history_size", "must be at least 5"));
    }
    if monitor.excellent_latency_ms >= monitor.good_latency_ms {
        errors.push(ValidationError::new(
            "monitor.excellent_latency_ms",
            "must be below monitor.good_latency_ms",
        ));
    }
    if monitor.weak_signal_threshold > 100 {
        errors.push(ValidationError::new("monitor.weak_signal_threshold", "must be 0..=100"));
    }

    let failover = &config.failover;
    if failover.max_attempts == 0 {
        errors.push(ValidationError::new("failover.max_attempts", "must be greater than 0"));
    }
    if failover.base_delay_ms > failover.max_delay_ms {
        errors.push(ValidationError::new(
            "failover.base_delay_ms",
            "must not exceed failover.max_delay_ms",
        ));
    }
    if !(0.0..=1.0).contains(&failover.jitter_ratio) {
        errors.push(ValidationError::new("failover.jitter_ratio", "must be within 0.0..=1.0"));
    }
    if failover.association_timeout_ms == 0 {
        errors.push(ValidationError::new(
            "failover.association_timeout_ms",
            "must be greater than 0",
        ));
    }

    let dispatcher = &config.dispatcher;
    if dispatcher.capacity == 0 {
        errors.push(ValidationError::new("dispatcher.capacity", "must be greater than 0"));
    }
    if dispatcher.max_attempts == 0 {
        errors.push(ValidationError::new("dispatcher.max_attempts", "must be greater than 0"));
    }
    if dispatcher.base_delay_ms > dispatcher.max_delay_ms {
        errors.push(ValidationError::new(
            "dispatcher.base_delay_ms",
            "must not exceed dispatcher.max_delay_ms",
        ));
    }
    if dispatcher.request_timeout_ms == 0 {
        errors.push(ValidationError::new("dispatcher.request_timeout_ms", "must be greater than 0"));
    }
    if dispatcher.retention_secs == 0 {
        errors.push(ValidationError::new("dispatcher.retention_secs", "must be greater than 0"));
    }
    if dispatcher.expiry_sweep_ms == 0 {
        errors.push(ValidationError::new("dispatcher.expiry_sweep_ms", "must be greater than 0"));
    }

    let attachment = &config.attachment;
    if !attachment.command.is_empty()
        && !attachment.command.iter().any(|arg| arg.contains("{name}"))
    {
        errors.push(ValidationError::new("attachment.command", "must reference {name}"));
    }
    if !attachment.open_command.is_empty()
        && !attachment.open_command.iter().any(|arg| arg.contains("{name}"))
    {
        errors.push(ValidationError::new("attachment.open_command", "must reference {name}"));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", config.observability.metrics_address),
        ));
    }

    if config.admin.enabled {
        if config.admin.bind_address.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::new(
                "admin.bind_address",
                format!("'{}' is not a socket address", config.admin.bind_address),
            ));
        }
        if config.admin.api_key.trim().is_empty() {
            errors.push(ValidationError::new("admin.api_key", "must not be empty"));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(validate_config(&LinkguardConfig::default()).is_ok());
    }

    #[test]
    fn test_all_errors_reported_together() {
        let mut config = LinkguardConfig::default();
        config.probe.url = "not a url".to_string();
        config.dispatcher.capacity = 0;
        config.failover.jitter_ratio = 2.0;
        config.monitor.excellent_latency_ms = 5_000;

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert_eq!(
            fields,
            vec![
                "probe.url",
                "monitor.excellent_latency_ms",
                "failover.jitter_ratio",
                "dispatcher.capacity",
            ]
        );
    }

    #[test]
    fn test_attachment_template_needs_name() {
        let mut config = LinkguardConfig::default();
        config.attachment.command = vec!["connect".into(), "{credential}".into()];
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field, "attachment.command");
    }

    #[test]
    fn test_admin_address_checked_only_when_enabled() {
        let mut config = LinkguardConfig::default();
        config.admin.bind_address = "nowhere".to_string();
        assert!(validate_config(&config).is_ok());

        config.admin.enabled = true;
        assert!(validate_config(&config).is_err());
    }
}

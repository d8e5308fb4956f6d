//! Fault injection.
//!
//! Drives the chaos scenarios the pipeline is tested against: a bounded run
//! of injected transient failures, or a content marker treated as fatal.
//! Parsed from the `FAIL_MODE` environment value; production runs with
//! `none`.

use std::sync::atomic::{AtomicU32, Ordering};

use sagaline_core::config::ConfigError;

/// Configured failure injection for the step processor.
#[derive(Debug, Default)]
pub struct FaultInjector {
    transient_remaining: AtomicU32,
    fatal_marker: Option<String>,
}

impl FaultInjector {
    /// No injection; every command processes normally.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Fails the next `count` effect applications with a transient error.
    #[must_use]
    pub fn transient(count: u32) -> Self {
        Self {
            transient_remaining: AtomicU32::new(count),
            fatal_marker: None,
        }
    }

    /// Treats commands whose content equals `marker` as fatal.
    #[must_use]
    pub fn fatal_content(marker: impl Into<String>) -> Self {
        Self {
            transient_remaining: AtomicU32::new(0),
            fatal_marker: Some(marker.into()),
        }
    }

    /// Parses a `FAIL_MODE` value: `none`, `transient:<count>`, or
    /// `fatal:<marker>`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for unknown modes or a bad count.
    pub fn parse(mode: &str) -> Result<Self, ConfigError> {
        let mode = mode.trim();
        if mode.is_empty() || mode == "none" {
            return Ok(Self::none());
        }
        if let Some(count) = mode.strip_prefix("transient:") {
            let count = count
                .parse()
                .map_err(|_| ConfigError(format!("bad FAIL_MODE count: {mode}")))?;
            return Ok(Self::transient(count));
        }
        if let Some(marker) = mode.strip_prefix("fatal:") {
            return Ok(Self::fatal_content(marker));
        }
        Err(ConfigError(format!("unknown FAIL_MODE: {mode}")))
    }

    /// Consumes one injected transient failure, if any remain.
    pub fn take_transient(&self) -> bool {
        self.transient_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    /// Whether `content` matches the configured fatal marker.
    #[must_use]
    pub fn is_fatal_content(&self, content: Option<&str>) -> bool {
        match (&self.fatal_marker, content) {
            (Some(marker), Some(content)) => marker == content,
            _ => false,
        }
    }
}

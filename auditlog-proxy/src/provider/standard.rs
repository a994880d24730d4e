//! Pass-through provider writing each event as a structured log record

use async_trait::async_trait;

use super::Provider;
use crate::audit::EventList;
use crate::error::ProviderError;

/// Logs one record per event: object reference, audit level and user
#[derive(Debug, Default)]
pub struct StandardProvider;

impl StandardProvider {
    /// Registry name
    pub const NAME: &'static str = "standard";

    /// Create the provider
    pub fn new() -> Self {
        Self
    }

    /// Registry constructor
    pub fn construct() -> Result<Box<dyn Provider>, ProviderError> {
        Ok(Box::new(Self::new()))
    }
}

#[async_trait]
impl Provider for StandardProvider {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn log(&self, events: EventList) -> Result<(), ProviderError> {
        for event in &events.items {
            tracing::info!(
                level = %event.level.map_or("", |level| level.as_str()),
                user = %event.user.username,
                "{}",
                event.object_summary()
            );
        }
        Ok(())
    }
}

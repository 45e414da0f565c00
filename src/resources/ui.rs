//! `@ui`: a browser driver session

use std::sync::Arc;

use crate::common::Result;
use crate::scenario::ScenarioContext;
use crate::transport::UiDriver;

use super::{cached, store, ResourceKind, Runtime};

pub struct UiRuntime {
    driver: Arc<dyn UiDriver>,
}

impl UiRuntime {
    pub fn new(driver: Arc<dyn UiDriver>) -> Self {
        Self { driver }
    }

    pub fn driver(&self) -> Arc<dyn UiDriver> {
        Arc::clone(&self.driver)
    }

    /// Quit the driver session
    pub async fn release(&self) -> Result<()> {
        self.driver.quit().await
    }
}

/// Provision or reuse the UI driver
pub async fn ensure_ui(ctx: &mut ScenarioContext<'_>) -> Result<Arc<UiRuntime>> {
    if let Some(runtime) = cached(ctx.registry_mut(), ResourceKind::Ui, Runtime::as_ui)? {
        ctx.bindings.ui = Some(runtime.driver());
        return Ok(runtime);
    }

    let driver = ctx.connectors().ui.launch().await?;
    tracing::debug!(driver = driver.name(), "UI driver launched");

    let runtime = Arc::new(UiRuntime::new(driver));
    store(ctx.registry_mut(), Runtime::Ui(runtime.clone()))?;
    ctx.bindings.ui = Some(runtime.driver());
    Ok(runtime)
}

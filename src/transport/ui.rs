//! UI driver seam
//!
//! Browser automation sits behind [`UiDriver`]. The bundled
//! [`HeadlessDriver`] records navigation only; real drivers plug in through
//! the UI connector.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::common::{Error, Result};

#[async_trait]
pub trait UiDriver: Send + Sync {
    /// Driver name for logs
    fn name(&self) -> &str;

    async fn open(&self, url: &str) -> Result<()>;

    async fn current_url(&self) -> Result<Option<String>>;

    /// End the browser session
    async fn quit(&self) -> Result<()>;
}

/// Driver that tracks visited URLs without a browser
#[derive(Debug, Default)]
pub struct HeadlessDriver {
    history: Mutex<Vec<String>>,
    quit: AtomicBool,
}

impl HeadlessDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        !self.quit.load(Ordering::SeqCst)
    }

    pub fn history(&self) -> Vec<String> {
        self.history
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn check_running(&self) -> Result<()> {
        if self.is_running() {
            Ok(())
        } else {
            Err(Error::Ui("driver has quit".to_string()))
        }
    }
}

#[async_trait]
impl UiDriver for HeadlessDriver {
    fn name(&self) -> &str {
        "headless"
    }

    async fn open(&self, url: &str) -> Result<()> {
        self.check_running()?;
        self.history
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(url.to_string());
        Ok(())
    }

    async fn current_url(&self) -> Result<Option<String>> {
        self.check_running()?;
        Ok(self.history().last().cloned())
    }

    async fn quit(&self) -> Result<()> {
        if !self.quit.swap(true, Ordering::SeqCst) {
            tracing::debug!("Headless driver quit");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_headless_driver_lifecycle() {
        let driver = HeadlessDriver::new();
        driver.open("http://localhost/login").await.unwrap();
        assert_eq!(
            driver.current_url().await.unwrap().as_deref(),
            Some("http://localhost/login")
        );
        driver.quit().await.unwrap();
        assert!(!driver.is_running());
        assert!(driver.open("http://localhost/").await.is_err());
        assert!(driver.current_url().await.is_err());
    }
}

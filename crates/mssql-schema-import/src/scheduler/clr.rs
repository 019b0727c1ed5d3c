//! CLR integration and the `clr strict security` guard.

use crate::config::ClrSettings;
use crate::error::Result;
use crate::target::{BatchExecutor, CLR_ENABLED, CLR_STRICT_SECURITY, SHOW_ADVANCED_OPTIONS};
use tracing::{debug, error, info};

/// Holds the server's original `clr strict security` value while an import
/// runs with it relaxed.
///
/// Changing strict security needs `show advanced options`; when the guard
/// has to turn that on, it turns it back off on release, even if strict
/// security is configured to stay relaxed.
///
/// Call [`StrictSecurityGuard::release`] on every exit path. The setting is
/// server-wide, so two imports against one instance must not overlap.
#[derive(Debug)]
pub struct StrictSecurityGuard {
    original: Option<i64>,
    /// Prior `show advanced options` value, set only if the guard changed it.
    advanced_original: Option<i64>,
    restore: bool,
    released: bool,
}

impl StrictSecurityGuard {
    fn inactive() -> Self {
        Self {
            original: None,
            advanced_original: None,
            restore: false,
            released: false,
        }
    }

    /// Enable CLR integration and relax strict security as configured.
    pub async fn acquire(executor: &mut dyn BatchExecutor, clr: &ClrSettings) -> Result<Self> {
        if !clr.enable_clr {
            return Ok(Self::inactive());
        }

        if executor.server_option(CLR_ENABLED).await? != 1 {
            executor.set_server_option(CLR_ENABLED, 1).await?;
            info!("CLR integration enabled");
        }

        if !clr.disable_strict_security_for_import {
            return Ok(Self::inactive());
        }

        let advanced = executor.server_option(SHOW_ADVANCED_OPTIONS).await?;
        let advanced_original = if advanced != 1 {
            executor.set_server_option(SHOW_ADVANCED_OPTIONS, 1).await?;
            Some(advanced)
        } else {
            None
        };

        let original = match relax_strict_security(executor).await {
            Ok(original) => original,
            Err(e) => {
                if let Some(advanced) = advanced_original {
                    if let Err(restore_err) =
                        executor.set_server_option(SHOW_ADVANCED_OPTIONS, advanced).await
                    {
                        error!("Failed to restore show advanced options: {}", restore_err);
                    }
                }
                return Err(e);
            }
        };
        info!(original, "CLR strict security relaxed for import");

        Ok(Self {
            original: Some(original),
            advanced_original,
            restore: clr.restore_strict_security_setting,
            released: false,
        })
    }

    /// Value captured before relaxation, if the guard is active.
    pub fn original(&self) -> Option<i64> {
        self.original
    }

    /// Put the original values back. Strict security stays relaxed when
    /// configured so; `show advanced options` is always restored.
    pub async fn release(mut self, executor: &mut dyn BatchExecutor) -> Result<()> {
        self.released = true;

        let strict = self.restore_strict_security(executor).await;

        let advanced = match self.advanced_original {
            Some(value) => executor
                .set_server_option(SHOW_ADVANCED_OPTIONS, value)
                .await
                .map(|()| debug!(value, "Show advanced options restored")),
            None => Ok(()),
        };

        strict.and(advanced)
    }

    async fn restore_strict_security(&self, executor: &mut dyn BatchExecutor) -> Result<()> {
        let Some(original) = self.original else {
            return Ok(());
        };

        if !self.restore {
            info!("CLR strict security left relaxed");
            return Ok(());
        }

        if executor.server_option(CLR_STRICT_SECURITY).await? != original {
            executor
                .set_server_option(CLR_STRICT_SECURITY, original)
                .await?;
        }
        info!(value = original, "CLR strict security restored");
        Ok(())
    }
}

async fn relax_strict_security(executor: &mut dyn BatchExecutor) -> Result<i64> {
    let original = executor.server_option(CLR_STRICT_SECURITY).await?;
    if original != 0 {
        executor.set_server_option(CLR_STRICT_SECURITY, 0).await?;
    }
    Ok(original)
}

impl Drop for StrictSecurityGuard {
    fn drop(&mut self) {
        let pending = (self.restore && self.original.is_some()) || self.advanced_original.is_some();
        if !self.released && pending {
            error!(
                original = self.original,
                advanced_original = self.advanced_original,
                "CLR strict security guard dropped without restoring server settings"
            );
        }
    }
}

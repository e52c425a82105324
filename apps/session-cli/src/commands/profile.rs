//! Profile commands.

use super::auth::StatusReport;
use super::AppContext;
use crate::output::{self, OutputFormat};
use anyhow::{anyhow, bail, Result};
use serde_json::Value;
use session_sync_core::{ProfileUpdate, SyncError};

/// Parse a `key=value` argument. The value is read as JSON when it parses
/// (`follower_count=5000`, `phone=null`), otherwise as a plain string.
pub fn parse_field(arg: &str) -> Result<(String, Value), String> {
    let (key, raw) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got `{arg}`"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("missing field name in `{arg}`"));
    }
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((key.to_string(), value))
}

/// Update profile fields.
pub async fn update(fields: Vec<(String, Value)>, format: &OutputFormat) -> Result<()> {
    if fields.is_empty() {
        bail!("Nothing to update, pass one or more key=value pairs");
    }

    let ctx = AppContext::open().await?;
    if ctx.store.session().is_none() {
        bail!("Not signed in");
    }
    ctx.settle(true).await;

    let update = fields
        .into_iter()
        .fold(ProfileUpdate::new(), |update, (key, value)| update.set(key, value));

    match ctx.store.update_profile(&update).await {
        Ok(()) => {
            output::print(&StatusReport::from(&ctx.store.snapshot()), format);
            Ok(())
        }
        Err(SyncError::PartialWrite { message, .. }) => Err(anyhow!(
            "Base fields were saved but role-specific fields were not ({message}). \
             Run the update again for the remaining fields."
        )),
        Err(e) => Err(e.into()),
    }
}

/// Fetch the profile again after a failure.
pub async fn retry(format: &OutputFormat) -> Result<()> {
    let ctx = AppContext::open().await?;
    if ctx.store.session().is_none() {
        bail!("Not signed in");
    }

    let settled = ctx.settle(true).await;
    if settled.as_ref().is_some_and(|s| s.profile.is_some()) {
        output::print_success("Profile already loaded", format);
        return Ok(());
    }

    if !ctx.store.retry_profile_fetch() {
        bail!("Cannot fetch the profile right now");
    }
    let state = ctx
        .settle(true)
        .await
        .unwrap_or_else(|| ctx.store.snapshot());
    output::print(&StatusReport::from(&state), format);
    Ok(())
}

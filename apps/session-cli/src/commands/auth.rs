//! Authentication commands.

use super::AppContext;
use crate::output::{self, OutputFormat};
use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use clap::{Args, ValueEnum};
use serde::Serialize;
use serde_json::{Map, Value};
use session_sync_core::{
    BusinessDetails, Credentials, InfluencerDetails, RoleDetails, SessionPhase, SessionState,
    SignUpProfile,
};
use std::fmt;
use std::io::{self, Write};

/// Roles open to self sign-up.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum SignUpRole {
    Business,
    Influencer,
}

/// Profile details collected at sign-up.
#[derive(Debug, Clone, Args)]
pub struct SignUpArgs {
    /// Account email (prompted when omitted)
    #[arg(long)]
    pub email: Option<String>,
    /// Account role
    #[arg(long, value_enum)]
    pub role: SignUpRole,
    /// Full name
    #[arg(long)]
    pub full_name: Option<String>,
    /// Phone number
    #[arg(long)]
    pub phone: Option<String>,
    /// Company name (business)
    #[arg(long)]
    pub company_name: Option<String>,
    /// Industry (business)
    #[arg(long)]
    pub industry: Option<String>,
    /// Content niche (influencer)
    #[arg(long)]
    pub niche: Option<String>,
    /// Short bio (influencer)
    #[arg(long)]
    pub bio: Option<String>,
    /// City or region
    #[arg(long)]
    pub location: Option<String>,
}

impl SignUpArgs {
    fn profile(&self) -> SignUpProfile {
        let details = match self.role {
            SignUpRole::Business => RoleDetails::Business(BusinessDetails {
                company_name: self.company_name.clone(),
                industry: self.industry.clone(),
                location: self.location.clone(),
                ..Default::default()
            }),
            SignUpRole::Influencer => RoleDetails::Influencer(InfluencerDetails {
                niche: self.niche.clone(),
                bio: self.bio.clone(),
                location: self.location.clone(),
                ..Default::default()
            }),
        };
        SignUpProfile {
            full_name: self.full_name.clone(),
            phone: self.phone.clone(),
            details,
        }
    }
}

/// Snapshot of the session store for `status` and after each command.
#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub phase: String,
    pub signed_in: bool,
    pub subject_id: Option<String>,
    pub email: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub role: Option<String>,
    pub profile: Option<Map<String, Value>>,
    pub profile_error: Option<String>,
}

impl From<&SessionState> for StatusReport {
    fn from(state: &SessionState) -> Self {
        let session = state.session.as_ref();
        Self {
            phase: phase_label(state.phase).to_string(),
            signed_in: session.is_some(),
            subject_id: session.map(|s| s.subject_id.clone()),
            email: session.and_then(|s| s.email.clone()),
            expires_at: session.and_then(|s| s.expires_at),
            role: state.profile.as_ref().map(|p| p.role.to_string()),
            profile: state.profile.as_ref().map(|p| p.flattened()),
            profile_error: state.profile_error.clone(),
        }
    }
}

fn phase_label(phase: SessionPhase) -> &'static str {
    match phase {
        SessionPhase::Unauthenticated => "signed out",
        SessionPhase::AuthenticatedNoProfile => "signed in, no profile",
        SessionPhase::AuthenticatedWithProfile => "signed in",
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", output::row("Auth", &self.phase))?;
        if let Some(subject_id) = &self.subject_id {
            writeln!(f, "{}", output::row("User ID", subject_id))?;
        }
        if let Some(email) = &self.email {
            writeln!(f, "{}", output::row("Email", email))?;
        }
        if let Some(expires_at) = &self.expires_at {
            writeln!(f, "{}", output::row("Expires", &expires_at.to_rfc3339()))?;
        }
        if let Some(role) = &self.role {
            writeln!(f, "{}", output::row("Role", role))?;
        }
        if let Some(profile) = &self.profile {
            for (key, value) in profile {
                if matches!(key.as_str(), "id" | "role" | "email") || value.is_null() {
                    continue;
                }
                let value = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                writeln!(f, "{}", output::row(key, &value))?;
            }
        }
        if let Some(error) = &self.profile_error {
            writeln!(f, "{}", output::row("Profile error", error))?;
            writeln!(f, "  Run `campaign-auth retry` to fetch the profile again.")?;
        }
        Ok(())
    }
}

fn prompt_email(email: Option<String>) -> Result<String> {
    let email = match email {
        Some(email) => email,
        None => {
            print!("Email: ");
            io::stdout().flush()?;
            let mut email = String::new();
            io::stdin().read_line(&mut email)?;
            email
        }
    };
    let email = email.trim().to_string();
    if email.is_empty() {
        bail!("Email is required");
    }
    Ok(email)
}

fn prompt_password() -> Result<String> {
    let password = rpassword::prompt_password("Password: ")?;
    if password.is_empty() {
        bail!("Password is required");
    }
    Ok(password)
}

/// Sign in with email and password.
pub async fn sign_in(email: Option<String>, format: &OutputFormat) -> Result<()> {
    let ctx = AppContext::open().await?;

    if let Some(session) = ctx.store.session() {
        let who = session.email.unwrap_or(session.subject_id);
        output::print_success(&format!("Already signed in as {}", who), format);
        return Ok(());
    }

    let email = prompt_email(email)?;
    let password = prompt_password()?;
    let session = ctx.store.sign_in(&Credentials::new(email, password)).await?;

    match ctx.settle(true).await {
        Some(state) => output::print(&StatusReport::from(&state), format),
        None => output::print_success(
            &format!(
                "Signed in as {}, profile still loading",
                session.email.unwrap_or(session.subject_id)
            ),
            format,
        ),
    }
    Ok(())
}

/// Create an account and its profile.
pub async fn sign_up(args: SignUpArgs, format: &OutputFormat) -> Result<()> {
    let ctx = AppContext::open().await?;
    let email = prompt_email(args.email.clone())?;
    let password = prompt_password()?;

    ctx.store
        .sign_up(&Credentials::new(email.clone(), password), &args.profile())
        .await?;

    let has_session = ctx
        .store
        .wait_for(ctx.settings.signup_propagation_delay(), |s| s.session.is_some())
        .await
        .is_some();
    if !has_session {
        output::print_success(
            &format!("Account created. Confirm the email sent to {} and sign in.", email),
            format,
        );
        return Ok(());
    }

    match ctx
        .store
        .wait_for(super::settle_timeout(&ctx.settings), |s| {
            s.profile.is_some() || (s.profile_error.is_some() && !s.loading())
        })
        .await
    {
        Some(state) => output::print(&StatusReport::from(&state), format),
        None => output::print_success("Account created, profile still loading", format),
    }
    Ok(())
}

/// Sign out and clear local state.
pub async fn sign_out(format: &OutputFormat) -> Result<()> {
    let ctx = AppContext::open().await?;
    let was_signed_in = ctx.store.session().is_some();

    ctx.store.sign_out().await;
    ctx.finish_logout().await;

    if was_signed_in {
        output::print_success("Signed out", format);
    } else {
        output::print_success("Not signed in, local state cleared", format);
    }
    Ok(())
}

/// Show session and profile.
pub async fn status(format: &OutputFormat) -> Result<()> {
    let ctx = AppContext::open().await?;
    let signed_in = ctx.store.session().is_some();
    let state = ctx
        .settle(signed_in)
        .await
        .unwrap_or_else(|| ctx.store.snapshot());
    output::print(&StatusReport::from(&state), format);
    Ok(())
}

/// Refresh the session and reload the profile.
pub async fn refresh(format: &OutputFormat) -> Result<()> {
    let ctx = AppContext::open().await?;
    if ctx.store.session().is_none() {
        output::print_error("Not signed in", format);
        return Ok(());
    }

    ctx.store.refresh_session().await?;
    let state = ctx
        .settle(true)
        .await
        .unwrap_or_else(|| ctx.store.snapshot());
    output::print(&StatusReport::from(&state), format);
    Ok(())
}

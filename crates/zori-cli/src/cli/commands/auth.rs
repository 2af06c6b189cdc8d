//! Auth command handlers.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Local};
use zori_core::auth::{AuthError, AuthService, mask_token};
use zori_core::models::{
    AuthResponse, LoginRequest, RecoverConfirmRequest, RecoverRequest, RegisterRequest,
};
use zori_core::organization::OrganizationApi;
use zori_core::{ErrorContext, validation};

use super::{Context, api_failure, check, read_password};

pub struct RegisterArgs {
    pub email: String,
    pub password: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub organization_name: String,
}

pub async fn login(ctx: &Context, email: String, password: Option<String>) -> Result<()> {
    let request = LoginRequest {
        email: email.trim().to_string(),
        password: read_password(password, "Password")?,
    };
    check(validation::validate_login(&request))?;

    let auth = AuthService::new(Arc::clone(&ctx.client));
    let data = auth
        .login(&request)
        .await
        .map_err(|e| auth_failure(&e, ErrorContext::Login))?;

    print_signed_in("Logged in", &data, ctx);
    Ok(())
}

pub async fn register(ctx: &Context, args: RegisterArgs) -> Result<()> {
    let request = RegisterRequest {
        email: args.email.trim().to_string(),
        password: read_password(args.password, "Password")?,
        first_name: args.first_name.trim().to_string(),
        last_name: args.last_name.trim().to_string(),
        organization_name: args.organization_name.trim().to_string(),
    };
    check(validation::validate_register(&request))?;

    let auth = AuthService::new(Arc::clone(&ctx.client));
    let data = auth
        .register(&request)
        .await
        .map_err(|e| auth_failure(&e, ErrorContext::Register))?;

    print_signed_in("Registered", &data, ctx);
    Ok(())
}

fn auth_failure(err: &AuthError, context: ErrorContext) -> anyhow::Error {
    match err {
        AuthError::Api(api) => api_failure(api, context),
        AuthError::Session(session) => anyhow::anyhow!("{session}"),
    }
}

fn print_signed_in(action: &str, data: &AuthResponse, ctx: &Context) {
    match &data.account {
        Some(account) => println!(
            "✓ {action} as {} ({})",
            account.display_name(),
            account.email
        ),
        None => println!("✓ {action}"),
    }
    if let Some(org) = &data.organization {
        println!("  Organization: {}", org.name);
    }
    println!("  Session saved to: {}", ctx.session_path.display());
}

pub async fn logout(ctx: &Context) -> Result<()> {
    if ctx.session.refresh_token().is_none() {
        println!("Not logged in (no session found).");
        return Ok(());
    }

    let auth = AuthService::new(Arc::clone(&ctx.client));
    let result = auth.logout().await;

    println!("✓ Logged out");
    println!("  Session removed from: {}", ctx.session_path.display());
    if let Err(err) = result {
        eprintln!(
            "Warning: server could not revoke the session: {}",
            err.user_message(ErrorContext::General)
        );
    }
    Ok(())
}

pub async fn whoami(ctx: &Context, refresh: bool) -> Result<()> {
    ctx.require_login()?;
    if refresh {
        OrganizationApi::new(Arc::clone(&ctx.client))
            .current()
            .await
            .map_err(|e| api_failure(&e, ErrorContext::General))?;
    }
    let session = ctx.session.snapshot();

    match &session.account {
        Some(account) => println!("{} <{}>", account.display_name(), account.email),
        None => println!("(account details not cached)"),
    }
    if let Some(org) = &session.organization {
        println!("Organization: {} ({})", org.name, org.id);
    }
    if let Some(token) = &session.access_token {
        println!("Access token: {}", mask_token(token));
    }

    let status = match (ctx.session.time_until_expiry(), session.expires_at) {
        (Some(remaining), Some(expires_at)) if remaining > 0 => format!(
            "active, expires {} (in {})",
            format_instant(expires_at),
            format_remaining(remaining)
        ),
        (_, Some(expires_at)) => format!(
            "expired {} (will refresh on next request)",
            format_instant(expires_at)
        ),
        _ => "expired (will refresh on next request)".to_string(),
    };
    println!("Session: {status}");
    Ok(())
}

pub async fn refresh(ctx: &Context) -> Result<()> {
    ctx.require_login()?;

    match ctx.session.refresh().await {
        Some(data) => {
            let expires = ctx
                .session
                .expires_at()
                .map_or_else(|| "unknown".to_string(), format_instant);
            println!("✓ Session refreshed (expires {expires}, in {}s)", data.expires_in);
            Ok(())
        }
        None => anyhow::bail!("Session could not be refreshed. Please log in again."),
    }
}

pub async fn recover(ctx: &Context, email: String) -> Result<()> {
    let request = RecoverRequest {
        email: email.trim().to_string(),
    };
    check(validation::validate_recover(&request))?;

    let auth = AuthService::new(Arc::clone(&ctx.client));
    let response = auth
        .recover(&request)
        .await
        .map_err(|e| api_failure(&e, ErrorContext::General))?;

    println!(
        "✓ {}",
        response
            .message
            .as_deref()
            .unwrap_or("If the account exists, a recovery email is on its way.")
    );
    Ok(())
}

pub async fn recover_confirm(ctx: &Context, token: String, password: Option<String>) -> Result<()> {
    let request = RecoverConfirmRequest {
        token: token.trim().to_string(),
        password: read_password(password, "New password")?,
    };
    check(validation::validate_recover_confirm(&request))?;

    let auth = AuthService::new(Arc::clone(&ctx.client));
    let response = auth
        .recover_confirm(&request)
        .await
        .map_err(|e| api_failure(&e, ErrorContext::General))?;

    println!(
        "✓ {}",
        response
            .message
            .as_deref()
            .unwrap_or("Password updated. You can now log in.")
    );
    Ok(())
}

fn format_instant(epoch_millis: u64) -> String {
    i64::try_from(epoch_millis)
        .ok()
        .and_then(DateTime::from_timestamp_millis)
        .map_or_else(
            || epoch_millis.to_string(),
            |utc| {
                utc.with_timezone(&Local)
                    .format("%Y-%m-%d %H:%M:%S")
                    .to_string()
            },
        )
}

fn format_remaining(millis: i64) -> String {
    let secs = millis / 1000;
    match secs {
        s if s >= 3600 => format!("{}h {}m", s / 3600, (s % 3600) / 60),
        s if s >= 60 => format!("{}m {}s", s / 60, s % 60),
        s => format!("{s}s"),
    }
}

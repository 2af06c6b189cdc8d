//! Keeps the stored session fresh until Ctrl+C.

use std::sync::Arc;

use anyhow::Result;
use zori_core::scheduler::{RefreshPolicy, RefreshScheduler};

use super::Context;
use crate::interrupt;

pub async fn run(ctx: &Context) -> Result<()> {
    ctx.require_login()?;
    interrupt::init()?;

    let policy = RefreshPolicy::from(&ctx.config.session);
    let handle = RefreshScheduler::spawn(Arc::clone(&ctx.session), policy);

    println!(
        "Keeping session alive (checking every {}s, refreshing within {}s of expiry).",
        policy.interval.as_secs(),
        policy.threshold.as_secs()
    );
    println!("Press Ctrl+C to stop.");

    interrupt::wait_for_interrupt().await;
    handle.shutdown().await;

    if ctx.session.refresh_token().is_some() {
        println!("Stopped.");
    } else {
        println!("Stopped. The session could not be refreshed; please log in again.");
    }
    Ok(())
}

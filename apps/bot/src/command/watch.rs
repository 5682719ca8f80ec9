use stock::TrackOutcome;
use stock::store::{Direction, WatchlistEntry, normalize};
use tracing::{debug, info, warn};

use crate::command::{defer, say};
use crate::{Context, Error};

#[poise::command(
    slash_command,
    rename = "watch",
    subcommands("add", "update", "list", "remove")
)]
pub async fn watch_command(_: Context<'_>) -> Result<(), Error> {
    Ok(())
}

/// Alert me when a stock crosses a price.
#[poise::command(slash_command)]
pub async fn add(
    ctx: Context<'_>,
    #[description = "Ticker symbol (e.g., TSLA)"] symbol: String,
    #[description = "Target price"] price: f64,
    #[description = "True to alert when the price rises to the target, false when it falls"]
    above: bool,
) -> Result<(), Error> {
    save_alert(ctx, symbol, price, above, "Now watching").await
}

/// Change the target of an existing alert.
#[poise::command(slash_command)]
pub async fn update(
    ctx: Context<'_>,
    #[description = "Ticker symbol (e.g., TSLA)"] symbol: String,
    #[description = "Target price"] price: f64,
    #[description = "True to alert when the price rises to the target, false when it falls"]
    above: bool,
) -> Result<(), Error> {
    save_alert(ctx, symbol, price, above, "Updated").await
}

#[poise::command(slash_command)]
pub async fn list(ctx: Context<'_>) -> Result<(), Error> {
    defer(ctx).await?;

    let user_id = ctx.author().id.get().to_string();
    let entries = ctx.data().store.get_user_watchlist(&user_id)?;

    debug!(user_id = %user_id, count = entries.len(), "watch list: loaded");

    if entries.is_empty() {
        return say(ctx, "Your watchlist is empty.").await;
    }

    let lines: Vec<String> = entries.iter().map(describe).collect();
    say(ctx, format!("**Your watchlist**\n{}", lines.join("\n"))).await
}

#[poise::command(slash_command)]
pub async fn remove(
    ctx: Context<'_>,
    #[description = "Ticker symbol to stop watching"] symbol: String,
) -> Result<(), Error> {
    defer(ctx).await?;

    let user_id = ctx.author().id.get().to_string();
    let symbol = normalize(&symbol);

    if ctx.data().store.remove_watchlist_entry(&user_id, &symbol)? {
        info!(user_id = %user_id, symbol = %symbol, "watch remove: removed");
        say(ctx, format!("Stopped watching {symbol}.")).await
    } else {
        say(ctx, format!("{symbol} is not on your watchlist.")).await
    }
}

async fn save_alert(
    ctx: Context<'_>,
    symbol: String,
    price: f64,
    above: bool,
    verb: &str,
) -> Result<(), Error> {
    defer(ctx).await?;

    let user_id = ctx.author().id.get().to_string();
    let symbol = normalize(&symbol);

    if symbol.is_empty() {
        return say(ctx, "No valid symbol provided.").await;
    }
    if !price.is_finite() || price <= 0.0 {
        warn!(user_id = %user_id, price, "watch: rejected target");
        return say(ctx, "Target price must be a positive number.").await;
    }

    let data = ctx.data();
    let outcome = data.tracker.ensure_tracked(&symbol).await?;

    let entry = WatchlistEntry::new(user_id.as_str(), &symbol, price, Direction::from_above(above));
    data.store.upsert_watchlist_entry(&entry)?;

    info!(
        user_id = %user_id,
        symbol = %symbol,
        target = price,
        direction = entry.direction.as_str(),
        "watch: saved"
    );

    let mut msg = format!(
        "{verb} {symbol}: alert when {} {:.2}.",
        entry.direction.as_str(),
        price
    );
    if outcome == TrackOutcome::BackfillFailed {
        msg.push_str("\nPrice history could not be loaded yet.");
    }
    say(ctx, msg).await
}

fn describe(entry: &WatchlistEntry) -> String {
    let state = if entry.triggered { " (triggered)" } else { "" };
    format!(
        "`{}` {} {:.2}{}",
        entry.symbol,
        entry.direction.as_str(),
        entry.price_target,
        state
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describe_marks_triggered() {
        let mut entry = WatchlistEntry::new("1", "abc", 12.5, Direction::Above);
        assert_eq!(describe(&entry), "`ABC` above 12.50");

        entry.triggered = true;
        assert_eq!(describe(&entry), "`ABC` above 12.50 (triggered)");
    }
}

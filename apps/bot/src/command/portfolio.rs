use std::collections::HashSet;

use poise::CreateReply;
use poise::serenity_prelude as serenity;
use poise::serenity_prelude::{
    ButtonStyle, CreateActionRow, CreateAttachment, CreateButton, CreateEmbed, CreateEmbedFooter,
    CreateInteractionResponse, CreateInteractionResponseFollowup,
    CreateInteractionResponseMessage, EditInteractionResponse,
};
use stock::period::{PORTFOLIO_CYCLE, format_change};
use stock::store::{PortfolioEntry, normalize};
use stock::{HoldingCard, Period, TrackOutcome};
use tracing::{debug, info, warn};

use crate::command::{defer, say, send};
use crate::{Context, Data, Error};

pub const CUSTOM_ID_PREFIX: &str = "portfolio;";

const DEFAULT_PERIOD: Period = Period::Year1;
const UP: u32 = 0x00ff00;
const DOWN: u32 = 0xff0000;

#[poise::command(
    slash_command,
    rename = "portfolio",
    subcommands("add", "update", "show", "remove")
)]
pub async fn portfolio_command(_: Context<'_>) -> Result<(), Error> {
    Ok(())
}

/// Add a holding to your portfolio.
#[poise::command(slash_command)]
pub async fn add(
    ctx: Context<'_>,
    #[description = "Ticker symbol (e.g., MSFT)"] symbol: String,
    #[description = "Number of shares"] amount: f64,
) -> Result<(), Error> {
    save_holding(ctx, symbol, amount, "Added").await
}

/// Change the share count of a holding.
#[poise::command(slash_command)]
pub async fn update(
    ctx: Context<'_>,
    #[description = "Ticker symbol (e.g., MSFT)"] symbol: String,
    #[description = "Number of shares"] amount: f64,
) -> Result<(), Error> {
    save_holding(ctx, symbol, amount, "Updated").await
}

#[poise::command(slash_command)]
pub async fn remove(
    ctx: Context<'_>,
    #[description = "Ticker symbol to remove"] symbol: String,
) -> Result<(), Error> {
    defer(ctx).await?;

    let user_id = ctx.author().id.get().to_string();
    let symbol = normalize(&symbol);

    if ctx.data().store.remove_portfolio_entry(&user_id, &symbol)? {
        info!(user_id = %user_id, symbol = %symbol, "portfolio remove: removed");
        say(ctx, format!("Removed {symbol} from your portfolio.")).await
    } else {
        say(ctx, format!("{symbol} is not in your portfolio.")).await
    }
}

/// Show every holding with a chart and period buttons.
#[poise::command(slash_command)]
pub async fn show(ctx: Context<'_>) -> Result<(), Error> {
    defer(ctx).await?;

    let owner = ctx.author().id.get();
    let data = ctx.data();
    let holdings = data.store.get_portfolio(&owner.to_string())?;

    info!(user_id = owner, holdings = holdings.len(), "portfolio show: invoked");

    if holdings.is_empty() {
        return say(ctx, "Your portfolio is empty.").await;
    }

    let requested: Vec<String> = holdings.iter().map(|h| h.symbol.clone()).collect();
    let cards = data
        .renderer
        .portfolio_cards(holdings, DEFAULT_PERIOD, data.config.render_concurrency)
        .await;

    let rendered: HashSet<&str> = cards.iter().map(|c| c.holding.symbol.as_str()).collect();
    let omitted: Vec<&str> = requested
        .iter()
        .map(String::as_str)
        .filter(|s| !rendered.contains(s))
        .collect();
    if !omitted.is_empty() {
        warn!(user_id = owner, omitted = ?omitted, "portfolio show: holdings omitted");
    }

    if cards.is_empty() {
        return say(ctx, "Could not load any of your holdings right now.").await;
    }

    for card in cards {
        let reply = CreateReply::default()
            .embed(holding_embed(&card))
            .attachment(chart_attachment(&card))
            .components(vec![period_buttons(owner, &card.holding.symbol, card.period)]);
        send(ctx, reply).await?;
    }

    Ok(())
}

/// Re-renders one holding in the period carried by the pressed button.
pub async fn handle_component(
    ctx: &serenity::Context,
    data: &Data,
    interaction: &serenity::ComponentInteraction,
) -> Result<(), Error> {
    let id = interaction.data.custom_id.as_str();
    let user_id = interaction.user.id.get();

    let Some(button) = PeriodButton::parse(id) else {
        debug!(user_id, custom_id = id, "portfolio: malformed custom id");
        return Ok(());
    };

    if button.owner != user_id {
        warn!(user_id, owner = button.owner, "portfolio: button press denied");

        interaction
            .create_response(
                ctx,
                CreateInteractionResponse::Message(
                    CreateInteractionResponseMessage::new()
                        .content("You can't change someone else's portfolio.")
                        .ephemeral(true),
                ),
            )
            .await?;
        return Ok(());
    }

    interaction
        .create_response(ctx, CreateInteractionResponse::Acknowledge)
        .await?;

    let holding = match data
        .store
        .get_portfolio_entry(&user_id.to_string(), &button.symbol)?
    {
        Some(h) => h,
        None => {
            return followup(ctx, interaction, "That holding is no longer in your portfolio.").await;
        }
    };

    info!(user_id, symbol = %button.symbol, period = %button.period, "portfolio: re-render");

    let rendered = tokio::time::timeout(
        data.config.render_timeout,
        data.renderer.holding_card(holding, button.period),
    )
    .await;

    let card = match rendered {
        Ok(Ok(card)) => card,
        Ok(Err(e)) => {
            warn!(symbol = %button.symbol, error = ?e, "portfolio: re-render failed");
            return followup(ctx, interaction, "Could not render that period right now.").await;
        }
        Err(_) => {
            warn!(symbol = %button.symbol, "portfolio: re-render timed out");
            return followup(ctx, interaction, "Rendering took too long, try again.").await;
        }
    };

    interaction
        .edit_response(
            ctx,
            EditInteractionResponse::new()
                .embed(holding_embed(&card))
                .components(vec![period_buttons(user_id, &card.holding.symbol, card.period)])
                .clear_attachments()
                .new_attachment(chart_attachment(&card)),
        )
        .await?;

    Ok(())
}

async fn save_holding(
    ctx: Context<'_>,
    symbol: String,
    amount: f64,
    verb: &str,
) -> Result<(), Error> {
    defer(ctx).await?;

    let user_id = ctx.author().id.get().to_string();
    let symbol = normalize(&symbol);

    if symbol.is_empty() {
        return say(ctx, "No valid symbol provided.").await;
    }
    if !amount.is_finite() || amount <= 0.0 {
        warn!(user_id = %user_id, amount, "portfolio: rejected amount");
        return say(ctx, "Amount must be a positive number.").await;
    }

    let data = ctx.data();
    let outcome = data.tracker.ensure_tracked(&symbol).await?;

    let entry = PortfolioEntry::new(user_id.as_str(), &symbol, amount);
    data.store.upsert_portfolio_entry(&entry)?;

    info!(user_id = %user_id, symbol = %symbol, shares = amount, "portfolio: saved");

    let mut msg = format!("{verb} {symbol}: {amount} shares.");
    if outcome == TrackOutcome::BackfillFailed {
        msg.push_str("\nPrice history could not be loaded yet.");
    }
    say(ctx, msg).await
}

async fn followup(
    ctx: &serenity::Context,
    interaction: &serenity::ComponentInteraction,
    content: &str,
) -> Result<(), Error> {
    interaction
        .create_followup(
            ctx,
            CreateInteractionResponseFollowup::new()
                .content(content)
                .ephemeral(true),
        )
        .await?;
    Ok(())
}

/// Decoded `portfolio;<owner>;<symbol>;<period>` custom id.
#[derive(Debug, Clone, PartialEq)]
struct PeriodButton {
    owner: u64,
    symbol: String,
    period: Period,
}

impl PeriodButton {
    fn custom_id(owner: u64, symbol: &str, period: Period) -> String {
        format!("{CUSTOM_ID_PREFIX}{owner};{symbol};{period}")
    }

    fn parse(id: &str) -> Option<Self> {
        let mut parts = id.strip_prefix(CUSTOM_ID_PREFIX)?.split(';');

        let owner = parts.next()?.parse().ok()?;
        let symbol = normalize(parts.next()?);
        let period: Period = parts.next()?.parse().ok()?;

        if parts.next().is_some() || symbol.is_empty() || !PORTFOLIO_CYCLE.contains(&period) {
            return None;
        }

        Some(Self {
            owner,
            symbol,
            period,
        })
    }
}

fn period_buttons(owner: u64, symbol: &str, period: Period) -> CreateActionRow {
    let prev = period.prev_in_cycle();
    let next = period.next_in_cycle();

    CreateActionRow::Buttons(vec![
        CreateButton::new(PeriodButton::custom_id(owner, symbol, prev.unwrap_or(period)))
            .label("-")
            .style(ButtonStyle::Secondary)
            .disabled(prev.is_none()),
        CreateButton::new(PeriodButton::custom_id(owner, symbol, next.unwrap_or(period)))
            .label("+")
            .style(ButtonStyle::Secondary)
            .disabled(next.is_none()),
    ])
}

fn holding_embed(card: &HoldingCard) -> CreateEmbed {
    let quote = &card.quote;
    let value = card.holding.shares * quote.price;
    let color = if quote.percent_change >= 0.0 { UP } else { DOWN };

    CreateEmbed::default()
        .title(format!("{} ({})", quote.long_name, quote.symbol))
        .field("Shares", format!("{}", card.holding.shares), true)
        .field("Price", format!("{} {}", quote.price_fmt(), quote.currency), true)
        .field("Value", format!("{value:.2} {}", quote.currency), true)
        .field("Daily", format_change(Some(quote.percent_change)), true)
        .field("Weekly", format_change(card.weekly_change), true)
        .field("Yearly", format_change(card.yearly_change), true)
        .image(card.chart.attachment_url())
        .footer(CreateEmbedFooter::new(format!("Period: {}", card.period.friendly_name())))
        .color(color)
}

fn chart_attachment(card: &HoldingCard) -> CreateAttachment {
    CreateAttachment::bytes(card.chart.png.clone(), card.chart.file_name.clone())
}

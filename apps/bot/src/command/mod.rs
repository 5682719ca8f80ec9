pub mod portfolio;
pub mod stock;
pub mod watch;

use ::stock::Period;
use poise::CreateReply;
use poise::serenity_prelude as serenity;
use tracing::{debug, warn};

use crate::{Context, Data, Error};

/// Period options offered in slash command menus.
#[derive(Debug, Clone, Copy, poise::ChoiceParameter)]
pub enum PeriodChoice {
    #[name = "1 Day"]
    Day1,
    #[name = "1 Week"]
    Week1,
    #[name = "1 Month"]
    Month1,
    #[name = "3 Month"]
    Month3,
    #[name = "1 Year"]
    Year1,
    #[name = "5 Year"]
    Year5,
}

impl From<PeriodChoice> for Period {
    fn from(choice: PeriodChoice) -> Self {
        match choice {
            PeriodChoice::Day1 => Period::Day1,
            PeriodChoice::Week1 => Period::Week1,
            PeriodChoice::Month1 => Period::Month1,
            PeriodChoice::Month3 => Period::Month3,
            PeriodChoice::Year1 => Period::Year1,
            PeriodChoice::Year5 => Period::Year5,
        }
    }
}

#[poise::command(slash_command)]
pub async fn ping(ctx: Context<'_>) -> Result<(), Error> {
    say(ctx, "Pong").await
}

/// Defers the interaction, privately when running in debug mode.
pub async fn defer(ctx: Context<'_>) -> Result<(), Error> {
    if ctx.data().config.debug {
        ctx.defer_ephemeral().await?;
    } else {
        ctx.defer().await?;
    }
    Ok(())
}

pub async fn send(ctx: Context<'_>, reply: CreateReply) -> Result<(), Error> {
    let ephemeral = ctx.data().config.debug;
    ctx.send(reply.ephemeral(ephemeral)).await?;
    Ok(())
}

pub async fn say(ctx: Context<'_>, content: impl Into<String>) -> Result<(), Error> {
    send(ctx, CreateReply::default().content(content)).await
}

/// Routes button presses to the command that owns the custom id.
pub async fn handle_component(
    ctx: &serenity::Context,
    data: &Data,
    interaction: &serenity::ComponentInteraction,
) {
    let id = interaction.data.custom_id.as_str();

    if id.starts_with(portfolio::CUSTOM_ID_PREFIX) {
        if let Err(e) = portfolio::handle_component(ctx, data, interaction).await {
            warn!(custom_id = id, error = ?e, "portfolio component failed");
        }
        return;
    }

    debug!(custom_id = id, "ignored component");
}

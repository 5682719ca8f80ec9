use poise::CreateReply;
use serenity::all::{CreateAttachment, CreateEmbed, CreateEmbedFooter};
use stock::period::format_change;
use stock::store::normalize;
use stock::{Period, StockCard};
use tracing::{info, warn};

use crate::command::{PeriodChoice, defer, say, send};
use crate::{Context, Error};

const UP: u32 = 0x00ff00;
const DOWN: u32 = 0xff0000;

#[poise::command(slash_command)]
pub async fn show(
    ctx: Context<'_>,
    #[description = "Ticker symbol (e.g., AAPL)"] symbol: String,
    #[description = "Chart period (default 1 Year)"] period: Option<PeriodChoice>,
) -> Result<(), Error> {
    defer(ctx).await?;

    let user_id = ctx.author().id.get();
    let symbol = normalize(&symbol);
    let period = period.map(Period::from).unwrap_or(Period::Year1);

    if symbol.is_empty() {
        return say(ctx, "No valid symbol provided.").await;
    }

    info!(user_id, symbol = %symbol, period = %period, "stock show: invoked");

    let card = match ctx.data().renderer.stock_card(&symbol, period).await {
        Ok(card) => card,
        Err(e) => {
            warn!(symbol = %symbol, error = ?e, "stock show: render failed");
            return say(ctx, format!("Could not load {symbol}.")).await;
        }
    };

    let embed = stock_embed(&card);
    let attachment = CreateAttachment::bytes(card.chart.png, card.chart.file_name);

    send(ctx, CreateReply::default().embed(embed).attachment(attachment)).await
}

fn stock_embed(card: &StockCard) -> CreateEmbed {
    let quote = &card.quote;
    let color = if quote.percent_change >= 0.0 { UP } else { DOWN };

    CreateEmbed::default()
        .title(format!("{} ({})", quote.long_name, quote.symbol))
        .field("Price", format!("{} {}", quote.price_fmt(), quote.currency), true)
        .field("Change", format_change(Some(quote.percent_change)), true)
        .field("Exchange", quote.exchange.clone(), true)
        .image(card.chart.attachment_url())
        .footer(CreateEmbedFooter::new(format!("Period: {}", card.period.friendly_name())))
        .color(color)
}

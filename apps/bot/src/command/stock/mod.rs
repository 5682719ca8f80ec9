mod show;

use show::show;

use crate::{Context, Error};

#[poise::command(slash_command, rename = "stock", subcommands("show"))]
pub async fn stock_command(_: Context<'_>) -> Result<(), Error> {
    Ok(())
}

use std::sync::Arc;

use stock::{ChartRenderer, Store, Tracker};

pub mod command;
pub mod config;
pub mod jobs;
pub mod notifier;

use config::Config;

pub struct Data {
    pub store: Arc<Store>,
    pub tracker: Arc<Tracker>,
    pub renderer: Arc<ChartRenderer>,
    pub config: Config,
}

pub type Error = anyhow::Error;
pub type Context<'a> = poise::Context<'a, Data, Error>;

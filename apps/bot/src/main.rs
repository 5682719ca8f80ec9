use std::{sync::Arc, time::Duration};

use anyhow::{Context as _, Result};
use bot::{
    Data,
    command::{self, portfolio::portfolio_command, stock::stock_command, watch::watch_command},
    config::Config,
    jobs,
    notifier::DiscordNotifier,
};
use poise::{Framework, FrameworkOptions};
use serenity::all::{ActivityData, ClientBuilder, FullEvent, GatewayIntents, Interaction};
use stock::{AlertChecker, ChartRenderer, MarketData, Pacer, PriceClient, Store, Tracker};
use tokio_cron_scheduler::JobScheduler;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;

    let store = Arc::new(
        Store::open(&config.database_path)
            .with_context(|| format!("open database {}", config.database_path))?,
    );
    let market: Arc<dyn MarketData> = Arc::new(
        PriceClient::new(config.market_data_base_url.clone(), config.http_timeout)
            .context("init price client failed")?,
    );

    let tracker = Arc::new(Tracker::new(
        Arc::clone(&store),
        Arc::clone(&market),
        Pacer::fixed(config.refresh_delay),
    ));
    let renderer = Arc::new(ChartRenderer::new(
        Arc::clone(&store),
        Arc::clone(&market),
        config.render_timeout,
    ));

    let intents = GatewayIntents::non_privileged();
    let commands = vec![
        stock_command(),
        watch_command(),
        portfolio_command(),
        command::ping(),
    ];

    let framework = Framework::builder()
        .options(FrameworkOptions {
            event_handler: |serenity_ctx, event, _framework_ctx, data| {
                Box::pin(async move {
                    if let FullEvent::InteractionCreate { interaction, .. } = event
                        && let Interaction::Component(component) = interaction
                    {
                        command::handle_component(serenity_ctx, data, component).await;
                    }
                    Ok(())
                })
            },
            commands,
            ..Default::default()
        })
        .setup({
            let store = Arc::clone(&store);
            let tracker = Arc::clone(&tracker);
            let renderer = Arc::clone(&renderer);
            let config = config.clone();

            move |ctx, ready, framework| {
                let store = Arc::clone(&store);
                let tracker = Arc::clone(&tracker);
                let renderer = Arc::clone(&renderer);
                let config = config.clone();

                Box::pin(async move {
                    info!(user = %ready.user.name, id = %ready.user.id, "connected successfully");

                    poise::builtins::register_globally(ctx, &framework.options().commands).await?;

                    let ctx_clone = ctx.clone();
                    let version = config.version.clone();
                    tokio::spawn(async move {
                        let mut show_version = true;
                        let mut tick = tokio::time::interval(Duration::from_secs(30));

                        loop {
                            tick.tick().await;

                            let text = if show_version {
                                if version.starts_with('v') {
                                    version.clone()
                                } else {
                                    format!("Version - {}", version)
                                }
                            } else {
                                let now = chrono::Local::now();
                                format!("Time - {}", now.format("%H:%M (%:z)"))
                            };

                            ctx_clone.set_activity(Some(ActivityData::custom(text)));
                            show_version = !show_version;
                        }
                    });

                    Ok(Data {
                        store,
                        tracker,
                        renderer,
                        config,
                    })
                })
            }
        })
        .build();

    let mut client = ClientBuilder::new(&config.discord_token, intents)
        .framework(framework)
        .await
        .context("create discord client")?;

    let notifier = Arc::new(DiscordNotifier::new(client.http.clone()));
    let checker = Arc::new(AlertChecker::new(
        Arc::clone(&store),
        Arc::clone(&market),
        notifier,
    ));

    let sched = JobScheduler::new().await?;
    jobs::schedule_daily_refresh(&sched, &config.refresh_cron(), Arc::clone(&tracker)).await?;
    sched.shutdown_on_ctrl_c();
    sched.start().await?;

    jobs::spawn_catch_up(Arc::clone(&tracker));
    tokio::spawn(jobs::run_alert_loop(checker, config.alert_interval));

    tokio::spawn(async move {
        if let Err(why) = client.start().await {
            error!(error = ?why, "client error");
        }
    });

    shutdown_signal().await;

    info!("Shutdown complete.");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::{
            select,
            signal::unix::{SignalKind, signal},
        };
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
        select! {
            _ = sigterm.recv() => {},
            _ = sigint.recv()  => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

// This is the entry point of the Discord bot.
//
// **Architecture Overview:**
// - `core/` = Business logic (platform-agnostic)
// - `infra/` = Implementations of core traits (SQLite, in-memory)
// - `discord/` = Discord-specific adapters (commands, events)
//
// This file's job is to:
// 1. Load configuration
// 2. Initialize services (dependency injection)
// 3. Set up the Discord framework
// 4. Register commands and event handlers

// These attrs point each module declaration at a more descriptive root file
// so we don't end up with a pile of mod.rs files that all look the same.
#[path = "core/core_layer.rs"]
mod core;
#[path = "discord/discord_layer.rs"]
mod discord;
#[path = "infra/infra_layer.rs"]
mod infra;

use crate::core::leveling::{LevelingError, LevelingService};
use crate::discord::leveling_announcements::send_level_up_embed;
use crate::discord::{Data, Error};
use crate::infra::leveling::SqliteXpStore;
use poise::serenity_prelude as serenity;
use std::sync::Arc;

/// Event handler for non-command Discord events.
/// This is where inbound messages turn into XP gains.
async fn event_handler(
    ctx: &serenity::Context,
    event: &serenity::FullEvent,
    _framework: poise::FrameworkContext<'_, Data, Error>,
    data: &Data,
) -> Result<(), Error> {
    if let serenity::FullEvent::Message { new_message } = event {
        // Bots never earn XP (including our own messages)
        if new_message.author.bot {
            return Ok(());
        }

        // DMs don't either - XP is tracked per guild
        let Some(guild_id) = new_message.guild_id else {
            return Ok(());
        };

        let user_id = new_message.author.id.get();
        let guild_id = guild_id.get();

        match data.leveling.process_message(user_id, guild_id).await {
            Ok(Some(level_up)) => {
                tracing::info!(
                    user_id = level_up.user_id,
                    guild_id = level_up.guild_id,
                    old_level = level_up.old_level,
                    new_level = level_up.new_level,
                    total_xp = level_up.total_xp,
                    "Member leveled up"
                );

                if let Err(err) = send_level_up_embed(ctx, new_message, &level_up).await {
                    tracing::warn!("Failed to send level-up embed: {err}");
                }
            }
            Ok(None) => {
                // XP awarded without a level up - nothing to announce
            }
            Err(LevelingError::OnCooldown) => {
                // Gained XP within the last minute - silently ignore
            }
            Err(err) => {
                // Message gains are best-effort: log and move on, the next
                // qualifying message tries again naturally.
                tracing::warn!(user_id, guild_id, "Failed to award message XP: {err}");
            }
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    // Initialize logging so we can see what's happening
    tracing_subscriber::fmt::init();

    // Load environment variables from .env file (if it exists)
    dotenv::dotenv().ok();

    let token = std::env::var("DISCORD_TOKEN").expect(
        "Missing DISCORD_TOKEN environment variable! Create a .env file with your bot token.",
    );

    // Keep the runtime database in a dedicated folder so the repo root stays
    // tidy; DATABASE_PATH overrides it.
    let database_path =
        std::env::var("DATABASE_PATH").unwrap_or_else(|_| "data/leveling.db".to_string());

    // ========================================================================
    // DEPENDENCY INJECTION
    // ========================================================================
    // This is the "composition root" where everything gets wired together.

    let xp_store = SqliteXpStore::new(&database_path)
        .await
        .expect("Failed to initialize SQLite store");

    let leveling_service = Arc::new(LevelingService::new(xp_store));

    let data = Data {
        leveling: Arc::clone(&leveling_service),
    };

    // ========================================================================
    // DISCORD FRAMEWORK SETUP
    // ========================================================================

    let intents = serenity::GatewayIntents::GUILD_MESSAGES
        | serenity::GatewayIntents::MESSAGE_CONTENT // Required to see messages for XP
        | serenity::GatewayIntents::GUILDS
        | serenity::GatewayIntents::GUILD_MEMBERS;

    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: vec![
                discord::commands::leveling::rank(),
                discord::commands::leveling::leaderboard(),
                discord::commands::leveling::give_xp(),
            ],
            event_handler: |ctx, event, framework, data| {
                Box::pin(event_handler(ctx, event, framework, data))
            },
            ..Default::default()
        })
        .setup(|ctx, _ready, framework| {
            Box::pin(async move {
                tracing::info!("Bot is starting up...");

                // Register slash commands globally (can take up to an hour
                // to propagate; use register_in_guild for faster iteration)
                poise::builtins::register_globally(ctx, &framework.options().commands).await?;

                tracing::info!("Commands registered, bot is ready");
                Ok(data)
            })
        })
        .build();

    let mut client = serenity::ClientBuilder::new(token, intents)
        .framework(framework)
        .await
        .expect("Error creating client");

    client.start().await.expect("Error running bot");
}

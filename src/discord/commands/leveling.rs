// Discord commands for the leveling system.
//
// **Notice the pattern:**
// 1. Extract primitive data from Discord types
// 2. Call the core service
// 3. Format the response based on the result
//
// This layer is THIN - no business logic, just translation.

use crate::core::leveling::{
    self, LeaderboardPage, LevelingError, LevelingService, PAGE_SIZE,
};
use crate::infra::leveling::SqliteXpStore;
use poise::serenity_prelude as serenity;
use std::sync::Arc;

/// Type alias for our bot's context.
/// This is what every command receives as its first parameter.
pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;

/// Data that's shared across all commands.
pub struct Data {
    pub leveling: Arc<LevelingService<SqliteXpStore>>,
}

/// Check your or another member's rank, level and XP.
#[poise::command(slash_command, guild_only, aliases("level"))]
pub async fn rank(
    ctx: Context<'_>,
    #[description = "User to check (defaults to you)"] user: Option<serenity::User>,
) -> Result<(), Error> {
    let target_user = user.as_ref().unwrap_or_else(|| ctx.author());
    if target_user.bot {
        ctx.say("Bots don't earn XP! 🤖").await?;
        return Ok(());
    }

    let user_id = target_user.id.get();
    let guild_id = ctx
        .guild_id()
        .ok_or("This command only works in servers")?
        .get();

    let ranked = match ctx.data().leveling.rank_of(user_id, guild_id).await {
        Ok(ranked) => ranked,
        Err(LevelingError::NotFound) => {
            ctx.say(format!("{} has no XP yet!", target_user.name))
                .await?;
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    let record = &ranked.record;
    let previous_threshold = leveling::xp_for_level(record.level);
    let next_threshold = leveling::xp_for_level(record.level + 1);
    let xp_progress = record.xp.saturating_sub(previous_threshold);
    let level_span = next_threshold.saturating_sub(previous_threshold);
    let pct = leveling::progress_percent(record);

    let embed = serenity::CreateEmbed::new()
        .title(format!("📊 Rank — {}", target_user.name))
        .color(0xed4245)
        .thumbnail(target_user.face())
        .field("Rank", format!("#{}", ranked.rank), true)
        .field("Level", record.level.to_string(), true)
        .field("XP", record.xp.to_string(), true)
        .field(
            "Progress to Next Level",
            format!(
                "{}/{} XP\n{}",
                xp_progress,
                level_span,
                build_progress_bar(pct as f64 / 100.0, 15)
            ),
            false,
        );

    ctx.send(poise::CreateReply::default().embed(embed)).await?;

    Ok(())
}

/// Show the server's XP leaderboard.
#[poise::command(slash_command, guild_only, aliases("top", "lb"))]
pub async fn leaderboard(
    ctx: Context<'_>,
    #[description = "Page number (default: 1)"]
    #[min = 1]
    page: Option<u64>,
) -> Result<(), Error> {
    let guild_id = ctx
        .guild_id()
        .ok_or("This command only works in servers")?
        .get();

    // Defer so a slow database read can't hit the 3 second interaction limit
    ctx.defer().await?;

    let mut board = ctx
        .data()
        .leveling
        .leaderboard_page(guild_id, page.unwrap_or(1))
        .await?;

    if board.total_members == 0 {
        ctx.say("No one has earned XP yet! Start chatting to get on the leaderboard! 💬")
            .await?;
        return Ok(());
    }

    let your_rank = author_rank(&ctx, guild_id).await?;
    let msg = ctx
        .send(build_leaderboard_reply(&ctx, guild_id, &board, your_rank))
        .await?;
    let msg_id = msg.message().await?.id;

    // Page through with buttons until the collector times out
    while let Some(mci) = serenity::ComponentInteractionCollector::new(ctx)
        .author_id(ctx.author().id)
        .channel_id(ctx.channel_id())
        .timeout(std::time::Duration::from_secs(120))
        .filter(move |mci| mci.message.id == msg_id)
        .await
    {
        let requested = match mci.data.custom_id.as_str() {
            "prev" => board.page.saturating_sub(1).max(1),
            "next" => board.page + 1,
            _ => board.page,
        };

        // Defer the update to prevent "Unknown interaction" errors if
        // processing takes more than 3 seconds
        if let Err(e) = mci.defer(&ctx.http()).await {
            tracing::warn!("Failed to defer leaderboard interaction: {e}");
            continue;
        }

        board = ctx
            .data()
            .leveling
            .leaderboard_page(guild_id, requested)
            .await?;
        let your_rank = author_rank(&ctx, guild_id).await?;

        if let Err(e) = msg
            .edit(ctx, build_leaderboard_reply(&ctx, guild_id, &board, your_rank))
            .await
        {
            tracing::warn!("Failed to update leaderboard page: {e}");
        }
    }

    // Remove the buttons after timeout
    let _ = msg
        .edit(ctx, poise::CreateReply::default().components(vec![]))
        .await;

    Ok(())
}

/// Adjust a member's XP by a signed amount (admin only).
#[poise::command(slash_command, guild_only, required_permissions = "ADMINISTRATOR")]
pub async fn give_xp(
    ctx: Context<'_>,
    #[description = "User to adjust"] user: serenity::User,
    #[description = "XP to add (negative to remove)"] amount: i64,
) -> Result<(), Error> {
    if user.bot {
        ctx.say("You can't give XP to bots!").await?;
        return Ok(());
    }

    let user_id = user.id.get();
    let guild_id = ctx
        .guild_id()
        .ok_or("This command only works in servers")?
        .get();

    // Unlike message gains, a storage failure here propagates so the admin
    // sees that nothing was applied.
    let record = ctx
        .data()
        .leveling
        .adjust_xp(user_id, guild_id, amount)
        .await?;

    let embed = serenity::CreateEmbed::new()
        .title("✅ XP Updated")
        .description(format!(
            "{} {} XP {} <@{}>",
            if amount >= 0 { "Added" } else { "Removed" },
            amount.unsigned_abs(),
            if amount >= 0 { "to" } else { "from" },
            user_id
        ))
        .color(0x57f287)
        .field("Total XP", record.xp.to_string(), true)
        .field("Level", record.level.to_string(), true);

    ctx.send(poise::CreateReply::default().embed(embed)).await?;

    Ok(())
}

/// The invoking user's rank, or None if they have no XP yet.
async fn author_rank(ctx: &Context<'_>, guild_id: u64) -> Result<Option<u64>, Error> {
    match ctx
        .data()
        .leveling
        .rank_of(ctx.author().id.get(), guild_id)
        .await
    {
        Ok(ranked) => Ok(Some(ranked.rank)),
        Err(LevelingError::NotFound) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn build_leaderboard_reply(
    ctx: &Context<'_>,
    guild_id: u64,
    board: &LeaderboardPage,
    your_rank: Option<u64>,
) -> poise::CreateReply {
    let offset = (board.page - 1) * PAGE_SIZE;
    let mut description = match your_rank {
        Some(rank) => format!("Your rank: **#{}**\n\n", rank),
        None => "You are not ranked yet.\n\n".to_string(),
    };

    for (index, record) in board.entries.iter().enumerate() {
        let rank = offset + index as u64 + 1;

        let medal = match rank {
            1 => "🥇",
            2 => "🥈",
            3 => "🥉",
            _ => "▫️",
        };

        let user_name = resolve_display_name_cached(ctx, guild_id, record.user_id);
        let is_me = record.user_id == ctx.author().id.get();
        let name_display = if is_me {
            format!("**{}** (You)", user_name)
        } else {
            user_name
        };

        description.push_str(&format!(
            "{} **{}.** {} — Level {} ({} XP)\n",
            medal, rank, name_display, record.level, record.xp
        ));
    }

    let embed = serenity::CreateEmbed::new()
        .title("📊 Leaderboard")
        .description(description)
        .color(0xffd700)
        .footer(serenity::CreateEmbedFooter::new(format!(
            "Page {}/{} • {} members ranked",
            board.page, board.total_pages, board.total_members
        )));

    let components = vec![serenity::CreateActionRow::Buttons(vec![
        serenity::CreateButton::new("prev")
            .label("◀ Previous")
            .style(serenity::ButtonStyle::Primary)
            .disabled(board.page == 1),
        serenity::CreateButton::new("next")
            .label("Next ▶")
            .style(serenity::ButtonStyle::Primary)
            .disabled(board.page == board.total_pages),
    ])];

    poise::CreateReply::default()
        .embed(embed)
        .components(components)
}

/// Resolve a human-friendly display name for a user.
///
/// Cache only - no HTTP calls, so rendering a leaderboard page never blocks
/// on the Discord API. Unknown users fall back to a mention, which the
/// client renders as a name anyway.
fn resolve_display_name_cached(ctx: &Context<'_>, guild_id: u64, user_id: u64) -> String {
    let guild_id_s = serenity::GuildId::from(guild_id);
    let user_id_s = serenity::UserId::from(user_id);

    // Guild member from cache first (preferred, picks up nicknames)
    if let Some(guild) = ctx.serenity_context().cache.guild(guild_id_s) {
        if let Some(member) = guild.members.get(&user_id_s) {
            return member.display_name().to_string();
        }
    }

    if let Some(user) = ctx.serenity_context().cache.user(user_id_s) {
        return user.name.clone();
    }

    format!("<@{}>", user_id)
}

fn build_progress_bar(progress: f64, length: usize) -> String {
    let clamped = progress.clamp(0.0, 1.0);
    let mut filled = (clamped * length as f64).round() as usize;
    if clamped > 0.0 && filled == 0 {
        filled = 1;
    }
    filled = filled.min(length);
    let bar = "▰".repeat(filled) + &"▱".repeat(length - filled);
    format!("{} ({}%)", bar, (clamped * 100.0).floor() as u32)
}

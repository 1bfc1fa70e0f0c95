//! Gateway session: registers `/embed`, runs the pipeline for each
//! invocation and stores cookie files sent by direct message.

mod commands;
mod responder;

use std::sync::Arc;

use async_trait::async_trait;
use embedder_core::cookies::is_cookie_attachment;
use embedder_core::{CookieStore, Credentials, Pipeline};
use secrecy::ExposeSecret;
use serenity::all::{
    ApplicationId, Client, CommandInteraction, Context, EventHandler, GatewayIntents, Guild,
    GuildId, Interaction, Message, Ready,
};
use tracing::{info, warn};

pub use commands::{embed_command, EmbedOptions, EMBED_COMMAND};
pub use responder::{truncate_message, InteractionResponder, MAX_MESSAGE_CHARS};

pub const COOKIE_SAVED_MESSAGE: &str = "Cookie file saved!";

struct Handler {
    pipeline: Arc<Pipeline>,
    cookies: CookieStore,
}

impl Handler {
    async fn register_commands(&self, ctx: &Context, guild_id: GuildId) {
        match guild_id.set_commands(&ctx.http, vec![embed_command()]).await {
            Ok(_) => info!(guild = %guild_id, "registered commands"),
            Err(error) => warn!(guild = %guild_id, %error, "could not register commands"),
        }
    }

    async fn handle_embed(&self, ctx: Context, command: CommandInteraction) {
        let options = EmbedOptions::from_options(&command.data.options);
        let responder = InteractionResponder::new(ctx, command);
        responder.defer().await;
        let report = self
            .pipeline
            .handle(
                &options.url,
                options.start.as_deref(),
                options.end.as_deref(),
                &responder,
            )
            .await;
        info!(
            request_id = %report.request_id,
            delivered = report.delivered(),
            stages = ?report.stages,
            "embed request finished"
        );
    }

    async fn save_cookies(&self, ctx: &Context, msg: &Message) {
        for attachment in &msg.attachments {
            if !is_cookie_attachment(&attachment.filename) {
                continue;
            }
            let contents = match attachment.download().await {
                Ok(contents) => contents,
                Err(error) => {
                    warn!(file = %attachment.filename, %error, "could not get cookie file");
                    return;
                }
            };
            match self.cookies.save(&attachment.filename, &contents).await {
                Ok(path) => info!(path = %path.display(), author = %msg.author.id, "saved cookie file"),
                Err(error) => {
                    warn!(file = %attachment.filename, %error, "could not write cookie file");
                    return;
                }
            }
            if let Err(error) = msg.channel_id.say(&ctx.http, COOKIE_SAVED_MESSAGE).await {
                warn!(%error, "could not send message");
            }
        }
    }
}

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!(user = %ready.user.name, guilds = ready.guilds.len(), "logged in");
        for guild in &ready.guilds {
            self.register_commands(&ctx, guild.id).await;
        }
    }

    async fn guild_create(&self, ctx: Context, guild: Guild, is_new: Option<bool>) {
        // guilds listed in `ready` were registered there
        if is_new == Some(true) {
            self.register_commands(&ctx, guild.id).await;
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        let Interaction::Command(command) = interaction else {
            return;
        };
        if command.data.name == EMBED_COMMAND {
            self.handle_embed(ctx, command).await;
        } else {
            warn!(command = %command.data.name, "unknown command");
        }
    }

    async fn message(&self, ctx: Context, msg: Message) {
        if msg.author.bot || msg.author.id == ctx.cache.current_user().id {
            return;
        }
        if msg.attachments.is_empty() {
            return;
        }
        self.save_cookies(&ctx, &msg).await;
    }
}

/// Connects to the gateway and serves events until Ctrl-C.
pub async fn serve(credentials: &Credentials, pipeline: Pipeline) -> Result<(), serenity::Error> {
    let handler = Handler {
        cookies: pipeline.cookies().clone(),
        pipeline: Arc::new(pipeline),
    };
    let intents = GatewayIntents::GUILDS | GatewayIntents::DIRECT_MESSAGES;
    let mut client = Client::builder(credentials.token.expose_secret(), intents)
        .application_id(ApplicationId::new(credentials.application_id))
        .event_handler(handler)
        .await?;

    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("shutting down"),
            Err(error) => warn!(%error, "could not listen for ctrl-c, shutting down"),
        }
        shard_manager.shutdown_all().await;
    });

    client.start().await
}

mod config;
mod logging;

use std::{process::ExitCode, sync::Arc};

use bot_core::{BotEvent, EventKind, listener};
use bot_matrix::MatrixBot;
use tracing::{error, info};

use crate::config::SmokeConfig;

#[tokio::main]
async fn main() -> ExitCode {
    logging::init();

    let config = match SmokeConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(%err, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };
    info!(?config, "starting smoke bot");

    let mut bot = match MatrixBot::new(config.bot_config()).await {
        Ok(bot) => bot,
        Err(err) => {
            error!(%err, category = ?err.category(), "could not resolve homeserver");
            return ExitCode::FAILURE;
        }
    };

    if let Err(err) = bot.login(&config.password, config.device_id.as_deref()).await {
        error!(%err, category = ?err.category(), "login failed");
        return ExitCode::FAILURE;
    }

    register_listeners(&mut bot);
    spawn_status_logger(&bot);

    match bot.run(config.full_sync).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(code = err.code(), category = ?err.category(), "sync loop stopped: {err}");
            ExitCode::FAILURE
        }
    }
}

fn register_listeners(bot: &mut MatrixBot) {
    let own_user_id = Arc::new(bot.user_id().as_str().to_owned());

    bot.on_message(move |message, metadata| {
        let from_me = metadata.sender == *own_user_id;
        info!(
            room_id = %metadata.room_id,
            sender = %metadata.sender,
            from_me,
            msgtype = %message.msgtype,
            "message: {}",
            message.body
        );
        Ok(())
    });

    bot.on_reaction(|reaction, metadata| {
        info!(
            room_id = %metadata.room_id,
            sender = %metadata.sender,
            target = %reaction.relation.event_id,
            key = %reaction.relation.key,
            "reaction"
        );
        Ok(())
    });

    bot.on_invite(|invite, metadata| {
        info!(
            room_id = %metadata.room_id,
            sender = %invite.sender,
            membership = %invite.content.membership,
            "invite"
        );
        Ok(())
    });

    bot.on(
        EventKind::Custom("m.room.member".to_owned()),
        listener(|content, metadata| {
            info!(room_id = %metadata.room_id, sender = %metadata.sender, ?content, "membership change");
            Ok(())
        }),
    );
}

fn spawn_status_logger(bot: &MatrixBot) {
    let mut status = bot.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = status.recv().await {
            match event {
                BotEvent::StateChanged { state } => info!(?state, "lifecycle"),
                BotEvent::SyncStatus(status) => {
                    info!(running = status.running, cursor = ?status.cursor, "sync status")
                }
                BotEvent::SyncStopped { error_code, message } => {
                    info!(?error_code, ?message, "sync stopped");
                    break;
                }
            }
        }
    });
}

//! murmur terminal client.
//!
//! # Usage
//!
//! ```bash
//! # Start in a room
//! MURMUR_TOKEN=alice murmur --room general
//!
//! # Against another server, with verbose session logs
//! RUST_LOG=murmur_session=debug murmur --server ws://chat.local:8000 --token bob
//! ```
//!
//! Lines typed on stdin are sent as messages; `/help` lists the commands.

mod commands;
mod display;

use std::time::Duration;

use clap::Parser;
use murmur_proto::{MessageKind, RoomId};
use murmur_session::{
    PresenceTracker, ReconnectConfig, Session, SessionConfig, SessionHandle, StaticToken,
};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::commands::{Command, HELP};

/// murmur chat client
#[derive(Parser, Debug)]
#[command(name = "murmur")]
#[command(about = "Terminal chat client for murmur rooms")]
#[command(version)]
struct Args {
    /// WebSocket server base URL
    #[arg(short, long, env = "MURMUR_SERVER", default_value = "ws://127.0.0.1:8000")]
    server: String,

    /// Auth token (omit to stay signed out)
    #[arg(short, long, env = "MURMUR_TOKEN")]
    token: Option<String>,

    /// Room to join on startup
    #[arg(short, long, env = "MURMUR_ROOM")]
    room: Option<String>,

    /// Seconds between heartbeat probes
    #[arg(long, default_value = "30")]
    heartbeat_secs: u64,

    /// Reconnect attempts before giving up
    #[arg(long, default_value = "5")]
    max_reconnects: u32,

    /// Seconds without input before presence turns away
    #[arg(long, default_value = "300")]
    idle_secs: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let config = SessionConfig {
        heartbeat_interval: Duration::from_secs(args.heartbeat_secs),
        reconnect: ReconnectConfig {
            max_attempts: args.max_reconnects,
            ..ReconnectConfig::default()
        },
        ..SessionConfig::with_server(args.server)
    };
    let tokens = match args.token {
        Some(token) => StaticToken::new(token),
        None => StaticToken::signed_out(),
    };
    let room = args.room.map(RoomId::new).transpose()?;

    let tracker = PresenceTracker::new(Duration::from_secs(args.idle_secs));
    tokio::spawn(tracker.clone().run_idle_monitor(Duration::from_secs(15)));

    let session = Session::new(config, tokens).with_presence(&tracker).spawn();
    session.add_message_handler(|event| {
        if let Some(line) = display::describe(event) {
            println!("{line}");
        }
        Ok(())
    });

    if let Err(e) = session.connect(room).await {
        eprintln!("! connect failed: {e}");
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        tracker.record_activity();
        match commands::parse(&line) {
            Ok(Command::Quit) => break,
            Ok(command) => execute(&session, &tracker, command).await,
            Err(e) => eprintln!("! {e}"),
        }
    }

    tracker.go_offline();
    session.close().await;
    log::info!("murmur client exiting");
    Ok(())
}

async fn execute(session: &SessionHandle, tracker: &PresenceTracker, command: Command) {
    match command {
        Command::Say(text) => {
            if let Err(e) = session.send_message(text, MessageKind::Text, None) {
                eprintln!("! {e}");
            }
        }
        Command::Join(room) => {
            if let Err(e) = session.switch_room(room).await {
                eprintln!("! {e}");
            }
        }
        Command::Connect => {
            if let Err(e) = session.connect(None).await {
                eprintln!("! {e}");
            }
        }
        Command::Leave => session.enter_base_view().await,
        Command::Close => session.close().await,
        Command::Typing(on) => session.send_typing_status(on),
        Command::Read(ids) => session.send_read_receipt(ids),
        Command::React { message_id, emoji } => session.send_emoji_reaction(message_id, emoji),
        Command::Edit {
            message_id,
            content,
        } => session.send_message_edit(message_id, content),
        Command::Delete(message_id) => session.send_message_delete(message_id),
        Command::Away => tracker.set_visible(false),
        Command::Back => tracker.set_visible(true),
        Command::Status => {
            let room = session
                .current_room()
                .map_or_else(|| "-".to_string(), |r| r.to_string());
            println!("* {:?} in #{room}", session.state());
        }
        Command::Stats => {
            let stats = session.subscriber_stats();
            println!(
                "* {} events, {} deliveries, {} failures, {} subscribers",
                stats.events_broadcast,
                stats.deliveries,
                stats.failures,
                stats.active_subscribers
            );
            match session.session_stats().await {
                Ok(stats) => println!("{}", display::describe_stats(&stats)),
                Err(e) => eprintln!("! {e}"),
            }
        }
        Command::Help => println!("{HELP}"),
        Command::Quit | Command::Nothing => {}
    }
}

//! huddle — face-to-face group chat over the local network.

use std::net::SocketAddr;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::io::AsyncBufReadExt;

use huddle_core::api::{Message, MessageContent, ObjectMeta};
use huddle_core::config::{DEFAULT_DISCOVERY_ADDR, DEFAULT_LISTEN_ADDR, NodeOptions};
use huddle_core::Key;
use huddle_discovery::{Scanner, SearchOptions};
use huddle_rooms::Room;
use huddled::NodeManager;

#[derive(Parser)]
#[command(
    name = "huddle",
    version,
    about = "Face-to-face group chat over the local network.",
    after_help = "Example:\n  # Create or join a room using the shared PIN code\n  huddle 7134"
)]
struct Cli {
    /// Number for the log level verbosity (0, 1, or 2)
    #[arg(short = 'v', long = "verbose", global = true, default_value_t = 0)]
    verbosity: u8,

    #[command(subcommand)]
    command: Option<Command>,

    /// PIN code to create or join a room (e.g. 7134)
    pin: Option<String>,

    #[command(flatten)]
    chat: ChatOpts,
}

#[derive(Args, Clone)]
struct ChatOpts {
    /// Your name
    #[arg(short, long, default_value = "")]
    name: String,

    /// HTTPS listen address
    #[arg(short = 'l', long = "listen", default_value = DEFAULT_LISTEN_ADDR)]
    listen: String,

    /// Discovery multicast address
    #[arg(long = "discovery-addr", default_value = DEFAULT_DISCOVERY_ADDR)]
    discovery_addr: String,
}

#[derive(Subcommand)]
enum Command {
    /// Start chatting in the room for PIN
    Chat {
        /// PIN code (e.g. 7134)
        pin: String,

        #[command(flatten)]
        opts: ChatOpts,
    },
    /// Scan the local network for rooms
    Scan {
        /// Discovery address to scan
        #[arg(default_value = DEFAULT_DISCOVERY_ADDR)]
        addr: String,

        /// Verify advertisements with this PIN
        #[arg(short, long)]
        pin: Option<String>,
    },
    /// Print version information
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbosity);

    match cli.command {
        Some(Command::Chat { pin, opts }) => run_chat(pin, opts).await,
        Some(Command::Scan { addr, pin }) => run_scan(addr, pin).await,
        Some(Command::Version) => {
            println!("huddle {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        None => match cli.pin {
            Some(pin) => run_chat(pin, cli.chat).await,
            None => bail!("a PIN is required — try: huddle 7134"),
        },
    }
}

fn init_tracing(verbosity: u8) {
    let default_filter = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

// ── chat ──────────────────────────────────────────────────────────────────────

async fn run_chat(pin: String, opts: ChatOpts) -> Result<()> {
    let options = NodeOptions {
        name: opts.name,
        listen_addr: opts.listen,
        discovery_addr: opts.discovery_addr,
    };

    let mut manager = NodeManager::new(options, Key::from(pin)).context("init manager error")?;
    manager.start().await.context("start node error")?;

    let room = manager.room();
    let me = manager.owner().clone();
    let mut subscription = room
        .listen(Some(me.clone()))
        .await
        .context("listen room error")?;

    println!(
        "# room {} — you are {}. Type to chat, Ctrl-C to leave.",
        room.uid().short(),
        display_name(&me)
    );

    // stdin → room
    let input_room = room.clone();
    let from = me.clone();
    tokio::spawn(async move {
        let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let mut msg = Message::text(from.clone(), line);
            if let Err(e) = input_room.create_message(&mut msg).await {
                tracing::error!(error = %e, "create message error");
            }
        }
    });

    // room → stdout
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            msg = subscription.recv() => {
                let Some(msg) = msg else { break };
                print_message(&me, &msg);
            }
        }
    }

    manager.stop().await;
    Ok(())
}

fn display_name(meta: &ObjectMeta) -> String {
    if meta.name.is_empty() {
        meta.uid
            .map(|uid| uid.short())
            .unwrap_or_else(|| "anonymous".to_string())
    } else {
        meta.name.clone()
    }
}

fn print_message(me: &ObjectMeta, msg: &Message) {
    match &msg.content {
        MessageContent::Text(text) => {
            let who = if msg.from.uid.is_some() && msg.from.uid == me.uid {
                "you".to_string()
            } else {
                display_name(&msg.from)
            };
            println!("{who}: {}", text.content);
        }
        MessageContent::Join(change) => println!("* {} joined", display_name(&change.user)),
        MessageContent::Leave(change) => println!("* {} left", display_name(&change.user)),
    }
}

// ── scan ──────────────────────────────────────────────────────────────────────

async fn run_scan(addr: String, pin: Option<String>) -> Result<()> {
    let addr: SocketAddr = addr
        .parse()
        .with_context(|| format!("resolve udp address {addr:?} error"))?;
    let key = pin.map(Key::from);

    let rooms = Scanner::new(addr)
        .search(
            key.as_ref(),
            SearchOptions {
                check_availability: true,
                ..SearchOptions::default()
            },
        )
        .await
        .context("search rooms error")?;

    if rooms.is_empty() {
        println!("No rooms found.");
        return Ok(());
    }

    println!("Found {} room(s):", rooms.len());
    for room in &rooms {
        let uid = room
            .info
            .meta
            .uid
            .map(|uid| uid.to_string())
            .unwrap_or_default();
        println!("┌─ {uid}");
        println!("│  owner     : {}", display_name(&room.info.owner.meta));
        for endpoint in &room.info.endpoints {
            println!("│  endpoint  : {endpoint}");
        }
        match &room.available_endpoint {
            Some(endpoint) => println!("└─ available : {endpoint}"),
            None => println!("└─ available : (none)"),
        }
    }
    Ok(())
}

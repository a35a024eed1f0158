use clap::{Parser, Subcommand};
use lib::chat::{ChatSession, MESSAGE_POLL_INTERVAL};
use lib::config::{self, ConfigStore};
use lib::connection::{ConnectionManager, STATUS_POLL_INTERVAL};
use lib::directory::{ContactDirectory, DIRECTORY_POLL_INTERVAL};
use lib::gateway::normalize::digits_only;
use lib::gateway::GatewayClient;
use lib::model::{ChatMessage, Contact, ConnectionStatus, Direction};
use lib::notify::{LogNotifier, Notifier};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "zapcrm")]
#[command(about = "ZapCRM CLI — WhatsApp gateway connection and chat", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration file with defaults.
    Init {
        /// Config file path (default: ZAPCRM_CONFIG_PATH or ~/.zapcrm/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Update and persist gateway settings.
    Configure {
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Gateway base URL (e.g. http://localhost:8080)
        #[arg(long)]
        base_url: Option<String>,

        /// Gateway API key
        #[arg(long)]
        api_key: Option<String>,

        /// Instance (session) name on the gateway
        #[arg(long)]
        instance: Option<String>,
    },

    /// Check the instance connection state once.
    Status {
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Create the instance if needed and request a pairing QR code.
    Connect {
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Log out of the instance.
    Disconnect {
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// List contacts known to the gateway.
    Contacts {
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Print the full contact records as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Send one text message to a phone number.
    Send {
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Destination phone (digits only, country code + number)
        phone: String,

        /// Message text
        message: String,
    },

    /// Interactive chat with one contact (history + background polling).
    Chat {
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Contact phone (digits only, country code + number)
        phone: String,
    },

    /// Watch connection status and contact count until interrupted.
    Watch {
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    let result = match cli.command {
        Some(Commands::Version) => {
            println!("zapcrm {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Some(Commands::Init { config }) => run_init(config),
        Some(Commands::Configure {
            config,
            base_url,
            api_key,
            instance,
        }) => run_configure(config, base_url, api_key, instance),
        Some(Commands::Status { config }) => run_status(config).await,
        Some(Commands::Connect { config }) => run_connect(config).await,
        Some(Commands::Disconnect { config }) => run_disconnect(config).await,
        Some(Commands::Contacts { config, json }) => run_contacts(config, json).await,
        Some(Commands::Send {
            config,
            phone,
            message,
        }) => run_send(config, phone, message).await,
        Some(Commands::Chat { config, phone }) => run_chat(config, phone).await,
        Some(Commands::Watch { config }) => run_watch(config).await,
        None => {
            println!("Run with --help for usage");
            Ok(())
        }
    };

    if let Err(e) = result {
        log::error!("{:#}", e);
        std::process::exit(1);
    }
}

fn build_client(config_path: Option<PathBuf>) -> anyhow::Result<Arc<GatewayClient>> {
    let (config, path) = config::load_config(config_path)?;
    let store = ConfigStore::with_path(config, path);
    Ok(Arc::new(GatewayClient::new(store)))
}

fn notifier() -> Arc<dyn Notifier> {
    Arc::new(LogNotifier)
}

/// Synthetic contact for a bare phone number (send/chat without a directory
/// lookup): id and phone are the digits, name defaults to the phone.
fn contact_for_phone(phone: &str) -> anyhow::Result<Contact> {
    let digits = digits_only(phone);
    anyhow::ensure!(!digits.is_empty(), "phone must contain digits: {:?}", phone);
    Ok(Contact {
        id: digits.clone(),
        display_name: digits.clone(),
        phone: digits,
        email: String::new(),
        notes: String::new(),
        tags: Vec::new(),
        payment_method: "cash".to_string(),
        source: "WhatsApp".to_string(),
    })
}

fn run_init(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(config::default_config_path);
    config::init_config_file(&path)?;
    println!("initialized configuration at {}", path.display());
    Ok(())
}

fn run_configure(
    config_path: Option<PathBuf>,
    base_url: Option<String>,
    api_key: Option<String>,
    instance: Option<String>,
) -> anyhow::Result<()> {
    let (config, path) = config::load_config(config_path)?;
    let store = ConfigStore::with_path(config, path.clone());
    let updated = store.update(|c| {
        if let Some(url) = base_url {
            c.base_url = url;
        }
        if let Some(key) = api_key {
            c.api_key = key;
        }
        if let Some(name) = instance {
            c.instance_name = name;
        }
    })?;
    println!(
        "saved {} (instance {:?}, gateway {})",
        path.display(),
        updated.instance_name,
        updated.base_url
    );
    Ok(())
}

async fn run_status(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let client = build_client(config_path)?;
    let manager = ConnectionManager::new(client, notifier());
    let state = manager.check_status().await;
    print_connection_state(&state.status, state.pending_qr_code.as_deref());
    Ok(())
}

async fn run_connect(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let client = build_client(config_path)?;
    let manager = ConnectionManager::new(client, notifier());
    let state = manager.connect().await?;
    print_connection_state(&state.status, state.pending_qr_code.as_deref());
    Ok(())
}

async fn run_disconnect(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let client = build_client(config_path)?;
    let manager = ConnectionManager::new(client, notifier());
    manager.disconnect().await?;
    println!("disconnected");
    Ok(())
}

fn print_connection_state(status: &ConnectionStatus, qr: Option<&str>) {
    match status {
        ConnectionStatus::Connected => println!("connected"),
        ConnectionStatus::Connecting => {
            println!("connecting");
            if let Some(qr) = qr {
                println!("pairing code (render as image src): {}", qr);
            }
        }
        ConnectionStatus::Disconnected => println!("disconnected"),
    }
}

async fn run_contacts(config_path: Option<PathBuf>, json: bool) -> anyhow::Result<()> {
    let client = build_client(config_path)?;
    let directory = ContactDirectory::new(client, notifier());
    directory.load_contacts().await;
    let state = directory.snapshot();
    if let Some(err) = state.error {
        anyhow::bail!("contact fetch failed: {}", err);
    }
    if json {
        println!("{}", serde_json::to_string_pretty(&state.contacts)?);
        return Ok(());
    }
    if state.contacts.is_empty() {
        println!("no contacts");
        return Ok(());
    }
    for contact in &state.contacts {
        println!("{}\t{}", contact.phone, contact.display_name);
    }
    Ok(())
}

async fn run_send(
    config_path: Option<PathBuf>,
    phone: String,
    message: String,
) -> anyhow::Result<()> {
    let client = build_client(config_path)?;
    let contact = contact_for_phone(&phone)?;
    let session = ChatSession::new(client, notifier(), &contact);
    let sent = session.send_message(&message).await?;
    println!("sent {} to {}", sent.id, contact.phone);
    Ok(())
}

fn print_message(msg: &ChatMessage) {
    let arrow = match msg.direction {
        Direction::Incoming => "<",
        Direction::Outgoing => ">",
    };
    let body = if msg.content.is_empty() {
        msg.media_url.as_deref().unwrap_or("[media]")
    } else {
        msg.content.as_str()
    };
    println!("{} [{}] {}", arrow, msg.timestamp.format("%Y-%m-%d %H:%M"), body);
}

async fn run_chat(config_path: Option<PathBuf>, phone: String) -> anyhow::Result<()> {
    use std::io::{self, Write};

    let client = build_client(config_path)?;
    let contact = contact_for_phone(&phone)?;
    let session = Arc::new(ChatSession::new(client, notifier(), &contact));

    session.load_messages().await;
    let state = session.snapshot();
    if let Some(ref err) = state.error {
        eprintln!("history unavailable: {}", err);
    }
    for msg in &state.messages {
        print_message(msg);
    }

    session.clone().start_polling(MESSAGE_POLL_INTERVAL);
    println!("chatting with {} — /refresh to reload, /exit to quit", contact.phone);

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    loop {
        write!(stdout, "> ")?;
        stdout.flush()?;
        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input.eq_ignore_ascii_case("/exit") || input.eq_ignore_ascii_case("/quit") {
            break;
        }
        if input.eq_ignore_ascii_case("/refresh") {
            session.load_messages().await;
            for msg in &session.snapshot().messages {
                print_message(msg);
            }
            continue;
        }
        if let Err(e) = session.send_message(input).await {
            eprintln!("send error: {}", e);
        }
    }

    session.stop_polling();
    Ok(())
}

async fn run_watch(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let client = build_client(config_path)?;
    let connection = Arc::new(ConnectionManager::new(client.clone(), notifier()));
    let directory = Arc::new(ContactDirectory::new(client, notifier()));

    connection.clone().start_polling(STATUS_POLL_INTERVAL);
    directory.clone().start_polling(DIRECTORY_POLL_INTERVAL);
    println!("watching gateway state (Ctrl+C to stop)");

    let mut last: Option<(ConnectionStatus, usize)> = None;
    loop {
        tokio::time::sleep(std::time::Duration::from_secs(2)).await;
        let state = connection.snapshot();
        let contacts = directory.snapshot().contacts.len();
        let current = (state.status, contacts);
        if last != Some(current) {
            let status = match state.status {
                ConnectionStatus::Connected => "connected",
                ConnectionStatus::Connecting => "connecting",
                ConnectionStatus::Disconnected => "disconnected",
            };
            println!("{} — {} contacts", status, contacts);
            if let Some(qr) = state.pending_qr_code {
                println!("pairing code (render as image src): {}", qr);
            }
            last = Some(current);
        }
    }
}

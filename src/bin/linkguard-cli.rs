use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Method;
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "linkguard-cli")]
#[command(about = "Management CLI for the linkguard daemon", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://127.0.0.1:8181")]
    url: String,

    #[arg(short, long, env = "LINKGUARD_API_KEY", default_value = "CHANGE_ME_IN_PRODUCTION")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Overall daemon status
    Status,
    /// Current network state, quality and recent history
    Network,
    /// Connectivity statistics over the recorded history
    Stats,
    /// Probe reachability right now
    Probe,
    /// Start a manual failover
    Failover,
    /// Manage backup networks
    #[command(subcommand)]
    Networks(NetworkCommands),
    /// Inspect and manage the dispatch queue
    #[command(subcommand)]
    Queue(QueueCommands),
}

#[derive(Subcommand)]
enum NetworkCommands {
    /// List backup networks in failover order
    List,
    /// Add a backup network, or replace the one with the same name
    Add {
        name: String,
        /// Secret for secured networks; omit for open ones
        #[arg(short, long)]
        secret: Option<String>,
        #[arg(short, long, default_value_t = 0, allow_negative_numbers = true)]
        priority: i32,
    },
    /// Remove a backup network and its stored secret
    Remove { id: String },
    /// Change a backup network's priority rank
    Priority {
        id: String,
        #[arg(allow_negative_numbers = true)]
        rank: i32,
    },
}

#[derive(Subcommand)]
enum QueueCommands {
    /// Queue status and every active request
    List,
    /// Show one request, active or recently finished
    Show { id: String },
    /// Queue a call for delivery
    Enqueue {
        url: String,
        #[arg(short, long, default_value = "GET")]
        method: String,
        /// Request body
        #[arg(short, long)]
        body: Option<String>,
        /// low, normal, high or critical
        #[arg(short, long, default_value = "normal")]
        priority: String,
        #[arg(short, long)]
        description: Option<String>,
    },
    /// Remove one request from the queue
    Cancel { id: String },
    /// Remove every request from the queue
    Clear,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );

    let (method, path, body) = match cli.command {
        Commands::Status => (Method::GET, "/admin/status".to_string(), None),
        Commands::Network => (Method::GET, "/admin/network".to_string(), None),
        Commands::Stats => (Method::GET, "/admin/network/stats".to_string(), None),
        Commands::Probe => (Method::POST, "/admin/network/probe".to_string(), None),
        Commands::Failover => (Method::POST, "/admin/network/failover".to_string(), None),
        Commands::Networks(command) => match command {
            NetworkCommands::List => (Method::GET, "/admin/networks".to_string(), None),
            NetworkCommands::Add { name, secret, priority } => (
                Method::POST,
                "/admin/networks".to_string(),
                Some(json!({ "name": name, "secret": secret, "priority_rank": priority })),
            ),
            NetworkCommands::Remove { id } => (Method::DELETE, format!("/admin/networks/{id}"), None),
            NetworkCommands::Priority { id, rank } => (
                Method::PUT,
                format!("/admin/networks/{id}/priority"),
                Some(json!({ "priority_rank": rank })),
            ),
        },
        Commands::Queue(command) => match command {
            QueueCommands::List => (Method::GET, "/admin/queue".to_string(), None),
            QueueCommands::Show { id } => (Method::GET, format!("/admin/queue/{id}"), None),
            QueueCommands::Enqueue {
                url,
                method,
                body,
                priority,
                description,
            } => (
                Method::POST,
                "/admin/queue".to_string(),
                Some(json!({
                    "target": { "url": url, "method": method.to_uppercase(), "body": body },
                    "priority": priority.to_lowercase(),
                    "metadata": { "description": description },
                })),
            ),
            QueueCommands::Cancel { id } => (Method::DELETE, format!("/admin/queue/{id}"), None),
            QueueCommands::Clear => (Method::DELETE, "/admin/queue".to_string(), None),
        },
    };

    let mut request = client
        .request(method, format!("{}{}", cli.url.trim_end_matches('/'), path))
        .headers(headers);
    if let Some(body) = body {
        request = request.json(&body);
    }
    print_response(request.send().await?).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}

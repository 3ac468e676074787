use clap::{Parser, Subcommand};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "lb-cli")]
#[command(about = "Inspect a running least-conn-proxy", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8000")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Table of every backend with health and in-flight requests
    Stats,
    /// Raw JSON of the backends currently eligible for traffic
    Members,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let res = client
        .get(format!("{}/stats", cli.url.trim_end_matches('/')))
        .send()
        .await?;

    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: status endpoint returned {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("{}", text);
        }
        std::process::exit(1);
    }

    let backends: Vec<Value> = res.json().await?;
    match cli.command {
        Commands::Stats => print_table(&backends),
        Commands::Members => {
            let members: Vec<&Value> = backends
                .iter()
                .filter(|b| b["member"].as_bool().unwrap_or(false))
                .collect();
            println!("{}", serde_json::to_string_pretty(&members)?);
        }
    }

    Ok(())
}

fn print_table(backends: &[Value]) {
    println!(
        "{:<16} {:<32} {:>6} {:>8} {:>8}",
        "NAME", "URL", "WEIGHT", "HEALTH", "ACTIVE"
    );
    for b in backends {
        let health = if b["health"].as_bool().unwrap_or(false) {
            "up"
        } else {
            "down"
        };
        println!(
            "{:<16} {:<32} {:>6} {:>8} {:>8}",
            b["name"].as_str().unwrap_or("-"),
            b["url"].as_str().unwrap_or("-"),
            b["weight"].as_u64().unwrap_or(0),
            health,
            b["active_connections"].as_u64().unwrap_or(0),
        );
    }
}

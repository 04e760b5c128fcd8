use clap::{Parser, Subcommand};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "scaffold-cli")]
#[command(about = "Operator CLI for the API scaffold", long_about = None)]
struct Cli {
    /// Base URL including the route prefix
    #[arg(short, long, default_value = "http://127.0.0.1:8080/api")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Readiness: database probe and drain state
    Health,
    /// Liveness
    Live,
    /// Ask the server to drain and stop
    Shutdown,
    /// Print the OpenAPI document
    Openapi,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = cli.url.trim_end_matches('/');

    let res = match cli.command {
        Commands::Health => client.get(format!("{}/health", base)).send().await?,
        Commands::Live => client.get(format!("{}/health/live", base)).send().await?,
        Commands::Shutdown => client.post(format!("{}/shutdown", base)).send().await?,
        Commands::Openapi => client.get(format!("{}/documentation/json", base)).send().await?,
    };

    let ok = print_response(res).await?;
    if !ok {
        std::process::exit(1);
    }
    Ok(())
}

/// Print the body and report whether the status was a success.
///
/// Readiness answers 503 with a JSON report, so error bodies are printed too.
async fn print_response(res: reqwest::Response) -> Result<bool, Box<dyn std::error::Error>> {
    let status = res.status();
    let text = res.text().await?;

    match serde_json::from_str::<Value>(&text) {
        Ok(json) if status.is_success() => println!("{}", serde_json::to_string_pretty(&json)?),
        Ok(json) => {
            eprintln!("Error: server returned status {}", status);
            eprintln!("{}", serde_json::to_string_pretty(&json)?);
        }
        Err(_) if status.is_success() => println!("{}", text),
        Err(_) => {
            eprintln!("Error: server returned status {}", status);
            eprintln!("Response: {}", text);
        }
    }

    Ok(status.is_success())
}

//! sav-cli — command-line frontend for the SAV HTTP API
//!
//! # Subcommands
//! - `status`                                         — show server health
//! - `classify <description> [--json]`                — seller classification
//! - `tariff <description> [--answer k=v]... [--json]` — tariff recommendation
//! - `send <chat_id> <text> [--client <id>]`          — deliver a Telegram message
//! - `viewed mark|update|show|clear`                   — local viewed-experts cache

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use sav_core::models::{SwipeDirection, ViewedExpert};
use sav_core::{FileLocalStore, ViewedSet};
use serde::Deserialize;
use serde_json::{json, Map, Value};

const DEFAULT_SERVER: &str = "http://127.0.0.1:8770";
const DEFAULT_DATA_DIR: &str = "~/.sav";

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(name = "sav-cli", version, about = "SAV service CLI")]
struct Cli {
    /// SAV HTTP server URL (overrides SAV_HTTP_URL env var)
    #[arg(long, env = "SAV_HTTP_URL", default_value = DEFAULT_SERVER)]
    server: String,

    /// Directory of the local key-value store
    #[arg(long, env = "SAV_DATA_DIR", default_value = DEFAULT_DATA_DIR)]
    data_dir: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Show SAV server status
    Status,

    /// Classify a seller from a free-text description
    Classify {
        description: String,

        /// Print the raw JSON response
        #[arg(long)]
        json: bool,
    },

    /// Recommend a tariff
    Tariff {
        description: String,

        /// Questionnaire answer as key=value (repeatable)
        #[arg(long = "answer", value_name = "KEY=VALUE")]
        answers: Vec<String>,

        /// Print the raw JSON response
        #[arg(long)]
        json: bool,
    },

    /// Send a Telegram message and record its delivery
    Send {
        chat_id: String,
        text: String,

        /// Client the message belongs to
        #[arg(long)]
        client: Option<String>,
    },

    /// Manage the local viewed-experts cache
    Viewed {
        #[command(subcommand)]
        action: ViewedCommand,
    },
}

#[derive(Debug, Subcommand)]
enum ViewedCommand {
    /// Record a swipe on an expert
    Mark { id: String, direction: SwipeDirection },
    /// Change the direction of an already-viewed expert
    Update { id: String, direction: SwipeDirection },
    /// List viewed experts, most recent first
    Show,
    /// Forget every viewed expert
    Clear,
}

// ============================================================================
// API Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct Classification {
    pub seller_type: String,
    #[serde(default)]
    pub niche: String,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub summary: String,
}

#[derive(Debug, Deserialize)]
pub struct Tariff {
    pub tariff: String,
    #[serde(default)]
    pub reason: String,
}

// ============================================================================
// Pure helpers
// ============================================================================

/// Parse `key=value`. The value is read as JSON when it parses, else as a string.
pub fn parse_answer(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("answer must be key=value, got: {}", raw))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("answer has an empty key: {}", raw));
    }
    let value = serde_json::from_str(value.trim()).unwrap_or_else(|_| Value::String(value.trim().to_string()));
    Ok((key.to_string(), value))
}

pub fn parse_answers(raw: &[String]) -> Result<Map<String, Value>, String> {
    raw.iter().map(|a| parse_answer(a)).collect()
}

pub fn format_classification(c: &Classification) -> String {
    let mut out = format!(
        "Seller type: {}\nNiche:       {}\nConfidence:  {:.0}%",
        c.seller_type,
        if c.niche.is_empty() { "?" } else { c.niche.as_str() },
        c.confidence * 100.0
    );
    if !c.summary.is_empty() {
        out.push_str(&format!("\n\n{}", c.summary));
    }
    out
}

pub fn format_viewed(entries: &[&ViewedExpert]) -> String {
    if entries.is_empty() {
        return "No viewed experts".to_string();
    }
    entries
        .iter()
        .map(|e| format!("{:<24} {:<6} {}", e.id, e.direction, e.timestamp))
        .collect::<Vec<_>>()
        .join("\n")
}

fn data_dir(raw: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(raw).into_owned())
}

// ============================================================================
// HTTP Client Calls
// ============================================================================

fn client(timeout_secs: u64) -> anyhow::Result<reqwest::blocking::Client> {
    Ok(reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()?)
}

/// POST `body` to `path`; exits with the server's error message on failure.
fn post(server: &str, path: &str, body: Value) -> anyhow::Result<Value> {
    let url = format!("{}{}", server, path);
    let resp = match client(90)?.post(&url).json(&body).send() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("sav-cli: connection failed to {}: {}", url, e);
            std::process::exit(1);
        }
    };

    let status = resp.status();
    let body: Value = resp.json().unwrap_or_default();
    if !status.is_success() {
        let msg = body["error"].as_str().unwrap_or("unknown error");
        eprintln!("sav-cli: server returned {}: {}", status, msg);
        std::process::exit(1);
    }
    Ok(body)
}

fn print_json(value: &Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Show the server status by calling GET /health.
fn do_status(server: &str) -> anyhow::Result<()> {
    let url = format!("{}/health", server);
    match client(10)?.get(&url).send() {
        Ok(r) if r.status().is_success() => {
            let body: Value = r.json().unwrap_or_default();
            println!("SAV server:   {}", body["status"].as_str().unwrap_or("unknown"));
            println!("Version:      {}", body["version"].as_str().unwrap_or("?"));
            println!("Backend:      {}", body["backend"].as_str().unwrap_or("?"));
            println!("Backend ver.: {}", body["backend_version"].as_str().unwrap_or("?"));
            println!("Dev mode:     {}", body["dev_mode"].as_bool().unwrap_or(false));
            println!("AI gateway:   {}", body["ai"].as_bool().unwrap_or(false));
            println!("Telegram:     {}", body["telegram"].as_bool().unwrap_or(false));
        }
        Ok(r) => {
            eprintln!("sav-cli: server unhealthy (HTTP {})", r.status());
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("sav-cli: cannot reach {} — {}", url, e);
            std::process::exit(1);
        }
    }
    Ok(())
}

fn do_classify(server: &str, description: &str, json_output: bool) -> anyhow::Result<()> {
    let body = post(server, "/ai/classify-seller", json!({"description": description}))?;
    if json_output {
        return print_json(&body);
    }
    let c: Classification = serde_json::from_value(body)?;
    println!("{}", format_classification(&c));
    Ok(())
}

fn do_tariff(server: &str, description: &str, answers: &[String], json_output: bool) -> anyhow::Result<()> {
    let answers = parse_answers(answers).map_err(anyhow::Error::msg)?;
    let body = post(
        server,
        "/ai/recommend-tariff",
        json!({"description": description, "answers": answers}),
    )?;
    if json_output {
        return print_json(&body);
    }
    let t: Tariff = serde_json::from_value(body)?;
    println!("Recommended tariff: {}", t.tariff);
    if !t.reason.is_empty() {
        println!("\n{}", t.reason);
    }
    Ok(())
}

fn do_send(server: &str, chat_id: &str, text: &str, client_id: Option<&str>) -> anyhow::Result<()> {
    let body = post(
        server,
        "/messages/send",
        json!({"chat_id": chat_id, "text": text, "client_id": client_id}),
    )?;
    let status = body["status"].as_str().unwrap_or("unknown");
    println!("Message {}: {}", body["message_id"].as_str().unwrap_or("?"), status);
    if let Some(error) = body["error"].as_str() {
        eprintln!("sav-cli: delivery failed: {}", error);
        std::process::exit(1);
    }
    Ok(())
}

fn do_viewed(data_dir: PathBuf, action: ViewedCommand) -> anyhow::Result<()> {
    let local = Arc::new(FileLocalStore::open(data_dir)?);
    let mut set = ViewedSet::open(local);

    match action {
        ViewedCommand::Mark { id, direction } => {
            set.mark_as_viewed(&id, direction);
            println!("Marked {} as {}", id, direction);
        }
        ViewedCommand::Update { id, direction } => {
            if !set.is_viewed(&id) {
                eprintln!("sav-cli: {} has not been viewed", id);
                std::process::exit(1);
            }
            set.update_direction(&id, direction);
            println!("Updated {} to {}", id, direction);
        }
        ViewedCommand::Show => println!("{}", format_viewed(&set.entries())),
        ViewedCommand::Clear => {
            let n = set.len();
            set.clear_viewed();
            println!("Cleared {} viewed experts", n);
        }
    }
    Ok(())
}

// ============================================================================
// Main
// ============================================================================

fn main() {
    let cli = Cli::parse();
    let server = cli.server.trim_end_matches('/').to_string();

    let result = match cli.command {
        Commands::Status => do_status(&server),
        Commands::Classify { description, json } => do_classify(&server, &description, json),
        Commands::Tariff {
            description,
            answers,
            json,
        } => do_tariff(&server, &description, &answers, json),
        Commands::Send {
            chat_id,
            text,
            client,
        } => do_send(&server, &chat_id, &text, client.as_deref()),
        Commands::Viewed { action } => do_viewed(data_dir(&cli.data_dir), action),
    };

    if let Err(e) = result {
        eprintln!("sav-cli: {}", e);
        std::process::exit(1);
    }
}

// ============================================================================
// Tests
// ============================================================================

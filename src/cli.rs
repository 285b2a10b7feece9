//! Terminal front-end for scanning cards and browsing the collection

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};

use card_scanner::capture::{FfmpegCamera, StillImageSource};
use card_scanner::card_scanner::CardScanner;
use card_scanner::collection::Collection;
use card_scanner::config::Config;
use card_scanner::database::Database;
use card_scanner::error::ScanError;
use card_scanner::gemini::GeminiClient;
use card_scanner::models::{CollectionEntry, IdentificationResult, SortOption};
use card_scanner::traits::{CaptureSource, CollectionStore};

#[derive(Debug, Parser)]
#[command(name = "card-scanner", version, about = "Scan trading cards and keep a local collection")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Capture a card, identify it and add it to the collection
    Scan {
        /// Identify this image file instead of using the camera
        #[arg(long, conflicts_with = "device")]
        image: Option<PathBuf>,
        /// Video device to open (defaults to CARD_SCANNER_CAMERA)
        #[arg(long)]
        device: Option<PathBuf>,
        /// Add identified cards without asking
        #[arg(short, long)]
        yes: bool,
    },
    /// List the collection
    List {
        /// newest, bounty, set or rarity
        #[arg(short, long, default_value_t = SortOption::Newest)]
        sort: SortOption,
    },
    /// Show one card in detail
    Show { id: String },
    /// Remove a card from the collection
    Remove { id: String },
    /// Total estimated value of the collection
    Total,
    /// Remove every card
    Clear {
        #[arg(short, long)]
        yes: bool,
    },
}

type Store = Collection<Database>;

pub async fn run(cli: Cli, config: Config) -> Result<()> {
    let store = Collection::new(Database::new(&config.database_url).await?);
    let mut prompt = Prompt::new();

    match cli.command {
        Command::Scan { image, device, yes } => {
            let identifier = GeminiClient::new(config.gemini.clone())?;
            if !identifier.is_configured() {
                bail!("Gemini API key is missing. Please add GEMINI_API_KEY to your .env file.");
            }

            match image {
                Some(path) => {
                    let scanner = CardScanner::new(StillImageSource::from_file(path), identifier, store);
                    scan(&scanner, &mut prompt, yes, true).await
                }
                None => {
                    let device = device.unwrap_or(config.camera_device);
                    let scanner = CardScanner::new(FfmpegCamera::new(device), identifier, store);
                    scan(&scanner, &mut prompt, yes, false).await
                }
            }
        }
        Command::List { sort } => {
            let entries = store.sorted(sort).await;
            print_entries(&entries);
            Ok(())
        }
        Command::Show { id } => match store.get(&id).await {
            Some(entry) => {
                print_entry(&entry);
                Ok(())
            }
            None => bail!("no card with id {id}"),
        },
        Command::Remove { id } => {
            store.remove(&id).await?;
            println!("Removed {id}");
            Ok(())
        }
        Command::Total => {
            let entries = store.list().await;
            println!(
                "Total bounty: {} across {} card(s)",
                format_price(card_scanner::collection::total_bounty(&entries)),
                entries.len()
            );
            Ok(())
        }
        Command::Clear { yes } => {
            if yes || prompt.confirm("Remove every card from the collection?").await? {
                store.clear().await?;
                println!("Collection cleared");
            }
            Ok(())
        }
    }
}

async fn scan<C: CaptureSource>(
    scanner: &CardScanner<C, GeminiClient, Store>,
    prompt: &mut Prompt,
    auto_confirm: bool,
    single_shot: bool,
) -> Result<()> {
    while let Err(e) = scanner.start_camera().await {
        eprintln!("{}", e.user_message());
        eprintln!("  {e}");
        if single_shot || !prompt.confirm("Retry camera?").await? {
            return Err(e.into());
        }
    }

    let outcome = capture_loop(scanner, prompt, auto_confirm, single_shot).await;
    scanner.stop_camera().await;
    outcome
}

async fn capture_loop<C: CaptureSource>(
    scanner: &CardScanner<C, GeminiClient, Store>,
    prompt: &mut Prompt,
    auto_confirm: bool,
    single_shot: bool,
) -> Result<()> {
    loop {
        if !single_shot {
            let line = prompt
                .ask("Align the card and press Enter to capture (q to quit): ")
                .await?;
            if matches!(line.as_deref(), None | Some("q" | "quit")) {
                return Ok(());
            }
        }

        println!("Identifying card...");
        match scanner.shutter().await {
            Ok(result) => {
                print_result(&result);
                if auto_confirm || prompt.confirm("Add to your collection?").await? {
                    let entry = scanner.confirm().await?;
                    println!("Added {} ({})", entry.name, entry.id);
                } else {
                    scanner.discard().await;
                }
            }
            Err(ScanError::Identify(e)) => {
                eprintln!("{}", e.user_message());
                if !e.is_retryable() || single_shot {
                    return Err(e.into());
                }
            }
            Err(e) => {
                if single_shot {
                    return Err(e.into());
                }
                eprintln!("{e}");
            }
        }

        if single_shot {
            return Ok(());
        }
    }
}

fn format_price(price: f64) -> String {
    format!("${price:.2}")
}

fn print_result(result: &IdentificationResult) {
    println!();
    println!("  {}", result.name);
    println!("  {} - {}", result.set, result.code);
    println!("  Rarity: {}", result.rarity);
    println!("  Bounty: {}", format_price(result.price));
    if !result.image.is_empty() {
        println!("  Image:  {}", result.image);
    }
    println!("  \"{}\"", result.description);
    println!();
}

fn print_entries(entries: &[CollectionEntry]) {
    if entries.is_empty() {
        println!("Your collection is empty. Scan a card to get started.");
        return;
    }

    println!(
        "{:<36}  {:<10}  {:<28}  {:<20}  {:<12}  {:>9}",
        "ID", "CODE", "NAME", "SET", "RARITY", "BOUNTY"
    );
    for entry in entries {
        println!(
            "{:<36}  {:<10}  {:<28}  {:<20}  {:<12}  {:>9}",
            entry.id,
            truncate(&entry.card_code, 10),
            truncate(&entry.name, 28),
            truncate(&entry.set, 20),
            truncate(&entry.rarity, 12),
            format_price(entry.price)
        );
    }
    println!(
        "\n{} card(s), total bounty {}",
        entries.len(),
        format_price(card_scanner::collection::total_bounty(entries))
    );
}

fn print_entry(entry: &CollectionEntry) {
    println!("{}", entry.name);
    println!("{} - {}", entry.set, entry.card_code);
    println!("Rarity:  {}", entry.rarity);
    println!("Bounty:  {}", format_price(entry.price));
    match entry.display_image() {
        Some(url) if url.starts_with("data:") => {
            println!("Image:   captured photo ({} bytes encoded)", url.len());
        }
        Some(url) => println!("Image:   {url}"),
        None => println!("Image:   none"),
    }
    if let Some(added) = chrono::DateTime::<chrono::Utc>::from_timestamp_millis(entry.timestamp) {
        println!("Added:   {}", added.format("%Y-%m-%d %H:%M"));
    }
    println!("\n\"{}\"", entry.description);
}

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    let mut short: String = text.chars().take(width.saturating_sub(1)).collect();
    short.push('…');
    short
}

/// Line-based questions on stdin
struct Prompt {
    lines: Lines<BufReader<Stdin>>,
}

impl Prompt {
    fn new() -> Self {
        Self {
            lines: BufReader::new(tokio::io::stdin()).lines(),
        }
    }

    /// Returns the trimmed answer, or `None` on end of input
    async fn ask(&mut self, question: &str) -> Result<Option<String>> {
        let mut stdout = tokio::io::stdout();
        stdout.write_all(question.as_bytes()).await?;
        stdout.flush().await?;

        Ok(self
            .lines
            .next_line()
            .await?
            .map(|line| line.trim().to_lowercase()))
    }

    async fn confirm(&mut self, question: &str) -> Result<bool> {
        let answer = self.ask(&format!("{question} [y/N] ")).await?;
        Ok(matches!(answer.as_deref(), Some("y" | "yes")))
    }
}

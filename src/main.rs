use clap::{Parser, Subcommand};
use irdkit::diff::{diff_paths, DiffReport};
use irdkit::key::{KeyResolver, ResolveHints};
use irdkit::lookup::{LookupConfig, RedumpClient, DEFAULT_BASE_URL};
use irdkit::{DiscIdentity, IrdRecord};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "irdkit", version, about = "PS3 disc key resolution and IRD comparison")]
struct Cli {
    /// Log debug detail to stderr (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,
    /// Print machine-readable JSON
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Find the disc key for an image
    Key {
        iso: PathBuf,
        /// Disc key as 32 hex digits
        #[arg(short, long)]
        key: Option<String>,
        /// Raw 16-byte key file
        #[arg(long)]
        key_file: Option<PathBuf>,
        /// GetKey log written by the dumper
        #[arg(long)]
        getkey_log: Option<PathBuf>,
        /// Layer break offset, passed through to the IRD writer
        #[arg(long)]
        layerbreak: Option<u64>,
        /// Key database root
        #[arg(long, env = "IRDKIT_REDUMP_URL", default_value = DEFAULT_BASE_URL)]
        redump_url: String,
        /// HTTP timeout in seconds
        #[arg(long, default_value = "30")]
        timeout: u64,
    },
    /// Print CRC32 and SHA1 of an image
    Hash {
        iso: PathBuf,
    },
    /// Compare two IRD records (JSON form)
    Diff {
        a: PathBuf,
        b: PathBuf,
    },
    /// Show an IRD record summary
    Info {
        input: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {

        // ── Key ──────────────────────────────────────────────────────────────
        Commands::Key { iso, key, key_file, getkey_log, layerbreak, redump_url, timeout } => {
            let db = RedumpClient::new(LookupConfig {
                base_url: redump_url,
                timeout:  Duration::from_secs(timeout),
                ..Default::default()
            })?;
            let hints = ResolveHints { explicit_hex_key: key, key_file, getkey_log };
            let found = KeyResolver::new(db).resolve(&iso, &hints, layerbreak)?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&found)?);
            } else {
                println!("Key     {}", found.to_hex());
                println!("Source  {}", found.source);
                if !found.is_valid() {
                    println!("Warning key is {} bytes, expected 16", found.key.len());
                }
            }
        }

        // ── Hash ─────────────────────────────────────────────────────────────
        Commands::Hash { iso } => {
            let id = DiscIdentity::compute(&iso)?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&id)?);
            } else {
                println!("CRC32  {}", id.crc32);
                println!("SHA1   {}", id.sha1);
            }
        }

        // ── Diff ─────────────────────────────────────────────────────────────
        Commands::Diff { a, b } => match diff_paths(&a, &b)? {
            DiffReport::SameSource => println!("Nothing to compare: both inputs are the same file"),
            DiffReport::Entries(entries) => {
                if cli.json {
                    println!("{}", serde_json::to_string_pretty(&entries)?);
                } else {
                    println!("Comparing {} and {}", a.display(), b.display());
                    for e in &entries {
                        println!("  {e}");
                    }
                }
            }
        },

        // ── Info ─────────────────────────────────────────────────────────────
        Commands::Info { input } => {
            let rec = IrdRecord::load(&input)?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&rec)?);
            } else {
                println!("── IRD ──────────────────────────────────────────────────");
                println!("  Path           {}", input.display());
                println!("  Version        {}", rec.version);
                println!("  Title ID       {}", rec.title_id);
                println!("  Title          {}", rec.title);
                println!("  System version {}", rec.system_version);
                println!("  Disc version   {}", rec.disc_version);
                println!("  App version    {}", rec.app_version);
                println!("  Regions        {}", rec.region_count);
                println!("  Files          {}", rec.file_count);
                println!("  Unique ID      0x{:08X}", rec.uid);
                println!("  Data 1 key     {}", hex::encode(rec.data1_key));
                println!("  Data 2 key     {}", hex::encode(rec.data2_key));
            }
        }
    }

    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────────

fn init_logging(verbose: bool) {
    let default = if verbose { "irdkit=debug" } else { "irdkit=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

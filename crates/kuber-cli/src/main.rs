//! kuber: streaming AES-CTR file encryption
//!
//! Commands:
//!   encrypt <input> <dest>   - encrypt a file; output is [16-byte IV][ciphertext]
//!   decrypt <input> <dest>   - decrypt a file produced by `encrypt`
//!   config show              - display current configuration
//!
//! The key is read as base64 from `crypto.key_file` or the environment
//! variable named by `crypto.key_env` (default KUBER_KEY).

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{info, warn};

use kuber_core::KuberConfig;
use kuber_crypto::{generate_iv, AesCtr, ChunkedPipeline, CtrEngine, StreamOptions, IV_SIZE};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "kuber",
    version,
    about = "Streaming AES-CTR file encryption",
    long_about = "kuber: encrypt and decrypt files of any size through a fixed-size AES-CTR stream"
)]
struct Cli {
    /// Path to the kuber configuration file
    #[arg(long, short = 'c', env = "KUBER_CONFIG", default_value = "/etc/kuber/config.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides logging.level
    #[arg(long, env = "KUBER_LOG")]
    log: Option<String>,

    /// Log format (json, text); overrides logging.format
    #[arg(long, env = "KUBER_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Encrypt a local file
    ///
    /// If <dest> is a directory (or ends with '/') the input file name is
    /// appended. Existing files are never overwritten.
    Encrypt {
        /// File to encrypt
        input: PathBuf,
        /// Output file or directory
        dest: PathBuf,
        /// Read chunk size in bytes (overrides pipeline.encrypt_chunk_size)
        #[arg(long)]
        chunk_size: Option<usize>,
    },

    /// Decrypt a file produced by `kuber encrypt`
    Decrypt {
        /// File to decrypt
        input: PathBuf,
        /// Output file or directory
        dest: PathBuf,
        /// Read chunk size in bytes (overrides pipeline.decrypt_chunk_size)
        #[arg(long)]
        chunk_size: Option<usize>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    let level = cli.log.as_deref().unwrap_or(&config.logging.level);
    let format = cli.log_format.clone().unwrap_or(match config.logging.format.as_str() {
        "json" => LogFormat::Json,
        _ => LogFormat::Text,
    });
    init_logging(level, &format);

    if !cli.config.exists() {
        warn!("config file not found: {}  (using defaults)", cli.config.display());
    }

    match cli.command {
        Commands::Encrypt { input, dest, chunk_size } => {
            cmd_encrypt(&config, &input, &dest, chunk_size).await
        }
        Commands::Decrypt { input, dest, chunk_size } => {
            cmd_decrypt(&config, &input, &dest, chunk_size).await
        }
        Commands::Config { action: ConfigAction::Show } => cmd_config_show(&config, &cli.config),
    }
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // Logs go to stderr so stdout stays clean for command output.
    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

// ── Config loading ────────────────────────────────────────────────────────────

fn load_config(path: &Path) -> Result<KuberConfig> {
    KuberConfig::load(path).with_context(|| format!("loading config: {}", path.display()))
}

// ── Path helpers ──────────────────────────────────────────────────────────────

/// Resolve the output path: `dest` itself, or `dest/<input file name>` when
/// `dest` is a directory or ends with a separator. Refuses existing files.
fn resolve_output_path(input: &Path, dest: &Path) -> Result<PathBuf> {
    let dir_hint = dest.as_os_str().to_string_lossy().ends_with(std::path::is_separator);
    let output = if dir_hint || dest.is_dir() {
        let name = input
            .file_name()
            .with_context(|| format!("input has no file name: {}", input.display()))?;
        dest.join(name)
    } else {
        dest.to_path_buf()
    };
    if output.exists() {
        anyhow::bail!("output path exists: {}", output.display());
    }
    Ok(output)
}

fn pipeline_for(chunk_size: Option<usize>, configured: ChunkedPipeline) -> Result<ChunkedPipeline> {
    match chunk_size {
        Some(n) => ChunkedPipeline::new(n).context("invalid --chunk-size"),
        None => Ok(configured),
    }
}

// ── Progress bar helpers ──────────────────────────────────────────────────────

fn make_progress_bar(total: u64, prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new(total);
    let style = ProgressStyle::with_template(
        "{prefix:.bold} [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}",
    )
    .map(|s| s.progress_chars("=>-"))
    .unwrap_or_else(|_| ProgressStyle::default_bar());
    pb.set_style(style);
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

async fn remove_partial(output: &Path) {
    if let Err(e) = tokio::fs::remove_file(output).await {
        warn!(path = %output.display(), error = %e, "could not remove partial output");
    }
}

// ── `kuber encrypt` ──────────────────────────────────────────────────────────

async fn cmd_encrypt(
    config: &KuberConfig,
    input: &Path,
    dest: &Path,
    chunk_size: Option<usize>,
) -> Result<()> {
    let key = config.crypto.load_key().context("loading cipher key")?;
    let pipeline = pipeline_for(chunk_size, config.pipeline.encrypt_pipeline()?)?;
    let output = resolve_output_path(input, dest)?;

    let source = tokio::fs::File::open(input)
        .await
        .with_context(|| format!("opening input: {}", input.display()))?;
    let total = source
        .metadata()
        .await
        .with_context(|| format!("reading metadata: {}", input.display()))?
        .len();
    let iv = generate_iv();
    let engine = CtrEngine::new(AesCtr::new(), &key, &iv, config.crypto.stream_options())?;

    let mut sink = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&output)
        .await
        .with_context(|| format!("creating output: {}", output.display()))?;

    println!("Encrypting {} → {}", input.display(), output.display());

    if let Err(e) = sink.write_all(&iv).await {
        remove_partial(&output).await;
        return Err(e).with_context(|| format!("writing IV header: {}", output.display()));
    }

    let pb = make_progress_bar(total, "encrypt");
    let result = pipeline.run_async(pb.wrap_async_read(source), sink, engine).await;
    let bytes = match result {
        Ok(bytes) => bytes,
        Err(e) => {
            pb.abandon_with_message("failed");
            remove_partial(&output).await;
            return Err(e).with_context(|| format!("encrypting {}", input.display()));
        }
    };
    pb.finish_with_message("done");

    info!(
        input = %input.display(),
        output = %output.display(),
        bytes,
        chunk_size = pipeline.chunk_size(),
        "file encrypted"
    );
    println!("  bytes:   {}", fmt_bytes(bytes));
    println!("  output:  {}", output.display());
    Ok(())
}

// ── `kuber decrypt` ──────────────────────────────────────────────────────────

async fn cmd_decrypt(
    config: &KuberConfig,
    input: &Path,
    dest: &Path,
    chunk_size: Option<usize>,
) -> Result<()> {
    let key = config.crypto.load_key().context("loading cipher key")?;
    let pipeline = pipeline_for(chunk_size, config.pipeline.decrypt_pipeline()?)?;
    let output = resolve_output_path(input, dest)?;

    let mut source = tokio::fs::File::open(input)
        .await
        .with_context(|| format!("opening input: {}", input.display()))?;
    let total = source
        .metadata()
        .await
        .with_context(|| format!("reading metadata: {}", input.display()))?
        .len();

    let mut iv = [0u8; IV_SIZE];
    source.read_exact(&mut iv).await.with_context(|| {
        format!(
            "{} is too short to hold the {IV_SIZE}-byte IV header",
            input.display()
        )
    })?;
    let engine = CtrEngine::new(
        AesCtr::new(),
        &key,
        &iv,
        StreamOptions::decrypt().with_buffer_size(config.crypto.buffer_size),
    )?;

    let sink = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&output)
        .await
        .with_context(|| format!("creating output: {}", output.display()))?;

    println!("Decrypting {} → {}", input.display(), output.display());

    let pb = make_progress_bar(total.saturating_sub(IV_SIZE as u64), "decrypt");
    let result = pipeline.run_async(pb.wrap_async_read(source), sink, engine).await;
    let bytes = match result {
        Ok(bytes) => bytes,
        Err(e) => {
            pb.abandon_with_message("failed");
            remove_partial(&output).await;
            return Err(e).with_context(|| format!("decrypting {}", input.display()));
        }
    };
    pb.finish_with_message("done");

    info!(
        input = %input.display(),
        output = %output.display(),
        bytes,
        chunk_size = pipeline.chunk_size(),
        "file decrypted"
    );
    println!("  bytes:   {}", fmt_bytes(bytes));
    println!("  output:  {}", output.display());
    Ok(())
}

// ── `kuber config show` ──────────────────────────────────────────────────────

fn cmd_config_show(config: &KuberConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}

fn fmt_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_encrypt_args() {
        let cli = Cli::try_parse_from([
            "kuber",
            "--log-format",
            "json",
            "encrypt",
            "in.bin",
            "out/",
            "--chunk-size",
            "102400",
        ])
        .unwrap();
        assert!(matches!(cli.log_format, Some(LogFormat::Json)));
        match cli.command {
            Commands::Encrypt { input, dest, chunk_size } => {
                assert_eq!(input, PathBuf::from("in.bin"));
                assert_eq!(dest, PathBuf::from("out/"));
                assert_eq!(chunk_size, Some(102400));
            }
            other => panic!("expected encrypt, got {other:?}"),
        }
    }

    #[test]
    fn test_output_path_in_directory() {
        let tmp = tempfile::TempDir::new().unwrap();
        let input = Path::new("/data/report.csv");
        let out = resolve_output_path(input, tmp.path()).unwrap();
        assert_eq!(out, tmp.path().join("report.csv"));
    }

    #[test]
    fn test_output_path_trailing_separator() {
        let tmp = tempfile::TempDir::new().unwrap();
        let dest = PathBuf::from(format!("{}/missing/", tmp.path().display()));
        let out = resolve_output_path(Path::new("a/b.txt"), &dest).unwrap();
        assert_eq!(out, tmp.path().join("missing").join("b.txt"));
    }

    #[test]
    fn test_output_path_explicit_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let dest = tmp.path().join("out.enc");
        assert_eq!(resolve_output_path(Path::new("in.bin"), &dest).unwrap(), dest);
    }

    #[test]
    fn test_output_path_refuses_existing() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::write(tmp.path().join("taken.bin"), b"x").unwrap();
        assert!(resolve_output_path(Path::new("taken.bin"), tmp.path()).is_err());
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        assert!(pipeline_for(Some(0), ChunkedPipeline::default()).is_err());
        assert_eq!(
            pipeline_for(None, ChunkedPipeline::bulk()).unwrap().chunk_size(),
            kuber_crypto::BULK_CHUNK_SIZE
        );
    }

    const TEST_KEY_B64: &str = "AQEBAQEBAQEBAQEBAQEBAQ==";

    fn config_with_key_file(dir: &Path) -> KuberConfig {
        let key_path = dir.join("kuber.key");
        std::fs::write(&key_path, format!("{TEST_KEY_B64}\n")).unwrap();
        let mut config = KuberConfig::default();
        config.crypto.key_file = Some(key_path);
        config
    }

    #[tokio::test]
    async fn test_encrypt_then_decrypt_roundtrip() {
        let tmp = tempfile::TempDir::new().unwrap();
        let var = "KUBER_TEST_CLI_ROUNDTRIP_KEY";
        std::env::set_var(var, TEST_KEY_B64);
        let mut config = KuberConfig::default();
        config.crypto.key_env = var.into();

        let plain: Vec<u8> = (0..10_000u32).map(|i| (i % 253) as u8).collect();
        let input = tmp.path().join("plain.bin");
        let encrypted = tmp.path().join("plain.bin.enc");
        let decrypted = tmp.path().join("plain.out");
        std::fs::write(&input, &plain).unwrap();

        cmd_encrypt(&config, &input, &encrypted, None).await.unwrap();
        let sealed = std::fs::read(&encrypted).unwrap();
        assert_eq!(sealed.len(), IV_SIZE + plain.len());

        // The body is the AES-CTR stream of the plaintext under the header IV.
        let (iv, body) = sealed.split_at(IV_SIZE);
        let key = kuber_crypto::CipherKey::from_bytes(vec![1u8; 16]);
        let mut expected =
            kuber_crypto::CryptoWriter::new(Vec::new(), &key, iv, StreamOptions::encrypt())
                .unwrap();
        std::io::Write::write_all(&mut expected, &plain).unwrap();
        assert_eq!(body, &expected.into_inner().unwrap()[..]);

        cmd_decrypt(&config, &encrypted, &decrypted, Some(1000)).await.unwrap();
        assert_eq!(std::fs::read(&decrypted).unwrap(), plain);
        std::env::remove_var(var);
    }

    #[tokio::test]
    async fn test_decrypt_rejects_short_header() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = config_with_key_file(tmp.path());
        let input = tmp.path().join("stub.enc");
        let output = tmp.path().join("stub.out");
        std::fs::write(&input, [0u8; IV_SIZE - 1]).unwrap();

        let err = cmd_decrypt(&config, &input, &output, None).await.unwrap_err();
        assert!(format!("{err:#}").contains("too short"), "got: {err:#}");
        assert!(!output.exists());
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_failed_encrypt_removes_partial_output() {
        // A directory opens fine on Linux but fails on the first read, after
        // the output file and its IV header were written.
        let tmp = tempfile::TempDir::new().unwrap();
        let config = config_with_key_file(tmp.path());
        let input = tmp.path().join("not-a-file");
        std::fs::create_dir(&input).unwrap();
        let output = tmp.path().join("out.enc");

        assert!(cmd_encrypt(&config, &input, &output, None).await.is_err());
        assert!(!output.exists());
    }

    #[test]
    fn test_fmt_bytes() {
        assert_eq!(fmt_bytes(512), "512 B");
        assert_eq!(fmt_bytes(2048), "2.0 KB");
        assert_eq!(fmt_bytes(5 * 1024 * 1024), "5.0 MB");
    }
}

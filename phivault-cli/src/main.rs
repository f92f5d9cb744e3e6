//! `phivault` CLI tool for key management and document encryption.
//!
//! Documents are read as JSON from `--input` or stdin and written to stdout.
//! An input holding a JSON array is treated as a batch of documents.

#![warn(clippy::pedantic, clippy::nursery)]

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use phivault::prelude::*;
use phivault_key_file::FileKeyProvider;
use secrecy::SecretVec;
use serde_json::Value;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "phivault")]
#[command(about = "Field-level encryption for clinical identifiers", long_about = None)]
struct Cli {
    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a key directory with a first encryption key and a hash key
    Keygen {
        /// Output directory for keys
        #[arg(short, long, default_value = "./keys")]
        output: PathBuf,
    },
    /// Add a new encryption key and make it the active one
    Rotate {
        /// Key directory
        #[arg(short, long, env = "PHIVAULT_KEY_DIR")]
        keys: PathBuf,
    },
    /// Encrypt registered fields and add search digests
    Encrypt(DocumentArgs),
    /// Decrypt registered fields
    Decrypt(DocumentArgs),
    /// Re-seal registered fields under the active key
    Rewrap(DocumentArgs),
    /// Print the equality filter for a field value
    Query {
        #[command(flatten)]
        source: KeySource,
        /// Field name, e.g. `mrn`
        #[arg(short, long)]
        field: String,
        /// Plaintext value to look up
        #[arg(long)]
        value: String,
    },
}

#[derive(Args)]
struct DocumentArgs {
    #[command(flatten)]
    source: KeySource,
    /// JSON input file; stdin when omitted
    #[arg(short, long)]
    input: Option<PathBuf>,
}

#[derive(Args)]
struct KeySource {
    /// Key directory; keys are read from `PHIVAULT_ENCRYPTION_KEYS` and
    /// `PHIVAULT_HASH_KEY` when omitted
    #[arg(short, long, env = "PHIVAULT_KEY_DIR")]
    keys: Option<PathBuf>,
    /// Field registry as JSON; defaults to `mrn` and `nhs_number`
    #[arg(short, long)]
    registry: Option<PathBuf>,
}

/// Keys loaded from a directory or from the environment.
enum Keys {
    File(FileKeyProvider),
    Env(Keyring),
}

impl KeyProvider for Keys {
    fn get_active_key(&self) -> Option<&DataKey> {
        match self {
            Self::File(provider) => provider.get_active_key(),
            Self::Env(keyring) => keyring.get_active_key(),
        }
    }

    fn get_verification_keys(&self) -> Vec<&DataKey> {
        match self {
            Self::File(provider) => provider.get_verification_keys(),
            Self::Env(keyring) => keyring.get_verification_keys(),
        }
    }

    fn get_hash_key(&self) -> Option<&SecretVec<u8>> {
        match self {
            Self::File(provider) => provider.get_hash_key(),
            Self::Env(keyring) => keyring.get_hash_key(),
        }
    }
}

impl KeySource {
    fn transformer(&self) -> Result<DocumentTransformer<Keys>> {
        let keys = match &self.keys {
            Some(dir) => Keys::File(
                FileKeyProvider::new(dir)
                    .with_context(|| format!("failed to load keys from {}", dir.display()))?,
            ),
            None => Keys::Env(
                phivault::config::keyring_from_env()
                    .context("failed to load keys from the environment")?,
            ),
        };

        let registry = match &self.registry {
            Some(path) => {
                let json = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read registry {}", path.display()))?;
                FieldRegistry::from_json(&json)?
            }
            None => FieldRegistry::clinical_default(),
        };
        debug!(fields = registry.len(), "field registry loaded");

        Ok(DocumentTransformer::new(keys, registry))
    }
}

#[derive(Clone, Copy)]
enum Action {
    Encrypt,
    Decrypt,
    Rewrap,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let stdout = io::stdout();
    run(cli.command, &mut stdout.lock())
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(io::stderr).init();
}

fn run(command: Commands, out: &mut impl Write) -> Result<()> {
    match command {
        Commands::Keygen { output } => {
            let id = FileKeyProvider::init(&output)?;
            writeln!(out, "Initialized {} with active key {id}", output.display())?;
        }
        Commands::Rotate { keys } => {
            let id = FileKeyProvider::rotate(&keys)?;
            writeln!(out, "Active key is now {id}")?;
        }
        Commands::Encrypt(args) => transform(&args, Action::Encrypt, out)?,
        Commands::Decrypt(args) => transform(&args, Action::Decrypt, out)?,
        Commands::Rewrap(args) => transform(&args, Action::Rewrap, out)?,
        Commands::Query { source, field, value } => {
            let filter = source.transformer()?.create_searchable_query(&field, &value)?;
            writeln!(out, "{filter}")?;
        }
    }
    Ok(())
}

fn transform(args: &DocumentArgs, action: Action, out: &mut impl Write) -> Result<()> {
    let transformer = args.source.transformer()?;
    let input = read_input(args.input.as_deref())?;

    let output = match input {
        Value::Array(docs) => {
            info!(documents = docs.len(), "processing batch");
            let result = match action {
                Action::Encrypt => transformer.encrypt_documents(&docs)?,
                Action::Decrypt => transformer.decrypt_documents(&docs)?,
                Action::Rewrap => docs
                    .iter()
                    .enumerate()
                    .map(|(index, doc)| {
                        transformer
                            .reencrypt_document(doc)
                            .with_context(|| format!("document {index} failed"))
                    })
                    .collect::<Result<Vec<_>>>()?,
            };
            Value::Array(result)
        }
        doc => match action {
            Action::Encrypt => transformer.encrypt_document(&doc)?,
            Action::Decrypt => transformer.decrypt_document(&doc)?,
            Action::Rewrap => transformer.reencrypt_document(&doc)?,
        },
    };

    serde_json::to_writer_pretty(&mut *out, &output)?;
    writeln!(out)?;
    Ok(())
}

fn read_input(path: Option<&Path>) -> Result<Value> {
    let raw = match path {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?,
        None => {
            let mut raw = String::new();
            io::stdin().read_to_string(&mut raw).context("failed to read stdin")?;
            raw
        }
    };
    serde_json::from_str(&raw).context("input is not valid JSON")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn run_args(args: &[&str]) -> Result<String> {
        let cli = Cli::try_parse_from(args)?;
        let mut out = Vec::new();
        run(cli.command, &mut out)?;
        Ok(String::from_utf8(out)?)
    }

    fn write_json(dir: &TempDir, name: &str, value: &Value) -> String {
        let path = dir.path().join(name);
        std::fs::write(&path, value.to_string()).unwrap();
        path.to_str().unwrap().to_string()
    }

    #[test]
    fn test_keygen_and_rotate() {
        let temp_dir = TempDir::new().unwrap();
        let keys = temp_dir.path().join("keys");
        let keys = keys.to_str().unwrap();

        let out = run_args(&["phivault", "keygen", "--output", keys]).unwrap();
        assert!(out.contains("enc_v1"));

        let out = run_args(&["phivault", "rotate", "--keys", keys]).unwrap();
        assert!(out.contains("enc_v2"));
    }

    #[test]
    fn test_encrypt_then_decrypt() {
        let temp_dir = TempDir::new().unwrap();
        let keys = temp_dir.path().join("keys");
        let keys = keys.to_str().unwrap();
        run_args(&["phivault", "keygen", "--output", keys]).unwrap();

        let doc = serde_json::json!({ "patient_id": "TEST01", "mrn": "12345678" });
        let plain = write_json(&temp_dir, "plain.json", &doc);

        let sealed = run_args(&["phivault", "encrypt", "--keys", keys, "--input", &plain]).unwrap();
        let sealed: Value = serde_json::from_str(&sealed).unwrap();
        assert_ne!(sealed["mrn"], "12345678");
        assert_eq!(sealed["patient_id"], "TEST01");

        let sealed = write_json(&temp_dir, "sealed.json", &sealed);
        let opened =
            run_args(&["phivault", "decrypt", "--keys", keys, "--input", &sealed]).unwrap();
        let opened: Value = serde_json::from_str(&opened).unwrap();
        assert_eq!(opened["mrn"], "12345678");
    }

    #[test]
    fn test_rewrap_batch_after_rotation() {
        let temp_dir = TempDir::new().unwrap();
        let keys = temp_dir.path().join("keys");
        let keys = keys.to_str().unwrap();
        run_args(&["phivault", "keygen", "--output", keys]).unwrap();

        let docs = serde_json::json!([{ "mrn": "1" }, { "mrn": "2" }]);
        let plain = write_json(&temp_dir, "plain.json", &docs);
        let sealed = run_args(&["phivault", "encrypt", "--keys", keys, "--input", &plain]).unwrap();
        let sealed = write_json(&temp_dir, "sealed.json", &serde_json::from_str(&sealed).unwrap());

        run_args(&["phivault", "rotate", "--keys", keys]).unwrap();
        let resealed =
            run_args(&["phivault", "rewrap", "--keys", keys, "--input", &sealed]).unwrap();
        let resealed: Value = serde_json::from_str(&resealed).unwrap();

        let transformer = KeySource { keys: Some(keys.into()), registry: None }
            .transformer()
            .unwrap();
        for doc in resealed.as_array().unwrap() {
            assert!(transformer.cipher().is_current(doc["mrn"].as_str().unwrap()).unwrap());
        }
    }

    #[test]
    fn test_query_with_custom_registry() {
        let temp_dir = TempDir::new().unwrap();
        let keys = temp_dir.path().join("keys");
        let keys = keys.to_str().unwrap();
        run_args(&["phivault", "keygen", "--output", keys]).unwrap();
        let registry = serde_json::json!({ "ward_code": { "encrypt": true, "hashable": true } });
        let registry = write_json(&temp_dir, "registry.json", &registry);

        let out = run_args(&[
            "phivault", "query", "--keys", keys, "--registry", &registry, "--field", "ward_code",
            "--value", "W12",
        ])
        .unwrap();
        let filter: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(filter["ward_code_hash"].as_str().unwrap().len(), 64);
    }

    #[test]
    fn test_decrypt_reports_field() {
        let temp_dir = TempDir::new().unwrap();
        let keys = temp_dir.path().join("keys");
        let keys = keys.to_str().unwrap();
        run_args(&["phivault", "keygen", "--output", keys]).unwrap();

        let doc = serde_json::json!({ "nhs_number": "v1.not-a-blob" });
        let input = write_json(&temp_dir, "bad.json", &doc);

        let err =
            run_args(&["phivault", "decrypt", "--keys", keys, "--input", &input]).unwrap_err();
        assert!(err.to_string().contains("nhs_number"));
    }

    #[test]
    fn test_missing_key_directory() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("absent");
        let missing = missing.to_str().unwrap();

        let result =
            run_args(&["phivault", "query", "--keys", missing, "--field", "mrn", "--value", "1"]);
        assert!(result.is_err());
    }
}

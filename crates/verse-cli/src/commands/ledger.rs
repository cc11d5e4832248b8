//! Ledger CLI commands.

use anyhow::{Context, Result};
use chrono::SecondsFormat;
use clap::Subcommand;
use colored::Colorize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;
use verse_hash::keygen;
use verse_ledger::{
    verify_witnesses, CertificateStatus, ContentEvent, EntrySummary, Ledger, LedgerConfig,
    StoreKind,
};

#[derive(Debug, Subcommand)]
pub enum LedgerCommand {
    /// Record a content event read from a JSON file
    Record {
        /// Path to the event JSON
        event: PathBuf,
    },
    /// Show the authorship history of a subject
    History {
        subject: String,
        /// Print entry summaries as JSON
        #[arg(long)]
        json: bool,
    },
    /// Verify the integrity of a subject's chain
    Verify {
        subject: String,
        /// Optional path to JSON file mapping witness IDs to public keys (hex-encoded)
        #[arg(long)]
        witness_keys: Option<PathBuf>,
    },
    /// Issue an authorship certificate for a subject
    Certify {
        subject: String,
        /// Write the certificate here instead of printing it
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Validate a certificate against the current ledger
    Validate {
        /// Path to the certificate JSON
        certificate: PathBuf,
    },
    /// Generate a new Ed25519 witness keypair
    Keygen {
        /// Optional output path for the keypair (default: prints to stdout)
        output: Option<PathBuf>,
    },
}

/// Dispatch `command`, opening the ledger described by `config` when needed.
pub fn run(command: LedgerCommand, config: Option<&Path>) -> Result<()> {
    match command {
        LedgerCommand::Record { event } => cmd_record(&open_ledger(config)?, &event),
        LedgerCommand::History { subject, json } => {
            cmd_history(&open_ledger(config)?, &subject, json)
        }
        LedgerCommand::Verify {
            subject,
            witness_keys,
        } => cmd_verify(&open_ledger(config)?, &subject, witness_keys.as_deref()),
        LedgerCommand::Certify { subject, output } => {
            cmd_certify(&open_ledger(config)?, &subject, output.as_deref())
        }
        LedgerCommand::Validate { certificate } => {
            cmd_validate(&open_ledger(config)?, &certificate)
        }
        LedgerCommand::Keygen { output } => cmd_keygen(output),
    }
}

/// Build a ledger from the config file, or from defaults when none is given.
pub fn open_ledger(config: Option<&Path>) -> Result<Ledger> {
    let config = match config {
        Some(path) => LedgerConfig::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => LedgerConfig::default(),
    };
    info!(backend = %config.store.backend, "opening ledger");
    Ledger::from_config(&config).context("failed to open ledger")
}

/// Handle the verse record command.
pub fn cmd_record(ledger: &Ledger, path: &Path) -> Result<()> {
    if ledger.store().kind() == StoreKind::Memory {
        anyhow::bail!(
            "the memory backend does not persist entries; pass --config with a sqlite or flatlog store"
        );
    }

    let json = fs::read_to_string(path)
        .with_context(|| format!("failed to read event from {}", path.display()))?;
    let event: ContentEvent = serde_json::from_str(&json).context("failed to parse event JSON")?;

    let entry = ledger
        .record_event(&event)
        .with_context(|| format!("failed to record {} for {}", event.event_type, event.subject_id))?;

    println!(
        "{} Recorded {} for {}",
        "✓".green().bold(),
        entry.event_type.to_string().cyan(),
        entry.subject_id.bold()
    );
    println!("  {}: {}", "Content Hash".bold(), entry.content_hash);
    println!("  {}: {}", "Block Hash".bold(), entry.block_hash);
    println!("  {}: {}", "Previous".bold(), entry.previous_block_hash);
    if !entry.witnesses.is_empty() {
        println!("  {}: {}", "Witnesses".bold(), entry.witnesses.len());
    }
    Ok(())
}

/// Handle the verse history command.
pub fn cmd_history(ledger: &Ledger, subject: &str, json: bool) -> Result<()> {
    let history = ledger
        .get_history(subject)
        .with_context(|| format!("failed to read history of {subject}"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&history)?);
        return Ok(());
    }

    if history.is_empty() {
        println!("{}", "No entries recorded".yellow());
        return Ok(());
    }

    println!("{}", "Authorship History".bold().underline());
    println!("{}: {}", "Subject".bold(), subject);
    println!("{}: {}", "Entries".bold(), history.len());
    println!();

    for (idx, entry) in history.iter().enumerate() {
        print_summary(idx, entry);
    }
    Ok(())
}

fn print_summary(idx: usize, entry: &EntrySummary) {
    println!(
        "{} {} {}",
        "Entry".bold().cyan(),
        (idx + 1).to_string().cyan(),
        entry.event_type.to_string().bold()
    );
    if let Some(title) = &entry.title {
        println!("  {}: \"{}\"", "Title".bold(), title);
    }
    println!("  {}: {}", "Author".bold(), entry.author_id);
    println!(
        "  {}: {}",
        "Created".bold(),
        entry.created_at.to_rfc3339_opts(SecondsFormat::Micros, true)
    );
    println!("  {}: {}", "Content Hash".bold(), entry.content_hash);
    println!("  {}: {}", "Block Hash".bold(), entry.block_hash);
    if !entry.previous_block_hash.is_genesis() {
        println!("  {}: {}", "Previous".bold(), entry.previous_block_hash);
    }
    if entry.witness_count > 0 {
        println!("  {}: {}", "Witnesses".bold(), entry.witness_count);
    }
    println!();
}

/// Handle the verse verify command.
pub fn cmd_verify(ledger: &Ledger, subject: &str, witness_keys: Option<&Path>) -> Result<()> {
    let report = ledger
        .verify_chain(subject)
        .with_context(|| format!("failed to verify chain of {subject}"))?;

    if let Some(brk) = &report.broken_at {
        println!("{} Chain broken at entry {}", "✗".red().bold(), brk.entry.index + 1);
        println!("  {}: {}", "Reason".bold(), brk.kind);
        println!("  {}: {}", "Block Hash".bold(), brk.entry.block_hash);
        anyhow::bail!("chain of {subject} is invalid: {}", brk.kind);
    }
    println!("{} Chain linkage and signatures valid", "✓".green().bold());

    if let Some(keys_path) = witness_keys {
        let public_keys = load_public_keys(keys_path)?;
        let entries = ledger.entries(subject)?;
        verify_witnesses(&entries, &public_keys, None).context("witness verification failed")?;

        let count: usize = entries.iter().map(|e| e.witnesses.len()).sum();
        println!("{} {} witness attestations verified", "✓".green().bold(), count);
    }

    println!();
    println!("{}", "Summary:".bold().underline());
    println!("  {}: {}", "Entries".bold(), report.chain_length);
    if let Some(tip) = &report.tip {
        println!("  {}: {}", "Tip".bold(), tip);
    }
    println!("  {}: {}", "Status".bold(), "VALID".green().bold());
    Ok(())
}

fn load_public_keys(path: &Path) -> Result<HashMap<String, [u8; 32]>> {
    let keys_json = fs::read_to_string(path).context("failed to read keys file")?;
    let keys_map: HashMap<String, String> =
        serde_json::from_str(&keys_json).context("failed to parse keys JSON")?;

    let mut public_keys = HashMap::new();
    for (witness_id, hex_key) in keys_map {
        let key_bytes =
            hex::decode(&hex_key).with_context(|| format!("invalid hex key for {witness_id}"))?;
        let key: [u8; 32] = key_bytes
            .try_into()
            .map_err(|_| anyhow::anyhow!("public key for {witness_id} must be 32 bytes"))?;
        public_keys.insert(witness_id, key);
    }
    Ok(public_keys)
}

/// Handle the verse certify command.
pub fn cmd_certify(ledger: &Ledger, subject: &str, output: Option<&Path>) -> Result<()> {
    let certificate = ledger
        .issue_certificate(subject)
        .with_context(|| format!("failed to certify {subject}"))?;
    let json = certificate
        .to_json_pretty()
        .context("failed to serialize certificate")?;

    match output {
        Some(path) => {
            fs::write(path, &json)
                .with_context(|| format!("failed to write certificate to {}", path.display()))?;
            println!(
                "{} Certificate {} written to {}",
                "✓".green(),
                certificate.certificate_id,
                path.display()
            );
        }
        None => println!("{json}"),
    }
    Ok(())
}

/// Handle the verse validate command.
pub fn cmd_validate(ledger: &Ledger, path: &Path) -> Result<()> {
    let json = fs::read_to_string(path)
        .with_context(|| format!("failed to read certificate from {}", path.display()))?;
    let validation = ledger
        .validate_certificate_json(&json)
        .context("failed to validate certificate")?;

    let mark = |ok: bool| {
        if ok {
            "yes".green()
        } else {
            "no".red()
        }
    };
    println!("{}", "Certificate Validation".bold().underline());
    println!("  {}: {}", "Intact".bold(), mark(validation.certificate_intact));
    println!("  {}: {}", "Chain Current".bold(), mark(validation.chain_still_valid));

    let status = validation.status.to_string();
    match validation.status {
        CertificateStatus::Valid => {
            println!("  {}: {}", "Status".bold(), "VALID".green().bold());
            Ok(())
        }
        CertificateStatus::Stale { .. } => {
            println!("  {}: {}", "Status".bold(), status.yellow().bold());
            anyhow::bail!("certificate is {status}")
        }
        _ => {
            println!("  {}: {}", "Status".bold(), status.red().bold());
            anyhow::bail!("certificate is {status}")
        }
    }
}

/// Handle the verse keygen command.
pub fn cmd_keygen(output: Option<PathBuf>) -> Result<()> {
    let (private_key, public_key) = keygen();

    let private_hex = hex::encode(private_key);
    let public_hex = hex::encode(public_key);

    if let Some(path) = output {
        let keypair = serde_json::json!({
            "private_key": private_hex,
            "public_key": public_hex,
        });
        let json = serde_json::to_string_pretty(&keypair)?;
        fs::write(&path, json)
            .with_context(|| format!("failed to write keypair to {}", path.display()))?;
        println!("{} Keypair written to {}", "✓".green(), path.display());
    } else {
        println!("{}", "Generated Ed25519 Witness Keypair".bold().underline());
        println!("{}: {}", "Private Key".bold().red(), private_hex);
        println!("{}: {}", "Public Key".bold().green(), public_hex);
        println!();
        println!(
            "{}",
            "WARNING: Keep the private key secret!".yellow().bold()
        );
    }

    Ok(())
}

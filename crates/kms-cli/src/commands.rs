use std::sync::Arc;

use anyhow::{bail, Context};
use colored::Colorize;
use kms_import::BlobImporter;
use kms_objects::FileStorage;
use kms_token::{KmsConfig, Token};
use kms_types::{
    Attribute, AttributeType, KeyType, Mechanism, MechanismType, ObjectClass, ObjectHandle,
    SessionFlags, SessionHandle,
};
use serde_json::json;
use tracing::debug;

use crate::cli::*;

/// Handles returned per `find_objects` call while listing.
const LIST_BATCH: usize = 16;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    match &cli.command {
        Command::Info => cmd_info(&cli),
        Command::CheckConfig => cmd_check_config(&cli),
        Command::Import(args) => cmd_import(&cli, args),
        Command::List(args) => cmd_list(&cli, args),
        Command::Digest(args) => cmd_digest(&cli, args),
        Command::ProvisionAes(args) => cmd_provision_aes(&cli, args),
        Command::Destroy(args) => cmd_destroy(&cli, args),
    }
}

// ---------------------------------------------------------------------------
// Token setup
// ---------------------------------------------------------------------------

fn load_config(cli: &Cli) -> anyhow::Result<KmsConfig> {
    match &cli.config {
        Some(path) => KmsConfig::load(path).with_context(|| format!("loading {}", path.display())),
        None => Ok(KmsConfig::default()),
    }
}

/// An initialized token over the configured storage.
fn open_token(cli: &Cli) -> anyhow::Result<Token> {
    let mut token = Token::new(load_config(cli)?)?;
    if let Some(path) = &cli.nvm {
        let storage = FileStorage::open(path).with_context(|| format!("opening NVM image {}", path.display()))?;
        debug!(path = %path.display(), objects = storage.len(), "using file-backed NVM");
        token = token.with_nvm(Arc::new(storage));
    }
    token.initialize()?;
    Ok(token)
}

fn rw_session(token: &mut Token) -> anyhow::Result<SessionHandle> {
    Ok(token.open_session(0, SessionFlags::SERIAL_SESSION | SessionFlags::RW_SESSION, None)?)
}

fn print_json(value: &serde_json::Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

fn cmd_info(cli: &Cli) -> anyhow::Result<()> {
    let token = open_token(cli)?;
    let info = token.token_info()?;
    let mut mechanisms = Vec::new();
    for mechanism in token.mechanism_list()? {
        mechanisms.push((mechanism, token.mechanism_info(mechanism)?));
    }

    if cli.format == OutputFormat::Json {
        let table: Vec<_> = mechanisms
            .iter()
            .map(|(m, i)| {
                json!({
                    "mechanism": m.to_string(),
                    "type": m.0,
                    "min_key_size": i.min_key_size,
                    "max_key_size": i.max_key_size,
                    "flags": i.flags,
                })
            })
            .collect();
        return print_json(&json!({ "token": info, "mechanisms": table }));
    }

    println!("{} {}", "Token:".bold(), info.label.cyan());
    println!("  Manufacturer: {}", info.manufacturer);
    println!("  Model: {}", info.model);
    println!("  Flags: {:#010x}", info.flags);
    println!("  Sessions: {}/{}", info.session_count, info.max_session_count);
    println!("\n{}", "Mechanisms:".bold());
    for (mechanism, info) in &mechanisms {
        println!(
            "  {:<28} {:>5}..{:<5} flags {:#010x}",
            mechanism.to_string().yellow(),
            info.min_key_size,
            info.max_key_size,
            info.flags
        );
    }
    Ok(())
}

fn cmd_check_config(cli: &Cli) -> anyhow::Result<()> {
    let config = load_config(cli)?;
    config.validate()?;
    let embedded = config.embedded_objects()?;

    if cli.format == OutputFormat::Json {
        return print_json(&json!({ "valid": true, "embedded_objects": embedded.len() }));
    }
    println!("{} Configuration valid", "✓".green().bold());
    println!("  Embedded objects: {}", embedded.len());
    println!("  Max sessions: {}", config.max_sessions);
    Ok(())
}

fn cmd_import(cli: &Cli, args: &ImportArgs) -> anyhow::Result<()> {
    let header = std::fs::read(&args.header).with_context(|| format!("reading {}", args.header.display()))?;
    let image = std::fs::read(&args.image).with_context(|| format!("reading {}", args.image.display()))?;
    let mut token = open_token(cli)?;
    let report = BlobImporter::with_default_stages().run(&mut token, &header, &image)?;
    token.finalize()?;

    if cli.format == OutputFormat::Json {
        print_json(&json!({
            "stages": report.stage_results,
            "installed": report.installed.iter().map(|h| h.value()).collect::<Vec<_>>(),
            "error": report.error.as_ref().map(|e| json!({ "rv": e.rv(), "message": e.to_string() })),
        }))?;
    } else {
        for result in &report.stage_results {
            if result.passed {
                println!("  {} {} ({:?})", "✓".green(), result.stage_name, result.elapsed);
            } else {
                println!(
                    "  {} {}: {}",
                    "✗".red(),
                    result.stage_name.bold(),
                    result.reason.as_deref().unwrap_or("failed")
                );
            }
        }
        for handle in &report.installed {
            println!("  installed object {}", handle.value().to_string().yellow());
        }
    }

    match report.error {
        Some(err) => bail!("blob import failed: {err} (rv {:#x})", err.rv()),
        None => {
            if cli.format == OutputFormat::Text {
                println!("{} Blob imported", "✓".green().bold());
            }
            Ok(())
        }
    }
}

struct Listed {
    handle: ObjectHandle,
    class: Option<u32>,
    label: Option<String>,
}

fn cmd_list(cli: &Cli, args: &ListArgs) -> anyhow::Result<()> {
    let mut token = open_token(cli)?;
    let session = rw_session(&mut token)?;
    let template: Vec<Attribute> = args.class.map(|c| Attribute::class(ObjectClass(c))).into_iter().collect();

    token.find_objects_init(session, &template)?;
    let mut handles = Vec::new();
    loop {
        let batch = token.find_objects(session, LIST_BATCH)?;
        if batch.is_empty() {
            break;
        }
        handles.extend(batch);
    }
    token.find_objects_final(session)?;

    let listed: Vec<Listed> = handles
        .into_iter()
        .map(|handle| {
            let object = token.store().get(handle);
            let attr = |kind: AttributeType| object.as_ref().and_then(|o| o.find_attribute(kind).map(|a| a.to_attribute()));
            Listed {
                handle,
                class: attr(AttributeType::CLASS).and_then(|a| a.as_u32()),
                label: attr(AttributeType::LABEL).map(|a| String::from_utf8_lossy(&a.value).into_owned()),
            }
        })
        .collect();
    token.close_session(session)?;

    if cli.format == OutputFormat::Json {
        let rows: Vec<_> = listed
            .iter()
            .map(|l| json!({ "handle": l.handle.value(), "class": l.class, "label": l.label }))
            .collect();
        return print_json(&json!(rows));
    }
    if listed.is_empty() {
        println!("No objects.");
    }
    for l in &listed {
        let class = l.class.map_or_else(|| "?".to_string(), |c| c.to_string());
        println!(
            "{:>6}  class {:<3} {}",
            l.handle.value().to_string().yellow(),
            class,
            l.label.as_deref().unwrap_or("").cyan()
        );
    }
    Ok(())
}

fn cmd_digest(cli: &Cli, args: &DigestArgs) -> anyhow::Result<()> {
    let data = std::fs::read(&args.file).with_context(|| format!("reading {}", args.file.display()))?;
    let mechanism = match args.mechanism {
        DigestMechanism::Sha1 => MechanismType::SHA_1,
        DigestMechanism::Sha256 => MechanismType::SHA256,
    };
    let mut token = open_token(cli)?;
    let session = rw_session(&mut token)?;
    token.digest_init(session, &Mechanism::new(mechanism))?;
    let mut out = [0u8; 32];
    let len = token.digest(session, &data, Some(&mut out))?;
    token.close_session(session)?;
    let hex = hex::encode(&out[..len]);

    if cli.format == OutputFormat::Json {
        return print_json(&json!({ "mechanism": mechanism.to_string(), "digest": hex }));
    }
    println!("{hex}  {}", args.file.display());
    Ok(())
}

fn cmd_provision_aes(cli: &Cli, args: &ProvisionAesArgs) -> anyhow::Result<()> {
    let value = hex::decode(args.hex.trim()).context("key is not valid hex")?;
    if ![16, 24, 32].contains(&value.len()) {
        bail!("AES keys are 16, 24 or 32 bytes, got {}", value.len());
    }
    let mut template = vec![
        Attribute::class(ObjectClass::SECRET_KEY),
        Attribute::key_type(KeyType::AES),
        Attribute::bytes(AttributeType::VALUE, value),
        Attribute::bool(AttributeType::ENCRYPT, true),
        Attribute::bool(AttributeType::DECRYPT, true),
    ];
    if let Some(label) = &args.label {
        template.push(Attribute::label(label));
    }

    let mut token = open_token(cli)?;
    let session = rw_session(&mut token)?;
    let handle = token.create_object(session, &template)?;
    token.close_session(session)?;
    token.finalize()?;

    if cli.format == OutputFormat::Json {
        return print_json(&json!({ "handle": handle.value() }));
    }
    println!("{} Created AES key {}", "✓".green().bold(), handle.value().to_string().yellow());
    Ok(())
}

fn cmd_destroy(cli: &Cli, args: &DestroyArgs) -> anyhow::Result<()> {
    let mut token = open_token(cli)?;
    let session = rw_session(&mut token)?;
    token.destroy_object(session, ObjectHandle(args.handle))?;
    token.close_session(session)?;
    token.finalize()?;

    if cli.format == OutputFormat::Json {
        return print_json(&json!({ "destroyed": args.handle }));
    }
    println!("{} Destroyed object {}", "✓".green().bold(), args.handle.to_string().yellow());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use kms_objects::ObjectStorage;

    fn cli(nvm: &std::path::Path, args: &[&str]) -> Cli {
        let mut argv = vec!["kms", "--nvm", nvm.to_str().unwrap()];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn provisioned_key_persists_until_destroyed() {
        let dir = tempfile::tempdir().unwrap();
        let nvm = dir.path().join("nvm.bin");

        run_command(cli(&nvm, &["provision-aes", "--hex", &"ab".repeat(16), "--label", "boot"])).unwrap();
        let storage = FileStorage::open(&nvm).unwrap();
        let handles = storage.ids().unwrap();
        assert_eq!(handles.len(), 1);

        run_command(cli(&nvm, &["list", "--class", "4"])).unwrap();
        run_command(cli(&nvm, &["destroy", &handles[0].value().to_string()])).unwrap();
        assert!(FileStorage::open(&nvm).unwrap().is_empty());
    }

    #[test]
    fn provision_rejects_bad_key_length() {
        let dir = tempfile::tempdir().unwrap();
        let nvm = dir.path().join("nvm.bin");
        let err = run_command(cli(&nvm, &["provision-aes", "--hex", "0011"])).unwrap_err();
        assert!(err.to_string().contains("16, 24 or 32"));
    }

    #[test]
    fn destroying_unknown_handle_fails() {
        let dir = tempfile::tempdir().unwrap();
        let nvm = dir.path().join("nvm.bin");
        assert!(run_command(cli(&nvm, &["destroy", "70"])).is_err());
    }

    #[test]
    fn digest_and_info_run_on_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("data.txt");
        std::fs::write(&data, b"abc").unwrap();
        let nvm = dir.path().join("nvm.bin");
        run_command(cli(&nvm, &["digest", "--mechanism", "sha1", data.to_str().unwrap()])).unwrap();
        run_command(cli(&nvm, &["--format", "json", "info"])).unwrap();
        run_command(cli(&nvm, &["check-config"])).unwrap();
    }

    #[test]
    fn import_of_garbage_header_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let header = dir.path().join("h.bin");
        let image = dir.path().join("i.bin");
        std::fs::write(&header, [0u8; 320]).unwrap();
        std::fs::write(&image, [0u8; 32]).unwrap();
        let nvm = dir.path().join("nvm.bin");
        let result = run_command(cli(
            &nvm,
            &["import", "--header", header.to_str().unwrap(), "--image", image.to_str().unwrap()],
        ));
        assert!(result.is_err());
    }
}

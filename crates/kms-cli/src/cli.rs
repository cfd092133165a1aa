use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "kms",
    about = "Key management service: provisioning and inspection",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Token configuration (TOML). Built-in defaults when omitted.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// File backing the NVM tiers. Objects are kept in memory when omitted.
    #[arg(long, global = true)]
    pub nvm: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Show token information and the enabled mechanisms
    Info,
    /// Validate the configuration
    CheckConfig,
    /// Authenticate a blob and install its objects
    Import(ImportArgs),
    /// List visible objects
    List(ListArgs),
    /// Hash a file through the token
    Digest(DigestArgs),
    /// Create a dynamic AES key
    ProvisionAes(ProvisionAesArgs),
    /// Destroy an object
    Destroy(DestroyArgs),
}

#[derive(Args)]
pub struct ImportArgs {
    /// The 320-byte signed blob header
    #[arg(long)]
    pub header: PathBuf,
    /// The encrypted blob image
    #[arg(long)]
    pub image: PathBuf,
}

#[derive(Args)]
pub struct ListArgs {
    /// Only objects of this CKO_* class
    #[arg(long)]
    pub class: Option<u32>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum DigestMechanism {
    Sha1,
    Sha256,
}

#[derive(Args)]
pub struct DigestArgs {
    #[arg(long, default_value = "sha256")]
    pub mechanism: DigestMechanism,
    pub file: PathBuf,
}

#[derive(Args)]
pub struct ProvisionAesArgs {
    /// Key value, 16, 24 or 32 bytes in hex
    #[arg(long)]
    pub hex: String,
    #[arg(long)]
    pub label: Option<String>,
}

#[derive(Args)]
pub struct DestroyArgs {
    pub handle: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_info() {
        let cli = Cli::try_parse_from(["kms", "info"]).unwrap();
        assert!(matches!(cli.command, Command::Info));
        assert_eq!(cli.format, OutputFormat::Text);
        assert!(cli.config.is_none());
    }

    #[test]
    fn parse_global_options_after_subcommand() {
        let cli = Cli::try_parse_from(["kms", "list", "--nvm", "/tmp/nvm.bin", "--format", "json"]).unwrap();
        assert_eq!(cli.nvm, Some(PathBuf::from("/tmp/nvm.bin")));
        assert_eq!(cli.format, OutputFormat::Json);
    }

    #[test]
    fn parse_import() {
        let cli = Cli::try_parse_from(["kms", "import", "--header", "h.bin", "--image", "i.bin"]).unwrap();
        if let Command::Import(args) = cli.command {
            assert_eq!(args.header, PathBuf::from("h.bin"));
            assert_eq!(args.image, PathBuf::from("i.bin"));
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn import_requires_both_files() {
        assert!(Cli::try_parse_from(["kms", "import", "--header", "h.bin"]).is_err());
    }

    #[test]
    fn parse_list_class() {
        let cli = Cli::try_parse_from(["kms", "list", "--class", "4"]).unwrap();
        if let Command::List(args) = cli.command {
            assert_eq!(args.class, Some(4));
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_digest() {
        let cli = Cli::try_parse_from(["kms", "digest", "--mechanism", "sha1", "data.bin"]).unwrap();
        if let Command::Digest(args) = cli.command {
            assert_eq!(args.mechanism, DigestMechanism::Sha1);
            assert_eq!(args.file, PathBuf::from("data.bin"));
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn digest_rejects_unknown_mechanism() {
        assert!(Cli::try_parse_from(["kms", "digest", "--mechanism", "md5", "x"]).is_err());
    }

    #[test]
    fn parse_provision_aes() {
        let cli = Cli::try_parse_from(["kms", "provision-aes", "--hex", "00ff", "--label", "boot"]).unwrap();
        if let Command::ProvisionAes(args) = cli.command {
            assert_eq!(args.hex, "00ff");
            assert_eq!(args.label.as_deref(), Some("boot"));
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_destroy() {
        let cli = Cli::try_parse_from(["kms", "-v", "destroy", "65"]).unwrap();
        assert!(cli.verbose);
        if let Command::Destroy(args) = cli.command {
            assert_eq!(args.handle, 65);
        } else {
            panic!("wrong command");
        }
    }
}

//! Command line definition.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "relay")]
#[command(version, about = "Run relay components and gateways")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Run the component described by a manifest
    Start {
        /// Component manifest (TOML), usually naming `func`
        manifest: PathBuf,
        /// Namespace files applied over the manifest, in order
        namespaces: Vec<PathBuf>,
    },
    /// Run the synchronous HTTP gateway
    Gateway {
        /// Gateway manifest (TOML)
        manifest: PathBuf,
        /// Namespace files applied over the manifest, in order
        namespaces: Vec<PathBuf>,
    },
}

impl Command {
    /// Default service name for log output.
    pub fn service_name(&self) -> &'static str {
        match self {
            Self::Start { .. } => "relay-component",
            Self::Gateway { .. } => "relay-gateway",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_with_namespaces() {
        let cli = Cli::try_parse_from(["relay", "start", "product.toml", "dev.toml", "eu.toml"])
            .unwrap();
        assert_eq!(
            cli.command,
            Command::Start {
                manifest: "product.toml".into(),
                namespaces: vec!["dev.toml".into(), "eu.toml".into()],
            }
        );
    }

    #[test]
    fn test_gateway_without_namespace() {
        let cli = Cli::try_parse_from(["relay", "gateway", "gateway.toml"]).unwrap();
        assert_eq!(cli.command.service_name(), "relay-gateway");
    }

    #[test]
    fn test_manifest_required() {
        assert!(Cli::try_parse_from(["relay", "start"]).is_err());
    }
}

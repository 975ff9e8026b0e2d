use clap::{Args, Parser, Subcommand, ValueEnum};
use keywrap_core::Accessibility;

/// CLI surface definition.
#[derive(Parser, Debug)]
#[command(
    name = "keywrap",
    about = "Store and read secrets through the OS keychain or an encrypted file store",
    version,
    propagate_version = true
)]
pub struct Cli {
    #[command(flatten)]
    pub scope: ScopeArgs,
    #[command(subcommand)]
    pub command: Command,
}

/// Keychain scope flags, accepted before or after any subcommand.
#[derive(Args, Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeArgs {
    /// Service name scoping every key (overrides config).
    #[arg(long, global = true)]
    pub service: Option<String>,
    /// Shared access group (overrides config).
    #[arg(long, global = true)]
    pub access_group: Option<String>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    #[command(flatten)]
    Keychain(KeychainCommand),
    /// Manage CLI configuration.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print version and exit.
    Version,
}

/// Commands that need a storage backend.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum KeychainCommand {
    /// Print the value stored under a key.
    Get {
        key: String,
        /// Always print base64, even for UTF-8 payloads.
        #[arg(long)]
        base64: bool,
    },
    /// Store a value under a key, replacing any existing one.
    Set {
        key: String,
        value: String,
        #[arg(long, value_enum)]
        accessibility: Option<AccessibilityArg>,
    },
    /// Print whether a key has a value.
    Has { key: String },
    /// Remove a key.
    Remove { key: String },
    /// List every key stored under the service.
    Keys,
    /// Remove every key stored under the service.
    Clear,
    /// Round-trip a test value through the configured backend.
    Health,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ConfigCommand {
    /// Create a default config file if one does not exist.
    Init,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessibilityArg {
    AfterFirstUnlock,
    AfterFirstUnlockThisDeviceOnly,
    WhenPasscodeSetThisDeviceOnly,
    WhenUnlocked,
    WhenUnlockedThisDeviceOnly,
}

impl From<AccessibilityArg> for Accessibility {
    fn from(arg: AccessibilityArg) -> Self {
        match arg {
            AccessibilityArg::AfterFirstUnlock => Accessibility::AfterFirstUnlock,
            AccessibilityArg::AfterFirstUnlockThisDeviceOnly => {
                Accessibility::AfterFirstUnlockThisDeviceOnly
            }
            AccessibilityArg::WhenPasscodeSetThisDeviceOnly => {
                Accessibility::WhenPasscodeSetThisDeviceOnly
            }
            AccessibilityArg::WhenUnlocked => Accessibility::WhenUnlocked,
            AccessibilityArg::WhenUnlockedThisDeviceOnly => Accessibility::WhenUnlockedThisDeviceOnly,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_get_subcommand() {
        let cli = Cli::try_parse_from(["keywrap", "get", "token"]).expect("parse should succeed");
        assert_eq!(
            cli.command,
            Command::Keychain(KeychainCommand::Get {
                key: "token".into(),
                base64: false
            })
        );
    }

    #[test]
    fn parses_set_with_accessibility() {
        let cli = Cli::try_parse_from([
            "keywrap",
            "set",
            "token",
            "value",
            "--accessibility",
            "after-first-unlock",
        ])
        .expect("parse should succeed");
        assert_eq!(
            cli.command,
            Command::Keychain(KeychainCommand::Set {
                key: "token".into(),
                value: "value".into(),
                accessibility: Some(AccessibilityArg::AfterFirstUnlock),
            })
        );
    }

    #[test]
    fn global_flags_follow_the_subcommand() {
        let cli = Cli::try_parse_from(["keywrap", "has", "token", "--service", "app"])
            .expect("parse should succeed");
        assert_eq!(cli.scope.service.as_deref(), Some("app"));
        assert_eq!(cli.scope.access_group, None);
        assert_eq!(
            cli.command,
            Command::Keychain(KeychainCommand::Has { key: "token".into() })
        );
    }

    #[test]
    fn parses_remove_and_health() {
        let cli = Cli::try_parse_from(["keywrap", "remove", "k"]).expect("parse should succeed");
        assert_eq!(
            cli.command,
            Command::Keychain(KeychainCommand::Remove { key: "k".into() })
        );
        let cli = Cli::try_parse_from(["keywrap", "health"]).expect("parse should succeed");
        assert_eq!(cli.command, Command::Keychain(KeychainCommand::Health));
    }

    #[test]
    fn parses_service_wide_commands() {
        let cli = Cli::try_parse_from(["keywrap", "keys", "--service", "app"])
            .expect("parse should succeed");
        assert_eq!(cli.command, Command::Keychain(KeychainCommand::Keys));
        assert_eq!(cli.scope.service.as_deref(), Some("app"));
        let cli = Cli::try_parse_from(["keywrap", "clear"]).expect("parse should succeed");
        assert_eq!(cli.command, Command::Keychain(KeychainCommand::Clear));
    }

    #[test]
    fn version_is_its_own_command() {
        let cli = Cli::try_parse_from(["keywrap", "version"]).expect("parse should succeed");
        assert_eq!(cli.command, Command::Version);
    }

    #[test]
    fn parses_config_init_subcommand() {
        let cli =
            Cli::try_parse_from(["keywrap", "config", "init"]).expect("parse should succeed");
        assert_eq!(cli.command, Command::Config(ConfigCommand::Init));
    }

    #[test]
    fn requires_a_subcommand() {
        assert!(Cli::try_parse_from(["keywrap"]).is_err());
    }
}

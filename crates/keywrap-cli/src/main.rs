mod cli;
mod config;
mod storage;

use std::process::ExitCode;

use base64::{engine::general_purpose, Engine as _};
use clap::Parser;
use color_eyre::Result;
use keywrap_core::SecureStorage;
use keywrap_wrapper::Keychain;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::{
    cli::{Cli, Command, ConfigCommand, KeychainCommand},
    config::Config,
};

fn main() -> Result<ExitCode> {
    color_eyre::install()?;
    init_tracing();

    let cli = Cli::parse();
    if execute(cli, config::load)? {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

/// Dispatch a parsed command line. Config is only loaded by commands that use it.
fn execute(cli: Cli, load_config: impl FnOnce() -> Result<Config>) -> Result<bool> {
    match cli.command {
        Command::Version => {
            print_version();
            Ok(true)
        }
        Command::Config(ConfigCommand::Init) => {
            init_config(&load_config()?)?;
            Ok(true)
        }
        Command::Keychain(command) => {
            let config = load_config()?;
            let keychain = storage::keychain_from(&cli.scope, &config)?;
            run(&keychain, command)
        }
    }
}

fn init_tracing() {
    // Respect user-provided filters, default to info to avoid noisy stdout.
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

fn print_version() {
    println!("keywrap {}", env!("CARGO_PKG_VERSION"));
}

fn init_config(config: &Config) -> Result<()> {
    let path = config::write_default_if_missing(config)?;
    println!("Config initialized at {}", path.display());
    Ok(())
}

/// Execute a keychain command and print its outcome. `false` means the key was absent.
fn run<S: SecureStorage>(keychain: &Keychain<S>, command: KeychainCommand) -> Result<bool> {
    match command {
        KeychainCommand::Get { key, base64 } => match keychain.data(&key) {
            Some(data) => println!("{}", render(data, base64)),
            None => {
                eprintln!("No value stored for `{key}`.");
                return Ok(false);
            }
        },
        KeychainCommand::Set {
            key,
            value,
            accessibility,
        } => {
            keychain
                .set_data_with(&key, value.as_bytes(), accessibility.map(Into::into), false)
                .map_err(|e| color_eyre::eyre::eyre!(e.to_string()))?;
            println!("Stored `{key}`.");
        }
        KeychainCommand::Has { key } => println!("{}", keychain.contains(&key)),
        KeychainCommand::Remove { key } => {
            let removed = keychain
                .remove(&key)
                .map_err(|e| color_eyre::eyre::eyre!(e.to_string()))?;
            if removed {
                println!("Removed `{key}`.");
            } else {
                println!("Nothing stored for `{key}`.");
            }
        }
        KeychainCommand::Keys => {
            let keys = keychain
                .all_keys()
                .map_err(|e| color_eyre::eyre::eyre!(e.to_string()))?;
            if keys.is_empty() {
                eprintln!("No keys stored for `{}`.", keychain.options().service_name);
                return Ok(false);
            }
            for key in keys {
                println!("{key}");
            }
        }
        KeychainCommand::Clear => {
            let removed = keychain
                .remove_all_keys()
                .map_err(|e| color_eyre::eyre::eyre!(e.to_string()))?;
            println!("Removed {removed} key(s).");
        }
        KeychainCommand::Health => {
            run_health_check(keychain)?;
            println!("Storage: ok");
        }
    }
    Ok(true)
}

/// UTF-8 payloads print as text; anything else (or on request) as base64.
fn render(data: Vec<u8>, force_base64: bool) -> String {
    if force_base64 {
        return general_purpose::STANDARD.encode(data);
    }
    match String::from_utf8(data) {
        Ok(text) => text,
        Err(err) => general_purpose::STANDARD.encode(err.into_bytes()),
    }
}

/// Write, read back and remove a health-check value.
fn run_health_check<S: SecureStorage>(keychain: &Keychain<S>) -> Result<()> {
    let check_key = "health/check";
    let payload = b"ok";
    keychain
        .set_data(check_key, payload)
        .map_err(|e| color_eyre::eyre::eyre!(e.to_string()))?;
    let round_trip = keychain.data(check_key);
    keychain
        .remove(check_key)
        .map_err(|e| color_eyre::eyre::eyre!(e.to_string()))?;

    if round_trip.as_deref() != Some(&payload[..]) {
        color_eyre::eyre::bail!("storage round-trip failed");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use color_eyre::eyre::eyre;
    use keywrap_wrapper::KeychainOptions;

    use super::*;

    fn test_keychain(root: &std::path::Path) -> Keychain<storage::DynStorage> {
        Keychain::new(storage::test_storage(root), KeychainOptions::default())
    }

    #[test]
    fn health_check_with_test_storage_succeeds() {
        let dir = tempfile::tempdir().expect("tempdir");
        let keychain = test_keychain(dir.path());
        run_health_check(&keychain).expect("health check should succeed");
        assert!(!keychain.contains("health/check"));
    }

    #[test]
    fn set_get_remove_through_commands() {
        let dir = tempfile::tempdir().expect("tempdir");
        let keychain = test_keychain(dir.path());

        let set = KeychainCommand::Set {
            key: "token".into(),
            value: "abc".into(),
            accessibility: None,
        };
        assert!(run(&keychain, set).expect("set"));
        assert_eq!(keychain.string("token").as_deref(), Some("abc"));

        let get = KeychainCommand::Get {
            key: "token".into(),
            base64: false,
        };
        assert!(run(&keychain, get).expect("get"));

        let remove = KeychainCommand::Remove {
            key: "token".into(),
        };
        assert!(run(&keychain, remove).expect("remove"));

        let missing = KeychainCommand::Get {
            key: "token".into(),
            base64: false,
        };
        assert!(!run(&keychain, missing).expect("get"));
    }

    #[test]
    fn keys_and_clear_cover_the_whole_service() {
        let dir = tempfile::tempdir().expect("tempdir");
        let keychain = test_keychain(dir.path());
        assert!(!run(&keychain, KeychainCommand::Keys).expect("keys on empty store"));

        keychain.set_string("a", "1").expect("set");
        keychain.set_string("b", "2").expect("set");
        assert!(run(&keychain, KeychainCommand::Keys).expect("keys"));

        assert!(run(&keychain, KeychainCommand::Clear).expect("clear"));
        assert!(keychain.all_keys().expect("keys").is_empty());
    }

    #[test]
    fn version_does_not_read_config() {
        let cli = Cli::try_parse_from(["keywrap", "version"]).expect("parse");
        let ran = execute(cli, || Err(eyre!("config is unreadable"))).expect("version");
        assert!(ran);
    }

    #[test]
    fn keychain_commands_surface_config_errors() {
        let cli = Cli::try_parse_from(["keywrap", "has", "token"]).expect("parse");
        let err = execute(cli, || Err(eyre!("config is unreadable"))).expect_err("config error");
        assert!(err.to_string().contains("config is unreadable"));

        let cli = Cli::try_parse_from(["keywrap", "config", "init"]).expect("parse");
        assert!(execute(cli, || Err(eyre!("config is unreadable"))).is_err());
    }

    #[test]
    fn render_falls_back_to_base64() {
        assert_eq!(render(b"hello".to_vec(), false), "hello");
        assert_eq!(render(b"hello".to_vec(), true), "aGVsbG8=");
        assert_eq!(render(vec![0xff, 0x00], false), "/wA=");
    }
}

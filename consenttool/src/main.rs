use clap::{ArgAction, Parser, Subcommand};
use cmp_consent::client::message_url;
use cmp_consent::config::{DebugLevel, SessionConfig, TargetingValue};
use cmp_consent::store::{ConsentStore, JsonFileStore};
use cmp_consent::vendor_consent::VendorConsent;
use colored_json::{Color, ColorMode, Output, Styler, ToColoredJson};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Increase logging verbosity
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode a vendor consent string and display it in the console
    Decode {
        /// Consent string to decode
        consent_string: String,
    },
    /// Tell whether vendors and purposes are allowed by a consent string
    Query {
        /// Consent string to decode
        consent_string: String,
        /// Vendor ID to look up
        #[arg(long)]
        vendor: Vec<i32>,
        /// Purpose ID to look up
        #[arg(long)]
        purpose: Vec<i32>,
    },
    /// Print the URL of the consent message for a site
    Url {
        #[arg(short, long)]
        account_id: u32,
        #[arg(short, long)]
        site_name: String,
        #[arg(long, default_value = "")]
        page: String,
        #[arg(long)]
        staging: bool,
        #[arg(long)]
        staging_campaign: bool,
        #[arg(long)]
        message_domain: Option<String>,
        #[arg(long)]
        cmp_domain: Option<String>,
        #[arg(long)]
        mms_domain: Option<String>,
        /// Targeting parameter, as key=value
        #[arg(short, long, value_parser = parse_targeting)]
        targeting: Vec<(String, TargetingValue)>,
        #[arg(long)]
        debug: bool,
    },
    /// Display the content of a consent store
    Inspect {
        /// Path to the store directory
        path: PathBuf,
    },
}

fn main() {
    let args = Cli::parse();
    init_logging(args.verbose);

    let e = match args.cmd {
        Commands::Decode { consent_string } => decode(&consent_string),
        Commands::Query {
            consent_string,
            vendor,
            purpose,
        } => query(&consent_string, &vendor, &purpose),
        Commands::Url {
            account_id,
            site_name,
            page,
            staging,
            staging_campaign,
            message_domain,
            cmp_domain,
            mms_domain,
            targeting,
            debug,
        } => {
            let mut builder = SessionConfig::builder()
                .account_id(account_id)
                .site_name(site_name)
                .page(page)
                .staging(staging)
                .staging_campaign(staging_campaign)
                .debug_level(if debug {
                    DebugLevel::Debug
                } else {
                    DebugLevel::Off
                });
            if let Some(domain) = message_domain {
                builder = builder.message_domain(domain);
            }
            if let Some(domain) = cmp_domain {
                builder = builder.cmp_domain(domain);
            }
            if let Some(domain) = mms_domain {
                builder = builder.mms_domain(domain);
            }
            for (key, value) in targeting {
                builder = builder.targeting_param(key, value);
            }
            print_url(builder)
        }
        Commands::Inspect { path } => inspect(path),
    };

    if let Err(e) = e {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}

fn init_logging(verbose: u8) {
    // RUST_LOG wins over the verbosity flag
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

fn parse_targeting(s: &str) -> Result<(String, TargetingValue), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got {s}"))?;
    let value = match value.parse::<i64>() {
        Ok(n) => TargetingValue::from(n),
        Err(_) => TargetingValue::from(value),
    };
    Ok((key.to_string(), value))
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!(
        "{}",
        serde_json::to_string_pretty(value)?
            .to_colored_json_with_styler(ColorMode::Auto(Output::StdOut), json_color_styler())?
    );
    Ok(())
}

fn decode(s: &str) -> Result<(), Box<dyn std::error::Error>> {
    let consent = VendorConsent::decode(s)?;
    print_json(&consent)
}

fn query(s: &str, vendors: &[i32], purposes: &[i32]) -> Result<(), Box<dyn std::error::Error>> {
    let consent = VendorConsent::decode(s)?;

    for &id in purposes {
        println!("purpose\t{}\t{}", id, consent.is_purpose_allowed(id));
    }
    for &id in vendors {
        println!("vendor\t{}\t{}", id, consent.is_vendor_allowed(id));
    }

    Ok(())
}

fn print_url(
    builder: cmp_consent::config::SessionConfigBuilder,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = builder.build()?;
    println!("{}", message_url(&config)?);
    Ok(())
}

fn inspect(path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let kv = Arc::new(JsonFileStore::open(&path)?);
    debug!(path = %kv.path().display(), "opened consent store");
    print_json(&kv.entries()?)?;

    let store = ConsentStore::new(kv);
    if let Some(raw) = store.consent_string() {
        println!();
        print_json(&VendorConsent::decode(&raw)?)?;
    }

    Ok(())
}

fn json_color_styler() -> Styler {
    Styler {
        key: Color::Green.foreground(),
        string_value: Color::Blue.bold(),
        integer_value: Color::Magenta.bold(),
        float_value: Color::Magenta.italic(),
        object_brackets: Color::Yellow.bold(),
        array_brackets: Color::Cyan.bold(),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn targeting_values() {
        assert_eq!(
            parse_targeting("level=3").unwrap(),
            ("level".to_string(), TargetingValue::Integer(3))
        );
        assert_eq!(
            parse_targeting("CMP=true").unwrap(),
            ("CMP".to_string(), TargetingValue::String("true".into()))
        );
        assert!(parse_targeting("CMP").is_err());
    }

    #[test]
    fn cli_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}

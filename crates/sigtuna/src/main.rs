#![forbid(unsafe_code)]

//! Sigtuna CLI — validate and decrypt SAML-style XML documents.

use clap::{Parser, Subcommand};
use sigtuna::{Error, Settings, SignedDocument};
use std::path::PathBuf;
use std::process;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(
    name = "sigtuna",
    about = "Sigtuna — SAML XML signature verification and decryption",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a document's signature against a certificate fingerprint
    Validate {
        /// Input XML file
        file: PathBuf,

        /// Expected certificate SHA-1 fingerprint (colon-delimited hex),
        /// or "*" to skip the certificate check
        #[arg(short = 'f', long)]
        fingerprint: String,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Decrypt the encrypted fragments of a document
    Decrypt {
        /// Input XML file
        file: PathBuf,

        /// RSA private key (PEM)
        #[arg(short = 'k', long)]
        key: PathBuf,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// List supported algorithms
    Info,
}

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let cli = Cli::parse();

    if let Err(e) = sigtuna::initialize() {
        eprintln!("Error: {e}");
        process::exit(1);
    }

    let result = match cli.command {
        Commands::Validate {
            file,
            fingerprint,
            verbose,
        } => cmd_validate(file, fingerprint, verbose),
        Commands::Decrypt {
            file,
            key,
            output,
            verbose,
        } => cmd_decrypt(file, key, output, verbose),
        Commands::Info => cmd_info(),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn cmd_validate(file: PathBuf, fingerprint: String, verbose: bool) -> Result<(), Error> {
    if verbose {
        eprintln!("Validating: {}", file.display());
    }

    let mut doc = SignedDocument::from_file(&file)?;
    if doc.validate(&fingerprint)? {
        println!("OK");
        Ok(())
    } else {
        eprintln!(
            "INVALID: {}",
            doc.validation_error().unwrap_or("validation failed")
        );
        process::exit(1);
    }
}

fn cmd_decrypt(
    file: PathBuf,
    key: PathBuf,
    output: Option<PathBuf>,
    verbose: bool,
) -> Result<(), Error> {
    if verbose {
        eprintln!("Decrypting: {}", file.display());
    }

    let mut doc = SignedDocument::from_file(&file)?;
    let settings = Settings::with_private_key_file(key);
    doc.decrypt_in_place(&settings)?;
    write_output(output, doc.text().as_bytes())
}

fn cmd_info() -> Result<(), Error> {
    println!("Sigtuna — SAML XML signature verification and decryption");
    println!();
    println!("Supported digest algorithms:");
    println!("  SHA-1, SHA-256, SHA-384, SHA-512");
    println!();
    println!("Supported signature algorithms:");
    println!("  RSA PKCS#1 v1.5 (SHA-1, SHA-256, SHA-384, SHA-512)");
    println!();
    println!("Supported encryption algorithms:");
    println!("  AES-128/192/256-CBC, AES-128/256-GCM");
    println!();
    println!("Supported key transport algorithms:");
    println!("  RSA PKCS#1 v1.5, RSA-OAEP (SHA-1)");
    println!();
    println!("Supported canonicalization:");
    println!("  C14N 1.0 (±comments)");
    println!("  Exclusive C14N 1.0 (±comments)");
    Ok(())
}

fn write_output(path: Option<PathBuf>, data: &[u8]) -> Result<(), Error> {
    match path {
        Some(p) => std::fs::write(&p, data).map_err(Error::Io),
        None => {
            use std::io::Write;
            std::io::stdout().write_all(data).map_err(Error::Io)
        }
    }
}

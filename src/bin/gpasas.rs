//! gpasas CLI tool
//!
//! Converts Galimybių pasas certificate PDFs into signed wallet passes.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use glob::glob;
use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use gpasas::config::{
    load_signing_materials, read_upload, SigningConfig, DEFAULT_INTERMEDIATE_PATH,
    DEFAULT_P12_PATH, DEFAULT_TEMPLATE_DIR,
};
use gpasas::package::{parse_certificate, verify_archive};
use gpasas::pass::PassIdentity;
use gpasas::pipeline::{extract_pass_record, PassMaker};

/// Shown for every failed conversion, whatever went wrong
const CONVERSION_FAILED: &str = "Atsiprašome, kažkas įvyko ne taip. Patikrinkite ar įkėlėte \
    teisingą failą. iOS įrenginiuose rekomenduojame naudoti Safari naršyklę.";

/// gpasas - Turn certificate PDFs into wallet passes
#[derive(Parser)]
#[command(name = "gpasas")]
#[command(author, version, about, long_about = None)]
#[command(after_help = "EXAMPLES:
    # Convert one certificate
    gpasas convert pazyma.pdf -o gpasas.pkpass

    # Convert a batch into a directory
    gpasas convert \"certificates/*.pdf\" -o passes/

    # Show what would go on the pass
    gpasas inspect pazyma.pdf

    # Check a pass archive against the intermediate certificate
    gpasas verify gpasas.pkpass --intermediate AppleWWDRCA.cer")]
struct Cli {
    /// Log debug output to stderr (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert certificate PDFs into signed .pkpass archives
    Convert {
        /// Input PDF files. Supports glob patterns like "*.pdf"
        #[arg(required = true)]
        inputs: Vec<String>,

        /// Output directory, or a .pkpass file path for a single input
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        signing: SigningArgs,

        #[command(flatten)]
        identity: IdentityArgs,
    },

    /// Extract the pass record from a certificate and print it as JSON
    Inspect {
        /// Input PDF file
        input: PathBuf,
    },

    /// Verify a .pkpass archive's manifest and signature
    Verify {
        /// Archive to check
        archive: PathBuf,

        /// Intermediate certificate the signer must be issued by (DER or PEM)
        #[arg(long, env = "GPASAS_INTERMEDIATE", default_value = DEFAULT_INTERMEDIATE_PATH)]
        intermediate: PathBuf,
    },
}

#[derive(Args)]
struct SigningArgs {
    /// PKCS#12 bundle with the pass signing key and certificate
    #[arg(long = "p12", env = "GPASAS_P12", default_value = DEFAULT_P12_PATH)]
    pkcs12: PathBuf,

    /// Password of the PKCS#12 bundle
    #[arg(long, env = "GPASAS_P12_PASSWORD", hide_env_values = true)]
    password: String,

    /// Intermediate certificate (DER or PEM)
    #[arg(long, env = "GPASAS_INTERMEDIATE", default_value = DEFAULT_INTERMEDIATE_PATH)]
    intermediate: PathBuf,

    /// Directory with icon.png, logo.png and their @2x/@3x variants
    #[arg(long, env = "GPASAS_TEMPLATE_DIR", default_value = DEFAULT_TEMPLATE_DIR)]
    template_dir: PathBuf,
}

impl From<SigningArgs> for SigningConfig {
    fn from(args: SigningArgs) -> Self {
        SigningConfig {
            pkcs12: args.pkcs12,
            password: args.password,
            intermediate: args.intermediate,
            template_dir: args.template_dir,
        }
    }
}

#[derive(Args)]
struct IdentityArgs {
    /// Pass type identifier (must match the signing certificate)
    #[arg(long)]
    pass_type_id: Option<String>,

    /// Team identifier
    #[arg(long)]
    team_id: Option<String>,

    /// Organization name shown on the pass
    #[arg(long)]
    organization: Option<String>,
}

impl From<IdentityArgs> for PassIdentity {
    fn from(args: IdentityArgs) -> Self {
        let defaults = PassIdentity::default();
        PassIdentity {
            pass_type_identifier: args.pass_type_id.unwrap_or(defaults.pass_type_identifier),
            team_identifier: args.team_id.unwrap_or(defaults.team_identifier),
            organization_name: args.organization.unwrap_or(defaults.organization_name),
            ..defaults
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Commands::Convert {
            inputs,
            output,
            signing,
            identity,
        } => cmd_convert(inputs, output, signing.into(), identity.into()),
        Commands::Inspect { input } => cmd_inspect(input),
        Commands::Verify {
            archive,
            intermediate,
        } => cmd_verify(archive, intermediate),
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Expand glob patterns in input paths
fn expand_globs(patterns: Vec<String>) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();

    for pattern in patterns {
        // Check if pattern contains glob characters
        if pattern.contains('*') || pattern.contains('?') || pattern.contains('[') {
            let mut matched = false;
            for entry in glob(&pattern)? {
                match entry {
                    Ok(path) => {
                        paths.push(path);
                        matched = true;
                    }
                    Err(e) => warn!(pattern = %pattern, error = %e, "glob error"),
                }
            }
            if !matched {
                bail!("No files matched pattern: {}", pattern);
            }
        } else {
            paths.push(PathBuf::from(pattern));
        }
    }

    paths.sort();
    Ok(paths)
}

/// Where the archive for `input` goes
fn output_path(input: &Path, output: Option<&Path>, single: bool) -> PathBuf {
    let name = input
        .file_stem()
        .map(|stem| format!("{}.pkpass", stem.to_string_lossy()))
        .unwrap_or_else(|| "gpasas.pkpass".to_string());

    match output {
        Some(path) if single && path.extension().is_some_and(|ext| ext == "pkpass") => {
            path.to_path_buf()
        }
        Some(dir) => dir.join(name),
        None => input.with_file_name(name),
    }
}

/// Convert certificate PDFs into pass archives
fn cmd_convert(
    inputs: Vec<String>,
    output: Option<PathBuf>,
    signing: SigningConfig,
    identity: PassIdentity,
) -> Result<()> {
    let inputs = expand_globs(inputs)?;
    for path in &inputs {
        if !path.exists() {
            bail!("Input file not found: {}", path.display());
        }
    }

    // Signing materials are loaded before any input is touched
    let maker = PassMaker::new(load_signing_materials(&signing)?, identity);

    let single = inputs.len() == 1;
    if let Some(dir) = output.as_deref() {
        let is_file = single && dir.extension().is_some_and(|ext| ext == "pkpass");
        if !is_file {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
    }

    let mut failed = 0;
    for input in &inputs {
        let result = read_upload(input).and_then(|bytes| Ok(maker.make_pass(&bytes)?));
        match result {
            Ok(archive) => {
                let target = output_path(input, output.as_deref(), single);
                fs::write(&target, archive.into_bytes())
                    .with_context(|| format!("Failed to write {}", target.display()))?;
                info!(input = %input.display(), output = %target.display(), "wrote pass");
                eprintln!("{} -> {}", input.display(), target.display());
            }
            Err(e) => {
                let kind = e.downcast_ref::<gpasas::Error>().map(gpasas::Error::kind);
                warn!(input = %input.display(), error = %e, ?kind, "conversion failed");
                eprintln!("{}: {}", input.display(), CONVERSION_FAILED);
                failed += 1;
            }
        }
    }

    if failed > 0 {
        bail!("{} of {} conversions failed", failed, inputs.len());
    }
    Ok(())
}

/// Print the pass record extracted from a certificate
fn cmd_inspect(input: PathBuf) -> Result<()> {
    let bytes = read_upload(&input)?;
    let record = extract_pass_record(&bytes)
        .with_context(|| format!("Failed to read {}", input.display()))?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

/// Verify an archive and print a summary
fn cmd_verify(archive: PathBuf, intermediate: PathBuf) -> Result<()> {
    let bytes =
        fs::read(&archive).with_context(|| format!("Failed to read {}", archive.display()))?;
    let certificate = fs::read(&intermediate)
        .with_context(|| format!("Failed to read {}", intermediate.display()))?;
    let certificate = parse_certificate(&certificate)?;

    let description = verify_archive(&bytes, &certificate)
        .with_context(|| format!("{} failed verification", archive.display()))?;

    println!("File: {}", archive.display());
    println!("Serial: {}", description.serial_number);
    println!("Pass type: {}", description.pass_type_identifier);
    println!("Expires: {}", description.expiration_date);
    if let Some(name) = description.generic.primary_fields.first() {
        println!("{}: {}", name.label, name.value);
    }
    println!("Signature: OK");
    Ok(())
}

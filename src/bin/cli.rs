use chrono::Utc;
use clap::{Parser, Subcommand};
use std::{path::PathBuf, time::Duration};
use waterworks::{
    config::session::decode_secret_bytes,
    middleware::csrf::{generate_token, validate_token, DEFAULT_TIMEOUT, MIN_SECRET_LEN},
    render::{compile, RenderOptions, TemplateSet},
    session::{IdGenerator, Sha1Generator},
};

#[derive(Parser)]
#[command(name = "waterworks-cli")]
#[command(about = "CLI tool for checking templates, CSRF tokens and session ids", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Template commands
    Templates {
        #[command(subcommand)]
        command: TemplateCommands,
    },

    /// CSRF token commands
    Csrf {
        #[command(subcommand)]
        command: CsrfCommands,
    },

    /// Session commands
    Session {
        #[command(subcommand)]
        command: SessionCommands,
    },
}

#[derive(Subcommand)]
enum TemplateCommands {
    /// Compile a theme and list its templates
    Check {
        /// Root directory holding one sub-directory per theme
        #[arg(short, long, default_value = "templates")]
        dir: PathBuf,

        /// Theme to compile
        #[arg(short, long, default_value = "default")]
        theme: String,

        /// Template file extensions (repeatable)
        #[arg(short, long = "ext")]
        extensions: Vec<String>,
    },

    /// Render one template with a JSON context
    Render {
        #[arg(short, long, default_value = "templates")]
        dir: PathBuf,

        #[arg(short, long, default_value = "default")]
        theme: String,

        /// Template name relative to the theme directory
        #[arg(short, long)]
        name: String,

        /// JSON object passed as the template context
        #[arg(short, long, default_value = "{}")]
        context: String,
    },
}

#[derive(Subcommand)]
enum CsrfCommands {
    /// Issue a token for a session id
    Token {
        /// Session id the token is bound to
        #[arg(short, long)]
        session: String,

        /// Secret (defaults to CSRF_SECRET)
        #[arg(long)]
        secret: Option<String>,
    },

    /// Check a token against a session id
    Verify {
        #[arg(short, long)]
        session: String,

        #[arg(short = 'k', long)]
        token: String,

        #[arg(long)]
        secret: Option<String>,

        /// Token lifetime in seconds
        #[arg(long, default_value_t = DEFAULT_TIMEOUT.as_secs())]
        timeout: u64,
    },
}

#[derive(Subcommand)]
enum SessionCommands {
    /// Print freshly generated session ids
    NewId {
        /// Client address mixed into the id
        #[arg(short, long)]
        addr: Option<String>,

        /// Key mixed into the id (defaults to SESSION_SECRET)
        #[arg(long)]
        key: Option<String>,

        #[arg(short = 'n', long, default_value_t = 1)]
        count: usize,
    },
}

fn csrf_secret(secret: Option<String>) -> Vec<u8> {
    let secret = secret
        .or_else(|| std::env::var("CSRF_SECRET").ok())
        .unwrap_or_default();
    let bytes = decode_secret_bytes(&secret);

    if bytes.len() < MIN_SECRET_LEN {
        eprintln!(
            "❌ CSRF secret must be at least {} bytes (pass --secret or set CSRF_SECRET)",
            MIN_SECRET_LEN
        );
        std::process::exit(1);
    }
    bytes
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Parse CLI arguments
    let cli = Cli::parse();

    match cli.command {
        Commands::Templates { command } => match command {
            TemplateCommands::Check {
                dir,
                theme,
                extensions,
            } => {
                let mut options = RenderOptions {
                    directory: dir,
                    theme: theme.clone(),
                    ..RenderOptions::default()
                };
                if !extensions.is_empty() {
                    options.extensions = extensions;
                }

                match compile(&options.normalized()) {
                    Ok(compiled) => {
                        let names = compiled.names();
                        println!("✅ Theme '{}' compiled: {} templates", theme, names.len());
                        for name in names {
                            println!("  {}", name);
                        }
                    }
                    Err(err) => {
                        eprintln!("❌ Theme '{}' failed to compile: {}", theme, err);
                        std::process::exit(1);
                    }
                }
            }

            TemplateCommands::Render {
                dir,
                theme,
                name,
                context,
            } => {
                let context: serde_json::Value = serde_json::from_str(&context)?;
                let set = TemplateSet::new(vec![RenderOptions {
                    directory: dir,
                    theme: theme.clone(),
                    ..RenderOptions::default()
                }])?;

                match set.render(&theme, &name, context) {
                    Ok(body) => println!("{}", body),
                    Err(err) => {
                        eprintln!("❌ Failed to render {}:{}: {}", theme, name, err);
                        std::process::exit(1);
                    }
                }
            }
        },

        Commands::Csrf { command } => match command {
            CsrfCommands::Token { session, secret } => {
                let secret = csrf_secret(secret);
                println!("{}", generate_token(&secret, &session, Utc::now()));
            }

            CsrfCommands::Verify {
                session,
                token,
                secret,
                timeout,
            } => {
                let secret = csrf_secret(secret);
                let timeout = Duration::from_secs(timeout);

                if validate_token(&token, &secret, &session, timeout, Utc::now()) {
                    println!("✅ Token is valid for session '{}'", session);
                } else {
                    eprintln!("❌ Token is not valid for session '{}'", session);
                    std::process::exit(1);
                }
            }
        },

        Commands::Session { command } => match command {
            SessionCommands::NewId { addr, key, count } => {
                let key = key
                    .or_else(|| std::env::var("SESSION_SECRET").ok())
                    .unwrap_or_default();
                let generator = Sha1Generator::new(key);

                for _ in 0..count {
                    println!("{}", generator.generate(addr.as_deref()));
                }
            }
        },
    }

    Ok(())
}

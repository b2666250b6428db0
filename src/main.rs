use chrono::Utc;
use clap::{Parser, Subcommand};
use qrpo::config::SolverConfig;
use qrpo::input::{parse_matrix, parse_series, parse_vector, simple_returns};
use qrpo::service::{self, BinaryRequest, ContinuousRequest, Request, SpectrumRequest};
use serde_json::json;
use std::error::Error;
use std::fs;
use std::io::Read;

#[derive(Parser)]
#[command(name = "qrpo")]
#[command(about = "Mean-variance allocation, QUBO asset selection and spectral features")]
struct Args {
    /// Path to solver settings (JSON)
    #[arg(long, short, global = true)]
    config: Option<String>,

    /// Print the default solver settings and exit
    #[arg(long)]
    generate_config: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Handle one JSON request, or an array of them, from a file or `-` for stdin
    Run { input: String },

    /// Spectral features of a price column in a text file (or `-` for stdin)
    Spectrum {
        input: String,
        /// Convert prices to simple returns first
        #[arg(long)]
        returns: bool,
    },

    /// Continuous allocation, e.g. --mu 0.1,0.2 --cov "1,0;0,1"
    Optimize {
        #[arg(long, allow_hyphen_values = true)]
        mu: String,
        #[arg(long, allow_hyphen_values = true)]
        cov: String,
        #[arg(long, default_value_t = 0.5)]
        lambda: f64,
    },

    /// Binary buy/skip selection
    Select {
        #[arg(long, allow_hyphen_values = true)]
        mu: String,
        #[arg(long, allow_hyphen_values = true)]
        cov: String,
        #[arg(long, default_value_t = 0.5)]
        lambda: f64,
        #[arg(long, default_value_t = 1)]
        reps: usize,
    },
}

fn read_input(source: &str) -> Result<String, Box<dyn Error>> {
    if source == "-" {
        let mut text = String::new();
        std::io::stdin().read_to_string(&mut text)?;
        return Ok(text);
    }
    let text = fs::read_to_string(source).map_err(|e| format!("Failed to read '{}': {}", source, e))?;
    Ok(text)
}

fn run(command: Command, config: &SolverConfig) -> Result<String, Box<dyn Error>> {
    let response = match command {
        Command::Run { input } => service::handle_json(&read_input(&input)?, config)?,
        Command::Spectrum { input, returns } => {
            let mut series = parse_series(&read_input(&input)?)?;
            if returns {
                series = simple_returns(&series);
            }
            service::handle(&Request::Spectrum(SpectrumRequest::from_samples(&series)), config)
        }
        Command::Optimize { mu, cov, lambda } => {
            let request = ContinuousRequest {
                mu: parse_vector(&mu)?,
                cov: parse_matrix(&cov)?,
                lam: lambda,
            };
            service::handle(&Request::Continuous(request), config)
        }
        Command::Select { mu, cov, lambda, reps } => {
            let request = BinaryRequest {
                mu: parse_vector(&mu)?,
                cov: parse_matrix(&cov)?,
                lam: lambda,
                reps,
            };
            service::handle(&Request::Binary(request), config)
        }
    };

    let envelope = json!({
        "generated_at": Utc::now().to_rfc3339(),
        "response": response,
    });
    Ok(serde_json::to_string_pretty(&envelope)?)
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    if args.generate_config {
        match SolverConfig::default().to_json_pretty() {
            Ok(text) => println!("{}", text),
            Err(e) => {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
        return;
    }

    let config = match &args.config {
        Some(path) => match SolverConfig::load(path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("{}", e);
                eprintln!("Use --generate-config to create a template.");
                std::process::exit(1);
            }
        },
        None => SolverConfig::default(),
    };

    let Some(command) = args.command else {
        eprintln!("No command given. Use --help to list commands.");
        std::process::exit(1);
    };

    match run(command, &config) {
        Ok(output) => println!("{}", output),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

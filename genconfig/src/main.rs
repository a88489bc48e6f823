use std::{path::PathBuf, process::ExitCode};

use clap::Parser;
use colored::Colorize;
use genconfig::{Outputs, Rejection, Resolution, ViolationKind};

#[derive(Parser)]
#[command(name = "genconfig")]
#[command(about = "Resolve a configuration against its schema and emit Makefile and C header listings", version)]
struct Cli {
    /// Configuration file (JSON or TOML)
    config: PathBuf,

    /// Schema file (default: `<config stem>-schema.json` next to the config)
    #[arg(long, short = 's')]
    schema: Option<PathBuf>,

    /// Write the Makefile listing to this file instead of stdout
    #[arg(long, short = 'm')]
    makefile: Option<PathBuf>,

    /// Write the C header listing to this file instead of stdout
    #[arg(long, short = 'H')]
    header: Option<PathBuf>,

    /// Write the resolved configuration to this file
    #[arg(long, short = 'o')]
    output_config: Option<PathBuf>,

    /// Also print every registered knob
    #[arg(long)]
    knobs: bool,

    /// Print the result or the rejection as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match execute(&cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => match e.downcast_ref::<Rejection>() {
            Some(rejection) => {
                print_rejection(rejection, cli.json);
                ExitCode::from(1)
            }
            None => {
                eprintln!("{} {e:#}", "error:".red().bold());
                ExitCode::from(2)
            }
        },
    }
}

async fn execute(cli: &Cli) -> anyhow::Result<()> {
    let resolution = genconfig::run(&cli.config, cli.schema.as_ref()).await?;

    let outputs = Outputs {
        makefile: cli.makefile.clone(),
        header: cli.header.clone(),
        config: cli.output_config.clone(),
    };
    genconfig::write_outputs(&resolution, &outputs).await?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&resolution)?);
    } else {
        print_resolution(cli, &resolution);
    }
    Ok(())
}

fn print_resolution(cli: &Cli, resolution: &Resolution) {
    if cli.knobs {
        println!("Knobs\n=====");
        for knob in &resolution.knobs {
            println!("{} ({})", knob.name, knob.ty);
        }
        println!();
    }
    if cli.makefile.is_none() {
        println!("Makefile\n========");
        print!("{}", resolution.makefile);
    }
    if cli.header.is_none() {
        println!("\nC\n=");
        print!("{}", resolution.header);
    }
}

fn print_rejection(rejection: &Rejection, json: bool) {
    if json {
        match serde_json::to_string_pretty(rejection) {
            Ok(s) => println!("{s}"),
            Err(e) => eprintln!("{} {e}", "error:".red().bold()),
        }
        return;
    }

    eprintln!("{}", rejection.to_string().red().bold());
    for violation in &rejection.violations {
        let tag = format!("[{}]", violation.kind);
        let tag = match violation.kind {
            ViolationKind::Dependency => tag.yellow(),
            _ => tag.red(),
        };
        eprintln!("  {tag} {}", violation.message);
    }
}

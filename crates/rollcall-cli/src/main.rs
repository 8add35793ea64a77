// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

mod config;
mod logging;
mod runtime;

use anyhow::{Context, Result, anyhow, bail};
use config::Config;
use rollcall_app::{BlockId, LineId, Status, UnitId};
use runtime::{Backend, BlockChoice, Command, Targets};
use std::env;
use std::io;
use std::path::PathBuf;

fn main() {
    if let Err(error) = run() {
        eprintln!("{error:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let options = parse_cli_args(env::args().skip(1), Config::default_path()?)?;
    if options.show_help {
        print_help();
        return Ok(());
    }

    if options.print_config_path {
        println!("{}", options.config_path.display());
        return Ok(());
    }

    if options.print_example {
        print!("{}", Config::example_config(&options.config_path));
        return Ok(());
    }

    let config = Config::load(&options.config_path).with_context(|| {
        format!(
            "load config {}; run `rollcall --print-example-config` to generate a v1 template",
            options.config_path.display()
        )
    })?;
    logging::init_logging(&config.log_level(), config.log_dir())
        .context("start logging; check [logging] or ROLLCALL_LOG")?;

    let backend = Backend::open(&config, options.demo)?;
    log::info!(
        "event=backend_ready module=cli status=ok backend={} demo={}",
        backend.describe(),
        options.demo
    );
    if options.check_only {
        return Ok(());
    }

    let Some(command) = options.command else {
        bail!("no command given; run with --help to see supported commands");
    };
    let stdout = io::stdout();
    let warnings = runtime::run_command(backend, config.layout(), &command, &mut stdout.lock())?;
    for warning in warnings {
        eprintln!("warning: {warning}");
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct CliOptions {
    config_path: PathBuf,
    print_config_path: bool,
    demo: bool,
    print_example: bool,
    check_only: bool,
    show_help: bool,
    command: Option<Command>,
}

/// Command-scoped flags, gathered before the command is known.
#[derive(Debug, Default)]
struct CommandFlags {
    blocks: Vec<BlockId>,
    all_blocks: bool,
    filter: Option<String>,
    status: Option<Status>,
    codes: Vec<String>,
    all: bool,
}

fn parse_cli_args<I, S>(args: I, default_config_path: PathBuf) -> Result<CliOptions>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut options = CliOptions {
        config_path: default_config_path,
        print_config_path: false,
        demo: false,
        print_example: false,
        check_only: false,
        show_help: false,
        command: None,
    };
    let mut flags = CommandFlags::default();
    let mut positionals: Vec<String> = Vec::new();

    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_ref() {
            "--config" => {
                let value = iter
                    .next()
                    .ok_or_else(|| anyhow!("--config requires a file path"))?;
                options.config_path = PathBuf::from(value.as_ref());
            }
            "--print-config-path" => {
                options.print_config_path = true;
            }
            "--print-example-config" => {
                options.print_example = true;
            }
            "--demo" => {
                options.demo = true;
            }
            "--check" => {
                options.check_only = true;
            }
            "--help" | "-h" => {
                options.show_help = true;
            }
            "--block" => {
                let value = iter
                    .next()
                    .ok_or_else(|| anyhow!("--block requires a block id"))?;
                flags.blocks.push(BlockId::from(value.as_ref()));
            }
            "--all-blocks" => {
                flags.all_blocks = true;
            }
            "--filter" => {
                let value = iter
                    .next()
                    .ok_or_else(|| anyhow!("--filter requires a search term"))?;
                flags.filter = Some(value.as_ref().to_owned());
            }
            "--status" => {
                let value = iter
                    .next()
                    .ok_or_else(|| anyhow!("--status requires one of A, S, NC, NR, X, R"))?;
                let status = Status::parse(value.as_ref()).ok_or_else(|| {
                    anyhow!(
                        "unknown status {:?}; expected one of A, S, NC, NR, X, R",
                        value.as_ref()
                    )
                })?;
                flags.status = Some(status);
            }
            "--code" => {
                let value = iter
                    .next()
                    .ok_or_else(|| anyhow!("--code requires a contact code"))?;
                flags.codes.push(value.as_ref().to_owned());
            }
            "--all" => {
                flags.all = true;
            }
            unknown if unknown.starts_with('-') => {
                bail!("unknown argument {unknown:?}; run with --help to see supported options");
            }
            positional => positionals.push(positional.to_owned()),
        }
    }

    options.command = build_command(positionals, flags)?;
    Ok(options)
}

fn build_command(positionals: Vec<String>, flags: CommandFlags) -> Result<Option<Command>> {
    let mut words = positionals.into_iter();
    let Some(name) = words.next() else {
        reject_command_flags(None, &flags)?;
        return Ok(None);
    };
    let args: Vec<String> = words.collect();

    let command = match name.as_str() {
        "units" => {
            expect_args(&name, &args, &[])?;
            reject_command_flags(Some(&name), &flags)?;
            Command::Units
        }
        "lines" => {
            expect_args(&name, &args, &["<unit>"])?;
            reject_command_flags(Some(&name), &flags)?;
            Command::Lines {
                unit: UnitId::from(args[0].as_str()),
            }
        }
        "blocks" => {
            expect_args(&name, &args, &["<unit>", "<line>"])?;
            reject_command_flags(Some(&name), &flags)?;
            Command::Blocks {
                unit: UnitId::from(args[0].as_str()),
                line: LineId::from(args[1].as_str()),
            }
        }
        "leaves" => {
            expect_args(&name, &args, &["<unit>", "<line>"])?;
            if flags.status.is_some() || !flags.codes.is_empty() || flags.all {
                bail!("--status, --code, and --all only apply to set-status");
            }
            Command::Leaves {
                unit: UnitId::from(args[0].as_str()),
                line: LineId::from(args[1].as_str()),
                blocks: block_choice(&flags)?,
                filter: flags.filter,
            }
        }
        "set-status" => {
            expect_args(&name, &args, &["<unit>", "<line>"])?;
            let status = flags
                .status
                .ok_or_else(|| anyhow!("set-status requires --status <A|S|NC|NR|X|R>"))?;
            let targets = match (flags.all, flags.codes.is_empty()) {
                (true, true) => Targets::AllVisible,
                (false, false) => Targets::Codes(flags.codes.clone()),
                (true, false) => bail!("use either --code or --all, not both"),
                (false, true) => bail!("set-status requires --code <code> or --all"),
            };
            Command::SetStatus {
                unit: UnitId::from(args[0].as_str()),
                line: LineId::from(args[1].as_str()),
                blocks: block_choice(&flags)?,
                filter: flags.filter,
                status,
                targets,
            }
        }
        other => {
            bail!("unknown command {other:?}; expected units, lines, blocks, leaves, or set-status")
        }
    };
    Ok(Some(command))
}

fn expect_args(name: &str, args: &[String], wanted: &[&str]) -> Result<()> {
    if args.len() != wanted.len() {
        let usage = std::iter::once(name)
            .chain(wanted.iter().copied())
            .collect::<Vec<_>>()
            .join(" ");
        bail!("usage: rollcall {usage}");
    }
    Ok(())
}

fn reject_command_flags(name: Option<&str>, flags: &CommandFlags) -> Result<()> {
    let used = !flags.blocks.is_empty()
        || flags.all_blocks
        || flags.filter.is_some()
        || flags.status.is_some()
        || !flags.codes.is_empty()
        || flags.all;
    if used {
        let scope = name.map_or_else(|| "without a command".to_owned(), |name| format!("with {name}"));
        bail!("block, filter, and status flags cannot be used {scope}");
    }
    Ok(())
}

fn block_choice(flags: &CommandFlags) -> Result<BlockChoice> {
    match (flags.all_blocks, flags.blocks.is_empty()) {
        (true, false) => bail!("use either --block or --all-blocks, not both"),
        (_, true) => Ok(BlockChoice::All),
        (false, false) => Ok(BlockChoice::Listed(flags.blocks.clone())),
    }
}

fn print_help() {
    println!("rollcall");
    println!("  units                                List units");
    println!("  lines <unit>                         List lines of a unit");
    println!("  blocks <unit> <line>                 List blocks of a line");
    println!("  leaves <unit> <line>                 List contacts of the chosen blocks");
    println!("      [--block <id>]... [--all-blocks] [--filter <term>]");
    println!("  set-status <unit> <line> --status <A|S|NC|NR|X|R>");
    println!("      [--block <id>]... [--all-blocks] [--filter <term>]");
    println!("      (--code <code>... | --all)       Update the chosen contacts in one batch");
    println!("      a code may be written as <block>|<id> to name one contact exactly");
    println!();
    println!("  --config <path>          Use a specific config path");
    println!("  --print-config-path      Print resolved config path");
    println!("  --print-example-config   Print a v1 config template");
    println!("  --demo                   Run against seeded demo data (in-memory)");
    println!("  --check                  Validate config + store and exit");
    println!("  --help                   Show this help");
}

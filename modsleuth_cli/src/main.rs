use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use indicatif::ProgressBar;
use itertools::Itertools;
use modsleuth::signatures::{Signature, SIGNATURES};
use modsleuth::{Arch, Image, ScanConfig};
use prettytable::{row, Cell, Row, Table};
use tracing_subscriber::EnvFilter;

/// Locate the module data of compiled executables
#[derive(Parser)]
#[command(version)]
enum Commands {
    Scan(CommandScan),
    Signatures(CommandSignatures),
}

fn parse_maybe_hex(s: &str) -> Result<u64> {
    Ok(s.strip_prefix("0x")
        .map(|s| u64::from_str_radix(s, 16))
        .unwrap_or_else(|| s.parse())?)
}

#[derive(Parser)]
struct CommandScan {
    /// Executables to scan (ELF, PE or Mach-O)
    #[arg(required = true)]
    paths: Vec<PathBuf>,

    /// Treat each input as the raw contents of a single code section
    #[arg(long)]
    raw: bool,

    /// Virtual address raw inputs are mapped at
    #[arg(long, default_value = "0", value_parser(|s: &str| parse_maybe_hex(s)))]
    base: u64,

    /// A section to scan (can be specified multiple times). Scans all code sections if omitted
    #[arg(short, long)]
    section: Vec<String>,

    /// An architecture to scan for (can be specified multiple times). Scans for all if omitted
    #[arg(short, long)]
    arch: Vec<Arch>,

    /// Print one JSON object per match instead of tables
    #[arg(long)]
    json: bool,

    /// Show scan progress
    #[arg(long)]
    progress: bool,
}

#[derive(Parser)]
struct CommandSignatures {}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    match Commands::parse() {
        Commands::Scan(command) => scan(command),
        Commands::Signatures(command) => signatures(command),
    }
}

/// Match found in a file
#[derive(Debug)]
struct Found {
    section: String,
    arch: Arch,
    address: u64,
    /// Section of the same file containing `address`
    target: Option<String>,
}

#[derive(serde::Serialize)]
struct JsonMatch<'a> {
    path: String,
    section: &'a str,
    arch: Arch,
    address: String,
    target: Option<&'a str>,
}

fn scan_file(path: &Path, raw_base: Option<u64>, config: &ScanConfig) -> Result<Vec<Found>> {
    let data = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let image = match raw_base {
        Some(base) => Image::raw(&data, base),
        None => Image::read(&data).with_context(|| format!("failed to load {}", path.display()))?,
    };
    tracing::info!(
        path = %path.display(),
        format = ?image.format,
        architecture = ?image.architecture,
        sections = image.sections.len(),
        "scanning"
    );

    Ok(image
        .scan(config)
        .into_iter()
        .map(|m| Found {
            target: image
                .get_section_containing(m.address)
                .map(|s| s.name.clone()),
            section: m.section,
            arch: m.arch,
            address: m.address,
        })
        .collect())
}

fn scan(command: CommandScan) -> Result<()> {
    use rayon::prelude::*;

    let config = ScanConfig {
        sections: command.section,
        archs: command.arch,
    };
    let raw_base = command.raw.then_some(command.base);

    let progress = command
        .progress
        .then(|| ProgressBar::new(command.paths.len() as u64));

    let results = command
        .paths
        .par_iter()
        .map(|path| {
            let res = scan_file(path, raw_base, &config);
            if let Some(progress) = &progress {
                progress.inc(1);
            }
            (path, res)
        })
        .collect::<Vec<_>>();
    if let Some(progress) = progress {
        progress.finish_and_clear();
    }

    for (path, res) in results {
        for line in report(path, res, command.json)? {
            println!("{line}");
        }
    }

    Ok(())
}

/// Lines printed for the results of a single input
fn report(path: &Path, res: Result<Vec<Found>>, json: bool) -> Result<Vec<String>> {
    let found = match res {
        Ok(found) => found,
        Err(err) => {
            return Ok(vec![format!("err reading {}: {:#}", path.display(), err)
                .red()
                .to_string()]);
        }
    };

    if json {
        return found
            .iter()
            .map(|f| -> Result<String> {
                Ok(serde_json::to_string(&JsonMatch {
                    path: path.display().to_string(),
                    section: &f.section,
                    arch: f.arch,
                    address: format!("{:#x}", f.address),
                    target: f.target.as_deref(),
                })?)
            })
            .collect();
    }

    let mut lines = vec![path.display().to_string().bold().to_string()];
    if found.is_empty() {
        lines.push("not found".red().to_string());
        return Ok(lines);
    }

    let mut table = Table::new();
    table.set_titles(row!["section", "arch", "module data", "in section"]);
    for f in &found {
        table.add_row(Row::new(vec![
            Cell::new(&f.section),
            Cell::new(&f.arch.to_string()),
            Cell::new(&format!("{:016x}", f.address)),
            match &f.target {
                Some(target) => Cell::new(target),
                #[allow(clippy::unnecessary_to_owned)]
                None => Cell::new(&"unmapped".yellow().to_string()),
            },
        ]));
    }
    lines.push(table.to_string());
    Ok(lines)
}

fn describe_operands(sig: &Signature) -> String {
    match sig {
        Signature::X64 {
            disp_offset,
            next_insn_offset,
            ..
        } => format!("rip disp32 @ {disp_offset}, next insn @ {next_insn_offset}, + section base"),
        Signature::X86 {
            ptr_offset,
            loop_pattern,
            loop_max_distance,
            ..
        } => format!(
            "abs32 @ {ptr_offset}, confirmed by\n{loop_pattern}\nwithin {loop_max_distance} bytes"
        ),
        Signature::PpcBe {
            hi_offset,
            lo_offset,
            ..
        } => format!("hi16 @ {hi_offset}, signed lo16 @ {lo_offset}"),
    }
}

fn signatures(_command: CommandSignatures) -> Result<()> {
    let mut table = Table::new();
    table.set_titles(row!["arch", "pattern", "operands"]);
    for sig in &SIGNATURES {
        // wrap long patterns
        let pattern = sig
            .pattern()
            .to_string()
            .split(' ')
            .chunks(12)
            .into_iter()
            .map(|mut chunk| chunk.join(" "))
            .join("\n");
        table.add_row(Row::new(vec![
            Cell::new(&sig.arch().to_string()),
            Cell::new(&pattern),
            Cell::new(&describe_operands(sig)),
        ]));
    }
    table.printstd();
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_maybe_hex() {
        assert_eq!(0x400000, parse_maybe_hex("0x400000").unwrap());
        assert_eq!(4096, parse_maybe_hex("4096").unwrap());
        assert!(parse_maybe_hex("0xzz").is_err());
        assert!(parse_maybe_hex("").is_err());
    }

    #[test]
    fn test_parse_args() {
        let Commands::Scan(command) = Commands::try_parse_from([
            "modsleuth",
            "scan",
            "--raw",
            "--base",
            "0x10000",
            "-a",
            "ppc-be",
            "--arch",
            "x86",
            "a.bin",
            "b.bin",
        ])
        .unwrap() else {
            panic!("expected scan command");
        };
        assert!(command.raw);
        assert_eq!(0x10000, command.base);
        assert_eq!(vec![Arch::PpcBe, Arch::X86], command.arch);
        assert_eq!(vec![PathBuf::from("a.bin"), PathBuf::from("b.bin")], command.paths);

        assert!(Commands::try_parse_from(["modsleuth", "scan"]).is_err());
        assert!(Commands::try_parse_from(["modsleuth", "scan", "-a", "arm64", "a"]).is_err());
    }

    #[test]
    fn test_scan_raw_file() {
        let dir = std::env::temp_dir().join(format!("modsleuth-test-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("section.bin");
        fs::write(
            &path,
            [
                0x3c, 0x80, 0x00, 0x2c, 0x38, 0x84, 0x80, 0x00, 0x48, 0x00, 0x00, 0x08, 0xe8, 0x84,
                0x02, 0x30, 0x7c, 0x24, 0x00, 0x00, 0x41, 0x82, 0x01, 0xa8,
            ],
        )
        .unwrap();

        let found = scan_file(&path, Some(0x2b7ff0), &ScanConfig::default()).unwrap();
        assert_eq!(1, found.len());
        assert_eq!(Arch::PpcBe, found[0].arch);
        assert_eq!(0x2b8000, found[0].address);
        assert_eq!(Some("raw"), found[0].target.as_deref());

        // not an object file
        assert!(scan_file(&path, None, &ScanConfig::default()).is_err());
        assert!(scan_file(&dir.join("missing.bin"), Some(0), &ScanConfig::default()).is_err());

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_report() {
        let path = Path::new("dir/section.bin");
        let found = || {
            vec![Found {
                section: "raw".to_owned(),
                arch: Arch::PpcBe,
                address: 0x2b8000,
                target: Some("raw".to_owned()),
            }]
        };

        // errors are reported once
        let lines = report(path, Err(anyhow::anyhow!("truncated header")), false).unwrap();
        assert_eq!(1, lines.len());
        assert!(lines[0].contains("err reading dir/section.bin: truncated header"));
        let lines = report(path, Err(anyhow::anyhow!("truncated header")), true).unwrap();
        assert_eq!(1, lines.len());

        let lines = report(path, Ok(found()), true).unwrap();
        assert_eq!(1, lines.len());
        let value: serde_json::Value = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!("dir/section.bin", value["path"]);
        assert_eq!("raw", value["section"]);
        assert_eq!("ppc-be", value["arch"]);
        assert_eq!("0x2b8000", value["address"]);
        assert_eq!("raw", value["target"]);

        assert!(report(path, Ok(vec![]), true).unwrap().is_empty());

        let lines = report(path, Ok(found()), false).unwrap();
        assert_eq!(2, lines.len());
        assert!(lines[0].contains("dir/section.bin"));
        assert!(lines[1].contains("00000000002b8000"));
        assert!(lines[1].contains("ppc-be"));

        let lines = report(path, Ok(vec![]), false).unwrap();
        assert_eq!(2, lines.len());
        assert!(lines[1].contains("not found"));
    }
}

use clap::{Arg, ArgAction, Command};

use exhume_body::digest::DigestAlgorithm;
use exhume_body::ewf::Handle;
use exhume_body::workflow::{new_abort_flag, VerifyWorkflow};

use std::io::{Read, Seek, SeekFrom};

fn parse_digest_list(raw: &str) -> Vec<DigestAlgorithm> {
    raw.split(',')
        .filter_map(|s| match s.trim().to_lowercase().as_str() {
            "md5" => Some(DigestAlgorithm::Md5),
            "sha1" => Some(DigestAlgorithm::Sha1),
            "sha256" => Some(DigestAlgorithm::Sha256),
            _ => None,
        })
        .collect()
}

fn run_info(file_path: &str) {
    let handle = match Handle::open(file_path) {
        Ok(h) => h,
        Err(err) => {
            eprintln!("Error: {err}");
            std::process::exit(1);
        }
    };
    handle.print_info();
}

fn run_read(file_path: &str, size: usize, offset: u64, verbose: bool) {
    let mut handle = match Handle::open(file_path) {
        Ok(h) => h,
        Err(err) => {
            eprintln!("Error: {err}");
            std::process::exit(1);
        }
    };
    if verbose {
        println!("------------------------------------------------------------");
        println!("Selected reader: EWF");
        println!("Description: Expert Witness Format.");
        println!("------------------------------------------------------------");
    }
    if let Err(err) = handle.seek(SeekFrom::Start(offset)) {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
    let mut buf = vec![0u8; size];
    let read = match handle.read(&mut buf) {
        Ok(n) => n,
        Err(err) => {
            eprintln!("Error: {err}");
            std::process::exit(1);
        }
    };
    println!("{}", String::from_utf8_lossy(&buf[..read]));
}

fn run_verify(file_path: &str, digests: &str, verbose: bool) {
    let mut handle = match Handle::open(file_path) {
        Ok(h) => h,
        Err(err) => {
            eprintln!("Error: {err}");
            std::process::exit(1);
        }
    };
    let algorithms = parse_digest_list(digests);
    let mut workflow = VerifyWorkflow::new(&mut handle, algorithms, new_abort_flag());
    match workflow.run() {
        Ok(report) => {
            if verbose {
                println!("Chunks checked: {}", report.chunks_checked);
                println!("Corrupted chunks: {}", report.corrupted_chunks.len());
            }
            for (algorithm, value) in &report.digests {
                println!("{}: {}", algorithm.label(), value);
            }
            if !report.is_clean() {
                eprintln!("Verification found integrity problems.");
                std::process::exit(2);
            }
            println!("Verification passed.");
        }
        Err(err) => {
            eprintln!("Error: {err}");
            std::process::exit(1);
        }
    }
}

fn main() {
    env_logger::init();

    let matches = Command::new("exhume_body")
        .version("0.4.0")
        .author("ForensicXlab")
        .about("Format-agnostic data extraction from disk images, including an EWF/EnCase acquisition, verification and export engine.")
        .subcommand(
            Command::new("info")
                .about("Prints the container's media and header information.")
                .arg(
                    Arg::new("input")
                        .short('i')
                        .long("input")
                        .required(true)
                        .help("The path to one segment of the image."),
                ),
        )
        .subcommand(
            Command::new("read")
                .about("Reads a slice of the decompressed media and prints it.")
                .arg(Arg::new("input").short('i').long("input").required(true))
                .arg(
                    Arg::new("size")
                        .short('s')
                        .long("size")
                        .value_parser(clap::value_parser!(usize))
                        .required(true)
                        .help("The size (in bytes) to read."),
                )
                .arg(
                    Arg::new("offset")
                        .short('o')
                        .long("offset")
                        .value_parser(clap::value_parser!(u64))
                        .default_value("0")
                        .help("Read at a specific offset."),
                )
                .arg(Arg::new("verbose").short('v').long("verbose").action(ArgAction::SetTrue)),
        )
        .subcommand(
            Command::new("verify")
                .about("Re-hashes the media and checks it against the container's stored digests.")
                .arg(Arg::new("input").short('i').long("input").required(true))
                .arg(
                    Arg::new("digests")
                        .short('d')
                        .long("digests")
                        .default_value("md5,sha1")
                        .help("Comma-separated digests to compute: md5, sha1, sha256."),
                )
                .arg(Arg::new("verbose").short('v').long("verbose").action(ArgAction::SetTrue)),
        )
        .get_matches();

    match matches.subcommand() {
        Some(("info", sub)) => {
            run_info(sub.get_one::<String>("input").unwrap());
        }
        Some(("read", sub)) => {
            run_read(
                sub.get_one::<String>("input").unwrap(),
                *sub.get_one::<usize>("size").unwrap(),
                *sub.get_one::<u64>("offset").unwrap(),
                sub.get_flag("verbose"),
            );
        }
        Some(("verify", sub)) => {
            run_verify(
                sub.get_one::<String>("input").unwrap(),
                sub.get_one::<String>("digests").unwrap(),
                sub.get_flag("verbose"),
            );
        }
        _ => {
            eprintln!("No subcommand given. Use --help to see available subcommands.");
            std::process::exit(1);
        }
    }
}

//! apfilter CLI
//!
//! Operator tool for gfwlist-style rule lists: query URLs against a list,
//! inspect index tier occupancy, and time the match path.

use std::fs;
use std::time::Instant;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use clap::{Parser, Subcommand};

use apf_core::{RuleIndex, Verdict, KEYLEN};

#[derive(Parser)]
#[command(name = "apf-cli")]
#[command(about = "AutoProxy filter list query and diagnostics tool")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Match URLs against a rule list and print the routing decision
    Check {
        /// Rule list file (plaintext or base64-wrapped gfwlist)
        #[arg(short, long)]
        list: String,

        /// URLs (or bare host:port pairs) to check
        #[arg(required = true)]
        urls: Vec<String>,

        /// Only consult the domain tiers
        #[arg(long)]
        domain_only: bool,
    },

    /// Print tier sizes and bucket occupancy for a rule list
    Info {
        /// Rule list file
        #[arg(short, long)]
        list: String,

        /// How many of the heaviest buckets to show
        #[arg(long, default_value_t = 20)]
        top: usize,
    },

    /// Time repeated queries of one URL
    Bench {
        /// Rule list file
        #[arg(short, long)]
        list: String,

        /// URL to query
        #[arg(short, long, default_value = "http://www.163.com")]
        url: String,

        /// Number of queries
        #[arg(short = 'n', long, default_value_t = 10_000)]
        iterations: u32,
    },
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Check {
            list,
            urls,
            domain_only,
        } => cmd_check(&list, &urls, domain_only),
        Commands::Info { list, top } => cmd_info(&list, top),
        Commands::Bench {
            list,
            url,
            iterations,
        } => cmd_bench(&list, &url, iterations),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn load_index(path: &str) -> Result<RuleIndex, String> {
    let start = Instant::now();
    let raw = fs::read_to_string(path).map_err(|e| format!("Failed to read '{}': {}", path, e))?;
    let text = decode_list(&raw).map_err(|e| format!("Failed to decode '{}': {}", path, e))?;

    let index = RuleIndex::from_lines(text.lines());
    println!(
        "Loaded {} rules from '{}' in {:.1}ms",
        index.stats().total_rules,
        path,
        start.elapsed().as_secs_f64() * 1000.0
    );
    Ok(index)
}

/// gfwlist payloads ship base64-wrapped; a decoded list always carries `!`
/// comment lines, so their absence means the file is still packed.
fn decode_list(raw: &str) -> Result<String, String> {
    if raw.contains('!') {
        return Ok(raw.to_string());
    }
    let packed: String = raw.split_whitespace().collect();
    let bytes = BASE64.decode(packed.as_bytes()).map_err(|e| e.to_string())?;
    String::from_utf8(bytes).map_err(|e| e.to_string())
}

fn cmd_check(list: &str, urls: &[String], domain_only: bool) -> Result<(), String> {
    let index = load_index(list)?;

    for url in urls {
        let verdict = index.match_url(url, None, domain_only);
        let route = match verdict {
            Verdict::Blocked => "proxy",
            Verdict::Excluded => "direct (exception)",
            Verdict::Unmatched => "direct",
        };
        println!("{url}: {route}");
    }
    Ok(())
}

fn cmd_info(list: &str, top: usize) -> Result<(), String> {
    let index = load_index(list)?;
    let stats = index.stats();

    println!();
    println!("Tiers:");
    println!("  Block domains:     {}", stats.domains);
    println!("  Exception domains: {}", stats.exclude_domains);
    println!("  URL prefixes:      {}", stats.url_prefixes);
    println!(
        "  Keyed buckets:     {} ({} rules)",
        stats.keyed_buckets, stats.keyed_rules
    );
    println!("  Linear block:      {}", stats.linear_matches);
    println!("  Linear exception:  {}", stats.linear_excludes);
    println!();
    println!("  O(1) lookups:      {}", stats.constant_time());
    println!("  O(n) scans:        {}", stats.linear_time());
    println!("  KEYLEN:            {}", KEYLEN);

    let buckets = index.heaviest_buckets(top);
    if !buckets.is_empty() {
        println!();
        println!("Heaviest buckets:");
        for (key, count) in buckets {
            println!("  {key:?}: {count}");
        }
    }
    Ok(())
}

fn cmd_bench(list: &str, url: &str, iterations: u32) -> Result<(), String> {
    let index = load_index(list)?;

    let verdict = index.match_url(url, None, false);
    let start = Instant::now();
    for _ in 0..iterations {
        index.match_url(url, None, false);
    }
    let elapsed = start.elapsed();

    println!("{url}: {verdict:?}");
    println!(
        "{} queries in {:.1}ms ({:.2}us/query)",
        iterations,
        elapsed.as_secs_f64() * 1000.0,
        elapsed.as_secs_f64() * 1e6 / f64::from(iterations)
    );
    Ok(())
}

//! Command-line flags

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "rawsend")]
#[command(about = "Replay raw HTTP request files through a rotating proxy pool", long_about = None)]
pub struct Cli {
    /// Ignore the proxy file and send directly
    #[arg(long)]
    pub direct: bool,

    /// Path to the proxy list file (default: RAWSEND_PROXIES_FILE)
    #[arg(long, value_name = "PATH")]
    pub proxy_file: Option<PathBuf>,

    /// Dump responses: without FILE to the console, with FILE appended to
    /// responses/FILE (or an absolute path)
    #[arg(long, value_name = "FILE", num_args = 0..=1)]
    pub response: Option<Option<String>>,

    /// Check every proxy, keep the working ones and exit
    #[arg(long)]
    pub check: bool,

    /// Parallel workers (default: RAWSEND_WORKERS)
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u16).range(1..))]
    pub workers: Option<u16>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["rawsend"]).unwrap();
        assert!(!cli.direct);
        assert!(!cli.check);
        assert!(cli.proxy_file.is_none());
        assert!(cli.response.is_none());
        assert!(cli.workers.is_none());
    }

    #[test]
    fn test_response_flag_forms() {
        let cli = Cli::try_parse_from(["rawsend", "--response"]).unwrap();
        assert_eq!(cli.response, Some(None));

        let cli = Cli::try_parse_from(["rawsend", "--response", "dump.txt"]).unwrap();
        assert_eq!(cli.response, Some(Some("dump.txt".to_string())));
    }

    #[test]
    fn test_all_flags() {
        let cli = Cli::try_parse_from([
            "rawsend",
            "--direct",
            "--check",
            "--proxy-file",
            "lists/p.txt",
            "--workers",
            "4",
        ])
        .unwrap();
        assert!(cli.direct);
        assert!(cli.check);
        assert_eq!(cli.proxy_file, Some(PathBuf::from("lists/p.txt")));
        assert_eq!(cli.workers, Some(4));
    }

    #[test]
    fn test_zero_workers_rejected() {
        assert!(Cli::try_parse_from(["rawsend", "--workers", "0"]).is_err());
    }
}

use anyhow::{anyhow, Context, Result};
use clap::Args;
use std::collections::HashSet;
use std::fs;
use std::ops::Range;
use std::path::PathBuf;
use tracing::warn;

/// Popular destinations surveyed by `--builtin`.
pub const BUILTIN_DESTINATIONS: [&str; 30] = [
    "google.com",
    "mail.ru",
    "microsoft.com",
    "facebook.com",
    "apple.com",
    "amazonaws.com",
    "dzen.ru",
    "youtube.com",
    "googleapis.com",
    "cloudflare.com",
    "akamai.net",
    "instagram.com",
    "twitter.com",
    "akamaiedge.net",
    "office.com",
    "gstatic.com",
    "azure.com",
    "linkedin.com",
    "live.com",
    "akadns.net",
    "googlevideo.com",
    "ax-msedge.net",
    "googletagmanager.com",
    "fbcdn.net",
    "apple-dns.net",
    "windowsupdate.com",
    "amazon.com",
    "workers.dev",
    "wikipedia.org",
    "microsoftonline.com",
];

#[derive(Args, Debug, Clone, Default)]
pub struct TargetArgs {
    /// Destination list: one name per line, or a ranked `rank,domain` CSV.
    #[arg(long)]
    pub targets: Option<PathBuf>,

    #[arg(long = "target")]
    pub target_list: Vec<String>,

    /// Add the built-in list of popular destinations.
    #[arg(long)]
    pub builtin: bool,

    /// Keep only list positions in these ranges, e.g. `0..500,10000..10500`.
    #[arg(long)]
    pub select: Option<String>,
}

impl TargetArgs {
    pub fn collect(&self) -> Result<Vec<String>> {
        let mut targets: Vec<String> = Vec::new();

        if let Some(path) = &self.targets {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("failed to read targets file {path:?}"))?;
            targets.extend(parse_target_lines(&contents));
        }
        if self.builtin {
            targets.extend(BUILTIN_DESTINATIONS.iter().map(|name| name.to_string()));
        }
        targets.extend(
            self.target_list
                .iter()
                .map(|name| name.trim().to_string())
                .filter(|name| !name.is_empty()),
        );

        if let Some(selection) = &self.select {
            let ranges = parse_ranges(selection)?;
            targets = select(targets, &ranges);
        }
        let duplicates = dedup_in_order(&mut targets);
        if duplicates > 0 {
            warn!(duplicates, "dropped repeated destinations");
        }

        if targets.is_empty() {
            return Err(anyhow!(
                "no targets provided (use --targets, --target or --builtin)"
            ));
        }
        Ok(targets)
    }
}

/// Accepts plain lists and ranked CSV lists. A line with a comma yields its
/// second field, so `1,google.com` becomes `google.com`.
pub fn parse_target_lines(contents: &str) -> Vec<String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let name = match line.split_once(',') {
                Some((_, rest)) => rest.split(',').next().unwrap_or_default(),
                None => line,
            };
            let name = name.trim();
            (!name.is_empty()).then(|| name.to_string())
        })
        .collect()
}

pub fn parse_ranges(selection: &str) -> Result<Vec<Range<usize>>> {
    selection
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            let (start, end) = part
                .split_once("..")
                .ok_or_else(|| anyhow!("invalid range {part:?} (expected START..END)"))?;
            let start: usize = start
                .trim()
                .parse()
                .with_context(|| format!("invalid range start in {part:?}"))?;
            let end: usize = end
                .trim()
                .parse()
                .with_context(|| format!("invalid range end in {part:?}"))?;
            if end <= start {
                return Err(anyhow!("empty range {part:?}"));
            }
            Ok(start..end)
        })
        .collect()
}

/// Drops every repeat of a destination after its first appearance, so each
/// destination is traced once. Returns how many entries were removed.
pub fn dedup_in_order(targets: &mut Vec<String>) -> usize {
    let before = targets.len();
    let mut seen = HashSet::new();
    targets.retain(|name| seen.insert(name.clone()));
    before - targets.len()
}

/// Keeps entries whose zero-based position falls in any range, in list order.
pub fn select(targets: Vec<String>, ranges: &[Range<usize>]) -> Vec<String> {
    targets
        .into_iter()
        .enumerate()
        .filter(|(index, _)| ranges.iter().any(|range| range.contains(index)))
        .map(|(_, name)| name)
        .collect()
}

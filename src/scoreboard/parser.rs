//! Scoreboard title parser.
//!
//! CREX-style pages put the whole live state into the `<title>`:
//!
//! ```text
//! IND U19 175-3 (25.5) (Abhigyan Kundu 46(55), Vedant Trivedi 53(59)) vs Australia U19 225-9 ((50.0)) Final live | ...
//! ```
//!
//! Each field is pulled out by its own matcher over the immutable title. A
//! matcher that finds nothing leaves its placeholder in place, so a layout
//! change on the provider's side degrades the snapshot field by field instead
//! of failing the whole fetch.

use chrono::{DateTime, Utc};
use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

use super::overs::{overs_to_decimal, round2};
use crate::models::{BatsmanLine, MatchSnapshot, Team2Status, TeamLine};

const SECTION_DELIMITER: &str = " | ";
const TEAMS_SEPARATOR: &str = " vs ";

static RE_SCORE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d+)-(\d+)").unwrap());
static RE_LEADING_NAME: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^([^\d]+)").unwrap());
static RE_TEAM1_OVERS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\((\d+\.\d+)\)").unwrap());
static RE_TEAM2_OVERS_DOUBLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\(\(\s*(\d+(?:\.\d+)?)\s*\)\)").unwrap());
static RE_TEAM2_OVERS_SINGLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\((\d+(?:\.\d+)?)\)").unwrap());
static RE_BATSMAN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.+?)\s+(\d+)\*?\((\d+)\)$").unwrap());
static RE_BARE_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*\d+(?:\.\d+)?\s*$").unwrap());

/// Turns scoreboard titles into [`MatchSnapshot`]s.
#[derive(Debug, Clone, Copy)]
pub struct TitleParser {
    /// Innings length used for required-rate projections (20.0 for T20)
    format_overs: f64,
}

impl TitleParser {
    pub fn new(format_overs: f64) -> Self {
        TitleParser { format_overs }
    }

    pub fn format_overs(&self) -> f64 {
        self.format_overs
    }

    /// Parse a title, stamping the snapshot with the current time.
    pub fn parse(&self, title: &str) -> MatchSnapshot {
        self.parse_at(title, Utc::now())
    }

    /// Parse a title with an explicit capture time. Never fails: unmatched
    /// fields keep their placeholders.
    pub fn parse_at(&self, title: &str, captured_at: DateTime<Utc>) -> MatchSnapshot {
        let mut snap = MatchSnapshot::placeholder(title, captured_at);

        let score_part = title
            .split_once(SECTION_DELIMITER)
            .map(|(head, _)| head)
            .unwrap_or(title);
        snap.live_score_summary = score_part.to_string();
        debug!("Parsing score part: {}", score_part);

        let Some((team1_side, team2_side)) = score_part.split_once(TEAMS_SEPARATOR) else {
            debug!("No '{}' separator in title, keeping placeholders", TEAMS_SEPARATOR.trim());
            return snap;
        };
        let team1_side = team1_side.trim();
        let team2_side = team2_side.trim();

        apply_name_and_score(&mut snap.team1, team1_side);
        if let Some(overs) = capture(&RE_TEAM1_OVERS, team1_side) {
            snap.team1.overs = overs.to_string();
        }
        snap.striker_pair = parse_striker_pair(team1_side);

        apply_name_and_score(&mut snap.team2, team2_side);
        if let Some(overs) = capture(&RE_TEAM2_OVERS_DOUBLE, team2_side)
            .or_else(|| capture(&RE_TEAM2_OVERS_SINGLE, team2_side))
        {
            snap.team2.overs = overs.to_string();
        }

        if snap.team2.runs > 0 {
            snap.team2_status = Team2Status::InProgressOrComplete {
                label: format!(
                    "{}-{} ({} overs)",
                    snap.team2.runs, snap.team2.wickets, snap.team2.overs
                ),
            };
        }

        self.apply_run_rates(&mut snap);

        debug!(
            "Parsed: {} {}-{} ({}) vs {} {}-{} ({}), {}",
            snap.team1.name,
            snap.team1.runs,
            snap.team1.wickets,
            snap.team1.overs,
            snap.team2.name,
            snap.team2.runs,
            snap.team2.wickets,
            snap.team2.overs,
            snap.run_rate.label()
        );
        snap
    }

    fn apply_run_rates(&self, snap: &mut MatchSnapshot) {
        let team1_overs = overs_to_decimal(&snap.team1.overs);
        if team1_overs <= 0.0 {
            return;
        }
        snap.run_rate.current = round2(snap.team1.runs as f64 / team1_overs);

        if snap.team2.runs == 0 {
            return;
        }
        let target = u64::from(snap.team2.runs) + 1;
        let runs_needed = target as i64 - i64::from(snap.team1.runs);
        let overs_left = self.format_overs - team1_overs;

        if snap.team1.runs > 0 && overs_left > 0.0 && runs_needed > 0 {
            snap.run_rate.required = Some(round2(runs_needed as f64 / overs_left));
        }

        snap.status_line = format!("Target: {}", target);
        snap.live_score_summary = format!(
            "{} {}-{} ({}) chasing {}",
            snap.team1.name, snap.team1.runs, snap.team1.wickets, snap.team1.overs, target
        );
    }
}

fn capture<'t>(re: &Regex, text: &'t str) -> Option<&'t str> {
    re.captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// Fill team name, runs and wickets from one side of the title.
///
/// The name runs up to the score pair when there is one so suffixes like
/// "U19" survive; otherwise it is the leading run of non-digits.
fn apply_name_and_score(team: &mut TeamLine, side: &str) {
    let score = RE_SCORE.captures(side);

    let name = match score.as_ref().and_then(|c| c.get(0)) {
        Some(m) => side[..m.start()].trim(),
        None => capture(&RE_LEADING_NAME, side).unwrap_or("").trim(),
    };
    if !name.is_empty() {
        team.name = name.to_string();
    }

    if let Some(caps) = score {
        let runs = caps.get(1).and_then(|m| m.as_str().parse::<u32>().ok());
        let wickets = caps.get(2).and_then(|m| m.as_str().parse::<u32>().ok());
        if let (Some(runs), Some(wickets)) = (runs, wickets) {
            team.runs = runs;
            team.wickets = wickets;
        }
    }
}

/// Top-level parenthesised groups, with nested parentheses kept intact.
fn paren_groups(text: &str) -> Vec<&str> {
    let mut groups = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (i, c) in text.char_indices() {
        match c {
            '(' => {
                if depth == 0 {
                    start = i + 1;
                }
                depth += 1;
            }
            ')' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    groups.push(&text[start..i]);
                }
            }
            _ => {}
        }
    }
    groups
}

fn parse_striker_pair(team1_side: &str) -> [Option<BatsmanLine>; 2] {
    let mut pair: [Option<BatsmanLine>; 2] = [None, None];

    // The overs group "(25.5)" comes first; the batsmen group is the first
    // one that is not a bare number.
    let Some(group) = paren_groups(team1_side)
        .into_iter()
        .find(|g| !RE_BARE_NUMBER.is_match(g))
    else {
        return pair;
    };
    debug!("Batsmen group: {}", group);

    let batsmen = group.split(',').filter_map(|entry| parse_batsman(entry.trim()));
    for (slot, batsman) in pair.iter_mut().zip(batsmen) {
        *slot = Some(batsman);
    }
    pair
}

fn parse_batsman(entry: &str) -> Option<BatsmanLine> {
    let caps = RE_BATSMAN.captures(entry)?;
    let name = caps.get(1)?.as_str().trim().to_string();
    let runs: u32 = caps.get(2)?.as_str().parse().ok()?;
    let balls_faced: u32 = caps.get(3)?.as_str().parse().ok()?;
    let strike_rate = if balls_faced > 0 {
        Some(round2(runs as f64 * 100.0 / balls_faced as f64))
    } else {
        None
    };
    Some(BatsmanLine {
        name,
        runs,
        balls_faced,
        strike_rate,
    })
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const TEAM1_PLACEHOLDER: &str = "Team 1";
pub const TEAM2_PLACEHOLDER: &str = "Team 2";
pub const OVERS_PLACEHOLDER: &str = "0.0";
pub const STATUS_LIVE: &str = "Live";

/// One side's score line as shown on the scoreboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamLine {
    pub name: String,
    pub runs: u32,
    pub wickets: u32,
    /// Overs in display form, e.g. "25.5" (25 overs and 5 balls)
    pub overs: String,
}

impl TeamLine {
    pub fn placeholder(name: &str) -> Self {
        TeamLine {
            name: name.to_string(),
            runs: 0,
            wickets: 0,
            overs: OVERS_PLACEHOLDER.to_string(),
        }
    }
}

/// State of the second (opponent) innings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Team2Status {
    YetToBat,
    /// `label` reads "225-9 (50.0 overs)"
    InProgressOrComplete { label: String },
}

impl Team2Status {
    pub fn label(&self) -> &str {
        match self {
            Team2Status::YetToBat => "Yet to bat",
            Team2Status::InProgressOrComplete { label } => label,
        }
    }
}

/// A batsman at the crease.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatsmanLine {
    pub name: String,
    pub runs: u32,
    pub balls_faced: u32,
    /// Runs per 100 balls, only set once a ball has been faced
    pub strike_rate: Option<f64>,
}

impl BatsmanLine {
    pub fn strike_rate_label(&self) -> String {
        format!("{:.2}", self.strike_rate.unwrap_or(0.0))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRateSummary {
    pub current: f64,
    /// Present only while team 1 is chasing a reachable target
    pub required: Option<f64>,
}

impl RunRateSummary {
    /// "CRR: 6.77" or "CRR: 6.77 | RRR: 8.10"
    pub fn label(&self) -> String {
        match self.required {
            Some(rrr) => format!("CRR: {:.2} | RRR: {:.2}", self.current, rrr),
            None => format!("CRR: {:.2}", self.current),
        }
    }
}

/// Structured match state parsed from one scoreboard title.
///
/// Replaced wholesale on every successful fetch; fields never carry over
/// from a previous snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchSnapshot {
    pub raw_title: String,
    pub team1: TeamLine,
    pub team2: TeamLine,
    pub team2_status: Team2Status,
    pub striker_pair: [Option<BatsmanLine>; 2],
    pub run_rate: RunRateSummary,
    /// "Live" or "Target: N"
    pub status_line: String,
    pub live_score_summary: String,
    pub captured_at: DateTime<Utc>,
}

impl MatchSnapshot {
    /// All-placeholder snapshot for a title that yielded nothing usable.
    pub fn placeholder(raw_title: &str, captured_at: DateTime<Utc>) -> Self {
        MatchSnapshot {
            raw_title: raw_title.to_string(),
            team1: TeamLine::placeholder(TEAM1_PLACEHOLDER),
            team2: TeamLine::placeholder(TEAM2_PLACEHOLDER),
            team2_status: Team2Status::YetToBat,
            striker_pair: [None, None],
            run_rate: RunRateSummary {
                current: 0.0,
                required: None,
            },
            status_line: STATUS_LIVE.to_string(),
            live_score_summary: raw_title.to_string(),
            captured_at,
        }
    }

    /// Wire form served to HTTP and SSE clients: the record plus its derived labels.
    pub fn to_json(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self).unwrap_or(serde_json::Value::Null);
        if let Some(obj) = value.as_object_mut() {
            obj.insert(
                "run_rate_label".into(),
                serde_json::Value::String(self.run_rate.label()),
            );
            obj.insert(
                "team2_status_label".into(),
                serde_json::Value::String(self.team2_status.label().to_string()),
            );
            let strike_rates: Vec<serde_json::Value> = self
                .striker_pair
                .iter()
                .map(|b| match b {
                    Some(b) => serde_json::Value::String(b.strike_rate_label()),
                    None => serde_json::Value::Null,
                })
                .collect();
            obj.insert(
                "strike_rate_labels".into(),
                serde_json::Value::Array(strike_rates),
            );
        }
        value
    }
}

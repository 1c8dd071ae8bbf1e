use std::collections::HashMap;

use crate::types::{Market, Score, Selection};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OneXTwoPick {
    Home,
    Draw,
    Away,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BttsPick {
    Yes,
    No,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GoalLine {
    OneAndHalf,
    TwoAndHalf,
}

impl GoalLine {
    // Lines are fixed at 1.5 and 2.5; "over 1.5" means total >= 2.
    fn over_from(&self) -> u32 {
        match self {
            GoalLine::OneAndHalf => 2,
            GoalLine::TwoAndHalf => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoubleChancePick {
    HomeOrDraw,
    DrawOrAway,
    HomeOrAway,
}

/// A parsed pick. Free-form pick tokens are rejected at this boundary;
/// evaluation below is exhaustive over these variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pick {
    OneXTwo(OneXTwoPick),
    Btts(BttsPick),
    OverUnder { line: GoalLine, over: bool },
    DoubleChance(DoubleChancePick),
    /// Quoted in the odds feed but has no settlement rule (no half-time
    /// score is tracked), so it always evaluates as lost.
    HalfTimeFullTime,
    CorrectScore { home: u32, away: u32 },
}

impl Pick {
    pub fn parse(market: Market, token: &str) -> Option<Pick> {
        let t = token.trim().to_ascii_lowercase();
        if t.is_empty() {
            return None;
        }
        match market {
            Market::OneXTwo => parse_one_x_two(&t).map(Pick::OneXTwo),
            Market::Btts => parse_btts(&t).map(Pick::Btts),
            Market::OverUnder => parse_over_under(&t),
            Market::DoubleChance => parse_double_chance(&t).map(Pick::DoubleChance),
            Market::HalfTimeFullTime => Some(Pick::HalfTimeFullTime),
            Market::CorrectScore => parse_correct_score(&t),
        }
    }
}

fn parse_one_x_two(t: &str) -> Option<OneXTwoPick> {
    match t {
        "home" | "home win" | "1" => Some(OneXTwoPick::Home),
        "draw" | "x" => Some(OneXTwoPick::Draw),
        "away" | "away win" | "2" => Some(OneXTwoPick::Away),
        _ => None,
    }
}

fn parse_btts(t: &str) -> Option<BttsPick> {
    // Tokens arrive as "bttsYes"/"bttsNo" or plain "yes"/"no".
    if t.contains("yes") {
        Some(BttsPick::Yes)
    } else if t.contains("no") {
        Some(BttsPick::No)
    } else {
        None
    }
}

fn parse_over_under(t: &str) -> Option<Pick> {
    let over = if t.contains("over") {
        true
    } else if t.contains("under") {
        false
    } else {
        return None;
    };
    let digits: String = t.chars().filter(|c| c.is_ascii_digit()).collect();
    let line = match digits.as_str() {
        "15" => GoalLine::OneAndHalf,
        "25" => GoalLine::TwoAndHalf,
        _ => return None,
    };
    Some(Pick::OverUnder { line, over })
}

fn parse_double_chance(t: &str) -> Option<DoubleChancePick> {
    let core: String = t.chars().filter(|c| c.is_ascii_alphanumeric()).collect();
    let core = core.strip_prefix("dc").unwrap_or(&core);
    match core {
        "1x" | "x1" => Some(DoubleChancePick::HomeOrDraw),
        "x2" | "2x" => Some(DoubleChancePick::DrawOrAway),
        "12" => Some(DoubleChancePick::HomeOrAway),
        _ => None,
    }
}

fn parse_correct_score(t: &str) -> Option<Pick> {
    // Token encodes exactly two digits, e.g. "cs23" for 2-3. Double-digit
    // scorelines are not representable in this token format.
    let digits: Vec<u32> = t.chars().filter_map(|c| c.to_digit(10)).collect();
    match digits.as_slice() {
        [h, a] => Some(Pick::CorrectScore { home: *h, away: *a }),
        _ => None,
    }
}

/// Pure win/loss rule per market. Total: every parsed pick maps to a
/// definite boolean for any final score.
pub fn evaluate(pick: Pick, score: Score) -> bool {
    let (home, away) = (score.home, score.away);
    match pick {
        Pick::OneXTwo(p) => match p {
            OneXTwoPick::Home => home > away,
            OneXTwoPick::Draw => home == away,
            OneXTwoPick::Away => away > home,
        },
        Pick::Btts(p) => {
            let both = home > 0 && away > 0;
            match p {
                BttsPick::Yes => both,
                BttsPick::No => !both,
            }
        }
        Pick::OverUnder { line, over } => {
            let hit = score.total() >= line.over_from();
            if over { hit } else { !hit }
        }
        Pick::DoubleChance(p) => match p {
            DoubleChancePick::HomeOrDraw => home >= away,
            DoubleChancePick::DrawOrAway => away >= home,
            DoubleChancePick::HomeOrAway => home != away,
        },
        Pick::HalfTimeFullTime => false,
        Pick::CorrectScore { home: h, away: a } => home == h && away == a,
    }
}

/// Evaluate a raw stored token. Unparseable tokens settle as a loss
/// rather than failing the whole bet's settlement.
pub fn evaluate_token(market: Market, token: &str, score: Score) -> bool {
    match Pick::parse(market, token) {
        Some(pick) => evaluate(pick, score),
        None => {
            tracing::warn!(market = ?market, token, "unrecognized pick token, settling as loss");
            false
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionOutcome {
    Pending,
    Won,
    Lost,
}

pub fn selection_outcome(sel: &Selection, final_score: Option<Score>) -> SelectionOutcome {
    match final_score {
        None => SelectionOutcome::Pending,
        Some(score) => {
            if evaluate_token(sel.market, &sel.pick, score) {
                SelectionOutcome::Won
            } else {
                SelectionOutcome::Lost
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BetOutcome {
    Won,
    Lost,
    Void,
}

/// Aggregate per-leg results into a bet-level outcome.
///
/// A known-lost leg is decisive before resolution is considered, so a
/// parlay with one lost leg settles Lost without waiting for the rest.
pub fn aggregate(selections: &[Selection], scores: &HashMap<String, Score>) -> BetOutcome {
    let mut unresolved = false;
    for sel in selections {
        match selection_outcome(sel, scores.get(&sel.match_id).copied()) {
            SelectionOutcome::Lost => return BetOutcome::Lost,
            SelectionOutcome::Pending => unresolved = true,
            SelectionOutcome::Won => {}
        }
    }
    if unresolved {
        BetOutcome::Void
    } else {
        BetOutcome::Won
    }
}

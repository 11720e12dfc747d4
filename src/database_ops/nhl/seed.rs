//! Last-resort team table, used only when the remote team fetch yields nothing
//! and `NHL_FALLBACK_TEAMS` is on. Rows go through the regular team mapper.

use serde_json::{json, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeedTeam {
    pub id: i64,
    pub abbreviation: &'static str,
    pub name: &'static str,
    pub division: &'static str,
    pub conference: &'static str,
    pub active: bool,
}

pub const DIVISIONS: &[(i64, &str)] = &[
    (15, "Pacific"),
    (16, "Central"),
    (17, "Atlantic"),
    (18, "Metropolitan"),
];

pub const CONFERENCES: &[(i64, &str)] = &[(5, "Western"), (6, "Eastern")];

const fn team(
    id: i64,
    abbreviation: &'static str,
    name: &'static str,
    division: &'static str,
    conference: &'static str,
) -> SeedTeam {
    SeedTeam {
        id,
        abbreviation,
        name,
        division,
        conference,
        active: true,
    }
}

pub const FALLBACK_TEAMS: &[SeedTeam] = &[
    team(1, "NJD", "New Jersey Devils", "Metropolitan", "Eastern"),
    team(2, "NYI", "New York Islanders", "Metropolitan", "Eastern"),
    team(3, "NYR", "New York Rangers", "Metropolitan", "Eastern"),
    team(4, "PHI", "Philadelphia Flyers", "Metropolitan", "Eastern"),
    team(5, "PIT", "Pittsburgh Penguins", "Metropolitan", "Eastern"),
    team(6, "BOS", "Boston Bruins", "Atlantic", "Eastern"),
    team(7, "BUF", "Buffalo Sabres", "Atlantic", "Eastern"),
    team(8, "MTL", "Montreal Canadiens", "Atlantic", "Eastern"),
    team(9, "OTT", "Ottawa Senators", "Atlantic", "Eastern"),
    team(10, "TOR", "Toronto Maple Leafs", "Atlantic", "Eastern"),
    team(12, "CAR", "Carolina Hurricanes", "Metropolitan", "Eastern"),
    team(13, "FLA", "Florida Panthers", "Atlantic", "Eastern"),
    team(14, "TBL", "Tampa Bay Lightning", "Atlantic", "Eastern"),
    team(15, "WSH", "Washington Capitals", "Metropolitan", "Eastern"),
    team(16, "CHI", "Chicago Blackhawks", "Central", "Western"),
    team(17, "DET", "Detroit Red Wings", "Atlantic", "Eastern"),
    team(18, "NSH", "Nashville Predators", "Central", "Western"),
    team(19, "STL", "St. Louis Blues", "Central", "Western"),
    team(20, "CGY", "Calgary Flames", "Pacific", "Western"),
    team(21, "COL", "Colorado Avalanche", "Central", "Western"),
    team(22, "EDM", "Edmonton Oilers", "Pacific", "Western"),
    team(23, "VAN", "Vancouver Canucks", "Pacific", "Western"),
    team(24, "ANA", "Anaheim Ducks", "Pacific", "Western"),
    team(25, "DAL", "Dallas Stars", "Central", "Western"),
    team(26, "LAK", "Los Angeles Kings", "Pacific", "Western"),
    team(28, "SJS", "San Jose Sharks", "Pacific", "Western"),
    team(29, "CBJ", "Columbus Blue Jackets", "Metropolitan", "Eastern"),
    team(30, "MIN", "Minnesota Wild", "Central", "Western"),
    team(52, "WPG", "Winnipeg Jets", "Central", "Western"),
    SeedTeam {
        active: false,
        ..team(53, "ARI", "Arizona Coyotes", "Central", "Western")
    },
    team(54, "VGK", "Vegas Golden Knights", "Pacific", "Western"),
    team(55, "SEA", "Seattle Kraken", "Pacific", "Western"),
    team(59, "UTA", "Utah Hockey Club", "Central", "Western"),
];

/// Franchises that relocated out of the league's current team list but still
/// appear in historical schedules. Never part of the fallback listing.
pub const RELOCATED_TEAMS: &[SeedTeam] = &[SeedTeam {
    active: false,
    ..team(11, "ATL", "Atlanta Thrashers", "Southeast", "Eastern")
}];

pub fn division_id(name: &str) -> Option<i64> {
    DIVISIONS
        .iter()
        .find(|(_, n)| n.eq_ignore_ascii_case(name.trim()))
        .map(|(id, _)| *id)
}

pub fn conference_id(name: &str) -> Option<i64> {
    CONFERENCES
        .iter()
        .find(|(_, n)| n.eq_ignore_ascii_case(name.trim()))
        .map(|(id, _)| *id)
}

pub fn seed_by_code(code: &str) -> Option<&'static SeedTeam> {
    FALLBACK_TEAMS
        .iter()
        .find(|t| t.abbreviation.eq_ignore_ascii_case(code.trim()))
}

pub fn seed_by_id(id: i64) -> Option<&'static SeedTeam> {
    FALLBACK_TEAMS.iter().find(|t| t.id == id)
}

/// Current or relocated franchise by id.
pub fn franchise_by_id(id: i64) -> Option<&'static SeedTeam> {
    seed_by_id(id).or_else(|| RELOCATED_TEAMS.iter().find(|t| t.id == id))
}

impl SeedTeam {
    /// Render in the legacy team document shape.
    pub fn document(&self) -> Value {
        json!({
            "id": self.id,
            "name": self.name,
            "abbreviation": self.abbreviation,
            "division": { "id": division_id(self.division), "name": self.division },
            "conference": { "id": conference_id(self.conference), "name": self.conference },
            "active": self.active,
        })
    }
}

pub fn seed_documents() -> Vec<Value> {
    FALLBACK_TEAMS.iter().map(SeedTeam::document).collect()
}

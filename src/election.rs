use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::types::idtype;

idtype!(ContestId);
idtype!(CandidateId);
idtype!(BallotStyleId);
idtype!(PrecinctId);
idtype!(DistrictId);
idtype!(PartyId);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Election {
    pub title: String,
    pub ballot_styles: Vec<BallotStyle>,
    pub precincts: Vec<Precinct>,
    pub contests: Vec<Contest>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BallotStyle {
    pub id: BallotStyleId,
    pub precincts: Vec<PrecinctId>,
    pub districts: Vec<DistrictId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub party_id: Option<PartyId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Precinct {
    pub id: PrecinctId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub id: CandidateId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub party_id: Option<PartyId>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_write_in: bool,
}

impl Candidate {
    /// A synthetic candidate standing in for the write-in line at `index`.
    /// Each physical write-in line gets its own stable id.
    pub fn write_in(index: usize) -> Self {
        Self {
            id: CandidateId::from(format!("__write-in-{}", index)),
            name: "Write-In".to_string(),
            party_id: None,
            is_write_in: true,
        }
    }
}

/// A contest on the ballot, as defined by the election definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum Contest {
    /// A contest between named candidates, possibly with write-in lines.
    #[serde(rename_all = "camelCase", rename = "candidate")]
    Candidate {
        id: ContestId,
        district_id: DistrictId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        party_id: Option<PartyId>,
        title: String,
        seats: u32,
        allow_write_ins: bool,
        candidates: Vec<Candidate>,
    },

    /// A ballot measure answered with "yes" or "no".
    #[serde(rename_all = "camelCase", rename = "yesno")]
    YesNo {
        id: ContestId,
        district_id: DistrictId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        party_id: Option<PartyId>,
        title: String,
        #[serde(default)]
        description: String,
    },
}

impl Contest {
    pub fn id(&self) -> &ContestId {
        match self {
            Contest::Candidate { id, .. } => id,
            Contest::YesNo { id, .. } => id,
        }
    }

    pub fn district_id(&self) -> &DistrictId {
        match self {
            Contest::Candidate { district_id, .. } => district_id,
            Contest::YesNo { district_id, .. } => district_id,
        }
    }

    pub fn party_id(&self) -> Option<&PartyId> {
        match self {
            Contest::Candidate { party_id, .. } => party_id.as_ref(),
            Contest::YesNo { party_id, .. } => party_id.as_ref(),
        }
    }
}

impl Display for Contest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Contest::Candidate { id, .. } => write!(f, "candidate contest '{}'", id),
            Contest::YesNo { id, .. } => write!(f, "yes/no contest '{}'", id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum YesNoOption {
    Yes,
    No,
}

impl Display for YesNoOption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            YesNoOption::Yes => write!(f, "yes"),
            YesNoOption::No => write!(f, "no"),
        }
    }
}

impl Election {
    pub fn ballot_style(&self, id: &BallotStyleId) -> Option<&BallotStyle> {
        self.ballot_styles.iter().find(|style| &style.id == id)
    }

    pub fn precinct(&self, id: &PrecinctId) -> Option<&Precinct> {
        self.precincts.iter().find(|precinct| &precinct.id == id)
    }

    /// Gets the contests that appear on ballots of the given style, in ballot
    /// order.
    pub fn contests_for_ballot_style(&self, ballot_style: &BallotStyle) -> Vec<&Contest> {
        self.contests
            .iter()
            .filter(|contest| {
                ballot_style.districts.contains(contest.district_id())
                    && ballot_style.party_id.as_ref() == contest.party_id()
            })
            .collect()
    }
}

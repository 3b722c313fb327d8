use std::collections::BTreeMap;

use log::debug;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use crate::election::{
    BallotStyleId, Candidate, CandidateId, Contest, ContestId, Election, PrecinctId, YesNoOption,
};
use crate::error::{InterpretError, Result};
use crate::metadata::{BallotLocales, BallotPageMetadata, SummaryBallotPayload};
use crate::scoring::{BallotMark, MarkOption};

const BALLOT_ID_LENGTH: usize = 22;
const SUMMARY_CONTEST_DELIMITER: char = '|';
const SUMMARY_CANDIDATE_DELIMITER: char = ',';

/// The selections in one contest. Selections beyond the number of seats are
/// reported as-is; tabulation decides what an overvote means.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContestVote {
    NoAnswer,
    Candidates(Vec<CandidateId>),
    YesNo(Vec<YesNoOption>),
}

impl Serialize for ContestVote {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            ContestVote::NoAnswer => serializer.serialize_str(""),
            ContestVote::Candidates(ids) => ids.serialize(serializer),
            ContestVote::YesNo(options) => options.serialize(serializer),
        }
    }
}

/// Votes from one ballot page (or one summary ballot), keyed by contest id,
/// plus where the ballot came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CastVoteRecord {
    pub ballot_style_id: BallotStyleId,
    pub precinct_id: PrecinctId,
    pub ballot_id: Option<String>,
    pub page_number: Option<u32>,
    pub locales: Option<BallotLocales>,
    pub is_test_ballot: Option<bool>,
    pub votes: BTreeMap<ContestId, ContestVote>,
}

impl Serialize for CastVoteRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("_precinctId", &self.precinct_id)?;
        map.serialize_entry("_ballotStyleId", &self.ballot_style_id)?;
        if let Some(ballot_id) = &self.ballot_id {
            map.serialize_entry("_ballotId", ballot_id)?;
        }
        if let Some(page_number) = self.page_number {
            map.serialize_entry("_pageNumber", &page_number)?;
        }
        if let Some(locales) = &self.locales {
            map.serialize_entry("_locales", locales)?;
        }
        if let Some(is_test_ballot) = self.is_test_ballot {
            map.serialize_entry("_testBallot", &is_test_ballot)?;
        }
        for (contest_id, vote) in &self.votes {
            map.serialize_entry(contest_id, vote)?;
        }
        map.end()
    }
}

/// A fresh ballot id for ballots whose barcode doesn't carry one.
pub fn random_ballot_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(BALLOT_ID_LENGTH)
        .map(char::from)
        .collect()
}

/// Turns marks into votes for every contest on the page. A mark counts as a
/// selection when its score is at or below `threshold`.
pub fn votes_from_marks(
    contests: &[&Contest],
    marks: &[BallotMark],
    threshold: f32,
) -> BTreeMap<ContestId, ContestVote> {
    contests
        .iter()
        .map(|contest| {
            let selected = marks
                .iter()
                .filter(|mark| &mark.contest_id == contest.id() && mark.score <= threshold);

            let vote = match contest {
                Contest::Candidate { .. } => {
                    let ids = selected
                        .filter_map(|mark| match &mark.option {
                            MarkOption::Candidate(candidate) => Some(candidate.id.clone()),
                            MarkOption::YesNo(_) => None,
                        })
                        .collect::<Vec<_>>();
                    if ids.is_empty() {
                        ContestVote::NoAnswer
                    } else {
                        ContestVote::Candidates(ids)
                    }
                }
                Contest::YesNo { .. } => {
                    let options = selected
                        .filter_map(|mark| match &mark.option {
                            MarkOption::YesNo(option) => Some(*option),
                            MarkOption::Candidate(_) => None,
                        })
                        .collect::<Vec<_>>();
                    if options.is_empty() {
                        ContestVote::NoAnswer
                    } else {
                        ContestVote::YesNo(options)
                    }
                }
            };

            debug!("{} vote: {:?}", contest, vote);
            (contest.id().clone(), vote)
        })
        .collect()
}

/// Builds the record for one hand-marked ballot page.
pub fn cvr_from_marks(
    metadata: &BallotPageMetadata,
    contests: &[&Contest],
    marks: &[BallotMark],
    threshold: f32,
) -> CastVoteRecord {
    CastVoteRecord {
        ballot_style_id: metadata.ballot_style_id.clone(),
        precinct_id: metadata.precinct_id.clone(),
        ballot_id: Some(random_ballot_id()),
        page_number: Some(metadata.page_number),
        locales: metadata.locales.clone(),
        is_test_ballot: Some(metadata.is_test_ballot),
        votes: votes_from_marks(contests, marks, threshold),
    }
}

/// Summary ballots only carry indexes into the contest's candidate list, so
/// write-in lines can't be selected on them.
fn decode_candidate_selections(
    contest_id: &ContestId,
    field: &str,
    candidates: &[Candidate],
) -> Result<ContestVote> {
    let ids = field
        .split(SUMMARY_CANDIDATE_DELIMITER)
        .map(|entry| {
            entry
                .parse::<usize>()
                .ok()
                .and_then(|index| candidates.get(index))
                .map(|candidate| candidate.id.clone())
                .ok_or_else(|| {
                    InterpretError::metadata_decode(format!(
                        "contest {} has no candidate at index {:?}",
                        contest_id, entry
                    ))
                })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(ContestVote::Candidates(ids))
}

fn decode_yes_no_selection(contest_id: &ContestId, field: &str) -> Result<ContestVote> {
    match field {
        "0" => Ok(ContestVote::YesNo(vec![YesNoOption::No])),
        "1" => Ok(ContestVote::YesNo(vec![YesNoOption::Yes])),
        _ => Err(InterpretError::metadata_decode(format!(
            "contest {} has an invalid yes/no selection {:?}",
            contest_id, field
        ))),
    }
}

/// Reads the selections of a summary ballot against the contests of its ballot
/// style, one `|`-separated field per contest in election order.
pub fn decode_summary_selections(
    election: &Election,
    payload: &SummaryBallotPayload,
) -> Result<CastVoteRecord> {
    let ballot_style = election
        .ballot_style(&payload.ballot_style_id)
        .ok_or_else(|| InterpretError::UnknownBallotStyle(payload.ballot_style_id.clone()))?;
    if election.precinct(&payload.precinct_id).is_none() {
        return Err(InterpretError::UnknownPrecinct(payload.precinct_id.clone()));
    }

    let contests = election.contests_for_ballot_style(ballot_style);
    let fields = if contests.is_empty() && payload.selections.is_empty() {
        vec![]
    } else {
        payload
            .selections
            .split(SUMMARY_CONTEST_DELIMITER)
            .collect::<Vec<_>>()
    };
    if fields.len() != contests.len() {
        return Err(InterpretError::metadata_decode(format!(
            "summary ballot has selections for {} contest(s) but ballot style {} has {}",
            fields.len(),
            ballot_style.id,
            contests.len()
        )));
    }

    let mut votes = BTreeMap::new();
    for (contest, field) in contests.into_iter().zip(fields) {
        let vote = if field.is_empty() {
            ContestVote::NoAnswer
        } else {
            match contest {
                Contest::Candidate { id, candidates, .. } => {
                    decode_candidate_selections(id, field, candidates)?
                }
                Contest::YesNo { id, .. } => decode_yes_no_selection(id, field)?,
            }
        };
        votes.insert(contest.id().clone(), vote);
    }

    Ok(CastVoteRecord {
        ballot_style_id: payload.ballot_style_id.clone(),
        precinct_id: payload.precinct_id.clone(),
        ballot_id: payload.ballot_id.clone(),
        page_number: None,
        locales: None,
        is_test_ballot: None,
        votes,
    })
}

#[cfg(test)]
mod tests {
    use imageproc::rect::Rect;
    use proptest::prelude::*;

    use super::*;
    use crate::election::{BallotStyle, Precinct};
    use crate::interpret::InterpreterOptions;
    use crate::layout::TargetShape;
    use crate::metadata::{decode_payload, BallotPayload};

    fn candidate(id: &str) -> Candidate {
        Candidate {
            id: id.into(),
            name: id.to_uppercase(),
            party_id: None,
            is_write_in: false,
        }
    }

    fn candidate_contest(
        id: &str,
        candidate_ids: &[&str],
        seats: u32,
        allow_write_ins: bool,
    ) -> Contest {
        Contest::Candidate {
            id: id.into(),
            district_id: "d1".into(),
            party_id: None,
            title: id.to_string(),
            seats,
            allow_write_ins,
            candidates: candidate_ids.iter().map(|id| candidate(id)).collect(),
        }
    }

    fn yes_no_contest(id: &str) -> Contest {
        Contest::YesNo {
            id: id.into(),
            district_id: "d1".into(),
            party_id: None,
            title: id.to_string(),
            description: String::new(),
        }
    }

    /// Ballot style 12 in precinct 23, with 20 contests: president first, then
    /// alternating candidate and yes/no contests.
    fn election() -> Election {
        let president = ["washington", "adams", "jefferson"];
        let mut contests = vec![candidate_contest("president", &president, 1, true)];
        for i in 1..20 {
            contests.push(if i % 2 == 0 {
                candidate_contest(&format!("council-{}", i), &["a", "b", "c", "d"], 2, true)
            } else {
                yes_no_contest(&format!("measure-{}", i))
            });
        }
        Election {
            title: "General Election".to_string(),
            ballot_styles: vec![BallotStyle {
                id: "12".into(),
                precincts: vec!["23".into()],
                districts: vec!["d1".into()],
                party_id: None,
            }],
            precincts: vec![Precinct {
                id: "23".into(),
                name: "Center Springfield".to_string(),
            }],
            contests,
        }
    }

    /// The inverse of `decode_summary_selections`.
    fn encode_summary_selections(
        contests: &[&Contest],
        votes: &BTreeMap<ContestId, ContestVote>,
    ) -> String {
        contests
            .iter()
            .map(|contest| match (contest, &votes[contest.id()]) {
                (_, ContestVote::NoAnswer) => String::new(),
                (Contest::Candidate { candidates, .. }, ContestVote::Candidates(ids)) => ids
                    .iter()
                    .map(|id| {
                        let index = candidates.iter().position(|c| &c.id == id);
                        index.expect("only listed candidates").to_string()
                    })
                    .collect::<Vec<_>>()
                    .join(","),
                (Contest::YesNo { .. }, ContestVote::YesNo(options)) => match options[..] {
                    [YesNoOption::Yes] => "1".to_string(),
                    [YesNoOption::No] => "0".to_string(),
                    _ => panic!("summary ballots hold one yes/no answer"),
                },
                (contest, vote) => panic!("{:?} is not a vote for {}", vote, contest),
            })
            .collect::<Vec<_>>()
            .join("|")
    }

    fn payload(selections: &str) -> SummaryBallotPayload {
        SummaryBallotPayload {
            ballot_style_id: "12".into(),
            precinct_id: "23".into(),
            selections: selections.to_string(),
            ballot_id: Some("abc123".to_string()),
        }
    }

    #[test]
    fn decodes_summary_ballot_with_one_selection() {
        let election = election();
        let cvr = decode_summary_selections(&election, &payload("1|||||||||||||||||||")).unwrap();
        assert_eq!(cvr.votes.len(), 20);
        assert_eq!(
            cvr.votes[&ContestId::from("president")],
            ContestVote::Candidates(vec![CandidateId::from("adams")])
        );
        let others_unanswered = cvr
            .votes
            .iter()
            .filter(|(id, _)| id.as_str() != "president")
            .all(|(_, vote)| *vote == ContestVote::NoAnswer);
        assert!(others_unanswered);

        let json = serde_json::to_value(&cvr).unwrap();
        assert_eq!(json["_precinctId"], "23");
        assert_eq!(json["_ballotStyleId"], "12");
        assert_eq!(json["_ballotId"], "abc123");
        assert_eq!(json["president"], serde_json::json!(["adams"]));
        assert_eq!(json["measure-1"], "");
        assert!(json.get("_pageNumber").is_none());
    }

    #[test]
    fn summary_round_trip() {
        let election = election();
        let selections = "0,2|1|0,3||0||||1,2|1||||||||||";
        let cvr = decode_summary_selections(&election, &payload(selections)).unwrap();
        assert_eq!(
            cvr.votes[&ContestId::from("president")],
            ContestVote::Candidates(vec!["washington".into(), "jefferson".into()])
        );
        assert_eq!(
            cvr.votes[&ContestId::from("measure-1")],
            ContestVote::YesNo(vec![YesNoOption::Yes])
        );
        assert_eq!(
            cvr.votes[&ContestId::from("council-8")],
            ContestVote::Candidates(vec!["b".into(), "c".into()])
        );

        let ballot_style = &election.ballot_styles[0];
        let contests = election.contests_for_ballot_style(ballot_style);
        assert_eq!(encode_summary_selections(&contests, &cvr.votes), selections);
    }

    #[test]
    fn overvotes_pass_through() {
        let election = election();
        let selections = "0,1,2|||||||||||||||||||";
        let cvr = decode_summary_selections(&election, &payload(selections)).unwrap();
        let everyone = ["washington", "adams", "jefferson"].map(CandidateId::from);
        assert_eq!(
            cvr.votes[&ContestId::from("president")],
            ContestVote::Candidates(everyone.to_vec())
        );
    }

    #[test]
    fn rejects_malformed_summary_selections() {
        let election = election();
        for selections in [
            // too few contests
            "1|||",
            // no such candidate
            "7|||||||||||||||||||",
            // yes/no contest with an unknown code
            "|2||||||||||||||||||",
            // an empty candidate entry
            "0,|||||||||||||||||||",
        ] {
            assert!(
                matches!(
                    decode_summary_selections(&election, &payload(selections)),
                    Err(InterpretError::MetadataDecode { .. })
                ),
                "{}",
                selections
            );
        }
    }

    #[test]
    fn write_in_tokens_are_not_selections() {
        let election = election();
        for selections in ["W|||||||||||||||||||", "0,W|||||||||||||||||||"] {
            assert!(
                matches!(
                    decode_summary_selections(&election, &payload(selections)),
                    Err(InterpretError::MetadataDecode { .. })
                ),
                "{}",
                selections
            );
        }
    }

    #[test]
    fn decodes_summary_barcode_payload() {
        let summary = match decode_payload(b"12.23.1|||||||||||||||||||.abc123").unwrap() {
            BallotPayload::Summary(summary) => summary,
            payload => panic!("unexpected payload: {:?}", payload),
        };
        let cvr = decode_summary_selections(&election(), &summary).unwrap();
        assert_eq!(cvr.ballot_style_id, BallotStyleId::from("12"));
        assert_eq!(cvr.precinct_id, PrecinctId::from("23"));
        assert_eq!(cvr.ballot_id.as_deref(), Some("abc123"));
        assert_eq!(cvr.votes.len(), 20);
        assert_eq!(
            cvr.votes[&ContestId::from("president")],
            ContestVote::Candidates(vec![CandidateId::from("adams")])
        );
        let no_answers = cvr
            .votes
            .values()
            .filter(|vote| **vote == ContestVote::NoAnswer)
            .count();
        assert_eq!(no_answers, 19);
    }

    #[test]
    fn rejects_unknown_ballot_style_and_precinct() {
        let election = election();
        let unknown_style = SummaryBallotPayload {
            ballot_style_id: "99".into(),
            ..payload("")
        };
        assert!(matches!(
            decode_summary_selections(&election, &unknown_style),
            Err(InterpretError::UnknownBallotStyle(id)) if id.as_str() == "99"
        ));
        let unknown_precinct = SummaryBallotPayload {
            precinct_id: "99".into(),
            ..payload("")
        };
        assert!(matches!(
            decode_summary_selections(&election, &unknown_precinct),
            Err(InterpretError::UnknownPrecinct(_))
        ));
    }

    fn mark(contest_id: &str, option: MarkOption, score: f32) -> BallotMark {
        BallotMark {
            contest_id: contest_id.into(),
            option,
            target: TargetShape {
                bounds: Rect::at(0, 0).of_size(10, 10),
                inner: Rect::at(1, 1).of_size(8, 8),
            },
            fill_ratio: 1.0 - score,
            score,
        }
    }

    #[test]
    fn selects_only_the_filled_write_in() {
        let contest = candidate_contest("mayor", &["a", "b", "c"], 1, true);
        let marks = vec![
            mark("mayor", MarkOption::Candidate(candidate("a")), 0.9),
            mark("mayor", MarkOption::Candidate(candidate("b")), 0.9),
            mark("mayor", MarkOption::Candidate(candidate("c")), 0.9),
            mark("mayor", MarkOption::Candidate(Candidate::write_in(0)), 0.05),
        ];
        let votes = votes_from_marks(&[&contest], &marks, 0.2);
        assert_eq!(
            votes[&ContestId::from("mayor")],
            ContestVote::Candidates(vec!["__write-in-0".into()])
        );
    }

    #[test]
    fn default_threshold_needs_mostly_filled_targets() {
        let contest = candidate_contest("mayor", &["a", "b"], 2, false);
        let target = TargetShape {
            bounds: Rect::at(0, 0).of_size(10, 10),
            inner: Rect::at(1, 1).of_size(8, 8),
        };
        let filled = |name: &str, fill_ratio| {
            let option = MarkOption::Candidate(candidate(name));
            BallotMark::new("mayor".into(), option, target, fill_ratio)
        };
        let marks = vec![filled("a", 0.7), filled("b", 0.9)];
        let threshold = InterpreterOptions::default().mark_score_vote_threshold;
        let votes = votes_from_marks(&[&contest], &marks, threshold);
        assert_eq!(
            votes[&ContestId::from("mayor")],
            ContestVote::Candidates(vec!["b".into()])
        );
    }

    #[test]
    fn unmarked_contests_have_no_answer() {
        let contests = [yes_no_contest("measure"), candidate_contest("mayor", &["a"], 1, false)];
        let marks = vec![
            mark("measure", MarkOption::YesNo(YesNoOption::Yes), 0.5),
            mark("measure", MarkOption::YesNo(YesNoOption::No), 0.1),
        ];
        let votes = votes_from_marks(&contests.iter().collect::<Vec<_>>(), &marks, 0.2);
        assert_eq!(
            votes[&ContestId::from("measure")],
            ContestVote::YesNo(vec![YesNoOption::No])
        );
        assert_eq!(votes[&ContestId::from("mayor")], ContestVote::NoAnswer);
    }

    #[test]
    fn hand_marked_cvr_carries_page_details() {
        let metadata = BallotPageMetadata {
            locales: Some(BallotLocales {
                primary: "en-US".to_string(),
                secondary: None,
            }),
            ballot_style_id: "12".into(),
            precinct_id: "23".into(),
            page_number: 2,
            page_count: 2,
            is_test_ballot: true,
        };
        let cvr = cvr_from_marks(&metadata, &[], &[], 0.2);
        let ballot_id = cvr.ballot_id.clone().unwrap();
        assert_eq!(ballot_id.len(), BALLOT_ID_LENGTH);
        assert!(ballot_id.chars().all(|c| c.is_ascii_alphanumeric()));

        let json = serde_json::to_value(&cvr).unwrap();
        assert_eq!(json["_pageNumber"], 2);
        assert_eq!(json["_testBallot"], true);
        assert_eq!(json["_locales"]["primary"], "en-US");
    }

    proptest! {
        #[test]
        fn raising_the_threshold_never_drops_a_selection(
            scores in prop::collection::vec(0.0f32..=1.0, 1..8),
            low in 0.0f32..=1.0,
            delta in 0.0f32..=1.0,
        ) {
            let names = (0..scores.len()).map(|i| format!("c{}", i)).collect::<Vec<_>>();
            let name_refs = names.iter().map(String::as_str).collect::<Vec<_>>();
            let contest = candidate_contest("mayor", &name_refs, 1, false);
            let marks = scores
                .iter()
                .zip(&names)
                .map(|(score, name)| mark("mayor", MarkOption::Candidate(candidate(name)), *score))
                .collect::<Vec<_>>();

            let selected = |threshold| {
                let mut votes = votes_from_marks(&[&contest], &marks, threshold);
                match votes.remove(&ContestId::from("mayor")) {
                    Some(ContestVote::Candidates(ids)) => ids,
                    _ => vec![],
                }
            };
            let at_low = selected(low);
            let at_high = selected(low + delta);
            prop_assert!(at_low.iter().all(|id| at_high.contains(id)));
        }
    }
}

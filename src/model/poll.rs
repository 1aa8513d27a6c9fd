use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{
    Status, UserId, ValidationError,
    audience::{Audience, AudienceKind},
    in_range, max_len, require,
    role::UnknownVariant,
    user::User,
};

pub type PollId = i32;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Poll {
    pub id: PollId,
    pub title: String,
    pub description: String,
    #[serde(rename = "type")]
    pub kind: PollKind,
    pub options: Vec<PollOption>,
    pub deadline: DateTime<Utc>,
    pub is_anonymous: bool,
    pub audience: Audience,
    pub created_by: UserId,
    /// Audit log: every ballot a user has cast, oldest first.
    pub voters: BTreeMap<UserId, Vec<Ballot>>,
    pub status: Status,
    /// Whether one ballot may count toward more than one option.
    pub allow_multiple_votes: bool,
    pub show_results: ShowResults,
    pub max_votes_per_user: i32,
    pub category: Option<String>,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollOption {
    pub text: String,
    pub votes: i32,
    /// Empty for anonymous polls.
    pub voters: Vec<UserId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ballot {
    pub voted_at: DateTime<Utc>,
    pub selected_options: Vec<usize>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PollKind {
    #[default]
    Single,
    Multiple,
}

impl PollKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PollKind::Single => "single",
            PollKind::Multiple => "multiple",
        }
    }
}

impl FromStr for PollKind {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "single" => Ok(PollKind::Single),
            "multiple" => Ok(PollKind::Multiple),
            other => Err(UnknownVariant::new("poll type", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShowResults {
    Always,
    #[default]
    AfterVote,
    AfterDeadline,
}

impl ShowResults {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShowResults::Always => "always",
            ShowResults::AfterVote => "after_vote",
            ShowResults::AfterDeadline => "after_deadline",
        }
    }
}

impl FromStr for ShowResults {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "always" => Ok(ShowResults::Always),
            "after_vote" => Ok(ShowResults::AfterVote),
            "after_deadline" => Ok(ShowResults::AfterDeadline),
            other => Err(UnknownVariant::new("showResults", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VoteError {
    #[error("Poll is not accepting votes")]
    PollClosed,
    #[error("User is not part of this poll's audience")]
    NotInAudience,
    #[error("User has reached the vote limit for this poll")]
    VoteLimitReached,
    #[error("Invalid option indexes")]
    EmptySelection,
    #[error("Option index {0} is out of range")]
    OptionOutOfRange(i64),
    #[error("Option index {0} was selected more than once")]
    DuplicateOption(usize),
    #[error("Single choice polls allow only one option")]
    SingleChoice,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPoll {
    pub title: String,
    pub description: String,
    #[serde(default, rename = "type")]
    pub kind: Option<PollKind>,
    pub options: Vec<String>,
    pub deadline: DateTime<Utc>,
    #[serde(default)]
    pub is_anonymous: Option<bool>,
    #[serde(default)]
    pub audience: Option<AudienceKind>,
    #[serde(default)]
    pub target_users: Vec<UserId>,
    #[serde(default)]
    pub show_results: Option<ShowResults>,
    #[serde(default)]
    pub allow_multiple_votes: Option<bool>,
    #[serde(default)]
    pub max_votes_per_user: Option<i32>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl NewPoll {
    pub fn into_poll(self, created_by: UserId, now: DateTime<Utc>) -> Result<Poll, ValidationError> {
        if self.deadline <= now {
            return Err(ValidationError::DeadlineNotInFuture);
        }

        let kind = self.kind.unwrap_or_default();
        let audience = Audience::new(self.audience.unwrap_or_default(), self.target_users)?;

        let poll = Poll {
            id: 0,
            title: self.title.trim().to_owned(),
            description: self.description.trim().to_owned(),
            kind,
            options: self
                .options
                .into_iter()
                .map(|text| PollOption {
                    text: text.trim().to_owned(),
                    votes: 0,
                    voters: vec![],
                })
                .collect(),
            deadline: self.deadline,
            is_anonymous: self.is_anonymous.unwrap_or(false),
            audience,
            created_by,
            voters: BTreeMap::new(),
            status: Status::Active,
            allow_multiple_votes: self
                .allow_multiple_votes
                .unwrap_or(kind == PollKind::Multiple),
            show_results: self.show_results.unwrap_or_default(),
            max_votes_per_user: self.max_votes_per_user.unwrap_or(1),
            category: self.category.map(|c| c.trim().to_owned()),
            tags: self.tags.into_iter().map(|t| t.trim().to_owned()).collect(),
            created_at: now,
            updated_at: now,
        };

        poll.validate()?;
        Ok(poll)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteRequest {
    pub selected_options: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PollResults {
    Visible(Tally),
    Hidden { message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tally {
    pub total_votes: i64,
    pub total_ballots: usize,
    pub unique_voters: usize,
    pub options: Vec<OptionTally>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionTally {
    pub text: String,
    pub votes: i32,
    /// Share of all votes, one decimal place.
    pub percentage: f64,
    pub voters: Vec<UserId>,
}

impl Poll {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.deadline
    }

    pub fn total_votes(&self) -> i64 {
        self.options.iter().map(|o| o.votes as i64).sum()
    }

    pub fn total_ballots(&self) -> usize {
        self.voters.values().map(Vec::len).sum()
    }

    pub fn unique_voter_count(&self) -> usize {
        self.voters.len()
    }

    pub fn refresh_status(&mut self, now: DateTime<Utc>) {
        if self.deadline < now && self.status == Status::Active {
            self.status = Status::Expired;
        }
        self.updated_at = now;
    }

    pub fn user_votes(&self, user: UserId) -> &[Ballot] {
        self.voters.get(&user).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn has_voted(&self, user: UserId) -> bool {
        !self.user_votes(user).is_empty()
    }

    pub fn can_user_vote(&self, user: UserId, now: DateTime<Utc>) -> bool {
        if self.status != Status::Active || self.is_expired(now) {
            return false;
        }
        (self.user_votes(user).len() as i64) < self.max_votes_per_user as i64
    }

    /// Shown in the user's poll list.
    pub fn visible_to(&self, user: &User) -> bool {
        self.audience.admits(user) && matches!(self.status, Status::Active | Status::Expired)
    }

    /// `add_vote` behind an audience check.
    pub fn cast(
        &mut self,
        user: &User,
        selection: &[i64],
        now: DateTime<Utc>,
    ) -> Result<&Ballot, VoteError> {
        if !self.audience.admits(user) {
            return Err(VoteError::NotInAudience);
        }
        self.add_vote(user.id, selection, now)
    }

    /// Records one ballot. Nothing is modified when an error is returned.
    pub fn add_vote(
        &mut self,
        user: UserId,
        selection: &[i64],
        now: DateTime<Utc>,
    ) -> Result<&Ballot, VoteError> {
        if self.status != Status::Active || self.is_expired(now) {
            return Err(VoteError::PollClosed);
        }
        if !self.can_user_vote(user, now) {
            return Err(VoteError::VoteLimitReached);
        }
        if selection.is_empty() {
            return Err(VoteError::EmptySelection);
        }

        let mut seen = BTreeSet::new();
        let mut indexes = Vec::with_capacity(selection.len());
        for &raw in selection {
            if raw < 0 || raw >= self.options.len() as i64 {
                return Err(VoteError::OptionOutOfRange(raw));
            }
            let index = raw as usize;
            if !seen.insert(index) {
                return Err(VoteError::DuplicateOption(index));
            }
            indexes.push(index);
        }

        if indexes.len() > 1 && (self.kind == PollKind::Single || !self.allow_multiple_votes) {
            return Err(VoteError::SingleChoice);
        }

        for &index in &indexes {
            let option = &mut self.options[index];
            option.votes += 1;
            if !self.is_anonymous {
                option.voters.push(user);
            }
        }

        let ballots = self.voters.entry(user).or_default();
        ballots.push(Ballot {
            voted_at: now,
            selected_options: indexes,
        });
        Ok(&ballots[ballots.len() - 1])
    }

    /// Tallies, or a notice when `show_results` hides them from `viewer` right now.
    pub fn results(&self, viewer: Option<UserId>, now: DateTime<Utc>) -> PollResults {
        if let Some(viewer) = viewer
            && self.show_results == ShowResults::AfterVote
            && !self.has_voted(viewer)
        {
            return PollResults::Hidden {
                message: "Vote first to see results".into(),
            };
        }

        if self.show_results == ShowResults::AfterDeadline && !self.is_expired(now) {
            return PollResults::Hidden {
                message: "Results will be available after deadline".into(),
            };
        }

        let total_votes = self.total_votes();
        let options = self
            .options
            .iter()
            .map(|o| OptionTally {
                text: o.text.clone(),
                votes: o.votes,
                percentage: if total_votes > 0 {
                    (o.votes as f64 / total_votes as f64 * 1000.0).round() / 10.0
                } else {
                    0.0
                },
                voters: if self.is_anonymous {
                    vec![]
                } else {
                    o.voters.clone()
                },
            })
            .collect();

        PollResults::Visible(Tally {
            total_votes,
            total_ballots: self.total_ballots(),
            unique_voters: self.unique_voter_count(),
            options,
        })
    }

    /// Per-option counters recomputed from the ballots.
    pub fn recount(&self) -> Vec<i32> {
        let mut counts = vec![0; self.options.len()];
        for ballot in self.voters.values().flatten() {
            for &index in &ballot.selected_options {
                if let Some(count) = counts.get_mut(index) {
                    *count += 1;
                }
            }
        }
        counts
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        require("title", &self.title)?;
        max_len("title", &self.title, 200)?;
        require("description", &self.description)?;
        max_len("description", &self.description, 1000)?;

        if self.options.len() < 2 {
            return Err(ValidationError::Invalid(
                "A poll needs at least two options".into(),
            ));
        }
        for option in &self.options {
            require("option text", &option.text)?;
            max_len("option text", &option.text, 200)?;
            if option.votes < 0 {
                return Err(ValidationError::Invalid("Vote counts cannot be negative".into()));
            }
        }

        in_range(
            "maxVotesPerUser",
            self.max_votes_per_user as i64,
            1,
            i32::MAX as i64,
        )?;

        if self.kind == PollKind::Multiple && !self.allow_multiple_votes {
            return Err(ValidationError::Invalid(
                "Multiple choice polls must allow multiple votes".into(),
            ));
        }

        if let Some(category) = &self.category {
            max_len("category", category, 50)?;
        }
        for tag in &self.tags {
            max_len("tag", tag, 30)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use super::*;
    use crate::model::{role::Role, user::tests::user};

    fn new_poll(now: DateTime<Utc>, options: &[&str]) -> NewPoll {
        NewPoll {
            title: "Lunch".into(),
            description: "Where do we go".into(),
            kind: None,
            options: options.iter().map(|o| o.to_string()).collect(),
            deadline: now + TimeDelta::days(1),
            is_anonymous: None,
            audience: None,
            target_users: vec![],
            show_results: None,
            allow_multiple_votes: None,
            max_votes_per_user: None,
            category: None,
            tags: vec![],
        }
    }

    fn counters(poll: &Poll) -> Vec<i32> {
        poll.options.iter().map(|o| o.votes).collect()
    }

    #[test]
    fn vote_then_second_vote_rejected() {
        let now = Utc::now();
        let mut poll = new_poll(now, &["A", "B"]).into_poll(9, now).unwrap();
        assert_eq!(poll.max_votes_per_user, 1);

        poll.add_vote(1, &[0], now).unwrap();
        assert_eq!(counters(&poll), vec![1, 0]);
        assert_eq!(poll.options[0].voters, vec![1]);

        assert_eq!(
            poll.add_vote(1, &[1], now).unwrap_err(),
            VoteError::VoteLimitReached
        );
        assert_eq!(counters(&poll), vec![1, 0]);
        assert_eq!(poll.total_ballots(), 1);
    }

    #[test]
    fn single_choice_rejects_two_options() {
        let now = Utc::now();
        let mut poll = new_poll(now, &["A", "B", "C"]).into_poll(9, now).unwrap();
        assert_eq!(
            poll.add_vote(1, &[0, 1], now).unwrap_err(),
            VoteError::SingleChoice
        );
        assert_eq!(poll.total_ballots(), 0);
        assert_eq!(poll.total_votes(), 0);
    }

    #[test]
    fn out_of_range_and_empty_rejected() {
        let now = Utc::now();
        let mut poll = new_poll(now, &["A", "B"]).into_poll(9, now).unwrap();
        assert_eq!(
            poll.add_vote(1, &[2], now).unwrap_err(),
            VoteError::OptionOutOfRange(2)
        );
        assert_eq!(
            poll.add_vote(1, &[-1], now).unwrap_err(),
            VoteError::OptionOutOfRange(-1)
        );
        assert_eq!(poll.add_vote(1, &[], now).unwrap_err(), VoteError::EmptySelection);
        assert!(poll.voters.is_empty());
    }

    #[test]
    fn multiple_choice_counts_each_option() {
        let now = Utc::now();
        let mut req = new_poll(now, &["A", "B", "C"]);
        req.kind = Some(PollKind::Multiple);
        let mut poll = req.into_poll(9, now).unwrap();
        assert!(poll.allow_multiple_votes);

        poll.add_vote(1, &[0, 2], now).unwrap();
        poll.add_vote(2, &[2], now).unwrap();
        assert_eq!(counters(&poll), vec![1, 0, 2]);
        assert_eq!(poll.recount(), counters(&poll));
        assert_eq!(
            poll.add_vote(3, &[1, 1], now).unwrap_err(),
            VoteError::DuplicateOption(1)
        );
    }

    #[test]
    fn multiple_kind_must_allow_multiple_votes() {
        let now = Utc::now();
        let mut req = new_poll(now, &["A", "B"]);
        req.kind = Some(PollKind::Multiple);
        req.allow_multiple_votes = Some(false);
        assert!(req.into_poll(9, now).is_err());
    }

    #[test]
    fn counters_match_ballots_without_multiple_votes() {
        let now = Utc::now();
        let mut req = new_poll(now, &["A", "B", "C"]);
        req.max_votes_per_user = Some(3);
        let mut poll = req.into_poll(9, now).unwrap();

        for (user, option) in [(1, 0), (1, 2), (2, 1), (3, 2), (1, 2)] {
            poll.add_vote(user, &[option], now).unwrap();
        }
        assert_eq!(poll.total_votes(), poll.total_ballots() as i64);
        assert_eq!(poll.recount(), counters(&poll));
        assert_eq!(poll.unique_voter_count(), 3);
        assert_eq!(
            poll.add_vote(1, &[0], now).unwrap_err(),
            VoteError::VoteLimitReached
        );
    }

    #[test]
    fn closed_or_expired_poll_rejects_votes() {
        let now = Utc::now();
        let mut poll = new_poll(now, &["A", "B"]).into_poll(9, now).unwrap();
        let after = poll.deadline + TimeDelta::seconds(1);
        assert_eq!(poll.add_vote(1, &[0], after).unwrap_err(), VoteError::PollClosed);

        poll.status = Status::Draft;
        assert_eq!(poll.add_vote(1, &[0], now).unwrap_err(), VoteError::PollClosed);

        poll.status = Status::Active;
        poll.refresh_status(after);
        assert_eq!(poll.status, Status::Expired);
    }

    #[test]
    fn anonymous_poll_keeps_no_option_voters() {
        let now = Utc::now();
        let mut req = new_poll(now, &["A", "B"]);
        req.is_anonymous = Some(true);
        req.show_results = Some(ShowResults::Always);
        let mut poll = req.into_poll(9, now).unwrap();
        poll.add_vote(1, &[1], now).unwrap();

        assert!(poll.options[1].voters.is_empty());
        assert_eq!(poll.user_votes(1).len(), 1);
        let PollResults::Visible(tally) = poll.results(Some(4), now) else {
            panic!("results should be visible");
        };
        assert!(tally.options[1].voters.is_empty());
    }

    #[test]
    fn results_after_vote_hidden_until_viewer_votes() {
        let now = Utc::now();
        let mut poll = new_poll(now, &["A", "B"]).into_poll(9, now).unwrap();
        poll.add_vote(1, &[0], now).unwrap();

        assert!(matches!(
            poll.results(Some(2), now),
            PollResults::Hidden { .. }
        ));
        assert!(matches!(poll.results(Some(1), now), PollResults::Visible(_)));
        // The poll owner reads results without a viewer
        assert!(matches!(poll.results(None, now), PollResults::Visible(_)));
    }

    #[test]
    fn results_after_deadline() {
        let now = Utc::now();
        let mut req = new_poll(now, &["A", "B", "C"]);
        req.show_results = Some(ShowResults::AfterDeadline);
        req.max_votes_per_user = Some(3);
        let mut poll = req.into_poll(9, now).unwrap();
        poll.add_vote(1, &[0], now).unwrap();
        poll.add_vote(1, &[0], now).unwrap();
        poll.add_vote(1, &[1], now).unwrap();

        assert!(matches!(poll.results(None, now), PollResults::Hidden { .. }));

        let after = poll.deadline + TimeDelta::minutes(1);
        let PollResults::Visible(tally) = poll.results(None, after) else {
            panic!("results should be visible after the deadline");
        };
        assert_eq!(tally.total_votes, 3);
        assert_eq!(tally.options[0].percentage, 66.7);
        assert_eq!(tally.options[1].percentage, 33.3);
        assert_eq!(tally.options[2].percentage, 0.0);
    }

    #[test]
    fn cast_checks_audience() {
        let now = Utc::now();
        let mut req = new_poll(now, &["A", "B"]);
        req.audience = Some(AudienceKind::Teachers);
        let mut poll = req.into_poll(9, now).unwrap();

        assert_eq!(
            poll.cast(&user(1, Role::Student), &[0], now).unwrap_err(),
            VoteError::NotInAudience
        );
        assert!(poll.cast(&user(2, Role::Teacher), &[0], now).is_ok());
    }

    #[test]
    fn needs_two_options() {
        let now = Utc::now();
        assert!(new_poll(now, &["Only"]).into_poll(9, now).is_err());
    }
}

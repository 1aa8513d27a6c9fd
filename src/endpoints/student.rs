use axum::{Extension, Json, http::StatusCode};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    database::{self, UpdateError},
    endpoints::{JsonBody, PathParams, parse_id},
    error::{ApiError, ApiResult},
    model::{
        assignment::{Assignment, AssignmentError, NewSubmission, Submission},
        envelope::Envelope,
        poll::{Poll, PollResults, VoteError, VoteRequest},
        role::Role,
        user::User,
    },
};

/// An assignment as one student sees it: only their own attempts are included.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentAssignment {
    #[serde(flatten)]
    pub assignment: Assignment,
    pub my_submission: Option<Submission>,
    pub can_submit: bool,
}

impl StudentAssignment {
    fn new(mut assignment: Assignment, student: &User) -> Self {
        assignment.submissions.retain(|id, _| *id == student.id);
        Self {
            my_submission: assignment.student_submission(student.id).cloned(),
            can_submit: assignment.can_student_submit(student.id),
            assignment,
        }
    }
}

/// A poll as one user sees it: the ballot log is cut down to their own ballots, and option
/// tallies are blanked whenever `results` is hidden from them.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPoll {
    #[serde(flatten)]
    pub poll: Poll,
    pub has_voted: bool,
    pub can_vote: bool,
    pub results: PollResults,
}

impl UserPoll {
    fn new(mut poll: Poll, user: &User, now: DateTime<Utc>) -> Self {
        let results = poll.results(Some(user.id), now);
        let hidden = matches!(results, PollResults::Hidden { .. });

        for option in &mut poll.options {
            if hidden {
                option.votes = 0;
            }
            if hidden || poll.is_anonymous {
                option.voters.clear();
            }
        }

        let has_voted = poll.has_voted(user.id);
        let can_vote = poll.can_user_vote(user.id, now);
        poll.voters.retain(|id, _| *id == user.id);

        Self {
            poll,
            has_voted,
            can_vote,
            results,
        }
    }
}

pub async fn assignments(
    Extension(student): Extension<User>,
) -> ApiResult<Json<Envelope<Vec<StudentAssignment>>>> {
    let assignments = database::assignment::list_for_student(&student).await?;
    Ok(Json(Envelope::ok(
        "Assignments retrieved successfully",
        assignments
            .into_iter()
            .map(|a| StudentAssignment::new(a, &student))
            .collect(),
    )))
}

pub async fn submit_assignment(
    Extension(student): Extension<User>,
    PathParams(assignment_id): PathParams<String>,
    JsonBody(submission): JsonBody<NewSubmission>,
) -> ApiResult<(StatusCode, Json<Envelope<Submission>>)> {
    let id = parse_id(&assignment_id, "assignment")?;

    match database::assignment::submit(id, &student, submission, Utc::now()).await {
        Ok(submission) => Ok((
            StatusCode::CREATED,
            Json(Envelope::ok("Assignment submitted successfully", submission)),
        )),
        Err(UpdateError::NotFound) => Err(ApiError::NotFound("Assignment not found".into())),
        Err(UpdateError::Rejected(AssignmentError::NotInAudience)) => Err(ApiError::forbidden(
            "You are not assigned to this assignment",
        )),
        Err(UpdateError::Rejected(e)) => Err(ApiError::operation(
            "Failed to submit assignment",
            "Submission failed",
            e,
        )),
        Err(UpdateError::Database(e)) => Err(e.into()),
    }
}

async fn user_polls(user: &User, active_only: bool) -> ApiResult<Vec<UserPoll>> {
    let now = Utc::now();
    let polls = database::poll::list_for_user(user, active_only, now).await?;
    Ok(polls
        .into_iter()
        .map(|p| UserPoll::new(p, user, now))
        .collect())
}

pub async fn polls(Extension(user): Extension<User>) -> ApiResult<Json<Envelope<Vec<UserPoll>>>> {
    Ok(Json(Envelope::ok(
        "Polls retrieved successfully",
        user_polls(&user, false).await?,
    )))
}

pub async fn active_polls(
    Extension(user): Extension<User>,
) -> ApiResult<Json<Envelope<Vec<UserPoll>>>> {
    Ok(Json(Envelope::ok(
        "Active polls retrieved successfully",
        user_polls(&user, true).await?,
    )))
}

/// Records a ballot and answers with the results as the voter may now see them.
pub async fn vote(
    Extension(user): Extension<User>,
    PathParams(poll_id): PathParams<String>,
    JsonBody(request): JsonBody<VoteRequest>,
) -> ApiResult<Json<Envelope<PollResults>>> {
    let id = parse_id(&poll_id, "poll")?;
    let now = Utc::now();

    match database::poll::vote(id, &user, &request.selected_options, now).await {
        Ok(poll) => Ok(Json(Envelope::ok(
            "Vote recorded successfully",
            poll.results(Some(user.id), now),
        ))),
        Err(UpdateError::NotFound) => Err(ApiError::NotFound("Poll not found".into())),
        Err(UpdateError::Rejected(VoteError::NotInAudience)) => {
            Err(ApiError::forbidden("You are not part of this poll's audience"))
        }
        Err(UpdateError::Rejected(e)) => {
            Err(ApiError::operation("Failed to record vote", "Voting failed", e))
        }
        Err(UpdateError::Database(e)) => Err(e.into()),
    }
}

pub async fn poll_results(
    Extension(user): Extension<User>,
    PathParams(poll_id): PathParams<String>,
) -> ApiResult<Json<Envelope<PollResults>>> {
    let id = parse_id(&poll_id, "poll")?;

    let Some(poll) = database::poll::find(id).await? else {
        return Err(ApiError::NotFound("Poll not found".into()));
    };

    let owner = poll.created_by == user.id || user.role == Role::Admin;
    if !owner && !poll.visible_to(&user) {
        return Err(ApiError::NotFound("Poll not found".into()));
    }

    let viewer = (!owner).then_some(user.id);
    Ok(Json(Envelope::ok(
        "Poll results retrieved successfully",
        poll.results(viewer, Utc::now()),
    )))
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use super::*;
    use crate::model::{
        poll::{NewPoll, ShowResults},
        user::tests::user,
    };

    fn voted_poll(show_results: ShowResults, anonymous: bool, now: DateTime<Utc>) -> Poll {
        let mut poll = NewPoll {
            title: "Field trip".into(),
            description: "Pick a destination".into(),
            kind: None,
            options: vec!["A".into(), "B".into()],
            deadline: now + TimeDelta::days(1),
            is_anonymous: Some(anonymous),
            audience: None,
            target_users: vec![],
            show_results: Some(show_results),
            allow_multiple_votes: None,
            max_votes_per_user: None,
            category: None,
            tags: vec![],
        }
        .into_poll(9, now)
        .unwrap();
        poll.add_vote(1, &[0], now).unwrap();
        poll
    }

    fn option_tallies(listing: &UserPoll) -> Vec<(i32, usize)> {
        listing
            .poll
            .options
            .iter()
            .map(|o| (o.votes, o.voters.len()))
            .collect()
    }

    #[test]
    fn listing_hides_tallies_until_the_user_votes() {
        let now = Utc::now();
        let poll = voted_poll(ShowResults::AfterVote, false, now);

        let listing = UserPoll::new(poll.clone(), &user(2, Role::Student), now);
        assert!(matches!(listing.results, PollResults::Hidden { .. }));
        assert_eq!(option_tallies(&listing), vec![(0, 0), (0, 0)]);
        assert!(listing.poll.voters.is_empty());
        assert!(!listing.has_voted);
        assert!(listing.can_vote);

        let json = serde_json::to_value(&listing).unwrap();
        assert_eq!(json["options"][0]["votes"], 0);
        assert_eq!(json["results"]["message"], "Vote first to see results");

        let own = UserPoll::new(poll, &user(1, Role::Student), now);
        assert!(matches!(own.results, PollResults::Visible(_)));
        assert_eq!(option_tallies(&own), vec![(1, 1), (0, 0)]);
        assert!(own.has_voted);
    }

    #[test]
    fn listing_hides_tallies_until_the_deadline() {
        let now = Utc::now();
        let poll = voted_poll(ShowResults::AfterDeadline, false, now);

        let voter = UserPoll::new(poll.clone(), &user(1, Role::Student), now);
        assert!(matches!(voter.results, PollResults::Hidden { .. }));
        assert_eq!(option_tallies(&voter), vec![(0, 0), (0, 0)]);
        assert_eq!(voter.poll.voters.len(), 1);

        let after = poll.deadline + TimeDelta::minutes(1);
        let later = UserPoll::new(poll, &user(2, Role::Student), after);
        assert!(matches!(later.results, PollResults::Visible(_)));
        assert_eq!(option_tallies(&later), vec![(1, 1), (0, 0)]);
        assert!(!later.can_vote);
    }

    #[test]
    fn anonymous_listing_never_names_voters() {
        let now = Utc::now();
        let mut poll = voted_poll(ShowResults::Always, true, now);
        // Voter ids on an anonymous poll are dropped even if they were loaded
        poll.options[0].voters.push(1);

        let listing = UserPoll::new(poll, &user(2, Role::Student), now);
        assert_eq!(option_tallies(&listing), vec![(1, 0), (0, 0)]);
    }
}

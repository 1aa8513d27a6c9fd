use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use sqlx::{PgConnection, Row, postgres::PgRow};

use crate::{
    database::{DatabaseError, UpdateError, pool},
    model::{
        Status, UserId,
        audience::{Audience, AudienceKind},
        poll::{Ballot, Poll, PollId, PollOption, VoteError},
        user::User,
    },
};

const POLL_COLUMNS: &str = "id, title, description, kind, deadline, is_anonymous, audience, \
                            created_by, status, allow_multiple_votes, show_results, \
                            max_votes_per_user, category, tags, created_at, updated_at";

fn index_to_column(index: usize) -> i32 {
    index as i32
}

/// Builds the full aggregate for one `polls` row. Option voters are rebuilt from the ballots.
async fn hydrate(conn: &mut PgConnection, row: &PgRow) -> Result<Poll, DatabaseError> {
    let id: PollId = row.try_get("id")?;
    let kind: String = row.try_get("kind")?;
    let status: String = row.try_get("status")?;
    let show_results: String = row.try_get("show_results")?;
    let is_anonymous: bool = row.try_get("is_anonymous")?;
    let audience: String = row.try_get("audience")?;
    let audience = audience.parse::<AudienceKind>()?;

    let targets = if audience == AudienceKind::Specific {
        sqlx::query("SELECT user_id FROM poll_targets WHERE poll_id = $1;")
            .bind(id)
            .fetch_all(&mut *conn)
            .await?
            .iter()
            .map(|r| r.try_get("user_id"))
            .collect::<Result<Vec<UserId>, _>>()?
    } else {
        vec![]
    };

    let mut options = sqlx::query(
        "SELECT text, votes FROM poll_options WHERE poll_id = $1 ORDER BY position;",
    )
    .bind(id)
    .fetch_all(&mut *conn)
    .await?
    .iter()
    .map(|r| -> Result<PollOption, DatabaseError> {
        Ok(PollOption {
            text: r.try_get("text")?,
            votes: r.try_get("votes")?,
            voters: vec![],
        })
    })
    .collect::<Result<Vec<PollOption>, _>>()?;

    let mut voters: BTreeMap<UserId, Vec<Ballot>> = BTreeMap::new();
    let rows = sqlx::query(
        "SELECT user_id, voted_at, selected_options FROM poll_ballots \
         WHERE poll_id = $1 ORDER BY id;",
    )
    .bind(id)
    .fetch_all(&mut *conn)
    .await?;
    for r in rows {
        let user: UserId = r.try_get("user_id")?;
        let selected: Vec<i32> = r.try_get("selected_options")?;

        let mut selected_options = Vec::with_capacity(selected.len());
        for index in selected {
            let Some(option) = usize::try_from(index)
                .ok()
                .and_then(|i| options.get_mut(i).map(|o| (i, o)))
            else {
                return Err(DatabaseError::Corrupt(format!(
                    "ballot on poll {id} selects missing option {index}"
                )));
            };
            if !is_anonymous {
                option.1.voters.push(user);
            }
            selected_options.push(option.0);
        }

        voters.entry(user).or_default().push(Ballot {
            voted_at: r.try_get("voted_at")?,
            selected_options,
        });
    }

    Ok(Poll {
        id,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        kind: kind.parse()?,
        options,
        deadline: row.try_get("deadline")?,
        is_anonymous,
        audience: Audience::new(audience, targets)
            .map_err(|e| DatabaseError::Corrupt(e.to_string()))?,
        created_by: row.try_get("created_by")?,
        voters,
        status: status.parse()?,
        allow_multiple_votes: row.try_get("allow_multiple_votes")?,
        show_results: show_results.parse()?,
        max_votes_per_user: row.try_get("max_votes_per_user")?,
        category: row.try_get("category")?,
        tags: row.try_get("tags")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

async fn hydrate_all(rows: Vec<PgRow>) -> Result<Vec<Poll>, DatabaseError> {
    let mut conn = pool()?.acquire().await?;
    let mut polls = Vec::with_capacity(rows.len());
    for row in &rows {
        polls.push(hydrate(&mut conn, row).await?);
    }
    Ok(polls)
}

/// Stores a new poll with its options and targets. Returns it with its id.
pub async fn create(mut poll: Poll) -> Result<Poll, DatabaseError> {
    let mut transaction = pool()?.begin().await?;

    let row = sqlx::query(
        "INSERT INTO polls (title, description, kind, deadline, is_anonymous, audience, \
         created_by, status, allow_multiple_votes, show_results, max_votes_per_user, category, \
         tags, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15) RETURNING id;",
    )
    .bind(&poll.title)
    .bind(&poll.description)
    .bind(poll.kind.as_str())
    .bind(poll.deadline)
    .bind(poll.is_anonymous)
    .bind(poll.audience.kind().as_str())
    .bind(poll.created_by)
    .bind(poll.status.as_str())
    .bind(poll.allow_multiple_votes)
    .bind(poll.show_results.as_str())
    .bind(poll.max_votes_per_user)
    .bind(&poll.category)
    .bind(&poll.tags)
    .bind(poll.created_at)
    .bind(poll.updated_at)
    .fetch_one(&mut *transaction)
    .await?;
    poll.id = row.try_get("id")?;

    for target in poll.audience.targets() {
        sqlx::query("INSERT INTO poll_targets (poll_id, user_id) VALUES ($1, $2);")
            .bind(poll.id)
            .bind(target)
            .execute(&mut *transaction)
            .await?;
    }

    for (position, option) in poll.options.iter().enumerate() {
        sqlx::query(
            "INSERT INTO poll_options (poll_id, position, text, votes) VALUES ($1, $2, $3, $4);",
        )
        .bind(poll.id)
        .bind(index_to_column(position))
        .bind(&option.text)
        .bind(option.votes)
        .execute(&mut *transaction)
        .await?;
    }

    transaction.commit().await?;
    tracing::info!("Poll {} created by {}", poll.id, poll.created_by);
    Ok(poll)
}

pub async fn find(id: PollId) -> Result<Option<Poll>, DatabaseError> {
    find_where(id, None).await
}

/// One of `teacher`'s polls.
pub async fn find_for_teacher(id: PollId, teacher: UserId) -> Result<Option<Poll>, DatabaseError> {
    find_where(id, Some(teacher)).await
}

async fn find_where(id: PollId, owner: Option<UserId>) -> Result<Option<Poll>, DatabaseError> {
    let mut conn = pool()?.acquire().await?;
    let row = sqlx::query(&format!(
        "SELECT {POLL_COLUMNS} FROM polls \
         WHERE id = $1 AND ($2::INTEGER IS NULL OR created_by = $2);"
    ))
    .bind(id)
    .bind(owner)
    .fetch_optional(&mut *conn)
    .await?;

    match row {
        Some(row) => Ok(Some(hydrate(&mut conn, &row).await?)),
        None => Ok(None),
    }
}

/// Newest first, optionally filtered by status and capped at `limit`.
pub async fn list_for_teacher(
    teacher: UserId,
    status: Option<Status>,
    limit: Option<i64>,
) -> Result<Vec<Poll>, DatabaseError> {
    let rows = sqlx::query(&format!(
        "SELECT {POLL_COLUMNS} FROM polls \
         WHERE created_by = $1 AND ($2::TEXT IS NULL OR status = $2) \
         ORDER BY created_at DESC LIMIT $3;"
    ))
    .bind(teacher)
    .bind(status.map(|s| s.as_str()))
    .bind(limit)
    .fetch_all(pool()?)
    .await?;

    hydrate_all(rows).await
}

pub async fn count_for_teacher(teacher: UserId, status: Option<Status>) -> Result<i64, DatabaseError> {
    let row = sqlx::query(
        "SELECT COUNT(*) AS count FROM polls \
         WHERE created_by = $1 AND ($2::TEXT IS NULL OR status = $2);",
    )
    .bind(teacher)
    .bind(status.map(|s| s.as_str()))
    .fetch_one(pool()?)
    .await?;
    Ok(row.try_get("count")?)
}

/// Polls `user` may see: addressed to everyone, to the user's role, or to the user directly.
/// `active_only` keeps just the open polls whose deadline is still ahead of `now`.
pub async fn list_for_user(
    user: &User,
    active_only: bool,
    now: DateTime<Utc>,
) -> Result<Vec<Poll>, DatabaseError> {
    let role_audience = AudienceKind::for_role(user.role).map(|a| a.as_str());

    let rows = sqlx::query(&format!(
        "SELECT {POLL_COLUMNS} FROM polls p \
         WHERE (CASE WHEN $2 THEN status = 'active' AND deadline > $4 \
                ELSE status IN ('active', 'expired') END) \
         AND (audience = 'all' OR audience = $3 OR (audience = 'specific' \
         AND EXISTS (SELECT 1 FROM poll_targets t WHERE t.poll_id = p.id AND t.user_id = $1))) \
         ORDER BY deadline ASC;"
    ))
    .bind(user.id)
    .bind(active_only)
    .bind(role_audience)
    .bind(now)
    .fetch_all(pool()?)
    .await?;

    let polls = hydrate_all(rows).await?;
    Ok(polls.into_iter().filter(|p| p.visible_to(user)).collect())
}

/// Casts `user`'s ballot while holding the poll's row lock, so concurrent votes serialize.
pub async fn vote(
    id: PollId,
    user: &User,
    selection: &[i64],
    now: DateTime<Utc>,
) -> Result<Poll, UpdateError<VoteError>> {
    let mut transaction = pool()?.begin().await?;

    let row = sqlx::query(&format!(
        "SELECT {POLL_COLUMNS} FROM polls WHERE id = $1 FOR UPDATE;"
    ))
    .bind(id)
    .fetch_optional(&mut *transaction)
    .await?;
    let Some(row) = row else {
        return Err(UpdateError::NotFound);
    };
    let mut poll = hydrate(&mut transaction, &row).await?;

    poll.refresh_status(now);
    let ballot = poll
        .cast(user, selection, now)
        .map_err(UpdateError::Rejected)?
        .clone();

    let selected = ballot
        .selected_options
        .iter()
        .map(|&i| index_to_column(i))
        .collect::<Vec<i32>>();

    sqlx::query(
        "INSERT INTO poll_ballots (poll_id, user_id, voted_at, selected_options) \
         VALUES ($1, $2, $3, $4);",
    )
    .bind(id)
    .bind(user.id)
    .bind(ballot.voted_at)
    .bind(&selected)
    .execute(&mut *transaction)
    .await?;

    sqlx::query(
        "UPDATE poll_options SET votes = votes + 1 WHERE poll_id = $1 AND position = ANY($2);",
    )
    .bind(id)
    .bind(&selected)
    .execute(&mut *transaction)
    .await?;

    sqlx::query("UPDATE polls SET status = $2, updated_at = $3 WHERE id = $1;")
        .bind(id)
        .bind(poll.status.as_str())
        .bind(poll.updated_at)
        .execute(&mut *transaction)
        .await?;

    transaction.commit().await?;
    tracing::info!("User {} voted on poll {}", user.id, id);
    Ok(poll)
}

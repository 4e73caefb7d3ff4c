//! Stage-boundary artifact persistence: scope cards, research cards,
//! plans, review cards and their comments.

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use crate::data::{
    ArtifactStatus, CommentAuthor, CommentSeverity, CommentTarget, Plan, PulseDescriptor,
    ResearchCard, ReviewCard, ReviewComment, ReviewRecommendation, ScopeCard, ScopePath,
};

use super::Database;

/// Repository contract for the four stage-boundary artifacts (spec.md §4.4).
pub trait ArtifactRepository: Send + Sync {
    fn save_scope_card(&self, card: &ScopeCard) -> Result<()>;
    fn get_latest_scope_card(&self, workflow_id: &str) -> Result<Option<ScopeCard>>;
    fn set_scope_card_status(&self, id: &str, status: ArtifactStatus) -> Result<()>;

    fn save_research_card(&self, card: &ResearchCard) -> Result<()>;
    fn get_latest_research_card(&self, workflow_id: &str) -> Result<Option<ResearchCard>>;
    fn set_research_card_status(&self, id: &str, status: ArtifactStatus) -> Result<()>;

    fn save_plan(&self, plan: &Plan) -> Result<()>;
    fn get_latest_plan(&self, workflow_id: &str) -> Result<Option<Plan>>;
    fn set_plan_status(&self, id: &str, status: ArtifactStatus) -> Result<()>;

    fn save_review_card(&self, card: &ReviewCard) -> Result<()>;
    fn get_latest_review_card(&self, workflow_id: &str) -> Result<Option<ReviewCard>>;
    fn set_review_card_status(&self, id: &str, status: ArtifactStatus) -> Result<()>;
    /// Record the recommendation an agent's `complete_review` call produced,
    /// alongside its suggested commit message.
    fn set_review_card_outcome(
        &self,
        id: &str,
        recommendation: ReviewRecommendation,
        suggested_commit_message: Option<&str>,
    ) -> Result<()>;
    /// Persist the unified diff computed at merge-finalization time
    /// (spec.md §4.8's merge finalization step 2).
    fn set_review_card_diff(&self, id: &str, diff: &str) -> Result<()>;
    fn add_review_comment(&self, review_card_id: &str, comment: &ReviewComment) -> Result<()>;

    /// Delete every artifact (and review comments) belonging to a workflow.
    /// Used when a workflow is abandoned or retried from scratch.
    fn delete_all_for_workflow(&self, workflow_id: &str) -> Result<()>;
}

pub struct SqliteArtifactRepository {
    db: Database,
}

impl SqliteArtifactRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    fn row_to_scope_card(row: &rusqlite::Row) -> rusqlite::Result<ScopeCard> {
        let recommended_path: String = row.get("recommended_path")?;
        let status: String = row.get("status")?;
        let created_at: String = row.get("created_at")?;
        Ok(ScopeCard {
            id: row.get("id")?,
            workflow_id: row.get("workflow_id")?,
            summary: row.get("summary")?,
            recommended_path: if recommended_path == "full" {
                ScopePath::Full
            } else {
                ScopePath::Quick
            },
            status: parse_status(&status),
            created_at: parse_time(&created_at),
        })
    }

    fn row_to_research_card(row: &rusqlite::Row) -> rusqlite::Result<ResearchCard> {
        let status: String = row.get("status")?;
        let created_at: String = row.get("created_at")?;
        Ok(ResearchCard {
            id: row.get("id")?,
            workflow_id: row.get("workflow_id")?,
            findings: row.get("findings")?,
            status: parse_status(&status),
            created_at: parse_time(&created_at),
        })
    }

    fn row_to_plan(row: &rusqlite::Row) -> rusqlite::Result<Plan> {
        let status: String = row.get("status")?;
        let created_at: String = row.get("created_at")?;
        let pulses_json: String = row.get("pulses_json")?;
        let pulses: Vec<PulseDescriptor> = serde_json::from_str(&pulses_json).unwrap_or_default();
        Ok(Plan {
            id: row.get("id")?,
            workflow_id: row.get("workflow_id")?,
            summary: row.get("summary")?,
            pulses,
            status: parse_status(&status),
            created_at: parse_time(&created_at),
        })
    }

    fn row_to_review_card(row: &rusqlite::Row) -> rusqlite::Result<ReviewCard> {
        let status: String = row.get("status")?;
        let created_at: String = row.get("created_at")?;
        let recommendation: Option<String> = row.get("recommendation")?;
        Ok(ReviewCard {
            id: row.get("id")?,
            workflow_id: row.get("workflow_id")?,
            comments: Vec::new(),
            recommendation: recommendation.as_deref().map(parse_recommendation),
            suggested_commit_message: row.get("suggested_commit_message")?,
            diff: row.get("diff")?,
            status: parse_status(&status),
            created_at: parse_time(&created_at),
        })
    }

    fn row_to_review_comment(row: &rusqlite::Row) -> rusqlite::Result<ReviewComment> {
        let target: String = row.get("target")?;
        let severity: Option<String> = row.get("severity")?;
        let author: String = row.get("author")?;
        let created_at: String = row.get("created_at")?;
        Ok(ReviewComment {
            id: row.get("id")?,
            target: match target.as_str() {
                "file" => CommentTarget::File,
                "review" => CommentTarget::Review,
                _ => CommentTarget::Line,
            },
            file_path: row.get("file_path")?,
            start_line: row.get::<_, Option<i64>>("start_line")?.map(|v| v as u32),
            end_line: row.get::<_, Option<i64>>("end_line")?.map(|v| v as u32),
            severity: severity.as_deref().map(parse_severity),
            author: if author == "user" {
                CommentAuthor::User
            } else {
                CommentAuthor::Agent
            },
            body: row.get("body")?,
            created_at: parse_time(&created_at),
        })
    }

    fn fetch_comments(&self, review_card_id: &str) -> Result<Vec<ReviewComment>> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(
            "SELECT * FROM review_comments WHERE review_card_id = ?1 ORDER BY created_at ASC",
        )?;
        let comments = stmt
            .query_map(params![review_card_id], Self::row_to_review_comment)?
            .collect::<rusqlite::Result<_>>()
            .context("loading review comments")?;
        Ok(comments)
    }
}

fn parse_time(s: &str) -> chrono::DateTime<Utc> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn parse_status(s: &str) -> ArtifactStatus {
    match s {
        "approved" => ArtifactStatus::Approved,
        "rejected" => ArtifactStatus::Rejected,
        _ => ArtifactStatus::Pending,
    }
}

fn status_str(status: ArtifactStatus) -> &'static str {
    match status {
        ArtifactStatus::Pending => "pending",
        ArtifactStatus::Approved => "approved",
        ArtifactStatus::Rejected => "rejected",
    }
}

fn parse_recommendation(s: &str) -> ReviewRecommendation {
    match s {
        "deny" => ReviewRecommendation::Deny,
        "manual_review" => ReviewRecommendation::ManualReview,
        _ => ReviewRecommendation::Approve,
    }
}

fn recommendation_str(r: ReviewRecommendation) -> &'static str {
    match r {
        ReviewRecommendation::Approve => "approve",
        ReviewRecommendation::Deny => "deny",
        ReviewRecommendation::ManualReview => "manual_review",
    }
}

fn parse_severity(s: &str) -> CommentSeverity {
    match s {
        "High" => CommentSeverity::High,
        "Low" => CommentSeverity::Low,
        _ => CommentSeverity::Medium,
    }
}

fn severity_str(s: CommentSeverity) -> &'static str {
    match s {
        CommentSeverity::High => "High",
        CommentSeverity::Medium => "Medium",
        CommentSeverity::Low => "Low",
    }
}

fn target_str(t: CommentTarget) -> &'static str {
    match t {
        CommentTarget::Line => "line",
        CommentTarget::File => "file",
        CommentTarget::Review => "review",
    }
}

fn author_str(a: CommentAuthor) -> &'static str {
    match a {
        CommentAuthor::Agent => "agent",
        CommentAuthor::User => "user",
    }
}

impl ArtifactRepository for SqliteArtifactRepository {
    fn save_scope_card(&self, card: &ScopeCard) -> Result<()> {
        self.db.conn().execute(
            "INSERT INTO scope_cards (id, workflow_id, summary, recommended_path, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                card.id,
                card.workflow_id,
                card.summary,
                if card.recommended_path == ScopePath::Full { "full" } else { "quick" },
                status_str(card.status),
                card.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn get_latest_scope_card(&self, workflow_id: &str) -> Result<Option<ScopeCard>> {
        self.db
            .conn()
            .query_row(
                "SELECT * FROM scope_cards WHERE workflow_id = ?1 ORDER BY created_at DESC LIMIT 1",
                params![workflow_id],
                Self::row_to_scope_card,
            )
            .optional()
            .context("querying latest scope card")
    }

    fn set_scope_card_status(&self, id: &str, status: ArtifactStatus) -> Result<()> {
        self.db.conn().execute(
            "UPDATE scope_cards SET status = ?1 WHERE id = ?2",
            params![status_str(status), id],
        )?;
        Ok(())
    }

    fn save_research_card(&self, card: &ResearchCard) -> Result<()> {
        self.db.conn().execute(
            "INSERT INTO research_cards (id, workflow_id, findings, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                card.id,
                card.workflow_id,
                card.findings,
                status_str(card.status),
                card.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn get_latest_research_card(&self, workflow_id: &str) -> Result<Option<ResearchCard>> {
        self.db
            .conn()
            .query_row(
                "SELECT * FROM research_cards WHERE workflow_id = ?1 ORDER BY created_at DESC LIMIT 1",
                params![workflow_id],
                Self::row_to_research_card,
            )
            .optional()
            .context("querying latest research card")
    }

    fn set_research_card_status(&self, id: &str, status: ArtifactStatus) -> Result<()> {
        self.db.conn().execute(
            "UPDATE research_cards SET status = ?1 WHERE id = ?2",
            params![status_str(status), id],
        )?;
        Ok(())
    }

    fn save_plan(&self, plan: &Plan) -> Result<()> {
        let pulses_json = serde_json::to_string(&plan.pulses)?;
        self.db.conn().execute(
            "INSERT INTO plans (id, workflow_id, summary, pulses_json, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                plan.id,
                plan.workflow_id,
                plan.summary,
                pulses_json,
                status_str(plan.status),
                plan.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn get_latest_plan(&self, workflow_id: &str) -> Result<Option<Plan>> {
        self.db
            .conn()
            .query_row(
                "SELECT * FROM plans WHERE workflow_id = ?1 ORDER BY created_at DESC LIMIT 1",
                params![workflow_id],
                Self::row_to_plan,
            )
            .optional()
            .context("querying latest plan")
    }

    fn set_plan_status(&self, id: &str, status: ArtifactStatus) -> Result<()> {
        self.db.conn().execute(
            "UPDATE plans SET status = ?1 WHERE id = ?2",
            params![status_str(status), id],
        )?;
        Ok(())
    }

    fn save_review_card(&self, card: &ReviewCard) -> Result<()> {
        self.db.conn().execute(
            "INSERT INTO review_cards (id, workflow_id, recommendation, suggested_commit_message, diff, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                card.id,
                card.workflow_id,
                card.recommendation.map(recommendation_str),
                card.suggested_commit_message,
                card.diff,
                status_str(card.status),
                card.created_at.to_rfc3339(),
            ],
        )?;
        for comment in &card.comments {
            self.add_review_comment(&card.id, comment)?;
        }
        Ok(())
    }

    fn get_latest_review_card(&self, workflow_id: &str) -> Result<Option<ReviewCard>> {
        let card = self
            .db
            .conn()
            .query_row(
                "SELECT * FROM review_cards WHERE workflow_id = ?1 ORDER BY created_at DESC LIMIT 1",
                params![workflow_id],
                Self::row_to_review_card,
            )
            .optional()
            .context("querying latest review card")?;

        match card {
            Some(mut card) => {
                card.comments = self.fetch_comments(&card.id)?;
                Ok(Some(card))
            }
            None => Ok(None),
        }
    }

    fn set_review_card_status(&self, id: &str, status: ArtifactStatus) -> Result<()> {
        self.db.conn().execute(
            "UPDATE review_cards SET status = ?1 WHERE id = ?2",
            params![status_str(status), id],
        )?;
        Ok(())
    }

    fn set_review_card_outcome(
        &self,
        id: &str,
        recommendation: ReviewRecommendation,
        suggested_commit_message: Option<&str>,
    ) -> Result<()> {
        self.db.conn().execute(
            "UPDATE review_cards SET recommendation = ?1, suggested_commit_message = ?2 WHERE id = ?3",
            params![recommendation_str(recommendation), suggested_commit_message, id],
        )?;
        Ok(())
    }

    fn set_review_card_diff(&self, id: &str, diff: &str) -> Result<()> {
        self.db.conn().execute(
            "UPDATE review_cards SET diff = ?1 WHERE id = ?2",
            params![diff, id],
        )?;
        Ok(())
    }

    fn add_review_comment(&self, review_card_id: &str, comment: &ReviewComment) -> Result<()> {
        self.db.conn().execute(
            "INSERT INTO review_comments (id, review_card_id, target, file_path, start_line, end_line, severity, author, body, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                comment.id,
                review_card_id,
                target_str(comment.target),
                comment.file_path,
                comment.start_line.map(|v| v as i64),
                comment.end_line.map(|v| v as i64),
                comment.severity.map(severity_str),
                author_str(comment.author),
                comment.body,
                comment.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn delete_all_for_workflow(&self, workflow_id: &str) -> Result<()> {
        let conn = self.db.conn();
        conn.execute(
            "DELETE FROM review_comments WHERE review_card_id IN (SELECT id FROM review_cards WHERE workflow_id = ?1)",
            params![workflow_id],
        )?;
        conn.execute("DELETE FROM review_cards WHERE workflow_id = ?1", params![workflow_id])?;
        conn.execute("DELETE FROM plans WHERE workflow_id = ?1", params![workflow_id])?;
        conn.execute("DELETE FROM research_cards WHERE workflow_id = ?1", params![workflow_id])?;
        conn.execute("DELETE FROM scope_cards WHERE workflow_id = ?1", params![workflow_id])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> SqliteArtifactRepository {
        SqliteArtifactRepository::new(Database::open_in_memory().unwrap())
    }

    #[test]
    fn scope_card_round_trips_and_latest_wins() {
        let repo = repo();
        let card = ScopeCard {
            id: uuid::Uuid::new_v4().to_string(),
            workflow_id: "wf-1".to_string(),
            summary: "add auth".to_string(),
            recommended_path: ScopePath::Quick,
            status: ArtifactStatus::Pending,
            created_at: Utc::now(),
        };
        repo.save_scope_card(&card).unwrap();

        let fetched = repo.get_latest_scope_card("wf-1").unwrap().unwrap();
        assert_eq!(fetched.summary, "add auth");
        assert_eq!(fetched.recommended_path, ScopePath::Quick);
    }

    #[test]
    fn plan_persists_pulse_descriptors() {
        let repo = repo();
        let plan = Plan {
            id: uuid::Uuid::new_v4().to_string(),
            workflow_id: "wf-1".to_string(),
            summary: "three pulses".to_string(),
            pulses: vec![PulseDescriptor {
                id: "p1".to_string(),
                title: "Add model".to_string(),
                description: "".to_string(),
                expected_changes: vec!["src/model.rs".to_string()],
                estimated_size: "small".to_string(),
                depends_on: vec![],
            }],
            status: ArtifactStatus::Pending,
            created_at: Utc::now(),
        };
        repo.save_plan(&plan).unwrap();

        let fetched = repo.get_latest_plan("wf-1").unwrap().unwrap();
        assert_eq!(fetched.pulses.len(), 1);
        assert_eq!(fetched.pulses[0].title, "Add model");
    }

    #[test]
    fn review_card_carries_its_comments() {
        let repo = repo();
        let mut card = ReviewCard::new("wf-1");
        card.recommendation = Some(ReviewRecommendation::Approve);
        repo.save_review_card(&card).unwrap();

        repo.add_review_comment(
            &card.id,
            &ReviewComment {
                id: uuid::Uuid::new_v4().to_string(),
                target: CommentTarget::Line,
                file_path: Some("src/lib.rs".to_string()),
                start_line: Some(10),
                end_line: Some(12),
                severity: Some(CommentSeverity::High),
                author: CommentAuthor::Agent,
                body: "missing error handling".to_string(),
                created_at: Utc::now(),
            },
        )
        .unwrap();

        let fetched = repo.get_latest_review_card("wf-1").unwrap().unwrap();
        assert_eq!(fetched.comments.len(), 1);
        assert_eq!(fetched.comments[0].severity, Some(CommentSeverity::High));
    }

    #[test]
    fn delete_all_for_workflow_clears_everything() {
        let repo = repo();
        let card = ScopeCard {
            id: uuid::Uuid::new_v4().to_string(),
            workflow_id: "wf-1".to_string(),
            summary: "x".to_string(),
            recommended_path: ScopePath::Quick,
            status: ArtifactStatus::Pending,
            created_at: Utc::now(),
        };
        repo.save_scope_card(&card).unwrap();
        repo.delete_all_for_workflow("wf-1").unwrap();
        assert!(repo.get_latest_scope_card("wf-1").unwrap().is_none());
    }
}

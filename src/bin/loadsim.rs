//! Concurrent load simulation for the synchronization core.
//!
//! Drives the same public write paths as real clients — buzz inserts and
//! answer submissions against a shared store — so the core's race
//! resolution can be observed under genuinely concurrent load. Usage:
//! `loadsim [teams] [questions]`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use rand::Rng;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use showsync::config::SyncConfig;
use showsync::services::{
    answer_service, buzz_service, question_service, session_service, snapshot_service,
};
use showsync::store::RowStore;
use showsync::store::memory::MemoryStore;
use showsync::store::rows::{AnswerValue, QuestionRow, RoundKind};
use showsync::sync::{ClientRole, RecordOutcome, SyncCore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let mut args = std::env::args().skip(1);
    let teams: usize = parse_arg(args.next(), 8).context("parsing team count")?;
    let questions: usize = parse_arg(args.next(), 5).context("parsing question count")?;

    let store: Arc<dyn RowStore> = Arc::new(MemoryStore::new());
    let core = SyncCore::new(store.clone(), SyncConfig::default());

    let session = session_service::create_session(&store, "loadsim").await?;
    session_service::activate_session(&store, session.id).await?;
    let round = session_service::create_round(
        &store,
        session.id,
        "Simulated blind test",
        RoundKind::BlindTest,
        30,
        None,
    )
    .await?;

    let mut question_ids = Vec::with_capacity(questions);
    for index in 0..questions {
        let question = QuestionRow {
            id: Uuid::new_v4(),
            round_id: round.id,
            kind: RoundKind::BlindTest,
            prompt: format!("Track {}", index + 1),
            answer: format!("Answer {}", index + 1),
            points: 10,
            penalty: 5,
            audio_url: None,
            cues: None,
        };
        question_ids.push(session_service::add_question(&store, question).await?.id);
    }

    let mut team_ids = Vec::with_capacity(teams);
    for index in 0..teams {
        let team = session_service::create_team(
            &store,
            session.id,
            &format!("Team {}", index + 1),
            "#ff2d95",
        )
        .await?;
        team_ids.push(team.id);
    }

    let _session_handle = core.attach(session.id).await?;
    for &team in &team_ids {
        core.announce_presence(ClientRole::Team, team).await?;
    }

    info!(teams, questions, "simulation starting");

    for (index, &question_id) in question_ids.iter().enumerate() {
        let instance =
            question_service::activate_question(&core, session.id, round.id, question_id).await?;

        let mut handles = Vec::with_capacity(team_ids.len());
        for &team in &team_ids {
            let core = core.clone();
            let session_id = session.id;
            handles.push(tokio::spawn(async move {
                let jitter = {
                    let mut rng = rand::rng();
                    rng.random_range(1..40)
                };
                tokio::time::sleep(Duration::from_millis(jitter)).await;
                buzz_service::record_attempt(&core, session_id, team, instance).await
            }));
        }

        let mut announced = 0usize;
        let mut recorded = 0usize;
        let mut rejected = 0usize;
        for handle in handles {
            match handle.await.context("joining buzz task")? {
                Ok(receipt) => {
                    if receipt.first.is_some() {
                        announced += 1;
                    }
                    if receipt.outcome == RecordOutcome::Recorded {
                        recorded += 1;
                    } else {
                        rejected += 1;
                    }
                }
                Err(err) => warn!(error = %err, "buzz attempt failed"),
            }
        }

        if announced != 1 {
            warn!(
                question = index + 1,
                announced, "expected exactly one first-buzz announcement"
            );
        }
        info!(
            question = index + 1,
            recorded, rejected, "question race settled"
        );

        // The winner answers and gets graded, exercising the scoring path.
        let winner = core
            .with_resolver(|resolver| resolver.winner(instance).map(|first| first.team_id))
            .await;
        if let Some(team_id) = winner {
            answer_service::submit_answer(
                &core,
                session.id,
                team_id,
                instance,
                AnswerValue::Text(format!("Answer {}", index + 1)),
            )
            .await?;
            answer_service::grade_answer(&core, session.id, team_id, instance, true).await?;
        }
    }

    let snapshot = snapshot_service::fetch_snapshot(&store, session.id).await?;
    for team in &snapshot.teams {
        info!(team = %team.name, score = team.score, "final score");
    }

    session_service::teardown_session(&store, session.id).await?;
    Ok(())
}

fn parse_arg(value: Option<String>, default: usize) -> anyhow::Result<usize> {
    match value {
        Some(raw) => Ok(raw.parse()?),
        None => Ok(default),
    }
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

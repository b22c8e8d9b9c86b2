use jobscout_core::organization::{AnalysisResult, NewSavedJob};
use jobscout_core::traits::{SavedJobStore, UsageEvent, UsageOperation, UsageSink};
use uuid::Uuid;

use crate::common::{create_org, setup_test_db};

fn analysis(url: &str, title: &str) -> AnalysisResult {
    AnalysisResult {
        title: title.into(),
        url: url.into(),
        suitability_score: 82,
        good_fit_reasons: vec!["daily Rust".into()],
        consideration_points: vec!["on-call rotation".into()],
        stretch_goals: vec![],
        location: Some("Remote".into()),
        tech_stack: Some(vec!["Rust".into(), "Postgres".into()]),
        salary: None,
        experience_level: None,
        language_requirements: None,
        visa_sponsorship_offered: Some(false),
        relocation_assistance_offered: None,
    }
}

#[tokio::test]
async fn save_and_list_roundtrips_the_analysis_payload() {
    let (db, _container) = setup_test_db().await;
    let org = create_org(&db.organization_repo(), 90).await;
    let repo = db.saved_job_repo();
    let user = Uuid::new_v4();

    let result = analysis("https://x.example/jobs/1", "Backend Engineer");
    let job = NewSavedJob::from_analysis(user, org.id, &result);
    repo.save(&job).await.unwrap();

    let saved = repo.list_for_user(user).await.unwrap();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].suitability_score, 82);
    assert_eq!(saved[0].analysis.tech_stack.as_ref().unwrap().len(), 2);
}

#[tokio::test]
async fn exists_matches_by_url_for_the_same_user_only() {
    let (db, _container) = setup_test_db().await;
    let org = create_org(&db.organization_repo(), 90).await;
    let repo = db.saved_job_repo();
    let user = Uuid::new_v4();

    let result = analysis("https://x.example/jobs/1", "Backend Engineer");
    repo.save(&NewSavedJob::from_analysis(user, org.id, &result))
        .await
        .unwrap();

    // Same URL, even with a changed title, is a duplicate.
    assert!(repo.exists(user, "https://x.example/jobs/1", "Renamed Role").await.unwrap());
    assert!(!repo.exists(user, "https://x.example/jobs/2", "Backend Engineer").await.unwrap());
    // Another user is free to save the same posting.
    assert!(!repo.exists(Uuid::new_v4(), "https://x.example/jobs/1", "Backend Engineer").await.unwrap());
}

#[tokio::test]
async fn usage_events_accumulate_per_user() {
    let (db, _container) = setup_test_db().await;
    let org = create_org(&db.organization_repo(), 90).await;
    let sink = db.usage_repo();
    let user = Uuid::new_v4();

    for operation in [UsageOperation::InitialMatch, UsageOperation::DeepAnalysis] {
        sink.record(&UsageEvent {
            process_id: Uuid::new_v4(),
            operation,
            prompt_tokens: 1000,
            output_tokens: 200,
            total_tokens: 1200,
            cost_usd: 0.135,
            user_id: user,
            organization_id: Some(org.id),
        })
        .await
        .unwrap();
    }

    let (tokens, cost) = sink.totals_for_user(user).await.unwrap();
    assert_eq!(tokens, 2400);
    assert!((cost - 0.27).abs() < 1e-9);

    let (other_tokens, _) = sink.totals_for_user(Uuid::new_v4()).await.unwrap();
    assert_eq!(other_tokens, 0);
}

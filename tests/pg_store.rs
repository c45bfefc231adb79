mod common;

use anyhow::Result;
use common::{acquire_db_lock, test_pool, with_conn};
use diesel::connection::SimpleConnection;
use serde_json::json;
use sijadin::classifier::FileCategory;
use sijadin::db::PgPool;
use sijadin::draft::{Draft, DraftMeta};
use sijadin::error::PipelineError;
use sijadin::facts::Facts;
use sijadin::jobs::{self, JobQueueError, STATUS_RUNNING, STATUS_SUCCESS};
use pgvector::Vector;
use sijadin::models::NewDocumentChunk;
use sijadin::store::{PgStore, PipelineStore, REPORT_STATUS_READY_TO_REVIEW};
use uuid::Uuid;

async fn insert_report(pool: &PgPool, template_id: Option<Uuid>) -> Result<Uuid> {
    let report_id = Uuid::new_v4();
    let template = template_id.map_or_else(|| "NULL".to_string(), |id| format!("'{id}'"));
    with_conn(pool, move |conn| {
        conn.batch_execute(&format!(
            "INSERT INTO reports (id, template_id, title) VALUES ('{report_id}', {template}, 'Perjalanan Bandung');"
        ))?;
        Ok(())
    })
    .await?;
    Ok(report_id)
}

async fn insert_file(pool: &PgPool, report_id: Uuid, filename: &str, offset_secs: i64) -> Result<Uuid> {
    let file_id = Uuid::new_v4();
    let filename = filename.to_string();
    with_conn(pool, move |conn| {
        conn.batch_execute(&format!(
            "INSERT INTO report_files (id, report_id, filename, mime, size_bytes, storage_key, created_at) \
             VALUES ('{file_id}', '{report_id}', '{filename}', 'application/pdf', 10, \
             'reports/{report_id}/{file_id}', NOW() + INTERVAL '{offset_secs} seconds');"
        ))?;
        Ok(())
    })
    .await?;
    Ok(file_id)
}

fn chunk(report_id: Uuid, file_id: Uuid, index: i32, embedding: Option<Vec<f32>>) -> NewDocumentChunk {
    NewDocumentChunk {
        id: Uuid::new_v4(),
        report_id,
        file_id: Some(file_id),
        content: format!("Potongan {index}"),
        chunk_index: index,
        source_type: Some("pdf".to_string()),
        page_number: Some(1),
        embedding: embedding.map(Vector::from),
    }
}

/// A 768-dimension vector with the given leading components.
fn embedding(leading: &[f32]) -> Vec<f32> {
    let mut vector = vec![0.0; 768];
    vector[..leading.len()].copy_from_slice(leading);
    vector
}

fn draft(template_id: &str) -> Draft {
    Draft {
        template_id: template_id.to_string(),
        title: "Laporan Perjalanan Dinas Bimtek".to_string(),
        meta: DraftMeta::default(),
        sections: Vec::new(),
    }
}

/// Queues, claims and finalizes one run of the report; returns the draft version.
async fn complete_run(store: &PgStore, pool: &PgPool, report_id: Uuid) -> Result<i32> {
    let job = with_conn(pool, move |conn| Ok(jobs::enqueue_job_run(conn, report_id)?)).await?;
    let claimed = store.claim_job_run(job.id).await?;
    assert_eq!(claimed.status, STATUS_RUNNING);
    Ok(store
        .finalize_draft(report_id, job.id, &draft("default"), &Facts::default())
        .await?)
}

#[tokio::test]
async fn job_runs_follow_the_status_machine() -> Result<()> {
    let _guard = acquire_db_lock().await;
    let Some(pool) = test_pool().await? else {
        return Ok(());
    };
    let store = PgStore::new(pool.clone());
    let report_id = insert_report(&pool, None).await?;

    let queued = with_conn(&pool, move |conn| Ok(jobs::enqueue_job_run(conn, report_id)?)).await?;
    let duplicate = with_conn(&pool, move |conn| Ok(jobs::enqueue_job_run(conn, report_id))).await?;
    assert!(matches!(duplicate, Err(JobQueueError::AlreadyActive(id)) if id == report_id));

    let claimed = store
        .claim_next_job_run()
        .await?
        .expect("queued run is claimable");
    assert_eq!(claimed.id, queued.id);
    assert_eq!(claimed.status, STATUS_RUNNING);
    assert!(claimed.started_at.is_some());
    assert!(store.claim_next_job_run().await?.is_none());

    store.update_progress(queued.id, 40).await?;
    assert_eq!(store.load_job_run(queued.id).await?.progress, 40);

    let version = store
        .finalize_draft(report_id, queued.id, &draft("default"), &Facts::default())
        .await?;
    assert_eq!(version, 1);
    let done = store.load_job_run(queued.id).await?;
    assert_eq!(done.status, STATUS_SUCCESS);
    assert_eq!(done.progress, 100);
    assert!(done.finished_at.is_some());

    // a second completion is rejected and writes no draft
    let err = store
        .finalize_draft(report_id, queued.id, &draft("default"), &Facts::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Queue(JobQueueError::InvalidTransition { .. })
    ));
    let drafts = with_conn(&pool, move |conn| {
        use diesel::prelude::*;
        use sijadin::schema::report_draft_versions;
        Ok(report_draft_versions::table
            .filter(report_draft_versions::report_id.eq(report_id))
            .count()
            .get_result::<i64>(conn)?)
    })
    .await?;
    assert_eq!(drafts, 1);

    let err = store
        .mark_failed(queued.id, json!({"error": "late"}))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Queue(JobQueueError::InvalidTransition { .. })
    ));
    let err = store.update_progress(queued.id, 50).await.unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Queue(JobQueueError::InvalidTransition { .. })
    ));

    // a finished run no longer blocks a new one
    let next = with_conn(&pool, move |conn| Ok(jobs::enqueue_job_run(conn, report_id)?)).await?;
    assert_ne!(next.id, queued.id);

    let missing = store.load_job_run(Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(missing, PipelineError::JobNotFound(_)));
    Ok(())
}

#[tokio::test]
async fn drafts_are_versioned_and_templates_resolved() -> Result<()> {
    let _guard = acquire_db_lock().await;
    let Some(pool) = test_pool().await? else {
        return Ok(());
    };
    let store = PgStore::new(pool.clone());

    let template_id = Uuid::new_v4();
    with_conn(&pool, move |conn| {
        conn.batch_execute(&format!(
            "INSERT INTO doc_templates (id, name, version, schema_json) VALUES ('{template_id}', \
             'Laporan Perjalanan Dinas', '1', \
             '{{\"sections\": [{{\"key\": \"pendahuluan\", \"title\": \"Pendahuluan\"}}, {{\"key\": \"lampiran\"}}]}}');"
        ))?;
        Ok(())
    })
    .await?;
    let report_id = insert_report(&pool, Some(template_id)).await?;
    let plain_report = insert_report(&pool, None).await?;

    let schema = store
        .template_schema(report_id)
        .await?
        .expect("template schema");
    assert_eq!(schema.template_id, template_id.to_string());
    assert_eq!(schema.sections.len(), 2);
    assert_eq!(schema.sections[1].title, "lampiran");
    assert!(store.template_schema(plain_report).await?.is_none());

    let first = complete_run(&store, &pool, report_id).await?;
    let second = complete_run(&store, &pool, report_id).await?;
    let other = complete_run(&store, &pool, plain_report).await?;
    assert_eq!((first, second, other), (1, 2, 1));

    let status = with_conn(&pool, move |conn| {
        use diesel::prelude::*;
        use sijadin::schema::reports;
        Ok(reports::table
            .find(report_id)
            .select(reports::status)
            .first::<String>(conn)?)
    })
    .await?;
    assert_eq!(status, REPORT_STATUS_READY_TO_REVIEW);
    Ok(())
}

#[tokio::test]
async fn files_and_chunks_round_trip() -> Result<()> {
    let _guard = acquire_db_lock().await;
    let Some(pool) = test_pool().await? else {
        return Ok(());
    };
    let store = PgStore::new(pool.clone());
    let report_id = insert_report(&pool, None).await?;
    let later = insert_file(&pool, report_id, "tiket.pdf", 5).await?;
    let earlier = insert_file(&pool, report_id, "kak.pdf", 0).await?;

    let files = store.list_report_files(report_id).await?;
    let ids: Vec<Uuid> = files.iter().map(|file| file.id).collect();
    assert_eq!(ids, vec![earlier, later]);

    store.set_file_kind(later, FileCategory::Tiket).await?;
    let files = store.list_report_files(report_id).await?;
    assert_eq!(files[1].kind.as_deref(), Some("tiket"));
    assert_eq!(files[0].kind, None);

    assert!(!store.file_has_chunks(earlier).await?);
    assert!(!store.has_embedded_chunks(report_id).await?);
    let stored = store
        .insert_chunks(vec![
            chunk(report_id, earlier, 0, Some(embedding(&[1.0]))),
            chunk(report_id, earlier, 1, None),
            chunk(report_id, earlier, 2, Some(embedding(&[1.0, 1.0]))),
            chunk(report_id, later, 3, Some(embedding(&[0.0, 1.0]))),
        ])
        .await?;
    assert_eq!(stored, 4);
    assert_eq!(store.insert_chunks(Vec::new()).await?, 0);
    assert!(store.file_has_chunks(earlier).await?);
    assert!(store.file_has_chunks(later).await?);
    assert!(store.has_embedded_chunks(report_id).await?);

    let nearest = store
        .nearest_chunks(report_id, embedding(&[1.0, 0.1]), 2)
        .await?;
    let contents: Vec<&str> = nearest.iter().map(|c| c.content.as_str()).collect();
    assert_eq!(contents, vec!["Potongan 0", "Potongan 2"]);
    assert!(nearest[0].similarity > nearest[1].similarity);
    assert_eq!(nearest[0].file_id, Some(earlier));

    let all = store
        .nearest_chunks(report_id, embedding(&[1.0]), 10)
        .await?;
    assert_eq!(all.len(), 3);
    assert!(all.iter().all(|c| c.content != "Potongan 1"));

    let other_report = insert_report(&pool, None).await?;
    assert!(!store.has_embedded_chunks(other_report).await?);
    assert!(store
        .nearest_chunks(other_report, embedding(&[1.0]), 5)
        .await?
        .is_empty());
    Ok(())
}

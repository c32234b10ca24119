use std::sync::Arc;

use provote_admission::{AdmissionEngine, AdmissionError, CastVoteRequest, VoteOutcome};
use provote_fraud::RequestSignals;
use provote_nullables::NullJitter;
use provote_store::{AttemptLog, PollDirectory, PollInfo, VoteStore};
use provote_store_lmdb::LmdbEnvironment;
use provote_types::{
    AdmissionParams, IdempotencyKey, OptionId, PollId, SystemClock, VoterIdentity,
};

fn open_engine(dir: &std::path::Path) -> Arc<AdmissionEngine<LmdbEnvironment>> {
    let env = Arc::new(LmdbEnvironment::open(dir, 64 << 20).unwrap());
    env.put_poll(&PollInfo {
        id: PollId::new(1),
        options: vec![OptionId::new(10), OptionId::new(11)],
        is_active: true,
        closes_at: None,
    })
    .unwrap();
    Arc::new(AdmissionEngine::new(
        env,
        &AdmissionParams::load_test(),
        Arc::new(SystemClock),
        Arc::new(NullJitter::constant(0.5)),
    ))
}

fn request(option: u64) -> CastVoteRequest {
    CastVoteRequest::new(
        VoterIdentity::User(42),
        PollId::new(1),
        OptionId::new(option),
        "198.51.100.1",
    )
    .with_signals(RequestSignals::browser("Mozilla/5.0"))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_identical_submissions_write_once_to_lmdb() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path());

    let mut handles = Vec::new();
    for _ in 0..200 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            let req = request(10).with_key(IdempotencyKey::parse("k1").unwrap());
            engine.cast_vote(req).await
        }));
    }

    let mut created = 0;
    for handle in handles {
        if handle.await.unwrap().unwrap().is_created() {
            created += 1;
        }
    }
    assert_eq!(created, 1);
    assert_eq!(engine.store().count_votes(PollId::new(1)).unwrap(), 1);
    assert_eq!(
        engine
            .store()
            .attempts_for_poll(PollId::new(1))
            .unwrap()
            .len(),
        200
    );
}

#[tokio::test]
async fn keyless_retries_survive_a_restart() {
    let dir = tempfile::tempdir().unwrap();

    let first = {
        let engine = open_engine(dir.path());
        let outcome = engine
            .cast_vote(request(10).with_key(IdempotencyKey::parse("k1").unwrap()))
            .await
            .unwrap();
        outcome.vote().clone()
    };

    let engine = open_engine(dir.path());
    let again = engine.cast_vote(request(10)).await.unwrap();
    assert_eq!(again, VoteOutcome::Idempotent(first.clone()));

    let replay = engine
        .cast_vote(request(10).with_key(IdempotencyKey::parse("k1").unwrap()))
        .await
        .unwrap();
    assert_eq!(replay.vote().id, first.id);

    let err = engine.cast_vote(request(11)).await.unwrap_err();
    assert!(matches!(err, AdmissionError::DuplicateVote { .. }));
}

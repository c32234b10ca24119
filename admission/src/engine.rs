//! The vote admission engine.
//!
//! `cast_vote` runs one request through these stages:
//!
//! 1. Replay: a completed idempotency key returns its stored vote without
//!    touching fraud state or the vote table. This runs ahead of the gate so
//!    a blocked or throttled client still learns the result of a vote it
//!    already cast.
//! 2. Fraud gate: a denial is returned as-is and only counted in metrics.
//! 3. Poll directory: dangling or closed `(poll, option)` references are
//!    rejected before a key is reserved.
//! 4. Reservation: the key is reserved, or the caller waits on whoever
//!    holds it and replays their result.
//! 5. Durable write under bounded retry, on the blocking pool. The
//!    `(poll, voter)` uniqueness constraint decides races, including retries
//!    that arrive without the original key.
//!
//! Every call that gets past the gate is appended to the attempt log.
//! [`AdmissionEngine::collect_garbage`] bounds the log, the key table and
//! fraud state.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use provote_fraud::{
    Decision, FraudError, FraudGate, MemoryFraudStore, RequestSignals, Subject, ViolationKind,
};
use provote_idempotency::{
    IdempotencyError, IdempotencyResolver, Resolution, ResolverSettings, CAST_VOTE_ENDPOINT,
};
use provote_store::{
    AttemptLog, AttemptOutcome, FraudStateStore, IdempotencyRecord, IdempotencyStore,
    OptionCheck, PollDirectory, Reservation, ScopedKey, StoreError, VoteAttempt, VoteStore,
};
use provote_types::{
    AdmissionParams, Clock, IdempotencyKey, Jitter, NewVote, OptionId, PollId, Timestamp,
    VoteRecord, VoterIdentity,
};
use tracing::{debug, info, warn, Instrument};

use crate::metrics::AdmissionMetrics;
use crate::retry::{retry_transient, Retried, RetryError, RetryPolicy};
use crate::spans::cast_vote_span;
use crate::{AdmissionError, GcError};

/// Everything the engine needs to know about one cast-vote call.
#[derive(Clone, Debug, PartialEq)]
pub struct CastVoteRequest {
    pub voter: VoterIdentity,
    pub poll: PollId,
    pub option: OptionId,
    pub idempotency_key: Option<IdempotencyKey>,
    /// Network identity for rate limiting and reputation, usually the IP.
    pub client: String,
    pub fingerprint: Option<String>,
    pub signals: RequestSignals,
}

impl CastVoteRequest {
    pub fn new(
        voter: VoterIdentity,
        poll: PollId,
        option: OptionId,
        client: impl Into<String>,
    ) -> Self {
        Self {
            voter,
            poll,
            option,
            idempotency_key: None,
            client: client.into(),
            fingerprint: None,
            signals: RequestSignals::default(),
        }
    }

    pub fn with_key(mut self, key: IdempotencyKey) -> Self {
        self.idempotency_key = Some(key);
        self
    }

    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = Some(fingerprint.into());
        self
    }

    pub fn with_signals(mut self, signals: RequestSignals) -> Self {
        self.signals = signals;
        self
    }

    fn scoped_key(&self) -> Option<ScopedKey> {
        self.idempotency_key
            .clone()
            .map(|key| ScopedKey::new(CAST_VOTE_ENDPOINT, self.voter.clone(), key))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VoteOutcome {
    /// This call recorded the vote.
    Created(VoteRecord),
    /// The vote already existed; this call changed nothing.
    Idempotent(VoteRecord),
}

impl VoteOutcome {
    pub fn vote(&self) -> &VoteRecord {
        match self {
            Self::Created(v) | Self::Idempotent(v) => v,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }
}

impl fmt::Display for VoteOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created(v) => write!(f, "created {}", v.id),
            Self::Idempotent(v) => write!(f, "idempotent {}", v.id),
        }
    }
}

/// Result of one durable-write attempt.
enum Written {
    Inserted(VoteRecord),
    /// The voter already had a vote for the poll.
    Existing(VoteRecord),
}

/// Every storage capability the engine needs, in one bound.
pub trait AdmissionStore:
    VoteStore + IdempotencyStore + PollDirectory + AttemptLog + Send + Sync + 'static
{
}

impl<T> AdmissionStore for T where
    T: VoteStore + IdempotencyStore + PollDirectory + AttemptLog + Send + Sync + 'static
{
}

/// What one garbage-collection pass removed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GcReport {
    pub keys: usize,
    pub attempts: usize,
    pub fraud_entries: usize,
}

impl GcReport {
    pub fn total(&self) -> usize {
        self.keys + self.attempts + self.fraud_entries
    }
}

pub struct AdmissionEngine<S> {
    store: Arc<S>,
    gate: FraudGate,
    resolver: IdempotencyResolver<S>,
    clock: Arc<dyn Clock>,
    jitter: Arc<dyn Jitter>,
    retry: RetryPolicy,
    attempt_retention_ms: u64,
    metrics: Arc<AdmissionMetrics>,
}

impl<S: AdmissionStore> AdmissionEngine<S> {
    /// Build an engine with in-memory fraud state and fresh metrics.
    pub fn new(
        store: Arc<S>,
        params: &AdmissionParams,
        clock: Arc<dyn Clock>,
        jitter: Arc<dyn Jitter>,
    ) -> Self {
        Self::with_parts(
            store,
            Arc::new(MemoryFraudStore::new()),
            params,
            clock,
            jitter,
            Arc::new(AdmissionMetrics::new()),
        )
    }

    pub fn with_parts(
        store: Arc<S>,
        fraud_state: Arc<dyn FraudStateStore>,
        params: &AdmissionParams,
        clock: Arc<dyn Clock>,
        jitter: Arc<dyn Jitter>,
        metrics: Arc<AdmissionMetrics>,
    ) -> Self {
        let resolver = IdempotencyResolver::new(
            store.clone(),
            clock.clone(),
            ResolverSettings::from_params(params),
        );
        Self {
            store,
            gate: FraudGate::from_params(fraud_state, params),
            resolver,
            clock,
            jitter,
            retry: RetryPolicy::from_params(params),
            attempt_retention_ms: params.attempt_retention_ms(),
            metrics,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn gate(&self) -> &FraudGate {
        &self.gate
    }

    pub fn metrics(&self) -> &Arc<AdmissionMetrics> {
        &self.metrics
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// Admit one vote, or explain why not.
    pub async fn cast_vote(&self, req: CastVoteRequest) -> Result<VoteOutcome, AdmissionError> {
        let span = cast_vote_span(req.poll, &req.voter);
        let started = Instant::now();
        let mut risk_score = None;

        let result = self.admit(&req, &mut risk_score).instrument(span).await;

        self.metrics
            .cast_latency_ms
            .observe(started.elapsed().as_secs_f64() * 1000.0);
        match &result {
            Ok(VoteOutcome::Created(_)) => self.metrics.votes_created.inc(),
            Ok(VoteOutcome::Idempotent(_)) => self.metrics.votes_idempotent.inc(),
            Err(e) => self.metrics.record_rejection(e.code()),
        }
        match &result {
            Err(e) if e.is_fraud_denial() => {
                debug!(client = %req.client, reason = e.code(), "denied at the fraud gate");
            }
            _ => self.log_attempt(&req, &result, risk_score),
        }
        result
    }

    /// Drop expired idempotency keys, attempts older than the retention
    /// window and fraud state nothing depends on any more.
    pub fn collect_garbage(&self) -> Result<GcReport, GcError> {
        let now = self.clock.now();
        let keys = self.resolver.purge_expired()?;
        let cutoff =
            Timestamp::from_millis(now.as_millis().saturating_sub(self.attempt_retention_ms));
        let attempts = self.store.purge_attempts_before(cutoff)?;
        let fraud_entries = self.gate.purge_stale(now)?;
        let report = GcReport {
            keys,
            attempts,
            fraud_entries,
        };
        if report.total() > 0 {
            info!(keys, attempts, fraud_entries, "garbage collected");
        }
        Ok(report)
    }

    async fn admit(
        &self,
        req: &CastVoteRequest,
        risk_score: &mut Option<f64>,
    ) -> Result<VoteOutcome, AdmissionError> {
        let now = self.clock.now();
        let scoped = req.scoped_key();

        if let Some(key) = &scoped {
            let completed = self
                .resolver
                .peek_completed(key)
                .map_err(|e| self.transient(e))?;
            if let Some(record) = completed {
                debug!(key = %key, "replaying completed key");
                return self.replay(req, record);
            }
        }

        let voter = req.voter.canonical();
        let subject = Subject::new(&req.client)
            .with_fingerprint(req.fingerprint.as_deref())
            .with_voter(&voter);
        let decision = self
            .gate
            .evaluate(&subject, &req.signals, now)
            .map_err(|e| self.transient(e))?;
        match decision {
            Decision::Admit { risk_score: score } => *risk_score = Some(score),
            Decision::Deny(reason) => return Err(reason.into()),
        }

        self.check_reference(req.poll, req.option, now)?;

        let reservation = match &scoped {
            None => None,
            Some(key) => {
                let resolved = self
                    .resolver
                    .reserve(key, req.poll, req.option)
                    .await
                    .map_err(|e| self.transient(e))?;
                self.metrics.reservation_waits.inc_by(u64::from(resolved.waits));
                match resolved.resolution {
                    Resolution::Reserved(r) => Some(r),
                    Resolution::AlreadyCompleted(record) => return self.replay(req, record),
                }
            }
        };

        self.write(req, now, reservation.as_ref()).await
    }

    /// Reject dangling or closed poll/option references.
    fn check_reference(
        &self,
        poll: PollId,
        option: OptionId,
        now: Timestamp,
    ) -> Result<(), AdmissionError> {
        let check = self
            .store
            .check_option(poll, option, now)
            .map_err(|e| self.transient(e))?;
        match check {
            OptionCheck::Valid => Ok(()),
            OptionCheck::UnknownPoll => Err(AdmissionError::InvalidRequest(format!(
                "unknown poll {poll}"
            ))),
            OptionCheck::ForeignOption => Err(AdmissionError::InvalidRequest(format!(
                "{option} does not belong to {poll}"
            ))),
            OptionCheck::PollClosed => Err(AdmissionError::InvalidRequest(format!(
                "{poll} is closed"
            ))),
        }
    }

    /// Answer from a completed idempotency record.
    fn replay(
        &self,
        req: &CastVoteRequest,
        record: IdempotencyRecord,
    ) -> Result<VoteOutcome, AdmissionError> {
        let vote = record.vote.ok_or_else(|| {
            self.transient(format!("completed key {} has no stored vote", record.storage_key))
        })?;
        if vote.poll != req.poll {
            return Err(AdmissionError::InvalidRequest(format!(
                "idempotency key was already used for {}",
                vote.poll
            )));
        }
        if vote.option != req.option {
            return Err(AdmissionError::DuplicateVote {
                poll: vote.poll,
                existing_option: vote.option,
            });
        }
        Ok(VoteOutcome::Idempotent(vote))
    }

    async fn write(
        &self,
        req: &CastVoteRequest,
        now: Timestamp,
        reservation: Option<&Reservation>,
    ) -> Result<VoteOutcome, AdmissionError> {
        let vote = NewVote {
            poll: req.poll,
            option: req.option,
            voter: req.voter.clone(),
            created_at: now,
            idempotency_key: req.idempotency_key.clone(),
        };

        let written = retry_transient(
            &self.retry,
            self.jitter.as_ref(),
            StoreError::is_transient,
            |attempt| {
                if attempt > 1 {
                    self.metrics.write_retries.inc();
                }
                self.write_once(vote.clone())
            },
        )
        .await;

        match written {
            Ok(Retried {
                value: Written::Inserted(record),
                attempts,
            }) => {
                info!(vote = %record.id, option = %record.option, attempts, "vote recorded");
                self.complete(reservation, &record);
                Ok(VoteOutcome::Created(record))
            }
            Ok(Retried {
                value: Written::Existing(existing),
                ..
            }) if existing.option == req.option => {
                debug!(vote = %existing.id, "voter already holds this vote");
                self.complete(reservation, &existing);
                Ok(VoteOutcome::Idempotent(existing))
            }
            Ok(Retried {
                value: Written::Existing(existing),
                ..
            }) => {
                self.fail(reservation);
                let voter = req.voter.canonical();
                let subject = Subject::new(&req.client)
                    .with_fingerprint(req.fingerprint.as_deref())
                    .with_voter(&voter);
                if let Err(e) = self.gate.report_violation(
                    &subject,
                    ViolationKind::DuplicateVote,
                    self.clock.now(),
                ) {
                    warn!(error = %e, "failed to record duplicate-vote violation");
                }
                debug!(existing = %existing.option, requested = %req.option, "second distinct vote");
                Err(AdmissionError::DuplicateVote {
                    poll: existing.poll,
                    existing_option: existing.option,
                })
            }
            Err(err) => {
                self.fail(reservation);
                let attempts = err.attempts();
                let permanent = matches!(err, RetryError::Permanent(_));
                let cause = err.into_inner();
                if permanent {
                    warn!(error = %cause, "vote write failed");
                } else {
                    warn!(error = %cause, attempts, "vote write gave up after retries");
                }
                Err(self.transient(cause))
            }
        }
    }

    /// One insert attempt on the blocking pool.
    async fn write_once(&self, vote: NewVote) -> Result<Written, StoreError> {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || Self::insert_or_find(store.as_ref(), vote))
            .await
            .map_err(|e| StoreError::Backend(format!("vote write task failed: {e}")))?
    }

    fn insert_or_find(store: &S, vote: NewVote) -> Result<Written, StoreError> {
        match store.insert_unique(vote.clone()) {
            Ok(record) => Ok(Written::Inserted(record)),
            Err(StoreError::Duplicate(_)) => match store.find_vote(vote.poll, &vote.voter)? {
                Some(existing) => Ok(Written::Existing(existing)),
                // Visible to the index but not yet to the read; try again.
                None => Err(StoreError::Contention(format!(
                    "existing vote for {} not readable yet",
                    vote.poll
                ))),
            },
            Err(e) => Err(e),
        }
    }

    fn complete(&self, reservation: Option<&Reservation>, vote: &VoteRecord) {
        if let Some(r) = reservation {
            // The vote is durable either way; a lost key falls back to the
            // uniqueness check on the next retry.
            if let Err(e) = self.resolver.complete(r, vote) {
                warn!(key = %r.storage_key, error = %e, "failed to complete idempotency key");
            }
        }
    }

    fn fail(&self, reservation: Option<&Reservation>) {
        if let Some(r) = reservation {
            if let Err(e) = self.resolver.fail(r) {
                warn!(key = %r.storage_key, error = %e, "failed to release idempotency key");
            }
        }
    }

    fn transient(&self, cause: impl TransientCause) -> AdmissionError {
        AdmissionError::TransientStorageFailure {
            reason: cause.to_string(),
            retry_after_ms: cause.retry_after_ms().unwrap_or(self.retry.backoff_max_ms.max(1)),
        }
    }

    fn log_attempt(
        &self,
        req: &CastVoteRequest,
        result: &Result<VoteOutcome, AdmissionError>,
        risk_score: Option<f64>,
    ) {
        let outcome = match result {
            Ok(VoteOutcome::Created(v)) => AttemptOutcome::Created(v.id),
            Ok(VoteOutcome::Idempotent(v)) => AttemptOutcome::Idempotent(v.id),
            Err(e) => AttemptOutcome::Rejected(e.code().to_string()),
        };
        let attempt = VoteAttempt {
            poll: req.poll,
            option: req.option,
            voter: req.voter.clone(),
            idempotency_key: req.idempotency_key.clone(),
            client: req.client.clone(),
            fingerprint: req.fingerprint.clone(),
            outcome,
            risk_score,
            at: self.clock.now(),
        };
        if let Err(e) = self.store.record_attempt(&attempt) {
            warn!(error = %e, "failed to record vote attempt");
        }
    }
}

/// Errors that surface to callers as `TransientStorageFailure`.
trait TransientCause: fmt::Display {
    fn retry_after_ms(&self) -> Option<u64> {
        None
    }
}

impl TransientCause for StoreError {}

impl TransientCause for FraudError {}

impl TransientCause for String {}

impl TransientCause for IdempotencyError {
    fn retry_after_ms(&self) -> Option<u64> {
        match self {
            Self::InFlight { .. } => Some(1000),
            Self::Store(_) => None,
        }
    }
}

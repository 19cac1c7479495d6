//! Root-side orchestration of one signing round.
//!
//! The root announces a message to `K` subtrees, each of which is tried
//! against a first-choice subleader and, on timeout, its next candidate
//! (§4.G failover) until either a partial arrives or the subtree's
//! candidates are exhausted. Every subtree worker shares the round's outer
//! deadline but additionally budgets each individual attempt to half the
//! round deadline, so a single unresponsive subleader is visible to the
//! root well before the round itself would time out.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::oneshot;
use tokio::time::{timeout, Instant};
use tracing::{info, warn};

use crate::aggregate::{self, AggregateError, Partial};
use crate::crypto::{PrivateKey, PublicKey};
use crate::final_signature::FinalSignature;
use crate::mask::{Mask, MaskError};
use crate::roster::Roster;
use crate::transport::{Envelope, Transport, WireMessage};
use crate::tree::{Subtree, Tree, TreeError};
use crate::verify::{self, Policy, VerifyError};

/// Below this, a deadline cannot realistically accommodate even a single
/// network round trip; reject it at Validating rather than let every
/// subtree fail its first attempt.
const MINIMUM_REALISTIC_DEADLINE: Duration = Duration::from_millis(1);

#[derive(Debug, Error)]
pub enum RootError {
    #[error("bad round configuration: {0}")]
    BadConfiguration(&'static str),
    #[error(transparent)]
    Tree(#[from] TreeError),
    #[error(transparent)]
    Mask(#[from] MaskError),
    #[error(transparent)]
    Aggregate(#[from] AggregateError),
    #[error(transparent)]
    Verify(#[from] VerifyError),
    #[error("round deadline exceeded before any subtree or the root itself produced a usable partial")]
    RoundDeadlineExceeded,
}

/// Validating-state checks (§4.G.1): synchronous, fail fast before anything
/// is spawned.
fn validate(message: &[u8], config: &RoundConfig) -> Result<(), RootError> {
    if message.is_empty() {
        return Err(RootError::BadConfiguration("message must not be empty"));
    }
    if config.deadline < MINIMUM_REALISTIC_DEADLINE {
        return Err(RootError::BadConfiguration("deadline is not realistic"));
    }
    Ok(())
}

/// The states a round moves through. Tracked for observability; the control
/// flow itself is ordinary async code, not a formal state machine driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundState {
    Idle,
    Validating,
    Building,
    Running,
    Finalizing,
    Done,
    Failed,
}

#[derive(Debug, Clone, Copy)]
pub struct RoundConfig {
    /// Number of subtrees to fan the roster out into.
    pub k: usize,
    /// Total wall-clock budget for the round.
    pub deadline: Duration,
}

type Dispatch = Arc<Mutex<HashMap<usize, oneshot::Sender<Envelope>>>>;

/// Run one round to completion: fan out, collect, aggregate, and verify
/// against `policy`. Returns the final aggregate signature and the mask
/// describing who contributed to it.
pub async fn run_round(
    transport: Arc<dyn Transport>,
    roster: &Roster,
    self_key: &PrivateKey,
    round: u64,
    message: &[u8],
    config: RoundConfig,
    policy: &dyn Policy,
) -> Result<(FinalSignature, Mask), RootError> {
    let mut state = RoundState::Idle;
    let publics = roster.publics();

    state = RoundState::Validating;
    info!(?state, round, roster_len = roster.len(), "starting round");
    validate(message, &config)?;
    // K == 0 is clamped to 1 rather than rejected (§4.G.1); anything beyond
    // the roster's non-root size is clamped further down in `Tree::build`.
    let k = config.k.max(1);

    if roster.len() == 1 {
        let mask = Mask::new(publics.clone(), Some(&self_key.public_key()))?;
        let signature = self_key.sign(message);
        return finalize(&mut state, publics, message, signature, mask, policy);
    }

    state = RoundState::Building;
    let tree = match Tree::build(roster.len(), k) {
        Ok(tree) => tree,
        Err(err) => {
            state = RoundState::Failed;
            warn!(?state, %err, "failed to build tree");
            return Err(err.into());
        }
    };
    info!(?state, subtrees = tree.subtree_count(), "tree built");

    state = RoundState::Running;
    let dispatch: Dispatch = Arc::new(Mutex::new(HashMap::new()));
    let dispatcher_handle = {
        let transport = transport.clone();
        let dispatch = dispatch.clone();
        tokio::spawn(async move { root_dispatcher(transport, dispatch).await })
    };

    let outer_deadline = Instant::now() + config.deadline;
    let attempt_budget = config.deadline / 2;
    let message_arc = Arc::new(message.to_vec());

    let mut workers = Vec::with_capacity(tree.subtree_count());
    for subtree in tree.subtrees() {
        let transport = transport.clone();
        let publics = publics.clone();
        let dispatch = dispatch.clone();
        let subtree = subtree.clone();
        let message_arc = message_arc.clone();
        workers.push(tokio::spawn(async move {
            run_subtree_worker(
                transport,
                publics,
                dispatch,
                &subtree,
                round,
                message_arc,
                outer_deadline,
                attempt_budget,
            )
            .await
        }));
    }

    let mut partials = Vec::new();
    if let Ok(mask) = Mask::new(publics.clone(), Some(&self_key.public_key())) {
        partials.push(Partial {
            signature: self_key.sign(message),
            mask,
        });
    }

    for worker in workers {
        match worker.await {
            Ok(Some(partial)) => partials.push(partial),
            Ok(None) => {}
            Err(err) => warn!(%err, "subtree worker task panicked"),
        }
    }
    dispatcher_handle.abort();

    // Best-effort cancellation (§4.G "Cancellation", §5): every subtree has
    // either responded or been abandoned by now, so a Stop is advisory
    // cleanup only, never required for correctness. Idempotent by
    // construction — nothing reacts to a second Stop for a round already
    // finished.
    let _ = transport.broadcast(0, WireMessage::Stop { round }).await;

    if partials.is_empty() {
        state = RoundState::Failed;
        warn!(?state, "no subtree produced a partial");
        return Err(RootError::RoundDeadlineExceeded);
    }

    let (signature, mask) = aggregate::aggregate(&partials)?;
    info!(signers = mask.count_enabled(), total = mask.count_total(), "round aggregated");

    finalize(&mut state, publics, message, signature, mask, policy)
}

fn finalize(
    state: &mut RoundState,
    publics: Arc<[PublicKey]>,
    message: &[u8],
    signature: crate::crypto::SignaturePoint,
    mask: Mask,
    policy: &dyn Policy,
) -> Result<(FinalSignature, Mask), RootError> {
    *state = RoundState::Finalizing;
    let final_signature = FinalSignature::new(signature, mask.bytes());
    let wire = final_signature.to_bytes();
    match verify::verify(publics, message, &wire, policy) {
        Ok(mask) => {
            *state = RoundState::Done;
            info!(?state, "round complete");
            Ok((final_signature, mask))
        }
        Err(err) => {
            *state = RoundState::Failed;
            warn!(?state, %err, "round failed verification");
            Err(err.into())
        }
    }
}

/// The single reader of the root's transport inbox. Messages are routed by
/// sender roster index to whichever subtree worker currently expects a
/// reply from that index; since subtree candidate sets are disjoint, a
/// roster index is never awaited by more than one worker at a time.
async fn root_dispatcher(transport: Arc<dyn Transport>, dispatch: Dispatch) {
    loop {
        match transport.recv(0).await {
            Some((from, msg)) => {
                let waiter = dispatch.lock().expect("dispatch mutex poisoned").remove(&from);
                if let Some(tx) = waiter {
                    let _ = tx.send((from, msg));
                }
            }
            None => break,
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_subtree_worker(
    transport: Arc<dyn Transport>,
    roster_publics: Arc<[PublicKey]>,
    dispatch: Dispatch,
    subtree: &Subtree,
    round: u64,
    message: Arc<Vec<u8>>,
    outer_deadline: Instant,
    attempt_budget: Duration,
) -> Option<Partial> {
    let mut candidates_tried = 0usize;
    loop {
        if Instant::now() >= outer_deadline {
            info!("subtree worker ran out of round budget");
            return None;
        }

        let subleader = match subtree.subleader(candidates_tried) {
            Ok(idx) => idx,
            Err(_) => {
                warn!("subtree exhausted all subleader candidates");
                return None;
            }
        };

        let (tx, rx) = oneshot::channel();
        dispatch.lock().expect("dispatch mutex poisoned").insert(subleader, tx);

        if let Err(err) = transport
            .send(0, subleader, WireMessage::Announce { round, message: (*message).clone() })
            .await
        {
            warn!(subleader, %err, "failed to announce to subleader candidate");
            dispatch.lock().expect("dispatch mutex poisoned").remove(&subleader);
            candidates_tried += 1;
            continue;
        }

        let remaining_outer = outer_deadline.saturating_duration_since(Instant::now());
        let this_attempt = attempt_budget.min(remaining_outer);

        let outcome = timeout(this_attempt, rx).await;
        match outcome {
            Ok(Ok((from, WireMessage::Response { round: r, signature, mask_bytes }))) if r == round && from == subleader => {
                let mask = match Mask::new(roster_publics.clone(), None).and_then(|mut mask| {
                    mask.set_from_bytes(&mask_bytes)?;
                    Ok(mask)
                }) {
                    Ok(mask) => mask,
                    Err(err) => {
                        warn!(subleader, %err, "dropping malformed subtree response");
                        candidates_tried += 1;
                        continue;
                    }
                };
                return Some(Partial { signature, mask });
            }
            _ => {
                dispatch.lock().expect("dispatch mutex poisoned").remove(&subleader);
                warn!(subleader, candidates_tried, "subleader candidate timed out, trying next");
                candidates_tried += 1;
                continue;
            }
        }
    }
}

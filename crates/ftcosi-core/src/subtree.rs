//! Subleader-side orchestration: fan out an announcement to one subtree's
//! leaves, verify the message locally, and collect+aggregate responses
//! within a time budget.
//!
//! Verification of the message to be signed runs concurrently with
//! collecting leaf responses rather than gating collection on it — a slow
//! verification hook should not cost leaf responses that arrive while it is
//! still running. See spec §5 / §7 for the timing rationale.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::{join_all, FutureExt};
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

use crate::aggregate::{self, Partial};
use crate::crypto::{PrivateKey, PublicKey};
use crate::mask::Mask;
use crate::transport::{Transport, WireMessage};

/// The check a node runs against a proposed message before signing it.
/// Kept separate from the crypto layer since what counts as "safe to sign"
/// is an application concern (e.g. "is this block hash part of a chain I
/// trust"), not a protocol one.
#[async_trait]
pub trait Verification: Send + Sync {
    async fn verify(&self, message: &[u8]) -> bool;
}

/// A verification hook that accepts everything. Useful for tests and for
/// deployments where the message is already trusted by construction.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysAccept;

#[async_trait]
impl Verification for AlwaysAccept {
    async fn verify(&self, _message: &[u8]) -> bool {
        true
    }
}

/// Run one subleader's side of a round: announce to `leaves`, verify
/// locally, collect responses until `budget` elapses, and aggregate
/// whatever arrived. Returns `None` if neither the subleader itself nor any
/// leaf produced a usable partial.
#[allow(clippy::too_many_arguments)]
pub async fn run_subleader(
    transport: Arc<dyn Transport>,
    roster_publics: Arc<[PublicKey]>,
    self_index: usize,
    self_key: &PrivateKey,
    leaves: &[usize],
    round: u64,
    message: &[u8],
    budget: Duration,
    verification: &(dyn Verification),
) -> Option<Partial> {
    let deadline = Instant::now() + budget;
    let span = tracing::info_span!("subleader", self_index, round, leaves = leaves.len());
    let _enter = span.enter();

    let fanout = {
        let transport = transport.clone();
        let message = message.to_vec();
        let leaves = leaves.to_vec();
        async move {
            let sends = leaves.into_iter().map(|leaf| {
                let transport = transport.clone();
                let message = message.clone();
                async move {
                    if let Err(err) = transport
                        .send(self_index, leaf, WireMessage::Announce { round, message })
                        .await
                    {
                        warn!(leaf, %err, "failed to announce to leaf");
                    }
                }
            });
            join_all(sends).await;
        }
    };
    fanout.await;

    // Verification may block on I/O (§6), so it runs concurrently with
    // collection below rather than gating it — a slow-but-accepting hook
    // must not cost leaf responses already sitting in the inbox (§4.F steps
    // 4/5, §9: "do not block" collection on it). `own_ok` is only read once
    // collection is done.
    let verify_fut = verification.verify(message).fuse();
    tokio::pin!(verify_fut);
    let mut own_ok: Option<bool> = None;

    let mut partials = Vec::new();
    let mut remaining: HashSet<usize> = leaves.iter().copied().collect();
    while !remaining.is_empty() {
        let now = Instant::now();
        if now >= deadline {
            info!(outstanding = remaining.len(), "subtree collection budget exhausted");
            break;
        }
        tokio::select! {
            ok = &mut verify_fut, if own_ok.is_none() => {
                own_ok = Some(ok);
            }
            outcome = timeout(deadline - now, transport.recv(self_index)) => {
                match outcome {
                    Ok(Some((from, WireMessage::Response { round: r, signature, mask_bytes }))) if r == round && remaining.remove(&from) => {
                        match Mask::new(roster_publics.clone(), None).and_then(|mut mask| {
                            mask.set_from_bytes(&mask_bytes)?;
                            Ok(mask)
                        }) {
                            // A leaf whose verification rejected the message replies
                            // with a zero-bit mask (§4.F). It contributes nothing to
                            // the aggregate either way, so it is simplest and safest
                            // to drop it here rather than carry a placeholder
                            // signature point through the sum.
                            Ok(mask) if mask.count_enabled() == 0 => debug!(from, "leaf did not contribute a bit"),
                            Ok(mask) => partials.push(Partial { signature, mask }),
                            Err(err) => warn!(from, %err, "dropping malformed response"),
                        }
                    }
                    Ok(Some((_, WireMessage::Stop { round: r }))) if r == round => {
                        info!("stop received, abandoning subtree collection early");
                        return None;
                    }
                    Ok(Some(_)) => continue,
                    Ok(None) => {
                        warn!("transport closed while collecting subtree responses");
                        break;
                    }
                    Err(_) => {
                        info!(outstanding = remaining.len(), "subtree collection budget exhausted");
                        break;
                    }
                }
            }
        }
    }

    let own_ok = match own_ok {
        Some(ok) => ok,
        None => verify_fut.await,
    };
    if own_ok {
        match Mask::new(roster_publics.clone(), Some(&self_key.public_key())) {
            Ok(mask) => partials.push(Partial {
                signature: self_key.sign(message),
                mask,
            }),
            Err(err) => warn!(%err, "own public key not in roster, cannot contribute a bit"),
        }
    } else {
        debug!("local verification rejected the message");
    }

    if partials.is_empty() {
        warn!("subtree produced no usable partial");
        return None;
    }

    match aggregate::aggregate(&partials) {
        Ok((signature, mask)) => {
            info!(signers = mask.count_enabled(), "subtree partial ready");
            Some(Partial { signature, mask })
        }
        Err(err) => {
            warn!(%err, "failed to aggregate subtree partials");
            None
        }
    }
}

/// Run a leaf's side of a round: the subtree state machine reduced to its
/// degenerate case — receive exactly one `Announce`, run verification, and
/// reply to whoever sent it. A rejected message is answered with a
/// zero-bit mask; the signature field is an unused placeholder since the
/// subleader drops zero-bit responses before aggregating (see
/// [`run_subleader`]) rather than summing in a synthetic identity point.
pub async fn run_leaf(
    transport: Arc<dyn Transport>,
    roster_publics: Arc<[PublicKey]>,
    self_index: usize,
    self_key: &PrivateKey,
    verification: &(dyn Verification),
) {
    let span = tracing::info_span!("leaf", self_index);
    let _enter = span.enter();

    let (from, round, message) = match transport.recv(self_index).await {
        Some((from, WireMessage::Announce { round, message })) => (from, round, message),
        Some((_, WireMessage::Stop { .. })) => {
            info!("stop received before any announce, nothing to do");
            return;
        }
        Some(_) | None => return,
    };

    let ok = verification.verify(&message).await;
    let mask = if ok {
        Mask::new(roster_publics, Some(&self_key.public_key()))
    } else {
        debug!("local verification rejected the message");
        Mask::new(roster_publics, None)
    };
    let mask = match mask {
        Ok(mask) => mask,
        Err(err) => {
            warn!(%err, "own public key not in roster, cannot respond");
            return;
        }
    };

    let signature = if ok {
        self_key.sign(&message)
    } else {
        crate::crypto::SignaturePoint([0u8; crate::crypto::POINT_LEN_G1])
    };

    if let Err(err) = transport
        .send(self_index, from, WireMessage::Response { round, signature, mask_bytes: mask.bytes() })
        .await
    {
        warn!(%err, "failed to send leaf response");
    }
}

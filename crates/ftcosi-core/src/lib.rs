//! # ftcosi-core
//!
//! Fault-tolerant collective BLS signing protocol: tree orchestration,
//! masked aggregation, verification — **no networking code** beyond the
//! in-memory [`transport`] shim used to drive the protocol in tests.
//!
//! ## Trust model
//!
//! A round's output is accepted only if `verify::verify` both confirms the
//! pairing equation against the mask-aggregated public key and the
//! caller-supplied [`verify::Policy`] accepts the mask. Byzantine behavior
//! beyond crash/timeout is out of scope — bit-forgery is defeated by the
//! signature scheme itself, but equivocation and leader rotation are not
//! handled.
//!
//! ## Usage
//!
//! ```ignore
//! use ftcosi_core::root::{run_round, RoundConfig};
//! use ftcosi_core::verify::Complete;
//!
//! let (final_signature, mask) =
//!     run_round(transport, &roster, &self_key, round, message, config, &Complete).await?;
//! ```

pub mod aggregate;
pub mod crypto;
pub mod final_signature;
pub mod mask;
pub mod root;
pub mod roster;
pub mod subtree;
pub mod transport;
pub mod tree;
pub mod verify;

pub use aggregate::{aggregate, AggregateError, Partial};
pub use crypto::{key_pair, verify_single, PrivateKey, PublicKey, SignaturePoint};
pub use final_signature::{FinalSignature, FinalSignatureError};
pub use mask::{Mask, MaskError};
pub use root::{run_round, RootError, RoundConfig, RoundState};
pub use roster::{Address, NodeId, Roster, RosterError, RosterMember};
pub use subtree::{run_leaf, run_subleader, AlwaysAccept, Verification};
pub use transport::{InMemoryTransport, Transport, TransportError, WireMessage};
pub use tree::{Subtree, Tree, TreeError};
pub use verify::{verify, Complete, Policy, Threshold, VerifyError};

use std::fmt;

use weft_types::ContentId;

/// Outcome of a [`Log::join`](crate::Log::join).
///
/// Every input entry ends up in exactly one of the three lists, except
/// entries already in the log, which are skipped.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct JoinReport {
    /// Newly accepted entries, including fetched ancestors.
    pub accepted: Vec<ContentId>,
    /// Entries that could not be joined yet. Retrying may succeed.
    pub deferred: Vec<Deferred>,
    /// Entries that will never be joined.
    pub rejected: Vec<Rejected>,
}

impl JoinReport {
    /// Returns `true` if nothing was deferred or rejected.
    pub fn is_complete(&self) -> bool {
        self.deferred.is_empty() && self.rejected.is_empty()
    }

    pub(crate) fn absorb(&mut self, outcome: JoinOutcome) {
        match outcome {
            JoinOutcome::Accepted(hashes) => self.accepted.extend(hashes),
            JoinOutcome::Known => {}
            JoinOutcome::Deferred(deferred) => self.deferred.push(deferred),
            JoinOutcome::Rejected(rejected) => self.rejected.push(rejected),
        }
    }
}

/// Result of joining a single entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JoinOutcome {
    /// The entry and these unknown ancestors were accepted.
    Accepted(Vec<ContentId>),
    /// The entry was already in the log.
    Known,
    Deferred(Deferred),
    Rejected(Rejected),
}

/// An entry whose ancestor closure is not yet available.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Deferred {
    pub hash: ContentId,
    pub reason: DeferReason,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeferReason {
    /// These ancestors could not be resolved from storage.
    MissingAncestors(Vec<ContentId>),
    /// A check could not complete (e.g. an identity fetch timed out).
    Unavailable(String),
}

impl Deferred {
    /// Missing ancestor hashes, if that is why the entry was deferred.
    pub fn missing(&self) -> &[ContentId] {
        match &self.reason {
            DeferReason::MissingAncestors(missing) => missing,
            DeferReason::Unavailable(_) => &[],
        }
    }
}

/// An entry that failed validation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rejected {
    pub hash: ContentId,
    pub reason: JoinRejection,
}

/// Why an entry (or one of its ancestors) was rejected.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JoinRejection {
    /// Ancestor bytes did not decode.
    Decode { hash: ContentId, reason: String },
    /// Ancestor bytes hash to something other than the requested hash.
    HashMismatch {
        expected: ContentId,
        actual: ContentId,
    },
    /// Signature, hash, or identity check failed.
    Verification(ContentId),
    /// The access controller refused the writer.
    AccessDenied(ContentId),
    /// The entry belongs to another log.
    WrongLog { hash: ContentId, log_id: String },
    /// The entry's clock is at the maximum time; nothing could follow it.
    ClockOverflow(ContentId),
    /// The entry's clock time is below that of an entry it links to.
    ClockRegression { hash: ContentId, parent: ContentId },
}

impl fmt::Display for JoinRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Decode { hash, reason } => write!(f, "{} does not decode: {reason}", hash.short_hex()),
            Self::HashMismatch { expected, actual } => write!(
                f,
                "requested {} but got {}",
                expected.short_hex(),
                actual.short_hex()
            ),
            Self::Verification(hash) => write!(f, "{} failed verification", hash.short_hex()),
            Self::AccessDenied(hash) => write!(f, "{} denied by access controller", hash.short_hex()),
            Self::WrongLog { hash, log_id } => {
                write!(f, "{} belongs to log {log_id}", hash.short_hex())
            }
            Self::ClockOverflow(hash) => write!(f, "{} has an exhausted clock", hash.short_hex()),
            Self::ClockRegression { hash, parent } => write!(
                f,
                "{} is older than its parent {}",
                hash.short_hex(),
                parent.short_hex()
            ),
        }
    }
}

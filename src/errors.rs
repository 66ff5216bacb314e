use std::fmt;

use thiserror::Error;

/// The XA return and error code space surfaced by the coordinator.
///
/// Negative values are `XAER_*` errors, values from 100 upwards are `XA_RB*`
/// rollback codes and the small positive values are heuristic outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum XaCode {
    /// Asynchronous operation already outstanding.
    Async,
    /// A resource manager error occurred in the transaction branch.
    RmErr,
    /// The XID is not valid.
    Nota,
    /// Invalid arguments were given.
    Inval,
    /// Routine invoked in an improper context.
    Proto,
    /// Resource manager unavailable.
    RmFail,
    /// The XID already exists.
    DupId,
    /// Resource manager doing work outside a global transaction.
    Outside,
    /// Rollback was caused by an unspecified reason.
    RbRollback,
    /// Rollback was caused by a communication failure.
    RbCommFail,
    /// A deadlock was detected.
    RbDeadlock,
    /// A condition that violates the integrity of the resources was detected.
    RbIntegrity,
    /// The resource manager rolled back for a reason not listed.
    RbOther,
    /// A protocol error occurred in the resource manager.
    RbProto,
    /// A transaction branch took too long.
    RbTimeout,
    /// May retry the transaction branch.
    RbTransient,
    /// The work was partially committed and partially rolled back.
    HeurMix,
    /// The work was heuristically rolled back.
    HeurRb,
    /// The work was heuristically committed.
    HeurCom,
    /// The work may have been heuristically completed.
    HeurHaz,
    /// Routine returned with no effect and may be reissued.
    Retry,
}

impl XaCode {
    const ALL: [XaCode; 21] = [
        XaCode::Async,
        XaCode::RmErr,
        XaCode::Nota,
        XaCode::Inval,
        XaCode::Proto,
        XaCode::RmFail,
        XaCode::DupId,
        XaCode::Outside,
        XaCode::RbRollback,
        XaCode::RbCommFail,
        XaCode::RbDeadlock,
        XaCode::RbIntegrity,
        XaCode::RbOther,
        XaCode::RbProto,
        XaCode::RbTimeout,
        XaCode::RbTransient,
        XaCode::HeurMix,
        XaCode::HeurRb,
        XaCode::HeurCom,
        XaCode::HeurHaz,
        XaCode::Retry,
    ];

    /// Returns the numeric XA value of this code.
    pub fn value(self) -> i32 {
        match self {
            XaCode::Async => -2,
            XaCode::RmErr => -3,
            XaCode::Nota => -4,
            XaCode::Inval => -5,
            XaCode::Proto => -6,
            XaCode::RmFail => -7,
            XaCode::DupId => -8,
            XaCode::Outside => -9,
            XaCode::RbRollback => 100,
            XaCode::RbCommFail => 101,
            XaCode::RbDeadlock => 102,
            XaCode::RbIntegrity => 103,
            XaCode::RbOther => 104,
            XaCode::RbProto => 105,
            XaCode::RbTimeout => 106,
            XaCode::RbTransient => 107,
            XaCode::HeurMix => 5,
            XaCode::HeurRb => 6,
            XaCode::HeurCom => 7,
            XaCode::HeurHaz => 8,
            XaCode::Retry => 4,
        }
    }

    /// Maps a raw XA value back to its code, if it is one this crate knows.
    pub fn from_value(value: i32) -> Option<XaCode> {
        Self::ALL.into_iter().find(|code| code.value() == value)
    }

    /// `true` for the `XA_RB*` range: the branch has been or must be rolled back.
    pub fn is_rollback(self) -> bool {
        (100..=107).contains(&self.value())
    }

    /// `true` for heuristic outcomes that need resolution through `forget`.
    pub fn is_heuristic(self) -> bool {
        matches!(
            self,
            XaCode::HeurMix | XaCode::HeurRb | XaCode::HeurCom | XaCode::HeurHaz
        )
    }

    fn name(self) -> &'static str {
        match self {
            XaCode::Async => "XAER_ASYNC",
            XaCode::RmErr => "XAER_RMERR",
            XaCode::Nota => "XAER_NOTA",
            XaCode::Inval => "XAER_INVAL",
            XaCode::Proto => "XAER_PROTO",
            XaCode::RmFail => "XAER_RMFAIL",
            XaCode::DupId => "XAER_DUPID",
            XaCode::Outside => "XAER_OUTSIDE",
            XaCode::RbRollback => "XA_RBROLLBACK",
            XaCode::RbCommFail => "XA_RBCOMMFAIL",
            XaCode::RbDeadlock => "XA_RBDEADLOCK",
            XaCode::RbIntegrity => "XA_RBINTEGRITY",
            XaCode::RbOther => "XA_RBOTHER",
            XaCode::RbProto => "XA_RBPROTO",
            XaCode::RbTimeout => "XA_RBTIMEOUT",
            XaCode::RbTransient => "XA_RBTRANSIENT",
            XaCode::HeurMix => "XA_HEURMIX",
            XaCode::HeurRb => "XA_HEURRB",
            XaCode::HeurCom => "XA_HEURCOM",
            XaCode::HeurHaz => "XA_HEURHAZ",
            XaCode::Retry => "XA_RETRY",
        }
    }
}

impl fmt::Display for XaCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The coordination error. Every failure the coordinator or its collaborators
/// report carries an XA sub-code so callers can decide how to react.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct XaError {
    code: XaCode,
    message: String,
}

impl XaError {
    pub fn new(code: XaCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// `XAER_PROTO`: the operation is illegal in the context's current state.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(XaCode::Proto, message)
    }

    /// `XAER_DUPID`: the distributed id is already registered.
    pub fn duplicate_id(message: impl Into<String>) -> Self {
        Self::new(XaCode::DupId, message)
    }

    /// `XAER_INVAL`: unrecognized flag, malformed argument or unknown context.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(XaCode::Inval, message)
    }

    /// `XAER_RMERR`: a resource manager call failed.
    pub fn resource(message: impl Into<String>) -> Self {
        Self::new(XaCode::RmErr, message)
    }

    /// `XA_RBROLLBACK`: the branch must not be committed.
    pub fn rollback(message: impl Into<String>) -> Self {
        Self::new(XaCode::RbRollback, message)
    }

    /// A heuristic outcome. Falls back to `XA_HEURHAZ` if `code` is not heuristic.
    pub fn heuristic(code: XaCode, message: impl Into<String>) -> Self {
        let code = if code.is_heuristic() {
            code
        } else {
            XaCode::HeurHaz
        };
        Self::new(code, message)
    }

    pub fn code(&self) -> XaCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

pub type Result<T> = std::result::Result<T, XaError>;

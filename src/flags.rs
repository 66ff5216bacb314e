//! XA protocol flags as closed enums.
//!
//! Raw integer flags coming from a wire or driver layer are converted with
//! `TryFrom<i32>`, which is the only place an unrecognized value can appear.

use crate::errors::XaError;

pub const TMNOFLAGS: i32 = 0x0000_0000;
pub const TMJOIN: i32 = 0x0020_0000;
pub const TMRESUME: i32 = 0x0800_0000;
pub const TMSUCCESS: i32 = 0x0400_0000;
pub const TMFAIL: i32 = 0x2000_0000;
pub const TMSUSPEND: i32 = 0x0200_0000;
pub const TMSTARTRSCAN: i32 = 0x0100_0000;
pub const TMENDRSCAN: i32 = 0x0080_0000;

pub const XA_OK: i32 = 0;
pub const XA_RDONLY: i32 = 3;

/// Flags accepted by `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartFlag {
    /// Begin a new branch.
    NoFlags,
    /// Join a branch another thread already started.
    Join,
    /// Resume a previously suspended association.
    Resume,
}

/// Flags accepted by `end` and by resource delistment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndFlag {
    /// The work completed normally.
    Success,
    /// The work failed; the branch must roll back.
    Fail,
    /// Detach without ending; a later `Resume` reattaches.
    Suspend,
}

/// Flags accepted by `recover`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoverFlag {
    NoFlags,
    StartScan,
    EndScan,
    StartEndScan,
}

/// Outcome of a successful prepare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vote {
    /// The branch has work to commit.
    Ok,
    /// The branch was read-only; nothing to commit.
    ReadOnly,
}

impl StartFlag {
    pub fn bits(self) -> i32 {
        match self {
            StartFlag::NoFlags => TMNOFLAGS,
            StartFlag::Join => TMJOIN,
            StartFlag::Resume => TMRESUME,
        }
    }
}

impl TryFrom<i32> for StartFlag {
    type Error = XaError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            TMNOFLAGS => Ok(StartFlag::NoFlags),
            TMJOIN => Ok(StartFlag::Join),
            TMRESUME => Ok(StartFlag::Resume),
            other => Err(XaError::invalid(format!("invalid start flag {:#x}", other))),
        }
    }
}

impl EndFlag {
    pub fn bits(self) -> i32 {
        match self {
            EndFlag::Success => TMSUCCESS,
            EndFlag::Fail => TMFAIL,
            EndFlag::Suspend => TMSUSPEND,
        }
    }
}

impl TryFrom<i32> for EndFlag {
    type Error = XaError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            TMSUCCESS => Ok(EndFlag::Success),
            TMFAIL => Ok(EndFlag::Fail),
            TMSUSPEND => Ok(EndFlag::Suspend),
            other => Err(XaError::invalid(format!("invalid end flag {:#x}", other))),
        }
    }
}

impl RecoverFlag {
    pub fn bits(self) -> i32 {
        match self {
            RecoverFlag::NoFlags => TMNOFLAGS,
            RecoverFlag::StartScan => TMSTARTRSCAN,
            RecoverFlag::EndScan => TMENDRSCAN,
            RecoverFlag::StartEndScan => TMSTARTRSCAN | TMENDRSCAN,
        }
    }
}

impl TryFrom<i32> for RecoverFlag {
    type Error = XaError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        const BOTH: i32 = TMSTARTRSCAN | TMENDRSCAN;
        match value {
            TMNOFLAGS => Ok(RecoverFlag::NoFlags),
            TMSTARTRSCAN => Ok(RecoverFlag::StartScan),
            TMENDRSCAN => Ok(RecoverFlag::EndScan),
            BOTH => Ok(RecoverFlag::StartEndScan),
            other => Err(XaError::invalid(format!("invalid recover flag {:#x}", other))),
        }
    }
}

impl Vote {
    pub fn value(self) -> i32 {
        match self {
            Vote::Ok => XA_OK,
            Vote::ReadOnly => XA_RDONLY,
        }
    }
}

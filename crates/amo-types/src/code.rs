/// Result codes for CheckTx and DeliverTx responses. The integer values are
/// part of the protocol and must not be reordered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum TxCode {
    Ok = 0,
    BadParam,
    TooOldTx,
    AlreadyProcessedTx,
    InvalidAmount,
    NotEnoughBalance,
    SelfTransaction,
    PermissionDenied,
    AlreadyRegistered,
    AlreadyRequested,
    AlreadyGranted,
    ParcelNotFound,
    RequestNotFound,
    UsageNotFound,
    BadSignature,
    MultipleDelegates,
    DelegateNotFound,
    NoStake,
    ImproperStakingUnit,
    ImproperStakeAmount,
    HeightTaken,
    BadValidator,
    LastValidator,
    DelegateExists,
    StakeLocked,
    ImproperDraftId,
    ImproperDraftDeposit,
    ProposedDraft,
    DraftInProcess,
    Unknown,
}

impl TxCode {
    pub fn value(self) -> u32 {
        self as u32
    }

    pub fn is_ok(self) -> bool {
        self == TxCode::Ok
    }

    pub fn info(self) -> &'static str {
        match self {
            TxCode::Ok => "ok",
            TxCode::BadParam => "bad parameter",
            TxCode::TooOldTx => "tx is too old to be bound to a block",
            TxCode::AlreadyProcessedTx => "tx was processed before",
            TxCode::InvalidAmount => "invalid amount",
            TxCode::NotEnoughBalance => "not enough balance",
            TxCode::SelfTransaction => "tx against oneself",
            TxCode::PermissionDenied => "permission denied",
            TxCode::AlreadyRegistered => "parcel already registered",
            TxCode::AlreadyRequested => "parcel already requested",
            TxCode::AlreadyGranted => "parcel already granted",
            TxCode::ParcelNotFound => "parcel not found",
            TxCode::RequestNotFound => "request not found",
            TxCode::UsageNotFound => "usage not found",
            TxCode::BadSignature => "signature verification failed",
            TxCode::MultipleDelegates => "delegating to multiple holders",
            TxCode::DelegateNotFound => "delegate not found",
            TxCode::NoStake => "no stake",
            TxCode::ImproperStakingUnit => "amount not a multiple of the staking unit",
            TxCode::ImproperStakeAmount => "improper stake amount",
            TxCode::HeightTaken => "locked stake height already taken",
            TxCode::BadValidator => "bad validator key",
            TxCode::LastValidator => "cannot remove the last validator",
            TxCode::DelegateExists => "delegates appointed to this stake exist",
            TxCode::StakeLocked => "stake is locked",
            TxCode::ImproperDraftId => "improper draft id",
            TxCode::ImproperDraftDeposit => "improper draft deposit",
            TxCode::ProposedDraft => "draft already proposed",
            TxCode::DraftInProcess => "another draft is in process",
            TxCode::Unknown => "unknown",
        }
    }
}

/// Result codes for Query responses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum QueryCode {
    Ok = 0,
    BadPath,
    NoKey,
    BadKey,
    NoMatch,
}

impl QueryCode {
    pub fn value(self) -> u32 {
        self as u32
    }
}

//! Block-lifecycle machinery: replay prevention, block-binding grace,
//! laziness accounting, and the per-block reward and penalty distributions.

mod binding;
mod incentive;
mod laziness;
mod penalty;
mod replay;

pub use binding::BlockBindingManager;
pub use incentive::distribute_incentive;
pub use laziness::LazinessCounter;
pub use penalty::penalize_convicts;
pub use replay::ReplayPreventer;

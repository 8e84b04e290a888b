//! Substitute implementations, one module per query family.

pub mod cmdline;
pub mod locale;
pub mod power;
pub mod time;
pub mod volume;

pub use cmdline::CommandLineOverride;
pub use locale::LocaleOverride;
pub use power::ExecutionStateBlocker;
pub use time::{ScaledClock, ScaledSleep, ScalingRatio};
pub use volume::{MaskedVolumes, VolumeIdentityCache};

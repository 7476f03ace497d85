mod os;
mod paths;

pub use os::{TargetOs, UnknownTargetOs};
pub use paths::{AppPaths, AppPathsError};

use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ReaperConfig {
    /// become the subreaper of this process tree on start (linux only)
    ///
    /// orphaned descendants are re-parented to this process instead of
    /// the init of the namespace, so they get reaped here.
    #[serde(default)]
    pub subreaper: bool,
}

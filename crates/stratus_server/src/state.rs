use crate::rules::{HeaderRule, RedirectRule};
use stratus_fs::{DevManifest, ReverseMap};
use stratus_rules::RulesMatcher;

/// Everything a request needs, built once at startup.
pub struct DevState {
    pub manifest: DevManifest,
    pub reverse_map: ReverseMap,
    pub redirects: RulesMatcher<RedirectRule>,
    pub headers: RulesMatcher<HeaderRule>,
}

//! Optimization pipeline configuration.

use serde::{Deserialize, Serialize};

/// Pass toggles for `compile`/`optimize`. Defaults enable everything;
/// `none()` is the identity pipeline used by differential tests.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct OptConfig {
    pub dead_store_elimination: bool,
    pub branch_simplification: bool,
    pub demote_atomics: bool,
}

impl Default for OptConfig {
    fn default() -> OptConfig {
        OptConfig {
            dead_store_elimination: true,
            branch_simplification: true,
            demote_atomics: true,
        }
    }
}

impl OptConfig {
    /// All passes off; the kernel reaches the executor untouched.
    pub fn none() -> OptConfig {
        OptConfig {
            dead_store_elimination: false,
            branch_simplification: false,
            demote_atomics: false,
        }
    }
}

use crate::storage::GenerationStore;
use tracing::{info, warn};

/// Rebuilds the pivoted wide view after a successful activation.
///
/// View maintenance is best-effort: the generation is already live when
/// this runs, so a failure here degrades the convenience surface without
/// invalidating the run.
pub struct ViewBuilder;

impl ViewBuilder {
    /// Returns whether the view definition changed. Errors are logged and
    /// swallowed.
    pub fn rebuild<S: GenerationStore>(store: &mut S, variables: &[String]) -> bool {
        match store.rebuild_wide_view(variables) {
            Ok(changed) => {
                if changed {
                    info!(variables = variables.len(), "wide view updated");
                }
                changed
            }
            Err(e) => {
                warn!(error = %e, "wide view rebuild failed, dataset remains usable");
                false
            }
        }
    }
}

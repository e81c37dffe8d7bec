// Moderation policy - what happens to content for each verdict.
//
// Neither silently publishing nor silently suppressing unreviewed content is
// acceptable, so anything the classifier could not settle stays pending.

use super::moderation_models::{Disposition, PolicyDecision, Verdict};

/// Decide the disposition for a verdict. Total over all four verdicts.
pub fn decide(verdict: Verdict) -> PolicyDecision {
    match verdict {
        Verdict::Clean => PolicyDecision {
            disposition: Disposition::Visible,
            retry: false,
            manual_review: false,
        },
        Verdict::Inappropriate => PolicyDecision {
            disposition: Disposition::Hidden,
            retry: false,
            manual_review: false,
        },
        // Ambiguous signal goes to a human instead of being auto-decided.
        Verdict::Uncertain => PolicyDecision {
            disposition: Disposition::PendingReview,
            retry: false,
            manual_review: true,
        },
        Verdict::Unavailable => PolicyDecision {
            disposition: Disposition::PendingReview,
            retry: true,
            manual_review: false,
        },
    }
}

use gexit_model::{ClassificationResult, ExitStatus, HopRecord};

/// Organization strings that identify Google's network.
const GOOGLE_MARKERS: [&str; 2] = ["google", "as15169"];

pub fn is_google_org(organization: &str) -> bool {
    let lower = organization.to_ascii_lowercase();
    GOOGLE_MARKERS.iter().any(|marker| lower.contains(marker))
}

pub fn is_google_hop(hop: &HopRecord) -> bool {
    !hop.is_timeout() && is_google_org(hop.organization())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PathState {
    /// No Google hop yet.
    Searching,
    /// Last responding hop was Google. `trailing_timeout` is set once a silent
    /// hop follows it; another Google hop clears it.
    InsideGoogle { trailing_timeout: bool },
    /// A non-Google hop followed Google. Nothing after it matters.
    Exited,
}

/// Finds the last Google hop on a path and what follows it. `hops` must be in
/// TTL order.
pub fn classify(destination: &str, hops: &[HopRecord]) -> ClassificationResult {
    let mut state = PathState::Searching;
    let mut last_google: Option<&HopRecord> = None;
    let mut exit: Option<&HopRecord> = None;

    for hop in hops {
        state = match state {
            PathState::Exited => break,
            PathState::Searching => {
                if is_google_hop(hop) {
                    last_google = Some(hop);
                    PathState::InsideGoogle {
                        trailing_timeout: false,
                    }
                } else {
                    PathState::Searching
                }
            }
            PathState::InsideGoogle { .. } if hop.is_timeout() => PathState::InsideGoogle {
                trailing_timeout: true,
            },
            PathState::InsideGoogle { .. } if is_google_hop(hop) => {
                last_google = Some(hop);
                PathState::InsideGoogle {
                    trailing_timeout: false,
                }
            }
            PathState::InsideGoogle { .. } => {
                exit = Some(hop);
                PathState::Exited
            }
        };
    }

    let Some(last_google) = last_google else {
        return ClassificationResult::no_google_node(destination);
    };

    let status = match state {
        PathState::Exited => ExitStatus::ExitedGoogle,
        PathState::InsideGoogle {
            trailing_timeout: true,
        } => ExitStatus::TimeoutAfterLastGoogle,
        PathState::InsideGoogle {
            trailing_timeout: false,
        }
        | PathState::Searching => ExitStatus::UnknownExit,
    };

    ClassificationResult {
        destination: destination.to_string(),
        last_google_hop_index: Some(last_google.hop_index),
        last_google_address: last_google.responder,
        exit_hop_index: exit.map(|hop| hop.hop_index),
        exit_address: exit.and_then(|hop| hop.responder),
        hops_before_exit: exit.map(|hop| hop.hop_index.saturating_sub(1)),
        median_rtt_to_last_google_hop: last_google.median_rtt_ms(),
        status,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn google_markers_match_case_insensitively() {
        assert!(is_google_org("AS15169 Google LLC"));
        assert!(is_google_org("GOOGLE-CLOUD-PLATFORM"));
        assert!(is_google_org("as15169"));
        assert!(!is_google_org("AS396982 Goog Cloud"));
        assert!(!is_google_org(""));
    }

    #[test]
    fn silent_hop_is_never_google() {
        let hop = HopRecord::timeout(1, 3);
        assert!(!is_google_hop(&hop));
    }
}

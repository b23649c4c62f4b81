//! The close-code classification table.

use crate::error::ErrorType;

/// What a shard should do after its socket closes with a given code.
#[derive(Clone, Copy, Debug)]
pub enum CloseAction {
    /// Reconnect and keep dispatching normally.
    Reconnect,
    /// Reconnect, but only after rescaling the shard set (code 4010, no
    /// pinned shard ids).
    Rescale,
    /// Stop entirely: record `kind` on the client's fatal slot and shut down.
    Fatal(ErrorType),
}

/// The outcome of classifying a close code: what to do, and whether the
/// shard's session/gateway URL survive the reconnect.
#[derive(Clone, Copy, Debug)]
pub struct ClosePlan {
    pub action: CloseAction,
    pub save_session: bool,
    pub save_gateway_url: bool,
}

const RECONNECT_KEEP_BOTH: ClosePlan = ClosePlan {
    action: CloseAction::Reconnect,
    save_session: true,
    save_gateway_url: true,
};

/// Classifies a gateway close code into a [`ClosePlan`]. `pinned_shard_ids`
/// distinguishes the two outcomes for code 4010: a user who pinned shard ids
/// can't be auto-rescaled, so that case is fatal instead.
pub const fn classify_close_code(code: Option<u16>, pinned_shard_ids: bool) -> ClosePlan {
    match code {
        None => RECONNECT_KEEP_BOTH,
        Some(4000) | Some(4001) | Some(4002) | Some(4005) => RECONNECT_KEEP_BOTH,
        Some(4003) => ClosePlan {
            action: CloseAction::Fatal(ErrorType::GatewayNotAuthenticated),
            save_session: false,
            save_gateway_url: false,
        },
        Some(4004) => ClosePlan {
            action: CloseAction::Fatal(ErrorType::InvalidToken),
            save_session: false,
            save_gateway_url: false,
        },
        Some(4007) => ClosePlan {
            action: CloseAction::Reconnect,
            save_session: false,
            save_gateway_url: true,
        },
        Some(4008) => ClosePlan {
            action: CloseAction::Reconnect,
            save_session: false,
            save_gateway_url: false,
        },
        Some(4009) => ClosePlan {
            action: CloseAction::Reconnect,
            save_session: false,
            save_gateway_url: true,
        },
        Some(4010) => {
            if pinned_shard_ids {
                ClosePlan {
                    action: CloseAction::Fatal(ErrorType::InvalidShardCount),
                    save_session: false,
                    save_gateway_url: false,
                }
            } else {
                ClosePlan {
                    action: CloseAction::Rescale,
                    save_session: true,
                    save_gateway_url: true,
                }
            }
        }
        Some(4012) => ClosePlan {
            action: CloseAction::Fatal(ErrorType::InvalidGatewayVersion),
            save_session: false,
            save_gateway_url: false,
        },
        Some(4013) => ClosePlan {
            action: CloseAction::Fatal(ErrorType::InvalidIntentNumber),
            save_session: false,
            save_gateway_url: false,
        },
        Some(4014) => ClosePlan {
            action: CloseAction::Fatal(ErrorType::IntentNotWhitelisted),
            save_session: false,
            save_gateway_url: false,
        },
        Some(other) => {
            let _ = other;
            RECONNECT_KEEP_BOTH
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_codes_clear_session_and_url() {
        for code in [4003, 4004, 4012, 4013, 4014] {
            let plan = classify_close_code(Some(code), false);
            assert!(matches!(plan.action, CloseAction::Fatal(_)), "code {code}");
            assert!(!plan.save_session);
            assert!(!plan.save_gateway_url);
        }
    }

    #[test]
    fn code_4007_keeps_url_but_not_session() {
        let plan = classify_close_code(Some(4007), false);
        assert!(matches!(plan.action, CloseAction::Reconnect));
        assert!(!plan.save_session);
        assert!(plan.save_gateway_url);
    }

    #[test]
    fn code_4010_rescales_unless_shard_ids_pinned() {
        let free = classify_close_code(Some(4010), false);
        assert!(matches!(free.action, CloseAction::Rescale));

        let pinned = classify_close_code(Some(4010), true);
        assert!(matches!(pinned.action, CloseAction::Fatal(ErrorType::InvalidShardCount)));
    }

    #[test]
    fn unknown_code_defaults_to_reconnect_keep_both() {
        let plan = classify_close_code(Some(9999), false);
        assert!(matches!(plan.action, CloseAction::Reconnect));
        assert!(plan.save_session);
        assert!(plan.save_gateway_url);
    }

    #[test]
    fn null_code_defaults_to_reconnect_keep_both() {
        let plan = classify_close_code(None, false);
        assert!(matches!(plan.action, CloseAction::Reconnect));
        assert!(plan.save_session);
        assert!(plan.save_gateway_url);
    }
}

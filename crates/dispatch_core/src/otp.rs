//! One-time pickup codes.
//!
//! At most one token per request: issuing replaces whatever was there. Tokens expire after
//! the configured TTL, are single-use, and burn after too many wrong codes.

use std::collections::HashMap;
use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, warn};

use crate::config::DispatchConfig;
use crate::error::{poisoned, DispatchError, DispatchResult};
use crate::model::RequestId;

const CODE_MIN: u32 = 1_000;
const CODE_MAX: u32 = 9_999;

/// A freshly minted code, handed to the customer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtpIssue {
    pub code: String,
    pub generated_at_ms: u64,
    pub expires_at_ms: u64,
}

#[derive(Debug, Clone)]
struct OtpToken {
    code: String,
    expires_at_ms: u64,
    attempts: u32,
    used: bool,
}

impl OtpToken {
    fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at_ms
    }
}

#[derive(Debug)]
pub struct OtpController {
    tokens: Mutex<HashMap<RequestId, OtpToken>>,
    rng: Mutex<StdRng>,
    ttl_ms: u64,
    max_attempts: u32,
}

impl OtpController {
    /// `seed = None` draws the generator from OS entropy.
    pub fn new(ttl_ms: u64, max_attempts: u32, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            tokens: Mutex::new(HashMap::new()),
            rng: Mutex::new(rng),
            ttl_ms,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn from_config(config: &DispatchConfig) -> Self {
        Self::new(
            config.timeouts.otp_ttl_ms(),
            config.timeouts.otp_max_attempts,
            config.otp_seed,
        )
    }

    /// Mint a 4-digit code for `request_id`, replacing any previous token.
    pub fn issue(&self, request_id: RequestId, now_ms: u64) -> DispatchResult<OtpIssue> {
        let code = {
            let mut rng = self.rng.lock().map_err(poisoned("otp rng"))?;
            rng.gen_range(CODE_MIN..=CODE_MAX).to_string()
        };
        let expires_at_ms = now_ms + self.ttl_ms;
        let token = OtpToken {
            code: code.clone(),
            expires_at_ms,
            attempts: 0,
            used: false,
        };
        let replaced = self
            .tokens
            .lock()
            .map_err(poisoned("otp"))?
            .insert(request_id, token)
            .is_some();
        debug!(request_id = %request_id, replaced, expires_at_ms, "otp issued");
        Ok(OtpIssue {
            code,
            generated_at_ms: now_ms,
            expires_at_ms,
        })
    }

    /// Check `code` against the active token and consume it on success.
    ///
    /// Checks run in order: already used, attempts exhausted, expired, mismatch. Only a
    /// mismatch counts as an attempt.
    pub fn verify(&self, request_id: RequestId, code: &str, now_ms: u64) -> DispatchResult<()> {
        let mut tokens = self.tokens.lock().map_err(poisoned("otp"))?;
        let token = tokens
            .get_mut(&request_id)
            .ok_or(DispatchError::InvalidOtp(request_id))?;
        if token.used {
            return Err(DispatchError::OtpAlreadyUsed(request_id));
        }
        if token.attempts >= self.max_attempts {
            return Err(DispatchError::OtpAttemptsExceeded {
                request_id,
                attempts: token.attempts,
            });
        }
        if token.is_expired(now_ms) {
            return Err(DispatchError::OtpExpired(request_id));
        }
        if token.code != code.trim() {
            token.attempts += 1;
            warn!(request_id = %request_id, attempts = token.attempts, "wrong otp submitted");
            if token.attempts >= self.max_attempts {
                return Err(DispatchError::OtpAttemptsExceeded {
                    request_id,
                    attempts: token.attempts,
                });
            }
            return Err(DispatchError::InvalidOtp(request_id));
        }
        token.used = true;
        Ok(())
    }

    /// Whether the active token may be replaced: it is missing, expired, or burned, and
    /// was never used.
    pub fn can_resend(&self, request_id: RequestId, now_ms: u64) -> DispatchResult<bool> {
        let tokens = self.tokens.lock().map_err(poisoned("otp"))?;
        Ok(match tokens.get(&request_id) {
            None => true,
            Some(token) => {
                !token.used && (token.is_expired(now_ms) || token.attempts >= self.max_attempts)
            }
        })
    }

    /// Drop the token for a closed request.
    pub fn revoke(&self, request_id: RequestId) -> bool {
        self.tokens
            .lock()
            .map(|mut tokens| tokens.remove(&request_id).is_some())
            .unwrap_or(false)
    }

    pub fn active_len(&self) -> usize {
        self.tokens.lock().map(|t| t.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL_MS: u64 = 300_000;

    fn controller() -> OtpController {
        OtpController::new(TTL_MS, 5, Some(7))
    }

    fn wrong(code: &str) -> String {
        if code == "1234" { "4321" } else { "1234" }.to_string()
    }

    #[test]
    fn codes_are_four_digits_and_seeded() {
        let a = controller();
        let b = controller();
        for i in 0..50 {
            let code = a.issue(RequestId(i), 0).unwrap().code;
            assert_eq!(code.len(), 4);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
            assert_eq!(code, b.issue(RequestId(i), 0).unwrap().code);
        }
    }

    #[test]
    fn valid_code_verifies_once() {
        let otp = controller();
        let issue = otp.issue(RequestId(1), 0).unwrap();
        assert_eq!(issue.expires_at_ms, TTL_MS);
        otp.verify(RequestId(1), &issue.code, 10).unwrap();
        assert_eq!(
            otp.verify(RequestId(1), &issue.code, 20),
            Err(DispatchError::OtpAlreadyUsed(RequestId(1)))
        );
    }

    #[test]
    fn expired_code_is_distinct_from_wrong_code() {
        let otp = controller();
        let issue = otp.issue(RequestId(1), 0).unwrap();
        assert_eq!(
            otp.verify(RequestId(1), &wrong(&issue.code), 10),
            Err(DispatchError::InvalidOtp(RequestId(1)))
        );
        assert_eq!(
            otp.verify(RequestId(1), &issue.code, TTL_MS),
            Err(DispatchError::OtpExpired(RequestId(1)))
        );
        assert!(otp.can_resend(RequestId(1), TTL_MS).unwrap());
    }

    #[test]
    fn token_burns_after_max_attempts() {
        let otp = controller();
        let issue = otp.issue(RequestId(1), 0).unwrap();
        let bad = wrong(&issue.code);
        for _ in 0..4 {
            assert_eq!(
                otp.verify(RequestId(1), &bad, 1),
                Err(DispatchError::InvalidOtp(RequestId(1)))
            );
        }
        assert!(!otp.can_resend(RequestId(1), 1).unwrap());
        let fifth = otp.verify(RequestId(1), &bad, 1).unwrap_err();
        assert!(matches!(fifth, DispatchError::OtpAttemptsExceeded { attempts: 5, .. }));
        // Even the right code is refused now.
        assert!(matches!(
            otp.verify(RequestId(1), &issue.code, 1),
            Err(DispatchError::OtpAttemptsExceeded { .. })
        ));
        assert!(otp.can_resend(RequestId(1), 1).unwrap());

        let fresh = otp.issue(RequestId(1), 2).unwrap();
        otp.verify(RequestId(1), &fresh.code, 3).unwrap();
    }

    #[test]
    fn reissue_replaces_token() {
        let otp = controller();
        otp.issue(RequestId(1), 0).unwrap();
        let second = otp.issue(RequestId(1), 0).unwrap();
        assert_eq!(otp.active_len(), 1);
        otp.verify(RequestId(1), &second.code, 1).unwrap();
        assert!(!otp.can_resend(RequestId(1), TTL_MS * 2).unwrap());
    }

    #[test]
    fn missing_token_is_invalid_and_revoke_clears() {
        let otp = controller();
        assert_eq!(
            otp.verify(RequestId(9), "1234", 0),
            Err(DispatchError::InvalidOtp(RequestId(9)))
        );
        otp.issue(RequestId(9), 0).unwrap();
        assert!(otp.revoke(RequestId(9)));
        assert!(!otp.revoke(RequestId(9)));
        assert_eq!(otp.active_len(), 0);
    }
}

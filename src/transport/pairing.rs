// PIN pairing — issuance, validation, lockout cooldown

use parking_lot::Mutex;
use rand::rngs::OsRng;
use rand::RngCore;
use std::time::{Duration, Instant};

/// Outcome of one pairing attempt. Rejections are data, never errors; the
/// reason string goes to the viewer verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingOutcome {
    Accepted,
    Rejected(String),
}

/// Validates viewer-supplied PINs against the active code.
///
/// Wrong codes count toward a lockout; once `max_attempts` is reached a
/// cooldown starts. Nothing fires when the cooldown expires — expiry is
/// evaluated lazily on the next attempt.
pub struct PairingManager {
    code: String,
    max_attempts: u32,
    cooldown: Duration,
    state: Mutex<AttemptState>,
}

struct AttemptState {
    failed_attempts: u32,
    cooldown_until: Option<Instant>,
}

impl PairingManager {
    /// Use the host-configured code when present, otherwise generate one.
    pub fn new(fixed_code: Option<String>, max_attempts: u32, cooldown: Duration) -> Self {
        let code = fixed_code.unwrap_or_else(Self::generate_code);
        PairingManager {
            code,
            max_attempts: max_attempts.max(1),
            cooldown,
            state: Mutex::new(AttemptState {
                failed_attempts: 0,
                cooldown_until: None,
            }),
        }
    }

    /// Four bytes from the OS CSPRNG, big-endian, reduced mod 1e6,
    /// zero-padded to six digits.
    fn generate_code() -> String {
        let mut bytes = [0u8; 4];
        OsRng.fill_bytes(&mut bytes);
        let value = u32::from_be_bytes(bytes) % 1_000_000;
        format!("{:06}", value)
    }

    /// The active PIN, for display on the device's developer log.
    pub fn active_code(&self) -> &str {
        &self.code
    }

    pub fn validate(&self, attempt: &str) -> PairingOutcome {
        let mut state = self.state.lock();
        let now = Instant::now();

        if let Some(until) = state.cooldown_until {
            if now < until {
                let remaining = (until - now).as_secs_f64().ceil() as u64;
                return PairingOutcome::Rejected(format!(
                    "Cooldown active. Try again in {}s",
                    remaining
                ));
            }
            state.cooldown_until = None;
        }

        if attempt != self.code {
            state.failed_attempts += 1;
            if state.failed_attempts >= self.max_attempts {
                state.cooldown_until = Some(now + self.cooldown);
                state.failed_attempts = 0;
                return PairingOutcome::Rejected(format!(
                    "Too many failed attempts. Locked for {}s",
                    self.cooldown.as_secs()
                ));
            }
            let remaining = self.max_attempts - state.failed_attempts;
            return PairingOutcome::Rejected(format!(
                "Invalid code. {} attempts remaining",
                remaining
            ));
        }

        state.failed_attempts = 0;
        state.cooldown_until = None;
        PairingOutcome::Accepted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> PairingManager {
        PairingManager::new(Some("123456".to_string()), 3, Duration::from_secs(30))
    }

    fn rejection(outcome: PairingOutcome) -> String {
        match outcome {
            PairingOutcome::Rejected(reason) => reason,
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[test]
    fn test_generated_code_is_six_digits() {
        for _ in 0..10 {
            let manager = PairingManager::new(None, 3, Duration::from_secs(30));
            let code = manager.active_code();
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn test_happy_path() {
        let manager = manager();
        assert_eq!(manager.validate("123456"), PairingOutcome::Accepted);
    }

    #[test]
    fn test_lockout_and_cooldown() {
        let manager = manager();
        assert_eq!(
            rejection(manager.validate("000000")),
            "Invalid code. 2 attempts remaining"
        );
        assert_eq!(
            rejection(manager.validate("000000")),
            "Invalid code. 1 attempts remaining"
        );
        let reason = rejection(manager.validate("000000"));
        assert!(reason.starts_with("Too many failed attempts"), "{}", reason);

        // Even the right code is rejected during cooldown.
        let reason = rejection(manager.validate("123456"));
        assert!(
            reason.starts_with("Cooldown active. Try again in"),
            "{}",
            reason
        );
    }

    #[test]
    fn test_cooldown_expires_lazily() {
        let manager = PairingManager::new(
            Some("123456".to_string()),
            1,
            Duration::from_millis(20),
        );
        manager.validate("000000"); // instant lockout at max_attempts=1
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(manager.validate("123456"), PairingOutcome::Accepted);
    }

    #[test]
    fn test_success_resets_attempt_counter() {
        let manager = manager();
        manager.validate("000000");
        assert_eq!(manager.validate("123456"), PairingOutcome::Accepted);
        assert_eq!(
            rejection(manager.validate("000000")),
            "Invalid code. 2 attempts remaining"
        );
    }
}

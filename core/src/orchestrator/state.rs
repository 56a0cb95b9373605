//! Phases and transition guards of one synthesis run.

use crate::TtsError;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryCause {
    /// Evict and re-download the model
    Corruption,
    /// Re-run the failing chunk with strict sanitization
    Phonemization,
}

impl fmt::Display for RecoveryCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecoveryCause::Corruption => f.write_str("model-corruption"),
            RecoveryCause::Phonemization => f.write_str("phonemization"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Resolving,
    Downloading,
    Verifying,
    Synthesizing,
    Recovering(RecoveryCause),
    Done,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Resolving => f.write_str("resolving"),
            Phase::Downloading => f.write_str("downloading"),
            Phase::Verifying => f.write_str("verifying"),
            Phase::Synthesizing => f.write_str("synthesizing"),
            Phase::Recovering(cause) => write!(f, "recovering({})", cause),
            Phase::Done => f.write_str("done"),
        }
    }
}

/// What to do after a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Recover(RecoveryCause),
    Fallback,
    Fail,
}

/// Retry counters for one run
#[derive(Debug, Clone)]
pub struct RecoveryBudget {
    max_retries: u32,
    retries: u32,
    fallback_used: bool,
}

impl RecoveryBudget {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            retries: 0,
            fallback_used: false,
        }
    }

    /// Another evict/re-download cycle is allowed for the current voice
    pub fn can_retry(&self) -> bool {
        self.retries < self.max_retries
    }

    /// The single switch to a fallback voice is still unused
    pub fn can_fallback(&self) -> bool {
        !self.fallback_used
    }

    pub fn record_retry(&mut self) {
        self.retries += 1;
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Switch voices: consume the fallback and restart the retry counter
    pub fn record_fallback(&mut self) {
        self.fallback_used = true;
        self.retries = 0;
    }

    /// Choose the transition for `error`
    pub fn transition_for(&self, error: &TtsError, strict_retry_available: bool) -> Transition {
        match error {
            TtsError::ModelCorruption { .. } if self.can_retry() => {
                Transition::Recover(RecoveryCause::Corruption)
            }
            TtsError::Phonemization { .. } if strict_retry_available => {
                Transition::Recover(RecoveryCause::Phonemization)
            }
            e if e.is_transient() && self.can_fallback() => Transition::Fallback,
            _ => Transition::Fail,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corruption() -> TtsError {
        TtsError::ModelCorruption {
            voice_id: "en_US-amy-medium".into(),
            message: "Aborted()".into(),
        }
    }

    fn phonemization() -> TtsError {
        TtsError::Phonemization {
            voice_id: "en_US-amy-medium".into(),
            message: "index out of range".into(),
        }
    }

    #[test]
    fn test_corruption_retries_then_falls_back_once() {
        let mut budget = RecoveryBudget::new(2);
        for _ in 0..2 {
            assert_eq!(
                budget.transition_for(&corruption(), true),
                Transition::Recover(RecoveryCause::Corruption)
            );
            budget.record_retry();
        }
        assert_eq!(budget.transition_for(&corruption(), true), Transition::Fallback);

        budget.record_fallback();
        assert_eq!(budget.retries(), 0);
        budget.record_retry();
        budget.record_retry();
        assert_eq!(budget.transition_for(&corruption(), true), Transition::Fail);
    }

    #[test]
    fn test_phonemization_strict_retry_first() {
        let budget = RecoveryBudget::new(2);
        assert_eq!(
            budget.transition_for(&phonemization(), true),
            Transition::Recover(RecoveryCause::Phonemization)
        );
        assert_eq!(budget.transition_for(&phonemization(), false), Transition::Fallback);
    }

    #[test]
    fn test_structural_errors_fail_immediately() {
        let budget = RecoveryBudget::new(2);
        for err in [
            TtsError::EmptyText,
            TtsError::WorkerInit("boom".into()),
            TtsError::StorageQuota("full".into()),
            TtsError::PayloadTooLarge { size: 2, limit: 1 },
        ] {
            assert_eq!(budget.transition_for(&err, true), Transition::Fail);
        }
    }
}

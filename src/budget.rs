//! Context budget allocation
//!
//! Partitions a per-request token budget across four buckets:
//! critical (current task, active agents, work plan), skills (loaded
//! domain knowledge), project (files, memories, commits), and general
//! (session history, background).

use crate::error::{OrchestrationError, Result};
use serde::{Deserialize, Serialize};

/// Budget fractions per bucket. Must be non-negative with a sum ≤ 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BudgetFractions {
    pub critical: f64,
    pub skills: f64,
    pub project: f64,
    pub general: f64,
}

impl Default for BudgetFractions {
    fn default() -> Self {
        Self {
            critical: 0.40,
            skills: 0.30,
            project: 0.20,
            general: 0.10,
        }
    }
}

impl BudgetFractions {
    /// Validate the fraction constraints.
    pub fn validate(&self) -> Result<()> {
        let parts = [
            ("critical", self.critical),
            ("skills", self.skills),
            ("project", self.project),
            ("general", self.general),
        ];

        for (name, fraction) in parts {
            if fraction < 0.0 || !fraction.is_finite() {
                return Err(OrchestrationError::Validation(format!(
                    "Budget fraction '{}' must be non-negative (got {})",
                    name, fraction
                )));
            }
        }

        let sum: f64 = parts.iter().map(|(_, f)| f).sum();
        // Small epsilon keeps default fractions summing to exactly 1.0 valid
        if sum > 1.0 + 1e-9 {
            return Err(OrchestrationError::Validation(format!(
                "Budget fractions sum to {:.3}, must be <= 1.0",
                sum
            )));
        }

        Ok(())
    }

    pub fn sum(&self) -> f64 {
        self.critical + self.skills + self.project + self.general
    }
}

/// Integer token shares per bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetAllocation {
    pub critical: usize,
    pub skills: usize,
    pub project: usize,
    pub general: usize,
}

impl BudgetAllocation {
    pub fn total(&self) -> usize {
        self.critical + self.skills + self.project + self.general
    }
}

/// Allocate proportional integer shares of a total token budget.
pub fn allocate(total_tokens: usize, fractions: &BudgetFractions) -> Result<BudgetAllocation> {
    fractions.validate()?;

    Ok(BudgetAllocation {
        critical: (total_tokens as f64 * fractions.critical) as usize,
        skills: (total_tokens as f64 * fractions.skills) as usize,
        project: (total_tokens as f64 * fractions.project) as usize,
        general: (total_tokens as f64 * fractions.general) as usize,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_allocation() {
        let allocation = allocate(200_000, &BudgetFractions::default()).unwrap();
        assert_eq!(allocation.critical, 80_000);
        assert_eq!(allocation.skills, 60_000);
        assert_eq!(allocation.project, 40_000);
        assert_eq!(allocation.general, 20_000);
        assert_eq!(allocation.total(), 200_000);
    }

    #[test]
    fn test_negative_fraction_rejected() {
        let fractions = BudgetFractions {
            critical: -0.1,
            ..Default::default()
        };
        assert!(allocate(1000, &fractions).is_err());
    }

    #[test]
    fn test_oversubscribed_fractions_rejected() {
        let fractions = BudgetFractions {
            critical: 0.6,
            skills: 0.6,
            project: 0.0,
            general: 0.0,
        };
        assert!(fractions.validate().is_err());
    }

    #[test]
    fn test_undersubscribed_fractions_allowed() {
        let fractions = BudgetFractions {
            critical: 0.2,
            skills: 0.2,
            project: 0.1,
            general: 0.0,
        };
        let allocation = allocate(10_000, &fractions).unwrap();
        assert_eq!(allocation.total(), 5_000);
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// For all budgets and valid fractions: Σ shares ≤ T, each share ≥ 0
        #[test]
        fn allocation_never_exceeds_budget(
            total in 0usize..10_000_000,
            a in 0.0f64..1.0,
            b in 0.0f64..1.0,
            c in 0.0f64..1.0,
            d in 0.0f64..1.0,
        ) {
            // Normalize so the fractions sum to at most 1.0
            let sum = (a + b + c + d).max(1.0);
            let fractions = BudgetFractions {
                critical: a / sum,
                skills: b / sum,
                project: c / sum,
                general: d / sum,
            };

            let allocation = allocate(total, &fractions).unwrap();
            prop_assert!(allocation.total() <= total);
        }
    }
}

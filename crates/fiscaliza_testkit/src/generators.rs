//! Property-based test generators using proptest.
//!
//! Provides strategies for generating inspection sessions: sequences of
//! creations, deletions and renumbering passes over one case.

use fiscaliza_core::Answer;
use proptest::prelude::*;

/// Strategy for generating finding texts.
pub fn finding_text_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Z][a-z]{2,12}( [a-z]{2,10}){0,6}").expect("Invalid regex")
}

/// Strategy for generating legal articles.
pub fn article_strategy() -> impl Strategy<Value = String> {
    (1u32..200, 2000u32..2030).prop_map(|(art, year)| format!("art. {art} da Resolução {year}"))
}

/// Strategy for generating checklist answers.
pub fn answer_strategy() -> impl Strategy<Value = Answer> {
    prop_oneof![
        3 => Just(Answer::No),
        2 => Just(Answer::Yes),
        1 => Just(Answer::NotApplicable),
    ]
}

/// One step of an inspection session.
///
/// Unit and record positions are taken modulo what exists when the step
/// runs; steps with nothing to act on are skipped.
#[derive(Debug, Clone)]
pub enum InspectionOp {
    /// Add a unit at the end of the case.
    AddUnit,
    /// Record a manual finding.
    RecordFinding {
        /// Unit position.
        unit: usize,
        /// Whether the finding raises a non-conformity.
        raises_nc: bool,
        /// Whether the non-conformity gets a determination.
        with_determination: bool,
        /// Finding text.
        text: String,
    },
    /// Answer one checklist item.
    Answer {
        /// Unit position.
        unit: usize,
        /// Catalog position.
        item: usize,
        /// The answer.
        answer: Answer,
    },
    /// Change the answer of a stored response.
    ChangeAnswer {
        /// Response position within its unit.
        unit: usize,
        /// Response position.
        response: usize,
        /// The new answer.
        answer: Answer,
    },
    /// Create a manual recommendation.
    Recommend {
        /// Unit position.
        unit: usize,
    },
    /// Delete a manual finding.
    DeleteFinding {
        /// Unit position.
        unit: usize,
        /// Finding position.
        finding: usize,
    },
    /// Delete a checklist response.
    DeleteResponse {
        /// Unit position.
        unit: usize,
        /// Response position.
        response: usize,
    },
    /// Delete a unit with everything it owns.
    DeleteUnit {
        /// Unit position.
        unit: usize,
    },
    /// Run a renumbering pass over the whole case.
    Renumber,
}

/// Strategy for generating inspection steps.
pub fn inspection_op_strategy() -> impl Strategy<Value = InspectionOp> {
    prop_oneof![
        2 => Just(InspectionOp::AddUnit),
        4 => (any::<usize>(), any::<bool>(), any::<bool>(), finding_text_strategy()).prop_map(
            |(unit, raises_nc, with_determination, text)| InspectionOp::RecordFinding {
                unit,
                raises_nc,
                with_determination,
                text,
            }
        ),
        4 => (any::<usize>(), any::<usize>(), answer_strategy())
            .prop_map(|(unit, item, answer)| InspectionOp::Answer { unit, item, answer }),
        2 => (any::<usize>(), any::<usize>(), answer_strategy()).prop_map(
            |(unit, response, answer)| InspectionOp::ChangeAnswer {
                unit,
                response,
                answer,
            }
        ),
        1 => any::<usize>().prop_map(|unit| InspectionOp::Recommend { unit }),
        2 => (any::<usize>(), any::<usize>())
            .prop_map(|(unit, finding)| InspectionOp::DeleteFinding { unit, finding }),
        1 => (any::<usize>(), any::<usize>())
            .prop_map(|(unit, response)| InspectionOp::DeleteResponse { unit, response }),
        1 => any::<usize>().prop_map(|unit| InspectionOp::DeleteUnit { unit }),
        1 => Just(InspectionOp::Renumber),
    ]
}

/// Strategy for generating a session of steps.
pub fn session_strategy(min_ops: usize, max_ops: usize) -> impl Strategy<Value = Vec<InspectionOp>> {
    prop::collection::vec(inspection_op_strategy(), min_ops..max_ops)
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Creates a configuration for thorough tests.
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            cases: 1024,
            max_shrink_iters: 10000,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #![proptest_config(PropTestConfig::quick().to_proptest_config())]

        #[test]
        fn finding_text_is_not_blank(text in finding_text_strategy()) {
            prop_assert!(!text.trim().is_empty());
        }

        #[test]
        fn article_names_a_resolution(article in article_strategy()) {
            prop_assert!(article.starts_with("art. "));
            prop_assert!(article.contains("Resolução"));
        }

        #[test]
        fn session_length_is_bounded(ops in session_strategy(1, 20)) {
            prop_assert!(!ops.is_empty() && ops.len() < 20);
        }
    }
}

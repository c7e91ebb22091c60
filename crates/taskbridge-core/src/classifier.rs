//! Complexity classification.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::OrchestrationError;
use crate::task::{Classification, TaskOptions};

/// Decide the execution class from caller options.
///
/// An explicit `is_complex` flag wins; without one the task is `Simple`.
pub fn classify(options: &TaskOptions) -> Classification {
    match options.is_complex {
        Some(true) => Classification::Complex,
        Some(false) | None => Classification::Simple,
    }
}

/// How the bridge treats a schedule request that carries no complexity flag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassificationPolicy {
    /// Default to `Simple` and log a warning.
    #[default]
    Lenient,
    /// Reject with `ClassificationAmbiguous`.
    Strict,
}

impl ClassificationPolicy {
    /// Classify `options`, enforcing the policy for a missing flag.
    pub fn apply(
        &self,
        task_type: &str,
        options: &TaskOptions,
    ) -> Result<Classification, OrchestrationError> {
        if options.is_complex.is_none() {
            match self {
                Self::Strict => {
                    return Err(OrchestrationError::ClassificationAmbiguous {
                        task_type: task_type.to_string(),
                        reason: "is_complex flag is required".to_string(),
                    })
                }
                Self::Lenient => {
                    tracing::warn!(
                        task_type = %task_type,
                        "No complexity flag supplied, routing as SIMPLE"
                    );
                }
            }
        }
        Ok(classify(options))
    }
}

impl FromStr for ClassificationPolicy {
    type Err = OrchestrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "lenient" => Ok(Self::Lenient),
            "strict" => Ok(Self::Strict),
            other => Err(OrchestrationError::InvalidInput(format!(
                "unknown classification policy '{}'",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_explicit_flag_wins() {
        assert_eq!(classify(&TaskOptions::complex()), Classification::Complex);
        assert_eq!(classify(&TaskOptions::simple()), Classification::Simple);
    }

    #[test]
    fn test_classify_defaults_to_simple() {
        let options = TaskOptions {
            workflow_type: Some("projectAnalysis".into()),
            ..TaskOptions::default()
        };
        assert_eq!(classify(&options), Classification::Simple);
    }

    #[test]
    fn test_strict_policy_rejects_missing_flag() {
        let err = ClassificationPolicy::Strict
            .apply("send-email", &TaskOptions::default())
            .unwrap_err();
        assert!(matches!(
            err,
            OrchestrationError::ClassificationAmbiguous { ref task_type, .. } if task_type == "send-email"
        ));

        let ok = ClassificationPolicy::Strict
            .apply("send-email", &TaskOptions::simple())
            .unwrap();
        assert_eq!(ok, Classification::Simple);
    }

    #[test]
    fn test_lenient_policy_defaults() {
        let class = ClassificationPolicy::Lenient
            .apply("send-email", &TaskOptions::default())
            .unwrap();
        assert_eq!(class, Classification::Simple);
        assert_eq!("STRICT".parse::<ClassificationPolicy>().unwrap(), ClassificationPolicy::Strict);
    }
}

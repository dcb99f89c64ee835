use serde::Serialize;

/// Coarse classification of instantaneous household power draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PowerLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl PowerLevel {
    pub fn classify(watts: f64) -> Self {
        if watts > 500.0 {
            Self::Critical
        } else if watts > 300.0 {
            Self::High
        } else if watts > 100.0 {
            Self::Medium
        } else {
            Self::Low
        }
    }

    pub fn advice(self) -> &'static str {
        match self {
            Self::Critical => {
                "Very high usage! Turn off heavy appliances like AC, oven, or washing machine."
            }
            Self::High => {
                "High usage detected. Consider reducing usage: \
                 check water heater, fridge, or motor."
            }
            Self::Medium => "Moderate usage. Consider turning off unused lights or fans.",
            Self::Low => "Low power usage. All systems running efficiently.",
        }
    }

    pub fn is_alarming(self) -> bool {
        matches!(self, Self::High | Self::Critical)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thresholds_are_exclusive() {
        assert_eq!(PowerLevel::classify(0.0), PowerLevel::Low);
        assert_eq!(PowerLevel::classify(100.0), PowerLevel::Low);
        assert_eq!(PowerLevel::classify(100.1), PowerLevel::Medium);
        assert_eq!(PowerLevel::classify(300.0), PowerLevel::Medium);
        assert_eq!(PowerLevel::classify(450.0), PowerLevel::High);
        assert_eq!(PowerLevel::classify(500.5), PowerLevel::Critical);
    }

    #[test]
    fn serializes_as_upper_case_status() {
        assert_eq!(serde_json::to_string(&PowerLevel::High).unwrap(), "\"HIGH\"");
        assert!(PowerLevel::Critical.is_alarming());
        assert!(!PowerLevel::Medium.is_alarming());
    }
}

//! Quantization levels and the fidelity policy used at load time

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::backend::BackendSpec;
use crate::probe::ComputeClass;

/// Precision a backend is loaded at
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuantizationLevel {
    /// 16-bit weights
    Full,
    /// 8-bit weights
    Int8,
    /// 4-bit weights
    Int4,
}

impl QuantizationLevel {
    /// All levels, highest fidelity first
    pub const ALL: [Self; 3] = [Self::Full, Self::Int8, Self::Int4];

    /// Bits per weight
    #[must_use]
    pub fn bits(self) -> u64 {
        match self {
            Self::Full => 16,
            Self::Int8 => 8,
            Self::Int4 => 4,
        }
    }

    /// Estimated resident size given the full-precision size, rounded up
    #[must_use]
    pub fn estimate_footprint(self, full_precision_bytes: u64) -> u64 {
        let scaled = u128::from(full_precision_bytes) * u128::from(self.bits());
        let bytes = scaled.div_ceil(u128::from(Self::Full.bits()));
        u64::try_from(bytes).unwrap_or(u64::MAX)
    }
}

impl fmt::Display for QuantizationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => write!(f, "full"),
            Self::Int8 => write!(f, "int8"),
            Self::Int4 => write!(f, "int4"),
        }
    }
}

/// Ordered quantization preferences per compute class
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuantizationPolicy {
    /// Order tried on accelerator hosts
    pub accelerator: Vec<QuantizationLevel>,
    /// Order tried on CPU-only hosts
    pub cpu: Vec<QuantizationLevel>,
}

impl Default for QuantizationPolicy {
    fn default() -> Self {
        Self {
            accelerator: QuantizationLevel::ALL.to_vec(),
            cpu: QuantizationLevel::ALL.to_vec(),
        }
    }
}

impl QuantizationPolicy {
    /// Preference order for a compute class
    #[must_use]
    pub fn order_for(&self, class: ComputeClass) -> &[QuantizationLevel] {
        match class {
            ComputeClass::Accelerator => &self.accelerator,
            ComputeClass::Cpu => &self.cpu,
        }
    }

    /// First level in policy order that the backend supports and that fits in `headroom`
    #[must_use]
    pub fn select(
        &self,
        class: ComputeClass,
        spec: &BackendSpec,
        headroom: u64,
    ) -> Option<(QuantizationLevel, u64)> {
        self.order_for(class)
            .iter()
            .copied()
            .filter(|level| spec.supports(*level))
            .map(|level| (level, level.estimate_footprint(spec.full_precision_bytes)))
            .find(|(_, footprint)| *footprint <= headroom)
    }

    /// Smallest footprint the policy could ever produce for this backend
    #[must_use]
    pub fn minimum_footprint(&self, class: ComputeClass, spec: &BackendSpec) -> u64 {
        self.order_for(class)
            .iter()
            .filter(|level| spec.supports(**level))
            .map(|level| level.estimate_footprint(spec.full_precision_bytes))
            .min()
            .unwrap_or(spec.full_precision_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GIB: u64 = 1024 * 1024 * 1024;

    #[test]
    fn test_footprint_estimates() {
        assert_eq!(QuantizationLevel::Full.estimate_footprint(8 * GIB), 8 * GIB);
        assert_eq!(QuantizationLevel::Int8.estimate_footprint(8 * GIB), 4 * GIB);
        assert_eq!(QuantizationLevel::Int4.estimate_footprint(8 * GIB), 2 * GIB);
        // Rounds up rather than under-reserving
        assert_eq!(QuantizationLevel::Int4.estimate_footprint(1), 1);
        assert_eq!(QuantizationLevel::Int8.estimate_footprint(u64::MAX), u64::MAX / 2 + 1);
    }

    #[test]
    fn test_select_highest_fidelity_that_fits() {
        let policy = QuantizationPolicy::default();
        let spec = BackendSpec::new("medical", "llama3.2:3b", 8 * GIB);

        let full = policy.select(ComputeClass::Accelerator, &spec, 10 * GIB);
        assert_eq!(full, Some((QuantizationLevel::Full, 8 * GIB)));

        let int8 = policy.select(ComputeClass::Accelerator, &spec, 5 * GIB);
        assert_eq!(int8, Some((QuantizationLevel::Int8, 4 * GIB)));

        let int4 = policy.select(ComputeClass::Cpu, &spec, 3 * GIB);
        assert_eq!(int4, Some((QuantizationLevel::Int4, 2 * GIB)));

        assert_eq!(policy.select(ComputeClass::Cpu, &spec, GIB), None);
    }

    #[test]
    fn test_select_honors_class_order_and_support() {
        let policy = QuantizationPolicy {
            accelerator: QuantizationLevel::ALL.to_vec(),
            cpu: vec![QuantizationLevel::Int4],
        };
        let spec = BackendSpec::new("finance", "phi3", 4 * GIB);
        assert_eq!(
            policy.select(ComputeClass::Cpu, &spec, 100 * GIB),
            Some((QuantizationLevel::Int4, GIB))
        );

        let restricted = BackendSpec::new("support", "gemma", 4 * GIB)
            .with_quantizations(vec![QuantizationLevel::Int8]);
        assert_eq!(
            policy.select(ComputeClass::Accelerator, &restricted, 100 * GIB),
            Some((QuantizationLevel::Int8, 2 * GIB))
        );
        assert_eq!(policy.minimum_footprint(ComputeClass::Accelerator, &restricted), 2 * GIB);
    }
}

//! Static map from boundary identifier to component handle

use std::collections::BTreeMap;

use tracing::warn;

use variety_core::{Boundary, VarietyError, VarietyResult};

use crate::adjust::{Adjustment, AdjustmentSink};
use crate::amplifier::AmplifierHandle;
use crate::filter::FilterHandle;

/// Handles for every boundary, built once at startup
#[derive(Debug, Clone, Default)]
pub struct BoundaryRegistry {
    filters: BTreeMap<Boundary, FilterHandle>,
    amplifiers: BTreeMap<Boundary, AmplifierHandle>,
}

impl BoundaryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert_filter(&mut self, handle: FilterHandle) {
        self.filters.insert(handle.boundary(), handle);
    }

    pub(crate) fn insert_amplifier(&mut self, handle: AmplifierHandle) {
        self.amplifiers.insert(handle.boundary(), handle);
    }

    pub fn filter(&self, boundary: Boundary) -> Option<&FilterHandle> {
        self.filters.get(&boundary)
    }

    pub fn amplifier(&self, boundary: Boundary) -> Option<&AmplifierHandle> {
        self.amplifiers.get(&boundary)
    }

    /// Resolve a filter identifier such as `s1_to_s2`
    ///
    /// Unknown identifiers and amplifier identifiers are `InvalidBoundary`.
    pub fn resolve_filter(&self, identifier: &str) -> VarietyResult<&FilterHandle> {
        let boundary = filter_boundary(identifier)?;
        self.filters
            .get(&boundary)
            .ok_or_else(|| VarietyError::InvalidBoundary(identifier.to_string()))
    }

    /// Resolve an amplifier identifier such as `s2_to_s1`
    pub fn resolve_amplifier(&self, identifier: &str) -> VarietyResult<&AmplifierHandle> {
        let boundary = amplifier_boundary(identifier)?;
        self.amplifiers
            .get(&boundary)
            .ok_or_else(|| VarietyError::InvalidBoundary(identifier.to_string()))
    }

    pub fn filters(&self) -> impl Iterator<Item = &FilterHandle> {
        self.filters.values()
    }

    pub fn amplifiers(&self) -> impl Iterator<Item = &AmplifierHandle> {
        self.amplifiers.values()
    }
}

/// Parse an identifier that must name an upward boundary
pub fn filter_boundary(identifier: &str) -> VarietyResult<Boundary> {
    let boundary: Boundary = identifier.parse()?;
    if boundary.is_filter() {
        Ok(boundary)
    } else {
        Err(VarietyError::InvalidBoundary(identifier.to_string()))
    }
}

/// Parse an identifier that must name a downward boundary
pub fn amplifier_boundary(identifier: &str) -> VarietyResult<Boundary> {
    let boundary: Boundary = identifier.parse()?;
    if boundary.is_amplifier() {
        Ok(boundary)
    } else {
        Err(VarietyError::InvalidBoundary(identifier.to_string()))
    }
}

impl AdjustmentSink for BoundaryRegistry {
    fn dispatch(&self, adjustment: Adjustment) {
        let boundary = adjustment.boundary();
        let result = match adjustment {
            Adjustment::AdjustFiltering { magnitude, .. } => self
                .filter(boundary)
                .map(|f| f.adjust_filtering(magnitude)),
            Adjustment::DampenFilter { .. } => self.filter(boundary).map(|f| f.dampen_oscillations()),
            Adjustment::AdjustAmplification { magnitude, .. } => self
                .amplifier(boundary)
                .map(|a| a.adjust_amplification(magnitude)),
            Adjustment::DampenAmplifier { .. } => {
                self.amplifier(boundary).map(|a| a.dampen_oscillations())
            }
        };
        match result {
            None => warn!(boundary = %boundary, "No component registered for adjustment"),
            // Already logged by the mailbox; the next check re-issues
            Some(Err(_)) | Some(Ok(())) => {}
        }
    }
}

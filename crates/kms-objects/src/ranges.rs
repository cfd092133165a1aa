use kms_types::{HandleRange, ObjectHandle, ObjectRange};
use serde::{Deserialize, Serialize};

/// Handle intervals of the storage tiers. A tier is disabled when its range
/// is `None`; a tier left out of a deserialized table is disabled.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeConfig {
    pub embedded: Option<HandleRange>,
    pub nvm_static: Option<HandleRange>,
    pub nvm_dynamic: Option<HandleRange>,
    pub vm_dynamic: Option<HandleRange>,
    pub ext_static: Option<HandleRange>,
    pub ext_dynamic: Option<HandleRange>,
}

impl Default for RangeConfig {
    fn default() -> Self {
        Self {
            embedded: Some(HandleRange::new(1, 29)),
            nvm_static: Some(HandleRange::new(30, 49)),
            nvm_dynamic: Some(HandleRange::new(50, 69)),
            vm_dynamic: None,
            ext_static: Some(HandleRange::new(90, 109)),
            ext_dynamic: Some(HandleRange::new(110, 129)),
        }
    }
}

impl RangeConfig {
    /// Every tier disabled.
    pub fn empty() -> Self {
        Self {
            embedded: None,
            nvm_static: None,
            nvm_dynamic: None,
            vm_dynamic: None,
            ext_static: None,
            ext_dynamic: None,
        }
    }

    /// Interval of a tier, if enabled.
    pub fn get(&self, range: ObjectRange) -> Option<HandleRange> {
        match range {
            ObjectRange::Embedded => self.embedded,
            ObjectRange::NvmStatic => self.nvm_static,
            ObjectRange::NvmDynamic => self.nvm_dynamic,
            ObjectRange::VmDynamic => self.vm_dynamic,
            ObjectRange::ExtTokenStatic => self.ext_static,
            ObjectRange::ExtTokenDynamic => self.ext_dynamic,
            ObjectRange::Unknown => None,
        }
    }

    /// Enabled tiers with their intervals, in resolution precedence.
    pub fn enabled(&self) -> impl Iterator<Item = (ObjectRange, HandleRange)> + '_ {
        ObjectRange::PRECEDENCE
            .into_iter()
            .filter_map(|r| self.get(r).map(|h| (r, h)))
    }

    /// The first tier, in precedence order, whose interval contains `handle`.
    pub fn resolve(&self, handle: ObjectHandle) -> ObjectRange {
        self.enabled()
            .find(|(_, interval)| interval.contains(handle))
            .map(|(range, _)| range)
            .unwrap_or(ObjectRange::Unknown)
    }

    /// The tier run-time objects are created in: VM-dynamic when enabled,
    /// else NVM-dynamic.
    pub fn dynamic_target(&self) -> Option<(ObjectRange, HandleRange)> {
        self.vm_dynamic
            .map(|h| (ObjectRange::VmDynamic, h))
            .or_else(|| self.nvm_dynamic.map(|h| (ObjectRange::NvmDynamic, h)))
    }

    /// First enabled tier with an empty or zero-based interval.
    pub fn invalid_range(&self) -> Option<ObjectRange> {
        self.enabled()
            .find(|(_, h)| h.min == 0 || h.min > h.max)
            .map(|(r, _)| r)
    }

    /// First pair of enabled tiers whose intervals overlap.
    pub fn overlapping_pair(&self) -> Option<(ObjectRange, ObjectRange)> {
        let enabled: Vec<_> = self.enabled().collect();
        for (i, (a, ha)) in enabled.iter().enumerate() {
            for (b, hb) in &enabled[i + 1..] {
                if ha.overlaps(hb) {
                    return Some((*a, *b));
                }
            }
        }
        None
    }
}
